use approx::*;
use mwtree::gaussian::GaussFunc;
use mwtree::mra::{BoundingBox, MultiResolutionAnalysis};
use mwtree::operators::{ConvolutionOperator, OperatorKind};
use mwtree::threads::ExecutionContext;
use mwtree::treebuilders::{apply_with, dot, project_with};
use mwtree::trees::FunctionTree;
use std::f64::consts::PI;

fn gaussian_tree<const D: usize>(
    mra: &MultiResolutionAnalysis<D>,
    beta: f64,
    prec: f64,
) -> FunctionTree<D> {
    let alpha = (beta / PI).powf(0.5 * D as f64);
    let func = GaussFunc::new(alpha, beta, [0.0; D]).unwrap();
    let ctx = ExecutionContext::new(4).unwrap();
    let mut tree = FunctionTree::new(mra, "density");
    project_with(&ctx, prec, &mut tree, &func, -1, false).unwrap();
    tree
}

/// Error function by composite Simpson quadrature of its integral.
fn erf(x: f64) -> f64 {
    let n = 2000;
    let h = x / n as f64;
    let f = |t: f64| (-t * t).exp();
    let mut sum = f(0.0) + f(x);
    for i in 1..n {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(i as f64 * h);
    }
    2.0 / PI.sqrt() * sum * h / 3.0
}

#[test]
fn test_identity_2d() {
    let prec = 1e-5;
    let mra = MultiResolutionAnalysis::new(BoundingBox::<2>::symmetric(0, 1).unwrap(), 5).unwrap();
    let inp = gaussian_tree(&mra, 30.0, prec);
    let oper = ConvolutionOperator::identity(&mra, prec).unwrap();
    assert_eq!(oper.kind(), OperatorKind::Identity);

    let out = oper.apply_to(&inp).unwrap();
    assert_eq!(out.name(), inp.name());
    assert_relative_eq!(out.square_norm(), inp.square_norm(), max_relative = 1e-6);
    assert_relative_eq!(out.integrate(), inp.integrate(), max_relative = 1e-8);
    for r in [[0.0, 0.0], [0.1, -0.2], [-0.5, 0.4]] {
        assert_abs_diff_eq!(out.evaluate(&r), inp.evaluate(&r), epsilon = 1e-4);
    }
}

#[test]
fn test_poisson_of_gaussian() {
    //! The potential of a normalised Gaussian is erf(sqrt(beta) r) / (4 pi r)
    let prec = 3e-3;
    let beta = 10.0;
    let mra = MultiResolutionAnalysis::new(BoundingBox::<3>::symmetric(0, 1).unwrap(), 4).unwrap();
    let density = gaussian_tree(&mra, beta, prec);
    let oper = ConvolutionOperator::poisson(&mra, prec).unwrap();
    assert!(oper.n_terms() > 10);

    let ctx = ExecutionContext::new(4).unwrap();
    let mut potential = FunctionTree::new(&mra, "potential");
    apply_with(&ctx, prec, &mut potential, &oper, &density, -1, false).unwrap();

    // Self energy of a normalised Gaussian charge
    let energy = (2.0 * beta / PI).sqrt() / (4.0 * PI);
    assert_relative_eq!(dot(&density, &potential).unwrap(), energy, max_relative = 1e-2);

    let r = 0.3;
    let exact = erf(beta.sqrt() * r) / (4.0 * PI * r);
    assert_relative_eq!(potential.evaluate(&[r, 0.0, 0.0]), exact, max_relative = 5e-2);
}

#[test]
fn test_helmholtz_screens_poisson() {
    let prec = 1e-2;
    let mra = MultiResolutionAnalysis::new(BoundingBox::<3>::symmetric(0, 1).unwrap(), 3).unwrap();
    let density = gaussian_tree(&mra, 10.0, prec);
    let ctx = ExecutionContext::new(4).unwrap();

    let poisson = ConvolutionOperator::poisson(&mra, prec).unwrap();
    let helmholtz = ConvolutionOperator::helmholtz(&mra, 5.0, prec).unwrap();
    assert_eq!(helmholtz.kind(), OperatorKind::Helmholtz { exponent: 5.0 });
    assert!(helmholtz.n_terms() <= poisson.n_terms());

    let mut coulomb = FunctionTree::new(&mra, "coulomb");
    apply_with(&ctx, prec, &mut coulomb, &poisson, &density, -1, false).unwrap();
    let mut yukawa = FunctionTree::new(&mra, "yukawa");
    apply_with(&ctx, prec, &mut yukawa, &helmholtz, &density, -1, false).unwrap();

    let centre = [0.0; 3];
    assert!(yukawa.evaluate(&centre) > 0.0);
    assert!(yukawa.evaluate(&centre) < coulomb.evaluate(&centre));
    assert!(yukawa.integrate() < coulomb.integrate());
}

#[test]
fn test_missing_input() {
    let mra = MultiResolutionAnalysis::new(BoundingBox::<1>::unit(), 3).unwrap();
    let oper = ConvolutionOperator::identity(&mra, 1e-3).unwrap();
    let empty = FunctionTree::new(&mra, "empty");
    assert!(oper.apply_to(&empty).is_err());
}
