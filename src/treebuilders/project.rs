//! Projection of functions onto trees
use crate::basis::LegendreBasis;
use crate::function::RepresentableFunction;
use crate::threads::{ExecutionContext, SerialGuard};
use crate::treebuilders::builder::{build, build_serial, TreeCalculator, WaveletAdaptor};
use crate::trees::{FunctionTree, NodeIndex};
use crate::types::Result;
use log::debug;

/// Samples a function on the quadrature grid of the children of a node.
struct ProjectionCalculator<'a, F, const D: usize> {
    func: &'a F,
    basis: &'a LegendreBasis,
}

impl<'a, F: RepresentableFunction<D>, const D: usize> TreeCalculator<D>
    for ProjectionCalculator<'a, F, D>
{
    fn compute(&self, index: &NodeIndex<D>) -> Vec<f64> {
        let m = self.basis.size();
        let block_size = m.pow(D as u32);
        let points = self.basis.quadrature().points();
        let scale = index.scale() + 1;
        let width = 2.0_f64.powi(-scale);
        let factor = width.powf(0.5 * D as f64);

        let mut coefs = Vec::with_capacity(block_size << D);
        let mut values = vec![0.0; block_size];
        let mut r = [0.0; D];
        for k in 0..1 << D {
            let child = index.child(k);
            for (q, value) in values.iter_mut().enumerate() {
                let mut rest = q;
                for d in 0..D {
                    r[d] = (child.translation()[d] as f64 + points[rest % m]) * width;
                    rest /= m;
                }
                *value = self.func.evaluate(&r);
            }
            coefs.extend(
                self.basis
                    .values_to_coefs::<D>(&values)
                    .into_iter()
                    .map(|c| c * factor),
            );
        }
        self.basis.compress::<D>(&mut coefs);
        coefs
    }
}

fn resolve_prec<const D: usize>(prec: f64, out: &FunctionTree<D>) -> f64 {
    if prec < 0.0 {
        out.default_precision()
    } else {
        prec
    }
}

/// Project `func` onto `out` to precision `prec`, refining the current end
/// nodes of `out`. A negative precision selects the default precision of the
/// tree, a negative `max_iter` allows unbounded refinement. Precision is
/// relative to the norm of the result unless `abs_prec` is set.
pub fn project<const D: usize, F>(
    prec: f64,
    out: &mut FunctionTree<D>,
    func: &F,
    max_iter: i32,
    abs_prec: bool,
) -> Result<usize>
where
    F: RepresentableFunction<D> + Sync,
{
    let ctx = ExecutionContext::global()?;
    project_with(&ctx, prec, out, func, max_iter, abs_prec)
}

/// As [`project`], on an explicit execution context.
pub fn project_with<const D: usize, F>(
    ctx: &ExecutionContext,
    prec: f64,
    out: &mut FunctionTree<D>,
    func: &F,
    max_iter: i32,
    abs_prec: bool,
) -> Result<usize>
where
    F: RepresentableFunction<D> + Sync,
{
    let prec = resolve_prec(prec, out);
    let mra = out.mra().clone();
    let calculator = ProjectionCalculator {
        func,
        basis: mra.basis(),
    };
    let adaptor = WaveletAdaptor::new(prec, abs_prec, mra.max_scale());
    let rounds = build(ctx, out, &calculator, &adaptor, max_iter)?;
    debug!(
        "Projected '{}' to {prec:e}: {} nodes in {rounds} rounds",
        out.name(),
        out.n_nodes()
    );
    Ok(rounds)
}

/// As [`project`] for functions that may not be called concurrently. The
/// process-wide thread count is forced to one for the duration of the call.
pub fn project_serial<const D: usize, F>(
    prec: f64,
    out: &mut FunctionTree<D>,
    func: &F,
    max_iter: i32,
    abs_prec: bool,
) -> Result<usize>
where
    F: RepresentableFunction<D>,
{
    let _guard = SerialGuard::new();
    let prec = resolve_prec(prec, out);
    let mra = out.mra().clone();
    let calculator = ProjectionCalculator {
        func,
        basis: mra.basis(),
    };
    let adaptor = WaveletAdaptor::new(prec, abs_prec, mra.max_scale());
    build_serial(out, &calculator, &adaptor, max_iter)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mra::{BoundingBox, MultiResolutionAnalysis};
    use approx::*;

    #[test]
    fn test_polynomial_is_exact() {
        //! A polynomial within the basis order needs no refinement
        let mra = MultiResolutionAnalysis::new(BoundingBox::<2>::unit(), 3).unwrap();
        let mut tree = FunctionTree::new(&mra, "poly");
        let ctx = ExecutionContext::new(2).unwrap();
        let f = |r: &[f64; 2]| 1.0 + r[0] * r[1] - r[1].powi(3);
        project_with(&ctx, 1e-8, &mut tree, &f, -1, false).unwrap();
        assert_eq!(tree.n_nodes(), 1);
        for r in [[0.1, 0.2], [0.7, 0.35], [0.99, 0.01]] {
            assert_relative_eq!(tree.evaluate(&r), f(&r), epsilon = 1e-12);
        }
        // int_0^1 int_0^1 (1 + xy - y^3) = 1 + 1/4 - 1/4
        assert_relative_eq!(tree.integrate(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_default_precision() {
        let mra = MultiResolutionAnalysis::new(BoundingBox::<1>::unit(), 5).unwrap();
        let f = |r: &[f64; 1]| (-50.0 * (r[0] - 0.5).powi(2)).exp();
        let ctx = ExecutionContext::serial().unwrap();

        let mut coarse = FunctionTree::new(&mra, "coarse");
        coarse.set_default_precision(1e-2);
        project_with(&ctx, -1.0, &mut coarse, &f, -1, false).unwrap();

        let mut fine = FunctionTree::new(&mra, "fine");
        project_with(&ctx, -1.0, &mut fine, &f, -1, false).unwrap();
        assert!(fine.n_nodes() > coarse.n_nodes());
    }
}
