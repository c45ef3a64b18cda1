//! Node-wise arithmetic on function trees
//!
//! Linear combinations are exact on any grid that contains the inputs, since
//! compressed coefficients are linear in the function. Products and powers
//! are taken pointwise on the quadrature grid of the children of a node and
//! projected back, so they are only exact up to the aliasing error of the
//! grid they are computed on.
use crate::basis::LegendreBasis;
use crate::threads::ExecutionContext;
use crate::treebuilders::builder::{build, TreeCalculator, WaveletAdaptor};
use crate::trees::{FunctionTree, NodeId, NodeIndex};
use crate::types::{Error, Result};
use itertools::izip;
use rayon::prelude::*;

fn check_inputs<const D: usize>(out: &FunctionTree<D>, inputs: &[&FunctionTree<D>]) -> Result<()> {
    for inp in inputs {
        if inp.mra() != out.mra() {
            return Err(Error::IncompatibleMra);
        }
        if !inp.has_coefs() {
            return Err(Error::MissingCoefs(inp.name().to_string()));
        }
    }
    Ok(())
}

fn make_adaptor<const D: usize>(prec: f64, out: &FunctionTree<D>) -> WaveletAdaptor {
    WaveletAdaptor::new(prec, false, out.mra().max_scale())
}

struct AddCalculator<'a, const D: usize> {
    terms: &'a [(f64, &'a FunctionTree<D>)],
    n_coefs: usize,
}

impl<'a, const D: usize> TreeCalculator<D> for AddCalculator<'a, D> {
    fn compute(&self, index: &NodeIndex<D>) -> Vec<f64> {
        let mut coefs = vec![0.0; self.n_coefs];
        for (c, tree) in self.terms {
            if let Some(inp) = tree.coefs_at(index) {
                for (out, x) in coefs.iter_mut().zip(inp.iter()) {
                    *out += c * x;
                }
            }
        }
        coefs
    }
}

/// Pointwise values of `coefs` on the quadrature grid of each child.
fn child_values<const D: usize>(basis: &LegendreBasis, scale: i32, coefs: &[f64]) -> Vec<Vec<f64>> {
    let block_size = basis.size().pow(D as u32);
    let mut coefs = coefs.to_vec();
    basis.reconstruct::<D>(&mut coefs);
    let factor = 2.0_f64.powf(0.5 * D as f64 * (scale + 1) as f64);
    coefs
        .chunks(block_size)
        .map(|block| {
            basis
                .coefs_to_values::<D>(block)
                .into_iter()
                .map(|v| v * factor)
                .collect()
        })
        .collect()
}

/// Compressed node coefficients of the function with pointwise values
/// `values` on the children of a node at `scale`.
fn child_coefs<const D: usize>(basis: &LegendreBasis, scale: i32, values: &[Vec<f64>]) -> Vec<f64> {
    let factor = 2.0_f64.powf(-0.5 * D as f64 * (scale + 1) as f64);
    let mut coefs: Vec<f64> = values
        .iter()
        .flat_map(|v| basis.values_to_coefs::<D>(v))
        .map(|c| c * factor)
        .collect();
    basis.compress::<D>(&mut coefs);
    coefs
}

struct MultiplyCalculator<'a, const D: usize> {
    c: f64,
    factors: Vec<&'a FunctionTree<D>>,
    basis: &'a LegendreBasis,
}

impl<'a, const D: usize> TreeCalculator<D> for MultiplyCalculator<'a, D> {
    fn compute(&self, index: &NodeIndex<D>) -> Vec<f64> {
        let block_size = self.basis.size().pow(D as u32);
        let mut product = vec![vec![self.c; block_size]; 1 << D];
        for tree in self.factors.iter() {
            let values = match tree.coefs_at(index) {
                Some(coefs) => child_values::<D>(self.basis, index.scale(), &coefs),
                None => vec![vec![0.0; block_size]; 1 << D],
            };
            for (p, v) in izip!(product.iter_mut(), values.iter()) {
                p.iter_mut().zip(v.iter()).for_each(|(a, b)| *a *= b);
            }
        }
        child_coefs::<D>(self.basis, index.scale(), &product)
    }
}

fn raise(x: f64, p: f64) -> f64 {
    if p.fract() == 0.0 && p.abs() < i32::MAX as f64 {
        x.powi(p as i32)
    } else {
        x.powf(p)
    }
}

struct PowerCalculator<'a, const D: usize> {
    inp: &'a FunctionTree<D>,
    p: f64,
    basis: &'a LegendreBasis,
}

impl<'a, const D: usize> TreeCalculator<D> for PowerCalculator<'a, D> {
    fn compute(&self, index: &NodeIndex<D>) -> Vec<f64> {
        let n_coefs = self.basis.size().pow(D as u32) << D;
        let Some(coefs) = self.inp.coefs_at(index) else {
            return vec![0.0; n_coefs];
        };
        let mut values = child_values::<D>(self.basis, index.scale(), &coefs);
        for v in values.iter_mut().flatten() {
            *v = raise(*v, self.p);
        }
        child_coefs::<D>(self.basis, index.scale(), &values)
    }
}

/// `out = sum_i c_i f_i`. With a negative precision the result is computed on
/// the current grid of `out` only; otherwise it is refined adaptively.
pub fn add<const D: usize>(
    prec: f64,
    out: &mut FunctionTree<D>,
    terms: &[(f64, &FunctionTree<D>)],
) -> Result<usize> {
    let ctx = ExecutionContext::global()?;
    add_with(&ctx, prec, out, terms)
}

/// As [`add`], on an explicit execution context.
pub fn add_with<const D: usize>(
    ctx: &ExecutionContext,
    prec: f64,
    out: &mut FunctionTree<D>,
    terms: &[(f64, &FunctionTree<D>)],
) -> Result<usize> {
    let inputs: Vec<&FunctionTree<D>> = terms.iter().map(|(_, t)| *t).collect();
    check_inputs(out, &inputs)?;
    let calculator = AddCalculator {
        terms,
        n_coefs: out.mra().n_coefs(),
    };
    let adaptor = make_adaptor(prec, out);
    build(ctx, out, &calculator, &adaptor, -1)
}

/// `out = c a b`.
pub fn multiply<const D: usize>(
    prec: f64,
    out: &mut FunctionTree<D>,
    c: f64,
    a: &FunctionTree<D>,
    b: &FunctionTree<D>,
) -> Result<usize> {
    let ctx = ExecutionContext::global()?;
    multiply_with(&ctx, prec, out, c, &[a, b])
}

/// `out = c prod_i f_i`, on an explicit execution context.
pub fn multiply_with<const D: usize>(
    ctx: &ExecutionContext,
    prec: f64,
    out: &mut FunctionTree<D>,
    c: f64,
    factors: &[&FunctionTree<D>],
) -> Result<usize> {
    check_inputs(out, factors)?;
    let mra = out.mra().clone();
    let calculator = MultiplyCalculator {
        c,
        factors: factors.to_vec(),
        basis: mra.basis(),
    };
    let adaptor = make_adaptor(prec, out);
    build(ctx, out, &calculator, &adaptor, -1)
}

/// `out = inp^p`.
pub fn power<const D: usize>(
    prec: f64,
    out: &mut FunctionTree<D>,
    inp: &FunctionTree<D>,
    p: f64,
) -> Result<usize> {
    let ctx = ExecutionContext::global()?;
    power_with(&ctx, prec, out, inp, p)
}

/// As [`power`], on an explicit execution context.
pub fn power_with<const D: usize>(
    ctx: &ExecutionContext,
    prec: f64,
    out: &mut FunctionTree<D>,
    inp: &FunctionTree<D>,
    p: f64,
) -> Result<usize> {
    check_inputs(out, &[inp])?;
    let mra = out.mra().clone();
    let calculator = PowerCalculator {
        inp,
        p,
        basis: mra.basis(),
    };
    let adaptor = make_adaptor(prec, out);
    build(ctx, out, &calculator, &adaptor, -1)
}

/// `out = inp^2`.
pub fn square<const D: usize>(
    prec: f64,
    out: &mut FunctionTree<D>,
    inp: &FunctionTree<D>,
) -> Result<usize> {
    power(prec, out, inp, 2.0)
}

/// The L2 inner product of two trees.
pub fn dot<const D: usize>(a: &FunctionTree<D>, b: &FunctionTree<D>) -> Result<f64> {
    check_inputs(a, &[a, b])?;
    let block_size = a.mra().block_size();
    let mut result = 0.0;
    for (ra, rb) in izip!(a.root_ids(), b.root_ids()) {
        if let (Some(x), Some(y)) = (a[*ra].component(0), b[*rb].component(0)) {
            result += x.iter().zip(y.iter()).map(|(p, q)| p * q).sum::<f64>();
        }
    }
    let (small, large) = if a.n_nodes() <= b.n_nodes() { (a, b) } else { (b, a) };
    for id in small.ids_top_down() {
        let node = &small[id];
        let Some(other) = large.find_id(node.index()).map(|o| &large[o]) else {
            continue;
        };
        if let (Some(x), Some(y)) = (node.coefs(), other.coefs()) {
            result += x[block_size..]
                .iter()
                .zip(y[block_size..].iter())
                .map(|(p, q)| p * q)
                .sum::<f64>();
        }
    }
    Ok(result)
}

/// Apply `update` to the coefficients of every persisted node of `out`,
/// given the coefficients computed for it.
fn update_nodes<const D: usize, F>(
    ctx: &ExecutionContext,
    out: &mut FunctionTree<D>,
    ids: Vec<NodeId>,
    compute: F,
) where
    F: Fn(&FunctionTree<D>, NodeId) -> Option<Vec<f64>> + Sync,
{
    let tree: &FunctionTree<D> = out;
    let results: Vec<Option<Vec<f64>>> =
        ctx.install(|| ids.par_iter().map(|id| compute(tree, *id)).collect());
    for (id, coefs) in ids.into_iter().zip(results) {
        if let Some(coefs) = coefs {
            out.set_node_coefs(id, coefs);
        }
    }
}

/// `out += c inp`, refining `out` to the grid of `inp` first.
pub fn add_assign<const D: usize>(out: &mut FunctionTree<D>, c: f64, inp: &FunctionTree<D>) -> Result<()> {
    check_inputs(out, &[&*out, inp])?;
    crate::treebuilders::grid::refine_grid(out, inp)?;
    let ctx = ExecutionContext::global()?;
    let ids = out.ids_top_down();
    update_nodes(&ctx, out, ids, |tree, id| {
        let mut coefs = tree[id].coefs()?.to_vec();
        let other = inp.coefs_at(tree[id].index())?;
        for (x, y) in coefs.iter_mut().zip(other.iter()) {
            *x += c * y;
        }
        Some(coefs)
    });
    Ok(())
}

/// `out *= inp`, on the grid of both refined by one extra level.
pub fn multiply_assign<const D: usize>(out: &mut FunctionTree<D>, inp: &FunctionTree<D>) -> Result<()> {
    check_inputs(out, &[&*out, inp])?;
    crate::treebuilders::grid::refine_grid(out, inp)?;
    crate::treebuilders::grid::refine_grid_scales(out, 1)?;
    let ctx = ExecutionContext::global()?;
    let mra = out.mra().clone();
    let basis = mra.basis();
    let ids = out.end_node_ids().to_vec();
    update_nodes(&ctx, out, ids, |tree, id| {
        let node = &tree[id];
        let own = child_values::<D>(basis, node.scale(), node.coefs()?);
        let other = child_values::<D>(basis, node.scale(), &inp.coefs_at(node.index())?);
        let product: Vec<Vec<f64>> = izip!(own.iter(), other.iter())
            .map(|(a, b)| a.iter().zip(b.iter()).map(|(x, y)| x * y).collect())
            .collect();
        Some(child_coefs::<D>(basis, node.scale(), &product))
    });
    out.bottom_up_transform();
    Ok(())
}

/// `out = out^p`, on the grid of `out` refined by one extra level.
pub fn power_assign<const D: usize>(out: &mut FunctionTree<D>, p: f64) -> Result<()> {
    if !out.has_coefs() {
        return Err(Error::MissingCoefs(out.name().to_string()));
    }
    crate::treebuilders::grid::refine_grid_scales(out, 1)?;
    let ctx = ExecutionContext::global()?;
    let mra = out.mra().clone();
    let basis = mra.basis();
    let ids = out.end_node_ids().to_vec();
    update_nodes(&ctx, out, ids, |tree, id| {
        let node = &tree[id];
        let mut values = child_values::<D>(basis, node.scale(), node.coefs()?);
        for v in values.iter_mut().flatten() {
            *v = raise(*v, p);
        }
        Some(child_coefs::<D>(basis, node.scale(), &values))
    });
    out.bottom_up_transform();
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mra::{BoundingBox, MultiResolutionAnalysis};
    use crate::treebuilders::grid::{build_grid, build_grid_scales};
    use crate::treebuilders::project::project_with;
    use approx::*;

    fn mra() -> MultiResolutionAnalysis<1> {
        MultiResolutionAnalysis::new(BoundingBox::new(0, [-1], [2]).unwrap(), 5).unwrap()
    }

    fn projected(mra: &MultiResolutionAnalysis<1>, f: impl Fn(&[f64; 1]) -> f64 + Sync) -> FunctionTree<1> {
        let ctx = ExecutionContext::new(2).unwrap();
        let mut tree = FunctionTree::new(mra, "f");
        project_with(&ctx, 1e-8, &mut tree, &f, -1, false).unwrap();
        tree
    }

    #[test]
    fn test_linear_combination() {
        let mra = mra();
        let a = projected(&mra, |r| (-20.0 * r[0] * r[0]).exp());
        let b = projected(&mra, |r| (3.0 * r[0]).sin());
        let mut out = FunctionTree::new(&mra, "out");
        build_grid(&mut out, &[&a, &b]).unwrap();
        add(-1.0, &mut out, &[(2.0, &a), (-0.5, &b)]).unwrap();
        for x in [-0.7_f64, -0.1, 0.33, 0.8] {
            let expected = 2.0 * (-20.0 * x * x).exp() - 0.5 * (3.0 * x).sin();
            assert_relative_eq!(out.evaluate(&[x]), expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_product_and_power() {
        let mra = mra();
        let a = projected(&mra, |r| 1.0 + r[0]);
        let b = projected(&mra, |r| (-4.0 * r[0] * r[0]).exp());
        let ctx = ExecutionContext::new(2).unwrap();

        let mut out = FunctionTree::new(&mra, "ab");
        build_grid(&mut out, &[&a, &b]).unwrap();
        build_grid_scales(&mut out, 1).unwrap();
        multiply_with(&ctx, -1.0, &mut out, 3.0, &[&a, &b]).unwrap();
        for x in [-0.6_f64, 0.0, 0.45] {
            let expected = 3.0 * (1.0 + x) * (-4.0 * x * x).exp();
            assert_relative_eq!(out.evaluate(&[x]), expected, epsilon = 1e-6);
        }

        let mut sq = FunctionTree::new(&mra, "b^2");
        build_grid(&mut sq, &[&b]).unwrap();
        build_grid_scales(&mut sq, 1).unwrap();
        power_with(&ctx, -1.0, &mut sq, &b, 2.0).unwrap();
        assert_relative_eq!(
            sq.integrate(),
            (std::f64::consts::PI / 8.0).sqrt() * erf(8.0_f64.sqrt()),
            epsilon = 1e-6
        );
        assert_relative_eq!(dot(&b, &b).unwrap(), sq.integrate(), epsilon = 1e-6);
    }

    fn erf(x: f64) -> f64 {
        let steps = 20000;
        let h = x / steps as f64;
        let mut sum = 0.0;
        for i in 0..steps {
            let t = (i as f64 + 0.5) * h;
            sum += (-t * t).exp();
        }
        2.0 / std::f64::consts::PI.sqrt() * sum * h
    }

    #[test]
    fn test_in_place() {
        let mra = mra();
        let mut a = projected(&mra, |r| r[0] * r[0]);
        let b = projected(&mra, |r| (-30.0 * r[0] * r[0]).exp());
        add_assign(&mut a, 1.0, &b).unwrap();
        add_assign(&mut a, -1.0, &b).unwrap();
        for x in [-0.3, 0.1, 0.9] {
            assert_relative_eq!(a.evaluate(&[x]), x * x, epsilon = 1e-10);
        }
        power_assign(&mut a, 0.5).unwrap();
        assert_relative_eq!(a.evaluate(&[-0.5]), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_missing_coefs() {
        let mra = mra();
        let a = FunctionTree::new(&mra, "empty");
        let mut out = FunctionTree::new(&mra, "out");
        assert!(matches!(
            add(-1.0, &mut out, &[(1.0, &a)]),
            Err(Error::MissingCoefs(_))
        ));
    }
}
