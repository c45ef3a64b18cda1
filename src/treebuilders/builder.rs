//! The adaptive build loop shared by projection, arithmetic and operators
use crate::threads::ExecutionContext;
use crate::trees::{FunctionTree, MwNode, NodeId, NodeIndex};
use crate::types::{Result, MACHINE_PREC};
use log::{debug, warn};
use rayon::prelude::*;

/// Computes the compressed coefficients of the output at one node index.
pub trait TreeCalculator<const D: usize> {
    /// Coefficients of the node at `index`, `2^D (k+1)^D` values.
    fn compute(&self, index: &NodeIndex<D>) -> Vec<f64>;
}

/// Decides whether a freshly computed node needs to be refined.
#[derive(Debug, Clone, Copy)]
pub struct WaveletAdaptor {
    prec: f64,
    abs_prec: bool,
    max_scale: i32,
    reference: Option<f64>,
}

impl WaveletAdaptor {
    /// Refine to `prec`, relative to the norm of the tree being built unless
    /// `abs_prec` is set. Negative precision never refines.
    pub fn new(prec: f64, abs_prec: bool, max_scale: i32) -> Self {
        Self {
            prec,
            abs_prec,
            max_scale,
            reference: None,
        }
    }

    /// Measure relative precision against a fixed squared norm instead of the
    /// norm of the tree being built.
    pub fn with_reference(mut self, square_norm: f64) -> Self {
        self.reference = Some(square_norm);
        self
    }

    /// The precision.
    pub fn precision(&self) -> f64 {
        self.prec
    }

    /// The wavelet norm a node at `scale` may carry without being refined.
    pub fn threshold(&self, scale: i32, tree_square_norm: f64) -> f64 {
        let norm = if self.abs_prec {
            1.0
        } else {
            self.reference.unwrap_or(tree_square_norm).max(0.0).sqrt()
        };
        let scaled = self.prec * norm * 2.0_f64.powf(-0.5 * (scale + 1) as f64);
        scaled.max(2.0 * MACHINE_PREC)
    }

    /// Whether the wavelet part of `node` is above the threshold.
    pub fn exceeds<const D: usize>(&self, node: &MwNode<D>, tree_square_norm: f64) -> bool {
        if self.prec < 0.0 || !node.has_coefs() {
            return false;
        }
        let wavelet = node.wavelet_norm().max(0.0).sqrt();
        wavelet > self.threshold(node.scale(), tree_square_norm)
    }

    /// Whether `node` should be split.
    pub fn split_check<const D: usize>(&self, node: &MwNode<D>, tree_square_norm: f64) -> bool {
        node.scale() < self.max_scale && self.exceeds(node, tree_square_norm)
    }
}

/// Compute the end nodes of `tree` with `calculator` and refine them until
/// `adaptor` accepts every end node or `max_iter` rounds have been run.
/// Nodes of one round are computed in parallel on `ctx`. Returns the number
/// of refinement rounds.
pub fn build<const D: usize, C: TreeCalculator<D> + Sync>(
    ctx: &ExecutionContext,
    tree: &mut FunctionTree<D>,
    calculator: &C,
    adaptor: &WaveletAdaptor,
    max_iter: i32,
) -> Result<usize> {
    let rounds = run_parallel(ctx, tree, calculator, adaptor, max_iter)?;
    tree.bottom_up_transform();
    Ok(rounds)
}

/// As [`build`] for calculators producing the non-standard form, where the
/// scaling part of a node only holds contributions from its own scale. The
/// scaling parts are accumulated from the roots down before the final
/// bottom-up transform.
pub fn build_nonstandard<const D: usize, C: TreeCalculator<D> + Sync>(
    ctx: &ExecutionContext,
    tree: &mut FunctionTree<D>,
    calculator: &C,
    adaptor: &WaveletAdaptor,
    max_iter: i32,
) -> Result<usize> {
    let rounds = run_parallel(ctx, tree, calculator, adaptor, max_iter)?;
    tree.top_down_accumulate();
    tree.bottom_up_transform();
    Ok(rounds)
}

fn run_parallel<const D: usize, C: TreeCalculator<D> + Sync>(
    ctx: &ExecutionContext,
    tree: &mut FunctionTree<D>,
    calculator: &C,
    adaptor: &WaveletAdaptor,
    max_iter: i32,
) -> Result<usize> {
    run(tree, adaptor, max_iter, |indices| {
        ctx.install(|| {
            indices
                .into_par_iter()
                .map(|index| calculator.compute(&index))
                .collect()
        })
    })
}

/// As [`build`], computing every node on the calling thread.
pub fn build_serial<const D: usize, C: TreeCalculator<D>>(
    tree: &mut FunctionTree<D>,
    calculator: &C,
    adaptor: &WaveletAdaptor,
    max_iter: i32,
) -> Result<usize> {
    let rounds = run(tree, adaptor, max_iter, |indices| {
        indices.iter().map(|index| calculator.compute(index)).collect()
    })?;
    tree.bottom_up_transform();
    Ok(rounds)
}

fn run<const D: usize, F>(
    tree: &mut FunctionTree<D>,
    adaptor: &WaveletAdaptor,
    max_iter: i32,
    mut compute: F,
) -> Result<usize>
where
    F: FnMut(Vec<NodeIndex<D>>) -> Vec<Vec<f64>>,
{
    let mut work: Vec<NodeId> = tree.end_node_ids().to_vec();
    let mut iter = 0;
    loop {
        let indices: Vec<NodeIndex<D>> = work.iter().map(|id| *tree[*id].index()).collect();
        for (id, coefs) in work.iter().zip(compute(indices)) {
            tree.set_node_coefs(*id, coefs);
        }
        let square_norm = tree.square_norm();
        debug!(
            "Build round {iter}: {} nodes computed, squared norm {square_norm:.6e}",
            work.len()
        );

        if max_iter >= 0 && iter >= max_iter as usize {
            break;
        }
        let split: Vec<NodeId> = work
            .iter()
            .copied()
            .filter(|id| adaptor.split_check(&tree[*id], square_norm))
            .collect();
        let mut next = Vec::with_capacity(split.len() << D);
        for id in split {
            next.extend(tree.split_node(id, false)?);
        }
        if next.is_empty() {
            let max_scale = tree.mra().max_scale();
            if work
                .iter()
                .any(|id| tree[*id].scale() >= max_scale && adaptor.exceeds(&tree[*id], square_norm))
            {
                warn!("Build of '{}' stopped at the maximum scale", tree.name());
            }
            break;
        }
        work = next;
        iter += 1;
    }
    Ok(iter)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mra::{BoundingBox, MultiResolutionAnalysis};

    struct Step {
        n_coefs: usize,
    }

    impl TreeCalculator<1> for Step {
        fn compute(&self, index: &NodeIndex<1>) -> Vec<f64> {
            // wavelet content only in the box containing x = 1/3
            let mut coefs = vec![0.0; self.n_coefs];
            let width = 2.0_f64.powi(-index.scale());
            let lower = index.translation()[0] as f64 * width;
            if (lower..lower + width).contains(&(1.0 / 3.0)) {
                coefs[self.n_coefs / 2] = 1.0;
            }
            coefs
        }
    }

    #[test]
    fn test_build_refines_locally() {
        let mra = MultiResolutionAnalysis::with_max_depth(BoundingBox::<1>::unit(), 2, 6).unwrap();
        let mut tree = FunctionTree::new(&mra, "step");
        let ctx = ExecutionContext::new(2).unwrap();
        let calculator = Step {
            n_coefs: mra.n_coefs(),
        };
        let adaptor = WaveletAdaptor::new(1e-3, true, mra.max_scale());
        let rounds = build(&ctx, &mut tree, &calculator, &adaptor, -1).unwrap();
        assert_eq!(rounds, 5);
        assert_eq!(tree.depth(), 6);
        assert_eq!(tree.n_nodes(), 1 + 2 * 5);
        assert_eq!(tree.n_end_nodes(), 6);
    }

    #[test]
    fn test_max_iter() {
        let mra = MultiResolutionAnalysis::with_max_depth(BoundingBox::<1>::unit(), 2, 6).unwrap();
        let mut tree = FunctionTree::new(&mra, "step");
        let ctx = ExecutionContext::serial().unwrap();
        let calculator = Step {
            n_coefs: mra.n_coefs(),
        };
        let adaptor = WaveletAdaptor::new(1e-3, true, mra.max_scale());
        assert_eq!(build(&ctx, &mut tree, &calculator, &adaptor, 0).unwrap(), 0);
        assert_eq!(tree.n_nodes(), 1);
        build_serial(&mut tree, &calculator, &adaptor, 2).unwrap();
        assert_eq!(tree.depth(), 3);
    }

    #[test]
    fn test_threshold() {
        let adaptor = WaveletAdaptor::new(1e-4, false, 10).with_reference(4.0);
        assert!((adaptor.threshold(1, 100.0) - 1e-4).abs() < 1e-18);
        let absolute = WaveletAdaptor::new(0.0, true, 10);
        assert_eq!(absolute.threshold(3, 1.0), 2.0 * MACHINE_PREC);
    }
}
