//! Convolution operators in non-standard form
use crate::basis::LegendreBasis;
use crate::mra::MultiResolutionAnalysis;
use crate::operators::kernel::{ConvolutionKernel, KernelExpansion};
use crate::types::{Error, Result};
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Relative size below which a kernel is considered to have decayed.
const KERNEL_CUTOFF: f64 = 1.0e-16;

/// The family an operator belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorKind {
    /// The identity.
    Identity,
    /// `1 / (4 pi r)`.
    Poisson,
    /// `exp(-mu r) / (4 pi r)`.
    Helmholtz {
        /// Screening exponent `mu`.
        exponent: f64,
    },
}

/// One dimensional non-standard blocks of a single kernel term at one scale.
///
/// Block type `2 t + u` maps input component `u` to output component `t`,
/// `0` meaning scaling and `1` wavelet along the dimension.
#[derive(Debug, Clone)]
pub(crate) struct ScaleBlocks {
    band: i64,
    blocks: Vec<[Vec<f64>; 4]>,
    norms: Vec<[f64; 4]>,
    max_norm: [f64; 4],
}

impl ScaleBlocks {
    /// Block of type `ty` at translation difference `l`.
    pub(crate) fn block(&self, ty: usize, l: i64) -> Option<&[f64]> {
        if l.abs() > self.band {
            return None;
        }
        Some(&self.blocks[(l + self.band) as usize][ty])
    }

    /// Frobenius norm of a block, zero outside the band.
    pub(crate) fn norm(&self, ty: usize, l: i64) -> f64 {
        if l.abs() > self.band {
            return 0.0;
        }
        self.norms[(l + self.band) as usize][ty]
    }

    pub(crate) fn max_norm(&self, ty: usize) -> f64 {
        self.max_norm[ty]
    }

    /// Largest `|l|` with a block of type `ty` of norm at least `threshold`.
    pub(crate) fn band_for(&self, ty: usize, threshold: f64) -> Option<i64> {
        (0..=self.band)
            .rev()
            .find(|l| self.norm(ty, *l).max(self.norm(ty, -*l)) >= threshold)
    }
}

fn frobenius(block: &[f64]) -> f64 {
    block.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// `F C F^T` for the `2m x 2m` matrix `C` of child scaling blocks, split
/// into its four `m x m` quarters.
fn non_standard_blocks(filter: &[f64], children: [&[f64]; 4], m: usize) -> [Vec<f64>; 4] {
    let two_m = 2 * m;
    let mut c = vec![0.0; two_m * two_m];
    for a in 0..2 {
        for b in 0..2 {
            let block = children[2 * a + b];
            for i in 0..m {
                for j in 0..m {
                    c[(a * m + i) * two_m + b * m + j] = block[i * m + j];
                }
            }
        }
    }
    let mut fc = vec![0.0; two_m * two_m];
    for i in 0..two_m {
        for k in 0..two_m {
            let f = filter[i * two_m + k];
            if f == 0.0 {
                continue;
            }
            for j in 0..two_m {
                fc[i * two_m + j] += f * c[k * two_m + j];
            }
        }
    }
    let mut quarters: [Vec<f64>; 4] = std::array::from_fn(|_| vec![0.0; m * m]);
    for t in 0..2 {
        for u in 0..2 {
            let quarter = &mut quarters[2 * t + u];
            for i in 0..m {
                for j in 0..m {
                    let row = t * m + i;
                    let col = u * m + j;
                    quarter[i * m + j] = (0..two_m)
                        .map(|k| fc[row * two_m + k] * filter[col * two_m + k])
                        .sum();
                }
            }
        }
    }
    quarters
}

fn compute_scale_blocks(
    kernel: &dyn ConvolutionKernel,
    coef: f64,
    basis: &LegendreBasis,
    scale: i32,
    cap: i64,
    eps: f64,
) -> ScaleBlocks {
    let m = basis.size();
    let support = kernel.support(scale + 1, KERNEL_CUTOFF);
    let limit = cap.min(support / 2 + 1).max(0);

    let mut children: HashMap<i64, Vec<f64>> = HashMap::new();
    let mut child = |l: i64| -> Vec<f64> {
        children
            .entry(l)
            .or_insert_with(|| kernel.scaling_block(basis, scale + 1, l))
            .clone()
    };
    let mut ns_block = |l: i64| {
        let c = [child(2 * l), child(2 * l - 1), child(2 * l + 1), child(2 * l)];
        non_standard_blocks(basis.filter(), [&c[0], &c[1], &c[2], &c[3]], m)
    };

    let mut positive = vec![ns_block(0)];
    let mut negative = Vec::new();
    for l in 1..=limit {
        let up = ns_block(l);
        let down = ns_block(-l);
        let largest = up
            .iter()
            .chain(down.iter())
            .map(|b| frobenius(b))
            .fold(0.0, f64::max);
        if l >= 2 && coef.abs() * largest < eps {
            break;
        }
        positive.push(up);
        negative.push(down);
    }

    let band = negative.len() as i64;
    let blocks: Vec<[Vec<f64>; 4]> = negative.into_iter().rev().chain(positive).collect();
    let norms: Vec<[f64; 4]> = blocks
        .iter()
        .map(|b| std::array::from_fn(|ty| frobenius(&b[ty])))
        .collect();
    let max_norm = std::array::from_fn(|ty| norms.iter().map(|n| n[ty]).fold(0.0, f64::max));
    ScaleBlocks {
        band,
        blocks,
        norms,
        max_norm,
    }
}

/// A convolution operator `(T f)(x) = int K(x - y) f(y) dy` whose kernel is a
/// separable expansion. The one dimensional blocks of every term are built
/// the first time a scale is visited and shared by all later applications.
pub struct ConvolutionOperator<const D: usize> {
    mra: MultiResolutionAnalysis<D>,
    kind: OperatorKind,
    prec: f64,
    root: i32,
    reach: i64,
    expansion: KernelExpansion,
    blocks: Vec<Vec<OnceLock<ScaleBlocks>>>,
}

impl<const D: usize> ConvolutionOperator<D> {
    /// Wrap an expansion.
    pub fn from_expansion(
        mra: &MultiResolutionAnalysis<D>,
        kind: OperatorKind,
        prec: f64,
        expansion: KernelExpansion,
        root: i32,
        reach: i64,
    ) -> Result<Self> {
        if !(prec > 0.0 && prec < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "operator precision must be in (0, 1), got {prec}"
            )));
        }
        if expansion.is_empty() {
            return Err(Error::InvalidParameter("empty kernel expansion".to_string()));
        }
        let n_scales = mra.max_depth();
        let blocks = (0..expansion.len())
            .map(|_| (0..n_scales).map(|_| OnceLock::new()).collect())
            .collect();
        let oper = Self {
            mra: mra.clone(),
            kind,
            prec,
            root,
            reach,
            expansion,
            blocks,
        };
        info!(
            "Created {:?} operator with {} terms, precision {prec:e}, root {root}, reach {reach}",
            kind,
            oper.n_terms()
        );
        Ok(oper)
    }

    /// The identity to precision `prec`.
    pub fn identity(mra: &MultiResolutionAnalysis<D>, prec: f64) -> Result<Self> {
        Self::identity_with_reach(mra, prec, 0, 1)
    }

    /// The identity with an explicit root scale and reach.
    pub fn identity_with_reach(
        mra: &MultiResolutionAnalysis<D>,
        prec: f64,
        root: i32,
        reach: i64,
    ) -> Result<Self> {
        Self::from_expansion(
            mra,
            OperatorKind::Identity,
            prec,
            KernelExpansion::identity(),
            root,
            reach,
        )
    }

    /// The Poisson operator, convolution with `1 / (4 pi r)`.
    pub fn poisson(mra: &MultiResolutionAnalysis<D>, prec: f64) -> Result<Self> {
        Self::poisson_with_reach(mra, prec, 0, 1)
    }

    /// The Poisson operator with an explicit root scale and reach. A negative
    /// reach covers the whole world.
    pub fn poisson_with_reach(
        mra: &MultiResolutionAnalysis<D>,
        prec: f64,
        root: i32,
        reach: i64,
    ) -> Result<Self> {
        Self::check_three_dimensional("Poisson")?;
        check_precision(prec)?;
        let expansion =
            KernelExpansion::poisson(prec / 10.0, mra.min_distance(prec), mra.max_distance())?;
        Self::from_expansion(mra, OperatorKind::Poisson, prec, expansion, root, reach)
    }

    /// The bound state Helmholtz operator, convolution with
    /// `exp(-mu r) / (4 pi r)`.
    pub fn helmholtz(mra: &MultiResolutionAnalysis<D>, mu: f64, prec: f64) -> Result<Self> {
        Self::helmholtz_with_reach(mra, mu, prec, 0, 1)
    }

    /// The Helmholtz operator with an explicit root scale and reach.
    pub fn helmholtz_with_reach(
        mra: &MultiResolutionAnalysis<D>,
        mu: f64,
        prec: f64,
        root: i32,
        reach: i64,
    ) -> Result<Self> {
        Self::check_three_dimensional("Helmholtz")?;
        check_precision(prec)?;
        let expansion = KernelExpansion::helmholtz(
            mu,
            prec / 10.0,
            mra.min_distance(prec),
            mra.max_distance(),
        )?;
        Self::from_expansion(
            mra,
            OperatorKind::Helmholtz { exponent: mu },
            prec,
            expansion,
            root,
            reach,
        )
    }

    fn check_three_dimensional(name: &str) -> Result<()> {
        if D != 3 {
            return Err(Error::InvalidParameter(format!(
                "the {name} operator is only defined in three dimensions"
            )));
        }
        Ok(())
    }

    /// The multiresolution analysis.
    pub fn mra(&self) -> &MultiResolutionAnalysis<D> {
        &self.mra
    }

    /// The operator family.
    pub fn kind(&self) -> OperatorKind {
        self.kind
    }

    /// The build precision.
    pub fn build_precision(&self) -> f64 {
        self.prec
    }

    /// The root scale.
    pub fn root(&self) -> i32 {
        self.root
    }

    /// The reach.
    pub fn reach(&self) -> i64 {
        self.reach
    }

    /// The kernel expansion.
    pub fn expansion(&self) -> &KernelExpansion {
        &self.expansion
    }

    /// Number of separable terms.
    pub fn n_terms(&self) -> usize {
        self.expansion.len()
    }

    /// Largest translation difference coupled at `scale`.
    fn band_cap(&self, scale: i32) -> i64 {
        let world = self.mra.world();
        let level = (scale - world.scale()).clamp(0, 62) as u32;
        let extent = *world.nboxes().iter().max().unwrap_or(&1) as i64;
        let extent = extent.saturating_mul(1_i64 << level.min(40));
        if self.reach < 0 {
            return extent;
        }
        let level = (scale - self.root).clamp(0, 40) as u32;
        self.reach.saturating_mul(1_i64 << level).min(extent)
    }

    /// Blocks of `term` at `scale`, built on first use.
    pub(crate) fn scale_blocks(&self, term: usize, scale: i32) -> Option<&ScaleBlocks> {
        let depth = scale - self.mra.root_scale();
        if depth < 0 {
            return None;
        }
        let cell = self.blocks.get(term)?.get(depth as usize)?;
        Some(cell.get_or_init(|| {
            let entry = &self.expansion.terms()[term];
            let eps = 0.01 * self.prec / self.n_terms() as f64;
            let blocks = compute_scale_blocks(
                entry.kernel(),
                entry.coef(),
                self.mra.basis(),
                scale,
                self.band_cap(scale),
                eps,
            );
            debug!(
                "Operator term {term} at scale {scale}: band {}",
                blocks.band
            );
            blocks
        }))
    }
}

fn check_precision(prec: f64) -> Result<()> {
    if !(prec > 0.0 && prec < 1.0) {
        return Err(Error::InvalidParameter(format!(
            "operator precision must be in (0, 1), got {prec}"
        )));
    }
    Ok(())
}

impl<const D: usize> fmt::Debug for ConvolutionOperator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvolutionOperator")
            .field("kind", &self.kind)
            .field("prec", &self.prec)
            .field("root", &self.root)
            .field("reach", &self.reach)
            .field("n_terms", &self.n_terms())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mra::BoundingBox;
    use approx::*;

    #[test]
    fn test_identity_blocks() {
        let mra = MultiResolutionAnalysis::new(BoundingBox::<1>::unit(), 4).unwrap();
        let oper = ConvolutionOperator::identity(&mra, 1e-6).unwrap();
        let blocks = oper.scale_blocks(0, 3).unwrap();
        let m = mra.basis().size();
        for ty in [0, 3] {
            let block = blocks.block(ty, 0).unwrap();
            for i in 0..m {
                for j in 0..m {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_abs_diff_eq!(block[i * m + j], expected, epsilon = 1e-12);
                }
            }
        }
        for ty in [1, 2] {
            assert_abs_diff_eq!(blocks.norm(ty, 0), 0.0, epsilon = 1e-12);
        }
        assert_eq!(blocks.band_for(3, 1e-3), Some(0));
        assert!(blocks.norm(0, 1) < 1e-12);
    }

    #[test]
    fn test_identity_reach() {
        let world = BoundingBox::<1>::new(0, [0], [4]).unwrap();
        let mra = MultiResolutionAnalysis::new(world, 3).unwrap();
        let oper = ConvolutionOperator::identity_with_reach(&mra, 1e-6, -1, 1).unwrap();
        assert_eq!(oper.kind(), OperatorKind::Identity);
        assert_eq!((oper.root(), oper.reach()), (-1, 1));
        assert_eq!(oper.band_cap(0), 2);
        assert_eq!(oper.band_cap(1), 4);
        assert_eq!(oper.band_cap(3), 16);

        let default = ConvolutionOperator::identity(&mra, 1e-6).unwrap();
        assert_eq!(default.band_cap(2), 4);
        let whole = ConvolutionOperator::identity_with_reach(&mra, 1e-6, 0, -1).unwrap();
        assert_eq!(whole.band_cap(2), 16);
    }

    #[test]
    fn test_scaling_block_matches_coarse_scale() {
        //! The scaling-scaling quarter equals the directly computed coarse block
        let mra = MultiResolutionAnalysis::new(BoundingBox::<3>::unit(), 5).unwrap();
        let oper = ConvolutionOperator::poisson(&mra, 1e-3).unwrap();
        let term = oper.n_terms() / 2;
        let scale = 2;
        let blocks = oper.scale_blocks(term, scale).unwrap();
        let kernel = oper.expansion().terms()[term].kernel();
        for l in 0..=blocks.band.min(2) {
            let direct = kernel.scaling_block(mra.basis(), scale, l);
            let ns = blocks.block(0, l).unwrap();
            for (a, b) in direct.iter().zip(ns) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_dimension_check() {
        let mra = MultiResolutionAnalysis::new(BoundingBox::<2>::unit(), 3).unwrap();
        assert!(matches!(
            ConvolutionOperator::poisson(&mra, 1e-3),
            Err(Error::InvalidParameter(_))
        ));
        assert!(ConvolutionOperator::identity(&mra, 1e-3).is_ok());
        assert!(ConvolutionOperator::identity(&mra, -1.0).is_err());
    }
}
