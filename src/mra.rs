//! Domain descriptor
//!
//! A [`MultiResolutionAnalysis`] fixes everything two trees must agree on
//! before they can be combined: the world box, the polynomial order of the
//! scaling basis and the maximum refinement depth.
use crate::basis::LegendreBasis;
use crate::trees::NodeIndex;
use crate::types::{Coord, Error, Result, MAX_DEPTH};
use std::fmt;
use std::sync::Arc;

/// The world box, a block of root boxes at a common root scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox<const D: usize> {
    scale: i32,
    corner: [i32; D],
    nboxes: [usize; D],
}

impl<const D: usize> BoundingBox<D> {
    /// Create a world box of `nboxes[d]` root boxes per dimension starting at
    /// translation `corner` on scale `scale`.
    pub fn new(scale: i32, corner: [i32; D], nboxes: [usize; D]) -> Result<Self> {
        if nboxes.iter().any(|n| *n == 0) {
            return Err(Error::InvalidParameter(
                "a bounding box needs at least one box per dimension".to_string(),
            ));
        }
        Ok(Self {
            scale,
            corner,
            nboxes,
        })
    }

    /// The unit box `[0, 1)^D` at root scale 0.
    pub fn unit() -> Self {
        Self::with_scale(0)
    }

    /// A single root box at translation zero.
    pub fn with_scale(scale: i32) -> Self {
        Self {
            scale,
            corner: [0; D],
            nboxes: [1; D],
        }
    }

    /// The box `[-2^{-scale} nboxes, 2^{-scale} nboxes)^D`, centred on the origin.
    pub fn symmetric(scale: i32, nboxes: usize) -> Result<Self> {
        let n = nboxes as i32;
        Self::new(scale, [-n; D], [2 * nboxes; D])
    }

    /// The root scale.
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Translation of the first root box.
    pub fn corner(&self) -> &[i32; D] {
        &self.corner
    }

    /// Number of root boxes per dimension.
    pub fn nboxes(&self) -> &[usize; D] {
        &self.nboxes
    }

    /// Total number of root boxes.
    pub fn n_boxes_total(&self) -> usize {
        self.nboxes.iter().product()
    }

    /// The index of root box `i`, dimension 0 running fastest.
    pub fn root_index(&self, i: usize) -> NodeIndex<D> {
        let mut translation = [0; D];
        let mut rest = i;
        for d in 0..D {
            translation[d] = self.corner[d] + (rest % self.nboxes[d]) as i32;
            rest /= self.nboxes[d];
        }
        NodeIndex::new(self.scale, translation)
    }

    /// Position of a root index in the root set.
    pub fn root_position(&self, index: &NodeIndex<D>) -> Option<usize> {
        if index.scale() != self.scale {
            return None;
        }
        let mut position = 0;
        let mut stride = 1;
        for d in 0..D {
            let offset = index.translation()[d] as i64 - self.corner[d] as i64;
            if offset < 0 || offset >= self.nboxes[d] as i64 {
                return None;
            }
            position += offset as usize * stride;
            stride *= self.nboxes[d];
        }
        Some(position)
    }

    /// Whether `index` addresses a box inside the world at or below the root scale.
    pub fn contains(&self, index: &NodeIndex<D>) -> bool {
        let diff = index.scale() - self.scale;
        if diff < 0 || diff > 62 {
            return false;
        }
        (0..D).all(|d| {
            let l = index.translation()[d] as i64;
            let lower = (self.corner[d] as i64) << diff;
            let upper = (self.corner[d] as i64 + self.nboxes[d] as i64) << diff;
            l >= lower && l < upper
        })
    }

    /// Lower corner of the world in physical coordinates.
    pub fn lower_bounds(&self) -> Coord<D> {
        let width = box_width(self.scale);
        let mut r = [0.0; D];
        for d in 0..D {
            r[d] = width * self.corner[d] as f64;
        }
        r
    }

    /// Upper corner of the world in physical coordinates.
    pub fn upper_bounds(&self) -> Coord<D> {
        let width = box_width(self.scale);
        let mut r = [0.0; D];
        for d in 0..D {
            r[d] = width * (self.corner[d] as f64 + self.nboxes[d] as f64);
        }
        r
    }

    /// Whether the point `r` lies in the half-open world box.
    pub fn contains_point(&self, r: &Coord<D>) -> bool {
        let lower = self.lower_bounds();
        let upper = self.upper_bounds();
        (0..D).all(|d| r[d] >= lower[d] && r[d] < upper[d])
    }

    /// Index of the box at `scale` containing `r`, if `r` is inside the world.
    pub fn point_index(&self, r: &Coord<D>, scale: i32) -> Option<NodeIndex<D>> {
        if !self.contains_point(r) || scale < self.scale {
            return None;
        }
        Some(NodeIndex::new(scale, locate(r, scale)))
    }

    /// Lower and upper physical corners of the box addressed by `index`.
    pub fn node_bounds(&self, index: &NodeIndex<D>) -> (Coord<D>, Coord<D>) {
        let width = box_width(index.scale());
        let mut lower = [0.0; D];
        let mut upper = [0.0; D];
        for d in 0..D {
            lower[d] = width * index.translation()[d] as f64;
            upper[d] = lower[d] + width;
        }
        (lower, upper)
    }

    /// Length of the world diagonal.
    pub fn diagonal(&self) -> f64 {
        let width = box_width(self.scale);
        self.nboxes
            .iter()
            .map(|n| (width * *n as f64).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// Width `2^{-scale}` of a box at `scale`.
pub fn box_width(scale: i32) -> f64 {
    2.0_f64.powi(-scale)
}

/// Translation of the box at `scale` containing `r`.
pub(crate) fn locate<const D: usize>(r: &Coord<D>, scale: i32) -> [i32; D] {
    let factor = 2.0_f64.powi(scale);
    let mut translation = [0; D];
    for d in 0..D {
        translation[d] = (r[d] * factor).floor() as i32;
    }
    translation
}

/// Multiresolution analysis: world box, scaling basis and depth limit.
#[derive(Debug, Clone)]
pub struct MultiResolutionAnalysis<const D: usize> {
    world: BoundingBox<D>,
    max_depth: usize,
    basis: Arc<LegendreBasis>,
}

impl<const D: usize> MultiResolutionAnalysis<D> {
    /// Create an analysis of polynomial order `order` with the default maximum depth.
    pub fn new(world: BoundingBox<D>, order: usize) -> Result<Self> {
        Self::with_max_depth(world, order, MAX_DEPTH)
    }

    /// Create an analysis with an explicit maximum depth.
    pub fn with_max_depth(world: BoundingBox<D>, order: usize, max_depth: usize) -> Result<Self> {
        if D == 0 {
            return Err(Error::InvalidParameter(
                "dimension must be at least one".to_string(),
            ));
        }
        if max_depth == 0 || world.scale() as i64 + max_depth as i64 > 60 {
            return Err(Error::InvalidParameter(format!(
                "maximum depth {max_depth} is not usable from root scale {}",
                world.scale()
            )));
        }
        Ok(Self {
            world,
            max_depth,
            basis: Arc::new(LegendreBasis::new(order)?),
        })
    }

    /// The world box.
    pub fn world(&self) -> &BoundingBox<D> {
        &self.world
    }

    /// The scaling basis.
    pub fn basis(&self) -> &LegendreBasis {
        &self.basis
    }

    /// Polynomial order of the scaling basis.
    pub fn order(&self) -> usize {
        self.basis.order()
    }

    /// Maximum depth of a tree below its roots.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// The root scale.
    pub fn root_scale(&self) -> i32 {
        self.world.scale()
    }

    /// The finest scale a node may have.
    pub fn max_scale(&self) -> i32 {
        self.world.scale() + self.max_depth as i32 - 1
    }

    /// Number of coefficients in one component block, `(k+1)^D`.
    pub fn block_size(&self) -> usize {
        self.basis.size().pow(D as u32)
    }

    /// Number of coefficients of a full node, `2^D (k+1)^D`.
    pub fn n_coefs(&self) -> usize {
        self.block_size() << D
    }

    /// Number of children of a branch node.
    pub fn n_children(&self) -> usize {
        1 << D
    }

    /// Whether `index` is addressable in this analysis.
    pub fn contains(&self, index: &NodeIndex<D>) -> bool {
        index.scale() <= self.max_scale() && self.world.contains(index)
    }

    /// The smallest distance resolved at precision `prec`.
    pub fn min_distance(&self, prec: f64) -> f64 {
        prec.sqrt() * box_width(self.max_scale())
    }

    /// The largest distance between two points of the world.
    pub fn max_distance(&self) -> f64 {
        self.world.diagonal()
    }
}

impl<const D: usize> PartialEq for MultiResolutionAnalysis<D> {
    fn eq(&self, other: &Self) -> bool {
        self.world == other.world
            && self.order() == other.order()
            && self.max_depth == other.max_depth
    }
}

impl<const D: usize> fmt::Display for MultiResolutionAnalysis<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "*MultiResolution Analysis: {D}D")?;
        writeln!(f, "  order     : {}", self.order())?;
        writeln!(f, "  root scale: {}", self.world.scale())?;
        writeln!(f, "  corner    : {:?}", self.world.corner())?;
        writeln!(f, "  boxes     : {:?}", self.world.nboxes())?;
        write!(f, "  max depth : {}", self.max_depth)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::*;

    #[test]
    fn test_root_indices() {
        let world = BoundingBox::<2>::new(1, [-1, 0], [2, 3]).unwrap();
        assert_eq!(world.n_boxes_total(), 6);
        for i in 0..6 {
            let index = world.root_index(i);
            assert_eq!(index.scale(), 1);
            assert_eq!(world.root_position(&index), Some(i));
            assert!(world.contains(&index));
        }
        assert_eq!(world.root_index(3).translation(), &[0, 1]);
    }

    #[test]
    fn test_contains() {
        let world = BoundingBox::<1>::new(0, [-1], [2]).unwrap();
        assert!(world.contains(&NodeIndex::new(3, [-8])));
        assert!(world.contains(&NodeIndex::new(3, [7])));
        assert!(!world.contains(&NodeIndex::new(3, [8])));
        assert!(!world.contains(&NodeIndex::new(-1, [0])));
        assert_relative_eq!(world.lower_bounds()[0], -1.0);
        assert_relative_eq!(world.upper_bounds()[0], 1.0);
        assert!(world.contains_point(&[-1.0]));
        assert!(!world.contains_point(&[1.0]));

        let index = world.point_index(&[0.3], 2).unwrap();
        assert_eq!(index, NodeIndex::new(2, [1]));
        let (lower, upper) = world.node_bounds(&index);
        assert_relative_eq!(lower[0], 0.25);
        assert_relative_eq!(upper[0], 0.5);
        assert!(world.point_index(&[1.5], 2).is_none());
        assert!(world.point_index(&[0.3], -1).is_none());
    }

    #[test]
    fn test_mra_equality() {
        let world = BoundingBox::<3>::unit();
        let a = MultiResolutionAnalysis::new(world, 5).unwrap();
        let b = MultiResolutionAnalysis::new(world, 5).unwrap();
        let c = MultiResolutionAnalysis::new(world, 6).unwrap();
        let d = MultiResolutionAnalysis::with_max_depth(world, 5, 10).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.n_coefs(), 8 * 216);
        assert_eq!(a.max_scale(), 29);
    }

    #[test]
    fn test_invalid_world() {
        assert!(BoundingBox::<2>::new(0, [0, 0], [1, 0]).is_err());
        assert!(MultiResolutionAnalysis::new(BoundingBox::<1>::unit(), 0).is_err());
        assert!(MultiResolutionAnalysis::with_max_depth(BoundingBox::<1>::unit(), 3, 0).is_err());
    }
}
