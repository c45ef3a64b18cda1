//! Node addressing
use std::cmp::Ordering;
use std::fmt;

/// Scale and translation of a box, `2^{-scale} (translation + [0, 1)^D)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex<const D: usize> {
    scale: i32,
    translation: [i32; D],
}

impl<const D: usize> NodeIndex<D> {
    /// Create an index.
    pub fn new(scale: i32, translation: [i32; D]) -> Self {
        Self { scale, translation }
    }

    /// The scale.
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// The translation.
    pub fn translation(&self) -> &[i32; D] {
        &self.translation
    }

    /// Set the scale.
    pub fn set_scale(&mut self, scale: i32) {
        self.scale = scale;
    }

    /// Set the translation.
    pub fn set_translation(&mut self, translation: [i32; D]) {
        self.translation = translation;
    }

    /// Child `k`, bit `d` of `k` being the offset in dimension `d`.
    pub fn child(&self, k: usize) -> Self {
        debug_assert!(k < 1 << D);
        let mut translation = [0; D];
        for d in 0..D {
            translation[d] = 2 * self.translation[d] + ((k >> d) & 1) as i32;
        }
        Self {
            scale: self.scale + 1,
            translation,
        }
    }

    /// The parent box.
    pub fn parent(&self) -> Self {
        let mut translation = [0; D];
        for d in 0..D {
            translation[d] = self.translation[d].div_euclid(2);
        }
        Self {
            scale: self.scale - 1,
            translation,
        }
    }

    /// The position of this index among the children of its parent.
    pub fn child_position(&self) -> usize {
        (0..D)
            .map(|d| (self.translation[d].rem_euclid(2) as usize) << d)
            .sum()
    }

    /// The ancestor of this index at a coarser scale.
    pub fn ancestor(&self, scale: i32) -> Self {
        debug_assert!(scale <= self.scale);
        let shift = (self.scale - scale) as u32;
        let mut translation = [0; D];
        for d in 0..D {
            translation[d] = (self.translation[d] as i64 >> shift) as i32;
        }
        Self { scale, translation }
    }
}

impl<const D: usize> Ord for NodeIndex<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.scale
            .cmp(&other.scale)
            .then_with(|| self.translation.cmp(&other.translation))
    }
}

impl<const D: usize> PartialOrd for NodeIndex<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const D: usize> fmt::Display for NodeIndex<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ {:3} |", self.scale)?;
        for l in self.translation.iter() {
            write!(f, " {l:4}")?;
        }
        write!(f, " ]")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use paste::paste;

    macro_rules! child_parent_test {
        ($dim:expr) => {
            paste! {
                #[test]
                fn [<test_child_parent_ $dim d>]() {
                    let mut translation = [0; $dim];
                    for d in 0..$dim {
                        translation[d] = 3 - 4 * d as i32;
                    }
                    let index = NodeIndex::<$dim>::new(-2, translation);
                    for k in 0..1 << $dim {
                        let child = index.child(k);
                        assert_eq!(child.scale(), -1);
                        assert_eq!(child.parent(), index);
                        assert_eq!(child.child_position(), k);
                    }
                }
            }
        };
    }

    child_parent_test!(1);
    child_parent_test!(2);
    child_parent_test!(3);

    #[test]
    fn test_floor_division() {
        let index = NodeIndex::new(1, [-1, -2, 3]);
        assert_eq!(index.parent(), NodeIndex::new(0, [-1, -1, 1]));
        assert_eq!(index.ancestor(-1), NodeIndex::new(-1, [-1, -1, 0]));
        assert_eq!(index.ancestor(1), index);
    }

    #[test]
    fn test_setters_and_order() {
        let mut index = NodeIndex::new(0, [0, 0]);
        index.set_scale(2);
        index.set_translation([1, 3]);
        assert_eq!(index, NodeIndex::new(2, [1, 3]));
        assert!(NodeIndex::new(1, [5, 5]) < index);
        assert!(NodeIndex::new(2, [1, 2]) < index);
        assert_eq!(format!("{}", NodeIndex::new(2, [1])), "[   2 |    1 ]");
    }
}
