//! Functions that can be projected onto a tree
use crate::types::Coord;

/// A function that can be sampled at arbitrary points.
pub trait RepresentableFunction<const D: usize> {
    /// Value at `r`.
    fn evaluate(&self, r: &Coord<D>) -> f64;
}

impl<const D: usize, F> RepresentableFunction<D> for F
where
    F: Fn(&Coord<D>) -> f64,
{
    fn evaluate(&self, r: &Coord<D>) -> f64 {
        self(r)
    }
}
