//! Types shared across the crate

/// A point in D-dimensional space.
pub type Coord<const D: usize> = [f64; D];

/// Precision below which two floating point numbers are considered equal.
pub const MACHINE_PREC: f64 = 1.0e-15;

/// Values below this are treated as exactly zero.
pub const MACHINE_ZERO: f64 = 1.0e-14;

/// Default build precision of a new function tree.
pub const DEFAULT_PRECISION: f64 = 1.0e-6;

/// Default maximum depth of a tree below its root scale.
pub const MAX_DEPTH: usize = 30;

/// Largest supported polynomial order of the scaling basis.
pub const MAX_ORDER: usize = 40;

/// Error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A node index that is not addressable in the world box of the tree.
    #[error("Node index {0} is outside the domain of the tree")]
    OutOfDomain(String),
    /// A children set of the wrong size.
    #[error("Expected {expected} children, found {found}")]
    ChildCount {
        /// Required number of children (2^D).
        expected: usize,
        /// Number of children supplied.
        found: usize,
    },
    /// Two trees expected to share a grid do not.
    #[error("Tree structures differ: {0}")]
    StructureMismatch(String),
    /// Operands built on different multiresolution analyses.
    #[error("Incompatible multiresolution analyses")]
    IncompatibleMra,
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A tree file that cannot be decoded.
    #[error("Corrupt tree file: {0}")]
    Corrupt(String),
    /// The current node of an iterator was requested before a successful advance.
    #[error("Tree iterator has no current node")]
    IteratorNotStarted,
    /// A tree without coefficients used as input.
    #[error("Tree '{0}' has no coefficients")]
    MissingCoefs(String),
    /// A bad argument to a constructor or algorithm.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result Type
pub type Result<T> = std::result::Result<T, Error>;
