//! Adaptive multiwavelet function trees
//!
//! Functions on a box of `R^D` are represented in a Legendre multiwavelet
//! basis on an adaptively refined tree of dyadic boxes. Trees are built by
//! projection, combined by node-wise arithmetic and transformed by separable
//! convolution operators, each refining only where the wavelet coefficients
//! exceed the requested precision.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

#[macro_use]
extern crate lazy_static;

pub mod basis;
pub mod function;
pub mod gaussian;
pub mod mra;
pub mod operators;
pub mod threads;
pub mod treebuilders;
pub mod trees;
pub mod types;

pub use function::RepresentableFunction;
pub use mra::{BoundingBox, MultiResolutionAnalysis};
pub use trees::{FunctionTree, NodeIndex};
pub use types::{Error, Result};
