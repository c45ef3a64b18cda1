//! Convolution operators
//!
//! Operators are built from a [`KernelExpansion`], a sum of separable terms,
//! and applied to function trees in non-standard form by
//! [`apply`](crate::treebuilders::apply).
pub mod convolution;
pub mod kernel;

pub use convolution::{ConvolutionOperator, OperatorKind};
pub use kernel::{ConvolutionKernel, DeltaKernel, GaussianKernel, KernelExpansion, KernelTerm};
