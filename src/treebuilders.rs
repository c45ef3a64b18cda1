//! Tree builders
//!
//! Every algorithm that produces coefficients runs the same adaptive loop:
//! a [`TreeCalculator`] fills the current end nodes, a [`WaveletAdaptor`]
//! picks the nodes to refine, and the loop repeats on their children.
pub mod apply;
pub mod arithmetic;
pub mod builder;
pub mod grid;
pub mod project;

pub use apply::{apply, apply_with};
pub use arithmetic::{
    add, add_assign, add_with, dot, multiply, multiply_assign, multiply_with, power, power_assign,
    power_with, square,
};
pub use builder::{build, build_nonstandard, build_serial, TreeCalculator, WaveletAdaptor};
pub use grid::{
    build_grid, build_grid_scales, clear_grid, copy_func, copy_grid, refine_grid,
    refine_grid_scales,
};
pub use project::{project, project_serial, project_with};
