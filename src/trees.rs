//! Adaptive multiwavelet trees
pub mod io;
pub mod iterator;
pub mod node;
pub mod node_index;
pub mod ops;
pub mod tree;

pub use iterator::{Iteration, Traverse, TreeIterator};
pub use node::{MwNode, NodeId};
pub use node_index::NodeIndex;
pub use tree::FunctionTree;
