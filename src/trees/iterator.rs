//! Tree traversal
//!
//! A [`TreeIterator`] walks the persisted nodes of a tree, and optionally the
//! generated ones, either parents first or children first. Siblings are
//! visited in index order (Lebesgue) or in the order of a compact Hilbert
//! curve, whose orientation is carried from parent to child.
use crate::trees::{FunctionTree, MwNode, NodeIndex};
use crate::types::{Error, Result};

/// Whether a node is visited before or after its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traverse {
    /// Pre-order
    TopDown,
    /// Post-order
    BottomUp,
}

/// Child visiting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// Children in index order.
    Lebesgue,
    /// Children along a Hilbert curve.
    Hilbert,
}

#[derive(Debug, Clone, Copy, Default)]
struct HilbertState {
    entry: usize,
    direction: usize,
}

struct Frame<'a, const D: usize> {
    node: &'a MwNode<D>,
    state: HilbertState,
    expanded: bool,
}

/// Stateful cursor over the nodes of a [`FunctionTree`].
pub struct TreeIterator<'a, const D: usize> {
    tree: Option<&'a FunctionTree<D>>,
    traverse: Traverse,
    iteration: Iteration,
    max_depth: i32,
    return_gen: bool,
    stack: Vec<Frame<'a, D>>,
    current: Option<&'a MwNode<D>>,
}

impl<'a, const D: usize> TreeIterator<'a, D> {
    /// Create an iterator that is not yet attached to a tree.
    pub fn new(traverse: Traverse, iteration: Iteration) -> Self {
        Self {
            tree: None,
            traverse,
            iteration,
            max_depth: -1,
            return_gen: false,
            stack: Vec::new(),
            current: None,
        }
    }

    /// Create an iterator attached to `tree`.
    pub fn with_tree(tree: &'a FunctionTree<D>, traverse: Traverse, iteration: Iteration) -> Self {
        let mut iterator = Self::new(traverse, iteration);
        iterator.init(tree);
        iterator
    }

    /// Set the traverse order. Takes effect on the next [`TreeIterator::init`].
    pub fn set_traverse(&mut self, traverse: Traverse) {
        self.traverse = traverse;
    }

    /// Set the child ordering. Takes effect on the next [`TreeIterator::init`].
    pub fn set_iterator(&mut self, iteration: Iteration) {
        self.iteration = iteration;
    }

    /// Nodes deeper than `max_depth` are skipped together with their subtrees.
    /// A negative value means unlimited.
    pub fn set_max_depth(&mut self, max_depth: i32) {
        self.max_depth = max_depth;
    }

    /// Whether generated nodes below the end nodes are visited.
    pub fn set_return_gen_nodes(&mut self, return_gen: bool) {
        self.return_gen = return_gen;
    }

    /// (Re)start at the roots of `tree`.
    pub fn init(&mut self, tree: &'a FunctionTree<D>) {
        self.tree = Some(tree);
        self.current = None;
        self.stack.clear();
        for id in tree.root_ids().iter().rev() {
            self.stack.push(Frame {
                node: &tree[*id],
                state: HilbertState::default(),
                expanded: false,
            });
        }
    }

    /// Move to the next node. Returns false when the traversal is exhausted.
    pub fn advance(&mut self) -> bool {
        self.current = match self.traverse {
            Traverse::TopDown => self.advance_top_down(),
            Traverse::BottomUp => self.advance_bottom_up(),
        };
        self.current.is_some()
    }

    /// The current node.
    pub fn node(&self) -> Result<&'a MwNode<D>> {
        self.current.ok_or(Error::IteratorNotStarted)
    }

    fn advance_top_down(&mut self) -> Option<&'a MwNode<D>> {
        let frame = self.stack.pop()?;
        self.push_children(&frame);
        Some(frame.node)
    }

    fn advance_bottom_up(&mut self) -> Option<&'a MwNode<D>> {
        loop {
            let mut frame = self.stack.pop()?;
            if frame.expanded {
                return Some(frame.node);
            }
            frame.expanded = true;
            let node = frame.node;
            let state = frame.state;
            self.stack.push(frame);
            self.push_children(&Frame {
                node,
                state,
                expanded: true,
            });
        }
    }

    fn push_children(&mut self, frame: &Frame<'a, D>) {
        let Some(tree) = self.tree else {
            return;
        };
        let depth = frame.node.depth() as i32 + 1;
        if self.max_depth >= 0 && depth > self.max_depth {
            return;
        }
        let children = self.children(tree, frame.node);
        if children.is_empty() {
            return;
        }
        let order: Vec<(usize, HilbertState)> = match self.iteration {
            Iteration::Lebesgue => (0..1 << D).map(|k| (k, HilbertState::default())).collect(),
            Iteration::Hilbert => hilbert_children(frame.state, D),
        };
        for (k, state) in order.into_iter().rev() {
            self.stack.push(Frame {
                node: children[k],
                state,
                expanded: false,
            });
        }
    }

    fn children(&self, tree: &'a FunctionTree<D>, node: &'a MwNode<D>) -> Vec<&'a MwNode<D>> {
        if node.is_branch_node() {
            return node.children().iter().map(|id| &tree[*id]).collect();
        }
        if !self.return_gen {
            return Vec::new();
        }
        let children: Vec<&'a MwNode<D>> = (0..1 << D)
            .filter_map(|k| {
                let index: NodeIndex<D> = node.index().child(k);
                tree.find_node(&index).filter(|child| child.is_gen_node())
            })
            .collect();
        if children.len() == 1 << D {
            children
        } else {
            Vec::new()
        }
    }
}

impl<'a, const D: usize> Iterator for TreeIterator<'a, D> {
    type Item = &'a MwNode<D>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.advance() {
            self.current
        } else {
            None
        }
    }
}

fn gray(i: usize) -> usize {
    i ^ (i >> 1)
}

fn trailing_set_bits(i: usize) -> usize {
    (!i).trailing_zeros() as usize
}

fn rotate_left(x: usize, shift: usize, n: usize) -> usize {
    let mask = (1 << n) - 1;
    let shift = shift % n;
    if shift == 0 {
        return x & mask;
    }
    ((x << shift) | (x >> (n - shift))) & mask
}

/// Child positions of a box in Hilbert order together with the curve state
/// each child inherits (Hamilton's compact Hilbert indices).
fn hilbert_children(state: HilbertState, n: usize) -> Vec<(usize, HilbertState)> {
    (0..1usize << n)
        .map(|w| {
            let position = rotate_left(gray(w), state.direction + 1, n) ^ state.entry;
            let (entry, direction) = if w == 0 {
                (0, 0)
            } else if w % 2 == 0 {
                (gray(2 * ((w - 1) / 2)), trailing_set_bits(w - 1) % n)
            } else {
                (gray(2 * ((w - 1) / 2)), trailing_set_bits(w) % n)
            };
            let child = HilbertState {
                entry: state.entry ^ rotate_left(entry, state.direction + 1, n),
                direction: (state.direction + direction + 1) % n,
            };
            (position, child)
        })
        .collect()
}
