//! Tree nodes
use crate::trees::NodeIndex;
use std::fmt;
use std::sync::OnceLock;

/// Handle of a persisted node in the arena of its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position in the arena.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One box of a function tree together with its coefficients.
///
/// A persisted node stores `2^D (k+1)^D` coefficients in the compressed
/// layout. A generated node only stores the `(k+1)^D` scaling coefficients;
/// its wavelet part is zero by construction.
#[derive(Debug, Clone)]
pub struct MwNode<const D: usize> {
    index: NodeIndex<D>,
    depth: usize,
    block_size: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    coefs: Option<Vec<f64>>,
    has_coefs: bool,
    end_node: bool,
    gen: bool,
    norms: OnceLock<Vec<f64>>,
}

impl<const D: usize> MwNode<D> {
    pub(crate) fn new(
        index: NodeIndex<D>,
        depth: usize,
        block_size: usize,
        parent: Option<NodeId>,
    ) -> Self {
        Self {
            index,
            depth,
            block_size,
            parent,
            children: Vec::new(),
            coefs: None,
            has_coefs: false,
            end_node: true,
            gen: false,
            norms: OnceLock::new(),
        }
    }

    pub(crate) fn new_gen(
        index: NodeIndex<D>,
        depth: usize,
        block_size: usize,
        coefs: Option<Vec<f64>>,
    ) -> Self {
        let has_coefs = coefs.is_some();
        Self {
            index,
            depth,
            block_size,
            parent: None,
            children: Vec::new(),
            coefs: Some(coefs.unwrap_or_else(|| vec![0.0; block_size])),
            has_coefs,
            end_node: false,
            gen: true,
            norms: OnceLock::new(),
        }
    }

    /// The node index.
    pub fn index(&self) -> &NodeIndex<D> {
        &self.index
    }

    /// The scale.
    pub fn scale(&self) -> i32 {
        self.index.scale()
    }

    /// Depth below the root scale, roots having depth 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of coefficients the buffer holds.
    pub fn n_coefs(&self) -> usize {
        if self.gen {
            self.block_size
        } else {
            self.block_size << D
        }
    }

    /// Number of children, 0 or 2^D.
    pub fn n_children(&self) -> usize {
        self.children.len()
    }

    /// Handles of the children.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Handle of the parent of a persisted node.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Whether the coefficient buffer exists.
    pub fn is_allocated(&self) -> bool {
        self.coefs.is_some()
    }

    /// Whether the coefficient buffer holds data.
    pub fn has_coefs(&self) -> bool {
        self.has_coefs
    }

    /// The coefficients, if populated.
    pub fn coefs(&self) -> Option<&[f64]> {
        if self.has_coefs {
            self.coefs.as_deref()
        } else {
            None
        }
    }

    /// One component block of the coefficients. Wavelet components of a
    /// generated node are absent.
    pub fn component(&self, component: usize) -> Option<&[f64]> {
        let coefs = self.coefs()?;
        let start = component * self.block_size;
        if start + self.block_size > coefs.len() {
            return None;
        }
        Some(&coefs[start..start + self.block_size])
    }

    /// Whether this is one of the roots of the tree.
    pub fn is_root_node(&self) -> bool {
        !self.gen && self.parent.is_none()
    }

    /// Whether this is an accepted leaf of the persisted structure.
    pub fn is_end_node(&self) -> bool {
        self.end_node
    }

    /// Whether the node has no children.
    pub fn is_leaf_node(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether the node has children.
    pub fn is_branch_node(&self) -> bool {
        !self.children.is_empty()
    }

    /// Whether this is an ephemeral generated node.
    pub fn is_gen_node(&self) -> bool {
        self.gen
    }

    /// Whether the node sits below another node.
    pub fn has_parent(&self) -> bool {
        self.gen || self.parent.is_some()
    }

    fn norms(&self) -> &[f64] {
        self.norms.get_or_init(|| match self.coefs() {
            Some(coefs) => coefs
                .chunks(self.block_size)
                .map(|block| block.iter().map(|c| c * c).sum::<f64>())
                .collect(),
            None => Vec::new(),
        })
    }

    /// Squared norm of all coefficients, -1 when unpopulated.
    pub fn square_norm(&self) -> f64 {
        if !self.has_coefs {
            return -1.0;
        }
        self.norms().iter().sum()
    }

    /// Squared norm of the scaling part, -1 when unpopulated.
    pub fn scaling_norm(&self) -> f64 {
        if !self.has_coefs {
            return -1.0;
        }
        self.norms()[0]
    }

    /// Squared norm of the wavelet part, -1 when unpopulated.
    pub fn wavelet_norm(&self) -> f64 {
        if !self.has_coefs {
            return -1.0;
        }
        self.norms().iter().skip(1).sum()
    }

    /// Norm of component `i`, -1 when unpopulated.
    pub fn component_norm(&self, i: usize) -> f64 {
        if !self.has_coefs {
            return -1.0;
        }
        self.norms().get(i).map_or(0.0, |n| n.sqrt())
    }

    /// Integral of the function over the box of this node.
    pub fn integrate(&self) -> f64 {
        match self.coefs() {
            Some(coefs) => coefs[0] * 2.0_f64.powf(-0.5 * D as f64 * self.scale() as f64),
            None => 0.0,
        }
    }

    pub(crate) fn set_coefs(&mut self, coefs: Vec<f64>) {
        debug_assert_eq!(coefs.len(), self.n_coefs());
        self.coefs = Some(coefs);
        self.has_coefs = true;
        self.invalidate();
    }

    pub(crate) fn coefs_mut(&mut self) -> Option<&mut Vec<f64>> {
        if !self.has_coefs {
            return None;
        }
        self.invalidate();
        self.coefs.as_mut()
    }

    pub(crate) fn zero_coefs(&mut self) {
        let n = self.n_coefs();
        match self.coefs.as_mut() {
            Some(coefs) => coefs.iter_mut().for_each(|c| *c = 0.0),
            None => self.coefs = Some(vec![0.0; n]),
        }
        self.has_coefs = true;
        self.invalidate();
    }

    pub(crate) fn allocate(&mut self) {
        if self.coefs.is_none() {
            self.coefs = Some(vec![0.0; self.n_coefs()]);
        }
    }

    pub(crate) fn clear_coefs(&mut self) {
        self.has_coefs = false;
        self.invalidate();
    }

    pub(crate) fn set_children(&mut self, children: Vec<NodeId>) {
        self.children = children;
        self.end_node = self.children.is_empty();
    }

    pub(crate) fn take_children(&mut self) -> Vec<NodeId> {
        self.end_node = true;
        std::mem::take(&mut self.children)
    }

    pub(crate) fn invalidate(&mut self) {
        self.norms.take();
    }
}

impl<const D: usize> fmt::Display for MwNode<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)?;
        let flags = [
            (self.is_root_node(), 'R'),
            (self.is_end_node(), 'E'),
            (self.is_branch_node(), 'B'),
            (self.is_gen_node(), 'G'),
            (self.has_coefs, 'C'),
        ];
        write!(f, " ")?;
        for (set, c) in flags {
            write!(f, "{}", if set { c } else { '0' })?;
        }
        write!(f, " sqNorm={:.6e}", self.square_norm())
    }
}
