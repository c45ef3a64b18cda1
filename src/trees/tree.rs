//! Function trees
//!
//! Persisted nodes live in an arena addressed by [`NodeId`] and are looked up
//! by [`NodeIndex`] through a hash map. Generated nodes, answering lookups
//! below the persisted structure, live in a separate cache that can be purged
//! at any time without touching the persisted tier.
use crate::function::RepresentableFunction;
use crate::mra::{locate, MultiResolutionAnalysis};
use crate::treebuilders::WaveletAdaptor;
use crate::trees::{MwNode, NodeId, NodeIndex};
use crate::types::{Coord, Error, Result, DEFAULT_PRECISION};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::sync::OnceLock;

/// An adaptive multiwavelet representation of a function on the world of a
/// multiresolution analysis.
#[derive(Debug, Clone)]
pub struct FunctionTree<const D: usize> {
    mra: MultiResolutionAnalysis<D>,
    name: String,
    default_precision: f64,
    nodes: Vec<Option<MwNode<D>>>,
    free: Vec<NodeId>,
    lookup: HashMap<NodeIndex<D>, NodeId>,
    roots: Vec<NodeId>,
    n_end_nodes: usize,
    level_counts: Vec<usize>,
    end_table: OnceLock<Vec<NodeId>>,
    square_norm: OnceLock<f64>,
    gen_nodes: HashMap<NodeIndex<D>, MwNode<D>>,
}

impl<const D: usize> FunctionTree<D> {
    /// Create a tree holding only the root nodes of `mra`, without coefficients.
    pub fn new(mra: &MultiResolutionAnalysis<D>, name: &str) -> Self {
        let mut tree = Self {
            mra: mra.clone(),
            name: name.to_string(),
            default_precision: DEFAULT_PRECISION,
            nodes: Vec::new(),
            free: Vec::new(),
            lookup: HashMap::new(),
            roots: Vec::new(),
            n_end_nodes: 0,
            level_counts: vec![0; mra.max_depth()],
            end_table: OnceLock::new(),
            square_norm: OnceLock::new(),
            gen_nodes: HashMap::new(),
        };
        let block_size = mra.block_size();
        for i in 0..mra.world().n_boxes_total() {
            let index = mra.world().root_index(i);
            let id = tree.insert(MwNode::new(index, 0, block_size, None));
            tree.roots.push(id);
        }
        tree.n_end_nodes = tree.roots.len();
        tree.level_counts[0] = tree.roots.len();
        tree
    }

    /// The multiresolution analysis the tree is built on.
    pub fn mra(&self) -> &MultiResolutionAnalysis<D> {
        &self.mra
    }

    /// The diagnostic label of the tree.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the diagnostic label.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Precision used by builders when asked for a negative precision.
    pub fn default_precision(&self) -> f64 {
        self.default_precision
    }

    /// Set the default build precision.
    pub fn set_default_precision(&mut self, prec: f64) {
        self.default_precision = prec;
    }

    /// The root scale.
    pub fn root_scale(&self) -> i32 {
        self.mra.root_scale()
    }

    /// Number of persisted nodes.
    pub fn n_nodes(&self) -> usize {
        self.lookup.len()
    }

    /// Number of end nodes.
    pub fn n_end_nodes(&self) -> usize {
        self.n_end_nodes
    }

    /// Number of root nodes.
    pub fn n_root_nodes(&self) -> usize {
        self.roots.len()
    }

    /// Number of generated nodes currently cached.
    pub fn n_gen_nodes(&self) -> usize {
        self.gen_nodes.len()
    }

    /// Number of populated levels, 1 for a tree of roots.
    pub fn depth(&self) -> usize {
        self.level_counts
            .iter()
            .rposition(|count| *count > 0)
            .map_or(0, |level| level + 1)
    }

    /// Handles of the root nodes.
    pub fn root_ids(&self) -> &[NodeId] {
        &self.roots
    }

    /// Handles of the end nodes, in depth-first Lebesgue order.
    pub fn end_node_ids(&self) -> &[NodeId] {
        self.end_table.get_or_init(|| {
            let mut table = Vec::with_capacity(self.n_end_nodes);
            let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
            while let Some(id) = stack.pop() {
                let node = &self[id];
                if node.is_leaf_node() {
                    table.push(id);
                } else {
                    stack.extend(node.children().iter().rev());
                }
            }
            table
        })
    }

    /// Root node `i`.
    pub fn get_root_node(&self, i: usize) -> Option<&MwNode<D>> {
        self.roots.get(i).map(|id| &self[*id])
    }

    /// End node `i` of the end-node table.
    pub fn get_end_node(&self, i: usize) -> Option<&MwNode<D>> {
        self.end_node_ids().get(i).map(|id| &self[*id])
    }

    /// A persisted node by handle.
    pub fn node(&self, id: NodeId) -> Option<&MwNode<D>> {
        self.nodes.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Handle of the persisted node at `index`.
    pub fn find_id(&self, index: &NodeIndex<D>) -> Option<NodeId> {
        self.lookup.get(index).copied()
    }

    /// Look up a node without generating anything.
    pub fn find_node(&self, index: &NodeIndex<D>) -> Option<&MwNode<D>> {
        self.find_id(index)
            .map(|id| &self[id])
            .or_else(|| self.gen_nodes.get(index))
    }

    /// The node at `index`, generating the missing nodes on the path from the
    /// nearest existing ancestor.
    pub fn get_node(&mut self, index: &NodeIndex<D>) -> Result<&MwNode<D>> {
        if !self.mra.contains(index) {
            return Err(Error::OutOfDomain(index.to_string()));
        }
        if !self.lookup.contains_key(index) && !self.gen_nodes.contains_key(index) {
            let mut path = vec![*index];
            let mut ancestor = index.parent();
            while !self.lookup.contains_key(&ancestor) && !self.gen_nodes.contains_key(&ancestor) {
                path.push(ancestor);
                ancestor = ancestor.parent();
            }
            for target in path.iter().rev() {
                self.generate_children(&target.parent());
            }
        }
        self.find_node(index)
            .ok_or_else(|| Error::OutOfDomain(index.to_string()))
    }

    fn generate_children(&mut self, parent: &NodeIndex<D>) {
        let full = match self.find_node(parent) {
            Some(node) => self.full_coefs(node),
            None => return,
        };
        let depth = (parent.scale() - self.root_scale()) as usize + 1;
        let block_size = self.mra.block_size();
        let blocks = full.map(|mut coefs| {
            self.mra.basis().reconstruct::<D>(&mut coefs);
            coefs
        });
        for k in 0..1 << D {
            let coefs = blocks
                .as_ref()
                .map(|b| b[k * block_size..(k + 1) * block_size].to_vec());
            let child = parent.child(k);
            self.gen_nodes
                .insert(child, MwNode::new_gen(child, depth, block_size, coefs));
        }
    }

    /// Drop all generated nodes. A no-op when there are none.
    pub fn delete_generated(&mut self) {
        self.gen_nodes.clear();
    }

    /// The compressed coefficients of `node` padded to full length.
    fn full_coefs(&self, node: &MwNode<D>) -> Option<Vec<f64>> {
        let coefs = node.coefs()?;
        if node.is_gen_node() {
            let mut full = vec![0.0; self.mra.n_coefs()];
            full[..coefs.len()].copy_from_slice(coefs);
            Some(full)
        } else {
            Some(coefs.to_vec())
        }
    }

    /// Compressed coefficients of the function at `index`, either from the
    /// persisted node or reconstructed from the end node above it.
    pub(crate) fn coefs_at(&self, index: &NodeIndex<D>) -> Option<Cow<'_, [f64]>> {
        if let Some(id) = self.find_id(index) {
            return self[id].coefs().map(Cow::Borrowed);
        }
        let scaling = self.scaling_below(index)?;
        let mut full = vec![0.0; self.mra.n_coefs()];
        full[..scaling.len()].copy_from_slice(&scaling);
        Some(Cow::Owned(full))
    }

    /// Scaling coefficients at an index below the persisted structure,
    /// computed without touching the generated-node cache.
    pub(crate) fn scaling_below(&self, index: &NodeIndex<D>) -> Option<Vec<f64>> {
        if !self.mra.contains(index) {
            return None;
        }
        let mut path = Vec::new();
        let mut ancestor = *index;
        let id = loop {
            if let Some(id) = self.find_id(&ancestor) {
                break id;
            }
            if ancestor.scale() <= self.root_scale() {
                return None;
            }
            path.push(ancestor);
            ancestor = ancestor.parent();
        };
        let block_size = self.mra.block_size();
        let mut coefs = self[id].coefs()?.to_vec();
        for (i, target) in path.iter().rev().enumerate() {
            if i > 0 {
                coefs[block_size..].iter_mut().for_each(|c| *c = 0.0);
            }
            self.mra.basis().reconstruct::<D>(&mut coefs);
            let k = target.child_position();
            coefs.copy_within(k * block_size..(k + 1) * block_size, 0);
        }
        coefs.truncate(block_size);
        Some(coefs)
    }

    /// Squared L2 norm, the sum over end nodes, or -1 if an end node has no
    /// coefficients.
    pub fn square_norm(&self) -> f64 {
        *self.square_norm.get_or_init(|| {
            let mut norm = 0.0;
            for id in self.end_node_ids() {
                let node = &self[*id];
                if !node.has_coefs() {
                    return -1.0;
                }
                norm += node.square_norm();
            }
            norm
        })
    }

    /// Whether every end node holds coefficients.
    pub fn has_coefs(&self) -> bool {
        self.square_norm() >= 0.0
    }

    /// Set every coefficient to zero, keeping the structure.
    pub fn set_zero(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.zero_coefs();
        }
        self.invalidate_tree();
    }

    /// Remove every node below the roots and forget the coefficients.
    pub fn clear(&mut self) {
        for root in self.roots.clone() {
            self.delete_children(root);
            self.node_mut(root).clear_coefs();
        }
        self.invalidate_tree();
    }

    /// Multiply every coefficient by `c`.
    pub fn rescale(&mut self, c: f64) {
        for node in self.nodes.iter_mut().flatten() {
            if let Some(coefs) = node.coefs_mut() {
                coefs.iter_mut().for_each(|x| *x *= c);
            }
        }
        self.invalidate_tree();
    }

    /// Rescale to unit norm. Trees with zero or undefined norm are left alone.
    pub fn normalize(&mut self) {
        let norm = self.square_norm();
        if norm > 0.0 {
            self.rescale(1.0 / norm.sqrt());
        }
    }

    /// Integral of the function over the world.
    pub fn integrate(&self) -> f64 {
        self.roots.iter().map(|id| self[*id].integrate()).sum()
    }

    /// Value of the function at `r`; zero outside the world.
    pub fn evaluate(&self, r: &Coord<D>) -> f64 {
        let world = self.mra.world();
        let Some(mut index) = world.point_index(r, self.root_scale()) else {
            return 0.0;
        };
        let Some(position) = world.root_position(&index) else {
            return 0.0;
        };
        let mut id = self.roots[position];
        while self[id].is_branch_node() {
            index = NodeIndex::new(index.scale() + 1, locate(r, index.scale() + 1));
            match self.find_id(&index) {
                Some(child) => id = child,
                None => return 0.0,
            }
        }
        let node = &self[id];
        let Some(mut coefs) = self.full_coefs(node) else {
            return 0.0;
        };
        let basis = self.mra.basis();
        basis.reconstruct::<D>(&mut coefs);

        let scale = node.scale() + 1;
        let translation = locate(r, scale);
        let child = NodeIndex::new(scale, translation);
        let k = child.child_position();
        let factor = 2.0_f64.powi(scale);
        let mut u = [0.0; D];
        for d in 0..D {
            u[d] = (r[d] * factor - translation[d] as f64).clamp(0.0, 1.0);
        }
        let block_size = self.mra.block_size();
        let value = basis.evaluate_block::<D>(&coefs[k * block_size..(k + 1) * block_size], &u);
        value * factor.powf(0.5 * D as f64)
    }

    /// Remove refinement that is not needed at precision `prec`.
    ///
    /// Children are cropped before their parent. The children of a node are
    /// removed only when all of them are leaves and neither the node nor any
    /// child carries a wavelet part above the threshold, so significant
    /// detail deeper down keeps its ancestors.
    pub fn crop(&mut self, prec: f64, abs_prec: bool) {
        if prec < 0.0 || !self.has_coefs() {
            return;
        }
        let adaptor = WaveletAdaptor::new(prec, abs_prec, self.mra.max_scale());
        let norm = self.square_norm();
        for id in self.branch_ids_top_down().into_iter().rev() {
            let node = &self[id];
            let removable = node.children().iter().all(|c| {
                let child = &self[*c];
                child.is_leaf_node() && !adaptor.exceeds(child, norm)
            });
            if removable && !adaptor.exceeds(node, norm) {
                self.delete_children(id);
            }
        }
        self.invalidate_tree();
    }

    /// A copy of the persisted tree without generated nodes.
    pub fn deep_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.gen_nodes.clear();
        copy
    }

    /// Split the leaf `id` into its 2^D children. If `pass_coefs` is set and
    /// the node is populated the children inherit its function. A branch node
    /// is returned unchanged.
    pub(crate) fn split_node(&mut self, id: NodeId, pass_coefs: bool) -> Result<Vec<NodeId>> {
        let node = &self[id];
        if node.is_branch_node() {
            return Ok(node.children().to_vec());
        }
        let index = *node.index();
        let depth = node.depth() + 1;
        if depth >= self.mra.max_depth() {
            return Err(Error::OutOfDomain(index.child(0).to_string()));
        }
        let blocks = if pass_coefs {
            self.full_coefs(node).map(|mut coefs| {
                self.mra.basis().reconstruct::<D>(&mut coefs);
                coefs
            })
        } else {
            None
        };

        let block_size = self.mra.block_size();
        let n_coefs = self.mra.n_coefs();
        let mut children = Vec::with_capacity(1 << D);
        for k in 0..1 << D {
            let mut child = MwNode::new(index.child(k), depth, block_size, Some(id));
            match blocks.as_ref() {
                Some(b) => {
                    let mut coefs = vec![0.0; n_coefs];
                    coefs[..block_size].copy_from_slice(&b[k * block_size..(k + 1) * block_size]);
                    child.set_coefs(coefs);
                }
                None => child.allocate(),
            }
            children.push(self.insert(child));
        }
        self.attach_children(id, children.clone())?;
        Ok(children)
    }

    pub(crate) fn attach_children(&mut self, id: NodeId, children: Vec<NodeId>) -> Result<()> {
        if children.len() != 1 << D {
            return Err(Error::ChildCount {
                expected: 1 << D,
                found: children.len(),
            });
        }
        let depth = self[id].depth() + 1;
        self.node_mut(id).set_children(children);
        self.n_end_nodes += (1 << D) - 1;
        self.level_counts[depth] += 1 << D;
        self.invalidate_structure();
        Ok(())
    }

    /// Remove the whole subtree below `id`.
    pub(crate) fn delete_children(&mut self, id: NodeId) {
        let mut stack = self.node_mut(id).take_children();
        if stack.is_empty() {
            return;
        }
        while let Some(child) = stack.pop() {
            if let Some(mut node) = self.nodes[child.0].take() {
                if node.is_leaf_node() {
                    self.n_end_nodes -= 1;
                }
                stack.extend(node.take_children());
                self.level_counts[node.depth()] -= 1;
                self.lookup.remove(node.index());
                self.free.push(child);
            }
        }
        self.n_end_nodes += 1;
        self.invalidate_structure();
    }

    /// Store coefficients in a persisted node.
    pub(crate) fn set_node_coefs(&mut self, id: NodeId, coefs: Vec<f64>) {
        self.node_mut(id).set_coefs(coefs);
        self.invalidate_ancestors(id);
    }

    /// Mark a persisted node as unpopulated.
    pub(crate) fn clear_node_coefs(&mut self, id: NodeId) {
        self.node_mut(id).clear_coefs();
        self.invalidate_ancestors(id);
    }

    /// Handles of all branch nodes, parents before children.
    pub(crate) fn branch_ids_top_down(&self) -> Vec<NodeId> {
        self.ids_top_down()
            .into_iter()
            .filter(|id| self[*id].is_branch_node())
            .collect()
    }

    /// Handles of all persisted nodes, scale by scale.
    pub(crate) fn ids_top_down(&self) -> Vec<NodeId> {
        let mut ids = self.roots.clone();
        let mut i = 0;
        while i < ids.len() {
            let children = self[ids[i]].children().to_vec();
            ids.extend(children);
            i += 1;
        }
        ids
    }

    /// Recompute the coefficients of every branch node from its children.
    pub(crate) fn bottom_up_transform(&mut self) {
        let block_size = self.mra.block_size();
        let n_coefs = self.mra.n_coefs();
        for id in self.branch_ids_top_down().into_iter().rev() {
            let mut coefs = vec![0.0; n_coefs];
            let mut populated = true;
            for (k, child) in self[id].children().iter().enumerate() {
                match self[*child].component(0) {
                    Some(block) => {
                        coefs[k * block_size..(k + 1) * block_size].copy_from_slice(block)
                    }
                    None => populated = false,
                }
            }
            if populated {
                self.mra.basis().compress::<D>(&mut coefs);
                self.node_mut(id).set_coefs(coefs);
            }
        }
        self.invalidate_tree();
    }

    /// Push the scaling part of every branch node down into its children, so
    /// that contributions computed separately per scale add up.
    pub(crate) fn top_down_accumulate(&mut self) {
        let block_size = self.mra.block_size();
        for id in self.branch_ids_top_down() {
            let Some(mut coefs) = self[id].coefs().map(|c| c.to_vec()) else {
                continue;
            };
            self.mra.basis().reconstruct::<D>(&mut coefs);
            for (k, child) in self[id].children().to_vec().into_iter().enumerate() {
                if let Some(target) = self.node_mut(child).coefs_mut() {
                    for (t, s) in target[..block_size]
                        .iter_mut()
                        .zip(coefs[k * block_size..(k + 1) * block_size].iter())
                    {
                        *t += s;
                    }
                }
            }
        }
        self.invalidate_tree();
    }

    fn insert(&mut self, node: MwNode<D>) -> NodeId {
        let index = *node.index();
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        };
        self.lookup.insert(index, id);
        id
    }

    fn node_mut(&mut self, id: NodeId) -> &mut MwNode<D> {
        match self.nodes.get_mut(id.0).and_then(|slot| slot.as_mut()) {
            Some(node) => node,
            None => panic!("Stale node handle {}", id.0),
        }
    }

    fn invalidate_ancestors(&mut self, id: NodeId) {
        let mut parent = self[id].parent();
        while let Some(p) = parent {
            let node = self.node_mut(p);
            node.invalidate();
            parent = node.parent();
        }
        self.square_norm.take();
        self.gen_nodes.clear();
    }

    fn invalidate_structure(&mut self) {
        self.end_table.take();
        self.invalidate_tree();
    }

    fn invalidate_tree(&mut self) {
        self.square_norm.take();
        self.gen_nodes.clear();
    }
}

impl<const D: usize> Index<NodeId> for FunctionTree<D> {
    type Output = MwNode<D>;

    fn index(&self, id: NodeId) -> &MwNode<D> {
        match self.node(id) {
            Some(node) => node,
            None => panic!("Stale node handle {}", id.0),
        }
    }
}

impl<const D: usize> RepresentableFunction<D> for FunctionTree<D> {
    fn evaluate(&self, r: &Coord<D>) -> f64 {
        FunctionTree::evaluate(self, r)
    }
}

impl<const D: usize> fmt::Display for FunctionTree<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "*FunctionTree: {}", self.name)?;
        writeln!(f, "  square norm: {:.6e}", self.square_norm())?;
        writeln!(f, "  root scale: {}", self.root_scale())?;
        writeln!(f, "  order: {}", self.mra.order())?;
        writeln!(f, "  nodes: {}", self.n_nodes())?;
        writeln!(f, "  endNodes: {}", self.n_end_nodes())?;
        writeln!(f, "  genNodes: {}", self.n_gen_nodes())?;
        write!(f, "  depth: {}", self.depth())
    }
}
