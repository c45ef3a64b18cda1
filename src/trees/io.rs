//! Binary tree files
//!
//! A file holds the magic bytes `MWTREE01`, the CRC-32 of the payload and
//! the payload length, both little endian, followed by the bincode encoded
//! payload. Nodes are stored parents first, so a tree can be rebuilt by
//! splitting in file order.
use crate::trees::{FunctionTree, NodeIndex};
use crate::types::{Error, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const MAGIC: &[u8; 8] = b"MWTREE01";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 8;

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    scale: i32,
    translation: Vec<i32>,
    n_children: u32,
    coefs: Option<Vec<f64>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TreeRecord {
    version: u32,
    dim: u32,
    scale: i32,
    corner: Vec<i32>,
    nboxes: Vec<u64>,
    order: u64,
    max_depth: u64,
    name: String,
    nodes: Vec<NodeRecord>,
}

fn corrupt(message: impl ToString) -> Error {
    Error::Corrupt(message.to_string())
}

impl<const D: usize> FunctionTree<D> {
    fn to_record(&self) -> TreeRecord {
        let world = self.mra().world();
        let nodes = self
            .ids_top_down()
            .into_iter()
            .map(|id| {
                let node = &self[id];
                NodeRecord {
                    scale: node.scale(),
                    translation: node.index().translation().to_vec(),
                    n_children: node.n_children() as u32,
                    coefs: node.coefs().map(|c| c.to_vec()),
                }
            })
            .collect();
        TreeRecord {
            version: FORMAT_VERSION,
            dim: D as u32,
            scale: world.scale(),
            corner: world.corner().to_vec(),
            nboxes: world.nboxes().iter().map(|n| *n as u64).collect(),
            order: self.mra().order() as u64,
            max_depth: self.mra().max_depth() as u64,
            name: self.name().to_string(),
            nodes,
        }
    }

    fn check_record(&self, record: &TreeRecord) -> Result<()> {
        if record.version != FORMAT_VERSION {
            return Err(corrupt(format!("unknown format version {}", record.version)));
        }
        let world = self.mra().world();
        let same = record.dim as usize == D
            && record.scale == world.scale()
            && record.corner.as_slice() == world.corner().as_slice()
            && record.nboxes.len() == D
            && record.nboxes.iter().zip(world.nboxes()).all(|(a, b)| *a == *b as u64)
            && record.order == self.mra().order() as u64
            && record.max_depth == self.mra().max_depth() as u64;
        if !same {
            return Err(Error::IncompatibleMra);
        }
        Ok(())
    }

    /// Rebuild a tree on the analysis of `self` from a decoded record.
    fn from_record(&self, record: TreeRecord) -> Result<Self> {
        let mut tree = FunctionTree::new(self.mra(), self.name());
        tree.set_default_precision(self.default_precision());
        let n_coefs = self.mra().n_coefs();
        let n_records = record.nodes.len();

        for node in record.nodes {
            let translation: [i32; D] = node
                .translation
                .as_slice()
                .try_into()
                .map_err(|_| corrupt("translation of the wrong dimension"))?;
            let index = NodeIndex::new(node.scale, translation);
            let id = tree
                .find_id(&index)
                .ok_or_else(|| corrupt(format!("node {index} has no parent")))?;
            match node.n_children as usize {
                0 => {}
                n if n == 1 << D => {
                    tree.split_node(id, false)?;
                }
                n => {
                    return Err(Error::ChildCount {
                        expected: 1 << D,
                        found: n,
                    })
                }
            }
            match node.coefs {
                Some(coefs) if coefs.len() == n_coefs => tree.set_node_coefs(id, coefs),
                Some(coefs) => {
                    return Err(corrupt(format!(
                        "node {index} has {} coefficients, expected {n_coefs}",
                        coefs.len()
                    )))
                }
                None => tree.clear_node_coefs(id),
            }
        }
        if tree.n_nodes() != n_records {
            return Err(corrupt(format!(
                "{} nodes stored, {} reachable",
                n_records,
                tree.n_nodes()
            )));
        }
        Ok(tree)
    }

    /// Write the tree to `path`, including every persisted node and its
    /// coefficients.
    pub fn save_tree<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let payload = bincode::serialize(&self.to_record()).map_err(corrupt)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&payload);
        fs::write(path.as_ref(), bytes)?;
        info!(
            "Saved '{}' with {} nodes to {}",
            self.name(),
            self.n_nodes(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Replace the tree with the one stored at `path`. The file must have
    /// been written from a tree on the same analysis. On any failure the
    /// tree is left unchanged. The name of the receiver is kept.
    pub fn load_tree<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let bytes = fs::read(path.as_ref())?;
        if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
            return Err(corrupt("missing tree file header"));
        }
        let mut checksum = [0; 4];
        checksum.copy_from_slice(&bytes[8..12]);
        let mut length = [0; 8];
        length.copy_from_slice(&bytes[12..HEADER_LEN]);
        let payload = &bytes[HEADER_LEN..];
        if u64::from_le_bytes(length) != payload.len() as u64 {
            return Err(corrupt("truncated payload"));
        }
        if crc32fast::hash(payload) != u32::from_le_bytes(checksum) {
            return Err(corrupt("checksum mismatch"));
        }
        let record: TreeRecord = bincode::deserialize(payload).map_err(corrupt)?;
        self.check_record(&record)?;
        if record.name != self.name() {
            warn!("Loading tree '{}' into '{}'", record.name, self.name());
        }
        let tree = self.from_record(record)?;
        info!(
            "Loaded '{}' with {} nodes from {}",
            tree.name(),
            tree.n_nodes(),
            path.as_ref().display()
        );
        *self = tree;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mra::{BoundingBox, MultiResolutionAnalysis};

    #[test]
    fn test_record_roundtrip_keeps_structure() {
        let mra = MultiResolutionAnalysis::new(BoundingBox::<2>::unit(), 2).unwrap();
        let mut tree = FunctionTree::new(&mra, "tree");
        let root = tree.root_ids()[0];
        let children = tree.split_node(root, false).unwrap();
        tree.split_node(children[3], false).unwrap();
        tree.set_zero();

        let record = tree.to_record();
        assert_eq!(record.nodes.len(), tree.n_nodes());
        assert_eq!(record.nodes[0].n_children, 4);

        let other = FunctionTree::new(&mra, "other");
        other.check_record(&record).unwrap();
        let rebuilt = other.from_record(record).unwrap();
        assert_eq!(rebuilt.name(), "other");
        assert_eq!(rebuilt.n_nodes(), tree.n_nodes());
        assert_eq!(rebuilt.n_end_nodes(), tree.n_end_nodes());
        assert_eq!(rebuilt.square_norm(), 0.0);
    }

    #[test]
    fn test_bad_header() {
        let mra = MultiResolutionAnalysis::new(BoundingBox::<1>::unit(), 2).unwrap();
        let mut tree = FunctionTree::new(&mra, "tree");
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), b"not a tree").unwrap();
        assert!(matches!(tree.load_tree(file.path()), Err(Error::Corrupt(_))));
        assert_eq!(tree.n_nodes(), 1);
    }
}
