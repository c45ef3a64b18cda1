use approx::*;
use mwtree::mra::{BoundingBox, MultiResolutionAnalysis};
use mwtree::threads::ExecutionContext;
use mwtree::treebuilders::project_with;
use mwtree::trees::{FunctionTree, Iteration, Traverse, TreeIterator};
use mwtree::Error;
use std::fs;

fn projected(mra: &MultiResolutionAnalysis<2>) -> FunctionTree<2> {
    let f = |r: &[f64; 2]| (-40.0 * ((r[0] - 0.3).powi(2) + (r[1] + 0.2).powi(2))).exp();
    let ctx = ExecutionContext::new(2).unwrap();
    let mut tree = FunctionTree::new(mra, "saved");
    project_with(&ctx, 1e-5, &mut tree, &f, -1, false).unwrap();
    tree
}

#[test]
fn test_round_trip() {
    let mra = MultiResolutionAnalysis::new(BoundingBox::<2>::symmetric(0, 1).unwrap(), 5).unwrap();
    let tree = projected(&mra);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.mw");
    tree.save_tree(&path).unwrap();

    let mut loaded = FunctionTree::new(&mra, "loaded");
    loaded.load_tree(&path).unwrap();
    assert_eq!(loaded.name(), "loaded");
    assert_eq!(loaded.n_nodes(), tree.n_nodes());
    assert_eq!(loaded.n_end_nodes(), tree.n_end_nodes());
    assert_eq!(loaded.depth(), tree.depth());
    assert_eq!(loaded.square_norm(), tree.square_norm());

    let original = TreeIterator::with_tree(&tree, Traverse::TopDown, Iteration::Lebesgue);
    let copied = TreeIterator::with_tree(&loaded, Traverse::TopDown, Iteration::Lebesgue);
    let mut count = 0;
    for (a, b) in original.zip(copied) {
        assert_eq!(a.index(), b.index());
        assert_eq!(a.is_end_node(), b.is_end_node());
        assert_eq!(a.coefs(), b.coefs());
        count += 1;
    }
    assert_eq!(count, tree.n_nodes());
    for i in 0..tree.n_end_nodes() {
        let (a, b) = (tree.get_end_node(i).unwrap(), loaded.get_end_node(i).unwrap());
        assert_eq!(a.index(), b.index());
        assert_eq!(a.coefs(), b.coefs());
    }
    for r in [[0.3, -0.2], [0.0, 0.0], [-0.7, 0.9]] {
        assert_eq!(loaded.evaluate(&r), tree.evaluate(&r));
    }
}

#[test]
fn test_corrupt_file_leaves_tree_unchanged() {
    let mra = MultiResolutionAnalysis::new(BoundingBox::<2>::symmetric(0, 1).unwrap(), 5).unwrap();
    let tree = projected(&mra);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.mw");
    tree.save_tree(&path).unwrap();
    let bytes = fs::read(&path).unwrap();

    let mut target = projected(&mra);
    let n_nodes = target.n_nodes();
    let norm = target.square_norm();

    let truncated = dir.path().join("truncated.mw");
    fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(target.load_tree(&truncated), Err(Error::Corrupt(_))));

    let mut flipped = bytes.clone();
    let last = flipped.len() - 1;
    flipped[last] ^= 0xff;
    let damaged = dir.path().join("damaged.mw");
    fs::write(&damaged, &flipped).unwrap();
    assert!(matches!(target.load_tree(&damaged), Err(Error::Corrupt(_))));

    assert!(matches!(
        target.load_tree(dir.path().join("missing.mw")),
        Err(Error::Io(_))
    ));

    assert_eq!(target.n_nodes(), n_nodes);
    assert_eq!(target.square_norm(), norm);
}

#[test]
fn test_incompatible_analysis() {
    let mra = MultiResolutionAnalysis::new(BoundingBox::<2>::symmetric(0, 1).unwrap(), 5).unwrap();
    let other = MultiResolutionAnalysis::new(BoundingBox::<2>::symmetric(0, 1).unwrap(), 4).unwrap();
    let tree = projected(&mra);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.mw");
    tree.save_tree(&path).unwrap();

    let mut target = FunctionTree::new(&other, "other");
    assert!(matches!(target.load_tree(&path), Err(Error::IncompatibleMra)));
    assert_eq!(target.n_nodes(), 4);
    assert!(target.square_norm() < 0.0);
}
