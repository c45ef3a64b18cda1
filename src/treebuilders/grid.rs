//! Grid algebra
//!
//! Structural operations that make trees share a grid before their
//! coefficients are combined node by node.
use crate::trees::FunctionTree;
use crate::types::{Error, Result};
use log::debug;

fn check_mra<const D: usize>(out: &FunctionTree<D>, inp: &FunctionTree<D>) -> Result<()> {
    if out.mra() != inp.mra() {
        return Err(Error::IncompatibleMra);
    }
    Ok(())
}

/// Split the nodes of `out` that are branch nodes in `inp`. Returns the
/// number of nodes created.
fn union_into<const D: usize>(
    out: &mut FunctionTree<D>,
    inp: &FunctionTree<D>,
    pass_coefs: bool,
) -> Result<usize> {
    check_mra(out, inp)?;
    let mut created = 0;
    for id in inp.branch_ids_top_down() {
        let Some(out_id) = out.find_id(inp[id].index()) else {
            continue;
        };
        if out[out_id].is_leaf_node() {
            let pass = pass_coefs && out[out_id].has_coefs();
            created += out.split_node(out_id, pass)?.len();
        }
    }
    Ok(created)
}

/// Extend the grid of `out` to cover the union of the grids of `inputs`.
/// New nodes carry no coefficients.
pub fn build_grid<const D: usize>(
    out: &mut FunctionTree<D>,
    inputs: &[&FunctionTree<D>],
) -> Result<usize> {
    let mut created = 0;
    for inp in inputs {
        created += union_into(out, inp, false)?;
    }
    debug!("build_grid: {created} new nodes in '{}'", out.name());
    Ok(created)
}

/// Split every end node of `out` `scales` times. New nodes carry no
/// coefficients.
pub fn build_grid_scales<const D: usize>(out: &mut FunctionTree<D>, scales: usize) -> Result<usize> {
    split_end_nodes(out, scales, false)
}

/// Refine `out` so that it is at least as fine as `inp`. Coefficients of
/// populated nodes are passed down, leaving the represented function
/// unchanged.
pub fn refine_grid<const D: usize>(out: &mut FunctionTree<D>, inp: &FunctionTree<D>) -> Result<usize> {
    let created = union_into(out, inp, true)?;
    debug!("refine_grid: {created} new nodes in '{}'", out.name());
    Ok(created)
}

/// Split every end node of `out` `scales` times, passing coefficients down.
pub fn refine_grid_scales<const D: usize>(out: &mut FunctionTree<D>, scales: usize) -> Result<usize> {
    split_end_nodes(out, scales, true)
}

fn split_end_nodes<const D: usize>(
    out: &mut FunctionTree<D>,
    scales: usize,
    pass_coefs: bool,
) -> Result<usize> {
    let mut created = 0;
    for _ in 0..scales {
        for id in out.end_node_ids().to_vec() {
            let pass = pass_coefs && out[id].has_coefs();
            created += out.split_node(id, pass)?.len();
        }
    }
    Ok(created)
}

/// Give `out` exactly the grid of `inp`, without coefficients.
pub fn copy_grid<const D: usize>(out: &mut FunctionTree<D>, inp: &FunctionTree<D>) -> Result<()> {
    check_mra(out, inp)?;
    out.clear();
    union_into(out, inp, false)?;
    Ok(())
}

/// Copy the coefficients of `inp` into `out`, which must have the same grid.
pub fn copy_func<const D: usize>(out: &mut FunctionTree<D>, inp: &FunctionTree<D>) -> Result<()> {
    check_mra(out, inp)?;
    if out.n_nodes() != inp.n_nodes() {
        return Err(Error::StructureMismatch(format!(
            "'{}' has {} nodes, '{}' has {}",
            out.name(),
            out.n_nodes(),
            inp.name(),
            inp.n_nodes()
        )));
    }
    let mut pairs = Vec::with_capacity(inp.n_nodes());
    for id in inp.ids_top_down() {
        let index = inp[id].index();
        match out.find_id(index) {
            Some(out_id) if out[out_id].n_children() == inp[id].n_children() => {
                pairs.push((out_id, id))
            }
            _ => {
                return Err(Error::StructureMismatch(format!(
                    "node {index} differs between '{}' and '{}'",
                    out.name(),
                    inp.name()
                )))
            }
        }
    }
    for (out_id, id) in pairs {
        match inp[id].coefs() {
            Some(coefs) => out.set_node_coefs(out_id, coefs.to_vec()),
            None => out.clear_node_coefs(out_id),
        }
    }
    Ok(())
}

/// Reset `out` to its root nodes.
pub fn clear_grid<const D: usize>(out: &mut FunctionTree<D>) {
    out.clear();
}
