//! Application of convolution operators
use crate::basis::apply_along;
use crate::operators::ConvolutionOperator;
use crate::threads::ExecutionContext;
use crate::treebuilders::builder::{build_nonstandard, TreeCalculator, WaveletAdaptor};
use crate::trees::{FunctionTree, MwNode, NodeIndex};
use crate::types::{Error, Result};
use itertools::Itertools;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Scaling coefficients of an input index below the input tree.
struct GeneratedInput {
    coefs: Vec<f64>,
    norm: f64,
}

enum InputNode<'a, const D: usize> {
    Persisted(&'a MwNode<D>),
    Generated(Arc<GeneratedInput>),
}

impl<'a, const D: usize> InputNode<'a, D> {
    /// Component `u` and its norm. Generated inputs carry no wavelets.
    fn component(&self, u: usize) -> Option<(&[f64], f64)> {
        match self {
            InputNode::Persisted(node) => {
                let coefs = node.component(u)?;
                Some((coefs, node.component_norm(u)))
            }
            InputNode::Generated(input) if u == 0 => Some((&input.coefs, input.norm)),
            InputNode::Generated(_) => None,
        }
    }
}

/// One node of `oper` applied to `inp`. Blocks whose contribution is
/// bounded below the screening threshold are skipped.
struct ConvolutionCalculator<'a, const D: usize> {
    oper: &'a ConvolutionOperator<D>,
    inp: &'a FunctionTree<D>,
    prec: f64,
    input_norm: f64,
    reference: f64,
    generated: RwLock<HashMap<NodeIndex<D>, Arc<GeneratedInput>>>,
}

impl<'a, const D: usize> ConvolutionCalculator<'a, D> {
    fn new(
        oper: &'a ConvolutionOperator<D>,
        inp: &'a FunctionTree<D>,
        prec: f64,
        abs_prec: bool,
    ) -> Self {
        let input_norm = inp.square_norm().max(0.0).sqrt();
        Self {
            oper,
            inp,
            prec,
            input_norm,
            reference: if abs_prec { 1.0 } else { input_norm },
            generated: RwLock::new(HashMap::new()),
        }
    }

    fn threshold(&self, scale: i32) -> f64 {
        0.1 * self.prec * self.reference * 2.0_f64.powf(-0.5 * (scale + 1) as f64)
            / self.oper.n_terms() as f64
    }

    fn generated_input(&self, index: &NodeIndex<D>) -> Option<Arc<GeneratedInput>> {
        if let Ok(cache) = self.generated.read() {
            if let Some(entry) = cache.get(index) {
                return Some(Arc::clone(entry));
            }
        }
        let coefs = self.inp.scaling_below(index)?;
        let norm = coefs.iter().map(|c| c * c).sum::<f64>().sqrt();
        let entry = Arc::new(GeneratedInput { coefs, norm });
        if let Ok(mut cache) = self.generated.write() {
            cache.insert(*index, Arc::clone(&entry));
        }
        Some(entry)
    }

    /// The input node at `index` shifted back by `offset`.
    fn input_node(&self, index: &NodeIndex<D>, offset: &[i64]) -> Option<InputNode<'a, D>> {
        let mut translation = [0; D];
        for d in 0..D {
            translation[d] = i32::try_from(index.translation()[d] as i64 - offset[d]).ok()?;
        }
        let source = NodeIndex::new(index.scale(), translation);
        if !self.inp.mra().contains(&source) {
            return None;
        }
        let inp: &'a FunctionTree<D> = self.inp;
        match inp.find_id(&source) {
            Some(id) => Some(InputNode::Persisted(&inp[id])),
            None => self.generated_input(&source).map(InputNode::Generated),
        }
    }

    fn cache_size(&self) -> usize {
        self.generated.read().map_or(0, |cache| cache.len())
    }
}

/// An output component reached from one input component of one term.
struct Interaction<const D: usize> {
    component: usize,
    types: [usize; D],
    bands: [i64; D],
}

impl<'a, const D: usize> TreeCalculator<D> for ConvolutionCalculator<'a, D> {
    fn compute(&self, index: &NodeIndex<D>) -> Vec<f64> {
        let mra = self.oper.mra();
        let m = mra.basis().size();
        let block_size = mra.block_size();
        let n_components = 1usize << D;
        let scale = index.scale();
        let at_root = scale == mra.root_scale();
        let tau = self.threshold(scale);

        let mut out = vec![0.0; block_size * n_components];
        let mut inputs: HashMap<Vec<i64>, Option<InputNode<'a, D>>> = HashMap::new();

        for (term, entry) in self.oper.expansion().terms().iter().enumerate() {
            let Some(blocks) = self.oper.scale_blocks(term, scale) else {
                continue;
            };
            let coef = entry.coef();
            let weight = coef.abs() * self.input_norm;

            for u in 0..n_components {
                let mut interactions: Vec<Interaction<D>> = Vec::new();
                for t in 0..n_components {
                    // The scaling-scaling part only enters on the coarsest scale
                    if t == 0 && u == 0 && !at_root {
                        continue;
                    }
                    let types: [usize; D] =
                        std::array::from_fn(|d| 2 * ((t >> d) & 1) + ((u >> d) & 1));
                    let norms: [f64; D] = std::array::from_fn(|d| blocks.max_norm(types[d]));
                    if weight * norms.iter().product::<f64>() < tau {
                        continue;
                    }
                    let mut bands = [0; D];
                    let found = (0..D).all(|d| {
                        let others: f64 = (0..D).filter(|e| *e != d).map(|e| norms[e]).product();
                        match blocks.band_for(types[d], tau / (weight * others)) {
                            Some(band) => {
                                bands[d] = band;
                                true
                            }
                            None => false,
                        }
                    });
                    if found {
                        interactions.push(Interaction {
                            component: t,
                            types,
                            bands,
                        });
                    }
                }
                if interactions.is_empty() {
                    continue;
                }

                let reach: Vec<i64> = (0..D)
                    .map(|d| interactions.iter().map(|i| i.bands[d]).max().unwrap_or(0))
                    .collect();
                for offset in reach.iter().map(|r| -r..=*r).multi_cartesian_product() {
                    let source = inputs
                        .entry(offset.clone())
                        .or_insert_with(|| self.input_node(index, &offset));
                    let Some((coefs, norm)) = source.as_ref().and_then(|s| s.component(u)) else {
                        continue;
                    };
                    if norm <= 0.0 {
                        continue;
                    }
                    for interaction in &interactions {
                        if (0..D).any(|d| offset[d].abs() > interaction.bands[d]) {
                            continue;
                        }
                        let bound: f64 = (0..D)
                            .map(|d| blocks.norm(interaction.types[d], offset[d]))
                            .product();
                        if coef.abs() * bound * norm < tau {
                            continue;
                        }
                        let mut data = coefs.to_vec();
                        for d in 0..D {
                            if let Some(block) = blocks.block(interaction.types[d], offset[d]) {
                                data = apply_along(block, m, d, D, &data);
                            }
                        }
                        let start = interaction.component * block_size;
                        for (o, v) in out[start..start + block_size].iter_mut().zip(data) {
                            *o += coef * v;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Apply `oper` to `inp`, building the result adaptively in `out`. Any
/// previous content of `out` is discarded. A negative precision selects the
/// build precision of the operator. Precision is relative to the norm of
/// the input unless `abs_prec` is set.
pub fn apply<const D: usize>(
    prec: f64,
    out: &mut FunctionTree<D>,
    oper: &ConvolutionOperator<D>,
    inp: &FunctionTree<D>,
    max_iter: i32,
    abs_prec: bool,
) -> Result<usize> {
    let ctx = ExecutionContext::global()?;
    apply_with(&ctx, prec, out, oper, inp, max_iter, abs_prec)
}

/// As [`apply`], on an explicit execution context.
pub fn apply_with<const D: usize>(
    ctx: &ExecutionContext,
    prec: f64,
    out: &mut FunctionTree<D>,
    oper: &ConvolutionOperator<D>,
    inp: &FunctionTree<D>,
    max_iter: i32,
    abs_prec: bool,
) -> Result<usize> {
    if out.mra() != oper.mra() || inp.mra() != oper.mra() {
        return Err(Error::IncompatibleMra);
    }
    if !inp.has_coefs() {
        return Err(Error::MissingCoefs(inp.name().to_string()));
    }
    let prec = if prec < 0.0 {
        oper.build_precision()
    } else {
        prec
    };

    out.clear();
    let calculator = ConvolutionCalculator::new(oper, inp, prec, abs_prec);
    let adaptor = WaveletAdaptor::new(prec, abs_prec, oper.mra().max_scale())
        .with_reference(inp.square_norm());
    let rounds = build_nonstandard(ctx, out, &calculator, &adaptor, max_iter)?;
    debug!(
        "Applied {:?} to '{}': {} nodes, {} generated inputs",
        oper.kind(),
        inp.name(),
        out.n_nodes(),
        calculator.cache_size()
    );
    Ok(rounds)
}

impl<const D: usize> ConvolutionOperator<D> {
    /// Apply the operator at its build precision, returning a new tree.
    pub fn apply_to(&self, inp: &FunctionTree<D>) -> Result<FunctionTree<D>> {
        let mut out = FunctionTree::new(self.mra(), inp.name());
        apply(self.build_precision(), &mut out, self, inp, -1, false)?;
        Ok(out)
    }
}
