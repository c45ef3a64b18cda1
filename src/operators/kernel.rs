//! Separable convolution kernels
//!
//! An operator kernel is a sum of terms `beta_i prod_d k_i(x_d)`. Each
//! one dimensional factor supplies the scaling-scaling interaction block
//!
//! `S^n(l)_{ij} = 2^{-n} int X_{ij}(w) k(2^{-n} (w + l)) dw`,
//!
//! where `X_{ij}(w) = int phi_i(u) phi_j(u - w) du` is the overlap of two
//! scaling functions shifted by `w` in [-1, 1].
use crate::basis::LegendreBasis;
use crate::types::{Error, Result};
use log::info;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Largest number of Gaussian terms in an expansion.
pub const MAX_SEPARATION_RANK: usize = 1000;

/// Gaussians narrower than this fraction of a box are treated as delta
/// functions of the same weight.
const NARROW_GAUSSIAN: f64 = 1.0e-6;

/// One dimensional factor of a separable kernel term.
pub trait ConvolutionKernel: fmt::Debug + Send + Sync {
    /// The `(k+1) x (k+1)` row major block `S^n(l)` at `scale` for output
    /// translation minus input translation `l`.
    fn scaling_block(&self, basis: &LegendreBasis, scale: i32, l: i64) -> Vec<f64>;

    /// Translation difference beyond which the blocks at `scale` are below
    /// `cutoff` relative to the kernel maximum.
    fn support(&self, scale: i32, cutoff: f64) -> i64;

    /// Value of the kernel at `x`. Distributions return zero.
    fn evaluate(&self, x: f64) -> f64;
}

/// The identity kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaKernel;

impl ConvolutionKernel for DeltaKernel {
    fn scaling_block(&self, basis: &LegendreBasis, _scale: i32, l: i64) -> Vec<f64> {
        let m = basis.size();
        let mut block = vec![0.0; m * m];
        if l == 0 {
            for i in 0..m {
                block[i * m + i] = 1.0;
            }
        }
        block
    }

    fn support(&self, _scale: i32, _cutoff: f64) -> i64 {
        0
    }

    fn evaluate(&self, _x: f64) -> f64 {
        0.0
    }
}

/// The Gaussian `exp(-exponent x^2)`.
#[derive(Debug, Clone, Copy)]
pub struct GaussianKernel {
    exponent: f64,
}

impl GaussianKernel {
    /// Create a Gaussian factor.
    pub fn new(exponent: f64) -> Result<Self> {
        if !(exponent > 0.0) || !exponent.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "Gaussian kernel exponent must be positive, got {exponent}"
            )));
        }
        Ok(Self { exponent })
    }

    /// The exponent.
    pub fn exponent(&self) -> f64 {
        self.exponent
    }

    /// Width of the Gaussian in boxes at `scale`.
    fn width(&self, scale: i32) -> f64 {
        2.0_f64.powi(scale) / self.exponent.sqrt()
    }
}

/// `X(w)` as a row major `m x m` matrix.
fn shifted_overlap(basis: &LegendreBasis, w: f64, values: &mut [f64]) {
    let m = basis.size();
    let (lower, upper) = if w >= 0.0 { (w, 1.0) } else { (0.0, 1.0 + w) };
    values.iter_mut().for_each(|v| *v = 0.0);
    if upper <= lower {
        return;
    }
    let mut phi_u = vec![0.0; m];
    let mut phi_v = vec![0.0; m];
    let h = upper - lower;
    for (x, weight) in basis
        .quadrature()
        .points()
        .iter()
        .zip(basis.quadrature().weights())
    {
        let u = lower + h * x;
        basis.evaluate(u, &mut phi_u);
        basis.evaluate((u - w).clamp(0.0, 1.0), &mut phi_v);
        for i in 0..m {
            let a = weight * h * phi_u[i];
            for j in 0..m {
                values[i * m + j] += a * phi_v[j];
            }
        }
    }
}

impl ConvolutionKernel for GaussianKernel {
    fn scaling_block(&self, basis: &LegendreBasis, scale: i32, l: i64) -> Vec<f64> {
        let m = basis.size();
        let sigma = self.width(scale);
        let mut block = vec![0.0; m * m];

        if sigma < NARROW_GAUSSIAN {
            if l == 0 {
                let weight = (PI / self.exponent).sqrt() * 2.0_f64.powi(scale);
                let factor = 2.0_f64.powi(-scale) * weight;
                for i in 0..m {
                    block[i * m + i] = factor;
                }
            }
            return block;
        }

        // Breakpoints graded geometrically towards the centre of the Gaussian
        let centre = -(l as f64);
        let mut breaks = vec![-1.0, 0.0, 1.0];
        if centre > -1.0 && centre < 1.0 {
            breaks.push(centre);
        }
        let mut width = sigma;
        while width < 2.0 {
            for b in [centre - width, centre + width] {
                if b > -1.0 && b < 1.0 {
                    breaks.push(b);
                }
            }
            width *= 2.0;
        }
        breaks.sort_by(|a, b| a.total_cmp(b));
        breaks.dedup();

        let rule = crate::basis::GaussLegendre::new(2 * m + 8);
        let mut overlap = vec![0.0; m * m];
        let factor = 2.0_f64.powi(-scale);
        for segment in breaks.windows(2) {
            let (a, b) = (segment[0], segment[1]);
            for (x, weight) in rule.points().iter().zip(rule.weights()) {
                let w = a + (b - a) * x;
                let t = (w + l as f64) / sigma;
                let kernel = (-t * t).exp();
                if kernel == 0.0 {
                    continue;
                }
                shifted_overlap(basis, w, &mut overlap);
                let scaled = factor * weight * (b - a) * kernel;
                for (entry, x) in block.iter_mut().zip(overlap.iter()) {
                    *entry += scaled * x;
                }
            }
        }
        block
    }

    fn support(&self, scale: i32, cutoff: f64) -> i64 {
        let reach = 1.0 + self.width(scale) * (-cutoff.ln()).max(0.0).sqrt();
        if reach > (i64::MAX / 4) as f64 {
            i64::MAX / 4
        } else {
            reach.ceil() as i64
        }
    }

    fn evaluate(&self, x: f64) -> f64 {
        (-self.exponent * x * x).exp()
    }
}

/// A term `coef prod_d k(x_d)` of a separable expansion.
#[derive(Debug, Clone)]
pub struct KernelTerm {
    coef: f64,
    kernel: Arc<dyn ConvolutionKernel>,
}

impl KernelTerm {
    /// Create a term.
    pub fn new(coef: f64, kernel: Arc<dyn ConvolutionKernel>) -> Self {
        Self { coef, kernel }
    }

    /// The coefficient.
    pub fn coef(&self) -> f64 {
        self.coef
    }

    /// The one dimensional factor.
    pub fn kernel(&self) -> &dyn ConvolutionKernel {
        self.kernel.as_ref()
    }
}

/// A kernel written as a sum of separable terms.
#[derive(Debug, Clone, Default)]
pub struct KernelExpansion {
    terms: Vec<KernelTerm>,
}

impl KernelExpansion {
    /// An empty expansion.
    pub fn new() -> Self {
        Self { terms: Vec::new() }
    }

    /// Add a term.
    pub fn push(&mut self, term: KernelTerm) {
        self.terms.push(term);
    }

    /// The delta function.
    pub fn identity() -> Self {
        Self {
            terms: vec![KernelTerm::new(1.0, Arc::new(DeltaKernel))],
        }
    }

    /// `1 / (4 pi r)` for `r_min <= r <= r_max` to relative precision `prec`.
    pub fn poisson(prec: f64, r_min: f64, r_max: f64) -> Result<Self> {
        Self::gaussian_sum(prec, r_min, r_max, 0.0)
    }

    /// `exp(-mu r) / (4 pi r)` for `r_min <= r <= r_max` to relative
    /// precision `prec`.
    pub fn helmholtz(mu: f64, prec: f64, r_min: f64, r_max: f64) -> Result<Self> {
        if !(mu > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "Helmholtz exponent must be positive, got {mu}"
            )));
        }
        Self::gaussian_sum(prec, r_min, r_max, mu)
    }

    /// Trapezoidal discretisation of
    /// `exp(-mu r) / r = 2 / sqrt(pi) int exp(-r^2 e^{2s} - mu^2 e^{-2s} / 4 + s) ds`.
    fn gaussian_sum(prec: f64, r_min: f64, r_max: f64, mu: f64) -> Result<Self> {
        if !(prec > 0.0 && prec < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "kernel precision must be in (0, 1), got {prec}"
            )));
        }
        if !(r_min > 0.0 && r_min < r_max) {
            return Err(Error::InvalidParameter(format!(
                "invalid kernel range [{r_min}, {r_max}]"
            )));
        }
        let s_lower = (prec * PI.sqrt() / (2.0 * r_max)).ln();
        let s_upper = (((-prec.ln()).sqrt() + 1.0) / r_min).ln();
        let step = 1.0 / (0.2 - 0.47 * prec.log10());
        let n_terms = ((s_upper - s_lower) / step).ceil() as usize + 1;
        if n_terms > MAX_SEPARATION_RANK {
            return Err(Error::InvalidParameter(format!(
                "kernel expansion needs {n_terms} terms"
            )));
        }

        let mut expansion = Self::new();
        for i in 0..n_terms {
            let s = s_lower + i as f64 * step;
            let exponent = (2.0 * s).exp();
            let screening = (-mu * mu / (4.0 * exponent)).exp();
            let coef = 2.0 * step / PI.sqrt() * s.exp() * screening / (4.0 * PI);
            if screening < prec * 1e-6 {
                continue;
            }
            expansion.push(KernelTerm::new(coef, Arc::new(GaussianKernel::new(exponent)?)));
        }
        info!(
            "Kernel expansion with {} Gaussian terms for r in [{r_min:e}, {r_max:e}]",
            expansion.len()
        );
        Ok(expansion)
    }

    /// Number of terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether there are no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The terms.
    pub fn terms(&self) -> &[KernelTerm] {
        &self.terms
    }

    /// Value of the D-dimensional kernel at distance vector `r`.
    pub fn evaluate<const D: usize>(&self, r: &[f64; D]) -> f64 {
        self.terms
            .iter()
            .map(|term| term.coef * r.iter().map(|x| term.kernel.evaluate(*x)).product::<f64>())
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::*;

    #[test]
    fn test_poisson_expansion() {
        let prec = 1e-4;
        let expansion = KernelExpansion::poisson(prec, 1e-3, 2.0).unwrap();
        for r in [0.01, 0.1, 0.5, 1.0, 1.9] {
            let value = expansion.evaluate(&[r, 0.0, 0.0]);
            let exact = 1.0 / (4.0 * PI * r);
            assert_relative_eq!(value, exact, max_relative = 10.0 * prec);
        }
    }

    #[test]
    fn test_helmholtz_expansion() {
        let prec = 1e-4;
        let mu = 2.0;
        let expansion = KernelExpansion::helmholtz(mu, prec, 1e-3, 2.0).unwrap();
        for r in [0.01, 0.1, 0.5, 1.0] {
            let value = expansion.evaluate(&[0.0, r, 0.0]);
            let exact = (-mu * r).exp() / (4.0 * PI * r);
            assert_relative_eq!(value, exact, max_relative = 10.0 * prec);
        }
        assert!(KernelExpansion::helmholtz(-1.0, prec, 1e-3, 2.0).is_err());
        assert!(KernelExpansion::poisson(prec, 1.0, 0.5).is_err());
    }

    #[test]
    fn test_delta_block() {
        let basis = LegendreBasis::new(3).unwrap();
        let block = DeltaKernel.scaling_block(&basis, 4, 0);
        assert_eq!(block[0], 1.0);
        assert_eq!(block[5], 1.0);
        assert_eq!(block[1], 0.0);
        assert!(DeltaKernel.scaling_block(&basis, 4, 1).iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_gaussian_block_constant_part() {
        //! <phi_0, K phi_0> over neighbouring boxes is the double integral of the kernel
        let basis = LegendreBasis::new(4).unwrap();
        let kernel = GaussianKernel::new(3.0).unwrap();
        let scale = 1;
        for l in [-2, 0, 1] {
            let block = kernel.scaling_block(&basis, scale, l);
            let width = 0.5;
            let rule = crate::basis::GaussLegendre::new(30);
            let reference = rule.integrate(0.0, width, |x| {
                rule.integrate(0.0, width, |y| kernel.evaluate(x - y + l as f64 * width))
            }) / width;
            assert_relative_eq!(block[0], reference, max_relative = 1e-10);
        }
    }

    #[test]
    fn test_narrow_gaussian_is_delta() {
        let basis = LegendreBasis::new(3).unwrap();
        let exponent = 1e16;
        let kernel = GaussianKernel::new(exponent).unwrap();
        let block = kernel.scaling_block(&basis, 2, 0);
        let weight = (PI / exponent).sqrt();
        assert_relative_eq!(block[0], weight, max_relative = 1e-12);
        assert_relative_eq!(block[5], weight, max_relative = 1e-12);
        assert_eq!(block[1], 0.0);
    }
}
