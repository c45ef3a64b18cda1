//! Analytic Cartesian Gaussians
//!
//! `GaussFunc` is `c prod_d (x_d - R_d)^{p_d} exp(-a_d (x_d - R_d)^2)` and
//! `GaussExp` a finite sum of those. Overlaps are computed analytically with
//! the Gaussian product theorem, which makes them handy references for
//! projected trees.
use crate::function::RepresentableFunction;
use crate::types::{Coord, Error, Result};
use num::integer::binomial;
use std::f64::consts::PI;

/// A Cartesian Gaussian with an optional monomial prefactor.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussFunc<const D: usize> {
    coef: f64,
    exp: [f64; D],
    pos: Coord<D>,
    power: [u32; D],
}

impl<const D: usize> GaussFunc<D> {
    /// Isotropic Gaussian `coef exp(-exp |r - pos|^2)`.
    pub fn new(coef: f64, exp: f64, pos: Coord<D>) -> Result<Self> {
        Self::with_powers(coef, [exp; D], pos, [0; D])
    }

    /// General Gaussian with per-dimension exponents and powers.
    pub fn with_powers(coef: f64, exp: [f64; D], pos: Coord<D>, power: [u32; D]) -> Result<Self> {
        if exp.iter().any(|a| !(*a > 0.0)) {
            return Err(Error::InvalidParameter(format!(
                "Gaussian exponents must be positive, got {exp:?}"
            )));
        }
        Ok(Self {
            coef,
            exp,
            pos,
            power,
        })
    }

    /// The prefactor.
    pub fn coef(&self) -> f64 {
        self.coef
    }

    /// Exponent in dimension `dim`.
    pub fn exp(&self, dim: usize) -> f64 {
        self.exp[dim]
    }

    /// The centre.
    pub fn pos(&self) -> &Coord<D> {
        &self.pos
    }

    /// Monomial power in dimension `dim`.
    pub fn pow(&self, dim: usize) -> u32 {
        self.power[dim]
    }

    /// Set the prefactor.
    pub fn set_coef(&mut self, coef: f64) {
        self.coef = coef;
    }

    /// Set the centre.
    pub fn set_pos(&mut self, pos: Coord<D>) {
        self.pos = pos;
    }

    /// Value of the one dimensional factor in dimension `dim` at `x`.
    pub fn evaluate_1d(&self, x: f64, dim: usize) -> f64 {
        let dx = x - self.pos[dim];
        dx.powi(self.power[dim] as i32) * (-self.exp[dim] * dx * dx).exp()
    }

    /// Derivative along `dir`, a sum of at most two Gaussians.
    pub fn differentiate(&self, dir: usize) -> GaussExp<D> {
        let mut result = GaussExp::new();
        let p = self.power[dir];
        if p > 0 {
            let mut lower = self.clone();
            lower.coef *= p as f64;
            lower.power[dir] = p - 1;
            result.append(lower);
        }
        let mut upper = self.clone();
        upper.coef *= -2.0 * self.exp[dir];
        upper.power[dir] = p + 1;
        result.append(upper);
        result
    }

    /// The L2 inner product with `other`.
    pub fn calc_overlap(&self, other: &GaussFunc<D>) -> f64 {
        (0..D)
            .map(|d| {
                overlap_1d(
                    self.exp[d],
                    self.pos[d],
                    self.power[d],
                    other.exp[d],
                    other.pos[d],
                    other.power[d],
                )
            })
            .product::<f64>()
            * self.coef
            * other.coef
    }

    /// The squared L2 norm.
    pub fn calc_square_norm(&self) -> f64 {
        self.calc_overlap(self)
    }
}

impl<const D: usize> RepresentableFunction<D> for GaussFunc<D> {
    fn evaluate(&self, r: &Coord<D>) -> f64 {
        self.coef * (0..D).map(|d| self.evaluate_1d(r[d], d)).product::<f64>()
    }
}

/// `int (x-A)^p (x-B)^q exp(-a(x-A)^2 - b(x-B)^2) dx`
fn overlap_1d(a: f64, pos_a: f64, p: u32, b: f64, pos_b: f64, q: u32) -> f64 {
    let s = a + b;
    let centre = (a * pos_a + b * pos_b) / s;
    let prefactor = (-a * b / s * (pos_a - pos_b).powi(2)).exp();
    let pa = centre - pos_a;
    let pb = centre - pos_b;
    let mut sum = 0.0;
    for i in 0..=p {
        for j in 0..=q {
            let n = i + j;
            if n % 2 == 1 {
                continue;
            }
            let moment = double_factorial(n as i64 - 1) / (2.0 * s).powi(n as i32 / 2);
            sum += binomial(p, i) as f64
                * pa.powi((p - i) as i32)
                * binomial(q, j) as f64
                * pb.powi((q - j) as i32)
                * moment;
        }
    }
    prefactor * (PI / s).sqrt() * sum
}

fn double_factorial(n: i64) -> f64 {
    let mut result = 1.0;
    let mut k = n;
    while k > 1 {
        result *= k as f64;
        k -= 2;
    }
    result
}

/// A finite sum of Gaussians.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GaussExp<const D: usize> {
    funcs: Vec<GaussFunc<D>>,
}

impl<const D: usize> GaussExp<D> {
    /// An empty expansion.
    pub fn new() -> Self {
        Self { funcs: Vec::new() }
    }

    /// Add a term.
    pub fn append(&mut self, func: GaussFunc<D>) {
        self.funcs.push(func);
    }

    /// Append all terms of another expansion.
    pub fn extend(&mut self, other: GaussExp<D>) {
        self.funcs.extend(other.funcs);
    }

    /// Number of terms.
    pub fn size(&self) -> usize {
        self.funcs.len()
    }

    /// Term `term`.
    pub fn get_func(&self, term: usize) -> Option<&GaussFunc<D>> {
        self.funcs.get(term)
    }

    /// Iterate over the terms.
    pub fn iter(&self) -> impl Iterator<Item = &GaussFunc<D>> {
        self.funcs.iter()
    }

    /// Derivative along `dir`.
    pub fn differentiate(&self, dir: usize) -> GaussExp<D> {
        let mut result = GaussExp::new();
        for func in self.funcs.iter() {
            result.extend(func.differentiate(dir));
        }
        result
    }

    /// The L2 inner product with another expansion.
    pub fn calc_overlap(&self, other: &GaussExp<D>) -> f64 {
        self.funcs
            .iter()
            .map(|f| other.funcs.iter().map(|g| f.calc_overlap(g)).sum::<f64>())
            .sum()
    }

    /// The squared L2 norm.
    pub fn calc_square_norm(&self) -> f64 {
        self.calc_overlap(self)
    }
}

impl<const D: usize> RepresentableFunction<D> for GaussExp<D> {
    fn evaluate(&self, r: &Coord<D>) -> f64 {
        self.funcs.iter().map(|f| f.evaluate(r)).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::*;

    #[test]
    fn test_gauss_func() {
        let beta = 100.0;
        let alpha = (PI / beta).sqrt();
        let f = GaussFunc::new(alpha, beta, [0.25]).unwrap();
        assert_eq!(f.evaluate(&[0.25]), alpha);
        assert_relative_eq!(f.evaluate(&[0.35]), alpha * (-1.0_f64).exp(), max_relative = 1e-10);
        assert_eq!(f.coef(), alpha);
        assert_eq!(f.pos(), &[0.25]);
        assert_eq!(f.exp(0), beta);
        assert_eq!(f.pow(0), 0);
        assert!(GaussFunc::new(1.0, 0.0, [0.0]).is_err());
    }

    #[test]
    fn test_gauss_derivative() {
        let beta = 100.0;
        let alpha = (PI / beta).sqrt();
        let f = GaussFunc::new(alpha, beta, [0.25]).unwrap();
        let df = f.differentiate(0);
        let reference = -(2.0 / 10.0) * alpha * beta * (-1.0_f64).exp();
        assert_eq!(df.evaluate(&[0.25]), 0.0);
        assert_relative_eq!(df.evaluate(&[0.35]), reference, max_relative = 1e-10);

        let ddf = df.differentiate(0);
        let x = 0.31_f64 - 0.25;
        let second = alpha * (4.0 * beta * beta * x * x - 2.0 * beta) * (-beta * x * x).exp();
        assert_relative_eq!(ddf.evaluate(&[0.31]), second, max_relative = 1e-10);
    }

    #[test]
    fn test_gauss_overlap() {
        let (b1, b2) = (10.0, 20.0);
        let f1 = GaussFunc::new(1.0, b1, [0.0]).unwrap();
        let f2 = GaussFunc::new(1.0, b2, [0.25]).unwrap();
        let p = b1 + b2;
        let mu = b1 * b2 / p;
        let reference = (PI / p).sqrt() * (-mu * 0.0625_f64).exp();
        assert_relative_eq!(f1.calc_overlap(&f2), reference, max_relative = 1e-10);
    }

    #[test]
    fn test_gauss_norm() {
        let beta = 10.0;
        let f = GaussFunc::new(1.0, beta, [0.0]).unwrap();
        let reference = (PI / (2.0 * beta)).sqrt();
        assert_relative_eq!(f.calc_square_norm(), reference, max_relative = 1e-10);
        assert_eq!(f.calc_square_norm(), f.calc_overlap(&f));

        let g = GaussFunc::new(2.0, 3.0, [0.1, 0.2, -0.3]).unwrap();
        assert_relative_eq!(
            g.calc_square_norm(),
            4.0 * (PI / 6.0).powf(1.5),
            max_relative = 1e-10
        );
    }

    #[test]
    fn test_polynomial_overlap() {
        //! <x e^{-x^2}, x e^{-x^2}> = sqrt(pi/2) / 4
        let f = GaussFunc::with_powers(1.0, [1.0], [0.0], [1]).unwrap();
        assert_relative_eq!(
            f.calc_square_norm(),
            (PI / 2.0).sqrt() / 4.0,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_gauss_exp() {
        let f0 = GaussFunc::new(1.0, 10.0, [0.1]).unwrap();
        let f1 = GaussFunc::new(1.0, 20.0, [-0.1]).unwrap();
        let mut fexp = GaussExp::new();
        fexp.append(f0.clone());
        fexp.append(f1.clone());
        assert_eq!(fexp.size(), 2);
        assert_eq!(fexp.get_func(0).unwrap().exp(0), 10.0);
        assert_eq!(fexp.get_func(1).unwrap().exp(0), 20.0);
        assert!(fexp.get_func(2).is_none());
        assert_relative_eq!(
            fexp.evaluate(&[0.1]),
            f0.evaluate(&[0.1]) + f1.evaluate(&[0.1]),
            max_relative = 1e-10
        );

        let reference =
            f0.calc_square_norm() + 2.0 * f0.calc_overlap(&f1) + f1.calc_square_norm();
        assert_relative_eq!(fexp.calc_square_norm(), reference, max_relative = 1e-10);

        let dfexp = fexp.differentiate(0);
        let reference = f0.differentiate(0).evaluate(&[0.0]) + f1.differentiate(0).evaluate(&[0.0]);
        assert_relative_eq!(dfexp.evaluate(&[0.0]), reference, max_relative = 1e-10);
    }
}
