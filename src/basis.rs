//! Legendre scaling basis, quadrature and the two-scale filter
//!
//! A node of a function tree stores `2^D (k+1)^D` coefficients. In the
//! *compressed* layout component `t` (bit `d` set iff dimension `d` carries a
//! wavelet) is followed by its `(k+1)^D` entries, component 0 being the scaling
//! part. In the *reconstructed* layout the same slots hold the scaling
//! coefficients of the `2^D` children, child `c` having offset bit `d` in
//! dimension `d`. Inside a block the multi-index is flattened with dimension 0
//! running fastest.

use crate::types::{Error, Result, MAX_ORDER};
use itertools::izip;

/// Gauss-Legendre quadrature on the unit interval.
#[derive(Debug, Clone)]
pub struct GaussLegendre {
    points: Vec<f64>,
    weights: Vec<f64>,
}

impl GaussLegendre {
    /// Create an `npoints` rule on [0, 1].
    pub fn new(npoints: usize) -> Self {
        let n = npoints.max(1);
        let mut points = vec![0.0; n];
        let mut weights = vec![0.0; n];

        for i in 0..n {
            let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
            for _ in 0..100 {
                let (p, p_prev) = legendre_pair(n, x);
                let dp = n as f64 * (x * p - p_prev) / (x * x - 1.0);
                let dx = p / dp;
                x -= dx;
                if dx.abs() < 1e-16 {
                    break;
                }
            }
            let (p, p_prev) = legendre_pair(n, x);
            let dp = n as f64 * (x * p - p_prev) / (x * x - 1.0);
            // Nodes come out in descending order on [-1, 1]
            points[i] = 0.5 * (1.0 - x);
            weights[i] = 1.0 / ((1.0 - x * x) * dp * dp);
        }

        Self { points, weights }
    }

    /// The number of points.
    pub fn npoints(&self) -> usize {
        self.points.len()
    }

    /// The points, in ascending order.
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// The weights. They sum to one.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Integrate `f` over `[a, b]`.
    pub fn integrate<F: Fn(f64) -> f64>(&self, a: f64, b: f64, f: F) -> f64 {
        let h = b - a;
        izip!(self.points.iter(), self.weights.iter())
            .map(|(x, w)| w * f(a + h * x))
            .sum::<f64>()
            * h
    }
}

/// Legendre polynomials (P_n(x), P_{n-1}(x)) on [-1, 1].
fn legendre_pair(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut p_prev = 1.0;
    let mut p = x;
    for j in 2..=n {
        let j = j as f64;
        let p_next = ((2.0 * j - 1.0) * x * p - (j - 1.0) * p_prev) / j;
        p_prev = p;
        p = p_next;
    }
    (p, p_prev)
}

/// Tabulate the orthonormal Legendre scaling functions `0..=order` at `x` in [0, 1].
pub fn tabulate_legendre(order: usize, x: f64, values: &mut [f64]) {
    assert_eq!(values.len(), order + 1);
    values[0] = 1.0;
    for p in 1..order + 1 {
        let pf = p as f64;
        let a = 1.0 - 1.0 / pf;
        let b = (a + 1.0) * ((2.0 * pf + 1.0) / (2.0 * pf - 1.0)).sqrt();
        values[p] = (2.0 * x - 1.0) * values[p - 1] * b;
        if p > 1 {
            let c = a * ((2.0 * pf + 1.0) / (2.0 * pf - 3.0)).sqrt();
            values[p] -= values[p - 2] * c;
        }
    }
}

/// Orthonormal Legendre scaling basis of a given order together with its
/// quadrature and two-scale filter.
#[derive(Debug, Clone)]
pub struct LegendreBasis {
    order: usize,
    quadrature: GaussLegendre,
    filter: Vec<f64>,
    to_values: Vec<f64>,
    to_coefs: Vec<f64>,
}

impl LegendreBasis {
    /// Create the basis of polynomial order `order` (that is `order + 1` functions).
    pub fn new(order: usize) -> Result<Self> {
        if order == 0 || order > MAX_ORDER {
            return Err(Error::InvalidParameter(format!(
                "polynomial order must be in 1..={MAX_ORDER}, got {order}"
            )));
        }
        let m = order + 1;
        let quadrature = GaussLegendre::new(m);

        let mut to_values = vec![0.0; m * m];
        let mut to_coefs = vec![0.0; m * m];
        let mut values = vec![0.0; m];
        for (q, (x, w)) in izip!(quadrature.points(), quadrature.weights()).enumerate() {
            tabulate_legendre(order, *x, &mut values);
            for i in 0..m {
                to_values[q * m + i] = values[i];
                to_coefs[i * m + q] = w * values[i];
            }
        }

        let filter = two_scale_filter(order, &quadrature);

        Ok(Self {
            order,
            quadrature,
            filter,
            to_values,
            to_coefs,
        })
    }

    /// The polynomial order.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of scaling functions per dimension.
    pub fn size(&self) -> usize {
        self.order + 1
    }

    /// The quadrature rule with `order + 1` points.
    pub fn quadrature(&self) -> &GaussLegendre {
        &self.quadrature
    }

    /// Evaluate all scaling functions at `x` in [0, 1].
    pub fn evaluate(&self, x: f64, values: &mut [f64]) {
        tabulate_legendre(self.order, x, values);
    }

    /// The two-scale filter, a row major `2(k+1)` square orthogonal matrix.
    pub fn filter(&self) -> &[f64] {
        &self.filter
    }

    /// Map the reconstructed layout to the compressed layout in place.
    pub fn compress<const D: usize>(&self, coefs: &mut [f64]) {
        for dim in 0..D {
            self.filter_along::<D>(coefs, dim, false);
        }
    }

    /// Map the compressed layout to the reconstructed layout in place.
    pub fn reconstruct<const D: usize>(&self, coefs: &mut [f64]) {
        for dim in 0..D {
            self.filter_along::<D>(coefs, dim, true);
        }
    }

    /// Convert one block of scaling coefficients to values on the tensor
    /// quadrature grid of the unit box.
    pub fn coefs_to_values<const D: usize>(&self, block: &[f64]) -> Vec<f64> {
        let mut data = block.to_vec();
        for dim in 0..D {
            data = apply_along(&self.to_values, self.size(), dim, D, &data);
        }
        data
    }

    /// Inverse of [`LegendreBasis::coefs_to_values`].
    pub fn values_to_coefs<const D: usize>(&self, values: &[f64]) -> Vec<f64> {
        let mut data = values.to_vec();
        for dim in 0..D {
            data = apply_along(&self.to_coefs, self.size(), dim, D, &data);
        }
        data
    }

    /// Evaluate the expansion `block` of scaling functions at a point `u` of
    /// the unit box.
    pub fn evaluate_block<const D: usize>(&self, block: &[f64], u: &[f64; D]) -> f64 {
        let m = self.size();
        let mut values = vec![0.0; m * D];
        for (d, ud) in u.iter().enumerate() {
            tabulate_legendre(self.order, *ud, &mut values[d * m..(d + 1) * m]);
        }
        block
            .iter()
            .enumerate()
            .map(|(alpha, c)| {
                let mut product = *c;
                let mut rest = alpha;
                for d in 0..D {
                    product *= values[d * m + rest % m];
                    rest /= m;
                }
                product
            })
            .sum()
    }

    fn filter_along<const D: usize>(&self, coefs: &mut [f64], dim: usize, transpose: bool) {
        let m = self.size();
        let block = m.pow(D as u32);
        assert_eq!(coefs.len(), block << D);
        let stride = m.pow(dim as u32);
        let two_m = 2 * m;
        let mut input = vec![0.0; two_m];

        for comp in (0..1usize << D).filter(|c| c & (1 << dim) == 0) {
            let high = comp | (1 << dim);
            for rest in (0..block).filter(|r| (r / stride) % m == 0) {
                for a in 0..m {
                    input[a] = coefs[comp * block + rest + a * stride];
                    input[m + a] = coefs[high * block + rest + a * stride];
                }
                for row in 0..two_m {
                    let value = if transpose {
                        (0..two_m)
                            .map(|j| self.filter[j * two_m + row] * input[j])
                            .sum::<f64>()
                    } else {
                        (0..two_m)
                            .map(|j| self.filter[row * two_m + j] * input[j])
                            .sum::<f64>()
                    };
                    let (c, a) = if row < m { (comp, row) } else { (high, row - m) };
                    coefs[c * block + rest + a * stride] = value;
                }
            }
        }
    }
}

/// Apply a row major `m x m` matrix along dimension `dim` of an `m^ndim` block.
pub fn apply_along(mat: &[f64], m: usize, dim: usize, ndim: usize, input: &[f64]) -> Vec<f64> {
    let stride = m.pow(dim as u32);
    let outer = m.pow((ndim - dim - 1) as u32);
    let mut output = vec![0.0; input.len()];
    for o in 0..outer {
        for i in 0..stride {
            let base = o * stride * m + i;
            for a in 0..m {
                let mut sum = 0.0;
                for b in 0..m {
                    sum += mat[a * m + b] * input[base + b * stride];
                }
                output[base + a * stride] = sum;
            }
        }
    }
    output
}

/// Build the orthogonal filter `[[H0, H1], [G0, G1]]`.
///
/// `H_c[i][j] = <phi_i, phi_{j,c}>` where `phi_{j,c}` is the j-th scaling
/// function of child `c`. The wavelet rows complete the scaling rows to an
/// orthonormal basis by Gram-Schmidt.
fn two_scale_filter(order: usize, quadrature: &GaussLegendre) -> Vec<f64> {
    let m = order + 1;
    let two_m = 2 * m;
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(two_m);

    let mut parent = vec![0.0; m];
    let mut child = vec![0.0; m];
    for i in 0..m {
        let mut row = vec![0.0; two_m];
        for c in 0..2 {
            for (u, w) in izip!(quadrature.points(), quadrature.weights()) {
                tabulate_legendre(order, 0.5 * (u + c as f64), &mut parent);
                tabulate_legendre(order, *u, &mut child);
                for j in 0..m {
                    row[c * m + j] += w * parent[i] * child[j] * std::f64::consts::FRAC_1_SQRT_2;
                }
            }
        }
        rows.push(row);
    }

    for candidate in 0..two_m {
        if rows.len() == two_m {
            break;
        }
        let mut v = vec![0.0; two_m];
        v[candidate] = 1.0;
        for _ in 0..2 {
            for row in rows.iter() {
                let proj: f64 = izip!(row.iter(), v.iter()).map(|(a, b)| a * b).sum();
                for (vj, rj) in v.iter_mut().zip(row.iter()) {
                    *vj -= proj * rj;
                }
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 1e-6 {
            rows.push(v.iter().map(|x| x / norm).collect());
        }
    }

    rows.concat()
}
