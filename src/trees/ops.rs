//! Operator overloads on function trees
//!
//! The binary operators build their result on the union of the input grids
//! and never refine further; products are computed one level below that
//! union. They panic where the fallible functions of this module return an
//! error, for example on trees built on different analyses.
use crate::treebuilders::arithmetic::{
    add, add_assign, dot, multiply, multiply_assign, power, power_assign,
};
use crate::treebuilders::grid::{build_grid, build_grid_scales};
use crate::trees::FunctionTree;
use crate::types::{Error, Result};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

fn linear<const D: usize>(
    a: &FunctionTree<D>,
    c: f64,
    b: &FunctionTree<D>,
) -> Result<FunctionTree<D>> {
    let mut out = FunctionTree::new(a.mra(), a.name());
    build_grid(&mut out, &[a, b])?;
    add(-1.0, &mut out, &[(1.0, a), (c, b)])?;
    Ok(out)
}

/// `a + b`.
pub fn try_add<const D: usize>(a: &FunctionTree<D>, b: &FunctionTree<D>) -> Result<FunctionTree<D>> {
    linear(a, 1.0, b)
}

/// `a - b`.
pub fn try_sub<const D: usize>(a: &FunctionTree<D>, b: &FunctionTree<D>) -> Result<FunctionTree<D>> {
    linear(a, -1.0, b)
}

/// `a b`.
pub fn try_mul<const D: usize>(a: &FunctionTree<D>, b: &FunctionTree<D>) -> Result<FunctionTree<D>> {
    let mut out = FunctionTree::new(a.mra(), a.name());
    build_grid(&mut out, &[a, b])?;
    build_grid_scales(&mut out, 1)?;
    multiply(-1.0, &mut out, 1.0, a, b)?;
    Ok(out)
}

/// `c a`, on the grid of `a`.
pub fn try_scale<const D: usize>(a: &FunctionTree<D>, c: f64) -> Result<FunctionTree<D>> {
    let mut out = FunctionTree::new(a.mra(), a.name());
    build_grid(&mut out, &[a])?;
    add(-1.0, &mut out, &[(c, a)])?;
    Ok(out)
}

/// `a^p`.
pub fn try_pow<const D: usize>(a: &FunctionTree<D>, p: f64) -> Result<FunctionTree<D>> {
    let mut out = FunctionTree::new(a.mra(), a.name());
    build_grid(&mut out, &[a])?;
    build_grid_scales(&mut out, 1)?;
    power(-1.0, &mut out, a, p)?;
    Ok(out)
}

fn check_divisor(c: f64) -> Result<f64> {
    if c == 0.0 {
        return Err(Error::InvalidParameter("division by zero".to_string()));
    }
    Ok(1.0 / c)
}

fn unwrap_or_panic<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{e}"),
    }
}

impl<const D: usize> FunctionTree<D> {
    /// `self^p` as a new tree.
    pub fn pow(&self, p: f64) -> FunctionTree<D> {
        unwrap_or_panic(try_pow(self, p))
    }

    /// Raise to the power `p` in place.
    pub fn pow_assign(&mut self, p: f64) -> Result<()> {
        power_assign(self, p)
    }

    /// Inner product with `other`.
    pub fn dot(&self, other: &FunctionTree<D>) -> Result<f64> {
        dot(self, other)
    }
}

impl<const D: usize> Neg for &FunctionTree<D> {
    type Output = FunctionTree<D>;

    fn neg(self) -> FunctionTree<D> {
        unwrap_or_panic(try_scale(self, -1.0))
    }
}

impl<const D: usize> Add for &FunctionTree<D> {
    type Output = FunctionTree<D>;

    fn add(self, other: &FunctionTree<D>) -> FunctionTree<D> {
        unwrap_or_panic(try_add(self, other))
    }
}

impl<const D: usize> Sub for &FunctionTree<D> {
    type Output = FunctionTree<D>;

    fn sub(self, other: &FunctionTree<D>) -> FunctionTree<D> {
        unwrap_or_panic(try_sub(self, other))
    }
}

impl<const D: usize> Mul for &FunctionTree<D> {
    type Output = FunctionTree<D>;

    fn mul(self, other: &FunctionTree<D>) -> FunctionTree<D> {
        unwrap_or_panic(try_mul(self, other))
    }
}

impl<const D: usize> Mul<f64> for &FunctionTree<D> {
    type Output = FunctionTree<D>;

    fn mul(self, c: f64) -> FunctionTree<D> {
        unwrap_or_panic(try_scale(self, c))
    }
}

impl<const D: usize> Mul<&FunctionTree<D>> for f64 {
    type Output = FunctionTree<D>;

    fn mul(self, tree: &FunctionTree<D>) -> FunctionTree<D> {
        unwrap_or_panic(try_scale(tree, self))
    }
}

impl<const D: usize> Div<f64> for &FunctionTree<D> {
    type Output = FunctionTree<D>;

    fn div(self, c: f64) -> FunctionTree<D> {
        unwrap_or_panic(check_divisor(c).and_then(|inv| try_scale(self, inv)))
    }
}

impl<const D: usize> AddAssign<&FunctionTree<D>> for FunctionTree<D> {
    fn add_assign(&mut self, other: &FunctionTree<D>) {
        unwrap_or_panic(add_assign(self, 1.0, other))
    }
}

impl<const D: usize> SubAssign<&FunctionTree<D>> for FunctionTree<D> {
    fn sub_assign(&mut self, other: &FunctionTree<D>) {
        unwrap_or_panic(add_assign(self, -1.0, other))
    }
}

impl<const D: usize> MulAssign<&FunctionTree<D>> for FunctionTree<D> {
    fn mul_assign(&mut self, other: &FunctionTree<D>) {
        unwrap_or_panic(multiply_assign(self, other))
    }
}

impl<const D: usize> MulAssign<f64> for FunctionTree<D> {
    fn mul_assign(&mut self, c: f64) {
        self.rescale(c);
    }
}

impl<const D: usize> DivAssign<f64> for FunctionTree<D> {
    fn div_assign(&mut self, c: f64) {
        let inv = unwrap_or_panic(check_divisor(c));
        self.rescale(inv);
    }
}
