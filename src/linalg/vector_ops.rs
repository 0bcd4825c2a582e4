//! Flat-vector reductions and elementwise ops shared by the Krylov solvers
//! and the explicit drivers: small free functions over plain slices, since
//! every driver here works over a flattened `N*V` state rather than one
//! scalar column.

use rayon::prelude::*;

use crate::E;

/// `sum_i x[i] * y[i]`. A reduction: summation order may differ from a
/// sequential loop under a parallel implementation, but must stay close to
/// a sequential reference to the last few decimal digits.
pub fn dot(x: &[E], y: &[E]) -> E {
    debug_assert_eq!(x.len(), y.len());
    x.par_iter().zip(y.par_iter()).map(|(a, b)| a * b).sum()
}

/// `sqrt(sum_i x[i]^2)`.
pub fn norm2(x: &[E]) -> E {
    dot(x, x).sqrt()
}

/// `y <- y + alpha * x`. Safe to parallelize: every element writes only
/// its own slot.
pub fn axpy(alpha: E, x: &[E], y: &mut [E]) {
    debug_assert_eq!(x.len(), y.len());
    y.par_iter_mut().zip(x.par_iter()).for_each(|(yi, xi)| *yi += alpha * *xi);
}

/// `out <- x - y`.
pub fn sub_into(x: &[E], y: &[E], out: &mut [E]) {
    debug_assert_eq!(x.len(), y.len());
    debug_assert_eq!(x.len(), out.len());
    out.par_iter_mut()
        .zip(x.par_iter().zip(y.par_iter()))
        .for_each(|(o, (a, b))| *o = a - b);
}

/// `x <- alpha * x`.
pub fn scale(alpha: E, x: &mut [E]) {
    x.par_iter_mut().for_each(|xi| *xi *= alpha);
}
