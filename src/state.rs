//! Owned numerical state.
//!
//! `U` is borrowed mutably from the caller for the duration of a solve; the
//! driver owns everything else (`R`, `Δt`, `δU`) and allocates it once,
//! sized to the mesh, then mutates it in place across every outer step.

use faer::{Col, Mat};

use crate::E;

/// The state vector `U`: `N x V` dense, row-major in meaning (column `v` is
/// conserved variable `v`, row `i` is cell `i`). Owned by the caller.
#[derive(Debug, Clone)]
pub struct State {
    u: Mat<E>,
}

impl State {
    pub fn new(n_cells: usize, n_vars: usize) -> Self {
        Self {
            u: Mat::zeros(n_cells, n_vars),
        }
    }

    pub fn from_mat(u: Mat<E>) -> Self {
        Self { u }
    }

    pub fn n_cells(&self) -> usize {
        self.u.nrows()
    }

    pub fn n_vars(&self) -> usize {
        self.u.ncols()
    }

    pub fn u(&self) -> &Mat<E> {
        &self.u
    }

    pub fn u_mut(&mut self) -> &mut Mat<E> {
        &mut self.u
    }

    pub fn get(&self, i: usize, v: usize) -> E {
        self.u[(i, v)]
    }

    pub fn set(&mut self, i: usize, v: usize, value: E) {
        self.u[(i, v)] = value;
    }
}

/// Scratch buffers owned by a driver for the lifetime of a solve session:
/// the residual `R`, the local pseudo-time step `Δt`, and (only used by
/// `ImplicitSteady`) the Newton-like correction `δU`. Allocated once,
/// reused every step.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub r: Mat<E>,
    pub dt: Col<E>,
    pub delta_u: Mat<E>,
}

impl Workspace {
    pub fn new(n_cells: usize, n_vars: usize) -> Self {
        Self {
            r: Mat::zeros(n_cells, n_vars),
            dt: Col::zeros(n_cells),
            delta_u: Mat::zeros(n_cells, n_vars),
        }
    }

    pub fn n_cells(&self) -> usize {
        self.r.nrows()
    }

    pub fn n_vars(&self) -> usize {
        self.r.ncols()
    }

    /// Zero `R`, preserving shape. Called at the top of every outer step.
    pub fn zero_residual(&mut self) {
        self.r.fill(0.0);
    }
}

/// Weighted, last-variable-only L2 residual norm shared by `ExplicitSteady`
/// and `ImplicitSteady`: `sqrt(sum_i R[i, V-1]^2 * area[i])`.
///
/// Only the last conserved variable is weighed into convergence, a domain
/// convention preserved exactly here rather than second-guessed; see
/// `DESIGN.md` for the reasoning.
pub fn last_variable_residual_norm(r: &Mat<E>, area: impl Fn(usize) -> E) -> E {
    let nvars = r.ncols();
    debug_assert!(nvars > 0);
    let last = nvars - 1;
    let mut acc = 0.0;
    for i in 0..r.nrows() {
        let ri = r[(i, last)];
        acc += ri * ri * area(i);
    }
    acc.sqrt()
}

/// `true` iff every entry of `m` is finite. Used by the drivers to detect a
/// diverging residual before it silently propagates NaN/Inf into `U`.
pub fn all_finite(m: &Mat<E>) -> bool {
    for i in 0..m.nrows() {
        for v in 0..m.ncols() {
            if !m[(i, v)].is_finite() {
                return false;
            }
        }
    }
    true
}

/// Copies `m` (`N x V`, `faer`-column-major storage) into a flat,
/// cell-major `N*V` buffer matching [`crate::linalg::block_sparse::BlockSparseMatrix`]'s
/// block layout: `flat[i * nvars + v] == m[(i, v)]`.
pub fn flatten(m: &Mat<E>) -> Vec<E> {
    let (n, nvars) = (m.nrows(), m.ncols());
    let mut out = vec![0.0; n * nvars];
    for i in 0..n {
        for v in 0..nvars {
            out[i * nvars + v] = m[(i, v)];
        }
    }
    out
}

/// Inverse of [`flatten`]: writes a flat cell-major buffer back into `m`.
pub fn unflatten_into(flat: &[E], m: &mut Mat<E>) {
    let (n, nvars) = (m.nrows(), m.ncols());
    debug_assert_eq!(flat.len(), n * nvars);
    for i in 0..n {
        for v in 0..nvars {
            m[(i, v)] = flat[i * nvars + v];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_norm_only_weighs_last_variable() {
        let mut r = Mat::<E>::zeros(2, 2);
        r[(0, 0)] = 100.0; // first variable, must be ignored
        r[(0, 1)] = 3.0;
        r[(1, 1)] = 4.0;
        let norm = last_variable_residual_norm(&r, |_| 1.0);
        assert!((norm - 5.0).abs() < 1e-12);
    }

    #[test]
    fn all_finite_detects_a_single_nan() {
        let mut r = Mat::<E>::zeros(2, 2);
        assert!(all_finite(&r));
        r[(1, 0)] = E::NAN;
        assert!(!all_finite(&r));
    }

    #[test]
    fn flatten_round_trips_through_unflatten() {
        let mut m = Mat::<E>::zeros(2, 3);
        for i in 0..2 {
            for v in 0..3 {
                m[(i, v)] = (i * 3 + v) as E;
            }
        }
        let flat = flatten(&m);
        assert_eq!(flat, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        let mut m2 = Mat::<E>::zeros(2, 3);
        unflatten_into(&flat, &mut m2);
        for i in 0..2 {
            for v in 0..3 {
                assert_eq!(m2[(i, v)], m[(i, v)]);
            }
        }
    }
}
