//! Linear operator abstraction shared by the assembled block-sparse
//! Jacobian and the matrix-free finite-difference alternative.

use crate::E;
use crate::linalg::block_sparse::BlockSparseMatrix;
use crate::spatial::Spatial;
use crate::state::State;

/// `y <- A . x` for whatever `A` backs the Krylov solve.
pub trait LinearOperator {
    fn dim(&self) -> usize;
    fn apply(&self, x: &[E], y: &mut [E]);
}

/// The default, assembled-matrix operator: `A = M`, the frozen block-sparse
/// pseudo-time-augmented Jacobian.
pub struct AssembledOperator<'a> {
    pub matrix: &'a BlockSparseMatrix,
}

impl<'a> LinearOperator for AssembledOperator<'a> {
    fn dim(&self) -> usize {
        self.matrix.n_cells() * self.matrix.n_vars()
    }

    fn apply(&self, x: &[E], y: &mut [E]) {
        self.matrix.apply(x, y);
    }
}

/// Legacy matrix-free path: `A v ~= (R(U + eps*v) - R(U)) / eps`. Exposed
/// behind the same [`LinearOperator`] interface; preconditioning is then
/// limited to variants that do not require the assembled matrix (None, a
/// diagonal approximation), per the Design Notes.
pub struct MatrixFreeOperator<'a, S: Spatial> {
    spatial: &'a S,
    base_state: &'a State,
    base_residual: &'a [E],
    eps: E,
}

impl<'a, S: Spatial> MatrixFreeOperator<'a, S> {
    pub fn new(spatial: &'a S, base_state: &'a State, base_residual: &'a [E], eps: E) -> Self {
        Self {
            spatial,
            base_state,
            base_residual,
            eps,
        }
    }
}

impl<'a, S: Spatial> LinearOperator for MatrixFreeOperator<'a, S> {
    fn dim(&self) -> usize {
        self.base_state.n_cells() * self.base_state.n_vars()
    }

    fn apply(&self, x: &[E], y: &mut [E]) {
        let n = self.base_state.n_cells();
        let nvars = self.base_state.n_vars();
        let mut perturbed = self.base_state.clone();
        for i in 0..n {
            for v in 0..nvars {
                let base = perturbed.get(i, v);
                perturbed.set(i, v, base + self.eps * x[i * nvars + v]);
            }
        }
        let perturbed_residual = self.spatial.residual_only(&perturbed);
        for i in 0..n {
            for v in 0..nvars {
                let idx = i * nvars + v;
                y[idx] = (perturbed_residual[(i, v)] - self.base_residual[idx]) / self.eps;
            }
        }
    }
}
