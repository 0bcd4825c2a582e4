//! The spatial discretization is an external collaborator: the core only
//! ever asks it for a cell-wise residual, a stable local time step, and
//! (for `ImplicitSteady`) a Jacobian.

use faer::Mat;

use crate::E;
use crate::error::SolverError;
use crate::linalg::block_sparse::BlockSparseMatrix;
use crate::mesh::Mesh;
use crate::state::State;

pub trait Spatial: Sync {
    type Mesh: Mesh;

    fn mesh(&self) -> &Self::Mesh;

    /// Fills `r[i, :]` with the spatial divergence at cell `i`. If
    /// `want_dt`, also fills `dt[i]` with a stable local pseudo-time step.
    fn compute_residual(&self, u: &State, want_dt: bool, r: &mut Mat<E>, dt: &mut [E]);

    /// Fills/overwrites block entries of `m`. No allocation once the
    /// pattern is frozen.
    fn compute_jacobian(&self, u: &State, m: &mut BlockSparseMatrix) -> Result<(), SolverError>;

    /// Convenience wrapper around [`Self::compute_residual`] for the
    /// matrix-free operator, which only ever needs `R`.
    fn residual_only(&self, u: &State) -> Mat<E> {
        let mut r = Mat::zeros(u.n_cells(), u.n_vars());
        let mut dt = vec![0.0; u.n_cells()];
        self.compute_residual(u, false, &mut r, &mut dt);
        r
    }
}
