//! Micro-benchmark of one pseudo-time step at a few problem sizes, using a
//! `divan`-based `#[[bench]] harness = false` target.

use faer::Mat;

use pseudostep::callback::NoOpCallback;
use pseudostep::config::{LinearSolver, Preconditioner, SolverConfig};
use pseudostep::drivers::ImplicitSteady;
use pseudostep::error::SolverError;
use pseudostep::linalg::block_sparse::BlockSparseMatrix;
use pseudostep::mesh::AreaMesh;
use pseudostep::terminators::NoOpTerminator;
use pseudostep::{Driver, DriverHooks, E, Spatial, State};

fn main() {
    divan::main();
}

struct TridiagSpatial {
    mesh: AreaMesh,
}

impl TridiagSpatial {
    fn new(n: usize) -> Self {
        Self {
            mesh: AreaMesh::unit(n),
        }
    }
}

impl Spatial for TridiagSpatial {
    type Mesh = AreaMesh;

    fn mesh(&self) -> &Self::Mesh {
        &self.mesh
    }

    fn compute_residual(&self, u: &State, want_dt: bool, r: &mut Mat<E>, dt: &mut [E]) {
        let n = u.n_cells();
        for i in 0..n {
            let mut acc = 2.0 * u.get(i, 0) - 1.0;
            if i > 0 {
                acc -= 0.5 * u.get(i - 1, 0);
            }
            if i + 1 < n {
                acc -= 0.5 * u.get(i + 1, 0);
            }
            r[(i, 0)] = -acc;
        }
        if want_dt {
            dt.iter_mut().for_each(|d| *d = 1.0);
        }
    }

    fn compute_jacobian(&self, u: &State, m: &mut BlockSparseMatrix) -> Result<(), SolverError> {
        let n = u.n_cells();
        for i in 0..n {
            m.set_block(i, i, &[2.0])?;
            if i > 0 {
                m.set_block(i, i - 1, &[-0.5])?;
            }
            if i + 1 < n {
                m.set_block(i, i + 1, &[-0.5])?;
            }
        }
        Ok(())
    }
}

fn config() -> SolverConfig {
    SolverConfig {
        tol: 1e-12,
        maxiter: 1,
        cflinit: 100.0,
        cflfin: 100.0,
        rampstart: 0,
        rampend: 0,
        lintol: 1e-8,
        linmaxiterstart: 20,
        linmaxiterend: 20,
        restart_vecs: 20,
        preconditioner: Preconditioner::Jacobi,
        linearsolver: LinearSolver::Bicgstab,
        rk_order: 1,
        finaltime: 1.0,
        lognres: false,
        logfile: None,
    }
}

#[divan::bench(args = [100, 1_000, 10_000])]
fn implicit_step(n: usize) {
    let spatial = TridiagSpatial::new(n);
    let mut driver = ImplicitSteady::new(&spatial, config()).unwrap();
    let mut state = State::new(n, 1);
    let mut hooks = DriverHooks::new(Box::new(NoOpCallback), Box::new(NoOpTerminator));
    driver.solve(&mut state, &mut hooks).unwrap();
}
