//! TVD-RK global-time-step integration to a terminal physical time.
//!
//! Each physical time step copies `U` into a stage buffer, then for every
//! TVD-RK stage asks `Spatial` for a fresh residual and blends the stage
//! buffer with a pseudo-Euler update scaled by the global `Δt_min` taken at
//! the first stage. The `γ_s` coefficient of the usual `(α,β,γ)` Shu–Osher
//! table always equals `β_s` for the standard SSP-RK forms this crate
//! supports (orders 1-3), so [`crate::config::TvdRkTable`] only carries the
//! two free coefficients; see `DESIGN.md`.

use problemo::common::IntoCommonProblem;

use crate::callback::StepReport;
use crate::config::{SolverConfig, TvdRkTable};
use crate::error::SolverError;
use crate::log::{ConvergenceLog, RunSummary};
use crate::spatial::Spatial;
use crate::state::{State, Workspace, last_variable_residual_norm};
use crate::terminators::Terminator;
use crate::{Driver, DriverHooks, Status};

/// Small positive constant guarding the `t >= finaltime` test against
/// floating-point drift in the accumulated `Δt_min` sum.
const TIME_EPS: crate::E = 1e-10;

pub struct ExplicitUnsteady<'a, S: Spatial> {
    spatial: &'a S,
    config: SolverConfig,
    table: TvdRkTable,
    workspace: Workspace,
    stage: faer::Mat<crate::E>,
    conv_log: Option<ConvergenceLog>,
}

impl<'a, S: Spatial> ExplicitUnsteady<'a, S> {
    pub fn new(spatial: &'a S, config: SolverConfig) -> Result<Self, problemo::Problem> {
        config.validate().into_common_problem()?;
        let table = TvdRkTable::for_order(config.rk_order).into_common_problem()?;
        let n = spatial.mesh().n_cells();
        let conv_log = match (&config.logfile, config.lognres) {
            (Some(path), true) => Some(ConvergenceLog::create(path)?),
            _ => None,
        };
        Ok(Self {
            spatial,
            workspace: Workspace::new(n, 0),
            stage: faer::Mat::zeros(n, 0),
            config,
            table,
            conv_log,
        })
    }

    /// TVD-RK has no inner linear solve, so the run-summary's `lin_*` fields
    /// are always zero here. Gated the same way [`ConvergenceLog::create`] is.
    fn emit_run_summary(&self, nelem: usize, outer_iters: usize) -> Result<(), problemo::Problem> {
        let (path, enabled) = (&self.config.logfile, self.config.lognres);
        let Some(path) = (if enabled { path.as_ref() } else { None }) else {
            return Ok(());
        };
        crate::log::write_run_summary(
            path,
            &RunSummary {
                nelem,
                threads: rayon::current_num_threads(),
                lin_walltime: 0.0,
                lin_cputime: 0.0,
                avg_lin_iters: 0.0,
                outer_iters,
            },
        )
    }
}

impl<'a, S: Spatial> Driver for ExplicitUnsteady<'a, S> {
    fn solve(&mut self, state: &mut State, hooks: &mut DriverHooks) -> Result<Status, problemo::Problem> {
        let n = state.n_cells();
        let nvars = state.n_vars();
        if self.workspace.n_vars() != nvars {
            self.workspace = Workspace::new(n, nvars);
            self.stage = faer::Mat::zeros(n, nvars);
        }
        hooks.terminator.initialize();

        let mesh = self.spatial.mesh();
        let area = |i: usize| mesh.area(i);
        let cfl = self.config.cflinit;

        let mut t: crate::E = 0.0;
        let mut step = 0usize;

        while t < self.config.finaltime - TIME_EPS {
            if step >= self.config.maxiter {
                self.emit_run_summary(n, step)?;
                return Ok(Status::IterationCap);
            }
            step += 1;

            for i in 0..n {
                for v in 0..nvars {
                    self.stage[(i, v)] = state.get(i, v);
                }
            }

            let mut dt_min: Option<crate::E> = None;

            for s in 0..self.table.stages() {
                self.workspace.zero_residual();
                let stage_state = State::from_mat(self.stage.clone());
                self.spatial.compute_residual(
                    &stage_state,
                    s == 0,
                    &mut self.workspace.r,
                    self.workspace.dt.as_slice_mut(),
                );

                if s == 0 {
                    let mut min_dt = crate::E::INFINITY;
                    for i in 0..n {
                        let dt_i = self.workspace.dt[i];
                        if !dt_i.is_finite() {
                            return Err(SolverError::numerical("non-finite local time step").into_common_problem().unwrap_err());
                        }
                        if dt_i < min_dt {
                            min_dt = dt_i;
                        }
                    }
                    dt_min = Some(min_dt);
                }
                let dt_min = dt_min.expect("dt_min is set on stage 0 before any later stage runs");

                let alpha = self.table.alpha[s];
                let beta = self.table.beta[s];
                for i in 0..n {
                    let scale = beta * dt_min * cfl / area(i);
                    for v in 0..nvars {
                        let blended = alpha * state.get(i, v) + beta * self.stage[(i, v)] - scale * self.workspace.r[(i, v)];
                        self.stage[(i, v)] = blended;
                    }
                }
            }

            for i in 0..n {
                for v in 0..nvars {
                    state.set(i, v, self.stage[(i, v)]);
                }
            }

            let dt_min = dt_min.expect("at least one stage always runs");
            t += dt_min;

            let r_norm = last_variable_residual_norm(&self.workspace.r, area);
            hooks.callback.call(&StepReport {
                step,
                rel_residual: r_norm,
                cfl,
            });
            if let Some(log) = &mut self.conv_log {
                log.record(step, r_norm)?;
            }
            if let Some(status) = hooks.terminator.terminate() {
                self.emit_run_summary(n, step)?;
                return Ok(status);
            }
        }

        self.emit_run_summary(n, step)?;
        Ok(Status::Converged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::NoOpCallback;
    use crate::config::{LinearSolver, Preconditioner};
    use crate::mesh::AreaMesh;
    use crate::terminators::NoOpTerminator;
    use faer::Mat;

    /// Scalar linear advection with the upwind-difference matrix on a
    /// periodic 1D mesh: `R(U) = A U`.
    struct UpwindAdvection {
        mesh: AreaMesh,
        dx: crate::E,
    }

    impl Spatial for UpwindAdvection {
        type Mesh = AreaMesh;

        fn mesh(&self) -> &Self::Mesh {
            &self.mesh
        }

        fn compute_residual(&self, u: &State, want_dt: bool, r: &mut Mat<crate::E>, dt: &mut [crate::E]) {
            let n = u.n_cells();
            for i in 0..n {
                let left = (i + n - 1) % n;
                r[(i, 0)] = (u.get(i, 0) - u.get(left, 0)) / self.dx;
            }
            if want_dt {
                for d in dt.iter_mut() {
                    *d = self.dx;
                }
            }
        }

        fn compute_jacobian(&self, _u: &State, _m: &mut crate::linalg::block_sparse::BlockSparseMatrix) -> Result<(), SolverError> {
            unimplemented!("not exercised by ExplicitUnsteady")
        }
    }

    fn base_config(order: usize, finaltime: crate::E) -> SolverConfig {
        SolverConfig {
            tol: 1e-8,
            maxiter: 100_000,
            cflinit: 0.5,
            cflfin: 0.5,
            rampstart: 0,
            rampend: 0,
            lintol: 1e-8,
            linmaxiterstart: 1,
            linmaxiterend: 1,
            restart_vecs: 1,
            preconditioner: Preconditioner::None,
            linearsolver: LinearSolver::Richardson,
            rk_order: order,
            finaltime,
            lognres: false,
            logfile: None,
        }
    }

    #[test]
    fn order_four_is_rejected_at_construction() {
        let spatial = UpwindAdvection {
            mesh: AreaMesh::unit(10),
            dx: 0.1,
        };
        let cfg = base_config(4, 1.0);
        assert!(ExplicitUnsteady::new(&spatial, cfg).is_err());
    }

    #[test]
    fn advects_scalar_profile_to_analytical_solution() {
        let n = 100;
        let dx = 1.0 / n as crate::E;
        let spatial = UpwindAdvection {
            mesh: AreaMesh::unit(n),
            dx,
        };
        let cfg = base_config(2, 1.0);
        let mut driver = ExplicitUnsteady::new(&spatial, cfg).unwrap();

        let mut u = State::new(n, 1);
        for i in 0..n {
            let x = i as crate::E * dx;
            u.set(i, 0, (2.0 * std::f64::consts::PI * x).sin());
        }
        let initial = u.clone();

        let mut hooks = DriverHooks::new(Box::new(NoOpCallback), Box::new(NoOpTerminator));
        let status = driver.solve(&mut u, &mut hooks).expect("solve returned an error");
        assert_eq!(status, Status::Converged);

        let mut sq_err = 0.0;
        for i in 0..n {
            let d = u.get(i, 0) - initial.get(i, 0);
            sq_err += d * d;
        }
        let l2 = (sq_err * dx).sqrt();
        assert!(l2 <= 1e-2, "l2 error {l2} exceeds tolerance");
    }
}
