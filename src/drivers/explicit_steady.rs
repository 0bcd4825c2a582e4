//! Forward-Euler pseudo-time relaxation to steady state.
//!
//! Uses a single, fixed CFL (`cflinit`) for the whole run, unlike
//! `ImplicitSteady`'s ramp -- preserved exactly as a legacy asymmetry rather
//! than "fixed" to also ramp; see `DESIGN.md`.

use crate::callback::StepReport;
use crate::config::SolverConfig;
use crate::error::SolverError;
use crate::log::{ConvergenceLog, RunSummary};
use crate::spatial::Spatial;
use crate::state::{State, Workspace, all_finite, last_variable_residual_norm};
use crate::terminators::Terminator;
use crate::{Driver, DriverHooks, Status};

use problemo::common::IntoCommonProblem;

pub struct ExplicitSteady<'a, S: Spatial> {
    spatial: &'a S,
    config: SolverConfig,
    workspace: Workspace,
    conv_log: Option<ConvergenceLog>,
}

impl<'a, S: Spatial> ExplicitSteady<'a, S> {
    pub fn new(spatial: &'a S, config: SolverConfig) -> Result<Self, problemo::Problem> {
        config.validate().into_common_problem()?;
        let n = spatial.mesh().n_cells();
        let conv_log = match (&config.logfile, config.lognres) {
            (Some(path), true) => Some(ConvergenceLog::create(path)?),
            _ => None,
        };
        Ok(Self {
            spatial,
            workspace: Workspace::new(n, 0), // resized on first solve, see `solve`
            config,
            conv_log,
        })
    }
}

impl<'a, S: Spatial> ExplicitSteady<'a, S> {
    /// Forward-Euler relaxation has no inner linear solve, so the
    /// run-summary's `lin_*` fields are always zero here; `nelem`/`threads`/
    /// `outer_iters` are still meaningful and reported. Gated the same way
    /// [`ConvergenceLog::create`] is.
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

impl<'a, S: Spatial> Driver for ExplicitSteady<'a, S> {
    fn solve(&mut self, state: &mut State, hooks: &mut DriverHooks) -> Result<Status, problemo::Problem> {
        let n = state.n_cells();
        let nvars = state.n_vars();
        if self.workspace.n_vars() != nvars {
            self.workspace = Workspace::new(n, nvars);
        }
        hooks.terminator.initialize();

        let mesh = self.spatial.mesh();
        let area = |i: usize| mesh.area(i);

        let mut r0_norm: Option<crate::E> = None;
        let mut numerical_failures = 0u32;

        for step in 1..=self.config.maxiter {
            self.workspace.zero_residual();
            self.spatial
                .compute_residual(state, true, &mut self.workspace.r, self.workspace.dt.as_slice_mut());

            if !all_finite(&self.workspace.r) {
                numerical_failures += 1;
                if numerical_failures > 1 {
                    return Err(SolverError::numerical("non-finite residual")
                        .into_common_problem()
                        .unwrap_err());
                }
                continue;
            }

            numerical_failures = 0;

            let r_norm = last_variable_residual_norm(&self.workspace.r, area);
            let r0 = *r0_norm.get_or_insert(r_norm);
            let rel = if r0 == 0.0 { 0.0 } else { r_norm / r0 };

            if step % 50 == 0 || step == 1 {
                hooks.callback.call(&StepReport {
                    step,
                    rel_residual: rel,
                    cfl: self.config.cflinit,
                });
            }
            if let Some(log) = &mut self.conv_log {
                log.record(step, rel)?;
            }

            if rel <= self.config.tol {
                self.emit_run_summary(n, step)?;
                return Ok(Status::Converged);
            }
            if let Some(status) = hooks.terminator.terminate() {
                self.emit_run_summary(n, step)?;
                return Ok(status);
            }

            for i in 0..n {
                let dt_i = self.config.cflinit * self.workspace.dt[i] / area(i);
                for v in 0..nvars {
                    let updated = state.get(i, v) - dt_i * self.workspace.r[(i, v)];
                    state.set(i, v, updated);
                }
            }
        }

        self.emit_run_summary(n, self.config.maxiter)?;
        Ok(Status::IterationCap)
    }
}
