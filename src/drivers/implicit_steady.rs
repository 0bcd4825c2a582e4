//! Backward-Euler pseudo-time integration to steady state.
//!
//! Each outer step assembles `M = diag(area/(cfl*dt)) - dR/dU` over the
//! frozen block-sparse pattern (built and frozen on the first assembly,
//! then only ever re-valued), solves `M . deltaU = R` with a preconditioned
//! Krylov inner solve, and applies `U += deltaU`. CFL and the inner
//! iteration cap ramp linearly from `rampstart` to `rampend`.

use problemo::common::IntoCommonProblem;

use crate::callback::StepReport;
use crate::config::SolverConfig;
use crate::error::SolverError;
use crate::linalg::block_sparse::BlockSparseMatrix;
use crate::linalg::krylov::{IterationObserver, KrylovSolver};
use crate::linalg::operator::AssembledOperator;
use crate::linalg::preconditioner::{Ilu0, Jacobi, NoOp, PreconditionerKind, PreconditionerOp, SymmetricGaussSeidel};
use crate::log::{ConvergenceLog, RunSummary};
use crate::spatial::Spatial;
use crate::state::{State, Workspace, all_finite, flatten, last_variable_residual_norm, unflatten_into};
use crate::terminators::Terminator;
use crate::{Driver, DriverHooks, Status};

struct TerminatorObserver<'a> {
    terminator: &'a mut dyn Terminator,
    stopped: Option<Status>,
}

impl<'a> IterationObserver for TerminatorObserver<'a> {
    fn should_stop(&mut self) -> bool {
        if let Some(status) = self.terminator.terminate() {
            self.stopped = Some(status);
            true
        } else {
            false
        }
    }
}

pub struct ImplicitSteady<'a, S: Spatial> {
    spatial: &'a S,
    config: SolverConfig,
    workspace: Workspace,
    matrix: BlockSparseMatrix,
    preconditioner: PreconditionerKind,
    krylov: KrylovSolver,
    conv_log: Option<ConvergenceLog>,
}

impl<'a, S: Spatial> ImplicitSteady<'a, S> {
    pub fn new(spatial: &'a S, config: SolverConfig) -> Result<Self, problemo::Problem> {
        config.validate().into_common_problem()?;
        let n = spatial.mesh().n_cells();
        let dim_hint = n; // resized to n * nvars once the state's shape is known in `solve`
        let preconditioner = match config.preconditioner {
            crate::config::Preconditioner::None => PreconditionerKind::NoOp(NoOp),
            crate::config::Preconditioner::Jacobi => PreconditionerKind::Jacobi(Jacobi::default()),
            crate::config::Preconditioner::Sgs => {
                PreconditionerKind::SymmetricGaussSeidel(SymmetricGaussSeidel::default())
            }
            crate::config::Preconditioner::Ilu0 => PreconditionerKind::Ilu0(Ilu0::default()),
        };
        let krylov = match config.linearsolver {
            crate::config::LinearSolver::Richardson => KrylovSolver::richardson(dim_hint),
            crate::config::LinearSolver::Bicgstab => KrylovSolver::bicgstab(dim_hint),
            crate::config::LinearSolver::Gmres => KrylovSolver::gmres(dim_hint, config.restart_vecs),
        };
        let conv_log = match (&config.logfile, config.lognres) {
            (Some(path), true) => Some(ConvergenceLog::create(path)?),
            _ => None,
        };
        Ok(Self {
            spatial,
            workspace: Workspace::new(n, 0),
            matrix: BlockSparseMatrix::new(n, 0),
            preconditioner,
            krylov,
            config,
            conv_log,
        })
    }
}

impl<'a, S: Spatial> ImplicitSteady<'a, S> {
    /// Gated the same way [`ConvergenceLog::create`] is: only writes when
    /// `lognres`/`logfile` are both set. `threads` comes from `rayon`'s
    /// global pool since the inner Krylov solve runs through it.
    fn emit_run_summary(
        &self,
        nelem: usize,
        outer_iters: usize,
        lin_walltime: crate::E,
        lin_iters_total: usize,
        lin_calls: usize,
    ) -> Result<(), problemo::Problem> {
        let (path, enabled) = (&self.config.logfile, self.config.lognres);
        let Some(path) = (if enabled { path.as_ref() } else { None }) else {
            return Ok(());
        };
        let threads = rayon::current_num_threads();
        let avg_lin_iters = if lin_calls > 0 {
            lin_iters_total as crate::E / lin_calls as crate::E
        } else {
            0.0
        };
        crate::log::write_run_summary(
            path,
            &RunSummary {
                nelem,
                threads,
                lin_walltime,
                lin_cputime: lin_walltime * threads as crate::E,
                avg_lin_iters,
                outer_iters,
            },
        )
    }
}

impl<'a, S: Spatial> Driver for ImplicitSteady<'a, S> {
    fn solve(&mut self, state: &mut State, hooks: &mut DriverHooks) -> Result<Status, problemo::Problem> {
        let n = state.n_cells();
        let nvars = state.n_vars();
        if self.workspace.n_vars() != nvars {
            self.workspace = Workspace::new(n, nvars);
            self.matrix = BlockSparseMatrix::new(n, nvars);
            let dim = n * nvars;
            self.krylov = match self.config.linearsolver {
                crate::config::LinearSolver::Richardson => KrylovSolver::richardson(dim),
                crate::config::LinearSolver::Bicgstab => KrylovSolver::bicgstab(dim),
                crate::config::LinearSolver::Gmres => KrylovSolver::gmres(dim, self.config.restart_vecs),
            };
        }
        hooks.terminator.initialize();

        let mesh = self.spatial.mesh();
        let area = |i: usize| mesh.area(i);

        let mut r0_norm: Option<crate::E> = None;
        let mut numerical_failures = 0u32;

        let mut lin_walltime = 0.0;
        let mut lin_iters_total = 0usize;
        let mut lin_calls = 0usize;

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

            let cfl = self.config.ramped_cfl(step);

            if step % 50 == 0 || step == 1 {
                hooks.callback.call(&StepReport { step, rel_residual: rel, cfl });
            }
            if let Some(log) = &mut self.conv_log {
                log.record(step, rel)?;
            }

            if rel <= self.config.tol {
                self.emit_run_summary(n, step, lin_walltime, lin_iters_total, lin_calls)?;
                return Ok(Status::Converged);
            }
            if let Some(status) = hooks.terminator.terminate() {
                self.emit_run_summary(n, step, lin_walltime, lin_iters_total, lin_calls)?;
                return Ok(status);
            }

            self.matrix.set_all_zero();
            self.spatial
                .compute_jacobian(state, &mut self.matrix)
                .into_common_problem()?;
            if !self.matrix.is_frozen() {
                self.matrix.freeze_pattern();
            }
            for i in 0..n {
                let mut aug = vec![0.0; nvars * nvars];
                let coeff = area(i) / (cfl * self.workspace.dt[i]);
                for d in 0..nvars {
                    aug[d * nvars + d] = coeff;
                }
                self.matrix.update_diag_block(i, &aug);
            }

            if let Err(err) = self.preconditioner.setup(&self.matrix) {
                numerical_failures += 1;
                if numerical_failures > 1 {
                    return Err(err.into_common_problem().unwrap_err());
                }
                continue;
            }
            numerical_failures = 0;

            let r_flat = flatten(&self.workspace.r);
            let mut delta_flat = vec![0.0; n * nvars];
            let op = AssembledOperator { matrix: &self.matrix };
            let linmaxit = self.config.ramped_linmaxiter(step);

            let mut term_observer = TerminatorObserver {
                terminator: hooks.terminator.as_mut(),
                stopped: None,
            };
            let lin_start = std::time::Instant::now();
            let iters = self.krylov.solve(
                &op,
                &self.preconditioner,
                &r_flat,
                &mut delta_flat,
                self.config.lintol,
                linmaxit,
                &mut term_observer,
            );
            lin_walltime += lin_start.elapsed().as_secs_f64();
            lin_iters_total += iters;
            lin_calls += 1;
            if let Some(status) = term_observer.stopped {
                self.emit_run_summary(n, step, lin_walltime, lin_iters_total, lin_calls)?;
                return Ok(status);
            }

            unflatten_into(&delta_flat, &mut self.workspace.delta_u);
            for i in 0..n {
                for v in 0..nvars {
                    let updated = state.get(i, v) + self.workspace.delta_u[(i, v)];
                    state.set(i, v, updated);
                }
            }
        }

        self.emit_run_summary(n, self.config.maxiter, lin_walltime, lin_iters_total, lin_calls)?;
        Ok(Status::IterationCap)
    }
}
