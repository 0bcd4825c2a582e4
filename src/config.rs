//! Solver configuration: one fixed, serializable struct rather than an
//! open-ended option registry -- this crate has one small, closed
//! configuration surface, so a plain `serde::Deserialize` struct is the
//! more idiomatic fit (see `DESIGN.md`).

use serde::Deserialize;

use crate::E;
use crate::error::SolverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preconditioner {
    None,
    Jacobi,
    Sgs,
    Ilu0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinearSolver {
    Richardson,
    Bicgstab,
    Gmres,
}

/// Coefficients for explicit TVD-RK time integration. Only orders 1-3 are
/// defined; anything else is a configuration error caught at construction.
#[derive(Debug, Clone)]
pub struct TvdRkTable {
    pub order: usize,
    /// `alpha[s]`: weight on the original state `U^n` at stage `s`.
    pub alpha: Vec<E>,
    /// `beta[s]`: weight on the pseudo-Euler update at stage `s`.
    pub beta: Vec<E>,
}

impl TvdRkTable {
    pub fn for_order(order: usize) -> Result<Self, SolverError> {
        let (alpha, beta) = match order {
            1 => (vec![0.0], vec![1.0]),
            2 => (vec![0.0, 0.5], vec![1.0, 0.5]),
            3 => (vec![0.0, 0.75, 1.0 / 3.0], vec![1.0, 0.25, 2.0 / 3.0]),
            _ => {
                return Err(SolverError::config(format!(
                    "TVD-RK order {order} is not supported; only orders 1-3 are defined"
                )));
            }
        };
        Ok(Self { order, alpha, beta })
    }

    pub fn stages(&self) -> usize {
        self.alpha.len()
    }
}

/// The full configuration surface for `ExplicitSteady`, `ImplicitSteady`,
/// and `ExplicitUnsteady`.
#[derive(Debug, Clone, Deserialize)]
pub struct SolverConfig {
    /// Relative convergence tolerance on the last-variable residual norm.
    pub tol: E,
    /// Outer iteration cap.
    pub maxiter: usize,
    /// Initial CFL number.
    pub cflinit: E,
    /// Final CFL number, reached by `rampend` (implicit only).
    pub cflfin: E,
    /// Outer step at which CFL ramping begins.
    pub rampstart: usize,
    /// Outer step at which CFL ramping completes.
    pub rampend: usize,
    /// Relative tolerance for the inner (Krylov) linear solve.
    pub lintol: E,
    /// Inner iteration cap at `rampstart`.
    pub linmaxiterstart: usize,
    /// Inner iteration cap at `rampend` and beyond.
    pub linmaxiterend: usize,
    /// GMRES restart length; ignored by Richardson/BiCGStab.
    pub restart_vecs: usize,
    pub preconditioner: Preconditioner,
    pub linearsolver: LinearSolver,
    /// TVD-RK order for `ExplicitUnsteady` (1-3).
    pub rk_order: usize,
    /// Final physical time for `ExplicitUnsteady`.
    pub finaltime: E,
    /// If `true`, write a `.conv` convergence-history file.
    pub lognres: bool,
    pub logfile: Option<String>,
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.maxiter == 0 {
            return Err(SolverError::config("maxiter must be positive"));
        }
        if self.tol <= 0.0 {
            return Err(SolverError::config("tol must be positive"));
        }
        if self.cflinit <= 0.0 || self.cflfin <= 0.0 {
            return Err(SolverError::config("cflinit/cflfin must be positive"));
        }
        if self.rampend < self.rampstart {
            return Err(SolverError::config("rampend must not precede rampstart"));
        }
        if self.linmaxiterstart == 0 || self.linmaxiterend == 0 {
            return Err(SolverError::config("linmaxiterstart/linmaxiterend must be positive"));
        }
        if self.restart_vecs == 0 {
            return Err(SolverError::config("restart_vecs must be positive"));
        }
        TvdRkTable::for_order(self.rk_order)?;
        Ok(())
    }

    /// Linearly ramps a `(start, end)` pair across `[rampstart, rampend]`,
    /// clamped outside the window. Degenerate window (`rampend ==
    /// rampstart`) jumps straight to `end` at `rampstart`.
    pub fn ramp(&self, step: usize, start: E, end: E) -> E {
        if step <= self.rampstart {
            return start;
        }
        if step >= self.rampend {
            return end;
        }
        if self.rampend == self.rampstart {
            return end;
        }
        let t = (step - self.rampstart) as E / (self.rampend - self.rampstart) as E;
        start + t * (end - start)
    }

    pub fn ramped_cfl(&self, step: usize) -> E {
        self.ramp(step, self.cflinit, self.cflfin)
    }

    pub fn ramped_linmaxiter(&self, step: usize) -> usize {
        self.ramp(step, self.linmaxiterstart as E, self.linmaxiterend as E).round() as usize
    }
}
