use std::ops::Div;

use faer::traits::ComplexField;
use faer::traits::num_traits::Float;
use faer::Index;

/// Floating-point element type used throughout the core: element types are
/// specialized behind a trait bound rather than hard-coding `f64`, but the
/// bound is resolved to `f64` via [`E`] for the dominant case.
pub trait ElementType: ComplexField + Float + Div<Output = Self> {}
impl<T> ElementType for T where T: ComplexField + Float + Div<Output = T> {}

pub trait IndexType: Copy + PartialEq + Eq + Ord + Index {}
impl<T> IndexType for T where T: Copy + PartialEq + Eq + Ord + Index {}

pub type E = f64;
pub type I = usize;

pub mod callback;
pub mod config;
pub mod drivers;
pub mod error;
pub mod linalg;
pub mod log;
pub mod mesh;
pub mod spatial;
pub mod state;
pub mod terminators;

pub use config::{LinearSolver, Preconditioner, SolverConfig};
pub use error::SolverError;
pub use mesh::Mesh;
pub use spatial::Spatial;
pub use state::{State, Workspace};

/// Outcome of a driver's `solve`. Every driver here returns one of these
/// instead of leaving convergence implicit on an early-exit path.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Status {
    #[default]
    /// The solver is still running (only ever observed mid-loop, never returned).
    InProgress,
    /// Converged: relative residual reached `tol`.
    Converged,
    /// The outer or inner iteration cap was reached without converging.
    IterationCap,
    /// The solver was interrupted (Ctrl-C or a caller-supplied terminator).
    Interrupted,
}

/// Trait shared by the three pseudo-time drivers: a single `solve` entry
/// point returning a `Status` or a fatal [`problemo::Problem`].
pub trait Driver {
    /// Runs the driver to convergence, to its iteration/time cap, or until
    /// interrupted, mutating `state.u` in place.
    fn solve(&mut self, state: &mut State, hooks: &mut DriverHooks) -> Result<Status, problemo::Problem>;
}

/// Per-solve hooks: a progress callback and a cooperative terminator.
/// Owned by the caller, borrowed for the duration of `solve`.
pub struct DriverHooks {
    pub callback: Box<dyn crate::callback::Callback>,
    pub terminator: Box<dyn crate::terminators::Terminator>,
}

impl DriverHooks {
    pub fn new(
        callback: Box<dyn crate::callback::Callback>,
        terminator: Box<dyn crate::terminators::Terminator>,
    ) -> Self {
        Self {
            callback,
            terminator,
        }
    }
}
