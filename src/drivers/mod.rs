//! The three pseudo-time drivers, each implementing [`crate::Driver`] over
//! a caller-supplied [`crate::Spatial`] discretization.

pub mod explicit_steady;
pub mod explicit_unsteady;
pub mod implicit_steady;

pub use explicit_steady::ExplicitSteady;
pub use explicit_unsteady::ExplicitUnsteady;
pub use implicit_steady::ImplicitSteady;
