//! Error kinds for the pseudo-time core.
//!
//! `ConfigError` and `Structural` are fatal at the driver boundary.
//! `Numerical` surfaces from an inner solve; the driver records it and
//! allows the outer loop one more attempt before escalating. `IterationCap`
//! is not represented here — it is a normal [`crate::Status`] return value,
//! never an error.

use derive_more::{Display, Error};

#[derive(Debug, Display, Error, PartialEq)]
pub enum SolverError {
    #[display("invalid configuration: {message}")]
    ConfigError { message: String },

    #[display("structural: insertion into a frozen sparsity pattern at a missing slot (row {row}, col {col})")]
    Structural { row: usize, col: usize },

    #[display("numerical failure: {message}")]
    Numerical { message: String },
}

impl SolverError {
    pub fn config(message: impl Into<String>) -> Self {
        SolverError::ConfigError {
            message: message.into(),
        }
    }

    pub fn structural(row: usize, col: usize) -> Self {
        SolverError::Structural { row, col }
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        SolverError::Numerical {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            SolverError::structural(3, 7).to_string(),
            "structural: insertion into a frozen sparsity pattern at a missing slot (row 3, col 7)"
        );
    }
}
