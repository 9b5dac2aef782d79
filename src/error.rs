//! Construction-time failures.
//!
//! Everything in this module is a fatal configuration error: bad
//! dimensions, non-positive thresholds, a factor referencing a
//! precision variable that does not exist. These propagate to the
//! caller as [`problemo::Problem`] and never alter any already-built
//! state (there is none to alter yet). Numerical/algorithmic outcomes
//! of `sequential_update` are a different animal entirely — see
//! [`crate::driver::UpdateStatus`].

use derive_more::{Display, Error};

use crate::types::Idx;

/// Structured construction errors worth matching on. Anything less
/// common is raised as an ad hoc [`problemo::Problem`] via `.gloss()`
/// instead; these convert via the blanket `From<Self> for Problem`.
#[derive(Debug, Display, Error, PartialEq)]
pub enum ConstructionError {
    #[display("row {row} references variable {var}, but only {n_vars} variables exist")]
    VariableOutOfRange { row: Idx, var: Idx, n_vars: Idx },

    #[display("row {row} references precision variable {k}, but only {n_prec} exist")]
    PrecisionVarOutOfRange { row: Idx, k: Idx, n_prec: Idx },

    #[display("row {row} lists variable {var} more than once")]
    DuplicateVariableInRow { row: Idx, var: Idx },

    #[display("threshold {name} must be strictly positive, got {value}")]
    NonPositiveThreshold { name: &'static str, value: f64 },

    #[display("message array length {got} does not match the row's size {expected}")]
    MessageLengthMismatch { expected: usize, got: usize },

    #[display("wire payload truncated: needed at least {expected} more bytes, found {got}")]
    TruncatedPayload { expected: usize, got: usize },

    #[display("wire payload field {field} must not be negative, got {value}")]
    NegativeLength { field: &'static str, value: i32 },
}
