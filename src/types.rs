//! Shared scalar and index aliases used across the crate.

/// Scalar type used for all natural-parameter arithmetic.
pub type Real = f64;

/// Index type used for variables, factors, and precision variables.
pub type Idx = usize;
