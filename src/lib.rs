//! Sequential expectation propagation over a factorized linear model.
//!
//! A collection of potentials `t_j(s_j)`, each a linear projection
//! `s_j = B_j x` of a shared variable vector, is approximated by a
//! product of Gaussian messages. [`driver::EPUpdateDriver`] runs one
//! factor's cavity → moment-match → damp → commit step at a time
//! ([`driver::EPUpdateDriver::sequential_update`]); scheduling which
//! factor to visit next, and the moment-matching math itself, are
//! both left to the caller — the former because it is a policy
//! decision this crate has no opinion on, the latter because it is
//! necessarily specific to each potential family (see
//! [`oracle::PotentialOracle`]).
//!
//! ```text
//! FactorRepresentation  ---- row j ---->  EPUpdateDriver::sequential_update
//!        ^                                      |      ^
//!        |                                      v      |
//! MarginalState <--------- commit -------- PotentialOracle
//! ```
//!
//! [`factor::FactorRepresentation`] owns the design matrix and the
//! per-(factor, variable) message parameters; [`marginal::MarginalState`]
//! owns the aggregate marginals those messages sum to;
//! [`index::MaxPrecisionIndex`] tracks, per variable, the maximum
//! message precision currently registered against it, which is what
//! keeps selective damping cheap. [`wire`] is the binary interchange
//! format for moving a [`factor::FactorRepresentation`] across a
//! process boundary.

pub mod driver;
pub mod error;
pub mod factor;
pub mod index;
pub(crate) mod linalg;
pub mod marginal;
pub mod oracle;
pub mod types;
pub mod wire;

pub use driver::{DriverMode, EPUpdateDriver, UpdateReport, UpdateStatus};
pub use error::ConstructionError;
pub use factor::{FactorRepresentation, FactorRow};
pub use index::MaxPrecisionIndex;
pub use marginal::MarginalState;
pub use oracle::{Cavity, Moments, PotentialGroup, PotentialOracle};
pub use types::{Idx, Real};
