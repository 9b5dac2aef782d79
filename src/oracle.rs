//! The external moment-matching collaborator.
//!
//! `PotentialOracle` is consumed, not implemented, by this crate: the
//! real potential library (quadrature fallbacks, a registry of
//! `t_j`-specific closed forms) lives outside this core. What ships
//! here is the trait itself plus a scripted test double, the same
//! pattern used elsewhere for `Callback`/`Terminator` — a small
//! external-collaborator trait with a trivial stub standing in for the
//! real thing in tests.

use std::collections::HashMap;

use crate::types::{Idx, Real};

/// Which message family a factor belongs to. Must match the driver's
/// own construction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PotentialGroup {
    Univariate,
    BivariatePrecision,
}

/// Cavity moments passed into `compute_moments`.
#[derive(Debug, Clone, Copy)]
pub enum Cavity {
    Univariate { h_bar: Real, rho_bar: Real },
    Bivariate {
        h_bar: Real,
        rho_bar: Real,
        a_bar: Real,
        c_bar: Real,
    },
}

/// Tilt parameters returned by a successful moment match.
#[derive(Debug, Clone, Copy)]
pub enum Moments {
    Univariate { alpha: Real, nu: Real },
    Bivariate {
        alpha: Real,
        nu: Real,
        a_hat: Real,
        c_hat: Real,
    },
}

/// Computes the tilted moments for factor `j` given its cavity.
/// `None` signals oracle failure, which the driver must surface as
/// [`crate::driver::UpdateStatus::NumericalError`].
pub trait PotentialOracle {
    fn group(&self, j: Idx) -> PotentialGroup;
    fn compute_moments(&mut self, j: Idx, cavity: Cavity) -> Option<Moments>;
}

/// A scripted oracle returning caller-supplied moments per factor,
/// for tests that specify the oracle's output directly rather than
/// exercising a real potential family.
#[cfg(any(test, feature = "testing"))]
pub struct FixedMomentOracle {
    group: PotentialGroup,
    responses: HashMap<Idx, Option<Moments>>,
    default: Option<Moments>,
}

#[cfg(any(test, feature = "testing"))]
impl FixedMomentOracle {
    /// An oracle of the given group that fails every call unless
    /// overridden with [`Self::with_response`] or
    /// [`Self::with_default`].
    pub fn new(group: PotentialGroup) -> Self {
        Self {
            group,
            responses: HashMap::new(),
            default: None,
        }
    }

    /// Scripts the response for factor `j`.
    pub fn with_response(mut self, j: Idx, moments: Moments) -> Self {
        self.responses.insert(j, Some(moments));
        self
    }

    /// Scripts factor `j` to report oracle failure.
    pub fn with_failure(mut self, j: Idx) -> Self {
        self.responses.insert(j, None);
        self
    }

    /// Sets the response used for any factor without its own entry.
    pub fn with_default(mut self, moments: Moments) -> Self {
        self.default = Some(moments);
        self
    }
}

#[cfg(any(test, feature = "testing"))]
impl PotentialOracle for FixedMomentOracle {
    fn group(&self, _j: Idx) -> PotentialGroup {
        self.group
    }

    fn compute_moments(&mut self, j: Idx, _cavity: Cavity) -> Option<Moments> {
        match self.responses.get(&j) {
            Some(response) => *response,
            None => self.default,
        }
    }
}

/// Wraps another oracle and fails every other call (starting with the
/// first), regardless of which factor is asked. Used to exercise
/// update atomicity: the visible state after `N` calls through a
/// flaky oracle must equal the state after only the successful half
/// replayed in order.
#[cfg(any(test, feature = "testing"))]
pub struct FlakyOracle<O> {
    inner: O,
    calls: usize,
}

#[cfg(any(test, feature = "testing"))]
impl<O> FlakyOracle<O> {
    pub fn new(inner: O) -> Self {
        Self { inner, calls: 0 }
    }
}

#[cfg(any(test, feature = "testing"))]
impl<O: PotentialOracle> PotentialOracle for FlakyOracle<O> {
    fn group(&self, j: Idx) -> PotentialGroup {
        self.inner.group(j)
    }

    fn compute_moments(&mut self, j: Idx, cavity: Cavity) -> Option<Moments> {
        self.calls += 1;
        if self.calls % 2 == 1 {
            return None;
        }
        self.inner.compute_moments(j, cavity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_oracle_returns_scripted_response() {
        let mut oracle = FixedMomentOracle::new(PotentialGroup::Univariate)
            .with_response(0, Moments::Univariate { alpha: 2.0, nu: 0.5 });

        let moments = oracle.compute_moments(
            0,
            Cavity::Univariate {
                h_bar: 0.0,
                rho_bar: 1.0,
            },
        );
        match moments {
            Some(Moments::Univariate { alpha, nu }) => {
                assert_eq!(alpha, 2.0);
                assert_eq!(nu, 0.5);
            }
            _ => panic!("expected scripted univariate response"),
        }
    }

    #[test]
    fn fixed_oracle_without_entry_or_default_fails() {
        let mut oracle = FixedMomentOracle::new(PotentialGroup::Univariate);
        let moments = oracle.compute_moments(
            7,
            Cavity::Univariate {
                h_bar: 0.0,
                rho_bar: 1.0,
            },
        );
        assert!(moments.is_none());
    }

    #[test]
    fn flaky_oracle_fails_every_other_call() {
        let inner = FixedMomentOracle::new(PotentialGroup::Univariate)
            .with_default(Moments::Univariate { alpha: 1.0, nu: 1.0 });
        let mut flaky = FlakyOracle::new(inner);

        let cavity = Cavity::Univariate {
            h_bar: 0.0,
            rho_bar: 1.0,
        };
        assert!(flaky.compute_moments(0, cavity).is_none());
        assert!(flaky.compute_moments(0, cavity).is_some());
        assert!(flaky.compute_moments(0, cavity).is_none());
        assert!(flaky.compute_moments(0, cavity).is_some());
    }
}
