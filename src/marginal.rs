//! Aggregate marginal state: `π_i = Σ_j π_{ji}`, `β_i = Σ_j β_{ji}`, and
//! (bivariate) `a_k = Σ a_{jk}`, `c_k = Σ c_{jk}`.
//!
//! These sums are the ground truth at every quiescent point; only
//! [`crate::driver::EPUpdateDriver`] mutates them, incrementally, as
//! part of a committed `sequential_update`.

use faer::Col;

use crate::factor::FactorRepresentation;
use crate::linalg::vector_ops;
use crate::types::Real;

/// Direct-addressable aggregate marginals over variables (`π`, `β`)
/// and, bivariate, over precision variables (`a`, `c`).
#[derive(Debug, Clone)]
pub struct MarginalState {
    pi: Col<Real>,
    beta: Col<Real>,
    a: Col<Real>,
    c: Col<Real>,
}

impl MarginalState {
    pub fn zeros(n: usize, k: usize) -> Self {
        Self {
            pi: Col::zeros(n),
            beta: Col::zeros(n),
            a: Col::zeros(k),
            c: Col::zeros(k),
        }
    }

    /// Rebuilds the marginals from scratch by summing every factor's
    /// current messages. Used at construction time and as the
    /// reference implementation the reconstruction-invariant tests
    /// check against.
    pub fn from_messages(factors: &FactorRepresentation) -> Self {
        let mut state = Self::zeros(factors.num_variables(), factors.num_prec_vars());
        for j in 0..factors.num_potentials() {
            let (vars, _coeffs) = factors.row(j);
            let (pi, beta) = factors.messages(j);
            for (ii, &i) in vars.iter().enumerate() {
                state.pi[i] += pi[ii];
                state.beta[i] += beta[ii];
            }
            if let Some((a_j, c_j)) = factors.prec_message(j) {
                let k = factors.prec_var_of(j).expect("bivariate factor has k(j)");
                state.a[k] += a_j;
                state.c[k] += c_j;
            }
        }
        state
    }

    pub fn pi(&self) -> &Col<Real> {
        &self.pi
    }

    pub fn beta(&self) -> &Col<Real> {
        &self.beta
    }

    pub fn a(&self) -> &Col<Real> {
        &self.a
    }

    pub fn c(&self) -> &Col<Real> {
        &self.c
    }

    pub fn pi_mut(&mut self) -> &mut Col<Real> {
        &mut self.pi
    }

    pub fn beta_mut(&mut self) -> &mut Col<Real> {
        &mut self.beta
    }

    pub fn a_mut(&mut self) -> &mut Col<Real> {
        &mut self.a
    }

    pub fn c_mut(&mut self) -> &mut Col<Real> {
        &mut self.c
    }

    /// `min_i π_i`, the quantity invariant 1 (`π_i ≥ πMin`) bounds from
    /// below at every quiescent state.
    pub fn min_pi(&self) -> Real {
        vector_ops::col_min(self.pi.as_ref())
    }

    /// Whether every `a_k` (equivalently `c_k`) is strictly positive,
    /// as required of a valid bivariate precision marginal.
    pub fn precisions_positive(&self) -> bool {
        vector_ops::is_col_positive(self.a.as_ref()) && vector_ops::is_col_positive(self.c.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::FactorRepresentation;

    #[test]
    fn reconstruction_matches_sum_of_messages() {
        let factors = FactorRepresentation::new_univariate(
            2,
            vec![vec![(0, 1.0), (1, 2.0)], vec![(0, 1.0)]],
            vec![1.0, 2.0, 3.0],
            vec![0.5, 1.5, 0.25],
        )
        .unwrap();

        let marginals = MarginalState::from_messages(&factors);
        assert_eq!(marginals.pi()[0], 1.0 + 3.0);
        assert_eq!(marginals.pi()[1], 2.0);
        assert_eq!(marginals.beta()[0], 0.5 + 0.25);
        assert_eq!(marginals.beta()[1], 1.5);
    }
}
