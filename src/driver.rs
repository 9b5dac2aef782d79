//! `EPUpdateDriver::sequential_update` — the atomic cavity → moment-match
//! → damp → commit pipeline that is the one thing this crate actually
//! does. Everything else (`factor`, `marginal`, `index`, `oracle`) is
//! bookkeeping this module orchestrates.
//!
//! The driver holds non-owning references to the factor
//! representation, the marginal state, the oracle, and (optionally)
//! up to three [`MaxPrecisionIndex`]es for the duration of its own
//! lifetime — construct one, drive a schedule of `sequential_update`
//! calls through it, then let it go out of scope to get your
//! references back, the same shape as `InteriorPointMethod<'a, ...>`
//! borrowing its problem data for the life of the solve.

use problemo::Problem;
use problemo::common::IntoCommonProblem;

use crate::error::ConstructionError;
use crate::factor::FactorRepresentation;
use crate::index::MaxPrecisionIndex;
use crate::marginal::MarginalState;
use crate::oracle::{Cavity, Moments, PotentialGroup, PotentialOracle};
use crate::types::{Idx, Real};

/// The two fixed construction modes. Selected once and never changed
/// for the life of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMode {
    Univariate,
    BivariatePrecision,
}

impl DriverMode {
    fn group(self) -> PotentialGroup {
        match self {
            DriverMode::Univariate => PotentialGroup::Univariate,
            DriverMode::BivariatePrecision => PotentialGroup::BivariatePrecision,
        }
    }
}

/// The exhaustive outcome of a [`EPUpdateDriver::sequential_update`]
/// call. This is a normal control-flow value, not an error: only
/// construction-time problems (mismatched potential group, bad
/// thresholds) are raised as [`problemo::Problem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Success,
    CavityInvalid,
    NumericalError,
    MarginalsInvalid,
    Skipped,
}

/// Everything a caller might want back from a successful (or skipped)
/// call: the status, and — only computed when asked for — the
/// relative-change metric and the damping factor actually applied.
#[derive(Debug, Clone, Copy)]
pub struct UpdateReport {
    pub status: UpdateStatus,
    pub delta: Option<Real>,
    pub d_eff: Option<Real>,
}

impl UpdateReport {
    fn status_only(status: UpdateStatus) -> Self {
        Self {
            status,
            delta: None,
            d_eff: None,
        }
    }
}

const NUMERICAL_FLOOR: Real = 1e-10;
const SMALL_COEFF: Real = 1e-6;
const SKIP_THRESHOLD: Real = 0.02;

/// The sequential EP update driver. See the module docs.
pub struct EPUpdateDriver<'a> {
    factors: &'a mut FactorRepresentation,
    marginals: &'a mut MarginalState,
    oracle: &'a mut dyn PotentialOracle,

    mode: DriverMode,
    pi_min: Real,
    a_min: Option<Real>,
    c_min: Option<Real>,

    pi_index: Option<&'a mut MaxPrecisionIndex>,
    a_index: Option<&'a mut MaxPrecisionIndex>,
    c_index: Option<&'a mut MaxPrecisionIndex>,

    scratch: Vec<Real>,
}

impl<'a> EPUpdateDriver<'a> {
    /// Constructs a driver over a univariate-message representation.
    /// Fails if `pi_min` is non-positive or `factors` was built in
    /// bivariate mode.
    pub fn univariate(
        factors: &'a mut FactorRepresentation,
        marginals: &'a mut MarginalState,
        oracle: &'a mut dyn PotentialOracle,
        pi_min: Real,
        pi_index: Option<&'a mut MaxPrecisionIndex>,
    ) -> Result<Self, Problem> {
        if pi_min <= 0.0 {
            return Err(ConstructionError::NonPositiveThreshold {
                name: "pi_min",
                value: pi_min,
            }
            .into());
        }
        if factors.is_bivariate() {
            return Err(
                "factor representation carries bivariate precision messages, \
                 but the driver was constructed in univariate mode"
                    .gloss(),
            );
        }

        let scratch_len = 4 * factors.max_row_size().max(1);
        Ok(Self {
            factors,
            marginals,
            oracle,
            mode: DriverMode::Univariate,
            pi_min,
            a_min: None,
            c_min: None,
            pi_index,
            a_index: None,
            c_index: None,
            scratch: vec![0.0; scratch_len],
        })
    }

    /// Constructs a driver over a bivariate-precision representation.
    /// Fails if any threshold is non-positive or `factors` was built
    /// in univariate mode.
    #[allow(clippy::too_many_arguments)]
    pub fn bivariate(
        factors: &'a mut FactorRepresentation,
        marginals: &'a mut MarginalState,
        oracle: &'a mut dyn PotentialOracle,
        pi_min: Real,
        a_min: Real,
        c_min: Real,
        pi_index: Option<&'a mut MaxPrecisionIndex>,
        a_index: Option<&'a mut MaxPrecisionIndex>,
        c_index: Option<&'a mut MaxPrecisionIndex>,
    ) -> Result<Self, Problem> {
        for (name, value) in [("pi_min", pi_min), ("a_min", a_min), ("c_min", c_min)] {
            if value <= 0.0 {
                return Err(ConstructionError::NonPositiveThreshold { name, value }.into());
            }
        }
        if !factors.is_bivariate() {
            return Err(
                "factor representation carries no bivariate precision messages, \
                 but the driver was constructed in bivariate mode"
                    .gloss(),
            );
        }

        let scratch_len = 4 * factors.max_row_size().max(1);
        Ok(Self {
            factors,
            marginals,
            oracle,
            mode: DriverMode::BivariatePrecision,
            pi_min,
            a_min: Some(a_min),
            c_min: Some(c_min),
            pi_index,
            a_index,
            c_index,
            scratch: vec![0.0; scratch_len],
        })
    }

    pub fn mode(&self) -> DriverMode {
        self.mode
    }

    /// The atomic update primitive. Either commits all
    /// changes for factor `j` or leaves `(factors, marginals,
    /// pi_index, a_index, c_index)` bit-identical to their pre-call
    /// values — every early return in this function happens before
    /// any of the `_mut`/`update` calls near the bottom.
    pub fn sequential_update(
        &mut self,
        j: Idx,
        damp: Real,
        want_delta: bool,
    ) -> Result<UpdateReport, Problem> {
        let declared = self.oracle.group(j);
        if declared != self.mode.group() {
            return Err(format!(
                "factor {j} reports potential group {declared:?}, but the driver \
                 was constructed for {:?}",
                self.mode
            )
            .as_str()
            .gloss());
        }

        let s = self.factors.row_size(j);
        if self.scratch.len() < 4 * s {
            self.scratch.resize(4 * s, 0.0);
        }

        // --- Step 1: cavity -------------------------------------------------
        let vars: Vec<Idx> = self.factors.row(j).0.to_vec();
        let (pi_c_buf, rest) = self.scratch[..4 * s].split_at_mut(s);
        let (beta_c_buf, rest) = rest.split_at_mut(s);
        let (pi_tilde_buf, beta_tilde_buf) = rest.split_at_mut(s);

        let mut rho_bar = 0.0;
        let mut h_bar = 0.0;
        let mut m_rho_pre = 0.0;
        let mut m_h_pre = 0.0;
        {
            let (row_vars, coeffs) = self.factors.row(j);
            let (pi_row, beta_row) = self.factors.messages(j);
            for ii in 0..s {
                let i = row_vars[ii];
                let b = coeffs[ii];

                let pi_c = self.marginals.pi()[i] - pi_row[ii];
                if pi_c < self.pi_min / 2.0 {
                    return Ok(UpdateReport::status_only(UpdateStatus::CavityInvalid));
                }
                let beta_c = self.marginals.beta()[i] - beta_row[ii];

                rho_bar += b * b / pi_c;
                h_bar += (b / pi_c) * beta_c;

                if want_delta {
                    let pi_i = self.marginals.pi()[i];
                    let beta_i = self.marginals.beta()[i];
                    m_rho_pre += b * b / pi_i;
                    m_h_pre += (b / pi_i) * beta_i;
                }

                pi_c_buf[ii] = pi_c;
                beta_c_buf[ii] = beta_c;
            }
        }

        let bivariate_cavity = if self.mode == DriverMode::BivariatePrecision {
            let k = self
                .factors
                .prec_var_of(j)
                .expect("bivariate driver requires every factor to declare k(j)");
            let (a_j, c_j) = self
                .factors
                .prec_message(j)
                .expect("bivariate driver requires every factor to carry (a_j, c_j)");
            let a_min = self.a_min.expect("bivariate driver always sets a_min");
            let c_min = self.c_min.expect("bivariate driver always sets c_min");

            let a_bar = self.marginals.a()[k] - a_j;
            if a_bar < a_min / 2.0 {
                return Ok(UpdateReport::status_only(UpdateStatus::CavityInvalid));
            }
            let c_bar = self.marginals.c()[k] - c_j;
            if c_bar < c_min / 2.0 {
                return Ok(UpdateReport::status_only(UpdateStatus::CavityInvalid));
            }
            Some((k, a_j, c_j, a_bar, c_bar))
        } else {
            None
        };

        // --- Step 2: moment matching -----------------------------------------
        let cavity = match bivariate_cavity {
            Some((_, _, _, a_bar, c_bar)) => Cavity::Bivariate {
                h_bar,
                rho_bar,
                a_bar,
                c_bar,
            },
            None => Cavity::Univariate { h_bar, rho_bar },
        };
        let moments = match self.oracle.compute_moments(j, cavity) {
            Some(m) => m,
            None => return Ok(UpdateReport::status_only(UpdateStatus::NumericalError)),
        };
        let (alpha, nu) = match moments {
            Moments::Univariate { alpha, nu } => (alpha, nu),
            Moments::Bivariate { alpha, nu, .. } => (alpha, nu),
        };

        // --- Step 3: undamped new messages ------------------------------------
        {
            let (_row_vars, coeffs) = self.factors.row(j);
            for ii in 0..s {
                let b = coeffs[ii];
                let pi_c = pi_c_buf[ii];
                let beta_c = beta_c_buf[ii];

                let (pi_tilde, beta_tilde) = if b.abs() >= SMALL_COEFF {
                    let t2 = pi_c / b;
                    let denom = t2 / b - nu;
                    if denom.abs() < NUMERICAL_FLOOR {
                        return Ok(UpdateReport::status_only(UpdateStatus::NumericalError));
                    }
                    let e = 1.0 / denom;
                    (e * pi_c * nu, e * (beta_c * nu + t2 * alpha))
                } else {
                    let denom = pi_c - nu * b * b;
                    if denom.abs() < NUMERICAL_FLOOR {
                        return Ok(UpdateReport::status_only(UpdateStatus::NumericalError));
                    }
                    let t = b / denom;
                    (t * b * nu * pi_c, t * (beta_c * b * nu + pi_c * alpha))
                };

                pi_tilde_buf[ii] = pi_tilde;
                beta_tilde_buf[ii] = beta_tilde;
            }
        }
        let bivariate_tilde = match (bivariate_cavity, moments) {
            (Some((k, a_j, c_j, a_bar, c_bar)), Moments::Bivariate { a_hat, c_hat, .. }) => {
                Some((k, a_j, c_j, a_hat - a_bar, c_hat - c_bar))
            }
            _ => None,
        };

        // --- Step 4: selective damping -----------------------------------------
        let mut d = damp;
        {
            let (pi_old, _beta_old) = self.factors.messages(j);
            for ii in 0..s {
                let i = vars[ii];
                match selective_damping_requirement(
                    self.pi_index.as_deref(),
                    i,
                    self.marginals.pi()[i],
                    self.pi_min,
                    pi_old[ii],
                    pi_tilde_buf[ii],
                ) {
                    DampingOutcome::NumericalError => {
                        return Ok(UpdateReport::status_only(UpdateStatus::NumericalError));
                    }
                    DampingOutcome::Skipped => {
                        return Ok(UpdateReport {
                            status: UpdateStatus::Skipped,
                            delta: None,
                            d_eff: Some(1.0),
                        });
                    }
                    DampingOutcome::Required(required) => d = d.max(required),
                    DampingOutcome::NotApplicable => {}
                }
            }
        }
        if let Some((k, a_j, _c_j, a_tilde, _c_tilde)) = bivariate_tilde {
            match selective_damping_requirement(
                self.a_index.as_deref(),
                k,
                self.marginals.a()[k],
                self.a_min.expect("bivariate driver always sets a_min"),
                a_j,
                a_tilde,
            ) {
                DampingOutcome::NumericalError => {
                    return Ok(UpdateReport::status_only(UpdateStatus::NumericalError));
                }
                DampingOutcome::Skipped => {
                    return Ok(UpdateReport {
                        status: UpdateStatus::Skipped,
                        delta: None,
                        d_eff: Some(1.0),
                    });
                }
                DampingOutcome::Required(required) => d = d.max(required),
                DampingOutcome::NotApplicable => {}
            }
        }
        if let Some((k, _a_j, c_j, _a_tilde, c_tilde)) = bivariate_tilde {
            match selective_damping_requirement(
                self.c_index.as_deref(),
                k,
                self.marginals.c()[k],
                self.c_min.expect("bivariate driver always sets c_min"),
                c_j,
                c_tilde,
            ) {
                DampingOutcome::NumericalError => {
                    return Ok(UpdateReport::status_only(UpdateStatus::NumericalError));
                }
                DampingOutcome::Skipped => {
                    return Ok(UpdateReport {
                        status: UpdateStatus::Skipped,
                        delta: None,
                        d_eff: Some(1.0),
                    });
                }
                DampingOutcome::Required(required) => d = d.max(required),
                DampingOutcome::NotApplicable => {}
            }
        }

        // --- Step 5: damped messages and tentative new marginals ----------------
        let mut pi_hat = vec![0.0; s];
        let mut beta_hat = vec![0.0; s];
        let mut pi_prime = vec![0.0; s];
        let mut beta_prime = vec![0.0; s];
        {
            let (pi_old, beta_old) = self.factors.messages(j);
            for ii in 0..s {
                pi_hat[ii] = pi_tilde_buf[ii] + d * (pi_old[ii] - pi_tilde_buf[ii]);
                beta_hat[ii] = beta_tilde_buf[ii] + d * (beta_old[ii] - beta_tilde_buf[ii]);

                let candidate = pi_c_buf[ii] + pi_hat[ii];
                if candidate < self.pi_min / 2.0 {
                    return Ok(UpdateReport::status_only(UpdateStatus::MarginalsInvalid));
                }
                pi_prime[ii] = candidate;
                beta_prime[ii] = beta_c_buf[ii] + beta_hat[ii];
            }
        }
        let bivariate_commit = if let Some((k, a_j, c_j, a_tilde, c_tilde)) = bivariate_tilde {
            let a_min = self.a_min.expect("bivariate driver always sets a_min");
            let c_min = self.c_min.expect("bivariate driver always sets c_min");
            let a_bar = bivariate_cavity.unwrap().3;
            let c_bar = bivariate_cavity.unwrap().4;

            let a_hat_damped = a_tilde + d * (a_j - a_tilde);
            let a_prime = a_bar + a_hat_damped;
            if a_prime < a_min / 2.0 {
                return Ok(UpdateReport::status_only(UpdateStatus::MarginalsInvalid));
            }
            let c_hat_damped = c_tilde + d * (c_j - c_tilde);
            let c_prime = c_bar + c_hat_damped;
            if c_prime < c_min / 2.0 {
                return Ok(UpdateReport::status_only(UpdateStatus::MarginalsInvalid));
            }
            Some((k, a_hat_damped, c_hat_damped, a_prime, c_prime))
        } else {
            None
        };

        // A factor whose own message currently holds `κ_i` makes the
        // damping clamp's `MaxPrecisionIndex.max(i)` stale once this
        // message commits. Recompute what `κ_i` would be with this
        // factor's new value in place, and abandon the update if that
        // would be non-positive.
        if let Some(index) = self.pi_index.as_deref() {
            for ii in 0..s {
                let i = vars[ii];
                let kappa_after = index.max_excluding(i, j).max(pi_hat[ii]);
                if kappa_after <= 0.0 {
                    return Ok(UpdateReport::status_only(UpdateStatus::Skipped));
                }
            }
        }
        if let Some((k, a_hat_damped, _, _, _)) = bivariate_commit {
            if let Some(index) = self.a_index.as_deref() {
                if index.max_excluding(k, j).max(a_hat_damped) <= 0.0 {
                    return Ok(UpdateReport::status_only(UpdateStatus::Skipped));
                }
            }
        }
        if let Some((k, _, c_hat_damped, _, _)) = bivariate_commit {
            if let Some(index) = self.c_index.as_deref() {
                if index.max_excluding(k, j).max(c_hat_damped) <= 0.0 {
                    return Ok(UpdateReport::status_only(UpdateStatus::Skipped));
                }
            }
        }

        // --- Step 6: commit ----------------------------------------------------
        {
            let (pi_row, beta_row) = self.factors.messages_mut(j);
            for ii in 0..s {
                pi_row[ii] = pi_hat[ii];
                beta_row[ii] = beta_hat[ii];
            }
        }
        for ii in 0..s {
            let i = vars[ii];
            self.marginals.pi_mut()[i] = pi_prime[ii];
            self.marginals.beta_mut()[i] = beta_prime[ii];
            if let Some(index) = self.pi_index.as_deref_mut() {
                index.update(i, j, pi_hat[ii]);
            }
        }
        if let Some((k, a_hat_damped, c_hat_damped, a_prime, c_prime)) = bivariate_commit {
            self.factors.set_prec_message(j, a_hat_damped, c_hat_damped);
            self.marginals.a_mut()[k] = a_prime;
            self.marginals.c_mut()[k] = c_prime;
            if let Some(index) = self.a_index.as_deref_mut() {
                index.update(k, j, a_hat_damped);
            }
            if let Some(index) = self.c_index.as_deref_mut() {
                index.update(k, j, c_hat_damped);
            }
        }

        // --- Step 7: Δ metric ----------------------------------------------------
        let delta = if want_delta {
            let (row_vars, coeffs) = self.factors.row(j);
            let mut m_rho_post = 0.0;
            let mut m_h_post = 0.0;
            for ii in 0..s {
                let i = row_vars[ii];
                let b = coeffs[ii];
                let pi_i = self.marginals.pi()[i];
                let beta_i = self.marginals.beta()[i];
                m_rho_post += b * b / pi_i;
                m_h_post += (b / pi_i) * beta_i;
            }
            let h_term = (m_h_pre - m_h_post).abs() / m_h_pre.abs().max(m_h_post.abs()).max(1e-8);
            let rho_term = (m_rho_pre.sqrt() - m_rho_post.sqrt()).abs()
                / m_rho_pre.sqrt().max(m_rho_post.sqrt()).max(1e-8);
            Some(h_term.max(rho_term))
        } else {
            None
        };

        Ok(UpdateReport {
            status: UpdateStatus::Success,
            delta,
            d_eff: Some(d),
        })
    }
}

enum DampingOutcome {
    NotApplicable,
    Required(Real),
    NumericalError,
    Skipped,
}

/// One instance of the selective-damping clamp, generic over which
/// aggregate/index/threshold it runs against so the bivariate `a`/`c`
/// branches call the exact same code as the univariate `π` branch
/// rather than a hand-copied variant.
fn selective_damping_requirement(
    index: Option<&MaxPrecisionIndex>,
    slot: Idx,
    aggregate: Real,
    min_threshold: Real,
    old_message: Real,
    tilde_message: Real,
) -> DampingOutcome {
    if tilde_message >= old_message {
        return DampingOutcome::NotApplicable;
    }
    let Some(index) = index else {
        return DampingOutcome::NotApplicable;
    };

    let kappa = index.max(slot);
    if kappa <= 0.0 {
        return DampingOutcome::NumericalError;
    }

    let one_minus_eta =
        ((aggregate - kappa - min_threshold) / (old_message - tilde_message)).min(1.0);
    if one_minus_eta <= SKIP_THRESHOLD {
        return DampingOutcome::Skipped;
    }
    DampingOutcome::Required(1.0 - one_minus_eta)
}
