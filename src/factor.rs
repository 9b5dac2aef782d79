//! The sparse design matrix `B` and the per-factor message parameters.
//!
//! `FactorRepresentation` stores `B` row-by-row: for factor `j`, an
//! ordered list of `(i, b_{ji})` pairs with `i ∈ V_j`. Row order is
//! fixed at construction and indexes the parallel message arrays
//! `(π_{j,·}, β_{j,·})` and, in the bivariate extension, the per-factor
//! `(a_j, c_j, k(j))`. Everything here is immutable except the message
//! arrays, which only [`crate::driver::EPUpdateDriver`] mutates.

use problemo::Problem;
use problemo::common::IntoCommonProblem;

use crate::error::ConstructionError;
use crate::types::{Idx, Real};

/// One row of the design matrix as supplied at construction time:
/// the ordered `(variable, coefficient)` pairs for a single factor.
pub type FactorRow = Vec<(Idx, Real)>;

/// Sparse row-oriented design matrix plus per-(factor, variable)
/// message parameters, and (optionally) the bivariate precision
/// extension's per-factor `(a_j, c_j, k(j))`.
pub struct FactorRepresentation {
    n: usize,
    k: usize,

    row_ptr: Vec<usize>,
    var_idx: Vec<Idx>,
    coeff: Vec<Real>,

    pi: Vec<Real>,
    beta: Vec<Real>,

    factor_prec_var: Option<Vec<Idx>>,
    a: Option<Vec<Real>>,
    c: Option<Vec<Real>>,
}

impl FactorRepresentation {
    /// Builds a univariate-message representation from `rows` (one
    /// [`FactorRow`] per factor) and the initial messages, flattened in
    /// the same row-major order as `rows`.
    pub fn new_univariate(
        n: usize,
        rows: Vec<FactorRow>,
        pi: Vec<Real>,
        beta: Vec<Real>,
    ) -> Result<Self, Problem> {
        let (row_ptr, var_idx, coeff) = build_csr(n, &rows)?;
        if pi.len() != coeff.len() || beta.len() != coeff.len() {
            return Err(ConstructionError::MessageLengthMismatch {
                expected: coeff.len(),
                got: pi.len().max(beta.len()),
            }
            .into());
        }

        Ok(Self {
            n,
            k: 0,
            row_ptr,
            var_idx,
            coeff,
            pi,
            beta,
            factor_prec_var: None,
            a: None,
            c: None,
        })
    }

    /// Builds a univariate-message representation directly from
    /// `(j, i, b_{ji})` triples rather than pre-grouped rows — the
    /// in-process counterpart to the `wire` interchange format, for
    /// callers that already have `B` as a flat triple list. Triples
    /// are bucketed by `j`; within a bucket, relative order is
    /// preserved, so callers wanting a specific row order should
    /// supply triples for each factor contiguously.
    pub fn from_triplets(
        n: usize,
        m: usize,
        triples: impl IntoIterator<Item = (Idx, Idx, Real)>,
        pi: Vec<Real>,
        beta: Vec<Real>,
    ) -> Result<Self, Problem> {
        let rows = bucket_triplets(m, triples)?;
        Self::new_univariate(n, rows, pi, beta)
    }

    /// Builds a bivariate-precision-message representation directly
    /// from `(j, i, b_{ji})` triples, as [`Self::from_triplets`] plus
    /// the per-factor `(a_j, c_j, k(j))` arrays.
    #[allow(clippy::too_many_arguments)]
    pub fn from_triplets_bivariate(
        n: usize,
        m: usize,
        n_prec: usize,
        triples: impl IntoIterator<Item = (Idx, Idx, Real)>,
        pi: Vec<Real>,
        beta: Vec<Real>,
        k_of_factor: Vec<Idx>,
        a: Vec<Real>,
        c: Vec<Real>,
    ) -> Result<Self, Problem> {
        let rows = bucket_triplets(m, triples)?;
        Self::new_bivariate(n, n_prec, rows, pi, beta, k_of_factor, a, c)
    }

    /// Builds a bivariate-precision-message representation: as
    /// [`Self::new_univariate`], plus one `(a_j, c_j)` pair per factor
    /// and the fixed map `k: j → {0,…,K−1}`.
    #[allow(clippy::too_many_arguments)]
    pub fn new_bivariate(
        n: usize,
        n_prec: usize,
        rows: Vec<FactorRow>,
        pi: Vec<Real>,
        beta: Vec<Real>,
        k_of_factor: Vec<Idx>,
        a: Vec<Real>,
        c: Vec<Real>,
    ) -> Result<Self, Problem> {
        let mut repr = Self::new_univariate(n, rows, pi, beta)?;
        let m = repr.num_potentials();
        if k_of_factor.len() != m || a.len() != m || c.len() != m {
            return Err(ConstructionError::MessageLengthMismatch {
                expected: m,
                got: k_of_factor.len().min(a.len()).min(c.len()),
            }
            .into());
        }
        for (j, &kj) in k_of_factor.iter().enumerate() {
            if kj >= n_prec {
                return Err(ConstructionError::PrecisionVarOutOfRange {
                    row: j,
                    k: kj,
                    n_prec,
                }
                .into());
            }
        }

        repr.k = n_prec;
        repr.factor_prec_var = Some(k_of_factor);
        repr.a = Some(a);
        repr.c = Some(c);
        Ok(repr)
    }

    pub fn num_variables(&self) -> usize {
        self.n
    }

    pub fn num_potentials(&self) -> usize {
        self.row_ptr.len().saturating_sub(1)
    }

    pub fn num_prec_vars(&self) -> usize {
        self.k
    }

    pub fn is_bivariate(&self) -> bool {
        self.factor_prec_var.is_some()
    }

    /// Number of `(variable, coefficient)` entries in factor `j` (`s_j`).
    pub fn row_size(&self, j: Idx) -> usize {
        self.row_ptr[j + 1] - self.row_ptr[j]
    }

    /// Read-only `(V_j, b_{j,·})` for factor `j`.
    pub fn row(&self, j: Idx) -> (&[Idx], &[Real]) {
        let start = self.row_ptr[j];
        let end = self.row_ptr[j + 1];
        (&self.var_idx[start..end], &self.coeff[start..end])
    }

    /// Read-only `(π_{j,·}, β_{j,·})` for factor `j`.
    pub fn messages(&self, j: Idx) -> (&[Real], &[Real]) {
        let start = self.row_ptr[j];
        let end = self.row_ptr[j + 1];
        (&self.pi[start..end], &self.beta[start..end])
    }

    /// Mutable `(π_{j,·}, β_{j,·})` for factor `j`.
    pub fn messages_mut(&mut self, j: Idx) -> (&mut [Real], &mut [Real]) {
        let start = self.row_ptr[j];
        let end = self.row_ptr[j + 1];
        (&mut self.pi[start..end], &mut self.beta[start..end])
    }

    /// `k(j)` for the bivariate extension, `None` in univariate mode.
    pub fn prec_var_of(&self, j: Idx) -> Option<Idx> {
        self.factor_prec_var.as_ref().map(|k| k[j])
    }

    /// `(a_j, c_j)` for the bivariate extension.
    pub fn prec_message(&self, j: Idx) -> Option<(Real, Real)> {
        match (&self.a, &self.c) {
            (Some(a), Some(c)) => Some((a[j], c[j])),
            _ => None,
        }
    }

    /// Overwrites `(a_j, c_j)` for the bivariate extension.
    pub fn set_prec_message(&mut self, j: Idx, a_j: Real, c_j: Real) {
        if let (Some(a), Some(c)) = (self.a.as_mut(), self.c.as_mut()) {
            a[j] = a_j;
            c[j] = c_j;
        }
    }

    /// Largest row size over all factors, used to size the driver's
    /// scratch buffer.
    pub fn max_row_size(&self) -> usize {
        (0..self.num_potentials())
            .map(|j| self.row_size(j))
            .max()
            .unwrap_or(0)
    }
}

/// Groups flat `(j, i, b_{ji})` triples into one [`FactorRow`] per
/// factor, shared by [`FactorRepresentation::from_triplets`] and
/// [`FactorRepresentation::from_triplets_bivariate`].
fn bucket_triplets(
    m: usize,
    triples: impl IntoIterator<Item = (Idx, Idx, Real)>,
) -> Result<Vec<FactorRow>, Problem> {
    let mut rows: Vec<FactorRow> = vec![Vec::new(); m];
    for (j, i, b) in triples {
        if j >= m {
            return Err(format!("triple references factor {j}, but only {m} factors exist").as_str().gloss());
        }
        rows[j].push((i, b));
    }
    Ok(rows)
}

fn build_csr(
    n: usize,
    rows: &[FactorRow],
) -> Result<(Vec<usize>, Vec<Idx>, Vec<Real>), Problem> {
    let mut row_ptr = Vec::with_capacity(rows.len() + 1);
    let nnz: usize = rows.iter().map(|r| r.len()).sum();
    let mut var_idx = Vec::with_capacity(nnz);
    let mut coeff = Vec::with_capacity(nnz);

    row_ptr.push(0);
    for (j, row) in rows.iter().enumerate() {
        let mut seen = std::collections::HashSet::with_capacity(row.len());
        for &(i, b) in row {
            if i >= n {
                return Err(ConstructionError::VariableOutOfRange {
                    row: j,
                    var: i,
                    n_vars: n,
                }
                .into());
            }
            if !seen.insert(i) {
                return Err(ConstructionError::DuplicateVariableInRow { row: j, var: i }.into());
            }
            var_idx.push(i);
            coeff.push(b);
        }
        row_ptr.push(var_idx.len());
    }

    Ok((row_ptr, var_idx, coeff))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_factor_row_and_messages_round_trip() {
        let repr = FactorRepresentation::new_univariate(
            1,
            vec![vec![(0, 1.0)]],
            vec![0.0],
            vec![0.0],
        )
        .unwrap();

        assert_eq!(repr.num_variables(), 1);
        assert_eq!(repr.num_potentials(), 1);
        assert_eq!(repr.row_size(0), 1);
        assert_eq!(repr.row(0), (&[0][..], &[1.0][..]));
        assert_eq!(repr.messages(0), (&[0.0][..], &[0.0][..]));
    }

    #[test]
    fn out_of_range_variable_is_rejected() {
        let err = FactorRepresentation::new_univariate(
            1,
            vec![vec![(5, 1.0)]],
            vec![0.0],
            vec![0.0],
        );
        assert!(err.is_err());
    }

    #[test]
    fn duplicate_variable_in_row_is_rejected() {
        let err = FactorRepresentation::new_univariate(
            2,
            vec![vec![(0, 1.0), (0, 2.0)]],
            vec![0.0, 0.0],
            vec![0.0, 0.0],
        );
        assert!(err.is_err());
    }

    #[test]
    fn from_triplets_buckets_by_factor_and_preserves_order() {
        let repr = FactorRepresentation::from_triplets(
            3,
            2,
            vec![(0, 1, 1.0), (1, 0, 2.0), (0, 2, 3.0)],
            vec![0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0],
        )
        .unwrap();

        assert_eq!(repr.num_potentials(), 2);
        assert_eq!(repr.row(0), (&[1, 2][..], &[1.0, 3.0][..]));
        assert_eq!(repr.row(1), (&[0][..], &[2.0][..]));
    }

    #[test]
    fn from_triplets_rejects_out_of_range_factor() {
        let err = FactorRepresentation::from_triplets(
            2,
            1,
            vec![(5, 0, 1.0)],
            vec![0.0],
            vec![0.0],
        );
        assert!(err.is_err());
    }

    #[test]
    fn from_triplets_bivariate_tracks_precision_variable_map() {
        let repr = FactorRepresentation::from_triplets_bivariate(
            1,
            1,
            1,
            vec![(0, 0, 1.0)],
            vec![0.0],
            vec![0.0],
            vec![0],
            vec![0.0],
            vec![0.0],
        )
        .unwrap();

        assert!(repr.is_bivariate());
        assert_eq!(repr.prec_var_of(0), Some(0));
        assert_eq!(repr.prec_message(0), Some((0.0, 0.0)));
    }

    #[test]
    fn bivariate_tracks_precision_variable_map() {
        let repr = FactorRepresentation::new_bivariate(
            1,
            1,
            vec![vec![(0, 1.0)]],
            vec![0.0],
            vec![0.0],
            vec![0],
            vec![0.0],
            vec![0.0],
        )
        .unwrap();

        assert!(repr.is_bivariate());
        assert_eq!(repr.prec_var_of(0), Some(0));
        assert_eq!(repr.prec_message(0), Some((0.0, 0.0)));
    }
}
