//! The binary interchange format used to hand a [`FactorRepresentation`]
//! across a process boundary (e.g. from a host scripting environment
//! that owns the design matrix in some other runtime).
//!
//! Layout, little-endian throughout: a fixed header (`n`, `m`,
//! `bivariate`, `k`), the per-factor row lengths, the flat `V_j`
//! indices, the flat `b_{ji}` coefficients, the flat `β` and `π`
//! arrays in the same row-major order, and — only when `bivariate` is
//! set — the per-factor `k(j)`, `a_j`, `c_j`. Integers are 32-bit
//! signed, floats are `f64`. This is a transfer format, not a
//! persisted one: there is no version byte because construction and
//! use are co-located in one process and never round-trip across a
//! crate upgrade.

use problemo::Problem;
use problemo::common::IntoCommonProblem;

use crate::error::ConstructionError;
use crate::factor::{FactorRepresentation, FactorRow};
use crate::types::{Idx, Real};

const I32_LEN: usize = 4;
const F64_LEN: usize = 8;

/// Serializes `factors` into the binary layout documented on the
/// module. Allocates exactly the payload size up front.
pub fn encode(factors: &FactorRepresentation) -> Vec<u8> {
    let m = factors.num_potentials();
    let nnz: usize = (0..m).map(|j| factors.row_size(j)).sum();
    let bivariate = factors.is_bivariate();

    let mut buf = Vec::with_capacity(
        4 * I32_LEN
            + m * I32_LEN
            + nnz * I32_LEN
            + 2 * nnz * F64_LEN
            + if bivariate { m * (I32_LEN + 2 * F64_LEN) } else { 0 },
    );

    push_i32(&mut buf, factors.num_variables() as i32);
    push_i32(&mut buf, m as i32);
    push_i32(&mut buf, bivariate as i32);
    push_i32(&mut buf, factors.num_prec_vars() as i32);

    for j in 0..m {
        push_i32(&mut buf, factors.row_size(j) as i32);
    }
    for j in 0..m {
        let (vars, _) = factors.row(j);
        for &i in vars {
            push_i32(&mut buf, i as i32);
        }
    }
    for j in 0..m {
        let (_, coeffs) = factors.row(j);
        for &b in coeffs {
            push_f64(&mut buf, b);
        }
    }
    for j in 0..m {
        let (_, beta) = factors.messages(j);
        for &beta_ji in beta {
            push_f64(&mut buf, beta_ji);
        }
    }
    for j in 0..m {
        let (pi, _) = factors.messages(j);
        for &pi_ji in pi {
            push_f64(&mut buf, pi_ji);
        }
    }
    if bivariate {
        for j in 0..m {
            push_i32(&mut buf, factors.prec_var_of(j).expect("bivariate row has k(j)") as i32);
        }
        for j in 0..m {
            let (a_j, _) = factors.prec_message(j).expect("bivariate row has (a_j, c_j)");
            push_f64(&mut buf, a_j);
        }
        for j in 0..m {
            let (_, c_j) = factors.prec_message(j).expect("bivariate row has (a_j, c_j)");
            push_f64(&mut buf, c_j);
        }
    }

    buf
}

/// Parses a buffer produced by [`encode`] back into a
/// [`FactorRepresentation`]. Fails with a structured
/// [`ConstructionError`] on a truncated payload, or with whatever
/// [`FactorRepresentation::new_univariate`]/`new_bivariate` reject
/// (out-of-range indices, duplicate variables, length mismatches).
pub fn decode(bytes: &[u8]) -> Result<FactorRepresentation, Problem> {
    let mut r = Reader::new(bytes);

    let n = r.read_len("n")?;
    let m = r.read_len("m")?;
    let bivariate = r.read_i32()? != 0;
    let n_prec = r.read_len("k")?;

    let row_lengths: Vec<usize> = (0..m).map(|_| r.read_len("row length")).collect::<Result<_, _>>()?;
    let nnz: usize = row_lengths
        .iter()
        .try_fold(0usize, |acc, &len| acc.checked_add(len))
        .ok_or_else(|| "wire payload row lengths overflow".gloss())?;

    // Validate nnz against the buffer before trusting it as a Vec capacity —
    // an untrusted row length must fail as TruncatedPayload, not panic.
    let var_idx_bytes = nnz
        .checked_mul(I32_LEN)
        .ok_or_else(|| "wire payload row lengths overflow".gloss())?;
    r.need(var_idx_bytes)?;

    let mut rows: Vec<FactorRow> = row_lengths.iter().map(|&len| Vec::with_capacity(len)).collect();
    let var_idx = r.read_i32_vec(nnz)?;
    let mut cursor = 0;
    for (j, &len) in row_lengths.iter().enumerate() {
        for &i in &var_idx[cursor..cursor + len] {
            rows[j].push((i as Idx, 0.0));
        }
        cursor += len;
    }

    let coeff = r.read_f64_vec(nnz)?;
    cursor = 0;
    for (j, &len) in row_lengths.iter().enumerate() {
        for (slot, &b) in rows[j].iter_mut().zip(&coeff[cursor..cursor + len]) {
            slot.1 = b;
        }
        cursor += len;
    }

    let beta = r.read_f64_vec(nnz)?;
    let pi = r.read_f64_vec(nnz)?;

    if !bivariate {
        return FactorRepresentation::new_univariate(n, rows, pi, beta);
    }

    let k_of_factor: Vec<Idx> = r.read_i32_vec(m)?.into_iter().map(|v| v as Idx).collect();
    let a = r.read_f64_vec(m)?;
    let c = r.read_f64_vec(m)?;

    FactorRepresentation::new_bivariate(n, n_prec, rows, pi, beta, k_of_factor, a, c)
}

fn push_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_f64(buf: &mut Vec<u8>, v: Real) {
    buf.extend_from_slice(&v.to_le_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<(), Problem> {
        if self.pos + n > self.buf.len() {
            return Err(ConstructionError::TruncatedPayload {
                expected: n,
                got: self.buf.len() - self.pos,
            }
            .into());
        }
        Ok(())
    }

    fn read_i32(&mut self) -> Result<i32, Problem> {
        self.need(I32_LEN)?;
        let v = i32::from_le_bytes(self.buf[self.pos..self.pos + I32_LEN].try_into().unwrap());
        self.pos += I32_LEN;
        Ok(v)
    }

    /// Reads a 32-bit count or dimension and rejects negative values
    /// before they get sign-extended into an enormous `usize`.
    fn read_len(&mut self, field: &'static str) -> Result<usize, Problem> {
        let v = self.read_i32()?;
        if v < 0 {
            return Err(ConstructionError::NegativeLength { field, value: v }.into());
        }
        Ok(v as usize)
    }

    fn read_f64(&mut self) -> Result<Real, Problem> {
        self.need(F64_LEN)?;
        let v = f64::from_le_bytes(self.buf[self.pos..self.pos + F64_LEN].try_into().unwrap());
        self.pos += F64_LEN;
        Ok(v)
    }

    fn read_i32_vec(&mut self, count: usize) -> Result<Vec<i32>, Problem> {
        (0..count).map(|_| self.read_i32()).collect()
    }

    fn read_f64_vec(&mut self, count: usize) -> Result<Vec<Real>, Problem> {
        (0..count).map(|_| self.read_f64()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn univariate_round_trips_through_the_wire() {
        let factors = FactorRepresentation::new_univariate(
            2,
            vec![vec![(0, 1.0), (1, 2.0)], vec![(0, 3.0)]],
            vec![0.5, 1.5, 0.25],
            vec![0.1, 0.2, 0.3],
        )
        .unwrap();

        let bytes = encode(&factors);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.num_variables(), factors.num_variables());
        assert_eq!(decoded.num_potentials(), factors.num_potentials());
        assert!(!decoded.is_bivariate());
        for j in 0..factors.num_potentials() {
            assert_eq!(decoded.row(j), factors.row(j));
            assert_eq!(decoded.messages(j), factors.messages(j));
        }
    }

    #[test]
    fn bivariate_round_trips_through_the_wire() {
        let factors = FactorRepresentation::new_bivariate(
            1,
            1,
            vec![vec![(0, 1.0)], vec![(0, 2.0)]],
            vec![0.1, 0.2],
            vec![0.3, 0.4],
            vec![0, 0],
            vec![0.5, 0.6],
            vec![0.7, 0.8],
        )
        .unwrap();

        let bytes = encode(&factors);
        let decoded = decode(&bytes).unwrap();

        assert!(decoded.is_bivariate());
        assert_eq!(decoded.num_prec_vars(), 1);
        for j in 0..2 {
            assert_eq!(decoded.prec_var_of(j), factors.prec_var_of(j));
            assert_eq!(decoded.prec_message(j), factors.prec_message(j));
        }
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let factors = FactorRepresentation::new_univariate(
            1,
            vec![vec![(0, 1.0)]],
            vec![0.0],
            vec![0.0],
        )
        .unwrap();
        let mut bytes = encode(&factors);
        bytes.truncate(bytes.len() - 1);

        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn negative_row_length_is_rejected_without_panicking() {
        // header: n=1, m=1, bivariate=0, k=0
        let mut bytes = Vec::new();
        push_i32(&mut bytes, 1);
        push_i32(&mut bytes, 1);
        push_i32(&mut bytes, 0);
        push_i32(&mut bytes, 0);
        push_i32(&mut bytes, -1); // row length, would sign-extend to usize::MAX if trusted

        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn oversized_row_length_is_rejected_instead_of_allocating() {
        // header: n=1, m=1, bivariate=0, k=0
        let mut bytes = Vec::new();
        push_i32(&mut bytes, 1);
        push_i32(&mut bytes, 1);
        push_i32(&mut bytes, 0);
        push_i32(&mut bytes, 0);
        push_i32(&mut bytes, i32::MAX); // row length far larger than the remaining buffer

        assert!(decode(&bytes).is_err());
    }
}
