use std::f64::INFINITY;

use faer::{ColRef, unzip, zip};

use crate::types::Real;

/// The minimum element of `x`, used to check invariant 1 (`π_i ≥ πMin`
/// for every `i`) in a single pass rather than a manual loop.
pub(crate) fn col_min<'a>(x: ColRef<'a, Real>) -> Real {
    let mut minimum = Real::from(INFINITY);

    zip!(x).for_each(|unzip!(x)| minimum = Real::min(minimum, *x));

    minimum
}

pub(crate) fn is_col_positive<'a>(x: ColRef<'a, Real>) -> bool {
    let mut res = true;
    zip!(x).for_each(|unzip!(x)| {
        if *x <= Real::from(0.) {
            res = false
        }
    });
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Col;

    #[test]
    fn test_col_min() {
        let x1_data = [1.0, 2.0, 3.0];
        let x1 = Col::from_fn(x1_data.len(), |i| x1_data[i]);
        assert_eq!(col_min(x1.as_ref()), 1.0);
    }

    #[test]
    fn test_is_col_positive() {
        let x1_data = [1.0, 2.0, 3.0];
        let x2_data = [1.0, -2.0, 3.0];
        let x1 = Col::from_fn(x1_data.len(), |i| x1_data[i]);
        let x2 = Col::from_fn(x2_data.len(), |i| x2_data[i]);
        assert!(is_col_positive(x1.as_ref()));
        assert!(!is_col_positive(x2.as_ref()));
    }
}
