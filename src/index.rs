//! The maximum-message-precision index: for each variable `i`,
//! `κ_i = max_{j: i∈V_j} π_{ji}`, ties broken by smallest `j`.
//!
//! This is what makes selective damping cheap: without it, clamping
//! damping to protect `π_i − κ_i ≥ πMin` would require an `O(s_i)`
//! scan over every factor touching `i` on every update. The same
//! structure, over different slot counts, backs the bivariate
//! extension's `a`/`c` indices.
//!
//! Implemented as a per-slot ordered set keyed by `(value, factor)`
//! with ties resolved so the smallest factor id sorts last, plus a
//! back-index from factor id to its current value so `update` can
//! remove the stale entry before inserting the new one — both
//! operations are `O(log s)` where `s` is the number of factors
//! currently registered against that slot (a plain scan would do for
//! low-degree variables, but nothing stops this representation from
//! handling the general case at the same asymptotic cost).

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::types::{Idx, Real};

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: Real,
    factor: Idx,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.factor == other.factor
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .partial_cmp(&other.value)
            .expect("precision values must never be NaN")
            .then_with(|| other.factor.cmp(&self.factor))
    }
}

/// Per-slot running maximum over `(factor, value)` pairs, with
/// `O(log s)` insert/update/query.
pub struct MaxPrecisionIndex {
    heaps: Vec<BTreeSet<Entry>>,
    current: Vec<HashMap<Idx, Real>>,
}

impl MaxPrecisionIndex {
    /// An empty index over `n_slots` variables (or precision variables).
    pub fn new(n_slots: usize) -> Self {
        Self {
            heaps: (0..n_slots).map(|_| BTreeSet::new()).collect(),
            current: (0..n_slots).map(|_| HashMap::new()).collect(),
        }
    }

    /// Builds the index from an initial set of `(slot, factor, value)`
    /// triples, e.g. every `(i, j, π_{ji})` at construction time.
    pub fn build(n_slots: usize, entries: impl IntoIterator<Item = (Idx, Idx, Real)>) -> Self {
        let mut index = Self::new(n_slots);
        for (slot, factor, value) in entries {
            index.update(slot, factor, value);
        }
        index
    }

    /// `κ_{slot}`: the maximum value currently registered for `slot`,
    /// ties broken by smallest factor id. Returns `-∞` for a slot with
    /// no registered entries, so that any positivity check against it
    /// fails closed rather than panicking.
    pub fn max(&self, slot: Idx) -> Real {
        self.heaps[slot]
            .iter()
            .next_back()
            .map(|e| e.value)
            .unwrap_or(Real::NEG_INFINITY)
    }

    /// The factor id attaining [`Self::max`], if any entry is registered.
    pub fn argmax(&self, slot: Idx) -> Option<Idx> {
        self.heaps[slot].iter().next_back().map(|e| e.factor)
    }

    /// `max(slot)` as if `factor`'s entry were absent. Used to resolve
    /// the tie-break case where the factor being updated currently
    /// holds the maximum: the new `κ` after commit is the larger of
    /// this and the factor's own new value, never the stale entry
    /// about to be overwritten. Worst case `O(s)`, but only when
    /// `factor` is the slot's current maximum.
    pub fn max_excluding(&self, slot: Idx, factor: Idx) -> Real {
        self.heaps[slot]
            .iter()
            .rev()
            .find(|e| e.factor != factor)
            .map(|e| e.value)
            .unwrap_or(Real::NEG_INFINITY)
    }

    /// Replaces the entry for `(slot, factor)` with `new_value`,
    /// inserting it if it was not already present, and restores the
    /// max. `O(log s)` where `s` is the number of factors registered
    /// against `slot`.
    pub fn update(&mut self, slot: Idx, factor: Idx, new_value: Real) {
        if let Some(old_value) = self.current[slot].remove(&factor) {
            self.heaps[slot].remove(&Entry {
                value: old_value,
                factor,
            });
        }
        self.heaps[slot].insert(Entry {
            value: new_value,
            factor,
        });
        self.current[slot].insert(factor, new_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_tracks_largest_value() {
        let mut index = MaxPrecisionIndex::new(1);
        index.update(0, 0, 1.0);
        index.update(0, 1, 5.0);
        index.update(0, 2, 3.0);
        assert_eq!(index.max(0), 5.0);
        assert_eq!(index.argmax(0), Some(1));
    }

    #[test]
    fn ties_break_to_smallest_factor() {
        let mut index = MaxPrecisionIndex::new(1);
        index.update(0, 3, 2.0);
        index.update(0, 1, 2.0);
        index.update(0, 2, 2.0);
        assert_eq!(index.max(0), 2.0);
        assert_eq!(index.argmax(0), Some(1));
    }

    #[test]
    fn update_replaces_stale_entry() {
        let mut index = MaxPrecisionIndex::new(1);
        index.update(0, 0, 10.0);
        index.update(0, 1, 1.0);
        assert_eq!(index.max(0), 10.0);

        index.update(0, 0, 0.5);
        assert_eq!(index.max(0), 1.0);
        assert_eq!(index.argmax(0), Some(1));
    }

    #[test]
    fn empty_slot_reports_negative_infinity() {
        let index = MaxPrecisionIndex::new(1);
        assert_eq!(index.max(0), Real::NEG_INFINITY);
        assert_eq!(index.argmax(0), None);
    }

    #[test]
    fn max_excluding_skips_the_named_factor() {
        let mut index = MaxPrecisionIndex::new(1);
        index.update(0, 0, 10.0);
        index.update(0, 1, 4.0);
        assert_eq!(index.max_excluding(0, 0), 4.0);
        assert_eq!(index.max_excluding(0, 1), 10.0);
        assert_eq!(index.max_excluding(0, 2), 10.0);
    }

    #[test]
    fn build_from_initial_entries_matches_incremental_updates() {
        let built = MaxPrecisionIndex::build(2, vec![(0, 0, 1.0), (0, 1, 4.0), (1, 0, 2.0)]);
        assert_eq!(built.max(0), 4.0);
        assert_eq!(built.max(1), 2.0);
    }
}
