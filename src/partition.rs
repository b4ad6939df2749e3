//! Metadata partition index (spec.md §4.4).
//!
//! Before a lookup walks any subtable at all, it can rule out whole
//! subtables whose rules are all keyed to a metadata value the flow
//! doesn't have. Grounded on `bloom_filter.rs`'s documented
//! double-hashing scheme (`h_i(x) = h1(x) + i*h2(x) mod m`): each
//! subtable contributes a sparse, few-bits-set tag (computed in
//! `subtable::compute_tag`) to every metadata value one of its rules
//! names; a lookup ANDs the flow's metadata partition bitmap against a
//! subtable's tag the same way a Bloom filter tests membership —
//! conservatively, with false positives but never false negatives.
//!
//! A rule that leaves metadata wildcarded gets the all-ones tag from
//! `compute_tag` and never goes through this index at all:
//! `may_contain`'s `subtable_tag == u64::MAX` fast path already answers
//! "always consult" for that one subtable, without needing to pollute
//! every other metadata value's mask.

use dashmap::DashMap;

#[derive(Default)]
pub struct PartitionIndex {
    partitions: DashMap<u64, Vec<u64>>,
}

impl PartitionIndex {
    pub fn new() -> Self {
        PartitionIndex::default()
    }

    /// Record that a subtable tagged `tag` now has a rule constraining
    /// metadata to `metadata_value`. A subtable that leaves metadata
    /// wildcarded (`metadata_value` is `None`) has nothing to record
    /// here — its all-ones tag already bypasses the index.
    pub fn add(&self, metadata_value: Option<u64>, tag: u64) {
        if let Some(v) = metadata_value {
            self.partitions.entry(v).or_default().push(tag);
        }
    }

    /// Undo a prior [`PartitionIndex::add`] with the same arguments.
    pub fn remove(&self, metadata_value: Option<u64>, tag: u64) {
        if let Some(v) = metadata_value {
            if let Some(mut entry) = self.partitions.get_mut(&v) {
                if let Some(pos) = entry.iter().position(|t| *t == tag) {
                    entry.remove(pos);
                }
            }
        }
    }

    fn relevant_tag_mask(&self, metadata_value: u64) -> u64 {
        self.partitions
            .get(&metadata_value)
            .map(|v| v.iter().fold(0u64, |a, b| a | b))
            .unwrap_or(0)
    }

    /// Whether a subtable tagged `subtable_tag` might hold a rule
    /// relevant to `metadata_value` — `false` is a firm "no", `true`
    /// may be a false positive (spec.md §4.4).
    pub fn may_contain(&self, metadata_value: u64, subtable_tag: u64) -> bool {
        if subtable_tag == u64::MAX {
            return true;
        }
        (self.relevant_tag_mask(metadata_value) & subtable_tag) == subtable_tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_metadata_value_is_pruned() {
        let idx = PartitionIndex::new();
        idx.add(Some(7), 0b0101);
        assert!(!idx.may_contain(8, 0b0101));
    }

    #[test]
    fn present_metadata_value_is_kept() {
        let idx = PartitionIndex::new();
        idx.add(Some(7), 0b0101);
        assert!(idx.may_contain(7, 0b0101));
    }

    #[test]
    fn wildcard_metadata_contribution_does_not_leak_into_other_values() {
        let idx = PartitionIndex::new();
        // An unconstrained-metadata subtable never calls `add` with a
        // non-u64::MAX tag (`compute_tag` gives it u64::MAX already),
        // but even if one did, `add(None, _)` must not widen the mask
        // every other metadata value is checked against.
        idx.add(None, 0b1000);
        idx.add(Some(7), 0b0101);
        assert!(!idx.may_contain(999, 0b1000));
        assert!(!idx.may_contain(7, 0b1000));
    }

    #[test]
    fn remove_retracts_contribution() {
        let idx = PartitionIndex::new();
        idx.add(Some(7), 0b0101);
        idx.remove(Some(7), 0b0101);
        assert!(!idx.may_contain(7, 0b0101));
    }

    #[test]
    fn max_tag_bypasses_partition_check() {
        let idx = PartitionIndex::new();
        assert!(idx.may_contain(123, u64::MAX));
    }
}
