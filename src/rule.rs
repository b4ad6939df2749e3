//! Rules and their visibility.
//!
//! A [`Rule`]'s priority and match are immutable once created (spec.md
//! §3); only its two version stamps move, and only forward. Visibility
//! is interior-mutable (`AtomicU64` stamps behind a shared `&Rule`) so a
//! classifier can make a rule invisible through the same `Arc<Rule>` a
//! concurrent reader might be holding, without requiring `&mut`.
//!
//! Grounded on `storage_engine/snapshot.rs`'s monotonic
//! `SNAPSHOT_VERSION: AtomicU64` counter, generalized from "one stamp
//! per snapshot" to "two stamps per rule."

use crate::conjunction::ConjunctionClause;
use crate::flow::MiniMatch;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque, totally-ordered version stamp (spec.md §4.7). The
/// classifier never interprets these beyond comparison.
pub type Version = u64;

/// Sentinel meaning "never removed" (spec.md §3).
pub const NEVER_REMOVED: Version = u64::MAX;

static NEXT_RULE_ID: AtomicU64 = AtomicU64::new(0);

fn next_rule_id() -> u64 {
    NEXT_RULE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A prioritized, matchable rule.
#[derive(Debug)]
pub struct Rule {
    /// Higher priority wins (spec.md §3).
    pub priority: i64,
    pub matc: MiniMatch,
    pub conjunction: Option<ConjunctionClause>,

    /// Monotonically increasing construction order, used only to break
    /// ties in insertion order (spec.md §4.5's "then by insertion
    /// order"). Not a version stamp.
    pub(crate) insertion_seq: u64,

    added_in: AtomicU64,
    removed_in: AtomicU64,
}

impl Rule {
    pub fn new(priority: i64, matc: MiniMatch) -> Self {
        Rule {
            priority,
            matc,
            conjunction: None,
            insertion_seq: next_rule_id(),
            added_in: AtomicU64::new(0),
            removed_in: AtomicU64::new(NEVER_REMOVED),
        }
    }

    pub fn with_conjunction(mut self, clause: ConjunctionClause) -> Self {
        self.conjunction = Some(clause);
        self
    }

    /// Called once by the classifier at insertion time.
    pub(crate) fn set_added_in(&self, version: Version) {
        self.added_in.store(version, Ordering::Release);
    }

    pub fn added_in(&self) -> Version {
        self.added_in.load(Ordering::Acquire)
    }

    pub fn removed_in(&self) -> Version {
        self.removed_in.load(Ordering::Acquire)
    }

    /// A rule is visible at `version` iff `added_in <= version <
    /// removed_in` (spec.md §3).
    pub fn is_visible_at(&self, version: Version) -> bool {
        self.added_in() <= version && version < self.removed_in()
    }

    /// Whether the rule has ever been visible at any version (used by
    /// `Classifier::remove` to decide between an immediate destroy and
    /// a scheduled one, spec.md §4.1).
    pub fn was_ever_visible(&self, current_version: Version) -> bool {
        self.added_in() <= current_version
    }

    /// `removed_in = version`. Idempotent; only decreasing is legal —
    /// moving `removed_in` later after it has already been set is a
    /// contract violation (spec.md §4.7) and panics rather than
    /// silently reordering visibility.
    pub fn make_invisible_in(&self, version: Version) {
        let prev = self.removed_in.swap(version, Ordering::AcqRel);
        assert!(
            version <= prev,
            "make_invisible_in called with version {version} > existing removed_in {prev}"
        );
    }

    /// Resets `removed_in` to [`NEVER_REMOVED`]. Legal only before any
    /// lookup at a version `>= removed_in` has begun (spec.md §4.7);
    /// the caller is responsible for that external guarantee — this
    /// method cannot observe in-flight lookups and does not attempt to.
    pub fn restore_visibility(&self) {
        self.removed_in.store(NEVER_REMOVED, Ordering::Release);
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.matc == other.matc
    }
}
impl Eq for Rule {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldId;
    use crate::flow::Mask;

    fn rule(priority: i64) -> Rule {
        let mask = Mask::new().with_exact(FieldId::InPort);
        Rule::new(priority, MiniMatch::new(mask).with_value(FieldId::InPort, 1))
    }

    #[test]
    fn visible_between_added_and_removed() {
        let r = rule(10);
        r.set_added_in(5);
        assert!(!r.is_visible_at(4));
        assert!(r.is_visible_at(5));
        assert!(r.is_visible_at(100));
        r.make_invisible_in(10);
        assert!(r.is_visible_at(9));
        assert!(!r.is_visible_at(10));
    }

    #[test]
    #[should_panic]
    fn make_invisible_in_rejects_moving_forward() {
        let r = rule(10);
        r.make_invisible_in(5);
        r.make_invisible_in(6);
    }

    #[test]
    fn restore_visibility_resets_sentinel() {
        let r = rule(10);
        r.make_invisible_in(5);
        r.restore_visibility();
        assert_eq!(r.removed_in(), NEVER_REMOVED);
    }
}
