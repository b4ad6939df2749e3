//! Subtables — the hash table for one distinct mask (spec.md §3, §4.2).
//!
//! Grounded on `hash_index.rs`'s `HashIndexManager` layering (a
//! `HashMap` of per-key indices, each itself a `HashMap` plus a
//! probabilistic pre-filter), generalized from "one hash map keyed by
//! a join column subset" to "one hash map per staged field-range
//! prefix, the last of which is the full-mask lookup." The concurrent
//! map primitive spec.md §6 asks for is `dashmap`, used directly.

use crate::field::FieldId;
use crate::flow::{Flow, FlowWildcards, Mask};
use crate::rule::{Rule, Version};
use arc_swap::ArcSwap;
use dashmap::{DashMap, DashSet};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A priority-descending chain of rules whose match coincides exactly
/// (spec.md §3 "Match head"). Only the head is indexed by the primary
/// hash map; the chain links duplicates by (mask, value).
///
/// The chain itself is published via `ArcSwap` rather than locked:
/// readers load a snapshot `Arc<Vec<Arc<Rule>>>` and walk it without
/// ever blocking the writer, matching spec.md §5's "readers do not
/// take locks."
pub struct MatchHead {
    chain: ArcSwap<Vec<Arc<Rule>>>,
}

impl MatchHead {
    fn new(rule: Arc<Rule>) -> Self {
        MatchHead { chain: ArcSwap::from_pointee(vec![rule]) }
    }

    /// Insert `rule` into the priority-descending chain. Rejects a
    /// visible duplicate at the same priority (spec.md §7).
    fn insert(&self, rule: Arc<Rule>, version: Version) -> Result<(), ()> {
        let current = self.chain.load();
        if current
            .iter()
            .any(|r| r.priority == rule.priority && r.is_visible_at(version))
        {
            return Err(());
        }
        let mut next: Vec<Arc<Rule>> = current.iter().cloned().collect();
        next.push(rule);
        next.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.insertion_seq.cmp(&b.insertion_seq)));
        self.chain.store(Arc::new(next));
        Ok(())
    }

    fn remove(&self, rule: &Arc<Rule>) -> usize {
        let current = self.chain.load();
        let next: Vec<Arc<Rule>> = current
            .iter()
            .filter(|r| !Arc::ptr_eq(r, rule))
            .cloned()
            .collect();
        let remaining = next.len();
        self.chain.store(Arc::new(next));
        remaining
    }

    /// The priority-descending chain, as of this call.
    pub fn chain(&self) -> Arc<Vec<Arc<Rule>>> {
        self.chain.load_full()
    }
}

/// One stage of the staged-lookup plan: the cumulative set of fields
/// examined by this stage and every stage before it (spec.md §4.2
/// "segment plan").
#[derive(Debug, Clone)]
struct Stage {
    fields: Vec<FieldId>,
}

fn hash_fields(flow_values: impl Iterator<Item = u64>) -> u64 {
    let mut h = DefaultHasher::new();
    for v in flow_values {
        v.hash(&mut h);
    }
    h.finish()
}

/// Split `constrained_fields` (already in canonical [`FieldId`] order)
/// into cumulative stages at the points where a configured boundary
/// field falls, per spec.md §4.2. The final stage always covers every
/// constrained field.
fn build_stage_plan(constrained_fields: &[FieldId], boundaries: &[FieldId]) -> Vec<Stage> {
    if boundaries.is_empty() || constrained_fields.is_empty() {
        return vec![Stage { fields: constrained_fields.to_vec() }];
    }
    let mut cut_indices: Vec<usize> = boundaries
        .iter()
        .filter_map(|b| constrained_fields.iter().position(|f| f == b))
        .collect();
    cut_indices.sort_unstable();
    cut_indices.dedup();

    let mut stages = Vec::new();
    for &cut in &cut_indices {
        let prefix: Vec<FieldId> = constrained_fields[..=cut].to_vec();
        if stages.last().map(|s: &Stage| &s.fields) != Some(&prefix) {
            stages.push(Stage { fields: prefix });
        }
    }
    if stages.last().map(|s| s.fields.len()) != Some(constrained_fields.len()) {
        stages.push(Stage { fields: constrained_fields.to_vec() });
    }
    stages
}

/// All rules sharing a single mask (spec.md §3 "Subtable").
pub struct Subtable {
    pub mask: Mask,
    pub fingerprint: u64,
    /// 64-bit partition filter tag (spec.md §4.2).
    pub tag: u64,

    stages: Vec<Stage>,
    /// One `DashSet` per non-final stage: existence-only index of
    /// stage-prefix hashes that have at least one live head.
    stage_indices: Vec<DashSet<u64>>,
    /// The final stage: full-mask hash -> match head.
    heads: DashMap<u64, Arc<MatchHead>>,

    rules: parking_lot::Mutex<Vec<Arc<Rule>>>,
    max_priority: AtomicI64,
}

impl Subtable {
    pub fn new(mask: Mask, flow_segments: &[FieldId]) -> Self {
        let constrained = mask.constrained_fields();
        let stages = build_stage_plan(&constrained, flow_segments);
        let stage_indices = (0..stages.len().saturating_sub(1)).map(|_| DashSet::new()).collect();
        Subtable {
            fingerprint: mask.fingerprint(),
            tag: compute_tag(&mask),
            mask,
            stages,
            stage_indices,
            heads: DashMap::new(),
            rules: parking_lot::Mutex::new(Vec::new()),
            max_priority: AtomicI64::new(i64::MIN),
        }
    }

    pub fn max_priority(&self) -> i64 {
        self.max_priority.load(Ordering::Acquire)
    }

    fn recompute_max_priority(&self) {
        let rules = self.rules.lock();
        let max = rules.iter().map(|r| r.priority).max().unwrap_or(i64::MIN);
        self.max_priority.store(max, Ordering::Release);
    }

    fn value_fingerprint(&self, rule: &Rule) -> u64 {
        hash_fields(self.mask.constrained_fields().iter().map(|f| rule.matc.value_for(*f)))
    }

    fn stage_key(&self, stage: &Stage, rule: &Rule) -> u64 {
        hash_fields(stage.fields.iter().map(|f| rule.matc.value_for(*f)))
    }

    /// Insert `rule` (spec.md §4.2 `find_or_insert`). Returns `Err(())`
    /// on a visible duplicate (same mask, value, priority).
    pub fn find_or_insert(&self, rule: Arc<Rule>, version: Version) -> Result<(), ()> {
        let fp = self.value_fingerprint(&rule);
        let result = match self.heads.get(&fp) {
            Some(head) => head.insert(Arc::clone(&rule), version),
            None => {
                self.heads.insert(fp, Arc::new(MatchHead::new(Arc::clone(&rule))));
                Ok(())
            }
        };
        if result.is_err() {
            return result;
        }
        for (idx, stage) in self.stages[..self.stages.len().saturating_sub(1)].iter().enumerate() {
            self.stage_indices[idx].insert(self.stage_key(stage, &rule));
        }
        self.rules.lock().push(rule);
        self.recompute_max_priority();
        Ok(())
    }

    /// Unlink `rule` (spec.md §4.2 `remove`). Returns `true` if the
    /// subtable is now empty and should be destroyed.
    pub fn remove(&self, rule: &Arc<Rule>) -> bool {
        let fp = self.value_fingerprint(rule);
        let mut head_emptied = false;
        if let Some(head) = self.heads.get(&fp) {
            if head.remove(rule) == 0 {
                head_emptied = true;
            }
        }
        if head_emptied {
            self.heads.remove(&fp);
            // Stage indices are existence-only and shared across
            // heads that happen to collide on a prefix; rebuilding
            // them from the remaining heads keeps pruning correct
            // without per-key refcounting.
            self.rebuild_stage_indices_excluding(fp);
        }
        self.rules.lock().retain(|r| !Arc::ptr_eq(r, rule));
        self.recompute_max_priority();
        self.rules.lock().is_empty()
    }

    fn rebuild_stage_indices_excluding(&self, removed_fp: u64) {
        for set in &self.stage_indices {
            set.clear();
        }
        for entry in self.heads.iter() {
            if *entry.key() == removed_fp {
                continue;
            }
            if let Some(rule) = entry.value().chain().first().cloned() {
                for (idx, stage) in
                    self.stages[..self.stages.len().saturating_sub(1)].iter().enumerate()
                {
                    self.stage_indices[idx].insert(self.stage_key(stage, &rule));
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.lock().is_empty()
    }

    pub fn rules_snapshot(&self) -> Vec<Arc<Rule>> {
        self.rules.lock().clone()
    }

    /// Walk the staged plan for `flow`, OR-ing examined bits into
    /// `wildcards` as we go (spec.md §4.6). Returns the final match
    /// head if every stage matched.
    pub fn staged_lookup(&self, flow: &Flow, wildcards: &mut FlowWildcards) -> Option<Arc<MatchHead>> {
        let last = self.stages.len() - 1;
        for (idx, stage) in self.stages.iter().enumerate() {
            let key = hash_fields(stage.fields.iter().map(|f| flow.get(*f)));
            let hit = if idx == last {
                self.heads.contains_key(&key)
            } else {
                self.stage_indices[idx].contains(&key)
            };
            for field in &stage.fields {
                wildcards.add(*field, self.mask.bits_for(*field));
            }
            if !hit {
                return None;
            }
            if idx == last {
                return self.heads.get(&key).map(|e| Arc::clone(e.value()));
            }
        }
        None
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }
}

/// Derive a subtable's partition tag: two independent hashes of the
/// mask restricted to the metadata field, each setting one bit of a
/// 64-bit bitmap (spec.md §4.2 — "approximately two bits set").
/// Grounded on `bloom_filter.rs`'s documented double-hashing scheme
/// `h_i(x) = h1(x) + i * h2(x) mod m`, instantiated at `k = 2`, `m = 64`.
/// A mask that does not constrain the metadata field gets the
/// universal (all-ones) tag, so it is never skipped (spec.md §4.4).
fn compute_tag(mask: &Mask) -> u64 {
    let metadata_bits = mask.bits_for(FieldId::Metadata);
    if metadata_bits == 0 {
        return u64::MAX;
    }
    let mut h1 = DefaultHasher::new();
    "tag-h1".hash(&mut h1);
    metadata_bits.hash(&mut h1);
    let h1 = h1.finish();

    let mut h2 = DefaultHasher::new();
    "tag-h2".hash(&mut h2);
    metadata_bits.hash(&mut h2);
    let h2 = h2.finish();

    let bit_a = h1 % 64;
    let bit_b = h2 % 64;
    (1u64 << bit_a) | (1u64 << bit_b)
}
