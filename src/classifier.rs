//! The classifier container (spec.md §4.1).
//!
//! Grounded on `storage_engine/snapshot.rs`'s `ArcSwap`-published
//! snapshot pattern (a writer builds a new immutable version and swaps
//! a pointer to it; readers load the current pointer without ever
//! blocking) and `catalog.rs`'s container-of-named-things shape,
//! generalized from "one map of named tables" to "one map of subtables
//! plus the per-field tries and metadata partition that accelerate
//! lookups across it."
//!
//! Writers are serialized through a single `parking_lot::Mutex`, the
//! same convenience primitive the teacher reaches for around its
//! bookkeeping maps — this crate has exactly one writer at a time by
//! contract (spec.md §5), so the mutex is bookkeeping, not contention
//! control. Removal is two-phase: `remove` stamps a rule invisible
//! immediately (so no future lookup will select it) but leaves it
//! linked into its subtable, trie, and partition entries until the
//! classifier can prove quiescence — no lookup that started before the
//! removal is still in flight — at which point it drains the deferred
//! queue and unlinks for real. This mirrors the read-copy-update
//! discipline spec.md §5 describes, carried over a `crossbeam_channel`
//! queue instead of a kernel epoch.
//!
//! Separately, `defer`/`publish` toggle a `publish_enabled` mode bit
//! (spec.md §4.1, §4.7): while it's clear, a mutation that would
//! otherwise re-sort and republish the priority-ordered subtable vector
//! leaves the previously published snapshot in place, so a caller
//! bulk-loading many rules pays for exactly one re-sort instead of one
//! per rule, and concurrent readers see one consistent ordering
//! throughout the batch rather than N transient ones.

use crate::config::ClassifierConfig;
use crate::conjunction::ConjunctionTracker;
use crate::error::{ClassifierError, Result};
use crate::field::FieldId;
use crate::flow::{prefix_mask, Flow, FlowWildcards, Mask, MiniMatch};
use crate::iter::RuleIter;
use crate::partition::PartitionIndex;
use crate::rule::{Rule, Version};
use crate::subtable::Subtable;
use crate::trie::TrieSet;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

const MAX_PREFIX_FIELDS: usize = 3;
const MAX_FLOW_SEGMENTS: usize = 3;

struct DeferredRemoval {
    subtable_fingerprint: u64,
    rule: Arc<Rule>,
    metadata_value: Option<u64>,
    tag: u64,
    trie_contributions: Vec<(FieldId, u64, u32)>,
}

/// RAII marker for an in-flight lookup; its `Drop` is the other half
/// of the quiescence check `publish` performs.
struct ReaderGuard<'a> {
    active: &'a AtomicU64,
}

impl<'a> ReaderGuard<'a> {
    fn enter(active: &'a AtomicU64) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        ReaderGuard { active }
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The result of a [`Classifier::lookup`] (spec.md §4.6
/// `lookup(version, flow) -> (rule?, wildcards)`). `wildcards` is
/// populated even on a miss: it reports every bit the lookup actually
/// had to examine to prove no rule matches.
pub struct LookupResult {
    pub rule: Option<Arc<Rule>>,
    pub wildcards: FlowWildcards,
}

pub struct Classifier {
    write_lock: parking_lot::Mutex<()>,
    /// High-water mark over every version a caller has ever passed to
    /// `insert`/`replace`; used only to pick a `removed_in` stamp for
    /// `remove`, which — unlike `insert`/`lookup` — has no caller-
    /// supplied version in its spec.md §4.1 signature.
    version: AtomicU64,
    active_readers: AtomicU64,
    /// Spec.md §4.1/§4.7 `defer`/`publish` mode bit. `true` (the
    /// default) means every mutation that changes a subtable's
    /// priority republishes the subtable order immediately; `false`
    /// suppresses that until the next `publish()`.
    publish_enabled: AtomicBool,

    subtables: DashMap<u64, Arc<Subtable>>,
    published_order: ArcSwap<Vec<Arc<Subtable>>>,
    partition: PartitionIndex,
    tries: parking_lot::RwLock<TrieSet>,
    flow_segments: parking_lot::Mutex<Vec<FieldId>>,
    rule_count: AtomicI64,

    deferred_tx: crossbeam_channel::Sender<DeferredRemoval>,
    deferred_rx: crossbeam_channel::Receiver<DeferredRemoval>,
}

impl Classifier {
    /// Build a classifier from a loaded configuration (spec.md §4.1
    /// `initialize`).
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        if config.prefix_fields.len() > MAX_PREFIX_FIELDS {
            return Err(ClassifierError::Limit {
                what: "prefix fields",
                requested: config.prefix_fields.len(),
                max: MAX_PREFIX_FIELDS,
            });
        }
        if config.flow_segments.len() > MAX_FLOW_SEGMENTS {
            return Err(ClassifierError::Limit {
                what: "flow segments",
                requested: config.flow_segments.len(),
                max: MAX_FLOW_SEGMENTS,
            });
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        Ok(Classifier {
            write_lock: parking_lot::Mutex::new(()),
            version: AtomicU64::new(0),
            active_readers: AtomicU64::new(0),
            publish_enabled: AtomicBool::new(true),
            subtables: DashMap::new(),
            published_order: ArcSwap::from_pointee(Vec::new()),
            partition: PartitionIndex::new(),
            tries: parking_lot::RwLock::new(TrieSet::new(&config.prefix_fields)),
            flow_segments: parking_lot::Mutex::new(config.flow_segments.clone()),
            rule_count: AtomicI64::new(0),
            deferred_tx: tx,
            deferred_rx: rx,
        })
    }

    /// Tear the classifier down. Rust's ownership model makes teardown
    /// automatic (every `Arc` is dropped when its last reference
    /// goes away); this exists only to give callers an explicit point
    /// symmetrical with `initialize` (spec.md §4.1 `destroy`).
    pub fn destroy(self) {
        drop(self);
    }

    /// Reconfigure which fields get a prefix trie. Rebuilds the tries
    /// from scratch against every currently visible rule (spec.md §4.1
    /// `set_prefix_fields`).
    pub fn set_prefix_fields(&self, fields: &[FieldId]) -> Result<()> {
        if fields.len() > MAX_PREFIX_FIELDS {
            return Err(ClassifierError::Limit {
                what: "prefix fields",
                requested: fields.len(),
                max: MAX_PREFIX_FIELDS,
            });
        }
        let _guard = self.write_lock.lock();
        let fresh = TrieSet::new(fields);
        let version = self.version.load(Ordering::Acquire);
        for entry in self.subtables.iter() {
            for rule in entry.value().rules_snapshot() {
                if !rule.is_visible_at(version) {
                    continue;
                }
                for (field, value, prefix_len) in trie_contributions(&fresh, &rule.matc) {
                    if let Some(trie) = fresh.get(field) {
                        trie.insert(value, prefix_len);
                    }
                }
            }
        }
        *self.tries.write() = fresh;
        Ok(())
    }

    /// `remove` has no caller-supplied version (spec.md §4.1); it needs
    /// one strictly past every version any rule could already be
    /// visible at, so it bumps the high-water mark instead.
    fn bump_version(&self) -> Version {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Track the highest version a caller has ever chosen, so a later
    /// `remove`'s internal bump always lands past it (spec.md §4.7:
    /// version numbers are chosen by the caller, not derived here).
    fn advance_version(&self, version: Version) {
        self.version.fetch_max(version, Ordering::AcqRel);
    }

    fn subtable_for(&self, mask: &Mask) -> Arc<Subtable> {
        let fp = mask.fingerprint();
        if let Some(existing) = self.subtables.get(&fp) {
            return Arc::clone(existing.value());
        }
        let segments = self.flow_segments.lock().clone();
        let created = Arc::new(Subtable::new(mask.clone(), &segments));
        debug!(fingerprint = fp, "creating subtable");
        self.subtables.insert(fp, Arc::clone(&created));
        created
    }

    fn republish_order(&self) {
        let mut all: Vec<Arc<Subtable>> = self.subtables.iter().map(|e| Arc::clone(e.value())).collect();
        all.sort_by(|a, b| b.max_priority().cmp(&a.max_priority()));
        self.published_order.store(Arc::new(all));
    }

    /// Insert a new rule at the caller-chosen `version` (spec.md §4.1
    /// `insert(rule, version, conjunctions)` — `conjunctions` travels
    /// on the rule itself via [`Rule::with_conjunction`]). Fails with
    /// [`ClassifierError::Duplicate`] if a visible rule already shares
    /// this rule's mask, value, and priority. Observable to lookups at
    /// `version` and later, once published (spec.md §4.7).
    pub fn insert(&self, rule: Rule, version: Version) -> Result<Arc<Rule>> {
        let _guard = self.write_lock.lock();
        self.advance_version(version);
        rule.set_added_in(version);
        let rule = Arc::new(rule);

        let subtable = self.subtable_for(&rule.matc.mask);
        subtable.find_or_insert(Arc::clone(&rule), version).map_err(|_| {
            debug!(priority = rule.priority, "rejecting duplicate rule");
            ClassifierError::Duplicate
        })?;

        let metadata_value = metadata_value_of(&rule.matc);
        self.partition.add(metadata_value, subtable.tag);

        let tries = self.tries.read();
        for (field, value, prefix_len) in trie_contributions(&tries, &rule.matc) {
            if let Some(trie) = tries.get(field) {
                trie.insert(value, prefix_len);
            }
        }
        drop(tries);

        if self.publish_enabled.load(Ordering::Acquire) {
            self.republish_order();
        }
        self.rule_count.fetch_add(1, Ordering::AcqRel);
        Ok(rule)
    }

    /// Insert `rule` at `version`, replacing any rule visible at
    /// `version` with the same mask, value, and priority instead of
    /// failing (spec.md §4.1 `replace(rule, version, conjunctions)`).
    /// Returns the new rule and the displaced one, if any. Unsafe under
    /// versioning — see DESIGN.md's Open Question 1.
    pub fn replace(&self, rule: Rule, version: Version) -> Result<(Arc<Rule>, Option<Arc<Rule>>)> {
        let subtable = self.subtable_for(&rule.matc.mask);
        let displaced = subtable
            .rules_snapshot()
            .into_iter()
            .find(|r| r.priority == rule.priority && r.matc == rule.matc && r.is_visible_at(version));

        if let Some(old) = &displaced {
            self.remove(old);
        }
        let new_rule = self.insert(rule, version)?;
        Ok((new_rule, displaced))
    }

    /// Stamp `rule` invisible and schedule its physical unlinking
    /// (spec.md §4.1 `remove`, §4.7). Visible to no future lookup
    /// immediately; unlinked from its subtable once quiescent.
    pub fn remove(&self, rule: &Arc<Rule>) {
        let _guard = self.write_lock.lock();
        let new_version = self.bump_version();
        rule.make_invisible_in(new_version);

        trace!(version = new_version, "scheduling rule for deferred reclamation");
        self.schedule_removal(Arc::clone(rule));
        self.rule_count.fetch_sub(1, Ordering::AcqRel);

        self.drain_deferred_and_republish();
    }

    /// Explicitly queue a rule for deferred physical removal without
    /// touching its visibility — used when a caller has already
    /// stamped `removed_in` itself.
    pub fn schedule_removal(&self, rule: Arc<Rule>) {
        let subtable = self.subtable_for(&rule.matc.mask);
        let tries = self.tries.read();
        let contributions = trie_contributions(&tries, &rule.matc);
        drop(tries);
        trace!("scheduling externally-invisible rule for deferred reclamation");
        self.deferred_tx
            .send(DeferredRemoval {
                subtable_fingerprint: subtable.fingerprint,
                metadata_value: metadata_value_of(&rule.matc),
                tag: subtable.tag,
                trie_contributions: contributions,
                rule,
            })
            .expect("deferred-removal receiver outlives every sender clone");
    }

    /// Clear the publish-enabled bit (spec.md §4.1/§4.7 `defer`): until
    /// `publish()`, a mutation that changes a subtable's max priority
    /// does not re-sort or republish the subtable vector, so concurrent
    /// lookups keep observing the snapshot from before this call.
    pub fn defer(&self) {
        self.publish_enabled.store(false, Ordering::Release);
    }

    /// Re-enable republishing and finalize the subtable order in one
    /// pass (spec.md §4.1 `publish`). Also drains every deferred
    /// removal if no lookup is currently in flight; a no-op on that
    /// front under concurrent readers, since the next `publish` retries.
    pub fn publish(&self) {
        self.publish_enabled.store(true, Ordering::Release);
        self.drain_deferred_and_republish();
    }

    /// If no lookup is currently in flight, drain every deferred
    /// removal and unlink it for real, then republish the subtable
    /// order if the publish-enabled bit is set. Shared by `remove`
    /// (which never flips the mode bit) and `publish` (which does).
    fn drain_deferred_and_republish(&self) {
        if self.active_readers.load(Ordering::Acquire) != 0 {
            return;
        }
        trace!("quiescent: draining deferred removals");
        let mut drained = 0u32;
        while let Ok(deferred) = self.deferred_rx.try_recv() {
            self.finalize_removal(deferred);
            drained += 1;
        }
        if self.publish_enabled.load(Ordering::Acquire) {
            self.republish_order();
        }
        trace!(drained, "drain: done");
    }

    fn finalize_removal(&self, deferred: DeferredRemoval) {
        let emptied = match self.subtables.get(&deferred.subtable_fingerprint) {
            Some(subtable) => subtable.remove(&deferred.rule),
            None => false,
        };
        if emptied {
            debug!(fingerprint = deferred.subtable_fingerprint, "destroying empty subtable");
            self.subtables.remove(&deferred.subtable_fingerprint);
        }
        self.partition.remove(deferred.metadata_value, deferred.tag);
        let tries = self.tries.read();
        for (field, value, prefix_len) in deferred.trie_contributions {
            if let Some(trie) = tries.get(field) {
                trie.remove(value, prefix_len);
            }
        }
    }

    /// Classify `flow` as of `version`, returning the highest-priority
    /// rule visible at that version whose match agrees with it, plus
    /// every bit actually examined along the way (spec.md §4.6
    /// `lookup(version, flow) -> (rule?, wildcards)`). Never fails: "no
    /// match" is `rule: None`, not an error.
    pub fn lookup(&self, version: Version, flow: &Flow) -> LookupResult {
        let _reader = ReaderGuard::enter(&self.active_readers);
        let metadata_value = flow.get(FieldId::Metadata);

        let mut wildcards = FlowWildcards::none();
        let mut best: Option<Arc<Rule>> = None;
        let mut best_priority = i64::MIN;
        let mut conjunctions = ConjunctionTracker::new();

        let tries = self.tries.read();
        let order = self.published_order.load();
        for subtable in order.iter() {
            if subtable.max_priority() <= best_priority {
                break;
            }
            if !self.partition.may_contain(metadata_value, subtable.tag) {
                continue;
            }
            if trie_assisted_skip(&tries, subtable, flow, &mut wildcards) {
                continue;
            }

            let Some(head) = subtable.staged_lookup(flow, &mut wildcards) else { continue };
            for rule in head.chain().iter() {
                if !rule.is_visible_at(version) {
                    continue;
                }
                if rule.priority <= best_priority {
                    break;
                }
                match rule.conjunction {
                    Some(clause) => {
                        if conjunctions.observe(clause, rule.priority) {
                            best = Some(Arc::clone(rule));
                            best_priority = rule.priority;
                        }
                    }
                    None => {
                        best = Some(Arc::clone(rule));
                        best_priority = rule.priority;
                        break;
                    }
                }
            }
        }

        LookupResult { rule: best, wildcards }
    }

    pub fn count(&self) -> usize {
        self.rule_count.load(Ordering::Acquire).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// A lockless snapshot cursor over every currently visible rule,
    /// optionally narrowed to only the subtables a `target` match could
    /// possibly match against (spec.md §4.8): a subtable whose mask is
    /// strictly stricter than `target`'s can hold no rule `target`
    /// itself would ever match, so it's skipped wholesale rather than
    /// walked and filtered.
    pub fn iterate(&self, target: Option<&MiniMatch>) -> RuleIter {
        let version = self.version.load(Ordering::Acquire);
        let mut rules: Vec<Arc<Rule>> = self
            .subtables
            .iter()
            .filter(|e| match target {
                Some(t) => mask_is_loose_or_equal(&e.value().mask, &t.mask),
                None => true,
            })
            .flat_map(|e| e.value().rules_snapshot())
            .filter(|r| r.is_visible_at(version))
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleIter::new(rules)
    }

    /// The visible rule with exactly this match and priority, if any
    /// (spec.md §4.1 `find_exactly`).
    pub fn find_exactly(&self, matc: &MiniMatch, priority: i64) -> Option<Arc<Rule>> {
        let version = self.version.load(Ordering::Acquire);
        let fp = matc.mask.fingerprint();
        self.subtables.get(&fp).and_then(|subtable| {
            subtable
                .rules_snapshot()
                .into_iter()
                .find(|r| r.priority == priority && &r.matc == matc && r.is_visible_at(version))
        })
    }

    /// Whether any visible rule's match overlaps `matc` — shares at
    /// least one concrete flow in common (spec.md §4.1 `overlaps`).
    pub fn overlaps(&self, matc: &MiniMatch) -> bool {
        let version = self.version.load(Ordering::Acquire);
        self.subtables.iter().any(|entry| {
            entry
                .value()
                .rules_snapshot()
                .iter()
                .any(|r| r.is_visible_at(version) && masks_overlap(&r.matc, matc))
        })
    }
}

fn metadata_value_of(matc: &MiniMatch) -> Option<u64> {
    if matc.mask.bits_for(FieldId::Metadata) != 0 {
        Some(matc.value_for(FieldId::Metadata))
    } else {
        None
    }
}

fn trie_contributions(tries: &TrieSet, matc: &MiniMatch) -> Vec<(FieldId, u64, u32)> {
    tries
        .fields()
        .filter(|f| matc.mask.bits_for(*f) != 0)
        .map(|f| (f, matc.value_for(f), matc.mask.prefix_len(f)))
        .collect()
}

/// Whether a subtable can be proven unreachable for `flow` using only
/// the trie(s) covering fields it constrains by prefix (spec.md §4.6
/// "trie-assisted subtable skip"). On a skip, only the bits the trie
/// walk actually examined before proving divergence are OR-ed into
/// `wildcards` — not the subtable's full configured prefix width, which
/// would overstate how much of the flow this skip depended on (spec.md
/// §8.3). When the trie instead confirms a long-enough prefix exists,
/// the subtable must still be probed for real, so the full configured
/// prefix bits are added — the staged lookup will examine exactly that
/// many regardless of outcome.
fn trie_assisted_skip(
    tries: &TrieSet,
    subtable: &Subtable,
    flow: &Flow,
    wildcards: &mut FlowWildcards,
) -> bool {
    let mut skip = false;
    for field in tries.fields() {
        let needed = subtable.mask.prefix_len(field);
        if needed == 0 {
            continue;
        }
        let Some(trie) = tries.get(field) else { continue };
        let probe = trie.probe(flow.get(field));
        if probe.matched_depth < needed {
            skip = true;
            wildcards.add(field, prefix_mask(field.width(), probe.bits_examined));
        } else {
            wildcards.add(field, subtable.mask.bits_for(field));
        }
    }
    skip
}

fn masks_overlap(a: &MiniMatch, b: &MiniMatch) -> bool {
    FieldId::ALL.iter().all(|field| {
        let ab = a.mask.bits_for(*field);
        let bb = b.mask.bits_for(*field);
        let shared = ab & bb;
        if shared == 0 {
            true
        } else {
            (a.value_for(*field) & shared) == (b.value_for(*field) & shared)
        }
    })
}

/// Whether `subtable_mask` constrains no more than `target_mask` does,
/// field by field — i.e. `subtable_mask` is "looser or equal" (spec.md
/// §4.8). A subtable stricter than the target on any field can hold no
/// rule the target itself would ever match.
fn mask_is_loose_or_equal(subtable_mask: &Mask, target_mask: &Mask) -> bool {
    FieldId::ALL.iter().all(|field| {
        let sub_bits = subtable_mask.bits_for(*field);
        let target_bits = target_mask.bits_for(*field);
        (sub_bits & !target_bits) == 0
    })
}
