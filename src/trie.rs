//! Per-field prefix tries (spec.md §4.3).
//!
//! For a field that supports CIDR-style prefix matching
//! ([`FieldId::supports_prefix_trie`]), the classifier keeps one trie
//! spanning every rule that constrains that field, regardless of which
//! subtable the rule lives in. A lookup walks the relevant tries
//! before it walks subtables at all: if no rule's prefix on this field
//! covers the flow's value past some depth, every subtable whose mask
//! requires a longer prefix can be skipped outright (spec.md §4.6's
//! "trie-assisted subtable skip").
//!
//! Grounded on `oxidecomputer-p4`'s `p4rs::table` longest-prefix-match
//! descent (`lang/p4rs/src/table.rs`), generalized from "match a
//! single LPM table" to "count live rules per subtree so a lookup can
//! prove a negative." Node mutation is behind a `parking_lot::RwLock`
//! rather than lock-free `ArcSwap`-per-node: unlike a subtable's match
//! head, a trie insert/remove touches a path of nodes, not one slot,
//! and publishing that atomically would need a whole-tree clone on
//! every write. A reader-writer lock is the pragmatic middle ground —
//! recorded as an open decision in the design ledger.

use std::sync::Arc;

/// The two depths a trie walk can report (spec.md §4.3). See
/// [`PrefixTrie::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieProbe {
    pub matched_depth: u32,
    pub bits_examined: u32,
}

#[derive(Debug, Default)]
struct TrieNode {
    n_rules: usize,
    children: [Option<Box<TrieNode>>; 2],
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.n_rules == 0 && self.children[0].is_none() && self.children[1].is_none()
    }
}

/// A prefix trie over one field, `width` bits wide.
pub struct PrefixTrie {
    width: u32,
    root: parking_lot::RwLock<TrieNode>,
}

impl PrefixTrie {
    pub fn new(width: u32) -> Self {
        PrefixTrie { width, root: parking_lot::RwLock::new(TrieNode::default()) }
    }

    fn bit(value: u64, width: u32, depth: u32) -> usize {
        ((value >> (width - 1 - depth)) & 1) as usize
    }

    /// Add a rule whose prefix on this field is the top `prefix_len`
    /// bits of `value` (spec.md §4.3 `trie_insert`).
    pub fn insert(&self, value: u64, prefix_len: u32) {
        assert!(prefix_len <= self.width);
        let mut guard = self.root.write();
        Self::insert_rec(&mut guard, value, self.width, prefix_len, 0);
    }

    fn insert_rec(node: &mut TrieNode, value: u64, width: u32, prefix_len: u32, depth: u32) {
        node.n_rules += 1;
        if depth == prefix_len {
            return;
        }
        let b = Self::bit(value, width, depth);
        let child = node.children[b].get_or_insert_with(Box::default);
        Self::insert_rec(child, value, width, prefix_len, depth + 1);
    }

    /// Remove one rule previously inserted with the same `(value,
    /// prefix_len)`, pruning now-empty nodes bottom-up (spec.md §4.3
    /// `trie_remove`).
    pub fn remove(&self, value: u64, prefix_len: u32) {
        assert!(prefix_len <= self.width);
        let mut guard = self.root.write();
        Self::remove_rec(&mut guard, value, self.width, prefix_len, 0);
    }

    fn remove_rec(node: &mut TrieNode, value: u64, width: u32, prefix_len: u32, depth: u32) {
        if depth == prefix_len {
            node.n_rules = node.n_rules.saturating_sub(1);
            return;
        }
        let b = Self::bit(value, width, depth);
        if let Some(child) = node.children[b].as_mut() {
            Self::remove_rec(child, value, width, prefix_len, depth + 1);
            if child.is_empty() {
                node.children[b] = None;
            }
        }
        node.n_rules = node.n_rules.saturating_sub(1);
    }

    /// The deepest prefix depth along `value`'s bit path that still has
    /// a live rule in its subtree. A subtable requiring a prefix longer
    /// than this depth cannot contain a matching rule for `value` and
    /// may be skipped (spec.md §4.6).
    pub fn matched_depth(&self, value: u64) -> u32 {
        self.probe(value).matched_depth
    }

    /// Walk `value`'s bit path, reporting both (a) the deepest live-rule
    /// depth (for the skip decision, see [`PrefixTrie::matched_depth`])
    /// and (b) the number of bits actually tested before the descent
    /// either exhausted the trie's width or hit a node with no further
    /// children (spec.md §4.3's "depth reached" half of the lookup
    /// contract). The two diverge exactly when the descent proves
    /// divergence before reaching any rule-bearing depth: `bits_examined`
    /// bounds how much of `value` a skip decision actually had to look
    /// at, which is narrower than `matched_depth` rounded up to a
    /// subtable's configured prefix length.
    pub fn probe(&self, value: u64) -> TrieProbe {
        let node = self.root.read();
        if node.n_rules == 0 {
            return TrieProbe { matched_depth: 0, bits_examined: 0 };
        }
        let mut depth = 0u32;
        let mut deepest_with_rules = 0u32;
        let mut current = &*node;
        while depth < self.width {
            let b = Self::bit(value, self.width, depth);
            match &current.children[b] {
                Some(child) => {
                    current = &**child;
                    depth += 1;
                    if current.n_rules > 0 {
                        deepest_with_rules = depth;
                    }
                }
                None => {
                    depth += 1;
                    break;
                }
            }
        }
        TrieProbe { matched_depth: deepest_with_rules, bits_examined: depth }
    }

    pub fn is_empty(&self) -> bool {
        self.root.read().is_empty()
    }
}

/// One trie per prefix-capable field the classifier has been
/// configured to index (spec.md §4.1 `set_prefix_fields`, capped at 3).
pub struct TrieSet {
    tries: Vec<(crate::field::FieldId, Arc<PrefixTrie>)>,
}

impl TrieSet {
    pub fn new(fields: &[crate::field::FieldId]) -> Self {
        TrieSet {
            tries: fields.iter().map(|f| (*f, Arc::new(PrefixTrie::new(f.width())))).collect(),
        }
    }

    pub fn get(&self, field: crate::field::FieldId) -> Option<&Arc<PrefixTrie>> {
        self.tries.iter().find(|(f, _)| *f == field).map(|(_, t)| t)
    }

    pub fn fields(&self) -> impl Iterator<Item = crate::field::FieldId> + '_ {
        self.tries.iter().map(|(f, _)| *f)
    }
}
