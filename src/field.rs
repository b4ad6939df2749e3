//! Field metadata — the closed capability table standing in for `mf_field`.
//!
//! Real OpenFlow tables reason about dozens of header fields; the core
//! does not need to know anything about a field beyond its width and
//! whether a trie may be built over it. This module is the "one entry
//! per known field" capability table spec.md §9 calls for rather than
//! a polymorphic/dynamic-dispatch field abstraction.

use serde::{Deserialize, Serialize};

/// A packet header field the classifier can match on.
///
/// Variants are closed: adding a field means extending this enum and
/// its metadata table, not implementing a new trait object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum FieldId {
    InPort,
    Metadata,
    DlSrc,
    DlDst,
    DlType,
    NwSrc,
    NwDst,
    NwProto,
    TpSrc,
    TpDst,
}

impl FieldId {
    /// All known fields, in a stable canonical order.
    pub const ALL: [FieldId; 10] = [
        FieldId::InPort,
        FieldId::Metadata,
        FieldId::DlSrc,
        FieldId::DlDst,
        FieldId::DlType,
        FieldId::NwSrc,
        FieldId::NwDst,
        FieldId::NwProto,
        FieldId::TpSrc,
        FieldId::TpDst,
    ];

    /// Width in bits of this field.
    pub const fn width(self) -> u32 {
        match self {
            FieldId::InPort => 32,
            FieldId::Metadata => 64,
            FieldId::DlSrc | FieldId::DlDst => 48,
            FieldId::DlType => 16,
            FieldId::NwSrc | FieldId::NwDst => 32,
            FieldId::NwProto => 8,
            FieldId::TpSrc | FieldId::TpDst => 16,
        }
    }

    /// Whether this field is a legal prefix-trie key (spec.md §4.3 — in
    /// practice, the address-shaped fields).
    pub const fn supports_prefix_trie(self) -> bool {
        matches!(self, FieldId::NwSrc | FieldId::NwDst)
    }

    /// The metadata field used for partition indexing (spec.md §4.4).
    pub const fn is_metadata(self) -> bool {
        matches!(self, FieldId::Metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_are_positive_and_at_most_64_bits() {
        for f in FieldId::ALL {
            assert!(f.width() > 0 && f.width() <= 64);
        }
    }

    #[test]
    fn only_address_fields_support_tries() {
        assert!(FieldId::NwDst.supports_prefix_trie());
        assert!(!FieldId::TpDst.supports_prefix_trie());
    }
}
