//! Classifier error types.
//!
//! The error surface is deliberately narrow (spec.md §7): lookup never
//! fails, and the only recoverable failures are a visible duplicate on
//! insert and a configuration request past the field/segment limits.
//! Contract violations (backwards visibility transitions, a
//! `restore_visibility` after a reader may have observed removal) are
//! modeled as panics per spec.md §7 ("implementation may abort"), not
//! as `ClassifierError` variants.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    /// A visible rule with identical (mask, value, priority) already
    /// exists (spec.md §4.1 `insert`).
    #[error("duplicate rule: a visible rule with the same mask, value, and priority already exists")]
    Duplicate,

    /// More than 3 prefix fields or more than 3 staged segments were
    /// requested (spec.md §4.1 `initialize` / `set_prefix_fields`).
    #[error("{what} limit exceeded: requested {requested}, maximum {max}")]
    Limit {
        what: &'static str,
        requested: usize,
        max: usize,
    },
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
