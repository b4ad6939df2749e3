//! A concurrent, priority-ordered packet/flow classifier.
//!
//! A [`Classifier`] holds a set of prioritized, wildcarded rules and
//! answers "which rule matches this flow, at the highest priority"
//! with one lock-free [`Classifier::lookup`] call per packet. Writers
//! (insert/replace/remove) are serialized against each other but never
//! block a concurrent reader — see `classifier` module docs for the
//! read-copy-update discipline this relies on.
//!
//! ## Pipeline
//! ```text
//! Flow + MiniMatch (flow.rs)
//!     -> Rule, versioned (rule.rs)
//!     -> Subtable, one per distinct mask (subtable.rs)
//!         - staged hash lookup
//!         - per-field prefix trie (trie.rs)
//!         - metadata partition filter (partition.rs)
//!     -> Classifier (classifier.rs) ties subtables, tries, and the
//!        partition index together behind a single published snapshot
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use classifier_core::{Classifier, ClassifierConfig, Flow, Mask, MiniMatch, FieldId, Rule};
//!
//! let config = ClassifierConfig::load()?;
//! let classifier = Classifier::new(&config)?;
//!
//! let mask = Mask::new().with_exact(FieldId::InPort);
//! let matc = MiniMatch::new(mask).with_value(FieldId::InPort, 1);
//! classifier.insert(Rule::new(100, matc), 1)?;
//!
//! let flow = Flow::new().set(FieldId::InPort, 1);
//! if let Some(rule) = classifier.lookup(1, &flow).rule {
//!     println!("matched rule at priority {}", rule.priority);
//! }
//! ```

pub mod classifier;
pub mod conjunction;
pub mod config;
pub mod error;
pub mod field;
pub mod flow;
pub mod iter;
pub mod partition;
pub mod rule;
pub mod subtable;
pub mod trie;

pub use classifier::{Classifier, LookupResult};
pub use conjunction::{ConjunctionClause, ConjunctionTracker};
pub use config::{ClassifierConfig, LoggingConfig};
pub use error::{ClassifierError, Result};
pub use field::FieldId;
pub use flow::{Flow, FlowWildcards, Mask, MiniMatch};
pub use iter::RuleIter;
pub use partition::PartitionIndex;
pub use rule::{Rule, Version, NEVER_REMOVED};
pub use subtable::{MatchHead, Subtable};
pub use trie::{PrefixTrie, TrieSet};

/// Install a `tracing` subscriber from [`LoggingConfig`] (spec.md's
/// ambient logging addendum). Call once, near process start; returns
/// the file-appender guard when `log_dir` is set — drop it only on
/// shutdown, or buffered lines are lost.
///
/// Grounded on the teacher's declared `tracing`/`tracing-subscriber`/
/// `tracing-appender` stack; no `init_tracing` call survived
/// retrieval, so this is an idiomatic fresh setup rather than an
/// adaptation of an existing one.
pub fn init_tracing(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "classifier.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let subscriber = fmt().with_env_filter(filter).with_writer(non_blocking).with_ansi(false);
            match config.format.as_str() {
                "json" => subscriber.json().init(),
                _ => subscriber.init(),
            }
            Some(guard)
        }
        None => {
            let subscriber = fmt().with_env_filter(filter);
            match config.format.as_str() {
                "json" => subscriber.json().init(),
                _ => subscriber.init(),
            }
            None
        }
    }
}
