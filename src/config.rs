//! Configuration
//!
//! Provides hierarchical configuration loading from:
//! - classifier.toml (default configuration)
//! - classifier.local.toml (git-ignored local overrides)
//! - Environment variables (`CLASSIFIER_*` prefix)
//!
//! ## Example
//!
//! ```toml
//! # classifier.toml
//! flow_segments = ["Metadata", "DlDst", "NwDst"]
//! prefix_fields = ["NwDst"]
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! CLASSIFIER_LOGGING__LEVEL=debug
//! ```

use crate::field::FieldId;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level classifier configuration.
///
/// `flow_segments` and `prefix_fields` are the two constructor
/// parameters spec.md §4.1 exposes (`initialize`/`set_prefix_fields`);
/// everything else is ambient (logging).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Field-range boundaries for staged lookup (0..=3 entries).
    #[serde(default)]
    pub flow_segments: Vec<FieldId>,

    /// Fields to maintain prefix tries over (0..=3 entries).
    #[serde(default)]
    pub prefix_fields: Vec<FieldId>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory to roll daily log files into. `None` logs to stderr.
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            flow_segments: Vec::new(),
            prefix_fields: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClassifierConfig {
    /// Load configuration from the default locations.
    ///
    /// Merges in order:
    /// 1. `classifier.toml` (base configuration)
    /// 2. `classifier.local.toml` (local overrides, git-ignored)
    /// 3. Environment variables (`CLASSIFIER_*` prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("classifier.toml"))
            .merge(Toml::file("classifier.local.toml"))
            .merge(Env::prefixed("CLASSIFIER_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CLASSIFIER_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_segments_or_tries() {
        let config = ClassifierConfig::default();
        assert!(config.flow_segments.is_empty());
        assert!(config.prefix_fields.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = ClassifierConfig {
            flow_segments: vec![FieldId::Metadata, FieldId::NwDst],
            prefix_fields: vec![FieldId::NwDst],
            logging: LoggingConfig::default(),
        };
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("flow_segments"));
        let parsed: ClassifierConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.prefix_fields, config.prefix_fields);
    }
}
