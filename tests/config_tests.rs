//! Configuration loading from an on-disk TOML file.

use classifier_core::ClassifierConfig;
use std::io::Write;

#[test]
fn from_file_loads_segments_and_prefix_fields() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        r#"
        flow_segments = ["Metadata", "NwDst"]
        prefix_fields = ["NwDst"]

        [logging]
        level = "debug"
        format = "json"
        "#
    )
    .unwrap();

    let config = ClassifierConfig::from_file(file.path().to_str().unwrap()).expect("load config");
    assert_eq!(config.flow_segments.len(), 2);
    assert_eq!(config.prefix_fields.len(), 1);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "json");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let config = ClassifierConfig::from_file("/nonexistent/classifier.toml").expect("figment tolerates a missing file");
    assert!(config.flow_segments.is_empty());
    assert_eq!(config.logging.level, "info");
}
