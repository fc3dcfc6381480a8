use comex_core::errors::{ComexError, ErrorInfo};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("path", "/tmp/archive")
        .with_context("reason", "example")
}

#[test]
fn config_error_surface() {
    let err = ComexError::Config(sample_info("archive.base_path_missing", "no such dir"));
    assert_eq!(err.info().code, "archive.base_path_missing");
    assert!(err.info().context.contains_key("path"));
    assert!(err.is_config());
}

#[test]
fn parameter_and_attribute_errors_are_distinct() {
    let missing = ComexError::Parameter(sample_info("parameter.missing", "no X"));
    let attribute = ComexError::Attribute(sample_info("parameter.not_a_parameter", "lower"));
    assert_ne!(missing, attribute);
    assert!(matches!(missing, ComexError::Parameter(_)));
    assert!(matches!(attribute, ComexError::Attribute(_)));
}

#[test]
fn display_includes_context_and_hint() {
    let err = ComexError::Archive(
        ErrorInfo::new("archive.collision", "archive folder already exists")
            .with_context("path", "/tmp/a")
            .with_hint("retry the run"),
    );
    let text = err.to_string();
    assert!(text.starts_with("archive error: archive folder already exists"));
    assert!(text.contains("path=/tmp/a"));
    assert!(text.contains("hint: retry the run"));
}

#[test]
fn errors_roundtrip_through_json() {
    let err = ComexError::Compose(sample_info("compose.module_missing", "not registered"));
    let json = serde_json::to_string(&err).expect("serialize");
    assert!(json.contains("\"family\":\"Compose\""));
    let parsed: ComexError = serde_json::from_str(&json).expect("parse");
    assert_eq!(parsed, err);
}
