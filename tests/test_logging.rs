//! Tests for logging configuration and format parsing
//!
//! Covers the pure parsing helpers used when logging is configured from
//! environment variables.

use dunebugger_starter::observability::logging::{init_logging, parse_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
    assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Unknown formats fall back to machine-readable output
    for input in ["invalid", "", "xml", "yaml", "123", " pretty "] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input {input:?}");
    }
}

#[test]
fn test_parse_level_known_names() {
    assert_eq!(parse_level("ERROR", Level::INFO), Level::ERROR);
    assert_eq!(parse_level("warn", Level::INFO), Level::WARN);
    assert_eq!(parse_level("Info", Level::DEBUG), Level::INFO);
    assert_eq!(parse_level("debug", Level::INFO), Level::DEBUG);
    assert_eq!(parse_level("trace", Level::INFO), Level::TRACE);
}

#[test]
fn test_parse_level_unknown_uses_default() {
    assert_eq!(parse_level("loud", Level::INFO), Level::INFO);
    assert_eq!(parse_level("", Level::DEBUG), Level::DEBUG);
    assert_eq!(parse_level("WARNING", Level::ERROR), Level::ERROR);
}

#[test]
fn test_repeated_initialization_is_harmless() {
    init_logging(Level::INFO, LogFormat::Json, false);
    init_logging(Level::TRACE, LogFormat::Pretty, true);
    tracing::info!("still logging");
}
