/// Integration tests for tracker config loading.
///
/// Covers defaults, required field validation, and loading from a file.
use std::io::Write;
use std::time::Duration;

use tracker::config::{ConfigError, load_config_from_path, load_config_from_str};

fn write_config(toml: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("create temp file");
    write!(f, "{toml}").expect("write config");
    f
}

// ---------------------------------------------------------------------------
// Required fields
// ---------------------------------------------------------------------------

#[test]
fn full_config_loads_ok() {
    let cfg = load_config_from_str(
        r#"
schema_version = 1

[server]
url = "wss://tracker.example.com/ws"

[session]
username = "alice"

[reconnect]
max_attempts = 3
delay_ms = 500

[calls]
timeout_ms = 2500
"#,
    )
    .expect("should load");

    assert_eq!(cfg.server.url, "wss://tracker.example.com/ws");
    assert_eq!(cfg.session.username.as_deref(), Some("alice"));
    let transport = cfg.transport();
    assert_eq!(transport.url, "wss://tracker.example.com/ws");
    assert_eq!(transport.max_attempts, 3);
    assert_eq!(transport.reconnect_delay, Duration::from_millis(500));
    assert_eq!(cfg.call_timeout(), Duration::from_millis(2500));
}

#[test]
fn missing_schema_version_fails() {
    let result = load_config_from_str("[server]\nurl = \"ws://localhost:8888\"\n");
    assert!(
        matches!(result, Err(ConfigError::MissingField(ref f)) if f == "schema_version"),
        "got {result:?}"
    );
}

#[test]
fn wrong_schema_version_fails() {
    let result = load_config_from_str("schema_version = 2\n");
    assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let result = load_config_from_str("schema_version = \n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

// ---------------------------------------------------------------------------
// Value validation
// ---------------------------------------------------------------------------

#[test]
fn non_websocket_url_is_rejected() {
    let result = load_config_from_str("schema_version = 1\n[server]\nurl = \"http://localhost:8888\"\n");
    let err = result.expect_err("http url must be rejected");
    assert!(err.to_string().contains("ws://"), "got {err}");
}

#[test]
fn blank_username_is_rejected() {
    let result = load_config_from_str("schema_version = 1\n[session]\nusername = \"  \"\n");
    assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
}

#[test]
fn zero_call_timeout_is_rejected() {
    let result = load_config_from_str("schema_version = 1\n[calls]\ntimeout_ms = 0\n");
    assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
}

#[test]
fn partial_reconnect_section_keeps_other_default() {
    let cfg = load_config_from_str("schema_version = 1\n[reconnect]\nmax_attempts = 0\n").unwrap();
    assert_eq!(cfg.reconnect.max_attempts, 0);
    assert_eq!(cfg.reconnect.delay_ms, 2000);
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[test]
fn loads_from_file() {
    let file = write_config("schema_version = 1\n[session]\nusername = \"bob\"\n");
    let cfg = load_config_from_path(file.path()).expect("should load");
    assert_eq!(cfg.session.username.as_deref(), Some("bob"));
}

#[test]
fn missing_explicit_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_config_from_path(&dir.path().join("nope.toml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
