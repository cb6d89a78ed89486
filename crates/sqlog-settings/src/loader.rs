//! Options loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SinkOptions::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SQLOG_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::SinkOptions;

/// Resolve the settings file path.
///
/// `SQLOG_SETTINGS` wins; otherwise `~/.sqlog/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("SQLOG_SETTINGS") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sqlog").join("settings.json")
}

/// Load options from the default path with env var overrides.
pub fn load_options() -> Result<SinkOptions> {
    load_options_from_path(&settings_path())
}

/// Load options from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or invalid values are errors.
pub fn load_options_from_path(path: &Path) -> Result<SinkOptions> {
    let mut options = parse_file(path)?;
    apply_env_overrides(&mut options);
    options.validate()?;
    Ok(options)
}

/// Read the file layer only (defaults + file, no env overrides).
pub(crate) fn parse_file(path: &Path) -> Result<SinkOptions> {
    let defaults = serde_json::to_value(SinkOptions::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading sink options from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded options.
///
/// Integers must parse and fall within range; invalid values are warned
/// about and ignored (the file/default value stays).
pub fn apply_env_overrides(options: &mut SinkOptions) {
    if let Some(v) = read_env_string("SQLOG_CONNECTION_STRING") {
        options.connection_string = v;
    }
    if let Some(v) = read_env_string("SQLOG_LOG_NAME") {
        options.log_name = v;
    }
    if let Some(v) = read_env_usize("SQLOG_MAX_QUEUE_SIZE", 0, usize::MAX) {
        options.max_queue_size = v;
    }
    if let Some(v) = read_env_usize("SQLOG_BATCH_SIZE", 1, 1_000_000) {
        options.batch_size = v;
    }
    if let Some(v) = read_env_u64("SQLOG_BATCH_TIMEOUT_MS", 1, 3_600_000) {
        options.batch_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("SQLOG_AUTOFLUSH_WAIT_MS", 1, 3_600_000) {
        options.autoflush_wait_ms = v;
    }
    if let Some(v) = read_env_u64("SQLOG_RETRY_WAIT_INCREMENT_MS", 0, 86_400_000) {
        options.retry_wait_increment_ms = v;
    }
    if let Some(v) = read_env_u64("SQLOG_RETRY_WAIT_MAX_MS", 0, 86_400_000) {
        options.retry_wait_max_ms = v;
    }
    if let Some(v) = read_env_u64("SQLOG_SHUTDOWN_WAIT_MS", 0, 3_600_000) {
        options.shutdown_wait_ms = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_simple_override() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": 10});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 10);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"outer": {"x": 1, "y": 2}});
        let source = serde_json::json!({"outer": {"x": 9}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["outer"]["x"], 9);
        assert_eq!(merged["outer"]["y"], 2);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── load_options_from_path ──────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let options = parse_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(options, SinkOptions::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"connectionString": "/var/log/app.db", "batchSize": 500, "autoflushWaitMs": 250}"#,
        )
        .unwrap();

        let options = parse_file(&path).unwrap();
        assert_eq!(options.connection_string, "/var/log/app.db");
        assert_eq!(options.batch_size, 500);
        assert_eq!(options.autoflush_wait_ms, 250);
        assert_eq!(options.max_queue_size, 10_000_000);
    }

    #[test]
    fn load_null_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"batchSize": null}"#).unwrap();

        let options = parse_file(&path).unwrap();
        assert_eq!(options.batch_size, 10_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = parse_file(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_invalid_value_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"batchSize": 0}"#).unwrap();

        let result = load_options_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    // ── parse_u64_range / parse_usize_range ─────────────────────────

    #[test]
    fn parse_u64_valid() {
        assert_eq!(parse_u64_range("30000", 1, 3_600_000), Some(30_000));
        assert_eq!(parse_u64_range("1", 1, 3_600_000), Some(1));
    }

    #[test]
    fn parse_u64_out_of_range() {
        assert_eq!(parse_u64_range("0", 1, 3_600_000), None);
        assert_eq!(parse_u64_range("3600001", 1, 3_600_000), None);
    }

    #[test]
    fn parse_u64_invalid() {
        assert_eq!(parse_u64_range("abc", 1, 10), None);
        assert_eq!(parse_u64_range("", 1, 10), None);
    }

    #[test]
    fn parse_usize_valid() {
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
    }

    #[test]
    fn parse_usize_out_of_range() {
        assert_eq!(parse_usize_range("0", 1, 10_000), None);
        assert_eq!(parse_usize_range("20000", 1, 10_000), None);
    }
}
