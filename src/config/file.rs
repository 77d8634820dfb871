//! Configuration file management
//!
//! Finds and reads JSON or YAML configuration files into a [`ConfigLayer`].
//! Reading is lenient: unknown keys are ignored and values of the wrong type
//! are treated as unset. Only I/O and syntax errors fail a load.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ConfigLayer, ExplicitOption, ParallelAlgorithm};

/// Configuration file locations (in order of precedence)
pub const CONFIG_LOCATIONS: &[&str] = &[
    "./test-orchestra.json",
    "./test-orchestra.yaml",
    "./test-orchestra.yml",
    "./.test-orchestra/config.yaml",
    "~/.config/test-orchestra/config.yaml",
];

impl ConfigLayer {
    /// Starter document written by `config init`
    pub fn example() -> Self {
        Self {
            explicit: Some(ExplicitOption::Off),
            max_parallel_threads: Some(0),
            parallel_algorithm: Some(ParallelAlgorithm::Conservative),
            parallelize_test_collections: Some(true),
            stop_on_fail: Some(false),
            fail_skips: Some(false),
            fail_tests_with_warnings: Some(false),
            synchronous_message_reporting: Some(false),
            long_running_test_seconds: Some(-1),
            ..Default::default()
        }
    }
}

/// Find configuration file in standard locations
pub fn find_config_file() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Load a configuration layer from file
pub fn load_layer(path: impl AsRef<Path>) -> Result<ConfigLayer> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let value: Value = if is_yaml_file(path) {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
    };

    debug!("Loaded config file {}", path.display());
    Ok(layer_from_value(&value))
}

/// Save a configuration layer to file
pub fn save_layer(layer: &ConfigLayer, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let content = if is_yaml_file(path) {
        serde_yaml::to_string(layer).context("Failed to serialize config")?
    } else {
        serde_json::to_string_pretty(layer).context("Failed to serialize config")?
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    Ok(())
}

/// Read every known key from a parsed document
pub fn layer_from_value(value: &Value) -> ConfigLayer {
    let Some(obj) = value.as_object() else {
        return ConfigLayer::default();
    };

    ConfigLayer {
        explicit: read_str(obj, "explicit").and_then(ExplicitOption::from_str),
        max_parallel_threads: read_max_threads(obj),
        parallel_algorithm: read_str(obj, "parallelAlgorithm").and_then(ParallelAlgorithm::from_str),
        parallelize_test_collections: read_bool(obj, "parallelizeTestCollections"),
        stop_on_fail: read_bool(obj, "stopOnFail"),
        fail_skips: read_bool(obj, "failSkips"),
        fail_tests_with_warnings: read_bool(obj, "failTestsWithWarnings"),
        diagnostic_messages: read_bool(obj, "diagnosticMessages"),
        internal_diagnostic_messages: read_bool(obj, "internalDiagnosticMessages"),
        synchronous_message_reporting: read_bool(obj, "synchronousMessageReporting"),
        seed: read_i32(obj, "seed"),
        long_running_test_seconds: read_i32(obj, "longRunningTestSeconds"),
        print_max_enumerable_length: read_i32(obj, "printMaxEnumerableLength"),
        print_max_object_depth: read_i32(obj, "printMaxObjectDepth"),
        print_max_object_member_count: read_i32(obj, "printMaxObjectMemberCount"),
        print_max_string_length: read_i32(obj, "printMaxStringLength"),
    }
}

fn read_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn read_bool(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().to_lowercase().parse().ok(),
        _ => None,
    }
}

fn read_i32(obj: &Map<String, Value>, key: &str) -> Option<i32> {
    match obj.get(key)? {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `maxParallelThreads` also accepts "default", "unlimited" and a processor
/// multiplier such as "2x" or "0.5x".
fn read_max_threads(obj: &Map<String, Value>) -> Option<i32> {
    if let Some(n) = read_i32(obj, "maxParallelThreads") {
        return Some(n);
    }

    let raw = read_str(obj, "maxParallelThreads")?.trim().to_lowercase();
    match raw.as_str() {
        "default" => Some(0),
        "unlimited" => Some(-1),
        other => {
            let factor: f64 = other.strip_suffix('x')?.parse().ok()?;
            if !factor.is_finite() || factor <= 0.0 {
                return None;
            }
            let processors = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1) as f64;
            let threads = (factor * processors).ceil();
            (threads <= i32::MAX as f64).then_some(threads as i32)
        }
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_layer_from_json_value() {
        let layer = layer_from_value(&json!({
            "explicit": "only",
            "maxParallelThreads": 3,
            "parallelAlgorithm": "aggressive",
            "stopOnFail": true,
            "failSkips": "true",
            "seed": 42,
            "longRunningTestSeconds": 30,
        }));

        assert_eq!(layer.explicit, Some(ExplicitOption::Only));
        assert_eq!(layer.max_parallel_threads, Some(3));
        assert_eq!(layer.parallel_algorithm, Some(ParallelAlgorithm::Aggressive));
        assert_eq!(layer.stop_on_fail, Some(true));
        assert_eq!(layer.fail_skips, Some(true));
        assert_eq!(layer.seed, Some(42));
        assert_eq!(layer.long_running_test_seconds, Some(30));
    }

    #[test]
    fn test_wrong_types_are_ignored() {
        let layer = layer_from_value(&json!({
            "explicit": "sometimes",
            "maxParallelThreads": [1, 2],
            "stopOnFail": 12,
            "seed": 1.5,
            "printMaxStringLength": 99999999999i64,
            "unknownKey": "value",
        }));

        assert!(layer.is_empty());
    }

    #[test]
    fn test_max_threads_keywords() {
        let unlimited = layer_from_value(&json!({ "maxParallelThreads": "unlimited" }));
        assert_eq!(unlimited.max_parallel_threads, Some(-1));

        let default = layer_from_value(&json!({ "maxParallelThreads": "default" }));
        assert_eq!(default.max_parallel_threads, Some(0));

        let doubled = layer_from_value(&json!({ "maxParallelThreads": "2x" }));
        assert!(doubled.max_parallel_threads.unwrap() >= 2);

        let bogus = layer_from_value(&json!({ "maxParallelThreads": "-3x" }));
        assert_eq!(bogus.max_parallel_threads, None);
    }

    #[test]
    fn test_non_object_document() {
        assert!(layer_from_value(&json!([1, 2, 3])).is_empty());
    }

    #[test]
    fn test_save_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let layer = ConfigLayer {
            explicit: Some(ExplicitOption::On),
            max_parallel_threads: Some(-1),
            fail_tests_with_warnings: Some(true),
            print_max_object_depth: Some(7),
            ..Default::default()
        };
        save_layer(&layer, &path).unwrap();

        let loaded = load_layer(&path).unwrap();
        assert_eq!(loaded, layer);
    }

    #[test]
    fn test_save_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let layer = ConfigLayer {
            parallel_algorithm: Some(ParallelAlgorithm::Aggressive),
            seed: Some(42),
            ..ConfigLayer::example()
        };
        save_layer(&layer, &path).unwrap();

        assert_eq!(load_layer(&path).unwrap(), layer);
    }

    #[test]
    fn test_syntax_error_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(load_layer(&path).is_err());
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}
