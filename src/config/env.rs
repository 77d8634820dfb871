//! Environment variable configuration
//!
//! Provides environment variable overrides as a [`ConfigLayer`].

use std::env;

use super::{ConfigLayer, ExplicitOption, ParallelAlgorithm};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TEST_ORCHESTRA";

impl ConfigLayer {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            explicit: get_env("EXPLICIT").and_then(|v| ExplicitOption::from_str(&v)),
            max_parallel_threads: get_env_parse("MAX_THREADS"),
            parallel_algorithm: get_env("ALGORITHM").and_then(|v| ParallelAlgorithm::from_str(&v)),
            parallelize_test_collections: get_env_bool("PARALLEL_COLLECTIONS"),
            stop_on_fail: get_env_bool("STOP_ON_FAIL"),
            fail_skips: get_env_bool("FAIL_SKIPS"),
            fail_tests_with_warnings: get_env_bool("FAIL_WARNINGS"),
            diagnostic_messages: get_env_bool("DIAGNOSTICS"),
            internal_diagnostic_messages: get_env_bool("INTERNAL_DIAGNOSTICS"),
            synchronous_message_reporting: get_env_bool("SYNC_REPORTING"),
            seed: get_env_parse("SEED"),
            long_running_test_seconds: get_env_parse("LONG_RUNNING_SECONDS"),
            ..Default::default()
        }
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as boolean; anything unrecognised is unset
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).and_then(|v| match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    })
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    /// Create a new environment builder
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Set an arbitrary prefixed variable
    pub fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn max_threads(self, threads: i32) -> Self {
        self.var("MAX_THREADS", threads.to_string())
    }

    pub fn explicit(self, option: ExplicitOption) -> Self {
        self.var("EXPLICIT", option.to_string())
    }

    pub fn stop_on_fail(self, enabled: bool) -> Self {
        self.var("STOP_ON_FAIL", enabled.to_string())
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all TEST_ORCHESTRA environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_EXPLICIT              Explicit test handling (off, on, only)");
    println!("  {ENV_PREFIX}_MAX_THREADS           Max parallel threads (0 = processors, -1 = unlimited)");
    println!("  {ENV_PREFIX}_ALGORITHM             Parallel algorithm (conservative, aggressive)");
    println!("  {ENV_PREFIX}_PARALLEL_COLLECTIONS  Run collections in parallel (true/false)");
    println!("  {ENV_PREFIX}_STOP_ON_FAIL          Stop the run after the first failure (true/false)");
    println!("  {ENV_PREFIX}_FAIL_SKIPS            Report skipped tests as failed (true/false)");
    println!("  {ENV_PREFIX}_FAIL_WARNINGS         Report passing tests with warnings as failed (true/false)");
    println!("  {ENV_PREFIX}_DIAGNOSTICS           Publish diagnostic messages (true/false)");
    println!("  {ENV_PREFIX}_INTERNAL_DIAGNOSTICS  Publish internal diagnostic messages (true/false)");
    println!("  {ENV_PREFIX}_SYNC_REPORTING        Deliver events synchronously (true/false)");
    println!("  {ENV_PREFIX}_SEED                  Randomization seed");
    println!("  {ENV_PREFIX}_LONG_RUNNING_SECONDS  Report tests running longer than this (seconds, <= 0 disables)");
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variables so they can run concurrently.

    #[test]
    fn test_env_layer_reads_prefixed_vars() {
        let _guard = EnvBuilder::new()
            .max_threads(6)
            .explicit(ExplicitOption::Only)
            .stop_on_fail(true)
            .var("ALGORITHM", "Aggressive")
            .var("SEED", " 1234 ")
            .var("LONG_RUNNING_SECONDS", "15")
            .apply_scoped();

        let layer = ConfigLayer::from_env();
        assert_eq!(layer.max_parallel_threads, Some(6));
        assert_eq!(layer.explicit, Some(ExplicitOption::Only));
        assert_eq!(layer.stop_on_fail, Some(true));
        assert_eq!(layer.parallel_algorithm, Some(ParallelAlgorithm::Aggressive));
        assert_eq!(layer.seed, Some(1234));
        assert_eq!(layer.long_running_test_seconds, Some(15));
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = EnvBuilder::new()
            .var("FAIL_SKIPS", "yes")
            .var("FAIL_WARNINGS", "off")
            .var("DIAGNOSTICS", "maybe")
            .apply_scoped();

        let layer = ConfigLayer::from_env();
        assert_eq!(layer.fail_skips, Some(true));
        assert_eq!(layer.fail_tests_with_warnings, Some(false));
        assert_eq!(layer.diagnostic_messages, None);
    }

    #[test]
    fn test_guard_restores() {
        let key = format!("{ENV_PREFIX}_INTERNAL_DIAGNOSTICS");
        {
            let _guard = EnvBuilder::new()
                .var("INTERNAL_DIAGNOSTICS", "true")
                .apply_scoped();
            assert_eq!(env::var(&key).ok().as_deref(), Some("true"));
        }
        assert!(env::var(&key).is_err());
    }
}
