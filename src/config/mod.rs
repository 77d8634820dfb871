//! Configuration module
//!
//! Every setting is optional in a [`ConfigLayer`]; [`resolve`] folds layers
//! (lowest precedence first) over the built-in defaults into one
//! [`ResolvedConfiguration`]. Resolution is total: out-of-range values are
//! dropped as if they were never set.

mod env;
mod file;

pub use env::{print_env_help, EnvBuilder, EnvGuard, ENV_PREFIX};
pub use file::{find_config_file, load_layer, save_layer, CONFIG_LOCATIONS};

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_PRINT_MAX_ENUMERABLE_LENGTH: i32 = 5;
const DEFAULT_PRINT_MAX_OBJECT_DEPTH: i32 = 3;
const DEFAULT_PRINT_MAX_OBJECT_MEMBER_COUNT: i32 = 5;
const DEFAULT_PRINT_MAX_STRING_LENGTH: i32 = 50;
const DEFAULT_LONG_RUNNING_TEST_SECONDS: i32 = -1;

/// How explicit-only test cases are treated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplicitOption {
    /// Explicit cases are reported as not run
    #[default]
    Off,
    /// Explicit cases run alongside everything else
    On,
    /// Only explicit cases run
    Only,
}

impl ExplicitOption {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" => Some(ExplicitOption::Off),
            "on" => Some(ExplicitOption::On),
            "only" => Some(ExplicitOption::Only),
            _ => None,
        }
    }

    /// Whether a case with the given explicit flag is eligible to run
    pub fn admits(&self, explicit: bool) -> bool {
        match self {
            ExplicitOption::Off => !explicit,
            ExplicitOption::On => true,
            ExplicitOption::Only => explicit,
        }
    }
}

impl fmt::Display for ExplicitOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplicitOption::Off => write!(f, "off"),
            ExplicitOption::On => write!(f, "on"),
            ExplicitOption::Only => write!(f, "only"),
        }
    }
}

/// Slot admission algorithm
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelAlgorithm {
    /// A collection holds one slot for its whole run
    #[default]
    Conservative,
    /// Every test case body competes for a slot
    Aggressive,
}

impl ParallelAlgorithm {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "conservative" => Some(ParallelAlgorithm::Conservative),
            "aggressive" => Some(ParallelAlgorithm::Aggressive),
            _ => None,
        }
    }
}

impl fmt::Display for ParallelAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParallelAlgorithm::Conservative => write!(f, "conservative"),
            ParallelAlgorithm::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Resolved concurrency limit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaxParallelThreads {
    Unlimited,
    Limited(NonZeroUsize),
}

impl MaxParallelThreads {
    /// Interpret a raw setting: unset or 0 means the processor count, -1 means
    /// unlimited, any other positive value is taken as is.
    pub fn from_raw(raw: Option<i32>) -> Self {
        match raw {
            Some(-1) => MaxParallelThreads::Unlimited,
            Some(n) if n > 0 => NonZeroUsize::new(n as usize)
                .map(MaxParallelThreads::Limited)
                .unwrap_or_else(Self::processor_count),
            _ => Self::processor_count(),
        }
    }

    fn processor_count() -> Self {
        let count = std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        MaxParallelThreads::Limited(count)
    }

    /// Slot count, or `None` when unlimited
    pub fn slots(&self) -> Option<usize> {
        match self {
            MaxParallelThreads::Unlimited => None,
            MaxParallelThreads::Limited(n) => Some(n.get()),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, MaxParallelThreads::Unlimited)
    }
}

impl fmt::Display for MaxParallelThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxParallelThreads::Unlimited => write!(f, "unlimited"),
            MaxParallelThreads::Limited(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for MaxParallelThreads {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MaxParallelThreads::Unlimited => serializer.serialize_i64(-1),
            MaxParallelThreads::Limited(n) => serializer.serialize_u64(n.get() as u64),
        }
    }
}

/// One partially-specified configuration source
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit: Option<ExplicitOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel_threads: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_algorithm: Option<ParallelAlgorithm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelize_test_collections: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_on_fail: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_skips: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_tests_with_warnings: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_messages: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_diagnostic_messages: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synchronous_message_reporting: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_running_test_seconds: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_max_enumerable_length: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_max_object_depth: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_max_object_member_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_max_string_length: Option<i32>,
}

impl ConfigLayer {
    /// Drop values that are out of range so they behave as unset
    pub fn sanitized(mut self) -> Self {
        self.max_parallel_threads = self.max_parallel_threads.filter(|n| *n >= -1);
        for limit in [
            &mut self.print_max_enumerable_length,
            &mut self.print_max_object_depth,
            &mut self.print_max_object_member_count,
            &mut self.print_max_string_length,
        ] {
            *limit = limit.filter(|n| *n >= 0);
        }
        self
    }

    /// Overlay `higher` on top of this layer; set values in `higher` win
    pub fn merge(self, higher: &ConfigLayer) -> Self {
        Self {
            explicit: higher.explicit.or(self.explicit),
            max_parallel_threads: higher.max_parallel_threads.or(self.max_parallel_threads),
            parallel_algorithm: higher.parallel_algorithm.or(self.parallel_algorithm),
            parallelize_test_collections: higher
                .parallelize_test_collections
                .or(self.parallelize_test_collections),
            stop_on_fail: higher.stop_on_fail.or(self.stop_on_fail),
            fail_skips: higher.fail_skips.or(self.fail_skips),
            fail_tests_with_warnings: higher
                .fail_tests_with_warnings
                .or(self.fail_tests_with_warnings),
            diagnostic_messages: higher.diagnostic_messages.or(self.diagnostic_messages),
            internal_diagnostic_messages: higher
                .internal_diagnostic_messages
                .or(self.internal_diagnostic_messages),
            synchronous_message_reporting: higher
                .synchronous_message_reporting
                .or(self.synchronous_message_reporting),
            seed: higher.seed.or(self.seed),
            long_running_test_seconds: higher
                .long_running_test_seconds
                .or(self.long_running_test_seconds),
            print_max_enumerable_length: higher
                .print_max_enumerable_length
                .or(self.print_max_enumerable_length),
            print_max_object_depth: higher.print_max_object_depth.or(self.print_max_object_depth),
            print_max_object_member_count: higher
                .print_max_object_member_count
                .or(self.print_max_object_member_count),
            print_max_string_length: higher
                .print_max_string_length
                .or(self.print_max_string_length),
        }
    }

    /// Check if any value is set
    pub fn is_empty(&self) -> bool {
        *self == ConfigLayer::default()
    }

    /// Defaults applied to an otherwise empty layer
    pub fn resolve(self) -> ResolvedConfiguration {
        ResolvedConfiguration {
            explicit: self.explicit.unwrap_or_default(),
            max_parallel_threads: MaxParallelThreads::from_raw(self.max_parallel_threads),
            parallel_algorithm: self.parallel_algorithm.unwrap_or_default(),
            parallelize_test_collections: self.parallelize_test_collections.unwrap_or(true),
            stop_on_fail: self.stop_on_fail.unwrap_or(false),
            fail_skips: self.fail_skips.unwrap_or(false),
            fail_tests_with_warnings: self.fail_tests_with_warnings.unwrap_or(false),
            diagnostic_messages: self.diagnostic_messages.unwrap_or(false),
            internal_diagnostic_messages: self.internal_diagnostic_messages.unwrap_or(false),
            synchronous_message_reporting: self.synchronous_message_reporting.unwrap_or(false),
            seed: self.seed,
            long_running_test_seconds: self
                .long_running_test_seconds
                .unwrap_or(DEFAULT_LONG_RUNNING_TEST_SECONDS),
            print_limits: PrintLimits {
                max_enumerable_length: self
                    .print_max_enumerable_length
                    .unwrap_or(DEFAULT_PRINT_MAX_ENUMERABLE_LENGTH),
                max_object_depth: self
                    .print_max_object_depth
                    .unwrap_or(DEFAULT_PRINT_MAX_OBJECT_DEPTH),
                max_object_member_count: self
                    .print_max_object_member_count
                    .unwrap_or(DEFAULT_PRINT_MAX_OBJECT_MEMBER_COUNT),
                max_string_length: self
                    .print_max_string_length
                    .unwrap_or(DEFAULT_PRINT_MAX_STRING_LENGTH),
            },
        }
    }
}

/// Display limits consumed by reporters; carried through untouched
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintLimits {
    pub max_enumerable_length: i32,
    pub max_object_depth: i32,
    pub max_object_member_count: i32,
    pub max_string_length: i32,
}

/// Fully-resolved configuration snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfiguration {
    pub explicit: ExplicitOption,
    pub max_parallel_threads: MaxParallelThreads,
    pub parallel_algorithm: ParallelAlgorithm,
    pub parallelize_test_collections: bool,
    pub stop_on_fail: bool,
    pub fail_skips: bool,
    pub fail_tests_with_warnings: bool,
    pub diagnostic_messages: bool,
    pub internal_diagnostic_messages: bool,
    pub synchronous_message_reporting: bool,
    pub seed: Option<i32>,
    /// Cases running longer than this are reported; zero or negative disables
    pub long_running_test_seconds: i32,
    pub print_limits: PrintLimits,
}

impl ResolvedConfiguration {
    /// Threshold for long-running test reports, when enabled
    pub fn long_running_threshold(&self) -> Option<Duration> {
        u64::try_from(self.long_running_test_seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for ResolvedConfiguration {
    fn default() -> Self {
        resolve(&[])
    }
}

/// Resolve layers ordered from lowest to highest precedence
pub fn resolve(layers: &[ConfigLayer]) -> ResolvedConfiguration {
    layers
        .iter()
        .cloned()
        .map(ConfigLayer::sanitized)
        .fold(ConfigLayer::default(), |acc, layer| acc.merge(&layer))
        .resolve()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processors() -> usize {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }

    #[test]
    fn test_defaults() {
        let config = ResolvedConfiguration::default();
        assert_eq!(config.explicit, ExplicitOption::Off);
        assert_eq!(config.parallel_algorithm, ParallelAlgorithm::Conservative);
        assert!(config.parallelize_test_collections);
        assert!(!config.stop_on_fail);
        assert!(!config.fail_skips);
        assert!(!config.fail_tests_with_warnings);
        assert!(!config.synchronous_message_reporting);
        assert_eq!(config.seed, None);
        assert_eq!(config.long_running_test_seconds, -1);
        assert_eq!(config.long_running_threshold(), None);
        assert_eq!(config.print_limits.max_enumerable_length, 5);
        assert_eq!(config.print_limits.max_object_depth, 3);
        assert_eq!(config.print_limits.max_object_member_count, 5);
        assert_eq!(config.print_limits.max_string_length, 50);
    }

    #[test]
    fn test_max_parallel_threads_defaults_to_processor_count() {
        for raw in [None, Some(0)] {
            let threads = MaxParallelThreads::from_raw(raw);
            assert_eq!(threads.slots(), Some(processors()));
        }
    }

    #[test]
    fn test_max_parallel_threads_unlimited_and_exact() {
        assert!(MaxParallelThreads::from_raw(Some(-1)).is_unlimited());
        for n in [1, 2, 7, 64] {
            assert_eq!(MaxParallelThreads::from_raw(Some(n)).slots(), Some(n as usize));
        }
    }

    #[test]
    fn test_higher_layer_wins() {
        let low = ConfigLayer {
            stop_on_fail: Some(false),
            seed: Some(1),
            ..Default::default()
        };
        let high = ConfigLayer {
            stop_on_fail: Some(true),
            max_parallel_threads: Some(3),
            ..Default::default()
        };

        let config = resolve(&[low, high]);
        assert!(config.stop_on_fail);
        assert_eq!(config.seed, Some(1));
        assert_eq!(config.max_parallel_threads.slots(), Some(3));
    }

    #[test]
    fn test_unset_field_in_both_layers_uses_default() {
        let config = resolve(&[ConfigLayer::default(), ConfigLayer::default()]);
        assert_eq!(config, ResolvedConfiguration::default());
    }

    #[test]
    fn test_invalid_values_are_treated_as_absent() {
        let low = ConfigLayer {
            max_parallel_threads: Some(4),
            print_max_string_length: Some(80),
            ..Default::default()
        };
        let high = ConfigLayer {
            max_parallel_threads: Some(-7),
            print_max_string_length: Some(-2),
            ..Default::default()
        };

        let config = resolve(&[low, high]);
        assert_eq!(config.max_parallel_threads.slots(), Some(4));
        assert_eq!(config.print_limits.max_string_length, 80);
    }

    #[test]
    fn test_long_running_threshold_only_when_positive() {
        for (raw, expected) in [(0, None), (-1, None), (-30, None), (10, Some(10))] {
            let config = resolve(&[ConfigLayer {
                long_running_test_seconds: Some(raw),
                ..Default::default()
            }]);
            assert_eq!(config.long_running_threshold(), expected.map(Duration::from_secs));
        }
    }

    #[test]
    fn test_explicit_option_admits() {
        assert!(ExplicitOption::Off.admits(false));
        assert!(!ExplicitOption::Off.admits(true));
        assert!(ExplicitOption::On.admits(true));
        assert!(ExplicitOption::On.admits(false));
        assert!(ExplicitOption::Only.admits(true));
        assert!(!ExplicitOption::Only.admits(false));
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(ExplicitOption::from_str("ONLY"), Some(ExplicitOption::Only));
        assert_eq!(
            ParallelAlgorithm::from_str("aggressive"),
            Some(ParallelAlgorithm::Aggressive)
        );
        assert_eq!(ParallelAlgorithm::from_str("eager"), None);
    }

    #[test]
    fn test_unlimited_serializes_as_minus_one() {
        let value = serde_json::to_value(MaxParallelThreads::Unlimited).unwrap();
        assert_eq!(value, serde_json::json!(-1));
    }
}
