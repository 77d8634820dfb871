//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};

use test_orchestra::config::{ConfigLayer, ExplicitOption, ParallelAlgorithm};

/// Test orchestration engine configuration tool
#[derive(Parser, Debug)]
#[command(name = "test-orchestra")]
#[command(version)]
#[command(about = "Inspect and manage test-orchestra run configuration")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log level (trace, debug, info, warn, error); overrides -v
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Configuration management
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Resolve defaults, file, environment and flags, and print the result
    Show {
        /// Configuration file (searched in standard locations if omitted)
        #[arg(short, long)]
        file: Option<String>,

        /// Ignore TEST_ORCHESTRA_* environment variables
        #[arg(long)]
        no_env: bool,

        /// Output format (yaml, json)
        #[arg(short = 'o', long, default_value = "yaml")]
        format: String,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Create an example configuration file
    Init {
        /// Output file path (.json, .yaml or .yml)
        #[arg(default_value = "./test-orchestra.yaml")]
        output: String,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check that a configuration file can be read
    Validate {
        /// Configuration file path
        file: Option<String>,
    },

    /// List supported environment variables
    Env,
}

/// Highest-precedence configuration layer
#[derive(ClapArgs, Debug, Default)]
pub struct OverrideArgs {
    /// Explicit test handling (off, on, only)
    #[arg(long, value_parser = parse_explicit)]
    pub explicit: Option<ExplicitOption>,

    /// Max parallel threads (0 = processors, -1 = unlimited)
    #[arg(long, allow_hyphen_values = true)]
    pub max_threads: Option<i32>,

    /// Parallel algorithm (conservative, aggressive)
    #[arg(long, value_parser = parse_algorithm)]
    pub algorithm: Option<ParallelAlgorithm>,

    /// Run collections one at a time
    #[arg(long)]
    pub serial_collections: bool,

    /// Stop the run after the first failed test
    #[arg(long)]
    pub stop_on_fail: bool,

    /// Report skipped tests as failed
    #[arg(long)]
    pub fail_skips: bool,

    /// Report passing tests with warnings as failed
    #[arg(long)]
    pub fail_warnings: bool,

    /// Publish diagnostic messages
    #[arg(long)]
    pub diagnostics: bool,

    /// Deliver events synchronously
    #[arg(long)]
    pub sync_reporting: bool,

    /// Randomization seed
    #[arg(long, allow_hyphen_values = true)]
    pub seed: Option<i32>,

    /// Report tests still running after this many seconds (<= 0 disables)
    #[arg(long, allow_hyphen_values = true)]
    pub long_running_seconds: Option<i32>,
}

impl OverrideArgs {
    /// Flags that were not given stay unset so lower layers show through
    pub fn to_layer(&self) -> ConfigLayer {
        ConfigLayer {
            explicit: self.explicit,
            max_parallel_threads: self.max_threads,
            parallel_algorithm: self.algorithm,
            parallelize_test_collections: self.serial_collections.then_some(false),
            stop_on_fail: self.stop_on_fail.then_some(true),
            fail_skips: self.fail_skips.then_some(true),
            fail_tests_with_warnings: self.fail_warnings.then_some(true),
            diagnostic_messages: self.diagnostics.then_some(true),
            synchronous_message_reporting: self.sync_reporting.then_some(true),
            seed: self.seed,
            long_running_test_seconds: self.long_running_seconds,
            ..Default::default()
        }
    }
}

fn parse_explicit(s: &str) -> Result<ExplicitOption, String> {
    ExplicitOption::from_str(s).ok_or_else(|| format!("unknown explicit mode '{s}' (off, on, only)"))
}

fn parse_algorithm(s: &str) -> Result<ParallelAlgorithm, String> {
    ParallelAlgorithm::from_str(s)
        .ok_or_else(|| format!("unknown algorithm '{s}' (conservative, aggressive)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_overrides() {
        let args = Args::parse_from([
            "test-orchestra",
            "config",
            "show",
            "--max-threads",
            "-1",
            "--algorithm",
            "aggressive",
            "--stop-on-fail",
            "--explicit",
            "only",
            "--long-running-seconds",
            "20",
        ]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Show { overrides, .. },
            }) => {
                let layer = overrides.to_layer();
                assert_eq!(layer.max_parallel_threads, Some(-1));
                assert_eq!(layer.parallel_algorithm, Some(ParallelAlgorithm::Aggressive));
                assert_eq!(layer.stop_on_fail, Some(true));
                assert_eq!(layer.explicit, Some(ExplicitOption::Only));
                assert_eq!(layer.fail_skips, None);
                assert_eq!(layer.long_running_test_seconds, Some(20));
            }
            _ => panic!("Expected config show"),
        }
    }

    #[test]
    fn test_unset_flags_leave_layer_empty() {
        assert!(OverrideArgs::default().to_layer().is_empty());
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let parsed = Args::try_parse_from(["test-orchestra", "config", "show", "--algorithm", "greedy"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_verbosity_is_global() {
        let args = Args::parse_from(["test-orchestra", "config", "env", "-vv"]);
        assert_eq!(args.verbose, 2);
    }
}
