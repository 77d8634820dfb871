//! test-orchestra - configuration tool for the test orchestration engine
//!
//! The engine itself is a library; this binary loads the configuration layers
//! a host would feed it and shows how they resolve.
//!
//! ## Usage
//!
//! ```bash
//! # Resolve defaults < file < environment < flags
//! test-orchestra config show --max-threads -1 --algorithm aggressive
//!
//! # Write a starter file
//! test-orchestra config init ./test-orchestra.yaml
//!
//! # List environment overrides
//! test-orchestra config env
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

mod cli;

use cli::{Args, Command, ConfigAction, OverrideArgs};
use test_orchestra::config::{
    find_config_file, load_layer, print_env_help, resolve, save_layer, ConfigLayer,
};
use test_orchestra::utils::{init_logger, LogLevel};

fn main() -> Result<()> {
    let args = Args::parse();

    let level = args
        .log_level
        .as_deref()
        .and_then(LogLevel::from_str)
        .unwrap_or_else(|| LogLevel::from_verbosity(args.verbose));
    init_logger(level);

    match args.command {
        Command::Config(config_args) => manage_config(config_args.action),
    }
}

fn manage_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show {
            file,
            no_env,
            format,
            overrides,
        } => show_config(file.as_deref(), no_env, &format, &overrides),

        ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!("Configuration file already exists: {output}. Use --force to overwrite.");
            }

            save_layer(&ConfigLayer::example(), path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
            Ok(())
        }

        ConfigAction::Validate { file } => {
            let path = match file.map(PathBuf::from).or_else(find_config_file) {
                Some(path) => path,
                None => anyhow::bail!("No configuration file found"),
            };

            match load_layer(&path) {
                Ok(layer) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                    if layer.is_empty() {
                        println!("  (no recognised settings)");
                    } else {
                        print!("{}", serde_yaml::to_string(&layer)?);
                    }
                    Ok(())
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    Err(e)
                }
            }
        }

        ConfigAction::Env => {
            print_env_help();
            Ok(())
        }
    }
}

fn show_config(file: Option<&str>, no_env: bool, format: &str, overrides: &OverrideArgs) -> Result<()> {
    let mut layers = Vec::new();

    let file = file.map(PathBuf::from).or_else(find_config_file);
    match &file {
        Some(path) => {
            info!("Using config file {}", path.display());
            layers.push(load_layer(path)?);
        }
        None => debug!("No config file found"),
    }

    if !no_env {
        let env = ConfigLayer::from_env();
        if !env.is_empty() {
            info!("Applying environment overrides");
        }
        layers.push(env);
    }

    layers.push(overrides.to_layer());

    let resolved = resolve(&layers);
    let output = match format {
        "json" => serde_json::to_string_pretty(&resolved)?,
        "yaml" | "yml" => serde_yaml::to_string(&resolved)?,
        other => anyhow::bail!("Unknown format: {other} (yaml, json)"),
    };
    println!("{}", output.trim_end());
    Ok(())
}
