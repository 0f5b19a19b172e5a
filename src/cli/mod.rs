//! JF-012: CLI subcommands (init, validate, generate, flavors).

use crate::core::error::{Error, Result};
use crate::core::generator::{self, GenerateConfig};
use crate::core::parser;
use crate::core::registry::Registry;
use crate::core::types::{JobConfig, Metadata};
use clap::Subcommand;
use serde_yaml_ng::Value;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter jobs.yaml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate jobs.yaml without generating anything
    Validate {
        /// Path to jobs.yaml
        #[arg(short, long, default_value = "jobs.yaml")]
        file: PathBuf,
    },

    /// Render job scripts into the build directory
    Generate {
        /// Path to jobs.yaml
        #[arg(short, long, default_value = "jobs.yaml")]
        file: PathBuf,

        /// Generate a single command
        #[arg(short, long)]
        command: Option<String>,

        /// Override a param (KEY=VALUE, repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Render without writing artifacts
        #[arg(long)]
        dry_run: bool,
    },

    /// List registered flavors
    Flavors,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    let registry = Registry::new();
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file, &registry),
        Commands::Generate {
            file,
            command,
            set,
            dry_run,
        } => cmd_generate(&file, &registry, command.as_deref(), &set, dry_run),
        Commands::Flavors => cmd_flavors(&registry),
    }
}

const STARTER: &str = r#"version: "1.0"
name: my-experiments
description: "Generated by jobforge"

base_path: runs
create_if_not_exist: true
save_config_name: arguments.yaml

params:
  data: /path/to/data

slurm:
  header:
    time: "01:00:00"
    mem: 4G

commands:
  prepare:
    parts: ["python prepare.py", "--data ${data}"]

  train:
    flavor: slurm
    parts: ["python train.py", "--data ${data}", "--seed ${seed}"]
    matrix:
      seed: [1, 2, 3]
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join("jobs.yaml");
    if config_path.exists() {
        return Err(Error::FileExists { path: config_path });
    }
    std::fs::write(&config_path, STARTER).map_err(|e| Error::io("write", &config_path, e))?;

    println!("Initialized jobforge project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path, registry: &Registry) -> Result<()> {
    let config = parse_and_validate(file, registry)?;
    println!(
        "OK: {} ({} params, {} commands)",
        config.name,
        config.params.len(),
        config.commands.len()
    );
    Ok(())
}

/// Parse and validate a job file, printing every problem found.
fn parse_and_validate(file: &Path, registry: &Registry) -> Result<JobConfig> {
    let config = parser::parse_config_file(file)?;
    let mut errors = parser::validate_config(&config);
    errors.extend(parser::validate_flavors(&config, registry));
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(Error::config(format!("{} validation error(s)", errors.len())))
}

fn cmd_generate(
    file: &Path,
    registry: &Registry,
    command: Option<&str>,
    set: &[String],
    dry_run: bool,
) -> Result<()> {
    let config = parse_and_validate(file, registry)?;
    let overrides = parse_overrides(set)?;
    let results = generator::generate(&GenerateConfig {
        config: &config,
        registry,
        overrides: &overrides,
        command_filter: command,
        dry_run,
    })?;

    let mut total = 0;
    for result in &results {
        println!(
            "{} [{}] {} job(s) in {:.1?}",
            result.command, result.flavor, result.jobs, result.duration
        );
        for artifact in &result.artifacts {
            println!(
                "  {} {} ({} lines, {})",
                if artifact.written { "wrote" } else { "would write" },
                artifact.path.display(),
                artifact.lines,
                artifact.hash
            );
            total += 1;
        }
    }
    println!(
        "{}{} artifact(s) from {} command(s)",
        if dry_run { "Dry run: " } else { "" },
        total,
        results.len()
    );
    Ok(())
}

fn cmd_flavors(registry: &Registry) -> Result<()> {
    for name in registry.names() {
        if let Some(flavor) = registry.get(&name) {
            println!("  {:<26} {}", name, flavor.description());
        }
    }
    Ok(())
}

/// Parse `KEY=VALUE` overrides. Values are read as YAML scalars, so
/// `--set seed=3` is a number and `--set tag=v1` a string.
pub fn parse_overrides(pairs: &[String]) -> Result<Metadata> {
    let mut overrides = Metadata::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| Error::config(format!("override '{}' is not KEY=VALUE", pair)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::config(format!("override '{}' has an empty key", pair)));
        }
        let value = match serde_yaml_ng::from_str::<Value>(raw) {
            Ok(Value::Null) | Err(_) => Value::String(raw.to_string()),
            Ok(Value::Mapping(_)) | Ok(Value::Tagged(_)) => Value::String(raw.to_string()),
            Ok(value) => value,
        };
        overrides.insert(key.to_string(), value);
    }
    Ok(overrides)
}
