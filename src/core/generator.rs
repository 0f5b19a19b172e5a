//! JF-011: Generator, the orchestration loop for `generate`.
//!
//! Builds the argument set a job file declares, then per command in
//! declaration order: flavor lookup → job expansion → builder scope →
//! artifacts.

use super::arguments::Arguments;
use super::builder::BuilderOptions;
use super::error::{Error, Result};
use super::registry::Registry;
use super::types::{Artifact, CommandSpec, JobConfig, Metadata};
use indexmap::IndexMap;
use serde_yaml_ng::Value;
use std::time::{Duration, Instant};
use tracing::info;

/// Configuration for a generate run.
pub struct GenerateConfig<'a> {
    pub config: &'a JobConfig,
    pub registry: &'a Registry,
    /// Param overrides, higher priority than the file's params
    pub overrides: &'a Metadata,
    pub command_filter: Option<&'a str>,
    pub dry_run: bool,
}

/// Outcome of generating one command.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub command: String,
    pub flavor: String,
    pub jobs: usize,
    pub artifacts: Vec<Artifact>,
    pub duration: Duration,
}

/// Execute the generate loop against a fresh argument set.
pub fn generate(cfg: &GenerateConfig) -> Result<Vec<GenerateResult>> {
    let mut args = Arguments::from_config(cfg.config, cfg.overrides)?;
    generate_into(cfg, &mut args)
}

/// Execute the generate loop against an existing argument set.
pub fn generate_into(cfg: &GenerateConfig, args: &mut Arguments) -> Result<Vec<GenerateResult>> {
    if let Some(filter) = cfg.command_filter {
        if !cfg.config.commands.contains_key(filter) {
            return Err(Error::config(format!("no command named '{}'", filter)));
        }
    }

    let mut results = Vec::new();
    for (name, spec) in &cfg.config.commands {
        if cfg.command_filter.is_some_and(|filter| filter != name.as_str()) {
            continue;
        }
        results.push(generate_command(cfg, args, name, spec)?);
    }
    Ok(results)
}

fn generate_command(
    cfg: &GenerateConfig,
    args: &mut Arguments,
    name: &str,
    spec: &CommandSpec,
) -> Result<GenerateResult> {
    let start = Instant::now();
    let flavor_name = spec
        .flavor
        .clone()
        .unwrap_or_else(|| cfg.config.default_flavor.clone());
    let flavor = cfg.registry.require(&flavor_name)?;

    let jobs = expand_jobs(spec);
    if jobs.is_empty() {
        return Err(Error::config(format!(
            "command '{}' expands to no jobs (empty matrix axis)",
            name
        )));
    }
    // `project` only fills in below the set's params.
    let mut metadata = Metadata::new();
    if !args.params().contains_key("project") {
        metadata.insert("project".to_string(), Value::String(cfg.config.name.clone()));
    }
    let options = BuilderOptions {
        filename: spec.filename.clone(),
        joiner: spec.joiner.clone(),
        metadata,
        dry_run: cfg.dry_run,
        ..Default::default()
    };

    let artifacts = flavor.generate(
        args,
        crate::flavors::JobRequest {
            field: name,
            jobs: &jobs,
            options,
            slurm: &cfg.config.slurm,
        },
    )?;

    info!(
        command = name,
        flavor = %flavor_name,
        jobs = jobs.len(),
        artifacts = artifacts.len(),
        dry_run = cfg.dry_run,
        "generated command"
    );
    Ok(GenerateResult {
        command: name.to_string(),
        flavor: flavor_name,
        jobs: jobs.len(),
        artifacts,
        duration: start.elapsed(),
    })
}

/// Job mappings for one command: explicit jobs, then the matrix product.
/// A command with neither runs once with an empty mapping.
pub fn expand_jobs(spec: &CommandSpec) -> Vec<Metadata> {
    if spec.jobs.is_empty() && spec.matrix.is_empty() {
        return vec![Metadata::new()];
    }
    let mut jobs = spec.jobs.clone();
    jobs.extend(matrix_product(&spec.matrix));
    jobs
}

/// Cartesian product of the axes; the first axis varies slowest.
pub fn matrix_product(matrix: &IndexMap<String, Vec<Value>>) -> Vec<Metadata> {
    if matrix.is_empty() {
        return Vec::new();
    }
    let mut combos = vec![Metadata::new()];
    for (axis, values) in matrix {
        combos = combos
            .into_iter()
            .flat_map(|combo| {
                values.iter().map(move |value| {
                    let mut next = combo.clone();
                    next.insert(axis.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    combos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_config;

    fn config_in(dir: &std::path::Path, commands: &str) -> JobConfig {
        parse_config(&format!(
            "version: '1.0'\nname: sweep\nbase_path: {}\nbuild_dir: b\ncreate_if_not_exist: true\nparams:\n  data: /data\ncommands:\n{}",
            dir.display(),
            commands
        ))
        .unwrap()
    }

    fn run(config: &JobConfig, filter: Option<&str>, dry_run: bool) -> Result<Vec<GenerateResult>> {
        let registry = Registry::new();
        let overrides = Metadata::new();
        generate(&GenerateConfig {
            config,
            registry: &registry,
            overrides: &overrides,
            command_filter: filter,
            dry_run,
        })
    }

    #[test]
    fn test_jf011_matrix_order() {
        let spec: CommandSpec =
            serde_yaml_ng::from_str("parts: [x]\nmatrix:\n  a: [1, 2]\n  b: [x, y, z]\n").unwrap();
        let jobs = expand_jobs(&spec);
        assert_eq!(jobs.len(), 6);
        let pairs: Vec<(u64, &str)> = jobs
            .iter()
            .map(|j| (j["a"].as_u64().unwrap(), j["b"].as_str().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![(1, "x"), (1, "y"), (1, "z"), (2, "x"), (2, "y"), (2, "z")]
        );
    }

    #[test]
    fn test_jf011_jobs_then_matrix() {
        let spec: CommandSpec = serde_yaml_ng::from_str(
            "parts: [x]\njobs:\n  - {seed: 0}\nmatrix:\n  seed: [1, 2]\n",
        )
        .unwrap();
        let seeds: Vec<u64> = expand_jobs(&spec)
            .iter()
            .map(|j| j["seed"].as_u64().unwrap())
            .collect();
        assert_eq!(seeds, vec![0, 1, 2]);
    }

    #[test]
    fn test_jf011_single_empty_job() {
        let spec: CommandSpec = serde_yaml_ng::from_str("parts: [x]\n").unwrap();
        assert_eq!(expand_jobs(&spec), vec![Metadata::new()]);
    }

    #[test]
    fn test_jf011_generate_all_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(
            dir.path(),
            r##"  prep:
    parts: ["prep ${data}"]
  train:
    flavor: slurm
    parts: ["train --data ${data}", "--seed ${seed}", "# ${project}"]
    matrix:
      seed: [1, 2]
"##,
        );
        let results = run(&config, None, false).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].command, "prep");
        assert_eq!(results[0].flavor, "shell");
        assert_eq!(results[1].flavor, "slurm");
        assert_eq!(results[1].jobs, 2);
        assert_eq!(results[1].artifacts.len(), 2);

        let build = dir.path().join("b");
        assert_eq!(std::fs::read_to_string(build.join("prep.sh")).unwrap(), "prep /data");
        assert_eq!(
            std::fs::read_to_string(build.join("train.sh")).unwrap(),
            "train --data /data --seed 1 # sweep\ntrain --data /data --seed 2 # sweep"
        );
        assert!(std::fs::read_to_string(build.join("slurm_train.sh"))
            .unwrap()
            .contains("#SBATCH --array=1-2"));
    }

    #[test]
    fn test_jf011_filter_and_filename() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(
            dir.path(),
            "  prep:\n    parts: [prep]\n  eval:\n    parts: [eval, run]\n    joiner: '_'\n    filename: evaluate.sh\n",
        );
        let results = run(&config, Some("eval"), false).unwrap();
        assert_eq!(results.len(), 1);
        let build = dir.path().join("b");
        assert!(!build.join("prep.sh").exists());
        assert_eq!(std::fs::read_to_string(build.join("evaluate.sh")).unwrap(), "eval_run");

        let err = run(&config, Some("ghost"), false).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_jf011_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "  prep:\n    parts: [prep]\n");
        let results = run(&config, None, true).unwrap();
        assert!(!results[0].artifacts[0].written);
        assert!(!dir.path().join("b/prep.sh").exists());
    }

    #[test]
    fn test_jf011_overrides_reach_templates() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "  prep:\n    parts: ['prep ${data}']\n");
        let registry = Registry::new();
        let overrides: Metadata = [("data".to_string(), Value::String("/scratch".to_string()))]
            .into_iter()
            .collect();
        generate(&GenerateConfig {
            config: &config,
            registry: &registry,
            overrides: &overrides,
            command_filter: None,
            dry_run: false,
        })
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b/prep.sh")).unwrap(),
            "prep /scratch"
        );
    }

    #[test]
    fn test_jf011_param_named_project_wins() {
        let dir = tempfile::tempdir().unwrap();
        let config = parse_config(&format!(
            "version: '1.0'\nname: sweep\nbase_path: {}\nbuild_dir: b\ncreate_if_not_exist: true\nparams:\n  project: mine\ncommands:\n  prep:\n    parts: ['echo ${{project}}']\n",
            dir.path().display()
        ))
        .unwrap();
        run(&config, None, false).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b/prep.sh")).unwrap(),
            "echo mine"
        );
    }

    #[test]
    fn test_jf011_empty_matrix_axis_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(
            dir.path(),
            "  sweep:\n    flavor: slurm\n    parts: ['run ${seed}']\n    matrix:\n      seed: []\n",
        );
        let err = run(&config, None, false).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("no jobs"));
        assert!(!dir.path().join("b/slurm_sweep.sh").exists());
        assert!(!dir.path().join("b/sweep.sh").exists());
    }

    #[test]
    fn test_jf011_unknown_flavor() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "  prep:\n    flavor: pbs\n    parts: [prep]\n");
        assert!(matches!(
            run(&config, None, false).unwrap_err(),
            Error::Configuration(_)
        ));
    }
}
