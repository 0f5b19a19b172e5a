//! JF-002: Job file parsing and validation.
//!
//! Parses jobs.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Name and base_path must be set
//! - Field names are identifiers and unique across params and commands
//! - Command parts are present and well-formed templates
//! - Matrix axes are non-empty, `slurm:` blocks decode
//! - Flavor names exist in the registry

use super::error::{Error, Result};
use super::registry::Registry;
use super::template::TemplateString;
use super::types::*;
use crate::flavors::slurm::SlurmOverrides;
use regex::Regex;
use std::path::Path;

/// Accepted field (param and command) names.
pub const FIELD_NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// Validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn problem(errors: &mut Vec<ValidationError>, message: String) {
    errors.push(ValidationError { message });
}

/// Parse a jobs.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<JobConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
    parse_config(&content)
}

/// Parse a jobs.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<JobConfig> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &JobConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let field_name = Regex::new(FIELD_NAME_PATTERN).ok();
    let valid_name = |name: &str| field_name.as_ref().map_or(true, |re| re.is_match(name));

    if config.version != "1.0" {
        problem(
            &mut errors,
            format!("version must be \"1.0\", got \"{}\"", config.version),
        );
    }

    if config.name.is_empty() {
        problem(&mut errors, "name must not be empty".to_string());
    }

    if config.base.base_path.as_os_str().is_empty() {
        problem(&mut errors, "base_path must not be empty".to_string());
    }

    if let Some(dir) = &config.base.build_dir {
        if dir.is_empty() || dir.contains('/') {
            problem(
                &mut errors,
                format!("build_dir '{}' must be a single directory name", dir),
            );
        }
    }

    for name in config.params.keys() {
        if !valid_name(name) {
            problem(&mut errors, format!("param '{}' is not a valid field name", name));
        }
    }

    for (name, command) in &config.commands {
        if !valid_name(name) {
            problem(&mut errors, format!("command '{}' is not a valid field name", name));
        }
        if config.params.contains_key(name) {
            problem(
                &mut errors,
                format!("field '{}' is declared both as a param and a command", name),
            );
        }

        if command.parts.is_empty() {
            problem(&mut errors, format!("command '{}' has no parts", name));
        }
        for part in &command.parts {
            if let Err(e) = TemplateString::dollar(part) {
                problem(&mut errors, format!("command '{}': {}", name, e));
            }
        }

        if let Some(filename) = &command.filename {
            if filename.is_empty() || filename.contains('/') {
                problem(
                    &mut errors,
                    format!("command '{}' filename '{}' must be a plain file name", name, filename),
                );
            }
        }

        for (axis, values) in &command.matrix {
            if values.is_empty() {
                problem(
                    &mut errors,
                    format!("command '{}' matrix axis '{}' has no values", name, axis),
                );
            }
        }

        if let Some(block) = command.extensions.get("slurm") {
            if let Err(e) = serde_yaml_ng::from_value::<SlurmOverrides>(block.clone()) {
                problem(
                    &mut errors,
                    format!("command '{}' has an invalid slurm block: {}", name, e),
                );
            }
        }
    }

    errors
}

/// Check that every flavor a config names is known to `registry`.
pub fn validate_flavors(config: &JobConfig, registry: &Registry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if registry.get(&config.default_flavor).is_none() {
        problem(
            &mut errors,
            format!("default_flavor '{}' is not registered", config.default_flavor),
        );
    }
    for (name, command) in &config.commands {
        if let Some(flavor) = &command.flavor {
            if registry.get(flavor).is_none() {
                problem(
                    &mut errors,
                    format!("command '{}' uses unknown flavor '{}'", name, flavor),
                );
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
version: "1.0"
name: sweep
base_path: /tmp/runs
params:
  data: /data
commands:
  train:
    flavor: slurm
    parts: ["python train.py", "--seed ${seed}"]
    matrix:
      seed: [1, 2]
"#;

    fn messages(yaml: &str) -> Vec<String> {
        let config = parse_config(yaml).unwrap();
        validate_config(&config)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_jf002_parse_valid() {
        let config = parse_config(VALID).unwrap();
        assert_eq!(config.name, "sweep");
        assert!(validate_config(&config).is_empty());
        assert!(validate_flavors(&config, &Registry::new()).is_empty());
    }

    #[test]
    fn test_jf002_bad_version() {
        let errors = messages(&VALID.replace("\"1.0\"", "\"2.0\""));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("version"));
    }

    #[test]
    fn test_jf002_empty_name_and_base_path() {
        let errors = messages("version: '1.0'\nname: ''\nbase_path: ''\n");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_jf002_invalid_field_names() {
        let errors = messages(
            "version: '1.0'\nname: t\nbase_path: /r\nparams:\n  bad-name: 1\ncommands:\n  9lives:\n    parts: [x]\n",
        );
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("bad-name")));
        assert!(errors.iter().any(|e| e.contains("9lives")));
    }

    #[test]
    fn test_jf002_collision() {
        let errors = messages(
            "version: '1.0'\nname: t\nbase_path: /r\nparams:\n  train: 1\ncommands:\n  train:\n    parts: [x]\n",
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("both"));
    }

    #[test]
    fn test_jf002_command_problems() {
        let errors = messages(
            r#"
version: "1.0"
name: t
base_path: /r
commands:
  empty:
    parts: []
  broken:
    parts: ["echo ${unclosed"]
    filename: sub/dir.sh
    matrix:
      seed: []
  batch:
    parts: [x]
    slurm:
      header:
        memory: 8G
"#,
        );
        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("'empty' has no parts")));
        assert!(errors.iter().any(|e| e.contains("unclosed")));
        assert!(errors.iter().any(|e| e.contains("plain file name")));
        assert!(errors.iter().any(|e| e.contains("axis 'seed'")));
        assert!(errors.iter().any(|e| e.contains("invalid slurm block")));
    }

    #[test]
    fn test_jf002_unknown_flavor() {
        let config = parse_config(&VALID.replace("flavor: slurm", "flavor: pbs")).unwrap();
        let errors = validate_flavors(&config, &Registry::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("pbs"));
    }

    #[test]
    fn test_jf002_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.yaml");
        std::fs::write(&path, VALID).unwrap();
        assert_eq!(parse_config_file(&path).unwrap().commands.len(), 1);
        assert!(matches!(
            parse_config_file(&dir.path().join("missing.yaml")).unwrap_err(),
            Error::Io { .. }
        ));
    }

    #[test]
    fn test_jf002_parse_invalid_yaml() {
        assert!(matches!(
            parse_config("{{not yaml").unwrap_err(),
            Error::Yaml(_)
        ));
    }
}
