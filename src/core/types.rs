//! JF-001: Job file schema types.
//!
//! Defines the YAML schema of a `jobs.yaml` file: the base arguments that
//! locate the build directory, scalar parameters, batch defaults and the
//! ordered command declarations. All types derive Serialize/Deserialize.

use crate::flavors::slurm::SlurmSettings;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Named values a template is rendered against. Nested mappings are
/// reachable through dotted placeholder names.
pub type Metadata = IndexMap<String, serde_yaml_ng::Value>;

// ============================================================================
// Top-level jobs.yaml
// ============================================================================

/// Root configuration: one argument set and the commands declared on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable project name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Build directory protocol
    #[serde(flatten)]
    pub base: BaseOptions,

    /// Scalar argument fields (template metadata)
    #[serde(default)]
    pub params: Metadata,

    /// Flavor used by commands that do not name one
    #[serde(default = "default_flavor")]
    pub default_flavor: String,

    /// Builder-level batch-submission defaults
    #[serde(default)]
    pub slurm: SlurmSettings,

    /// Command declarations (order-preserving)
    #[serde(default)]
    pub commands: IndexMap<String, CommandSpec>,
}

fn default_flavor() -> String {
    "shell".to_string()
}

// ============================================================================
// Base arguments
// ============================================================================

/// Where artifacts go and how the build directory is provisioned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseOptions {
    /// Directory holding build directories
    pub base_path: PathBuf,

    /// Build directory name inside base_path (default: build_<timestamp>)
    #[serde(default)]
    pub build_dir: Option<String>,

    /// File name for the persisted arguments inside the build directory
    #[serde(default)]
    pub save_config_name: Option<String>,

    /// Replace an existing persisted arguments file
    #[serde(default)]
    pub do_overwrite: bool,

    /// Create base_path and the build directory when missing
    #[serde(default)]
    pub create_if_not_exist: bool,
}

// ============================================================================
// Commands
// ============================================================================

/// A command declaration: the recipe pieces of one script plus the jobs
/// that become its lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Flavor name (registry key); falls back to `default_flavor`
    #[serde(default)]
    pub flavor: Option<String>,

    /// Recipe pieces (`${name}` templates), joined into one line per job
    #[serde(default)]
    pub parts: Vec<String>,

    /// Separator between rendered pieces (default: single space)
    #[serde(default)]
    pub joiner: Option<String>,

    /// Artifact file name (default: `<command>.sh`)
    #[serde(default)]
    pub filename: Option<String>,

    /// Explicit job mappings, one recipe line each
    #[serde(default)]
    pub jobs: Vec<Metadata>,

    /// Parameter axes expanded as a cartesian product after `jobs`
    #[serde(default)]
    pub matrix: IndexMap<String, Vec<serde_yaml_ng::Value>>,

    /// Flavor-specific blocks (e.g. `slurm:`), kept verbatim
    #[serde(flatten)]
    pub extensions: IndexMap<String, serde_yaml_ng::Value>,
}

// ============================================================================
// Artifacts
// ============================================================================

/// A rendered artifact and its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Output path
    pub path: PathBuf,

    /// Number of lines in the rendered content
    pub lines: usize,

    /// BLAKE3 of the content, `blake3:<hex>`
    pub hash: String,

    /// False for dry runs
    pub written: bool,
}

impl Artifact {
    pub fn new(path: PathBuf, content: &str, written: bool) -> Self {
        Self {
            path,
            lines: content.lines().count(),
            hash: hash_content(content),
            written,
        }
    }
}

/// Hash artifact content. Returns `"blake3:{hex}"`.
pub fn hash_content(content: &str) -> String {
    format!("blake3:{}", blake3::hash(content.as_bytes()).to_hex())
}

// ============================================================================
// Tests
// ============================================================================
