//! Script flavors: how one command field becomes artifacts.

pub mod shell;
pub mod slurm;

use crate::core::arguments::Arguments;
use crate::core::builder::BuilderOptions;
use crate::core::error::Result;
use crate::core::types::{Artifact, Metadata};
use slurm::SlurmSettings;

/// One command's worth of work: which field, which job mappings (one line
/// each) and how to open its builder.
#[derive(Debug)]
pub struct JobRequest<'r> {
    pub field: &'r str,
    pub jobs: &'r [Metadata],
    pub options: BuilderOptions,
    pub slurm: &'r SlurmSettings,
}

/// A named artifact generator.
pub trait Flavor: Send + Sync {
    /// Registry key.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Open a builder on `request.field`, append one line per job, close,
    /// and report what was written.
    fn generate(&self, args: &mut Arguments, request: JobRequest<'_>) -> Result<Vec<Artifact>>;
}
