//! JF-009: Shell flavor: one script with one line per job.

use super::{Flavor, JobRequest};
use crate::core::arguments::Arguments;
use crate::core::builder::{scope, ArtifactBuilder};
use crate::core::error::Result;
use crate::core::types::Artifact;

#[derive(Debug, Default)]
pub struct ShellFlavor;

impl Flavor for ShellFlavor {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn description(&self) -> &'static str {
        "plain shell script, one rendered command line per job"
    }

    fn generate(&self, args: &mut Arguments, request: JobRequest<'_>) -> Result<Vec<Artifact>> {
        let builder = request.options.open(args, request.field)?;
        let (_, artifacts) = scope(builder, |b| {
            for job in request.jobs {
                b.append(job)?;
            }
            Ok(())
        })?;
        Ok(artifacts)
    }
}
