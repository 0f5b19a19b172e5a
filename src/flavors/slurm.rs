//! JF-008: Batch-submission flavor. Sbatch header layering and the
//! array-job companion script.
//!
//! The primary artifact is the job list (one command per line). The
//! companion is an sbatch script whose array task N executes line N of
//! the job list. Header directives merge in priority order:
//! per-call > command `slurm:` block > builder settings > default header >
//! the injected `array = 1-{array_count}` template.

use super::{Flavor, JobRequest};
use crate::core::arguments::Arguments;
use crate::core::builder::{scope, ArtifactBuilder, Builder, BuilderState};
use crate::core::error::{Error, Result};
use crate::core::merge::{merge_layers, Merge, Templated};
use crate::core::template::{fill_defaults, TemplateString};
use crate::core::types::{Artifact, Metadata};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml_ng::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name prefix of the companion script.
pub const DEFAULT_PREFIX: &str = "slurm_";

/// Companion script: run line `$SLURM_ARRAY_TASK_ID` of the job list.
pub const DEFAULT_TEMPLATE: &str = r#"#!/bin/bash
${header}

BUILD_PATH=${build_path}
${before_command}

# Take line SLURM_ARRAY_TASK_ID of the job list
command=$$(sed -n "$${SLURM_ARRAY_TASK_ID}p" ${artifact_path})

echo "Executing $${command}"
echo "Started at $$(date)"

${exec} $${command}

echo "Finished at $$(date)"

${after_command}
"#;

/// Template arguments every companion render starts from.
pub fn default_template_arguments() -> Metadata {
    [("before_command", ""), ("exec", "eval"), ("after_command", "")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

// ============================================================================
// Header
// ============================================================================

/// `#SBATCH` directives. Each one is a value, a `{name}` template, or
/// absent; absent directives are not written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SbatchHeader {
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub job_name: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub partition: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub account: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub qos: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub time: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub nodes: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub ntasks: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub cpus_per_task: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub gpus: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub mem: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub mem_per_cpu: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub output: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub error: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub array: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub mail_type: Templated,
    #[serde(skip_serializing_if = "Templated::is_absent")]
    pub mail_user: Templated,
    /// Directives without a dedicated field, written after the known ones.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub extra: IndexMap<String, Templated>,
}

crate::merge_record!(SbatchHeader {
    job_name,
    partition,
    account,
    qos,
    time,
    nodes,
    ntasks,
    cpus_per_task,
    gpus,
    mem,
    mem_per_cpu,
    output,
    error,
    array,
    mail_type,
    mail_user,
    extra,
});

impl SbatchHeader {
    /// Builder-level defaults: job name and log files follow the command.
    pub fn default_header() -> Self {
        Self {
            job_name: Templated::template("{name}"),
            output: Templated::template("{build_path}/{name}_%A_%a.out"),
            error: Templated::template("{build_path}/{name}_%A_%a.err"),
            ..Default::default()
        }
    }

    /// Lowest layer: one array task per job line.
    pub fn array_layer() -> Self {
        Self {
            array: Templated::template("1-{array_count}"),
            ..Default::default()
        }
    }

    fn named(&self) -> [(&'static str, &Templated); 16] {
        [
            ("job_name", &self.job_name),
            ("partition", &self.partition),
            ("account", &self.account),
            ("qos", &self.qos),
            ("time", &self.time),
            ("nodes", &self.nodes),
            ("ntasks", &self.ntasks),
            ("cpus_per_task", &self.cpus_per_task),
            ("gpus", &self.gpus),
            ("mem", &self.mem),
            ("mem_per_cpu", &self.mem_per_cpu),
            ("output", &self.output),
            ("error", &self.error),
            ("array", &self.array),
            ("mail_type", &self.mail_type),
            ("mail_user", &self.mail_user),
        ]
    }

    /// Present directives as `(option, value)`, option names dashed.
    pub fn resolve(&self, metadata: &Metadata) -> Result<Vec<(String, String)>> {
        let mut fields: Vec<(&str, &Templated)> = Vec::from(self.named());
        fields.extend(self.extra.iter().map(|(key, field)| (key.as_str(), field)));

        let mut out = Vec::new();
        for (key, field) in fields {
            if let Some(value) = field.resolve(metadata)? {
                out.push((key.replace('_', "-"), value));
            }
        }
        Ok(out)
    }

    /// `#SBATCH --key=value` lines.
    pub fn to_directive_block(&self, metadata: &Metadata) -> Result<String> {
        Ok(self
            .resolve(metadata)?
            .into_iter()
            .map(|(key, value)| format!("#SBATCH --{}={}", key, value))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

// ============================================================================
// Template sources and settings
// ============================================================================

/// Companion template, inline or read from a file at close time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateSource {
    Inline(String),
    File { path: PathBuf },
}

impl TemplateSource {
    pub fn load(&self) -> Result<String> {
        match self {
            Self::Inline(text) => Ok(text.clone()),
            Self::File { path } => {
                std::fs::read_to_string(path).map_err(|e| Error::io("read template", path, e))
            }
        }
    }
}

/// Builder-level settings (the `slurm:` block of a job file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlurmSettings {
    pub prefix: String,
    pub header: SbatchHeader,
    pub template: Option<TemplateSource>,
    pub template_arguments: Metadata,
}

impl Default for SlurmSettings {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            header: SbatchHeader::default(),
            template: Some(TemplateSource::Inline(DEFAULT_TEMPLATE.to_string())),
            template_arguments: Metadata::new(),
        }
    }
}

/// Command-level overrides (the `slurm:` block of one command).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlurmOverrides {
    pub header: SbatchHeader,
    pub template: Option<TemplateSource>,
    pub template_arguments: Metadata,
}

/// Per-call finalize arguments; each one outranks every other layer.
#[derive(Debug, Clone, Default)]
pub struct Finalize {
    pub header: Option<SbatchHeader>,
    pub template: Option<TemplateSource>,
    pub template_arguments: Metadata,
    pub companion_path: Option<PathBuf>,
}

// ============================================================================
// Builder
// ============================================================================

/// Wraps a plain builder; counts appended lines and writes the companion
/// next to the job list.
#[derive(Debug)]
pub struct SlurmBuilder<'a> {
    inner: Builder<'a>,
    prefix: String,
    header: SbatchHeader,
    template: Option<TemplateSource>,
    template_arguments: Metadata,
    command_layer: SlurmOverrides,
    finalize: Finalize,
    array_count: usize,
}

impl<'a> SlurmBuilder<'a> {
    /// Wrap `inner`. An unreadable command `slurm:` block abandons `inner`
    /// without writing it.
    pub fn new(mut inner: Builder<'a>, settings: &SlurmSettings) -> Result<Self> {
        let decoded = inner.command().extension::<SlurmOverrides>("slurm");
        let command_layer = match decoded {
            Ok(layer) => layer.unwrap_or_default(),
            Err(e) => {
                inner.mark_closed();
                return Err(e);
            }
        };
        Ok(Self {
            inner,
            prefix: settings.prefix.clone(),
            header: settings.header.merge(&SbatchHeader::default_header()),
            template: settings.template.clone(),
            template_arguments: settings.template_arguments.clone(),
            command_layer,
            finalize: Finalize::default(),
            array_count: 0,
        })
    }

    pub fn inner(&self) -> &Builder<'a> {
        &self.inner
    }

    pub fn array_count(&self) -> usize {
        self.array_count
    }

    /// Close with per-call arguments.
    pub fn finalize(&mut self, finalize: Finalize) -> Result<()> {
        self.inner.ensure_open("finalize")?;
        self.finalize = finalize;
        self.close()
    }

    pub fn companion_path(&self) -> PathBuf {
        if let Some(path) = &self.finalize.companion_path {
            return path.clone();
        }
        let primary = self.inner.path();
        let filename = primary
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        primary
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(format!("{}{}", self.prefix, filename))
    }

    /// Base metadata plus the current array count.
    fn header_metadata(&self) -> Metadata {
        let mut metadata = self.inner.metadata().clone();
        metadata.insert(
            "array_count".to_string(),
            Value::Number(serde_yaml_ng::Number::from(self.array_count as u64)),
        );
        metadata
    }

    /// All header layers merged, highest priority first.
    pub fn resolve_header(&self) -> SbatchHeader {
        let array = SbatchHeader::array_layer();
        merge_layers([
            self.finalize.header.as_ref(),
            Some(&self.command_layer.header),
            Some(&self.header),
            Some(&array),
        ])
        .unwrap_or_default()
    }

    fn template_source(&self) -> Result<&TemplateSource> {
        self.finalize
            .template
            .as_ref()
            .or(self.command_layer.template.as_ref())
            .or(self.template.as_ref())
            .ok_or_else(|| {
                Error::config(format!(
                    "no batch template for '{}': set one on the command or the builder",
                    self.inner.name().unwrap_or("-")
                ))
            })
    }

    /// Render the companion script without writing anything.
    pub fn render_companion(&self) -> Result<String> {
        let source = self.template_source()?;
        let metadata = self.header_metadata();

        let mut arguments = fill_defaults(
            &self.finalize.template_arguments,
            &fill_defaults(
                &self.command_layer.template_arguments,
                &fill_defaults(&self.template_arguments, &default_template_arguments()),
            ),
        );
        if !arguments.contains_key("header") {
            let block = self.resolve_header().to_directive_block(&metadata)?;
            arguments.insert("header".to_string(), Value::String(block));
        }
        let arguments = fill_defaults(&arguments, &metadata);

        let rendered = TemplateString::dollar(&source.load()?)?.render(&arguments)?;
        debug!(
            array_count = self.array_count,
            path = %self.companion_path().display(),
            "rendered companion"
        );
        Ok(rendered)
    }
}

impl ArtifactBuilder for SlurmBuilder<'_> {
    fn state(&self) -> BuilderState {
        self.inner.state()
    }

    fn append(&mut self, mapping: &Metadata) -> Result<()> {
        self.inner.append(mapping)?;
        self.array_count += 1;
        Ok(())
    }

    fn append_fragment(
        &mut self,
        fragment: &[TemplateString],
        mapping: &Metadata,
        joiner: Option<&str>,
    ) -> Result<()> {
        self.inner.append_fragment(fragment, mapping, joiner)?;
        self.array_count += 1;
        Ok(())
    }

    fn render_artifacts(&self) -> Result<Vec<(PathBuf, String)>> {
        let mut rendered = self.inner.render_artifacts()?;
        rendered.push((self.companion_path(), self.render_companion()?));
        Ok(rendered)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.ensure_open("close")?;
        self.inner.mark_closed();
        let rendered = self.render_artifacts()?;
        self.inner.flush(rendered)
    }

    fn artifacts(&self) -> &[Artifact] {
        self.inner.artifacts()
    }
}

impl Drop for SlurmBuilder<'_> {
    fn drop(&mut self) {
        if self.inner.state() == BuilderState::Open {
            if let Err(e) = self.close() {
                warn!(
                    path = %self.inner.path().display(),
                    error = %e,
                    "flush on drop failed"
                );
            }
        }
    }
}

// ============================================================================
// Flavor
// ============================================================================

/// Job list plus sbatch array wrapper.
#[derive(Debug, Default)]
pub struct SlurmFlavor;

impl Flavor for SlurmFlavor {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn description(&self) -> &'static str {
        "job list plus an sbatch array script running one line per task"
    }

    fn generate(&self, args: &mut Arguments, request: JobRequest<'_>) -> Result<Vec<Artifact>> {
        let inner = request.options.open(args, request.field)?;
        let builder = SlurmBuilder::new(inner, request.slurm)?;
        let (_, artifacts) = scope(builder, |b| {
            for job in request.jobs {
                b.append(job)?;
            }
            Ok(())
        })?;
        Ok(artifacts)
    }
}
