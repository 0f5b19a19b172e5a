//! JF-007: Artifact builders and scope-bound recipe accumulation.
//!
//! A builder binds one command to its argument set's build context,
//! renders appended fragments into recipe lines, and writes the artifact
//! exactly once when it is closed. Closing happens through [`scope`] on
//! every exit path of the body, or from `Drop` if the builder is abandoned
//! while open.

use super::arguments::{Arguments, ArgumentsTable, BuildContext};
use super::command::{Command, FieldLink};
use super::error::{Error, Result};
use super::template::{fill_defaults, TemplateString};
use super::types::{Artifact, Metadata};
use serde_yaml_ng::Value;
use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Output path used when neither a file path nor a file name is given.
pub const DEFAULT_PATH_TEMPLATE: &str = "{build_path}/{name}.sh";

/// Default separator between the rendered pieces of one fragment.
pub const DEFAULT_JOINER: &str = " ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Open,
    Closed,
}

/// Operations shared by every artifact builder flavor.
pub trait ArtifactBuilder {
    fn state(&self) -> BuilderState;

    /// Append one line rendered from the command's own parts.
    fn append(&mut self, mapping: &Metadata) -> Result<()>;

    /// Render `fragment` against `mapping` (filled from the builder
    /// metadata), join the pieces and append the line.
    fn append_fragment(
        &mut self,
        fragment: &[TemplateString],
        mapping: &Metadata,
        joiner: Option<&str>,
    ) -> Result<()>;

    /// Every artifact this builder would write, rendered but not written.
    fn render_artifacts(&self) -> Result<Vec<(PathBuf, String)>>;

    /// Render and write. Fails with `InvalidState` when already closed.
    fn close(&mut self) -> Result<()>;

    /// Artifacts written (or rendered, for dry runs) by `close`.
    fn artifacts(&self) -> &[Artifact];
}

/// Run `body` with an open builder and close it afterwards, whether the
/// body succeeded or not. The body's error takes precedence over a close
/// error.
pub fn scope<B, T, F>(mut builder: B, body: F) -> Result<(T, Vec<Artifact>)>
where
    B: ArtifactBuilder,
    F: FnOnce(&mut B) -> Result<T>,
{
    let outcome = body(&mut builder);
    let closed = match builder.state() {
        BuilderState::Open => builder.close(),
        BuilderState::Closed => Ok(()),
    };
    let value = match (outcome, closed) {
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "close failed after body error");
            return Err(e);
        }
        (outcome, closed) => {
            let value = outcome?;
            closed?;
            value
        }
    };
    Ok((value, builder.artifacts().to_vec()))
}

// ============================================================================
// Options (unbound builder)
// ============================================================================

/// Everything a builder needs except the command it binds to.
#[derive(Debug, Clone, Default)]
pub struct BuilderOptions {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub filepath: Option<PathBuf>,
    pub path_template: Option<String>,
    pub joiner: Option<String>,
    pub metadata: Metadata,
    pub dry_run: bool,
}

impl BuilderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn filepath(mut self, filepath: impl Into<PathBuf>) -> Self {
        self.filepath = Some(filepath.into());
        self
    }

    pub fn path_template(mut self, template: impl Into<String>) -> Self {
        self.path_template = Some(template.into());
        self
    }

    pub fn joiner(mut self, joiner: impl Into<String>) -> Self {
        self.joiner = Some(joiner.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Bind to the command declared as `field` on `args`.
    pub fn open<'a>(self, args: &'a mut Arguments, field: &str) -> Result<Builder<'a>> {
        let context = args.context();
        let command = args.command_mut(field)?;
        let name = self.name.clone().or_else(|| Some(field.to_string()));
        Builder::bind(command, context, name, self)
    }

    /// Bind to a command held outside `args`. A linked command must belong
    /// to `args`; its field name becomes the default name.
    pub fn open_command<'a>(self, command: &'a mut Command, args: &Arguments) -> Result<Builder<'a>> {
        if let Some(link) = command.link() {
            if link.set != args.id() {
                return Err(Error::config(format!(
                    "command '{}' belongs to {}, not {}",
                    link.field,
                    link.set,
                    args.id()
                )));
            }
        }
        let name = self
            .name
            .clone()
            .or_else(|| command.name().map(str::to_string));
        Builder::bind(command, args.context(), name, self)
    }

    /// Bind through a back-link resolved in `table`.
    pub fn open_link<'a>(self, table: &'a mut ArgumentsTable, link: &FieldLink) -> Result<Builder<'a>> {
        let args = table.resolve(link)?;
        self.open(args, &link.field)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Plain builder: one artifact, the joined recipe.
#[derive(Debug)]
pub struct Builder<'a> {
    command: &'a mut Command,
    context: BuildContext,
    name: Option<String>,
    path: PathBuf,
    joiner: String,
    extra: Metadata,
    metadata: OnceCell<Metadata>,
    dry_run: bool,
    state: BuilderState,
    artifacts: Vec<Artifact>,
}

impl<'a> Builder<'a> {
    fn bind(
        command: &'a mut Command,
        context: BuildContext,
        name: Option<String>,
        options: BuilderOptions,
    ) -> Result<Self> {
        let path = resolve_path(&context, name.as_deref(), &options)?;
        debug!(
            name = name.as_deref().unwrap_or("-"),
            path = %path.display(),
            "opened builder"
        );
        Ok(Self {
            command,
            context,
            name,
            path,
            joiner: options.joiner.unwrap_or_else(|| DEFAULT_JOINER.to_string()),
            extra: options.metadata,
            metadata: OnceCell::new(),
            dry_run: options.dry_run,
            state: BuilderState::Open,
            artifacts: Vec::new(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn command(&self) -> &Command {
        &*self.command
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Base metadata, computed on first use: built-in keys, then caller
    /// metadata, then the argument set's params.
    pub fn metadata(&self) -> &Metadata {
        self.metadata.get_or_init(|| {
            let now = chrono::Local::now();
            let mut builtins = Metadata::new();
            builtins.insert(
                "build_path".to_string(),
                text(self.context.build_path.display().to_string()),
            );
            if let Some(name) = &self.name {
                builtins.insert("name".to_string(), text(name.clone()));
            }
            if let Some(filename) = self.path.file_name() {
                builtins.insert(
                    "filename".to_string(),
                    text(filename.to_string_lossy().to_string()),
                );
            }
            builtins.insert(
                "artifact_path".to_string(),
                text(self.path.display().to_string()),
            );
            builtins.insert("timestamp".to_string(), text(now.to_rfc3339()));
            builtins.insert(
                "date".to_string(),
                text(now.format("%Y%m%d_%H%M%S").to_string()),
            );
            fill_defaults(&builtins, &fill_defaults(&self.extra, &self.context.params))
        })
    }

    /// The primary artifact's content: recipe lines joined by newlines.
    pub fn render(&self) -> String {
        self.command.recipe().join("\n")
    }

    pub(crate) fn ensure_open(&self, action: &str) -> Result<()> {
        match self.state {
            BuilderState::Open => Ok(()),
            BuilderState::Closed => Err(Error::InvalidState(format!(
                "cannot {} {}: builder is closed",
                action,
                self.path.display()
            ))),
        }
    }

    /// Transition to closed without writing; the caller writes.
    pub(crate) fn mark_closed(&mut self) {
        self.state = BuilderState::Closed;
    }

    /// Write rendered artifacts (unless dry-run) and record them.
    pub(crate) fn flush(&mut self, rendered: Vec<(PathBuf, String)>) -> Result<()> {
        for (path, content) in rendered {
            if !self.dry_run {
                write_artifact(&path, &content)?;
            }
            self.artifacts
                .push(Artifact::new(path, &content, !self.dry_run));
        }
        Ok(())
    }
}

impl ArtifactBuilder for Builder<'_> {
    fn state(&self) -> BuilderState {
        self.state
    }

    fn append(&mut self, mapping: &Metadata) -> Result<()> {
        let parts = self.command.parts().to_vec();
        if parts.is_empty() {
            return Err(Error::config(format!(
                "command '{}' has no parts to append",
                self.name.as_deref().unwrap_or("-")
            )));
        }
        self.append_fragment(&parts, mapping, None)
    }

    fn append_fragment(
        &mut self,
        fragment: &[TemplateString],
        mapping: &Metadata,
        joiner: Option<&str>,
    ) -> Result<()> {
        self.ensure_open("append to")?;
        let index = self.command.recipe().len() + 1;
        let mut defaults = self.metadata().clone();
        defaults.insert(
            "job_index".to_string(),
            Value::Number(serde_yaml_ng::Number::from(index as u64)),
        );
        let mapping = fill_defaults(mapping, &defaults);

        let pieces = fragment
            .iter()
            .map(|piece| piece.render(&mapping))
            .collect::<Result<Vec<_>>>()?;
        let line = pieces.join(joiner.unwrap_or(self.joiner.as_str()));
        debug!(index, line = %line, "appended recipe line");
        self.command.push_line(line);
        Ok(())
    }

    fn render_artifacts(&self) -> Result<Vec<(PathBuf, String)>> {
        Ok(vec![(self.path.clone(), self.render())])
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open("close")?;
        self.mark_closed();
        let rendered = self.render_artifacts()?;
        self.flush(rendered)
    }

    fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }
}

impl Drop for Builder<'_> {
    fn drop(&mut self) {
        if self.state == BuilderState::Open {
            if let Err(e) = self.close() {
                warn!(path = %self.path.display(), error = %e, "flush on drop failed");
            }
        }
    }
}

fn text(value: impl Into<String>) -> Value {
    Value::String(value.into())
}

/// Output path: explicit path, else file name in the build directory, else
/// the rendered path template.
fn resolve_path(context: &BuildContext, name: Option<&str>, options: &BuilderOptions) -> Result<PathBuf> {
    if let Some(path) = &options.filepath {
        return Ok(path.clone());
    }
    if let Some(filename) = &options.filename {
        return Ok(context.build_path.join(filename));
    }

    let template = TemplateString::brace(
        options
            .path_template
            .as_deref()
            .unwrap_or(DEFAULT_PATH_TEMPLATE),
    )?;
    if name.is_none() && template.placeholders().any(|p| p == "name") {
        return Err(Error::config(
            "cannot derive an output path: no command name, filename or filepath",
        ));
    }

    let mut builtins = Metadata::new();
    builtins.insert(
        "build_path".to_string(),
        text(context.build_path.display().to_string()),
    );
    if let Some(name) = name {
        builtins.insert("name".to_string(), text(name));
    }
    let mapping = fill_defaults(&builtins, &fill_defaults(&options.metadata, &context.params));
    Ok(PathBuf::from(template.render(&mapping)?))
}

/// Write (truncating) an artifact, creating its parent directory.
pub(crate) fn write_artifact(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))?;
        }
    }
    std::fs::write(path, content).map_err(|e| Error::io("write", path, e))?;
    info!(path = %path.display(), bytes = content.len(), "wrote artifact");
    Ok(())
}
