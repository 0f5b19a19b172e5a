//! JF-006: Argument sets with build directory provisioning and field back-links.
//!
//! An argument set owns an ordered table of fields (scalar values and
//! commands). Construction validates or creates the build directory,
//! back-links every command field to `(set id, field name)`, and optionally
//! persists the resolved arguments next to the artifacts.

use super::command::{Command, FieldLink};
use super::error::{Error, Result};
use super::merge::merge_metadata;
use super::types::{BaseOptions, JobConfig, Metadata};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Process-unique identity of an argument set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetId(u64);

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

impl SetId {
    pub fn next() -> Self {
        Self(NEXT_SET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "set-{}", self.0)
    }
}

/// A declared field.
#[derive(Debug, Clone)]
pub enum Field {
    Value(serde_yaml_ng::Value),
    Command(Command),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Value,
    Command,
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Value(_) => FieldKind::Value,
            Self::Command(_) => FieldKind::Command,
        }
    }
}

/// What a builder needs from its argument set, detached from the borrow.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub set: SetId,
    pub build_path: PathBuf,
    pub params: Metadata,
}

/// Root argument set.
#[derive(Debug)]
pub struct Arguments {
    id: SetId,
    options: BaseOptions,
    build_dir: String,
    build_path: PathBuf,
    config_path: Option<PathBuf>,
    fields: IndexMap<String, Field>,
}

impl Arguments {
    /// Provision directories, back-link commands, persist if configured.
    pub fn new(options: BaseOptions, fields: IndexMap<String, Field>) -> Result<Self> {
        let build_dir = options
            .build_dir
            .clone()
            .unwrap_or_else(|| format!("build_{}", chrono::Local::now().format("%Y%m%d_%H%M%S")));
        let build_path = options.base_path.join(&build_dir);

        ensure_dir(&options.base_path, options.create_if_not_exist)?;
        ensure_dir(&build_path, options.create_if_not_exist)?;

        let config_path = options
            .save_config_name
            .as_ref()
            .map(|name| build_path.join(name));

        let mut args = Self {
            id: SetId::next(),
            options,
            build_dir,
            build_path,
            config_path,
            fields,
        };
        args.link_commands();

        if let Some(path) = args.config_path.clone() {
            if path.exists() && !args.options.do_overwrite {
                return Err(Error::FileExists { path });
            }
            args.persist(&path)?;
        }

        info!(
            set = %args.id,
            build_path = %args.build_path.display(),
            fields = args.fields.len(),
            "argument set ready"
        );
        Ok(args)
    }

    /// Build the argument set a job file declares. `overrides` take
    /// priority over the file's params.
    pub fn from_config(config: &JobConfig, overrides: &Metadata) -> Result<Self> {
        let params = merge_metadata(overrides, &config.params)?;
        let mut fields = IndexMap::new();
        for (name, value) in params {
            fields.insert(name, Field::Value(value));
        }
        for (name, spec) in &config.commands {
            if fields.contains_key(name) {
                return Err(Error::config(format!(
                    "field '{}' is declared both as a param and a command",
                    name
                )));
            }
            fields.insert(name.clone(), Field::Command(Command::from_spec(spec)?));
        }
        Self::new(config.base.clone(), fields)
    }

    fn link_commands(&mut self) {
        let set = self.id;
        for (name, field) in self.fields.iter_mut() {
            if let Field::Command(command) = field {
                command.set_link(FieldLink {
                    set,
                    field: name.clone(),
                });
                debug!(set = %set, field = %name, "linked command");
            }
        }
    }

    fn persist(&self, path: &Path) -> Result<()> {
        let snapshot = PersistedArguments {
            base_path: &self.options.base_path,
            build_dir: &self.build_dir,
            build_path: &self.build_path,
            do_overwrite: self.options.do_overwrite,
            create_if_not_exist: self.options.create_if_not_exist,
            fields: self
                .fields
                .iter()
                .map(|(name, field)| {
                    let value = match field {
                        Field::Value(v) => PersistedField::Value(v),
                        Field::Command(c) => PersistedField::Command(c),
                    };
                    (name.as_str(), value)
                })
                .collect(),
        };
        let yaml = serde_yaml_ng::to_string(&snapshot)?;
        std::fs::write(path, yaml).map_err(|e| Error::io("write", path, e))?;
        info!(path = %path.display(), "saved arguments");
        Ok(())
    }

    pub fn id(&self) -> SetId {
        self.id
    }

    pub fn options(&self) -> &BaseOptions {
        &self.options
    }

    pub fn build_dir(&self) -> &str {
        &self.build_dir
    }

    pub fn build_path(&self) -> &Path {
        &self.build_path
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Declared fields with their kinds, in declaration order.
    pub fn manifest(&self) -> Vec<(&str, FieldKind)> {
        self.fields
            .iter()
            .map(|(name, field)| (name.as_str(), field.kind()))
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        match self.fields.get(name) {
            Some(Field::Command(c)) => Some(c),
            _ => None,
        }
    }

    /// Mutable access to a command field; distinguishes a missing field
    /// from one that is not a command.
    pub fn command_mut(&mut self, name: &str) -> Result<&mut Command> {
        match self.fields.get_mut(name) {
            Some(Field::Command(c)) => Ok(c),
            Some(Field::Value(_)) => Err(Error::config(format!(
                "field '{}' is not a command",
                name
            ))),
            None => Err(Error::config(format!("no field named '{}'", name))),
        }
    }

    /// Names of command fields, in declaration order.
    pub fn command_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, f)| f.kind() == FieldKind::Command)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Scalar fields as template metadata.
    pub fn params(&self) -> Metadata {
        self.fields
            .iter()
            .filter_map(|(name, field)| match field {
                Field::Value(v) => Some((name.clone(), v.clone())),
                Field::Command(_) => None,
            })
            .collect()
    }

    pub fn context(&self) -> BuildContext {
        BuildContext {
            set: self.id,
            build_path: self.build_path.clone(),
            params: self.params(),
        }
    }
}

fn ensure_dir(path: &Path, create: bool) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if !create {
        return Err(Error::DirectoryNotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::create_dir_all(path).map_err(|e| Error::io("create directory", path, e))?;
    debug!(path = %path.display(), "created directory");
    Ok(())
}

#[derive(Serialize)]
struct PersistedArguments<'a> {
    base_path: &'a Path,
    build_dir: &'a str,
    build_path: &'a Path,
    do_overwrite: bool,
    create_if_not_exist: bool,
    fields: IndexMap<&'a str, PersistedField<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PersistedField<'a> {
    Value(&'a serde_yaml_ng::Value),
    Command(&'a Command),
}

// ============================================================================
// Indirection table
// ============================================================================

/// Owns argument sets by id so a [`FieldLink`] can be resolved back to its
/// set and command.
#[derive(Debug, Default)]
pub struct ArgumentsTable {
    sets: IndexMap<SetId, Arguments>,
}

impl ArgumentsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, args: Arguments) -> SetId {
        let id = args.id();
        self.sets.insert(id, args);
        id
    }

    pub fn get(&self, id: SetId) -> Option<&Arguments> {
        self.sets.get(&id)
    }

    pub fn get_mut(&mut self, id: SetId) -> Option<&mut Arguments> {
        self.sets.get_mut(&id)
    }

    /// Resolve a back-link to the owning set.
    pub fn resolve(&mut self, link: &FieldLink) -> Result<&mut Arguments> {
        let args = self
            .sets
            .get_mut(&link.set)
            .ok_or_else(|| Error::config(format!("unknown argument set {}", link.set)))?;
        if args.command(&link.field).is_none() {
            return Err(Error::config(format!(
                "{} has no command field '{}'",
                link.set, link.field
            )));
        }
        Ok(args)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
