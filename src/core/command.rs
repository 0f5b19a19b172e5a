//! JF-005: Commands, the recipe of one script.
//!
//! A command owns its default recipe pieces, the lines accumulated so far,
//! free-form flavor extensions, and an optional back-link naming the
//! argument set and field it belongs to. The back-link is an identifier
//! pair, never an owning pointer.

use super::arguments::SetId;
use super::error::{Error, Result};
use super::template::TemplateString;
use super::types::CommandSpec;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Route from a command back to the argument set that declares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldLink {
    pub set: SetId,
    pub field: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Command {
    parts: Vec<TemplateString>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    extensions: IndexMap<String, serde_yaml_ng::Value>,
    #[serde(skip)]
    recipe: Vec<String>,
    #[serde(skip)]
    link: Option<FieldLink>,
}

impl Command {
    pub fn new(parts: Vec<TemplateString>) -> Self {
        Self {
            parts,
            ..Default::default()
        }
    }

    /// Parse `${name}` pieces.
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Result<Self> {
        let parts = parts
            .iter()
            .map(|p| TemplateString::dollar(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(parts))
    }

    /// Build from a job file declaration (matrix and flavor stay on the `CommandSpec`).
    pub fn from_spec(spec: &CommandSpec) -> Result<Self> {
        let mut command = Self::from_parts(&spec.parts)?;
        command.extensions = spec.extensions.clone();
        Ok(command)
    }

    pub fn with_extension(mut self, key: &str, value: serde_yaml_ng::Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }

    pub fn parts(&self) -> &[TemplateString] {
        &self.parts
    }

    /// Lines accumulated so far, in append order.
    pub fn recipe(&self) -> &[String] {
        &self.recipe
    }

    pub fn link(&self) -> Option<&FieldLink> {
        self.link.as_ref()
    }

    /// Field name this command is declared under, once linked.
    pub fn name(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.field.as_str())
    }

    /// Decode the extension block `key` (e.g. `slurm`) into `T`.
    pub fn extension<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.extensions.get(key) {
            None | Some(serde_yaml_ng::Value::Null) => Ok(None),
            Some(value) => serde_yaml_ng::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::config(format!("invalid '{}' block: {}", key, e))),
        }
    }

    pub(crate) fn set_link(&mut self, link: FieldLink) {
        self.link = Some(link);
    }

    pub(crate) fn push_line(&mut self, line: String) {
        self.recipe.push(line);
    }
}
