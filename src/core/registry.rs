//! JF-010: Flavor registry mapping names to implementations, populated on first use.
//!
//! The registry is an explicit value handed to whoever needs lookups. A
//! loader supplies the built-in entries the first time any lookup happens;
//! the result is memoized until `reload`. Entries added with `register`
//! survive reloads and shadow loaded entries of the same name.

use super::error::{Error, Result};
use crate::flavors::shell::ShellFlavor;
use crate::flavors::slurm::SlurmFlavor;
use crate::flavors::Flavor;
use indexmap::IndexMap;
use std::sync::{Arc, OnceLock};
use tracing::info;

pub type Entries = Vec<(String, Arc<dyn Flavor>)>;

type Loader = Box<dyn Fn() -> Entries + Send + Sync>;

pub struct Registry {
    loader: Loader,
    loaded: OnceLock<IndexMap<String, Arc<dyn Flavor>>>,
    registered: IndexMap<String, Arc<dyn Flavor>>,
}

/// Built-in flavors, each under its short name and its qualified alias.
pub fn builtin_flavors() -> Entries {
    let shell: Arc<dyn Flavor> = Arc::new(ShellFlavor);
    let slurm: Arc<dyn Flavor> = Arc::new(SlurmFlavor);
    vec![
        ("shell".to_string(), shell.clone()),
        ("shell_templates.Command".to_string(), shell),
        ("slurm".to_string(), slurm.clone()),
        ("slurm.Command".to_string(), slurm),
    ]
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry backed by the built-in flavors.
    pub fn new() -> Self {
        Self::with_loader(builtin_flavors)
    }

    pub fn with_loader<F>(loader: F) -> Self
    where
        F: Fn() -> Entries + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            loaded: OnceLock::new(),
            registered: IndexMap::new(),
        }
    }

    fn entries(&self) -> &IndexMap<String, Arc<dyn Flavor>> {
        self.loaded.get_or_init(|| {
            let entries: IndexMap<_, _> = (self.loader)().into_iter().collect();
            info!(count = entries.len(), "populated flavor registry");
            entries
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Flavor>> {
        self.registered
            .get(name)
            .or_else(|| self.entries().get(name))
            .cloned()
    }

    /// Like [`Registry::get`], but an unknown name is a configuration error.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Flavor>> {
        self.get(name).ok_or_else(|| {
            Error::config(format!(
                "unknown flavor '{}' (known: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn register(&mut self, name: impl Into<String>, flavor: Arc<dyn Flavor>) {
        self.registered.insert(name.into(), flavor);
    }

    /// Forget loaded entries; the loader runs again on the next lookup.
    pub fn reload(&mut self) {
        self.loaded.take();
    }

    /// Loaded names followed by registered ones not already listed.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().keys().cloned().collect();
        for name in self.registered.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("loaded", &self.loaded.get().map(|e| e.keys().collect::<Vec<_>>()))
            .field("registered", &self.registered.keys().collect::<Vec<_>>())
            .finish()
    }
}
