//! JF-013: Error taxonomy.
//!
//! Every failure is deterministic given its inputs, so nothing here is
//! retried: errors propagate straight to the caller and abort the artifact
//! being generated.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving configuration and generating artifacts.
#[derive(Debug, Error)]
pub enum Error {
    /// A required field, template or record is missing or ambiguous.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("directory '{}' does not exist and create_if_not_exist is false", path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("'{}' already exists, set do_overwrite to replace it", path.display())]
    FileExists { path: PathBuf },

    #[error("unresolved placeholder '{name}' in template \"{template}\"")]
    UnresolvedPlaceholder { name: String, template: String },

    #[error("unclosed placeholder at position {position} in template \"{template}\"")]
    UnclosedPlaceholder { position: usize, template: String },

    /// Operation attempted on a builder that is already closed.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("cannot {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jf013_display_directory_not_found() {
        let e = Error::DirectoryNotFound {
            path: PathBuf::from("/runs/missing"),
        };
        assert!(e.to_string().contains("/runs/missing"));
        assert!(e.to_string().contains("create_if_not_exist"));
    }

    #[test]
    fn test_jf013_display_unresolved() {
        let e = Error::UnresolvedPlaceholder {
            name: "cmd".to_string(),
            template: "run ${cmd}".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "unresolved placeholder 'cmd' in template \"run ${cmd}\""
        );
    }

    #[test]
    fn test_jf013_io_keeps_source() {
        use std::error::Error as _;
        let e = Error::io(
            "write",
            "/x/y.sh",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(e.to_string().starts_with("cannot write /x/y.sh"));
        assert!(e.source().is_some());
    }
}
