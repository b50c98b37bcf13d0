//! Layer provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a layer came from. Only used for diagnostics and introspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Source {
    #[default]
    Unspecified,

    /// Free-form tag such as `"<defaults>"` or `"cli"`.
    Named { name: String },

    /// A configuration file read from disk
    File {
        /// File path as given to the collector
        path: String,

        /// SHA-256 digest of raw file bytes
        digest: String,

        /// When the file was read
        loaded_at: DateTime<Utc>,
    },
}

impl Source {
    pub fn named(name: impl Into<String>) -> Self {
        Source::Named { name: name.into() }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Unspecified => write!(f, "<unspecified>"),
            Source::Named { name } => write!(f, "{}", name),
            Source::File { path, digest, .. } => {
                let short = digest.get(..12).unwrap_or(digest);
                write!(f, "{} (sha256:{})", path, short)
            }
        }
    }
}

impl From<&str> for Source {
    fn from(name: &str) -> Self {
        Source::named(name)
    }
}

impl From<String> for Source {
    fn from(name: String) -> Self {
        Source::named(name)
    }
}
