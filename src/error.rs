//! Overlay errors.

use option_path::{Path, PathError};
use std::error::Error;
use std::sync::Arc;

/// Boxed error returned by converters.
pub type BoxError = Box<dyn Error + Send + Sync>;

pub type Result<T, E = OverlayError> = std::result::Result<T, E>;

/// Failures surfaced by the storage engine, the views and the converter
/// pipeline. Cloneable so a failed conversion can be cached and raised again.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OverlayError {
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Cyclic converter dependency: {}", .chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    #[error("Cyclic conversion of {path} (resolving: {})", join_paths(.chain))]
    CyclicConversion { path: Path, chain: Vec<Path> },

    #[error("Conversion failed at {path}: {source}")]
    ConversionFailed {
        path: Path,
        #[source]
        source: Arc<dyn Error + Send + Sync>,
    },
}

impl OverlayError {
    /// Wrap whatever a converter raised at `path`. A cyclic conversion
    /// detected further down passes through unchanged.
    pub(crate) fn conversion(path: &Path, error: BoxError) -> Self {
        match error.downcast::<OverlayError>() {
            Ok(inner) => match *inner {
                cyclic @ OverlayError::CyclicConversion { .. } => cyclic,
                other => OverlayError::ConversionFailed {
                    path: path.clone(),
                    source: Arc::new(other),
                },
            },
            Err(error) => OverlayError::ConversionFailed {
                path: path.clone(),
                source: Arc::from(error),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OverlayError::KeyNotFound(_))
    }
}

fn join_paths(chain: &[Path]) -> String {
    chain
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
