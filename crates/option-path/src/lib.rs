//! Paths into layered option trees.
//!
//! A [`Path`] is an explicit sequence of segments, each used verbatim as a key.
//! A [`Key`] is what callers hand in: either a dotted string whose split points
//! are decided against the data it is resolved in (longest literal key first),
//! or an explicit [`Path`].

mod key;
mod path;

pub use key::{atoms_for, candidates, consume, Atom, Key};
pub use path::Path;

/// Malformed path input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("Invalid path {0:?}: empty segment")]
    EmptySegment(String),

    #[error("Invalid path: expected a string or a sequence of strings, got {0}")]
    UnsupportedInput(String),
}
