//! Explicit segment paths.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered sequence of key segments.
///
/// Segments are never split: `["a.b", "c"]` has two segments. Equality,
/// ordering and hashing are by segment sequence, so paths can key caches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// The empty path, addressing the root of a tree.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from segments, each taken verbatim.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Child path with one more segment.
    pub fn child(&self, segment: impl Into<String>) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// This path followed by all segments of `other`.
    pub fn join(&self, other: &Path) -> Path {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Whether `base` is a prefix of (or equal to) this path.
    pub fn starts_with(&self, base: &Path) -> bool {
        self.segments.len() >= base.segments.len()
            && self.segments[..base.segments.len()] == base.segments[..]
    }

    /// Whether either path is a prefix of the other.
    pub fn is_related(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// The remainder after `base` when `base` is a strict prefix of this path.
    pub fn without_prefix(&self, base: &Path) -> Option<Path> {
        if self.segments.len() > base.segments.len() && self.starts_with(base) {
            Some(Self {
                segments: self.segments[base.segments.len()..].to_vec(),
            })
        } else {
            None
        }
    }

    /// Segments joined with `.`.
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dotted())
    }
}

impl<S: Into<String>> FromIterator<S> for Path {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from_segments(iter)
    }
}
