//! Caller-facing keys and the atom matching used to resolve them.
//!
//! A dotted key such as `"a.b.c"` is broken into atoms `a`, `b`, `c` where
//! `b` and `c` are *glued*: they may be rejoined with their predecessor to
//! form a literal key (`"a.b"`, `"a.b.c"`). Atoms from an explicit [`Path`]
//! are never glued, so `["a", "b"]` can only ever match two separate keys.

use crate::{Path, PathError};
use std::fmt;

/// An address handed to a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Dotted string; split points are decided against the data.
    Dotted(String),
    /// Explicit segments; never split.
    Path(Path),
}

/// One piece of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atom<'a> {
    pub text: &'a str,
    /// May be joined with the previous atom using `.`.
    pub glued: bool,
}

impl Key {
    /// Dotted key with leading and trailing dots trimmed.
    pub fn dotted(key: impl Into<String>) -> Self {
        let key = key.into();
        Key::Dotted(key.trim_matches('.').to_string())
    }

    /// Strict parse of a dotted key. Empty interior segments (`"a..b"`) are
    /// rejected instead of being collapsed.
    pub fn parse(key: &str) -> Result<Self, PathError> {
        let trimmed = key.trim_matches('.');
        if !trimmed.is_empty() && trimmed.split('.').any(str::is_empty) {
            return Err(PathError::EmptySegment(key.to_string()));
        }
        Ok(Key::Dotted(trimmed.to_string()))
    }

    pub fn root() -> Self {
        Key::Path(Path::root())
    }

    pub fn is_root(&self) -> bool {
        match self {
            Key::Dotted(s) => s.is_empty(),
            Key::Path(p) => p.is_empty(),
        }
    }

    /// Atoms of this key alone.
    pub fn atoms(&self) -> Vec<Atom<'_>> {
        match self {
            Key::Dotted(s) => s
                .split('.')
                .filter(|part| !part.is_empty())
                .enumerate()
                .map(|(i, text)| Atom { text, glued: i > 0 })
                .collect(),
            Key::Path(p) => p
                .segments()
                .iter()
                .map(|s| Atom {
                    text: s.as_str(),
                    glued: false,
                })
                .collect(),
        }
    }
}

/// Atoms for `key` resolved below the explicit `prefix`.
pub fn atoms_for<'a>(prefix: &'a Path, key: &'a Key) -> Vec<Atom<'a>> {
    let mut atoms: Vec<Atom<'a>> = prefix
        .segments()
        .iter()
        .map(|s| Atom {
            text: s.as_str(),
            glued: false,
        })
        .collect();
    atoms.extend(key.atoms());
    atoms
}

/// Literal keys that can be formed from the start of `atoms`, longest first,
/// each with the number of atoms it consumes.
pub fn candidates(atoms: &[Atom<'_>]) -> Vec<(String, usize)> {
    let Some(first) = atoms.first() else {
        return Vec::new();
    };

    let run = 1 + atoms[1..].iter().take_while(|a| a.glued).count();
    let mut joined = first.text.to_string();
    let mut found = vec![(joined.clone(), 1)];
    for (i, atom) in atoms[1..run].iter().enumerate() {
        joined.push('.');
        joined.push_str(atom.text);
        found.push((joined.clone(), i + 2));
    }
    found.reverse();
    found
}

/// Number of atoms consumed when the literal `segment` matches the start of
/// `atoms`.
pub fn consume(segment: &str, atoms: &[Atom<'_>]) -> Option<usize> {
    let first = atoms.first()?;
    if !segment.starts_with(first.text) {
        return None;
    }
    candidates(atoms)
        .into_iter()
        .find(|(joined, _)| joined == segment)
        .map(|(_, count)| count)
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Dotted(s) => write!(f, "{}", s),
            Key::Path(p) => write!(f, "{}", p),
        }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::dotted(key)
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::dotted(key)
    }
}

impl From<&String> for Key {
    fn from(key: &String) -> Self {
        Key::dotted(key.as_str())
    }
}

impl From<Path> for Key {
    fn from(path: Path) -> Self {
        Key::Path(path)
    }
}

impl From<&Path> for Key {
    fn from(path: &Path) -> Self {
        Key::Path(path.clone())
    }
}

impl From<Vec<String>> for Key {
    fn from(segments: Vec<String>) -> Self {
        Key::Path(Path::from_segments(segments))
    }
}

impl From<Vec<&str>> for Key {
    fn from(segments: Vec<&str>) -> Self {
        Key::Path(Path::from_segments(segments))
    }
}

impl From<&[&str]> for Key {
    fn from(segments: &[&str]) -> Self {
        Key::Path(Path::from_segments(segments.iter().copied()))
    }
}

impl<const N: usize> From<[&str; N]> for Key {
    fn from(segments: [&str; N]) -> Self {
        Key::Path(Path::from_segments(segments))
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}
