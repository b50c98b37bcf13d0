//! Layer store.
//!
//! An append-only list of `(prefix, data, source)` layers. Reads scan the
//! layers newest first; a layer only answers for a location when its data
//! actually reaches it, which gives a deep merge across layers without ever
//! copying or combining their contents:
//! - Mappings: merged by key across layers
//! - Everything else: newest definition of the exact location wins
//!
//! A scalar only answers for its own location. Looking up something below it
//! falls through to older layers, while key listings stop at it.
//!
//! Deleting never edits layer data. It records a tombstone on the newest layer
//! defining the location, which exposes the next older definition.

use option_path::{atoms_for, candidates, consume, Atom, Key, Path};
use std::collections::BTreeSet;

use crate::error::{OverlayError, Result};
use crate::source::Source;
use crate::value::{Mapping, Value};

/// One unit of added data.
#[derive(Debug, Clone)]
pub struct Layer {
    prefix: Path,
    data: Value,
    source: Source,

    /// Locations relative to `prefix` hidden by deletes. The empty path hides
    /// the whole layer.
    tombstones: Vec<Path>,
}

impl Layer {
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Whether a delete removed this layer entirely.
    pub fn is_removed(&self) -> bool {
        self.tombstones.iter().any(Path::is_empty)
    }

    fn is_hidden(&self, relative: &[String]) -> bool {
        self.tombstones.iter().any(|t| t.segments() == relative)
    }

    /// Copy of `value` (found at `relative`) without tombstoned children.
    fn visible(&self, value: &Value, relative: &mut Vec<String>) -> Value {
        let Value::Mapping(map) = value else {
            return value.clone();
        };
        let mut out = Mapping::new();
        for (key, child) in map {
            relative.push(key.clone());
            if !self.is_hidden(relative) {
                out.insert(key.clone(), self.visible(child, relative));
            }
            relative.pop();
        }
        Value::Mapping(out)
    }
}

/// What a single layer holds at a requested location.
enum Sighting<'s> {
    /// A value at the canonical absolute `path`.
    Found { path: Path, value: &'s Value },
    /// The layer's prefix continues past the location; its data is nested
    /// under `rest`.
    Below { path: Path, rest: &'s [String] },
    /// A non-mapping value sits on an ancestor of the location.
    Shadowed,
    Miss,
}

enum Walk<'s> {
    Found(&'s Value),
    Shadowed,
    Miss,
}

/// Outcome of resolving a location across all layers.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// The newest definition is not a mapping.
    Value { path: Path, value: Value },
    /// The newest definition is a mapping; its keys merge across layers.
    Mapping { path: Path },
}

impl Resolved {
    /// Canonical absolute path of the location.
    pub fn path(&self) -> &Path {
        match self {
            Resolved::Value { path, .. } | Resolved::Mapping { path } => path,
        }
    }
}

#[derive(Debug, Default)]
pub struct Storage {
    /// Oldest first.
    layers: Vec<Layer>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer. Layers are never reordered.
    pub fn add(&mut self, prefix: Path, data: Value, source: Source) {
        self.layers.push(Layer {
            prefix,
            data,
            source,
            tombstones: Vec::new(),
        });
    }

    /// All layers, oldest first, removed ones included.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Find the newest definition of `key` below `prefix`. Layers whose data
    /// holds a non-mapping on the way to the location are passed over.
    pub fn resolve(&self, prefix: &Path, key: &Key) -> Result<Resolved> {
        let atoms = atoms_for(prefix, key);
        for layer in self.layers.iter().rev() {
            match sight(layer, &atoms) {
                Sighting::Found { path, value } => {
                    return Ok(if value.is_mapping() {
                        Resolved::Mapping { path }
                    } else {
                        Resolved::Value {
                            path,
                            value: value.clone(),
                        }
                    });
                }
                Sighting::Below { path, .. } => return Ok(Resolved::Mapping { path }),
                Sighting::Shadowed | Sighting::Miss => {}
            }
        }

        if atoms.is_empty() {
            return Ok(Resolved::Mapping { path: Path::root() });
        }
        Err(OverlayError::KeyNotFound(describe(prefix, key)))
    }

    /// Merged value of `key` below `prefix`, mappings materialized.
    pub fn get(&self, prefix: &Path, key: &Key) -> Result<Value> {
        match self.resolve(prefix, key)? {
            Resolved::Value { value, .. } => Ok(value),
            Resolved::Mapping { path } => self.materialize(&path),
        }
    }

    fn materialize(&self, path: &Path) -> Result<Value> {
        let mut map = Mapping::new();
        for key in self.keys_at(path) {
            let child = path.child(key.clone());
            let value = self.get(&Path::root(), &Key::Path(child))?;
            map.insert(key, value);
        }
        Ok(Value::Mapping(map))
    }

    pub fn contains(&self, prefix: &Path, key: &Key) -> bool {
        self.resolve(prefix, key).is_ok()
    }

    /// Union of immediate child keys visible at the canonical `path`.
    pub fn keys_at(&self, path: &Path) -> Vec<String> {
        let key = Key::Path(path.clone());
        let atoms = key.atoms();
        let mut keys = BTreeSet::new();

        for layer in self.layers.iter().rev() {
            match sight(layer, &atoms) {
                Sighting::Found {
                    path: found,
                    value: Value::Mapping(map),
                } => {
                    let mut relative = found.segments()[layer.prefix.len()..].to_vec();
                    for k in map.keys() {
                        relative.push(k.clone());
                        if !layer.is_hidden(&relative) {
                            keys.insert(k.clone());
                        }
                        relative.pop();
                    }
                }
                Sighting::Found { .. } | Sighting::Shadowed => break,
                Sighting::Below { rest, .. } => {
                    keys.insert(rest[0].clone());
                }
                Sighting::Miss => {}
            }
        }

        keys.into_iter().collect()
    }

    /// Hide the newest definition of `key` below `prefix`, returning its
    /// canonical path. Older definitions become visible again.
    pub fn delete(&mut self, prefix: &Path, key: &Key) -> Result<Path> {
        let atoms = atoms_for(prefix, key);
        for layer in self.layers.iter_mut().rev() {
            let hit = match sight(layer, &atoms) {
                Sighting::Found { path, .. } => {
                    let relative = Path::from_segments(path.segments()[layer.prefix.len()..].iter().cloned());
                    Some((path, relative))
                }
                Sighting::Below { path, .. } => Some((path, Path::root())),
                Sighting::Shadowed | Sighting::Miss => None,
            };

            if let Some((path, relative)) = hit {
                layer.tombstones.push(relative);
                return Ok(path);
            }
        }
        Err(OverlayError::KeyNotFound(describe(prefix, key)))
    }

    /// Every visible definition of `key`, newest first, with its source.
    pub fn values_for(&self, prefix: &Path, key: &Key) -> Vec<(Value, Source)> {
        let atoms = atoms_for(prefix, key);
        let mut values = Vec::new();
        for layer in self.layers.iter().rev() {
            match sight(layer, &atoms) {
                Sighting::Found { path, value } => {
                    let mut relative = path.segments()[layer.prefix.len()..].to_vec();
                    values.push((layer.visible(value, &mut relative), layer.source.clone()));
                }
                Sighting::Below { rest, .. } => {
                    let mut relative = Vec::new();
                    let data = layer.visible(&layer.data, &mut relative);
                    values.push((data.nested_under(rest), layer.source.clone()));
                }
                Sighting::Shadowed | Sighting::Miss => {}
            }
        }
        values
    }

    /// Sources of every layer defining `key`, newest first.
    pub fn source_for(&self, prefix: &Path, key: &Key) -> Vec<Source> {
        self.values_for(prefix, key)
            .into_iter()
            .map(|(_, source)| source)
            .collect()
    }
}

fn sight<'s>(layer: &'s Layer, atoms: &[Atom<'_>]) -> Sighting<'s> {
    if layer.is_removed() {
        return Sighting::Miss;
    }

    let segments = layer.prefix.segments();
    let mut consumed = 0;
    for (i, segment) in segments.iter().enumerate() {
        if consumed == atoms.len() {
            return Sighting::Below {
                path: Path::from_segments(segments[..i].iter().cloned()),
                rest: &segments[i..],
            };
        }
        match consume(segment, &atoms[consumed..]) {
            Some(count) => consumed += count,
            None => return Sighting::Miss,
        }
    }

    let mut relative = Vec::new();
    match walk(layer, &layer.data, &atoms[consumed..], &mut relative) {
        Walk::Found(value) => {
            let mut path = segments.to_vec();
            path.extend(relative);
            Sighting::Found {
                path: Path::from_segments(path),
                value,
            }
        }
        Walk::Shadowed => Sighting::Shadowed,
        Walk::Miss => Sighting::Miss,
    }
}

/// Walk `atoms` into `value`, preferring the longest literal key at each
/// mapping and backtracking when a longer key leads nowhere.
fn walk<'s>(
    layer: &'s Layer,
    value: &'s Value,
    atoms: &[Atom<'_>],
    relative: &mut Vec<String>,
) -> Walk<'s> {
    if atoms.is_empty() {
        return Walk::Found(value);
    }
    let Value::Mapping(map) = value else {
        return Walk::Shadowed;
    };

    let mut shadowed = false;
    for (key, count) in candidates(atoms) {
        let Some(child) = map.get(&key) else {
            continue;
        };
        relative.push(key);
        if !layer.is_hidden(relative) {
            match walk(layer, child, &atoms[count..], relative) {
                Walk::Found(found) => return Walk::Found(found),
                Walk::Shadowed => shadowed = true,
                Walk::Miss => {}
            }
        }
        relative.pop();
    }

    if shadowed {
        Walk::Shadowed
    } else {
        Walk::Miss
    }
}

fn describe(prefix: &Path, key: &Key) -> String {
    match (prefix.is_empty(), key.is_root()) {
        (true, _) => key.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}.{}", prefix, key),
    }
}
