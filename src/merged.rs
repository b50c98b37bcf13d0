//! Lazy merged views over a shared layer store.
//!
//! A [`MergedOptions`] is a cursor: a prefix plus a handle on the store,
//! the converter registry and the conversion cache. Child views share all
//! three, so indexing never copies layer data and a value converted through
//! one view is cached for every other view of the same store.
//!
//! Conversion state per absolute path:
//! - Unresolved: no cache entry
//! - Resolving: the converter is running; reaching it again is a cycle
//! - Resolved / Failed: cached, returned (or raised) without running again

use option_path::{Key, Path};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::converter::{ConvertContext, Converters, Pattern, Plan, Registration};
use crate::error::{OverlayError, Result};
use crate::source::Source;
use crate::storage::{Resolved, Storage};
use crate::value::{Mapping, Value};

#[derive(Debug, Clone)]
enum Conversion {
    Resolving,
    Resolved(Value),
    Failed(OverlayError),
}

#[derive(Debug, Default)]
struct Shared {
    storage: RefCell<Storage>,
    converters: RefCell<Converters>,
    cache: RefCell<HashMap<Path, Conversion>>,
}

/// A view of the merged layers at a prefix.
#[derive(Clone, Default)]
pub struct MergedOptions {
    shared: Rc<Shared>,
    prefix: Path,
}

/// Result of a raw lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// The key holds a mapping; keep indexing lazily through this view.
    Options(MergedOptions),
    Value(Value),
}

impl Item {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Item::Value(value) => Some(value),
            Item::Options(_) => None,
        }
    }

    pub fn as_options(&self) -> Option<&MergedOptions> {
        match self {
            Item::Options(options) => Some(options),
            Item::Value(_) => None,
        }
    }

    /// The plain value, materializing a view into a mapping.
    pub fn into_value(self) -> Result<Value> {
        match self {
            Item::Value(value) => Ok(value),
            Item::Options(options) => options.as_raw_mapping(),
        }
    }
}

impl MergedOptions {
    /// Empty view over a fresh store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh store holding one layer per value, all tagged with `source`.
    pub fn using<I>(layers: I, source: impl Into<Source>) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let options = Self::new();
        let source = source.into();
        for layer in layers {
            options.update(layer, source.clone());
        }
        options
    }

    /// Fresh store with one layer per `(key, value)` pair. Later pairs
    /// override earlier ones.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<Value>,
    {
        let options = Self::new();
        for (key, value) in pairs {
            options.set(key, value, Source::Unspecified);
        }
        options
    }

    /// Absolute prefix of this view.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// View at the root of the same store.
    pub fn root(&self) -> MergedOptions {
        self.at(Path::root())
    }

    fn at(&self, prefix: Path) -> MergedOptions {
        MergedOptions {
            shared: Rc::clone(&self.shared),
            prefix,
        }
    }

    /// Child view at `key` without checking that anything is there.
    pub fn prefixed(&self, key: impl Into<Key>) -> MergedOptions {
        self.at(self.path_for(&key.into()))
    }

    /// Append a layer at this view's prefix.
    pub fn update(&self, value: impl Into<Value>, source: impl Into<Source>) {
        self.shared
            .storage
            .borrow_mut()
            .add(self.prefix.clone(), value.into(), source.into());
    }

    /// Append a layer holding `value` at `key`.
    ///
    /// A dotted key that already resolves is written to the location it
    /// resolves to; otherwise every dot separates a segment.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>, source: impl Into<Source>) {
        let path = self.path_for(&key.into());
        self.shared
            .storage
            .borrow_mut()
            .add(path, value.into(), source.into());
    }

    /// Raw lookup. Mappings come back as child views.
    pub fn get(&self, key: impl Into<Key>) -> Result<Item> {
        let resolved = self.resolve(&key.into())?;
        Ok(match resolved {
            Resolved::Value { value, .. } => Item::Value(value),
            Resolved::Mapping { path } => Item::Options(self.at(path)),
        })
    }

    /// Raw lookup falling back to `default` when nothing defines `key`.
    pub fn get_or(&self, key: impl Into<Key>, default: impl Into<Value>) -> Item {
        self.get(key).unwrap_or_else(|_| Item::Value(default.into()))
    }

    /// Raw lookup with mappings materialized.
    pub fn get_value(&self, key: impl Into<Key>) -> Result<Value> {
        self.shared.storage.borrow().get(&self.prefix, &key.into())
    }

    /// Raw lookup with a key read from data: a dotted string or a sequence of
    /// segments. Anything else is an `InvalidPath`.
    pub fn get_at(&self, key: &Value) -> Result<Item> {
        let key = Key::try_from(key)?;
        self.get(key)
    }

    /// Lookup passed through the converter pipeline. Each converter runs at
    /// most once per path until that path is deleted.
    pub fn get_converted(&self, key: impl Into<Key>) -> Result<Value> {
        self.converted_at(&key.into(), &mut Vec::new())
    }

    /// Whether anything defines `key`. Never runs converters.
    pub fn contains(&self, key: impl Into<Key>) -> bool {
        self.shared.storage.borrow().contains(&self.prefix, &key.into())
    }

    /// Hide the newest definition of `key`, exposing the previous one, and
    /// drop cached conversions at, above and below it.
    pub fn delete(&self, key: impl Into<Key>) -> Result<()> {
        let deleted = self
            .shared
            .storage
            .borrow_mut()
            .delete(&self.prefix, &key.into())?;
        self.shared.cache.borrow_mut().retain(|path, state| {
            matches!(state, Conversion::Resolving) || !path.is_related(&deleted)
        });
        Ok(())
    }

    /// Keys visible at this view, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.shared.storage.borrow().keys_at(&self.prefix)
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Raw lookup of every visible key.
    pub fn items(&self) -> Result<Vec<(String, Item)>> {
        self.keys()
            .into_iter()
            .map(|key| {
                let item = self.get(Path::from_segments([key.as_str()]))?;
                Ok((key, item))
            })
            .collect()
    }

    /// Every visible definition of `key`, newest first.
    pub fn values_for(&self, key: impl Into<Key>) -> Vec<(Value, Source)> {
        self.shared
            .storage
            .borrow()
            .values_for(&self.prefix, &key.into())
    }

    /// Sources of every layer defining `key`, newest first.
    pub fn source_for(&self, key: impl Into<Key>) -> Vec<Source> {
        self.shared
            .storage
            .borrow()
            .source_for(&self.prefix, &key.into())
    }

    /// Converted merge of this whole view.
    pub fn as_mapping(&self) -> Result<Value> {
        self.get_converted(Key::root())
    }

    /// Raw merge of this whole view; converters are ignored.
    pub fn as_raw_mapping(&self) -> Result<Value> {
        self.shared.storage.borrow().get(&self.prefix, &Key::root())
    }

    /// Register a converter for the whole store.
    pub fn add_converter(&self, registration: Registration) -> Result<()> {
        self.shared.converters.borrow_mut().register(registration)
    }

    /// Convert every registered pattern, dependencies first.
    pub fn resolve_all(&self) -> Result<()> {
        let converters = self.shared.converters.borrow();
        let patterns: Vec<Pattern> = converters
            .order()?
            .into_iter()
            .flatten()
            .map(|r| r.pattern.clone())
            .collect();
        drop(converters);

        let mut chain = Vec::new();
        for pattern in &patterns {
            for path in self.concrete_paths(pattern) {
                self.convert_path(&path, &mut chain)?;
            }
        }
        Ok(())
    }

    fn resolve(&self, key: &Key) -> Result<Resolved> {
        self.shared.storage.borrow().resolve(&self.prefix, key)
    }

    fn path_for(&self, key: &Key) -> Path {
        if let Ok(resolved) = self.resolve(key) {
            return resolved.path().clone();
        }
        match key {
            Key::Path(path) => self.prefix.join(path),
            Key::Dotted(dotted) => {
                let mut path = self.prefix.clone();
                for segment in dotted.split('.').filter(|s| !s.is_empty()) {
                    path = path.child(segment);
                }
                path
            }
        }
    }

    /// Existing absolute paths a pattern names right now.
    fn concrete_paths(&self, pattern: &Pattern) -> Vec<Path> {
        let storage = self.shared.storage.borrow();
        match pattern {
            Pattern::Exact(path) => storage
                .resolve(&Path::root(), &Key::Path(path.clone()))
                .map(|resolved| vec![resolved.path().clone()])
                .unwrap_or_default(),
            Pattern::Children(base) => storage
                .keys_at(base)
                .into_iter()
                .map(|key| base.child(key))
                .collect(),
        }
    }

    pub(crate) fn converted_at(&self, key: &Key, chain: &mut Vec<Path>) -> Result<Value> {
        let resolved = self.resolve(key)?;
        self.convert_resolved(resolved, chain)
    }

    fn convert_path(&self, path: &Path, chain: &mut Vec<Path>) -> Result<Value> {
        let resolved = self
            .shared
            .storage
            .borrow()
            .resolve(&Path::root(), &Key::Path(path.clone()))?;
        self.convert_resolved(resolved, chain)
    }

    fn convert_resolved(&self, resolved: Resolved, chain: &mut Vec<Path>) -> Result<Value> {
        let path = resolved.path().clone();
        if let Some(state) = self.shared.cache.borrow().get(&path) {
            return match state {
                Conversion::Resolved(value) => Ok(value.clone()),
                Conversion::Failed(err) => Err(err.clone()),
                Conversion::Resolving => Err(OverlayError::CyclicConversion {
                    path,
                    chain: chain.clone(),
                }),
            };
        }

        let plan = self.shared.converters.borrow().plan(&path);
        let Some(plan) = plan else {
            return match resolved {
                Resolved::Value { value, .. } => Ok(value),
                Resolved::Mapping { path } => {
                    let keys = self.shared.storage.borrow().keys_at(&path);
                    let mut map = Mapping::new();
                    for key in keys {
                        let value = self.convert_path(&path.child(key.as_str()), chain)?;
                        map.insert(key, value);
                    }
                    Ok(Value::Mapping(map))
                }
            };
        };

        self.shared
            .cache
            .borrow_mut()
            .insert(path.clone(), Conversion::Resolving);
        chain.push(path.clone());
        let outcome = self.run(&path, plan, chain);
        chain.pop();

        let state = match &outcome {
            Ok(value) => Conversion::Resolved(value.clone()),
            Err(err) => Conversion::Failed(err.clone()),
        };
        self.shared.cache.borrow_mut().insert(path, state);
        outcome
    }

    fn run(&self, path: &Path, plan: Plan, chain: &mut Vec<Path>) -> Result<Value> {
        for pattern in &plan.dependencies {
            for dependency in self.concrete_paths(pattern) {
                if &dependency != path {
                    self.convert_path(&dependency, chain)?;
                }
            }
        }

        let raw = self
            .shared
            .storage
            .borrow()
            .get(&Path::root(), &Key::Path(path.clone()))?;
        let root = self.root();
        let mut ctx = ConvertContext::new(path.clone(), &root, chain);
        plan.converter
            .convert(&mut ctx, raw)
            .map_err(|err| OverlayError::conversion(path, err))
    }
}

impl PartialEq for MergedOptions {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared) && self.prefix == other.prefix
    }
}

impl fmt::Debug for MergedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedOptions")
            .field("prefix", &self.prefix)
            .field("layers", &self.shared.storage.borrow().len())
            .finish()
    }
}
