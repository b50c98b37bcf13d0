//! Converter registry and dependency layering.
//!
//! A converter turns the raw merged value at a path into its finished form.
//! Registrations are keyed by [`Pattern`] and may declare dependencies that
//! must be converted first. The registry refuses any registration that would
//! make the dependency graph cyclic.

use option_path::{Key, Path};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::error::{BoxError, OverlayError, Result};
use crate::merged::MergedOptions;
use crate::value::Value;

/// Turns a raw value into a finished value.
pub trait Converter {
    fn convert(&self, ctx: &mut ConvertContext<'_>, value: Value) -> Result<Value, BoxError>;
}

impl<F> Converter for F
where
    F: Fn(&mut ConvertContext<'_>, Value) -> Result<Value, BoxError>,
{
    fn convert(&self, ctx: &mut ConvertContext<'_>, value: Value) -> Result<Value, BoxError> {
        self(ctx, value)
    }
}

/// Pin a closure to the converter signature so its argument types are
/// inferred.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&mut ConvertContext<'_>, Value) -> Result<Value, BoxError>,
{
    f
}

/// Which paths a registration applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Exactly this path.
    Exact(Path),
    /// Every direct child of this path (`base.*`).
    Children(Path),
}

impl Pattern {
    /// `"a.b"` is exact, `"a.b.*"` matches children of `a.b`, `"*"` matches
    /// every top level key. Dots always separate segments here; use
    /// [`Pattern::Exact`] with an explicit path for keys containing dots.
    pub fn parse(pattern: &str) -> Self {
        let trimmed = pattern.trim_matches('.');
        if trimmed == "*" {
            return Pattern::Children(Path::root());
        }
        match trimmed.strip_suffix(".*") {
            Some(base) => Pattern::Children(split(base)),
            None => Pattern::Exact(split(trimmed)),
        }
    }

    pub fn base(&self) -> &Path {
        match self {
            Pattern::Exact(path) | Pattern::Children(path) => path,
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Pattern::Exact(exact) => exact == path,
            Pattern::Children(base) => path.len() == base.len() + 1 && path.starts_with(base),
        }
    }

    /// Whether some path matches both patterns.
    pub fn overlaps(&self, other: &Pattern) -> bool {
        match (self, other) {
            (Pattern::Exact(a), other) => other.matches(a),
            (this, Pattern::Exact(b)) => this.matches(b),
            (Pattern::Children(a), Pattern::Children(b)) => a == b,
        }
    }

    /// Whether every path matched lies strictly below `namespace`.
    pub fn in_namespace(&self, namespace: &Path) -> bool {
        match self {
            Pattern::Exact(path) => path.len() > namespace.len() && path.starts_with(namespace),
            Pattern::Children(base) => base.starts_with(namespace),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Pattern::Exact(_) => 1,
            Pattern::Children(_) => 0,
        }
    }
}

fn split(dotted: &str) -> Path {
    Path::from_segments(dotted.split('.').filter(|s| !s.is_empty()))
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(path) => write!(f, "{}", path),
            Pattern::Children(base) if base.is_empty() => write!(f, "*"),
            Pattern::Children(base) => write!(f, "{}.*", base),
        }
    }
}

impl From<&str> for Pattern {
    fn from(pattern: &str) -> Self {
        Pattern::parse(pattern)
    }
}

impl From<Path> for Pattern {
    fn from(path: Path) -> Self {
        Pattern::Exact(path)
    }
}

impl<const N: usize> From<[&str; N]> for Pattern {
    fn from(segments: [&str; N]) -> Self {
        Pattern::Exact(Path::from_segments(segments))
    }
}

/// Something that must be converted before a registration runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    Pattern(Pattern),
    /// Every other registration in the namespace, except those that
    /// themselves wait on a namespace or already depend on the dependent.
    Namespace(Path),
}

/// A converter bound to a pattern plus its declared dependencies.
#[derive(Clone)]
pub struct Registration {
    pub pattern: Pattern,
    pub dependencies: Vec<Dependency>,
    converter: Rc<dyn Converter>,
}

impl Registration {
    pub fn new(pattern: impl Into<Pattern>, converter: impl Converter + 'static) -> Self {
        Self::from_rc(pattern, Rc::new(converter))
    }

    pub fn from_rc(pattern: impl Into<Pattern>, converter: Rc<dyn Converter>) -> Self {
        Self {
            pattern: pattern.into(),
            dependencies: Vec::new(),
            converter,
        }
    }

    /// Convert whatever `pattern` names first.
    pub fn after(mut self, pattern: impl Into<Pattern>) -> Self {
        self.dependencies.push(Dependency::Pattern(pattern.into()));
        self
    }

    /// Convert everything else registered under `namespace` first.
    pub fn after_all_in(mut self, namespace: impl Into<Key>) -> Self {
        let namespace = match namespace.into() {
            Key::Path(path) => path,
            Key::Dotted(dotted) => split(&dotted),
        };
        self.dependencies.push(Dependency::Namespace(namespace));
        self
    }

    pub fn converter(&self) -> Rc<dyn Converter> {
        Rc::clone(&self.converter)
    }

    fn waits_on_namespace(&self) -> bool {
        self.dependencies
            .iter()
            .any(|d| matches!(d, Dependency::Namespace(_)))
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("pattern", &self.pattern)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// What the pipeline needs to convert one path.
pub(crate) struct Plan {
    pub converter: Rc<dyn Converter>,
    pub dependencies: Vec<Pattern>,
}

/// Registered converters, in registration order.
#[derive(Debug, Default)]
pub struct Converters {
    registrations: Vec<Registration>,
}

impl Converters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Add a registration. Fails with `CyclicDependency`, leaving the
    /// registry unchanged, if it would close a cycle.
    pub fn register(&mut self, registration: Registration) -> Result<()> {
        self.registrations.push(registration);
        let checked = self.order().map(drop);
        if let Err(err) = checked {
            self.registrations.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Most specific registration matching `path`: exact beats children and
    /// the most recent registration wins a tie.
    pub fn find(&self, path: &Path) -> Option<&Registration> {
        self.find_index(path).map(|index| &self.registrations[index])
    }

    fn find_index(&self, path: &Path) -> Option<usize> {
        self.registrations
            .iter()
            .enumerate()
            .filter(|(_, r)| r.pattern.matches(path))
            .max_by_key(|(index, r)| (r.pattern.rank(), *index))
            .map(|(index, _)| index)
    }

    pub(crate) fn plan(&self, path: &Path) -> Option<Plan> {
        let index = self.find_index(path)?;
        let found = &self.registrations[index];

        let mut dependencies: Vec<Pattern> = found
            .dependencies
            .iter()
            .filter_map(|d| match d {
                Dependency::Pattern(p) => Some(p.clone()),
                Dependency::Namespace(_) => None,
            })
            .collect();
        for dep in self.namespace_edges(index) {
            dependencies.push(self.registrations[dep].pattern.clone());
        }

        Some(Plan {
            converter: found.converter(),
            dependencies,
        })
    }

    /// Registrations in dependency layers: every registration in a layer only
    /// depends on registrations in earlier layers.
    pub fn order(&self) -> Result<Vec<Vec<&Registration>>> {
        let edges: Vec<Vec<usize>> = (0..self.registrations.len())
            .map(|index| {
                let mut deps = self.explicit_edges(index);
                deps.extend(self.namespace_edges(index));
                deps.sort_unstable();
                deps.dedup();
                deps
            })
            .collect();

        let mut layering = Layering {
            edges: &edges,
            layer_of: vec![None; edges.len()],
            chain: Vec::new(),
        };
        for index in 0..edges.len() {
            layering.visit(index).map_err(|chain| OverlayError::CyclicDependency {
                chain: chain
                    .into_iter()
                    .map(|i| self.registrations[i].pattern.to_string())
                    .collect(),
            })?;
        }

        let depth = layering.layer_of.iter().flatten().max().map_or(0, |d| d + 1);
        let mut layers: Vec<Vec<&Registration>> = vec![Vec::new(); depth];
        for (index, layer) in layering.layer_of.iter().enumerate() {
            if let Some(layer) = layer {
                layers[*layer].push(&self.registrations[index]);
            }
        }
        Ok(layers)
    }

    /// Registrations named by `index`'s pattern dependencies. A registration
    /// whose own pattern is named depends on itself.
    fn explicit_edges(&self, index: usize) -> Vec<usize> {
        let mut edges = Vec::new();
        for dep in &self.registrations[index].dependencies {
            let Dependency::Pattern(pattern) = dep else {
                continue;
            };
            for (other, registration) in self.registrations.iter().enumerate() {
                if registration.pattern.overlaps(pattern) {
                    edges.push(other);
                }
            }
        }
        edges
    }

    fn namespace_edges(&self, index: usize) -> Vec<usize> {
        let mut edges = Vec::new();
        for dep in &self.registrations[index].dependencies {
            let Dependency::Namespace(namespace) = dep else {
                continue;
            };
            for (other, registration) in self.registrations.iter().enumerate() {
                if other == index
                    || registration.waits_on_namespace()
                    || !registration.pattern.in_namespace(namespace)
                    || self.reaches(other, index)
                {
                    continue;
                }
                edges.push(other);
            }
        }
        edges
    }

    /// Whether `from` reaches `to` through pattern dependencies.
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            for next in self.explicit_edges(current) {
                if next == to {
                    return true;
                }
                stack.push(next);
            }
        }
        false
    }
}

struct Layering<'e> {
    edges: &'e [Vec<usize>],
    layer_of: Vec<Option<usize>>,
    chain: Vec<usize>,
}

impl Layering<'_> {
    /// Depth first placement. Returns the cycle, ending with the repeated
    /// registration, when one is found.
    fn visit(&mut self, index: usize) -> std::result::Result<usize, Vec<usize>> {
        if let Some(layer) = self.layer_of[index] {
            return Ok(layer);
        }
        if self.chain.contains(&index) {
            let mut cycle = self.chain.clone();
            cycle.push(index);
            return Err(cycle);
        }

        self.chain.push(index);
        let mut layer = 0;
        for &dep in &self.edges[index] {
            layer = layer.max(self.visit(dep)? + 1);
        }
        self.chain.pop();

        self.layer_of[index] = Some(layer);
        Ok(layer)
    }
}

/// Handed to a converter while it runs.
pub struct ConvertContext<'a> {
    path: Path,
    options: &'a MergedOptions,
    chain: &'a mut Vec<Path>,
}

impl<'a> ConvertContext<'a> {
    pub(crate) fn new(path: Path, options: &'a MergedOptions, chain: &'a mut Vec<Path>) -> Self {
        Self {
            path,
            options,
            chain,
        }
    }

    /// Absolute path being converted.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root view over the store being converted.
    pub fn options(&self) -> &MergedOptions {
        self.options
    }

    /// Paths whose conversion is in progress, outermost first.
    pub fn chain(&self) -> &[Path] {
        self.chain.as_slice()
    }

    /// Raw merged value of `key` from the root.
    pub fn get(&self, key: impl Into<Key>) -> Result<Value> {
        self.options.get_value(key)
    }

    /// Converted value of `key` from the root. Conversions started here count
    /// towards cycle detection of the current one.
    pub fn get_converted(&mut self, key: impl Into<Key>) -> Result<Value> {
        self.options.converted_at(&key.into(), self.chain)
    }

    /// Context for a value nested under the current path.
    pub fn child(&mut self, segment: impl Into<String>) -> ConvertContext<'_> {
        ConvertContext {
            path: self.path.child(segment),
            options: self.options,
            chain: &mut *self.chain,
        }
    }
}
