//! Collecting configuration files into a merged view.
//!
//! Each file becomes one layer tagged with its path and the SHA-256 digest of
//! its raw bytes. TOML and JSON are recognised by extension.
//!
//! A collector built with [`Collector::with_includes`] also follows the files a
//! collected file names under that key, relative to its `config_root`:
//!
//! ```toml
//! includes = ["local.toml", { path = "db.json", prefix = "services.db" }]
//! ```

use chrono::Utc;
use option_path::{Key, Path};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path as FsPath, PathBuf};
use tracing::{debug, info};

use crate::converter::{ConvertContext, Converter, Registration};
use crate::error::{BoxError, OverlayError};
use crate::merged::MergedOptions;
use crate::source::Source;
use crate::value::{Mapping, Value};

/// Key injected into every collected file holding its directory.
pub const CONFIG_ROOT: &str = "config_root";

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Unsupported configuration format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Expected a mapping at the top of {}, got {kind}", .path.display())]
    NotAMapping { path: PathBuf, kind: &'static str },

    #[error("Bad include in {}: {message}", .path.display())]
    BadInclude { path: PathBuf, message: String },

    #[error("Some of the configuration was broken: {}", join_errors(.0))]
    Broken(Vec<CollectError>),

    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

fn join_errors(errors: &[CollectError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Read and parse one file, returning its value and digest.
///
/// An empty file reads as an empty mapping.
pub fn read_file(path: &FsPath) -> Result<(Value, String), CollectError> {
    let bytes = fs::read(path).map_err(|source| CollectError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let contents = String::from_utf8(bytes).map_err(|e| CollectError::Parse {
        path: path.to_path_buf(),
        message: format!("Invalid UTF-8: {}", e),
    })?;
    if contents.trim().is_empty() {
        return Ok((Value::Mapping(Mapping::new()), digest));
    }

    let parse_error = |message: String| CollectError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let value = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str::<toml::Value>(&contents)
            .map(Value::from)
            .map_err(|e| parse_error(format!("TOML parse error: {}", e)))?,
        Some("json") => serde_json::from_str::<serde_json::Value>(&contents)
            .map(Value::from)
            .map_err(|e| parse_error(format!("JSON parse error: {}", e)))?,
        _ => return Err(CollectError::UnsupportedFormat(path.to_path_buf())),
    };

    Ok((value, digest))
}

/// Another file named by a collected file.
#[derive(Debug, Clone, PartialEq)]
struct Include {
    path: PathBuf,
    prefix: Path,
}

/// Builds a root [`MergedOptions`] from files and registers converters on it.
#[derive(Debug, Default)]
pub struct Collector {
    options: MergedOptions,
    done: HashSet<PathBuf>,
    includes: Option<String>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect into an existing view.
    pub fn with_options(options: MergedOptions) -> Self {
        Self {
            options,
            done: HashSet::new(),
            includes: None,
        }
    }

    /// Follow the files each collected file lists under `key`.
    pub fn with_includes(mut self, key: impl Into<String>) -> Self {
        self.includes = Some(key.into());
        self
    }

    pub fn options(&self) -> &MergedOptions {
        &self.options
    }

    /// Add an in-memory layer at the root.
    pub fn add_value(&self, value: impl Into<Value>, source: impl Into<Source>) {
        self.options.update(value, source);
    }

    /// Collect a file at the root. Returns whether a layer was added; missing,
    /// empty and already collected files add nothing.
    pub fn collect(&mut self, path: impl AsRef<FsPath>) -> Result<bool, CollectError> {
        self.collect_under(path, Path::root())
    }

    /// Collect a file with its content nested under `prefix`, then any files
    /// it includes. A single broken file is returned as is; several come back
    /// together as [`CollectError::Broken`].
    pub fn collect_under(
        &mut self,
        path: impl AsRef<FsPath>,
        prefix: Path,
    ) -> Result<bool, CollectError> {
        let mut errors = Vec::new();
        let added = self.add_source(path.as_ref(), prefix, &mut errors);
        match errors.len() {
            0 => Ok(added > 0),
            1 => Err(errors.remove(0)),
            _ => Err(CollectError::Broken(errors)),
        }
    }

    /// Collect every file at the root, carrying on past broken ones. Returns
    /// the number of layers added, or every failure at once.
    pub fn collect_all<I, P>(&mut self, paths: I) -> Result<usize, CollectError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<FsPath>,
    {
        let mut errors = Vec::new();
        let mut added = 0;
        for path in paths {
            added += self.add_source(path.as_ref(), Path::root(), &mut errors);
        }

        if errors.is_empty() {
            Ok(added)
        } else {
            Err(CollectError::Broken(errors))
        }
    }

    fn add_source(&mut self, path: &FsPath, prefix: Path, errors: &mut Vec<CollectError>) -> usize {
        match self.add_file(path, prefix) {
            Ok(Some(includes)) => {
                let mut added = 1;
                for include in includes {
                    debug!("Following {} from {}", include.path.display(), path.display());
                    added += self.add_source(&include.path, include.prefix, errors);
                }
                added
            }
            Ok(None) => 0,
            Err(err) => {
                debug!("Broken configuration {}: {}", path.display(), err);
                errors.push(err);
                0
            }
        }
    }

    /// Add one file as a layer, returning the files it includes. `None` when
    /// nothing was added.
    fn add_file(&mut self, path: &FsPath, prefix: Path) -> Result<Option<Vec<Include>>, CollectError> {
        if !path.exists() {
            debug!("Skipping missing configuration {}", path.display());
            return Ok(None);
        }

        let canonical = fs::canonicalize(path).map_err(|source| CollectError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !self.done.insert(canonical.clone()) {
            debug!("Already collected {}", canonical.display());
            return Ok(None);
        }

        info!("Adding configuration from {}", canonical.display());
        let (value, digest) = read_file(path)?;
        let mut map = match value {
            Value::Mapping(map) => map,
            other => {
                return Err(CollectError::NotAMapping {
                    path: path.to_path_buf(),
                    kind: other.kind(),
                })
            }
        };
        if map.is_empty() {
            return Ok(None);
        }

        let dir = canonical.parent().unwrap_or(FsPath::new("/"));
        let includes = match &self.includes {
            Some(key) => match map.get(key) {
                Some(listed) => parse_includes(listed, dir).map_err(|message| {
                    CollectError::BadInclude {
                        path: path.to_path_buf(),
                        message,
                    }
                })?,
                None => Vec::new(),
            },
            None => Vec::new(),
        };
        map.insert(CONFIG_ROOT.to_string(), Value::from(dir.display().to_string()));

        let source = Source::File {
            path: path.display().to_string(),
            digest,
            loaded_at: Utc::now(),
        };
        self.options
            .update(Value::Mapping(map).nested_under(prefix.segments()), source);
        Ok(Some(includes))
    }

    /// Register one converter per key. Each announces itself when it runs;
    /// keys nothing defines are seeded with `Null` so they still convert.
    pub fn register_converters<I, K, C>(&self, specs: I) -> Result<(), OverlayError>
    where
        I: IntoIterator<Item = (K, C)>,
        K: Into<Key>,
        C: Converter + 'static,
    {
        for (key, converter) in specs {
            let path = self.options.prefixed(key).prefix().clone();
            self.options
                .add_converter(Registration::new(path.clone(), Announced(converter)))?;
            if !self.options.contains(&path) {
                self.options
                    .set(path, Value::Null, Source::named("<register_converters>"));
            }
        }
        Ok(())
    }

    /// Run every registered converter and hand back the finished view.
    pub fn prepare(self) -> Result<MergedOptions, OverlayError> {
        self.options.resolve_all()?;
        Ok(self.options)
    }
}

/// Entries are a file name, or `{ path, prefix }` with `prefix` a dotted
/// string or a sequence of segments. Names are relative to `dir`.
fn parse_includes(listed: &Value, dir: &FsPath) -> Result<Vec<Include>, String> {
    let entries = match listed {
        Value::Sequence(entries) => entries.as_slice(),
        other => return Err(format!("expected a sequence, got {}", other.kind())),
    };

    entries
        .iter()
        .map(|entry| match entry {
            Value::String(name) => Ok(Include {
                path: dir.join(name),
                prefix: Path::root(),
            }),
            Value::Mapping(fields) => {
                let name = fields
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "include is missing a \"path\" string".to_string())?;
                let prefix = match fields.get("prefix") {
                    Some(prefix) => match Key::try_from(prefix).map_err(|e| e.to_string())? {
                        Key::Dotted(dotted) => dotted.split('.').filter(|s| !s.is_empty()).collect(),
                        Key::Path(path) => path,
                    },
                    None => Path::root(),
                };
                Ok(Include {
                    path: dir.join(name),
                    prefix,
                })
            }
            other => Err(format!("expected a file name or a mapping, got {}", other.kind())),
        })
        .collect()
}

struct Announced<C>(C);

impl<C: Converter> Converter for Announced<C> {
    fn convert(&self, ctx: &mut ConvertContext<'_>, value: Value) -> Result<Value, BoxError> {
        info!("Converting {}", ctx.path());
        self.0.convert(ctx, value)
    }
}
