//! `{key}` placeholder expansion against a merged view.
//!
//! `"{a.b}"` is replaced by the converted value at `a.b`; referenced strings
//! are expanded in turn. `{{` and `}}` produce literal braces. A string that
//! is exactly one placeholder yields the referenced value itself, so
//! `"{ports}"` can stand for a sequence or a mapping.
//!
//! `{name:spec}` hands the value (or, for passthrough specs, the bare name)
//! to a [`SpecialFormat`] hook.

use regex_lite::{Captures, Regex};
use std::sync::OnceLock;

use crate::converter::{ConvertContext, Converter};
use crate::error::{BoxError, OverlayError};
use crate::merged::MergedOptions;
use crate::value::{Mapping, Value};

const PLACEHOLDER: &str = r"\{\{|\}\}|\{([^{}]*)\}";

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PLACEHOLDER).expect("placeholder pattern is valid"))
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FormatError {
    #[error("Recursive option: {}", .chain.join(" -> "))]
    Recursive { chain: Vec<String> },

    #[error("Can't find key in options: {key} (chain: {})", .chain.join(" -> "))]
    MissingKey { key: String, chain: Vec<String> },

    #[error("Unknown format spec {spec:?} for {key}")]
    UnknownSpec { key: String, spec: String },

    #[error(transparent)]
    Options(#[from] OverlayError),
}

/// Hook for `{name:spec}` placeholders.
pub trait SpecialFormat {
    /// Specs whose placeholder name is passed through literally instead of
    /// being looked up.
    fn passthrough(&self, _spec: &str) -> bool {
        false
    }

    /// Format `value` for `spec`, or `None` if the spec is not handled.
    fn format_special(&self, _value: &Value, _spec: &str) -> Option<Value> {
        None
    }
}

/// No special specs; any `{name:spec}` is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSpecial;

impl SpecialFormat for NoSpecial {}

impl<S: SpecialFormat + ?Sized> SpecialFormat for &S {
    fn passthrough(&self, spec: &str) -> bool {
        (**self).passthrough(spec)
    }

    fn format_special(&self, value: &Value, spec: &str) -> Option<Value> {
        (**self).format_special(value, spec)
    }
}

enum Piece {
    Text(String),
    Value(Value),
}

pub struct MergedOptionsFormatter<'a, S = NoSpecial> {
    options: &'a MergedOptions,
    special: S,
}

impl<'a> MergedOptionsFormatter<'a> {
    pub fn new(options: &'a MergedOptions) -> Self {
        Self::with_special(options, NoSpecial)
    }
}

impl<'a, S: SpecialFormat> MergedOptionsFormatter<'a, S> {
    pub fn with_special(options: &'a MergedOptions, special: S) -> Self {
        Self { options, special }
    }

    /// Expand placeholders in every string inside `value`.
    pub fn format(&self, value: &Value) -> Result<Value, FormatError> {
        self.format_in(value, &mut Vec::new())
    }

    pub fn format_str(&self, text: &str) -> Result<Value, FormatError> {
        self.expand(text, &mut Vec::new())
    }

    fn format_in(&self, value: &Value, chain: &mut Vec<String>) -> Result<Value, FormatError> {
        match value {
            Value::String(text) => self.expand(text, chain),
            Value::Sequence(items) => items
                .iter()
                .map(|item| self.format_in(item, chain))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence),
            Value::Mapping(map) => {
                let mut out = Mapping::new();
                for (key, item) in map {
                    out.insert(key.clone(), self.format_in(item, chain)?);
                }
                Ok(Value::Mapping(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn expand(&self, text: &str, chain: &mut Vec<String>) -> Result<Value, FormatError> {
        let mut pieces = Vec::new();
        let mut last = 0;
        for caps in placeholder().captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > last {
                pieces.push(Piece::Text(text[last..whole.start()].to_string()));
            }
            last = whole.end();
            pieces.push(self.field(&caps, chain)?);
        }
        if last < text.len() {
            pieces.push(Piece::Text(text[last..].to_string()));
        }

        if pieces.len() == 1 && matches!(pieces[0], Piece::Value(_)) {
            if let Some(Piece::Value(value)) = pieces.pop() {
                return Ok(value);
            }
        }

        let mut out = String::new();
        for piece in pieces {
            match piece {
                Piece::Text(text) => out.push_str(&text),
                Piece::Value(value) => out.push_str(&value.to_string()),
            }
        }
        Ok(Value::String(out))
    }

    fn field(&self, caps: &Captures<'_>, chain: &mut Vec<String>) -> Result<Piece, FormatError> {
        let Some(inner) = caps.get(1) else {
            let escaped = if &caps[0] == "{{" { "{" } else { "}" };
            return Ok(Piece::Text(escaped.to_string()));
        };

        let (name, spec) = match inner.as_str().split_once(':') {
            Some((name, spec)) => (name.trim(), spec),
            None => (inner.as_str().trim(), ""),
        };

        if chain.iter().any(|seen| seen == name) {
            let mut chain = chain.clone();
            chain.push(name.to_string());
            return Err(FormatError::Recursive { chain });
        }

        let value = if !spec.is_empty() && self.special.passthrough(spec) {
            Value::from(name)
        } else {
            self.lookup(name, chain)?
        };

        if spec.is_empty() {
            return Ok(Piece::Value(value));
        }
        match self.special.format_special(&value, spec) {
            Some(formatted) => Ok(Piece::Value(formatted)),
            None => Err(FormatError::UnknownSpec {
                key: name.to_string(),
                spec: spec.to_string(),
            }),
        }
    }

    fn lookup(&self, name: &str, chain: &mut Vec<String>) -> Result<Value, FormatError> {
        let value = match self.options.get_converted(name) {
            Ok(value) => value,
            Err(OverlayError::KeyNotFound(_)) => {
                return Err(FormatError::MissingKey {
                    key: name.to_string(),
                    chain: chain.clone(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        let Value::String(text) = value else {
            return Ok(value);
        };
        chain.push(name.to_string());
        let expanded = self.expand(&text, chain);
        chain.pop();
        expanded
    }
}

/// Converter expanding placeholders in the value it is given, looking keys
/// up from the root of the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatStrings<S = NoSpecial> {
    special: S,
}

impl FormatStrings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: SpecialFormat> FormatStrings<S> {
    pub fn with_special(special: S) -> Self {
        Self { special }
    }
}

impl<S: SpecialFormat> Converter for FormatStrings<S> {
    fn convert(&self, ctx: &mut ConvertContext<'_>, value: Value) -> Result<Value, BoxError> {
        let formatter = MergedOptionsFormatter::with_special(ctx.options(), &self.special);
        Ok(formatter.format(&value)?)
    }
}
