//! Declarative record converters.
//!
//! A [`RecordSpec`] lists the fields a mapping should end up with. Used as a
//! converter it picks each field out of the raw mapping, runs the field's own
//! converter on it and drops every key it does not declare.
//!
//! Field converters and errors see the path of the key the value was read
//! from, so a field renamed with [`Field::wanted`] reports where it lives in
//! the configuration rather than its name in the record.
//!
//! ```ignore
//! let spec = RecordSpec::builder()
//!     .field(Field::required("host").with(expect_kind("string")))
//!     .field(Field::optional("port").wanted("port_number").default_value(80))
//!     .build();
//! options.add_converter(Registration::new("server", spec))?;
//! ```

use option_path::Path;
use std::fmt;
use std::rc::Rc;

use crate::converter::{from_fn, ConvertContext, Converter};
use crate::error::BoxError;
use crate::value::{Mapping, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("Expected a mapping at {path}, got {got}")]
    ExpectedMapping { path: Path, got: &'static str },

    #[error("Missing required field {field} at {path}")]
    MissingField { path: Path, field: String },

    #[error("Expected {expected} at {path}, got {got}")]
    WrongKind {
        path: Path,
        expected: &'static str,
        got: &'static str,
    },
}

/// One declared field.
#[derive(Clone)]
pub struct Field {
    name: String,
    wanted: Option<String>,
    converter: Option<Rc<dyn Converter>>,
    required: bool,
    default: Option<Value>,
}

impl Field {
    pub fn required(name: impl Into<String>) -> Self {
        Self::new(name.into(), true)
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self::new(name.into(), false)
    }

    fn new(name: String, required: bool) -> Self {
        Self {
            name,
            wanted: None,
            converter: None,
            required,
            default: None,
        }
    }

    /// Read the field from a differently named key. The field's converter
    /// runs with that key's path.
    pub fn wanted(mut self, key: impl Into<String>) -> Self {
        self.wanted = Some(key.into());
        self
    }

    pub fn with(mut self, converter: impl Converter + 'static) -> Self {
        self.converter = Some(Rc::new(converter));
        self
    }

    /// Used when the key is absent or null; satisfies a required field.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn key(&self) -> &str {
        self.wanted.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("wanted", &self.wanted)
            .field("required", &self.required)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordSpec {
    fields: Vec<Field>,
}

#[derive(Debug, Default)]
pub struct RecordSpecBuilder {
    fields: Vec<Field>,
}

impl RecordSpec {
    pub fn builder() -> RecordSpecBuilder {
        RecordSpecBuilder::default()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

impl RecordSpecBuilder {
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> RecordSpec {
        RecordSpec {
            fields: self.fields,
        }
    }
}

impl Converter for RecordSpec {
    fn convert(&self, ctx: &mut ConvertContext<'_>, value: Value) -> Result<Value, BoxError> {
        let map = match value {
            Value::Mapping(map) => map,
            other => {
                return Err(RecordError::ExpectedMapping {
                    path: ctx.path().clone(),
                    got: other.kind(),
                }
                .into())
            }
        };

        let mut record = Mapping::new();
        for field in &self.fields {
            let key = field.key();
            let raw = match map.get(key).filter(|v| !v.is_null()) {
                Some(raw) => raw.clone(),
                None => match &field.default {
                    Some(default) => default.clone(),
                    None if field.required => {
                        return Err(RecordError::MissingField {
                            path: ctx.path().clone(),
                            field: key.to_string(),
                        }
                        .into())
                    }
                    None => continue,
                },
            };

            let converted = match &field.converter {
                Some(converter) => converter.convert(&mut ctx.child(key), raw)?,
                None => raw,
            };
            record.insert(field.name.clone(), converted);
        }
        Ok(Value::Mapping(record))
    }
}

/// Converter accepting only values of one [`Value::kind`].
pub fn expect_kind(expected: &'static str) -> impl Converter {
    from_fn(move |ctx, value| {
        if value.kind() == expected {
            return Ok(value);
        }
        Err(RecordError::WrongKind {
            path: ctx.path().clone(),
            expected,
            got: value.kind(),
        }
        .into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::Registration;
    use crate::error::OverlayError;
    use crate::merged::MergedOptions;
    use serde_json::json;

    fn server_spec() -> RecordSpec {
        RecordSpec::builder()
            .field(Field::required("host").with(expect_kind("string")))
            .field(
                Field::optional("port")
                    .wanted("port_number")
                    .with(from_fn(|_, value| {
                        Ok(Value::Integer(value.to_string().parse()?))
                    })),
            )
            .field(Field::optional("timeout").default_value(30))
            .field(Field::optional("user"))
            .build()
    }

    fn record_error(err: OverlayError) -> RecordError {
        match err {
            OverlayError::ConversionFailed { source, .. } => source
                .downcast_ref::<RecordError>()
                .cloned()
                .unwrap_or_else(|| panic!("not a record error: {}", source)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_builds_record() {
        let options = MergedOptions::using(
            [Value::from(json!({"server": {"host": "h", "port_number": "5432", "extra": 1}}))],
            "test",
        );
        options
            .add_converter(Registration::new("server", server_spec()))
            .unwrap();

        assert_eq!(
            options.get_converted("server").unwrap(),
            Value::from(json!({"host": "h", "port": 5432, "timeout": 30}))
        );
    }

    #[test]
    fn test_missing_required_field() {
        let options = MergedOptions::using([Value::from(json!({"server": {"port_number": 1}}))], "test");
        options
            .add_converter(Registration::new("server", server_spec()))
            .unwrap();

        let err = record_error(options.get_converted("server").unwrap_err());
        assert_eq!(
            err,
            RecordError::MissingField {
                path: Path::from_segments(["server"]),
                field: "host".to_string(),
            }
        );
    }

    #[test]
    fn test_field_converter_sees_field_path() {
        let options = MergedOptions::using([Value::from(json!({"server": {"host": 5}}))], "test");
        options
            .add_converter(Registration::new("server", server_spec()))
            .unwrap();

        let err = record_error(options.get_converted("server").unwrap_err());
        assert_eq!(
            err,
            RecordError::WrongKind {
                path: Path::from_segments(["server", "host"]),
                expected: "string",
                got: "integer",
            }
        );
    }

    #[test]
    fn test_renamed_field_reports_source_key() {
        let options = MergedOptions::using(
            [Value::from(json!({"server": {"host": "h", "port_number": true}}))],
            "test",
        );
        let spec = RecordSpec::builder()
            .field(Field::required("port").wanted("port_number").with(expect_kind("integer")))
            .build();
        options.add_converter(Registration::new("server", spec)).unwrap();

        let err = record_error(options.get_converted("server").unwrap_err());
        assert_eq!(
            err,
            RecordError::WrongKind {
                path: Path::from_segments(["server", "port_number"]),
                expected: "integer",
                got: "bool",
            }
        );
    }

    #[test]
    fn test_expects_mapping() {
        let options = MergedOptions::using([Value::from(json!({"server": "nope"}))], "test");
        options
            .add_converter(Registration::new("server", server_spec()))
            .unwrap();

        let err = record_error(options.get_converted("server").unwrap_err());
        assert!(matches!(err, RecordError::ExpectedMapping { got: "string", .. }));
    }

    #[test]
    fn test_field_names() {
        let spec = server_spec();
        assert_eq!(spec.fields().collect::<Vec<_>>(), vec!["host", "port", "timeout", "user"]);
    }
}
