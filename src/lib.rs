//! option-merge - layered configuration overlay
//!
//! Many independent mappings ("layers") are presented as one lazily merged
//! tree. Layers are never copied or combined: reads scan them newest first,
//! writes append a layer, and deletes hide the newest definition so the
//! previous one shows through. Converted values are produced on demand by a
//! dependency-ordered converter pipeline and cached per path.

pub mod collector;
pub mod converter;
pub mod error;
pub mod formatter;
pub mod merged;
pub mod record;
pub mod source;
pub mod storage;
pub mod value;

pub use collector::{CollectError, Collector};
pub use converter::{from_fn, ConvertContext, Converter, Converters, Dependency, Pattern, Registration};
pub use error::{BoxError, OverlayError, Result};
pub use formatter::{FormatError, FormatStrings, MergedOptionsFormatter, NoSpecial, SpecialFormat};
pub use merged::{Item, MergedOptions};
pub use option_path::{Key, Path, PathError};
pub use record::{expect_kind, Field, RecordError, RecordSpec};
pub use source::Source;
pub use storage::{Layer, Resolved, Storage};
pub use value::{Mapping, Value};
