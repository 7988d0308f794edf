//! Universal Schema Definition Language (USDL)
//!
//! Parse, translate and render schema definitions across Apache Avro,
//! Protocol Buffers (proto3) and JSON Schema through one intermediate tree.
//!
//! Each format has a codec module with a `parse` (native text to [`Schema`])
//! and a `render` (the inverse). Both validate eagerly: a tree that violates
//! a target format's rules is rejected before any text is produced, and the
//! Avro and JSON Schema renderers run their format's own acceptance check on
//! the output.
//!
//! # Example
//!
//! ```
//! use usdl::{convert, Format, RenderOptions};
//!
//! let avro = r#"{
//!     "type": "record",
//!     "name": "Person",
//!     "fields": [
//!         {"name": "name", "type": "string"},
//!         {"name": "middleName", "type": ["null", "string"], "default": null}
//!     ]
//! }"#;
//!
//! let json = convert(avro, Format::Avro, Format::JsonSchema, &RenderOptions::new()).unwrap();
//! let schema: serde_json::Value = serde_json::from_str(&json).unwrap();
//!
//! assert_eq!(schema["title"], "Person");
//! assert_eq!(schema["required"], serde_json::json!(["name"]));
//! ```
//!
//! # Format mapping
//!
//! | IR | Avro | Protobuf | JSON Schema |
//! |----|------|----------|-------------|
//! | structure | `record` | `message` | `object` with `properties` |
//! | enumeration | `enum` | `enum` | `{"type": "string", "enum": [...]}` |
//! | fixed | `fixed` | `bytes` | base64 `string` |
//! | `required: false` | `["null", T]`, default `null` | `optional` | absent from `required` |
//! | repeated | `array` | `repeated` | `array` |
//! | map | `map` | `map<K, V>` | `additionalProperties` |
//! | oneof | union | `oneof` | `oneOf` |

pub mod avro;
mod convert;
mod error;
pub mod ir;
pub mod json_schema;
pub mod library;
mod linter;
mod loader;
pub mod protobuf;
pub mod resolver;
mod types;
pub mod validator;

pub use convert::{assign_field_numbers, convert, parse, render};
pub use error::{ErrorKind, SchemaError, ValidationKind};
pub use ir::{
    EnumValue, FieldDef, FieldShape, LogicalType, Primitive, ReservedRange, Schema, TypeDef, TypeKind,
    TypeRef,
};
pub use library::{invoke, FunctionError};
pub use linter::{lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{is_url, load_schema, load_schema_auto, load_schema_str, LoadedSchema};
pub use types::{Format, RenderOptions, JSON_SCHEMA_2020_12};

#[cfg(feature = "remote")]
pub use loader::load_schema_url;
