//! Error types for schema parsing, resolution, validation and rendering.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::types::Format;

/// Errors raised by codecs, the resolver and the validators.
#[derive(Debug, Error)]
pub enum SchemaError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot determine schema format of {source_name}")]
    UnknownFormat { source_name: String },

    // Parse errors (exit code 2)
    #[error("invalid {format} schema at {location}: {message}")]
    Parse {
        format: Format,
        location: String,
        message: String,
    },

    #[error("unsupported {format} feature: {feature}")]
    Unsupported { format: Format, feature: String },

    // Resolution errors (exit code 2)
    #[error("unknown type reference `{name}` at {path}")]
    UnknownTypeReference { name: String, path: String },

    #[error("type `{name}` is referenced by name at {path} before its definition")]
    UnresolvedTypeReference { name: String, path: String },

    #[error("unbounded recursion through required fields: {}", cycle.join(" -> "))]
    UnboundedRecursion { cycle: Vec<String> },

    // Validation errors (exit code 1)
    #[error("invalid schema at {path}: {kind}")]
    Validation { path: String, kind: ValidationKind },

    // Rendering errors (exit code 2)
    #[error("cannot render {path} as {format}: {message}")]
    Serialization {
        format: Format,
        path: String,
        message: String,
    },

    #[error("rendered Avro schema rejected: {message}")]
    AvroRejected { message: String },

    #[error("rendered JSON Schema rejected by the 2020-12 meta-schema: {}", errors.join("; "))]
    JsonSchemaRejected { errors: Vec<String> },
}

/// A single format constraint violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationKind {
    #[error("enum `{name}` must have a value with ordinal 0 (lowest ordinal is {lowest})")]
    EnumZeroOrdinal { name: String, lowest: i64 },

    #[error("enum `{name}` has no values")]
    EmptyEnum { name: String },

    #[error("field number {number} is outside 1..=536870911")]
    FieldNumberOutOfRange { number: i64 },

    #[error("field number {number} is in 19000..=19999, reserved by the Protocol Buffers implementation")]
    FieldNumberImplementationReserved { number: u32 },

    #[error("field number {number} is reserved in `{owner}`")]
    FieldNumberReserved { owner: String, number: u32 },

    #[error("field name `{name}` is reserved in `{owner}`")]
    FieldNameReserved { owner: String, name: String },

    #[error("field number {number} is used by both `{first}` and `{second}`")]
    DuplicateFieldNumber {
        number: u32,
        first: String,
        second: String,
    },

    #[error("field `{field}` has no field number")]
    MissingFieldNumber { field: String },

    #[error("invalid reserved range {start} to {end}")]
    InvalidReservedRange { start: u32, end: u32 },

    #[error("logical type `{logical_type}` is not valid on `{base}`: {reason}")]
    InvalidLogicalType {
        logical_type: String,
        base: String,
        reason: String,
    },

    #[error("type name `{name}` is defined more than once")]
    DuplicateTypeName { name: String },

    #[error("field `{name}` is declared more than once")]
    DuplicateFieldName { name: String },

    #[error("enum symbol `{name}` is declared more than once")]
    DuplicateSymbol { name: String },

    #[error("enum ordinal {ordinal} is used by both `{first}` and `{second}`")]
    DuplicateOrdinal {
        ordinal: i64,
        first: String,
        second: String,
    },

    #[error("`{name}` is not a valid {format} name")]
    InvalidName { name: String, format: Format },

    #[error("map key type `{key}` is not allowed")]
    InvalidMapKey { key: String },

    #[error("oneof option `{option}` must be a single-valued field")]
    InvalidOneofOption { option: String },

    #[error("fixed type `{name}` must have a positive size")]
    InvalidFixedSize { name: String },
}

/// Coarse error category a transformation script can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    #[serde(rename = "ParseError")]
    Parse,
    #[serde(rename = "UnsupportedFeatureError")]
    UnsupportedFeature,
    UnknownTypeReference,
    UnresolvedTypeReference,
    UnboundedRecursion,
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "SerializationError")]
    Serialization,
    #[serde(rename = "IoError")]
    Io,
    #[serde(rename = "ArgumentError")]
    Argument,
}

impl SchemaError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchemaError::FileNotFound { .. }
            | SchemaError::ReadError { .. }
            | SchemaError::UnknownFormat { .. } => ErrorKind::Io,
            #[cfg(feature = "remote")]
            SchemaError::NetworkError { .. } => ErrorKind::Io,
            SchemaError::Parse { .. } => ErrorKind::Parse,
            SchemaError::Unsupported { .. } => ErrorKind::UnsupportedFeature,
            SchemaError::UnknownTypeReference { .. } => ErrorKind::UnknownTypeReference,
            SchemaError::UnresolvedTypeReference { .. } => ErrorKind::UnresolvedTypeReference,
            SchemaError::UnboundedRecursion { .. } => ErrorKind::UnboundedRecursion,
            SchemaError::Validation { .. } => ErrorKind::Validation,
            SchemaError::Serialization { .. }
            | SchemaError::AvroRejected { .. }
            | SchemaError::JsonSchemaRejected { .. } => ErrorKind::Serialization,
        }
    }

    /// Returns an actionable correction for this error, when one exists.
    pub fn hint(&self) -> Option<String> {
        let hint = match self {
            SchemaError::FileNotFound { .. } => "Check the path and try again.".to_string(),
            SchemaError::UnknownFormat { .. } => {
                "Name the format explicitly (avro, protobuf or json-schema) or use a .avsc, .proto or .json extension."
                    .to_string()
            }
            SchemaError::Unsupported {
                format: Format::Protobuf,
                feature,
            } if feature.contains("proto2") => {
                "Add `syntax = \"proto3\";` at the top of your file; proto2 is not supported.".to_string()
            }
            SchemaError::UnknownTypeReference { name, .. } => {
                format!("Define a type named `{name}` in the same schema or fix the spelling of the reference.")
            }
            SchemaError::UnresolvedTypeReference { name, .. } => {
                format!("Move the full definition of `{name}` before its first by-name use.")
            }
            SchemaError::UnboundedRecursion { .. } => {
                "Make at least one field in the cycle optional, repeated or a map.".to_string()
            }
            SchemaError::Validation { kind, .. } => return kind.hint(),
            SchemaError::AvroRejected { .. } => {
                "Inspect the named type or default value in the message; Avro rejected the rendered schema."
                    .to_string()
            }
            _ => return None,
        };
        Some(hint)
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Io => 3,
            ErrorKind::Validation => 1,
            _ => 2,
        }
    }

    pub(crate) fn parse(format: Format, location: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::Parse {
            format,
            location: location.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(format: Format, feature: impl Into<String>) -> Self {
        SchemaError::Unsupported {
            format,
            feature: feature.into(),
        }
    }

    pub(crate) fn validation(path: impl Into<String>, kind: ValidationKind) -> Self {
        SchemaError::Validation {
            path: path.into(),
            kind,
        }
    }

    pub(crate) fn serialization(
        format: Format,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SchemaError::Serialization {
            format,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl ValidationKind {
    /// Returns an actionable correction for this violation.
    pub fn hint(&self) -> Option<String> {
        let hint = match self {
            ValidationKind::EnumZeroOrdinal { name, .. } => format!(
                "Add a first value such as `{}_UNSPECIFIED = 0;` to enum `{name}`.",
                upper_snake(name)
            ),
            ValidationKind::FieldNumberOutOfRange { .. } => {
                "Use a field number between 1 and 536870911.".to_string()
            }
            ValidationKind::FieldNumberImplementationReserved { .. } => {
                "Pick a field number outside 19000..=19999.".to_string()
            }
            ValidationKind::FieldNumberReserved { .. } | ValidationKind::FieldNameReserved { .. } => {
                "Reserved numbers and names must not be reused; choose another.".to_string()
            }
            ValidationKind::DuplicateFieldNumber { .. } => {
                "Give each field in the message a distinct number.".to_string()
            }
            ValidationKind::MissingFieldNumber { .. } => {
                "Protobuf has no implicit numbering; set a field number on every field (or assign them with `assign_field_numbers`)."
                    .to_string()
            }
            ValidationKind::InvalidLogicalType { logical_type, .. } if logical_type == "decimal" => {
                "Set `precision` (and optionally `scale` <= precision) on the decimal.".to_string()
            }
            ValidationKind::InvalidName { .. } => {
                "Names must start with a letter or underscore and contain only letters, digits and underscores."
                    .to_string()
            }
            ValidationKind::InvalidMapKey { .. } => {
                "Use a string key (Avro) or an integral/string key (Protobuf).".to_string()
            }
            _ => return None,
        };
        Some(hint)
    }
}

fn upper_snake(name: &str) -> String {
    let mut out = String::new();
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_exit_codes() {
        let err = SchemaError::FileNotFound {
            path: PathBuf::from("user.avsc"),
        };
        assert_eq!(err.exit_code(), 3);

        let err = SchemaError::parse(Format::Avro, "line 1", "expected value");
        assert_eq!(err.exit_code(), 2);

        let err = SchemaError::validation(
            "/Person/id",
            ValidationKind::MissingFieldNumber { field: "id".into() },
        );
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn proto2_hint_mentions_syntax_marker() {
        let err = SchemaError::unsupported(Format::Protobuf, "proto2 syntax");
        assert_eq!(err.kind(), ErrorKind::UnsupportedFeature);
        assert!(err.hint().unwrap().contains("syntax = \"proto3\";"));
    }

    #[test]
    fn enum_zero_hint_names_enum() {
        let kind = ValidationKind::EnumZeroOrdinal {
            name: "OrderStatus".into(),
            lowest: 1,
        };
        assert_eq!(
            kind.hint().unwrap(),
            "Add a first value such as `ORDER_STATUS_UNSPECIFIED = 0;` to enum `OrderStatus`."
        );
    }

    #[test]
    fn unbounded_recursion_display() {
        let err = SchemaError::UnboundedRecursion {
            cycle: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(
            err.to_string(),
            "unbounded recursion through required fields: A -> B -> A"
        );
    }

    #[test]
    fn error_kind_serializes_taxonomy_names() {
        assert_eq!(
            serde_json::to_value(ErrorKind::Validation).unwrap(),
            "ValidationError"
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::UnknownTypeReference).unwrap(),
            "UnknownTypeReference"
        );
    }
}
