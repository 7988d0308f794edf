//! Core option types shared by the codecs.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Meta-schema URI emitted by the JSON Schema serializer.
pub const JSON_SCHEMA_2020_12: &str = "https://json-schema.org/draft/2020-12/schema";

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A native schema format handled by one codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    Avro,
    Protobuf,
    JsonSchema,
}

impl Format {
    /// All formats, in the order diagnostics report them.
    pub const ALL: [Format; 3] = [Format::Avro, Format::Protobuf, Format::JsonSchema];

    /// Parse a format name as accepted on the command line.
    ///
    /// Returns `None` for unknown names (caller should error).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "avro" | "avsc" => Some(Format::Avro),
            "protobuf" | "proto" | "proto3" => Some(Format::Protobuf),
            "json-schema" | "jsonschema" | "json" => Some(Format::JsonSchema),
            _ => None,
        }
    }

    /// Detect the format of a schema file from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "avsc" => Some(Format::Avro),
            "proto" => Some(Format::Protobuf),
            "json" => Some(Format::JsonSchema),
            _ => None,
        }
    }

    /// Conventional file extension for rendered output.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Avro => "avsc",
            Format::Protobuf => "proto",
            Format::JsonSchema => "json",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Avro => write!(f, "Avro"),
            Format::Protobuf => write!(f, "Protobuf"),
            Format::JsonSchema => write!(f, "JSON Schema"),
        }
    }
}

/// Options for rendering a schema into native text.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Indent JSON output. Ignored by the Protobuf writer, whose output
    /// is always laid out one statement per line.
    pub pretty: bool,
}

impl RenderOptions {
    /// Create render options with pretty printing enabled (default).
    pub fn new() -> Self {
        Self { pretty: true }
    }

    /// Set pretty printing.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::new()
    }
}
