//! Schema functions exposed to transformation scripts.
//!
//! Scripts see the IR as a plain mapping (the `%`-keyed directive tree), so
//! every function here takes and returns [`serde_json::Value`]s. The table
//! is static; there is no registration at runtime.
//!
//! ```
//! use serde_json::json;
//! use usdl::library;
//!
//! let schema = library::invoke("parseJSONSchema", &[json!(r#"{"title": "Ping", "properties": {}}"#)]).unwrap();
//! assert_eq!(schema["%types"]["Ping"]["%kind"], "structure");
//! ```

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::{ErrorKind, SchemaError};
use crate::ir::Schema;
use crate::types::{json_type_name, RenderOptions};
use crate::{avro, json_schema, protobuf};

/// Signature shared by every library function.
pub type NativeFn = fn(&[Value]) -> Result<Value, FunctionError>;

/// One entry of the function table.
#[derive(Debug, Clone, Copy)]
pub struct LibraryFunction {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    /// Human-readable signature for diagnostics.
    pub signature: &'static str,
    pub call: NativeFn,
}

/// Every schema function, in documentation order.
pub static FUNCTIONS: &[LibraryFunction] = &[
    LibraryFunction {
        name: "parseAvroSchema",
        min_args: 1,
        max_args: 1,
        signature: "parseAvroSchema(text) -> Schema",
        call: parse_avro_schema,
    },
    LibraryFunction {
        name: "renderAvroSchema",
        min_args: 1,
        max_args: 2,
        signature: "renderAvroSchema(schema, prettyPrint = true) -> text",
        call: render_avro_schema,
    },
    LibraryFunction {
        name: "parseProtobufSchema",
        min_args: 1,
        max_args: 1,
        signature: "parseProtobufSchema(text) -> Schema",
        call: parse_protobuf_schema,
    },
    LibraryFunction {
        name: "renderProtobufSchema",
        min_args: 1,
        max_args: 1,
        signature: "renderProtobufSchema(schema) -> text",
        call: render_protobuf_schema,
    },
    LibraryFunction {
        name: "parseJSONSchema",
        min_args: 1,
        max_args: 1,
        signature: "parseJSONSchema(text) -> Schema",
        call: parse_json_schema,
    },
    LibraryFunction {
        name: "renderJSONSchema",
        min_args: 1,
        max_args: 2,
        signature: "renderJSONSchema(schema, prettyPrint = true) -> text",
        call: render_json_schema,
    },
];

/// Failure reported back to a script: a branchable kind, a message and,
/// when one exists, a corrective hint.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{function}: {message}")]
pub struct FunctionError {
    pub function: String,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl FunctionError {
    fn argument(function: &str, message: impl Into<String>) -> Self {
        Self {
            function: function.to_string(),
            kind: ErrorKind::Argument,
            message: message.into(),
            hint: None,
        }
    }

    fn from_schema_error(function: &str, err: SchemaError) -> Self {
        Self {
            function: function.to_string(),
            kind: err.kind(),
            hint: err.hint(),
            message: err.to_string(),
        }
    }
}

/// Look up a function by its script name.
pub fn lookup(name: &str) -> Option<&'static LibraryFunction> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// Call a function by name after checking its arity.
pub fn invoke(name: &str, args: &[Value]) -> Result<Value, FunctionError> {
    let function = lookup(name).ok_or_else(|| FunctionError {
        function: name.to_string(),
        kind: ErrorKind::Argument,
        message: format!("unknown function `{name}`"),
        hint: Some(format!(
            "Available schema functions: {}.",
            FUNCTIONS.iter().map(|f| f.name).collect::<Vec<_>>().join(", ")
        )),
    })?;

    if args.len() < function.min_args || args.len() > function.max_args {
        let expected = if function.min_args == function.max_args {
            function.min_args.to_string()
        } else {
            format!("{} to {}", function.min_args, function.max_args)
        };
        return Err(FunctionError {
            hint: Some(format!("Usage: {}", function.signature)),
            ..FunctionError::argument(
                name,
                format!("expected {expected} argument(s), got {}", args.len()),
            )
        });
    }

    debug!(function = name, args = args.len(), "invoking schema function");
    (function.call)(args)
}

fn text_arg<'a>(function: &str, args: &'a [Value]) -> Result<&'a str, FunctionError> {
    match args.first() {
        Some(Value::String(text)) => Ok(text),
        Some(other) => Err(FunctionError::argument(
            function,
            format!("schema text must be a string, got {}", json_type_name(other)),
        )),
        None => Err(FunctionError::argument(function, "missing schema text")),
    }
}

fn schema_arg(function: &str, args: &[Value]) -> Result<Schema, FunctionError> {
    let value = args
        .first()
        .ok_or_else(|| FunctionError::argument(function, "missing schema"))?;
    serde_json::from_value(value.clone())
        .map_err(|e| FunctionError::argument(function, format!("not a USDL schema: {e}")))
}

fn options_arg(function: &str, args: &[Value]) -> Result<RenderOptions, FunctionError> {
    match args.get(1) {
        None | Some(Value::Null) => Ok(RenderOptions::new()),
        Some(Value::Bool(pretty)) => Ok(RenderOptions::new().pretty(*pretty)),
        Some(other) => Err(FunctionError::argument(
            function,
            format!("prettyPrint must be a boolean, got {}", json_type_name(other)),
        )),
    }
}

fn schema_value(function: &str, schema: Schema) -> Result<Value, FunctionError> {
    serde_json::to_value(schema).map_err(|e| FunctionError::argument(function, e.to_string()))
}

fn parse_avro_schema(args: &[Value]) -> Result<Value, FunctionError> {
    const NAME: &str = "parseAvroSchema";
    let schema = avro::parse(text_arg(NAME, args)?).map_err(|e| FunctionError::from_schema_error(NAME, e))?;
    schema_value(NAME, schema)
}

fn render_avro_schema(args: &[Value]) -> Result<Value, FunctionError> {
    const NAME: &str = "renderAvroSchema";
    let schema = schema_arg(NAME, args)?;
    let options = options_arg(NAME, args)?;
    avro::render(&schema, &options)
        .map(Value::String)
        .map_err(|e| FunctionError::from_schema_error(NAME, e))
}

fn parse_protobuf_schema(args: &[Value]) -> Result<Value, FunctionError> {
    const NAME: &str = "parseProtobufSchema";
    let schema =
        protobuf::parse(text_arg(NAME, args)?).map_err(|e| FunctionError::from_schema_error(NAME, e))?;
    schema_value(NAME, schema)
}

fn render_protobuf_schema(args: &[Value]) -> Result<Value, FunctionError> {
    const NAME: &str = "renderProtobufSchema";
    let schema = schema_arg(NAME, args)?;
    protobuf::render(&schema)
        .map(Value::String)
        .map_err(|e| FunctionError::from_schema_error(NAME, e))
}

fn parse_json_schema(args: &[Value]) -> Result<Value, FunctionError> {
    const NAME: &str = "parseJSONSchema";
    let schema =
        json_schema::parse(text_arg(NAME, args)?).map_err(|e| FunctionError::from_schema_error(NAME, e))?;
    schema_value(NAME, schema)
}

fn render_json_schema(args: &[Value]) -> Result<Value, FunctionError> {
    const NAME: &str = "renderJSONSchema";
    let schema = schema_arg(NAME, args)?;
    let options = options_arg(NAME, args)?;
    json_schema::render(&schema, &options)
        .map(Value::String)
        .map_err(|e| FunctionError::from_schema_error(NAME, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_names_are_unique() {
        for (i, f) in FUNCTIONS.iter().enumerate() {
            assert!(FUNCTIONS[i + 1..].iter().all(|g| g.name != f.name), "{}", f.name);
            assert!(f.min_args <= f.max_args);
        }
    }

    #[test]
    fn unknown_function() {
        let err = invoke("parseXmlSchema", &[json!("")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Argument);
        assert!(err.hint.unwrap().contains("parseAvroSchema"));
    }

    #[test]
    fn arity_is_checked() {
        let err = invoke("renderProtobufSchema", &[json!({}), json!(true)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Argument);
        assert_eq!(err.message, "expected 1 argument(s), got 2");

        let err = invoke("renderAvroSchema", &[]).unwrap_err();
        assert_eq!(err.message, "expected 1 to 2 argument(s), got 0");
    }

    #[test]
    fn text_must_be_a_string() {
        let err = invoke("parseAvroSchema", &[json!(42)]).unwrap_err();
        assert_eq!(err.message, "schema text must be a string, got number");
    }

    #[test]
    fn codec_errors_keep_kind_and_hint() {
        let err = invoke("parseProtobufSchema", &[json!("message A {}")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedFeature);
        assert!(err.hint.unwrap().contains("syntax = \"proto3\";"));
    }

    #[test]
    fn pretty_print_flag() {
        let schema = invoke("parseAvroSchema", &[json!(r#"{"type": "fixed", "name": "Md5", "size": 16}"#)]).unwrap();
        let compact = invoke("renderAvroSchema", &[schema.clone(), json!(false)]).unwrap();
        assert!(!compact.as_str().unwrap().contains('\n'));
        let pretty = invoke("renderAvroSchema", &[schema.clone()]).unwrap();
        assert!(pretty.as_str().unwrap().contains('\n'));

        let err = invoke("renderAvroSchema", &[schema, json!("yes")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Argument);
    }

    #[test]
    fn malformed_schema_value() {
        let err = invoke("renderJSONSchema", &[json!({"%types": {"A": {"%kind": "table"}}})]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Argument);
        assert!(err.message.starts_with("not a USDL schema"));
    }
}
