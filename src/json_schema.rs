//! JSON Schema codec.
//!
//! Parsing accepts draft-07, 2019-09 and 2020-12 documents and reads both
//! `definitions` and `$defs`. Rendering always produces 2020-12 with `$defs`.
//! Keywords the IR does not model (`pattern`, `minimum`, `anyOf`, ...) are
//! kept in annotations and written back verbatim.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::SchemaError;
use crate::ir::{
    Annotations, FieldDef, FieldShape, LogicalType, Primitive, Schema, TypeDef, TypeKind, TypeRef,
};
use crate::resolver::{self, DefinitionTracker, ForwardReferences};
use crate::types::{json_type_name, Format, RenderOptions, JSON_SCHEMA_2020_12};
use crate::validator;

const SUPPORTED_DIALECTS: &[&str] = &["draft-07/schema", "draft/2019-09/schema", "draft/2020-12/schema"];

/// Root keywords that describe the document rather than the root type.
const DOCUMENT_KEYS: &[&str] = &["$schema", "$id", "$comment", "title", "$defs", "definitions"];

const ROOT_NAME: &str = "Root";

/// Parse JSON Schema text into a validated IR tree.
///
/// A root schema with `properties` becomes the first type, named by its
/// `title` (or `Root`). Entries of `$defs`/`definitions` follow in order.
///
/// # Errors
///
/// `Parse` for malformed JSON, `Unsupported` for unknown dialects,
/// `UnknownTypeReference` for local `$ref`s to missing definitions and
/// `Validation` for constraint violations.
pub fn parse(text: &str) -> Result<Schema, SchemaError> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        SchemaError::parse(
            Format::JsonSchema,
            format!("line {}, column {}", e.line(), e.column()),
            e.to_string(),
        )
    })?;
    let Value::Object(root) = &value else {
        return Err(SchemaError::unsupported(
            Format::JsonSchema,
            format!("{} root schema", json_type_name(&value)),
        ));
    };

    if let Some(dialect) = root.get("$schema").and_then(Value::as_str) {
        let dialect = dialect.trim_end_matches('#');
        if !SUPPORTED_DIALECTS.iter().any(|d| dialect.ends_with(d)) {
            return Err(SchemaError::unsupported(
                Format::JsonSchema,
                format!("dialect `{dialect}` (supported: draft-07, 2019-09, 2020-12)"),
            ));
        }
    }

    let title = root.get("title").and_then(Value::as_str).map(str::to_string);
    let description = root.get("description").and_then(Value::as_str).map(str::to_string);
    let root_name = root
        .contains_key("properties")
        .then(|| title.clone().unwrap_or_else(|| ROOT_NAME.to_string()));

    let mut parser = Parser {
        root_name: root_name.clone(),
        tracker: DefinitionTracker::new(ForwardReferences::Allowed),
    };
    let mut schema = Schema::new();

    match &root_name {
        Some(name) => {
            parser.tracker.define(name, "#")?;
            schema.types.push(parser.object(name, root, "#", DOCUMENT_KEYS)?);
            for key in ["$id", "$comment"] {
                if let Some(v) = root.get(key) {
                    schema.annotations.insert(key.to_string(), v.clone());
                }
            }
        }
        None => {
            schema.title = title;
            schema.documentation = description;
            schema.annotations = extra_keys(root, &[DOCUMENT_KEYS, &["description"][..]].concat());
        }
    }

    for key in ["$defs", "definitions"] {
        let Some(defs) = root.get(key) else {
            continue;
        };
        let Value::Object(defs) = defs else {
            return Err(SchemaError::parse(Format::JsonSchema, format!("#/{key}"), "must be an object"));
        };
        for (name, definition) in defs {
            let path = format!("#/{key}/{name}");
            parser.tracker.define(name, &path)?;
            schema.types.push(parser.definition(name, definition, &path)?);
        }
    }

    parser.tracker.finish()?;
    validator::validate_common(&schema)?;
    debug!(types = schema.types.len(), "parsed JSON Schema");
    Ok(schema)
}

fn extra_keys(map: &Map<String, Value>, known: &[&str]) -> Annotations {
    map.iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_string_enum(map: &Map<String, Value>) -> bool {
    let typed_as_string = match map.get("type") {
        None => true,
        Some(t) => t.as_str() == Some("string"),
    };
    typed_as_string
        && map
            .get("enum")
            .and_then(Value::as_array)
            .is_some_and(|values| !values.is_empty() && values.iter().all(Value::is_string))
}

/// Primitive and logical type for a scalar `type` keyword, plus the
/// keywords that mapping consumed.
fn primitive(kind: &str, map: &Map<String, Value>) -> Option<(Primitive, Option<LogicalType>, &'static [&'static str])> {
    const FORMAT: &[&str] = &["format"];
    let format = map.get("format").and_then(Value::as_str);
    let mapped = match (kind, format) {
        ("string", Some("uuid")) => (Primitive::String, Some(LogicalType::Uuid), FORMAT),
        ("string", Some("date")) => (Primitive::Int, Some(LogicalType::Date), FORMAT),
        ("string", Some("time")) => (Primitive::Int, Some(LogicalType::TimeMillis), FORMAT),
        ("string", Some("date-time")) => (Primitive::Long, Some(LogicalType::TimestampMillis), FORMAT),
        ("string", _) if map.get("contentEncoding").and_then(Value::as_str) == Some("base64") => {
            (Primitive::Bytes, None, &["contentEncoding"][..])
        }
        ("string", _) => (Primitive::String, None, &[][..]),
        ("integer", Some("int32")) => (Primitive::Int, None, FORMAT),
        ("integer", Some("int64")) => (Primitive::Long, None, FORMAT),
        ("integer", _) => (Primitive::Long, None, &[][..]),
        ("number", Some("float")) => (Primitive::Float, None, FORMAT),
        ("number", Some("double")) => (Primitive::Double, None, FORMAT),
        ("number", _) => (Primitive::Double, None, &[][..]),
        ("boolean", _) => (Primitive::Boolean, None, &[][..]),
        ("null", _) => (Primitive::Null, None, &[][..]),
        _ => return None,
    };
    Some(mapped)
}

struct Parser {
    root_name: Option<String>,
    tracker: DefinitionTracker,
}

impl Parser {
    /// Named definition from `$defs`.
    fn definition(&mut self, name: &str, value: &Value, path: &str) -> Result<TypeDef, SchemaError> {
        let Value::Object(map) = value else {
            return Ok(TypeDef::opaque(name, value.clone()));
        };
        if is_string_enum(map) {
            return Ok(enumeration(name, map));
        }
        let is_object = map.get("type").and_then(Value::as_str) == Some("object");
        let map_like = map.get("additionalProperties").is_some_and(Value::is_object);
        if map.contains_key("properties") || (is_object && !map_like) {
            return self.object(name, map, path, &[]);
        }
        Ok(TypeDef::opaque(name, value.clone()))
    }

    fn object(
        &mut self,
        name: &str,
        map: &Map<String, Value>,
        path: &str,
        skip: &[&str],
    ) -> Result<TypeDef, SchemaError> {
        let required: Vec<&str> = map
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut fields = Vec::new();
        if let Some(properties) = map.get("properties") {
            let Value::Object(properties) = properties else {
                return Err(SchemaError::parse(
                    Format::JsonSchema,
                    format!("{path}/properties"),
                    "must be an object",
                ));
            };
            for (property, schema) in properties {
                let mut field = self.property(property, schema, &format!("{path}/properties/{property}"))?;
                field.required = required.contains(&property.as_str());
                fields.push(field);
            }
        }

        let mut def = TypeDef::structure(name, fields);
        def.documentation = map.get("description").and_then(Value::as_str).map(str::to_string);
        let known = [&["type", "properties", "required", "description"][..], skip].concat();
        def.annotations = extra_keys(map, &known);
        Ok(def)
    }

    fn property(&mut self, name: &str, value: &Value, path: &str) -> Result<FieldDef, SchemaError> {
        let map = match value {
            Value::Object(map) => map,
            Value::Bool(true) => return Ok(FieldDef::new(name, TypeRef::Any)),
            other => {
                return Err(SchemaError::unsupported(
                    Format::JsonSchema,
                    format!("{} property schema at {path}", json_type_name(other)),
                ))
            }
        };

        let mut consumed: Vec<&str> = vec!["description", "default"];
        let mut field = if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
            consumed.push("$ref");
            FieldDef::new(name, self.reference(reference, path))
        } else if is_string_enum(map) {
            consumed.extend(map.keys().map(String::as_str));
            let mut def = enumeration("", map);
            def.documentation = None;
            def.annotations.remove("default");
            FieldDef::new(name, TypeRef::inline(def))
        } else {
            match map.get("type").and_then(Value::as_str) {
                Some("object") => {
                    let map_values = map.get("additionalProperties").filter(|v| v.is_object());
                    match map_values {
                        Some(values) if !map.contains_key("properties") => {
                            consumed.extend(["type", "additionalProperties"]);
                            let (ty, logical, leftover) = self.element(values, path)?;
                            let mut field = FieldDef::map(name, Primitive::String, ty);
                            field.logical_type = logical;
                            if !leftover.is_empty() {
                                field.annotations.insert("additionalProperties".into(), Value::Object(leftover));
                            }
                            field
                        }
                        _ => {
                            consumed.extend(map.keys().map(String::as_str));
                            let mut def = self.object("", map, path, &["default"])?;
                            def.documentation = None;
                            FieldDef::new(name, TypeRef::inline(def))
                        }
                    }
                }
                Some("array") => match map.get("items") {
                    Some(items @ Value::Object(_)) => {
                        consumed.extend(["type", "items"]);
                        let (ty, logical, leftover) = self.element(items, path)?;
                        let mut field = FieldDef::repeated(name, ty);
                        field.logical_type = logical;
                        if !leftover.is_empty() {
                            field.annotations.insert("items".into(), Value::Object(leftover));
                        }
                        field
                    }
                    None => {
                        consumed.push("type");
                        FieldDef::repeated(name, TypeRef::Any)
                    }
                    Some(_) => FieldDef::new(name, TypeRef::Any),
                },
                Some(kind) => match primitive(kind, map) {
                    Some((p, logical, keys)) => {
                        consumed.push("type");
                        consumed.extend(keys.iter().copied());
                        let mut field = FieldDef::new(name, p);
                        field.logical_type = logical;
                        field
                    }
                    None => FieldDef::new(name, TypeRef::Any),
                },
                // Type unions and pure composition stay verbatim.
                None => FieldDef::new(name, TypeRef::Any),
            }
        };

        field.documentation = map.get("description").and_then(Value::as_str).map(str::to_string);
        field.default = map.get("default").cloned();
        for (key, value) in map {
            if !consumed.contains(&key.as_str()) {
                field.annotations.insert(key.clone(), value.clone());
            }
        }
        Ok(field)
    }

    /// Element type of `items` or `additionalProperties`, with the keywords
    /// that did not map onto it.
    fn element(&mut self, value: &Value, path: &str) -> Result<(TypeRef, Option<LogicalType>, Annotations), SchemaError> {
        let field = self.property("", value, path)?;
        match field.shape {
            FieldShape::Scalar { ty } => {
                let mut leftover = field.annotations;
                if let Some(doc) = field.documentation {
                    leftover.insert("description".into(), json!(doc));
                }
                if let Some(default) = field.default {
                    leftover.insert("default".into(), default);
                }
                Ok((ty, field.logical_type, leftover))
            }
            // Nested collections are carried whole.
            _ => Ok((TypeRef::Any, None, value.as_object().cloned().unwrap_or_default())),
        }
    }

    fn reference(&mut self, reference: &str, path: &str) -> TypeRef {
        if reference == "#" {
            if let Some(root) = &self.root_name {
                self.tracker.refer(root, path);
                return TypeRef::Named(root.clone());
            }
        }
        let local = reference
            .strip_prefix("#/$defs/")
            .or_else(|| reference.strip_prefix("#/definitions/"));
        match local {
            Some(name) if !name.contains('/') => {
                let name = name.replace("~1", "/").replace("~0", "~");
                self.tracker.refer(&name, path);
                TypeRef::Named(name)
            }
            _ => TypeRef::External(reference.to_string()),
        }
    }
}

fn enumeration(name: &str, map: &Map<String, Value>) -> TypeDef {
    let symbols = map
        .get("enum")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    let mut def = TypeDef::enumeration_of(name, symbols);
    def.documentation = map.get("description").and_then(Value::as_str).map(str::to_string);
    def.annotations = extra_keys(map, &["type", "enum", "description"]);
    def
}

/// Render an IR tree as a 2020-12 JSON Schema.
///
/// The first type, when it is a structure, becomes the root schema; every
/// other type goes to `$defs`. The result is checked against the 2020-12
/// meta-schema before it is returned.
///
/// # Errors
///
/// `Validation` and resolver errors for invalid trees, and
/// `JsonSchemaRejected` when the meta-schema check fails.
pub fn render(schema: &Schema, options: &RenderOptions) -> Result<String, SchemaError> {
    validator::validate_common(schema)?;
    resolver::check(schema)?;

    let root = schema.types.first().filter(|t| t.as_structure().is_some());
    let mut writer = Writer {
        root: root.map(|r| r.name.as_str()),
        tracker: DefinitionTracker::new(ForwardReferences::Allowed),
    };
    for def in &schema.types {
        writer.tracker.define(&def.name, &format!("/{}", def.name))?;
    }

    let mut out = Map::new();
    out.insert("$schema".into(), json!(JSON_SCHEMA_2020_12));
    match root {
        Some(def) => {
            out.insert("title".into(), json!(def.name));
            if def.documentation.is_none() {
                if let Some(doc) = &schema.documentation {
                    out.insert("description".into(), json!(doc));
                }
            }
            let body = writer.definition(def, &format!("/{}", def.name))?;
            merge(&mut out, &body);
        }
        None => {
            if let Some(title) = &schema.title {
                out.insert("title".into(), json!(title));
            }
            if let Some(doc) = &schema.documentation {
                out.insert("description".into(), json!(doc));
            }
        }
    }
    merge(&mut out, &schema.annotations);

    let mut defs = Map::new();
    for def in schema.types.iter().skip(usize::from(root.is_some())) {
        defs.insert(def.name.clone(), Value::Object(writer.definition(def, &format!("/{}", def.name))?));
    }
    if !defs.is_empty() {
        out.insert("$defs".into(), Value::Object(defs));
    }

    let Writer { tracker, .. } = writer;
    tracker.finish()?;

    let value = Value::Object(out);
    accept(&value)?;

    let text = if options.pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .map_err(|e| SchemaError::serialization(Format::JsonSchema, "/", e.to_string()))?;
    debug!(types = schema.types.len(), bytes = text.len(), "rendered JSON Schema");
    Ok(text)
}

/// Check a rendered document against the 2020-12 meta-schema.
fn accept(rendered: &Value) -> Result<(), SchemaError> {
    let meta = json!({ "$ref": JSON_SCHEMA_2020_12 });
    let validator = jsonschema::validator_for(&meta).map_err(|e| SchemaError::JsonSchemaRejected {
        errors: vec![e.to_string()],
    })?;

    let errors: Vec<String> = validator
        .iter_errors(rendered)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::JsonSchemaRejected { errors })
    }
}

/// Add keys of `extra` missing from `target`, descending into objects
/// present on both sides.
fn merge(target: &mut Map<String, Value>, extra: &Map<String, Value>) {
    for (key, value) in extra {
        match (target.get_mut(key), value) {
            (Some(Value::Object(inner)), Value::Object(more)) => merge(inner, more),
            (Some(_), _) => {}
            (None, _) => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

struct Writer<'s> {
    root: Option<&'s str>,
    tracker: DefinitionTracker,
}

impl Writer<'_> {
    fn definition(&mut self, def: &TypeDef, path: &str) -> Result<Map<String, Value>, SchemaError> {
        let mut map = Map::new();
        match &def.kind {
            TypeKind::Structure(structure) => {
                map.insert("type".into(), json!("object"));
                if let Some(doc) = &def.documentation {
                    map.insert("description".into(), json!(doc));
                }
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in &structure.fields {
                    let field_path = format!("{}/{}", path, field.name);
                    properties.insert(field.name.clone(), Value::Object(self.field(field, &field_path)?));
                    if field.required {
                        required.push(field.name.as_str());
                    }
                }
                map.insert("properties".into(), Value::Object(properties));
                if !required.is_empty() {
                    map.insert("required".into(), json!(required));
                }
            }
            TypeKind::Enumeration(enumeration) => {
                map.insert("type".into(), json!("string"));
                if let Some(doc) = &def.documentation {
                    map.insert("description".into(), json!(doc));
                }
                let symbols: Vec<&str> = enumeration.symbols().collect();
                map.insert("enum".into(), json!(symbols));
            }
            TypeKind::Fixed(_) => {
                map.insert("type".into(), json!("string"));
                map.insert("contentEncoding".into(), json!("base64"));
                if let Some(doc) = &def.documentation {
                    map.insert("description".into(), json!(doc));
                }
            }
            TypeKind::Opaque(opaque) => match &opaque.definition {
                Value::Object(definition) => map = definition.clone(),
                other => {
                    return Err(SchemaError::serialization(
                        Format::JsonSchema,
                        path,
                        format!("{} definitions cannot be placed in $defs", json_type_name(other)),
                    ))
                }
            },
        }
        merge(&mut map, &def.annotations);
        Ok(map)
    }

    fn field(&mut self, field: &FieldDef, path: &str) -> Result<Map<String, Value>, SchemaError> {
        let mut map = match &field.shape {
            FieldShape::Scalar { ty } => self.type_schema(ty, field.logical_type, path)?,
            FieldShape::Repeated { items } => {
                let items = self.type_schema(items, field.logical_type, path)?;
                let mut map = Map::new();
                map.insert("type".into(), json!("array"));
                map.insert("items".into(), Value::Object(items));
                map
            }
            FieldShape::Map { values, .. } => {
                let values = self.type_schema(values, field.logical_type, path)?;
                let mut map = Map::new();
                map.insert("type".into(), json!("object"));
                map.insert("additionalProperties".into(), Value::Object(values));
                map
            }
            FieldShape::Oneof { options } => {
                let mut branches = Vec::with_capacity(options.len());
                for option in options {
                    let option_path = format!("{}/{}", path, option.name);
                    let Some(ty) = option.type_ref() else {
                        return Err(SchemaError::serialization(Format::JsonSchema, option_path, "nested oneof"));
                    };
                    let mut branch = Map::new();
                    branch.insert("title".into(), json!(option.name));
                    merge(&mut branch, &self.type_schema(ty, option.logical_type, &option_path)?);
                    branches.push(Value::Object(branch));
                }
                let mut map = Map::new();
                map.insert("oneOf".into(), Value::Array(branches));
                map
            }
        };

        if let Some(doc) = &field.documentation {
            map.insert("description".into(), json!(doc));
        }
        if let Some(default) = &field.default {
            map.insert("default".into(), default.clone());
        }
        merge(&mut map, &field.annotations);
        Ok(map)
    }

    fn type_schema(
        &mut self,
        ty: &TypeRef,
        logical: Option<LogicalType>,
        path: &str,
    ) -> Result<Map<String, Value>, SchemaError> {
        let value = match ty {
            TypeRef::Primitive(p) => match logical {
                Some(logical) => logical_schema(&logical),
                None => primitive_schema(*p),
            },
            TypeRef::Named(name) => {
                self.tracker.refer(name, path);
                if Some(name.as_str()) == self.root {
                    json!({ "$ref": "#" })
                } else {
                    json!({ "$ref": format!("#/$defs/{}", name.replace('~', "~0").replace('/', "~1")) })
                }
            }
            TypeRef::Inline(def) => return self.definition(def, path),
            TypeRef::External(reference) => json!({ "$ref": reference }),
            TypeRef::Any => json!({}),
        };
        match value {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

fn primitive_schema(p: Primitive) -> Value {
    match p {
        Primitive::Null => json!({ "type": "null" }),
        Primitive::Boolean => json!({ "type": "boolean" }),
        Primitive::Int | Primitive::SInt32 | Primitive::SFixed32 => {
            json!({ "type": "integer", "format": "int32" })
        }
        Primitive::Long | Primitive::SInt64 | Primitive::SFixed64 => json!({ "type": "integer" }),
        Primitive::UInt32 | Primitive::Fixed32 | Primitive::UInt64 | Primitive::Fixed64 => {
            json!({ "type": "integer", "minimum": 0 })
        }
        Primitive::Float => json!({ "type": "number", "format": "float" }),
        Primitive::Double => json!({ "type": "number" }),
        Primitive::Bytes => json!({ "type": "string", "contentEncoding": "base64" }),
        Primitive::String => json!({ "type": "string" }),
    }
}

fn logical_schema(logical: &LogicalType) -> Value {
    match logical {
        LogicalType::Uuid => json!({ "type": "string", "format": "uuid" }),
        LogicalType::Date => json!({ "type": "string", "format": "date" }),
        LogicalType::TimeMillis | LogicalType::TimeMicros => json!({ "type": "string", "format": "time" }),
        LogicalType::TimestampMillis
        | LogicalType::TimestampMicros
        | LogicalType::LocalTimestampMillis
        | LogicalType::LocalTimestampMicros => json!({ "type": "string", "format": "date-time" }),
        LogicalType::Duration => json!({ "type": "string", "format": "duration" }),
        LogicalType::Decimal { .. } => json!({ "type": "number" }),
    }
}
