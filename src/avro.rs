//! Avro codec: `.avsc` JSON text to IR and back.
//!
//! Named types nested anywhere in the input are hoisted into the schema's
//! type list in pre-order, and every field referring to them holds a
//! by-name reference. Rendering reverses this with the resolver's
//! inline-once rule: the first occurrence of a named type carries its full
//! definition, later occurrences its qualified name.

use std::collections::HashSet;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::SchemaError;
use crate::ir::{
    Annotations, EnumValue, FieldDef, FieldShape, LogicalType, Primitive, Schema, TypeDef,
    TypeKind, TypeRef,
};
use crate::resolver::{self, DefinitionTracker, ForwardReferences, Occurrence, ResolutionPass};
use crate::types::{json_type_name, Format, RenderOptions};
use crate::validator;

const RECORD_KEYS: &[&str] = &["type", "name", "namespace", "doc", "aliases", "fields"];
const ENUM_KEYS: &[&str] = &["type", "name", "namespace", "doc", "aliases", "symbols", "default"];
const FIXED_KEYS: &[&str] = &[
    "type",
    "name",
    "namespace",
    "doc",
    "aliases",
    "size",
    "logicalType",
    "precision",
    "scale",
];
const FIELD_KEYS: &[&str] = &["name", "type", "doc", "default", "aliases"];

/// Parse Avro schema text into a validated IR tree.
///
/// The input is either one named definition or a JSON array of them.
///
/// # Errors
///
/// `Parse` for malformed JSON or Avro structure, `Unsupported` for shapes
/// the IR cannot hold (top-level primitives, nested collections),
/// `UnknownTypeReference`/`UnresolvedTypeReference` for names that are
/// never defined or used before their definition, and `Validation` for
/// constraint violations.
pub fn parse(text: &str) -> Result<Schema, SchemaError> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        SchemaError::parse(
            Format::Avro,
            format!("line {}, column {}", e.line(), e.column()),
            e.to_string(),
        )
    })?;

    let definitions: Vec<&Value> = match &value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![&value],
        other => {
            return Err(SchemaError::unsupported(
                Format::Avro,
                format!("top-level {} schema (only named types are supported)", json_type_name(other)),
            ))
        }
    };

    let namespace = definitions
        .first()
        .and_then(|d| d.as_object())
        .and_then(|d| definition_namespace(d, None));

    let mut parser = Parser {
        namespace: namespace.clone(),
        slots: Vec::new(),
        tracker: DefinitionTracker::new(ForwardReferences::Rejected),
    };
    for (i, definition) in definitions.into_iter().enumerate() {
        let path = format!("/{i}");
        let Some(map) = definition.as_object() else {
            return Err(SchemaError::unsupported(
                Format::Avro,
                format!("top-level {} schema at {path} (only named types are supported)", json_type_name(definition)),
            ));
        };
        match map.get("type").and_then(Value::as_str) {
            Some("record" | "error" | "enum" | "fixed") => {
                parser.named_definition(map, None, &path)?;
            }
            _ => {
                return Err(SchemaError::unsupported(
                    Format::Avro,
                    format!("top-level anonymous schema at {path} (only named types are supported)"),
                ))
            }
        }
    }

    let Parser { slots, tracker, .. } = parser;
    tracker.finish()?;

    let mut schema = Schema::new();
    schema.namespace = namespace;
    schema.types = slots.into_iter().flatten().collect();

    validator::validate_common(&schema)?;
    validator::validate_avro(&schema)?;
    debug!(types = schema.types.len(), "parsed Avro schema");
    Ok(schema)
}

/// Namespace a definition declares or inherits.
fn definition_namespace(map: &Map<String, Value>, enclosing: Option<&str>) -> Option<String> {
    let name = map.get("name").and_then(Value::as_str).unwrap_or_default();
    if let Some((ns, _)) = name.rsplit_once('.') {
        return Some(ns.to_string());
    }
    match map.get("namespace").and_then(Value::as_str) {
        Some("") => None,
        Some(ns) => Some(ns.to_string()),
        None => enclosing.map(str::to_string),
    }
}

fn full_name(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !name.contains('.') => format!("{ns}.{name}"),
        _ => name.to_string(),
    }
}

/// The single type a field, array item or map value holds.
struct Element {
    ty: TypeRef,
    logical_type: Option<LogicalType>,
}

enum Shape {
    Single(Element),
    Array(Element),
    Map(Element),
}

struct Parser {
    namespace: Option<String>,
    // Pre-order placeholders: a definition's slot is taken before its
    // children are parsed.
    slots: Vec<Option<TypeDef>>,
    tracker: DefinitionTracker,
}

impl Parser {
    /// IR name for an Avro full name: simple when it lives in the schema
    /// namespace, otherwise the full dotted name.
    fn ir_name(&self, full: &str) -> String {
        if let Some(ns) = &self.namespace {
            if let Some(local) = full.strip_prefix(ns.as_str()).and_then(|r| r.strip_prefix('.')) {
                if !local.contains('.') {
                    return local.to_string();
                }
            }
        }
        full.to_string()
    }

    /// Parse a record, enum or fixed definition, register it and return
    /// its IR name.
    fn named_definition(
        &mut self,
        map: &Map<String, Value>,
        enclosing: Option<&str>,
        path: &str,
    ) -> Result<String, SchemaError> {
        let Some(name) = map.get("name").and_then(Value::as_str) else {
            return Err(SchemaError::parse(Format::Avro, path, "named type has no `name`"));
        };
        let namespace = definition_namespace(map, enclosing);
        let ir_name = self.ir_name(&full_name(name, namespace.as_deref()));
        self.tracker.define(&ir_name, path)?;

        let slot = self.slots.len();
        self.slots.push(None);

        let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();
        let mut def = match kind {
            "record" | "error" => {
                let Some(fields) = map.get("fields").and_then(Value::as_array) else {
                    return Err(SchemaError::parse(Format::Avro, path, "record has no `fields` array"));
                };
                let mut parsed = Vec::with_capacity(fields.len());
                for (i, field) in fields.iter().enumerate() {
                    parsed.push(self.field(field, namespace.as_deref(), &format!("{path}/fields/{i}"))?);
                }
                let mut def = TypeDef::structure(ir_name.as_str(), parsed);
                def.annotations = extra_keys(map, RECORD_KEYS);
                if kind == "error" {
                    def.annotations.insert("type".into(), json!("error"));
                }
                def
            }
            "enum" => {
                let Some(symbols) = map.get("symbols").and_then(Value::as_array) else {
                    return Err(SchemaError::parse(Format::Avro, path, "enum has no `symbols` array"));
                };
                let mut values = Vec::with_capacity(symbols.len());
                for (i, symbol) in symbols.iter().enumerate() {
                    let Some(symbol) = symbol.as_str() else {
                        return Err(SchemaError::parse(
                            Format::Avro,
                            format!("{path}/symbols/{i}"),
                            "enum symbol must be a string",
                        ));
                    };
                    values.push(EnumValue::new(symbol, i as i32));
                }
                let mut def = TypeDef::enumeration(ir_name.as_str(), values);
                if let TypeKind::Enumeration(e) = &mut def.kind {
                    e.default = map.get("default").and_then(Value::as_str).map(str::to_string);
                }
                def.annotations = extra_keys(map, ENUM_KEYS);
                def
            }
            "fixed" => {
                let Some(size) = map.get("size").and_then(Value::as_u64) else {
                    return Err(SchemaError::parse(Format::Avro, path, "fixed has no integer `size`"));
                };
                let size = u32::try_from(size)
                    .map_err(|_| SchemaError::parse(Format::Avro, path, "fixed size is too large"))?;
                let mut def = TypeDef::fixed(ir_name.as_str(), size);
                if let TypeKind::Fixed(f) = &mut def.kind {
                    f.logical_type = logical_type(map, path);
                }
                def.annotations = extra_keys(map, FIXED_KEYS);
                def
            }
            other => {
                return Err(SchemaError::parse(
                    Format::Avro,
                    path,
                    format!("`{other}` is not a named type"),
                ))
            }
        };

        def.documentation = map.get("doc").and_then(Value::as_str).map(str::to_string);
        def.aliases = string_list(map.get("aliases"));
        self.slots[slot] = Some(def);
        Ok(ir_name)
    }

    fn field(
        &mut self,
        value: &Value,
        namespace: Option<&str>,
        path: &str,
    ) -> Result<FieldDef, SchemaError> {
        let Some(map) = value.as_object() else {
            return Err(SchemaError::parse(Format::Avro, path, "field must be an object"));
        };
        let Some(name) = map.get("name").and_then(Value::as_str) else {
            return Err(SchemaError::parse(Format::Avro, path, "field has no `name`"));
        };
        let Some(ty) = map.get("type") else {
            return Err(SchemaError::parse(Format::Avro, path, "field has no `type`"));
        };
        let path = format!("{path}/{name}");
        let default = map.get("default").cloned();

        let mut field = match ty {
            Value::Array(branches) => self.union_field(name, branches, default, namespace, &path)?,
            other => {
                let mut field = shape_field(name, self.shape(other, namespace, &path)?);
                field.default = default;
                field
            }
        };

        field.documentation = map.get("doc").and_then(Value::as_str).map(str::to_string);
        field.aliases = string_list(map.get("aliases"));
        field.annotations = extra_keys(map, FIELD_KEYS);
        Ok(field)
    }

    fn union_field(
        &mut self,
        name: &str,
        branches: &[Value],
        default: Option<Value>,
        namespace: Option<&str>,
        path: &str,
    ) -> Result<FieldDef, SchemaError> {
        let nullable = branches.iter().any(|b| b.as_str() == Some("null"));
        let others: Vec<&Value> = branches.iter().filter(|b| b.as_str() != Some("null")).collect();

        match others.as_slice() {
            [] if nullable => Ok(FieldDef::new(name, Primitive::Null)),
            [] => Err(SchemaError::parse(Format::Avro, path, "union has no branches")),
            [single] if nullable => {
                let mut field = shape_field(name, self.shape(single, namespace, path)?).optional();
                if matches!(&default, Some(d) if !d.is_null()) {
                    warn!(field = name, path, "dropping non-null default of optional field");
                }
                field.default = None;
                Ok(field)
            }
            [single] => {
                let mut field = shape_field(name, self.shape(single, namespace, path)?);
                field.default = default;
                Ok(field)
            }
            _ => {
                let mut options = Vec::with_capacity(others.len());
                for branch in others.iter() {
                    let Shape::Single(element) = self.shape(branch, namespace, path)? else {
                        return Err(SchemaError::unsupported(
                            Format::Avro,
                            format!("array or map branch in a union at {path}"),
                        ));
                    };
                    let option_name = branch_name(&element);
                    let mut option = FieldDef::new(option_name, element.ty);
                    option.logical_type = element.logical_type;
                    options.push(option);
                }
                let mut field = FieldDef::oneof(name, options).with_required(!nullable);
                if !nullable {
                    field.default = default;
                }
                Ok(field)
            }
        }
    }

    fn shape(&mut self, value: &Value, namespace: Option<&str>, path: &str) -> Result<Shape, SchemaError> {
        let Value::Object(map) = value else {
            return Ok(Shape::Single(self.element(value, namespace, path)?));
        };
        match map.get("type").and_then(Value::as_str) {
            Some("array") => {
                let items = map
                    .get("items")
                    .ok_or_else(|| SchemaError::parse(Format::Avro, path, "array has no `items`"))?;
                Ok(Shape::Array(self.element(items, namespace, path)?))
            }
            Some("map") => {
                let values = map
                    .get("values")
                    .ok_or_else(|| SchemaError::parse(Format::Avro, path, "map has no `values`"))?;
                Ok(Shape::Map(self.element(values, namespace, path)?))
            }
            _ => Ok(Shape::Single(self.element(value, namespace, path)?)),
        }
    }

    fn element(&mut self, value: &Value, namespace: Option<&str>, path: &str) -> Result<Element, SchemaError> {
        match value {
            Value::String(name) => Ok(Element {
                ty: self.reference(name, namespace, path),
                logical_type: None,
            }),
            Value::Array(_) => Err(SchemaError::unsupported(
                Format::Avro,
                format!("union inside an array or map at {path}"),
            )),
            Value::Object(map) => match map.get("type") {
                Some(Value::String(kind)) => match kind.as_str() {
                    "record" | "error" | "enum" | "fixed" => {
                        let name = self.named_definition(map, namespace, path)?;
                        Ok(Element {
                            ty: TypeRef::Named(name),
                            logical_type: None,
                        })
                    }
                    "array" | "map" => Err(SchemaError::unsupported(
                        Format::Avro,
                        format!("nested {kind} inside an array or map at {path}"),
                    )),
                    other => {
                        let ty = self.reference(other, namespace, path);
                        let logical_type = match ty {
                            TypeRef::Primitive(_) => logical_type(map, path),
                            _ => None,
                        };
                        Ok(Element { ty, logical_type })
                    }
                },
                Some(inner @ (Value::Object(_) | Value::Array(_))) => self.element(inner, namespace, path),
                _ => Err(SchemaError::parse(Format::Avro, path, "schema object has no `type`")),
            },
            other => Err(SchemaError::parse(
                Format::Avro,
                path,
                format!("expected a schema, found {}", json_type_name(other)),
            )),
        }
    }

    fn reference(&mut self, name: &str, namespace: Option<&str>, path: &str) -> TypeRef {
        if let Some(p) = avro_primitive(name) {
            return TypeRef::Primitive(p);
        }
        let ir_name = self.ir_name(&full_name(name, namespace));
        self.tracker.refer(&ir_name, path);
        TypeRef::Named(ir_name)
    }
}

fn avro_primitive(name: &str) -> Option<Primitive> {
    match name {
        "null" => Some(Primitive::Null),
        "boolean" => Some(Primitive::Boolean),
        "int" => Some(Primitive::Int),
        "long" => Some(Primitive::Long),
        "float" => Some(Primitive::Float),
        "double" => Some(Primitive::Double),
        "bytes" => Some(Primitive::Bytes),
        "string" => Some(Primitive::String),
        _ => None,
    }
}

fn logical_type(map: &Map<String, Value>, path: &str) -> Option<LogicalType> {
    let name = map.get("logicalType")?.as_str()?;
    let number = |key: &str| {
        map.get(key)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    };
    let logical = LogicalType::from_name(name, number("precision"), number("scale"));
    if logical.is_none() {
        warn!(logical_type = name, path, "ignoring unknown logical type");
    }
    logical
}

fn shape_field(name: &str, shape: Shape) -> FieldDef {
    let (mut field, element) = match shape {
        Shape::Single(e) => (FieldDef::new(name, e.ty.clone()), e),
        Shape::Array(e) => (FieldDef::repeated(name, e.ty.clone()), e),
        Shape::Map(e) => (FieldDef::map(name, Primitive::String, e.ty.clone()), e),
    };
    field.logical_type = element.logical_type;
    field
}

/// Option name for a union branch: the branch type's simple name.
fn branch_name(element: &Element) -> String {
    if let Some(logical) = element.logical_type {
        return logical.name().replace('-', "_");
    }
    match &element.ty {
        TypeRef::Primitive(p) => p.name().to_string(),
        TypeRef::Named(name) => name.rsplit('.').next().unwrap_or(name).to_string(),
        _ => "value".to_string(),
    }
}

fn extra_keys(map: &Map<String, Value>, known: &[&str]) -> Annotations {
    map.iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Render an IR tree as Avro schema text.
///
/// One emitted definition renders as a JSON object, several as an array.
/// The output is checked by apache-avro's schema parser before it is
/// returned.
///
/// # Errors
///
/// `Validation` and resolver errors for invalid trees, `Serialization` for
/// IR constructs Avro cannot express, `AvroRejected` when the final
/// acceptance gate fails.
pub fn render(schema: &Schema, options: &RenderOptions) -> Result<String, SchemaError> {
    validator::validate_common(schema)?;
    validator::validate_avro(schema)?;
    resolver::check(schema)?;

    if schema.types.is_empty() {
        return Err(SchemaError::serialization(Format::Avro, "/", "schema defines no types"));
    }

    let mut writer = Writer {
        schema,
        pass: ResolutionPass::new(schema),
        synthesized: HashSet::new(),
    };
    let mut out = Vec::new();
    for def in &schema.types {
        if writer.pass.is_emitted(&def.name) {
            continue;
        }
        let path = format!("/{}", def.name);
        if let Occurrence::Inline(def) = writer.pass.occurrence(&def.name, &path)? {
            out.push(writer.definition(def, &def.name, None, &path)?);
        }
    }

    let value = if out.len() == 1 {
        out.remove(0)
    } else {
        Value::Array(out)
    };
    let text = if options.pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .map_err(|e| SchemaError::serialization(Format::Avro, "/", e.to_string()))?;

    apache_avro::Schema::parse_str(&text).map_err(|e| SchemaError::AvroRejected {
        message: e.to_string(),
    })?;

    debug!(types = schema.types.len(), bytes = text.len(), "rendered Avro schema");
    Ok(text)
}

struct Writer<'s> {
    schema: &'s Schema,
    pass: ResolutionPass<'s>,
    synthesized: HashSet<String>,
}

impl<'s> Writer<'s> {
    /// Full definition of `def`, named `name` (an IR name or a synthesized
    /// one for anonymous inline types).
    fn definition(
        &mut self,
        def: &TypeDef,
        name: &str,
        enclosing: Option<&str>,
        path: &str,
    ) -> Result<Value, SchemaError> {
        let mut map = Map::new();
        let kind = match &def.kind {
            TypeKind::Structure(_) => match def.annotations.get("type").and_then(Value::as_str) {
                Some("error") => "error",
                _ => "record",
            },
            TypeKind::Enumeration(_) => "enum",
            TypeKind::Fixed(_) => "fixed",
            TypeKind::Opaque(_) => {
                return Err(SchemaError::serialization(
                    Format::Avro,
                    path,
                    "opaque definitions have no Avro form",
                ))
            }
        };
        map.insert("type".into(), json!(kind));
        map.insert("name".into(), json!(name));

        // Simple names resolve against the enclosing namespace; pin the
        // schema namespace whenever it differs.
        let own_ns = if name.contains('.') {
            name.rsplit_once('.').map(|(ns, _)| ns.to_string())
        } else {
            self.schema.namespace.clone()
        };
        if !name.contains('.') && own_ns.as_deref() != enclosing {
            map.insert("namespace".into(), json!(own_ns.clone().unwrap_or_default()));
        }
        if let Some(doc) = &def.documentation {
            map.insert("doc".into(), json!(doc));
        }
        if !def.aliases.is_empty() {
            map.insert("aliases".into(), json!(def.aliases));
        }

        match &def.kind {
            TypeKind::Structure(structure) => {
                let mut fields = Vec::with_capacity(structure.fields.len());
                for field in &structure.fields {
                    let field_path = format!("{}/{}", path, field.name);
                    fields.push(self.field(field, own_ns.as_deref(), &field_path)?);
                }
                map.insert("fields".into(), Value::Array(fields));
            }
            TypeKind::Enumeration(enumeration) => {
                let symbols: Vec<&str> = enumeration.symbols().collect();
                map.insert("symbols".into(), json!(symbols));
                if let Some(default) = &enumeration.default {
                    map.insert("default".into(), json!(default));
                }
            }
            TypeKind::Fixed(fixed) => {
                map.insert("size".into(), json!(fixed.size));
                if let Some(logical) = &fixed.logical_type {
                    insert_logical(&mut map, logical);
                }
            }
            TypeKind::Opaque(_) => {}
        }

        for (key, value) in &def.annotations {
            if key != "type" {
                map.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        Ok(Value::Object(map))
    }

    fn field(&mut self, field: &FieldDef, ns: Option<&str>, path: &str) -> Result<Value, SchemaError> {
        let mut map = Map::new();
        map.insert("name".into(), json!(field.name));

        let ty = match &field.shape {
            FieldShape::Scalar { ty } => self.type_json(ty, field.logical_type, &field.name, ns, path)?,
            FieldShape::Repeated { items } => {
                json!({ "type": "array", "items": self.type_json(items, field.logical_type, &field.name, ns, path)? })
            }
            FieldShape::Map { key, values } => {
                if *key != Primitive::String {
                    return Err(SchemaError::serialization(
                        Format::Avro,
                        path,
                        format!("Avro map keys are strings, found `{key}`"),
                    ));
                }
                json!({ "type": "map", "values": self.type_json(values, field.logical_type, &field.name, ns, path)? })
            }
            FieldShape::Oneof { options } => {
                let mut branches = Vec::with_capacity(options.len() + 1);
                if !field.required {
                    branches.push(json!("null"));
                }
                for option in options {
                    let option_path = format!("{}/{}", path, option.name);
                    let Some(ty) = option.type_ref() else {
                        return Err(SchemaError::serialization(Format::Avro, option_path, "nested oneof"));
                    };
                    branches.push(self.type_json(ty, option.logical_type, &option.name, ns, &option_path)?);
                }
                Value::Array(branches)
            }
        };

        if field.required || field.is_oneof() {
            map.insert("type".into(), ty);
            if let Some(default) = &field.default {
                map.insert("default".into(), default.clone());
            } else if !field.required {
                map.insert("default".into(), Value::Null);
            }
        } else {
            map.insert("type".into(), json!(["null", ty]));
            map.insert("default".into(), Value::Null);
        }
        if let Some(doc) = &field.documentation {
            map.insert("doc".into(), json!(doc));
        }
        if !field.aliases.is_empty() {
            map.insert("aliases".into(), json!(field.aliases));
        }
        for (key, value) in &field.annotations {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(Value::Object(map))
    }

    fn type_json(
        &mut self,
        ty: &TypeRef,
        logical: Option<LogicalType>,
        field_name: &str,
        ns: Option<&str>,
        path: &str,
    ) -> Result<Value, SchemaError> {
        match ty {
            TypeRef::Primitive(p) => {
                let base = json!(primitive_name(*p));
                match logical {
                    None => Ok(base),
                    Some(logical) => {
                        let mut map = Map::new();
                        map.insert("type".into(), base);
                        insert_logical(&mut map, &logical);
                        Ok(Value::Object(map))
                    }
                }
            }
            TypeRef::Named(name) => match self.pass.occurrence(name, path)? {
                Occurrence::Inline(def) => self.definition(def, &def.name, ns, path),
                Occurrence::ByName(qualified) => Ok(json!(qualified)),
            },
            TypeRef::Inline(def) => {
                let name = self.synthesize_name(field_name);
                self.definition(def, &name, ns, path)
            }
            TypeRef::External(reference) => Err(SchemaError::serialization(
                Format::Avro,
                path,
                format!("external reference `{reference}` cannot be expressed in Avro"),
            )),
            TypeRef::Any => Err(SchemaError::serialization(
                Format::Avro,
                path,
                "untyped value cannot be expressed in Avro",
            )),
        }
    }

    /// PascalCase name for an anonymous type, unique within the output.
    fn synthesize_name(&mut self, field_name: &str) -> String {
        let base = pascal_case(field_name);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.schema.contains(&candidate) || !self.synthesized.insert(candidate.clone()) {
            candidate = format!("{base}{n}");
            n += 1;
        }
        candidate
    }
}

fn insert_logical(map: &mut Map<String, Value>, logical: &LogicalType) {
    map.insert("logicalType".into(), json!(logical.name()));
    if let LogicalType::Decimal { precision, scale } = logical {
        if let Some(precision) = precision {
            map.insert("precision".into(), json!(precision));
        }
        if let Some(scale) = scale {
            map.insert("scale".into(), json!(scale));
        }
    }
}

/// Avro primitive for an IR primitive; wire encodings without an Avro
/// counterpart widen to `int` or `long`.
fn primitive_name(p: Primitive) -> &'static str {
    match p {
        Primitive::SInt32 | Primitive::Fixed32 | Primitive::SFixed32 => "int",
        Primitive::UInt32
        | Primitive::UInt64
        | Primitive::SInt64
        | Primitive::Fixed64
        | Primitive::SFixed64 => "long",
        other => other.name(),
    }
}

pub(crate) fn pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if c == '_' || c == '-' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationKind;

    fn render_compact(schema: &Schema) -> Value {
        let text = render(schema, &RenderOptions::new().pretty(false)).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    // === Parse Tests ===

    #[test]
    fn parses_record_with_primitives_and_logical_types() {
        let schema = parse(
            r#"{
                "type": "record", "name": "User", "namespace": "com.example",
                "doc": "A user",
                "fields": [
                    {"name": "id", "type": {"type": "string", "logicalType": "uuid"}},
                    {"name": "age", "type": "int", "default": 0},
                    {"name": "balance", "type": {"type": "bytes", "logicalType": "decimal", "precision": 10, "scale": 2}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(schema.namespace.as_deref(), Some("com.example"));
        let user = schema.get("User").unwrap();
        assert_eq!(user.documentation.as_deref(), Some("A user"));
        let fields = &user.as_structure().unwrap().fields;
        assert_eq!(fields[0].logical_type, Some(LogicalType::Uuid));
        assert_eq!(fields[1].default, Some(json!(0)));
        assert_eq!(
            fields[2].logical_type,
            Some(LogicalType::Decimal {
                precision: Some(10),
                scale: Some(2)
            })
        );
    }

    #[test]
    fn nullable_union_becomes_optional() {
        let schema = parse(
            r#"{"type": "record", "name": "P", "fields": [
                {"name": "middleName", "type": ["null", "string"], "default": null},
                {"name": "nick", "type": ["string", "null"], "default": "bob"}
            ]}"#,
        )
        .unwrap();
        let fields = &schema.types[0].as_structure().unwrap().fields;
        assert!(!fields[0].required);
        assert_eq!(fields[0].type_ref(), Some(&TypeRef::Primitive(Primitive::String)));
        assert!(!fields[1].required);
        assert_eq!(fields[1].default, None);
    }

    #[test]
    fn general_union_becomes_oneof() {
        let schema = parse(
            r#"{"type": "record", "name": "Event", "fields": [
                {"name": "payload", "type": ["null", "string", "long"]}
            ]}"#,
        )
        .unwrap();
        let field = &schema.types[0].as_structure().unwrap().fields[0];
        let FieldShape::Oneof { options } = &field.shape else {
            panic!("expected oneof");
        };
        assert!(!field.required);
        let names: Vec<&str> = options.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["string", "long"]);
    }

    #[test]
    fn nested_named_types_are_hoisted_in_pre_order() {
        let schema = parse(
            r#"{"type": "record", "name": "Person", "namespace": "com.example", "fields": [
                {"name": "home", "type": {"type": "record", "name": "Address", "fields": [
                    {"name": "kind", "type": {"type": "enum", "name": "Kind", "symbols": ["HOUSE", "FLAT"]}}
                ]}},
                {"name": "work", "type": "com.example.Address"}
            ]}"#,
        )
        .unwrap();
        let names: Vec<&str> = schema.types.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Person", "Address", "Kind"]);

        let person = schema.get("Person").unwrap().as_structure().unwrap();
        assert_eq!(person.fields[0].type_ref(), Some(&TypeRef::named("Address")));
        assert_eq!(person.fields[1].type_ref(), Some(&TypeRef::named("Address")));
    }

    #[test]
    fn forward_reference_is_unresolved() {
        let result = parse(
            r#"[
                {"type": "record", "name": "Person", "fields": [{"name": "home", "type": "Address"}]},
                {"type": "record", "name": "Address", "fields": [{"name": "street", "type": "string"}]}
            ]"#,
        );
        assert!(matches!(
            result,
            Err(SchemaError::UnresolvedTypeReference { name, .. }) if name == "Address"
        ));
    }

    #[test]
    fn undefined_reference_is_unknown() {
        let result = parse(r#"{"type": "record", "name": "P", "fields": [{"name": "a", "type": "Nope"}]}"#);
        assert!(matches!(result, Err(SchemaError::UnknownTypeReference { .. })));
    }

    #[test]
    fn redefinition_is_rejected() {
        let result = parse(
            r#"{"type": "record", "name": "P", "fields": [
                {"name": "a", "type": {"type": "fixed", "name": "H", "size": 4}},
                {"name": "b", "type": {"type": "fixed", "name": "H", "size": 4}}
            ]}"#,
        );
        assert!(matches!(
            result,
            Err(SchemaError::Validation {
                kind: ValidationKind::DuplicateTypeName { .. },
                ..
            })
        ));
    }

    #[test]
    fn unsupported_shapes() {
        assert!(matches!(parse(r#""string""#), Err(SchemaError::Unsupported { .. })));
        let nested = r#"{"type": "record", "name": "M", "fields": [
            {"name": "grid", "type": {"type": "array", "items": {"type": "array", "items": "int"}}}
        ]}"#;
        assert!(matches!(parse(nested), Err(SchemaError::Unsupported { .. })));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(parse("{\"type\": "), Err(SchemaError::Parse { .. })));
    }

    #[test]
    fn custom_attributes_become_annotations() {
        let schema = parse(
            r#"{"type": "record", "name": "P", "connect.name": "p", "fields": [
                {"name": "a", "type": "int", "order": "descending"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(schema.types[0].annotations["connect.name"], "p");
        let field = &schema.types[0].as_structure().unwrap().fields[0];
        assert_eq!(field.annotations["order"], "descending");
    }

    // === Render Tests ===

    #[test]
    fn optional_field_renders_null_first() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "Person",
            vec![FieldDef::new("middleName", Primitive::String).optional()],
        ));
        let out = render_compact(&schema);
        assert_eq!(
            out["fields"][0],
            json!({"name": "middleName", "type": ["null", "string"], "default": null})
        );
    }

    #[test]
    fn second_reference_renders_qualified_name() {
        let schema = Schema::new()
            .with_namespace("com.example")
            .with_type(TypeDef::structure(
                "Person",
                vec![
                    FieldDef::new("home", TypeRef::named("Address")),
                    FieldDef::new("work", TypeRef::named("Address")),
                ],
            ))
            .with_type(TypeDef::structure(
                "Address",
                vec![FieldDef::new("street", Primitive::String)],
            ));
        let out = render_compact(&schema);
        assert!(out.is_object());
        assert_eq!(out["namespace"], "com.example");
        assert_eq!(out["fields"][0]["type"]["type"], "record");
        assert_eq!(out["fields"][1]["type"], "com.example.Address");
    }

    #[test]
    fn unreferenced_types_render_as_array() {
        let schema = Schema::new()
            .with_type(TypeDef::structure("A", vec![FieldDef::new("x", Primitive::Int)]))
            .with_type(TypeDef::fixed("Hash", 16));
        let out = render_compact(&schema);
        assert_eq!(out.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn widens_protobuf_integer_encodings() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "M",
            vec![
                FieldDef::new("a", Primitive::UInt32),
                FieldDef::new("b", Primitive::SFixed32),
            ],
        ));
        let out = render_compact(&schema);
        assert_eq!(out["fields"][0]["type"], "long");
        assert_eq!(out["fields"][1]["type"], "int");
    }

    #[test]
    fn non_string_map_key_is_serialization_error() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "M",
            vec![FieldDef::map("m", Primitive::Int, Primitive::String)],
        ));
        assert!(matches!(
            render(&schema, &RenderOptions::new()),
            Err(SchemaError::Serialization { .. })
        ));
    }

    #[test]
    fn inline_type_gets_synthesized_name() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "Order",
            vec![FieldDef::new(
                "line_item",
                TypeRef::inline(TypeDef::structure("", vec![FieldDef::new("sku", Primitive::String)])),
            )],
        ));
        let out = render_compact(&schema);
        assert_eq!(out["fields"][0]["type"]["name"], "LineItem");
    }

    #[test]
    fn decimal_without_precision_fails_validation() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "M",
            vec![FieldDef::new("amount", Primitive::Bytes).with_logical_type(LogicalType::Decimal {
                precision: None,
                scale: None,
            })],
        ));
        assert!(matches!(
            render(&schema, &RenderOptions::new()),
            Err(SchemaError::Validation { .. })
        ));
    }

    #[test]
    fn opaque_definition_cannot_render() {
        let schema = Schema::new().with_type(TypeDef::opaque("Anything", json!({"type": "string"})));
        assert!(matches!(
            render(&schema, &RenderOptions::new()),
            Err(SchemaError::Serialization { .. })
        ));
    }

    #[test]
    fn pascal_case_names() {
        assert_eq!(pascal_case("line_item"), "LineItem");
        assert_eq!(pascal_case("address"), "Address");
    }
}
