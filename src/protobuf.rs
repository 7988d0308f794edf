//! proto3 codec: `.proto` text to IR and back.
//!
//! Nested messages and enums are flattened into the schema's type list in
//! pre-order and renamed `Outer_Inner`. Type references are resolved with
//! protobuf scoping rules once the whole file is read, so definitions may
//! appear after their first use.

mod lexer;

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::avro::pascal_case;
use crate::error::SchemaError;
use crate::ir::{
    Annotations, EnumValue, Enumeration, FieldDef, FieldShape, LogicalType, Node, Primitive,
    ReservedRange, Schema, Structure, TypeDef, TypeKind, TypeRef, MAX_FIELD_NUMBER,
};
use crate::resolver::{self, DefinitionTracker, ForwardReferences};
use crate::types::Format;
use crate::validator;

use lexer::{Token, TokenKind};

const TIMESTAMP: &str = "google.protobuf.Timestamp";
const TIMESTAMP_IMPORT: &str = "google/protobuf/timestamp.proto";

/// Field, message and enum options the writer re-emits.
const KNOWN_OPTIONS: &[&str] = &[
    "deprecated",
    "json_name",
    "packed",
    "ctype",
    "jstype",
    "lazy",
    "allow_alias",
];

/// File options the writer re-emits.
const KNOWN_FILE_OPTIONS: &[&str] = &[
    "java_package",
    "java_outer_classname",
    "java_multiple_files",
    "go_package",
    "csharp_namespace",
    "objc_class_prefix",
    "php_namespace",
    "ruby_package",
    "swift_prefix",
    "optimize_for",
    "cc_enable_arenas",
    "deprecated",
];

fn scalar(name: &str) -> Option<Primitive> {
    let p = match name {
        "double" => Primitive::Double,
        "float" => Primitive::Float,
        "int32" => Primitive::Int,
        "int64" => Primitive::Long,
        "uint32" => Primitive::UInt32,
        "uint64" => Primitive::UInt64,
        "sint32" => Primitive::SInt32,
        "sint64" => Primitive::SInt64,
        "fixed32" => Primitive::Fixed32,
        "fixed64" => Primitive::Fixed64,
        "sfixed32" => Primitive::SFixed32,
        "sfixed64" => Primitive::SFixed64,
        "bool" => Primitive::Boolean,
        "string" => Primitive::String,
        "bytes" => Primitive::Bytes,
        _ => return None,
    };
    Some(p)
}

fn scalar_name(p: Primitive) -> Option<&'static str> {
    let name = match p {
        Primitive::Double => "double",
        Primitive::Float => "float",
        Primitive::Int => "int32",
        Primitive::Long => "int64",
        Primitive::UInt32 => "uint32",
        Primitive::UInt64 => "uint64",
        Primitive::SInt32 => "sint32",
        Primitive::SInt64 => "sint64",
        Primitive::Fixed32 => "fixed32",
        Primitive::Fixed64 => "fixed64",
        Primitive::SFixed32 => "sfixed32",
        Primitive::SFixed64 => "sfixed64",
        Primitive::Boolean => "bool",
        Primitive::String => "string",
        Primitive::Bytes => "bytes",
        Primitive::Null => return None,
    };
    Some(name)
}

/// Parse proto3 text into a validated IR tree.
///
/// # Errors
///
/// `Unsupported` when the file is not explicitly proto3 (or uses proto2-only
/// constructs), `Parse` for malformed text, `UnknownTypeReference` for
/// message or enum names that are not defined in the file, and
/// `Validation` for constraint violations.
pub fn parse(text: &str) -> Result<Schema, SchemaError> {
    let tokens = lexer::tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        package: None,
        slots: Vec::new(),
        scopes: Vec::new(),
        names: HashMap::new(),
        annotations: Annotations::new(),
    };
    parser.file()?;

    let Parser {
        package,
        slots,
        scopes,
        names,
        annotations,
        ..
    } = parser;

    let mut types: Vec<TypeDef> = slots.into_iter().flatten().collect();
    let kinds: HashMap<String, bool> = types
        .iter()
        .map(|t| (t.name.clone(), t.as_structure().is_some()))
        .collect();
    let resolve = Resolve {
        package: package.as_deref(),
        names: &names,
        kinds: &kinds,
    };
    for (def, scope) in types.iter_mut().zip(&scopes) {
        let path = format!("/{}", def.name);
        if let TypeKind::Structure(structure) = &mut def.kind {
            for field in &mut structure.fields {
                let field_path = format!("{}/{}", path, field.name);
                resolve.field(field, scope, &field_path, true)?;
            }
        }
    }

    let mut schema = Schema::new();
    schema.namespace = package;
    schema.annotations = annotations;
    schema.types = types;

    validator::validate_common(&schema)?;
    validator::validate_protobuf(&schema)?;
    debug!(types = schema.types.len(), "parsed Protobuf schema");
    Ok(schema)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    package: Option<String>,
    slots: Vec<Option<TypeDef>>,
    /// Enclosing message path (`["Outer", "Inner"]`) of each slot.
    scopes: Vec<Vec<String>>,
    /// Dotted proto name relative to the package -> IR name.
    names: HashMap<String, String>,
    annotations: Annotations,
}

impl Parser {
    // --- token helpers ---

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn location(&self) -> String {
        match self.tokens.get(self.pos).or_else(|| self.tokens.last()) {
            Some(token) => format!("line {}", token.line),
            None => "line 1".to_string(),
        }
    }

    fn error(&self, message: impl Into<String>) -> SchemaError {
        SchemaError::parse(Format::Protobuf, self.location(), message)
    }

    fn next(&mut self) -> Result<TokenKind, SchemaError> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|t| t.kind.clone())
            .ok_or_else(|| self.error("unexpected end of file"))?;
        self.pos += 1;
        Ok(token)
    }

    fn doc(&self) -> Option<String> {
        self.tokens.get(self.pos).and_then(|t| t.doc.clone())
    }

    fn is_symbol(&self, c: char) -> bool {
        self.peek() == Some(&TokenKind::Symbol(c))
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(TokenKind::Ident(s)) if s == keyword)
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if self.is_symbol(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, c: char) -> Result<(), SchemaError> {
        if self.eat_symbol(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{c}`, found {}", self.describe())))
        }
    }

    fn expect_ident(&mut self) -> Result<String, SchemaError> {
        match self.peek() {
            Some(TokenKind::Ident(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.error(format!("expected identifier, found {}", self.describe()))),
        }
    }

    fn expect_int(&mut self) -> Result<u64, SchemaError> {
        match self.peek() {
            Some(TokenKind::Int(n)) => {
                let n = *n;
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.error(format!("expected integer, found {}", self.describe()))),
        }
    }

    fn expect_str(&mut self) -> Result<String, SchemaError> {
        match self.peek() {
            Some(TokenKind::Str(s)) => {
                let mut s = s.clone();
                self.pos += 1;
                // Adjacent literals concatenate.
                while let Some(TokenKind::Str(more)) = self.peek() {
                    s.push_str(more);
                    self.pos += 1;
                }
                Ok(s)
            }
            _ => Err(self.error(format!("expected string, found {}", self.describe()))),
        }
    }

    fn describe(&self) -> String {
        match self.peek() {
            Some(TokenKind::Ident(s)) => format!("`{s}`"),
            Some(TokenKind::Int(n)) => format!("`{n}`"),
            Some(TokenKind::Float(f)) => format!("`{f}`"),
            Some(TokenKind::Str(s)) => format!("\"{s}\""),
            Some(TokenKind::Symbol(c)) => format!("`{c}`"),
            None => "end of file".to_string(),
        }
    }

    /// Dotted name, optionally fully qualified with a leading dot.
    fn dotted_name(&mut self) -> Result<String, SchemaError> {
        let mut name = String::new();
        if self.eat_symbol('.') {
            name.push('.');
        }
        name.push_str(&self.expect_ident()?);
        while self.eat_symbol('.') {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(name)
    }

    // --- file level ---

    fn file(&mut self) -> Result<(), SchemaError> {
        if self.is_keyword("edition") {
            return Err(SchemaError::unsupported(
                Format::Protobuf,
                "protobuf editions (only proto3 is supported)",
            ));
        }
        if !self.is_keyword("syntax") {
            return Err(SchemaError::unsupported(
                Format::Protobuf,
                "proto2 syntax (files without `syntax = \"proto3\";` are proto2)",
            ));
        }
        self.pos += 1;
        self.expect_symbol('=')?;
        let syntax = self.expect_str()?;
        self.expect_symbol(';')?;
        match syntax.as_str() {
            "proto3" => {}
            "proto2" => return Err(SchemaError::unsupported(Format::Protobuf, "proto2 syntax")),
            other => {
                return Err(SchemaError::unsupported(
                    Format::Protobuf,
                    format!("syntax `{other}` (only proto3 is supported)"),
                ))
            }
        }

        while let Some(token) = self.peek().cloned() {
            let TokenKind::Ident(keyword) = token else {
                if self.eat_symbol(';') {
                    continue;
                }
                return Err(self.error(format!("unexpected {}", self.describe())));
            };
            match keyword.as_str() {
                "package" => {
                    self.pos += 1;
                    let package = self.dotted_name()?;
                    self.expect_symbol(';')?;
                    self.package = Some(package);
                }
                "import" => {
                    self.pos += 1;
                    if self.is_keyword("public") || self.is_keyword("weak") {
                        self.pos += 1;
                    }
                    self.expect_str()?;
                    self.expect_symbol(';')?;
                }
                "option" => {
                    self.pos += 1;
                    let (name, value) = self.option_assignment()?;
                    self.expect_symbol(';')?;
                    self.annotations.insert(name, value);
                }
                "message" => self.message(&[])?,
                "enum" => self.enumeration(&[])?,
                "service" => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    warn!(service = %name, "skipping service definition");
                    self.skip_block()?;
                }
                "extend" => {
                    return Err(SchemaError::unsupported(Format::Protobuf, "extensions (`extend`)"))
                }
                other => return Err(self.error(format!("unexpected `{other}`"))),
            }
        }
        Ok(())
    }

    fn skip_block(&mut self) -> Result<(), SchemaError> {
        self.expect_symbol('{')?;
        let mut depth = 1;
        while depth > 0 {
            match self.next()? {
                TokenKind::Symbol('{') => depth += 1,
                TokenKind::Symbol('}') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// `name = constant`, shared by `option` statements and `[...]` lists.
    fn option_assignment(&mut self) -> Result<(String, Value), SchemaError> {
        let mut name = String::new();
        if self.eat_symbol('(') {
            name.push('(');
            name.push_str(&self.dotted_name()?);
            self.expect_symbol(')')?;
            name.push(')');
        } else {
            name.push_str(&self.expect_ident()?);
        }
        while self.eat_symbol('.') {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        self.expect_symbol('=')?;
        let value = self.constant()?;
        Ok((name, value))
    }

    fn constant(&mut self) -> Result<Value, SchemaError> {
        let negative = self.eat_symbol('-');
        if !negative {
            self.eat_symbol('+');
        }
        match self.peek().cloned() {
            Some(TokenKind::Int(n)) => {
                self.pos += 1;
                if negative {
                    let n = i64::try_from(n).map_err(|_| self.error("integer constant out of range"))?;
                    Ok(json!(-n))
                } else {
                    Ok(json!(n))
                }
            }
            Some(TokenKind::Float(f)) => {
                self.pos += 1;
                let n: f64 = f.parse().map_err(|_| self.error("invalid float constant"))?;
                Ok(json!(if negative { -n } else { n }))
            }
            Some(TokenKind::Str(_)) => Ok(Value::String(self.expect_str()?)),
            Some(TokenKind::Ident(ident)) => {
                self.pos += 1;
                Ok(match ident.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ if negative => Value::String(format!("-{ident}")),
                    _ => Value::String(ident),
                })
            }
            Some(TokenKind::Symbol('{')) => Err(SchemaError::unsupported(
                Format::Protobuf,
                "aggregate option values",
            )),
            _ => Err(self.error(format!("expected constant, found {}", self.describe()))),
        }
    }

    /// Optional `[name = value, ...]` after a field or enum value.
    fn field_options(&mut self) -> Result<Annotations, SchemaError> {
        let mut options = Annotations::new();
        if !self.eat_symbol('[') {
            return Ok(options);
        }
        loop {
            let (name, value) = self.option_assignment()?;
            options.insert(name, value);
            if self.eat_symbol(']') {
                return Ok(options);
            }
            self.expect_symbol(',')?;
        }
    }

    // --- definitions ---

    /// Reserve a pre-order slot for `name` nested in `scope`.
    fn register(&mut self, scope: &[String], name: &str) -> Result<(usize, String), SchemaError> {
        let mut dotted: Vec<&str> = scope.iter().map(String::as_str).collect();
        dotted.push(name);
        let proto_name = dotted.join(".");
        let ir_name = dotted.join("_");
        if self.names.insert(proto_name, ir_name.clone()).is_some() {
            return Err(self.error(format!("`{name}` is already defined")));
        }
        self.slots.push(None);
        self.scopes.push(scope.to_vec());
        Ok((self.slots.len() - 1, ir_name))
    }

    fn message(&mut self, scope: &[String]) -> Result<(), SchemaError> {
        let doc = self.doc();
        self.pos += 1;
        let name = self.expect_ident()?;
        let (slot, ir_name) = self.register(scope, &name)?;
        let mut inner_scope = scope.to_vec();
        inner_scope.push(name);

        let mut structure = Structure::default();
        let mut annotations = Annotations::new();
        self.expect_symbol('{')?;
        while !self.eat_symbol('}') {
            let Some(token) = self.peek().cloned() else {
                return Err(self.error("unterminated message"));
            };
            match token {
                TokenKind::Symbol(';') => self.pos += 1,
                TokenKind::Ident(keyword) => match keyword.as_str() {
                    "message" => self.message(&inner_scope)?,
                    "enum" => self.enumeration(&inner_scope)?,
                    "reserved" => {
                        self.pos += 1;
                        self.reserved(&mut structure.reserved, &mut structure.reserved_names, MAX_FIELD_NUMBER)?;
                    }
                    "option" => {
                        self.pos += 1;
                        let (name, value) = self.option_assignment()?;
                        self.expect_symbol(';')?;
                        annotations.insert(name, value);
                    }
                    "oneof" => {
                        let field = self.oneof()?;
                        structure.fields.push(field);
                    }
                    "extensions" | "extend" => {
                        return Err(SchemaError::unsupported(Format::Protobuf, "extensions"))
                    }
                    "group" => {
                        return Err(SchemaError::unsupported(Format::Protobuf, "proto2 groups"))
                    }
                    "required" => {
                        return Err(SchemaError::unsupported(
                            Format::Protobuf,
                            "proto2 `required` fields",
                        ))
                    }
                    _ => {
                        let field = self.field(true)?;
                        structure.fields.push(field);
                    }
                },
                _ => return Err(self.error(format!("unexpected {} in message", self.describe()))),
            }
        }

        let mut def = TypeDef::structure(ir_name, Vec::new());
        def.kind = TypeKind::Structure(structure);
        def.documentation = doc;
        def.annotations = annotations;
        self.slots[slot] = Some(def);
        Ok(())
    }

    /// A field declaration. Labels are only allowed outside oneofs.
    fn field(&mut self, labels: bool) -> Result<FieldDef, SchemaError> {
        let doc = self.doc();
        let mut repeated = false;
        let mut optional = false;
        if labels {
            if self.is_keyword("repeated") {
                repeated = true;
                self.pos += 1;
            } else if self.is_keyword("optional") {
                optional = true;
                self.pos += 1;
            }
        }

        let mut field = if self.is_keyword("map") && self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::Symbol('<')) {
            self.pos += 2;
            let key = self.expect_ident()?;
            let key = scalar(&key).ok_or_else(|| self.error(format!("invalid map key type `{key}`")))?;
            self.expect_symbol(',')?;
            let values = self.type_name()?;
            self.expect_symbol('>')?;
            let name = self.expect_ident()?;
            FieldDef::map(name, key, values)
        } else {
            let ty = self.type_name()?;
            let name = self.expect_ident()?;
            if repeated {
                FieldDef::repeated(name, ty)
            } else {
                FieldDef::new(name, ty)
            }
        };

        self.expect_symbol('=')?;
        let number = self.expect_int()?;
        let number = u32::try_from(number).map_err(|_| self.error(format!("field number {number} is out of range")))?;
        field.field_number = Some(number);
        field.annotations = self.field_options()?;
        self.expect_symbol(';')?;

        field.required = !optional;
        field.documentation = doc;
        Ok(field)
    }

    /// A type name; scalars map to primitives, anything else is held as an
    /// unresolved dotted name until the file is read.
    fn type_name(&mut self) -> Result<TypeRef, SchemaError> {
        let name = self.dotted_name()?;
        Ok(match scalar(&name) {
            Some(p) => TypeRef::Primitive(p),
            None => TypeRef::Named(name),
        })
    }

    fn oneof(&mut self) -> Result<FieldDef, SchemaError> {
        let doc = self.doc();
        self.pos += 1;
        let name = self.expect_ident()?;
        self.expect_symbol('{')?;
        let mut options = Vec::new();
        let mut annotations = Annotations::new();
        while !self.eat_symbol('}') {
            if self.eat_symbol(';') {
                continue;
            }
            if self.is_keyword("option") {
                self.pos += 1;
                let (name, value) = self.option_assignment()?;
                self.expect_symbol(';')?;
                annotations.insert(name, value);
                continue;
            }
            if self.peek().is_none() {
                return Err(self.error("unterminated oneof"));
            }
            options.push(self.field(false)?);
        }
        let mut field = FieldDef::oneof(name, options);
        field.documentation = doc;
        field.annotations = annotations;
        Ok(field)
    }

    fn reserved(
        &mut self,
        ranges: &mut Vec<ReservedRange>,
        names: &mut Vec<String>,
        max: u32,
    ) -> Result<(), SchemaError> {
        if matches!(self.peek(), Some(TokenKind::Str(_))) {
            loop {
                names.push(self.expect_str()?);
                if !self.eat_symbol(',') {
                    break;
                }
            }
            return self.expect_symbol(';');
        }
        loop {
            let start = self.reserved_number()?;
            let end = if self.is_keyword("to") {
                self.pos += 1;
                if self.is_keyword("max") {
                    self.pos += 1;
                    max
                } else {
                    self.reserved_number()?
                }
            } else {
                start
            };
            ranges.push(ReservedRange::new(start, end));
            if !self.eat_symbol(',') {
                break;
            }
        }
        self.expect_symbol(';')
    }

    fn reserved_number(&mut self) -> Result<u32, SchemaError> {
        if self.is_symbol('-') {
            return Err(SchemaError::unsupported(Format::Protobuf, "negative reserved numbers"));
        }
        let n = self.expect_int()?;
        u32::try_from(n).map_err(|_| self.error(format!("reserved number {n} is out of range")))
    }

    fn enumeration(&mut self, scope: &[String]) -> Result<(), SchemaError> {
        let doc = self.doc();
        self.pos += 1;
        let name = self.expect_ident()?;
        let (slot, ir_name) = self.register(scope, &name)?;

        let mut enumeration = Enumeration::default();
        let mut annotations = Annotations::new();
        self.expect_symbol('{')?;
        while !self.eat_symbol('}') {
            if self.eat_symbol(';') {
                continue;
            }
            if self.is_keyword("option") {
                self.pos += 1;
                let (name, value) = self.option_assignment()?;
                self.expect_symbol(';')?;
                annotations.insert(name, value);
                continue;
            }
            if self.is_keyword("reserved") {
                self.pos += 1;
                self.reserved(
                    &mut enumeration.reserved,
                    &mut enumeration.reserved_names,
                    i32::MAX as u32,
                )?;
                continue;
            }
            if self.peek().is_none() {
                return Err(self.error("unterminated enum"));
            }

            let value_doc = self.doc();
            let value_name = self.expect_ident()?;
            self.expect_symbol('=')?;
            let negative = self.eat_symbol('-');
            let magnitude = self.expect_int()?;
            let ordinal = i64::try_from(magnitude)
                .ok()
                .map(|m| if negative { -m } else { m })
                .and_then(|o| i32::try_from(o).ok())
                .ok_or_else(|| self.error(format!("enum value {magnitude} is out of range")))?;
            let annotations = self.field_options()?;
            self.expect_symbol(';')?;

            let mut value = EnumValue::new(value_name, ordinal);
            value.documentation = value_doc;
            value.annotations = annotations;
            enumeration.values.push(value);
        }

        let mut def = TypeDef::enumeration(ir_name, Vec::new());
        def.kind = TypeKind::Enumeration(enumeration);
        def.documentation = doc;
        def.annotations = annotations;
        self.slots[slot] = Some(def);
        Ok(())
    }
}

/// Post-parse resolution of dotted type names to IR names.
struct Resolve<'a> {
    package: Option<&'a str>,
    names: &'a HashMap<String, String>,
    /// IR name -> is a message.
    kinds: &'a HashMap<String, bool>,
}

impl Resolve<'_> {
    fn field(&self, field: &mut FieldDef, scope: &[String], path: &str, top_level: bool) -> Result<(), SchemaError> {
        let is_scalar = matches!(field.shape, FieldShape::Scalar { .. });
        match &mut field.shape {
            FieldShape::Oneof { options } => {
                for option in options {
                    let option_path = format!("{}/{}", path, option.name);
                    self.field(option, scope, &option_path, false)?;
                }
                return Ok(());
            }
            FieldShape::Scalar { ty } | FieldShape::Repeated { items: ty } | FieldShape::Map { values: ty, .. } => {
                let TypeRef::Named(raw) = ty else {
                    return Ok(());
                };
                if raw.trim_start_matches('.') == TIMESTAMP {
                    *ty = TypeRef::Primitive(Primitive::Long);
                    field.logical_type = Some(LogicalType::TimestampMillis);
                    if is_scalar && top_level {
                        field.required = false;
                    }
                    return Ok(());
                }
                let ir_name = self.lookup(raw, scope).ok_or_else(|| SchemaError::UnknownTypeReference {
                    name: raw.clone(),
                    path: path.to_string(),
                })?;
                // Singular message fields always track presence.
                if is_scalar && top_level && self.kinds.get(&ir_name).copied().unwrap_or(false) {
                    field.required = false;
                }
                *ty = TypeRef::Named(ir_name);
            }
        }
        Ok(())
    }

    /// Innermost-scope-first lookup of a (possibly package-qualified) name.
    fn lookup(&self, raw: &str, scope: &[String]) -> Option<String> {
        if let Some(absolute) = raw.strip_prefix('.') {
            let relative = match self.package {
                Some(package) => absolute.strip_prefix(package)?.strip_prefix('.')?,
                None => absolute,
            };
            return self.names.get(relative).cloned();
        }

        for depth in (0..=scope.len()).rev() {
            let mut candidate = scope[..depth].join(".");
            if !candidate.is_empty() {
                candidate.push('.');
            }
            candidate.push_str(raw);
            if let Some(name) = self.names.get(&candidate) {
                return Some(name.clone());
            }
        }
        let package = self.package?;
        let relative = raw.strip_prefix(package)?.strip_prefix('.')?;
        self.names.get(relative).cloned()
    }
}

/// Render an IR tree as proto3 text.
///
/// Messages and enums are written in schema order; anonymous inline
/// definitions become nested types named after their field.
///
/// # Errors
///
/// `Validation` for missing or invalid field numbers and enum-zero
/// violations, resolver errors for dangling references, and
/// `Serialization` for IR constructs proto3 cannot express.
pub fn render(schema: &Schema) -> Result<String, SchemaError> {
    validator::validate_common(schema)?;
    validator::validate_protobuf(schema)?;
    resolver::check(schema)?;

    let mut writer = Writer {
        schema,
        out: String::new(),
        tracker: DefinitionTracker::new(ForwardReferences::Allowed),
    };
    writer.header();
    for def in &schema.types {
        let path = format!("/{}", def.name);
        writer.tracker.define(&def.name, &path)?;
        writer.out.push('\n');
        writer.definition(def, &def.name, 0, &path)?;
    }
    let Writer { out, tracker, .. } = writer;
    tracker.finish()?;

    debug!(types = schema.types.len(), bytes = out.len(), "rendered Protobuf schema");
    Ok(out)
}

struct Writer<'s> {
    schema: &'s Schema,
    out: String,
    tracker: DefinitionTracker,
}

impl Writer<'_> {
    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn comment(&mut self, depth: usize, doc: Option<&str>) {
        let Some(doc) = doc else {
            return;
        };
        for line in doc.lines() {
            if line.is_empty() {
                self.line(depth, "//");
            } else {
                self.line(depth, &format!("// {line}"));
            }
        }
    }

    fn header(&mut self) {
        self.line(0, "syntax = \"proto3\";");
        if let Some(package) = &self.schema.namespace {
            self.out.push('\n');
            self.line(0, &format!("package {package};"));
        }
        if uses_timestamp(self.schema) {
            self.out.push('\n');
            self.line(0, &format!("import \"{TIMESTAMP_IMPORT}\";"));
        }
        let options: Vec<String> = self
            .schema
            .annotations
            .iter()
            .filter(|(k, _)| KNOWN_FILE_OPTIONS.contains(&k.as_str()) || k.starts_with('('))
            .map(|(k, v)| format!("option {k} = {};", constant(v)))
            .collect();
        if !options.is_empty() {
            self.out.push('\n');
            for option in options {
                self.line(0, &option);
            }
        }
    }

    fn definition(&mut self, def: &TypeDef, name: &str, depth: usize, path: &str) -> Result<(), SchemaError> {
        match &def.kind {
            TypeKind::Structure(structure) => {
                self.comment(depth, def.documentation.as_deref());
                self.line(depth, &format!("message {name} {{"));
                for option in statement_options(&def.annotations) {
                    self.line(depth + 1, &option);
                }
                if let Some(reserved) = reserved_numbers(&structure.reserved, MAX_FIELD_NUMBER) {
                    self.line(depth + 1, &reserved);
                }
                if let Some(reserved) = reserved_names(&structure.reserved_names) {
                    self.line(depth + 1, &reserved);
                }

                let mut nested: Vec<(String, &TypeDef, String)> = Vec::new();
                for field in &structure.fields {
                    let field_path = format!("{}/{}", path, field.name);
                    self.field(field, depth + 1, &field_path, &mut nested)?;
                }
                for (nested_name, nested_def, nested_path) in nested {
                    self.definition(nested_def, &nested_name, depth + 1, &nested_path)?;
                }
                self.line(depth, "}");
            }
            TypeKind::Enumeration(enumeration) => {
                self.comment(depth, def.documentation.as_deref());
                self.line(depth, &format!("enum {name} {{"));
                for option in statement_options(&def.annotations) {
                    self.line(depth + 1, &option);
                }
                if let Some(reserved) = reserved_numbers(&enumeration.reserved, i32::MAX as u32) {
                    self.line(depth + 1, &reserved);
                }
                if let Some(reserved) = reserved_names(&enumeration.reserved_names) {
                    self.line(depth + 1, &reserved);
                }
                let zero = enumeration.values.iter().filter(|v| v.ordinal == 0);
                let rest = enumeration.values.iter().filter(|v| v.ordinal != 0);
                for value in zero.chain(rest) {
                    self.comment(depth + 1, value.documentation.as_deref());
                    self.line(
                        depth + 1,
                        &format!("{} = {}{};", value.name, value.ordinal, field_options(&value.annotations)),
                    );
                }
                self.line(depth, "}");
            }
            // Fixed types are written as `bytes` wherever they are used.
            TypeKind::Fixed(_) => {}
            TypeKind::Opaque(_) => {
                return Err(SchemaError::serialization(
                    Format::Protobuf,
                    path,
                    "opaque definitions have no Protobuf form",
                ))
            }
        }
        Ok(())
    }

    fn field<'d>(
        &mut self,
        field: &'d FieldDef,
        depth: usize,
        path: &str,
        nested: &mut Vec<(String, &'d TypeDef, String)>,
    ) -> Result<(), SchemaError> {
        self.comment(depth, field.documentation.as_deref());
        let number = field.field_number.unwrap_or_default();
        let options = field_options(&field.annotations);
        match &field.shape {
            FieldShape::Scalar { ty } => {
                let (type_name, is_message) = self.type_name(ty, field, path, nested)?;
                let label = if !field.required && !is_message { "optional " } else { "" };
                self.line(depth, &format!("{label}{type_name} {} = {number}{options};", field.name));
            }
            FieldShape::Repeated { items } => {
                let (type_name, _) = self.type_name(items, field, path, nested)?;
                self.line(depth, &format!("repeated {type_name} {} = {number}{options};", field.name));
            }
            FieldShape::Map { key, values } => {
                let key = scalar_name(*key)
                    .ok_or_else(|| SchemaError::serialization(Format::Protobuf, path, "null map key"))?;
                let (type_name, _) = self.type_name(values, field, path, nested)?;
                self.line(
                    depth,
                    &format!("map<{key}, {type_name}> {} = {number}{options};", field.name),
                );
            }
            FieldShape::Oneof { options: members } => {
                self.line(depth, &format!("oneof {} {{", field.name));
                for (name, value) in &field.annotations {
                    if KNOWN_OPTIONS.contains(&name.as_str()) || name.starts_with('(') {
                        self.line(depth + 1, &format!("option {name} = {};", constant(value)));
                    }
                }
                for member in members {
                    let member_path = format!("{}/{}", path, member.name);
                    let Some(ty) = member.type_ref() else {
                        return Err(SchemaError::serialization(Format::Protobuf, member_path, "nested oneof"));
                    };
                    self.comment(depth + 1, member.documentation.as_deref());
                    let (type_name, _) = self.type_name(ty, member, &member_path, nested)?;
                    self.line(
                        depth + 1,
                        &format!(
                            "{type_name} {} = {}{};",
                            member.name,
                            member.field_number.unwrap_or_default(),
                            field_options(&member.annotations)
                        ),
                    );
                }
                self.line(depth, "}");
            }
        }
        Ok(())
    }

    /// Proto type name for a field's type, and whether it is a message.
    fn type_name<'d>(
        &mut self,
        ty: &'d TypeRef,
        field: &FieldDef,
        path: &str,
        nested: &mut Vec<(String, &'d TypeDef, String)>,
    ) -> Result<(String, bool), SchemaError> {
        match ty {
            TypeRef::Primitive(p) => {
                if field.logical_type.is_some_and(|l| l.is_timestamp()) {
                    return Ok((TIMESTAMP.to_string(), true));
                }
                let name = scalar_name(*p).ok_or_else(|| {
                    SchemaError::serialization(Format::Protobuf, path, "proto3 has no null type")
                })?;
                Ok((name.to_string(), false))
            }
            TypeRef::Named(name) => {
                self.tracker.refer(name, path);
                match self.schema.get(name).map(|d| &d.kind) {
                    Some(TypeKind::Fixed(_)) => Ok(("bytes".to_string(), false)),
                    Some(TypeKind::Structure(_)) => Ok((name.clone(), true)),
                    Some(TypeKind::Opaque(_)) => Err(SchemaError::serialization(
                        Format::Protobuf,
                        path,
                        format!("`{name}` is an opaque definition"),
                    )),
                    _ => Ok((name.clone(), false)),
                }
            }
            TypeRef::Inline(def) => match &def.kind {
                TypeKind::Fixed(_) => Ok(("bytes".to_string(), false)),
                TypeKind::Opaque(_) => Err(SchemaError::serialization(
                    Format::Protobuf,
                    path,
                    "opaque definitions have no Protobuf form",
                )),
                kind => {
                    // Nested names shadow top-level ones inside the message.
                    let mut name = pascal_case(&field.name);
                    while self.schema.contains(&name) || nested.iter().any(|(n, _, _)| *n == name) {
                        name.push('_');
                    }
                    nested.push((name.clone(), def.as_ref(), path.to_string()));
                    Ok((name, matches!(kind, TypeKind::Structure(_))))
                }
            },
            TypeRef::External(reference) => Err(SchemaError::serialization(
                Format::Protobuf,
                path,
                format!("external reference `{reference}` cannot be expressed in Protobuf"),
            )),
            TypeRef::Any => Err(SchemaError::serialization(
                Format::Protobuf,
                path,
                "untyped value cannot be expressed in Protobuf",
            )),
        }
    }
}

fn uses_timestamp(schema: &Schema) -> bool {
    let mut found = false;
    schema.visit(|_, node| {
        if let Node::Field(field) = node {
            if field.logical_type.is_some_and(|l| l.is_timestamp())
                && field.type_ref().is_some_and(|t| t.as_primitive().is_some())
            {
                found = true;
            }
        }
    });
    found
}

fn constant(value: &Value) -> String {
    match value {
        Value::String(s) if is_enum_constant(s) => s.clone(),
        Value::String(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}

/// Enum-valued option constants (`optimize_for = SPEED`) are bare identifiers.
fn is_enum_constant(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && s.starts_with(|c: char| c.is_ascii_uppercase())
}

fn statement_options(annotations: &Annotations) -> Vec<String> {
    annotations
        .iter()
        .filter(|(k, _)| KNOWN_OPTIONS.contains(&k.as_str()) || k.starts_with('('))
        .map(|(k, v)| format!("option {k} = {};", constant(v)))
        .collect()
}

fn field_options(annotations: &Annotations) -> String {
    let options: Vec<String> = annotations
        .iter()
        .filter(|(k, _)| KNOWN_OPTIONS.contains(&k.as_str()) || k.starts_with('('))
        .map(|(k, v)| format!("{k} = {}", constant(v)))
        .collect();
    if options.is_empty() {
        String::new()
    } else {
        format!(" [{}]", options.join(", "))
    }
}

fn reserved_numbers(ranges: &[ReservedRange], max: u32) -> Option<String> {
    if ranges.is_empty() {
        return None;
    }
    let parts: Vec<String> = ranges
        .iter()
        .map(|r| match (r.start, r.end) {
            (s, e) if s == e => s.to_string(),
            (s, e) if e == max => format!("{s} to max"),
            (s, e) => format!("{s} to {e}"),
        })
        .collect();
    Some(format!("reserved {};", parts.join(", ")))
}

fn reserved_names(names: &[String]) -> Option<String> {
    if names.is_empty() {
        return None;
    }
    let quoted: Vec<String> = names.iter().map(|n| format!("{n:?}")).collect();
    Some(format!("reserved {};", quoted.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationKind;

    const PERSON: &str = r#"
syntax = "proto3";

package com.example;

import "google/protobuf/timestamp.proto";

option java_package = "com.example.proto";

// A person.
message Person {
  reserved 8, 10 to 12;
  reserved "legacy";

  string name = 1;
  optional string middle_name = 2;
  Address home = 3;
  repeated string tags = 4 [packed = true];
  map<string, int64> counters = 5;
  oneof contact {
    string email = 6;
    string phone = 7;
  }
  google.protobuf.Timestamp created = 9;
  Status status = 13;

  message Address {
    string street = 1;
  }
}

enum Status {
  STATUS_UNSPECIFIED = 0;
  STATUS_ACTIVE = 1;
}

service People {
  rpc Get (Person) returns (Person);
}
"#;

    // === Parse Tests ===

    #[test]
    fn parses_messages_enums_and_package() {
        let schema = parse(PERSON).unwrap();
        assert_eq!(schema.namespace.as_deref(), Some("com.example"));
        assert_eq!(schema.annotations["java_package"], "com.example.proto");

        let names: Vec<&str> = schema.types.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Person", "Person_Address", "Status"]);

        let person = schema.get("Person").unwrap();
        assert_eq!(person.documentation.as_deref(), Some("A person."));
        let structure = person.as_structure().unwrap();
        assert_eq!(structure.reserved, vec![ReservedRange::single(8), ReservedRange::new(10, 12)]);
        assert_eq!(structure.reserved_names, vec!["legacy"]);
    }

    #[test]
    fn field_presence_and_types() {
        let schema = parse(PERSON).unwrap();
        let person = schema.get("Person").unwrap().as_structure().unwrap();

        let name = person.field("name").unwrap();
        assert!(name.required);
        assert_eq!(name.field_number, Some(1));

        assert!(!person.field("middle_name").unwrap().required);

        let home = person.field("home").unwrap();
        assert!(!home.required);
        assert_eq!(home.type_ref(), Some(&TypeRef::named("Person_Address")));

        let tags = person.field("tags").unwrap();
        assert!(matches!(tags.shape, FieldShape::Repeated { .. }));
        assert_eq!(tags.annotations["packed"], true);

        let created = person.field("created").unwrap();
        assert_eq!(created.type_ref(), Some(&TypeRef::Primitive(Primitive::Long)));
        assert_eq!(created.logical_type, Some(LogicalType::TimestampMillis));

        let status = person.field("status").unwrap();
        assert!(status.required);
        assert_eq!(status.type_ref(), Some(&TypeRef::named("Status")));

        let contact = person.field("contact").unwrap();
        assert!(contact.is_oneof());
        assert_eq!(person.numbered_fields().len(), 9);
    }

    #[test]
    fn missing_syntax_is_proto2() {
        let result = parse("message A { int32 a = 1; }");
        assert!(matches!(
            result,
            Err(SchemaError::Unsupported { feature, .. }) if feature.contains("proto2")
        ));
        let result = parse("syntax = \"proto2\";\nmessage A { optional int32 a = 1; }");
        assert!(matches!(result, Err(SchemaError::Unsupported { .. })));
    }

    #[test]
    fn proto2_constructs_rejected() {
        let result = parse("syntax = \"proto3\"; message A { required int32 a = 1; }");
        assert!(matches!(result, Err(SchemaError::Unsupported { .. })));
    }

    #[test]
    fn unknown_type_reference() {
        let result = parse("syntax = \"proto3\"; message A { Missing m = 1; }");
        assert!(matches!(
            result,
            Err(SchemaError::UnknownTypeReference { name, .. }) if name == "Missing"
        ));
    }

    #[test]
    fn forward_references_resolve() {
        let schema = parse("syntax = \"proto3\"; package p; message A { .p.B b = 1; } message B {}").unwrap();
        let a = schema.get("A").unwrap().as_structure().unwrap();
        assert_eq!(a.fields[0].type_ref(), Some(&TypeRef::named("B")));
    }

    #[test]
    fn enum_zero_rule_enforced_on_parse() {
        let result = parse("syntax = \"proto3\"; enum S { PENDING = 1; }");
        assert!(matches!(
            result,
            Err(SchemaError::Validation {
                kind: ValidationKind::EnumZeroOrdinal { .. },
                ..
            })
        ));
    }

    #[test]
    fn malformed_input_reports_line() {
        let result = parse("syntax = \"proto3\";\nmessage A {\n  int32 a 1;\n}");
        assert!(matches!(
            result,
            Err(SchemaError::Parse { location, .. }) if location == "line 3"
        ));
    }

    // === Render Tests ===

    #[test]
    fn renders_header_and_messages() {
        let schema = parse(PERSON).unwrap();
        let text = render(&schema).unwrap();
        assert!(text.starts_with("syntax = \"proto3\";\n"));
        assert!(text.contains("package com.example;"));
        assert!(text.contains("import \"google/protobuf/timestamp.proto\";"));
        assert!(text.contains("option java_package = \"com.example.proto\";"));
        assert!(text.contains("// A person.\nmessage Person {"));
        assert!(text.contains("  reserved 8, 10 to 12;"));
        assert!(text.contains("  reserved \"legacy\";"));
        assert!(text.contains("  optional string middle_name = 2;"));
        assert!(text.contains("  Person_Address home = 3;"));
        assert!(text.contains("  repeated string tags = 4 [packed = true];"));
        assert!(text.contains("  map<string, int64> counters = 5;"));
        assert!(text.contains("  oneof contact {\n    string email = 6;"));
        assert!(text.contains("  google.protobuf.Timestamp created = 9;"));
        assert!(!text.contains("service"));
    }

    #[test]
    fn second_pass_is_stable() {
        let first = parse(PERSON).unwrap();
        let second = parse(&render(&first).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_value_written_first() {
        let schema = Schema::new().with_type(TypeDef::enumeration(
            "Status",
            vec![EnumValue::new("ACTIVE", 1), EnumValue::new("UNKNOWN", 0)],
        ));
        let text = render(&schema).unwrap();
        let unknown = text.find("UNKNOWN = 0;").unwrap();
        let active = text.find("ACTIVE = 1;").unwrap();
        assert!(unknown < active);
    }

    #[test]
    fn missing_field_number_fails() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "A",
            vec![FieldDef::new("a", Primitive::String)],
        ));
        assert!(matches!(
            render(&schema),
            Err(SchemaError::Validation {
                kind: ValidationKind::MissingFieldNumber { .. },
                ..
            })
        ));
    }

    #[test]
    fn inline_types_become_nested() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "Order",
            vec![FieldDef::new(
                "status",
                TypeRef::inline(TypeDef::enumeration_of("", ["OPEN", "CLOSED"])),
            )
            .number(1)],
        ));
        let text = render(&schema).unwrap();
        assert!(text.contains("  Status status = 1;"));
        assert!(text.contains("  enum Status {\n    OPEN = 0;\n    CLOSED = 1;\n  }"));
    }

    #[test]
    fn fixed_renders_as_bytes() {
        let schema = Schema::new()
            .with_type(TypeDef::structure(
                "Blob",
                vec![FieldDef::new("hash", TypeRef::named("Sha")).number(1)],
            ))
            .with_type(TypeDef::fixed("Sha", 32));
        let text = render(&schema).unwrap();
        assert!(text.contains("bytes hash = 1;"));
        assert!(!text.contains("Sha"));
    }
}
