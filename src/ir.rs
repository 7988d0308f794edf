//! USDL intermediate representation.
//!
//! Every codec reads and writes this tree. A [`Schema`] owns an ordered list
//! of named [`TypeDef`]s; structures own [`FieldDef`]s whose types are
//! primitives, by-name references, or anonymous inline definitions.
//!
//! The tree reifies to a directive-keyed JSON object (`%types`, `%kind`,
//! `%fields`, ...) so transformation scripts can inspect and build it as an
//! ordinary mapping:
//!
//! ```
//! use usdl::{FieldDef, Primitive, Schema, TypeDef};
//!
//! let schema = Schema::new()
//!     .with_namespace("com.example")
//!     .with_type(TypeDef::structure(
//!         "Person",
//!         vec![
//!             FieldDef::new("name", Primitive::String),
//!             FieldDef::new("middleName", Primitive::String).optional(),
//!         ],
//!     ));
//!
//! let tree = serde_json::to_value(&schema).unwrap();
//! assert_eq!(tree["%types"]["Person"]["%kind"], "structure");
//! assert_eq!(tree["%types"]["Person"]["%fields"][1]["%required"], false);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keywords a codec carries through verbatim without modelling them.
pub type Annotations = Map<String, Value>;

/// Highest field number Protobuf accepts (2^29 - 1).
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;

/// Field numbers reserved by the Protocol Buffers implementation.
pub const IMPLEMENTATION_RESERVED: std::ops::RangeInclusive<u32> = 19_000..=19_999;

/// Top-level schema container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "%namespace", default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(rename = "%title", default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(rename = "%documentation", default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,

    /// Schema-level keywords and file options.
    #[serde(rename = "%annotations", default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Annotations,

    /// Named types in insertion order.
    #[serde(rename = "%types", default, with = "types_map")]
    pub types: Vec<TypeDef>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the schema documentation.
    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    /// Append a named type.
    pub fn with_type(mut self, def: TypeDef) -> Self {
        self.types.push(def);
        self
    }

    /// Look up a type by its IR name.
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Returns true if a type with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Qualified name used for by-name references (`namespace.TypeName`).
    ///
    /// Names that already contain a dot are treated as fully qualified.
    pub fn qualified_name(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() && !name.contains('.') => format!("{ns}.{name}"),
            _ => name.to_string(),
        }
    }

    /// Map a possibly-qualified reference back to an IR type name.
    pub fn local_name<'n>(&self, reference: &'n str) -> &'n str {
        let reference = reference.trim_start_matches('.');
        if let Some(ns) = &self.namespace {
            if let Some(rest) = reference.strip_prefix(ns.as_str()) {
                if let Some(local) = rest.strip_prefix('.') {
                    return local;
                }
            }
        }
        reference
    }

    /// Pre-order traversal over every type and field, including oneof
    /// options and anonymous inline definitions.
    ///
    /// The callback receives a slash-separated path (`/Person/address`)
    /// alongside each node.
    pub fn visit<'a, F>(&'a self, mut f: F)
    where
        F: FnMut(&str, Node<'a>),
    {
        for def in &self.types {
            visit_type(def, &format!("/{}", def.name), &mut f);
        }
    }
}

/// A node yielded by [`Schema::visit`].
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Type(&'a TypeDef),
    Field(&'a FieldDef),
}

fn visit_type<'a, F>(def: &'a TypeDef, path: &str, f: &mut F)
where
    F: FnMut(&str, Node<'a>),
{
    f(path, Node::Type(def));
    if let TypeKind::Structure(structure) = &def.kind {
        for field in &structure.fields {
            visit_field(field, &format!("{}/{}", path, field.name), f);
        }
    }
}

fn visit_field<'a, F>(field: &'a FieldDef, path: &str, f: &mut F)
where
    F: FnMut(&str, Node<'a>),
{
    f(path, Node::Field(field));
    match &field.shape {
        FieldShape::Oneof { options } => {
            for option in options {
                visit_field(option, &format!("{}/{}", path, option.name), f);
            }
        }
        shape => {
            if let Some(TypeRef::Inline(def)) = shape.type_ref() {
                visit_type(def, path, f);
            }
        }
    }
}

/// A named (or, when inline, anonymous) type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// IR name; empty for anonymous inline definitions. Reified as the
    /// key of the `%types` map rather than as a field.
    #[serde(skip)]
    pub name: String,

    #[serde(flatten)]
    pub kind: TypeKind,

    #[serde(rename = "%documentation", default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,

    /// Former names, kept for schema evolution.
    #[serde(rename = "%aliases", default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(rename = "%annotations", default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Annotations,
}

impl TypeDef {
    fn with_kind(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            documentation: None,
            aliases: Vec::new(),
            annotations: Annotations::new(),
        }
    }

    /// Create a structure with the given fields.
    pub fn structure(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self::with_kind(
            name,
            TypeKind::Structure(Structure {
                fields,
                ..Structure::default()
            }),
        )
    }

    /// Create an enumeration with the given values.
    pub fn enumeration(name: impl Into<String>, values: Vec<EnumValue>) -> Self {
        Self::with_kind(
            name,
            TypeKind::Enumeration(Enumeration {
                values,
                ..Enumeration::default()
            }),
        )
    }

    /// Create an enumeration whose ordinals follow declaration order.
    pub fn enumeration_of<I, S>(name: impl Into<String>, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = symbols
            .into_iter()
            .enumerate()
            .map(|(i, s)| EnumValue::new(s, i as i32))
            .collect();
        Self::enumeration(name, values)
    }

    /// Create a fixed-width binary type.
    pub fn fixed(name: impl Into<String>, size: u32) -> Self {
        Self::with_kind(
            name,
            TypeKind::Fixed(Fixed {
                size,
                logical_type: None,
            }),
        )
    }

    /// Create a definition the IR carries verbatim.
    pub fn opaque(name: impl Into<String>, definition: Value) -> Self {
        Self::with_kind(name, TypeKind::Opaque(Opaque { definition }))
    }

    /// Set documentation.
    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    /// Set aliases.
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Add a verbatim annotation.
    pub fn with_annotation(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }

    /// Add reserved field-number ranges (structures and enumerations only).
    pub fn with_reserved(mut self, ranges: Vec<ReservedRange>) -> Self {
        match &mut self.kind {
            TypeKind::Structure(s) => s.reserved.extend(ranges),
            TypeKind::Enumeration(e) => e.reserved.extend(ranges),
            _ => {}
        }
        self
    }

    /// Add reserved names (structures and enumerations only).
    pub fn with_reserved_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names.into_iter().map(Into::into);
        match &mut self.kind {
            TypeKind::Structure(s) => s.reserved_names.extend(names),
            TypeKind::Enumeration(e) => e.reserved_names.extend(names),
            _ => {}
        }
        self
    }

    pub fn as_structure(&self) -> Option<&Structure> {
        match &self.kind {
            TypeKind::Structure(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_enumeration(&self) -> Option<&Enumeration> {
        match &self.kind {
            TypeKind::Enumeration(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_fixed(&self) -> Option<&Fixed> {
        match &self.kind {
            TypeKind::Fixed(f) => Some(f),
            _ => None,
        }
    }

    /// Directive name of this definition's kind (`structure`, ...).
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            TypeKind::Structure(_) => "structure",
            TypeKind::Enumeration(_) => "enumeration",
            TypeKind::Fixed(_) => "fixed",
            TypeKind::Opaque(_) => "opaque",
        }
    }
}

/// Closed set of type definition kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "%kind", rename_all = "lowercase")]
pub enum TypeKind {
    Structure(Structure),
    Enumeration(Enumeration),
    Fixed(Fixed),
    /// A definition kept verbatim because no IR kind models it.
    Opaque(Opaque),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    #[serde(rename = "%fields", default)]
    pub fields: Vec<FieldDef>,

    #[serde(rename = "%reserved", default, skip_serializing_if = "Vec::is_empty")]
    pub reserved: Vec<ReservedRange>,

    #[serde(rename = "%reservedNames", default, skip_serializing_if = "Vec::is_empty")]
    pub reserved_names: Vec<String>,
}

impl Structure {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields that own a wire number: plain fields and every oneof option.
    pub fn numbered_fields(&self) -> Vec<&FieldDef> {
        let mut out = Vec::new();
        for field in &self.fields {
            match &field.shape {
                FieldShape::Oneof { options } => out.extend(options.iter()),
                _ => out.push(field),
            }
        }
        out
    }

    /// Returns true if `number` falls in one of the reserved ranges.
    pub fn is_reserved(&self, number: u32) -> bool {
        self.reserved.iter().any(|r| r.contains(number))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enumeration {
    #[serde(rename = "%values", default)]
    pub values: Vec<EnumValue>,

    /// Symbol readers fall back to (Avro enum default).
    #[serde(rename = "%default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(rename = "%reserved", default, skip_serializing_if = "Vec::is_empty")]
    pub reserved: Vec<ReservedRange>,

    #[serde(rename = "%reservedNames", default, skip_serializing_if = "Vec::is_empty")]
    pub reserved_names: Vec<String>,
}

impl Enumeration {
    /// The lowest declared ordinal, if any values exist.
    pub fn lowest_ordinal(&self) -> Option<i32> {
        self.values.iter().map(|v| v.ordinal).min()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    #[serde(rename = "%name")]
    pub name: String,

    #[serde(rename = "%ordinal")]
    pub ordinal: i32,

    #[serde(rename = "%documentation", default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,

    #[serde(rename = "%annotations", default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Annotations,
}

impl EnumValue {
    pub fn new(name: impl Into<String>, ordinal: i32) -> Self {
        Self {
            name: name.into(),
            ordinal,
            documentation: None,
            annotations: Annotations::new(),
        }
    }

    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixed {
    #[serde(rename = "%size")]
    pub size: u32,

    #[serde(rename = "%logicalType", default, skip_serializing_if = "Option::is_none")]
    pub logical_type: Option<LogicalType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opaque {
    #[serde(rename = "%definition")]
    pub definition: Value,
}

/// Inclusive range of reserved field numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedRange {
    #[serde(rename = "%start")]
    pub start: u32,
    #[serde(rename = "%end")]
    pub end: u32,
}

impl ReservedRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn single(number: u32) -> Self {
        Self::new(number, number)
    }

    pub fn contains(&self, number: u32) -> bool {
        (self.start..=self.end).contains(&number)
    }
}

/// A field of a structure (or an option of a oneof).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "%name")]
    pub name: String,

    #[serde(flatten)]
    pub shape: FieldShape,

    #[serde(rename = "%required", default = "default_required")]
    pub required: bool,

    /// Refines the primitive element type (for repeated/map fields, the
    /// element or value type).
    #[serde(rename = "%logicalType", default, skip_serializing_if = "Option::is_none")]
    pub logical_type: Option<LogicalType>,

    #[serde(rename = "%fieldNumber", default, skip_serializing_if = "Option::is_none")]
    pub field_number: Option<u32>,

    #[serde(rename = "%default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(rename = "%aliases", default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(rename = "%documentation", default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,

    #[serde(rename = "%annotations", default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Annotations,
}

fn default_required() -> bool {
    true
}

impl FieldDef {
    fn with_shape(name: impl Into<String>, shape: FieldShape) -> Self {
        Self {
            name: name.into(),
            shape,
            required: true,
            logical_type: None,
            field_number: None,
            default: None,
            aliases: Vec::new(),
            documentation: None,
            annotations: Annotations::new(),
        }
    }

    /// A required single-valued field.
    pub fn new(name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        Self::with_shape(name, FieldShape::Scalar { ty: ty.into() })
    }

    /// A repeated field of `items`.
    pub fn repeated(name: impl Into<String>, items: impl Into<TypeRef>) -> Self {
        Self::with_shape(
            name,
            FieldShape::Repeated {
                items: items.into(),
            },
        )
    }

    /// A map field from `key` to `values`.
    pub fn map(name: impl Into<String>, key: Primitive, values: impl Into<TypeRef>) -> Self {
        Self::with_shape(
            name,
            FieldShape::Map {
                key,
                values: values.into(),
            },
        )
    }

    /// A oneof group; at most one option is set, so the group is optional.
    pub fn oneof(name: impl Into<String>, options: Vec<FieldDef>) -> Self {
        let mut field = Self::with_shape(name, FieldShape::Oneof { options });
        field.required = false;
        field
    }

    pub fn optional(self) -> Self {
        self.with_required(false)
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn number(mut self, number: u32) -> Self {
        self.field_number = Some(number);
        self
    }

    pub fn with_logical_type(mut self, logical_type: LogicalType) -> Self {
        self.logical_type = Some(logical_type);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }

    /// The single type this field refers to; `None` for oneof groups.
    pub fn type_ref(&self) -> Option<&TypeRef> {
        self.shape.type_ref()
    }

    pub fn is_oneof(&self) -> bool {
        matches!(self.shape, FieldShape::Oneof { .. })
    }
}

/// Cardinality of a field. A field is exactly one of scalar, repeated,
/// map or oneof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "%cardinality", rename_all = "lowercase")]
pub enum FieldShape {
    Scalar {
        #[serde(rename = "%type")]
        ty: TypeRef,
    },
    Repeated {
        #[serde(rename = "%type")]
        items: TypeRef,
    },
    Map {
        #[serde(rename = "%keyType")]
        key: Primitive,
        #[serde(rename = "%type")]
        values: TypeRef,
    },
    Oneof {
        #[serde(rename = "%options")]
        options: Vec<FieldDef>,
    },
}

impl FieldShape {
    pub fn type_ref(&self) -> Option<&TypeRef> {
        match self {
            FieldShape::Scalar { ty } => Some(ty),
            FieldShape::Repeated { items } => Some(items),
            FieldShape::Map { values, .. } => Some(values),
            FieldShape::Oneof { .. } => None,
        }
    }
}

/// The type a field holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeRef {
    #[serde(rename = "%primitive")]
    Primitive(Primitive),
    /// Reference to a type of the same schema by IR name.
    #[serde(rename = "%ref")]
    Named(String),
    /// Anonymous definition owned by the field.
    #[serde(rename = "%inline")]
    Inline(Box<TypeDef>),
    /// A reference outside the schema, kept as an opaque string.
    #[serde(rename = "%externalRef")]
    External(String),
    /// A value the IR places no type constraint on.
    #[serde(rename = "%any")]
    Any,
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn inline(def: TypeDef) -> Self {
        TypeRef::Inline(Box::new(def))
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self {
            TypeRef::Primitive(p) => Some(*p),
            _ => None,
        }
    }
}

impl From<Primitive> for TypeRef {
    fn from(p: Primitive) -> Self {
        TypeRef::Primitive(p)
    }
}

/// Primitive value types: Avro's eight plus the Protobuf integer encodings
/// that have no Avro counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
}

impl Primitive {
    pub const ALL: [Primitive; 16] = [
        Primitive::Null,
        Primitive::Boolean,
        Primitive::Int,
        Primitive::Long,
        Primitive::Float,
        Primitive::Double,
        Primitive::Bytes,
        Primitive::String,
        Primitive::UInt32,
        Primitive::UInt64,
        Primitive::SInt32,
        Primitive::SInt64,
        Primitive::Fixed32,
        Primitive::Fixed64,
        Primitive::SFixed32,
        Primitive::SFixed64,
    ];

    /// IR directive name.
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Null => "null",
            Primitive::Boolean => "boolean",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Bytes => "bytes",
            Primitive::String => "string",
            Primitive::UInt32 => "uint32",
            Primitive::UInt64 => "uint64",
            Primitive::SInt32 => "sint32",
            Primitive::SInt64 => "sint64",
            Primitive::Fixed32 => "fixed32",
            Primitive::Fixed64 => "fixed64",
            Primitive::SFixed32 => "sfixed32",
            Primitive::SFixed64 => "sfixed64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn is_integral(&self) -> bool {
        !matches!(
            self,
            Primitive::Null
                | Primitive::Boolean
                | Primitive::Float
                | Primitive::Double
                | Primitive::Bytes
                | Primitive::String
        )
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Semantic refinement of a primitive (or of a fixed type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "%name", rename_all = "kebab-case")]
pub enum LogicalType {
    Uuid,
    Date,
    TimeMillis,
    TimeMicros,
    TimestampMillis,
    TimestampMicros,
    LocalTimestampMillis,
    LocalTimestampMicros,
    Duration,
    Decimal {
        #[serde(rename = "%precision", default, skip_serializing_if = "Option::is_none")]
        precision: Option<u32>,
        #[serde(rename = "%scale", default, skip_serializing_if = "Option::is_none")]
        scale: Option<u32>,
    },
}

impl LogicalType {
    /// Avro `logicalType` name.
    pub fn name(&self) -> &'static str {
        match self {
            LogicalType::Uuid => "uuid",
            LogicalType::Date => "date",
            LogicalType::TimeMillis => "time-millis",
            LogicalType::TimeMicros => "time-micros",
            LogicalType::TimestampMillis => "timestamp-millis",
            LogicalType::TimestampMicros => "timestamp-micros",
            LogicalType::LocalTimestampMillis => "local-timestamp-millis",
            LogicalType::LocalTimestampMicros => "local-timestamp-micros",
            LogicalType::Duration => "duration",
            LogicalType::Decimal { .. } => "decimal",
        }
    }

    /// Look up a logical type by name. Decimal parameters come from the
    /// surrounding definition.
    pub fn from_name(name: &str, precision: Option<u32>, scale: Option<u32>) -> Option<Self> {
        let lt = match name {
            "uuid" => LogicalType::Uuid,
            "date" => LogicalType::Date,
            "time-millis" => LogicalType::TimeMillis,
            "time-micros" => LogicalType::TimeMicros,
            "timestamp-millis" => LogicalType::TimestampMillis,
            "timestamp-micros" => LogicalType::TimestampMicros,
            "local-timestamp-millis" => LogicalType::LocalTimestampMillis,
            "local-timestamp-micros" => LogicalType::LocalTimestampMicros,
            "duration" => LogicalType::Duration,
            "decimal" => LogicalType::Decimal { precision, scale },
            _ => return None,
        };
        Some(lt)
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(
            self,
            LogicalType::TimestampMillis | LogicalType::TimestampMicros
        )
    }
}

mod types_map {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};

    use super::TypeDef;

    pub fn serialize<S>(types: &[TypeDef], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(types.iter().map(|t| (&t.name, t)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<TypeDef>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TypesVisitor;

        impl<'de> Visitor<'de> for TypesVisitor {
            type Value = Vec<TypeDef>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of type names to definitions")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut types = Vec::new();
                while let Some((name, mut def)) = map.next_entry::<String, TypeDef>()? {
                    def.name = name;
                    types.push(def);
                }
                Ok(types)
            }
        }

        deserializer.deserialize_map(TypesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person_schema() -> Schema {
        Schema::new()
            .with_namespace("com.example")
            .with_type(TypeDef::structure(
                "Person",
                vec![
                    FieldDef::new("name", Primitive::String).number(1),
                    FieldDef::new("home", TypeRef::named("Address")).number(2),
                    FieldDef::oneof(
                        "contact",
                        vec![
                            FieldDef::new("email", Primitive::String).number(3),
                            FieldDef::new("phone", Primitive::String).number(4),
                        ],
                    ),
                ],
            ))
            .with_type(TypeDef::structure(
                "Address",
                vec![FieldDef::new("street", Primitive::String).number(1)],
            ))
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(person_schema(), person_schema());

        let mut other = person_schema();
        other.types[1].documentation = Some("changed".into());
        assert_ne!(person_schema(), other);
    }

    #[test]
    fn qualified_and_local_names() {
        let schema = person_schema();
        assert_eq!(schema.qualified_name("Address"), "com.example.Address");
        assert_eq!(schema.qualified_name("org.other.Thing"), "org.other.Thing");
        assert_eq!(schema.local_name("com.example.Address"), "Address");
        assert_eq!(schema.local_name(".com.example.Address"), "Address");
        assert_eq!(schema.local_name("org.other.Thing"), "org.other.Thing");

        let bare = Schema::new();
        assert_eq!(bare.qualified_name("Address"), "Address");
    }

    #[test]
    fn visit_is_pre_order_in_declaration_order() {
        let schema = person_schema();
        let mut paths = Vec::new();
        schema.visit(|path, node| {
            let tag = match node {
                Node::Type(_) => "type",
                Node::Field(_) => "field",
            };
            paths.push(format!("{tag} {path}"));
        });
        assert_eq!(
            paths,
            vec![
                "type /Person",
                "field /Person/name",
                "field /Person/home",
                "field /Person/contact",
                "field /Person/contact/email",
                "field /Person/contact/phone",
                "type /Address",
                "field /Address/street",
            ]
        );
    }

    #[test]
    fn visit_descends_into_inline_definitions() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "Order",
            vec![FieldDef::new(
                "status",
                TypeRef::inline(TypeDef::enumeration_of("", ["OPEN", "CLOSED"])),
            )],
        ));
        let mut kinds = Vec::new();
        schema.visit(|_, node| {
            if let Node::Type(def) = node {
                kinds.push(def.kind_name());
            }
        });
        assert_eq!(kinds, vec!["structure", "enumeration"]);
    }

    #[test]
    fn reifies_as_directive_tree() {
        let tree = serde_json::to_value(person_schema()).unwrap();
        assert_eq!(tree["%namespace"], "com.example");
        let person = &tree["%types"]["Person"];
        assert_eq!(person["%kind"], "structure");
        assert_eq!(person["%fields"][0]["%cardinality"], "scalar");
        assert_eq!(person["%fields"][0]["%type"], json!({"%primitive": "string"}));
        assert_eq!(person["%fields"][1]["%type"], json!({"%ref": "Address"}));
        assert_eq!(person["%fields"][2]["%cardinality"], "oneof");
        assert_eq!(person["%fields"][2]["%options"][1]["%fieldNumber"], 4);

        let keys: Vec<&String> = tree["%types"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["Person", "Address"]);
    }

    #[test]
    fn directive_tree_converts_back() {
        let tree = json!({
            "%namespace": "com.example",
            "%types": {
                "Status": {
                    "%kind": "enumeration",
                    "%values": [
                        { "%name": "UNKNOWN", "%ordinal": 0 },
                        { "%name": "ACTIVE", "%ordinal": 1 }
                    ]
                },
                "Hash": { "%kind": "fixed", "%size": 32 },
                "Account": {
                    "%kind": "structure",
                    "%fields": [
                        { "%name": "id", "%cardinality": "scalar",
                          "%type": { "%primitive": "string" },
                          "%logicalType": { "%name": "uuid" } },
                        { "%name": "balance", "%cardinality": "scalar",
                          "%type": { "%primitive": "bytes" },
                          "%logicalType": { "%name": "decimal", "%precision": 10, "%scale": 2 },
                          "%required": false },
                        { "%name": "tags", "%cardinality": "map", "%keyType": "string",
                          "%type": { "%primitive": "long" } }
                    ]
                }
            }
        });
        let schema: Schema = serde_json::from_value(tree).unwrap();
        assert_eq!(schema.types.len(), 3);
        assert_eq!(schema.types[0].name, "Status");
        assert_eq!(schema.types[1].as_fixed().unwrap().size, 32);

        let account = schema.get("Account").unwrap().as_structure().unwrap();
        assert_eq!(account.fields[0].logical_type, Some(LogicalType::Uuid));
        assert!(account.fields[0].required);
        assert!(!account.fields[1].required);
        assert_eq!(
            account.fields[1].logical_type,
            Some(LogicalType::Decimal {
                precision: Some(10),
                scale: Some(2)
            })
        );
        assert_eq!(
            account.fields[2].shape,
            FieldShape::Map {
                key: Primitive::String,
                values: Primitive::Long.into()
            }
        );
    }

    #[test]
    fn metadata_directives() {
        let schema = Schema::new()
            .with_title("Accounts")
            .with_documentation("Ledger types.")
            .with_type(
                TypeDef::structure(
                    "Account",
                    vec![FieldDef::new("owner", Primitive::String).with_aliases(["holder"])],
                )
                .with_aliases(["Acct"]),
            );
        let tree = serde_json::to_value(&schema).unwrap();
        assert_eq!(tree["%title"], "Accounts");
        assert_eq!(tree["%documentation"], "Ledger types.");
        assert_eq!(tree["%types"]["Account"]["%aliases"], json!(["Acct"]));
        assert_eq!(tree["%types"]["Account"]["%fields"][0]["%aliases"], json!(["holder"]));

        let back: Schema = serde_json::from_value(tree).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn numbered_fields_flatten_oneofs() {
        let schema = person_schema();
        let person = schema.get("Person").unwrap().as_structure().unwrap();
        let names: Vec<&str> = person
            .numbered_fields()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["name", "home", "email", "phone"]);
    }

    #[test]
    fn primitive_names_round_trip() {
        for p in Primitive::ALL {
            assert_eq!(Primitive::from_name(p.name()), Some(p));
        }
        assert_eq!(Primitive::from_name("integer"), None);
        assert!(Primitive::SFixed64.is_integral());
        assert!(!Primitive::Double.is_integral());
    }

    #[test]
    fn logical_type_lookup() {
        assert_eq!(
            LogicalType::from_name("timestamp-millis", None, None),
            Some(LogicalType::TimestampMillis)
        );
        assert_eq!(
            LogicalType::from_name("decimal", Some(4), None).map(|l| l.name()),
            Some("decimal")
        );
        assert_eq!(LogicalType::from_name("big-decimal", None, None), None);
    }
}
