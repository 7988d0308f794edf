//! Format constraint checks run by both the parse and the render paths.
//!
//! [`validate_common`] holds the invariants every IR tree must satisfy;
//! [`validate_avro`] and [`validate_protobuf`] add the rules of one target
//! format. All checks are eager: the first violation is returned.

use std::collections::{HashMap, HashSet};

use crate::error::{SchemaError, ValidationKind};
use crate::ir::{
    Enumeration, FieldDef, FieldShape, Fixed, LogicalType, Node, Primitive, Schema, Structure,
    TypeDef, TypeKind, TypeRef, IMPLEMENTATION_RESERVED, MAX_FIELD_NUMBER,
};
use crate::types::Format;

/// Returns true for `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Invariants shared by every format.
///
/// # Errors
///
/// Returns the first `SchemaError::Validation` found.
pub fn validate_common(schema: &Schema) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for def in &schema.types {
        if !seen.insert(def.name.as_str()) {
            return Err(SchemaError::validation(
                format!("/{}", def.name),
                ValidationKind::DuplicateTypeName {
                    name: def.name.clone(),
                },
            ));
        }
    }

    walk(schema, |path, node| match node {
        Node::Type(def) => check_definition(path, def),
        Node::Field(field) => check_field(path, field),
    })
}

/// Avro naming rules on top of [`validate_common`].
///
/// # Errors
///
/// Returns the first `SchemaError::Validation` found.
pub fn validate_avro(schema: &Schema) -> Result<(), SchemaError> {
    let invalid = |path: &str, name: &str| {
        SchemaError::validation(
            path,
            ValidationKind::InvalidName {
                name: name.to_string(),
                format: Format::Avro,
            },
        )
    };

    walk(schema, |path, node| {
        match node {
            Node::Type(def) => {
                // Anonymous inline definitions get a synthesized name.
                if !def.name.is_empty() && !def.name.split('.').all(is_identifier) {
                    return Err(invalid(path, &def.name));
                }
                if let TypeKind::Enumeration(e) = &def.kind {
                    if let Some(bad) = e.symbols().find(|s| !is_identifier(s)) {
                        return Err(invalid(path, bad));
                    }
                    if let Some(default) = &e.default {
                        if !e.symbols().any(|s| s == default) {
                            return Err(invalid(path, default));
                        }
                    }
                }
            }
            Node::Field(field) => {
                if !is_identifier(&field.name) {
                    return Err(invalid(path, &field.name));
                }
            }
        }
        Ok(())
    })
}

/// proto3 rules on top of [`validate_common`]: identifiers, field-number
/// range, reserved numbers and names, duplicates, map keys and the enum
/// zero-ordinal rule.
///
/// # Errors
///
/// Returns the first `SchemaError::Validation` found.
pub fn validate_protobuf(schema: &Schema) -> Result<(), SchemaError> {
    walk(schema, |path, node| match node {
        Node::Type(def) => {
            if !def.name.is_empty() && !is_identifier(&def.name) {
                return Err(SchemaError::validation(
                    path,
                    ValidationKind::InvalidName {
                        name: def.name.clone(),
                        format: Format::Protobuf,
                    },
                ));
            }
            match &def.kind {
                TypeKind::Structure(s) => check_message(path, display_name(def), s),
                TypeKind::Enumeration(e) => {
                    let allow_alias = def.annotations.get("allow_alias").and_then(|v| v.as_bool());
                    check_proto_enum(path, display_name(def), e, allow_alias == Some(true))
                }
                _ => Ok(()),
            }
        }
        Node::Field(field) => {
            if !is_identifier(&field.name) {
                return Err(SchemaError::validation(
                    path,
                    ValidationKind::InvalidName {
                        name: field.name.clone(),
                        format: Format::Protobuf,
                    },
                ));
            }
            if let FieldShape::Map { key, .. } = &field.shape {
                if !(key.is_integral() || matches!(key, Primitive::String | Primitive::Boolean)) {
                    return Err(SchemaError::validation(
                        path,
                        ValidationKind::InvalidMapKey {
                            key: key.to_string(),
                        },
                    ));
                }
            }
            Ok(())
        }
    })
}

/// Run `check` over every node, stopping at the first error.
fn walk<F>(schema: &Schema, mut check: F) -> Result<(), SchemaError>
where
    F: FnMut(&str, Node<'_>) -> Result<(), SchemaError>,
{
    let mut result = Ok(());
    schema.visit(|path, node| {
        if result.is_ok() {
            result = check(path, node);
        }
    });
    result
}

fn display_name(def: &TypeDef) -> &str {
    if def.name.is_empty() {
        "<inline>"
    } else {
        &def.name
    }
}

fn check_definition(path: &str, def: &TypeDef) -> Result<(), SchemaError> {
    match &def.kind {
        TypeKind::Structure(structure) => check_structure(path, structure),
        TypeKind::Enumeration(enumeration) => check_enumeration(path, def, enumeration),
        TypeKind::Fixed(fixed) => check_fixed(path, def, fixed),
        TypeKind::Opaque(_) => Ok(()),
    }
}

fn check_structure(path: &str, structure: &Structure) -> Result<(), SchemaError> {
    let mut names = HashSet::new();
    for field in &structure.fields {
        let members: Vec<&FieldDef> = match &field.shape {
            FieldShape::Oneof { options } => {
                std::iter::once(field).chain(options.iter()).collect()
            }
            _ => vec![field],
        };
        for member in members {
            if !names.insert(member.name.as_str()) {
                return Err(SchemaError::validation(
                    format!("{}/{}", path, member.name),
                    ValidationKind::DuplicateFieldName {
                        name: member.name.clone(),
                    },
                ));
            }
        }
    }
    Ok(())
}

fn check_enumeration(path: &str, def: &TypeDef, enumeration: &Enumeration) -> Result<(), SchemaError> {
    if enumeration.values.is_empty() {
        return Err(SchemaError::validation(
            path,
            ValidationKind::EmptyEnum {
                name: display_name(def).to_string(),
            },
        ));
    }
    let mut symbols = HashSet::new();
    for value in &enumeration.values {
        if !symbols.insert(value.name.as_str()) {
            return Err(SchemaError::validation(
                path,
                ValidationKind::DuplicateSymbol {
                    name: value.name.clone(),
                },
            ));
        }
    }
    Ok(())
}

fn check_fixed(path: &str, def: &TypeDef, fixed: &Fixed) -> Result<(), SchemaError> {
    if fixed.size == 0 {
        return Err(SchemaError::validation(
            path,
            ValidationKind::InvalidFixedSize {
                name: display_name(def).to_string(),
            },
        ));
    }
    let base = format!("fixed({})", fixed.size);
    match fixed.logical_type {
        None => Ok(()),
        Some(lt @ LogicalType::Decimal { precision, scale }) => {
            check_decimal(path, &base, precision, scale)?;
            // Largest precision a two's-complement value of `size` bytes holds.
            let max = ((8.0 * f64::from(fixed.size) - 1.0) * 2f64.log10()).floor() as u32;
            match precision {
                Some(p) if p > max => Err(invalid_logical(
                    path,
                    &lt,
                    &base,
                    format!("precision {p} exceeds {max} digits"),
                )),
                _ => Ok(()),
            }
        }
        Some(lt @ LogicalType::Duration) if fixed.size != 12 => {
            Err(invalid_logical(path, &lt, &base, "duration requires fixed(12)"))
        }
        Some(lt @ LogicalType::Uuid) if fixed.size != 16 => {
            Err(invalid_logical(path, &lt, &base, "uuid requires fixed(16)"))
        }
        Some(LogicalType::Duration) | Some(LogicalType::Uuid) => Ok(()),
        Some(lt) => Err(invalid_logical(path, &lt, &base, "not applicable to fixed types")),
    }
}

fn check_field(path: &str, field: &FieldDef) -> Result<(), SchemaError> {
    if let FieldShape::Oneof { options } = &field.shape {
        for option in options {
            if !matches!(option.shape, FieldShape::Scalar { .. }) {
                return Err(SchemaError::validation(
                    format!("{}/{}", path, option.name),
                    ValidationKind::InvalidOneofOption {
                        option: option.name.clone(),
                    },
                ));
            }
        }
    }

    let Some(logical) = field.logical_type else {
        return Ok(());
    };
    let Some(ty) = field.type_ref() else {
        return Err(invalid_logical(path, &logical, "oneof", "set it on an option instead"));
    };
    let Some(base) = ty.as_primitive() else {
        let base = match ty {
            TypeRef::Named(name) => name.clone(),
            _ => "non-primitive type".to_string(),
        };
        return Err(invalid_logical(
            path,
            &logical,
            &base,
            "logical types refine primitives; put it on the fixed definition",
        ));
    };

    let expected: &[Primitive] = match logical {
        LogicalType::Uuid => &[Primitive::String],
        LogicalType::Date | LogicalType::TimeMillis => &[Primitive::Int],
        LogicalType::TimeMicros
        | LogicalType::TimestampMillis
        | LogicalType::TimestampMicros
        | LogicalType::LocalTimestampMillis
        | LogicalType::LocalTimestampMicros => &[Primitive::Long],
        LogicalType::Decimal { precision, scale } => {
            check_decimal(path, base.name(), precision, scale)?;
            &[Primitive::Bytes]
        }
        LogicalType::Duration => &[],
    };
    if expected.contains(&base) {
        return Ok(());
    }
    let reason = match expected.first() {
        Some(p) => format!("requires `{p}`"),
        None => "requires a fixed(12) type".to_string(),
    };
    Err(invalid_logical(path, &logical, base.name(), reason))
}

fn check_decimal(
    path: &str,
    base: &str,
    precision: Option<u32>,
    scale: Option<u32>,
) -> Result<(), SchemaError> {
    let decimal = LogicalType::Decimal { precision, scale };
    let Some(precision) = precision else {
        return Err(invalid_logical(path, &decimal, base, "precision is required"));
    };
    if precision == 0 {
        return Err(invalid_logical(path, &decimal, base, "precision must be positive"));
    }
    if let Some(scale) = scale {
        if scale > precision {
            return Err(invalid_logical(
                path,
                &decimal,
                base,
                format!("scale {scale} exceeds precision {precision}"),
            ));
        }
    }
    Ok(())
}

fn invalid_logical(
    path: &str,
    logical: &LogicalType,
    base: &str,
    reason: impl Into<String>,
) -> SchemaError {
    SchemaError::validation(
        path,
        ValidationKind::InvalidLogicalType {
            logical_type: logical.name().to_string(),
            base: base.to_string(),
            reason: reason.into(),
        },
    )
}

fn check_message(path: &str, owner: &str, structure: &Structure) -> Result<(), SchemaError> {
    for range in &structure.reserved {
        check_reserved_range(path, range.start, range.end)?;
    }

    let mut numbers: HashMap<u32, &str> = HashMap::new();
    for field in structure.numbered_fields() {
        let field_path = format!("{}/{}", path, field.name);
        if structure.reserved_names.iter().any(|n| *n == field.name) {
            return Err(SchemaError::validation(
                field_path,
                ValidationKind::FieldNameReserved {
                    owner: owner.to_string(),
                    name: field.name.clone(),
                },
            ));
        }
        let Some(number) = field.field_number else {
            return Err(SchemaError::validation(
                field_path,
                ValidationKind::MissingFieldNumber {
                    field: field.name.clone(),
                },
            ));
        };
        check_field_number(&field_path, number)?;
        if structure.is_reserved(number) {
            return Err(SchemaError::validation(
                field_path,
                ValidationKind::FieldNumberReserved {
                    owner: owner.to_string(),
                    number,
                },
            ));
        }
        if let Some(first) = numbers.insert(number, field.name.as_str()) {
            return Err(SchemaError::validation(
                field_path,
                ValidationKind::DuplicateFieldNumber {
                    number,
                    first: first.to_string(),
                    second: field.name.clone(),
                },
            ));
        }
    }
    Ok(())
}

/// Range checks for a single Protobuf field number.
///
/// # Errors
///
/// `FieldNumberOutOfRange` outside `1..=536870911`,
/// `FieldNumberImplementationReserved` inside `19000..=19999`.
pub fn check_field_number(path: &str, number: u32) -> Result<(), SchemaError> {
    if number == 0 || number > MAX_FIELD_NUMBER {
        return Err(SchemaError::validation(
            path,
            ValidationKind::FieldNumberOutOfRange {
                number: i64::from(number),
            },
        ));
    }
    if IMPLEMENTATION_RESERVED.contains(&number) {
        return Err(SchemaError::validation(
            path,
            ValidationKind::FieldNumberImplementationReserved { number },
        ));
    }
    Ok(())
}

fn check_reserved_range(path: &str, start: u32, end: u32) -> Result<(), SchemaError> {
    if start == 0 || start > end || end > MAX_FIELD_NUMBER {
        return Err(SchemaError::validation(
            path,
            ValidationKind::InvalidReservedRange { start, end },
        ));
    }
    Ok(())
}

/// Ordinals may repeat only when the enum carries `option allow_alias = true;`.
fn check_proto_enum(
    path: &str,
    owner: &str,
    enumeration: &Enumeration,
    allow_alias: bool,
) -> Result<(), SchemaError> {
    let Some(lowest) = enumeration.lowest_ordinal() else {
        return Err(SchemaError::validation(
            path,
            ValidationKind::EmptyEnum {
                name: owner.to_string(),
            },
        ));
    };
    if lowest != 0 {
        return Err(SchemaError::validation(
            path,
            ValidationKind::EnumZeroOrdinal {
                name: owner.to_string(),
                lowest: i64::from(lowest),
            },
        ));
    }

    let mut ordinals: HashMap<i32, &str> = HashMap::new();
    for value in &enumeration.values {
        let value_path = format!("{}/{}", path, value.name);
        if !is_identifier(&value.name) {
            return Err(SchemaError::validation(
                value_path,
                ValidationKind::InvalidName {
                    name: value.name.clone(),
                    format: Format::Protobuf,
                },
            ));
        }
        if enumeration.reserved_names.iter().any(|n| *n == value.name) {
            return Err(SchemaError::validation(
                value_path,
                ValidationKind::FieldNameReserved {
                    owner: owner.to_string(),
                    name: value.name.clone(),
                },
            ));
        }
        if let Ok(number) = u32::try_from(value.ordinal) {
            if enumeration.reserved.iter().any(|r| r.contains(number)) {
                return Err(SchemaError::validation(
                    value_path,
                    ValidationKind::FieldNumberReserved {
                        owner: owner.to_string(),
                        number,
                    },
                ));
            }
        }
        if allow_alias {
            continue;
        }
        if let Some(first) = ordinals.insert(value.ordinal, value.name.as_str()) {
            return Err(SchemaError::validation(
                value_path,
                ValidationKind::DuplicateOrdinal {
                    ordinal: i64::from(value.ordinal),
                    first: first.to_string(),
                    second: value.name.clone(),
                },
            ));
        }
    }
    Ok(())
}
