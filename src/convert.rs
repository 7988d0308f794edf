//! Format-agnostic entry points over the three codecs.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::error::SchemaError;
use crate::ir::{
    FieldDef, FieldShape, ReservedRange, Schema, TypeDef, TypeKind, TypeRef, IMPLEMENTATION_RESERVED,
};
use crate::types::{Format, RenderOptions};
use crate::{avro, json_schema, protobuf};

/// Parse native schema text of the given format.
pub fn parse(text: &str, format: Format) -> Result<Schema, SchemaError> {
    match format {
        Format::Avro => avro::parse(text),
        Format::Protobuf => protobuf::parse(text),
        Format::JsonSchema => json_schema::parse(text),
    }
}

/// Render a schema in the given format.
///
/// `options` is ignored for Protobuf output.
pub fn render(schema: &Schema, format: Format, options: &RenderOptions) -> Result<String, SchemaError> {
    match format {
        Format::Avro => avro::render(schema, options),
        Format::Protobuf => protobuf::render(schema),
        Format::JsonSchema => json_schema::render(schema, options),
    }
}

/// Parse `text` as `from` and render it as `to`.
///
/// Field numbers are not invented: converting into Protobuf from a format
/// without them fails with `MissingFieldNumber` unless the caller runs
/// [`assign_field_numbers`] in between.
pub fn convert(text: &str, from: Format, to: Format, options: &RenderOptions) -> Result<String, SchemaError> {
    let schema = parse(text, from)?;
    debug!(%from, %to, types = schema.types.len(), "converting schema");
    render(&schema, to, options)
}

/// Return a copy of `schema` where every field without a Protobuf field
/// number gets the lowest free one.
///
/// Numbers already in use, user-reserved ranges and 19000..=19999 are
/// skipped. Oneof options draw from their enclosing message; inline
/// structures are numbered independently.
pub fn assign_field_numbers(schema: &Schema) -> Schema {
    let mut out = schema.clone();
    for def in &mut out.types {
        number_type(def);
    }
    out
}

fn number_type(def: &mut TypeDef) {
    let TypeKind::Structure(structure) = &mut def.kind else {
        return;
    };
    let mut used: HashSet<u32> = structure
        .numbered_fields()
        .iter()
        .filter_map(|f| f.field_number)
        .collect();
    let reserved = structure.reserved.clone();
    let mut next = 1;

    for field in &mut structure.fields {
        match &mut field.shape {
            FieldShape::Oneof { options } => {
                for option in options {
                    number_field(option, &reserved, &mut used, &mut next, &def.name);
                }
            }
            _ => number_field(field, &reserved, &mut used, &mut next, &def.name),
        }
    }
}

fn number_field(
    field: &mut FieldDef,
    reserved: &[ReservedRange],
    used: &mut HashSet<u32>,
    next: &mut u32,
    type_name: &str,
) {
    if field.field_number.is_none() {
        while used.contains(&*next)
            || reserved.iter().any(|r| r.contains(*next))
            || IMPLEMENTATION_RESERVED.contains(&*next)
        {
            *next += 1;
        }
        trace!(type_name, field = %field.name, number = *next, "assigned field number");
        field.field_number = Some(*next);
        used.insert(*next);
    }
    if let FieldShape::Scalar { ty: TypeRef::Inline(def) }
    | FieldShape::Repeated { items: TypeRef::Inline(def) }
    | FieldShape::Map { values: TypeRef::Inline(def), .. } = &mut field.shape
    {
        number_type(def);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationKind;
    use crate::ir::Primitive;

    fn numbers(def: &TypeDef) -> Vec<Option<u32>> {
        def.as_structure()
            .unwrap()
            .numbered_fields()
            .iter()
            .map(|f| f.field_number)
            .collect()
    }

    #[test]
    fn fills_gaps_and_skips_reserved() {
        let schema = Schema::new().with_type(
            TypeDef::structure(
                "Order",
                vec![
                    FieldDef::new("id", Primitive::String),
                    FieldDef::new("total", Primitive::Double).number(1),
                    FieldDef::new("note", Primitive::String),
                    FieldDef::oneof(
                        "payment",
                        vec![
                            FieldDef::new("card", Primitive::String),
                            FieldDef::new("iban", Primitive::String),
                        ],
                    ),
                ],
            )
            .with_reserved(vec![ReservedRange::new(3, 4)]),
        );
        let numbered = assign_field_numbers(&schema);
        assert_eq!(numbers(&numbered.types[0]), vec![Some(2), Some(1), Some(5), Some(6), Some(7)]);
        // The input is left untouched.
        assert_eq!(numbers(&schema.types[0])[0], None);
    }

    #[test]
    fn skips_implementation_reserved_range() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "Wide",
            vec![
                FieldDef::new("a", Primitive::Int).number(18_999),
                FieldDef::new("b", Primitive::Int),
            ],
        ));
        let mut numbered = assign_field_numbers(&schema);
        assert_eq!(numbers(&numbered.types[0]), vec![Some(18_999), Some(1)]);

        // Force the counter up against the reserved block.
        if let TypeKind::Structure(s) = &mut numbered.types[0].kind {
            s.reserved.push(ReservedRange::new(1, 18_998));
            s.fields[1].field_number = None;
        }
        let renumbered = assign_field_numbers(&numbered);
        assert_eq!(numbers(&renumbered.types[0]), vec![Some(18_999), Some(20_000)]);
    }

    #[test]
    fn numbers_inline_structures() {
        let inner = TypeDef::structure("", vec![FieldDef::new("x", Primitive::Int)]);
        let schema = Schema::new().with_type(TypeDef::structure(
            "Outer",
            vec![FieldDef::repeated("points", TypeRef::inline(inner))],
        ));
        let numbered = assign_field_numbers(&schema);
        let outer = numbered.types[0].as_structure().unwrap();
        let Some(TypeRef::Inline(inner)) = outer.fields[0].type_ref() else {
            panic!("inline structure expected");
        };
        assert_eq!(numbers(inner), vec![Some(1)]);
    }

    #[test]
    fn avro_to_protobuf_needs_numbers() {
        let avro = r#"{"type": "record", "name": "User", "fields": [{"name": "id", "type": "long"}]}"#;
        let err = convert(avro, Format::Avro, Format::Protobuf, &RenderOptions::new()).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Validation { kind: ValidationKind::MissingFieldNumber { .. }, .. }
        ));

        let numbered = assign_field_numbers(&parse(avro, Format::Avro).unwrap());
        let proto = render(&numbered, Format::Protobuf, &RenderOptions::new()).unwrap();
        assert!(proto.contains("int64 id = 1;"));
    }

    #[test]
    fn protobuf_to_json_schema() {
        let proto = "syntax = \"proto3\";\nmessage Ping {\n  string id = 1;\n  repeated int32 hops = 2;\n}\n";
        let out = convert(proto, Format::Protobuf, Format::JsonSchema, &RenderOptions::new().pretty(false)).unwrap();
        assert!(out.starts_with(r#"{"$schema":"https://json-schema.org/draft/2020-12/schema","title":"Ping""#));
        assert!(out.contains(r#""hops":{"type":"array","items":{"type":"integer","format":"int32"}}"#));
    }
}
