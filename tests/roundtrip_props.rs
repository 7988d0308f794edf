//! Property-based round-trip tests over generated schemas.
//!
//! Every generated schema is rendered and parsed once to normalize it; a
//! second render/parse pass must then reproduce the same tree exactly.

use proptest::prelude::*;
use proptest::{collection, option};
use usdl::{EnumValue, FieldDef, Format, Primitive, RenderOptions, Schema, TypeDef, TypeRef};

// ==========================================================================
// Strategies
// ==========================================================================

const PRIMITIVES: &[Primitive] = &[
    Primitive::Boolean,
    Primitive::Int,
    Primitive::Long,
    Primitive::Double,
    Primitive::String,
];

/// A field before its reference target is known.
#[derive(Debug, Clone)]
enum FieldPlan {
    Scalar { primitive: usize, optional: bool },
    Repeated { primitive: usize },
    Reference { target: usize, optional: bool },
}

#[derive(Debug, Clone)]
struct SchemaPlan {
    namespaced: bool,
    structures: Vec<(Option<String>, Vec<FieldPlan>)>,
    enums: Vec<usize>,
}

fn arb_field_plan() -> impl Strategy<Value = FieldPlan> {
    prop_oneof![
        4 => (0..PRIMITIVES.len(), any::<bool>())
            .prop_map(|(primitive, optional)| FieldPlan::Scalar { primitive, optional }),
        1 => (0..PRIMITIVES.len()).prop_map(|primitive| FieldPlan::Repeated { primitive }),
        2 => (any::<usize>(), any::<bool>())
            .prop_map(|(target, optional)| FieldPlan::Reference { target, optional }),
    ]
}

fn arb_schema_plan() -> impl Strategy<Value = SchemaPlan> {
    (
        any::<bool>(),
        collection::vec(
            (option::of("[A-Z][a-z]{0,10}( [a-z]{1,8}){0,3}"), collection::vec(arb_field_plan(), 1..5)),
            1..4,
        ),
        collection::vec(1usize..4, 0..3),
    )
        .prop_map(|(namespaced, structures, enums)| SchemaPlan {
            namespaced,
            structures,
            enums,
        })
}

/// Build the IR for a plan.
///
/// Structures `T0..Tn` come first, then enums `E_0..E_k`. A structure only
/// references later structures or enums, so there are no cycles. Field
/// numbers are assigned positionally so the tree is also valid Protobuf.
fn build(plan: &SchemaPlan) -> Schema {
    let mut schema = Schema::new();
    if plan.namespaced {
        schema = schema.with_namespace("com.example.props");
    }

    let enum_names: Vec<String> = (0..plan.enums.len()).map(|k| format!("E_{k}")).collect();

    for (i, (doc, fields)) in plan.structures.iter().enumerate() {
        let targets: Vec<String> = (i + 1..plan.structures.len())
            .map(|j| format!("T{j}"))
            .chain(enum_names.iter().cloned())
            .collect();

        let fields = fields
            .iter()
            .enumerate()
            .map(|(j, field)| {
                let name = format!("f_{j}");
                let def = match field {
                    FieldPlan::Scalar { primitive, optional } => {
                        FieldDef::new(name, PRIMITIVES[*primitive]).with_required(!optional)
                    }
                    FieldPlan::Repeated { primitive } => FieldDef::repeated(name, PRIMITIVES[*primitive]),
                    FieldPlan::Reference { target, optional } if !targets.is_empty() => {
                        let target = &targets[target % targets.len()];
                        FieldDef::new(name, TypeRef::named(target.as_str())).with_required(!optional)
                    }
                    FieldPlan::Reference { optional, .. } => {
                        FieldDef::new(name, Primitive::String).with_required(!optional)
                    }
                };
                def.number(j as u32 + 1)
            })
            .collect();

        let mut def = TypeDef::structure(format!("T{i}"), fields);
        if let Some(doc) = doc {
            def = def.with_documentation(doc.as_str());
        }
        schema = schema.with_type(def);
    }

    for (k, size) in plan.enums.iter().enumerate() {
        let values = (0..*size)
            .map(|v| EnumValue::new(format!("E{k}_V{v}"), v as i32))
            .collect();
        schema = schema.with_type(TypeDef::enumeration(enum_names[k].as_str(), values));
    }

    schema
}

fn assert_second_pass_stable(schema: &Schema, format: Format) {
    let options = RenderOptions::new();
    let normalized = usdl::parse(&usdl::render(schema, format, &options).unwrap(), format).unwrap();
    let once = usdl::parse(&usdl::render(&normalized, format, &options).unwrap(), format).unwrap();
    let twice = usdl::parse(&usdl::render(&once, format, &options).unwrap(), format).unwrap();
    assert_eq!(once, twice);
}

// ==========================================================================
// Properties
// ==========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn avro_second_pass_is_stable(plan in arb_schema_plan()) {
        assert_second_pass_stable(&build(&plan), Format::Avro);
    }

    #[test]
    fn protobuf_second_pass_is_stable(plan in arb_schema_plan()) {
        assert_second_pass_stable(&build(&plan), Format::Protobuf);
    }

    #[test]
    fn json_schema_second_pass_is_stable(plan in arb_schema_plan()) {
        assert_second_pass_stable(&build(&plan), Format::JsonSchema);
    }

    #[test]
    fn directive_tree_round_trips(plan in arb_schema_plan()) {
        let schema = build(&plan);
        let tree = serde_json::to_value(&schema).unwrap();
        let back: Schema = serde_json::from_value(tree).unwrap();
        prop_assert_eq!(back, schema);
    }

    #[test]
    fn protobuf_output_keeps_field_numbers(plan in arb_schema_plan()) {
        let schema = build(&plan);
        let text = usdl::render(&schema, Format::Protobuf, &RenderOptions::new()).unwrap();
        let parsed = usdl::parse(&text, Format::Protobuf).unwrap();
        for def in &schema.types {
            let (Some(expected), Some(actual)) = (
                def.as_structure(),
                parsed.get(&def.name).and_then(TypeDef::as_structure),
            ) else {
                continue;
            };
            for field in &expected.fields {
                prop_assert_eq!(actual.field(&field.name).and_then(|f| f.field_number), field.field_number);
            }
        }
    }
}
