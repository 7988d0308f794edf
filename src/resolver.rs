//! Type reference resolution.
//!
//! Decides, for every reference to a named type, whether a serializer emits
//! the full definition (first occurrence in the pass) or a qualified-name
//! reference (every later occurrence). The visited set lives in a
//! [`ResolutionPass`] owned by a single serializer call; nothing is shared
//! between calls.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::error::{SchemaError, ValidationKind};
use crate::ir::{FieldDef, FieldShape, Node, Schema, Structure, TypeDef, TypeKind, TypeRef};

/// How one occurrence of a named type is emitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Occurrence<'s> {
    /// First occurrence: emit the full definition.
    Inline(&'s TypeDef),
    /// Later occurrence: emit this qualified name.
    ByName(String),
}

/// Per-serialization inline-once bookkeeping.
#[derive(Debug)]
pub struct ResolutionPass<'s> {
    schema: &'s Schema,
    emitted: HashSet<String>,
}

impl<'s> ResolutionPass<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            emitted: HashSet::new(),
        }
    }

    /// Classify an occurrence of `name`, marking it emitted on first visit.
    ///
    /// The mark is taken before the caller descends into the definition, so
    /// a recursive reference back to an enclosing type resolves by name.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownTypeReference` if the schema has no such type.
    pub fn occurrence(&mut self, name: &str, path: &str) -> Result<Occurrence<'s>, SchemaError> {
        let schema = self.schema;
        let def = schema
            .get(name)
            .ok_or_else(|| SchemaError::UnknownTypeReference {
                name: name.to_string(),
                path: path.to_string(),
            })?;

        if self.emitted.insert(name.to_string()) {
            trace!(name, path, "inline definition");
            Ok(Occurrence::Inline(def))
        } else {
            let qualified = schema.qualified_name(name);
            trace!(name, path, qualified = %qualified, "by-name reference");
            Ok(Occurrence::ByName(qualified))
        }
    }

    /// Returns true once `name` has been emitted in full.
    pub fn is_emitted(&self, name: &str) -> bool {
        self.emitted.contains(name)
    }
}

/// Whether a by-name reference may precede the definition it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardReferences {
    /// Definitions are positional (Protobuf, JSON Schema `$defs`).
    Allowed,
    /// Names must be defined before use (Avro).
    Rejected,
}

/// Tracks definitions and references as a parser or positional writer
/// encounters them, then checks every reference at the end.
#[derive(Debug)]
pub struct DefinitionTracker {
    forward: ForwardReferences,
    defined: HashSet<String>,
    references: Vec<PendingReference>,
}

#[derive(Debug)]
struct PendingReference {
    name: String,
    path: String,
    defined_before: bool,
}

impl DefinitionTracker {
    pub fn new(forward: ForwardReferences) -> Self {
        Self {
            forward,
            defined: HashSet::new(),
            references: Vec::new(),
        }
    }

    /// Record a full definition of `name`.
    ///
    /// # Errors
    ///
    /// Returns a `DuplicateTypeName` validation error on redefinition.
    pub fn define(&mut self, name: &str, path: &str) -> Result<(), SchemaError> {
        if !self.defined.insert(name.to_string()) {
            return Err(SchemaError::validation(
                path,
                ValidationKind::DuplicateTypeName {
                    name: name.to_string(),
                },
            ));
        }
        Ok(())
    }

    /// Record a by-name reference to `name`.
    pub fn refer(&mut self, name: &str, path: &str) {
        self.references.push(PendingReference {
            name: name.to_string(),
            path: path.to_string(),
            defined_before: self.defined.contains(name),
        });
    }

    /// Check every recorded reference.
    ///
    /// # Errors
    ///
    /// `UnknownTypeReference` if a name was never defined;
    /// `UnresolvedTypeReference` if it was only defined after a by-name use
    /// and forward references are rejected.
    pub fn finish(self) -> Result<(), SchemaError> {
        for reference in self.references {
            if !self.defined.contains(&reference.name) {
                return Err(SchemaError::UnknownTypeReference {
                    name: reference.name,
                    path: reference.path,
                });
            }
            if !reference.defined_before && self.forward == ForwardReferences::Rejected {
                return Err(SchemaError::UnresolvedTypeReference {
                    name: reference.name,
                    path: reference.path,
                });
            }
        }
        Ok(())
    }
}

/// How a single reference in the plan is emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    ByName(String),
}

/// One classified occurrence of a named type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Path of the referencing field, or `/Name` for a top-level definition.
    pub path: String,
    pub name: String,
    pub disposition: Disposition,
}

/// Check references and recursion, then classify every occurrence of every
/// named type in emission order (types in schema order, fields in
/// declaration order, depth first).
///
/// # Errors
///
/// Propagates [`check`] failures.
pub fn plan(schema: &Schema) -> Result<Vec<Resolution>, SchemaError> {
    check(schema)?;

    let mut pass = ResolutionPass::new(schema);
    let mut out = Vec::new();
    for def in &schema.types {
        if pass.is_emitted(&def.name) {
            continue;
        }
        let path = format!("/{}", def.name);
        if let Occurrence::Inline(def) = pass.occurrence(&def.name, &path)? {
            out.push(Resolution {
                path: path.clone(),
                name: def.name.clone(),
                disposition: Disposition::Inline,
            });
            plan_definition(def, &path, &mut pass, &mut out)?;
        }
    }
    Ok(out)
}

fn plan_definition(
    def: &TypeDef,
    path: &str,
    pass: &mut ResolutionPass<'_>,
    out: &mut Vec<Resolution>,
) -> Result<(), SchemaError> {
    if let TypeKind::Structure(structure) = &def.kind {
        for field in &structure.fields {
            plan_field(field, &format!("{}/{}", path, field.name), pass, out)?;
        }
    }
    Ok(())
}

fn plan_field(
    field: &FieldDef,
    path: &str,
    pass: &mut ResolutionPass<'_>,
    out: &mut Vec<Resolution>,
) -> Result<(), SchemaError> {
    match &field.shape {
        FieldShape::Oneof { options } => {
            for option in options {
                plan_field(option, &format!("{}/{}", path, option.name), pass, out)?;
            }
        }
        shape => match shape.type_ref() {
            Some(TypeRef::Named(name)) => match pass.occurrence(name, path)? {
                Occurrence::Inline(def) => {
                    out.push(Resolution {
                        path: path.to_string(),
                        name: name.clone(),
                        disposition: Disposition::Inline,
                    });
                    plan_definition(def, path, pass, out)?;
                }
                Occurrence::ByName(qualified) => out.push(Resolution {
                    path: path.to_string(),
                    name: name.clone(),
                    disposition: Disposition::ByName(qualified),
                }),
            },
            Some(TypeRef::Inline(def)) => plan_definition(def, path, pass, out)?,
            _ => {}
        },
    }
    Ok(())
}

/// Run the reference and recursion checks every serializer performs first.
///
/// # Errors
///
/// See [`check_references`] and [`check_recursion`].
pub fn check(schema: &Schema) -> Result<(), SchemaError> {
    check_references(schema)?;
    check_recursion(schema)
}

/// Every by-name reference must name a type of the same schema.
///
/// # Errors
///
/// Returns `SchemaError::UnknownTypeReference` for the first dangling reference.
pub fn check_references(schema: &Schema) -> Result<(), SchemaError> {
    let mut result = Ok(());
    schema.visit(|path, node| {
        if result.is_err() {
            return;
        }
        if let Node::Field(field) = node {
            if let Some(TypeRef::Named(name)) = field.type_ref() {
                if !schema.contains(name) {
                    result = Err(SchemaError::UnknownTypeReference {
                        name: name.clone(),
                        path: path.to_string(),
                    });
                }
            }
        }
    });
    result
}

/// Reject cycles made only of required single-valued structure fields.
///
/// Such a cycle demands an infinitely deep value; any optional, repeated,
/// map or oneof edge breaks it and the cycle is emitted by name.
///
/// # Errors
///
/// Returns `SchemaError::UnboundedRecursion` naming the cycle.
pub fn check_recursion(schema: &Schema) -> Result<(), SchemaError> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for def in &schema.types {
        if let TypeKind::Structure(structure) = &def.kind {
            let mut targets = Vec::new();
            required_edges(schema, structure, &mut targets);
            edges.insert(def.name.as_str(), targets);
        }
    }

    let mut done: HashSet<&str> = HashSet::new();
    for def in &schema.types {
        let mut stack = Vec::new();
        if let Some(cycle) = find_cycle(def.name.as_str(), &edges, &mut stack, &mut done) {
            return Err(SchemaError::UnboundedRecursion { cycle });
        }
    }
    Ok(())
}

fn required_edges<'s>(schema: &'s Schema, structure: &'s Structure, out: &mut Vec<&'s str>) {
    for field in &structure.fields {
        if !field.required {
            continue;
        }
        match &field.shape {
            FieldShape::Scalar {
                ty: TypeRef::Named(name),
            } => {
                if schema.get(name).and_then(TypeDef::as_structure).is_some() {
                    out.push(name.as_str());
                }
            }
            FieldShape::Scalar {
                ty: TypeRef::Inline(def),
            } => {
                if let Some(inner) = def.as_structure() {
                    required_edges(schema, inner, out);
                }
            }
            _ => {}
        }
    }
}

fn find_cycle<'s>(
    node: &'s str,
    edges: &HashMap<&'s str, Vec<&'s str>>,
    stack: &mut Vec<&'s str>,
    done: &mut HashSet<&'s str>,
) -> Option<Vec<String>> {
    if done.contains(node) {
        return None;
    }
    if let Some(pos) = stack.iter().position(|n| *n == node) {
        let mut cycle: Vec<String> = stack[pos..].iter().map(|n| n.to_string()).collect();
        cycle.push(node.to_string());
        return Some(cycle);
    }

    stack.push(node);
    if let Some(targets) = edges.get(node) {
        for target in targets {
            if let Some(cycle) = find_cycle(*target, edges, stack, done) {
                return Some(cycle);
            }
        }
    }
    stack.pop();
    done.insert(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FieldDef, Primitive};

    fn person_with_two_addresses() -> Schema {
        Schema::new()
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
            ))
    }

    // === Inline-once Tests ===

    #[test]
    fn second_occurrence_is_by_name() {
        let schema = person_with_two_addresses();
        let plan = plan(&schema).unwrap();

        assert_eq!(
            plan,
            vec![
                Resolution {
                    path: "/Person".into(),
                    name: "Person".into(),
                    disposition: Disposition::Inline,
                },
                Resolution {
                    path: "/Person/home".into(),
                    name: "Address".into(),
                    disposition: Disposition::Inline,
                },
                Resolution {
                    path: "/Person/work".into(),
                    name: "Address".into(),
                    disposition: Disposition::ByName("com.example.Address".into()),
                },
            ]
        );
    }

    #[test]
    fn passes_do_not_share_state() {
        let schema = person_with_two_addresses();
        let mut first = ResolutionPass::new(&schema);
        let mut second = ResolutionPass::new(&schema);

        assert!(matches!(
            first.occurrence("Address", "/a").unwrap(),
            Occurrence::Inline(_)
        ));
        assert!(matches!(
            second.occurrence("Address", "/a").unwrap(),
            Occurrence::Inline(_)
        ));
        assert_eq!(
            first.occurrence("Address", "/b").unwrap(),
            Occurrence::ByName("com.example.Address".into())
        );
    }

    #[test]
    fn self_reference_resolves_by_name() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "Node",
            vec![
                FieldDef::new("value", Primitive::Long),
                FieldDef::new("next", TypeRef::named("Node")).optional(),
            ],
        ));
        let plan = plan(&schema).unwrap();
        assert_eq!(plan[1].disposition, Disposition::ByName("Node".into()));
    }

    // === Error Tests ===

    #[test]
    fn unknown_reference_errors() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "Person",
            vec![FieldDef::new("home", TypeRef::named("Adress"))],
        ));
        let result = plan(&schema);
        assert!(matches!(
            result,
            Err(SchemaError::UnknownTypeReference { name, path })
                if name == "Adress" && path == "/Person/home"
        ));
    }

    #[test]
    fn unknown_reference_inside_oneof_errors() {
        let schema = Schema::new().with_type(TypeDef::structure(
            "Event",
            vec![FieldDef::oneof(
                "payload",
                vec![FieldDef::new("click", TypeRef::named("Click"))],
            )],
        ));
        assert!(matches!(
            check_references(&schema),
            Err(SchemaError::UnknownTypeReference { path, .. }) if path == "/Event/payload/click"
        ));
    }

    #[test]
    fn required_cycle_is_unbounded() {
        let schema = Schema::new()
            .with_type(TypeDef::structure(
                "A",
                vec![FieldDef::new("b", TypeRef::named("B"))],
            ))
            .with_type(TypeDef::structure(
                "B",
                vec![FieldDef::new("a", TypeRef::named("A"))],
            ));
        let result = check_recursion(&schema);
        assert!(matches!(
            result,
            Err(SchemaError::UnboundedRecursion { cycle }) if cycle == vec!["A", "B", "A"]
        ));
    }

    #[test]
    fn cycle_through_collection_is_allowed() {
        let schema = Schema::new()
            .with_type(TypeDef::structure(
                "Tree",
                vec![FieldDef::repeated("children", TypeRef::named("Tree"))],
            ))
            .with_type(TypeDef::structure(
                "Pair",
                vec![
                    FieldDef::new("left", TypeRef::named("Tree")),
                    FieldDef::map("named", Primitive::String, TypeRef::named("Pair")),
                ],
            ));
        assert!(check(&schema).is_ok());
    }

    #[test]
    fn required_cycle_through_inline_structure_is_unbounded() {
        let wrapper = TypeDef::structure("", vec![FieldDef::new("again", TypeRef::named("Loop"))]);
        let schema = Schema::new().with_type(TypeDef::structure(
            "Loop",
            vec![FieldDef::new("inner", TypeRef::inline(wrapper))],
        ));
        assert!(matches!(
            check_recursion(&schema),
            Err(SchemaError::UnboundedRecursion { .. })
        ));
    }

    // === Definition Tracker Tests ===

    #[test]
    fn tracker_rejects_forward_reference() {
        let mut tracker = DefinitionTracker::new(ForwardReferences::Rejected);
        tracker.refer("Address", "/Person/home");
        tracker.define("Address", "/Address").unwrap();
        assert!(matches!(
            tracker.finish(),
            Err(SchemaError::UnresolvedTypeReference { name, .. }) if name == "Address"
        ));
    }

    #[test]
    fn tracker_allows_forward_reference_when_positional() {
        let mut tracker = DefinitionTracker::new(ForwardReferences::Allowed);
        tracker.refer("Address", "/Person/home");
        tracker.define("Address", "/Address").unwrap();
        assert!(tracker.finish().is_ok());
    }

    #[test]
    fn tracker_reports_never_defined_as_unknown() {
        let mut tracker = DefinitionTracker::new(ForwardReferences::Allowed);
        tracker.define("Person", "/Person").unwrap();
        tracker.refer("Address", "/Person/home");
        assert!(matches!(
            tracker.finish(),
            Err(SchemaError::UnknownTypeReference { .. })
        ));
    }

    #[test]
    fn tracker_rejects_redefinition() {
        let mut tracker = DefinitionTracker::new(ForwardReferences::Rejected);
        tracker.define("Address", "/Address").unwrap();
        let result = tracker.define("Address", "/Person/home");
        assert!(matches!(
            result,
            Err(SchemaError::Validation {
                kind: ValidationKind::DuplicateTypeName { .. },
                ..
            })
        ));
    }
}
