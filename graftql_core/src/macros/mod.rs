//! User-defined macro edges: registration of virtual-edge definitions, and
//! the pre-compilation pass that rewrites queries using them into
//! equivalent queries over the physical schema.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_graphql_parser::types::{
    ConstDirective, DocumentOperations, ExecutableDocument, FieldDefinition, Type as GQLType,
};
use async_graphql_parser::{Pos, Positioned};
use async_graphql_value::Name;

use crate::ast::directives::MACRO_EDGE_DIRECTIVE;
use crate::error::{CompilationError, CompilerError, InvalidMacroError};
use crate::frontend::validation::validate_query_against_schema;
use crate::ir::FieldValue;
use crate::schema::{Schema, TypeEquivalenceHints};

pub use self::descriptor::MacroEdgeDescriptor;

mod ast_rewriting;
mod ast_traversal;
mod descriptor;
mod expansion;
mod name_generation;
mod reversal;
mod validation;

use self::expansion::expand_macros_in_query_document;
use self::reversal::make_reverse_macro_edge_name;
use self::validation::{make_macro_edge_descriptor, validate_macro_edge_arguments};

/// All macro edges registered against one schema, indexed both by the type
/// they are defined on and by the type they point to.
///
/// Registrations mutate the registry in place; it is not internally
/// synchronized. Once treated as read-only, concurrent expansions over it
/// are safe: expansion never mutates the registry or its descriptors.
#[derive(Debug, Clone)]
pub struct MacroRegistry {
    pub(crate) schema: Arc<Schema>,
    pub(crate) type_equivalence_hints: TypeEquivalenceHints,

    /// Type name -> names of the type and all of its subtypes.
    pub(crate) subclass_sets: BTreeMap<Arc<str>, BTreeSet<Arc<str>>>,

    /// Base class name -> (macro edge name -> descriptor).
    pub(crate) macro_edges_at_class:
        BTreeMap<Arc<str>, BTreeMap<Arc<str>, Arc<MacroEdgeDescriptor>>>,

    /// Target class name -> (macro edge name -> descriptor).
    pub(crate) macro_edges_to_class:
        BTreeMap<Arc<str>, BTreeMap<Arc<str>, Arc<MacroEdgeDescriptor>>>,
}

impl MacroRegistry {
    /// Create an empty registry over the given schema.
    pub fn new(schema: Arc<Schema>, type_equivalence_hints: TypeEquivalenceHints) -> Self {
        let subclass_sets = schema.subclass_sets(&type_equivalence_hints);
        Self {
            schema,
            type_equivalence_hints,
            subclass_sets,
            macro_edges_at_class: Default::default(),
            macro_edges_to_class: Default::default(),
        }
    }

    /// The descriptor for the named macro edge as seen from the given class:
    /// defined on the class itself or on any of its superclasses.
    pub(crate) fn macro_edge_for(
        &self,
        class_name: &str,
        field_name: &str,
    ) -> Option<Arc<MacroEdgeDescriptor>> {
        for (base_class, edges) in &self.macro_edges_at_class {
            if let Some(descriptor) = edges.get(field_name) {
                let applies = base_class.as_ref() == class_name
                    || self
                        .subclass_sets
                        .get(base_class)
                        .map(|subclasses| subclasses.contains(class_name))
                        .unwrap_or(false);
                if applies {
                    return Some(descriptor.clone());
                }
            }
        }
        None
    }

    fn find_macro_edge_at_subclass(
        &self,
        class_name: &str,
        macro_edge_name: &str,
    ) -> Option<&Arc<MacroEdgeDescriptor>> {
        let subclasses = self.subclass_sets.get(class_name)?;
        for subclass in subclasses {
            if let Some(descriptor) = self
                .macro_edges_at_class
                .get(subclass)
                .and_then(|edges| edges.get(macro_edge_name))
            {
                return Some(descriptor);
            }
        }
        None
    }

    fn find_macro_edge_to_subclass(
        &self,
        class_name: &str,
        macro_edge_name: &str,
    ) -> Option<&Arc<MacroEdgeDescriptor>> {
        let subclasses = self.subclass_sets.get(class_name)?;
        for subclass in subclasses {
            if let Some(descriptor) = self
                .macro_edges_to_class
                .get(subclass)
                .and_then(|edges| edges.get(macro_edge_name))
            {
                return Some(descriptor);
            }
        }
        None
    }

    /// A schema where every registered macro edge appears as a list-typed
    /// field marked `@macro_edge`, on its base class and every subclass.
    /// Queries that use macro edges validate against this schema.
    pub fn get_schema_with_macros(&self) -> Schema {
        let mut additions: Vec<(Arc<str>, FieldDefinition)> = vec![];

        for (base_class, edges) in &self.macro_edges_at_class {
            let affected_classes = self
                .subclass_sets
                .get(base_class)
                .cloned()
                .unwrap_or_else(|| [base_class.clone()].into_iter().collect());

            for descriptor in edges.values() {
                for class_name in &affected_classes {
                    // Unions carry no fields of their own; their members are
                    // in the subclass set and receive the field directly.
                    if self.schema.is_union_type(class_name) {
                        continue;
                    }
                    additions.push((
                        class_name.clone(),
                        make_macro_edge_field_definition(
                            &descriptor.macro_edge_name,
                            &descriptor.target_class_name,
                        ),
                    ));
                }
            }
        }

        self.schema.with_added_vertex_fields(additions)
    }
}

fn make_macro_edge_field_definition(
    macro_edge_name: &str,
    target_class_name: &str,
) -> FieldDefinition {
    FieldDefinition {
        description: None,
        name: Positioned::new(Name::new(macro_edge_name), Pos::default()),
        arguments: vec![],
        ty: Positioned::new(
            GQLType::new(&format!("[{target_class_name}]")).expect("valid list type"),
            Pos::default(),
        ),
        directives: vec![Positioned::new(
            ConstDirective {
                name: Positioned::new(Name::new(MACRO_EDGE_DIRECTIVE), Pos::default()),
                arguments: vec![],
            },
            Pos::default(),
        )],
    }
}

/// Validate the given macro edge definition and add its descriptor to the
/// registry, mutating it.
pub fn register_macro_edge(
    macro_registry: &mut MacroRegistry,
    macro_edge_graphql: &str,
    macro_edge_args: BTreeMap<Arc<str>, FieldValue>,
) -> Result<(), CompilerError> {
    let descriptor = make_macro_edge_descriptor(
        &macro_registry.schema,
        macro_edge_graphql,
        macro_edge_args,
    )?;

    // The macro edge must not shadow any real field on the base class or any
    // of its subclasses.
    let base_subclasses = macro_registry
        .subclass_sets
        .get(&descriptor.base_class_name)
        .cloned()
        .unwrap_or_else(|| [descriptor.base_class_name.clone()].into_iter().collect());
    for subclass in &base_subclasses {
        if macro_registry.schema.field(subclass, &descriptor.macro_edge_name).is_some() {
            return Err(InvalidMacroError::MacroShadowsRealField {
                class_name: subclass.to_string(),
                edge_name: descriptor.macro_edge_name.to_string(),
            }
            .into());
        }
    }

    // No macro edge of the same name may already exist on the base class or
    // any subclass, nor point to the target class or any subclass.
    if let Some(existing) = macro_registry
        .find_macro_edge_at_subclass(&descriptor.base_class_name, &descriptor.macro_edge_name)
    {
        return Err(InvalidMacroError::ConflictingMacroDefinition {
            class_name: descriptor.base_class_name.to_string(),
            edge_name: descriptor.macro_edge_name.to_string(),
            conflicting_class: existing.base_class_name.to_string(),
        }
        .into());
    }
    if let Some(existing) = macro_registry
        .find_macro_edge_to_subclass(&descriptor.target_class_name, &descriptor.macro_edge_name)
    {
        return Err(InvalidMacroError::ConflictingMacroTarget {
            target_class: descriptor.target_class_name.to_string(),
            edge_name: descriptor.macro_edge_name.to_string(),
            conflicting_class: existing.target_class_name.to_string(),
        }
        .into());
    }

    check_macro_edge_for_reversal_definition_conflicts(macro_registry, &descriptor)?;

    // Last: type-check the provided arguments against the types inferred by
    // compiling the expansion.
    validate_macro_edge_arguments(
        &macro_registry.schema,
        &macro_registry.type_equivalence_hints,
        &descriptor,
    )?;

    let descriptor = Arc::new(descriptor);
    macro_registry
        .macro_edges_at_class
        .entry(descriptor.base_class_name.clone())
        .or_default()
        .insert(descriptor.macro_edge_name.clone(), descriptor.clone());
    macro_registry
        .macro_edges_to_class
        .entry(descriptor.target_class_name.clone())
        .or_default()
        .insert(descriptor.macro_edge_name.clone(), descriptor);

    Ok(())
}

/// Macro edges are required to be reversible: if the reversed macro edge
/// name is already registered around either endpoint, its endpoint types
/// must exactly match the reversal of the edge being defined.
fn check_macro_edge_for_reversal_definition_conflicts(
    macro_registry: &MacroRegistry,
    descriptor: &MacroEdgeDescriptor,
) -> Result<(), InvalidMacroError> {
    let reverse_edge_name = make_reverse_macro_edge_name(&descriptor.macro_edge_name);
    let reverse_base_class = &descriptor.target_class_name;
    let reverse_target_class = &descriptor.base_class_name;

    let candidates = [
        macro_registry.find_macro_edge_at_subclass(reverse_base_class, &reverse_edge_name),
        macro_registry.find_macro_edge_to_subclass(reverse_target_class, &reverse_edge_name),
    ];

    for existing in candidates.into_iter().flatten() {
        let endpoints_match = existing.base_class_name == *reverse_base_class
            && existing.target_class_name == *reverse_target_class;
        if !endpoints_match {
            return Err(InvalidMacroError::ReversalConflict {
                edge_name: descriptor.macro_edge_name.to_string(),
                base_class: descriptor.base_class_name.to_string(),
                target_class: descriptor.target_class_name.to_string(),
                reverse_edge_name: reverse_edge_name.to_string(),
                conflicting_base: existing.base_class_name.to_string(),
                conflicting_target: existing.target_class_name.to_string(),
            });
        }
    }

    Ok(())
}

/// Parse the query, validate it against the schema-with-macros, and rewrite
/// every macro edge use into its expansion.
///
/// Returns the rewritten document together with the query arguments merged
/// with all pre-bound macro arguments. If the query uses no macro edges,
/// the returned document and arguments are the parsed input, unchanged.
pub fn perform_macro_expansion(
    macro_registry: &MacroRegistry,
    graphql_with_macro: &str,
    graphql_args: &BTreeMap<Arc<str>, FieldValue>,
) -> Result<(ExecutableDocument, BTreeMap<Arc<str>, FieldValue>), CompilerError> {
    let preprocessed = format!("{graphql_with_macro}\n");
    let document = async_graphql_parser::parse_query(preprocessed)?;

    let schema_with_macros = macro_registry.get_schema_with_macros();
    validate_query_against_schema(
        &schema_with_macros,
        &macro_registry.type_equivalence_hints,
        &document,
    )?;

    if let DocumentOperations::Single(operation) = &document.operations {
        if operation.node.selection_set.node.items.len() != 1 {
            return Err(CompilationError::MultipleRootSelections.into());
        }
    }

    match expand_macros_in_query_document(macro_registry, &document, graphql_args)? {
        Some((new_document, new_args)) => Ok((new_document, new_args)),
        None => Ok((document, graphql_args.clone())),
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::expansion::expand_macros_in_query_document;
    use super::*;
    use crate::error::{CompilationError, InvalidArgumentError, InvalidMacroError};
    use crate::frontend::graphql_doc_to_ir;
    use crate::ir::IrAndMetadata;
    use crate::test_util::ANIMALS_SCHEMA;

    const GRANDPARENT_MACRO: &str = "{
        Animal @macro_edge_definition(name: \"out_Animal_GrandparentOf\") {
            out_Animal_ParentOf {
                out_Animal_ParentOf @macro_edge_target {
                    uuid
                }
            }
        }
    }";

    fn make_registry() -> MacroRegistry {
        MacroRegistry::new(Arc::new(ANIMALS_SCHEMA.clone()), Default::default())
    }

    fn registry_with_grandparent_macro() -> MacroRegistry {
        let mut registry = make_registry();
        register_macro_edge(&mut registry, GRANDPARENT_MACRO, Default::default()).unwrap();
        registry
    }

    fn expand_and_compile(
        registry: &MacroRegistry,
        query: &str,
        args: &BTreeMap<Arc<str>, FieldValue>,
    ) -> (IrAndMetadata, BTreeMap<Arc<str>, FieldValue>) {
        let (expanded, merged_args) = perform_macro_expansion(registry, query, args).unwrap();
        let ir = graphql_doc_to_ir(
            &registry.schema,
            &expanded,
            &registry.type_equivalence_hints,
        )
        .unwrap();
        (ir, merged_args)
    }

    fn compile_plain(query: &str) -> IrAndMetadata {
        crate::frontend::graphql_to_ir(&ANIMALS_SCHEMA, query).unwrap()
    }

    #[test]
    fn registration_stores_descriptor_in_both_indexes() {
        let registry = registry_with_grandparent_macro();

        let by_base = &registry.macro_edges_at_class["Animal"]["out_Animal_GrandparentOf"];
        assert_eq!(by_base.base_class_name.as_ref(), "Animal");
        assert_eq!(by_base.target_class_name.as_ref(), "Animal");

        let by_target = &registry.macro_edges_to_class["Animal"]["out_Animal_GrandparentOf"];
        assert_eq!(by_target.macro_edge_name.as_ref(), "out_Animal_GrandparentOf");
    }

    #[test]
    fn schema_with_macros_exposes_the_virtual_edge() {
        let registry = registry_with_grandparent_macro();
        let schema_with_macros = registry.get_schema_with_macros();

        let field = schema_with_macros.field("Animal", "out_Animal_GrandparentOf").unwrap();
        assert_eq!(field.ty.node.to_string(), "[Animal]");
        assert!(field
            .directives
            .iter()
            .any(|d| d.node.name.node.as_str() == MACRO_EDGE_DIRECTIVE));

        // The base schema remains untouched.
        assert!(registry.schema.field("Animal", "out_Animal_GrandparentOf").is_none());
    }

    #[test]
    fn expansion_is_equivalent_to_writing_the_traversals_explicitly() {
        let registry = registry_with_grandparent_macro();

        let (expanded_ir, args) = expand_and_compile(
            &registry,
            "{
                Animal {
                    out_Animal_GrandparentOf {
                        name @output(out_name: \"grandchild_name\")
                    }
                }
            }",
            &Default::default(),
        );

        let explicit_ir = compile_plain(
            "{
                Animal {
                    out_Animal_ParentOf {
                        out_Animal_ParentOf {
                            name @output(out_name: \"grandchild_name\")
                        }
                    }
                }
            }",
        );

        assert_eq!(explicit_ir, expanded_ir);
        assert!(args.is_empty());
    }

    #[test]
    fn macro_free_queries_are_returned_unchanged() {
        let registry = registry_with_grandparent_macro();
        let query = "{ Animal { name @output(out_name: \"name\") } }\n";
        let document = async_graphql_parser::parse_query(query).unwrap();
        let args: BTreeMap<Arc<str>, FieldValue> =
            btreemap! { Arc::from("x") => FieldValue::Int64(1) };

        let expansion = expand_macros_in_query_document(&registry, &document, &args).unwrap();
        assert!(expansion.is_none(), "a macro-free query must not be rewritten");

        let (returned_document, returned_args) =
            perform_macro_expansion(&registry, query, &args).unwrap();
        assert_eq!(args, returned_args);

        let original_ir =
            graphql_doc_to_ir(&registry.schema, &document, &Default::default()).unwrap();
        let returned_ir =
            graphql_doc_to_ir(&registry.schema, &returned_document, &Default::default()).unwrap();
        assert_eq!(original_ir, returned_ir);
    }

    #[test]
    fn filters_on_the_macro_edge_apply_to_the_target() {
        let registry = registry_with_grandparent_macro();

        let (expanded_ir, _) = expand_and_compile(
            &registry,
            "{
                Animal {
                    out_Animal_GrandparentOf
                        @filter(op_name: \"name_or_alias\", value: [\"$wanted\"]) {
                        name @output(out_name: \"grandchild_name\")
                    }
                }
            }",
            &Default::default(),
        );

        let explicit_ir = compile_plain(
            "{
                Animal {
                    out_Animal_ParentOf {
                        out_Animal_ParentOf
                            @filter(op_name: \"name_or_alias\", value: [\"$wanted\"]) {
                            name @output(out_name: \"grandchild_name\")
                        }
                    }
                }
            }",
        );

        assert_eq!(explicit_ir, expanded_ir);
    }

    #[test]
    fn macro_sibling_selections_are_spliced_into_the_enclosing_scope() {
        let mut registry = make_registry();
        register_macro_edge(
            &mut registry,
            "{
                Animal @macro_edge_definition(name: \"out_Animal_GrandchildrenWithColor\") {
                    color @filter(op_name: \"=\", value: [\"$grandchild_color\"])
                    out_Animal_ParentOf {
                        out_Animal_ParentOf @macro_edge_target {
                            uuid
                        }
                    }
                }
            }",
            btreemap! { Arc::from("grandchild_color") => FieldValue::from("green") },
        )
        .unwrap();

        let (expanded_ir, merged_args) = expand_and_compile(
            &registry,
            "{
                Animal {
                    name @output(out_name: \"name\")
                    out_Animal_GrandchildrenWithColor {
                        name @output(out_name: \"grandchild_name\")
                    }
                }
            }",
            &Default::default(),
        );

        let explicit_ir = compile_plain(
            "{
                Animal {
                    name @output(out_name: \"name\")
                    color @filter(op_name: \"=\", value: [\"$grandchild_color\"])
                    out_Animal_ParentOf {
                        out_Animal_ParentOf {
                            name @output(out_name: \"grandchild_name\")
                        }
                    }
                }
            }",
        );

        assert_eq!(explicit_ir, expanded_ir);
        assert_eq!(
            btreemap! { Arc::from("grandchild_color") => FieldValue::from("green") },
            merged_args,
        );
    }

    #[test]
    fn macro_tags_are_renamed_away_from_user_tags() {
        let mut registry = make_registry();
        register_macro_edge(
            &mut registry,
            "{
                Animal @macro_edge_definition(name: \"out_Animal_SameColorSiblings\") {
                    color @tag(tag_name: \"base_color\")
                    in_Animal_ParentOf {
                        out_Animal_ParentOf @macro_edge_target {
                            color @filter(op_name: \"=\", value: [\"%base_color\"])
                            uuid
                        }
                    }
                }
            }",
            Default::default(),
        )
        .unwrap();

        let (expanded_ir, _) = expand_and_compile(
            &registry,
            "{
                Animal {
                    name @tag(tag_name: \"base_color\")
                    out_Animal_SameColorSiblings {
                        name @output(out_name: \"sibling_name\")
                    }
                }
            }",
            &Default::default(),
        );

        let explicit_ir = compile_plain(
            "{
                Animal {
                    name @tag(tag_name: \"base_color\")
                    color @tag(tag_name: \"base_color_macro_edge_0\")
                    in_Animal_ParentOf {
                        out_Animal_ParentOf {
                            color @filter(op_name: \"=\", value: [\"%base_color_macro_edge_0\"])
                            name @output(out_name: \"sibling_name\")
                        }
                    }
                }
            }",
        );

        assert_eq!(explicit_ir, expanded_ir);
    }

    #[test]
    fn user_coercions_narrow_the_macro_target() {
        let mut registry = make_registry();
        register_macro_edge(
            &mut registry,
            "{
                Animal @macro_edge_definition(name: \"out_Animal_RelatedToEntity\") {
                    out_Entity_Related @macro_edge_target {
                        uuid
                    }
                }
            }",
            Default::default(),
        )
        .unwrap();

        let (expanded_ir, _) = expand_and_compile(
            &registry,
            "{
                Animal {
                    out_Animal_RelatedToEntity {
                        ... on Food { name @output(out_name: \"related_food\") }
                    }
                }
            }",
            &Default::default(),
        );

        let explicit_ir = compile_plain(
            "{
                Animal {
                    out_Entity_Related {
                        ... on Food { name @output(out_name: \"related_food\") }
                    }
                }
            }",
        );

        assert_eq!(explicit_ir, expanded_ir);
    }

    #[test]
    fn nested_macro_uses_expand_recursively() {
        let registry = registry_with_grandparent_macro();

        let (expanded_ir, _) = expand_and_compile(
            &registry,
            "{
                Animal {
                    out_Animal_GrandparentOf {
                        out_Animal_GrandparentOf {
                            name @output(out_name: \"great_great_grandchild\")
                        }
                    }
                }
            }",
            &Default::default(),
        );

        let explicit_ir = compile_plain(
            "{
                Animal {
                    out_Animal_ParentOf {
                        out_Animal_ParentOf {
                            out_Animal_ParentOf {
                                out_Animal_ParentOf {
                                    name @output(out_name: \"great_great_grandchild\")
                                }
                            }
                        }
                    }
                }
            }",
        );

        assert_eq!(explicit_ir, expanded_ir);
    }

    #[test]
    fn registration_order_is_commutative_for_disjoint_macros() {
        let sibling_macro = "{
            Food @macro_edge_definition(name: \"out_Food_RelatedFood\") {
                out_Entity_Related {
                    ... on Food @macro_edge_target {
                        uuid
                    }
                }
            }
        }";

        let mut first = make_registry();
        register_macro_edge(&mut first, GRANDPARENT_MACRO, Default::default()).unwrap();
        register_macro_edge(&mut first, sibling_macro, Default::default()).unwrap();

        let mut second = make_registry();
        register_macro_edge(&mut second, sibling_macro, Default::default()).unwrap();
        register_macro_edge(&mut second, GRANDPARENT_MACRO, Default::default()).unwrap();

        let query = "{
            Animal {
                out_Animal_GrandparentOf { name @output(out_name: \"grandchild\") }
            }
        }";
        let (first_ir, _) = expand_and_compile(&first, query, &Default::default());
        let (second_ir, _) = expand_and_compile(&second, query, &Default::default());
        assert_eq!(first_ir, second_ir);
    }

    mod registration_errors {
        use super::*;

        fn register_err(
            registry: &mut MacroRegistry,
            definition: &str,
            args: BTreeMap<Arc<str>, FieldValue>,
        ) -> CompilerError {
            register_macro_edge(registry, definition, args)
                .expect_err("registration should fail")
        }

        #[test]
        fn registering_the_same_macro_twice_fails() {
            let mut registry = registry_with_grandparent_macro();
            let err = register_err(&mut registry, GRANDPARENT_MACRO, Default::default());
            assert!(
                matches!(
                    err,
                    CompilerError::InvalidMacro(InvalidMacroError::ConflictingMacroDefinition { .. })
                ),
                "got: {err:?}",
            );
        }

        #[test]
        fn macro_edges_must_not_shadow_real_edges() {
            let mut registry = make_registry();
            let err = register_err(
                &mut registry,
                "{
                    Animal @macro_edge_definition(name: \"out_Animal_ParentOf\") {
                        out_Animal_ParentOf {
                            out_Animal_ParentOf @macro_edge_target { uuid }
                        }
                    }
                }",
                Default::default(),
            );
            assert!(
                matches!(
                    err,
                    CompilerError::InvalidMacro(InvalidMacroError::MacroShadowsRealField { .. })
                ),
                "got: {err:?}",
            );
        }

        #[test]
        fn macro_edge_names_require_a_direction_prefix() {
            let mut registry = make_registry();
            let err = register_err(
                &mut registry,
                "{
                    Animal @macro_edge_definition(name: \"Animal_GrandparentOf\") {
                        out_Animal_ParentOf {
                            out_Animal_ParentOf @macro_edge_target { uuid }
                        }
                    }
                }",
                Default::default(),
            );
            assert!(
                matches!(
                    err,
                    CompilerError::InvalidMacro(InvalidMacroError::InvalidMacroEdgeName(..))
                ),
                "got: {err:?}",
            );
        }

        #[test]
        fn the_target_directive_is_required_exactly_once() {
            let mut registry = make_registry();
            let missing = register_err(
                &mut registry,
                "{
                    Animal @macro_edge_definition(name: \"out_Animal_GrandparentOf\") {
                        out_Animal_ParentOf { out_Animal_ParentOf { uuid } }
                    }
                }",
                Default::default(),
            );
            assert!(
                matches!(
                    missing,
                    CompilerError::InvalidMacro(InvalidMacroError::MissingMacroDirective(ref name))
                        if name == "macro_edge_target"
                ),
                "got: {missing:?}",
            );

            let duplicated = register_err(
                &mut registry,
                "{
                    Animal @macro_edge_definition(name: \"out_Animal_GrandparentOf\") {
                        out_Animal_ParentOf @macro_edge_target {
                            out_Animal_ParentOf @macro_edge_target { uuid }
                        }
                    }
                }",
                Default::default(),
            );
            assert!(
                matches!(
                    duplicated,
                    CompilerError::InvalidMacro(InvalidMacroError::DuplicatedMacroDirective(ref name, 2))
                        if name == "macro_edge_target"
                ),
                "got: {duplicated:?}",
            );
        }

        #[test]
        fn outputs_are_forbidden_inside_definitions() {
            let mut registry = make_registry();
            let err = register_err(
                &mut registry,
                "{
                    Animal @macro_edge_definition(name: \"out_Animal_GrandparentOf\") {
                        out_Animal_ParentOf {
                            out_Animal_ParentOf @macro_edge_target {
                                uuid @output(out_name: \"x\")
                            }
                        }
                    }
                }",
                Default::default(),
            );
            assert!(
                matches!(
                    err,
                    CompilerError::InvalidMacro(InvalidMacroError::ForbiddenDirectiveInDefinition(ref name))
                        if name == "output"
                ),
                "got: {err:?}",
            );
        }

        #[test]
        fn argument_sets_must_match_exactly() {
            let definition = "{
                Animal @macro_edge_definition(name: \"out_Animal_RichSiblings\") {
                    in_Animal_ParentOf {
                        out_Animal_ParentOf @macro_edge_target {
                            net_worth @filter(op_name: \">\", value: [\"$min_worth\"])
                            uuid
                        }
                    }
                }
            }";

            let mut registry = make_registry();
            let missing = register_err(&mut registry, definition, Default::default());
            assert!(
                matches!(
                    missing,
                    CompilerError::InvalidMacro(InvalidMacroError::ArgumentSetMismatch { ref missing, .. })
                        if missing == &vec!["min_worth".to_string()]
                ),
                "got: {missing:?}",
            );

            let unexpected = register_err(
                &mut registry,
                definition,
                btreemap! {
                    Arc::from("min_worth") => FieldValue::Float64(1000.0),
                    Arc::from("extra") => FieldValue::Int64(1),
                },
            );
            assert!(
                matches!(
                    unexpected,
                    CompilerError::InvalidMacro(InvalidMacroError::ArgumentSetMismatch { ref unexpected, .. })
                        if unexpected == &vec!["extra".to_string()]
                ),
                "got: {unexpected:?}",
            );

            let wrong_type = register_err(
                &mut registry,
                definition,
                btreemap! { Arc::from("min_worth") => FieldValue::from("not a float") },
            );
            assert!(
                matches!(
                    wrong_type,
                    CompilerError::InvalidArgument(InvalidArgumentError::InvalidArgumentType { .. })
                ),
                "got: {wrong_type:?}",
            );

            register_macro_edge(
                &mut registry,
                definition,
                btreemap! { Arc::from("min_worth") => FieldValue::Float64(1000.0) },
            )
            .unwrap();
        }

        #[test]
        fn reversed_macro_edges_must_have_matching_endpoints() {
            let mut registry = registry_with_grandparent_macro();

            // The reversed name of this macro edge already exists with
            // endpoints Animal -> Animal, so pointing it at Species must fail.
            let err = register_err(
                &mut registry,
                "{
                    Animal @macro_edge_definition(name: \"in_Animal_GrandparentOf\") {
                        out_Animal_OfSpecies @macro_edge_target { uuid }
                    }
                }",
                Default::default(),
            );
            assert!(
                matches!(
                    err,
                    CompilerError::InvalidMacro(InvalidMacroError::ReversalConflict { .. })
                ),
                "got: {err:?}",
            );

            // A reversal with exactly matching endpoints is accepted.
            register_macro_edge(
                &mut registry,
                "{
                    Animal @macro_edge_definition(name: \"in_Animal_GrandparentOf\") {
                        in_Animal_ParentOf {
                            in_Animal_ParentOf @macro_edge_target { uuid }
                        }
                    }
                }",
                Default::default(),
            )
            .unwrap();
        }
    }

    mod expansion_errors {
        use super::*;

        #[test]
        fn duplicated_edges_after_merging_are_rejected() {
            let mut registry = make_registry();
            register_macro_edge(
                &mut registry,
                "{
                    Animal @macro_edge_definition(name: \"out_Animal_ParentsWithSpecies\") {
                        out_Animal_ParentOf @macro_edge_target {
                            out_Animal_OfSpecies { uuid }
                        }
                    }
                }",
                Default::default(),
            )
            .unwrap();

            let err = perform_macro_expansion(
                &registry,
                "{
                    Animal {
                        out_Animal_ParentsWithSpecies {
                            out_Animal_OfSpecies { name @output(out_name: \"s\") }
                        }
                    }
                }",
                &Default::default(),
            )
            .unwrap_err();
            assert!(
                matches!(
                    err,
                    CompilerError::Compilation(CompilationError::DuplicateEdgeInMacroExpansion(ref name))
                        if name == "out_Animal_OfSpecies"
                ),
                "got: {err:?}",
            );
        }

        #[test]
        fn unsupported_directives_on_macro_edges_are_rejected() {
            let registry = registry_with_grandparent_macro();
            let err = perform_macro_expansion(
                &registry,
                "{
                    Animal {
                        out_Animal_GrandparentOf @optional {
                            name @output(out_name: \"n\")
                        }
                    }
                }",
                &Default::default(),
            )
            .unwrap_err();
            assert!(
                matches!(
                    err,
                    CompilerError::Compilation(CompilationError::UnsupportedDirectiveOnMacroEdge(..))
                ),
                "got: {err:?}",
            );
        }

        #[test]
        fn widening_coercions_are_rejected() {
            let mut registry = make_registry();
            register_macro_edge(
                &mut registry,
                "{
                    Animal @macro_edge_definition(name: \"out_Animal_GrandparentSpecies\") {
                        out_Animal_ParentOf {
                            out_Animal_OfSpecies @macro_edge_target { uuid }
                        }
                    }
                }",
                Default::default(),
            )
            .unwrap();

            let err = perform_macro_expansion(
                &registry,
                "{
                    Animal {
                        out_Animal_GrandparentSpecies {
                            ... on Entity { name @output(out_name: \"n\") }
                        }
                    }
                }",
                &Default::default(),
            )
            .unwrap_err();
            assert!(
                matches!(
                    err,
                    CompilerError::Compilation(
                        CompilationError::InvalidCoercionInMacroExpansion { .. }
                    )
                ),
                "got: {err:?}",
            );
        }

        #[test]
        fn user_arguments_may_not_collide_with_macro_arguments() {
            let mut registry = make_registry();
            register_macro_edge(
                &mut registry,
                "{
                    Animal @macro_edge_definition(name: \"out_Animal_RichSiblings\") {
                        in_Animal_ParentOf {
                            out_Animal_ParentOf @macro_edge_target {
                                net_worth @filter(op_name: \">\", value: [\"$min_worth\"])
                                uuid
                            }
                        }
                    }
                }",
                btreemap! { Arc::from("min_worth") => FieldValue::Float64(1000.0) },
            )
            .unwrap();

            let err = perform_macro_expansion(
                &registry,
                "{
                    Animal {
                        out_Animal_RichSiblings { name @output(out_name: \"n\") }
                    }
                }",
                &btreemap! { Arc::from("min_worth") => FieldValue::Float64(5.0) },
            )
            .unwrap_err();
            assert!(
                matches!(
                    err,
                    CompilerError::Compilation(CompilationError::OverlappingMacroArguments(ref name))
                        if name == "min_worth"
                ),
                "got: {err:?}",
            );
        }

        #[test]
        fn queries_using_unregistered_macro_edges_fail_validation() {
            let registry = make_registry();
            let err = perform_macro_expansion(
                &registry,
                "{
                    Animal {
                        out_Animal_GrandparentOf { name @output(out_name: \"n\") }
                    }
                }",
                &Default::default(),
            )
            .unwrap_err();
            assert!(matches!(err, CompilerError::Validation(..)), "got: {err:?}");
        }
    }
}
