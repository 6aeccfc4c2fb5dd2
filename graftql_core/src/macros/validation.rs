//! Validation of macro edge definitions at registration time.
use std::collections::BTreeMap;
use std::sync::Arc;

use async_graphql_parser::types::{
    Directive, DocumentOperations, ExecutableDocument, Field, OperationDefinition, OperationType,
    Selection, SelectionSet,
};
use async_graphql_parser::{Pos, Positioned};
use async_graphql_value::{Name, Value};
use itertools::Itertools;

use crate::ast::directives::{
    MACRO_EDGE_DEFINITION_DIRECTIVE, MACRO_EDGE_DIRECTIVE, MACRO_EDGE_TARGET_DIRECTIVE,
    OUTPUT_DIRECTIVE, OUTPUT_SOURCE_DIRECTIVE,
};
use crate::ast::get_ast_field_name;
use crate::error::{CompilerError, InvalidArgumentError, InvalidMacroError};
use crate::frontend::graphql_doc_to_ir;
use crate::ir::{is_argument_type_valid, FieldValue};
use crate::schema::{is_vertex_field_name, Schema, TypeEquivalenceHints};

use super::ast_rewriting::remove_directives_from_field;
use super::ast_traversal::{count_directive_occurrences, get_type_at_macro_edge_target};
use super::descriptor::MacroEdgeDescriptor;

const PROBE_OUTPUT_NAME: &str = "__macro_edge_probe";

/// Parse and validate a macro edge definition, producing its descriptor.
///
/// The definition must be a single query operation with exactly one
/// top-level selection, carrying `@macro_edge_definition(name: ...)` on that
/// selection and exactly one `@macro_edge_target` somewhere within.
pub(super) fn make_macro_edge_descriptor(
    schema: &Schema,
    macro_edge_graphql: &str,
    macro_edge_args: BTreeMap<Arc<str>, FieldValue>,
) -> Result<MacroEdgeDescriptor, CompilerError> {
    let preprocessed = format!("{macro_edge_graphql}\n");
    let document = async_graphql_parser::parse_query(preprocessed)?;

    let operation = match &document.operations {
        DocumentOperations::Single(op) => op,
        DocumentOperations::Multiple(_) => {
            return Err(InvalidMacroError::MultipleOperationsInDefinition.into())
        }
    };
    if operation.node.ty != OperationType::Query {
        return Err(InvalidMacroError::DefinitionNotAQuery.into());
    }
    if !operation.node.directives.is_empty() {
        let names = operation
            .node
            .directives
            .iter()
            .map(|d| d.node.name.node.to_string())
            .collect();
        return Err(InvalidMacroError::TopLevelDirectivesInDefinition(names).into());
    }
    if !operation.node.variable_definitions.is_empty() {
        return Err(InvalidMacroError::TopLevelVariableDefinitions.into());
    }

    let selections = &operation.node.selection_set.node.items;
    if selections.len() != 1 {
        return Err(InvalidMacroError::NotExactlyOneTopLevelSelection(selections.len()).into());
    }
    let definition_root = match &selections[0].node {
        Selection::Field(field) => field,
        Selection::InlineFragment(_) | Selection::FragmentSpread(_) => {
            return Err(InvalidMacroError::NotExactlyOneTopLevelSelection(0).into())
        }
    };

    validate_macro_directive_occurrences(definition_root)?;

    let base_class_name: Arc<str> = Arc::from(get_ast_field_name(definition_root));
    if schema.field(schema.query_type_name(), &base_class_name).is_none() {
        return Err(InvalidMacroError::BaseClassNotQueryable(base_class_name.to_string()).into());
    }

    let macro_edge_name = get_macro_edge_name(definition_root)?;
    if !is_vertex_field_name(&macro_edge_name) {
        return Err(InvalidMacroError::InvalidMacroEdgeName(macro_edge_name.to_string()).into());
    }

    let target_class_name = get_type_at_macro_edge_target(schema, definition_root)
        .ok_or(InvalidMacroError::TargetTypeNotFound)?;

    // The target directive stays in place: it marks where the user's
    // selections get merged during expansion.
    let expansion_ast = remove_directives_from_field(
        definition_root,
        &[MACRO_EDGE_DEFINITION_DIRECTIVE].into_iter().collect(),
    );

    Ok(MacroEdgeDescriptor {
        base_class_name,
        target_class_name,
        macro_edge_name,
        expansion_ast,
        macro_args: macro_edge_args,
    })
}

fn validate_macro_directive_occurrences(
    definition_root: &Positioned<Field>,
) -> Result<(), InvalidMacroError> {
    for forbidden in [MACRO_EDGE_DIRECTIVE, OUTPUT_DIRECTIVE, OUTPUT_SOURCE_DIRECTIVE] {
        if count_directive_occurrences(definition_root, forbidden) > 0 {
            return Err(InvalidMacroError::ForbiddenDirectiveInDefinition(
                forbidden.to_string(),
            ));
        }
    }

    for required in [MACRO_EDGE_DEFINITION_DIRECTIVE, MACRO_EDGE_TARGET_DIRECTIVE] {
        match count_directive_occurrences(definition_root, required) {
            0 => return Err(InvalidMacroError::MissingMacroDirective(required.to_string())),
            1 => {}
            n => {
                return Err(InvalidMacroError::DuplicatedMacroDirective(
                    required.to_string(),
                    n,
                ))
            }
        }
    }

    // The definition directive was found exactly once; it must be on the
    // top-level selection itself.
    let on_root = definition_root
        .node
        .directives
        .iter()
        .any(|d| d.node.name.node.as_str() == MACRO_EDGE_DEFINITION_DIRECTIVE);
    if !on_root {
        return Err(InvalidMacroError::DefinitionDirectiveNotOnRoot);
    }

    Ok(())
}

fn get_macro_edge_name(
    definition_root: &Positioned<Field>,
) -> Result<Arc<str>, InvalidMacroError> {
    let directive = definition_root
        .node
        .directives
        .iter()
        .find(|d| d.node.name.node.as_str() == MACRO_EDGE_DEFINITION_DIRECTIVE)
        .expect("the definition directive was checked to be on the root");

    match directive.node.get_argument("name").map(|argument| &argument.node) {
        Some(Value::String(name)) => Ok(Arc::from(name.as_str())),
        _ => Err(InvalidMacroError::DefinitionDirectiveMissingName),
    }
}

/// Check the provided arguments against the definition: compile the
/// (directive-stripped, probe-output-augmented) expansion to infer the types
/// of its `$` variables, then require the provided argument names to match
/// exactly and every value to fit its inferred type.
pub(super) fn validate_macro_edge_arguments(
    schema: &Schema,
    type_equivalence_hints: &TypeEquivalenceHints,
    descriptor: &MacroEdgeDescriptor,
) -> Result<(), CompilerError> {
    let macro_edge_args = &descriptor.macro_args;

    let mut probe_field = remove_directives_from_field(
        &descriptor.expansion_ast,
        &[MACRO_EDGE_TARGET_DIRECTIVE].into_iter().collect(),
    );
    if !add_probe_output(&mut probe_field) {
        return Err(InvalidMacroError::NoPropertyFieldInDefinition.into());
    }

    let pos = probe_field.pos;
    let probe_operation = OperationDefinition {
        ty: OperationType::Query,
        variable_definitions: vec![],
        directives: vec![],
        selection_set: Positioned::new(
            SelectionSet { items: vec![Positioned::new(Selection::Field(probe_field), pos)] },
            pos,
        ),
    };
    let probe_document = ExecutableDocument {
        operations: DocumentOperations::Single(Positioned::new(probe_operation, pos)),
        fragments: Default::default(),
    };

    let ir_and_metadata = graphql_doc_to_ir(schema, &probe_document, type_equivalence_hints)
        .map_err(|e| InvalidMacroError::DefinitionFailedToCompile(e.to_string()))?;

    let missing = ir_and_metadata
        .input_metadata
        .keys()
        .filter(|name| !macro_edge_args.contains_key(*name))
        .map(|name| name.to_string())
        .collect_vec();
    let unexpected = macro_edge_args
        .keys()
        .filter(|name| !ir_and_metadata.input_metadata.contains_key(*name))
        .map(|name| name.to_string())
        .collect_vec();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(InvalidMacroError::ArgumentSetMismatch { missing, unexpected }.into());
    }

    for (name, inferred_type) in &ir_and_metadata.input_metadata {
        let value = &macro_edge_args[name];
        if !is_argument_type_valid(inferred_type, value) {
            return Err(InvalidArgumentError::InvalidArgumentType {
                name: name.to_string(),
                expected_type: inferred_type.to_string(),
                value: value.clone(),
            }
            .into());
        }
    }

    Ok(())
}

/// Attach `@output` to the first property field found in a depth-first walk,
/// making the expansion a compilable query. Returns false if the tree
/// contains no property field.
fn add_probe_output(field: &mut Positioned<Field>) -> bool {
    for selection in &mut field.node.selection_set.node.items {
        match &mut selection.node {
            Selection::Field(inner) => {
                if !is_vertex_field_name(get_ast_field_name(inner)) {
                    inner.node.directives.push(make_output_directive(PROBE_OUTPUT_NAME));
                    return true;
                }
                if add_probe_output(inner) {
                    return true;
                }
            }
            Selection::InlineFragment(fragment) => {
                for inner in &mut fragment.node.selection_set.node.items {
                    if let Selection::Field(inner_field) = &mut inner.node {
                        if !is_vertex_field_name(get_ast_field_name(inner_field)) {
                            inner_field
                                .node
                                .directives
                                .push(make_output_directive(PROBE_OUTPUT_NAME));
                            return true;
                        }
                        if add_probe_output(inner_field) {
                            return true;
                        }
                    }
                }
            }
            Selection::FragmentSpread(_) => {}
        }
    }
    false
}

fn make_output_directive(output_name: &str) -> Positioned<Directive> {
    Positioned::new(
        Directive {
            name: Positioned::new(Name::new(OUTPUT_DIRECTIVE), Pos::default()),
            arguments: vec![(
                Positioned::new(Name::new("out_name"), Pos::default()),
                Positioned::new(Value::String(output_name.to_string()), Pos::default()),
            )],
        },
        Pos::default(),
    )
}
