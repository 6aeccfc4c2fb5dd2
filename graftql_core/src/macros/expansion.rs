//! Depth-first rewriting of queries that use macro edges. Rewriters return
//! `None` when a subtree is unchanged, so a query using no macro edges
//! round-trips to the exact same document and arguments.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_graphql_parser::types::{
    DocumentOperations, ExecutableDocument, Field, Selection, SelectionSet,
};
use async_graphql_parser::Positioned;

use crate::ast::directives::{FILTER_DIRECTIVE, MACRO_EDGE_TARGET_DIRECTIVE};
use crate::ast::get_ast_field_name;
use crate::error::{CompilationError, CompilerError};
use crate::ir::FieldValue;
use crate::schema::{get_base_named_type, is_vertex_field_name};
use crate::util::BTreeMapInsertExt;

use super::ast_rewriting::{
    find_target_path, merge_selection_sets, replace_tag_names, selection_at_path_mut,
};
use super::ast_traversal::get_all_tag_names;
use super::descriptor::MacroEdgeDescriptor;
use super::name_generation::generate_disambiguations;
use super::MacroRegistry;

/// Expand every macro edge used in the document. Returns `None` if the
/// document uses no macro edges; the caller then reuses the input document
/// and arguments untouched.
pub(super) fn expand_macros_in_query_document(
    registry: &MacroRegistry,
    document: &ExecutableDocument,
    query_args: &BTreeMap<Arc<str>, FieldValue>,
) -> Result<Option<(ExecutableDocument, BTreeMap<Arc<str>, FieldValue>)>, CompilerError> {
    let operation = match &document.operations {
        DocumentOperations::Single(op) => op,
        DocumentOperations::Multiple(_) => {
            unreachable!("multiple operations should have failed validation")
        }
    };
    let root_field = match operation.node.selection_set.node.items.first().map(|sel| &sel.node) {
        Some(Selection::Field(field)) => field,
        _ => unreachable!("the query root should have been validated to be a field"),
    };

    let root_field_name = get_ast_field_name(root_field);
    let root_field_def = registry
        .schema
        .field(registry.schema.query_type_name(), root_field_name)
        .expect("validation checked the root field");
    let root_type_name: Arc<str> = Arc::from(get_base_named_type(&root_field_def.ty.node));

    let mut new_args = query_args.clone();
    let mut tag_names = get_all_tag_names(root_field);

    let expanded =
        expand_macros_in_field(registry, &root_type_name, root_field, &mut new_args, &mut tag_names)?;

    match expanded {
        None => {
            assert_eq!(
                &new_args, query_args,
                "no macro expansion happened, but the query arguments changed"
            );
            Ok(None)
        }
        Some(new_root) => {
            let pos = new_root.pos;
            let mut new_operation = operation.clone();
            new_operation.node.selection_set.node.items =
                vec![Positioned::new(Selection::Field(new_root), pos)];

            let new_document = ExecutableDocument {
                operations: DocumentOperations::Single(new_operation),
                fragments: document.fragments.clone(),
            };
            Ok(Some((new_document, new_args)))
        }
    }
}

/// Only `@filter` may be applied to a macro edge in a query.
fn ensure_directives_on_macro_edge_are_supported(
    macro_edge_field: &Positioned<Field>,
) -> Result<(), CompilationError> {
    let macro_name = get_ast_field_name(macro_edge_field);
    for directive in &macro_edge_field.node.directives {
        let directive_name = directive.node.name.node.as_str();
        if directive_name != FILTER_DIRECTIVE {
            return Err(CompilationError::UnsupportedDirectiveOnMacroEdge(
                directive_name.to_string(),
                macro_name.to_string(),
            ));
        }
    }
    Ok(())
}

/// Expand macro edges among the children of the given field. Returns `None`
/// if nothing under this field changed.
fn expand_macros_in_field(
    registry: &MacroRegistry,
    current_type_name: &str,
    field: &Positioned<Field>,
    query_args: &mut BTreeMap<Arc<str>, FieldValue>,
    tag_names: &mut BTreeSet<Arc<str>>,
) -> Result<Option<Positioned<Field>>, CompilerError> {
    let expanded_items = expand_macros_in_selections(
        registry,
        current_type_name,
        &field.node.selection_set.node.items,
        query_args,
        tag_names,
    )?;

    Ok(expanded_items.map(|items| {
        let mut new_field = field.clone();
        new_field.node.selection_set.node.items = items;
        new_field
    }))
}

fn expand_macros_in_selections(
    registry: &MacroRegistry,
    current_type_name: &str,
    selections: &[Positioned<Selection>],
    query_args: &mut BTreeMap<Arc<str>, FieldValue>,
    tag_names: &mut BTreeSet<Arc<str>>,
) -> Result<Option<Vec<Positioned<Selection>>>, CompilerError> {
    let mut made_changes = false;
    let mut new_selections: Vec<Positioned<Selection>> = vec![];

    for selection in selections {
        match &selection.node {
            Selection::FragmentSpread(_) => {
                new_selections.push(selection.clone());
            }
            Selection::InlineFragment(fragment) => {
                let fragment_type_name: Arc<str> = match &fragment.node.type_condition {
                    Some(condition) => Arc::from(condition.node.on.node.as_str()),
                    None => Arc::from(current_type_name),
                };

                let expanded = expand_macros_in_selections(
                    registry,
                    &fragment_type_name,
                    &fragment.node.selection_set.node.items,
                    query_args,
                    tag_names,
                )?;

                match expanded {
                    None => new_selections.push(selection.clone()),
                    Some(items) => {
                        made_changes = true;
                        let mut new_fragment = fragment.clone();
                        new_fragment.node.selection_set.node.items = items;
                        new_selections
                            .push(Positioned::new(Selection::InlineFragment(new_fragment), selection.pos));
                    }
                }
            }
            Selection::Field(field) => {
                let field_name = get_ast_field_name(field);

                if !is_vertex_field_name(field_name) {
                    new_selections.push(selection.clone());
                    continue;
                }

                if let Some(descriptor) = registry.macro_edge_for(current_type_name, field_name) {
                    made_changes = true;
                    let (replacement, prefix, suffix) = expand_one_macro_edge(
                        registry,
                        descriptor.as_ref(),
                        field,
                        query_args,
                        tag_names,
                    )?;
                    new_selections.extend(prefix);
                    new_selections.push(replacement);
                    new_selections.extend(suffix);
                    continue;
                }

                // A regular edge: expand any macros deeper in its subtree.
                let field_def = registry
                    .schema
                    .field(current_type_name, field_name)
                    .expect("validation checked all fields");
                let field_type_name = get_base_named_type(&field_def.ty.node);

                match expand_macros_in_field(registry, field_type_name, field, query_args, tag_names)?
                {
                    None => new_selections.push(selection.clone()),
                    Some(new_field) => {
                        made_changes = true;
                        new_selections
                            .push(Positioned::new(Selection::Field(new_field), selection.pos));
                    }
                }
            }
        }
    }

    if !made_changes {
        return Ok(None);
    }

    // Macro siblings may interleave property and vertex fields; restore the
    // property-fields-first ordering without disturbing relative order.
    new_selections.sort_by_key(|selection| match &selection.node {
        Selection::Field(field) => is_vertex_field_name(get_ast_field_name(field)),
        Selection::InlineFragment(_) | Selection::FragmentSpread(_) => true,
    });

    Ok(Some(new_selections))
}

/// Expand one use of a macro edge, returning the replacement selection plus
/// the macro's sibling selections to splice in before and after it.
fn expand_one_macro_edge(
    registry: &MacroRegistry,
    descriptor: &MacroEdgeDescriptor,
    usage_field: &Positioned<Field>,
    query_args: &mut BTreeMap<Arc<str>, FieldValue>,
    tag_names: &mut BTreeSet<Arc<str>>,
) -> Result<
    (Positioned<Selection>, Vec<Positioned<Selection>>, Vec<Positioned<Selection>>),
    CompilerError,
> {
    ensure_directives_on_macro_edge_are_supported(usage_field)?;

    // The user's selections under the macro edge are typed at the macro's
    // target class and may themselves use macro edges; expand them first.
    let expanded_usage = expand_macros_in_field(
        registry,
        &descriptor.target_class_name,
        usage_field,
        query_args,
        tag_names,
    )?;
    let usage_field = expanded_usage.as_ref().unwrap_or(usage_field);

    // Rename the macro's tags away from any names already in use.
    let macro_tag_names = get_all_tag_names(&descriptor.expansion_ast);
    let name_change_map = generate_disambiguations(tag_names, &macro_tag_names);
    tag_names.extend(name_change_map.values().cloned());

    let mut sanitized_macro_ast = descriptor.expansion_ast.clone();
    replace_tag_names(&name_change_map, &mut sanitized_macro_ast);

    for (name, value) in &descriptor.macro_args {
        if let Err((name, _)) = query_args.insert_or_error(name.clone(), value.clone()) {
            return Err(CompilationError::OverlappingMacroArguments(name.to_string()).into());
        }
    }

    expand_specific_macro_edge(registry, descriptor, sanitized_macro_ast, usage_field)
}

fn expand_specific_macro_edge(
    registry: &MacroRegistry,
    descriptor: &MacroEdgeDescriptor,
    sanitized_macro_ast: Positioned<Field>,
    usage_field: &Positioned<Field>,
) -> Result<
    (Positioned<Selection>, Vec<Positioned<Selection>>, Vec<Positioned<Selection>>),
    CompilerError,
> {
    let mut replacement: Option<Positioned<Selection>> = None;
    let mut prefix_selections: Vec<Positioned<Selection>> = vec![];
    let mut suffix_selections: Vec<Positioned<Selection>> = vec![];

    for macro_selection in sanitized_macro_ast.node.selection_set.node.items {
        match find_target_path(&macro_selection) {
            None => {
                if replacement.is_none() {
                    prefix_selections.push(macro_selection);
                } else {
                    suffix_selections.push(macro_selection);
                }
            }
            Some(path) => {
                assert!(
                    replacement.is_none(),
                    "found more than one @macro_edge_target, which registration should have rejected"
                );

                let mut new_selection = macro_selection;
                let target = selection_at_path_mut(&mut new_selection, &path);
                merge_selection_into_target(
                    registry,
                    &descriptor.target_class_name,
                    target,
                    usage_field,
                )?;
                replacement = Some(new_selection);
            }
        }
    }

    let replacement = replacement.unwrap_or_else(|| {
        panic!(
            "no @macro_edge_target found in macro edge {}, which registration should have rejected",
            descriptor.macro_edge_name
        )
    });

    Ok((replacement, prefix_selections, suffix_selections))
}

/// Merge the user's selections, directives, and type coercion (if any) into
/// the node at the macro's target directive.
fn merge_selection_into_target(
    registry: &MacroRegistry,
    target_class_name: &str,
    target: &mut Positioned<Selection>,
    usage_field: &Positioned<Field>,
) -> Result<(), CompilerError> {
    // Remove the @macro_edge_target marker.
    {
        let directives = match &mut target.node {
            Selection::Field(field) => &mut field.node.directives,
            Selection::InlineFragment(fragment) => &mut fragment.node.directives,
            Selection::FragmentSpread(_) => {
                unreachable!("target paths never pass through fragment spreads")
            }
        };
        let before = directives.len();
        directives.retain(|d| d.node.name.node.as_str() != MACRO_EDGE_TARGET_DIRECTIVE);
        assert_eq!(before, directives.len() + 1, "expected exactly one target directive");
    }

    // See if the user's selection starts with a type coercion.
    let mut user_coercion = None;
    for selection in &usage_field.node.selection_set.node.items {
        if let Selection::InlineFragment(fragment) = &selection.node {
            if usage_field.node.selection_set.node.items.len() != 1 {
                return Err(CompilationError::SelectionsOutsideTypeCoercion(
                    get_ast_field_name(usage_field).to_string(),
                )
                .into());
            }
            user_coercion = Some(fragment);
        }
    }

    match user_coercion {
        Some(coercion) => {
            let coercion_class: &str = match &coercion.node.type_condition {
                Some(condition) => condition.node.on.node.as_str(),
                None => target_class_name,
            };

            // Only narrowing coercions are allowed: the coerced-to type must
            // be a subtype of the macro edge's target type.
            if coercion_class != target_class_name {
                let is_subtype = registry
                    .subclass_sets
                    .get(target_class_name)
                    .map(|subclasses| subclasses.contains(coercion_class))
                    .unwrap_or(false);
                if !is_subtype {
                    return Err(CompilationError::InvalidCoercionInMacroExpansion {
                        field_type: target_class_name.to_string(),
                        field_name: get_ast_field_name(usage_field).to_string(),
                        coercion_type: coercion_class.to_string(),
                    }
                    .into());
                }
            }

            if let Selection::InlineFragment(target_fragment) = &mut target.node {
                // The macro definition also had a coercion at its target;
                // the user's (narrower) coercion replaces it.
                target_fragment.node.type_condition = coercion.node.type_condition.clone();
                return merge_into_selection(
                    target,
                    &coercion.node.directives,
                    &coercion.node.selection_set.node,
                );
            }

            match &mut target.node {
                Selection::Field(target_field) => {
                    // Slip the user's coercion inside the target field, then
                    // merge into the freshly inserted fragment.
                    let mut new_fragment = coercion.clone();
                    new_fragment.node.directives = vec![];
                    new_fragment.node.selection_set = target_field.node.selection_set.clone();

                    let pos = new_fragment.pos;
                    target_field.node.selection_set.node.items =
                        vec![Positioned::new(Selection::InlineFragment(new_fragment), pos)];

                    merge_into_selection(
                        &mut target_field.node.selection_set.node.items[0],
                        &coercion.node.directives,
                        &coercion.node.selection_set.node,
                    )
                }
                Selection::InlineFragment(_) | Selection::FragmentSpread(_) => unreachable!(),
            }
        }
        None => merge_into_selection(
            target,
            &usage_field.node.directives,
            &usage_field.node.selection_set.node,
        ),
    }
}

/// Append the continuation's directives to the target node and merge their
/// selection sets.
fn merge_into_selection(
    target: &mut Positioned<Selection>,
    continuation_directives: &[Positioned<async_graphql_parser::types::Directive>],
    continuation_selection_set: &SelectionSet,
) -> Result<(), CompilerError> {
    let (target_directives, target_selection_set) = match &mut target.node {
        Selection::Field(field) => (&mut field.node.directives, &mut field.node.selection_set),
        Selection::InlineFragment(fragment) => {
            (&mut fragment.node.directives, &mut fragment.node.selection_set)
        }
        Selection::FragmentSpread(_) => unreachable!(),
    };

    target_directives.extend(continuation_directives.iter().cloned());

    let taken = std::mem::replace(&mut target_selection_set.node, SelectionSet { items: vec![] });
    target_selection_set.node =
        merge_selection_sets(taken, continuation_selection_set.clone())?;

    Ok(())
}
