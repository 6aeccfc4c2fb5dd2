//! Rewriting helpers for macro expansion. Rewriters either mutate owned
//! clones in place, or signal "no change" so callers can preserve the input
//! object untouched.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_graphql_parser::types::{Directive, Field, Selection, SelectionSet};
use async_graphql_parser::{Pos, Positioned};
use async_graphql_value::{Name, Value};

use crate::ast::directives::{FILTER_DIRECTIVE, MACRO_EDGE_TARGET_DIRECTIVE, TAG_DIRECTIVE};
use crate::ast::get_ast_field_name;
use crate::error::CompilationError;

/// Remove every instance of the named directives from the tree rooted at the
/// given field, returning a rewritten copy.
pub(super) fn remove_directives_from_field(
    field: &Positioned<Field>,
    directive_names_to_omit: &BTreeSet<&str>,
) -> Positioned<Field> {
    let mut new_field = field.clone();
    remove_directives_in_place(&mut new_field, directive_names_to_omit);
    new_field
}

fn remove_directives_in_place(
    field: &mut Positioned<Field>,
    directive_names_to_omit: &BTreeSet<&str>,
) {
    field
        .node
        .directives
        .retain(|d| !directive_names_to_omit.contains(d.node.name.node.as_str()));

    for selection in &mut field.node.selection_set.node.items {
        match &mut selection.node {
            Selection::Field(inner) => remove_directives_in_place(inner, directive_names_to_omit),
            Selection::InlineFragment(fragment) => {
                fragment
                    .node
                    .directives
                    .retain(|d| !directive_names_to_omit.contains(d.node.name.node.as_str()));
                for inner in &mut fragment.node.selection_set.node.items {
                    if let Selection::Field(inner_field) = &mut inner.node {
                        remove_directives_in_place(inner_field, directive_names_to_omit);
                    }
                }
            }
            Selection::FragmentSpread(_) => {}
        }
    }
}

fn string_argument(name: &str, value: &str) -> (Positioned<Name>, Positioned<Value>) {
    (
        Positioned::new(Name::new(name), Pos::default()),
        Positioned::new(Value::String(value.to_string()), Pos::default()),
    )
}

fn rename_tags_in_directive(
    name_change_map: &BTreeMap<Arc<str>, Arc<str>>,
    directive: &mut Positioned<Directive>,
) {
    match directive.node.name.node.as_str() {
        TAG_DIRECTIVE => {
            let current_name = match directive.node.get_argument("tag_name") {
                Some(argument) => match &argument.node {
                    Value::String(s) => s.clone(),
                    _ => return,
                },
                None => return,
            };
            if let Some(new_name) = name_change_map.get(current_name.as_str()) {
                if new_name.as_ref() != current_name.as_str() {
                    directive.node.arguments = vec![string_argument("tag_name", new_name)];
                }
            }
        }
        FILTER_DIRECTIVE => {
            for (arg_name, arg_value) in &mut directive.node.arguments {
                if arg_name.node.as_str() != "value" {
                    continue;
                }
                if let Value::List(values) = &mut arg_value.node {
                    for value in values {
                        if let Value::String(operand) = value {
                            if let Some(tag_name) = operand.strip_prefix('%') {
                                if let Some(new_name) = name_change_map.get(tag_name) {
                                    if new_name.as_ref() != tag_name {
                                        *value = Value::String(format!("%{new_name}"));
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// Rename all tag declarations and `%tag` filter operands in the tree
/// according to the name change map.
pub(super) fn replace_tag_names(
    name_change_map: &BTreeMap<Arc<str>, Arc<str>>,
    field: &mut Positioned<Field>,
) {
    for directive in &mut field.node.directives {
        rename_tags_in_directive(name_change_map, directive);
    }

    for selection in &mut field.node.selection_set.node.items {
        match &mut selection.node {
            Selection::Field(inner) => replace_tag_names(name_change_map, inner),
            Selection::InlineFragment(fragment) => {
                for directive in &mut fragment.node.directives {
                    rename_tags_in_directive(name_change_map, directive);
                }
                for inner in &mut fragment.node.selection_set.node.items {
                    if let Selection::Field(inner_field) = &mut inner.node {
                        replace_tag_names(name_change_map, inner_field);
                    }
                }
            }
            Selection::FragmentSpread(_) => {}
        }
    }
}

fn selection_directives(selection: &Positioned<Selection>) -> &[Positioned<Directive>] {
    match &selection.node {
        Selection::Field(field) => &field.node.directives,
        Selection::InlineFragment(fragment) => &fragment.node.directives,
        Selection::FragmentSpread(_) => &[],
    }
}

fn selection_items(selection: &Positioned<Selection>) -> &[Positioned<Selection>] {
    match &selection.node {
        Selection::Field(field) => &field.node.selection_set.node.items,
        Selection::InlineFragment(fragment) => &fragment.node.selection_set.node.items,
        Selection::FragmentSpread(_) => &[],
    }
}

/// Find the path from the given selection to the node carrying the
/// `@macro_edge_target` directive: a sequence of child indices into
/// successive selection sets. An empty path means the selection itself
/// is the target; `None` means the target is not in this subtree.
pub(super) fn find_target_path(selection: &Positioned<Selection>) -> Option<Vec<usize>> {
    let has_target = selection_directives(selection)
        .iter()
        .any(|d| d.node.name.node.as_str() == MACRO_EDGE_TARGET_DIRECTIVE);
    if has_target {
        return Some(vec![]);
    }

    for (index, inner) in selection_items(selection).iter().enumerate() {
        if let Some(mut path) = find_target_path(inner) {
            path.insert(0, index);
            return Some(path);
        }
    }

    None
}

/// Navigate an owned selection along a path produced by [`find_target_path`],
/// returning the node at the path's end.
pub(super) fn selection_at_path_mut<'a>(
    selection: &'a mut Positioned<Selection>,
    path: &[usize],
) -> &'a mut Positioned<Selection> {
    let mut current = selection;
    for index in path {
        let items = match &mut current.node {
            Selection::Field(field) => &mut field.node.selection_set.node.items,
            Selection::InlineFragment(fragment) => &mut fragment.node.selection_set.node.items,
            Selection::FragmentSpread(_) => {
                unreachable!("target paths never pass through fragment spreads")
            }
        };
        current = &mut items[*index];
    }
    current
}

fn has_tag_directive(directives: &[Positioned<Directive>]) -> bool {
    directives.iter().any(|d| d.node.name.node.as_str() == TAG_DIRECTIVE)
}

fn expect_field(selection: Positioned<Selection>) -> Result<Positioned<Field>, CompilationError> {
    match selection.node {
        Selection::Field(field) => Ok(field),
        Selection::InlineFragment(fragment) => {
            let type_name = fragment
                .node
                .type_condition
                .as_ref()
                .map(|cond| cond.node.on.node.to_string())
                .unwrap_or_else(|| "<unconditioned fragment>".to_string());
            Err(CompilationError::MergeIntoCoercedScope(type_name))
        }
        Selection::FragmentSpread(spread) => Err(CompilationError::MergeIntoCoercedScope(
            spread.node.fragment_name.node.to_string(),
        )),
    }
}

/// Merge selection set `b` into selection set `a`, merging directives on
/// property-field name collisions.
///
/// Collisions on fields with sub-selections are rejected: the expansion
/// would traverse the same edge twice. Two `@tag` directives landing on the
/// same field are also rejected. After merging, redundant pro-forma fields
/// (no directives, no sub-selections) are dropped; if only pro-forma fields
/// remain, the lexicographically first is kept. Property fields are placed
/// before vertex fields; ties keep their input order.
pub(super) fn merge_selection_sets(
    selection_set_a: SelectionSet,
    selection_set_b: SelectionSet,
) -> Result<SelectionSet, CompilationError> {
    let mut merged: BTreeMap<Arc<str>, Positioned<Field>> = Default::default();
    let mut a_names: Vec<Arc<str>> = vec![];
    let mut b_names: Vec<Arc<str>> = vec![];

    let a_len = selection_set_a.items.len();
    for (index, selection) in
        selection_set_a.items.into_iter().chain(selection_set_b.items).enumerate()
    {
        let field = expect_field(selection)?;
        let field_name: Arc<str> = Arc::from(get_ast_field_name(&field));
        if index < a_len {
            a_names.push(field_name.clone());
        } else {
            b_names.push(field_name.clone());
        }

        match merged.remove(&field_name) {
            None => {
                merged.insert(field_name, field);
            }
            Some(mut prior) => {
                let prior_has_selections = !prior.node.selection_set.node.items.is_empty();
                let new_has_selections = !field.node.selection_set.node.items.is_empty();
                if prior_has_selections || new_has_selections {
                    return Err(CompilationError::DuplicateEdgeInMacroExpansion(
                        field_name.to_string(),
                    ));
                }

                if has_tag_directive(&prior.node.directives)
                    && has_tag_directive(&field.node.directives)
                {
                    return Err(CompilationError::DuplicateTagInMacroExpansion(
                        field_name.to_string(),
                    ));
                }

                prior.node.directives.extend(field.node.directives);
                merged.insert(field_name, prior);
            }
        }
    }

    // The macro or the user's query may carry a pro-forma field for the sake
    // of not having an empty selection set. Drop the ones made redundant by
    // the merge.
    let is_pro_forma = |field: &Positioned<Field>| {
        field.node.directives.is_empty() && field.node.selection_set.node.items.is_empty()
    };
    if merged.len() > 1 {
        let non_pro_forma_count = merged.values().filter(|field| !is_pro_forma(field)).count();
        if non_pro_forma_count > 0 {
            merged.retain(|_, field| !is_pro_forma(field));
        } else {
            let lexicographically_first = merged
                .keys()
                .next()
                .expect("merged map cannot be empty here")
                .clone();
            merged.retain(|name, _| *name == lexicographically_first);
        }
    }

    // Fields present on both sides take the second input's position.
    let name_order = a_names
        .into_iter()
        .filter(|name| !b_names.contains(name))
        .chain(b_names.iter().cloned());
    let mut merged_selections: Vec<Positioned<Field>> =
        name_order.filter_map(|name| merged.remove(&name)).collect();
    // Stable: property fields first, existing order otherwise preserved.
    merged_selections.sort_by_key(|field| !field.node.selection_set.node.items.is_empty());

    Ok(SelectionSet {
        items: merged_selections
            .into_iter()
            .map(|field| {
                let pos = field.pos;
                Positioned::new(Selection::Field(field), pos)
            })
            .collect(),
    })
}
