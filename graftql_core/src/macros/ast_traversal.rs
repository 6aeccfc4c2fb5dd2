//! Read-only traversals over macro definition and query ASTs.
use std::collections::BTreeSet;
use std::sync::Arc;

use async_graphql_parser::types::{Field, Selection};
use async_graphql_parser::Positioned;
use async_graphql_value::Value;

use crate::ast::directives::{MACRO_EDGE_TARGET_DIRECTIVE, TAG_DIRECTIVE};
use crate::ast::get_ast_field_name;
use crate::schema::{get_base_named_type, is_vertex_field_name, Schema};

/// Visit every node of the (sub-)tree rooted at the given field, calling the
/// visitor with each node's directives.
fn visit_directive_lists<'q>(
    field: &'q Positioned<Field>,
    visitor: &mut dyn FnMut(&'q [Positioned<async_graphql_parser::types::Directive>]),
) {
    visitor(&field.node.directives);
    for selection in &field.node.selection_set.node.items {
        visit_selection_directive_lists(selection, visitor);
    }
}

fn visit_selection_directive_lists<'q>(
    selection: &'q Positioned<Selection>,
    visitor: &mut dyn FnMut(&'q [Positioned<async_graphql_parser::types::Directive>]),
) {
    match &selection.node {
        Selection::Field(inner) => visit_directive_lists(inner, visitor),
        Selection::InlineFragment(fragment) => {
            visitor(&fragment.node.directives);
            for inner in &fragment.node.selection_set.node.items {
                visit_selection_directive_lists(inner, visitor);
            }
        }
        Selection::FragmentSpread(_) => {}
    }
}

/// Count how many times the named directive appears anywhere in the tree.
pub(super) fn count_directive_occurrences(
    field: &Positioned<Field>,
    directive_name: &str,
) -> usize {
    let mut count = 0usize;
    visit_directive_lists(field, &mut |directives| {
        count += directives
            .iter()
            .filter(|d| d.node.name.node.as_str() == directive_name)
            .count();
    });
    count
}

/// All tag names declared anywhere within the tree.
pub(super) fn get_all_tag_names(field: &Positioned<Field>) -> BTreeSet<Arc<str>> {
    let mut names: BTreeSet<Arc<str>> = Default::default();
    visit_directive_lists(field, &mut |directives| {
        for directive in directives {
            if directive.node.name.node.as_str() != TAG_DIRECTIVE {
                continue;
            }
            if let Some(argument) = directive.node.get_argument("tag_name") {
                if let Value::String(name) = &argument.node {
                    names.insert(Arc::from(name.as_str()));
                }
            }
        }
    });
    names
}

fn node_has_target_directive(
    directives: &[Positioned<async_graphql_parser::types::Directive>],
) -> bool {
    directives
        .iter()
        .any(|d| d.node.name.node.as_str() == MACRO_EDGE_TARGET_DIRECTIVE)
}

fn get_type_at_target_with_current_type(
    schema: &Schema,
    selection: &Positioned<Selection>,
    current_type: &str,
) -> Option<Arc<str>> {
    let (directives, selections, type_here): (_, _, Option<Arc<str>>) = match &selection.node {
        Selection::Field(field) => {
            let field_name = get_ast_field_name(field);
            let type_here = if is_vertex_field_name(field_name) {
                schema
                    .field(current_type, field_name)
                    .map(|defn| Arc::from(get_base_named_type(&defn.ty.node)))
            } else {
                None
            };
            (
                &field.node.directives,
                &field.node.selection_set.node.items,
                type_here,
            )
        }
        Selection::InlineFragment(fragment) => {
            let type_here = fragment
                .node
                .type_condition
                .as_ref()
                .map(|cond| Arc::from(cond.node.on.node.as_str()))
                .or_else(|| Some(Arc::from(current_type)));
            (
                &fragment.node.directives,
                &fragment.node.selection_set.node.items,
                type_here,
            )
        }
        Selection::FragmentSpread(_) => return None,
    };

    let type_in_selection = type_here?;

    if node_has_target_directive(directives) {
        return Some(type_in_selection);
    }

    for inner in selections {
        if let Some(found) =
            get_type_at_target_with_current_type(schema, inner, &type_in_selection)
        {
            return Some(found);
        }
    }

    None
}

/// The schema type at the `@macro_edge_target` directive of a macro edge
/// definition, found by traversing the definition against the schema.
/// `None` if the definition contains no target directive.
pub(super) fn get_type_at_macro_edge_target(
    schema: &Schema,
    definition_root: &Positioned<Field>,
) -> Option<Arc<str>> {
    let root_field_name = get_ast_field_name(definition_root);
    let field_def = schema.field(schema.query_type_name(), root_field_name)?;
    let root_type: Arc<str> = Arc::from(get_base_named_type(&field_def.ty.node));

    if node_has_target_directive(&definition_root.node.directives) {
        return Some(root_type);
    }

    for selection in &definition_root.node.selection_set.node.items {
        if let Some(found) = get_type_at_target_with_current_type(schema, selection, &root_type) {
            return Some(found);
        }
    }

    None
}
