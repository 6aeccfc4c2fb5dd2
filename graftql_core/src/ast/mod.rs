//! Pure helper functions over borrowed AST nodes produced by the external
//! GraphQL parser: field splitting, fragment extraction, and typed readers
//! for the compiler's directives.
pub(crate) mod directives;

use std::collections::BTreeSet;

use async_graphql_parser::types::{Field, InlineFragment, Selection, SelectionSet};
use async_graphql_parser::Positioned;

use crate::error::CompilationError;
use crate::schema::is_vertex_field_name;

pub(crate) fn get_ast_field_name(field: &Positioned<Field>) -> &str {
    field.node.name.node.as_str()
}

/// Split a selection set's fields into `(property_fields, vertex_fields)`,
/// preserving order within each group.
///
/// All property fields must precede all vertex fields, and no field name may
/// repeat. Selections that are not fields (inline fragments) are skipped;
/// they are handled separately via [`get_inline_fragment`].
pub(crate) fn split_property_and_vertex_fields<'q>(
    selection_set: &'q Positioned<SelectionSet>,
) -> Result<(Vec<&'q Positioned<Field>>, Vec<&'q Positioned<Field>>), CompilationError> {
    let mut property_fields = vec![];
    let mut vertex_fields = vec![];
    let mut seen_field_names: BTreeSet<&str> = Default::default();
    let mut switched_to_vertices = false;

    for selection in &selection_set.node.items {
        let field = match &selection.node {
            Selection::Field(f) => f,
            Selection::InlineFragment(_) | Selection::FragmentSpread(_) => continue,
        };

        let name = get_ast_field_name(field);
        if !seen_field_names.insert(name) {
            // If repeated field names were ever allowed, the location naming scheme
            // would have to be extended to disambiguate between the repetitions.
            return Err(CompilationError::DuplicateField(name.to_string()));
        }

        if is_vertex_field_name(name) {
            switched_to_vertices = true;
            vertex_fields.push(field);
        } else {
            if switched_to_vertices {
                return Err(CompilationError::PropertyFieldAfterVertexField(name.to_string()));
            }
            property_fields.push(field);
        }
    }

    Ok((property_fields, vertex_fields))
}

/// Return the inline fragment in the selection set, if any. At most one may exist.
pub(crate) fn get_inline_fragment<'q>(
    selection_set: &'q Positioned<SelectionSet>,
) -> Result<Option<&'q Positioned<InlineFragment>>, CompilationError> {
    let mut fragments = selection_set.node.items.iter().filter_map(|sel| match &sel.node {
        Selection::InlineFragment(fragment) => Some(fragment),
        Selection::Field(_) | Selection::FragmentSpread(_) => None,
    });

    let first = fragments.next();
    if fragments.next().is_some() {
        return Err(CompilationError::MultipleFragments);
    }

    Ok(first)
}

#[cfg(test)]
mod tests {
    use async_graphql_parser::parse_query;
    use async_graphql_parser::types::{DocumentOperations, Selection};

    use super::*;
    use crate::error::CompilationError;

    fn root_field_of(query: &str) -> async_graphql_parser::types::ExecutableDocument {
        parse_query(query).unwrap()
    }

    fn with_root_selection_set<T>(
        query: &str,
        check: impl FnOnce(&Positioned<SelectionSet>) -> T,
    ) -> T {
        let doc = root_field_of(query);
        let op = match &doc.operations {
            DocumentOperations::Single(op) => op,
            DocumentOperations::Multiple(_) => unreachable!(),
        };
        let root = match &op.node.selection_set.node.items[0].node {
            Selection::Field(f) => f,
            _ => unreachable!(),
        };
        check(&root.node.selection_set)
    }

    #[test]
    fn field_splitting_preserves_order() {
        with_root_selection_set(
            "{ Animal { uuid name out_Animal_ParentOf { name } in_Animal_ParentOf { name } } }",
            |selection_set| {
                let (property_fields, vertex_fields) =
                    split_property_and_vertex_fields(selection_set).unwrap();

                let property_names: Vec<_> =
                    property_fields.iter().map(|f| get_ast_field_name(f)).collect();
                let vertex_names: Vec<_> =
                    vertex_fields.iter().map(|f| get_ast_field_name(f)).collect();

                assert_eq!(vec!["uuid", "name"], property_names);
                assert_eq!(vec!["out_Animal_ParentOf", "in_Animal_ParentOf"], vertex_names);
            },
        );
    }

    #[test]
    fn property_field_after_vertex_field_is_rejected() {
        with_root_selection_set(
            "{ Animal { out_Animal_ParentOf { name } name } }",
            |selection_set| {
                let err = split_property_and_vertex_fields(selection_set).unwrap_err();
                assert_eq!(err, CompilationError::PropertyFieldAfterVertexField("name".into()));
            },
        );
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        with_root_selection_set("{ Animal { name name } }", |selection_set| {
            let err = split_property_and_vertex_fields(selection_set).unwrap_err();
            assert_eq!(err, CompilationError::DuplicateField("name".into()));
        });
    }

    #[test]
    fn at_most_one_inline_fragment() {
        with_root_selection_set(
            "{ Entity { ... on Animal { name } } }",
            |selection_set| {
                assert!(get_inline_fragment(selection_set).unwrap().is_some());
            },
        );

        with_root_selection_set(
            "{ Entity { ... on Animal { name } ... on Food { name } } }",
            |selection_set| {
                let err = get_inline_fragment(selection_set).unwrap_err();
                assert_eq!(err, CompilationError::MultipleFragments);
            },
        );

        with_root_selection_set("{ Animal { name } }", |selection_set| {
            assert!(get_inline_fragment(selection_set).unwrap().is_none());
        });
    }
}
