//! Validation of a parsed query document against the schema, performed
//! before any IR is produced: document shape, field existence, coercion
//! legality, and the strict directive checks.
use async_graphql_parser::types::{
    ExecutableDocument, Field, OperationType, Selection, SelectionSet,
};
use async_graphql_parser::Positioned;

use crate::ast::directives::{
    FILTER_DIRECTIVE, QUERY_DIRECTIVES, UNSUPPORTED_DEFAULT_DIRECTIVES,
};
use crate::error::ValidationError;
use crate::schema::{get_base_named_type, Schema, TypeEquivalenceHints};

/// Validate the document and return its single root field.
///
/// Beyond structural validation, this enforces the stricter directive rule:
/// every directive the compiler recognizes must be declared in the schema,
/// whether or not the query uses it.
pub(crate) fn validate_query_against_schema<'q>(
    schema: &Schema,
    type_equivalence_hints: &TypeEquivalenceHints,
    document: &'q ExecutableDocument,
) -> Result<&'q Positioned<Field>, ValidationError> {
    for directive_name in QUERY_DIRECTIVES {
        if schema.directive_definition(directive_name).is_none() {
            return Err(ValidationError::DirectiveNotDeclaredInSchema(
                directive_name.to_string(),
            ));
        }
    }

    if !document.fragments.is_empty() {
        return Err(ValidationError::DocumentContainsNonInlineFragments);
    }

    let operation = match &document.operations {
        async_graphql_parser::types::DocumentOperations::Single(op) => op,
        async_graphql_parser::types::DocumentOperations::Multiple(_) => {
            return Err(ValidationError::MultipleOperationsInDocument)
        }
    };

    if operation.node.ty != OperationType::Query {
        return Err(ValidationError::DocumentNotAQuery);
    }
    if !operation.node.variable_definitions.is_empty() {
        return Err(ValidationError::VariableDefinitionInQuery);
    }
    if let Some(directive) = operation.node.directives.first() {
        return Err(ValidationError::DirectiveOutsideQueryRoot(
            directive.node.name.node.to_string(),
        ));
    }

    let root_items = &operation.node.selection_set.node.items;
    let root_field = match root_items.first().map(|sel| &sel.node) {
        Some(Selection::Field(field)) => field,
        Some(Selection::InlineFragment(_)) | Some(Selection::FragmentSpread(_)) | None => {
            return Err(ValidationError::QueryRootMustBeAField)
        }
    };

    // The root field names the type the query starts at; it must be a field
    // on the root query type.
    let root_field_name = root_field.node.name.node.as_str();
    validate_directives_on_field(root_field)?;
    let field_def = schema.field(schema.query_type_name(), root_field_name).ok_or_else(|| {
        ValidationError::NonExistentPath(vec![root_field_name.to_string()])
    })?;
    let root_type_name = get_base_named_type(&field_def.ty.node).to_string();

    let mut path = vec![root_field_name.to_string()];
    validate_selection_set(
        schema,
        type_equivalence_hints,
        &root_type_name,
        &mut path,
        &root_field.node.selection_set,
    )?;

    Ok(root_field)
}

fn validate_directives_on_field(field: &Positioned<Field>) -> Result<(), ValidationError> {
    for directive in &field.node.directives {
        let name = directive.node.name.node.as_str();
        if UNSUPPORTED_DEFAULT_DIRECTIVES.contains(&name) {
            return Err(ValidationError::UnsupportedDefaultDirective(name.to_string()));
        }
        if !QUERY_DIRECTIVES.contains(&name) {
            return Err(ValidationError::UnrecognizedDirective(name.to_string()));
        }
    }
    Ok(())
}

fn validate_selection_set(
    schema: &Schema,
    type_equivalence_hints: &TypeEquivalenceHints,
    current_type_name: &str,
    path: &mut Vec<String>,
    selection_set: &Positioned<SelectionSet>,
) -> Result<(), ValidationError> {
    for selection in &selection_set.node.items {
        match &selection.node {
            Selection::FragmentSpread(_) => {
                return Err(ValidationError::DocumentContainsNonInlineFragments);
            }
            Selection::InlineFragment(fragment) => {
                for directive in &fragment.node.directives {
                    let name = directive.node.name.node.as_str();
                    if name != FILTER_DIRECTIVE {
                        return Err(ValidationError::DirectiveNotAllowedOnFragment(
                            name.to_string(),
                        ));
                    }
                }

                let coerced_type_name = match &fragment.node.type_condition {
                    Some(condition) => condition.node.on.node.as_str(),
                    // A conditionless fragment keeps the type of the
                    // enclosing scope.
                    None => current_type_name,
                };

                if !schema.is_vertex_type(coerced_type_name) {
                    return Err(ValidationError::NonExistentType(
                        coerced_type_name.to_string(),
                    ));
                }

                if !is_coercion_allowed(
                    schema,
                    type_equivalence_hints,
                    current_type_name,
                    coerced_type_name,
                ) {
                    return Err(ValidationError::CannotCoerceToUnrelatedType(
                        current_type_name.to_string(),
                        coerced_type_name.to_string(),
                    ));
                }

                path.push(coerced_type_name.to_string());
                validate_selection_set(
                    schema,
                    type_equivalence_hints,
                    coerced_type_name,
                    path,
                    &fragment.node.selection_set,
                )?;
                path.pop().expect("path was just pushed");
            }
            Selection::Field(field) => {
                validate_field(schema, type_equivalence_hints, current_type_name, path, field)?;
            }
        }
    }

    Ok(())
}

fn validate_field(
    schema: &Schema,
    type_equivalence_hints: &TypeEquivalenceHints,
    parent_type_name: &str,
    path: &mut Vec<String>,
    field: &Positioned<Field>,
) -> Result<(), ValidationError> {
    let field_name = field.node.name.node.as_str();
    let field_def = schema.field(parent_type_name, field_name).ok_or_else(|| {
        let mut failed_path: Vec<String> = path.clone();
        failed_path.push(field_name.to_string());
        ValidationError::NonExistentPath(failed_path)
    })?;

    validate_directives_on_field(field)?;

    let field_type_name = get_base_named_type(&field_def.ty.node).to_string();
    let has_selections = !field.node.selection_set.node.items.is_empty();

    if schema.is_vertex_type(&field_type_name) {
        if !has_selections {
            return Err(ValidationError::VertexFieldWithoutSelections(field_name.to_string()));
        }

        path.push(field_name.to_string());
        validate_selection_set(
            schema,
            type_equivalence_hints,
            &field_type_name,
            path,
            &field.node.selection_set,
        )?;
        path.pop().expect("path was just pushed");
    } else {
        // A scalar-typed (property) field may not be further selected into.
        if has_selections {
            return Err(ValidationError::PropertyFieldWithSelections(field_name.to_string()));
        }
    }

    Ok(())
}

/// Whether a fragment may coerce `current` into `coerced`: the coerced type
/// must name the same type, implement the current interface, be a member of
/// the current union, or be related to it through the equivalence hints.
pub(crate) fn is_coercion_allowed(
    schema: &Schema,
    type_equivalence_hints: &TypeEquivalenceHints,
    current: &str,
    coerced: &str,
) -> bool {
    if schema.is_named_type_subtype(current, coerced) {
        return true;
    }

    // The fragment type's equivalent union may be the current scope's type.
    if type_equivalence_hints.get(coerced).map(|union| union.as_ref()) == Some(current) {
        return true;
    }

    // The current type's equivalent union may contain (or be) the fragment type.
    if let Some(equivalent_union) = type_equivalence_hints.get(current) {
        if equivalent_union.as_ref() == coerced {
            return true;
        }
        if schema.is_named_type_subtype(equivalent_union, coerced) {
            return true;
        }
    }

    false
}
