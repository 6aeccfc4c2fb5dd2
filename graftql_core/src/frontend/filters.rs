//! Processing for the `@filter` directive: one handler per supported
//! operator, each enforcing argument count, argument kind, operand type
//! compatibility, and scope rules before producing the filter's
//! expression tree.
use std::sync::Arc;

use crate::ast::directives::FilterDirective;
use crate::error::CompilationError;
use crate::ir::{
    BasicBlock, BinaryOperator, Expression, FilterInfo, InnerType, Location, Type, UnaryOperator,
};
use crate::util::is_safe_name;

use super::context::CompilationContext;

pub(super) const COMPARISON_OPERATORS: [&str; 6] = ["=", "!=", ">", "<", ">=", "<="];

/// Vertex-field operators that filter the traversed-into vertex.
pub(super) const INNER_SCOPE_VERTEX_FIELD_OPERATORS: [&str; 1] = ["name_or_alias"];

/// Vertex-field operators that filter the containing vertex, and therefore
/// apply to the parent scope even when syntactically attached to a child
/// vertex field.
pub(super) const OUTER_SCOPE_VERTEX_FIELD_OPERATORS: [&str; 1] = ["has_edge_degree"];

/// What a `@filter` directive is attached to.
#[derive(Debug, Clone)]
pub(super) enum FilterTarget {
    /// A property field, together with its schema type.
    Property { field_name: Arc<str>, field_type: Type },

    /// A vertex scope: either a vertex field (with its name) or a type
    /// coercion (no field name). The type name is the vertex type the
    /// operator inspects.
    Vertex { field_name: Option<Arc<str>>, type_name: Arc<str> },
}

/// A filter directive paired with the field it applies to.
#[derive(Debug, Clone)]
pub(super) struct FilterOperationInfo {
    pub(super) directive: FilterDirective,
    pub(super) target: FilterTarget,
}

impl FilterTarget {
    fn field_name(&self) -> Option<&Arc<str>> {
        match self {
            FilterTarget::Property { field_name, .. } => Some(field_name),
            FilterTarget::Vertex { field_name, .. } => field_name.as_ref(),
        }
    }
}

pub(super) fn is_outer_scope_operator(directive: &FilterDirective) -> bool {
    OUTER_SCOPE_VERTEX_FIELD_OPERATORS.contains(&directive.op_name.as_ref())
}

fn is_runtime_parameter(argument: &str) -> bool {
    argument.starts_with('$')
}

fn is_tagged_parameter(argument: &str) -> bool {
    argument.starts_with('%')
}

/// Build the expression representing one filter argument.
///
/// Returns the argument's expression together with an optional
/// "non-existence" expression: `None` unless the argument is a tag declared
/// in an `@optional` scope, in which case the expression evaluates to true
/// iff the optional vertex was missing and the filter must pass vacuously.
fn represent_argument(
    ctx: &mut CompilationContext<'_>,
    directive_location: &Location,
    argument: &str,
    inferred_type: &Type,
) -> Result<(Expression, Option<Expression>), CompilationError> {
    let prefix_stripped = &argument[1.min(argument.len())..];

    if is_runtime_parameter(argument) {
        if !is_safe_name(prefix_stripped) {
            return Err(CompilationError::InvalidFilterArgumentName(
                argument.to_string(),
                "$".to_string(),
            ));
        }

        let variable_name: Arc<str> = Arc::from(prefix_stripped);
        if let Some(existing_type) = ctx.inputs.get(&variable_name) {
            if existing_type != inferred_type {
                return Err(CompilationError::IncompatibleVariableTypes(
                    variable_name.to_string(),
                    existing_type.to_string(),
                    inferred_type.to_string(),
                ));
            }
        } else {
            ctx.inputs.insert(variable_name, inferred_type.clone());
        }

        let expression = Expression::Variable {
            variable_name: Arc::from(argument),
            variable_type: inferred_type.clone(),
        };
        Ok((expression, None))
    } else if is_tagged_parameter(argument) {
        if !is_safe_name(prefix_stripped) {
            return Err(CompilationError::InvalidFilterArgumentName(
                argument.to_string(),
                "%".to_string(),
            ));
        }

        let tag_info = ctx.tags.get(prefix_stripped).ok_or_else(|| {
            CompilationError::UndefinedTagInFilter(
                directive_location.to_string(),
                prefix_stripped.to_string(),
            )
        })?;

        let tag_field = tag_info
            .location
            .field
            .clone()
            .unwrap_or_else(|| panic!("tag declared at non-property location: {}", tag_info.location));

        if &tag_info.tag_type != inferred_type {
            return Err(CompilationError::TagTypeMismatch {
                tag_name: prefix_stripped.to_string(),
                tag_type: tag_info.tag_type.to_string(),
                required_type: inferred_type.to_string(),
            });
        }

        // A tag declared at the same vertex the filter operates on is just a
        // sibling property fetched locally; its existence check degenerates.
        let field_is_local = directive_location.at_vertex() == tag_info.location.at_vertex();

        let non_existence = if tag_info.optional {
            if field_is_local {
                Some(Expression::FalseLiteral)
            } else {
                Some(Expression::BinaryComposition {
                    operator: BinaryOperator::Equals,
                    left: Box::new(Expression::ContextFieldExistence {
                        vertex_location: tag_info.location.at_vertex(),
                    }),
                    right: Box::new(Expression::FalseLiteral),
                })
            }
        } else {
            None
        };

        let representation = if field_is_local {
            Expression::LocalField { field_name: tag_field, field_type: inferred_type.clone() }
        } else {
            Expression::ContextField {
                location: tag_info.location.clone(),
                field_type: inferred_type.clone(),
            }
        };

        Ok((representation, non_existence))
    } else {
        Err(CompilationError::LiteralFilterArgument(argument.to_string()))
    }
}

/// Wrap the predicate so it passes vacuously when the optional tag it
/// depends on did not exist.
fn guard_with_non_existence(predicate: Expression, non_existence: Option<Expression>) -> Expression {
    match non_existence {
        None => predicate,
        Some(non_existence) => Expression::BinaryComposition {
            operator: BinaryOperator::Or,
            left: Box::new(non_existence),
            right: Box::new(predicate),
        },
    }
}

fn expect_parameter_count(
    directive: &FilterDirective,
    expected: usize,
) -> Result<(), CompilationError> {
    if directive.args.len() != expected {
        return Err(CompilationError::FilterArgumentCountMismatch(
            directive.op_name.to_string(),
            expected,
            directive.args.len(),
        ));
    }
    Ok(())
}

/// Get the property field the filter applies to, rejecting vertex scopes.
/// Used for every operator that reads a scalar (or list-of-scalar) field.
fn expect_property_field<'a>(
    info: &'a FilterOperationInfo,
) -> Result<(&'a Arc<str>, &'a Type), CompilationError> {
    match &info.target {
        FilterTarget::Property { field_name, field_type } => Ok((field_name, field_type)),
        FilterTarget::Vertex { field_name, type_name } => match field_name {
            Some(field_name) => Err(CompilationError::NonLeafComparisonField(
                info.directive.op_name.to_string(),
                field_name.to_string(),
                type_name.to_string(),
            )),
            None => Err(CompilationError::FilterMustApplyToField(
                info.directive.op_name.to_string(),
            )),
        },
    }
}

/// Ensure a property-field operator is applied to a scalar leaf, not a list.
fn expect_scalar_leaf<'a>(
    info: &'a FilterOperationInfo,
) -> Result<(&'a Arc<str>, &'a Type), CompilationError> {
    let (field_name, field_type) = expect_property_field(info)?;
    if field_type.is_list() {
        return Err(CompilationError::NonLeafComparisonField(
            info.directive.op_name.to_string(),
            field_name.to_string(),
            field_type.to_string(),
        ));
    }
    Ok((field_name, field_type))
}

fn comparison_operator(op_name: &str) -> BinaryOperator {
    match op_name {
        "=" => BinaryOperator::Equals,
        "!=" => BinaryOperator::NotEquals,
        ">" => BinaryOperator::GreaterThan,
        "<" => BinaryOperator::LessThan,
        ">=" => BinaryOperator::GreaterThanOrEqual,
        "<=" => BinaryOperator::LessThanOrEqual,
        _ => unreachable!("not a comparison operator: {op_name}"),
    }
}

fn process_comparison_filter(
    ctx: &mut CompilationContext<'_>,
    info: &FilterOperationInfo,
    location: &Location,
) -> Result<Expression, CompilationError> {
    expect_parameter_count(&info.directive, 1)?;
    let (field_name, field_type) = expect_scalar_leaf(info)?;

    let argument_inferred_type = field_type.with_nullability(true);
    let (argument_expression, non_existence) =
        represent_argument(ctx, location, &info.directive.args[0], &argument_inferred_type)?;

    let comparison = Expression::BinaryComposition {
        operator: comparison_operator(&info.directive.op_name),
        left: Box::new(Expression::LocalField {
            field_name: field_name.clone(),
            field_type: field_type.clone(),
        }),
        right: Box::new(argument_expression),
    };

    Ok(guard_with_non_existence(comparison, non_existence))
}

fn process_between_filter(
    ctx: &mut CompilationContext<'_>,
    info: &FilterOperationInfo,
    location: &Location,
) -> Result<Expression, CompilationError> {
    expect_parameter_count(&info.directive, 2)?;
    let (field_name, field_type) = expect_scalar_leaf(info)?;

    let argument_inferred_type = field_type.with_nullability(true);
    let (lower_expression, lower_non_existence) =
        represent_argument(ctx, location, &info.directive.args[0], &argument_inferred_type)?;
    let (upper_expression, upper_non_existence) =
        represent_argument(ctx, location, &info.directive.args[1], &argument_inferred_type)?;

    let local_field = Expression::LocalField {
        field_name: field_name.clone(),
        field_type: field_type.clone(),
    };

    let lower_bound_clause = guard_with_non_existence(
        Expression::BinaryComposition {
            operator: BinaryOperator::GreaterThanOrEqual,
            left: Box::new(local_field.clone()),
            right: Box::new(lower_expression),
        },
        lower_non_existence,
    );
    let upper_bound_clause = guard_with_non_existence(
        Expression::BinaryComposition {
            operator: BinaryOperator::LessThanOrEqual,
            left: Box::new(local_field),
            right: Box::new(upper_expression),
        },
        upper_non_existence,
    );

    Ok(Expression::BinaryComposition {
        operator: BinaryOperator::And,
        left: Box::new(lower_bound_clause),
        right: Box::new(upper_bound_clause),
    })
}

fn process_in_collection_filter(
    ctx: &mut CompilationContext<'_>,
    info: &FilterOperationInfo,
    location: &Location,
    negated: bool,
) -> Result<Expression, CompilationError> {
    expect_parameter_count(&info.directive, 1)?;
    let (field_name, field_type) = expect_scalar_leaf(info)?;

    let argument_inferred_type = Type::new_list_type(field_type.with_nullability(true), true);
    let (argument_expression, non_existence) =
        represent_argument(ctx, location, &info.directive.args[0], &argument_inferred_type)?;

    let operator = if negated { BinaryOperator::NotContains } else { BinaryOperator::Contains };
    let predicate = Expression::BinaryComposition {
        operator,
        left: Box::new(argument_expression),
        right: Box::new(Expression::LocalField {
            field_name: field_name.clone(),
            field_type: field_type.clone(),
        }),
    };

    Ok(guard_with_non_existence(predicate, non_existence))
}

fn process_string_operator_filter(
    ctx: &mut CompilationContext<'_>,
    info: &FilterOperationInfo,
    location: &Location,
    operator: BinaryOperator,
) -> Result<Expression, CompilationError> {
    expect_parameter_count(&info.directive, 1)?;
    let (field_name, field_type) = expect_scalar_leaf(info)?;

    let string_type = Type::new("String").expect("valid type");
    if field_type.with_nullability(true) != string_type {
        return Err(CompilationError::StringFilterOnNonStringField(
            info.directive.op_name.to_string(),
            field_name.to_string(),
            field_type.to_string(),
        ));
    }

    let (argument_expression, non_existence) =
        represent_argument(ctx, location, &info.directive.args[0], &string_type)?;

    let predicate = Expression::BinaryComposition {
        operator,
        left: Box::new(Expression::LocalField {
            field_name: field_name.clone(),
            field_type: field_type.clone(),
        }),
        right: Box::new(argument_expression),
    };

    Ok(guard_with_non_existence(predicate, non_existence))
}

fn process_contains_filter(
    ctx: &mut CompilationContext<'_>,
    info: &FilterOperationInfo,
    location: &Location,
    negated: bool,
) -> Result<Expression, CompilationError> {
    expect_parameter_count(&info.directive, 1)?;
    let (field_name, field_type) = expect_property_field(info)?;

    let base_field_type = field_type.with_nullability(true);
    if !negated && base_field_type == Type::new("String").expect("valid type") {
        return Err(CompilationError::ContainsOnStringField(field_name.to_string()));
    }

    let inner_type = match base_field_type.value() {
        InnerType::ListInnerType(inner) => inner,
        InnerType::NameOfType(_) => {
            return Err(CompilationError::ListFilterOnNonListField(
                info.directive.op_name.to_string(),
                field_name.to_string(),
                field_type.to_string(),
            ))
        }
    };

    let argument_inferred_type = inner_type.with_nullability(true);
    let (argument_expression, non_existence) =
        represent_argument(ctx, location, &info.directive.args[0], &argument_inferred_type)?;

    let operator = if negated { BinaryOperator::NotContains } else { BinaryOperator::Contains };
    let predicate = Expression::BinaryComposition {
        operator,
        left: Box::new(Expression::LocalField {
            field_name: field_name.clone(),
            field_type: field_type.clone(),
        }),
        right: Box::new(argument_expression),
    };

    Ok(guard_with_non_existence(predicate, non_existence))
}

fn process_intersects_filter(
    ctx: &mut CompilationContext<'_>,
    info: &FilterOperationInfo,
    location: &Location,
) -> Result<Expression, CompilationError> {
    expect_parameter_count(&info.directive, 1)?;
    let (field_name, field_type) = expect_property_field(info)?;

    let argument_inferred_type = field_type.with_nullability(true);
    if !argument_inferred_type.is_list() {
        return Err(CompilationError::ListFilterOnNonListField(
            info.directive.op_name.to_string(),
            field_name.to_string(),
            field_type.to_string(),
        ));
    }

    let (argument_expression, non_existence) =
        represent_argument(ctx, location, &info.directive.args[0], &argument_inferred_type)?;

    let predicate = Expression::BinaryComposition {
        operator: BinaryOperator::Intersects,
        left: Box::new(Expression::LocalField {
            field_name: field_name.clone(),
            field_type: field_type.clone(),
        }),
        right: Box::new(argument_expression),
    };

    Ok(guard_with_non_existence(predicate, non_existence))
}

fn process_null_check_filter(
    info: &FilterOperationInfo,
    negated: bool,
) -> Result<Expression, CompilationError> {
    expect_parameter_count(&info.directive, 0)?;
    let (field_name, field_type) = expect_property_field(info)?;

    let operator = if negated { BinaryOperator::NotEquals } else { BinaryOperator::Equals };
    Ok(Expression::BinaryComposition {
        operator,
        left: Box::new(Expression::LocalField {
            field_name: field_name.clone(),
            field_type: field_type.clone(),
        }),
        right: Box::new(Expression::NullLiteral),
    })
}

fn process_has_edge_degree_filter(
    ctx: &mut CompilationContext<'_>,
    info: &FilterOperationInfo,
    location: &Location,
) -> Result<Expression, CompilationError> {
    expect_parameter_count(&info.directive, 1)?;

    let (edge_field_name, vertex_type_name) = match &info.target {
        FilterTarget::Vertex { field_name: Some(field_name), type_name } => {
            (field_name, type_name)
        }
        FilterTarget::Vertex { field_name: None, .. } => {
            unreachable!("has_edge_degree on a type coercion should have been rejected earlier")
        }
        FilterTarget::Property { field_name, field_type } => {
            return Err(CompilationError::VertexFilterOnNonVertexField(
                info.directive.op_name.to_string(),
                format!("{field_name}: {field_type}"),
            ))
        }
    };

    let argument = info.directive.args[0].as_ref();
    if !is_runtime_parameter(argument) {
        return Err(CompilationError::HasEdgeDegreeRequiresRuntimeArgument(
            argument.to_string(),
        ));
    }

    let argument_inferred_type = Type::new("Int").expect("valid type");
    let (argument_expression, non_existence) =
        represent_argument(ctx, location, argument, &argument_inferred_type)?;
    assert!(non_existence.is_none(), "runtime arguments carry no existence checks");

    // The edge field's value is the list of neighboring vertices along the edge.
    let edge_field_type = Type::new(&format!("[{vertex_type_name}]")).expect("valid type");
    let edge_field = || Expression::LocalField {
        field_name: edge_field_name.clone(),
        field_type: edge_field_type.clone(),
    };

    // If no edges exist, the edge field in the database may be null, and the
    // supplied argument may or may not be zero. Both facts have to be
    // accommodated:  ({arg} = 0 && edge = null) || (edge != null && size(edge) = {arg})
    let argument_is_zero = Expression::BinaryComposition {
        operator: BinaryOperator::Equals,
        left: Box::new(argument_expression.clone()),
        right: Box::new(Expression::ZeroLiteral),
    };
    let edge_field_is_null = Expression::BinaryComposition {
        operator: BinaryOperator::Equals,
        left: Box::new(edge_field()),
        right: Box::new(Expression::NullLiteral),
    };
    let edge_degree_is_zero = Expression::BinaryComposition {
        operator: BinaryOperator::And,
        left: Box::new(argument_is_zero),
        right: Box::new(edge_field_is_null),
    };

    let edge_field_is_not_null = Expression::BinaryComposition {
        operator: BinaryOperator::NotEquals,
        left: Box::new(edge_field()),
        right: Box::new(Expression::NullLiteral),
    };
    let edge_degree = Expression::UnaryTransformation {
        operator: UnaryOperator::Size,
        inner: Box::new(edge_field()),
    };
    let edge_degree_matches_argument = Expression::BinaryComposition {
        operator: BinaryOperator::Equals,
        left: Box::new(edge_degree),
        right: Box::new(argument_expression),
    };
    let edge_degree_is_non_zero = Expression::BinaryComposition {
        operator: BinaryOperator::And,
        left: Box::new(edge_field_is_not_null),
        right: Box::new(edge_degree_matches_argument),
    };

    Ok(Expression::BinaryComposition {
        operator: BinaryOperator::Or,
        left: Box::new(edge_degree_is_zero),
        right: Box::new(edge_degree_is_non_zero),
    })
}

fn process_name_or_alias_filter(
    ctx: &mut CompilationContext<'_>,
    info: &FilterOperationInfo,
    location: &Location,
) -> Result<Expression, CompilationError> {
    expect_parameter_count(&info.directive, 1)?;

    let vertex_type_name = match &info.target {
        FilterTarget::Vertex { type_name, .. } => type_name,
        FilterTarget::Property { field_name, field_type } => {
            return Err(CompilationError::VertexFilterOnNonVertexField(
                info.directive.op_name.to_string(),
                format!("{field_name}: {field_type}"),
            ))
        }
    };

    if ctx.schema.is_union_type(vertex_type_name) {
        return Err(CompilationError::NameOrAliasOnUnion(vertex_type_name.to_string()));
    }

    let name_field = ctx.schema.field(vertex_type_name, "name").ok_or_else(|| {
        CompilationError::NameOrAliasMissingField(vertex_type_name.to_string(), "name".to_string())
    })?;
    let alias_field = ctx.schema.field(vertex_type_name, "alias").ok_or_else(|| {
        CompilationError::NameOrAliasMissingField(vertex_type_name.to_string(), "alias".to_string())
    })?;

    let name_field_type = Type::from_type(&name_field.ty.node).with_nullability(true);
    let alias_field_type = Type::from_type(&alias_field.ty.node).with_nullability(true);

    if name_field_type.is_list() || !ctx.schema.is_scalar_type(name_field_type.base_named_type()) {
        return Err(CompilationError::NameOrAliasNameNotScalar(vertex_type_name.to_string()));
    }

    let alias_inner_type = match alias_field_type.value() {
        InnerType::ListInnerType(inner) => inner.with_nullability(true),
        InnerType::NameOfType(_) => {
            return Err(CompilationError::NameOrAliasAliasNotList(vertex_type_name.to_string()))
        }
    };

    if alias_inner_type != name_field_type {
        return Err(CompilationError::NameOrAliasFieldTypeMismatch(
            vertex_type_name.to_string(),
            name_field_type.to_string(),
            alias_inner_type.to_string(),
        ));
    }

    let (argument_expression, non_existence) =
        represent_argument(ctx, location, &info.directive.args[0], &name_field_type)?;

    let check_against_name = Expression::BinaryComposition {
        operator: BinaryOperator::Equals,
        left: Box::new(Expression::LocalField {
            field_name: "name".into(),
            field_type: Type::from_type(&name_field.ty.node),
        }),
        right: Box::new(argument_expression.clone()),
    };
    let check_against_alias = Expression::BinaryComposition {
        operator: BinaryOperator::Contains,
        left: Box::new(Expression::LocalField {
            field_name: "alias".into(),
            field_type: Type::from_type(&alias_field.ty.node),
        }),
        right: Box::new(argument_expression),
    };
    let predicate = Expression::BinaryComposition {
        operator: BinaryOperator::Or,
        left: Box::new(check_against_name),
        right: Box::new(check_against_alias),
    };

    Ok(guard_with_non_existence(predicate, non_existence))
}

/// Produce the `Filter` basic block for the given filter directive, recording
/// its `FilterInfo` for diagnostics.
pub(super) fn process_filter_directive(
    ctx: &mut CompilationContext<'_>,
    info: &FilterOperationInfo,
    location: &Location,
) -> Result<BasicBlock, CompilationError> {
    let op_name = info.directive.op_name.as_ref();

    // Operators that do not affect the inner scope require a field name to
    // which they apply. Type coercions have no field name, which is why only
    // inner-scope operators make sense on them.
    if info.target.field_name().is_none()
        && !INNER_SCOPE_VERTEX_FIELD_OPERATORS.contains(&op_name)
    {
        return Err(CompilationError::FilterMustApplyToField(op_name.to_string()));
    }

    let recorded_fields: Vec<Arc<str>> = if op_name == "name_or_alias" {
        vec!["name".into(), "alias".into()]
    } else {
        info.target.field_name().cloned().into_iter().collect()
    };
    ctx.record_filter_info(
        location,
        FilterInfo {
            fields: recorded_fields,
            op_name: info.directive.op_name.clone(),
            args: info.directive.args.clone(),
        },
    );

    let predicate = match op_name {
        op if COMPARISON_OPERATORS.contains(&op) => process_comparison_filter(ctx, info, location),
        "between" => process_between_filter(ctx, info, location),
        "in_collection" => process_in_collection_filter(ctx, info, location, false),
        "not_in_collection" => process_in_collection_filter(ctx, info, location, true),
        "has_substring" => {
            process_string_operator_filter(ctx, info, location, BinaryOperator::HasSubstring)
        }
        "starts_with" => {
            process_string_operator_filter(ctx, info, location, BinaryOperator::StartsWith)
        }
        "ends_with" => {
            process_string_operator_filter(ctx, info, location, BinaryOperator::EndsWith)
        }
        "contains" => process_contains_filter(ctx, info, location, false),
        "not_contains" => process_contains_filter(ctx, info, location, true),
        "intersects" => process_intersects_filter(ctx, info, location),
        "is_null" => process_null_check_filter(info, false),
        "is_not_null" => process_null_check_filter(info, true),
        "has_edge_degree" => process_has_edge_degree_filter(ctx, info, location),
        "name_or_alias" => process_name_or_alias_filter(ctx, info, location),
        _ => Err(CompilationError::UnsupportedFilterOperator(op_name.to_string())),
    }?;

    Ok(BasicBlock::Filter(predicate))
}
