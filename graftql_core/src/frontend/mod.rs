//! The compiler front-end: walks the parsed query depth-first, applies
//! directive semantics, and emits the IR block sequence together with its
//! input and output metadata.
//!
//! The walk structure, per AST node:
//!   - step 0: preprocessing -- gather directives, split child fields into
//!     property and vertex groups, detect an inline fragment;
//!   - step 1: emit a Filter block for every filter that applies to this
//!     scope, including outer-scope operators attached to child vertex
//!     fields;
//!   - then one of three cases: property field (record tags and outputs),
//!     vertex field (mark the location and step into children), or inline
//!     fragment (emit a type coercion and recurse).
use std::collections::BTreeMap;
use std::sync::Arc;

use async_graphql_parser::types::{
    Directive, ExecutableDocument, Field, InlineFragment, SelectionSet,
};
use async_graphql_parser::Positioned;

use crate::ast::directives::{
    FilterDirective, FoldDirective, OptionalDirective, OutputDirective, OutputSourceDirective,
    RecurseDirective, TagDirective, UniqueDirectives, FILTER_DIRECTIVE, FOLD_DIRECTIVE,
    OPTIONAL_DIRECTIVE, OUTPUT_DIRECTIVE, OUTPUT_SOURCE_DIRECTIVE, RECURSE_DIRECTIVE,
    TAG_DIRECTIVE,
};
use crate::ast::{get_ast_field_name, get_inline_fragment, split_property_and_vertex_fields};
use crate::error::{CompilationError, CompilerError};
use crate::ir::{
    BasicBlock, EdgeDirection, Expression, FoldScopeLocation, IrAndMetadata, Location,
    OutputMetadata, Type,
};
use crate::schema::{get_base_named_type, Schema, TypeEquivalenceHints};
use crate::util::is_safe_name;

use self::context::{CompilationContext, OutputInfo, TagInfo};
use self::filters::{
    is_outer_scope_operator, process_filter_directive, FilterOperationInfo, FilterTarget,
};
use self::validation::validate_query_against_schema;

mod context;
mod filters;
pub(crate) mod validation;

const VERTEX_ONLY_DIRECTIVES: [&str; 4] =
    [OPTIONAL_DIRECTIVE, OUTPUT_SOURCE_DIRECTIVE, RECURSE_DIRECTIVE, FOLD_DIRECTIVE];
const PROPERTY_ONLY_DIRECTIVES: [&str; 2] = [TAG_DIRECTIVE, OUTPUT_DIRECTIVE];
const VERTEX_DIRECTIVES_PROHIBITED_ON_ROOT: [&str; 3] =
    [OPTIONAL_DIRECTIVE, RECURSE_DIRECTIVE, FOLD_DIRECTIVE];

/// Convert the given query text into compiler IR using the given schema.
pub fn graphql_to_ir(
    schema: &Schema,
    graphql_string: impl AsRef<str>,
) -> Result<IrAndMetadata, CompilerError> {
    graphql_to_ir_with_hints(schema, graphql_string, &Default::default())
}

/// Convert the given query text into compiler IR, treating each type named
/// in the hints as equivalent to its union type.
pub fn graphql_to_ir_with_hints(
    schema: &Schema,
    graphql_string: impl AsRef<str>,
    type_equivalence_hints: &TypeEquivalenceHints,
) -> Result<IrAndMetadata, CompilerError> {
    // Trailing newline works around parser behavior on some unterminated inputs.
    let preprocessed = format!("{}\n", graphql_string.as_ref());
    let document = async_graphql_parser::parse_query(preprocessed)?;
    graphql_doc_to_ir(schema, &document, type_equivalence_hints)
}

/// Convert an already-parsed query document into compiler IR.
pub fn graphql_doc_to_ir(
    schema: &Schema,
    document: &ExecutableDocument,
    type_equivalence_hints: &TypeEquivalenceHints,
) -> Result<IrAndMetadata, CompilerError> {
    let root_field = validate_query_against_schema(schema, type_equivalence_hints, document)?;

    let operation = match &document.operations {
        async_graphql_parser::types::DocumentOperations::Single(op) => op,
        async_graphql_parser::types::DocumentOperations::Multiple(_) => {
            unreachable!("multiple operations should have failed validation")
        }
    };
    if operation.node.selection_set.node.items.len() != 1 {
        return Err(CompilationError::MultipleRootSelections.into());
    }

    compile_root_field_to_ir(schema, root_field, type_equivalence_hints)
}

fn compile_root_field_to_ir(
    schema: &Schema,
    root_field: &Positioned<Field>,
    type_equivalence_hints: &TypeEquivalenceHints,
) -> Result<IrAndMetadata, CompilerError> {
    let base_start_type = get_ast_field_name(root_field);
    let root_field_def = schema
        .field(schema.query_type_name(), base_start_type)
        .expect("validation checked the root field");
    let root_type_name: Arc<str> = Arc::from(get_base_named_type(&root_field_def.ty.node));

    let mut context = CompilationContext::new(schema, type_equivalence_hints);
    let location = Location::new(base_start_type.into());

    let mut basic_blocks = vec![BasicBlock::QueryRoot {
        start_types: btreeset! { Arc::from(base_start_type) },
    }];

    // Starting at one type and immediately coercing to another is a contrived
    // pattern; the query should simply start at the coerced-to type.
    if let Some(fragment) = get_inline_fragment(&root_field.node.selection_set)? {
        if let Some(condition) = &fragment.node.type_condition {
            return Err(CompilationError::FragmentAtQueryRoot {
                type_from: base_start_type.to_string(),
                coerce_to: condition.node.on.node.to_string(),
            }
            .into());
        }
    }

    validate_root_vertex_directives(root_field)?;

    let node_blocks = compile_ast_node_to_ir(
        &mut context,
        &NodeContext::Vertex { type_name: root_type_name },
        SelectionNode::Field(root_field),
        location,
    )?;
    basic_blocks.extend(node_blocks);

    basic_blocks.push(compile_output_step(&context)?);

    let output_metadata = context
        .outputs
        .iter()
        .map(|(name, info)| {
            let metadata = OutputMetadata {
                graphql_type: info.output_type.clone(),
                optional: info.optional,
                folded: info.fold.is_some(),
            };
            (name.clone(), metadata)
        })
        .collect();

    Ok(IrAndMetadata {
        ir_blocks: basic_blocks,
        input_metadata: context.inputs,
        output_metadata,
        location_types: context.location_types,
        coerced_locations: context.coerced_locations,
        location_filters: context.location_filters,
    })
}

fn validate_root_vertex_directives(
    root_field: &Positioned<Field>,
) -> Result<(), CompilationError> {
    for directive in &root_field.node.directives {
        let name = directive.node.name.node.as_str();
        if name == FILTER_DIRECTIVE {
            let parsed = FilterDirective::try_from(directive)?;
            if is_outer_scope_operator(&parsed) {
                return Err(CompilationError::OuterScopeFilterOnRootVertex(
                    parsed.op_name.to_string(),
                ));
            }
        } else if VERTEX_DIRECTIVES_PROHIBITED_ON_ROOT.contains(&name) {
            return Err(CompilationError::ProhibitedOnRootVertex(name.to_string()));
        }
    }
    Ok(())
}

/// The schema information for the AST node currently being compiled.
enum NodeContext {
    Vertex { type_name: Arc<str> },
    Property { field_type: Type },
}

/// An AST node the walk can visit: a field, or an inline fragment standing
/// in for the same scope at a coerced type.
#[derive(Clone, Copy)]
enum SelectionNode<'q> {
    Field(&'q Positioned<Field>),
    Fragment(&'q Positioned<InlineFragment>),
}

impl<'q> SelectionNode<'q> {
    fn directives(&self) -> &'q [Positioned<Directive>] {
        match self {
            SelectionNode::Field(field) => &field.node.directives,
            SelectionNode::Fragment(fragment) => &fragment.node.directives,
        }
    }

    fn selection_set(&self) -> &'q Positioned<SelectionSet> {
        match self {
            SelectionNode::Field(field) => &field.node.selection_set,
            SelectionNode::Fragment(fragment) => &fragment.node.selection_set,
        }
    }

    fn field_name(&self) -> Option<&'q str> {
        match self {
            SelectionNode::Field(field) => Some(get_ast_field_name(field)),
            SelectionNode::Fragment(_) => None,
        }
    }
}

fn get_edge_direction_and_name(vertex_field_name: &str) -> (EdgeDirection, Arc<str>) {
    if let Some(edge_name) = vertex_field_name.strip_prefix("out_") {
        (EdgeDirection::Out, edge_name.into())
    } else if let Some(edge_name) = vertex_field_name.strip_prefix("in_") {
        (EdgeDirection::In, edge_name.into())
    } else {
        unreachable!("not a vertex field name: {vertex_field_name}")
    }
}

/// Collect every filter directive that applies to the current scope.
///
/// Outer-scope operators attached to the node itself belong to the parent
/// scope and are skipped; outer-scope operators attached to the node's child
/// vertex fields belong to this scope and are returned.
fn get_local_filter_directives(
    ctx: &CompilationContext<'_>,
    node: SelectionNode<'_>,
    current: &NodeContext,
    vertex_fields: &[&Positioned<Field>],
) -> Result<Vec<FilterOperationInfo>, CompilationError> {
    let mut result = vec![];

    for directive in node.directives() {
        if directive.node.name.node.as_str() != FILTER_DIRECTIVE {
            continue;
        }
        let parsed = FilterDirective::try_from(directive)?;

        if is_outer_scope_operator(&parsed) {
            match current {
                NodeContext::Property { field_type } => {
                    return Err(CompilationError::OuterScopeFilterOnPropertyField(
                        parsed.op_name.to_string(),
                        format!(
                            "{}: {field_type}",
                            node.field_name().unwrap_or("<coercion>")
                        ),
                    ));
                }
                NodeContext::Vertex { .. } => {
                    if matches!(node, SelectionNode::Fragment(_)) {
                        return Err(CompilationError::OuterScopeFilterOnTypeCoercion(
                            parsed.op_name.to_string(),
                        ));
                    }
                    // Valid but non-local: it affects the outer scope vertex
                    // and was already collected there. Skip over it.
                }
            }
            continue;
        }

        let target = match current {
            NodeContext::Property { field_type } => FilterTarget::Property {
                field_name: node
                    .field_name()
                    .expect("property scopes always come from fields")
                    .into(),
                field_type: field_type.clone(),
            },
            NodeContext::Vertex { type_name } => FilterTarget::Vertex {
                field_name: node.field_name().map(Arc::from),
                type_name: type_name.clone(),
            },
        };
        result.push(FilterOperationInfo { directive: parsed, target });
    }

    if let NodeContext::Vertex { type_name } = current {
        for inner_field in vertex_fields {
            for directive in &inner_field.node.directives {
                if directive.node.name.node.as_str() != FILTER_DIRECTIVE {
                    continue;
                }
                let parsed = FilterDirective::try_from(directive)?;
                if !is_outer_scope_operator(&parsed) {
                    continue;
                }

                let inner_field_name = get_ast_field_name(inner_field);
                let inner_field_def = ctx
                    .schema
                    .field(type_name, inner_field_name)
                    .expect("validation checked all fields");
                let inner_type_name: Arc<str> =
                    Arc::from(get_base_named_type(&inner_field_def.ty.node));

                result.push(FilterOperationInfo {
                    directive: parsed,
                    target: FilterTarget::Vertex {
                        field_name: Some(inner_field_name.into()),
                        type_name: inner_type_name,
                    },
                });
            }
        }
    }

    Ok(result)
}

fn compile_ast_node_to_ir(
    ctx: &mut CompilationContext<'_>,
    current: &NodeContext,
    node: SelectionNode<'_>,
    location: Location,
) -> Result<Vec<BasicBlock>, CompilerError> {
    let mut basic_blocks: Vec<BasicBlock> = vec![];

    // step 0: preprocessing
    let local_unique_directives = UniqueDirectives::gather(node.directives())?;
    let (property_fields, vertex_fields) =
        split_property_and_vertex_fields(node.selection_set())?;
    let fragment = get_inline_fragment(node.selection_set())?;

    let filter_operations =
        get_local_filter_directives(ctx, node, current, &vertex_fields)?;

    // Type coercion while also selecting fields is not supported: either
    // there are no fields, or there is no fragment.
    let fields_exist = !property_fields.is_empty() || !vertex_fields.is_empty();
    if fragment.is_some() && fields_exist {
        return Err(CompilationError::FragmentWithSiblingFields.into());
    }

    if location.field.is_some() {
        assert!(
            fragment.is_none(),
            "found an inline fragment at a property field: {location}"
        );
        assert!(
            property_fields.is_empty() && vertex_fields.is_empty(),
            "found child fields under a property field: {location}"
        );
    }

    // step 1: apply local filters, if any
    for filter_operation in &filter_operations {
        basic_blocks.push(process_filter_directive(ctx, filter_operation, &location)?);
    }

    if location.field.is_some() {
        let field_type = match current {
            NodeContext::Property { field_type } => field_type,
            NodeContext::Vertex { .. } => {
                unreachable!("field-terminated location in a vertex scope: {location}")
            }
        };
        compile_property_ast(ctx, field_type, &location, &local_unique_directives)?;
    } else if let Some(fragment) = fragment {
        let type_name = match current {
            NodeContext::Vertex { type_name } => type_name,
            NodeContext::Property { .. } => {
                unreachable!("vertex location in a property scope: {location}")
            }
        };
        basic_blocks.extend(compile_fragment_ast(ctx, type_name, fragment, location)?);
    } else {
        let type_name = match current {
            NodeContext::Vertex { type_name } => type_name.clone(),
            NodeContext::Property { .. } => {
                unreachable!("vertex location in a property scope: {location}")
            }
        };
        basic_blocks.extend(compile_vertex_ast(
            ctx,
            &type_name,
            location,
            &local_unique_directives,
            property_fields,
            vertex_fields,
        )?);
    }

    Ok(basic_blocks)
}

/// Step P-2: process property-only directives, updating tags and outputs.
fn compile_property_ast(
    ctx: &mut CompilationContext<'_>,
    field_type: &Type,
    location: &Location,
    unique_directives: &UniqueDirectives<'_>,
) -> Result<(), CompilationError> {
    for directive_name in unique_directives.unique.keys() {
        if VERTEX_ONLY_DIRECTIVES.contains(directive_name) {
            return Err(CompilationError::VertexDirectiveOnProperty(
                directive_name.to_string(),
                location.to_string(),
            ));
        }
    }

    if let Some(directive) = unique_directives.get(TAG_DIRECTIVE) {
        let tag = TagDirective::try_from(directive)?;

        if ctx.is_in_fold_scope() {
            return Err(CompilationError::TagWithinFold(location.to_string()));
        }
        if ctx.tags.contains_key(&tag.name) {
            return Err(CompilationError::TagNameReuse(tag.name.to_string()));
        }
        if !is_safe_name(&tag.name) {
            return Err(CompilationError::InvalidName(tag.name.to_string()));
        }

        ctx.tags.insert(
            tag.name,
            TagInfo {
                location: location.clone(),
                optional: ctx.is_in_optional_scope(),
                tag_type: field_type.with_nullability(true),
            },
        );
    }

    if let Some(directive) = unique_directives.get(OUTPUT_DIRECTIVE) {
        let output = OutputDirective::try_from(directive)?;

        if ctx.outputs.contains_key(&output.name) {
            return Err(CompilationError::OutputNameReuse(output.name.to_string()));
        }
        if !is_safe_name(&output.name) {
            return Err(CompilationError::InvalidName(output.name.to_string()));
        }

        let mut graphql_type = field_type.with_nullability(true);
        if ctx.is_in_fold_scope() {
            graphql_type = Type::new_list_type(graphql_type, true);
            // Fold outputs are only allowed at the last level of traversal.
            ctx.fold_innermost_scope = true;
        }

        ctx.outputs.insert(
            output.name,
            OutputInfo {
                location: location.clone(),
                optional: ctx.is_in_optional_scope(),
                output_type: graphql_type,
                fold: ctx.current_fold.clone(),
            },
        );
    }

    Ok(())
}

/// Step F-2: emit a type coercion block if one is needed, then recurse into
/// the fragment's selections.
fn compile_fragment_ast(
    ctx: &mut CompilationContext<'_>,
    current_type_name: &Arc<str>,
    fragment: &Positioned<InlineFragment>,
    location: Location,
) -> Result<Vec<BasicBlock>, CompilerError> {
    let coerces_to: Arc<str> = match &fragment.node.type_condition {
        Some(condition) => Arc::from(condition.node.on.node.as_str()),
        None => current_type_name.clone(),
    };

    let mut basic_blocks = vec![];

    // No coercion is necessary when coercing to the type of the enclosing
    // scope, or when the scope is of union type and the fragment's type is
    // equivalent to that union per the equivalence hints.
    let is_same_type_as_scope = coerces_to == *current_type_name;
    let is_base_type_of_union = ctx.schema.is_union_type(current_type_name)
        && ctx.type_equivalence_hints.get(&coerces_to) == Some(current_type_name);

    if !(is_same_type_as_scope || is_base_type_of_union) {
        ctx.coerced_locations.insert(location.clone());
        basic_blocks.push(BasicBlock::CoerceType {
            target_types: btreeset! { coerces_to.clone() },
        });
    }

    let inner_blocks = compile_ast_node_to_ir(
        ctx,
        &NodeContext::Vertex { type_name: coerces_to },
        SelectionNode::Fragment(fragment),
        location,
    )?;
    basic_blocks.extend(inner_blocks);

    Ok(basic_blocks)
}

fn validate_vertex_field_directive_interactions(
    location: &Location,
    directives: &UniqueDirectives<'_>,
) -> Result<(), CompilationError> {
    let exclusive_pairs = [
        (FOLD_DIRECTIVE, OPTIONAL_DIRECTIVE),
        (FOLD_DIRECTIVE, OUTPUT_SOURCE_DIRECTIVE),
        (FOLD_DIRECTIVE, RECURSE_DIRECTIVE),
        (OPTIONAL_DIRECTIVE, OUTPUT_SOURCE_DIRECTIVE),
        (OPTIONAL_DIRECTIVE, RECURSE_DIRECTIVE),
    ];

    for (first, second) in exclusive_pairs {
        if directives.get(first).is_some() && directives.get(second).is_some() {
            return Err(CompilationError::MutuallyExclusiveDirectives(
                first.to_string(),
                second.to_string(),
                location.to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_vertex_field_directive_in_context(
    ctx: &CompilationContext<'_>,
    location: &Location,
    directives: &UniqueDirectives<'_>,
) -> Result<(), CompilationError> {
    let fold_directive = directives.get(FOLD_DIRECTIVE);

    if ctx.is_in_fold_scope() {
        for directive_name in
            [FOLD_DIRECTIVE, OPTIONAL_DIRECTIVE, OUTPUT_SOURCE_DIRECTIVE, RECURSE_DIRECTIVE]
        {
            if directives.get(directive_name).is_some() {
                return Err(CompilationError::DirectiveWithinFold(
                    directive_name.to_string(),
                    location.to_string(),
                ));
            }
        }
    }

    if ctx.has_encountered_output_source() && fold_directive.is_none() {
        return Err(CompilationError::TraversalAfterOutputSource(location.to_string()));
    }

    if ctx.is_in_optional_scope() {
        for directive_name in [OPTIONAL_DIRECTIVE, FOLD_DIRECTIVE, OUTPUT_SOURCE_DIRECTIVE] {
            if directives.get(directive_name).is_some() {
                return Err(CompilationError::DirectiveWithinOptional(
                    directive_name.to_string(),
                    location.to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_recurse_directive_types(
    ctx: &CompilationContext<'_>,
    current_type_name: &str,
    edge_type_name: &str,
) -> Result<(), CompilationError> {
    let is_same_type = current_type_name == edge_type_name;

    let is_implemented_interface = ctx.schema.is_interface_type(edge_type_name)
        && ctx.schema.is_named_type_subtype(edge_type_name, current_type_name);

    let is_equivalent_union = ctx.schema.is_union_type(edge_type_name)
        && (ctx.type_equivalence_hints.get(current_type_name).map(|u| u.as_ref())
            == Some(edge_type_name)
            || ctx.schema.is_named_type_subtype(edge_type_name, current_type_name));

    if !(is_same_type || is_implemented_interface || is_equivalent_union) {
        return Err(CompilationError::RecurseTypeMismatch(
            current_type_name.to_string(),
            edge_type_name.to_string(),
        ));
    }

    Ok(())
}

/// Steps V-2 through V-4: compile the vertex's property children, mark the
/// location, then step into each child vertex field in order.
fn compile_vertex_ast(
    ctx: &mut CompilationContext<'_>,
    current_type_name: &Arc<str>,
    mut location: Location,
    unique_directives: &UniqueDirectives<'_>,
    property_fields: Vec<&Positioned<Field>>,
    vertex_fields: Vec<&Positioned<Field>>,
) -> Result<Vec<BasicBlock>, CompilerError> {
    let mut basic_blocks: Vec<BasicBlock> = vec![];

    for directive_name in unique_directives.unique.keys() {
        if PROPERTY_ONLY_DIRECTIVES.contains(directive_name) {
            return Err(CompilationError::PropertyDirectiveOnVertex(
                directive_name.to_string(),
                location.to_string(),
            )
            .into());
        }
    }

    // step V-2: step into property fields
    for property_field in property_fields {
        let field_name = get_ast_field_name(property_field);
        let field_def = ctx
            .schema
            .field(current_type_name, field_name)
            .expect("validation checked all fields");
        let property_type = Type::from_type(&field_def.ty.node);

        let inner_location = location.navigate_to_field(field_name);
        let inner_blocks = compile_ast_node_to_ir(
            ctx,
            &NodeContext::Property { field_type: property_type },
            SelectionNode::Field(property_field),
            inner_location,
        )?;
        basic_blocks.extend(inner_blocks);
    }

    // The stack must come back to this size before this function returns.
    let initial_marked_location_stack_size = ctx.marked_location_stack.len();

    // step V-3: mark the position, and process @output_source if present.
    // Folded scopes are never actually visited, so they are not marked.
    if !ctx.is_in_fold_scope() {
        ctx.location_types.insert(location.clone(), current_type_name.clone());
        basic_blocks.push(BasicBlock::MarkLocation(location.clone()));
        ctx.marked_location_stack.push((location.clone(), 0));
    }

    if let Some(directive) = unique_directives.get(OUTPUT_SOURCE_DIRECTIVE) {
        OutputSourceDirective::try_from(directive)?;
        if ctx.has_encountered_output_source() {
            return Err(CompilationError::MultipleOutputSources.into());
        }
        if ctx.is_in_optional_scope() {
            return Err(CompilationError::OutputSourceInsideOptional.into());
        }
        ctx.output_source = Some(location.clone());
        basic_blocks.push(BasicBlock::OutputSource);
    }

    // step V-4: step into vertex fields
    for vertex_field in vertex_fields {
        let field_name = get_ast_field_name(vertex_field);
        let inner_location = location.navigate_to_subpath(field_name);
        ctx.validate_visiting_vertex_field(&inner_location)?;

        let field_def = ctx
            .schema
            .field(current_type_name, field_name)
            .expect("validation checked all fields");
        let field_type_name: Arc<str> = Arc::from(get_base_named_type(&field_def.ty.node));

        let inner_unique_directives = UniqueDirectives::gather(&vertex_field.node.directives)?;
        validate_vertex_field_directive_interactions(&inner_location, &inner_unique_directives)?;
        validate_vertex_field_directive_in_context(ctx, &inner_location, &inner_unique_directives)?;

        let recurse_directive = inner_unique_directives.get(RECURSE_DIRECTIVE);
        let optional_directive = inner_unique_directives.get(OPTIONAL_DIRECTIVE);
        let fold_directive = inner_unique_directives.get(FOLD_DIRECTIVE);
        let mut in_topmost_optional_block = false;

        let edge_traversal_is_optional = optional_directive.is_some();

        // True for any edge expanded within an @optional scope. @optional
        // does not nest, so the optional edge itself is excluded.
        let within_optional_scope = ctx.is_in_optional_scope() && !edge_traversal_is_optional;

        if let Some(directive) = optional_directive {
            OptionalDirective::try_from(directive)?;

            // Entering an optional block. Make sure there is a marked location
            // right before it for the optional Backtrack to jump back to;
            // otherwise the traversal could rewind to an older mark and ignore
            // entire stretches of applied filtering.
            let (_, num_traverses) = ctx
                .marked_location_stack
                .last()
                .expect("optional edges appear under some marked vertex");
            if *num_traverses > 0 {
                location = location.revisit();
                ctx.location_types.insert(location.clone(), current_type_name.clone());
                basic_blocks.push(BasicBlock::MarkLocation(location.clone()));
                ctx.marked_location_stack.pop();
                ctx.marked_location_stack.push((location.clone(), 0));
            }

            if ctx.current_optional.is_none() {
                ctx.current_optional = Some(inner_location.clone());
                in_topmost_optional_block = true;
            }
        }

        let (edge_direction, edge_name) = get_edge_direction_and_name(field_name);

        let saved_fold_scope = ctx.current_fold.clone();
        if let Some(directive) = fold_directive {
            FoldDirective::try_from(directive)?;
            let (current_location, _) = ctx
                .marked_location_stack
                .last()
                .expect("folds appear under some marked vertex");
            let fold_scope_location =
                FoldScopeLocation::new(current_location.clone(), edge_direction, edge_name);
            basic_blocks.push(BasicBlock::Fold(fold_scope_location.clone()));
            ctx.current_fold = Some(fold_scope_location);
        } else if let Some(directive) = recurse_directive {
            let recurse = RecurseDirective::try_from(directive)?;
            validate_recurse_directive_types(ctx, current_type_name, &field_type_name)?;
            basic_blocks.push(BasicBlock::Recurse {
                direction: edge_direction,
                edge_name,
                depth: recurse.depth,
                within_optional_scope,
            });
        } else {
            // Traversing deeper inside a fold extends the fold's inner path.
            let extended_fold_scope = ctx
                .current_fold
                .as_ref()
                .map(|fold_scope| fold_scope.navigate_to_subpath(edge_direction, edge_name.clone()));
            if extended_fold_scope.is_some() {
                ctx.current_fold = extended_fold_scope;
            }
            basic_blocks.push(BasicBlock::Traverse {
                direction: edge_direction,
                edge_name,
                optional: edge_traversal_is_optional,
                within_optional_scope,
            });
        }

        if fold_directive.is_none() && !ctx.is_in_fold_scope() {
            // A Traverse or Recurse block was emitted outside any fold:
            // count it against the enclosing mark.
            let (_, num_traverses) = ctx
                .marked_location_stack
                .last_mut()
                .expect("stack entry was pushed in step V-3");
            *num_traverses += 1;
        }

        let inner_blocks = compile_ast_node_to_ir(
            ctx,
            &NodeContext::Vertex { type_name: field_type_name },
            SelectionNode::Field(vertex_field),
            inner_location,
        )?;
        basic_blocks.extend(inner_blocks);

        if fold_directive.is_some() {
            let fold_scope = ctx
                .current_fold
                .as_ref()
                .expect("the fold scope was set when the fold was opened");
            validate_fold_has_outputs(ctx, fold_scope)?;
            basic_blocks.push(BasicBlock::Unfold);
            assert!(
                ctx.fold_innermost_scope,
                "fold with outputs did not flag its innermost scope: {fold_scope}"
            );
            ctx.current_fold = None;
            ctx.fold_innermost_scope = false;
        } else if ctx.is_in_fold_scope() {
            ctx.current_fold = saved_fold_scope;
        }

        if in_topmost_optional_block {
            basic_blocks.push(BasicBlock::EndOptional);
            ctx.current_optional = None;
        }

        // A @fold vertex was never traversed into, so there is nothing to
        // backtrack out of. The same goes for everything after @output_source.
        let backtracking_required =
            fold_directive.is_none() && !ctx.has_encountered_output_source();
        if backtracking_required {
            if edge_traversal_is_optional {
                basic_blocks
                    .push(BasicBlock::Backtrack { location: location.clone(), optional: true });

                // Exiting the optional block: mark the position right after it,
                // so that later Backtrack blocks return to a position that
                // includes the optional set of blocks.
                location = location.revisit();
                ctx.location_types.insert(location.clone(), current_type_name.clone());
                basic_blocks.push(BasicBlock::MarkLocation(location.clone()));
                ctx.marked_location_stack.pop();
                ctx.marked_location_stack.push((location.clone(), 0));
            } else {
                basic_blocks
                    .push(BasicBlock::Backtrack { location: location.clone(), optional: false });
            }
        }
    }

    if !ctx.is_in_fold_scope() {
        ctx.marked_location_stack.pop();
    }

    assert_eq!(
        initial_marked_location_stack_size,
        ctx.marked_location_stack.len(),
        "marked-location stack size changed while compiling vertex at {location}",
    );

    Ok(basic_blocks)
}

fn validate_fold_has_outputs(
    ctx: &CompilationContext<'_>,
    fold_scope: &FoldScopeLocation,
) -> Result<(), CompilationError> {
    let opening_edge = &fold_scope.fold_path[0];
    let has_outputs = ctx.outputs.values().any(|output| {
        output
            .fold
            .as_ref()
            .map(|fold| {
                fold.base_location == fold_scope.base_location
                    && fold.fold_path.first() == Some(opening_edge)
            })
            .unwrap_or(false)
    });

    if has_outputs {
        Ok(())
    } else {
        Err(CompilationError::FoldWithoutOutput(fold_scope.to_string()))
    }
}

/// Construct the final `ConstructResult` block defining the query's outputs.
fn compile_output_step(ctx: &CompilationContext<'_>) -> Result<BasicBlock, CompilationError> {
    if ctx.outputs.is_empty() {
        return Err(CompilationError::NoOutputsSelected);
    }

    let mut output_fields: BTreeMap<Arc<str>, Expression> = Default::default();
    for (output_name, output) in &ctx.outputs {
        let expression = match &output.fold {
            Some(fold_scope) => {
                assert!(!output.optional, "unreachable: optional output in fold {fold_scope}");

                let field_name = output
                    .location
                    .field
                    .clone()
                    .expect("outputs are always declared at property fields");
                Expression::FoldedOutputContextField {
                    fold_scope: fold_scope.clone(),
                    field_name,
                    field_type: output.output_type.clone(),
                }
            }
            None => {
                let output_field = Expression::OutputContextField {
                    location: output.location.clone(),
                    field_type: output.output_type.clone(),
                };

                if output.optional {
                    Expression::TernaryConditional {
                        predicate: Box::new(Expression::ContextFieldExistence {
                            vertex_location: output.location.at_vertex(),
                        }),
                        if_true: Box::new(output_field),
                        if_false: Box::new(Expression::NullLiteral),
                    }
                } else {
                    output_field
                }
            }
        };

        output_fields.insert(output_name.clone(), expression);
    }

    Ok(BasicBlock::ConstructResult(output_fields))
}
