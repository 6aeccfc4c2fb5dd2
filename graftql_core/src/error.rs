//! Error types produced while turning query text into IR.
//!
//! Every error kind distinguishes a different stage of processing:
//! syntax ([`ParseError`]), schema conformance ([`ValidationError`]),
//! semantic analysis ([`CompilationError`]), macro edge definitions
//! ([`InvalidMacroError`]), and argument values ([`InvalidArgumentError`]).
//! Bugs in the compiler itself are not represented here; those abort
//! via panics with an internal-error message.
use serde::{Deserialize, Serialize};

use crate::ir::FieldValue;

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, thiserror::Error)]
pub enum CompilerError {
    #[error("Query failed to parse.")]
    Parse(#[from] ParseError),

    #[error("The query failed to validate against the schema.")]
    Validation(#[from] ValidationError),

    #[error("The query could not be compiled.")]
    Compilation(#[from] CompilationError),

    #[error("The macro edge definition is invalid.")]
    InvalidMacro(#[from] InvalidMacroError),

    #[error("An argument value has an invalid type.")]
    InvalidArgument(#[from] InvalidArgumentError),
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, thiserror::Error)]
pub enum ParseError {
    #[error("{0}")]
    InvalidGraphQL(String),
}

impl From<async_graphql_parser::Error> for ParseError {
    fn from(e: async_graphql_parser::Error) -> Self {
        // The parser library's error type is neither serializable nor comparable,
        // so we keep its rendered form.
        Self::InvalidGraphQL(e.to_string())
    }
}

impl From<async_graphql_parser::Error> for CompilerError {
    fn from(e: async_graphql_parser::Error) -> Self {
        Self::Parse(e.into())
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, thiserror::Error)]
pub enum ValidationError {
    #[error("The referenced path does not exist in the schema: {0:?}")]
    NonExistentPath(Vec<String>),

    #[error("The referenced type does not exist in the schema: {0}")]
    NonExistentType(String),

    #[error(
        "Attempted to coerce type {0} into type {1}, but type {1} is not a subtype of {0}. \
        This is not allowed."
    )]
    CannotCoerceToUnrelatedType(String, String),

    #[error("Vertex field {0} must have a selection set, but it has none.")]
    VertexFieldWithoutSelections(String),

    #[error("Property field {0} resolves to a scalar and cannot have a selection set.")]
    PropertyFieldWithSelections(String),

    #[error("Directive @{0} is a default GraphQL directive that this compiler does not support.")]
    UnsupportedDefaultDirective(String),

    #[error("Unrecognized directive @{0}.")]
    UnrecognizedDirective(String),

    #[error("Directive @{0} is used by the compiler but is not declared in the schema.")]
    DirectiveNotDeclaredInSchema(String),

    #[error("Input contains multiple operation blocks, this is not supported.")]
    MultipleOperationsInDocument,

    #[error("Input is not a query operation.")]
    DocumentNotAQuery,

    #[error("Input contains non-inline fragments, this is not supported.")]
    DocumentContainsNonInlineFragments,

    #[error(
        "Found GraphQL query variable definitions. These are not necessary since variables \
        are defined implicitly, and must be removed."
    )]
    VariableDefinitionInQuery,

    #[error("Found directive @{0} applied on or outside the query root, which is not supported.")]
    DirectiveOutsideQueryRoot(String),

    #[error("The root selection of a query must be a field.")]
    QueryRootMustBeAField,

    #[error("Directive @{0} may not be applied to an inline fragment.")]
    DirectiveNotAllowedOnFragment(String),
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, thiserror::Error)]
pub enum CompilationError {
    #[error("Encountered repeated field name: {0}")]
    DuplicateField(String),

    #[error("Encountered property field {0} after vertex fields.")]
    PropertyFieldAfterVertexField(String),

    #[error("Cannot compile a selection set with more than one inline fragment.")]
    MultipleFragments,

    #[error(
        "Cannot compile GraphQL that has an inline fragment and selected fields in the same \
        selection. Please move the selected fields inside the inline fragment."
    )]
    FragmentWithSiblingFields,

    #[error(
        "Found an inline fragment coercing to type {coerce_to}, immediately inside the query \
        root asking for type {type_from}. This is a contrived pattern -- you should simply \
        start your query at {coerce_to}."
    )]
    FragmentAtQueryRoot { type_from: String, coerce_to: String },

    #[error("Cannot process a query with more than one root selection.")]
    MultipleRootSelections,

    #[error("Found prohibited directive @{0} on the root vertex.")]
    ProhibitedOnRootVertex(String),

    #[error("Directive @{0} was unexpectedly applied twice in the same location.")]
    DuplicatedDirective(String),

    #[error("Directive @{0} is missing its required argument {1}.")]
    MissingRequiredDirectiveArgument(String, String),

    #[error("Directive @{0} received unrecognized argument {1}.")]
    UnrecognizedDirectiveArgument(String, String),

    #[error("Directive @{0} received duplicated argument {1}.")]
    DuplicatedDirectiveArgument(String, String),

    #[error("Directive @{0} received a value of inappropriate type for argument {1}.")]
    InappropriateTypeForDirectiveArgument(String, String),

    #[error(
        "The value argument of the @filter directive is a string instead of a list. \
        Did you mean to write '@filter(op_name: \"{0}\", value: [\"{1}\"])' instead?"
    )]
    FilterExpectsListNotString(String, String),

    #[error("Found vertex-only directive @{0} set on property field at {1}.")]
    VertexDirectiveOnProperty(String, String),

    #[error("Found property-only directive @{0} set on vertex field at {1}.")]
    PropertyDirectiveOnVertex(String, String),

    #[error("Name \"{0}\" contains invalid characters or starts with a digit.")]
    InvalidName(String),

    #[error("Cannot reuse tag name: {0}")]
    TagNameReuse(String),

    #[error("Cannot reuse output name: {0}")]
    OutputNameReuse(String),

    #[error("Tagging values within a @fold vertex field is not allowed. Location: {0}")]
    TagWithinFold(String),

    #[error("@{0} and @{1} may not appear on the same vertex field. Location: {2}")]
    MutuallyExclusiveDirectives(String, String, String),

    #[error("@{0} is not allowed within a @fold traversal. Location: {1}")]
    DirectiveWithinFold(String, String),

    #[error("@{0} is not allowed within an @optional traversal. Location: {1}")]
    DirectiveWithinOptional(String, String),

    #[error("Found non-fold vertex field after the vertex marked as output source. Location: {0}")]
    TraversalAfterOutputSource(String),

    #[error(
        "Traversing inside a @fold block after outputting fields is not supported. Location: {0}"
    )]
    TraversalAfterFoldOutput(String),

    #[error("Cannot have more than one output source.")]
    MultipleOutputSources,

    #[error("Cannot have the output source inside an optional block.")]
    OutputSourceInsideOptional,

    #[error(
        "Each @fold scope must contain at least one field marked @output. \
        Encountered a @fold with no outputs: {0}"
    )]
    FoldWithoutOutput(String),

    #[error(
        "No fields were selected for output. Please mark at least one field \
        with the @output directive."
    )]
    NoOutputsSelected,

    #[error("Found @recurse directive with disallowed depth: {0}")]
    RecurseDepthTooShallow(u64),

    #[error(
        "Edges expanded with a @recurse directive must either be of union type equivalent to \
        their enclosing scope, or be of the same type as their enclosing scope, or be of an \
        interface type that is implemented by the type of their enclosing scope. \
        Enclosing scope type: {0}, edge type: {1}"
    )]
    RecurseTypeMismatch(String, String),

    #[error("Unrecognized filter operator: {0}")]
    UnsupportedFilterOperator(String),

    #[error("Filter operator \"{0}\" expected {1} arguments but received {2}.")]
    FilterArgumentCountMismatch(String, usize, usize),

    #[error(
        "Invalid argument found: {0}. Only runtime arguments (starting with '$') and tagged \
        arguments (starting with '%') are supported; literal arguments are not. Please use a \
        runtime argument and pass the literal value as a query parameter."
    )]
    LiteralFilterArgument(String),

    #[error("Filter argument \"{0}\" is not a valid name after its '{1}' prefix.")]
    InvalidFilterArgumentName(String, String),

    #[error("Filter at {0} uses undeclared tag: %{1}")]
    UndefinedTagInFilter(String, String),

    #[error(
        "The inferred type of the matching @tag directive does not match the inferred required \
        type for this filter: {tag_type} vs {required_type} (tag %{tag_name})."
    )]
    TagTypeMismatch { tag_name: String, tag_type: String, required_type: String },

    #[error(
        "Incompatible types inferred for argument ${0}. The argument cannot simultaneously \
        be {1} and {2}."
    )]
    IncompatibleVariableTypes(String, String, String),

    #[error("Cannot apply \"{0}\" filter to non-leaf field \"{1}\" of type {2}.")]
    NonLeafComparisonField(String, String, String),

    #[error("Cannot apply \"{0}\" filter to non-list field \"{1}\" of type {2}.")]
    ListFilterOnNonListField(String, String, String),

    #[error(
        "Cannot apply \"contains\" to String-typed field \"{0}\". \
        Consider using the \"has_substring\" operator instead."
    )]
    ContainsOnStringField(String),

    #[error("Cannot apply \"{0}\" filter to non-string field \"{1}\" of type {2}.")]
    StringFilterOnNonStringField(String, String, String),

    #[error("Cannot apply \"{0}\" filter to non-vertex field: {1}")]
    VertexFilterOnNonVertexField(String, String),

    #[error("Found disallowed filter \"{0}\" on a property field: {1}")]
    OuterScopeFilterOnPropertyField(String, String),

    #[error("Found disallowed filter \"{0}\" on a type coercion.")]
    OuterScopeFilterOnTypeCoercion(String),

    #[error("Found a filter directive with operator \"{0}\" which is not allowed on the root vertex.")]
    OuterScopeFilterOnRootVertex(String),

    #[error("The filter with op_name \"{0}\" must be applied on a field, not on a type coercion.")]
    FilterMustApplyToField(String),

    #[error("Cannot apply \"name_or_alias\" to union type {0}.")]
    NameOrAliasOnUnion(String),

    #[error("Cannot apply \"name_or_alias\" to type {0} because it lacks a \"{1}\" field.")]
    NameOrAliasMissingField(String, String),

    #[error(
        "Cannot apply \"name_or_alias\" to type {0}: its \"name\" field and the inner type \
        of its \"alias\" field do not match: {1} vs {2}"
    )]
    NameOrAliasFieldTypeMismatch(String, String, String),

    #[error("Cannot apply \"name_or_alias\" to type {0} because its \"name\" field is not a scalar.")]
    NameOrAliasNameNotScalar(String),

    #[error("Cannot apply \"name_or_alias\" to type {0} because its \"alias\" field is not a list.")]
    NameOrAliasAliasNotList(String),

    #[error(
        "The \"has_edge_degree\" filter only supports runtime variable arguments. \
        Tagged values are not supported. Argument name: {0}"
    )]
    HasEdgeDegreeRequiresRuntimeArgument(String),

    #[error(
        "Encountered a @{0} directive applied to the {1} macro edge, which is not supported \
        by the macro system. Only @filter may be applied to a macro edge."
    )]
    UnsupportedDirectiveOnMacroEdge(String, String),

    #[error(
        "Macro edge expansion results in a query traversing the same edge {0} twice, \
        which is disallowed."
    )]
    DuplicateEdgeInMacroExpansion(String),

    #[error(
        "Macro edge expansion results in field {0} having two @tag directives, \
        which is disallowed."
    )]
    DuplicateTagInMacroExpansion(String),

    #[error(
        "Found selections outside a type coercion. Please move them inside the coercion. \
        Error near field named: {0}"
    )]
    SelectionsOutsideTypeCoercion(String),

    #[error(
        "Attempting to coerce a value of type {field_type} (from field named {field_name}) \
        to incompatible type {coercion_type}, which is not a subtype of {field_type}. \
        Only coercions to a subtype are allowed."
    )]
    InvalidCoercionInMacroExpansion {
        field_type: String,
        field_name: String,
        coercion_type: String,
    },

    #[error("Cannot merge selections into a scope that already contains a type coercion: {0}")]
    MergeIntoCoercedScope(String),

    #[error(
        "The query supplies an argument named \"{0}\" which collides with an argument \
        pre-bound by an expanded macro edge."
    )]
    OverlappingMacroArguments(String),
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, thiserror::Error)]
pub enum InvalidMacroError {
    #[error("Macro edge definitions must contain exactly one operation block.")]
    MultipleOperationsInDefinition,

    #[error("Macro edge definitions must be query operations.")]
    DefinitionNotAQuery,

    #[error(
        "Unexpectedly found directives at the top level of the macro definition, \
        this is not supported: {0:?}"
    )]
    TopLevelDirectivesInDefinition(Vec<String>),

    #[error(
        "Unexpectedly found variable definitions at the top level of the macro definition, \
        this is not supported."
    )]
    TopLevelVariableDefinitions,

    #[error("Expected the macro definition to have exactly one top-level selection, found {0}.")]
    NotExactlyOneTopLevelSelection(usize),

    #[error(
        "Required macro edge directive \"@{0}\" was not found anywhere within the supplied \
        macro edge definition."
    )]
    MissingMacroDirective(String),

    #[error(
        "Required macro edge directive \"@{0}\" was unexpectedly present more than once in \
        the supplied macro edge definition. It was found {1} times."
    )]
    DuplicatedMacroDirective(String, usize),

    #[error("The @macro_edge_definition directive must appear on the top-level selection.")]
    DefinitionDirectiveNotOnRoot,

    #[error("The @macro_edge_definition directive requires a string-valued \"name\" argument.")]
    DefinitionDirectiveMissingName,

    #[error("Directive \"@{0}\" must not appear inside a macro edge definition.")]
    ForbiddenDirectiveInDefinition(String),

    #[error("Macro edge names must start with \"out_\" or \"in_\": {0}")]
    InvalidMacroEdgeName(String),

    #[error(
        "Macro edge {edge_name} conflicts with an existing field of the same name \
        on type {class_name} or one of its subclasses."
    )]
    MacroShadowsRealField { class_name: String, edge_name: String },

    #[error(
        "A macro edge with name {edge_name} cannot be defined on type {class_name} due to a \
        conflict with another macro edge of the same name defined on type {conflicting_class}. \
        Rename your macro edge to avoid the conflict."
    )]
    ConflictingMacroDefinition {
        class_name: String,
        edge_name: String,
        conflicting_class: String,
    },

    #[error(
        "A macro edge with name {edge_name} cannot be defined to point to type \
        {target_class} due to a conflict with another macro edge of the same name pointing \
        to type {conflicting_class}. Rename your macro edge to avoid the conflict."
    )]
    ConflictingMacroTarget {
        target_class: String,
        edge_name: String,
        conflicting_class: String,
    },

    #[error(
        "The macro edge {edge_name} from {base_class} to {target_class} is invalid due to a \
        reversibility conflict: the reversed macro edge {reverse_edge_name} already exists \
        with endpoints {conflicting_base} to {conflicting_target}, which do not match."
    )]
    ReversalConflict {
        edge_name: String,
        base_class: String,
        target_class: String,
        reverse_edge_name: String,
        conflicting_base: String,
        conflicting_target: String,
    },

    #[error(
        "The macro edge arguments do not match the variables used in the definition. \
        Missing: {missing:?}, unexpected: {unexpected:?}"
    )]
    ArgumentSetMismatch { missing: Vec<String>, unexpected: Vec<String> },

    #[error(
        "Macro edge definitions must contain at least one property field so their \
        arguments can be type-checked."
    )]
    NoPropertyFieldInDefinition,

    #[error("The base class of the macro definition is not queryable: {0}")]
    BaseClassNotQueryable(String),

    #[error("Could not determine the type at the @macro_edge_target directive.")]
    TargetTypeNotFound,

    #[error("The macro edge definition failed to compile: {0}")]
    DefinitionFailedToCompile(String),
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, thiserror::Error)]
pub enum InvalidArgumentError {
    #[error("Argument \"{name}\" was expected to have type {expected_type}, but has value {value:?}.")]
    InvalidArgumentType { name: String, expected_type: String, value: FieldValue },
}
