//! The intermediate representation: a flat sequence of basic blocks with
//! embedded expression trees, together with the location vocabulary used
//! to name positions within the query.
pub mod ty;
pub mod value;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use ty::{InnerType, Type};
pub use value::{is_argument_type_valid, FieldValue};

/// The direction of an edge traversal: `out_*` or `in_*` vertex fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeDirection {
    Out,
    In,
}

impl Display for EdgeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeDirection::Out => write!(f, "out"),
            EdgeDirection::In => write!(f, "in"),
        }
    }
}

/// A point in the query: a non-empty path of type/edge names, an optional
/// terminal field, and a visit counter distinguishing re-entries.
///
/// Locations are values: two locations are equal iff their path, field,
/// and visit counter are all equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub query_path: Vec<Arc<str>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Arc<str>>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub visit_counter: u32,
}

fn is_zero(counter: &u32) -> bool {
    *counter == 0
}

impl Location {
    pub fn new(root: Arc<str>) -> Location {
        Location { query_path: vec![root], field: None, visit_counter: 0 }
    }

    /// Append an edge step, returning the location of the vertex it reaches.
    pub fn navigate_to_subpath(&self, edge: &str) -> Location {
        assert!(self.field.is_none(), "cannot traverse an edge from a property field: {self}");
        let mut query_path = self.query_path.clone();
        query_path.push(edge.into());
        Location { query_path, field: None, visit_counter: 0 }
    }

    /// Attach a terminal field, returning the location of that property.
    pub fn navigate_to_field(&self, field: &str) -> Location {
        assert!(self.field.is_none(), "location already has a field: {self}");
        Location {
            query_path: self.query_path.clone(),
            field: Some(field.into()),
            visit_counter: self.visit_counter,
        }
    }

    /// The same vertex, visited one more time. Used when a vertex must be
    /// re-marked, for example after returning from an `@optional` traversal.
    pub fn revisit(&self) -> Location {
        assert!(self.field.is_none(), "cannot revisit a property field: {self}");
        Location {
            query_path: self.query_path.clone(),
            field: None,
            visit_counter: self.visit_counter + 1,
        }
    }

    /// Strip the terminal field, if any, returning the enclosing vertex location.
    pub fn at_vertex(&self) -> Location {
        Location {
            query_path: self.query_path.clone(),
            field: None,
            visit_counter: self.visit_counter,
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({}", self.query_path.join(" -> "))?;
        if let Some(field) = &self.field {
            write!(f, " . {field}")?;
        }
        if self.visit_counter > 0 {
            write!(f, " *{}", self.visit_counter)?;
        }
        write!(f, ")")
    }
}

/// A position within a `@fold` scope: the location of the vertex that the
/// fold hangs off of, plus the edge that opened the fold followed by any
/// traversal steps taken inside the fold.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FoldScopeLocation {
    pub base_location: Location,

    /// Non-empty; the first entry is the edge the fold was opened over,
    /// the rest is the inner path within the fold.
    pub fold_path: Vec<(EdgeDirection, Arc<str>)>,
}

impl FoldScopeLocation {
    pub fn new(base_location: Location, direction: EdgeDirection, edge_name: Arc<str>) -> Self {
        assert!(base_location.field.is_none(), "fold must hang off a vertex: {base_location}");
        Self { base_location, fold_path: vec![(direction, edge_name)] }
    }

    /// The scope reached by traversing one more edge inside the fold.
    pub fn navigate_to_subpath(&self, direction: EdgeDirection, edge_name: Arc<str>) -> Self {
        let mut fold_path = self.fold_path.clone();
        fold_path.push((direction, edge_name));
        Self { base_location: self.base_location.clone(), fold_path }
    }
}

impl Display for FoldScopeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FoldScopeLocation({}", self.base_location)?;
        for (direction, edge) in &self.fold_path {
            write!(f, " => {direction}_{edge}")?;
        }
        write!(f, ")")
    }
}

/// All binary operators usable in a [`Expression::BinaryComposition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Contains,
    NotContains,
    Intersects,
    HasSubstring,
    StartsWith,
    EndsWith,
}

impl Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinaryOperator::Equals => "=",
            BinaryOperator::NotEquals => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
            BinaryOperator::Contains => "contains",
            BinaryOperator::NotContains => "not_contains",
            BinaryOperator::Intersects => "intersects",
            BinaryOperator::HasSubstring => "has_substring",
            BinaryOperator::StartsWith => "starts_with",
            BinaryOperator::EndsWith => "ends_with",
        };
        write!(f, "{text}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Size,
}

/// The expression language embedded in [`BasicBlock::Filter`] predicates and
/// [`BasicBlock::ConstructResult`] outputs. Expressions form finite trees;
/// equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expression {
    /// The value of a field at the scope currently being evaluated.
    LocalField { field_name: Arc<str>, field_type: Type },

    /// The value of a field at a previously marked location.
    ContextField { location: Location, field_type: Type },

    /// Whether the (optional) vertex at the given location existed in this row.
    ContextFieldExistence { vertex_location: Location },

    /// A runtime query parameter. The name carries its `$` prefix.
    Variable { variable_name: Arc<str>, variable_type: Type },

    /// A field whose value is emitted as query output.
    OutputContextField { location: Location, field_type: Type },

    /// The aggregated output of a field within a fold scope.
    FoldedOutputContextField {
        fold_scope: FoldScopeLocation,
        field_name: Arc<str>,
        field_type: Type,
    },

    TernaryConditional {
        predicate: Box<Expression>,
        if_true: Box<Expression>,
        if_false: Box<Expression>,
    },

    BinaryComposition {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    UnaryTransformation {
        operator: UnaryOperator,
        inner: Box<Expression>,
    },

    NullLiteral,
    TrueLiteral,
    FalseLiteral,
    ZeroLiteral,
}

impl Expression {
    /// Pre-order traversal over this expression and all of its sub-expressions.
    pub fn visit<'a>(&'a self, visitor: &mut dyn FnMut(&'a Expression)) {
        visitor(self);
        match self {
            Expression::TernaryConditional { predicate, if_true, if_false } => {
                predicate.visit(visitor);
                if_true.visit(visitor);
                if_false.visit(visitor);
            }
            Expression::BinaryComposition { left, right, .. } => {
                left.visit(visitor);
                right.visit(visitor);
            }
            Expression::UnaryTransformation { inner, .. } => {
                inner.visit(visitor);
            }
            Expression::LocalField { .. }
            | Expression::ContextField { .. }
            | Expression::ContextFieldExistence { .. }
            | Expression::Variable { .. }
            | Expression::OutputContextField { .. }
            | Expression::FoldedOutputContextField { .. }
            | Expression::NullLiteral
            | Expression::TrueLiteral
            | Expression::FalseLiteral
            | Expression::ZeroLiteral => {}
        }
    }
}

/// One element of the IR. The compiled query is a flat sequence of these;
/// nesting is implicit, recovered from `MarkLocation`/`Backtrack` pairs and
/// `Fold`/`Unfold` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasicBlock {
    /// Start the query at one of these types.
    QueryRoot { start_types: BTreeSet<Arc<str>> },

    /// Name the present position in the query for later reference.
    MarkLocation(Location),

    /// Follow an edge.
    Traverse {
        direction: EdgeDirection,
        edge_name: Arc<str>,

        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,

        #[serde(default, skip_serializing_if = "is_false")]
        within_optional_scope: bool,
    },

    /// Follow an edge repeatedly, up to `depth` times, yielding the starting
    /// vertex together with everything reachable.
    Recurse {
        direction: EdgeDirection,
        edge_name: Arc<str>,
        depth: NonZeroUsize,

        #[serde(default, skip_serializing_if = "is_false")]
        within_optional_scope: bool,
    },

    /// Return to a previously marked location.
    Backtrack {
        location: Location,

        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },

    /// Open a fold aggregation over the given scope.
    Fold(FoldScopeLocation),

    /// Close the innermost fold aggregation.
    Unfold,

    /// Close an `@optional` block.
    EndOptional,

    /// Keep only rows whose current vertex type is in the set.
    CoerceType { target_types: BTreeSet<Arc<str>> },

    /// Keep only rows satisfying the predicate.
    Filter(Expression),

    /// Mark the current vertex as the result-set cardinality source.
    OutputSource,

    /// Terminal block: build the output row.
    ConstructResult(BTreeMap<Arc<str>, Expression>),
}

fn is_false(b: &bool) -> bool {
    !b
}

/// Metadata about one query output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub graphql_type: Type,

    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub folded: bool,
}

/// The `(fields, operator, arguments)` triple recorded for each processed
/// `@filter`, kept per-location for downstream diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterInfo {
    pub fields: Vec<Arc<str>>,
    pub op_name: Arc<str>,
    pub args: Vec<Arc<str>>,
}

/// The complete result of compiling one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrAndMetadata {
    pub ir_blocks: Vec<BasicBlock>,

    /// Runtime parameter name (without its `$` prefix) -> inferred type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_metadata: BTreeMap<Arc<str>, Type>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_metadata: BTreeMap<Arc<str>, OutputMetadata>,

    /// The schema type name at each marked location.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub location_types: BTreeMap<Location, Arc<str>>,

    /// Locations at which a type coercion was applied.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub coerced_locations: BTreeSet<Location>,

    /// Filters recorded at each location, for diagnostics.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub location_filters: BTreeMap<Location, Vec<FilterInfo>>,
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::sync::Arc;

    use super::{EdgeDirection, Expression, FoldScopeLocation, Location, Type};

    fn hash_of(value: &impl Hash) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn location_navigation() {
        let base = Location::new("Animal".into());
        let child = base.navigate_to_subpath("out_Animal_ParentOf");
        assert_eq!(child.query_path.len(), 2);
        assert_eq!(child.field, None);
        assert_eq!(child.visit_counter, 0);

        let field = child.navigate_to_field("name");
        assert_eq!(field.field.as_deref(), Some("name"));
        assert_eq!(field.at_vertex(), child);

        let revisited = child.revisit();
        assert_ne!(revisited, child);
        assert_eq!(revisited.visit_counter, 1);
        assert_eq!(revisited.query_path, child.query_path);
    }

    #[test]
    fn location_equality_is_structural() {
        let first = Location::new("Animal".into()).navigate_to_subpath("out_Animal_ParentOf");
        let second = Location::new("Animal".into()).navigate_to_subpath("out_Animal_ParentOf");
        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));

        assert_ne!(first, first.revisit());
        assert_ne!(first, first.navigate_to_field("name"));
    }

    #[test]
    fn fold_scope_navigation() {
        let base = Location::new("Animal".into());
        let fold =
            FoldScopeLocation::new(base.clone(), EdgeDirection::Out, "Animal_ParentOf".into());
        let deeper = fold.navigate_to_subpath(EdgeDirection::Out, "Animal_OfSpecies".into());

        assert_eq!(fold.fold_path.len(), 1);
        assert_eq!(deeper.fold_path.len(), 2);
        assert_eq!(deeper.base_location, base);
        assert_ne!(fold, deeper);
    }

    #[test]
    fn expression_equality_is_structural() {
        let make = || Expression::BinaryComposition {
            operator: super::BinaryOperator::GreaterThanOrEqual,
            left: Box::new(Expression::LocalField {
                field_name: "name".into(),
                field_type: Type::new("String").unwrap(),
            }),
            right: Box::new(Expression::Variable {
                variable_name: "$lower".into(),
                variable_type: Type::new("String").unwrap(),
            }),
        };

        assert_eq!(make(), make());
        assert_eq!(hash_of(&make()), hash_of(&make()));
    }

    #[test]
    fn blocks_round_trip_through_serde() {
        let base = Location::new("Animal".into());
        let blocks = vec![
            super::BasicBlock::QueryRoot { start_types: [Arc::from("Animal")].into_iter().collect() },
            super::BasicBlock::Filter(Expression::BinaryComposition {
                operator: super::BinaryOperator::GreaterThanOrEqual,
                left: Box::new(Expression::LocalField {
                    field_name: "name".into(),
                    field_type: Type::new("String").unwrap(),
                }),
                right: Box::new(Expression::Variable {
                    variable_name: "$lower".into(),
                    variable_type: Type::new("String").unwrap(),
                }),
            }),
            super::BasicBlock::MarkLocation(base.clone()),
            super::BasicBlock::ConstructResult(
                [(
                    Arc::from("name"),
                    Expression::OutputContextField {
                        location: base.navigate_to_field("name"),
                        field_type: Type::new("String").unwrap(),
                    },
                )]
                .into_iter()
                .collect(),
            ),
        ];

        let serialized = serde_json::to_string(&blocks).unwrap();
        let deserialized: Vec<super::BasicBlock> = serde_json::from_str(&serialized).unwrap();
        assert_eq!(blocks, deserialized);
    }

    #[test]
    fn expression_visit_is_total() {
        let expr = Expression::TernaryConditional {
            predicate: Box::new(Expression::ContextFieldExistence {
                vertex_location: Location::new("Animal".into()),
            }),
            if_true: Box::new(Expression::UnaryTransformation {
                operator: super::UnaryOperator::Size,
                inner: Box::new(Expression::LocalField {
                    field_name: "alias".into(),
                    field_type: Type::new("[String]").unwrap(),
                }),
            }),
            if_false: Box::new(Expression::NullLiteral),
        };

        let mut seen = 0usize;
        expr.visit(&mut |_| seen += 1);
        assert_eq!(seen, 5);
    }
}
