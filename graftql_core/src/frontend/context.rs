//! Mutable state threaded through the directive orchestrator during a
//! single compilation.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::CompilationError;
use crate::ir::{FilterInfo, FoldScopeLocation, Location, Type};
use crate::schema::{Schema, TypeEquivalenceHints};

/// Everything known about a `@tag` at the point it was declared.
#[derive(Debug, Clone)]
pub(super) struct TagInfo {
    /// The property-field location the tag was declared at.
    pub(super) location: Location,

    /// Whether the tag was declared within an `@optional` scope.
    pub(super) optional: bool,

    pub(super) tag_type: Type,
}

/// Everything known about an `@output` at the point it was declared.
#[derive(Debug, Clone)]
pub(super) struct OutputInfo {
    pub(super) location: Location,

    /// Whether the output was declared within an `@optional` scope.
    pub(super) optional: bool,

    pub(super) output_type: Type,

    /// The fold scope the output was declared in, if any.
    pub(super) fold: Option<FoldScopeLocation>,
}

pub(super) struct CompilationContext<'a> {
    pub(super) schema: &'a Schema,
    pub(super) type_equivalence_hints: &'a TypeEquivalenceHints,

    pub(super) tags: BTreeMap<Arc<str>, TagInfo>,
    pub(super) outputs: BTreeMap<Arc<str>, OutputInfo>,

    /// Runtime parameter name (without the `$` prefix) -> inferred type.
    pub(super) inputs: BTreeMap<Arc<str>, Type>,

    /// Schema type name at each marked location.
    pub(super) location_types: BTreeMap<Location, Arc<str>>,

    pub(super) coerced_locations: BTreeSet<Location>,

    pub(super) location_filters: BTreeMap<Location, Vec<FilterInfo>>,

    /// One entry per MarkLocation emitted for the vertices currently being
    /// compiled, paired with the number of Traverse/Recurse blocks emitted
    /// since that mark. A nonzero count when entering an `@optional` forces
    /// a revisit, so the optional's Backtrack cannot rewind past the
    /// intervening traversals.
    pub(super) marked_location_stack: Vec<(Location, u32)>,

    /// The fold scope currently being compiled, if any. At most one at a time.
    pub(super) current_fold: Option<FoldScopeLocation>,

    /// Set once an output is recorded inside the current fold; no further
    /// traversals are allowed within the fold afterwards.
    pub(super) fold_innermost_scope: bool,

    /// The vertex location that opened the currently-active `@optional`
    /// traversal, if any. At most one at a time.
    pub(super) current_optional: Option<Location>,

    /// The location marked `@output_source`, once one has been seen.
    pub(super) output_source: Option<Location>,
}

impl<'a> CompilationContext<'a> {
    pub(super) fn new(schema: &'a Schema, type_equivalence_hints: &'a TypeEquivalenceHints) -> Self {
        Self {
            schema,
            type_equivalence_hints,
            tags: Default::default(),
            outputs: Default::default(),
            inputs: Default::default(),
            location_types: Default::default(),
            coerced_locations: Default::default(),
            location_filters: Default::default(),
            marked_location_stack: Default::default(),
            current_fold: None,
            fold_innermost_scope: false,
            current_optional: None,
            output_source: None,
        }
    }

    pub(super) fn is_in_fold_scope(&self) -> bool {
        self.current_fold.is_some()
    }

    pub(super) fn is_in_optional_scope(&self) -> bool {
        self.current_optional.is_some()
    }

    pub(super) fn has_encountered_output_source(&self) -> bool {
        self.output_source.is_some()
    }

    pub(super) fn record_filter_info(&mut self, location: &Location, info: FilterInfo) {
        self.location_filters.entry(location.clone()).or_default().push(info);
    }

    /// Ensure the current context allows stepping into another vertex field.
    pub(super) fn validate_visiting_vertex_field(
        &self,
        inner_location: &Location,
    ) -> Result<(), CompilationError> {
        if self.fold_innermost_scope {
            return Err(CompilationError::TraversalAfterFoldOutput(inner_location.to_string()));
        }
        Ok(())
    }
}
