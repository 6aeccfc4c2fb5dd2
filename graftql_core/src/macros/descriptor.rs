use std::collections::BTreeMap;
use std::sync::Arc;

use async_graphql_parser::types::Field;
use async_graphql_parser::Positioned;

use crate::ir::FieldValue;

/// Everything needed to expand one registered macro edge.
#[derive(Debug, Clone)]
pub struct MacroEdgeDescriptor {
    /// The type the macro edge is defined on.
    pub base_class_name: Arc<str>,

    /// The type the macro edge points to: the schema type at the
    /// `@macro_edge_target` directive within the definition.
    pub target_class_name: Arc<str>,

    /// The macro edge's vertex field name, `out_*` or `in_*`.
    pub macro_edge_name: Arc<str>,

    /// The definition's top-level selection, with the
    /// `@macro_edge_definition` directive removed. The target directive is
    /// left in place as the marker for where expansion merges the user's
    /// selections.
    pub(crate) expansion_ast: Positioned<Field>,

    /// Pre-bound arguments the expansion requires.
    pub macro_args: BTreeMap<Arc<str>, FieldValue>,
}
