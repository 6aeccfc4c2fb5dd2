//! Read-only model of the schema the compiler works against: type and field
//! lookup tables, subtype tests, and the directive vocabulary.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_graphql_parser::{
    parse_schema,
    types::{
        BaseType, DirectiveDefinition, FieldDefinition, ObjectType, SchemaDefinition,
        ServiceDocument, Type as GQLType, TypeDefinition, TypeKind, TypeSystemDefinition,
    },
    Positioned,
};
use async_graphql_value::Name;
use once_cell::sync::Lazy;

use self::error::InvalidSchemaError;

pub mod error;

/// Maps an interface or object type name to the name of a union type that
/// enumerates its implementers. Used as a workaround for surface type
/// systems that cannot express inheritance across non-interface types.
pub type TypeEquivalenceHints = BTreeMap<Arc<str>, Arc<str>>;

pub(crate) static BUILTIN_SCALARS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    hashset! {
        "Int",
        "Float",
        "String",
        "Boolean",
        "ID",
    }
});

const RESERVED_PREFIX: &str = "__";

pub(crate) const OUTBOUND_EDGE_FIELD_PREFIX: &str = "out_";
pub(crate) const INBOUND_EDGE_FIELD_PREFIX: &str = "in_";

/// True iff the name denotes a vertex (edge) field: it starts with `out_` or `in_`.
pub fn is_vertex_field_name(field_name: &str) -> bool {
    field_name.starts_with(OUTBOUND_EDGE_FIELD_PREFIX)
        || field_name.starts_with(INBOUND_EDGE_FIELD_PREFIX)
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub(crate) schema: SchemaDefinition,
    pub(crate) query_type: ObjectType,
    pub(crate) directives: HashMap<Arc<str>, DirectiveDefinition>,
    pub(crate) scalars: HashMap<Arc<str>, TypeDefinition>,
    pub(crate) vertex_types: HashMap<Arc<str>, TypeDefinition>,
    pub(crate) fields: HashMap<(Arc<str>, Arc<str>), FieldDefinition>,
}

impl Schema {
    pub const ALL_DIRECTIVE_DEFINITIONS: &'static str = "
directive @filter(op_name: String!, value: [String!]) repeatable on FIELD | INLINE_FRAGMENT
directive @tag(tag_name: String!) on FIELD
directive @output(out_name: String!) on FIELD
directive @optional on FIELD
directive @fold on FIELD
directive @recurse(depth: Int!) on FIELD
directive @output_source on FIELD
directive @macro_edge on FIELD_DEFINITION
directive @macro_edge_definition(name: String!) on FIELD
directive @macro_edge_target on FIELD | INLINE_FRAGMENT
";

    pub fn parse(input: impl AsRef<str>) -> Result<Self, InvalidSchemaError> {
        let doc = parse_schema(input)?;
        Self::new(doc)
    }

    pub fn new(doc: ServiceDocument) -> Result<Self, InvalidSchemaError> {
        let mut schema: Option<SchemaDefinition> = None;
        let mut directives: HashMap<Arc<str>, DirectiveDefinition> = Default::default();
        let mut scalars: HashMap<Arc<str>, TypeDefinition> = Default::default();

        // The schema is mostly type definitions, except for one schema definition and
        // perhaps a small number of custom scalar or directive definitions.
        let mut vertex_types: HashMap<Arc<str>, TypeDefinition> =
            HashMap::with_capacity(doc.definitions.len().saturating_sub(1));
        let mut fields: HashMap<(Arc<str>, Arc<str>), FieldDefinition> =
            HashMap::with_capacity(doc.definitions.len().saturating_sub(1));

        for definition in doc.definitions {
            match definition {
                TypeSystemDefinition::Schema(s) => {
                    assert!(schema.is_none(), "duplicate schema definition block");
                    if s.node.extend {
                        return Err(InvalidSchemaError::UnsupportedSchemaFeature(
                            "schema extensions".to_string(),
                        ));
                    }

                    schema = Some(s.node);
                }
                TypeSystemDefinition::Directive(d) => {
                    directives.insert(Arc::from(d.node.name.node.as_str()), d.node);
                }
                TypeSystemDefinition::Type(t) => {
                    let node = t.node;
                    let type_name: Arc<str> = Arc::from(node.name.node.as_str());
                    if BUILTIN_SCALARS.contains(type_name.as_ref()) {
                        return Err(InvalidSchemaError::DuplicateTypeOrInterfaceDefinition(
                            type_name.to_string(),
                        ));
                    }

                    if node.extend {
                        return Err(InvalidSchemaError::UnsupportedSchemaFeature(
                            "type extensions".to_string(),
                        ));
                    }

                    match &node.kind {
                        TypeKind::Scalar => {
                            scalars.insert(type_name.clone(), node.clone());
                        }
                        TypeKind::Object(_) | TypeKind::Interface(_) | TypeKind::Union(_) => {
                            if vertex_types.insert(type_name.clone(), node.clone()).is_some() {
                                return Err(
                                    InvalidSchemaError::DuplicateTypeOrInterfaceDefinition(
                                        type_name.to_string(),
                                    ),
                                );
                            }
                        }
                        TypeKind::Enum(_) => {
                            return Err(InvalidSchemaError::UnsupportedSchemaFeature(
                                "enum types".to_string(),
                            ));
                        }
                        TypeKind::InputObject(_) => {
                            return Err(InvalidSchemaError::UnsupportedSchemaFeature(
                                "input object types".to_string(),
                            ));
                        }
                    }

                    let field_defs = match node.kind {
                        TypeKind::Object(object) => Some(object.fields),
                        TypeKind::Interface(interface) => Some(interface.fields),
                        _ => None,
                    };
                    if let Some(field_defs) = field_defs {
                        for field in field_defs {
                            let field_node = field.node;
                            let field_name: Arc<str> = Arc::from(field_node.name.node.as_str());

                            if fields
                                .insert((type_name.clone(), field_name.clone()), field_node)
                                .is_some()
                            {
                                return Err(InvalidSchemaError::DuplicateFieldDefinition(
                                    type_name.to_string(),
                                    field_name.to_string(),
                                ));
                            }
                        }
                    }
                }
            }
        }

        let schema = schema.ok_or(InvalidSchemaError::NoSchemaDefinition)?;
        let query_type_name =
            schema.query.as_ref().ok_or(InvalidSchemaError::NoQueryType)?.node.as_str();
        let query_type_definition = vertex_types
            .get(query_type_name)
            .ok_or_else(|| InvalidSchemaError::NonExistentQueryType(query_type_name.to_string()))?;
        let query_type = match &query_type_definition.kind {
            TypeKind::Object(o) => o.clone(),
            _ => {
                return Err(InvalidSchemaError::QueryTypeNotAnObject(
                    query_type_name.to_string(),
                ))
            }
        };

        let mut errors = vec![];
        if let Err(e) = check_root_query_type_invariants(
            query_type_definition,
            &query_type,
            &vertex_types,
        ) {
            errors.extend(e);
        }
        if let Err(e) =
            check_type_and_field_invariants(query_type_definition, &vertex_types, &scalars)
        {
            errors.extend(e);
        }

        if errors.is_empty() {
            Ok(Self { schema, query_type, directives, scalars, vertex_types, fields })
        } else {
            Err(errors.into())
        }
    }

    pub(crate) fn query_type_name(&self) -> &str {
        self.schema.query.as_ref().expect("query type checked at construction").node.as_str()
    }

    pub(crate) fn directive_definition(&self, name: &str) -> Option<&DirectiveDefinition> {
        self.directives.get(name)
    }

    pub(crate) fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDefinition> {
        self.fields.get(&(Arc::from(type_name), Arc::from(field_name)))
    }

    pub(crate) fn is_vertex_type(&self, type_name: &str) -> bool {
        self.vertex_types.contains_key(type_name)
    }

    pub(crate) fn is_scalar_type(&self, type_name: &str) -> bool {
        BUILTIN_SCALARS.contains(type_name) || self.scalars.contains_key(type_name)
    }

    pub(crate) fn is_interface_type(&self, type_name: &str) -> bool {
        matches!(
            self.vertex_types.get(type_name).map(|defn| &defn.kind),
            Some(TypeKind::Interface(_))
        )
    }

    pub(crate) fn is_union_type(&self, type_name: &str) -> bool {
        matches!(
            self.vertex_types.get(type_name).map(|defn| &defn.kind),
            Some(TypeKind::Union(_))
        )
    }

    pub(crate) fn union_members(&self, type_name: &str) -> Option<BTreeSet<&str>> {
        match self.vertex_types.get(type_name).map(|defn| &defn.kind) {
            Some(TypeKind::Union(u)) => {
                Some(u.members.iter().map(|member| member.node.as_str()).collect())
            }
            _ => None,
        }
    }

    /// True iff `maybe_subtype` names the same type as `parent_type`, implements it
    /// as an interface, or is one of its members if `parent_type` is a union.
    pub(crate) fn is_named_type_subtype(&self, parent_type: &str, maybe_subtype: &str) -> bool {
        if parent_type == maybe_subtype {
            return true;
        }

        if self.is_union_type(parent_type) {
            return self
                .union_members(parent_type)
                .map(|members| members.contains(maybe_subtype))
                .unwrap_or(false);
        }

        match self.vertex_types.get(maybe_subtype) {
            Some(defn) => get_vertex_type_implements(defn)
                .iter()
                .any(|implemented| implemented.node.as_str() == parent_type),
            None => false,
        }
    }

    /// If the named type is defined, iterate through the names of its subtypes
    /// including itself. Otherwise, return None.
    pub fn subtypes<'a, 'slf: 'a>(
        &'slf self,
        type_name: &'a str,
    ) -> Option<impl Iterator<Item = &'slf str> + 'a> {
        if !self.vertex_types.contains_key(type_name) {
            return None;
        }

        Some(
            self.vertex_types
                .keys()
                .map(|name| name.as_ref())
                .filter(move |name| self.is_named_type_subtype(type_name, name)),
        )
    }

    /// Subclass sets for every vertex type: type name -> names of it and all its
    /// subtypes, widened by the given equivalence hints (each hinted type and its
    /// equivalent union share one subclass set).
    pub fn subclass_sets(
        &self,
        type_equivalence_hints: &TypeEquivalenceHints,
    ) -> BTreeMap<Arc<str>, BTreeSet<Arc<str>>> {
        let mut result: BTreeMap<Arc<str>, BTreeSet<Arc<str>>> = Default::default();
        for type_name in self.vertex_types.keys() {
            let subtypes = self
                .subtypes(type_name.as_ref())
                .expect("type name came from the vertex types table")
                .map(Arc::from)
                .collect();
            result.insert(type_name.clone(), subtypes);
        }

        for (hinted_type, equivalent_union) in type_equivalence_hints {
            let combined: BTreeSet<Arc<str>> = result
                .get(hinted_type)
                .into_iter()
                .chain(result.get(equivalent_union))
                .flatten()
                .cloned()
                .collect();
            result.insert(hinted_type.clone(), combined.clone());
            result.insert(equivalent_union.clone(), combined);
        }

        result
    }

    /// A copy of this schema where each `(type name, field definition)` pair has
    /// been added as a new field on the named type. Used to derive the
    /// schema-with-macros that macro-using queries validate against.
    pub(crate) fn with_added_vertex_fields(
        &self,
        additions: impl IntoIterator<Item = (Arc<str>, FieldDefinition)>,
    ) -> Schema {
        let mut new_schema = self.clone();

        for (type_name, field_definition) in additions {
            let type_defn = new_schema
                .vertex_types
                .get_mut(&type_name)
                .expect("macro edge additions must target existing vertex types");
            let fields = match &mut type_defn.kind {
                TypeKind::Object(o) => &mut o.fields,
                TypeKind::Interface(i) => &mut i.fields,
                _ => unreachable!("macro edge additions must target object or interface types"),
            };
            fields.push(Positioned::new(field_definition.clone(), Default::default()));

            let field_name: Arc<str> = Arc::from(field_definition.name.node.as_str());
            new_schema.fields.insert((type_name, field_name), field_definition);
        }

        new_schema
    }
}

fn check_root_query_type_invariants(
    query_type_definition: &TypeDefinition,
    query_type: &ObjectType,
    vertex_types: &HashMap<Arc<str>, TypeDefinition>,
) -> Result<(), Vec<InvalidSchemaError>> {
    let mut errors: Vec<InvalidSchemaError> = vec![];

    for field_defn in &query_type.fields {
        let field_type = &field_defn.node.ty.node;
        let base_named_type = get_base_named_type(field_type);
        if !vertex_types.contains_key(base_named_type) {
            errors.push(InvalidSchemaError::PropertyFieldOnRootQueryType(
                query_type_definition.name.node.to_string(),
                field_defn.node.name.node.to_string(),
                field_type.to_string(),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_type_and_field_invariants(
    query_type_definition: &TypeDefinition,
    vertex_types: &HashMap<Arc<str>, TypeDefinition>,
    scalars: &HashMap<Arc<str>, TypeDefinition>,
) -> Result<(), Vec<InvalidSchemaError>> {
    let mut errors: Vec<InvalidSchemaError> = vec![];

    for (type_name, type_defn) in vertex_types {
        if type_name.as_ref().starts_with(RESERVED_PREFIX) {
            errors.push(InvalidSchemaError::ReservedTypeName(type_name.to_string()));
        }

        if type_name.as_ref() == query_type_definition.name.node.as_str() {
            // Root query fields were already checked separately.
            continue;
        }

        for defn in get_vertex_type_fields(type_defn) {
            let field_defn = &defn.node;
            let field_type = &field_defn.ty.node;

            if field_defn.name.node.as_str().starts_with(RESERVED_PREFIX) {
                errors.push(InvalidSchemaError::ReservedFieldName(
                    field_defn.name.node.to_string(),
                    type_name.to_string(),
                ));
            }

            let base_named_type = get_base_named_type(field_type);
            let is_scalar = BUILTIN_SCALARS.contains(base_named_type)
                || scalars.contains_key(base_named_type);
            if !is_scalar && !vertex_types.contains_key(base_named_type) {
                errors.push(InvalidSchemaError::UnknownFieldType(
                    type_name.to_string(),
                    field_defn.name.node.to_string(),
                    field_type.to_string(),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub(crate) fn get_vertex_type_fields(
    type_defn: &TypeDefinition,
) -> &[Positioned<FieldDefinition>] {
    match &type_defn.kind {
        TypeKind::Object(o) => &o.fields,
        TypeKind::Interface(i) => &i.fields,
        _ => &[],
    }
}

fn get_vertex_type_implements(type_defn: &TypeDefinition) -> &[Positioned<Name>] {
    match &type_defn.kind {
        TypeKind::Object(o) => &o.implements,
        TypeKind::Interface(i) => &i.implements,
        _ => &[],
    }
}

/// The innermost named type of the given (possibly list-nested) type.
pub(crate) fn get_base_named_type(ty: &GQLType) -> &str {
    let mut base = &ty.base;
    loop {
        match base {
            BaseType::Named(n) => return n.as_str(),
            BaseType::List(inner) => base = &inner.base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{is_vertex_field_name, Schema};
    use crate::test_util::ANIMALS_SCHEMA;

    #[test]
    fn vertex_field_names() {
        assert!(is_vertex_field_name("out_Animal_ParentOf"));
        assert!(is_vertex_field_name("in_Animal_ParentOf"));
        assert!(!is_vertex_field_name("name"));
        assert!(!is_vertex_field_name("output_field"));
    }

    #[test]
    fn animals_schema_loads() {
        let schema: &Schema = &ANIMALS_SCHEMA;
        assert!(schema.vertex_types.len() > 3);
        assert!(schema.is_vertex_type("Animal"));
        assert!(schema.is_interface_type("Entity"));
        assert!(schema.is_union_type("Union__Animal__Food"));
        assert!(schema.field("Animal", "name").is_some());
        assert!(schema.field("Animal", "out_Animal_ParentOf").is_some());
    }

    #[test]
    fn named_subtype_checks() {
        let schema: &Schema = &ANIMALS_SCHEMA;
        assert!(schema.is_named_type_subtype("Entity", "Animal"));
        assert!(schema.is_named_type_subtype("Animal", "Animal"));
        assert!(schema.is_named_type_subtype("Union__Animal__Food", "Food"));
        assert!(!schema.is_named_type_subtype("Animal", "Entity"));
        assert!(!schema.is_named_type_subtype("Food", "Animal"));
    }

    #[test]
    fn subtype_enumeration() {
        let schema: &Schema = &ANIMALS_SCHEMA;
        let mut subtypes: Vec<_> = schema.subtypes("Entity").unwrap().collect();
        subtypes.sort_unstable();
        assert_eq!(vec!["Animal", "Entity", "Food", "Species"], subtypes);

        assert!(schema.subtypes("Nonexistent").is_none());
    }

    #[test]
    fn subclass_sets_respect_equivalence_hints() {
        let schema: &Schema = &ANIMALS_SCHEMA;

        let plain = schema.subclass_sets(&Default::default());
        assert!(plain["Entity"].contains("Animal"));
        assert!(!plain["Animal"].contains("Food"));

        let hints = btreemap! {
            std::sync::Arc::from("Animal") => std::sync::Arc::from("Union__Animal__Food"),
        };
        let hinted = schema.subclass_sets(&hints);
        assert!(hinted["Animal"].contains("Food"));
        assert!(hinted["Union__Animal__Food"].contains("Animal"));
    }
}
