use serde::{Deserialize, Serialize};

use crate::util::DisplayVec;

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, thiserror::Error)]
pub enum InvalidSchemaError {
    #[error("Multiple schema errors: {0}")]
    MultipleErrors(DisplayVec<InvalidSchemaError>),

    #[error("{0}")]
    InvalidGraphQL(String),

    #[error("The schema contains no schema definition block.")]
    NoSchemaDefinition,

    #[error("The schema declares no query root type.")]
    NoQueryType,

    #[error("The query root type \"{0}\" is not defined in the schema.")]
    NonExistentQueryType(String),

    #[error("The query root type \"{0}\" is not defined as an object type.")]
    QueryTypeNotAnObject(String),

    #[error("Duplicate type or interface definition: {0}")]
    DuplicateTypeOrInterfaceDefinition(String),

    #[error("Duplicate field definition on type {0}: {1}")]
    DuplicateFieldDefinition(String, String),

    #[error("Type names beginning with \"__\" are reserved: {0}")]
    ReservedTypeName(String),

    #[error("Field names beginning with \"__\" are reserved: {0} on type {1}")]
    ReservedFieldName(String, String),

    #[error(
        "Fields on the root query type must refer to vertex types, but field \"{1}\" on \
        root type \"{0}\" has type {2}."
    )]
    PropertyFieldOnRootQueryType(String, String, String),

    #[error("Field \"{1}\" on type \"{0}\" has a type that is not defined in the schema: {2}")]
    UnknownFieldType(String, String, String),

    #[error("Unsupported schema feature: {0}")]
    UnsupportedSchemaFeature(String),
}

impl From<Vec<InvalidSchemaError>> for InvalidSchemaError {
    fn from(v: Vec<InvalidSchemaError>) -> Self {
        assert!(!v.is_empty());
        if v.len() == 1 {
            v.into_iter().next().unwrap()
        } else {
            Self::MultipleErrors(DisplayVec(v))
        }
    }
}

impl From<async_graphql_parser::Error> for InvalidSchemaError {
    fn from(e: async_graphql_parser::Error) -> Self {
        Self::InvalidGraphQL(e.to_string())
    }
}
