use core::fmt::{self, Formatter};
use std::fmt::Display;
use std::hash::{Hash, Hasher};

use async_graphql_parser::types::{
    BaseType::{self, List, Named},
    Type as GQLType,
};
use async_graphql_value::Name;
use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};

/// A backing-storage independent immutable representation of a GraphQL type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    ty: GQLType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InnerType<'a> {
    NameOfType(&'a str),
    ListInnerType(Type),
}

impl Type {
    /// Creates a new [`Type`] from a string.
    /// Returns `None` if the string is not a valid GraphQL type.
    ///
    /// # Example
    /// ```
    /// use graftql_core::ir::Type;
    ///
    /// let ty = Type::new("[String!]!").unwrap();
    /// assert_eq!(ty.to_string(), "[String!]!");
    /// ```
    pub fn new(ty: &str) -> Option<Type> {
        Some(Type { ty: GQLType::new(ty)? })
    }

    /// Creates an individual [`Type`], not a list.
    pub fn new_named_type(base_type_name: &str, nullable: bool) -> Type {
        Type { ty: GQLType { base: BaseType::Named(Name::new(base_type_name)), nullable } }
    }

    /// Creates a new list [`Type`] from an individual [`Type`].
    pub fn new_list_type(inner_type: Type, nullable: bool) -> Type {
        Type { ty: GQLType { base: BaseType::List(Box::new(inner_type.ty)), nullable } }
    }

    /// Returns a new type that is the same as this one, but with the passed nullability.
    pub fn with_nullability(&self, nullable: bool) -> Type {
        Type { ty: GQLType { base: self.ty.base.clone(), nullable } }
    }

    /// Returns whether this type is nullable at the top level.
    pub fn is_nullable(&self) -> bool {
        self.ty.nullable
    }

    /// Returns whether this type is a list at the top level.
    pub fn is_list(&self) -> bool {
        matches!(&self.ty.base, List(..))
    }

    /// Returns an [`InnerType`] representing the inner value of the type:
    /// the element type for lists, or the type's own name otherwise.
    pub fn value(&self) -> InnerType<'_> {
        match &self.ty.base {
            Named(n) => InnerType::NameOfType(n),
            List(ty) => InnerType::ListInnerType(Type { ty: (**ty).clone() }),
        }
    }

    /// The name of the first non-list type found inside this type.
    ///
    /// # Example
    /// ```
    /// use graftql_core::ir::Type;
    ///
    /// let int_list_ty = Type::new("[Int!]").unwrap();
    /// assert_eq!(int_list_ty.base_named_type(), "Int");
    /// ```
    pub fn base_named_type(&self) -> &str {
        let mut value = &self.ty.base;
        while let BaseType::List(l) = value {
            value = &l.base;
        }

        match value {
            Named(n) => n,
            List(_) => unreachable!("while loop should not have stopped on a list"),
        }
    }

    /// Whether the two types are structurally equal after ignoring
    /// top-level non-null markers on either side.
    pub fn equal_ignoring_nullability(&self, other: &Type) -> bool {
        are_base_types_equal_ignoring_nullability(&self.ty.base, &other.ty.base)
    }

    pub(crate) fn from_type(ty: &GQLType) -> Type {
        Type { ty: ty.clone() }
    }

    pub(crate) fn as_raw_type(&self) -> &GQLType {
        &self.ty
    }
}

fn are_base_types_equal_ignoring_nullability(left: &BaseType, right: &BaseType) -> bool {
    match (left, right) {
        (BaseType::Named(l), BaseType::Named(r)) => l == r,
        (BaseType::List(l), BaseType::List(r)) => {
            are_base_types_equal_ignoring_nullability(&l.base, &r.base)
        }
        (BaseType::Named(_), BaseType::List(_)) | (BaseType::List(_), BaseType::Named(_)) => false,
    }
}

fn hash_base_type<H: Hasher>(base: &BaseType, state: &mut H) {
    match base {
        Named(n) => {
            0u8.hash(state);
            n.as_str().hash(state);
        }
        List(inner) => {
            1u8.hash(state);
            hash_base_type(&inner.base, state);
            inner.nullable.hash(state);
        }
    }
}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_base_type(&self.ty.base, state);
        self.ty.nullable.hash(state);
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ty)
    }
}

impl Serialize for Type {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.ty.to_string())
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D>(deserializer: D) -> Result<Type, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TypeDeserializer;

        impl<'de> Visitor<'de> for TypeDeserializer {
            type Value = Type;

            fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
                formatter.write_str("GraphQL type")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let ty = Type::new(s)
                    .ok_or_else(|| serde::de::Error::custom("not a valid GraphQL type"))?;
                Ok(ty)
            }
        }

        deserializer.deserialize_str(TypeDeserializer)
    }
}

#[cfg(test)]
mod tests {
    use super::{InnerType, Type};

    #[test]
    fn nullability_helpers() {
        let nullable_ty = Type::new("Int").unwrap();
        assert!(nullable_ty.is_nullable());

        let non_nullable_ty = nullable_ty.with_nullability(false);
        assert!(!non_nullable_ty.is_nullable());
        assert_eq!(non_nullable_ty, Type::new("Int!").unwrap());

        // The original type is unchanged.
        assert!(nullable_ty.is_nullable());
    }

    #[test]
    fn list_helpers() {
        let ty = Type::new("[String!]").unwrap();
        assert!(ty.is_list());
        assert_eq!(ty.base_named_type(), "String");

        match ty.value() {
            InnerType::ListInnerType(inner) => {
                assert_eq!(inner, Type::new("String!").unwrap());
            }
            InnerType::NameOfType(_) => panic!("expected a list type"),
        }

        assert_eq!(
            Type::new_list_type(Type::new("String!").unwrap(), true),
            Type::new("[String!]").unwrap(),
        );
    }

    #[test]
    fn equality_ignoring_nullability() {
        let left = Type::new("[String]!").unwrap();
        let right = Type::new("[String]").unwrap();
        assert!(left.equal_ignoring_nullability(&right));

        let incompatible = Type::new("[Int]").unwrap();
        assert!(!left.equal_ignoring_nullability(&incompatible));
    }
}
