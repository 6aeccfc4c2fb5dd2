use async_graphql_value::{ConstValue, Number, Value};
use serde::{Deserialize, Serialize};

use super::ty::{InnerType, Type};

/// A value usable as a pre-bound macro edge argument or a query parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    // Order may matter here! Deserialization, if ever configured for untagged serialization,
    // will attempt each variant in order until the first one that matches. Int64 must be
    // above Uint64, which must be above Float64.
    // This is because we want to prioritize the standard Integer GraphQL type over our custom u64,
    // and prioritize exact integers over lossy floats.
    Null,
    Int64(i64),
    Uint64(u64),
    Float64(f64), // not allowed to be NaN
    String(String),
    Boolean(bool),
    Enum(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Uint64(u) => (*u).try_into().ok(),
            FieldValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int64(l0), Self::Int64(r0)) => l0 == r0,
            (Self::Uint64(l0), Self::Uint64(r0)) => l0 == r0,
            (Self::Float64(l0), Self::Float64(r0)) => {
                assert!(l0.is_finite());
                assert!(r0.is_finite());
                l0 == r0
            }
            (Self::String(l0), Self::String(r0)) => l0 == r0,
            (Self::Boolean(l0), Self::Boolean(r0)) => l0 == r0,
            (Self::Enum(l0), Self::Enum(r0)) => l0 == r0,
            (Self::List(l0), Self::List(r0)) => l0 == r0,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl Eq for FieldValue {}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

macro_rules! impl_field_value_from_int {
    ( $( $Int: ident )+ ) => {
        $(
            impl From<$Int> for FieldValue {
                fn from(v: $Int) -> Self {
                    Self::Int64(v.into())
                }
            }
        )+
    }
}

macro_rules! impl_field_value_from_uint {
    ( $( $Uint: ident )+ ) => {
        $(
            impl From<$Uint> for FieldValue {
                fn from(v: $Uint) -> Self {
                    Self::Uint64(v.into())
                }
            }
        )+
    }
}

impl_field_value_from_int!(i8 i16 i32 i64);
impl_field_value_from_uint!(u8 u16 u32 u64);

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(opt: Option<T>) -> FieldValue {
        match opt {
            Some(inner) => inner.into(),
            None => FieldValue::Null,
        }
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(v: Vec<T>) -> FieldValue {
        FieldValue::List(v.into_iter().map(Into::into).collect())
    }
}

fn convert_number_to_field_value(n: &Number) -> Result<FieldValue, String> {
    // The order here matters!
    // Int64 must be before Uint64, which must be before Float64.
    // See the comment near the definition of FieldValue for details.
    if let Some(i) = n.as_i64() {
        Ok(FieldValue::Int64(i))
    } else if let Some(u) = n.as_u64() {
        Ok(FieldValue::Uint64(u))
    } else if let Some(f) = n.as_f64() {
        Ok(FieldValue::Float64(f))
    } else {
        unreachable!()
    }
}

impl TryFrom<&Value> for FieldValue {
    type Error = String;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Number(n) => convert_number_to_field_value(n),
            Value::String(s) => Ok(Self::String(s.to_owned())),
            Value::Boolean(b) => Ok(Self::Boolean(*b)),
            Value::Enum(n) => Ok(Self::Enum(n.to_string())),
            Value::List(l) => Ok(Self::List(
                l.iter().map(Self::try_from).collect::<Result<Vec<_>, _>>()?,
            )),
            Value::Binary(_) => Err(String::from("Binary values are not supported")),
            Value::Variable(_) => Err(String::from("Cannot use a variable reference")),
            Value::Object(_) => Err(String::from("Object values are not supported")),
        }
    }
}

impl TryFrom<&ConstValue> for FieldValue {
    type Error = String;

    fn try_from(value: &ConstValue) -> Result<Self, Self::Error> {
        FieldValue::try_from(&value.clone().into_value())
    }
}

/// Check whether the given value is a valid inhabitant of the given GraphQL type.
pub fn is_argument_type_valid(value_type: &Type, argument_value: &FieldValue) -> bool {
    match argument_value {
        FieldValue::Null => {
            // This is a valid value only if the type is nullable.
            value_type.is_nullable()
        }
        FieldValue::Int64(_) | FieldValue::Uint64(_) => match value_type.value() {
            InnerType::NameOfType(name) => name == "Int",
            InnerType::ListInnerType(..) => false,
        },
        FieldValue::Float64(_) => match value_type.value() {
            InnerType::NameOfType(name) => name == "Float",
            InnerType::ListInnerType(..) => false,
        },
        FieldValue::String(_) => match value_type.value() {
            InnerType::NameOfType(name) => name == "String" || name == "ID",
            InnerType::ListInnerType(..) => false,
        },
        FieldValue::Boolean(_) => match value_type.value() {
            InnerType::NameOfType(name) => name == "Boolean",
            InnerType::ListInnerType(..) => false,
        },
        FieldValue::Enum(_) => match value_type.value() {
            // Any named non-builtin type could be an enum as far as the value can tell;
            // the schema is the arbiter of whether the variant exists, and values here
            // have already passed schema validation.
            InnerType::NameOfType(..) => true,
            InnerType::ListInnerType(..) => false,
        },
        FieldValue::List(contents) => match value_type.value() {
            InnerType::ListInnerType(inner) => {
                contents.iter().all(|value| is_argument_type_valid(&inner, value))
            }
            InnerType::NameOfType(..) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{is_argument_type_valid, FieldValue};
    use crate::ir::Type;

    #[test]
    fn null_is_valid_only_for_nullable_types() {
        assert!(is_argument_type_valid(&Type::new("Int").unwrap(), &FieldValue::Null));
        assert!(!is_argument_type_valid(&Type::new("Int!").unwrap(), &FieldValue::Null));
    }

    #[test]
    fn scalars_match_their_types() {
        assert!(is_argument_type_valid(&Type::new("Int!").unwrap(), &FieldValue::Int64(-1)));
        assert!(is_argument_type_valid(&Type::new("String").unwrap(), &"x".into()));
        assert!(is_argument_type_valid(&Type::new("Boolean!").unwrap(), &true.into()));

        assert!(!is_argument_type_valid(&Type::new("String!").unwrap(), &FieldValue::Int64(3)));
        assert!(!is_argument_type_valid(&Type::new("Int!").unwrap(), &"x".into()));
    }

    #[test]
    fn lists_check_their_contents() {
        let list_of_ints = Type::new("[Int!]!").unwrap();
        let value: FieldValue = vec![1i64, 2, 3].into();
        assert!(is_argument_type_valid(&list_of_ints, &value));

        let mixed = FieldValue::List(vec![FieldValue::Int64(1), "oops".into()]);
        assert!(!is_argument_type_valid(&list_of_ints, &mixed));

        let nullable_contents = Type::new("[Int]!").unwrap();
        let with_null = FieldValue::List(vec![FieldValue::Int64(1), FieldValue::Null]);
        assert!(is_argument_type_valid(&nullable_contents, &with_null));
        assert!(!is_argument_type_valid(&list_of_ints, &with_null));
    }
}
