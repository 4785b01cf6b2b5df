//! Field type definitions.

use crate::storage::Value;
use rkyv::{Archive, Deserialize, Serialize};
use std::fmt;

/// Semantic type of a field.
///
/// Flat representation without recursion: lists hold primitives or
/// references, never nested lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum FieldType {
    /// 64-bit signed integer.
    Int,
    /// UTF-8 string.
    String,
    /// Boolean value.
    Bool,
    /// Reference to one record of another entity.
    Reference {
        /// Name of the referenced entity type.
        entity: String,
    },
    /// A list of integers.
    IntList,
    /// A list of strings.
    StringList,
    /// A list of references.
    ReferenceList {
        /// Name of the referenced entity type.
        entity: String,
    },
}

impl FieldType {
    /// Create a reference field type.
    pub fn reference(entity: impl Into<String>) -> Self {
        FieldType::Reference {
            entity: entity.into(),
        }
    }

    /// Create a reference list field type.
    pub fn reference_list(entity: impl Into<String>) -> Self {
        FieldType::ReferenceList {
            entity: entity.into(),
        }
    }

    /// Check if this type is a list.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            FieldType::IntList | FieldType::StringList | FieldType::ReferenceList { .. }
        )
    }

    /// Check if this type is a single reference.
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Reference { .. })
    }

    /// Entity referenced by this type, if any.
    pub fn referenced_entity(&self) -> Option<&str> {
        match self {
            FieldType::Reference { entity } | FieldType::ReferenceList { entity } => Some(entity),
            _ => None,
        }
    }

    /// The value existing records receive when a field of this type is added
    /// without an explicit default.
    ///
    /// Lists start empty and single references start unset. Scalars have no
    /// implicit default.
    pub fn implicit_default(&self) -> Option<Value> {
        match self {
            FieldType::IntList => Some(Value::IntList(Vec::new())),
            FieldType::StringList => Some(Value::StringList(Vec::new())),
            FieldType::ReferenceList { .. } => Some(Value::RefList(Vec::new())),
            FieldType::Reference { .. } => Some(Value::Null),
            _ => None,
        }
    }

    /// Check if a non-null value has this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldType::Int, Value::Int(_))
                | (FieldType::String, Value::String(_))
                | (FieldType::Bool, Value::Bool(_))
                | (FieldType::Reference { .. }, Value::Ref(_))
                | (FieldType::IntList, Value::IntList(_))
                | (FieldType::StringList, Value::StringList(_))
                | (FieldType::ReferenceList { .. }, Value::RefList(_))
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::String => write!(f, "string"),
            FieldType::Bool => write!(f, "bool"),
            FieldType::Reference { entity } => write!(f, "&{}", entity),
            FieldType::IntList => write!(f, "int[]"),
            FieldType::StringList => write!(f, "string[]"),
            FieldType::ReferenceList { entity } => write!(f, "&{}[]", entity),
        }
    }
}
