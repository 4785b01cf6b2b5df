//! Field definitions for entities.

use super::types::FieldType;
use crate::storage::Value;
use rkyv::{Archive, Deserialize, Serialize};
use std::fmt;

/// A field definition within an entity.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field data type.
    pub field_type: FieldType,
    /// Whether the field must hold a non-null value.
    pub required: bool,
    /// Value given to existing records when the field is added.
    pub default: Option<Value>,
    /// Whether this field should be indexed.
    pub indexed: bool,
    /// Whether this field is the entity's primary key.
    pub primary_key: bool,
}

impl FieldDef {
    /// Create a new required field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            default: None,
            indexed: false,
            primary_key: false,
        }
    }

    /// Create an optional field (required = false).
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::new(name, field_type)
        }
    }

    /// Create a primary-key field. Primary keys are required and indexed.
    pub fn primary(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            indexed: true,
            primary_key: true,
            ..Self::new(name, field_type)
        }
    }

    /// Create a list field. Lists are never null; they default to empty.
    pub fn list(name: impl Into<String>, field_type: FieldType) -> Self {
        let default = field_type.implicit_default();
        Self {
            default,
            ..Self::new(name, field_type)
        }
    }

    /// Set the default value.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Mark as indexed.
    pub fn with_index(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Check if this field has a default value.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// The value existing records receive when this field is added.
    ///
    /// Explicit defaults win, then the type's implicit default, then null for
    /// optional fields. Required scalars without a default have none.
    pub fn effective_default(&self) -> Option<Value> {
        self.default
            .clone()
            .or_else(|| self.field_type.implicit_default())
            .or_else(|| (!self.required).then_some(Value::Null))
    }

    /// Check whether a value satisfies this definition.
    pub fn admits(&self, value: &Value) -> bool {
        if value.is_null() {
            !self.required
        } else {
            self.field_type.accepts(value)
        }
    }
}

impl fmt::Display for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.field_type)?;
        if !self.required {
            write!(f, "?")?;
        }
        if self.primary_key {
            write!(f, " @pk")?;
        } else if self.indexed {
            write!(f, " @index")?;
        }
        Ok(())
    }
}
