//! Entity definitions.

use super::field::FieldDef;
use super::types::FieldType;
use crate::storage::Record;
use rkyv::{Archive, Deserialize, Serialize};
use std::fmt;

/// An entity definition (table schema).
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within schema).
    pub name: String,
    /// Field definitions, in declaration order.
    pub fields: Vec<FieldDef>,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check if a field exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    /// Get the primary-key field, if the entity has one.
    pub fn primary_key(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Get all indexed fields.
    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.indexed)
    }

    /// Get all required fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.required)
    }

    /// List field names in declaration order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Give every field missing from `record` its effective default.
    pub fn fill_defaults(&self, record: &mut Record) {
        for field in &self.fields {
            if !record.has(&field.name) {
                if let Some(default) = field.effective_default() {
                    record.set(field.name.clone(), default);
                }
            }
        }
    }

    /// Check a record against this definition, collecting every problem.
    pub fn record_issues(&self, record: &Record) -> Vec<RecordIssue> {
        let mut issues = Vec::new();

        for field in &self.fields {
            match record.get(&field.name) {
                None => issues.push(RecordIssue::MissingField(field.name.clone())),
                Some(value) if value.is_null() && field.required => {
                    issues.push(RecordIssue::NullRequired(field.name.clone()))
                }
                Some(value) if !value.is_null() && !field.field_type.accepts(value) => {
                    issues.push(RecordIssue::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.field_type.clone(),
                        found: value.type_name(),
                    })
                }
                Some(_) => {}
            }
        }

        for name in record.fields.keys() {
            if !self.has_field(name) {
                issues.push(RecordIssue::UnknownField(name.clone()));
            }
        }

        let key_ok = match self.primary_key() {
            Some(pk) => record.key.as_value().as_ref() == record.get(&pk.name),
            None => record.key.is_row(),
        };
        if !key_ok {
            issues.push(RecordIssue::KeyMismatch);
        }

        issues
    }

    pub(crate) fn remove_field(&mut self, name: &str) -> Option<FieldDef> {
        let idx = self.fields.iter().position(|f| f.name == name)?;
        Some(self.fields.remove(idx))
    }
}

/// A way in which a record fails to match its entity definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIssue {
    /// A defined field has no value at all.
    MissingField(String),
    /// A required field holds null.
    NullRequired(String),
    /// A field holds a value of the wrong type.
    TypeMismatch {
        /// Field name.
        field: String,
        /// Declared type.
        expected: FieldType,
        /// Type of the stored value.
        found: &'static str,
    },
    /// The record carries a field the entity does not define.
    UnknownField(String),
    /// The record key disagrees with the primary-key field.
    KeyMismatch,
}

impl RecordIssue {
    /// The field the issue concerns, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            RecordIssue::MissingField(f)
            | RecordIssue::NullRequired(f)
            | RecordIssue::UnknownField(f) => Some(f),
            RecordIssue::TypeMismatch { field, .. } => Some(field),
            RecordIssue::KeyMismatch => None,
        }
    }
}

impl fmt::Display for RecordIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordIssue::MissingField(name) => write!(f, "field {} is missing", name),
            RecordIssue::NullRequired(name) => write!(f, "required field {} is null", name),
            RecordIssue::TypeMismatch {
                field,
                expected,
                found,
            } => write!(f, "field {} expects {}, found {}", field, expected, found),
            RecordIssue::UnknownField(name) => write!(f, "field {} is not defined", name),
            RecordIssue::KeyMismatch => write!(f, "record key does not match primary key"),
        }
    }
}
