//! Structural edits applied by migration steps.

use super::error::MigrationError;
use crate::catalog::{EntityDef, FieldDef, SchemaBundle};
use crate::storage::Record;
use std::collections::BTreeSet;
use std::fmt;

/// One structural change to the schema.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralEdit {
    /// Add a field; existing records receive its default.
    AddField {
        /// Entity being edited.
        entity: String,
        /// The new field.
        field: FieldDef,
    },
    /// Drop a field from the schema and from every record.
    RemoveField {
        /// Entity being edited.
        entity: String,
        /// Field name.
        field: String,
    },
    /// Create a new, empty entity type.
    CreateTable(EntityDef),
    /// Add a reference or reference-list field.
    ///
    /// References are not checked for integrity; the step's transform fills
    /// them in.
    AddReference {
        /// Entity being edited.
        entity: String,
        /// The new field, of a reference type.
        field: FieldDef,
    },
}

impl StructuralEdit {
    /// The entity this edit targets.
    pub fn entity(&self) -> &str {
        match self {
            StructuralEdit::AddField { entity, .. }
            | StructuralEdit::RemoveField { entity, .. }
            | StructuralEdit::AddReference { entity, .. } => entity,
            StructuralEdit::CreateTable(def) => &def.name,
        }
    }

    /// Apply the edit to a schema description.
    ///
    /// `cleared` names the tables the same step empties before its edits;
    /// only those may gain a primary key.
    pub fn apply_to(
        &self,
        schema: &mut SchemaBundle,
        cleared: &BTreeSet<String>,
        version: u64,
    ) -> Result<(), MigrationError> {
        match self {
            StructuralEdit::AddField { entity, field } => {
                check_references(schema, field, entity, version)?;
                add_field(schema, entity, field, cleared, version)
            }
            StructuralEdit::AddReference { entity, field } => {
                if field.field_type.referenced_entity().is_none() {
                    return Err(MigrationError::inconsistency(
                        version,
                        location(entity, &field.name),
                        format!("reference field has non-reference type {}", field.field_type),
                    ));
                }
                check_references(schema, field, entity, version)?;
                add_field(schema, entity, field, cleared, version)
            }
            StructuralEdit::RemoveField { entity, field } => {
                let def = schema.get_entity_mut(entity).ok_or_else(|| {
                    MigrationError::inconsistency(version, entity.as_str(), "unknown entity")
                })?;
                match def.get_field(field) {
                    None => Err(MigrationError::inconsistency(
                        version,
                        location(entity, field),
                        "field does not exist",
                    )),
                    Some(existing) if existing.primary_key => Err(MigrationError::inconsistency(
                        version,
                        location(entity, field),
                        "cannot remove the primary key",
                    )),
                    Some(_) => {
                        def.remove_field(field);
                        Ok(())
                    }
                }
            }
            StructuralEdit::CreateTable(def) => {
                if schema.has_entity(&def.name) {
                    return Err(MigrationError::DuplicateTable {
                        version,
                        entity: def.name.clone(),
                    });
                }

                let mut seen = BTreeSet::new();
                for field in &def.fields {
                    if !seen.insert(field.name.as_str()) {
                        return Err(MigrationError::inconsistency(
                            version,
                            location(&def.name, &field.name),
                            "field declared twice",
                        ));
                    }
                    if field.primary_key && field.field_type.referenced_entity().is_some() {
                        return Err(MigrationError::inconsistency(
                            version,
                            location(&def.name, &field.name),
                            "primary key cannot be a reference",
                        ));
                    }
                    check_references(schema, field, &def.name, version)?;
                }
                if def.fields.iter().filter(|f| f.primary_key).count() > 1 {
                    return Err(MigrationError::inconsistency(
                        version,
                        def.name.as_str(),
                        "more than one primary key",
                    ));
                }

                schema.entities.insert(def.name.clone(), def.clone());
                Ok(())
            }
        }
    }

    /// Apply the edit to one record of the edited entity.
    pub fn apply_to_record(&self, record: &mut Record) {
        match self {
            StructuralEdit::AddField { field, .. } | StructuralEdit::AddReference { field, .. } => {
                if let Some(default) = field.effective_default() {
                    record.set(field.name.clone(), default);
                }
            }
            StructuralEdit::RemoveField { field, .. } => {
                record.remove(field);
            }
            StructuralEdit::CreateTable(_) => {}
        }
    }

    /// Check if the edit changes existing records.
    pub fn touches_records(&self) -> bool {
        !matches!(self, StructuralEdit::CreateTable(_))
    }
}

impl fmt::Display for StructuralEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralEdit::AddField { entity, field } => write!(f, "add {}.{}", entity, field),
            StructuralEdit::RemoveField { entity, field } => write!(f, "remove {}.{}", entity, field),
            StructuralEdit::CreateTable(def) => write!(f, "create {}", def.name),
            StructuralEdit::AddReference { entity, field } => {
                write!(f, "add reference {}.{}", entity, field)
            }
        }
    }
}

fn location(entity: &str, field: &str) -> String {
    format!("{}.{}", entity, field)
}

fn check_references(
    schema: &SchemaBundle,
    field: &FieldDef,
    owner: &str,
    version: u64,
) -> Result<(), MigrationError> {
    match field.field_type.referenced_entity() {
        Some(target) if target != owner && !schema.has_entity(target) => {
            Err(MigrationError::inconsistency(
                version,
                location(owner, &field.name),
                format!("references unknown entity {}", target),
            ))
        }
        _ => Ok(()),
    }
}

fn add_field(
    schema: &mut SchemaBundle,
    entity: &str,
    field: &FieldDef,
    cleared: &BTreeSet<String>,
    version: u64,
) -> Result<(), MigrationError> {
    let def = schema
        .get_entity_mut(entity)
        .ok_or_else(|| MigrationError::inconsistency(version, entity, "unknown entity"))?;

    if def.has_field(&field.name) {
        return Err(MigrationError::inconsistency(
            version,
            location(entity, &field.name),
            "field already exists",
        ));
    }

    if field.primary_key {
        if def.primary_key().is_some() {
            return Err(MigrationError::inconsistency(
                version,
                location(entity, &field.name),
                "entity already has a primary key",
            ));
        }
        if !cleared.contains(entity) {
            return Err(MigrationError::inconsistency(
                version,
                location(entity, &field.name),
                "primary key added without clearing the table first",
            ));
        }
    } else {
        match field.effective_default() {
            Some(default) if field.admits(&default) => {}
            Some(default) if !default.is_null() => {
                return Err(MigrationError::inconsistency(
                    version,
                    location(entity, &field.name),
                    format!("default {:?} does not fit {}", default, field.field_type),
                ));
            }
            _ => {
                return Err(MigrationError::MissingDefault {
                    version,
                    entity: entity.to_string(),
                    field: field.name.clone(),
                });
            }
        }
    }

    def.fields.push(field.clone());
    Ok(())
}
