//! Schema catalog for quikdb.
//!
//! The catalog describes entity types and their fields at one schema version.

mod entity;
mod field;
mod schema;
mod types;

pub use entity::{EntityDef, RecordIssue};
pub use field::FieldDef;
pub use schema::SchemaBundle;
pub use types::FieldType;
