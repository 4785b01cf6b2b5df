//! Core error types.

use crate::storage::Key;
use thiserror::Error;

/// Core store errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Key decoding error.
    #[error("invalid key format")]
    InvalidKey,

    /// A record with the same primary key already exists.
    #[error("duplicate key {key} in {entity}")]
    DuplicateKey {
        /// Entity type name.
        entity: String,
        /// The conflicting key.
        key: Key,
    },

    /// Entity type is not part of the live schema.
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
