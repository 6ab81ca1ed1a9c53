use thiserror::Error;

/// Errors that can arise while interacting with the world storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Returned when fetching a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A lock string on an attribute denied the requested access. Never
    /// downgraded to a silent no-op.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A value cannot be represented in storage: a reference to a missing or
    /// replaced entity, or a container whose shape changed under a proxy.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Two writers raced on the same row.
    #[error("write conflict: {0}")]
    Conflict(String),
}
