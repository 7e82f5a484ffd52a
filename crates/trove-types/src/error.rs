//! Error types for the shared trove types.

/// Errors raised while encoding, decoding or converting shared types.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// Binary (postcard) encoding or decoding failed.
    #[error("wire encoding error: {0}")]
    Wire(#[from] postcard::Error),

    /// JSON body encoding or decoding failed.
    #[error("body encoding error: {0}")]
    Body(#[from] serde_json::Error),

    /// A record was decoded as the wrong type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Type the caller asked for.
        expected: String,
        /// Type stored in the entity.
        found: String,
    },

    /// A partition key string was not in `topic:index` form.
    #[error("invalid partition key: {0}")]
    InvalidPartitionKey(String),

    /// A key hash string was not 64 hex digits.
    #[error("invalid key hash: {0}")]
    InvalidHash(String),
}
