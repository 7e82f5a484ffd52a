//! Error types for the merge crate.

/// Errors raised while reconciling values.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// A value could not be converted to or from its JSON form.
    #[error("merge codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The candidates cannot be reconciled.
    #[error("merge conflict: {0}")]
    Conflict(String),
}
