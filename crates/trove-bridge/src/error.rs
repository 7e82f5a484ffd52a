//! Error types for the bridge crate.

use trove_types::{PartitionKey, TypesError};

/// Errors raised while storing or delivering partition logs.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("wire format error: {0}")]
    Wire(#[from] TypesError),

    /// The delivery worker has stopped.
    #[error("bridge for {0} is closed")]
    Closed(PartitionKey),

    #[error("partition {partition} did not load within {timeout_ms} ms")]
    LoadTimeout {
        partition: PartitionKey,
        timeout_ms: u64,
    },
}

impl From<postcard::Error> for BridgeError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
