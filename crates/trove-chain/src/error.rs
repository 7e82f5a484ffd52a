use thiserror::Error;
use trove_types::{EntityId, TypesError};

/// Errors raised by the chain outside of ordinary trust rejections.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("wire format error: {0}")]
    Wire(#[from] TypesError),

    #[error("crypto error: {0}")]
    Crypto(#[from] trove_crypto::CryptoError),

    #[error("merge error: {0}")]
    Merge(#[from] trove_merge::MergeError),

    #[error("unable to read payload of {id}: {reason}")]
    Payload { id: EntityId, reason: String },
}
