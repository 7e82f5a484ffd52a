//! Error types for the repository crate.

use trove_bridge::BridgeError;
use trove_chain::{ChainError, RejectReason};
use trove_crypto::CryptoError;
use trove_merge::MergeError;
use trove_types::{CastleId, EntityId, KeyHash, PartitionKey, TypesError};

/// Errors raised by repository reads and by transaction flushes.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("types error: {0}")]
    Types(#[from] TypesError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ----- Reads -----
    #[error("entity {0} does not exist")]
    NotFound(EntityId),

    #[error("entity {0} has been deleted")]
    Deleted(EntityId),

    #[error("entity {0} exists but cannot be read with the current rights")]
    Unreadable(EntityId),

    #[error("payload of {id} is corrupt: {reason}")]
    CorruptPayload { id: EntityId, reason: String },

    // ----- Writes -----
    #[error("writing {0} would orphan it: no read roles remain")]
    Orphaned(EntityId),

    #[error("entity {0} is immutable")]
    Immutable(EntityId),

    #[error("no write role for {id}{diagnostics}")]
    NoWriteRole { id: EntityId, diagnostics: String },

    #[error("public key {0} is unknown to the partition and the transaction")]
    MissingPublicKey(KeyHash),

    #[error("parent policy violated by {id}: {reason}")]
    ParentPolicy { id: EntityId, reason: String },

    #[error("write of {id} rejected: {reason}")]
    Rejected { id: EntityId, reason: RejectReason },

    #[error("security castle {0} is unknown")]
    CastleMissing(CastleId),

    #[error("partition {0} did not confirm the flush in time")]
    SyncTimeout(PartitionKey),
}
