//! Commit-log message types.
//!
//! Every entity version, public key and security castle travels through a
//! partition's log as one [`Message`]. Messages are decoded fully into owned
//! values at the trust boundary and never mutated afterwards.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::{CastleId, EntityId, KeyHash, VersionId};

type Result<T> = std::result::Result<T, TypesError>;

/// Per-version metadata of an entity, covered by the signed digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDataHeader {
    /// Entity this version belongs to.
    pub id: EntityId,
    /// Unique id of this write.
    pub version: VersionId,
    /// Version this write supersedes, if any.
    pub previous_version: Option<VersionId>,
    /// Versions absorbed by this write (non-empty only for merge commits).
    pub merges: BTreeSet<VersionId>,
    /// Structural parent entity.
    pub parent_id: Option<EntityId>,
    /// Logical type name of the payload.
    pub payload_class: String,
    /// Hash of the symmetric key the payload is encrypted with.
    pub encrypt_key_hash: Option<KeyHash>,
    /// Castle that escrows the payload key for every reader.
    pub castle_id: Option<CastleId>,
    /// Inherit read roles from the parent.
    pub inherit_read: bool,
    /// Inherit write roles from the parent.
    pub inherit_write: bool,
    /// Encryption-key hashes allowed to read this version.
    pub allow_read: BTreeSet<KeyHash>,
    /// Signing-key hashes allowed to write the next version.
    pub allow_write: BTreeSet<KeyHash>,
    /// Domains that may vouch for this record when it has nothing to attach to.
    pub implicit_authority: BTreeSet<String>,
}

impl MessageDataHeader {
    /// Create a header for a fresh version of `id` with inherited roles.
    pub fn new(id: EntityId, payload_class: impl Into<String>) -> Self {
        Self {
            id,
            version: VersionId::random(),
            previous_version: None,
            merges: BTreeSet::new(),
            parent_id: None,
            payload_class: payload_class.into(),
            encrypt_key_hash: None,
            castle_id: None,
            inherit_read: true,
            inherit_write: true,
            allow_read: BTreeSet::new(),
            allow_write: BTreeSet::new(),
            implicit_authority: BTreeSet::new(),
        }
    }

    /// Canonical bytes of the header, as hashed into the digest.
    ///
    /// postcard encodes the ordered sets deterministically, so equal headers
    /// always produce equal bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// A record that nobody can write again.
    pub fn is_immutable(&self) -> bool {
        !self.inherit_write && self.allow_write.is_empty()
    }
}

/// Signature block attached to a data message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDataDigest {
    /// Random salt mixed into the digest.
    pub seed: Vec<u8>,
    /// `hash(seed, header_bytes ‖ payload_bytes)`.
    pub digest: Vec<u8>,
    /// Signature over `digest`.
    pub signature: Vec<u8>,
    /// Hash of the signing key.
    pub public_key_hash: KeyHash,
}

/// One version of an entity: header, digest and encrypted payload.
///
/// A message without payload is a tombstone for the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    pub header: MessageDataHeader,
    pub digest: Option<MessageDataDigest>,
    pub payload: Option<Bytes>,
}

impl MessageData {
    /// Create a data message.
    pub fn new(
        header: MessageDataHeader,
        digest: Option<MessageDataDigest>,
        payload: Option<Bytes>,
    ) -> Self {
        Self {
            header,
            digest,
            payload,
        }
    }

    /// Whether this version carries a payload (false means deleted).
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Bytes covered by the digest: header bytes followed by the payload.
    pub fn digest_input(&self) -> Result<Vec<u8>> {
        let mut bytes = self.header.to_bytes()?;
        if let Some(payload) = &self.payload {
            bytes.extend_from_slice(payload);
        }
        Ok(bytes)
    }
}

/// Kind of key a [`MessagePublicKey`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Verifies signatures (write roles).
    Signing,
    /// Wraps payload keys (read roles).
    Encryption,
}

/// A public key published into a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePublicKey {
    /// Optional human-readable name.
    pub alias: Option<String>,
    pub kind: KeyKind,
    /// Raw public key bytes.
    pub public_key: Vec<u8>,
    /// blake3 of `public_key`.
    pub public_key_hash: KeyHash,
}

impl MessagePublicKey {
    /// Wrap raw public key bytes, computing their hash.
    pub fn new(kind: KeyKind, public_key: Vec<u8>, alias: Option<String>) -> Self {
        let public_key_hash = KeyHash::from_data(&public_key);
        Self {
            alias,
            kind,
            public_key,
            public_key_hash,
        }
    }

    /// Check that the advertised hash matches the key bytes.
    pub fn verify_hash(&self) -> bool {
        KeyHash::from_data(&self.public_key) == self.public_key_hash
    }
}

/// Escrow record: one symmetric key wrapped once per authorized reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSecurityCastle {
    pub id: CastleId,
    /// Reader key hash → wrapped symmetric key.
    pub gates: BTreeMap<KeyHash, Vec<u8>>,
}

/// Barrier written by a client waiting to observe its own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSync {
    pub ticket: u64,
}

/// Everything that can appear in a partition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Data(MessageData),
    PublicKey(MessagePublicKey),
    SecurityCastle(MessageSecurityCastle),
    Sync(MessageSync),
}

impl Message {
    /// Encode for the log.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode a log record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Compacted-log key under which the message is stored.
    pub fn log_key(&self) -> String {
        match self {
            Message::Data(data) => data.header.id.to_string(),
            Message::PublicKey(key) => key.public_key_hash.to_string(),
            Message::SecurityCastle(castle) => castle.id.to_string(),
            Message::Sync(sync) => format!("sync-{}", sync.ticket),
        }
    }

    /// Short name of the message kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::Data(_) => "data",
            Message::PublicKey(_) => "public-key",
            Message::SecurityCastle(_) => "security-castle",
            Message::Sync(_) => "sync",
        }
    }
}

/// Position of a delivered message within its partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Log offset.
    pub offset: u64,
    /// Compacted-log key.
    pub key: String,
    /// Wall-clock append time in milliseconds since the epoch.
    pub timestamp_ms: u64,
}

impl MessageMeta {
    pub fn new(offset: u64, key: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            offset,
            key: key.into(),
            timestamp_ms,
        }
    }
}
