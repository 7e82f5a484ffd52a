//! Shared types and identifiers for trove.
//!
//! This crate defines the vocabulary every other trove crate speaks:
//! identifiers ([`EntityId`], [`VersionId`], [`CastleId`], [`KeyHash`]),
//! the [`PartitionKey`] that scopes them, the commit-log messages
//! ([`MessageData`], [`MessagePublicKey`], [`MessageSecurityCastle`]),
//! the static [`ParentPolicyTable`] and the decoded [`Entity`] model.

use std::fmt;

use serde::{Deserialize, Serialize};

mod entity;
mod error;
mod message;
mod policy;

pub use entity::{Entity, Record, Roles};
pub use error::TypesError;
pub use message::{
    KeyKind, Message, MessageData, MessageDataDigest, MessageDataHeader, MessageMeta,
    MessagePublicKey, MessageSecurityCastle, MessageSync,
};
pub use policy::{ParentPolicy, ParentPolicyTable};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Create an ID by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                Self(blake3::hash(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl std::str::FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)
                    .map_err(|_| TypesError::InvalidHash(s.to_string()))?;
                Ok(Self(bytes))
            }
        }

        // Hex string in human-readable formats, raw bytes otherwise.
        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.collect_str(self)
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(serde::de::Error::custom)
                } else {
                    <[u8; 32]>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

macro_rules! define_uuid {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Generate a fresh random (v4) identifier.
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(id: uuid::Uuid) -> Self {
                Self(id)
            }
        }

        impl From<u128> for $name {
            fn from(id: u128) -> Self {
                Self(uuid::Uuid::from_u128(id))
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_uuid!(
    /// Identifier of an entity, unique within its partition.
    EntityId
);

define_uuid!(
    /// Identifier of one written version of an entity.
    VersionId
);

define_uuid!(
    /// Identifier of a security castle (key-escrow record).
    CastleId
);

define_id!(
    /// blake3 hash of a public key's bytes, used as the key's role name.
    KeyHash
);

// ---------------------------------------------------------------------------
// Partition key
// ---------------------------------------------------------------------------

/// Identifies one independently ordered commit log: a topic plus an index.
#[derive(Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PartitionKey {
    /// Topic (log) name.
    pub topic: String,
    /// Partition index within the topic.
    pub index: u32,
}

impl PartitionKey {
    /// Longest accepted topic name, in bytes.
    pub const MAX_TOPIC_LEN: usize = 255;

    /// Create a partition key. See [`validate`](Self::validate) for the
    /// checks stores apply before using it.
    pub fn new(topic: impl Into<String>, index: u32) -> Self {
        Self {
            topic: topic.into(),
            index,
        }
    }

    /// Reject empty or over-long topics.
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.topic.is_empty() || self.topic.len() > Self::MAX_TOPIC_LEN {
            return Err(TypesError::InvalidPartitionKey(self.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.index)
    }
}

impl fmt::Debug for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionKey({self})")
    }
}

impl std::str::FromStr for PartitionKey {
    type Err = TypesError;

    /// Parse the `topic:index` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (topic, index) = s
            .rsplit_once(':')
            .ok_or_else(|| TypesError::InvalidPartitionKey(s.to_string()))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| TypesError::InvalidPartitionKey(s.to_string()))?;
        let key = Self::new(topic, index);
        key.validate()?;
        Ok(key)
    }
}
