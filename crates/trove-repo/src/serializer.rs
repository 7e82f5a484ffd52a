//! Conversion between caller entities and signed, encrypted data messages.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use trove_chain::{ChainError, DataPartitionChain, PayloadReader};
use trove_crypto::CryptoPort;
use trove_types::{
    Entity, EntityId, KeyHash, MessageData, MessageDataDigest, MessageDataHeader,
    MessagePublicKey, MessageSecurityCastle, Roles, VersionId,
};

use crate::castle::SecurityCastleManager;
use crate::error::RepoError;
use crate::permissions::EffectivePermissions;
use crate::rights::Rights;

type Result<T> = std::result::Result<T, RepoError>;

const DIGEST_SEED_LEN: usize = 16;

/// Plaintext of an encrypted payload.
///
/// Repeats the identifying header fields so a payload cannot be replayed
/// under another entity or version.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: EntityId,
    type_name: String,
    previous_version: Option<VersionId>,
    body: serde_json::Value,
}

/// A serialized write and the castle it needs, if any.
#[derive(Debug, Clone)]
pub struct SerializedData {
    pub data: MessageData,
    pub castle: Option<MessageSecurityCastle>,
}

pub struct DataSerializer {
    crypto: Arc<dyn CryptoPort>,
    castles: SecurityCastleManager,
}

impl DataSerializer {
    pub fn new(crypto: Arc<dyn CryptoPort>) -> Self {
        Self {
            castles: SecurityCastleManager::new(Arc::clone(&crypto)),
            crypto,
        }
    }

    pub fn castles(&self) -> &SecurityCastleManager {
        &self.castles
    }

    /// Build the signed message for one write (or, with `is_delete`, a tombstone).
    pub fn to_data_message(
        &self,
        entity: &Entity,
        perms: &EffectivePermissions,
        rights: &Rights,
        lookup: impl Fn(&KeyHash) -> Option<MessagePublicKey>,
        is_delete: bool,
    ) -> Result<SerializedData> {
        let signer = rights
            .write_key_for(perms)
            .ok_or_else(|| RepoError::NoWriteRole {
                id: entity.id,
                diagnostics: perms.describe_write(),
            })?;

        let mut header = MessageDataHeader::new(entity.id, entity.type_name.clone());
        header.previous_version = entity.previous_version;
        header.merges = entity.merges.clone();
        header.parent_id = entity.parent_id;
        header.inherit_read = entity.roles.inherit_read;
        header.inherit_write = entity.roles.inherit_write;
        header.allow_read = entity.roles.allow_read.clone();
        header.allow_write = entity.roles.allow_write.clone();
        header.implicit_authority = entity.implicit_authority.clone();

        let (payload, castle) = if is_delete {
            (None, None)
        } else {
            let castle = self.castles.castle_for(&entity.partition, &perms.read, lookup)?;
            header.castle_id = Some(castle.castle.id);
            header.encrypt_key_hash = Some(castle.key_hash);

            let envelope = Envelope {
                id: entity.id,
                type_name: entity.type_name.clone(),
                previous_version: entity.previous_version,
                body: entity.body.clone(),
            };
            let plaintext = serde_json::to_vec(&envelope)?;
            let ciphertext = self.crypto.encrypt_symmetric(&castle.key, &plaintext)?;
            (Some(Bytes::from(ciphertext)), Some(castle.castle.clone()))
        };

        let mut data = MessageData::new(header, None, payload);
        let seed = self.crypto.random_bytes(DIGEST_SEED_LEN);
        let digest = self.crypto.hash(&seed, &data.digest_input()?);
        let signature = self.crypto.sign(signer.private_bytes(), &digest)?;
        data.digest = Some(MessageDataDigest {
            seed,
            digest,
            signature,
            public_key_hash: signer.hash(),
        });

        Ok(SerializedData { data, castle })
    }

    /// Decode an accepted version for the holder of `rights`.
    ///
    /// `Ok(None)` for a tombstone or a payload the caller cannot open.
    pub fn from_data_message(
        &self,
        data: &MessageData,
        chain: &DataPartitionChain,
        rights: &Rights,
    ) -> Result<Option<Entity>> {
        let header = &data.header;
        let Some(payload) = &data.payload else {
            return Ok(None);
        };
        let Some(key) = self.castles.open(chain, header, rights)? else {
            return Ok(None);
        };

        let plaintext = self.crypto.decrypt_symmetric(&key, payload)?;
        let envelope: Envelope = serde_json::from_slice(&plaintext)?;
        let corrupt = |reason: &str| RepoError::CorruptPayload {
            id: header.id,
            reason: reason.to_string(),
        };
        if envelope.id != header.id {
            return Err(corrupt("payload belongs to another entity"));
        }
        if envelope.type_name != header.payload_class {
            return Err(corrupt("payload type differs from header"));
        }
        if envelope.previous_version != header.previous_version {
            return Err(corrupt("payload previous version differs from header"));
        }

        Ok(Some(Entity {
            partition: chain.partition_key().clone(),
            id: header.id,
            type_name: envelope.type_name,
            parent_id: header.parent_id,
            version: Some(header.version),
            previous_version: Some(header.version),
            merges: BTreeSet::new(),
            roles: Roles {
                inherit_read: header.inherit_read,
                inherit_write: header.inherit_write,
                allow_read: header.allow_read.clone(),
                allow_write: header.allow_write.clone(),
            },
            implicit_authority: header.implicit_authority.clone(),
            body: envelope.body,
        }))
    }

    /// A [`PayloadReader`] decoding with `rights`.
    pub fn reader<'a>(&'a self, chain: &'a DataPartitionChain, rights: &'a Rights) -> SerializerReader<'a> {
        SerializerReader {
            serializer: self,
            chain,
            rights,
        }
    }
}

/// Decodes container versions on behalf of one caller.
pub struct SerializerReader<'a> {
    serializer: &'a DataSerializer,
    chain: &'a DataPartitionChain,
    rights: &'a Rights,
}

impl PayloadReader for SerializerReader<'_> {
    fn reader_keys(&self) -> &BTreeSet<KeyHash> {
        self.rights.read_hashes()
    }

    fn read(&self, data: &MessageData) -> std::result::Result<Option<Entity>, ChainError> {
        self.serializer
            .from_data_message(data, self.chain, self.rights)
            .map_err(|e| ChainError::Payload {
                id: data.header.id,
                reason: e.to_string(),
            })
    }
}
