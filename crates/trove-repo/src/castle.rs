//! Security castles: one payload key escrowed for a set of readers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};
use trove_chain::{DataPartitionChain, reader_set_hash};
use trove_crypto::CryptoPort;
use trove_types::{
    CastleId, KeyHash, KeyKind, MessageDataHeader, MessagePublicKey, MessageSecurityCastle,
    PartitionKey,
};

use crate::error::RepoError;
use crate::rights::Rights;

type Result<T> = std::result::Result<T, RepoError>;

const PAYLOAD_KEY_LEN: usize = 32;

/// A castle and the plain payload key it protects.
#[derive(Debug, Clone)]
pub struct CastleKey {
    pub castle: MessageSecurityCastle,
    pub key: Vec<u8>,
    /// `KeyHash::from_data(key)`, written to the header's `encrypt_key_hash`.
    pub key_hash: KeyHash,
}

/// Creates castles for writes and opens them for reads.
///
/// Castles are reused per `(partition, reader set)` so that entities
/// sharing readers share one escrow record. Opened payload keys are cached
/// by castle id.
pub struct SecurityCastleManager {
    crypto: Arc<dyn CryptoPort>,
    created: Mutex<HashMap<(PartitionKey, KeyHash), Arc<CastleKey>>>,
    opened: Mutex<HashMap<CastleId, Vec<u8>>>,
}

impl SecurityCastleManager {
    pub fn new(crypto: Arc<dyn CryptoPort>) -> Self {
        Self {
            crypto,
            created: Mutex::new(HashMap::new()),
            opened: Mutex::new(HashMap::new()),
        }
    }

    /// Castle readable by exactly `readers` in `partition`.
    ///
    /// `lookup` resolves a reader hash to its published encryption key.
    pub fn castle_for(
        &self,
        partition: &PartitionKey,
        readers: &BTreeSet<KeyHash>,
        lookup: impl Fn(&KeyHash) -> Option<MessagePublicKey>,
    ) -> Result<Arc<CastleKey>> {
        let cache_key = (partition.clone(), reader_set_hash(readers));
        if let Some(hit) = self.created.lock().expect("castle cache lock poisoned").get(&cache_key) {
            return Ok(Arc::clone(hit));
        }

        let key = self.crypto.random_bytes(PAYLOAD_KEY_LEN);
        let mut gates = BTreeMap::new();
        for hash in readers {
            let public = lookup(hash)
                .filter(|k| k.kind == KeyKind::Encryption)
                .ok_or(RepoError::MissingPublicKey(*hash))?;
            let gate = self.crypto.encrypt_asymmetric(&public.public_key, &key)?;
            gates.insert(*hash, gate);
        }

        let castle = MessageSecurityCastle {
            id: CastleId::random(),
            gates,
        };
        debug!(%partition, castle = %castle.id, readers = readers.len(), "security castle created");

        let created = Arc::new(CastleKey {
            key_hash: KeyHash::from_data(&key),
            castle,
            key,
        });
        self.created
            .lock()
            .expect("castle cache lock poisoned")
            .insert(cache_key, Arc::clone(&created));
        Ok(created)
    }

    /// Payload key of the version described by `header`.
    ///
    /// `Ok(None)` when none of the caller's read keys has a gate in the castle.
    pub fn open(
        &self,
        chain: &DataPartitionChain,
        header: &MessageDataHeader,
        rights: &Rights,
    ) -> Result<Option<Vec<u8>>> {
        let Some(castle_id) = header.castle_id else {
            return Err(RepoError::CorruptPayload {
                id: header.id,
                reason: "payload without security castle".to_string(),
            });
        };

        let cached = self
            .opened
            .lock()
            .expect("castle cache lock poisoned")
            .get(&castle_id)
            .cloned();
        let key = match cached {
            Some(key) => key,
            None => {
                let castle = chain
                    .get_castle(&castle_id)
                    .ok_or(RepoError::CastleMissing(castle_id))?;
                let Some(reader) = rights.read_key_for(castle.gates.keys().copied()) else {
                    trace!(id = %header.id, castle = %castle_id, "no gate for caller");
                    return Ok(None);
                };
                let gate = &castle.gates[&reader.hash()];
                let key = self.crypto.decrypt_asymmetric(reader.private_bytes(), gate)?;
                self.opened
                    .lock()
                    .expect("castle cache lock poisoned")
                    .insert(castle_id, key.clone());
                key
            }
        };

        if header.encrypt_key_hash != Some(KeyHash::from_data(&key)) {
            return Err(RepoError::CorruptPayload {
                id: header.id,
                reason: "payload key does not match encrypt_key_hash".to_string(),
            });
        }
        Ok(Some(key))
    }

    /// Castles created so far.
    pub fn created(&self) -> usize {
        self.created.lock().expect("castle cache lock poisoned").len()
    }
}
