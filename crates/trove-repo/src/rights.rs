//! Private keys held by the caller of a repository.

use std::collections::BTreeSet;

use trove_crypto::{PrivateKey, trust_of_public_read, trust_of_public_write};
use trove_types::{KeyHash, KeyKind};

use crate::permissions::EffectivePermissions;

/// The caller's signing keys (write roles) and encryption keys (read roles).
///
/// The well-known public keys are always held: entities readable by
/// everyone open without extra configuration, and claimable types can be
/// created by anyone.
#[derive(Debug, Clone)]
pub struct Rights {
    write: Vec<PrivateKey>,
    read: Vec<PrivateKey>,
    read_hashes: BTreeSet<KeyHash>,
}

impl Default for Rights {
    fn default() -> Self {
        Self::new()
    }
}

impl Rights {
    pub fn new() -> Self {
        let public_read = trust_of_public_read().clone();
        Self {
            write: vec![trust_of_public_write().clone()],
            read_hashes: BTreeSet::from([public_read.hash()]),
            read: vec![public_read],
        }
    }

    /// Add a key, filed by its kind.
    pub fn with_key(mut self, key: PrivateKey) -> Self {
        self.add_key(key);
        self
    }

    pub fn add_key(&mut self, key: PrivateKey) {
        match key.kind() {
            KeyKind::Signing => {
                if !self.write.iter().any(|k| k.hash() == key.hash()) {
                    self.write.push(key);
                }
            }
            KeyKind::Encryption => {
                if self.read_hashes.insert(key.hash()) {
                    self.read.push(key);
                }
            }
        }
    }

    pub fn write_keys(&self) -> &[PrivateKey] {
        &self.write
    }

    pub fn read_keys(&self) -> &[PrivateKey] {
        &self.read
    }

    /// Hashes of every encryption key held (the reader identity).
    pub fn read_hashes(&self) -> &BTreeSet<KeyHash> {
        &self.read_hashes
    }

    /// First held signing key granted by `perms`.
    pub fn write_key_for(&self, perms: &EffectivePermissions) -> Option<&PrivateKey> {
        self.write.iter().find(|k| perms.write.contains(&k.hash()))
    }

    /// First held encryption key among `hashes`.
    pub fn read_key_for(&self, hashes: impl IntoIterator<Item = KeyHash>) -> Option<&PrivateKey> {
        hashes
            .into_iter()
            .find_map(|hash| self.read.iter().find(|k| k.hash() == hash))
    }

    pub fn can_write(&self, perms: &EffectivePermissions) -> bool {
        self.write_key_for(perms).is_some()
    }

    pub fn can_read(&self, perms: &EffectivePermissions) -> bool {
        perms.read.iter().any(|hash| self.read_hashes.contains(hash))
    }
}
