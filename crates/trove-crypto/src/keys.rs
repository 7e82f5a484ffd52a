//! Private key material and the well-known trust keys.

use std::fmt;
use std::sync::LazyLock;

use ed25519_dalek::SigningKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use trove_types::{KeyHash, KeyKind, MessagePublicKey};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// A private key with its public half.
///
/// Signing keys (ed25519) grant write roles; encryption keys (x25519)
/// grant read roles.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    alias: Option<String>,
    kind: KeyKind,
    private_key: [u8; 32],
    public_key: [u8; 32],
}

impl PrivateKey {
    /// Deterministic ed25519 signing key from a 32-byte seed.
    pub fn signing_from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            alias: None,
            kind: KeyKind::Signing,
            private_key: *seed,
            public_key: signing_key.verifying_key().to_bytes(),
        }
    }

    /// Deterministic x25519 encryption key from a 32-byte seed.
    pub fn encryption_from_seed(seed: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*seed);
        Self {
            alias: None,
            kind: KeyKind::Encryption,
            private_key: secret.to_bytes(),
            public_key: X25519PublicKey::from(&secret).to_bytes(),
        }
    }

    /// Fresh random signing key.
    pub fn generate_signing() -> Self {
        Self::signing_from_seed(&random_seed())
    }

    /// Fresh random encryption key.
    pub fn generate_encryption() -> Self {
        Self::encryption_from_seed(&random_seed())
    }

    /// Attach a human-readable alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn private_bytes(&self) -> &[u8] {
        &self.private_key
    }

    pub fn public_bytes(&self) -> &[u8] {
        &self.public_key
    }

    /// Role name of this key.
    pub fn hash(&self) -> KeyHash {
        KeyHash::from_data(&self.public_key)
    }

    /// Publishable public half.
    pub fn public_key(&self) -> MessagePublicKey {
        MessagePublicKey::new(self.kind, self.public_key.to_vec(), self.alias.clone())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("alias", &self.alias)
            .field("kind", &self.kind)
            .field("hash", &self.hash())
            .finish_non_exhaustive()
    }
}

fn random_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);
    seed
}

static PUBLIC_READ: LazyLock<PrivateKey> = LazyLock::new(|| {
    PrivateKey::encryption_from_seed(&blake3::derive_key("trove 2024 trust of public read", b""))
        .with_alias("trust-of-public-read")
});

static PUBLIC_WRITE: LazyLock<PrivateKey> = LazyLock::new(|| {
    PrivateKey::signing_from_seed(&blake3::derive_key("trove 2024 trust of public write", b""))
        .with_alias("trust-of-public-write")
});

/// Well-known encryption key: data readable by this key is public.
pub fn trust_of_public_read() -> &'static PrivateKey {
    &PUBLIC_READ
}

/// Well-known signing key: claimable records are signed with it.
pub fn trust_of_public_write() -> &'static PrivateKey {
    &PUBLIC_WRITE
}
