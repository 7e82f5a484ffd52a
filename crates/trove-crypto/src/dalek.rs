//! Default crypto provider: blake3, ed25519, ChaCha20-Poly1305 and x25519.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::CryptoError;
use crate::port::CryptoPort;

/// Symmetric and asymmetric key length in bytes.
const KEY_LEN: usize = 32;

/// Nonce length for ChaCha20-Poly1305.
const NONCE_LEN: usize = 12;

/// Poly1305 tag length.
const TAG_LEN: usize = 16;

/// Context string for deriving castle gate keys from an x25519 exchange.
const GATE_CONTEXT: &str = "trove 2024 castle gate wrap key";

/// The default [`CryptoPort`].
///
/// - `hash`: blake3 over `seed ‖ data`
/// - `sign`/`verify`: ed25519
/// - symmetric: ChaCha20-Poly1305, output is `nonce ‖ ciphertext ‖ tag`
/// - asymmetric: ephemeral-static x25519, output is `ephemeral_public ‖ symmetric(kdf(shared), secret)`
#[derive(Debug, Default, Clone, Copy)]
pub struct DalekCrypto;

impl DalekCrypto {
    pub fn new() -> Self {
        Self
    }
}

fn key_array(bytes: &[u8], what: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    bytes.try_into().map_err(|_| {
        CryptoError::InvalidKey(format!(
            "{what} must be {KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Derive the gate wrapping key from the shared secret and both public halves.
fn gate_key(shared: &[u8; 32], ephemeral: &X25519PublicKey, recipient: &X25519PublicKey) -> [u8; 32] {
    let mut material = Vec::with_capacity(3 * KEY_LEN);
    material.extend_from_slice(shared);
    material.extend_from_slice(ephemeral.as_bytes());
    material.extend_from_slice(recipient.as_bytes());
    blake3::derive_key(GATE_CONTEXT, &material)
}

impl CryptoPort for DalekCrypto {
    fn hash(&self, seed: &[u8], data: &[u8]) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(seed);
        hasher.update(data);
        hasher.finalize().as_bytes().to_vec()
    }

    fn sign(&self, private_key: &[u8], digest: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let secret = key_array(private_key, "signing key")?;
        let signing_key = SigningKey::from_bytes(&secret);
        let signature: Signature = signing_key.sign(digest);
        Ok(signature.to_bytes().to_vec())
    }

    fn verify(&self, public_key: &[u8], digest: &[u8], signature: &[u8]) -> bool {
        let Ok(public) = key_array(public_key, "verifying key") else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(digest, &signature).is_ok()
    }

    fn encrypt_symmetric(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = key_array(key, "symmetric key")?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt_symmetric(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = key_array(key, "symmetric key")?;
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::CiphertextTooShort {
                len: ciphertext.len(),
            });
        }

        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::Decrypt)
    }

    fn encrypt_asymmetric(&self, public_key: &[u8], secret: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let recipient = X25519PublicKey::from(key_array(public_key, "encryption public key")?);

        let mut ephemeral_seed = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut ephemeral_seed);
        let ephemeral = StaticSecret::from(ephemeral_seed);
        let ephemeral_public = X25519PublicKey::from(&ephemeral);

        let shared = ephemeral.diffie_hellman(&recipient);
        let wrap_key = gate_key(shared.as_bytes(), &ephemeral_public, &recipient);
        let wrapped = self.encrypt_symmetric(&wrap_key, secret)?;

        let mut out = Vec::with_capacity(KEY_LEN + wrapped.len());
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&wrapped);
        Ok(out)
    }

    fn decrypt_asymmetric(
        &self,
        private_key: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let secret = StaticSecret::from(key_array(private_key, "encryption private key")?);
        if ciphertext.len() < KEY_LEN {
            return Err(CryptoError::CiphertextTooShort {
                len: ciphertext.len(),
            });
        }

        let (ephemeral, wrapped) = ciphertext.split_at(KEY_LEN);
        let ephemeral_public = X25519PublicKey::from(key_array(ephemeral, "ephemeral key")?);
        let recipient = X25519PublicKey::from(&secret);

        let shared = secret.diffie_hellman(&ephemeral_public);
        let wrap_key = gate_key(shared.as_bytes(), &ephemeral_public, &recipient);
        self.decrypt_symmetric(&wrap_key, wrapped)
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rand::rng().fill_bytes(&mut bytes);
        bytes
    }
}
