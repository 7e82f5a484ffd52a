//! The crypto port trait.

use crate::error::CryptoError;

/// Stateless cryptographic primitives used by the chain and repository.
///
/// All implementations must be `Send + Sync`; they are shared by every
/// partition chain and called from worker threads.
pub trait CryptoPort: Send + Sync {
    /// Salted hash: `hash(seed ‖ data)`.
    fn hash(&self, seed: &[u8], data: &[u8]) -> Vec<u8>;

    /// Sign `digest` with a private signing key.
    fn sign(&self, private_key: &[u8], digest: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify a signature over `digest`. Malformed inputs verify as `false`.
    fn verify(&self, public_key: &[u8], digest: &[u8], signature: &[u8]) -> bool;

    /// Encrypt with a 32-byte symmetric key.
    fn encrypt_symmetric(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a buffer produced by [`encrypt_symmetric`](Self::encrypt_symmetric).
    fn decrypt_symmetric(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Wrap `secret` so that only the holder of `public_key`'s private half can read it.
    fn encrypt_asymmetric(&self, public_key: &[u8], secret: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Unwrap a buffer produced by [`encrypt_asymmetric`](Self::encrypt_asymmetric).
    fn decrypt_asymmetric(
        &self,
        private_key: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Fresh random bytes (seeds, symmetric keys).
    fn random_bytes(&self, len: usize) -> Vec<u8>;
}
