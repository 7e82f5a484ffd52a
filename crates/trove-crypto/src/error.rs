//! Error types for the crypto crate.

/// Errors raised by a [`CryptoPort`](crate::CryptoPort) implementation.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key bytes have the wrong length or do not decode.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Authenticated encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// Authenticated decryption failed (wrong key or tampered ciphertext).
    #[error("decryption failed")]
    Decrypt,

    /// Ciphertext is shorter than its fixed framing.
    #[error("ciphertext too short: {len} bytes")]
    CiphertextTooShort { len: usize },
}
