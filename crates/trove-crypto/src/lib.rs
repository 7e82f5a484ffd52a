//! Cryptographic boundary of trove.
//!
//! The chain and repository only ever talk to [`CryptoPort`]: a stateless
//! byte-in/byte-out interface for hashing, signing, symmetric payload
//! encryption and asymmetric key wrapping. [`DalekCrypto`] is the default
//! provider (blake3, ed25519, ChaCha20-Poly1305, x25519).
//!
//! Key material lives in [`PrivateKey`]. The two well-known keys,
//! [`trust_of_public_read`] and [`trust_of_public_write`], are derived from
//! fixed seeds so that every node agrees on them without coordination.

mod dalek;
mod error;
mod keys;
mod port;


pub use dalek::DalekCrypto;
pub use error::CryptoError;
pub use keys::{PrivateKey, trust_of_public_read, trust_of_public_write};
pub use port::CryptoPort;
