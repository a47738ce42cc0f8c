//! Cryptographic primitives.
//!
//! - SHA-256 for instance ids, instruction hashes and signing targets
//! - Ed25519 and ML-DSA-65 (FIPS 204) for identities and detached proofs

mod hash;
mod signature;

pub use hash::{hash_data, Hash, Hasher, HASH_SIZE};
pub use signature::{
    verify, Scheme, Signer, ED25519_PUBKEY_SIZE, ED25519_SIGNATURE_SIZE, ML_DSA65_PUBKEY_SIZE,
    ML_DSA65_SIGNATURE_SIZE, SEED_SIZE,
};

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,
    /// Invalid public key format
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    /// Invalid hash format
    #[error("invalid hash: {0}")]
    InvalidHash(String),
    /// Invalid seed format
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
    /// Invalid identity text or encoding
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    /// Signer failed to produce a signature
    #[error("signing failed")]
    SigningFailed,
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
