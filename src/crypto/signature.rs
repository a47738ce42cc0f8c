//! Signing keys and signature verification for the two supported schemes.
//!
//! - Ed25519 (`ed25519-dalek`), 32-byte keys, 64-byte signatures
//! - ML-DSA-65 (`ml-dsa`, FIPS 204), 1952-byte keys, 3309-byte signatures
//!
//! Both are derived deterministically from a 32-byte seed, so the same seed
//! always yields the same identity.

use ed25519_dalek::{
    Signature as EdSignature, Signer as _, SigningKey as EdSigningKey,
    VerifyingKey as EdVerifyingKey,
};
use ml_dsa::{
    EncodedSignature, EncodedVerifyingKey, MlDsa65, Signature as MlDsaSignature,
    SigningKey as MlDsaSigningKey, VerifyingKey as MlDsaVerifyingKey, B32,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

use super::{CryptoError, CryptoResult};

/// Seed size in bytes (both schemes)
pub const SEED_SIZE: usize = 32;
/// Ed25519 public key size in bytes
pub const ED25519_PUBKEY_SIZE: usize = 32;
/// Ed25519 signature size in bytes
pub const ED25519_SIGNATURE_SIZE: usize = 64;
/// ML-DSA-65 public key size in bytes (FIPS 204)
pub const ML_DSA65_PUBKEY_SIZE: usize = 1952;
/// ML-DSA-65 signature size in bytes (FIPS 204)
pub const ML_DSA65_SIGNATURE_SIZE: usize = 3309;

/// Supported signature schemes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Ed25519
    Ed25519,
    /// ML-DSA-65
    MlDsa65,
}

impl Scheme {
    /// Short lowercase tag used in text encodings
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::MlDsa65 => "mldsa65",
        }
    }

    /// Parse a text tag
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ed25519" => Some(Self::Ed25519),
            "mldsa65" => Some(Self::MlDsa65),
            _ => None,
        }
    }

    /// Expected public key length for this scheme
    #[must_use]
    pub const fn public_key_len(self) -> usize {
        match self {
            Self::Ed25519 => ED25519_PUBKEY_SIZE,
            Self::MlDsa65 => ML_DSA65_PUBKEY_SIZE,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A secret signing key held as its 32-byte seed.
///
/// SECURITY: no Clone or Debug; the seed is zeroized on drop.
pub struct Signer {
    scheme: Scheme,
    seed: [u8; SEED_SIZE],
    public_key: Vec<u8>,
}

impl Drop for Signer {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl Signer {
    /// Generate a fresh random signer
    #[must_use]
    pub fn generate(scheme: Scheme) -> Self {
        let mut seed = [0u8; SEED_SIZE];
        rand::thread_rng().fill_bytes(&mut seed);
        let signer = Self::from_seed(scheme, &seed);
        seed.zeroize();
        signer
    }

    /// Deterministically derive a signer from a seed
    #[must_use]
    pub fn from_seed(scheme: Scheme, seed: &[u8; SEED_SIZE]) -> Self {
        let public_key = match scheme {
            Scheme::Ed25519 => EdSigningKey::from_bytes(seed)
                .verifying_key()
                .to_bytes()
                .to_vec(),
            Scheme::MlDsa65 => {
                let sk = ml_dsa_signing_key(seed);
                let encoded = sk.verifying_key().encode();
                AsRef::<[u8]>::as_ref(&encoded).to_vec()
            }
        };
        Self {
            scheme,
            seed: *seed,
            public_key,
        }
    }

    /// Parse a hex-encoded seed
    ///
    /// # Errors
    /// Returns error if the hex is invalid or not 32 bytes
    pub fn from_seed_hex(scheme: Scheme, s: &str) -> CryptoResult<Self> {
        let mut bytes = hex::decode(s).map_err(|e| CryptoError::InvalidSeed(e.to_string()))?;
        let seed: Result<[u8; SEED_SIZE], _> = bytes.as_slice().try_into();
        bytes.zeroize();
        let mut seed = seed.map_err(|_| {
            CryptoError::InvalidSeed(format!("expected {} bytes", SEED_SIZE))
        })?;
        let signer = Self::from_seed(scheme, &seed);
        seed.zeroize();
        Ok(signer)
    }

    /// Signature scheme of this key
    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Raw public key bytes
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Seed as hex (for persistence; handle with care)
    #[must_use]
    pub fn seed_hex(&self) -> String {
        hex::encode(self.seed)
    }

    /// Sign a message
    ///
    /// # Errors
    /// Returns error if the ML-DSA signer rejects the message
    pub fn sign(&self, message: &[u8]) -> CryptoResult<Vec<u8>> {
        match self.scheme {
            Scheme::Ed25519 => {
                let sk = EdSigningKey::from_bytes(&self.seed);
                Ok(sk.sign(message).to_bytes().to_vec())
            }
            Scheme::MlDsa65 => {
                let sk = ml_dsa_signing_key(&self.seed);
                let sig = sk
                    .sign_deterministic(message, &[])
                    .map_err(|_| CryptoError::SigningFailed)?;
                let encoded = sig.encode();
                Ok(AsRef::<[u8]>::as_ref(&encoded).to_vec())
            }
        }
    }
}

/// Verify a signature for the given scheme and raw public key
///
/// # Errors
/// Returns error if the key is malformed or the signature does not verify
pub fn verify(
    scheme: Scheme,
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> CryptoResult<()> {
    match scheme {
        Scheme::Ed25519 => verify_ed25519(public_key, message, signature),
        Scheme::MlDsa65 => verify_ml_dsa65(public_key, message, signature),
    }
}

fn verify_ed25519(public_key: &[u8], message: &[u8], signature: &[u8]) -> CryptoResult<()> {
    let pk: [u8; ED25519_PUBKEY_SIZE] = public_key
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("wrong length".into()))?;
    let vk = EdVerifyingKey::from_bytes(&pk)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let sig = EdSignature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    vk.verify_strict(message, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

fn verify_ml_dsa65(public_key: &[u8], message: &[u8], signature: &[u8]) -> CryptoResult<()> {
    let vk_encoded = EncodedVerifyingKey::<MlDsa65>::try_from(public_key)
        .map_err(|_| CryptoError::InvalidPublicKey("wrong length".into()))?;
    let vk = MlDsaVerifyingKey::<MlDsa65>::decode(&vk_encoded);

    let sig_encoded = EncodedSignature::<MlDsa65>::try_from(signature)
        .map_err(|_| CryptoError::InvalidSignature)?;
    let sig = MlDsaSignature::<MlDsa65>::decode(&sig_encoded).ok_or(CryptoError::InvalidSignature)?;

    use ml_dsa::signature::Verifier;
    vk.verify(message, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

fn ml_dsa_signing_key(seed: &[u8; SEED_SIZE]) -> MlDsaSigningKey<MlDsa65> {
    let b32 = B32::from(*seed);
    MlDsaSigningKey::<MlDsa65>::from_seed(&b32)
}
