//! Signer identities: a scheme-tagged public key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::{self, CryptoError, CryptoResult, Scheme, Signer};

/// An authorization identity.
///
/// Text form is `<scheme>:<hex public key>`, e.g. `ed25519:3b6a..`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    scheme: Scheme,
    public_key: Vec<u8>,
}

impl Identity {
    /// Create from a scheme and raw public key
    ///
    /// # Errors
    /// Returns error if the key length does not match the scheme
    pub fn new(scheme: Scheme, public_key: Vec<u8>) -> CryptoResult<Self> {
        if public_key.len() != scheme.public_key_len() {
            return Err(CryptoError::InvalidPublicKey(format!(
                "{} key must be {} bytes, got {}",
                scheme,
                scheme.public_key_len(),
                public_key.len()
            )));
        }
        Ok(Self { scheme, public_key })
    }

    /// Identity of a signer
    #[must_use]
    pub fn from_signer(signer: &Signer) -> Self {
        Self {
            scheme: signer.scheme(),
            public_key: signer.public_key().to_vec(),
        }
    }

    /// Signature scheme
    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Raw public key bytes
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Scheme tag followed by the public key; this is what instruction hashes commit to
    #[must_use]
    pub fn public_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.scheme.tag().len() + 1 + self.public_key.len());
        out.extend_from_slice(self.scheme.tag().as_bytes());
        out.push(b':');
        out.extend_from_slice(&self.public_key);
        out
    }

    /// Verify a signature made by this identity
    ///
    /// # Errors
    /// Returns error if the signature does not verify
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> CryptoResult<()> {
        crypto::verify(self.scheme, &self.public_key, message, signature)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, hex::encode(&self.public_key))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.public_key);
        write!(f, "Identity({}:{}..)", self.scheme, &hex[..hex.len().min(16)])
    }
}

impl FromStr for Identity {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, key_hex) = s
            .split_once(':')
            .ok_or_else(|| CryptoError::InvalidIdentity(format!("missing scheme in {s:?}")))?;
        let scheme = Scheme::from_tag(tag)
            .ok_or_else(|| CryptoError::InvalidIdentity(format!("unknown scheme {tag:?}")))?;
        let key = hex::decode(key_hex).map_err(|e| CryptoError::InvalidIdentity(e.to_string()))?;
        Self::new(scheme, key)
    }
}

impl TryFrom<String> for Identity {
    type Error = CryptoError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.to_string()
    }
}
