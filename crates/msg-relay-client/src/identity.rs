//! Long-term party identities
//!
//! An identity pairs an Ed25519 key that signs outgoing envelopes with an
//! X25519 key that incoming envelopes are encrypted to. Only the public half
//! is shared with other parties.

use ed25519_dalek::{SigningKey, VerifyingKey};
use eddsa_tss_core::{Error, Result};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as ExchangeKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// A party's secret identity keys
pub struct Identity {
    signing_key: SigningKey,
    exchange_secret: StaticSecret,
}

impl Identity {
    /// Generate fresh identity keys
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            exchange_secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Public half to hand to peers
    pub fn public(&self) -> PeerIdentity {
        PeerIdentity {
            verifying_key: self.signing_key.verifying_key(),
            exchange_key: ExchangeKey::from(&self.exchange_secret),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub(crate) fn exchange_secret(&self) -> &StaticSecret {
        &self.exchange_secret
    }

    /// Encode the secret keys as JSON
    pub fn to_json(&self) -> Result<Zeroizing<String>> {
        let file = IdentityFile {
            signing_key: hex::encode(self.signing_key.to_bytes()),
            exchange_key: hex::encode(self.exchange_secret.to_bytes()),
        };
        Ok(Zeroizing::new(serde_json::to_string_pretty(&file)?))
    }

    /// Decode secret keys written by [`Identity::to_json`]
    pub fn from_json(json: &str) -> Result<Self> {
        let file: IdentityFile =
            serde_json::from_str(json).map_err(|e| Error::Deserialization(e.to_string()))?;
        let signing_key = decode_key(&file.signing_key)?;
        let exchange_key = decode_key(&file.exchange_key)?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&signing_key),
            exchange_secret: StaticSecret::from(*exchange_key),
        })
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct IdentityFile {
    signing_key: String,
    exchange_key: String,
}

fn decode_key(encoded: &str) -> Result<Zeroizing<[u8; 32]>> {
    let bytes = Zeroizing::new(
        hex::decode(encoded)
            .map_err(|e| Error::Deserialization(format!("invalid key hex: {}", e)))?,
    );
    let mut key = Zeroizing::new([0u8; 32]);
    if bytes.len() != key.len() {
        return Err(Error::Deserialization(format!(
            "expected a 32-byte key, got {} bytes",
            bytes.len()
        )));
    }
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Public identity of a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PeerIdentityHex", into = "PeerIdentityHex")]
pub struct PeerIdentity {
    verifying_key: VerifyingKey,
    exchange_key: ExchangeKey,
}

impl PeerIdentity {
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn exchange_key(&self) -> &ExchangeKey {
        &self.exchange_key
    }
}

#[derive(Serialize, Deserialize)]
struct PeerIdentityHex {
    signing_key: String,
    exchange_key: String,
}

impl TryFrom<PeerIdentityHex> for PeerIdentity {
    type Error = Error;

    fn try_from(value: PeerIdentityHex) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(&*decode_key(&value.signing_key)?)
            .map_err(|e| Error::Deserialization(format!("invalid verifying key: {}", e)))?;
        let exchange_key = ExchangeKey::from(*decode_key(&value.exchange_key)?);
        Ok(Self {
            verifying_key,
            exchange_key,
        })
    }
}

impl From<PeerIdentity> for PeerIdentityHex {
    fn from(value: PeerIdentity) -> Self {
        Self {
            signing_key: hex::encode(value.verifying_key.as_bytes()),
            exchange_key: hex::encode(value.exchange_key.as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_json_keeps_keys() {
        let identity = Identity::generate();
        let json = identity.to_json().unwrap();
        let restored = Identity::from_json(&json).unwrap();

        assert_eq!(identity.public(), restored.public());
    }

    #[test]
    fn test_peer_identity_json() {
        let public = Identity::generate().public();
        let json = serde_json::to_string(&public).unwrap();
        let parsed: PeerIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, public);

        let truncated = json.replacen("\"signing_key\":\"", "\"signing_key\":\"00", 1);
        assert!(serde_json::from_str::<PeerIdentity>(&truncated).is_err());
    }
}
