//! Core types shared by the protocol engines

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a party within a session (0-indexed)
pub type PartyIndex = usize;

/// Unique identifier for a session
pub type SessionId = [u8; 32];

/// Compressed Ed25519 public key bytes
pub type PublicKey = [u8; 32];

/// Algebraic group a policy and its key shares live in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveId {
    Ed25519,
}

impl CurveId {
    /// Fixed signature size for the curve
    pub fn signature_len(&self) -> usize {
        match self {
            CurveId::Ed25519 => 64,
        }
    }
}

impl fmt::Display for CurveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveId::Ed25519 => f.write_str("ed25519"),
        }
    }
}

/// Ed25519 signature (R || S)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Encoded nonce point
    pub r: [u8; 32],
    /// Response scalar
    pub s: [u8; 32],
}

impl Signature {
    /// Encoded length in bytes
    pub const LEN: usize = 64;

    /// Parse a signature, rejecting any length other than 64 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::LEN {
            return Err(Error::MalformedSignature(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(Self { r, s })
    }

    /// Convert to bytes (R || S)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    /// Strict Ed25519 verification against a compressed public key
    pub fn verify(&self, public_key: &PublicKey, message: &[u8]) -> Result<()> {
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(public_key)
            .map_err(|e| Error::MalformedSignature(format!("invalid public key: {}", e)))?;
        let signature = ed25519_dalek::Signature::from_bytes(&self.to_bytes());
        verifying_key
            .verify_strict(message, &signature)
            .map_err(|e| Error::MalformedSignature(e.to_string()))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

/// Base58 rendering of a public key, as used for Solana addresses
pub fn wallet_address(public_key: &PublicKey) -> String {
    bs58::encode(public_key).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_length_is_enforced() {
        assert!(matches!(
            Signature::from_slice(&[0u8; 63]),
            Err(Error::MalformedSignature(_))
        ));
        assert!(matches!(
            Signature::from_slice(&[0u8; 65]),
            Err(Error::MalformedSignature(_))
        ));

        let mut bytes = [0u8; 64];
        bytes[0] = 1;
        bytes[63] = 2;
        let sig = Signature::from_slice(&bytes).unwrap();
        assert_eq!(sig.to_bytes(), bytes);
    }

    #[test]
    fn test_curve_sizes() {
        assert_eq!(CurveId::Ed25519.signature_len(), 64);
        assert_eq!(CurveId::Ed25519.to_string(), "ed25519");
    }
}
