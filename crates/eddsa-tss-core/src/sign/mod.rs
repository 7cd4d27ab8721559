//! Distributed signing module
//!
//! Implements three-round t-of-t Schnorr signing over additive shares,
//! producing standard Ed25519 signatures.

mod eddsa;
mod messages;

pub use eddsa::run_sign;
pub use messages::*;

use crate::{AdditiveShare, CurveId, Error, PublicKey, Result, Signature};
use dashmap::DashSet;
use std::sync::Arc;

/// Registry of additive shares already presented for signing.
///
/// Cloning shares the registry. Claiming an id twice fails, so a share that
/// was serialized and decoded again cannot produce a second signature with
/// the same registry.
#[derive(Debug, Clone, Default)]
pub struct SpentShares {
    ids: Arc<DashSet<[u8; 16]>>,
}

impl SpentShares {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `share` as used
    pub fn claim(&self, share: &AdditiveShare) -> Result<()> {
        if !self.ids.insert(*share.id()) {
            return Err(Error::ShareReused(hex::encode(share.id())));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Turn the receiver's raw signature bytes into a verified signature
///
/// Rejects any length other than the curve's signature length and any
/// signature that fails strict verification under `public_key`.
pub fn finalize_signature(
    bytes: &[u8],
    curve: CurveId,
    public_key: &PublicKey,
    message: &[u8],
) -> Result<Signature> {
    if bytes.len() != curve.signature_len() {
        return Err(Error::MalformedSignature(format!(
            "expected {} bytes for {}, got {}",
            curve.signature_len(),
            curve,
            bytes.len()
        )));
    }

    let signature = Signature::from_slice(bytes)?;
    signature.verify(public_key, message)?;
    Ok(signature)
}
