//! DKG message types

use crate::primitives::DlogProof;
use crate::{CurveId, PartyIndex};
use serde::{Deserialize, Serialize};

/// Round 1 message: dealing commitments and proof of the dealt secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound1Message {
    /// Sender party index
    pub party_index: PartyIndex,
    pub curve: CurveId,
    /// Fingerprint of the access structure the sender is dealing under
    pub policy_fingerprint: [u8; 32],
    /// Digest of the roster the sender was configured with
    pub roster_digest: [u8; 32],
    /// Feldman commitments per tree node, pre-order
    pub commitments: Vec<Vec<[u8; 32]>>,
    /// Knowledge of the dealt secret (root constant term)
    pub proof: DlogProof,
}

/// Round 2 message: leaf share for the receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound2Message {
    /// Sender party index
    pub from: PartyIndex,
    /// Receiver party index
    pub to: PartyIndex,
    pub share: [u8; 32],
}

/// Round 3 message: transcript confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound3Message {
    /// Sender party index
    pub party_index: PartyIndex,
    /// Digest over every dealer's commitments and the group key
    pub transcript_digest: [u8; 32],
}
