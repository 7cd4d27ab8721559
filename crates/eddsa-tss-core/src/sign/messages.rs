//! Signing message types

use crate::primitives::DlogProof;
use crate::{PartyIndex, PublicKey};
use serde::{Deserialize, Serialize};

/// Round 1 message: nonce commitment and the inputs every member must share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRound1Message {
    /// Sender party index
    pub party_index: PartyIndex,
    /// Hash commitment to the sender's nonce point
    pub nonce_commitment: [u8; 32],
    pub message_digest: [u8; 32],
    pub quorum_digest: [u8; 32],
    /// Group key the sender's share belongs to
    pub public_key: PublicKey,
}

/// Round 2 message: nonce point opening
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRound2Message {
    /// Sender party index
    pub party_index: PartyIndex,
    /// Nonce point `R_i`
    pub nonce_point: [u8; 32],
    /// Knowledge of the nonce
    pub proof: DlogProof,
}

/// Round 3 message: partial signature for the receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialSignature {
    /// Sender party index
    pub party_index: PartyIndex,
    /// `s_i = r_i + e·x_i`
    pub s_share: [u8; 32],
}
