//! Schnorr proof of knowledge of a discrete logarithm
//!
//! Non-interactive via a merlin transcript bound to the session and the
//! proving party, so a proof cannot be replayed into another session or
//! claimed by another party.

use super::{base_mul, decode_point, decode_scalar, encode_point, random_scalar};
use crate::{Error, PartyIndex, Result, SessionId};
use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar};
use merlin::Transcript;
use serde::{Deserialize, Serialize};

/// Proof that the sender knows `x` with `X = x·G`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlogProof {
    /// Nonce commitment `K = k·G`
    pub commitment: [u8; 32],
    /// Response `z = k + c·x`
    pub response: [u8; 32],
}

impl DlogProof {
    /// Prove knowledge of `secret` for `public = secret·G`
    pub fn prove(
        domain: &[u8],
        session_id: &SessionId,
        party: PartyIndex,
        secret: &Scalar,
        public: &EdwardsPoint,
    ) -> Self {
        let nonce = random_scalar();
        let commitment = encode_point(&base_mul(&nonce));
        let challenge = challenge(domain, session_id, party, public, &commitment);

        Self {
            commitment,
            response: (nonce + challenge * secret).to_bytes(),
        }
    }

    /// Verify the proof for `public`
    pub fn verify(
        &self,
        domain: &[u8],
        session_id: &SessionId,
        party: PartyIndex,
        public: &EdwardsPoint,
    ) -> Result<()> {
        let commitment = decode_point(&self.commitment)?;
        let response = decode_scalar(&self.response)?;
        let challenge = challenge(domain, session_id, party, public, &self.commitment);

        if base_mul(&response) != commitment + public * challenge {
            return Err(Error::VerificationFailed(format!(
                "invalid proof of knowledge from party {}",
                party
            )));
        }
        Ok(())
    }
}

fn challenge(
    domain: &[u8],
    session_id: &SessionId,
    party: PartyIndex,
    public: &EdwardsPoint,
    commitment: &[u8; 32],
) -> Scalar {
    let mut transcript = Transcript::new(b"eddsa-tss/dlog-proof");
    transcript.append_message(b"domain", domain);
    transcript.append_message(b"session", session_id);
    transcript.append_u64(b"party", party as u64);
    transcript.append_message(b"public", &encode_point(public));
    transcript.append_message(b"commitment", commitment);

    let mut wide = [0u8; 64];
    transcript.challenge_bytes(b"challenge", &mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}
