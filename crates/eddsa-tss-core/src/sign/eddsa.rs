//! Threshold EdDSA signing over additive shares

use super::{PartialSignature, SignRound1Message, SignRound2Message, SpentShares};
use crate::access::quorum_digest;
use crate::primitives::{
    base_mul, decode_point, decode_scalar, digest, digest_eq, encode_point, random_scalar,
    DlogProof,
};
use crate::session::Session;
use crate::transport::Transport;
use crate::{AdditiveShare, Error, PartyIndex, Result, SessionId};
use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};
use zeroize::Zeroize;

const NONCE_PROOF_DOMAIN: &[u8] = b"eddsa-tss/sign/nonce";

/// Run the signing protocol for one quorum member
///
/// The session roster must be the share's quorum in canonical order. Three
/// rounds:
/// 1. broadcast a commitment to the nonce point plus digests of the message,
///    quorum and group key
/// 2. open the nonce point with a proof of knowledge
/// 3. send the partial signature to `receiver`
///
/// The receiver checks every partial against the sender's nonce point and
/// additive public share and returns the 64-byte signature `R || s`. Every
/// other member returns `None`.
#[instrument(skip_all, fields(party_index = session.party_index(), receiver = receiver))]
pub async fn run_sign<T: Transport>(
    session: &mut Session<T>,
    share: AdditiveShare,
    message: &[u8],
    receiver: PartyIndex,
    spent: &SpentShares,
) -> Result<Option<Vec<u8>>> {
    check_session(session, &share, receiver)?;
    spent.claim(&share)?;

    let me = session.party_index();
    let group_key = *share.public_key();
    let public_key = decode_point(&group_key)?;
    let additive_publics = share
        .additive_publics()
        .iter()
        .map(decode_point)
        .collect::<Result<Vec<_>>>()?;
    let message_digest = digest("eddsa-tss 2024 sign message", &[message]);
    let quorum_digest = quorum_digest(share.quorum());

    info!(
        party = %share.party_name(),
        quorum = ?share.quorum(),
        "Starting signing"
    );

    // Round 1: commit to the nonce
    debug!("Sign Round 1: Nonce commitment");
    let mut nonce = random_scalar();
    let nonce_point = base_mul(&nonce);
    let nonce_bytes = encode_point(&nonce_point);

    let round1 = SignRound1Message {
        party_index: me,
        nonce_commitment: nonce_commitment(session.id(), me, &nonce_bytes),
        message_digest,
        quorum_digest,
        public_key: group_key,
    };
    session.broadcast(1, &round1).await?;

    let mut commitments = BTreeMap::new();
    for (from, peer) in session.collect_from_peers::<SignRound1Message>(1).await? {
        if peer.party_index != from {
            return Err(Error::ProtocolMismatch(format!(
                "party {} claims to be party {}",
                from, peer.party_index
            )));
        }
        if !digest_eq(&peer.message_digest, &message_digest) {
            return Err(Error::ProtocolMismatch(format!(
                "party {} is signing a different message",
                from
            )));
        }
        if !digest_eq(&peer.quorum_digest, &quorum_digest) {
            return Err(Error::ProtocolMismatch(format!(
                "party {} is signing with a different quorum",
                from
            )));
        }
        if !digest_eq(&peer.public_key, &group_key) {
            return Err(Error::ProtocolMismatch(format!(
                "party {} holds a share of a different key",
                from
            )));
        }
        commitments.insert(from, peer.nonce_commitment);
    }

    // Round 2: open the nonce
    debug!("Sign Round 2: Nonce opening");
    let round2 = SignRound2Message {
        party_index: me,
        nonce_point: nonce_bytes,
        proof: DlogProof::prove(NONCE_PROOF_DOMAIN, session.id(), me, &nonce, &nonce_point),
    };
    session.broadcast(2, &round2).await?;

    let mut nonce_points = BTreeMap::new();
    nonce_points.insert(me, nonce_point);
    for (from, opening) in session.collect_from_peers::<SignRound2Message>(2).await? {
        let committed = commitments
            .get(&from)
            .ok_or_else(|| Error::Internal(format!("no nonce commitment from party {}", from)))?;
        if opening.party_index != from
            || !digest_eq(
                committed,
                &nonce_commitment(session.id(), from, &opening.nonce_point),
            )
        {
            return Err(Error::VerificationFailed(format!(
                "party {} opened a nonce it did not commit to",
                from
            )));
        }

        let point = decode_point(&opening.nonce_point)?;
        opening
            .proof
            .verify(NONCE_PROOF_DOMAIN, session.id(), from, &point)?;
        nonce_points.insert(from, point);
    }

    let group_nonce: EdwardsPoint = nonce_points.values().sum();
    let r_bytes = encode_point(&group_nonce);
    let challenge = challenge(&r_bytes, &group_key, message);

    let mut s_share = nonce + challenge * share.secret;
    nonce.zeroize();
    drop(share);

    // Round 3: partial signatures to the receiver
    debug!("Sign Round 3: Partial signatures");
    if me != receiver {
        let partial = PartialSignature {
            party_index: me,
            s_share: s_share.to_bytes(),
        };
        s_share.zeroize();
        session.send_to(receiver, 3, &partial).await?;

        info!(receiver, "Partial signature delivered");
        return Ok(None);
    }

    let mut s = s_share;
    for (from, partial) in session.collect_from_peers::<PartialSignature>(3).await? {
        if partial.party_index != from {
            return Err(Error::ProtocolMismatch(format!(
                "party {} claims to be party {}",
                from, partial.party_index
            )));
        }

        let s_j = decode_scalar(&partial.s_share)?;
        let nonce_j = nonce_points
            .get(&from)
            .ok_or_else(|| Error::Internal(format!("no nonce point from party {}", from)))?;
        let public_j = additive_publics
            .get(from)
            .ok_or_else(|| Error::Internal(format!("no public share for party {}", from)))?;
        if base_mul(&s_j) != nonce_j + public_j * challenge {
            return Err(Error::VerificationFailed(format!(
                "invalid partial signature from party {}",
                from
            )));
        }

        s += s_j;
    }

    if base_mul(&s) != group_nonce + public_key * challenge {
        return Err(Error::Crypto("aggregated signature does not verify".into()));
    }

    let mut signature = Vec::with_capacity(64);
    signature.extend_from_slice(&r_bytes);
    signature.extend_from_slice(&s.to_bytes());

    info!(
        signature = hex::encode(&signature),
        "Signing completed successfully"
    );

    Ok(Some(signature))
}

fn check_session<T: Transport>(
    session: &Session<T>,
    share: &AdditiveShare,
    receiver: PartyIndex,
) -> Result<()> {
    if receiver >= session.total_parties() {
        return Err(Error::InvalidSessionConfig(format!(
            "receiver {} out of range for {} parties",
            receiver,
            session.total_parties()
        )));
    }
    if session.party_names() != share.quorum() {
        return Err(Error::InvalidSessionConfig(format!(
            "session roster {:?} is not the share's quorum {:?}",
            session.party_names(),
            share.quorum()
        )));
    }
    if session.my_name() != share.party_name() {
        return Err(Error::InvalidSessionConfig(format!(
            "share of '{}' used by '{}'",
            share.party_name(),
            session.my_name()
        )));
    }
    Ok(())
}

fn nonce_commitment(session_id: &SessionId, party: PartyIndex, nonce_point: &[u8; 32]) -> [u8; 32] {
    digest(
        "eddsa-tss 2024 sign nonce",
        &[
            session_id.as_slice(),
            &(party as u64).to_le_bytes(),
            nonce_point.as_slice(),
        ],
    )
}

/// Ed25519 challenge `e = SHA-512(R || A || M) mod ℓ`
fn challenge(r_bytes: &[u8; 32], public_key: &[u8; 32], message: &[u8]) -> Scalar {
    let hash = Sha512::new()
        .chain_update(r_bytes)
        .chain_update(public_key)
        .chain_update(message)
        .finalize();

    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hash);
    Scalar::from_bytes_mod_order_wide(&wide)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessStructure, Quorum};
    use crate::convert::to_additive_share;
    use crate::keygen::run_dkg;
    use crate::sign::finalize_signature;
    use crate::transport::MemoryNetwork;
    use crate::{CurveId, KeyShare};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn key_shares(access: &AccessStructure, roster: &[String]) -> Vec<KeyShare> {
        let n = roster.len();
        let handles: Vec<_> = MemoryNetwork::endpoints(n)
            .into_iter()
            .enumerate()
            .map(|(index, endpoint)| {
                let access = access.clone();
                let roster = roster.to_vec();
                tokio::spawn(async move {
                    let mut session = Session::open(endpoint, n, index, roster).unwrap();
                    run_dkg(&mut session, &access).await.unwrap().key_share
                })
            })
            .collect();

        let mut shares = Vec::new();
        for handle in handles {
            shares.push(handle.await.unwrap());
        }
        shares
    }

    async fn sign_with(
        shares: Vec<AdditiveShare>,
        messages: Vec<Vec<u8>>,
        receiver: PartyIndex,
        spent: &SpentShares,
    ) -> Vec<Result<Option<Vec<u8>>>> {
        let n = shares.len();
        let quorum = shares[0].quorum().to_vec();
        let handles: Vec<_> = MemoryNetwork::endpoints(n)
            .into_iter()
            .zip(shares.into_iter().zip(messages))
            .enumerate()
            .map(|(index, (endpoint, (share, message)))| {
                let quorum = quorum.clone();
                let spent = spent.clone();
                tokio::spawn(async move {
                    let mut session = Session::open(endpoint, n, index, quorum)?;
                    run_sign(&mut session, share, &message, receiver, &spent).await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    fn convert_all(
        shares: &[KeyShare],
        access: &AccessStructure,
        quorum: &Quorum,
    ) -> Vec<AdditiveShare> {
        quorum
            .names()
            .iter()
            .map(|name| {
                let share = shares.iter().find(|s| &s.party_name == name).unwrap();
                to_additive_share(share, access, quorum).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_quorum_signature_verifies() {
        let roster = names(&["server", "kms", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let shares = key_shares(&access, &roster).await;
        let public_key = shares[0].public_key;

        // A zero-share member still has to take part
        for members in [&["server", "pin"][..], &["server", "kms", "pin"]] {
            let quorum = Quorum::new(&access, members).unwrap();
            let additive = convert_all(&shares, &access, &quorum);
            let n = additive.len();
            let results =
                sign_with(additive, vec![b"test".to_vec(); n], n - 1, &SpentShares::new()).await;

            let mut outputs: Vec<Option<Vec<u8>>> =
                results.into_iter().map(|r| r.unwrap()).collect();
            let bytes = outputs.pop().unwrap().unwrap();
            assert!(outputs.iter().all(Option::is_none));

            finalize_signature(&bytes, CurveId::Ed25519, &public_key, b"test").unwrap();
            let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&public_key).unwrap();
            let signature = ed25519_dalek::Signature::from_slice(&bytes).unwrap();
            verifying_key.verify_strict(b"test", &signature).unwrap();
        }
    }

    #[tokio::test]
    async fn test_message_mismatch_is_detected() {
        let roster = names(&["server", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let shares = key_shares(&access, &roster).await;
        let quorum = Quorum::new(&access, &roster).unwrap();

        let results = sign_with(
            convert_all(&shares, &access, &quorum),
            vec![b"pay alice".to_vec(), b"pay mallory".to_vec()],
            0,
            &SpentShares::new(),
        )
        .await;

        for result in results {
            assert!(matches!(result, Err(Error::ProtocolMismatch(_))));
        }
    }

    #[tokio::test]
    async fn test_share_cannot_sign_twice() {
        let roster = names(&["server", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let shares = key_shares(&access, &roster).await;
        let quorum = Quorum::new(&access, &roster).unwrap();
        let spent = SpentShares::new();

        let additive = convert_all(&shares, &access, &quorum);
        let copy = additive[0].to_bytes().unwrap();
        for result in sign_with(additive, vec![b"test".to_vec(); 2], 0, &spent).await {
            result.unwrap();
        }
        assert_eq!(spent.len(), 2);

        let replayed = AdditiveShare::from_bytes(&copy).unwrap();
        let endpoint = MemoryNetwork::endpoints(2).remove(0);
        let mut session = Session::open(endpoint, 2, 0, quorum.names().to_vec()).unwrap();
        let result = run_sign(&mut session, replayed, b"again", 0, &spent).await;
        assert!(matches!(result, Err(Error::ShareReused(_))));
    }

    #[tokio::test]
    async fn test_session_must_match_share() {
        let roster = names(&["server", "kms", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let shares = key_shares(&access, &roster).await;
        let quorum = Quorum::new(&access, &["server", "pin"]).unwrap();
        let mut additive = convert_all(&shares, &access, &quorum);
        let spent = SpentShares::new();

        // Roster is the full party list, not the quorum
        let endpoint = MemoryNetwork::endpoints(3).remove(0);
        let mut session = Session::open(endpoint, 3, 0, roster.clone()).unwrap();
        let result = run_sign(&mut session, additive.remove(0), b"test", 0, &spent).await;
        assert!(matches!(result, Err(Error::InvalidSessionConfig(_))));
        assert!(spent.is_empty());
    }
}
