//! DKG protocol implementation

use super::{DkgOutput, DkgRound1Message, DkgRound2Message, DkgRound3Message};
use crate::access::AccessStructure;
use crate::primitives::sharing::{leaf_points, Dealing};
use crate::primitives::{
    base_mul, decode_point, decode_scalar, digest, digest_eq, encode_point, random_scalar,
    DlogProof,
};
use crate::session::Session;
use crate::transport::Transport;
use crate::{CurveId, Error, KeyShare, PartyIndex, Result};
use curve25519_dalek::edwards::EdwardsPoint;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};
use zeroize::Zeroize;

const PROOF_DOMAIN: &[u8] = b"eddsa-tss/dkg/dealt-secret";

type NodeCommitments = Vec<Vec<EdwardsPoint>>;

/// Run the distributed key generation protocol
///
/// Every party in the session deals a fresh secret over `access`. Three
/// rounds:
/// 1. broadcast the node commitments with a proof of the dealt secret
/// 2. send each peer its leaf share
/// 3. broadcast a digest of the full commitment transcript
///
/// The roster is checked against the policy before any message is sent.
#[instrument(skip_all, fields(party_index = session.party_index()))]
pub async fn run_dkg<T: Transport>(
    session: &mut Session<T>,
    access: &AccessStructure,
) -> Result<DkgOutput> {
    access.validate_roster(session.party_names())?;

    let me = session.party_index();
    let my_name = session.my_name().to_string();
    let policy_fingerprint = access.fingerprint();
    let roster_digest = roster_digest(session.party_names());

    info!(
        party = %my_name,
        n_parties = session.total_parties(),
        "Starting DKG"
    );

    // Round 1: deal a secret and commit to every node polynomial
    debug!("DKG Round 1: Commitment");
    let mut secret = random_scalar();
    let dealing = Dealing::new(access.root(), secret);
    let own_commitments = dealing.commitments();
    let proof = DlogProof::prove(PROOF_DOMAIN, session.id(), me, &secret, &base_mul(&secret));
    secret.zeroize();

    let round1 = DkgRound1Message {
        party_index: me,
        curve: access.curve(),
        policy_fingerprint,
        roster_digest,
        commitments: own_commitments
            .iter()
            .map(|node| node.iter().map(encode_point).collect())
            .collect(),
        proof,
    };
    session.broadcast(1, &round1).await?;

    let mut dealer_points = BTreeMap::new();
    dealer_points.insert(me, leaf_points(access.root(), &own_commitments)?);
    let mut dealer_commitments: BTreeMap<PartyIndex, NodeCommitments> = BTreeMap::new();
    dealer_commitments.insert(me, own_commitments);

    for (from, message) in session.collect_from_peers::<DkgRound1Message>(1).await? {
        check_round1(
            &message,
            from,
            access.curve(),
            &policy_fingerprint,
            &roster_digest,
        )?;

        let commitments = decode_commitments(&message.commitments)?;
        let points = leaf_points(access.root(), &commitments)?;
        message
            .proof
            .verify(PROOF_DOMAIN, session.id(), from, &dealt_point(&commitments)?)?;

        dealer_points.insert(from, points);
        dealer_commitments.insert(from, commitments);
    }

    // Round 2: leaf shares
    debug!("DKG Round 2: Secret sharing");
    for peer in session.peers() {
        let name = session.party_names()[peer].clone();
        let share = dealing
            .share_for(&name)
            .ok_or_else(|| Error::Internal(format!("no leaf share dealt for '{}'", name)))?;
        let share_msg = DkgRound2Message {
            from: me,
            to: peer,
            share: share.to_bytes(),
        };
        session.send_to(peer, 2, &share_msg).await?;
    }

    let mut secret_share = dealing
        .share_for(&my_name)
        .ok_or_else(|| Error::Internal(format!("no leaf share dealt for '{}'", my_name)))?;
    drop(dealing);

    for (from, share_msg) in session.collect_from_peers::<DkgRound2Message>(2).await? {
        if share_msg.from != from || share_msg.to != me {
            return Err(Error::ProtocolMismatch(format!(
                "share envelope from party {} is labelled {} -> {}",
                from, share_msg.from, share_msg.to
            )));
        }

        let share = decode_scalar(&share_msg.share)?;
        let expected = dealer_points
            .get(&from)
            .and_then(|points| points.get(&my_name))
            .ok_or_else(|| Error::Internal(format!("no commitments from party {}", from)))?;
        if base_mul(&share) != *expected {
            return Err(Error::VerificationFailed(format!(
                "share from party {} does not match its commitments",
                from
            )));
        }

        secret_share += share;
    }

    // Group key and every party's public share
    let group_point: EdwardsPoint = dealer_commitments
        .values()
        .map(dealt_point)
        .sum::<Result<EdwardsPoint>>()?;

    let mut public_shares = BTreeMap::new();
    for name in session.party_names() {
        let point = dealer_points
            .values()
            .map(|points| {
                points
                    .get(name)
                    .copied()
                    .ok_or_else(|| Error::UnknownParty(name.clone()))
            })
            .sum::<Result<EdwardsPoint>>()?;
        public_shares.insert(name.clone(), encode_point(&point));
    }

    if public_shares.get(&my_name) != Some(&encode_point(&base_mul(&secret_share))) {
        return Err(Error::Crypto(
            "combined share does not match the combined commitments".into(),
        ));
    }

    // Round 3: confirm everyone saw the same commitments
    debug!("DKG Round 3: Confirmation");
    let transcript_digest = transcript_digest(session.id(), &dealer_commitments, &group_point);
    session
        .broadcast(
            3,
            &DkgRound3Message {
                party_index: me,
                transcript_digest,
            },
        )
        .await?;

    for (from, confirm) in session.collect_from_peers::<DkgRound3Message>(3).await? {
        if confirm.party_index != from || !digest_eq(&confirm.transcript_digest, &transcript_digest)
        {
            return Err(Error::ProtocolMismatch(format!(
                "party {} confirmed a different DKG transcript",
                from
            )));
        }
    }

    let public_key = encode_point(&group_point);
    let key_share = KeyShare {
        party_name: my_name,
        party_index: me,
        curve: access.curve(),
        policy_fingerprint,
        roster: session.party_names().to_vec(),
        secret_share,
        public_key,
        public_shares,
    };
    secret_share.zeroize();

    info!(
        party_index = me,
        public_key = hex::encode(public_key),
        "DKG completed successfully"
    );

    Ok(DkgOutput {
        key_share,
        public_key,
    })
}

fn check_round1(
    message: &DkgRound1Message,
    from: PartyIndex,
    curve: CurveId,
    policy_fingerprint: &[u8; 32],
    roster_digest: &[u8; 32],
) -> Result<()> {
    if message.party_index != from {
        return Err(Error::ProtocolMismatch(format!(
            "party {} claims to be party {}",
            from, message.party_index
        )));
    }
    if message.curve != curve {
        return Err(Error::ProtocolMismatch(format!(
            "party {} runs DKG on {}",
            from, message.curve
        )));
    }
    if !digest_eq(&message.policy_fingerprint, policy_fingerprint) {
        return Err(Error::ProtocolMismatch(format!(
            "party {} uses a different access structure",
            from
        )));
    }
    if !digest_eq(&message.roster_digest, roster_digest) {
        return Err(Error::ProtocolMismatch(format!(
            "party {} uses a different party roster",
            from
        )));
    }
    Ok(())
}

fn decode_commitments(encoded: &[Vec<[u8; 32]>]) -> Result<NodeCommitments> {
    encoded
        .iter()
        .map(|node| node.iter().map(decode_point).collect::<Result<Vec<_>>>())
        .collect()
}

/// Commitment to the dealt secret (root constant term)
fn dealt_point(commitments: &NodeCommitments) -> Result<EdwardsPoint> {
    commitments
        .first()
        .and_then(|root| root.first())
        .copied()
        .ok_or_else(|| Error::VerificationFailed("dealing has no root commitment".into()))
}

fn roster_digest(names: &[String]) -> [u8; 32] {
    let parts: Vec<&[u8]> = names.iter().map(|name| name.as_bytes()).collect();
    digest("eddsa-tss 2024 dkg roster", &parts)
}

fn transcript_digest(
    session_id: &[u8; 32],
    dealer_commitments: &BTreeMap<PartyIndex, NodeCommitments>,
    group_point: &EdwardsPoint,
) -> [u8; 32] {
    let mut encoded = Vec::new();
    for (dealer, commitments) in dealer_commitments {
        encoded.extend_from_slice(&(*dealer as u64).to_le_bytes());
        for node in commitments {
            encoded.extend_from_slice(&(node.len() as u64).to_le_bytes());
            for point in node {
                encoded.extend_from_slice(&encode_point(point));
            }
        }
    }
    digest(
        "eddsa-tss 2024 dkg transcript",
        &[
            session_id.as_slice(),
            encoded.as_slice(),
            encode_point(group_point).as_slice(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessNode;
    use crate::primitives::sharing::reconstruction_coefficients;
    use crate::transport::{MemoryNetwork, MemoryTransport};
    use std::collections::BTreeSet;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn run_parties(
        policies: Vec<AccessStructure>,
        roster: Vec<String>,
    ) -> Vec<Result<DkgOutput>> {
        let n = roster.len();
        let handles: Vec<_> = MemoryNetwork::endpoints(n)
            .into_iter()
            .zip(policies)
            .enumerate()
            .map(|(index, (endpoint, access))| {
                let roster = roster.clone();
                tokio::spawn(async move {
                    let mut session = Session::open(endpoint, n, index, roster)?;
                    let output = run_dkg(&mut session, &access).await;
                    session.close().await?;
                    output
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    fn reconstructed_point(
        outputs: &[DkgOutput],
        access: &AccessStructure,
        quorum: &[&str],
    ) -> EdwardsPoint {
        let members: BTreeSet<&str> = quorum.iter().copied().collect();
        let coefficients = reconstruction_coefficients(access.root(), &members)
            .unwrap()
            .unwrap();

        outputs
            .iter()
            .filter(|o| members.contains(o.key_share.party_name.as_str()))
            .map(|o| base_mul(&(coefficients[&o.key_share.party_name] * o.key_share.secret_share)))
            .sum()
    }

    #[tokio::test]
    async fn test_two_of_three_dkg() {
        let roster = names(&["server", "kms", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();

        let outputs: Vec<DkgOutput> = run_parties(vec![access.clone(); 3], roster)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let q = outputs[0].public_key;
        for output in &outputs {
            assert_eq!(output.public_key, q);
            assert_eq!(output.key_share.public_key, q);
            assert_eq!(output.key_share.public_shares, outputs[0].key_share.public_shares);
        }

        for quorum in [&["server", "kms"][..], &["server", "pin"], &["kms", "pin"]] {
            let point = reconstructed_point(&outputs, &access, quorum);
            assert_eq!(encode_point(&point), q);
        }
    }

    #[tokio::test]
    async fn test_nested_policy_dkg() {
        let roster = names(&["server", "kms", "pin", "backup"]);
        let recovery = AccessNode::threshold(
            "recovery",
            2,
            vec![
                AccessNode::leaf("kms"),
                AccessNode::leaf("pin"),
                AccessNode::leaf("backup"),
            ],
        )
        .unwrap();
        let root = AccessNode::threshold("wallet", 2, vec![AccessNode::leaf("server"), recovery])
            .unwrap();
        let access = AccessStructure::new(root, CurveId::Ed25519).unwrap();

        let outputs: Vec<DkgOutput> = run_parties(vec![access.clone(); 4], roster)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let q = outputs[0].public_key;
        assert!(outputs.iter().all(|o| o.public_key == q));

        let point = reconstructed_point(&outputs, &access, &["server", "pin", "backup"]);
        assert_eq!(encode_point(&point), q);
    }

    #[tokio::test]
    async fn test_roster_checked_before_traffic() {
        let roster = names(&["server", "kms", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let endpoint = MemoryNetwork::endpoints(3).remove(0);
        let mut session =
            Session::open(endpoint, 3, 0, names(&["server", "kms", "backup"])).unwrap();

        let result = run_dkg(&mut session, &access).await;
        assert!(matches!(result, Err(Error::UnknownParty(name)) if name == "pin"));
    }

    #[tokio::test]
    async fn test_policy_mismatch_is_detected() {
        let roster = names(&["server", "pin"]);
        let strict = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let loose = AccessStructure::threshold_of(&roster, 1, CurveId::Ed25519).unwrap();

        for result in run_parties(vec![strict, loose], roster).await {
            assert!(matches!(result, Err(Error::ProtocolMismatch(_))));
        }
    }

    #[tokio::test]
    async fn test_bad_share_is_rejected() {
        let roster = names(&["server", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let mut endpoints = MemoryNetwork::endpoints(2);
        let cheater_endpoint: MemoryTransport = endpoints.pop().unwrap();
        let honest_endpoint = endpoints.pop().unwrap();

        let honest = {
            let access = access.clone();
            let roster = roster.clone();
            tokio::spawn(async move {
                let mut session = Session::open(honest_endpoint, 2, 0, roster)?;
                run_dkg(&mut session, &access).await
            })
        };

        // Follows round 1 honestly, then deals a share that matches nothing
        let mut cheater = Session::open(cheater_endpoint, 2, 1, roster.clone()).unwrap();
        let secret = random_scalar();
        let dealing = Dealing::new(access.root(), secret);
        let round1 = DkgRound1Message {
            party_index: 1,
            curve: CurveId::Ed25519,
            policy_fingerprint: access.fingerprint(),
            roster_digest: roster_digest(&roster),
            commitments: dealing
                .commitments()
                .iter()
                .map(|node| node.iter().map(encode_point).collect())
                .collect(),
            proof: DlogProof::prove(PROOF_DOMAIN, cheater.id(), 1, &secret, &base_mul(&secret)),
        };
        cheater.broadcast(1, &round1).await.unwrap();
        let _: Vec<(PartyIndex, DkgRound1Message)> = cheater.collect_from_peers(1).await.unwrap();
        cheater
            .send_to(
                0,
                2,
                &DkgRound2Message {
                    from: 1,
                    to: 0,
                    share: random_scalar().to_bytes(),
                },
            )
            .await
            .unwrap();

        let result = honest.await.unwrap();
        assert!(matches!(result, Err(Error::VerificationFailed(_))));
    }
}
