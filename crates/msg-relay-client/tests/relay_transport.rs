//! Protocol runs over a live relay service

use eddsa_tss_core::transport::{Envelope, Transport};
use eddsa_tss_core::{
    run_dkg, run_sign, to_additive_share, AccessStructure, CurveId, Error, Quorum, Session,
    SpentShares,
};
use msg_relay::{b64, MessageResponse, MessageStore, PostMessageRequest};
use msg_relay_client::{Identity, PeerIdentity, RelayTransport};
use std::time::Duration;

async fn start_relay() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, msg_relay_svc::router(MessageStore::default()))
            .await
            .unwrap();
    });
    format!("http://{}", address)
}

fn transports(
    url: &str,
    session_id: [u8; 32],
    identities: Vec<Identity>,
) -> Vec<RelayTransport> {
    let peers: Vec<PeerIdentity> = identities.iter().map(Identity::public).collect();
    identities
        .into_iter()
        .enumerate()
        .map(|(index, identity)| {
            RelayTransport::new(url, session_id, index, identity, peers.clone())
                .unwrap()
                .with_poll_interval(Duration::from_millis(10))
        })
        .collect()
}

fn envelope(from: usize, to: usize, payload: &[u8]) -> Envelope {
    Envelope {
        from,
        to,
        round: 1,
        payload: payload.to_vec(),
    }
}

#[tokio::test]
async fn test_keygen_and_sign_over_relay() {
    let url = start_relay().await;
    let names: Vec<String> = vec!["server".into(), "kms".into(), "pin".into()];
    let access = AccessStructure::threshold_of(&names, 2, CurveId::Ed25519).unwrap();

    let identities: Vec<Identity> = (0..3).map(|_| Identity::generate()).collect();
    let keys: Vec<String> = identities
        .iter()
        .map(|i| i.to_json().unwrap().to_string())
        .collect();

    let handles: Vec<_> = transports(&url, rand::random(), identities)
        .into_iter()
        .enumerate()
        .map(|(index, transport)| {
            let names = names.clone();
            let access = access.clone();
            tokio::spawn(async move {
                let mut session = Session::open(transport, 3, index, names).unwrap();
                let output = run_dkg(&mut session, &access).await.unwrap();
                session.close().await.unwrap();
                output
            })
        })
        .collect();

    let mut shares = Vec::new();
    for handle in handles {
        shares.push(handle.await.unwrap().key_share);
    }
    let public_key = shares[0].public_key;
    assert!(shares.iter().all(|s| s.public_key == public_key));

    // server (0) and pin (2) sign in a fresh session
    let quorum = Quorum::new(&access, &["server", "pin"]).unwrap();
    let members = [0usize, 2];
    let identities: Vec<Identity> = members
        .iter()
        .map(|&i| Identity::from_json(&keys[i]).unwrap())
        .collect();
    let spent = SpentShares::new();

    let handles: Vec<_> = transports(&url, rand::random(), identities)
        .into_iter()
        .zip(members)
        .enumerate()
        .map(|(index, (transport, member))| {
            let share = to_additive_share(&shares[member], &access, &quorum).unwrap();
            let names = quorum.names().to_vec();
            let spent = spent.clone();
            tokio::spawn(async move {
                let mut session = Session::open(transport, 2, index, names).unwrap();
                let output = run_sign(&mut session, share, b"test", 0, &spent)
                    .await
                    .unwrap();
                session.close().await.unwrap();
                output
            })
        })
        .collect();

    let mut outputs = Vec::new();
    for handle in handles {
        outputs.push(handle.await.unwrap());
    }
    assert!(outputs[1].is_none());
    let signature = outputs[0].take().unwrap();

    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&public_key).unwrap();
    let signature = ed25519_dalek::Signature::from_slice(&signature).unwrap();
    verifying_key.verify_strict(b"test", &signature).unwrap();
}

#[tokio::test]
async fn test_forged_sender_is_rejected() {
    let url = start_relay().await;
    let session_id = rand::random();

    let alice = Identity::generate();
    let bob = Identity::generate();
    let roster = vec![alice.public(), bob.public()];

    // Mallory posts into Alice's stream using her own keys
    let mallory = Identity::generate();
    let mallory_public = mallory.public();
    let mut forger = RelayTransport::new(
        &url,
        session_id,
        0,
        mallory,
        vec![mallory_public, roster[1].clone()],
    )
    .unwrap();
    forger.send(envelope(0, 1, b"forged")).await.unwrap();

    let mut receiver = RelayTransport::new(&url, session_id, 1, bob, roster)
        .unwrap()
        .with_poll_interval(Duration::from_millis(10));
    let result = tokio::time::timeout(Duration::from_secs(5), receiver.receive())
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::TransportFailure(_))));
}

#[tokio::test]
async fn test_replayed_message_is_rejected() {
    let url = start_relay().await;
    let session_id: [u8; 32] = rand::random();
    let mut endpoints = transports(
        &url,
        session_id,
        vec![Identity::generate(), Identity::generate()],
    );
    let mut receiver = endpoints.pop().unwrap();
    let mut sender = endpoints.pop().unwrap();

    sender.send(envelope(0, 1, b"once")).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), receiver.receive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.payload, b"once");

    // Copy the stored ciphertext into the next slot of the same stream
    let client = reqwest::Client::new();
    let session = hex::encode(session_id);
    let stored: MessageResponse = client
        .get(format!("{}/v1/msg/{}/0/1/0", url, session))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let replay = PostMessageRequest {
        session_id: session,
        from: 0,
        to: 1,
        seq: 1,
        payload: stored.payload.unwrap(),
    };
    assert!(b64::decode(&replay.payload).is_ok());
    let posted = client
        .post(format!("{}/v1/msg", url))
        .json(&replay)
        .send()
        .await
        .unwrap();
    assert!(posted.status().is_success());

    let result = tokio::time::timeout(Duration::from_secs(5), receiver.receive())
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::TransportFailure(_))));
}
