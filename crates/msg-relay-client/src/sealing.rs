//! Envelope sealing
//!
//! Each envelope is encrypted to the receiver's X25519 key under a key
//! derived from a fresh ephemeral exchange, with the routing header as
//! associated data. The sender then signs header, ephemeral key, nonce and
//! ciphertext with its Ed25519 key.

use crate::identity::{Identity, PeerIdentity};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::Signer;
use eddsa_tss_core::{Error, PartyIndex, Result, SessionId};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey as ExchangeKey};
use zeroize::Zeroizing;

const HEADER_DOMAIN: &[u8] = b"eddsa-tss/relay-envelope/v1";
const KEY_CONTEXT: &str = "eddsa-tss relay envelope v1 encryption key";

/// Envelope as stored on the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SealedEnvelope {
    ephemeral: [u8; 32],
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
    signature: Vec<u8>,
}

impl SealedEnvelope {
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (sealed, read) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| Error::TransportFailure(format!("undecodable envelope: {}", e)))?;
        if read != bytes.len() {
            return Err(Error::TransportFailure("trailing bytes after envelope".into()));
        }
        Ok(sealed)
    }
}

/// Routing data every sealed envelope is bound to
pub(crate) fn header(
    session_id: &SessionId,
    from: PartyIndex,
    to: PartyIndex,
    seq: u64,
) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_DOMAIN.len() + 32 + 24);
    header.extend_from_slice(HEADER_DOMAIN);
    header.extend_from_slice(session_id);
    header.extend_from_slice(&(from as u64).to_le_bytes());
    header.extend_from_slice(&(to as u64).to_le_bytes());
    header.extend_from_slice(&seq.to_le_bytes());
    header
}

pub(crate) fn seal(
    sender: &Identity,
    recipient: &PeerIdentity,
    header: &[u8],
    plaintext: &[u8],
) -> Result<SealedEnvelope> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral = ExchangeKey::from(&ephemeral_secret);
    let shared = ephemeral_secret.diffie_hellman(recipient.exchange_key());
    let key = envelope_key(shared.as_bytes(), &ephemeral, recipient.exchange_key());

    let nonce: [u8; 12] = rand::random();
    let ciphertext = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()))
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: header,
            },
        )
        .map_err(|_| Error::Crypto("envelope encryption failed".into()))?;

    let signature = sender
        .signing_key()
        .sign(&signed_bytes(header, ephemeral.as_bytes(), &nonce, &ciphertext));

    Ok(SealedEnvelope {
        ephemeral: ephemeral.to_bytes(),
        nonce,
        ciphertext,
        signature: signature.to_bytes().to_vec(),
    })
}

pub(crate) fn open(
    recipient: &Identity,
    sender: &PeerIdentity,
    header: &[u8],
    sealed: &SealedEnvelope,
) -> Result<Vec<u8>> {
    let signature = ed25519_dalek::Signature::from_slice(&sealed.signature)
        .map_err(|e| Error::TransportFailure(format!("malformed envelope signature: {}", e)))?;
    sender
        .verifying_key()
        .verify_strict(
            &signed_bytes(header, &sealed.ephemeral, &sealed.nonce, &sealed.ciphertext),
            &signature,
        )
        .map_err(|_| Error::TransportFailure("envelope signature does not verify".into()))?;

    let ephemeral = ExchangeKey::from(sealed.ephemeral);
    let shared = recipient.exchange_secret().diffie_hellman(&ephemeral);
    let own_key = ExchangeKey::from(recipient.exchange_secret());
    let key = envelope_key(shared.as_bytes(), &ephemeral, &own_key);

    ChaCha20Poly1305::new(Key::from_slice(key.as_slice()))
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad: header,
            },
        )
        .map_err(|_| Error::TransportFailure("envelope decryption failed".into()))
}

fn envelope_key(
    shared: &[u8; 32],
    ephemeral: &ExchangeKey,
    recipient: &ExchangeKey,
) -> Zeroizing<[u8; 32]> {
    let mut material = Zeroizing::new([0u8; 96]);
    material[..32].copy_from_slice(shared);
    material[32..64].copy_from_slice(ephemeral.as_bytes());
    material[64..].copy_from_slice(recipient.as_bytes());
    Zeroizing::new(blake3::derive_key(KEY_CONTEXT, material.as_slice()))
}

fn signed_bytes(
    header: &[u8],
    ephemeral: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(header.len() + 44 + ciphertext.len());
    data.extend_from_slice(header);
    data.extend_from_slice(ephemeral);
    data.extend_from_slice(nonce);
    data.extend_from_slice(ciphertext);
    data
}
