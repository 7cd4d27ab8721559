//! Message Relay Library
//!
//! Store-and-forward mailbox for MPC communication. Every message is
//! addressed by session, sender, receiver and a per-pair sequence number, and
//! is cached until its TTL expires so temporarily offline parties can catch
//! up. Payloads are opaque to the relay; clients seal them end to end.

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Relay error types
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Message not found: {0}")]
    NotFound(String),
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
    #[error("Conflicting message already stored: {0}")]
    Conflict(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Largest payload accepted by the store
pub const MAX_PAYLOAD_BYTES: usize = 1 << 20;

/// Message identifier
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageId {
    /// Session identifier (hex of 32 bytes)
    pub session_id: String,
    /// Sender party index
    pub from: usize,
    /// Receiver party index
    pub to: usize,
    /// Position in the sender -> receiver stream
    pub seq: u64,
}

impl MessageId {
    /// Create a new message ID
    pub fn new(session_id: &str, from: usize, to: usize, seq: u64) -> Self {
        Self {
            session_id: session_id.to_string(),
            from,
            to,
            seq,
        }
    }

    /// Reject identifiers no client would produce
    pub fn validate(&self) -> Result<()> {
        let session_ok = self.session_id.len() == 64
            && self.session_id.bytes().all(|b| b.is_ascii_hexdigit());
        if !session_ok {
            return Err(RelayError::InvalidFormat(format!(
                "session id must be 64 hex characters, got '{}'",
                self.session_id
            )));
        }
        if self.from == self.to {
            return Err(RelayError::InvalidFormat(format!(
                "party {} cannot message itself",
                self.from
            )));
        }
        Ok(())
    }

    /// Compute hash for lookup
    pub fn hash(&self) -> String {
        let data = format!(
            "{}:{}:{}:{}",
            self.session_id.to_ascii_lowercase(),
            self.from,
            self.to,
            self.seq
        );
        hex::encode(blake3::hash(data.as_bytes()).as_bytes())
    }
}

/// Stored message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Message ID
    pub id: MessageId,
    /// Message payload
    pub payload: Vec<u8>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
}

/// Message relay store
#[derive(Clone)]
pub struct MessageStore {
    /// Messages indexed by hash
    messages: Arc<DashMap<String, StoredMessage>>,
    /// Default TTL in seconds
    ttl_seconds: i64,
}

impl MessageStore {
    /// Create a new message store
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            messages: Arc::new(DashMap::new()),
            ttl_seconds,
        }
    }

    /// Store a message.
    ///
    /// Posting the same payload twice under one id is accepted (client
    /// retries); a different payload under an existing id is a conflict.
    pub fn put(&self, id: MessageId, payload: Vec<u8>) -> Result<String> {
        id.validate()?;
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(RelayError::InvalidFormat(format!(
                "payload of {} bytes exceeds {} bytes",
                payload.len(),
                MAX_PAYLOAD_BYTES
            )));
        }

        let hash = id.hash();
        let now = Utc::now();
        let message = StoredMessage {
            id,
            payload,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(self.ttl_seconds),
        };
        match self.messages.entry(hash.clone()) {
            Entry::Occupied(mut existing) => {
                // An expired entry that cleanup has not reached yet is free
                if existing.get().expires_at <= now {
                    existing.insert(message);
                } else if existing.get().payload != message.payload {
                    return Err(RelayError::Conflict(hash));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(message);
            }
        }
        Ok(hash)
    }

    /// Get a message by ID
    pub fn get(&self, id: &MessageId) -> Result<StoredMessage> {
        let hash = id.hash();

        self.messages
            .get(&hash)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RelayError::NotFound(hash))
    }

    /// Check if a message exists
    pub fn exists(&self, id: &MessageId) -> bool {
        self.get(id).is_ok()
    }

    /// Remove expired messages, returning how many were dropped
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let before = self.messages.len();
        self.messages.retain(|_, v| v.expires_at > now);
        let removed = before.saturating_sub(self.messages.len());
        if removed > 0 {
            debug!(removed, "Expired messages purged");
        }
        removed
    }

    /// Number of messages held for a session
    pub fn session_len(&self, session_id: &str) -> usize {
        self.messages
            .iter()
            .filter(|entry| entry.id.session_id.eq_ignore_ascii_case(session_id))
            .count()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(3600) // 1 hour default TTL
    }
}

/// Request to post a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub session_id: String,
    pub from: usize,
    pub to: usize,
    pub seq: u64,
    /// base64 encoded
    pub payload: String,
}

/// Reply to a successful post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageResponse {
    pub hash: String,
}

/// Message response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub found: bool,
    /// base64 encoded
    pub payload: Option<String>,
}

/// Error body returned by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};

    pub fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    #[test]
    fn test_message_id_hash() {
        let id1 = MessageId::new(SESSION, 0, 1, 0);
        let id2 = MessageId::new(SESSION, 0, 1, 0);
        let id3 = MessageId::new(SESSION, 0, 1, 1);
        let id4 = MessageId::new(SESSION, 1, 0, 0);

        assert_eq!(id1.hash(), id2.hash());
        assert_ne!(id1.hash(), id3.hash());
        assert_ne!(id1.hash(), id4.hash());
        assert_eq!(
            id1.hash(),
            MessageId::new(&SESSION.to_uppercase(), 0, 1, 0).hash()
        );
    }

    #[test]
    fn test_message_store() {
        let store = MessageStore::new(3600);
        let id = MessageId::new(SESSION, 0, 2, 0);

        store.put(id.clone(), vec![1, 2, 3]).unwrap();

        assert!(store.exists(&id));
        assert_eq!(store.session_len(SESSION), 1);

        let msg = store.get(&id).unwrap();
        assert_eq!(msg.payload, vec![1, 2, 3]);
        assert!(matches!(
            store.get(&MessageId::new(SESSION, 0, 2, 1)),
            Err(RelayError::NotFound(_))
        ));
    }

    #[test]
    fn test_repost_is_idempotent_but_not_overwritable() {
        let store = MessageStore::default();
        let id = MessageId::new(SESSION, 1, 0, 4);

        let hash = store.put(id.clone(), vec![7]).unwrap();
        assert_eq!(store.put(id.clone(), vec![7]).unwrap(), hash);
        assert!(matches!(
            store.put(id.clone(), vec![8]),
            Err(RelayError::Conflict(_))
        ));
        assert_eq!(store.get(&id).unwrap().payload, vec![7]);
    }

    #[test]
    fn test_invalid_ids_are_rejected() {
        let store = MessageStore::default();

        assert!(store.put(MessageId::new("abc", 0, 1, 0), vec![]).is_err());
        assert!(store.put(MessageId::new(SESSION, 1, 1, 0), vec![]).is_err());
        assert!(store
            .put(MessageId::new(SESSION, 0, 1, 0), vec![0; MAX_PAYLOAD_BYTES + 1])
            .is_err());
    }

    #[test]
    fn test_expired_messages_are_hidden_and_purged() {
        let store = MessageStore::new(0);
        let id = MessageId::new(SESSION, 0, 1, 0);
        store.put(id.clone(), vec![1]).unwrap();

        assert!(!store.exists(&id));
        assert_eq!(store.cleanup(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_slot_can_be_reused() {
        let store = MessageStore::new(0);
        let id = MessageId::new(SESSION, 0, 1, 0);
        store.put(id.clone(), vec![1]).unwrap();

        // Not yet purged, but no longer a conflict
        assert!(store.put(id.clone(), vec![2]).is_ok());
        assert_eq!(store.len(), 1);
        assert_eq!(store.cleanup(), 1);
    }
}
