//! Message Relay Client
//!
//! [`RelayTransport`] carries protocol envelopes between parties through the
//! store-and-forward relay service. Envelopes are sealed end to end, so the
//! relay only ever sees ciphertext addressed by session, sender, receiver and
//! sequence number.

mod identity;
mod sealing;

pub use identity::{Identity, PeerIdentity};

use eddsa_tss_core::transport::{async_trait, Envelope, Transport};
use eddsa_tss_core::{Error, PartyIndex, Result, SessionId};
use msg_relay::{b64, MessageResponse, PostMessageRequest};
use reqwest::Client;
use sealing::SealedEnvelope;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default delay between polls of an empty mailbox
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// HTTP relay endpoint for one party in one session
pub struct RelayTransport {
    /// HTTP client
    client: Client,
    /// Relay service URL
    url: String,
    session_id: SessionId,
    /// This party's index
    index: PartyIndex,
    identity: Identity,
    /// Public identities of every party, in roster order
    peers: Vec<PeerIdentity>,
    /// Next sequence number per receiver
    send_seq: Vec<u64>,
    /// Next expected sequence number per sender
    recv_seq: Vec<u64>,
    /// Sender polled first on the next receive
    next_peer: PartyIndex,
    /// Request timeout
    timeout: Duration,
    poll_interval: Duration,
    closed: bool,
}

impl RelayTransport {
    /// Create a new relay endpoint.
    ///
    /// `peers[index]` must be the public half of `identity`.
    pub fn new(
        url: &str,
        session_id: SessionId,
        index: PartyIndex,
        identity: Identity,
        peers: Vec<PeerIdentity>,
    ) -> Result<Self> {
        let own = peers.get(index).ok_or_else(|| {
            Error::InvalidSessionConfig(format!(
                "party index {} out of range for {} peers",
                index,
                peers.len()
            ))
        })?;
        if own != &identity.public() {
            return Err(Error::InvalidSessionConfig(format!(
                "identity does not match roster entry {}",
                index
            )));
        }

        let n = peers.len();
        Ok(Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            session_id,
            index,
            identity,
            peers,
            send_seq: vec![0; n],
            recv_seq: vec![0; n],
            next_peer: 0,
            timeout: Duration::from_secs(30),
            poll_interval: DEFAULT_POLL_INTERVAL,
            closed: false,
        })
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the delay between polls of an empty mailbox
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Post a sealed message to the relay
    #[instrument(skip(self, payload))]
    async fn post_message(&self, to: PartyIndex, seq: u64, payload: &[u8]) -> Result<()> {
        let req = PostMessageRequest {
            session_id: hex::encode(self.session_id),
            from: self.index,
            to,
            seq,
            payload: b64::encode(payload),
        };

        let response = self
            .client
            .post(format!("{}/v1/msg", self.url))
            .json(&req)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::TransportFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::TransportFailure(format!(
                "POST failed with status: {}",
                response.status()
            )));
        }

        debug!(to, seq, "Message posted");
        Ok(())
    }

    /// Get a sealed message from the relay
    async fn get_message(&self, from: PartyIndex, seq: u64) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(format!(
                "{}/v1/msg/{}/{}/{}/{}",
                self.url,
                hex::encode(self.session_id),
                from,
                self.index,
                seq
            ))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::TransportFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::TransportFailure(format!(
                "GET failed with status: {}",
                response.status()
            )));
        }

        let msg_response: MessageResponse = response
            .json()
            .await
            .map_err(|e| Error::TransportFailure(e.to_string()))?;

        match (msg_response.found, msg_response.payload) {
            (true, Some(payload)) => b64::decode(&payload)
                .map(Some)
                .map_err(|e| Error::TransportFailure(format!("invalid base64: {}", e))),
            (true, None) => Err(Error::TransportFailure("relay returned an empty message".into())),
            (false, _) => Ok(None),
        }
    }

    fn open_from(&self, from: PartyIndex, seq: u64, bytes: &[u8]) -> Result<Envelope> {
        let sealed = SealedEnvelope::from_bytes(bytes)?;
        let header = sealing::header(&self.session_id, from, self.index, seq);
        let plaintext = sealing::open(&self.identity, &self.peers[from], &header, &sealed)?;

        let envelope: Envelope = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::TransportFailure(format!("undecodable envelope body: {}", e)))?;
        if envelope.from != from || envelope.to != self.index {
            return Err(Error::TransportFailure(format!(
                "envelope from {} to {} delivered on the {} -> {} stream",
                envelope.from, envelope.to, from, self.index
            )));
        }
        Ok(envelope)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::TransportFailure("endpoint is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn party_index(&self) -> PartyIndex {
        self.index
    }

    fn total_parties(&self) -> usize {
        self.peers.len()
    }

    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        self.ensure_open()?;

        let to = envelope.to;
        if envelope.from != self.index || to == self.index || to >= self.peers.len() {
            return Err(Error::TransportFailure(format!(
                "no route from {} to {}",
                envelope.from, to
            )));
        }

        let seq = self.send_seq[to];
        let header = sealing::header(&self.session_id, self.index, to, seq);
        let plaintext = serde_json::to_vec(&envelope)?;
        let sealed = sealing::seal(&self.identity, &self.peers[to], &header, &plaintext)?;

        self.post_message(to, seq, &sealed.to_bytes()?).await?;
        self.send_seq[to] += 1;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Envelope> {
        let n = self.peers.len();
        loop {
            self.ensure_open()?;

            for offset in 0..n {
                let from = (self.next_peer + offset) % n;
                if from == self.index {
                    continue;
                }

                let seq = self.recv_seq[from];
                if let Some(bytes) = self.get_message(from, seq).await? {
                    let envelope = self.open_from(from, seq, &bytes).map_err(|e| {
                        warn!(from, seq, error = %e, "Rejected envelope");
                        e
                    })?;
                    self.recv_seq[from] += 1;
                    self.next_peer = (from + 1) % n;
                    debug!(from, seq, round = envelope.round, "Message received");
                    return Ok(envelope);
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
