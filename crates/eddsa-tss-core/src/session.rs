//! Per-party execution context (job) for one protocol run
//!
//! A [`Session`] owns its transport endpoint for the whole run. It must be
//! closed with [`Session::close`]; dropping it still releases the endpoint.

use crate::transport::{Envelope, Transport};
use crate::{Error, PartyIndex, Result, SessionId};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

/// Default bound on a single wait for a peer message
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Execution context binding a transport endpoint to a party roster
pub struct Session<T: Transport> {
    session_id: SessionId,
    party_index: PartyIndex,
    total_parties: usize,
    party_names: Vec<String>,
    transport: T,
    /// Envelopes that arrived ahead of the round being collected
    pending: VecDeque<Envelope>,
    timeout: Duration,
    closed: bool,
}

impl<T: Transport> Session<T> {
    /// Open a session for party `my_index` of `total_parties`
    pub fn open(
        transport: T,
        total_parties: usize,
        my_index: PartyIndex,
        party_names: Vec<String>,
    ) -> Result<Self> {
        if total_parties == 0 {
            return Err(Error::InvalidSessionConfig(
                "a session needs at least one party".into(),
            ));
        }
        if my_index >= total_parties {
            return Err(Error::InvalidSessionConfig(format!(
                "party index {} out of range for {} parties",
                my_index, total_parties
            )));
        }
        if party_names.len() != total_parties {
            return Err(Error::InvalidSessionConfig(format!(
                "{} party names for {} parties",
                party_names.len(),
                total_parties
            )));
        }

        let mut seen = BTreeSet::new();
        for name in &party_names {
            if name.is_empty() || !seen.insert(name.as_str()) {
                return Err(Error::InvalidSessionConfig(format!(
                    "party names must be unique and non-empty, got {:?}",
                    party_names
                )));
            }
        }

        if transport.total_parties() != total_parties || transport.party_index() != my_index {
            return Err(Error::InvalidSessionConfig(format!(
                "transport endpoint is party {} of {}, session expects party {} of {}",
                transport.party_index(),
                transport.total_parties(),
                my_index,
                total_parties
            )));
        }

        Ok(Self {
            session_id: transport.session_id(),
            party_index: my_index,
            total_parties,
            party_names,
            transport,
            pending: VecDeque::new(),
            timeout: DEFAULT_RECEIVE_TIMEOUT,
            closed: false,
        })
    }

    /// Override the receive timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn party_index(&self) -> PartyIndex {
        self.party_index
    }

    pub fn total_parties(&self) -> usize {
        self.total_parties
    }

    pub fn party_names(&self) -> &[String] {
        &self.party_names
    }

    /// Name of the local party
    pub fn my_name(&self) -> &str {
        &self.party_names[self.party_index]
    }

    /// Indices of every other party
    pub fn peers(&self) -> Vec<PartyIndex> {
        (0..self.total_parties)
            .filter(|&i| i != self.party_index)
            .collect()
    }

    /// Send a message to one peer
    pub async fn send_to<M: Serialize>(
        &mut self,
        peer: PartyIndex,
        round: u32,
        message: &M,
    ) -> Result<()> {
        if peer == self.party_index || peer >= self.total_parties {
            return Err(Error::Internal(format!("cannot send to party {}", peer)));
        }

        let envelope = Envelope {
            from: self.party_index,
            to: peer,
            round,
            payload: serialize(message)?,
        };
        self.transport.send(envelope).await
    }

    /// Send the same message to every peer
    pub async fn broadcast<M: Serialize>(&mut self, round: u32, message: &M) -> Result<()> {
        let payload = serialize(message)?;
        for peer in self.peers() {
            let envelope = Envelope {
                from: self.party_index,
                to: peer,
                round,
                payload: payload.clone(),
            };
            self.transport.send(envelope).await?;
        }
        Ok(())
    }

    /// Next envelope addressed to this party, in delivery order
    pub async fn receive_next(&mut self) -> Result<Envelope> {
        if let Some(envelope) = self.pending.pop_front() {
            return Ok(envelope);
        }
        self.receive_from_transport().await
    }

    /// Collect exactly one `round` message from each party in `from`,
    /// returned in ascending sender order.
    ///
    /// Messages for later rounds are kept for subsequent calls. A second
    /// message from the same sender, or a message for an earlier round, is a
    /// protocol violation.
    pub async fn collect<M: DeserializeOwned>(
        &mut self,
        round: u32,
        from: &[PartyIndex],
    ) -> Result<Vec<(PartyIndex, M)>> {
        let expected: BTreeSet<PartyIndex> = from.iter().copied().collect();
        let mut slots: BTreeMap<PartyIndex, M> = BTreeMap::new();

        let buffered = std::mem::take(&mut self.pending);
        for envelope in buffered {
            self.place(envelope, round, &expected, &mut slots)?;
        }

        while slots.len() < expected.len() {
            let envelope = self.receive_from_transport().await?;
            self.place(envelope, round, &expected, &mut slots)?;
        }

        Ok(slots.into_iter().collect())
    }

    /// Collect one `round` message from every peer
    pub async fn collect_from_peers<M: DeserializeOwned>(
        &mut self,
        round: u32,
    ) -> Result<Vec<(PartyIndex, M)>> {
        let peers = self.peers();
        self.collect(round, &peers).await
    }

    /// Release the transport endpoint
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        if !self.pending.is_empty() {
            warn!(
                party_index = self.party_index,
                unread = self.pending.len(),
                "Closing session with unread messages"
            );
        }
        self.transport.close().await
    }

    /// File `envelope` into its `round` slot or keep it for a later round
    fn place<M: DeserializeOwned>(
        &mut self,
        envelope: Envelope,
        round: u32,
        expected: &BTreeSet<PartyIndex>,
        slots: &mut BTreeMap<PartyIndex, M>,
    ) -> Result<()> {
        if envelope.round < round {
            return Err(Error::ProtocolMismatch(format!(
                "stale round {} message from party {} while collecting round {}",
                envelope.round, envelope.from, round
            )));
        }

        if envelope.round == round && expected.contains(&envelope.from) {
            if slots.contains_key(&envelope.from) {
                return Err(Error::ProtocolMismatch(format!(
                    "party {} sent twice in round {}",
                    envelope.from, round
                )));
            }
            slots.insert(envelope.from, deserialize(&envelope.payload)?);
        } else {
            debug!(round = envelope.round, from = envelope.from, "Buffering early message");
            self.pending.push_back(envelope);
        }
        Ok(())
    }

    async fn receive_from_transport(&mut self) -> Result<Envelope> {
        let envelope = tokio::time::timeout(self.timeout, self.transport.receive())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "message to party {} after {:?}",
                    self.party_index, self.timeout
                ))
            })??;

        if envelope.to != self.party_index
            || envelope.from >= self.total_parties
            || envelope.from == self.party_index
        {
            return Err(Error::TransportFailure(format!(
                "misrouted envelope {} -> {} at party {}",
                envelope.from, envelope.to, self.party_index
            )));
        }

        Ok(envelope)
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if !self.closed {
            debug!(
                party_index = self.party_index,
                "Session dropped without close; releasing transport"
            );
        }
    }
}

fn serialize<M: Serialize>(value: &M) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn deserialize<M: DeserializeOwned>(bytes: &[u8]) -> Result<M> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}
