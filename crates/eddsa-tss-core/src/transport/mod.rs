//! Network transport abstraction for MPC communication
//!
//! A transport endpoint belongs to exactly one party in exactly one session.
//! Messages between a fixed ordered pair of parties are delivered in send
//! order; nothing is promised across different pairs.

use crate::{PartyIndex, Result, SessionId};
use serde::{Deserialize, Serialize};

pub use ::async_trait::async_trait;

/// Unit of exchange between two parties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender index
    pub from: PartyIndex,
    /// Receiver index
    pub to: PartyIndex,
    /// Protocol round the payload belongs to
    pub round: u32,
    /// Encoded protocol message
    pub payload: Vec<u8>,
}

/// Point-to-point message transport for one party endpoint
#[async_trait]
pub trait Transport: Send {
    /// Session this endpoint is bound to
    fn session_id(&self) -> SessionId;

    /// Index of the party owning this endpoint
    fn party_index(&self) -> PartyIndex;

    /// Number of parties reachable through this transport
    fn total_parties(&self) -> usize;

    /// Deliver an envelope to `envelope.to`
    async fn send(&mut self, envelope: Envelope) -> Result<()>;

    /// Wait for the next envelope addressed to this endpoint
    async fn receive(&mut self) -> Result<Envelope>;

    /// Release the endpoint; further sends fail
    async fn close(&mut self) -> Result<()>;
}

/// In-memory loopback network for tests and single-process runs
pub mod memory;

pub use memory::{MemoryNetwork, MemoryTransport};
