//! In-memory transport implementation for testing

use super::{async_trait, Envelope, Transport};
use crate::{Error, PartyIndex, Result, SessionId};
use tokio::sync::mpsc;

/// Factory for a fully connected set of in-process endpoints
pub struct MemoryNetwork;

impl MemoryNetwork {
    /// Create one endpoint per party, all sharing a fresh session id
    pub fn endpoints(n_parties: usize) -> Vec<MemoryTransport> {
        Self::endpoints_with_session(n_parties, rand::random())
    }

    /// Create endpoints bound to a known session id
    pub fn endpoints_with_session(n_parties: usize, session_id: SessionId) -> Vec<MemoryTransport> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..n_parties).map(|_| mpsc::unbounded_channel()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(index, receiver)| MemoryTransport {
                session_id,
                index,
                n_parties,
                // No sender to ourselves, so the channel closes once every
                // peer endpoint is gone.
                senders: senders
                    .iter()
                    .enumerate()
                    .map(|(to, tx)| (to != index).then(|| tx.clone()))
                    .collect(),
                receiver,
                closed: false,
            })
            .collect()
    }
}

/// One party's endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    session_id: SessionId,
    index: PartyIndex,
    n_parties: usize,
    senders: Vec<Option<mpsc::UnboundedSender<Envelope>>>,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    closed: bool,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn party_index(&self) -> PartyIndex {
        self.index
    }

    fn total_parties(&self) -> usize {
        self.n_parties
    }

    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        if self.closed {
            return Err(Error::TransportFailure("endpoint is closed".into()));
        }

        let to = envelope.to;
        let sender = self
            .senders
            .get(to)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::TransportFailure(format!("no route to party {}", to)))?;

        sender
            .send(envelope)
            .map_err(|_| Error::TransportFailure(format!("party {} has left the session", to)))
    }

    async fn receive(&mut self) -> Result<Envelope> {
        if self.closed {
            return Err(Error::TransportFailure("endpoint is closed".into()));
        }

        self.receiver
            .recv()
            .await
            .ok_or_else(|| Error::TransportFailure("all peers disconnected".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.senders.clear();
        self.receiver.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(from: PartyIndex, to: PartyIndex, round: u32, value: u8) -> Envelope {
        Envelope {
            from,
            to,
            round,
            payload: vec![value],
        }
    }

    #[tokio::test]
    async fn test_direct() {
        let mut endpoints = MemoryNetwork::endpoints(2);
        let mut receiver = endpoints.pop().unwrap();
        let mut sender = endpoints.pop().unwrap();

        assert_eq!(sender.session_id(), receiver.session_id());

        sender.send(envelope(0, 1, 1, 100)).await.unwrap();
        let received = receiver.receive().await.unwrap();

        assert_eq!(received, envelope(0, 1, 1, 100));
    }

    #[tokio::test]
    async fn test_pairwise_order_is_preserved() {
        let mut endpoints = MemoryNetwork::endpoints(3);
        for value in 0..10 {
            endpoints[0].send(envelope(0, 2, 1, value)).await.unwrap();
        }

        for value in 0..10 {
            let received = endpoints[2].receive().await.unwrap();
            assert_eq!(received.payload, vec![value]);
        }
    }

    #[tokio::test]
    async fn test_send_to_self_or_unknown_fails() {
        let mut endpoints = MemoryNetwork::endpoints(2);

        assert!(matches!(
            endpoints[0].send(envelope(0, 0, 1, 0)).await,
            Err(Error::TransportFailure(_))
        ));
        assert!(matches!(
            endpoints[0].send(envelope(0, 5, 1, 0)).await,
            Err(Error::TransportFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_fails_once_peers_leave() {
        let mut endpoints = MemoryNetwork::endpoints(2);
        let mut survivor = endpoints.remove(0);
        drop(endpoints);

        assert!(matches!(
            survivor.receive().await,
            Err(Error::TransportFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_endpoint_rejects_traffic() {
        let mut endpoints = MemoryNetwork::endpoints(2);
        endpoints[1].close().await.unwrap();

        assert!(endpoints[1].send(envelope(1, 0, 1, 0)).await.is_err());
        assert!(endpoints[0].send(envelope(0, 1, 1, 0)).await.is_err());
    }
}
