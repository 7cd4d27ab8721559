//! Driving key generation and signing for every party in one process
//!
//! Each party runs as its own task on its own transport endpoint. The first
//! party failure aborts the remaining tasks and is returned to the caller.

use crate::access::{AccessStructure, Quorum};
use crate::config::ProtocolConfig;
use crate::convert::to_additive_share;
use crate::keygen::{run_dkg, DkgOutput};
use crate::session::Session;
use crate::sign::{finalize_signature, run_sign, SpentShares};
use crate::storage::KeyStore;
use crate::transport::Transport;
use crate::types::wallet_address;
use crate::{AdditiveShare, Error, KeyShare, PartyIndex, PublicKey, Result, Signature};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

/// Outcome of a key generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletKey {
    pub wallet_id: String,
    pub public_key: PublicKey,
    /// Base58 rendering of the public key
    pub address: String,
    /// Parties holding a share, in roster order
    pub parties: Vec<String>,
}

/// Runs every party of a protocol locally and persists the resulting shares
pub struct Orchestrator<S: KeyStore> {
    store: Arc<S>,
    config: ProtocolConfig,
    spent: SpentShares,
}

impl<S: KeyStore + 'static> Orchestrator<S> {
    pub fn new(store: S, config: ProtocolConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
            spent: SpentShares::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Run DKG for every party in `party_names` and store each key share.
    ///
    /// `endpoints[i]` is the transport of `party_names[i]`. Either every
    /// share is stored or none is.
    #[instrument(skip(self, access, endpoints))]
    pub async fn generate<T: Transport + 'static>(
        &self,
        wallet_id: &str,
        access: &AccessStructure,
        party_names: &[String],
        endpoints: Vec<T>,
    ) -> Result<WalletKey> {
        access.validate_roster(party_names)?;
        if endpoints.len() != party_names.len() {
            return Err(Error::InvalidSessionConfig(format!(
                "{} endpoints for {} parties",
                endpoints.len(),
                party_names.len()
            )));
        }

        let n = party_names.len();
        let timeout = self.config.receive_timeout();
        let mut tasks = JoinSet::new();
        for (index, endpoint) in endpoints.into_iter().enumerate() {
            let names = party_names.to_vec();
            let access = access.clone();
            tasks.spawn(async move {
                let mut session = Session::open(endpoint, n, index, names)?.with_timeout(timeout);
                let output = run_dkg(&mut session, &access).await;
                let closed = session.close().await;
                let output = output?;
                closed?;
                Ok::<_, Error>((index, output))
            });
        }

        let outputs: Vec<DkgOutput> = join_fail_fast(tasks, n).await?;
        let public_key = check_consistent_keys(outputs.iter().map(|o| o.public_key))?;

        let mut stored: Vec<String> = Vec::with_capacity(n);
        for output in &outputs {
            let name = &output.key_share.party_name;
            let persisted = match output.key_share.to_bytes() {
                Ok(blob) => self.store.store(wallet_id, name, &blob).await,
                Err(e) => Err(e),
            };
            if let Err(e) = persisted {
                warn!(party = %name, error = %e, "Storing key share failed, rolling back");
                for party in &stored {
                    if let Err(e) = self.store.delete(wallet_id, party).await {
                        warn!(party = %party, error = %e, "Rollback failed");
                    }
                }
                return Err(e);
            }
            stored.push(name.clone());
        }

        info!(
            wallet_id,
            public_key = hex::encode(public_key),
            "Wallet key generated"
        );

        Ok(WalletKey {
            wallet_id: wallet_id.to_string(),
            public_key,
            address: wallet_address(&public_key),
            parties: party_names.to_vec(),
        })
    }

    /// Sign `message` with the stored shares of `quorum`.
    ///
    /// `endpoints[i]` is the transport of `quorum.names()[i]` and
    /// `receiver` is a quorum-local index.
    #[instrument(skip(self, access, quorum, message, endpoints))]
    pub async fn sign<T: Transport + 'static>(
        &self,
        wallet_id: &str,
        access: &AccessStructure,
        quorum: &Quorum,
        message: &[u8],
        receiver: PartyIndex,
        endpoints: Vec<T>,
    ) -> Result<Signature> {
        if !access.satisfies(quorum.names().iter().map(String::as_str)) {
            return Err(Error::UnauthorizedQuorum(quorum.names().to_vec()));
        }
        let t = quorum.len();
        if endpoints.len() != t {
            return Err(Error::InvalidSessionConfig(format!(
                "{} endpoints for a quorum of {}",
                endpoints.len(),
                t
            )));
        }
        if receiver >= t {
            return Err(Error::InvalidSessionConfig(format!(
                "receiver {} out of range for a quorum of {}",
                receiver, t
            )));
        }

        let mut key_shares = Vec::with_capacity(t);
        for name in quorum.names() {
            let blob = self.store.load(wallet_id, name).await?;
            key_shares.push(KeyShare::from_bytes(&blob)?);
        }
        let public_key = check_consistent_keys(key_shares.iter().map(|s| s.public_key))?;

        let additive = key_shares
            .iter()
            .map(|share| to_additive_share(share, access, quorum))
            .collect::<Result<Vec<AdditiveShare>>>()?;
        drop(key_shares);

        let timeout = self.config.receive_timeout();
        let mut tasks = JoinSet::new();
        for (index, (endpoint, share)) in endpoints.into_iter().zip(additive).enumerate() {
            let names = quorum.names().to_vec();
            let message = message.to_vec();
            let spent = self.spent.clone();
            tasks.spawn(async move {
                let mut session = Session::open(endpoint, t, index, names)?.with_timeout(timeout);
                let output = run_sign(&mut session, share, &message, receiver, &spent).await;
                let closed = session.close().await;
                let output = output?;
                closed?;
                Ok::<_, Error>((index, output))
            });
        }

        let mut outputs: Vec<Option<Vec<u8>>> = join_fail_fast(tasks, t).await?;
        let bytes = outputs
            .get_mut(receiver)
            .and_then(Option::take)
            .ok_or_else(|| Error::MalformedSignature("receiver produced no signature".into()))?;

        let signature = finalize_signature(&bytes, access.curve(), &public_key, message)?;
        info!(wallet_id, signature = %signature, "Message signed");
        Ok(signature)
    }
}

/// Wait for all party tasks, returning their outputs by party index.
///
/// On the first failure the remaining tasks are aborted and that failure is
/// returned.
async fn join_fail_fast<R: Send + 'static>(
    mut tasks: JoinSet<Result<(PartyIndex, R)>>,
    n: usize,
) -> Result<Vec<R>> {
    let mut slots: Vec<Option<R>> = (0..n).map(|_| None).collect();

    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .map_err(|e| Error::Internal(format!("party task failed: {}", e)))
            .and_then(|result| result);

        match outcome {
            Ok((index, value)) => {
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(value);
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    structural = e.is_structural(),
                    "Party failed, aborting remaining parties"
                );
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                return Err(e);
            }
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| Error::Internal(format!("party {} produced no result", index)))
        })
        .collect()
}

/// Check that every party derived the same public key
pub fn check_consistent_keys<I>(keys: I) -> Result<PublicKey>
where
    I: IntoIterator<Item = PublicKey>,
{
    let mut keys = keys.into_iter();
    let first = keys
        .next()
        .ok_or_else(|| Error::KeyConsistencyError("no public keys to compare".into()))?;

    for (offset, key) in keys.enumerate() {
        if key != first {
            return Err(Error::KeyConsistencyError(format!(
                "party {} derived {}, party 0 derived {}",
                offset + 1,
                hex::encode(key),
                hex::encode(first)
            )));
        }
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyStore;
    use crate::transport::{MemoryNetwork, MemoryTransport};
    use crate::CurveId;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Memory store that refuses to store one party's share
    struct RefusingStore {
        inner: MemoryKeyStore,
        refused: &'static str,
    }

    #[async_trait]
    impl KeyStore for RefusingStore {
        async fn store(&self, wallet_id: &str, party: &str, blob: &[u8]) -> Result<()> {
            if party == self.refused {
                return Err(Error::Storage(format!("disk full while writing {}", party)));
            }
            self.inner.store(wallet_id, party, blob).await
        }

        async fn load(&self, wallet_id: &str, party: &str) -> Result<Vec<u8>> {
            self.inner.load(wallet_id, party).await
        }

        async fn delete(&self, wallet_id: &str, party: &str) -> Result<()> {
            self.inner.delete(wallet_id, party).await
        }

        async fn exists(&self, wallet_id: &str, party: &str) -> Result<bool> {
            self.inner.exists(wallet_id, party).await
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_check_consistent_keys() {
        assert_eq!(check_consistent_keys([[1u8; 32], [1u8; 32]]).unwrap(), [1u8; 32]);
        assert!(matches!(
            check_consistent_keys([[1u8; 32], [1u8; 32], [2u8; 32]]),
            Err(Error::KeyConsistencyError(_))
        ));
        assert!(check_consistent_keys(Vec::<PublicKey>::new()).is_err());
    }

    #[tokio::test]
    async fn test_generate_then_sign() {
        let roster = names(&["server", "kms", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let orchestrator = Orchestrator::new(MemoryKeyStore::new(), ProtocolConfig::default());

        let key = orchestrator
            .generate("w1", &access, &roster, MemoryNetwork::endpoints(3))
            .await
            .unwrap();
        assert_eq!(orchestrator.store().len().await, 3);
        assert_eq!(key.address, bs58::encode(key.public_key).into_string());

        let quorum = Quorum::new(&access, &["pin", "kms"]).unwrap();
        let signature = orchestrator
            .sign("w1", &access, &quorum, b"test", 0, MemoryNetwork::endpoints(2))
            .await
            .unwrap();
        signature.verify(&key.public_key, b"test").unwrap();
    }

    #[tokio::test]
    async fn test_failed_party_aborts_generation() {
        let roster = names(&["server", "kms", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let config = ProtocolConfig {
            receive_timeout_ms: 200,
            ..ProtocolConfig::default()
        };
        let orchestrator = Orchestrator::new(MemoryKeyStore::new(), config);

        // The third endpoint belongs to another network, so party 2 never
        // hears from its peers and its peers never hear from it.
        let mut endpoints: Vec<MemoryTransport> = MemoryNetwork::endpoints(3);
        let stray = MemoryNetwork::endpoints(3).pop().unwrap();
        endpoints[2] = stray;

        let started = tokio::time::Instant::now();
        let result = orchestrator
            .generate("w1", &access, &roster, endpoints)
            .await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(orchestrator.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_wallet_fails_before_signing() {
        let roster = names(&["server", "kms", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let orchestrator = Orchestrator::new(MemoryKeyStore::new(), ProtocolConfig::default());
        let quorum = Quorum::new(&access, &["server", "kms"]).unwrap();

        let result = orchestrator
            .sign("missing", &access, &quorum, b"test", 0, MemoryNetwork::endpoints(2))
            .await;
        assert!(matches!(result, Err(Error::KeyShareNotFound(_))));
    }

    #[tokio::test]
    async fn test_storage_failure_rolls_back_stored_shares() {
        let roster = names(&["server", "kms", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let store = RefusingStore {
            inner: MemoryKeyStore::new(),
            refused: "pin",
        };
        let orchestrator = Orchestrator::new(store, ProtocolConfig::default());

        let result = orchestrator
            .generate("w1", &access, &roster, MemoryNetwork::endpoints(3))
            .await;
        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(orchestrator.store().inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_structural_errors_precede_any_traffic() {
        let roster = names(&["server", "kms", "pin"]);
        let access = AccessStructure::threshold_of(&roster, 2, CurveId::Ed25519).unwrap();
        let orchestrator = Orchestrator::new(MemoryKeyStore::new(), ProtocolConfig::default());

        let error = orchestrator
            .generate("w1", &access, &names(&["server", "kms"]), MemoryNetwork::endpoints(2))
            .await
            .unwrap_err();
        assert!(error.is_structural());

        let error = orchestrator
            .generate("w1", &access, &roster, MemoryNetwork::endpoints(2))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidSessionConfig(_)));
        assert!(error.is_structural());

        assert!(orchestrator.store().is_empty().await);
        assert!(!Error::Timeout("peer".into()).is_structural());
    }
}
