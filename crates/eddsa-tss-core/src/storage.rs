//! Key share storage
//!
//! Shares are stored as opaque encoded blobs keyed by wallet id and party
//! name. Backends:
//!
//! - **MemoryKeyStore**: in-process map (testing, simulation)
//! - **FileKeyStore**: one file per share, optionally sealed with
//!   ChaCha20-Poly1305 under a caller-provided key

use crate::{Error, Result};
use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

/// Storage backend for encoded key shares
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Store (or replace) the share of `party` for `wallet_id`
    async fn store(&self, wallet_id: &str, party: &str, blob: &[u8]) -> Result<()>;

    /// Load a share; fails with `KeyShareNotFound` if absent
    async fn load(&self, wallet_id: &str, party: &str) -> Result<Vec<u8>>;

    /// Delete a share; fails with `KeyShareNotFound` if absent
    async fn delete(&self, wallet_id: &str, party: &str) -> Result<()>;

    async fn exists(&self, wallet_id: &str, party: &str) -> Result<bool>;
}

fn share_id(wallet_id: &str, party: &str) -> String {
    format!("{}/{}", wallet_id, party)
}

/// In-memory store for testing
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    shares: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored shares
    pub async fn len(&self) -> usize {
        self.shares.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shares.read().await.is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn store(&self, wallet_id: &str, party: &str, blob: &[u8]) -> Result<()> {
        let mut shares = self.shares.write().await;
        shares.insert((wallet_id.to_string(), party.to_string()), blob.to_vec());
        Ok(())
    }

    async fn load(&self, wallet_id: &str, party: &str) -> Result<Vec<u8>> {
        let shares = self.shares.read().await;
        shares
            .get(&(wallet_id.to_string(), party.to_string()))
            .cloned()
            .ok_or_else(|| Error::KeyShareNotFound(share_id(wallet_id, party)))
    }

    async fn delete(&self, wallet_id: &str, party: &str) -> Result<()> {
        let mut shares = self.shares.write().await;
        shares
            .remove(&(wallet_id.to_string(), party.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::KeyShareNotFound(share_id(wallet_id, party)))
    }

    async fn exists(&self, wallet_id: &str, party: &str) -> Result<bool> {
        let shares = self.shares.read().await;
        Ok(shares.contains_key(&(wallet_id.to_string(), party.to_string())))
    }
}

/// On-disk share file format
#[derive(Debug, Serialize, Deserialize)]
struct ShareFile {
    version: u32,
    /// Nonce (hex), present iff the share is sealed
    nonce: Option<String>,
    /// Share blob or its ciphertext (hex)
    data: String,
}

impl ShareFile {
    const CURRENT_VERSION: u32 = 1;
}

/// File-backed store: `<root>/<wallet_id>/<party>.share`
pub struct FileKeyStore {
    root: PathBuf,
    sealing_key: Option<Zeroizing<[u8; 32]>>,
}

impl FileKeyStore {
    /// Store shares in plaintext under `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            sealing_key: None,
        }
    }

    /// Seal every share with ChaCha20-Poly1305 under `key`
    pub fn with_sealing_key(mut self, key: Zeroizing<[u8; 32]>) -> Self {
        self.sealing_key = Some(key);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, wallet_id: &str, party: &str) -> Result<PathBuf> {
        check_component(wallet_id)?;
        check_component(party)?;
        Ok(self.root.join(wallet_id).join(format!("{}.share", party)))
    }

    fn seal(&self, wallet_id: &str, party: &str, blob: &[u8]) -> Result<ShareFile> {
        let Some(key) = &self.sealing_key else {
            return Ok(ShareFile {
                version: ShareFile::CURRENT_VERSION,
                nonce: None,
                data: hex::encode(blob),
            });
        };

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let nonce_bytes: [u8; 12] = rand::random();
        let aad = share_id(wallet_id, party);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: blob,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| Error::Crypto(format!("sealing failed: {}", e)))?;

        Ok(ShareFile {
            version: ShareFile::CURRENT_VERSION,
            nonce: Some(hex::encode(nonce_bytes)),
            data: hex::encode(ciphertext),
        })
    }

    fn open(&self, wallet_id: &str, party: &str, file: ShareFile) -> Result<Vec<u8>> {
        if file.version != ShareFile::CURRENT_VERSION {
            return Err(Error::Storage(format!(
                "unsupported share file version {}",
                file.version
            )));
        }
        let data = hex::decode(&file.data).map_err(|e| Error::Storage(e.to_string()))?;

        let Some(nonce) = file.nonce else {
            return Ok(data);
        };
        let key = self.sealing_key.as_ref().ok_or_else(|| {
            Error::Storage(format!(
                "share {} is sealed and no key was provided",
                share_id(wallet_id, party)
            ))
        })?;

        let nonce_bytes = hex::decode(&nonce).map_err(|e| Error::Storage(e.to_string()))?;
        if nonce_bytes.len() != 12 {
            return Err(Error::Storage("invalid nonce length".into()));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let aad = share_id(wallet_id, party);
        cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &data,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| {
                Error::Storage("decryption failed - invalid key or corrupted data".into())
            })
    }
}

/// Reject names that could escape the store directory
fn check_component(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(Error::Storage(format!("invalid storage name '{}'", name)));
    }
    Ok(())
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn store(&self, wallet_id: &str, party: &str, blob: &[u8]) -> Result<()> {
        let path = self.path(wallet_id, party)?;
        let file = self.seal(wallet_id, party, blob)?;

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, serde_json::to_vec_pretty(&file)?).await?;

        debug!(path = %path.display(), sealed = file.nonce.is_some(), "Stored key share");
        Ok(())
    }

    async fn load(&self, wallet_id: &str, party: &str) -> Result<Vec<u8>> {
        let path = self.path(wallet_id, party)?;
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::KeyShareNotFound(share_id(wallet_id, party)));
            }
            Err(e) => return Err(e.into()),
        };

        let file: ShareFile = serde_json::from_slice(&contents)
            .map_err(|e| Error::Storage(format!("corrupt share file: {}", e)))?;
        self.open(wallet_id, party, file)
    }

    async fn delete(&self, wallet_id: &str, party: &str) -> Result<()> {
        let path = self.path(wallet_id, party)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::KeyShareNotFound(share_id(wallet_id, party)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, wallet_id: &str, party: &str) -> Result<bool> {
        let path = self.path(wallet_id, party)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}
