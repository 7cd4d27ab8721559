//! Protocol configuration

use crate::kdf::PinKdf;
use crate::session::DEFAULT_RECEIVE_TIMEOUT;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables shared by every protocol run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Bound on a single wait for a peer message, in milliseconds
    pub receive_timeout_ms: u64,
    /// Key derivation for PIN-sealed shares
    pub kdf: PinKdf,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT.as_millis() as u64,
            kdf: PinKdf::default(),
        }
    }
}

impl ProtocolConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&contents)
            .map_err(|e| Error::Deserialization(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.receive_timeout_ms == 0 {
            return Err(Error::InvalidSessionConfig(
                "receive timeout must be positive".into(),
            ));
        }
        if self.kdf.iterations == 0 {
            return Err(Error::InvalidSessionConfig(
                "KDF iteration count must be positive".into(),
            ));
        }
        Ok(())
    }
}
