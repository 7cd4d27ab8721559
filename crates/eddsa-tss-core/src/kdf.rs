//! PIN-based key derivation
//!
//! A PIN party's share is sealed under a key stretched from the user's PIN
//! with PBKDF2-HMAC-SHA256.

use crate::{Error, Result};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// PBKDF2 parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinKdf {
    pub salt: String,
    pub iterations: u32,
}

impl Default for PinKdf {
    fn default() -> Self {
        Self {
            salt: "solana-mpc-salt".to_string(),
            iterations: 100_000,
        }
    }
}

impl PinKdf {
    /// Derive a 32-byte sealing key from `pin`
    pub fn derive(&self, pin: &str) -> Result<Zeroizing<[u8; 32]>> {
        if pin.is_empty() {
            return Err(Error::Crypto("PIN must not be empty".into()));
        }
        if self.iterations == 0 {
            return Err(Error::Crypto("KDF iteration count must be positive".into()));
        }

        let mut key = Zeroizing::new([0u8; 32]);
        pbkdf2_hmac::<Sha256>(
            pin.as_bytes(),
            self.salt.as_bytes(),
            self.iterations,
            key.as_mut_slice(),
        );
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbkdf2_known_answer() {
        let kdf = PinKdf {
            salt: "salt".into(),
            iterations: 1,
        };
        let key = kdf.derive("password").unwrap();
        assert_eq!(
            hex::encode(*key),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );
    }

    #[test]
    fn test_derivation_depends_on_inputs() {
        let kdf = PinKdf {
            iterations: 10,
            ..PinKdf::default()
        };
        let a = kdf.derive("1234").unwrap();
        assert_eq!(*a, *kdf.derive("1234").unwrap());
        assert_ne!(*a, *kdf.derive("1235").unwrap());

        let salted = PinKdf {
            salt: "other".into(),
            ..kdf.clone()
        };
        assert_ne!(*a, *salted.derive("1234").unwrap());
    }

    #[test]
    fn test_empty_pin_is_rejected() {
        assert!(PinKdf::default().derive("").is_err());
    }
}
