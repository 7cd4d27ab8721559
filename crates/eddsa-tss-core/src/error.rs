//! Error types for threshold EdDSA operations

use thiserror::Error;

/// Result type alias for threshold EdDSA operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building policies or running a protocol.
///
/// The first four variants are structural and are always raised before any
/// message leaves the local party.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed access structure
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Name that is not part of the session roster or policy
    #[error("Unknown party: {0}")]
    UnknownParty(String),

    /// Bad party index or party count
    #[error("Invalid session configuration: {0}")]
    InvalidSessionConfig(String),

    /// Quorum does not satisfy the access structure
    #[error("Quorum {0:?} does not satisfy the access structure")]
    UnauthorizedQuorum(Vec<String>),

    /// Parties disagree on curve, policy, roster, quorum or message
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Collected public keys differ across parties
    #[error("Key consistency error: {0}")]
    KeyConsistencyError(String),

    /// Signature has the wrong length or does not verify
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// Send or receive failed
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Timeout waiting for message
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// An additive share was presented for signing more than once
    #[error("Additive share {0} was already used for signing")]
    ShareReused(String),

    /// A peer's share, commitment or proof did not check out
    #[error("Message verification failed: {0}")]
    VerificationFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Key store backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// No share stored for the requested wallet/party
    #[error("Key share not found: {0}")]
    KeyShareNotFound(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error was raised locally, before any network interaction.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::InvalidPolicy(_)
                | Error::UnknownParty(_)
                | Error::InvalidSessionConfig(_)
                | Error::UnauthorizedQuorum(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
