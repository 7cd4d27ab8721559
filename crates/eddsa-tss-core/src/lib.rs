//! # EdDSA TSS Core
//!
//! Threshold Ed25519 signing under general access structures.
//!
//! This crate provides the building blocks for:
//! - Access structures: nested k-of-n policies over named parties
//! - Distributed Key Generation (DKG) over a policy
//! - Conversion of a key share into an additive share for one quorum
//! - Three-round signing producing standard Ed25519 signatures
//! - An orchestrator that runs every party locally and stores the shares
//!
//! ## Protocol Overview
//!
//! The group key is never reconstructed. Each party deals a secret over the
//! policy tree with Feldman commitments; the key share of a party is the sum
//! of what it was dealt. To sign, an authorized quorum first converts its
//! shares locally into additive shares of the group secret, then runs
//! commit/reveal Schnorr signing among exactly those parties.
//!
//! ## Example
//!
//! ```rust,ignore
//! use eddsa_tss_core::{
//!     AccessStructure, CurveId, MemoryKeyStore, MemoryNetwork, Orchestrator, Quorum,
//! };
//!
//! let names = vec!["server".to_string(), "kms".to_string(), "pin".to_string()];
//! let access = AccessStructure::threshold_of(&names, 2, CurveId::Ed25519)?;
//! let orchestrator = Orchestrator::new(MemoryKeyStore::new(), Default::default());
//!
//! // Run distributed key generation
//! let key = orchestrator.generate("wallet", &access, &names, MemoryNetwork::endpoints(3)).await?;
//!
//! // Sign with any authorized quorum
//! let quorum = Quorum::new(&access, &["server", "pin"])?;
//! let signature = orchestrator
//!     .sign("wallet", &access, &quorum, b"test", 0, MemoryNetwork::endpoints(2))
//!     .await?;
//! ```

pub mod access;
pub mod config;
pub mod convert;
pub mod error;
pub mod kdf;
pub mod keygen;
pub mod orchestrator;
pub mod primitives;
pub mod session;
pub mod shares;
pub mod sign;
pub mod storage;
pub mod transport;
pub mod types;

pub use access::{AccessNode, AccessStructure, Quorum};
pub use config::ProtocolConfig;
pub use convert::to_additive_share;
pub use error::{Error, Result};
pub use kdf::PinKdf;
pub use keygen::{run_dkg, DkgOutput};
pub use orchestrator::{check_consistent_keys, Orchestrator, WalletKey};
pub use session::Session;
pub use shares::{AdditiveShare, KeyShare};
pub use sign::{finalize_signature, run_sign, SpentShares};
pub use storage::{FileKeyStore, KeyStore, MemoryKeyStore};
pub use transport::{Envelope, MemoryNetwork, MemoryTransport, Transport};
pub use types::{wallet_address, CurveId, PartyIndex, PublicKey, SessionId, Signature};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
