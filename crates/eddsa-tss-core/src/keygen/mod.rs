//! Distributed Key Generation (DKG) module
//!
//! Every party deals a random secret over the access structure tree; the
//! group key is the sum of the dealt secrets and each party's key share is
//! the sum of the leaf shares it received. No party ever learns the group
//! secret.

mod dkg;
mod messages;

pub use dkg::run_dkg;
pub use messages::*;

use crate::{KeyShare, PublicKey};

/// Result of a successful DKG run for one party
#[derive(Debug)]
pub struct DkgOutput {
    pub key_share: KeyShare,
    /// Group public key `Q`, identical at every party
    pub public_key: PublicKey,
}
