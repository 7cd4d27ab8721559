//! Key shares produced by DKG and the per-quorum additive shares derived
//! from them

use crate::primitives::{base_mul, decode_point, encode_point};
use crate::{CurveId, Error, PartyIndex, PublicKey, Result};
use curve25519_dalek::scalar::Scalar;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

const KEY_SHARE_VERSION: u32 = 1;
const ADDITIVE_SHARE_VERSION: u32 = 1;

/// Key share held by a party after DKG
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    /// Owning party
    #[zeroize(skip)]
    pub party_name: String,

    /// Owner's position in the DKG roster
    #[zeroize(skip)]
    pub party_index: PartyIndex,

    #[zeroize(skip)]
    pub curve: CurveId,

    /// Fingerprint of the access structure the share was dealt under
    #[zeroize(skip)]
    pub policy_fingerprint: [u8; 32],

    /// DKG roster, in session order
    #[zeroize(skip)]
    pub roster: Vec<String>,

    /// Sum of the leaf shares dealt to this party
    pub(crate) secret_share: Scalar,

    /// Group public key `Q`
    #[zeroize(skip)]
    pub public_key: PublicKey,

    /// `share(p)·G` for every party
    #[zeroize(skip)]
    pub public_shares: BTreeMap<String, [u8; 32]>,
}

impl KeyShare {
    /// Versioned binary encoding
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(KEY_SHARE_VERSION, self)
    }

    /// Decode and check internal consistency
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let share: KeyShare = decode(KEY_SHARE_VERSION, bytes)?;
        share.check()?;
        Ok(share)
    }

    /// Public share of `party`
    pub fn public_share(&self, party: &str) -> Result<[u8; 32]> {
        self.public_shares
            .get(party)
            .copied()
            .ok_or_else(|| Error::UnknownParty(party.to_string()))
    }

    fn check(&self) -> Result<()> {
        if self.roster.get(self.party_index) != Some(&self.party_name) {
            return Err(Error::Deserialization(format!(
                "party '{}' is not at roster position {}",
                self.party_name, self.party_index
            )));
        }

        decode_point(&self.public_key)?;
        let own = decode_point(&self.public_share(&self.party_name)?)?;
        if base_mul(&self.secret_share) != own {
            return Err(Error::Deserialization(
                "secret share does not match its public share".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShare")
            .field("party_name", &self.party_name)
            .field("party_index", &self.party_index)
            .field("curve", &self.curve)
            .field("public_key", &hex::encode(self.public_key))
            .finish_non_exhaustive()
    }
}

/// Share valid for direct t-of-t signing by exactly one quorum.
///
/// Single use: it is consumed by signing and carries a random id so a
/// re-decoded copy can be recognized.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct AdditiveShare {
    #[zeroize(skip)]
    pub(crate) id: [u8; 16],

    #[zeroize(skip)]
    pub(crate) party_name: String,

    /// Canonical quorum list the share was derived for
    #[zeroize(skip)]
    pub(crate) quorum: Vec<String>,

    #[zeroize(skip)]
    pub(crate) curve: CurveId,

    #[zeroize(skip)]
    pub(crate) public_key: PublicKey,

    /// `x_j·G` of every member's additive share, by quorum position
    #[zeroize(skip)]
    pub(crate) additive_publics: Vec<[u8; 32]>,

    pub(crate) secret: Scalar,
}

impl AdditiveShare {
    pub fn id(&self) -> &[u8; 16] {
        &self.id
    }

    pub fn party_name(&self) -> &str {
        &self.party_name
    }

    pub fn quorum(&self) -> &[String] {
        &self.quorum
    }

    pub fn curve(&self) -> CurveId {
        self.curve
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn additive_publics(&self) -> &[[u8; 32]] {
        &self.additive_publics
    }

    /// Versioned binary encoding
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(ADDITIVE_SHARE_VERSION, self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let share: AdditiveShare = decode(ADDITIVE_SHARE_VERSION, bytes)?;

        let position = share
            .quorum
            .iter()
            .position(|name| *name == share.party_name)
            .ok_or_else(|| Error::Deserialization("owner is not a quorum member".into()))?;
        if share.additive_publics.len() != share.quorum.len()
            || encode_point(&base_mul(&share.secret)) != share.additive_publics[position]
        {
            return Err(Error::Deserialization(
                "additive share does not match its public part".into(),
            ));
        }
        Ok(share)
    }
}

impl std::fmt::Debug for AdditiveShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdditiveShare")
            .field("id", &hex::encode(self.id))
            .field("party_name", &self.party_name)
            .field("quorum", &self.quorum)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct Versioned<'a, T> {
    version: u32,
    body: &'a T,
}

#[derive(Deserialize)]
struct VersionedOwned<T> {
    version: u32,
    body: T,
}

fn encode<T: Serialize>(version: u32, body: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(Versioned { version, body }, bincode::config::standard())
        .map_err(|e| Error::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(version: u32, bytes: &[u8]) -> Result<T> {
    let (decoded, read): (VersionedOwned<T>, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| Error::Deserialization(e.to_string()))?;

    if read != bytes.len() {
        return Err(Error::Deserialization(format!(
            "{} trailing bytes",
            bytes.len() - read
        )));
    }
    if decoded.version != version {
        return Err(Error::Deserialization(format!(
            "unsupported encoding version {}",
            decoded.version
        )));
    }
    Ok(decoded.body)
}
