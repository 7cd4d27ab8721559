//! Conversion of a policy key share into an additive share for one quorum
//!
//! Purely local. Each quorum member scales its share by its reconstruction
//! coefficient, so the quorum's additive shares sum to the group secret and
//! the quorum can sign as a t-of-t group.

use crate::access::{AccessStructure, Quorum};
use crate::primitives::sharing::reconstruction_coefficients;
use crate::primitives::{decode_point, digest_eq, encode_point};
use crate::{AdditiveShare, Error, KeyShare, Result};
use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar};
use std::collections::BTreeSet;
use tracing::debug;

/// Derive `key_share`'s additive share for signing with `quorum`.
///
/// Members whose share is not needed to satisfy the policy receive a zero
/// share; they still take part in signing.
pub fn to_additive_share(
    key_share: &KeyShare,
    access: &AccessStructure,
    quorum: &Quorum,
) -> Result<AdditiveShare> {
    if key_share.curve != access.curve() {
        return Err(Error::InvalidPolicy(format!(
            "key share is for {}, policy is for {}",
            key_share.curve,
            access.curve()
        )));
    }
    if !digest_eq(&key_share.policy_fingerprint, &access.fingerprint()) {
        return Err(Error::InvalidPolicy(
            "key share was generated under a different access structure".into(),
        ));
    }
    if !quorum.contains(&key_share.party_name) {
        return Err(Error::InvalidSessionConfig(format!(
            "party '{}' is not a member of quorum {:?}",
            key_share.party_name,
            quorum.names()
        )));
    }

    let members: BTreeSet<&str> = quorum.names().iter().map(String::as_str).collect();
    let coefficients = reconstruction_coefficients(access.root(), &members)?
        .ok_or_else(|| Error::UnauthorizedQuorum(quorum.names().to_vec()))?;

    let coefficient = |name: &str| {
        coefficients
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownParty(name.to_string()))
    };

    let mut additive_publics = Vec::with_capacity(quorum.len());
    let mut sum = EdwardsPoint::default();
    for name in quorum.names() {
        let public_share = decode_point(&key_share.public_share(name)?)?;
        let additive_public = public_share * coefficient(name)?;
        sum += additive_public;
        additive_publics.push(encode_point(&additive_public));
    }

    if encode_point(&sum) != key_share.public_key {
        return Err(Error::KeyConsistencyError(
            "additive public shares do not sum to the group key".into(),
        ));
    }

    let secret = coefficient(&key_share.party_name)? * key_share.secret_share;
    debug!(
        party = %key_share.party_name,
        quorum = ?quorum.names(),
        zero_share = secret == Scalar::ZERO,
        "Converted key share"
    );

    Ok(AdditiveShare {
        id: rand::random(),
        party_name: key_share.party_name.clone(),
        quorum: quorum.names().to_vec(),
        curve: key_share.curve,
        public_key: key_share.public_key,
        additive_publics,
        secret,
    })
}
