//! Ed25519 group arithmetic used by the DKG, conversion and signing engines
//!
//! Everything here is local computation: no message ever leaves the party
//! from this module.

pub mod proof;
pub mod sharing;

pub use proof::DlogProof;

use crate::{Error, Result};
use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
    traits::Identity,
};
use rand::rngs::OsRng;
use std::collections::BTreeSet;
use subtle::ConstantTimeEq;

/// Sample a uniformly random scalar
pub fn random_scalar() -> Scalar {
    Scalar::random(&mut OsRng)
}

/// Multiply the Ed25519 base point by `scalar`
pub fn base_mul(scalar: &Scalar) -> EdwardsPoint {
    EdwardsPoint::mul_base(scalar)
}

/// Compressed Edwards-Y encoding of a point
pub fn encode_point(point: &EdwardsPoint) -> [u8; 32] {
    point.compress().to_bytes()
}

/// Decode a compressed Edwards-Y point
pub fn decode_point(bytes: &[u8; 32]) -> Result<EdwardsPoint> {
    CompressedEdwardsY(*bytes)
        .decompress()
        .ok_or_else(|| Error::Deserialization("Invalid Edwards point encoding".into()))
}

/// Decode a canonical little-endian scalar
pub fn decode_scalar(bytes: &[u8; 32]) -> Result<Scalar> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes))
        .ok_or_else(|| Error::Deserialization("Non-canonical scalar encoding".into()))
}

/// Evaluate a polynomial at `x` (coefficients in ascending order)
pub fn evaluate_polynomial(coefficients: &[Scalar], x: u64) -> Scalar {
    let x = Scalar::from(x);
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coef| acc * x + coef)
}

/// Evaluate Feldman commitments at `x`, i.e. `f(x)·G` for the committed `f`
pub fn evaluate_commitments(commitments: &[EdwardsPoint], x: u64) -> EdwardsPoint {
    let x = Scalar::from(x);
    commitments
        .iter()
        .rev()
        .fold(EdwardsPoint::identity(), |acc, point| acc * x + point)
}

/// Lagrange coefficient of evaluation point `x` for interpolation at zero
/// over the set `xs`.
pub fn lagrange_at_zero(xs: &[u64], x: u64) -> Result<Scalar> {
    if x == 0 || !xs.contains(&x) {
        return Err(Error::Crypto(format!(
            "evaluation point {} is not in the interpolation set",
            x
        )));
    }
    if xs.contains(&0) {
        return Err(Error::Crypto("evaluation point 0 is reserved".into()));
    }
    let distinct: BTreeSet<u64> = xs.iter().copied().collect();
    if distinct.len() != xs.len() {
        return Err(Error::Crypto(format!("duplicate evaluation points in {:?}", xs)));
    }

    let xi = Scalar::from(x);
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for xj in distinct.into_iter().filter(|&xj| xj != x) {
        let xj = Scalar::from(xj);
        numerator *= xj;
        denominator *= xj - xi;
    }

    Ok(numerator * denominator.invert())
}

/// Domain-separated digest over length-prefixed parts
pub fn digest(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Constant-time equality of two digests
pub fn digest_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a[..].ct_eq(&b[..]).into()
}
