//! Hierarchical Shamir sharing over an access-structure tree
//!
//! Every threshold node with threshold `k` hides its value as the constant
//! term of a fresh degree `k - 1` polynomial and hands `f(j)` to its `j`-th
//! child (1-indexed). Leaves end up holding one share per party.
//!
//! Commitments, polynomials and reconstruction all walk the tree in the same
//! pre-order, so position `i` of a commitment list always refers to the same
//! threshold node for every party.

use super::{base_mul, evaluate_commitments, evaluate_polynomial, lagrange_at_zero, random_scalar};
use crate::access::AccessNode;
use crate::{Error, Result};
use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar};
use std::collections::{BTreeMap, BTreeSet};
use zeroize::Zeroize;

/// Secret polynomials and resulting leaf shares of one dealer
pub struct Dealing {
    /// One polynomial per threshold node, in pre-order
    polynomials: Vec<Vec<Scalar>>,
    /// Leaf share for every party name
    shares: BTreeMap<String, Scalar>,
}

impl Dealing {
    /// Share `secret` according to the tree rooted at `root`
    pub fn new(root: &AccessNode, secret: Scalar) -> Self {
        let mut dealing = Dealing {
            polynomials: Vec::new(),
            shares: BTreeMap::new(),
        };
        dealing.deal(root, secret);
        dealing
    }

    fn deal(&mut self, node: &AccessNode, value: Scalar) {
        match node {
            AccessNode::Leaf { party } => {
                self.shares.insert(party.clone(), value);
            }
            AccessNode::Threshold { k, children, .. } => {
                let mut coefficients = Vec::with_capacity(*k);
                coefficients.push(value);
                for _ in 1..*k {
                    coefficients.push(random_scalar());
                }

                let child_values: Vec<Scalar> = (1..=children.len() as u64)
                    .map(|x| evaluate_polynomial(&coefficients, x))
                    .collect();
                self.polynomials.push(coefficients);

                for (child, child_value) in children.iter().zip(child_values) {
                    self.deal(child, child_value);
                }
            }
        }
    }

    /// Feldman commitments of every node polynomial, in pre-order
    pub fn commitments(&self) -> Vec<Vec<EdwardsPoint>> {
        self.polynomials
            .iter()
            .map(|poly| poly.iter().map(base_mul).collect())
            .collect()
    }

    /// Share dealt to `party`
    pub fn share_for(&self, party: &str) -> Option<Scalar> {
        self.shares.get(party).copied()
    }
}

impl Drop for Dealing {
    fn drop(&mut self) {
        for poly in self.polynomials.iter_mut() {
            poly.zeroize();
        }
        for share in self.shares.values_mut() {
            share.zeroize();
        }
    }
}

/// Check a dealer's commitments against the tree and return the public share
/// `share(p)·G` of every leaf.
///
/// Fails if a node has the wrong number of coefficients, if a child node's
/// constant term disagrees with its parent's polynomial, or if the number of
/// committed nodes does not match the tree.
pub fn leaf_points(
    root: &AccessNode,
    commitments: &[Vec<EdwardsPoint>],
) -> Result<BTreeMap<String, EdwardsPoint>> {
    let mut cursor = 0;
    let mut points = BTreeMap::new();
    walk_commitments(root, None, commitments, &mut cursor, &mut points)?;

    if cursor != commitments.len() {
        return Err(Error::VerificationFailed(format!(
            "expected commitments for {} nodes, got {}",
            cursor,
            commitments.len()
        )));
    }

    Ok(points)
}

fn walk_commitments(
    node: &AccessNode,
    value: Option<EdwardsPoint>,
    commitments: &[Vec<EdwardsPoint>],
    cursor: &mut usize,
    points: &mut BTreeMap<String, EdwardsPoint>,
) -> Result<()> {
    match node {
        AccessNode::Leaf { party } => {
            let point = value.ok_or_else(|| {
                Error::VerificationFailed("leaf without a parent threshold node".into())
            })?;
            points.insert(party.clone(), point);
        }
        AccessNode::Threshold { k, children, label } => {
            let node_commitments = commitments.get(*cursor).ok_or_else(|| {
                Error::VerificationFailed(format!("missing commitments for node '{}'", label))
            })?;
            *cursor += 1;

            if node_commitments.len() != *k {
                return Err(Error::VerificationFailed(format!(
                    "node '{}' expects {} coefficients, got {}",
                    label,
                    k,
                    node_commitments.len()
                )));
            }

            if let Some(expected) = value {
                if node_commitments[0] != expected {
                    return Err(Error::VerificationFailed(format!(
                        "node '{}' is inconsistent with its parent polynomial",
                        label
                    )));
                }
            }

            for (j, child) in children.iter().enumerate() {
                let child_value = evaluate_commitments(node_commitments, j as u64 + 1);
                walk_commitments(child, Some(child_value), commitments, cursor, points)?;
            }
        }
    }
    Ok(())
}

/// Reconstruction coefficients of the parties in `members`.
///
/// Returns `None` if `members` does not satisfy the tree. Otherwise every
/// member gets a coefficient (zero if its share is not needed) such that
/// `Σ coef(p)·share(p)` equals the shared secret. At each threshold node the
/// first `k` satisfied children, in child order, are used.
pub fn reconstruction_coefficients(
    root: &AccessNode,
    members: &BTreeSet<&str>,
) -> Result<Option<BTreeMap<String, Scalar>>> {
    let Some(mut coefficients) = node_coefficients(root, members)? else {
        return Ok(None);
    };

    for member in members {
        coefficients
            .entry((*member).to_string())
            .or_insert(Scalar::ZERO);
    }

    Ok(Some(coefficients))
}

fn node_coefficients(
    node: &AccessNode,
    members: &BTreeSet<&str>,
) -> Result<Option<BTreeMap<String, Scalar>>> {
    match node {
        AccessNode::Leaf { party } => {
            if members.contains(party.as_str()) {
                Ok(Some(BTreeMap::from([(party.clone(), Scalar::ONE)])))
            } else {
                Ok(None)
            }
        }
        AccessNode::Threshold { k, children, .. } => {
            let mut satisfied = Vec::with_capacity(*k);
            for (j, child) in children.iter().enumerate() {
                if satisfied.len() == *k {
                    break;
                }
                if let Some(coefficients) = node_coefficients(child, members)? {
                    satisfied.push((j as u64 + 1, coefficients));
                }
            }

            if satisfied.len() < *k {
                return Ok(None);
            }

            let xs: Vec<u64> = satisfied.iter().map(|(x, _)| *x).collect();
            let mut combined = BTreeMap::new();
            for (x, coefficients) in satisfied {
                let lambda = lagrange_at_zero(&xs, x)?;
                for (party, coefficient) in coefficients {
                    *combined.entry(party).or_insert(Scalar::ZERO) += lambda * coefficient;
                }
            }

            Ok(Some(combined))
        }
    }
}
