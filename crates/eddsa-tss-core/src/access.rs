//! Access structures: which sets of named parties may sign
//!
//! A policy is a closed tree of [`AccessNode`]s. An [`AccessStructure`] is
//! only obtainable through validation (constructor or deserialization), so
//! evaluation sites never re-check the tree shape.

use crate::primitives::digest;
use crate::{CurveId, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Node of a policy tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessNode {
    /// Satisfied iff `party` is present
    Leaf { party: String },
    /// Satisfied iff at least `k` children are satisfied
    Threshold {
        #[serde(default)]
        label: String,
        k: usize,
        children: Vec<AccessNode>,
    },
}

impl AccessNode {
    /// Leaf for a single party
    pub fn leaf(party: impl Into<String>) -> Self {
        AccessNode::Leaf {
            party: party.into(),
        }
    }

    /// `k`-of-`children` node; fails unless `1 <= k <= children.len()`
    pub fn threshold(
        label: impl Into<String>,
        k: usize,
        children: Vec<AccessNode>,
    ) -> Result<Self> {
        let label = label.into();
        check_threshold(&label, k, children.len())?;
        Ok(AccessNode::Threshold { label, k, children })
    }

    /// Recursive top-down evaluation
    pub fn is_satisfied_by(&self, names: &BTreeSet<&str>) -> bool {
        match self {
            AccessNode::Leaf { party } => names.contains(party.as_str()),
            AccessNode::Threshold { k, children, .. } => {
                children
                    .iter()
                    .filter(|child| child.is_satisfied_by(names))
                    .take(*k)
                    .count()
                    == *k
            }
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            AccessNode::Leaf { party } => out.push(party),
            AccessNode::Threshold { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    fn check_shape(&self) -> Result<()> {
        if let AccessNode::Threshold { label, k, children } = self {
            check_threshold(label, *k, children.len())?;
            for child in children {
                child.check_shape()?;
            }
        }
        Ok(())
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            AccessNode::Leaf { party } => {
                out.push(0);
                encode_str(party, out);
            }
            AccessNode::Threshold { label, k, children } => {
                out.push(1);
                encode_str(label, out);
                out.extend_from_slice(&(*k as u64).to_le_bytes());
                out.extend_from_slice(&(children.len() as u64).to_le_bytes());
                for child in children {
                    child.encode(out);
                }
            }
        }
    }
}

fn check_threshold(label: &str, k: usize, n_children: usize) -> Result<()> {
    if n_children == 0 {
        return Err(Error::InvalidPolicy(format!(
            "threshold node '{}' has no children",
            label
        )));
    }
    if k == 0 || k > n_children {
        return Err(Error::InvalidPolicy(format!(
            "threshold node '{}' requires 1 <= k <= {}, got k = {}",
            label, n_children, k
        )));
    }
    Ok(())
}

fn encode_str(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Validated policy tree plus the group it is used with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAccessStructure")]
pub struct AccessStructure {
    root: AccessNode,
    curve: CurveId,
}

#[derive(Deserialize)]
struct RawAccessStructure {
    root: AccessNode,
    curve: CurveId,
}

impl TryFrom<RawAccessStructure> for AccessStructure {
    type Error = Error;

    fn try_from(raw: RawAccessStructure) -> Result<Self> {
        AccessStructure::new(raw.root, raw.curve)
    }
}

impl AccessStructure {
    /// Validate a policy tree.
    ///
    /// The root must be a threshold node and every party may appear in at
    /// most one leaf.
    pub fn new(root: AccessNode, curve: CurveId) -> Result<Self> {
        if matches!(root, AccessNode::Leaf { .. }) {
            return Err(Error::InvalidPolicy(
                "root must be a threshold node".into(),
            ));
        }
        root.check_shape()?;

        let mut leaves = Vec::new();
        root.collect_leaves(&mut leaves);
        let mut seen = BTreeSet::new();
        for party in &leaves {
            if party.is_empty() {
                return Err(Error::InvalidPolicy("empty party name in leaf".into()));
            }
            if !seen.insert(*party) {
                return Err(Error::InvalidPolicy(format!(
                    "party '{}' appears in more than one leaf",
                    party
                )));
            }
        }

        Ok(Self { root, curve })
    }

    /// Flat `k`-of-`names` policy
    pub fn threshold_of(names: &[String], k: usize, curve: CurveId) -> Result<Self> {
        let leaves = names.iter().map(|name| AccessNode::leaf(name.as_str())).collect();
        Self::new(AccessNode::threshold("", k, leaves)?, curve)
    }

    pub fn root(&self) -> &AccessNode {
        &self.root
    }

    pub fn curve(&self) -> CurveId {
        self.curve
    }

    /// Party names in leaf order
    pub fn parties(&self) -> Vec<&str> {
        let mut leaves = Vec::new();
        self.root.collect_leaves(&mut leaves);
        leaves
    }

    /// Whether `names` is authorized by the policy
    pub fn satisfies<'a, I>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: BTreeSet<&str> = names.into_iter().collect();
        self.root.is_satisfied_by(&names)
    }

    /// Check the policy against a session roster.
    ///
    /// Every leaf must name a roster party and every roster party must own a
    /// leaf.
    pub fn validate_roster(&self, party_names: &[String]) -> Result<()> {
        let roster: BTreeSet<&str> = party_names.iter().map(String::as_str).collect();
        let leaves = self.parties();

        if let Some(unknown) = leaves.iter().find(|party| !roster.contains(*party)) {
            return Err(Error::UnknownParty((*unknown).to_string()));
        }

        let leaf_set: BTreeSet<&str> = leaves.into_iter().collect();
        if let Some(missing) = roster.iter().find(|party| !leaf_set.contains(*party)) {
            return Err(Error::InvalidPolicy(format!(
                "party '{}' has no leaf in the policy",
                missing
            )));
        }

        Ok(())
    }

    /// Digest of the canonical policy encoding
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut encoded = Vec::new();
        self.root.encode(&mut encoded);
        digest(
            "eddsa-tss 2024 access-structure",
            &[self.curve.to_string().as_bytes(), &encoded],
        )
    }
}

/// Canonical, validated list of signing parties.
///
/// Members are kept in the policy's leaf order whatever order the caller
/// listed them in, so every member that builds a quorum from the same set of
/// names derives the same list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quorum {
    names: Vec<String>,
}

impl Quorum {
    /// Validate `names` against the policy
    pub fn new<S: AsRef<str>>(access: &AccessStructure, names: &[S]) -> Result<Self> {
        let order: BTreeMap<&str, usize> = access
            .parties()
            .into_iter()
            .enumerate()
            .map(|(position, party)| (party, position))
            .collect();

        let mut members: Vec<(usize, String)> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let position = *order
                .get(name)
                .ok_or_else(|| Error::UnknownParty(name.to_string()))?;
            if members.iter().any(|(p, _)| *p == position) {
                return Err(Error::InvalidSessionConfig(format!(
                    "'{}' listed twice in quorum",
                    name
                )));
            }
            members.push((position, name.to_string()));
        }
        members.sort_by_key(|(position, _)| *position);
        let names: Vec<String> = members.into_iter().map(|(_, name)| name).collect();

        if !access.satisfies(names.iter().map(String::as_str)) {
            return Err(Error::UnauthorizedQuorum(names));
        }

        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Quorum-local position of `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Digest of the member list, exchanged to detect diverging quorums
    pub fn digest(&self) -> [u8; 32] {
        quorum_digest(&self.names)
    }
}

/// Digest of a canonical quorum member list
pub(crate) fn quorum_digest(names: &[String]) -> [u8; 32] {
    let parts: Vec<&[u8]> = names.iter().map(|n| n.as_bytes()).collect();
    digest("eddsa-tss 2024 quorum", &parts)
}
