//! Files shared between parties before a run

use anyhow::{anyhow, bail, Context, Result};
use eddsa_tss_core::{AccessStructure, CurveId, SessionId};
use msg_relay_client::PeerIdentity;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordered list of parties and their public identities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roster {
    pub parties: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub identity: PeerIdentity,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading roster {}", path.display()))?;
        let roster: Roster = serde_json::from_str(&json)
            .with_context(|| format!("parsing roster {}", path.display()))?;
        if roster.parties.is_empty() {
            bail!("roster {} lists no parties", path.display());
        }
        Ok(roster)
    }

    pub fn names(&self) -> Vec<String> {
        self.parties.iter().map(|p| p.name.clone()).collect()
    }

    pub fn position(&self, name: &str) -> Result<usize> {
        self.parties
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| anyhow!("party '{}' is not on the roster", name))
    }

    /// Identities of `names`, in the given order
    pub fn identities<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<PeerIdentity>> {
        names
            .iter()
            .map(|name| {
                let index = self.position(name.as_ref())?;
                Ok(self.parties[index].identity.clone())
            })
            .collect()
    }
}

/// Policy from a JSON file, or a flat k-of-n over the roster
pub fn load_policy(
    path: Option<&Path>,
    threshold: Option<usize>,
    roster: &Roster,
) -> Result<AccessStructure> {
    match (path, threshold) {
        (Some(path), None) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading policy {}", path.display()))?;
            Ok(serde_json::from_str(&json)
                .with_context(|| format!("parsing policy {}", path.display()))?)
        }
        (None, Some(k)) => Ok(AccessStructure::threshold_of(&roster.names(), k, CurveId::Ed25519)?),
        _ => bail!("pass exactly one of --policy or --threshold"),
    }
}

pub fn parse_session_id(hex_id: &str) -> Result<SessionId> {
    hex::decode(hex_id)?
        .try_into()
        .map_err(|_| anyhow!("session id must be 32 bytes of hex"))
}

/// Comma-separated party names
pub fn parse_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use msg_relay_client::Identity;

    fn roster() -> Roster {
        Roster {
            parties: ["server", "kms", "pin"]
                .iter()
                .map(|name| RosterEntry {
                    name: name.to_string(),
                    identity: Identity::generate().public(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_roster_lookup() {
        let roster = roster();
        assert_eq!(roster.position("pin").unwrap(), 2);
        assert!(roster.position("hsm").is_err());

        let identities = roster.identities(&["pin", "server"]).unwrap();
        assert_eq!(identities[0], roster.parties[2].identity);
        assert_eq!(identities[1], roster.parties[0].identity);
    }

    #[test]
    fn test_roster_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        let roster = roster();
        std::fs::write(&path, serde_json::to_string(&roster).unwrap()).unwrap();

        let loaded = Roster::load(&path).unwrap();
        assert_eq!(loaded.names(), vec!["server", "kms", "pin"]);
    }

    #[test]
    fn test_policy_source_is_exclusive() {
        let roster = roster();
        let policy = load_policy(None, Some(2), &roster).unwrap();
        assert!(policy.satisfies(["server", "pin"]));
        assert!(load_policy(None, None, &roster).is_err());
        assert!(load_policy(Some(Path::new("p.json")), Some(2), &roster).is_err());
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_names(" server, pin,"), vec!["server", "pin"]);
        assert!(parse_session_id(&"ab".repeat(32)).is_ok());
        assert!(parse_session_id("abcd").is_err());
        assert!(parse_session_id("zz").is_err());
    }
}
