//! Versioned JSON snapshot of the grouping state.
//!
//! Captures entities, contact edges and channel membership. Tokens and
//! transport-joined state are deliberately absent: a restored reactor must
//! fetch fresh tokens (see [`Reactor::refresh_tokens`]) and rejoin.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::SNAPSHOT_VERSION;
use crate::directory::Channel;
use crate::error::SnapshotError;
use crate::ids::{ChannelId, EntityId};
use crate::naming::ChannelNamer;
use crate::reactor::Reactor;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub version: String,
    pub entities: Vec<EntityId>,
    pub edges: Vec<(EntityId, EntityId)>,
    pub channels: Vec<WireChannel>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WireChannel {
    pub id: ChannelId,
    pub members: Vec<EntityId>,
}

impl Snapshot {
    pub fn from_reactor(reactor: &Reactor) -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            entities: reactor.tracker.entities(),
            edges: reactor.graph.edges(),
            channels: reactor
                .directory
                .channels()
                .map(|c| WireChannel {
                    id: c.id.clone(),
                    members: c.members.iter().copied().collect(),
                })
                .collect(),
        }
    }

    /// Rebuild a reactor, checking that channels match components exactly.
    pub fn into_reactor(self, mut namer: ChannelNamer) -> Result<Reactor, SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        for ch in &self.channels {
            namer.reserve(&ch.id);
        }
        let mut reactor = Reactor::new(namer);

        for e in self.entities {
            reactor.spawn(e);
        }
        for (a, b) in self.edges {
            if reactor.graph.add_edge(a, b) {
                reactor.tracker.on_edge_added(a, b);
            }
        }

        let mut seen: BTreeSet<EntityId> = BTreeSet::new();
        let mut ids: BTreeSet<ChannelId> = BTreeSet::new();
        for ch in self.channels {
            if !ids.insert(ch.id.clone()) {
                return Err(SnapshotError::Inconsistent(format!(
                    "duplicate channel {}",
                    ch.id
                )));
            }
            let Some(&first) = ch.members.first() else {
                return Err(SnapshotError::Inconsistent(format!(
                    "channel {} has no members",
                    ch.id
                )));
            };
            let mut members = ch.members.clone();
            members.sort_unstable();
            members.dedup();
            for &m in &members {
                reactor.spawn(m);
            }
            if reactor.tracker.members_of(first) != members {
                return Err(SnapshotError::Inconsistent(format!(
                    "channel {} does not match a connected group",
                    ch.id
                )));
            }
            if members.iter().any(|m| !seen.insert(*m)) {
                return Err(SnapshotError::Inconsistent(format!(
                    "channel {} shares members with another channel",
                    ch.id
                )));
            }
            reactor.directory.restore(Channel::new(ch.id, members));
        }

        for e in reactor.tracker.entities() {
            if reactor.tracker.size_of(e) > 1 && reactor.directory.channel_of(e).is_none() {
                return Err(SnapshotError::Inconsistent(format!(
                    "entity {e} is grouped but has no channel"
                )));
            }
        }
        Ok(reactor)
    }
}

impl Reactor {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from_reactor(self)
    }
}

/// Serialize the reactor's grouping state to pretty JSON.
pub fn export_json(reactor: &Reactor) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&reactor.snapshot())
}

/// Parse a snapshot and rebuild a reactor that names channels with `namer`.
pub fn import_json(json: &str, namer: ChannelNamer) -> Result<Reactor, SnapshotError> {
    let snapshot: Snapshot = serde_json::from_str(json)?;
    snapshot.into_reactor(namer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Token;
    use crate::naming::NamingStrategy;

    fn e(n: u64) -> EntityId {
        EntityId(n)
    }

    fn namer() -> ChannelNamer {
        ChannelNamer::seeded(NamingStrategy::counter(), 3)
    }

    fn populated() -> Reactor {
        let mut r = Reactor::new(namer());
        r.spawn(e(9));
        let s = r.on_contact_begin(e(1), e(2)).unwrap();
        r.on_contact_begin(e(2), e(3)).unwrap();
        r.on_contact_begin(e(4), e(5)).unwrap();
        for t in &s.fetches {
            r.on_token_fetched(t, Ok(Token::new("secret")));
        }
        r
    }

    #[test]
    fn test_roundtrip_preserves_grouping() {
        let r = populated();
        let json = export_json(&r).unwrap();
        let r2 = import_json(&json, namer()).unwrap();

        assert_eq!(r2.entity_count(), 6);
        assert_eq!(r2.edge_count(), 3);
        assert_eq!(r2.channel_of(e(1)), r.channel_of(e(1)));
        assert_eq!(r2.channel_of(e(5)), r.channel_of(e(5)));
        assert_eq!(r2.channel_of(e(9)), None);
        assert!(r2.same_component(e(1), e(3)));
    }

    #[test]
    fn test_snapshot_omits_tokens() {
        let r = populated();
        let json = export_json(&r).unwrap();
        assert!(!json.contains("secret"));

        let mut r2 = import_json(&json, namer()).unwrap();
        let step = r2.refresh_tokens();
        assert_eq!(step.fetches.len(), 2);
    }

    #[test]
    fn test_restored_namer_does_not_reissue() {
        let r = populated();
        let json = export_json(&r).unwrap();
        let mut r2 = import_json(&json, namer()).unwrap();
        r2.on_contact_begin(e(7), e(8)).unwrap();
        assert_eq!(r2.channel_of(e(7)).map(ChannelId::as_str), Some("C3"));
    }

    #[test]
    fn test_rejects_channel_that_is_not_a_component() {
        let snap = Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            entities: vec![e(1), e(2), e(3)],
            edges: vec![(e(1), e(2))],
            channels: vec![WireChannel {
                id: ChannelId::new("C1"),
                members: vec![e(1), e(2), e(3)],
            }],
        };
        assert!(matches!(
            snap.into_reactor(namer()),
            Err(SnapshotError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_channel_id() {
        let json = r#"{"version":"VER","entities":[1,2],"edges":[],
            "channels":[{"id":"X","members":[1]},{"id":"X","members":[2]}]}"#
            .replace("VER", SNAPSHOT_VERSION);
        let err = import_json(&json, namer()).unwrap_err();
        assert!(
            matches!(&err, SnapshotError::Inconsistent(m) if m.contains("duplicate channel X")),
            "got {err}"
        );
    }

    #[test]
    fn test_rejects_group_without_channel() {
        let snap = Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            entities: vec![],
            edges: vec![(e(1), e(2))],
            channels: vec![],
        };
        assert!(matches!(
            snap.into_reactor(namer()),
            Err(SnapshotError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let json = r#"{"version":"0","entities":[],"edges":[],"channels":[]}"#;
        assert!(matches!(
            import_json(json, namer()),
            Err(SnapshotError::UnsupportedVersion(v)) if v == "0"
        ));
    }
}
