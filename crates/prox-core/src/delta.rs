//! Directory deltas for replicas.
//!
//! The authority emits one delta per structural change; a replica applies
//! them in order to a [`DirectoryMirror`] and ends up with the same
//! channel → members mapping. Tokens are never replicated.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, EntityId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectoryDelta {
    /// New channel. Members move here from wherever they were.
    Opened {
        channel: ChannelId,
        members: Vec<EntityId>,
    },
    /// Entities move into an existing channel.
    Assigned {
        channel: ChannelId,
        entities: Vec<EntityId>,
    },
    /// Entities leave a channel without joining another (despawn).
    Released {
        channel: ChannelId,
        entities: Vec<EntityId>,
    },
    Closed { channel: ChannelId },
}

/// Replica-side view of the channel directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryMirror {
    channels: BTreeMap<ChannelId, BTreeSet<EntityId>>,
    assignment: HashMap<EntityId, ChannelId>,
}

impl DirectoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_of(&self, e: EntityId) -> Option<&ChannelId> {
        self.assignment.get(&e)
    }

    pub fn members(&self, channel: &ChannelId) -> Vec<EntityId> {
        self.channels
            .get(channel)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channel → sorted members, for comparing against the authority.
    pub fn to_map(&self) -> BTreeMap<ChannelId, Vec<EntityId>> {
        self.channels
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
            .collect()
    }

    pub fn apply(&mut self, delta: &DirectoryDelta) {
        match delta {
            DirectoryDelta::Opened { channel, members } => {
                self.channels.entry(channel.clone()).or_default();
                self.move_into(channel, members);
            }
            DirectoryDelta::Assigned { channel, entities } => {
                self.move_into(channel, entities);
            }
            DirectoryDelta::Released { channel, entities } => {
                for e in entities {
                    if let Some(set) = self.channels.get_mut(channel) {
                        set.remove(e);
                    }
                    if self.assignment.get(e) == Some(channel) {
                        self.assignment.remove(e);
                    }
                }
            }
            DirectoryDelta::Closed { channel } => {
                if let Some(set) = self.channels.remove(channel) {
                    for e in set {
                        if self.assignment.get(&e) == Some(channel) {
                            self.assignment.remove(&e);
                        }
                    }
                }
            }
        }
    }

    pub fn apply_all<'a>(&mut self, deltas: impl IntoIterator<Item = &'a DirectoryDelta>) {
        for d in deltas {
            self.apply(d);
        }
    }

    fn move_into(&mut self, channel: &ChannelId, entities: &[EntityId]) {
        for &e in entities {
            if let Some(prev) = self.assignment.insert(e, channel.clone())
                && &prev != channel
                && let Some(set) = self.channels.get_mut(&prev)
            {
                set.remove(&e);
            }
            self.channels.entry(channel.clone()).or_default().insert(e);
        }
    }
}
