//! Channel directory: one channel per assigned component, nothing else.
//!
//! Merge tie-break: the channel with the strictly larger prior member set
//! survives; equal sizes keep the lexicographically smaller identifier.
//! Split policy: the largest resulting component keeps the old identifier;
//! equal sizes keep it on the component holding the smallest entity id.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;
use crate::ids::{ChannelId, EntityId, Token};
use crate::naming::ChannelNamer;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub members: BTreeSet<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
}

impl Channel {
    pub fn new(id: ChannelId, members: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            id,
            members: members.into_iter().collect(),
            token: None,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    pub survivor: ChannelId,
    /// Channel removed by the tie-break, if both sides had one.
    pub discarded: Option<ChannelId>,
    /// True when neither side had a channel and `survivor` is brand new.
    pub allocated: bool,
    /// Entities whose channel changed.
    pub reassigned: Vec<EntityId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitOutcome {
    pub retained: ChannelId,
    pub retained_members: Vec<EntityId>,
    /// Freshly named channels with their members, in component order.
    pub created: Vec<(ChannelId, Vec<EntityId>)>,
}

/// Result of taking one entity out of the directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRemoval {
    pub channel: ChannelId,
    /// The channel had no members left and was dropped.
    pub destroyed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ChannelDirectory {
    channels: BTreeMap<ChannelId, Channel>,
    assignment: HashMap<EntityId, ChannelId>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_of(&self, e: EntityId) -> Option<&ChannelId> {
        self.assignment.get(&e)
    }

    pub fn get(&self, id: &ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.channels.contains_key(id)
    }

    /// Sorted members of `id`, empty if it does not exist.
    pub fn members(&self, id: &ChannelId) -> Vec<EntityId> {
        self.channels
            .get(id)
            .map(|c| c.members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn token(&self, id: &ChannelId) -> Option<&Token> {
        self.channels.get(id).and_then(|c| c.token.as_ref())
    }

    /// Cache `token` on `id`. Returns false (and writes nothing) if the
    /// channel no longer exists.
    pub fn set_token(&mut self, id: &ChannelId, token: Token) -> bool {
        match self.channels.get_mut(id) {
            Some(c) => {
                c.token = Some(token);
                true
            }
            None => false,
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel shared by a component's members, if any.
    fn channel_of_group(&self, members: &[EntityId]) -> Option<ChannelId> {
        members.iter().find_map(|m| self.assignment.get(m).cloned())
    }

    fn assign(&mut self, id: &ChannelId, members: &[EntityId]) {
        for &m in members {
            self.assignment.insert(m, id.clone());
        }
    }

    /// Insert a whole channel as-is. Used when restoring snapshots.
    pub(crate) fn restore(&mut self, channel: Channel) {
        for &m in &channel.members {
            self.assignment.insert(m, channel.id.clone());
        }
        self.channels.insert(channel.id.clone(), channel);
    }

    /// Give the merged component a single channel.
    pub fn on_components_merged(
        &mut self,
        left: &[EntityId],
        right: &[EntityId],
        merged: &[EntityId],
        namer: &mut ChannelNamer,
    ) -> MergeOutcome {
        let left_channel = self.channel_of_group(left);
        let right_channel = self.channel_of_group(right);

        match (left_channel, right_channel) {
            (None, None) => {
                let id = namer.next_name();
                self.channels
                    .insert(id.clone(), Channel::new(id.clone(), merged.iter().copied()));
                self.assign(&id, merged);
                tracing::info!(channel = %id, members = merged.len(), "channel allocated");
                MergeOutcome {
                    survivor: id,
                    discarded: None,
                    allocated: true,
                    reassigned: merged.to_vec(),
                }
            }
            (Some(id), None) => self.absorb_unassigned(id, right),
            (None, Some(id)) => self.absorb_unassigned(id, left),
            (Some(x), Some(y)) if x == y => self.absorb_unassigned(x, merged),
            (Some(x), Some(y)) => {
                let x_len = self.channels.get(&x).map_or(left.len(), Channel::len);
                let y_len = self.channels.get(&y).map_or(right.len(), Channel::len);
                let (survivor, discarded) = if x_len > y_len {
                    (x, y)
                } else if y_len > x_len {
                    (y, x)
                } else if x < y {
                    (x, y)
                } else {
                    (y, x)
                };

                let moved: Vec<EntityId> = self
                    .channels
                    .remove(&discarded)
                    .map(|c| c.members.into_iter().collect())
                    .unwrap_or_default();
                if let Some(c) = self.channels.get_mut(&survivor) {
                    c.members.extend(moved.iter().copied());
                }
                self.assign(&survivor, &moved);
                tracing::info!(
                    survivor = %survivor,
                    discarded = %discarded,
                    moved = moved.len(),
                    "channels merged"
                );
                MergeOutcome {
                    survivor,
                    discarded: Some(discarded),
                    allocated: false,
                    reassigned: moved,
                }
            }
        }
    }

    fn absorb_unassigned(&mut self, id: ChannelId, newcomers: &[EntityId]) -> MergeOutcome {
        let mut reassigned = Vec::new();
        if let Some(c) = self.channels.get_mut(&id) {
            for &m in newcomers {
                if c.members.insert(m) {
                    reassigned.push(m);
                }
            }
        }
        self.assign(&id, &reassigned);
        MergeOutcome {
            survivor: id,
            discarded: None,
            allocated: false,
            reassigned,
        }
    }

    /// Re-partition `old` across the components it split into.
    pub fn on_component_split(
        &mut self,
        old: &ChannelId,
        components: &[Vec<EntityId>],
        namer: &mut ChannelNamer,
    ) -> Result<SplitOutcome, DirectoryError> {
        let channel = self
            .channels
            .get(old)
            .ok_or_else(|| DirectoryError::UnknownChannel(old.clone()))?;

        let covered: BTreeSet<EntityId> = components.iter().flatten().copied().collect();
        if covered != channel.members
            || components.iter().map(Vec::len).sum::<usize>() != covered.len()
        {
            return Err(DirectoryError::MembershipMismatch(old.clone()));
        }

        let keep = retained_index(components);
        let mut created = Vec::new();
        for (i, comp) in components.iter().enumerate() {
            if i == keep {
                continue;
            }
            let id = namer.next_name();
            self.channels
                .insert(id.clone(), Channel::new(id.clone(), comp.iter().copied()));
            self.assign(&id, comp);
            created.push((id, comp.clone()));
        }

        let retained_members = components.get(keep).cloned().unwrap_or_default();
        if let Some(c) = self.channels.get_mut(old) {
            c.members = retained_members.iter().copied().collect();
        }
        tracing::info!(
            channel = %old,
            kept = retained_members.len(),
            created = created.len(),
            "channel split"
        );

        Ok(SplitOutcome {
            retained: old.clone(),
            retained_members,
            created,
        })
    }

    /// Take `e` out of its channel, dropping the channel if it empties.
    pub fn remove_member(&mut self, e: EntityId) -> Option<MemberRemoval> {
        let id = self.assignment.remove(&e)?;
        let destroyed = match self.channels.get_mut(&id) {
            Some(c) => {
                c.members.remove(&e);
                c.is_empty()
            }
            None => false,
        };
        if destroyed {
            self.channels.remove(&id);
            tracing::info!(channel = %id, "channel destroyed");
        }
        Some(MemberRemoval {
            channel: id,
            destroyed,
        })
    }
}

/// Index of the component that keeps the old channel: largest first, then
/// the one holding the smallest entity id.
fn retained_index(components: &[Vec<EntityId>]) -> usize {
    let mut best = 0;
    for (i, comp) in components.iter().enumerate().skip(1) {
        let cur = &components[best];
        let bigger = comp.len() > cur.len();
        let tie_smaller = comp.len() == cur.len() && comp.iter().min() < cur.iter().min();
        if bigger || tie_smaller {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::NamingStrategy;

    fn ids(ns: &[u64]) -> Vec<EntityId> {
        ns.iter().map(|&n| EntityId(n)).collect()
    }

    fn namer() -> ChannelNamer {
        ChannelNamer::seeded(NamingStrategy::counter(), 0)
    }

    fn seed_channel(dir: &mut ChannelDirectory, name: &str, members: &[u64]) -> ChannelId {
        let id = ChannelId::new(name);
        dir.restore(Channel::new(id.clone(), ids(members)));
        id
    }

    #[test]
    fn test_merge_allocates_when_neither_has_channel() {
        let mut dir = ChannelDirectory::new();
        let mut n = namer();
        let out = dir.on_components_merged(&ids(&[1]), &ids(&[2]), &ids(&[1, 2]), &mut n);
        assert!(out.allocated);
        assert_eq!(out.survivor.as_str(), "C1");
        assert_eq!(dir.channel_of(EntityId(1)), Some(&out.survivor));
        assert_eq!(dir.channel_of(EntityId(2)), Some(&out.survivor));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_merge_reuses_the_only_channel() {
        let mut dir = ChannelDirectory::new();
        let mut n = namer();
        let x = seed_channel(&mut dir, "X", &[1, 2]);
        let out = dir.on_components_merged(&ids(&[3]), &ids(&[1, 2]), &ids(&[1, 2, 3]), &mut n);
        assert_eq!(out.survivor, x);
        assert!(!out.allocated);
        assert_eq!(out.discarded, None);
        assert_eq!(out.reassigned, ids(&[3]));
        assert_eq!(dir.members(&x), ids(&[1, 2, 3]));
    }

    #[test]
    fn test_merge_larger_channel_survives() {
        let mut dir = ChannelDirectory::new();
        let mut n = namer();
        let x = seed_channel(&mut dir, "X", &[1, 2, 3]);
        let y = seed_channel(&mut dir, "A", &[4]);
        let out =
            dir.on_components_merged(&ids(&[4]), &ids(&[1, 2, 3]), &ids(&[1, 2, 3, 4]), &mut n);
        assert_eq!(out.survivor, x);
        assert_eq!(out.discarded, Some(y.clone()));
        assert_eq!(out.reassigned, ids(&[4]));
        assert!(!dir.contains(&y));
        for e in 1..=4 {
            assert_eq!(dir.channel_of(EntityId(e)), Some(&x));
        }
    }

    #[test]
    fn test_merge_tie_goes_to_smaller_identifier() {
        let mut dir = ChannelDirectory::new();
        let mut n = namer();
        let b = seed_channel(&mut dir, "bbb", &[1, 2]);
        let a = seed_channel(&mut dir, "aaa", &[3, 4]);
        let out =
            dir.on_components_merged(&ids(&[1, 2]), &ids(&[3, 4]), &ids(&[1, 2, 3, 4]), &mut n);
        assert_eq!(out.survivor, a);
        assert_eq!(out.discarded, Some(b));
    }

    #[test]
    fn test_merge_keeps_survivor_token() {
        let mut dir = ChannelDirectory::new();
        let mut n = namer();
        let x = seed_channel(&mut dir, "X", &[1, 2]);
        seed_channel(&mut dir, "Y", &[3]);
        dir.set_token(&x, Token::new("tx"));
        dir.on_components_merged(&ids(&[1, 2]), &ids(&[3]), &ids(&[1, 2, 3]), &mut n);
        assert_eq!(dir.token(&x), Some(&Token::new("tx")));
    }

    #[test]
    fn test_split_equal_halves() {
        let mut dir = ChannelDirectory::new();
        let mut n = namer();
        let old = seed_channel(&mut dir, "OLD", &[1, 2, 3, 4]);
        let out = dir
            .on_component_split(&old, &[ids(&[1, 2]), ids(&[3, 4])], &mut n)
            .unwrap();
        assert_eq!(out.retained, old);
        assert_eq!(out.retained_members, ids(&[1, 2]));
        assert_eq!(out.created.len(), 1);
        let (new_id, new_members) = &out.created[0];
        assert_ne!(new_id, &old);
        assert_eq!(new_members, &ids(&[3, 4]));
        assert_eq!(dir.members(&old), ids(&[1, 2]));
        assert_eq!(dir.members(new_id), ids(&[3, 4]));
        assert_eq!(dir.channel_of(EntityId(4)), Some(new_id));
    }

    #[test]
    fn test_split_largest_keeps_channel() {
        let mut dir = ChannelDirectory::new();
        let mut n = namer();
        let old = seed_channel(&mut dir, "C1", &[1, 2, 3]);
        n.reserve(&old);
        let out = dir
            .on_component_split(&old, &[ids(&[1]), ids(&[2, 3])], &mut n)
            .unwrap();
        assert_eq!(out.retained_members, ids(&[2, 3]));
        assert_eq!(out.created, vec![(ChannelId::new("C2"), ids(&[1]))]);
    }

    #[test]
    fn test_split_keeps_token_on_retained_only() {
        let mut dir = ChannelDirectory::new();
        let mut n = namer();
        let old = seed_channel(&mut dir, "OLD", &[1, 2, 3]);
        dir.set_token(&old, Token::new("t"));
        let out = dir
            .on_component_split(&old, &[ids(&[1, 2]), ids(&[3])], &mut n)
            .unwrap();
        assert!(dir.token(&old).is_some());
        assert!(dir.token(&out.created[0].0).is_none());
    }

    #[test]
    fn test_split_unknown_channel_is_an_error() {
        let mut dir = ChannelDirectory::new();
        let mut n = namer();
        let err = dir
            .on_component_split(&ChannelId::new("gone"), &[ids(&[1])], &mut n)
            .unwrap_err();
        assert_eq!(err, DirectoryError::UnknownChannel(ChannelId::new("gone")));
    }

    #[test]
    fn test_split_rejects_mismatched_components() {
        let mut dir = ChannelDirectory::new();
        let mut n = namer();
        let old = seed_channel(&mut dir, "OLD", &[1, 2, 3]);
        let err = dir
            .on_component_split(&old, &[ids(&[1]), ids(&[2])], &mut n)
            .unwrap_err();
        assert_eq!(err, DirectoryError::MembershipMismatch(old));
    }

    #[test]
    fn test_remove_last_member_destroys_channel() {
        let mut dir = ChannelDirectory::new();
        let old = seed_channel(&mut dir, "OLD", &[1, 2]);
        let r = dir.remove_member(EntityId(1)).unwrap();
        assert!(!r.destroyed);
        let r = dir.remove_member(EntityId(2)).unwrap();
        assert!(r.destroyed);
        assert!(!dir.contains(&old));
        assert!(dir.remove_member(EntityId(2)).is_none());
    }

    #[test]
    fn test_set_token_on_missing_channel_writes_nothing() {
        let mut dir = ChannelDirectory::new();
        assert!(!dir.set_token(&ChannelId::new("nope"), Token::new("t")));
        assert!(dir.is_empty());
    }
}
