//! Event reactor: the single consistency domain.
//!
//! Every public mutation runs one complete step (graph → connectivity →
//! directory → tokens → reconcile) and returns the side effects as a
//! [`Step`] for the runtime to carry out. Nothing here performs I/O.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::connectivity::{ComponentId, ConnectivityTracker};
use crate::delta::DirectoryDelta;
use crate::directory::ChannelDirectory;
use crate::error::ReactorError;
use crate::graph::ContactGraph;
use crate::ids::{ChannelId, EntityId, Token};
use crate::naming::ChannelNamer;
use crate::token::{Completion, FetchTicket, TokenCoordinator, TokenRequest, TokenStatus};

/// Instruction for the transport collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Join {
        entity: EntityId,
        channel: ChannelId,
        token: Token,
    },
    Leave {
        entity: EntityId,
        channel: ChannelId,
    },
}

/// Notification for the presentation collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "presence", rename_all = "snake_case")]
pub enum Presence {
    Joined { channel: ChannelId, entity: EntityId },
    Left { channel: ChannelId, entity: EntityId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFailure {
    pub channel: ChannelId,
    pub reason: String,
    pub waiters: Vec<EntityId>,
}

/// Side effects of one reactor step, in the order they were produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Step {
    pub intents: Vec<Intent>,
    pub presence: Vec<Presence>,
    pub fetches: Vec<FetchTicket>,
    pub deltas: Vec<DirectoryDelta>,
    pub failures: Vec<TokenFailure>,
}

impl Step {
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
            && self.presence.is_empty()
            && self.fetches.is_empty()
            && self.deltas.is_empty()
            && self.failures.is_empty()
    }

    pub fn extend(&mut self, other: Step) {
        self.intents.extend(other.intents);
        self.presence.extend(other.presence);
        self.fetches.extend(other.fetches);
        self.deltas.extend(other.deltas);
        self.failures.extend(other.failures);
    }
}

#[derive(Debug)]
pub struct Reactor {
    pub(crate) graph: ContactGraph,
    pub(crate) tracker: ConnectivityTracker,
    pub(crate) directory: ChannelDirectory,
    pub(crate) tokens: TokenCoordinator,
    pub(crate) namer: ChannelNamer,
    /// Channel each entity is currently joined to on the transport.
    pub(crate) joined: HashMap<EntityId, ChannelId>,
}

impl Reactor {
    pub fn new(namer: ChannelNamer) -> Self {
        Self {
            graph: ContactGraph::new(),
            tracker: ConnectivityTracker::new(),
            directory: ChannelDirectory::new(),
            tokens: TokenCoordinator::new(),
            namer,
            joined: HashMap::new(),
        }
    }

    // --- Queries ---

    pub fn channel_of(&self, e: EntityId) -> Option<&ChannelId> {
        self.directory.channel_of(e)
    }

    pub fn members_of(&self, e: EntityId) -> Vec<EntityId> {
        self.tracker.members_of(e)
    }

    pub fn channel_members(&self, channel: &ChannelId) -> Vec<EntityId> {
        self.directory.members(channel)
    }

    pub fn component_of(&self, e: EntityId) -> ComponentId {
        self.tracker.component_of(e)
    }

    pub fn same_component(&self, a: EntityId, b: EntityId) -> bool {
        self.tracker.same_component(a, b)
    }

    pub fn neighbors(&self, e: EntityId) -> Vec<EntityId> {
        self.graph.neighbors(e).collect()
    }

    pub fn joined_channel(&self, e: EntityId) -> Option<&ChannelId> {
        self.joined.get(&e)
    }

    pub fn token_status(&self, channel: &ChannelId) -> TokenStatus {
        self.tokens.status(channel)
    }

    pub fn token(&self, channel: &ChannelId) -> Option<&Token> {
        self.directory.token(channel)
    }

    pub fn is_known(&self, e: EntityId) -> bool {
        self.tracker.contains(e)
    }

    pub fn entity_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn channel_count(&self) -> usize {
        self.directory.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn fetches_in_flight(&self) -> usize {
        self.tokens.in_flight()
    }

    pub fn directory(&self) -> &ChannelDirectory {
        &self.directory
    }

    // --- Events ---

    /// Register an isolated, unassigned entity. Returns false if known.
    pub fn spawn(&mut self, e: EntityId) -> bool {
        if self.tracker.contains(e) {
            return false;
        }
        self.tracker.insert(e);
        tracing::debug!(entity = %e, "spawned");
        true
    }

    pub fn on_contact_begin(&mut self, a: EntityId, b: EntityId) -> Result<Step, ReactorError> {
        self.spawn(a);
        self.spawn(b);
        let mut step = Step::default();
        if !self.graph.add_edge(a, b) {
            return Ok(step);
        }

        let (channel, affected) = match self.tracker.on_edge_added(a, b) {
            Some(merge) => {
                let out = self.directory.on_components_merged(
                    &merge.left,
                    &merge.right,
                    &merge.merged,
                    &mut self.namer,
                );
                if out.allocated {
                    step.deltas.push(DirectoryDelta::Opened {
                        channel: out.survivor.clone(),
                        members: merge.merged.clone(),
                    });
                } else if !out.reassigned.is_empty() {
                    step.deltas.push(DirectoryDelta::Assigned {
                        channel: out.survivor.clone(),
                        entities: out.reassigned.clone(),
                    });
                }
                if let Some(discarded) = &out.discarded {
                    self.tokens.invalidate(discarded);
                    step.deltas.push(DirectoryDelta::Closed {
                        channel: discarded.clone(),
                    });
                }
                (out.survivor, merge.merged)
            }
            None => {
                // New edge inside an existing group: nothing moves, but a
                // failed fetch gets another chance.
                let channel = self
                    .directory
                    .channel_of(a)
                    .cloned()
                    .ok_or(ReactorError::Unassigned(a))?;
                let members = self.directory.members(&channel);
                (channel, members)
            }
        };

        tracing::debug!(a = %a, b = %b, channel = %channel, size = affected.len(), "contact began");
        self.ensure_token(&channel, a, &mut step);
        self.reconcile(&affected, &mut step);
        Ok(step)
    }

    pub fn on_contact_end(&mut self, a: EntityId, b: EntityId) -> Result<Step, ReactorError> {
        let mut step = Step::default();
        if !self.graph.remove_edge(a, b) {
            return Ok(step);
        }
        let Some(split) = self.tracker.on_edge_removed(&self.graph, a, b) else {
            tracing::debug!(a = %a, b = %b, "contact ended, group still connected");
            if let Some(channel) = self.directory.channel_of(a).cloned() {
                self.ensure_token(&channel, a, &mut step);
            }
            return Ok(step);
        };

        let old = self
            .directory
            .channel_of(a)
            .cloned()
            .ok_or(ReactorError::Unassigned(a))?;
        let out = self
            .directory
            .on_component_split(&old, &split.components, &mut self.namer)
            .inspect_err(|e| tracing::error!(channel = %old, "split failed: {e}"))?;

        if let Some(&first) = out.retained_members.first() {
            self.ensure_token(&out.retained, first, &mut step);
        }
        for (id, members) in &out.created {
            step.deltas.push(DirectoryDelta::Opened {
                channel: id.clone(),
                members: members.clone(),
            });
            if let Some(&first) = members.first() {
                self.ensure_token(id, first, &mut step);
            }
        }

        let affected: Vec<EntityId> = split.components.into_iter().flatten().collect();
        self.reconcile(&affected, &mut step);
        Ok(step)
    }

    /// Release every contact of `e`, re-partition what it held together,
    /// then forget it. The departing entity never keeps the old channel.
    pub fn on_entity_despawned(&mut self, e: EntityId) -> Result<Step, ReactorError> {
        let mut step = Step::default();
        if !self.tracker.contains(e) {
            return Ok(step);
        }

        let former = self.graph.remove_entity(e);
        let split = if former.is_empty() {
            None
        } else {
            self.tracker.on_entity_detached(&self.graph, e)
        };

        let removal = self.directory.remove_member(e);
        if let Some(r) = &removal {
            step.deltas.push(DirectoryDelta::Released {
                channel: r.channel.clone(),
                entities: vec![e],
            });
            if r.destroyed {
                self.tokens.invalidate(&r.channel);
                step.deltas.push(DirectoryDelta::Closed {
                    channel: r.channel.clone(),
                });
            }
        }

        if let Some(split) = split {
            let rest: Vec<Vec<EntityId>> = split
                .components
                .into_iter()
                .filter(|c| c.as_slice() != [e])
                .collect();
            if rest.len() > 1 {
                let old = removal
                    .as_ref()
                    .map(|r| r.channel.clone())
                    .ok_or(ReactorError::Unassigned(e))?;
                let out = self
                    .directory
                    .on_component_split(&old, &rest, &mut self.namer)?;
                if let Some(&first) = out.retained_members.first() {
                    self.ensure_token(&out.retained, first, &mut step);
                }
                for (id, members) in &out.created {
                    step.deltas.push(DirectoryDelta::Opened {
                        channel: id.clone(),
                        members: members.clone(),
                    });
                    if let Some(&first) = members.first() {
                        self.ensure_token(id, first, &mut step);
                    }
                }
            }
            if rest.len() == 1
                && let Some(r) = removal.as_ref().filter(|r| !r.destroyed)
                && let Some(&first) = rest[0].first()
            {
                self.ensure_token(&r.channel, first, &mut step);
            }
            let affected: Vec<EntityId> = rest.into_iter().flatten().collect();
            self.reconcile(&affected, &mut step);
        }

        if let Some(channel) = self.joined.remove(&e) {
            step.intents.push(Intent::Leave {
                entity: e,
                channel: channel.clone(),
            });
            step.presence.push(Presence::Left { channel, entity: e });
        }
        self.tracker.remove(e);
        tracing::debug!(entity = %e, released = former.len(), "despawned");
        Ok(step)
    }

    /// Apply the outcome of a fetch issued by an earlier step. Runs as its
    /// own step; stale outcomes change nothing.
    pub fn on_token_fetched(
        &mut self,
        ticket: &FetchTicket,
        result: Result<Token, String>,
    ) -> Step {
        let mut step = Step::default();
        match self.tokens.complete(ticket, result) {
            Completion::Stale => {}
            Completion::Delivered { channel, token, .. } => {
                if self.directory.set_token(&channel, token) {
                    let members = self.directory.members(&channel);
                    tracing::debug!(channel = %channel, members = members.len(), "token delivered");
                    self.reconcile(&members, &mut step);
                } else {
                    self.tokens.invalidate(&channel);
                }
            }
            Completion::Failed {
                channel,
                reason,
                waiters,
            } => {
                tracing::warn!(channel = %channel, "token fetch failed: {reason}");
                step.failures.push(TokenFailure {
                    channel,
                    reason,
                    waiters,
                });
            }
        }
        step
    }

    /// Request tokens for every channel that has none and no fetch running.
    /// Used after restoring a snapshot.
    pub fn refresh_tokens(&mut self) -> Step {
        let mut step = Step::default();
        let pending: Vec<(ChannelId, EntityId)> = self
            .directory
            .channels()
            .filter(|c| c.token.is_none())
            .filter_map(|c| c.members.first().map(|&m| (c.id.clone(), m)))
            .collect();
        for (channel, requester) in pending {
            if !matches!(self.tokens.status(&channel), TokenStatus::Fetching) {
                self.ensure_token(&channel, requester, &mut step);
            }
        }
        step
    }

    // --- Internals ---

    fn ensure_token(&mut self, channel: &ChannelId, requester: EntityId, step: &mut Step) {
        match self.tokens.request(channel, requester) {
            TokenRequest::Ready(token) => {
                if self.directory.token(channel) != Some(&token) {
                    self.directory.set_token(channel, token);
                }
            }
            TokenRequest::Attached => {}
            TokenRequest::Fetch(ticket) => step.fetches.push(ticket),
        }
    }

    /// Bring each entity's transport state in line with its channel: leave a
    /// channel it no longer belongs to, join its channel once a token exists.
    fn reconcile(&mut self, entities: &[EntityId], step: &mut Step) {
        for &e in entities {
            let current = self.directory.channel_of(e).cloned();

            if let Some(joined) = self.joined.get(&e)
                && Some(joined) != current.as_ref()
            {
                let channel = joined.clone();
                self.joined.remove(&e);
                step.intents.push(Intent::Leave {
                    entity: e,
                    channel: channel.clone(),
                });
                step.presence.push(Presence::Left { channel, entity: e });
            }

            let Some(channel) = current else {
                continue;
            };
            if self.joined.contains_key(&e) {
                continue;
            }
            if let Some(token) = self.directory.token(&channel) {
                step.intents.push(Intent::Join {
                    entity: e,
                    channel: channel.clone(),
                    token: token.clone(),
                });
                step.presence.push(Presence::Joined {
                    channel: channel.clone(),
                    entity: e,
                });
                self.joined.insert(e, channel);
            }
        }
    }
}
