//! Wire types for the driver: contact events in, effects out.

use prox_core::{
    DirectoryDelta, EntityId, Intent, Presence, Reactor, ReactorError, Step, TokenFailure,
};
use serde::{Deserialize, Serialize};

/// One input from the contact detector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContactEvent {
    ContactBegin { a: EntityId, b: EntityId },
    ContactEnd { a: EntityId, b: EntityId },
    Spawn { entity: EntityId },
    Despawn { entity: EntityId },
}

impl ContactEvent {
    /// Run the matching reactor operation.
    pub fn apply(&self, reactor: &mut Reactor) -> Result<Step, ReactorError> {
        match *self {
            ContactEvent::ContactBegin { a, b } => reactor.on_contact_begin(a, b),
            ContactEvent::ContactEnd { a, b } => reactor.on_contact_end(a, b),
            ContactEvent::Spawn { entity } => {
                reactor.spawn(entity);
                Ok(Step::default())
            }
            ContactEvent::Despawn { entity } => reactor.on_entity_despawned(entity),
        }
    }
}

/// One output for the transport, presentation or replication side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Intent(Intent),
    Presence(Presence),
    Delta(DirectoryDelta),
    TokenFailed(TokenFailure),
}

impl Effect {
    /// Flatten a step: deltas first so replicas learn a channel before
    /// anyone is told to join it.
    pub fn from_step(step: Step) -> Vec<Effect> {
        let mut out = Vec::with_capacity(
            step.deltas.len() + step.intents.len() + step.presence.len() + step.failures.len(),
        );
        out.extend(step.deltas.into_iter().map(Effect::Delta));
        out.extend(step.intents.into_iter().map(Effect::Intent));
        out.extend(step.presence.into_iter().map(Effect::Presence));
        out.extend(step.failures.into_iter().map(Effect::TokenFailed));
        out
    }
}
