//! Per-channel token fetch coordination.
//!
//! Each channel moves `NoToken → Fetching → Ready | Failed`; a request on a
//! `Failed` channel starts a new attempt. At most one fetch is in flight per
//! channel, and tokens are keyed by channel identifier, never by the
//! membership that happened to exist when the fetch started.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, EntityId, Token};

/// A fetch the runtime must perform, exactly once, and hand back through
/// [`TokenCoordinator::complete`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTicket {
    pub channel: ChannelId,
    pub requester: EntityId,
    pub attempt: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenRequest {
    /// Token already cached; usable right away.
    Ready(Token),
    /// A fetch is already running; the caller was added as a waiter.
    Attached,
    /// Caller must issue this fetch.
    Fetch(FetchTicket),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Delivered {
        channel: ChannelId,
        token: Token,
        waiters: Vec<EntityId>,
    },
    Failed {
        channel: ChannelId,
        reason: String,
        waiters: Vec<EntityId>,
    },
    /// Channel invalidated (or ticket superseded) before the fetch resolved.
    Stale,
}

/// Externally visible fetch state of one channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TokenStatus {
    NoToken,
    Fetching,
    Ready,
    Failed { reason: String },
}

#[derive(Debug)]
enum Slot {
    Fetching {
        attempt: u64,
        waiters: BTreeSet<EntityId>,
    },
    Ready(Token),
    Failed(String),
}

#[derive(Debug, Default)]
pub struct TokenCoordinator {
    slots: HashMap<ChannelId, Slot>,
    next_attempt: u64,
}

impl TokenCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, channel: &ChannelId, requester: EntityId) -> TokenRequest {
        match self.slots.get_mut(channel) {
            Some(Slot::Ready(token)) => return TokenRequest::Ready(token.clone()),
            Some(Slot::Fetching { waiters, .. }) => {
                waiters.insert(requester);
                return TokenRequest::Attached;
            }
            Some(Slot::Failed(_)) | None => {}
        }

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.slots.insert(
            channel.clone(),
            Slot::Fetching {
                attempt,
                waiters: BTreeSet::from([requester]),
            },
        );
        tracing::debug!(channel = %channel, requester = %requester, attempt, "token fetch issued");
        TokenRequest::Fetch(FetchTicket {
            channel: channel.clone(),
            requester,
            attempt,
        })
    }

    /// Resolve the fetch described by `ticket`.
    pub fn complete(&mut self, ticket: &FetchTicket, result: Result<Token, String>) -> Completion {
        let matches = matches!(
            self.slots.get(&ticket.channel),
            Some(Slot::Fetching { attempt, .. }) if *attempt == ticket.attempt
        );
        if !matches {
            tracing::debug!(
                channel = %ticket.channel,
                attempt = ticket.attempt,
                "stale token completion dropped"
            );
            return Completion::Stale;
        }

        let waiters = match self.slots.remove(&ticket.channel) {
            Some(Slot::Fetching { waiters, .. }) => waiters.into_iter().collect(),
            _ => Vec::new(),
        };

        match result {
            Ok(token) => {
                self.slots
                    .insert(ticket.channel.clone(), Slot::Ready(token.clone()));
                Completion::Delivered {
                    channel: ticket.channel.clone(),
                    token,
                    waiters,
                }
            }
            Err(reason) => {
                self.slots
                    .insert(ticket.channel.clone(), Slot::Failed(reason.clone()));
                Completion::Failed {
                    channel: ticket.channel.clone(),
                    reason,
                    waiters,
                }
            }
        }
    }

    /// Forget everything about `channel`. A fetch still in flight will
    /// resolve as [`Completion::Stale`].
    pub fn invalidate(&mut self, channel: &ChannelId) {
        if let Some(Slot::Fetching { waiters, .. }) = self.slots.remove(channel) {
            tracing::debug!(
                channel = %channel,
                dropped = waiters.len(),
                "pending token fetch invalidated"
            );
        }
    }

    pub fn status(&self, channel: &ChannelId) -> TokenStatus {
        match self.slots.get(channel) {
            None => TokenStatus::NoToken,
            Some(Slot::Fetching { .. }) => TokenStatus::Fetching,
            Some(Slot::Ready(_)) => TokenStatus::Ready,
            Some(Slot::Failed(reason)) => TokenStatus::Failed {
                reason: reason.clone(),
            },
        }
    }

    /// Number of fetches currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Fetching { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(s: &str) -> ChannelId {
        ChannelId::new(s)
    }

    fn ticket_of(req: TokenRequest) -> FetchTicket {
        match req {
            TokenRequest::Fetch(t) => t,
            other => panic!("expected a fetch, got {other:?}"),
        }
    }

    #[test]
    fn test_concurrent_requests_issue_one_fetch() {
        let mut tc = TokenCoordinator::new();
        let first = tc.request(&ch("C1"), EntityId(1));
        let second = tc.request(&ch("C1"), EntityId(2));
        assert!(matches!(first, TokenRequest::Fetch(_)));
        assert_eq!(second, TokenRequest::Attached);
        assert_eq!(tc.in_flight(), 1);
    }

    #[test]
    fn test_completion_wakes_all_waiters() {
        let mut tc = TokenCoordinator::new();
        let t = ticket_of(tc.request(&ch("C1"), EntityId(1)));
        tc.request(&ch("C1"), EntityId(2));

        let done = tc.complete(&t, Ok(Token::new("abc")));
        assert_eq!(
            done,
            Completion::Delivered {
                channel: ch("C1"),
                token: Token::new("abc"),
                waiters: vec![EntityId(1), EntityId(2)],
            }
        );
        assert_eq!(tc.status(&ch("C1")), TokenStatus::Ready);
        assert_eq!(
            tc.request(&ch("C1"), EntityId(3)),
            TokenRequest::Ready(Token::new("abc"))
        );
    }

    #[test]
    fn test_failure_then_retry_starts_new_attempt() {
        let mut tc = TokenCoordinator::new();
        let t1 = ticket_of(tc.request(&ch("C1"), EntityId(1)));
        let done = tc.complete(&t1, Err("503".into()));
        assert!(matches!(done, Completion::Failed { .. }));
        assert_eq!(
            tc.status(&ch("C1")),
            TokenStatus::Failed {
                reason: "503".into()
            }
        );

        let t2 = ticket_of(tc.request(&ch("C1"), EntityId(1)));
        assert!(t2.attempt > t1.attempt);
        // The old ticket can no longer land.
        assert_eq!(tc.complete(&t1, Ok(Token::new("late"))), Completion::Stale);
        assert_eq!(tc.status(&ch("C1")), TokenStatus::Fetching);
    }

    #[test]
    fn test_invalidated_channel_ignores_completion() {
        let mut tc = TokenCoordinator::new();
        let t = ticket_of(tc.request(&ch("C1"), EntityId(1)));
        tc.invalidate(&ch("C1"));
        assert_eq!(tc.complete(&t, Ok(Token::new("x"))), Completion::Stale);
        assert_eq!(tc.status(&ch("C1")), TokenStatus::NoToken);
        assert_eq!(tc.in_flight(), 0);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut tc = TokenCoordinator::new();
        assert!(matches!(tc.request(&ch("A"), EntityId(1)), TokenRequest::Fetch(_)));
        assert!(matches!(tc.request(&ch("B"), EntityId(1)), TokenRequest::Fetch(_)));
        assert_eq!(tc.in_flight(), 2);
    }
}
