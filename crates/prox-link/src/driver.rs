//! Async driver: the single owner of the reactor.
//!
//! One `select!` loop alternates between contact events and token-fetch
//! completions. Each branch runs a complete reactor step before the loop
//! polls again. Fetches run on a `JoinSet` and report back over an mpsc
//! channel; fetches for channels that no longer exist are aborted.

use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use prox_core::{FetchTicket, Reactor, Step, Token};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};

use crate::error::{LinkError, Result};
use crate::event::{ContactEvent, Effect};
use crate::token_client::TokenSource;

type FetchResult = (FetchTicket, std::result::Result<Token, String>);

/// Consumer of effects: the transport, presentation or replication side.
pub trait Transport {
    fn emit(&mut self, effect: &Effect) -> Result<()>;
}

impl Transport for Vec<Effect> {
    fn emit(&mut self, effect: &Effect) -> Result<()> {
        self.push(effect.clone());
        Ok(())
    }
}

/// Writes each effect as one JSON line and flushes.
pub struct JsonLines<W: Write> {
    out: W,
}

impl<W: Write> JsonLines<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Transport for JsonLines<W> {
    fn emit(&mut self, effect: &Effect) -> Result<()> {
        serde_json::to_writer(&mut self.out, effect).map_err(|e| LinkError::Emit(e.into()))?;
        writeln!(self.out)
            .and_then(|()| self.out.flush())
            .map_err(LinkError::Emit)
    }
}

pub struct Driver<S: TokenSource, T: Transport> {
    reactor: Reactor,
    source: Arc<S>,
    transport: T,
    tasks: JoinSet<()>,
    pending: HashMap<FetchTicket, AbortHandle>,
    done_tx: mpsc::UnboundedSender<FetchResult>,
    done_rx: mpsc::UnboundedReceiver<FetchResult>,
}

impl<S: TokenSource, T: Transport> Driver<S, T> {
    pub fn new(reactor: Reactor, source: S, transport: T) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            reactor,
            source: Arc::new(source),
            transport,
            tasks: JoinSet::new(),
            pending: HashMap::new(),
            done_tx,
            done_rx,
        }
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn pending_fetches(&self) -> usize {
        self.pending.len()
    }

    pub fn into_parts(self) -> (Reactor, T) {
        (self.reactor, self.transport)
    }

    /// Apply one contact event and carry out its effects.
    pub fn handle_event(&mut self, event: &ContactEvent) -> Result<()> {
        tracing::debug!(?event, "event");
        let step = event.apply(&mut self.reactor).inspect_err(|e| {
            tracing::error!("reactor rejected {event:?}: {e}");
        })?;
        self.dispatch(step)
    }

    /// Request tokens for channels without one, e.g. after a restore.
    pub fn refresh_tokens(&mut self) -> Result<()> {
        let step = self.reactor.refresh_tokens();
        self.dispatch(step)
    }

    fn handle_completion(&mut self, (ticket, result): FetchResult) -> Result<()> {
        self.pending.remove(&ticket);
        let step = self.reactor.on_token_fetched(&ticket, result);
        self.dispatch(step)
    }

    fn dispatch(&mut self, step: Step) -> Result<()> {
        for ticket in &step.fetches {
            self.spawn_fetch(ticket.clone());
        }
        for effect in Effect::from_step(step) {
            self.transport.emit(&effect)?;
        }
        self.abort_orphaned();
        while self.tasks.try_join_next().is_some() {}
        Ok(())
    }

    fn spawn_fetch(&mut self, ticket: FetchTicket) {
        let source = Arc::clone(&self.source);
        let tx = self.done_tx.clone();
        let t = ticket.clone();
        let handle = self.tasks.spawn(async move {
            let result = source
                .fetch(&t.channel, t.requester)
                .await
                .map_err(|e| e.to_string());
            // Receiver lives as long as the driver.
            let _ = tx.send((t, result));
        });
        tracing::debug!(channel = %ticket.channel, attempt = ticket.attempt, "fetch started");
        self.pending.insert(ticket, handle);
    }

    /// Cancel fetches whose channel was merged away or destroyed.
    fn abort_orphaned(&mut self) {
        let directory = self.reactor.directory();
        self.pending.retain(|ticket, handle| {
            let keep = directory.contains(&ticket.channel);
            if !keep {
                tracing::debug!(channel = %ticket.channel, "fetch aborted");
                handle.abort();
            }
            keep
        });
    }

    /// Wait until every in-flight fetch has been applied.
    pub async fn settle(&mut self) -> Result<()> {
        while !self.pending.is_empty() {
            match self.done_rx.recv().await {
                Some(done) => self.handle_completion(done)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Drive the reactor until `events` closes or `shutdown` resolves.
    ///
    /// On end of input, outstanding fetches are still applied so their
    /// joins are emitted. On shutdown they are dropped.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ContactEvent>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(Reactor, T)> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(event) => self.handle_event(&event)?,
                    None => {
                        tracing::info!(pending = self.pending.len(), "input closed, settling");
                        self.settle().await?;
                        break;
                    }
                },
                Some(done) = self.done_rx.recv() => self.handle_completion(done)?,
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    self.tasks.abort_all();
                    break;
                }
            }
        }
        Ok(self.into_parts())
    }
}
