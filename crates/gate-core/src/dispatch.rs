//! Job-dispatch contract used to announce connection lifecycle events, plus a
//! channel-backed implementation.
//!
//! Connections call [`JobDispatcher::go`] from inside their own tasks (and
//! from `close`, which may run on any task), so `go` must never block.  The
//! application drains notices on its own schedule.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::agent::AgentRef;

/// Lifecycle events a connection reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentEvent {
    /// A link was admitted and its worker tasks are starting.
    NewAgent,
    /// The connection closed; emitted exactly once per connection.
    CloseAgent,
}

impl AgentEvent {
    /// Stable event name, as used in log fields.
    pub const fn name(self) -> &'static str {
        match self {
            AgentEvent::NewAgent => "NewAgent",
            AgentEvent::CloseAgent => "CloseAgent",
        }
    }
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The consuming side has gone away.
    #[error("dispatcher is closed")]
    Closed,

    /// The consumer dropped the notice while unwinding from a panic.
    #[error("notice was dropped before it was handled")]
    Dropped,
}

/// External execution facility notified of connection lifecycle events.
#[async_trait]
pub trait JobDispatcher<M: Send + 'static>: Send + Sync + 'static {
    /// Fire-and-forget.  Must return without waiting on the consumer.
    fn go(&self, event: AgentEvent, agent: AgentRef<M>);

    /// Dispatches and waits until the consumer has handled the event.
    async fn call(&self, event: AgentEvent, agent: AgentRef<M>) -> Result<(), DispatchError>;
}

// ── Channel-backed dispatcher ─────────────────────────────────────────────────

/// One lifecycle event delivered through a [`ChannelDispatcher`].
///
/// Dropping the notice marks it handled; a caller blocked in
/// [`JobDispatcher::call`] resumes at that point.
pub struct AgentNotice<M: Send + 'static> {
    pub event: AgentEvent,
    pub agent: AgentRef<M>,
    ack: Option<oneshot::Sender<()>>,
}

impl<M: Send + 'static> fmt::Debug for AgentNotice<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentNotice")
            .field("event", &self.event)
            .field("remote_addr", &self.agent.remote_addr())
            .field("awaited", &self.ack.is_some())
            .finish()
    }
}

impl<M: Send + 'static> Drop for AgentNotice<M> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Some(ack) = self.ack.take() {
            // The caller may have stopped waiting.
            let _ = ack.send(());
        }
    }
}

/// [`JobDispatcher`] that forwards every event to an unbounded channel.
pub struct ChannelDispatcher<M: Send + 'static> {
    tx: mpsc::UnboundedSender<AgentNotice<M>>,
}

impl<M: Send + 'static> Clone for ChannelDispatcher<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> fmt::Debug for ChannelDispatcher<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDispatcher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<M: Send + 'static> ChannelDispatcher<M> {
    /// Creates a dispatcher and the receiver the application drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentNotice<M>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl<M: Send + 'static> JobDispatcher<M> for ChannelDispatcher<M> {
    fn go(&self, event: AgentEvent, agent: AgentRef<M>) {
        let notice = AgentNotice {
            event,
            agent,
            ack: None,
        };
        if self.tx.send(notice).is_err() {
            warn!(event = %event, "dispatcher receiver dropped, notice discarded");
        }
    }

    async fn call(&self, event: AgentEvent, agent: AgentRef<M>) -> Result<(), DispatchError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let notice = AgentNotice {
            event,
            agent,
            ack: Some(ack_tx),
        };
        self.tx.send(notice).map_err(|_| DispatchError::Closed)?;
        ack_rx.await.map_err(|_| DispatchError::Dropped)
    }
}
