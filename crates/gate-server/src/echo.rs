//! Demonstration router: `id + JSON body` messages echoed to their sender.
//!
//! # Wire layout of one payload
//!
//! ```text
//! ┌──────────────┬─────────────────────────────┐
//! │ id (1/2/4 B) │ JSON body (UTF-8, any value) │
//! └──────────────┴─────────────────────────────┘
//! ```
//!
//! The id uses the same width and byte order as the gate's frame parser, so
//! one [`EchoRouter`] can be shared by every transport.
//!
//! # For beginners: where does session state live?
//!
//! Each connection has a user-data slot that the networking core stores but
//! never looks at.  The router keeps a [`SessionStats`] there on the first
//! message and bumps its counter on every message after that.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use gate_core::{downcast_user_data, AgentRef, ByteOrder, FieldWidth, FrameParser, RouteError, Router};
use serde_json::Value;
use tracing::debug;

/// One decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EchoMessage {
    pub id: u32,
    pub body: Value,
}

impl EchoMessage {
    pub fn new(id: u32, body: Value) -> Self {
        Self { id, body }
    }
}

/// Per-connection counters stored in the agent's user-data slot.
#[derive(Debug, Default)]
pub struct SessionStats {
    received: AtomicU64,
}

impl SessionStats {
    /// Messages routed on this connection so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    fn record(&self) -> u64 {
        self.received.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Returns the session stats attached to `agent`, if any.
pub fn session_stats(agent: &AgentRef<EchoMessage>) -> Option<Arc<SessionStats>> {
    agent.user_data().and_then(downcast_user_data::<SessionStats>)
}

/// Echoes every message back unchanged.
#[derive(Debug, Clone, Copy)]
pub struct EchoRouter {
    id_width: FieldWidth,
    order: ByteOrder,
}

impl EchoRouter {
    /// Matches the id layout of `parser`.
    pub fn new(parser: &FrameParser) -> Self {
        Self {
            id_width: parser.id_width(),
            order: parser.byte_order(),
        }
    }
}

#[async_trait]
impl Router for EchoRouter {
    type Message = EchoMessage;

    async fn route(&self, msg: EchoMessage, agent: AgentRef<EchoMessage>) -> Result<(), RouteError> {
        let stats = match session_stats(&agent) {
            Some(stats) => stats,
            None => {
                let stats = Arc::new(SessionStats::default());
                agent.set_user_data(stats.clone());
                stats
            }
        };
        let count = stats.record();
        debug!(remote = %agent.remote_addr(), id = msg.id, count, "echo");

        agent.write_msg(msg).await;
        Ok(())
    }

    fn unmarshal(&self, data: &[u8]) -> Result<EchoMessage, RouteError> {
        let width = self.id_width.bytes();
        if data.len() < width {
            return Err(RouteError::Malformed(format!(
                "payload of {} bytes has no {width}-byte id",
                data.len()
            )));
        }
        let (id, body) = data.split_at(width);
        let id = self
            .id_width
            .read(self.order, id)
            .map_err(|e| RouteError::Malformed(e.to_string()))?;
        let body = serde_json::from_slice(body).map_err(|e| RouteError::Malformed(format!("body: {e}")))?;
        // Widths are at most four bytes, so the id always fits.
        Ok(EchoMessage::new(id as u32, body))
    }

    fn marshal(&self, msg: &EchoMessage) -> Result<Vec<u8>, RouteError> {
        let mut buf = Vec::with_capacity(self.id_width.bytes() + 32);
        self.id_width
            .write(self.order, u64::from(msg.id), &mut buf)
            .map_err(|e| RouteError::Malformed(e.to_string()))?;
        serde_json::to_writer(&mut buf, &msg.body).map_err(|e| RouteError::Malformed(format!("body: {e}")))?;
        Ok(buf)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
