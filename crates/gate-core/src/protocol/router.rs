//! Application-supplied message router contract.
//!
//! The networking core never looks inside a message.  It asks the router to
//! turn bytes into a message (`unmarshal`), a message into bytes (`marshal`),
//! and to act on a decoded message (`route`).  Every connection of every
//! transport shares one router instance, so all three operations must be safe
//! to call from many tasks at once.

use async_trait::async_trait;
use thiserror::Error;

use crate::agent::AgentRef;

/// Errors a router reports back to the connection that invoked it.
///
/// Any of these terminates the reading connection.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The codec-level id prefix does not name a known message.
    #[error("unknown message id: {0}")]
    UnknownId(u32),

    /// The body could not be decoded or encoded.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The application handler rejected the message.
    #[error("handler failed: {0}")]
    Handler(String),
}

/// Decodes, encodes and dispatches application messages.
///
/// `marshal` must emit the codec-level id prefix followed by the body;
/// `unmarshal` receives the same layout.  The width of the id prefix is the
/// `id_width` of the [`FrameParser`](crate::protocol::codec::FrameParser) the
/// servers are configured with.
#[async_trait]
pub trait Router: Send + Sync + 'static {
    /// The decoded message type carried by this router.
    type Message: Send + 'static;

    /// Handles one inbound message that arrived on `agent`.
    ///
    /// Stream and WebSocket connections await this inline on their read task,
    /// so a slow handler delays the next read on the same connection only.
    async fn route(&self, msg: Self::Message, agent: AgentRef<Self::Message>) -> Result<(), RouteError>;

    /// Decodes an `id + body` payload.
    fn unmarshal(&self, data: &[u8]) -> Result<Self::Message, RouteError>;

    /// Encodes a message as an `id + body` payload.
    fn marshal(&self, msg: &Self::Message) -> Result<Vec<u8>, RouteError>;
}
