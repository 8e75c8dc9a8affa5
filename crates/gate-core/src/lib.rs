//! # gate-core
//!
//! Transport-independent building blocks of the gate networking core.
//!
//! This crate knows nothing about sockets.  It defines the wire framing and
//! the contracts that connect the transports in `gate-net` to application code.
//!
//! # Architecture overview (for beginners)
//!
//! A gate accepts clients over TCP, KCP or WebSocket.  Whatever the
//! transport, every client link ends up behind the same three seams:
//!
//! - **`protocol`** – How bytes are cut into messages.  A frame is a length
//!   field (1, 2 or 4 bytes, big- or little-endian) followed by an id prefix
//!   and a body.  [`FrameParser`] does the cutting; the application's
//!   [`Router`] turns `id + body` into typed messages and handles them.
//!
//! - **`agent`** – What the application sees of a connection: an
//!   [`Agent`] that can send, close, report its addresses and carry opaque
//!   session state.
//!
//! - **`dispatch`** – How the application hears that a connection opened or
//!   closed: a [`JobDispatcher`] receives [`AgentEvent`]s without ever
//!   blocking the network tasks.

pub mod agent;
pub mod dispatch;
pub mod protocol;

pub use agent::{downcast_user_data, Agent, AgentRef, UserData};
pub use dispatch::{AgentEvent, AgentNotice, ChannelDispatcher, DispatchError, JobDispatcher};
pub use protocol::codec::{ByteOrder, FieldWidth, FrameParser, ProtocolError};
pub use protocol::router::{RouteError, Router};
