//! # gate-net
//!
//! Listening servers and connections for the three gate transports.
//!
//! | Transport | Framing                 | Full send queue                  |
//! |-----------|-------------------------|----------------------------------|
//! | TCP       | length header + payload | drop and close                   |
//! | KCP       | length header + payload | wait `send_timeout`, then drop   |
//! | WebSocket | one payload per message | wait for space                   |
//!
//! Every server shares the same skeleton: validate collaborators, bind,
//! then run an accept loop that claims an admission slot for each link and
//! wraps it in a connection.  Closing a server cancels a shared token that
//! every connection task observes, then waits on a task tracker until all of
//! them have exited.
//!
//! [`Gate`] composes the servers from a single [`GateConfig`].

pub mod admission;
pub mod backoff;
pub mod config;
pub mod error;
pub mod gate;
pub mod kcp;
mod lifecycle;
pub mod link;
pub mod server;
pub mod tcp;
pub mod tls;
pub mod ws;

#[cfg(test)]
mod testkit;

pub use admission::{Admission, AdmissionPermit};
pub use config::{FrameConfig, GateConfig, KcpServerConfig, TcpServerConfig, WsServerConfig};
pub use error::{ConfigError, GateError, TlsError};
pub use gate::{Gate, RunningGate};
pub use kcp::{KcpConn, KcpServer};
pub use server::{ListeningServer, Transport};
pub use tcp::{TcpConn, TcpServer};
pub use ws::{WsConn, WsServer};
