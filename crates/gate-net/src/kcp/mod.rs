//! Reliable-datagram transport: length-prefixed frames over KCP sessions.

pub mod conn;
pub mod server;

pub use conn::KcpConn;
pub use server::{session_config, KcpServer};
