//! Upgraded-socket transport: one `id + body` payload per WebSocket message.

pub mod conn;
pub mod server;
mod upgrade;

pub use conn::WsConn;
pub use server::WsServer;
