//! Stream transport: length-prefixed frames over TCP.

pub mod conn;
pub mod server;

pub use conn::TcpConn;
pub use server::TcpServer;
