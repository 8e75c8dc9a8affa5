//! Byte-stream abstraction over the physical links the transports wrap.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

/// Any owned, sendable duplex byte stream: a `TcpStream`, a `KcpStream`, a
/// TLS stream, or an in-memory `DuplexStream` in tests.
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Link for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// `true` if an accept error is worth retrying after a backoff.
///
/// Errors that describe the listener itself (rather than resource pressure
/// or a peer that vanished mid-handshake) mean the endpoint is unusable.
pub fn is_transient_accept_error(err: &io::Error) -> bool {
    !matches!(
        err.kind(),
        io::ErrorKind::InvalidInput
            | io::ErrorKind::NotConnected
            | io::ErrorKind::Unsupported
            | io::ErrorKind::PermissionDenied
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_pressure_is_transient() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::WouldBlock,
            io::ErrorKind::Other,
        ] {
            assert!(is_transient_accept_error(&io::Error::from(kind)), "{kind:?}");
        }
    }

    #[test]
    fn test_listener_errors_are_permanent() {
        for kind in [io::ErrorKind::InvalidInput, io::ErrorKind::NotConnected] {
            assert!(!is_transient_accept_error(&io::Error::from(kind)), "{kind:?}");
        }
    }
}
