//! HTTP upgrade path for the WebSocket transport: optional TLS, a method
//! check that answers non-GET requests with `405`, then the WebSocket
//! handshake proper.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;

use crate::link::Link;

const METHOD_NOT_ALLOWED: &[u8] = b"HTTP/1.1 405 Method Not Allowed\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Length: 19\r\n\
Connection: close\r\n\
\r\n\
Method not allowed\n";

/// How long a refused link is drained before it is dropped.  Closing a
/// socket with unread input resets it, which can discard the response.
const REFUSE_LINGER: Duration = Duration::from_millis(250);

/// Upgraded client link as seen by a WebSocket connection.
pub(crate) type UpgradedLink = Replay<Box<dyn Link>>;

#[derive(Debug, Error)]
pub(crate) enum HandshakeError {
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] io::Error),

    #[error("request line unreadable: {0}")]
    Request(#[source] io::Error),

    #[error("websocket upgrade failed: {0}")]
    Upgrade(#[from] tungstenite::Error),
}

/// Runs the full upgrade on an accepted TCP stream.
///
/// Returns `Ok(None)` when the request was not a `GET` and has already been
/// answered with `405`.
pub(crate) async fn upgrade(
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    config: WebSocketConfig,
) -> Result<Option<WebSocketStream<UpgradedLink>>, HandshakeError> {
    let link: Box<dyn Link> = match tls {
        Some(acceptor) => Box::new(acceptor.accept(stream).await.map_err(HandshakeError::Tls)?),
        None => Box::new(stream),
    };
    let Some(link) = require_get(link).await.map_err(HandshakeError::Request)? else {
        return Ok(None);
    };
    let ws = tokio_tungstenite::accept_async_with_config(link, Some(config)).await?;
    Ok(Some(ws))
}

/// Reads the start of the request line.  `GET` requests come back wrapped
/// so the consumed bytes are replayed to the handshake; anything else is
/// answered with `405 Method Not Allowed` and dropped.
pub(crate) async fn require_get<L: Link>(mut link: L) -> io::Result<Option<Replay<L>>> {
    let mut head = [0u8; 4];
    link.read_exact(&mut head).await?;
    if &head == b"GET " {
        return Ok(Some(Replay::new(head.to_vec(), link)));
    }
    link.write_all(METHOD_NOT_ALLOWED).await?;
    link.shutdown().await?;
    let mut sink = [0u8; 512];
    let _ = tokio::time::timeout(REFUSE_LINGER, async {
        while matches!(link.read(&mut sink).await, Ok(n) if n > 0) {}
    })
    .await;
    Ok(None)
}

/// Stream wrapper that yields `prefix` before reading from `inner`.
pub(crate) struct Replay<L> {
    prefix: Vec<u8>,
    pos: usize,
    inner: L,
}

impl<L> Replay<L> {
    pub(crate) fn new(prefix: Vec<u8>, inner: L) -> Self {
        Self {
            prefix,
            pos: 0,
            inner,
        }
    }
}

impl<L: AsyncRead + Unpin> AsyncRead for Replay<L> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let n = (this.prefix.len() - this.pos).min(buf.remaining());
            buf.put_slice(&this.prefix[this.pos..this.pos + n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<L: AsyncWrite + Unpin> AsyncWrite for Replay<L> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
