//! The listening-server contract and the pieces every transport shares:
//! collaborator validation, the per-server serving context, and the accept
//! loop with admission control and backoff.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use gate_core::{FrameParser, JobDispatcher, Router};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::admission::{Admission, AdmissionPermit};
use crate::backoff::AcceptBackoff;
use crate::error::GateError;
use crate::link::{is_transient_accept_error, Link};

/// The three interchangeable transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Kcp,
    WebSocket,
}

impl Transport {
    pub const fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Kcp => "kcp",
            Transport::WebSocket => "ws",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start/close contract shared by the TCP, KCP and WebSocket servers.
#[async_trait]
pub trait ListeningServer: Send {
    fn transport(&self) -> Transport;

    /// Validates collaborators, binds the endpoint and spawns the accept loop.
    ///
    /// Returns the bound address (useful when configured with port `0`).
    ///
    /// # Errors
    ///
    /// [`GateError::MissingCollaborator`], [`GateError::AlreadyStarted`],
    /// [`GateError::BindFailed`] or [`GateError::Tls`].  All are fatal.
    async fn start(&mut self) -> Result<SocketAddr, GateError>;

    /// Bound address while running.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Admission slots currently free, while running.
    fn remaining_capacity(&self) -> Option<usize>;

    /// Signals shutdown, stops accepting and waits until every connection
    /// task of this server has exited.  A no-op if the server is not running.
    async fn close(&mut self);
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Router, frame parser and dispatcher as supplied through a server builder.
pub(crate) struct Collaborators<M: Send + 'static> {
    pub(crate) router: Option<Arc<dyn Router<Message = M>>>,
    pub(crate) parser: Option<FrameParser>,
    pub(crate) dispatcher: Option<Arc<dyn JobDispatcher<M>>>,
}

impl<M: Send + 'static> Default for Collaborators<M> {
    fn default() -> Self {
        Self {
            router: None,
            parser: None,
            dispatcher: None,
        }
    }
}

impl<M: Send + 'static> Collaborators<M> {
    /// Checks that everything `transport` needs was supplied and builds the
    /// serving context for a fresh run.
    pub(crate) fn serve_context(
        &self,
        transport: Transport,
        require_dispatcher: bool,
    ) -> Result<ServeContext<M>, GateError> {
        let missing = |what| GateError::MissingCollaborator {
            transport: transport.as_str(),
            what,
        };
        let router = self.router.clone().ok_or_else(|| missing("router"))?;
        let parser = self.parser.ok_or_else(|| missing("frame parser"))?;
        if require_dispatcher && self.dispatcher.is_none() {
            return Err(missing("job dispatcher"));
        }
        Ok(ServeContext {
            parser,
            router,
            dispatcher: self.dispatcher.clone(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }
}

/// Everything a connection needs from its server.
pub(crate) struct ServeContext<M: Send + 'static> {
    pub(crate) parser: FrameParser,
    pub(crate) router: Arc<dyn Router<Message = M>>,
    pub(crate) dispatcher: Option<Arc<dyn JobDispatcher<M>>>,
    /// Server-wide shutdown; connection tokens are children of it.
    pub(crate) shutdown: CancellationToken,
    /// Drain barrier counting the accept loop and all connection tasks.
    pub(crate) tracker: TaskTracker,
}

impl<M: Send + 'static> Clone for ServeContext<M> {
    fn clone(&self) -> Self {
        Self {
            parser: self.parser,
            router: Arc::clone(&self.router),
            dispatcher: self.dispatcher.clone(),
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

// ── Running state ─────────────────────────────────────────────────────────────

/// Handle kept by a started server.
#[derive(Debug)]
pub(crate) struct Running {
    pub(crate) local_addr: SocketAddr,
    pub(crate) admission: Admission,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Running {
    pub(crate) fn new<M: Send + 'static>(
        local_addr: SocketAddr,
        admission: Admission,
        ctx: &ServeContext<M>,
    ) -> Self {
        Self {
            local_addr,
            admission,
            shutdown: ctx.shutdown.clone(),
            tracker: ctx.tracker.clone(),
        }
    }

    /// Raises shutdown and waits for the drain barrier to reach zero.
    pub(crate) async fn close(self, transport: Transport) {
        info!(%transport, addr = %self.local_addr, "closing server");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(%transport, addr = %self.local_addr, "server drained");
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// A listening endpoint that yields new links.
#[async_trait]
pub(crate) trait Acceptor: Send + 'static {
    type Link: Link;

    async fn accept(&mut self) -> io::Result<(Self::Link, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Link = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Binds a TCP listener, mapping failure to [`GateError::BindFailed`].
pub(crate) async fn bind_tcp(addr: &str) -> Result<(TcpListener, SocketAddr), GateError> {
    let bind_failed = |source| GateError::BindFailed {
        addr: addr.to_string(),
        source,
    };
    let listener = TcpListener::bind(addr).await.map_err(bind_failed)?;
    let local_addr = listener.local_addr().map_err(bind_failed)?;
    Ok((listener, local_addr))
}

/// Accepts links until shutdown or a permanent accept error.
///
/// Each accepted link must first claim an admission slot; if none is free
/// the link is dropped (closing it) and accepting continues.  Admitted links
/// are handed to `on_accept` together with their permit.
///
/// Transient errors back off from 5 ms, doubling up to 1 s; any successful
/// accept resets the delay.  The listener is dropped, closing the endpoint,
/// when this function returns.
pub(crate) async fn accept_loop<A, F>(
    transport: Transport,
    mut acceptor: A,
    admission: Admission,
    shutdown: CancellationToken,
    mut on_accept: F,
) where
    A: Acceptor,
    F: FnMut(A::Link, SocketAddr, AdmissionPermit) + Send,
{
    let mut backoff = AcceptBackoff::new();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = acceptor.accept() => res,
        };

        match accepted {
            Ok((link, remote)) => {
                backoff.reset();
                match admission.try_acquire() {
                    Some(permit) => on_accept(link, remote, permit),
                    None => {
                        warn!(%transport, %remote, max = admission.capacity(), "too many connections, link refused");
                        drop(link);
                    }
                }
            }
            Err(e) if is_transient_accept_error(&e) => {
                let delay = backoff.next_delay();
                warn!(%transport, error = %e, "accept error; retrying in {delay:?}");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                error!(%transport, error = %e, "accept failed, server stopped");
                break;
            }
        }
    }
    info!(%transport, "accept loop exited");
}
