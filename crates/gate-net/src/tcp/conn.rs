//! Stream-transport connection.
//!
//! Two tasks per connection:
//!
//! ```text
//!  link ──read_frame──▶ router.route()          (read task)
//!  write_msg ──try_send──▶ [queue] ──▶ link     (write task)
//! ```
//!
//! A slow reader on the other end is fatal: once the outbound queue is
//! full, the next `write_msg` drops its message and closes the connection.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use gate_core::{Agent, AgentEvent, AgentRef, FrameParser, JobDispatcher, Router, UserData};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use crate::admission::AdmissionPermit;
use crate::lifecycle::ConnLifecycle;
use crate::link::Link;
use crate::server::ServeContext;

/// One client link on the TCP transport.
pub struct TcpConn<M: Send + 'static> {
    life: ConnLifecycle,
    tx: mpsc::Sender<Vec<u8>>,
    parser: FrameParser,
    router: Arc<dyn Router<Message = M>>,
    dispatcher: Option<Arc<dyn JobDispatcher<M>>>,
    this: Weak<Self>,
}

impl<M: Send + 'static> TcpConn<M> {
    /// Wraps an admitted link, announces it, and starts its worker tasks on
    /// the server's tracker.
    pub(crate) fn spawn<L: Link>(
        link: L,
        local: SocketAddr,
        remote: SocketAddr,
        permit: AdmissionPermit,
        ctx: &ServeContext<M>,
        pending_write_num: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(pending_write_num);
        let conn = Arc::new_cyclic(|this| Self {
            life: ConnLifecycle::new(ctx.shutdown.child_token(), permit, local, remote),
            tx,
            parser: ctx.parser,
            router: Arc::clone(&ctx.router),
            dispatcher: ctx.dispatcher.clone(),
            this: this.clone(),
        });
        debug!(conn = %conn.life.id(), %remote, "tcp connection opened");

        if let Some(dispatcher) = &conn.dispatcher {
            dispatcher.go(AgentEvent::NewAgent, conn.clone());
        }

        let (reader, writer) = tokio::io::split(link);
        ctx.tracker.spawn(Arc::clone(&conn).read_loop(reader));
        ctx.tracker.spawn(Arc::clone(&conn).write_loop(writer, rx));
        conn
    }

    async fn read_loop<R: AsyncRead + Unpin>(self: Arc<Self>, mut reader: R) {
        let token = self.life.token().clone();
        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => break,
                res = self.parser.read_msg(self.router.as_ref(), &mut reader) => match res {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(conn = %self.life.id(), error = %e, "read message failed");
                        break;
                    }
                },
            };

            let agent: AgentRef<M> = self.clone();
            let routed = tokio::select! {
                _ = token.cancelled() => break,
                res = self.router.route(msg, agent) => res,
            };
            if let Err(e) = routed {
                error!(conn = %self.life.id(), error = %e, "route message failed");
                break;
            }
        }
        self.close();
    }

    async fn write_loop<W: AsyncWrite + Unpin>(
        self: Arc<Self>,
        mut writer: W,
        mut rx: mpsc::Receiver<Vec<u8>>,
    ) {
        let token = self.life.token().clone();
        loop {
            let data = tokio::select! {
                _ = token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(data) => data,
                    None => break,
                },
            };
            let written = tokio::select! {
                _ = token.cancelled() => break,
                res = writer.write_all(&data) => res,
            };
            if let Err(e) = written {
                debug!(conn = %self.life.id(), error = %e, "write failed");
                break;
            }
        }
        self.close();
        let _ = writer.shutdown().await;
    }
}

#[async_trait]
impl<M: Send + 'static> Agent<M> for TcpConn<M> {
    async fn write_msg(&self, msg: M) {
        if self.life.is_closed() {
            return;
        }
        let data = match self.parser.write_msg(self.router.as_ref(), &msg) {
            Ok(data) => data,
            Err(e) => {
                error!(conn = %self.life.id(), error = %e, "marshal message failed");
                return;
            }
        };
        match self.tx.try_send(data) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn = %self.life.id(), "close conn: channel full");
                self.close();
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn close(&self) {
        if !self.life.begin_close() {
            return;
        }
        debug!(conn = %self.life.id(), remote = %self.life.remote_addr(), "tcp connection closed");
        if let (Some(dispatcher), Some(this)) = (&self.dispatcher, self.this.upgrade()) {
            dispatcher.go(AgentEvent::CloseAgent, this);
        }
    }

    fn is_closed(&self) -> bool {
        self.life.is_closed()
    }

    fn local_addr(&self) -> SocketAddr {
        self.life.local_addr()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.life.remote_addr()
    }

    fn user_data(&self) -> Option<UserData> {
        self.life.user_data().get()
    }

    fn set_user_data(&self, data: UserData) {
        self.life.user_data().set(data);
    }
}
