//! Reliable-datagram (KCP) connection.
//!
//! Three tasks per connection:
//!
//! ```text
//!  link ──read_frame──▶ [recv queue] ──▶ router.route()   (read + dispatch tasks)
//!  write_msg ──send (≤ send_timeout)──▶ [queue] ──▶ link   (write task)
//! ```
//!
//! KCP already retransmits, so a saturated outbound queue is not fatal: a
//! send waits up to `send_timeout`, then drops the message and leaves the
//! connection open.  Reads and writes carry deadlines; missing one closes
//! the connection.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use gate_core::{Agent, AgentEvent, AgentRef, FrameParser, JobDispatcher, Router, UserData};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::admission::AdmissionPermit;
use crate::lifecycle::ConnLifecycle;
use crate::link::Link;
use crate::server::ServeContext;

/// Queue sizes and deadlines for one KCP connection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KcpConnLimits {
    pub(crate) pending_write_num: usize,
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) send_timeout: Duration,
}

/// One client session on the KCP transport.
pub struct KcpConn<M: Send + 'static> {
    life: ConnLifecycle,
    tx: mpsc::Sender<Vec<u8>>,
    parser: FrameParser,
    router: Arc<dyn Router<Message = M>>,
    dispatcher: Option<Arc<dyn JobDispatcher<M>>>,
    limits: KcpConnLimits,
    this: Weak<Self>,
}

impl<M: Send + 'static> KcpConn<M> {
    pub(crate) fn spawn<L: Link>(
        link: L,
        local: SocketAddr,
        remote: SocketAddr,
        permit: AdmissionPermit,
        ctx: &ServeContext<M>,
        limits: KcpConnLimits,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(limits.pending_write_num);
        let (recv_tx, recv_rx) = mpsc::channel(limits.pending_write_num);
        let conn = Arc::new_cyclic(|this| Self {
            life: ConnLifecycle::new(ctx.shutdown.child_token(), permit, local, remote),
            tx,
            parser: ctx.parser,
            router: Arc::clone(&ctx.router),
            dispatcher: ctx.dispatcher.clone(),
            limits,
            this: this.clone(),
        });
        debug!(conn = %conn.life.id(), %remote, "kcp connection opened");

        if let Some(dispatcher) = &conn.dispatcher {
            dispatcher.go(AgentEvent::NewAgent, conn.clone());
        }

        let (reader, writer) = tokio::io::split(link);
        ctx.tracker.spawn(Arc::clone(&conn).dispatch_loop(recv_rx));
        ctx.tracker.spawn(Arc::clone(&conn).read_loop(reader, recv_tx));
        ctx.tracker.spawn(Arc::clone(&conn).write_loop(writer, rx));
        conn
    }

    async fn read_loop<R: AsyncRead + Unpin>(self: Arc<Self>, mut reader: R, recv_tx: mpsc::Sender<M>) {
        let token = self.life.token().clone();
        loop {
            let read = tokio::select! {
                _ = token.cancelled() => break,
                res = timeout(
                    self.limits.read_timeout,
                    self.parser.read_msg(self.router.as_ref(), &mut reader),
                ) => res,
            };
            let msg = match read {
                Ok(Ok(msg)) => msg,
                Ok(Err(e)) => {
                    debug!(conn = %self.life.id(), error = %e, "read message failed");
                    break;
                }
                Err(_) => {
                    debug!(conn = %self.life.id(), timeout = ?self.limits.read_timeout, "read deadline exceeded");
                    break;
                }
            };

            let queued = tokio::select! {
                _ = token.cancelled() => break,
                res = recv_tx.send(msg) => res,
            };
            if queued.is_err() {
                break;
            }
        }
        self.close();
    }

    /// Routes received messages one at a time, in arrival order.
    async fn dispatch_loop(self: Arc<Self>, mut recv_rx: mpsc::Receiver<M>) {
        let token = self.life.token().clone();
        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => break,
                next = recv_rx.recv() => match next {
                    Some(msg) => msg,
                    None => break,
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
            let write = async {
                writer.write_all(&data).await?;
                writer.flush().await
            };
            let written = tokio::select! {
                _ = token.cancelled() => break,
                res = timeout(self.limits.write_timeout, write) => res,
            };
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(conn = %self.life.id(), error = %e, "write failed");
                    break;
                }
                Err(_) => {
                    debug!(conn = %self.life.id(), timeout = ?self.limits.write_timeout, "write deadline exceeded");
                    break;
                }
            }
        }
        self.close();
    }
}

#[async_trait]
impl<M: Send + 'static> Agent<M> for KcpConn<M> {
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
        tokio::select! {
            _ = self.life.token().cancelled() => {}
            res = timeout(self.limits.send_timeout, self.tx.send(data)) => {
                if res.is_err() {
                    error!(conn = %self.life.id(), timeout = ?self.limits.send_timeout, "send queue full, message dropped");
                }
            }
        }
    }

    fn close(&self) {
        if !self.life.begin_close() {
            return;
        }
        debug!(conn = %self.life.id(), remote = %self.life.remote_addr(), "kcp connection closed");
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
