//! KCP (reliable UDP) listening server.
//!
//! The KCP library performs its own session handshake inside `accept`, so
//! the server runs the same steady-state accept loop as TCP.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gate_core::{FrameParser, JobDispatcher, Router};
use tokio_kcp::{KcpConfig, KcpListener, KcpNoDelayConfig, KcpStream};
use tracing::info;

use crate::admission::Admission;
use crate::config::{
    effective_duration, effective_or_default, KcpServerConfig, DEFAULT_MAX_CONN_NUM,
    DEFAULT_PENDING_WRITE_NUM, DEFAULT_SEND_TIMEOUT_MS, DEFAULT_TIMEOUT_MS,
};
use crate::error::GateError;
use crate::kcp::conn::{KcpConn, KcpConnLimits};
use crate::server::{accept_loop, Acceptor, Collaborators, ListeningServer, Running, Transport};

/// Session tuning for game traffic: no-delay mode with a 50 ms internal
/// clock, fast resend after one skipped ack, congestion control off, 4096
/// packet windows and stream mode.
pub fn session_config() -> KcpConfig {
    let mut config = KcpConfig::default();
    config.nodelay = KcpNoDelayConfig {
        nodelay: true,
        interval: 50,
        resend: 1,
        nc: true,
    };
    config.wnd_size = (4096, 4096);
    config.stream = true;
    config
}

fn kcp_io_error(err: impl std::fmt::Display) -> io::Error {
    io::Error::other(err.to_string())
}

/// `KcpListener::accept` only fails once its UDP task has exited, so the
/// error is mapped to a kind the accept loop treats as permanent.
fn kcp_accept_error(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, err.to_string())
}

/// Per-session limits with zero values replaced by their defaults.
fn conn_limits(config: &KcpServerConfig) -> KcpConnLimits {
    let timeout = Duration::from_millis(DEFAULT_TIMEOUT_MS);
    KcpConnLimits {
        pending_write_num: effective_or_default(
            "kcp",
            "pending_write_num",
            config.pending_write_num,
            DEFAULT_PENDING_WRITE_NUM,
        ),
        read_timeout: effective_duration("kcp", "read_timeout", config.read_timeout, timeout),
        write_timeout: effective_duration("kcp", "write_timeout", config.write_timeout, timeout),
        send_timeout: effective_duration(
            "kcp",
            "send_timeout",
            config.send_timeout,
            Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        ),
    }
}

#[async_trait]
impl Acceptor for KcpListener {
    type Link = KcpStream;

    async fn accept(&mut self) -> io::Result<(KcpStream, SocketAddr)> {
        KcpListener::accept(self).await.map_err(kcp_accept_error)
    }
}

/// Accepts KCP sessions and runs a [`KcpConn`] for each admitted one.
///
/// Router, parser and job dispatcher are all required.
pub struct KcpServer<M: Send + 'static> {
    config: KcpServerConfig,
    collab: Collaborators<M>,
    running: Option<Running>,
}

impl<M: Send + 'static> KcpServer<M> {
    pub fn new(config: KcpServerConfig) -> Self {
        Self {
            config,
            collab: Collaborators::default(),
            running: None,
        }
    }

    pub fn with_router(mut self, router: Arc<dyn Router<Message = M>>) -> Self {
        self.collab.router = Some(router);
        self
    }

    pub fn with_parser(mut self, parser: FrameParser) -> Self {
        self.collab.parser = Some(parser);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher<M>>) -> Self {
        self.collab.dispatcher = Some(dispatcher);
        self
    }
}

#[async_trait]
impl<M: Send + 'static> ListeningServer for KcpServer<M> {
    fn transport(&self) -> Transport {
        Transport::Kcp
    }

    async fn start(&mut self) -> Result<SocketAddr, GateError> {
        if self.running.is_some() {
            return Err(GateError::AlreadyStarted(Transport::Kcp.as_str()));
        }
        let ctx = self.collab.serve_context(Transport::Kcp, true)?;
        let max_conn_num = effective_or_default(
            "kcp",
            "max_conn_num",
            self.config.max_conn_num,
            DEFAULT_MAX_CONN_NUM,
        );
        let limits = conn_limits(&self.config);

        let bind_failed = |source| GateError::BindFailed {
            addr: self.config.addr.clone(),
            source,
        };
        let listener = KcpListener::bind(session_config(), self.config.addr.as_str())
            .await
            .map_err(|e| bind_failed(kcp_io_error(e)))?;
        let local_addr = listener.local_addr().map_err(bind_failed)?;
        let admission = Admission::new(max_conn_num);
        info!(addr = %local_addr, max_conn_num, "kcp server listening");

        let conn_ctx = ctx.clone();
        ctx.tracker.spawn(accept_loop(
            Transport::Kcp,
            listener,
            admission.clone(),
            ctx.shutdown.clone(),
            move |stream: KcpStream, remote, permit| {
                KcpConn::spawn(stream, local_addr, remote, permit, &conn_ctx, limits);
            },
        ));

        self.running = Some(Running::new(local_addr, admission, &ctx));
        Ok(local_addr)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    fn remaining_capacity(&self) -> Option<usize> {
        self.running.as_ref().map(|r| r.admission.remaining())
    }

    async fn close(&mut self) {
        if let Some(running) = self.running.take() {
            running.close(Transport::Kcp).await;
        }
    }
}
