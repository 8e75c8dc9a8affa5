//! WebSocket listening server.
//!
//! Admission is claimed as soon as the TCP link is accepted, before any TLS
//! or HTTP work, so the handshake itself counts against `max_conn_num`.  A
//! failed or timed-out handshake drops the permit and frees the slot.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gate_core::{FrameParser, JobDispatcher, Router};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info};

use crate::admission::{Admission, AdmissionPermit};
use crate::config::{
    effective_duration, effective_or_default, WsServerConfig, DEFAULT_MAX_CONN_NUM,
    DEFAULT_MAX_MSG_LEN, DEFAULT_TIMEOUT_MS, DEFAULT_WS_PENDING_WRITE_NUM,
};
use crate::error::{GateError, TlsError};
use crate::server::{accept_loop, bind_tcp, Collaborators, ListeningServer, Running, ServeContext, Transport};
use crate::tls;
use crate::ws::conn::WsConn;
use crate::ws::upgrade::upgrade;

/// Per-link settings the handshake task needs.
#[derive(Clone)]
struct UpgradeSettings {
    tls: Option<TlsAcceptor>,
    ws_config: WebSocketConfig,
    handshake_timeout: Duration,
    pending_write_num: usize,
}

/// Accepts HTTP connections, upgrades them to WebSocket and runs a
/// [`WsConn`] for each.
///
/// Router and parser are required; the job dispatcher is optional.
pub struct WsServer<M: Send + 'static> {
    config: WsServerConfig,
    collab: Collaborators<M>,
    running: Option<Running>,
}

impl<M: Send + 'static> WsServer<M> {
    pub fn new(config: WsServerConfig) -> Self {
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

    fn load_tls(&self) -> Result<Option<TlsAcceptor>, TlsError> {
        let cfg = &self.config;
        if cfg.cert_file.is_empty() && cfg.key_file.is_empty() {
            return Ok(None);
        }
        if !cfg.tls_enabled() {
            return Err(TlsError::Config(
                "cert_file and key_file must both be set".to_string(),
            ));
        }
        tls::load_acceptor(Path::new(&cfg.cert_file), Path::new(&cfg.key_file)).map(Some)
    }
}

#[async_trait]
impl<M: Send + 'static> ListeningServer for WsServer<M> {
    fn transport(&self) -> Transport {
        Transport::WebSocket
    }

    async fn start(&mut self) -> Result<SocketAddr, GateError> {
        if self.running.is_some() {
            return Err(GateError::AlreadyStarted(Transport::WebSocket.as_str()));
        }
        let ctx = self.collab.serve_context(Transport::WebSocket, false)?;
        let max_conn_num = effective_or_default(
            "ws",
            "max_conn_num",
            self.config.max_conn_num,
            DEFAULT_MAX_CONN_NUM,
        );
        let max_msg_len = effective_or_default(
            "ws",
            "max_msg_len",
            self.config.max_msg_len,
            DEFAULT_MAX_MSG_LEN,
        );
        let handshake_timeout = effective_duration(
            "ws",
            "handshake_timeout",
            self.config.handshake_timeout,
            Duration::from_millis(DEFAULT_TIMEOUT_MS),
        );

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(max_msg_len);
        ws_config.max_frame_size = Some(max_msg_len);

        let settings = UpgradeSettings {
            tls: self.load_tls()?,
            ws_config,
            handshake_timeout,
            pending_write_num: effective_or_default(
                "ws",
                "pending_write_num",
                self.config.pending_write_num,
                DEFAULT_WS_PENDING_WRITE_NUM,
            ),
        };

        let (listener, local_addr) = bind_tcp(&self.config.addr).await?;
        let admission = Admission::new(max_conn_num);
        info!(
            addr = %local_addr,
            max_conn_num,
            tls = settings.tls.is_some(),
            "ws server listening"
        );

        let conn_ctx = ctx.clone();
        ctx.tracker.spawn(accept_loop(
            Transport::WebSocket,
            listener,
            admission.clone(),
            ctx.shutdown.clone(),
            move |stream: TcpStream, remote, permit| {
                conn_ctx.tracker.spawn(serve_link(
                    stream,
                    local_addr,
                    remote,
                    permit,
                    settings.clone(),
                    conn_ctx.clone(),
                ));
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
            running.close(Transport::WebSocket).await;
        }
    }
}

/// Upgrades one admitted link and, on success, hands it to a [`WsConn`].
async fn serve_link<M: Send + 'static>(
    stream: TcpStream,
    local: SocketAddr,
    remote: SocketAddr,
    permit: AdmissionPermit,
    settings: UpgradeSettings,
    ctx: ServeContext<M>,
) {
    let upgraded = tokio::select! {
        _ = ctx.shutdown.cancelled() => return,
        res = timeout(
            settings.handshake_timeout,
            upgrade(stream, settings.tls, settings.ws_config),
        ) => res,
    };
    match upgraded {
        Ok(Ok(Some(ws))) => {
            WsConn::spawn(ws, local, remote, permit, &ctx, settings.pending_write_num);
        }
        Ok(Ok(None)) => debug!(%remote, "non-GET request refused with 405"),
        Ok(Err(e)) => debug!(%remote, error = %e, "websocket handshake failed"),
        Err(_) => debug!(%remote, "websocket handshake timed out"),
    }
}
