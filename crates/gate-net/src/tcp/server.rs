//! TCP listening server.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use gate_core::{FrameParser, JobDispatcher, Router};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::admission::Admission;
use crate::config::{
    effective_or_default, TcpServerConfig, DEFAULT_MAX_CONN_NUM, DEFAULT_PENDING_WRITE_NUM,
};
use crate::error::GateError;
use crate::server::{accept_loop, bind_tcp, Collaborators, ListeningServer, Running, Transport};
use crate::tcp::conn::TcpConn;

/// Accepts TCP clients and runs a [`TcpConn`] for each admitted link.
///
/// Router, parser and job dispatcher are all required.
pub struct TcpServer<M: Send + 'static> {
    config: TcpServerConfig,
    collab: Collaborators<M>,
    running: Option<Running>,
}

impl<M: Send + 'static> TcpServer<M> {
    pub fn new(config: TcpServerConfig) -> Self {
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
impl<M: Send + 'static> ListeningServer for TcpServer<M> {
    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    async fn start(&mut self) -> Result<SocketAddr, GateError> {
        if self.running.is_some() {
            return Err(GateError::AlreadyStarted(Transport::Tcp.as_str()));
        }
        let ctx = self.collab.serve_context(Transport::Tcp, true)?;
        let max_conn_num = effective_or_default(
            "tcp",
            "max_conn_num",
            self.config.max_conn_num,
            DEFAULT_MAX_CONN_NUM,
        );
        let pending_write_num = effective_or_default(
            "tcp",
            "pending_write_num",
            self.config.pending_write_num,
            DEFAULT_PENDING_WRITE_NUM,
        );

        let (listener, local_addr) = bind_tcp(&self.config.addr).await?;
        let admission = Admission::new(max_conn_num);
        info!(addr = %local_addr, max_conn_num, "tcp server listening");

        let conn_ctx = ctx.clone();
        ctx.tracker.spawn(accept_loop(
            Transport::Tcp,
            listener,
            admission.clone(),
            ctx.shutdown.clone(),
            move |stream: TcpStream, remote, permit| {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%remote, error = %e, "set_nodelay failed");
                }
                TcpConn::spawn(stream, local_addr, remote, permit, &conn_ctx, pending_write_num);
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
            running.close(Transport::Tcp).await;
        }
    }
}
