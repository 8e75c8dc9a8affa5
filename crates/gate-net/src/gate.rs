//! Composition root: runs every configured transport under one lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::join_all;
use gate_core::{FrameParser, JobDispatcher, Router};
use tracing::{error, info};

use crate::config::GateConfig;
use crate::kcp::KcpServer;
use crate::server::{ListeningServer, Transport};
use crate::tcp::TcpServer;
use crate::ws::WsServer;

/// Builds one listening server per non-empty address in [`GateConfig`].
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use gate_core::{ChannelDispatcher, FrameParser, Router};
/// # use gate_net::{Gate, GateConfig};
/// # async fn demo<R: Router>(router: Arc<R>) {
/// let config = GateConfig { tcp_addr: "0.0.0.0:3563".into(), ..GateConfig::default() };
/// let (dispatcher, _notices) = ChannelDispatcher::channel();
/// Gate::new(config, router, FrameParser::default())
///     .with_dispatcher(Arc::new(dispatcher))
///     .run(async { let _ = tokio::signal::ctrl_c().await; })
///     .await;
/// # }
/// ```
pub struct Gate<M: Send + 'static> {
    config: GateConfig,
    router: Arc<dyn Router<Message = M>>,
    parser: FrameParser,
    dispatcher: Option<Arc<dyn JobDispatcher<M>>>,
}

impl<M: Send + 'static> Gate<M> {
    pub fn new(config: GateConfig, router: Arc<dyn Router<Message = M>>, parser: FrameParser) -> Self {
        Self {
            config,
            router,
            parser,
            dispatcher: None,
        }
    }

    /// Job dispatcher notified of connection open/close.  Required by the
    /// TCP and KCP transports; those fail to start without one.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher<M>>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    fn servers(&self) -> Vec<Box<dyn ListeningServer>> {
        let mut servers: Vec<Box<dyn ListeningServer>> = Vec::new();

        if let Some(cfg) = self.config.tcp() {
            let mut server = TcpServer::new(cfg)
                .with_router(Arc::clone(&self.router))
                .with_parser(self.parser);
            if let Some(d) = &self.dispatcher {
                server = server.with_dispatcher(Arc::clone(d));
            }
            servers.push(Box::new(server));
        }
        if let Some(cfg) = self.config.kcp() {
            let mut server = KcpServer::new(cfg)
                .with_router(Arc::clone(&self.router))
                .with_parser(self.parser);
            if let Some(d) = &self.dispatcher {
                server = server.with_dispatcher(Arc::clone(d));
            }
            servers.push(Box::new(server));
        }
        if let Some(cfg) = self.config.ws() {
            let mut server = WsServer::new(cfg)
                .with_router(Arc::clone(&self.router))
                .with_parser(self.parser);
            if let Some(d) = &self.dispatcher {
                server = server.with_dispatcher(Arc::clone(d));
            }
            servers.push(Box::new(server));
        }
        servers
    }

    /// Starts every configured server concurrently.
    ///
    /// A server that fails to start is logged and left out; the others keep
    /// running.
    pub async fn start(&self) -> RunningGate {
        let mut servers = self.servers();
        if servers.is_empty() {
            info!("no transport configured");
        }

        let results = join_all(servers.iter_mut().map(|s| s.start())).await;

        let mut started = Vec::with_capacity(servers.len());
        for (server, result) in servers.into_iter().zip(results) {
            match result {
                Ok(addr) => {
                    info!(transport = %server.transport(), %addr, "server started");
                    started.push(server);
                }
                Err(e) => {
                    error!(transport = %server.transport(), error = %e, "server failed to start");
                }
            }
        }
        RunningGate { servers: started }
    }

    /// Starts every configured server, waits for `close_sig`, then closes them.
    pub async fn run<F>(&self, close_sig: F)
    where
        F: Future<Output = ()>,
    {
        let running = self.start().await;
        close_sig.await;
        info!("close signal received");
        running.close().await;
    }
}

/// The servers a [`Gate`] managed to start.
pub struct RunningGate {
    servers: Vec<Box<dyn ListeningServer>>,
}

impl RunningGate {
    /// Bound address of `transport`, if it is running.
    pub fn local_addr(&self, transport: Transport) -> Option<SocketAddr> {
        self.servers
            .iter()
            .find(|s| s.transport() == transport)
            .and_then(|s| s.local_addr())
    }

    /// Transports that started successfully.
    pub fn transports(&self) -> Vec<Transport> {
        self.servers.iter().map(|s| s.transport()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Closes every server in turn; each waits for its own drain.
    pub async fn close(mut self) {
        for server in &mut self.servers {
            server.close().await;
        }
        info!("gate closed");
    }
}
