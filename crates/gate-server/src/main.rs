//! gate-server: the process entry point.
//!
//! Loads a [`GateConfig`] (TOML file, then CLI / environment overrides),
//! installs logging, and runs every configured transport with the
//! demonstration [`EchoRouter`] until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! gate-server [OPTIONS]
//!
//! Options:
//!   --config       <PATH>  TOML configuration file
//!   --tcp-addr     <ADDR>  TCP listen address, e.g. 0.0.0.0:3563
//!   --kcp-addr     <ADDR>  KCP (UDP) listen address
//!   --ws-addr      <ADDR>  WebSocket listen address
//!   --max-conn-num <N>     per-transport connection limit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable            | Flag             |
//! |---------------------|------------------|
//! | `GATE_CONFIG`       | `--config`       |
//! | `GATE_TCP_ADDR`     | `--tcp-addr`     |
//! | `GATE_KCP_ADDR`     | `--kcp-addr`     |
//! | `GATE_WS_ADDR`      | `--ws-addr`      |
//! | `GATE_MAX_CONN_NUM` | `--max-conn-num` |
//!
//! `RUST_LOG` takes precedence over the file's `log_level`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gate_core::ChannelDispatcher;
use gate_net::{Gate, GateConfig, Transport};
use gate_server::echo::{EchoMessage, EchoRouter};
use gate_server::notices;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Game-server gate.
///
/// Every flag overrides the matching key of the configuration file.
#[derive(Debug, Parser)]
#[command(name = "gate-server", about = "TCP, KCP and WebSocket gate for game servers", version)]
struct Cli {
    /// TOML configuration file.  Without one, every key takes its default.
    #[arg(long, env = "GATE_CONFIG")]
    config: Option<PathBuf>,

    /// TCP listen address; an empty value disables TCP.
    #[arg(long, env = "GATE_TCP_ADDR")]
    tcp_addr: Option<String>,

    /// KCP listen address; an empty value disables KCP.
    #[arg(long, env = "GATE_KCP_ADDR")]
    kcp_addr: Option<String>,

    /// WebSocket listen address; an empty value disables WebSocket.
    #[arg(long, env = "GATE_WS_ADDR")]
    ws_addr: Option<String>,

    /// Connection limit applied to each transport.
    #[arg(long, env = "GATE_MAX_CONN_NUM")]
    max_conn_num: Option<usize>,
}

impl Cli {
    /// Reads the configuration file, if any, and applies the overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    fn into_gate_config(self) -> anyhow::Result<GateConfig> {
        let mut config = match &self.config {
            Some(path) => GateConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => GateConfig::default(),
        };
        if let Some(addr) = self.tcp_addr {
            config.tcp_addr = addr;
        }
        if let Some(addr) = self.kcp_addr {
            config.kcp_addr = addr;
        }
        if let Some(addr) = self.ws_addr {
            config.ws_addr = addr;
        }
        if let Some(n) = self.max_conn_num {
            config.max_conn_num = n;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_gate_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let parser = config.build_parser().context("invalid [frame] settings")?;
    let router = Arc::new(EchoRouter::new(&parser));
    let (dispatcher, notice_rx) = ChannelDispatcher::channel();
    let consumer = tokio::spawn(notices::consume(notice_rx));

    let gate = Gate::<EchoMessage>::new(config, router, parser).with_dispatcher(Arc::new(dispatcher));
    let running = gate.start().await;
    if running.is_empty() {
        anyhow::bail!("no transport started; set tcp_addr, kcp_addr or ws_addr");
    }
    for transport in [Transport::Tcp, Transport::Kcp, Transport::WebSocket] {
        if let Some(addr) = running.local_addr(transport) {
            info!(%transport, %addr, "accepting clients");
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(e) => error!("failed to listen for Ctrl+C: {e}"),
    }
    running.close().await;

    // The gate owns the last dispatcher handle; dropping it ends the consumer.
    drop(gate);
    match consumer.await {
        Ok(tally) => info!(served = tally.opened, "gate-server stopped"),
        Err(e) => warn!("notice consumer ended abnormally: {e}"),
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
