//! Error types for server startup and configuration.
//!
//! Per-connection failures never surface here: they close the connection
//! that hit them and are only logged.

use std::io;
use std::path::PathBuf;

use gate_core::ProtocolError;
use thiserror::Error;

/// Fatal startup errors of a listening server or the gate.
#[derive(Debug, Error)]
pub enum GateError {
    /// A required collaborator (router, parser, dispatcher) was not supplied.
    #[error("{transport} server is missing its {what}")]
    MissingCollaborator {
        transport: &'static str,
        what: &'static str,
    },

    /// `start` was called on a server that is already running.
    #[error("{0} server already started")]
    AlreadyStarted(&'static str),

    /// The listening endpoint could not be bound.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("frame configuration rejected: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors loading certificate material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Config(String),
}

/// Errors loading [`GateConfig`](crate::config::GateConfig) from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
