//! Gate configuration: one TOML document drives every transport.
//!
//! ```toml
//! tcp_addr = "0.0.0.0:3563"
//! ws_addr = "0.0.0.0:3653"
//! max_conn_num = 2000
//! pending_write_num = 1024
//!
//! [frame]
//! len_msg_len = 2
//! len_msg_id = 2
//! little_endian = false
//! ```
//!
//! Every field has a default, so an empty file is valid (and starts nothing,
//! because every address defaults to empty).  An empty address disables that
//! transport.
//!
//! Numeric knobs left at `0` are replaced with their default when a server
//! starts, with a warning; see [`effective_or_default`].

use std::path::Path;
use std::time::Duration;

use gate_core::{FrameParser, ProtocolError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

pub const DEFAULT_MAX_CONN_NUM: usize = 100;
pub const DEFAULT_PENDING_WRITE_NUM: usize = 1024;
/// WebSocket sends block rather than drop, so the queue is kept shorter.
pub const DEFAULT_WS_PENDING_WRITE_NUM: usize = 100;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_MAX_MSG_LEN: usize = 4096;

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration shared by every transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateConfig {
    /// TCP listen address; empty disables the stream transport.
    #[serde(default)]
    pub tcp_addr: String,
    /// KCP (UDP) listen address; empty disables the datagram transport.
    #[serde(default)]
    pub kcp_addr: String,
    /// WebSocket listen address; empty disables the upgraded-socket transport.
    #[serde(default)]
    pub ws_addr: String,
    /// Maximum concurrently admitted connections, per transport.
    #[serde(default = "default_max_conn_num")]
    pub max_conn_num: usize,
    /// Outbound queue capacity per connection (KCP also sizes its inbound queue with it).
    #[serde(default = "default_pending_write_num")]
    pub pending_write_num: usize,
    /// KCP read deadline.
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
    /// KCP write deadline.
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
    /// How long a KCP send may wait for queue space before dropping.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Deadline for the WebSocket TLS handshake plus HTTP upgrade.
    #[serde(default = "default_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Largest WebSocket message accepted from a client.
    #[serde(default = "default_max_msg_len")]
    pub max_msg_len: usize,
    /// PEM certificate chain; TLS is enabled when both files are set.
    #[serde(default)]
    pub cert_file: String,
    /// PEM private key.
    #[serde(default)]
    pub key_file: String,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub frame: FrameConfig,
}

/// Wire framing parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameConfig {
    /// Width of the length field in bytes: 1, 2 or 4.
    #[serde(default = "default_field_width")]
    pub len_msg_len: u8,
    /// Width of the codec-level id prefix in bytes: 1, 2 or 4.
    #[serde(default = "default_field_width")]
    pub len_msg_id: u8,
    #[serde(default)]
    pub little_endian: bool,
    /// Optional cap on the length field below its width maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frame_len: Option<u64>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_max_conn_num() -> usize {
    DEFAULT_MAX_CONN_NUM
}
fn default_pending_write_num() -> usize {
    DEFAULT_PENDING_WRITE_NUM
}
fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_send_timeout_ms() -> u64 {
    DEFAULT_SEND_TIMEOUT_MS
}
fn default_max_msg_len() -> usize {
    DEFAULT_MAX_MSG_LEN
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_field_width() -> u8 {
    2
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            tcp_addr: String::new(),
            kcp_addr: String::new(),
            ws_addr: String::new(),
            max_conn_num: default_max_conn_num(),
            pending_write_num: default_pending_write_num(),
            read_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            handshake_timeout_ms: default_timeout_ms(),
            max_msg_len: default_max_msg_len(),
            cert_file: String::new(),
            key_file: String::new(),
            log_level: default_log_level(),
            frame: FrameConfig::default(),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            len_msg_len: default_field_width(),
            len_msg_id: default_field_width(),
            little_endian: false,
            max_frame_len: None,
        }
    }
}

// ── Per-transport views ───────────────────────────────────────────────────────

/// Settings for the TCP listening server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpServerConfig {
    pub addr: String,
    pub max_conn_num: usize,
    pub pending_write_num: usize,
}

/// Settings for the KCP listening server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KcpServerConfig {
    pub addr: String,
    pub max_conn_num: usize,
    pub pending_write_num: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub send_timeout: Duration,
}

/// Settings for the WebSocket listening server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsServerConfig {
    pub addr: String,
    pub max_conn_num: usize,
    pub pending_write_num: usize,
    pub max_msg_len: usize,
    pub handshake_timeout: Duration,
    pub cert_file: String,
    pub key_file: String,
}

impl TcpServerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            max_conn_num: DEFAULT_MAX_CONN_NUM,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
        }
    }
}

impl KcpServerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            max_conn_num: DEFAULT_MAX_CONN_NUM,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        }
    }
}

impl WsServerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            max_conn_num: DEFAULT_MAX_CONN_NUM,
            pending_write_num: DEFAULT_WS_PENDING_WRITE_NUM,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            handshake_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            cert_file: String::new(),
            key_file: String::new(),
        }
    }

    /// `true` when both PEM paths are set.
    pub fn tls_enabled(&self) -> bool {
        !self.cert_file.is_empty() && !self.key_file.is_empty()
    }
}

impl GateConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Builds the frame codec described by `[frame]`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidWidth`] if a width is not 1, 2 or 4.
    pub fn build_parser(&self) -> Result<FrameParser, ProtocolError> {
        let parser = FrameParser::from_widths(
            self.frame.len_msg_len,
            self.frame.len_msg_id,
            self.frame.little_endian,
        )?;
        Ok(match self.frame.max_frame_len {
            Some(max) => parser.with_max_len(max),
            None => parser,
        })
    }

    /// TCP server settings, or `None` if `tcp_addr` is empty.
    pub fn tcp(&self) -> Option<TcpServerConfig> {
        if self.tcp_addr.is_empty() {
            return None;
        }
        Some(TcpServerConfig {
            addr: self.tcp_addr.clone(),
            max_conn_num: self.max_conn_num,
            pending_write_num: self.pending_write_num,
        })
    }

    /// KCP server settings, or `None` if `kcp_addr` is empty.
    pub fn kcp(&self) -> Option<KcpServerConfig> {
        if self.kcp_addr.is_empty() {
            return None;
        }
        Some(KcpServerConfig {
            addr: self.kcp_addr.clone(),
            max_conn_num: self.max_conn_num,
            pending_write_num: self.pending_write_num,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        })
    }

    /// WebSocket server settings, or `None` if `ws_addr` is empty.
    pub fn ws(&self) -> Option<WsServerConfig> {
        if self.ws_addr.is_empty() {
            return None;
        }
        Some(WsServerConfig {
            addr: self.ws_addr.clone(),
            max_conn_num: self.max_conn_num,
            pending_write_num: self.pending_write_num,
            max_msg_len: self.max_msg_len,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
        })
    }
}

/// Returns `value`, or `default` with a warning if `value` is zero.
pub(crate) fn effective_or_default<T>(transport: &str, name: &str, value: T, default: T) -> T
where
    T: PartialEq + Default + std::fmt::Display + Copy,
{
    if value == T::default() {
        warn!(transport, "invalid {name} {value}, reset to {default}");
        default
    } else {
        value
    }
}

/// [`effective_or_default`] for deadlines.
pub(crate) fn effective_duration(
    transport: &str,
    name: &str,
    value: Duration,
    default: Duration,
) -> Duration {
    if value.is_zero() {
        warn!(transport, "invalid {name} {value:?}, reset to {default:?}");
        default
    } else {
        value
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gate_core::{ByteOrder, FieldWidth};

    #[test]
    fn test_default_config_enables_no_transport() {
        let cfg = GateConfig::default();
        assert!(cfg.tcp().is_none());
        assert!(cfg.kcp().is_none());
        assert!(cfg.ws().is_none());
    }

    #[test]
    fn test_default_limits() {
        let cfg = GateConfig::default();
        assert_eq!(cfg.max_conn_num, 100);
        assert_eq!(cfg.pending_write_num, 1024);
        assert_eq!(cfg.send_timeout_ms, 1000);
        assert_eq!(cfg.max_msg_len, 4096);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_empty_toml_equals_default() {
        let cfg = GateConfig::from_toml_str("").expect("empty TOML is valid");
        assert_eq!(cfg, GateConfig::default());
    }

    #[test]
    fn test_partial_toml_keeps_remaining_defaults() {
        // Arrange
        let toml_str = r#"
            tcp_addr = "127.0.0.1:3563"
            max_conn_num = 5

            [frame]
            len_msg_len = 4
            little_endian = true
        "#;

        // Act
        let cfg = GateConfig::from_toml_str(toml_str).expect("parse");

        // Assert
        let tcp = cfg.tcp().expect("tcp enabled");
        assert_eq!(tcp.addr, "127.0.0.1:3563");
        assert_eq!(tcp.max_conn_num, 5);
        assert_eq!(tcp.pending_write_num, 1024);
        assert_eq!(cfg.frame.len_msg_id, 2);
        assert!(cfg.kcp().is_none());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = GateConfig::from_toml_str("max_conn_num = \"many\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = GateConfig::load(Path::new("/nonexistent/gate/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gate.toml");
        std::fs::write(&path, "ws_addr = \"127.0.0.1:0\"\nmax_msg_len = 512\n").expect("write");

        let cfg = GateConfig::load(&path).expect("load");

        let ws = cfg.ws().expect("ws enabled");
        assert_eq!(ws.max_msg_len, 512);
        assert!(!ws.tls_enabled());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = GateConfig::default();
        cfg.kcp_addr = "0.0.0.0:3564".into();
        cfg.frame.max_frame_len = Some(1024);

        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored = GateConfig::from_toml_str(&toml_str).expect("deserialize");

        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_build_parser_from_frame_section() {
        let mut cfg = GateConfig::default();
        cfg.frame = FrameConfig {
            len_msg_len: 1,
            len_msg_id: 4,
            little_endian: true,
            max_frame_len: Some(100),
        };

        let parser = cfg.build_parser().expect("valid widths");

        assert_eq!(parser.len_width(), FieldWidth::One);
        assert_eq!(parser.id_width(), FieldWidth::Four);
        assert_eq!(parser.byte_order(), ByteOrder::LittleEndian);
        assert_eq!(parser.max_len(), 100);
    }

    #[test]
    fn test_build_parser_rejects_invalid_width() {
        let mut cfg = GateConfig::default();
        cfg.frame.len_msg_len = 3;
        assert!(matches!(
            cfg.build_parser(),
            Err(ProtocolError::InvalidWidth(3))
        ));
    }

    #[test]
    fn test_kcp_view_converts_timeouts() {
        let mut cfg = GateConfig::default();
        cfg.kcp_addr = "127.0.0.1:0".into();
        cfg.read_timeout_ms = 250;

        let kcp = cfg.kcp().expect("kcp enabled");

        assert_eq!(kcp.read_timeout, Duration::from_millis(250));
        assert_eq!(kcp.send_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_effective_or_default_replaces_zero_only() {
        assert_eq!(effective_or_default("tcp", "max_conn_num", 0usize, 100), 100);
        assert_eq!(effective_or_default("tcp", "max_conn_num", 7usize, 100), 7);
    }

    #[test]
    fn test_ws_builder_uses_shorter_pending_queue() {
        // Arrange / Act
        let ws = WsServerConfig::new("127.0.0.1:0");
        let tcp = TcpServerConfig::new("127.0.0.1:0");

        // Assert
        assert_eq!(ws.pending_write_num, DEFAULT_WS_PENDING_WRITE_NUM);
        assert_eq!(ws.pending_write_num, 100);
        assert_eq!(tcp.pending_write_num, 1024);
    }

    #[test]
    fn test_effective_duration_replaces_zero_only() {
        let fallback = Duration::from_secs(10);
        assert_eq!(effective_duration("kcp", "read_timeout", Duration::ZERO, fallback), fallback);
        assert_eq!(
            effective_duration("kcp", "read_timeout", Duration::from_millis(5), fallback),
            Duration::from_millis(5)
        );
    }
}
