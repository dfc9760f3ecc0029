// ── Runtime gateway configuration ──
//
// These types describe *how* the gateway reaches the PLC and paces its
// work. They never touch disk: plcgw-config builds a `GatewayConfig` and
// hands it in.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

/// Parameters for one PLC session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub rack: u8,
    pub slot: u8,
    /// Bounds the TCP connect and every controller request.
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.1".into(),
            port: plcgw_s7::DEFAULT_PORT,
            rack: 0,
            slot: 1,
            timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    /// `host:port` for log lines and error messages.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Copy of this config with any field set in `overrides` replaced.
    pub fn with_overrides(&self, overrides: &ConnectionOverrides) -> Self {
        Self {
            host: overrides.host.clone().unwrap_or_else(|| self.host.clone()),
            port: overrides.port.unwrap_or(self.port),
            rack: overrides.rack.unwrap_or(self.rack),
            slot: overrides.slot.unwrap_or(self.slot),
            timeout: overrides
                .timeout
                .map_or(self.timeout, Duration::from_millis),
        }
    }
}

impl From<&ConnectionConfig> for plcgw_s7::ConnectOptions {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            rack: config.rack,
            slot: config.slot,
            timeout: config.timeout,
        }
    }
}

/// Per-request connection parameters supplied with a connect command.
/// `timeout` is in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectionOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub rack: Option<u8>,
    pub slot: Option<u8>,
    pub timeout: Option<u64>,
}

/// Everything the gateway needs besides its point list.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Used when a connect command carries no overrides.
    pub connection: ConnectionConfig,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    /// Automatic reconnects after a lost connection; explicit connects reset
    /// the count.
    pub max_reconnect_attempts: u32,
    /// Live-feed WebSocket listener address.
    pub feed_addr: SocketAddr,
    /// Stamped on every live-feed message.
    pub protocol_tag: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            poll_interval: Duration::from_millis(2000),
            reconnect_delay: Duration::from_millis(5000),
            max_reconnect_attempts: 5,
            feed_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8081)),
            protocol_tag: "s7".into(),
        }
    }
}
