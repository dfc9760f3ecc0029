//! Gateway configuration.
//!
//! One TOML file (`[plc]`, `[gateway]`, `[[points]]`) layered under
//! `PLCGW_`-prefixed environment variables, translated into
//! `plcgw_core::GatewayConfig` and a validated point list.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use plcgw_core::model::validate_points;
use plcgw_core::{ConnectionConfig, GatewayConfig, PointDefinition};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Default controller connection.
    #[serde(default)]
    pub plc: PlcSection,

    #[serde(default)]
    pub gateway: GatewaySection,

    /// Polled data points, in sweep order.
    #[serde(default)]
    pub points: Vec<PointDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlcSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub rack: u8,

    #[serde(default = "default_slot")]
    pub slot: u8,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PlcSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rack: 0,
            slot: default_slot(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "192.168.0.1".into()
}
fn default_port() -> u16 {
    102
}
fn default_slot() -> u8 {
    1
}
fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewaySection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Live-feed WebSocket port, on all interfaces.
    #[serde(default = "default_feed_port")]
    pub feed_port: u16,

    /// HTTP control API listen address.
    #[serde(default = "default_api_bind")]
    pub api_bind: SocketAddr,

    #[serde(default = "default_protocol_tag")]
    pub protocol_tag: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            feed_port: default_feed_port(),
            api_bind: default_api_bind(),
            protocol_tag: default_protocol_tag(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_feed_port() -> u16 {
    8081
}
fn default_api_bind() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 3000))
}
fn default_protocol_tag() -> String {
    "s7".into()
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Check everything the gateway would otherwise reject at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plc.host.trim().is_empty() {
            return Err(invalid("plc.host", "must not be empty"));
        }
        if self.plc.timeout_ms == 0 {
            return Err(invalid("plc.timeout_ms", "must be greater than zero"));
        }
        if self.gateway.poll_interval_ms == 0 {
            return Err(invalid("gateway.poll_interval_ms", "must be greater than zero"));
        }
        if self.gateway.protocol_tag.trim().is_empty() {
            return Err(invalid("gateway.protocol_tag", "must not be empty"));
        }
        validate_points(&self.points).map_err(|e| invalid("points", e.to_string()))
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.plc.host.clone(),
            port: self.plc.port,
            rack: self.plc.rack,
            slot: self.plc.slot,
            timeout: Duration::from_millis(self.plc.timeout_ms),
        }
    }

    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            connection: self.connection(),
            poll_interval: Duration::from_millis(self.gateway.poll_interval_ms),
            reconnect_delay: Duration::from_millis(self.gateway.reconnect_delay_ms),
            max_reconnect_attempts: self.gateway.max_reconnect_attempts,
            feed_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.gateway.feed_port)),
            protocol_tag: self.gateway.protocol_tag.clone(),
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "plcgw", "plcgw").map_or_else(
        || PathBuf::from("plcgw.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load and validate the configuration.
///
/// An explicit `path` must exist; the default path may be absent, in which
/// case defaults and environment apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(path) if !path.is_file() => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Some(path) => path.to_path_buf(),
        None => config_path(),
    };

    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("PLCGW_").split("__"))
        .extract()?;

    config.validate()?;
    Ok(config)
}
