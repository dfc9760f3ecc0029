// ── Connection status ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Lifecycle phase of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    DemoConnected,
}

/// Identification strings reported by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlcIdentity {
    pub model: Option<String>,
    pub serial: Option<String>,
    pub firmware: Option<String>,
}

impl From<plcgw_s7::CpuIdentity> for PlcIdentity {
    fn from(id: plcgw_s7::CpuIdentity) -> Self {
        Self {
            model: id.module_type.or(id.order_code),
            serial: id.serial_number,
            firmware: id.firmware,
        }
    }
}

/// Observable state of the gateway's single controller connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub error: Option<String>,
    pub connection_attempts: u32,
    pub last_connected: Option<DateTime<Utc>>,
    pub demo_mode: bool,
    pub plc_info: Option<PlcIdentity>,
    pub state: ConnectionPhase,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identity_prefers_module_type_over_order_code() {
        let identity = PlcIdentity::from(plcgw_s7::CpuIdentity {
            order_code: Some("6ES7 315-2EH14-0AB0".into()),
            module_type: None,
            serial_number: Some("S C-1".into()),
            firmware: Some("V3.2.6".into()),
        });
        assert_eq!(identity.model.as_deref(), Some("6ES7 315-2EH14-0AB0"));
        assert_eq!(identity.serial.as_deref(), Some("S C-1"));
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = ConnectionStatus {
            state: ConnectionPhase::DemoConnected,
            demo_mode: true,
            connected: true,
            ..ConnectionStatus::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["demoMode"], true);
        assert_eq!(json["connectionAttempts"], 0);
        assert_eq!(json["state"], "demo-connected");
        assert!(json["lastConnected"].is_null());
    }
}
