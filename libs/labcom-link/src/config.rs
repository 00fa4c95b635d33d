//! Transport Configuration Types
//!
//! Serde-backed configuration for serial and TCP instrument links. The
//! structures accept everything field engineers configure on real analyzers;
//! combinations the host serial stack cannot provide are rejected when the
//! port is opened, not when the file is parsed.

use serde::{Deserialize, Serialize};

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    /// Parity bit always 1. Accepted in configuration, unsupported at open time.
    Mark,
    /// Parity bit always 0. Accepted in configuration, unsupported at open time.
    Space,
}

/// Serial stop bits setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    /// 1.5 stop bits. Accepted in configuration, unsupported at open time.
    #[serde(rename = "1.5")]
    OneAndHalf,
    #[serde(rename = "2")]
    Two,
}

/// TCP endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TcpMode {
    /// Connect out to the instrument
    #[default]
    Client,
    /// Bind and wait for the instrument to connect in
    Server,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

/// Serial port configuration (RS-232 or RS-485)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits, 5 to 8
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub parity: Parity,
    /// RTS/CTS hardware flow control. Takes precedence over XON/XOFF.
    #[serde(default)]
    pub rts_cts: bool,
    /// XON/XOFF software flow control
    #[serde(default)]
    pub xon_xoff: bool,
}

/// TCP link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Remote host for client mode, bind address for server mode
    /// (defaults to 0.0.0.0 when absent in server mode)
    #[serde(default)]
    pub host: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub mode: TcpMode,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Transport selection for one instrument link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Serial(SerialConfig),
    Tcp(TcpConfig),
    /// In-process loopback endpoint for tests and dry runs
    Virtual,
}

impl TransportConfig {
    /// Human-readable endpoint description for logs and Modbus correlation keys
    pub fn endpoint(&self) -> String {
        match self {
            TransportConfig::Serial(s) => s.path.clone(),
            TransportConfig::Tcp(t) => format!(
                "{}:{}",
                t.host.as_deref().unwrap_or("0.0.0.0"),
                t.port
            ),
            TransportConfig::Virtual => "virtual".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_defaults() {
        let cfg: SerialConfig = serde_json::from_str(r#"{"path": "/dev/ttyUSB0"}"#)
            .expect("minimal serial config");
        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.data_bits, 8);
        assert_eq!(cfg.stop_bits, StopBits::One);
        assert_eq!(cfg.parity, Parity::None);
        assert!(!cfg.rts_cts);
        assert!(!cfg.xon_xoff);
    }

    #[test]
    fn test_exotic_serial_settings_parse() {
        let cfg: SerialConfig = serde_json::from_str(
            r#"{"path": "/dev/ttyS1", "stop_bits": "1.5", "parity": "mark"}"#,
        )
        .expect("exotic serial config");
        assert_eq!(cfg.stop_bits, StopBits::OneAndHalf);
        assert_eq!(cfg.parity, Parity::Mark);
    }

    #[test]
    fn test_transport_tagged_enum() {
        let cfg: TransportConfig = serde_json::from_str(
            r#"{"type": "tcp", "port": 4000, "mode": "server"}"#,
        )
        .expect("tcp transport config");
        match &cfg {
            TransportConfig::Tcp(t) => {
                assert_eq!(t.port, 4000);
                assert_eq!(t.mode, TcpMode::Server);
                assert!(t.host.is_none());
            },
            other => panic!("unexpected transport: {other:?}"),
        }
        assert_eq!(cfg.endpoint(), "0.0.0.0:4000");
    }

    #[test]
    fn test_endpoint_names() {
        let serial = TransportConfig::Serial(SerialConfig {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
            rts_cts: false,
            xon_xoff: false,
        });
        assert_eq!(serial.endpoint(), "/dev/ttyUSB0");
        assert_eq!(TransportConfig::Virtual.endpoint(), "virtual");
    }
}
