//! Service Configuration
//!
//! Loaded through figment: a YAML file merged with `LABSRV_`-prefixed
//! environment variables, so deployments can override single fields
//! without editing the file.

use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;

use labcom_link::config::TransportConfig;
use labcom_protocols::driver::ProtocolKind;
use labcom_protocols::modbus::{ModbusMasterConfig, PollTarget};

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_channel_capacity() -> usize {
    256
}

/// Logging output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Directory for daily-rolling log files; stdout only when absent
    #[serde(default)]
    pub dir: Option<String>,
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: default_log_level(),
        }
    }
}

/// Modbus-specific settings for one instrument
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModbusSection {
    #[serde(flatten)]
    pub master: ModbusMasterConfig,
    /// Slaves visited by the poll rotation
    #[serde(default)]
    pub poll: Vec<PollTarget>,
}

/// One configured instrument link
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    /// Identity attached to every event this link emits
    pub id: String,
    pub protocol: ProtocolKind,
    pub transport: TransportConfig,
    /// Required when `protocol` is modbus, ignored otherwise
    #[serde(default)]
    pub modbus: Option<ModbusSection>,
}

/// Root service configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LabsrvConfig {
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub log: LogConfig,
    /// Capacity of the merged event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl LabsrvConfig {
    /// Load from a YAML file with `LABSRV_` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let config: LabsrvConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("LABSRV_").split("__"))
            .extract()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for instrument in &self.instruments {
            if !seen.insert(&instrument.id) {
                anyhow::bail!("duplicate instrument id: {}", instrument.id);
            }
            if instrument.protocol == ProtocolKind::Modbus && instrument.modbus.is_none() {
                anyhow::bail!(
                    "instrument {} speaks modbus but has no [modbus] section",
                    instrument.id
                );
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
