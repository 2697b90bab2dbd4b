use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::profiles::{DeviceProfile, ProfileTable};
use crate::protocol::{
    connection::{ConnectionManager, DEFAULT_PROBE_ADDRESSES},
    registry::DeviceRegistry,
    transport::{LineSettings, SerialOpener, TransportOpener},
    types::DeviceModel,
};

/// Serial line parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    /// Connection-level response timeout in milliseconds
    pub timeout_ms: u64,
    /// Addresses probed after the port opens
    pub probe_addresses: Vec<u8>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            timeout_ms: 1000,
            probe_addresses: DEFAULT_PROBE_ADDRESSES.to_vec(),
        }
    }
}

/// Polling and scanning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between poll cycles in milliseconds
    pub interval_ms: u64,
    /// Per-address timeout while scanning, in milliseconds
    pub scan_timeout_ms: u64,
    pub scan_start: u16,
    pub scan_end: u16,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            scan_timeout_ms: 200,
            scan_start: 1,
            scan_end: 10,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub serial: SerialConfig,
    pub polling: PollingConfig,
    /// Statically configured devices, registered in this order
    pub devices: Vec<DeviceModel>,
    /// Address-range profiles used by auto-discovery
    pub profiles: ProfileTable,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            polling: PollingConfig::default(),
            devices: Vec::new(),
            profiles: ProfileTable::new(vec![DeviceProfile::ammonia()]),
        }
    }
}

impl MonitorConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            port_name: self.serial.port_name.clone(),
            baud_rate: self.serial.baud_rate,
            timeout: Duration::from_millis(self.serial.timeout_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.polling.scan_timeout_ms)
    }

    /// Connection manager over the configured physical port.
    pub fn connection_manager(&self) -> ConnectionManager {
        self.connection_manager_with(SerialOpener)
    }

    pub fn connection_manager_with(&self, opener: impl TransportOpener + 'static) -> ConnectionManager {
        ConnectionManager::new(self.line_settings(), opener)
            .with_probe_addresses(self.serial.probe_addresses.clone())
    }

    pub fn registry(&self) -> DeviceRegistry {
        self.devices.iter().cloned().collect()
    }
}
