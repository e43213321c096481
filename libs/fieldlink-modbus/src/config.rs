//! Transport configuration

use std::time::Duration;

use fieldlink_core::{ConnectorError, Result};
use serde::{Deserialize, Serialize};

/// Default TCP connect timeout (ms)
pub const CONNECT_TIMEOUT_MS: u64 = 200;
/// Default request timeout (ms)
pub const REQUEST_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Tcp,
    Rtu,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line settings for RTU mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`
    pub device: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    #[serde(default)]
    pub parity: Parity,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
        }
    }
}

impl SerialConfig {
    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(ConnectorError::config("serial device must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(ConnectorError::config("baud_rate must be > 0"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConnectorError::config(format!(
                "data_bits must be 5..=8, got {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(ConnectorError::config(format!(
                "stop_bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusTransportConfig {
    #[serde(default)]
    pub mode: TransportMode,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Required in RTU mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<SerialConfig>,
}

fn default_connect_timeout_ms() -> u64 {
    CONNECT_TIMEOUT_MS
}

fn default_request_timeout_ms() -> u64 {
    REQUEST_TIMEOUT_MS
}

impl Default for ModbusTransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            serial: None,
        }
    }
}

impl ModbusTransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ConnectorError::config("transport timeouts must be > 0"));
        }
        match (self.mode, &self.serial) {
            (TransportMode::Rtu, None) => Err(ConnectorError::config(
                "RTU mode requires a serial section",
            )),
            (TransportMode::Rtu, Some(serial)) => serial.validate(),
            (TransportMode::Tcp, _) => Ok(()),
        }
    }
}
