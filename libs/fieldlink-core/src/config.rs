//! Engine tunables

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConnectorError, FailureClass, Result};
use crate::model::ConnectionState;

/// Consecutive failed reads before a device is declared lost
pub const READ_MAX_ATTEMPTS: u32 = 5;
/// Cooldown of a lost device before it is polled again
pub const LOST_DELAY_MS: i64 = 5_000;
/// Minimum interval between two writes of the same property
pub const WRITE_DEBOUNCE_DELAY_MS: i64 = 2_000;
/// Scheduler tick period
pub const TICK_INTERVAL_MS: u64 = 10;
/// Protocol limit for one coil / discrete input read
pub const MAX_READ_BITS: u16 = 2000;
/// Protocol limit for one holding / input register read
pub const MAX_READ_REGISTERS: u16 = 125;

/// Polling engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler tick period
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Consecutive failed reads before a device is declared lost
    #[serde(default = "default_read_max_attempts")]
    pub read_max_attempts: u32,
    /// Cooldown of a lost device
    #[serde(default = "default_lost_delay")]
    pub lost_delay_ms: i64,
    /// Write debounce window per property
    #[serde(default = "default_write_debounce")]
    pub write_debounce_ms: i64,
    /// Maximum quantity of one coil / discrete input request
    #[serde(default = "default_max_read_bits")]
    pub max_read_bits: u16,
    /// Maximum quantity of one holding / input register request
    #[serde(default = "default_max_read_registers")]
    pub max_read_registers: u16,
    /// Capacity of the write command queue
    #[serde(default = "default_command_queue_size")]
    pub command_queue_size: usize,
    /// Connection state applied to a device when a write fails
    #[serde(default)]
    pub write_failure_mapping: WriteFailureMapping,
}

// Default value functions
fn default_tick_interval() -> u64 {
    TICK_INTERVAL_MS
}
fn default_read_max_attempts() -> u32 {
    READ_MAX_ATTEMPTS
}
fn default_lost_delay() -> i64 {
    LOST_DELAY_MS
}
fn default_write_debounce() -> i64 {
    WRITE_DEBOUNCE_DELAY_MS
}
fn default_max_read_bits() -> u16 {
    MAX_READ_BITS
}
fn default_max_read_registers() -> u16 {
    MAX_READ_REGISTERS
}
fn default_command_queue_size() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            read_max_attempts: default_read_max_attempts(),
            lost_delay_ms: default_lost_delay(),
            write_debounce_ms: default_write_debounce(),
            max_read_bits: default_max_read_bits(),
            max_read_registers: default_max_read_registers(),
            command_queue_size: default_command_queue_size(),
            write_failure_mapping: WriteFailureMapping::default(),
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(ConnectorError::config("tick_interval_ms must be > 0"));
        }
        if self.read_max_attempts == 0 {
            return Err(ConnectorError::config("read_max_attempts must be >= 1"));
        }
        if self.lost_delay_ms < 0 || self.write_debounce_ms < 0 {
            return Err(ConnectorError::config(
                "lost_delay_ms and write_debounce_ms must not be negative",
            ));
        }
        if self.max_read_bits == 0 || self.max_read_registers == 0 {
            return Err(ConnectorError::config("read limits must be >= 1"));
        }
        if self.command_queue_size == 0 {
            return Err(ConnectorError::config("command_queue_size must be >= 1"));
        }
        Ok(())
    }
}

/// Which connection state a failed write leaves the device in
///
/// `None` keeps the current state. The default suits Modbus, where a
/// refused write says nothing about the link; [`WriteFailureMapping::http`]
/// reproduces the status-code driven behaviour of HTTP gateways.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFailureMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ConnectionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<ConnectionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<ConnectionState>,
}

impl WriteFailureMapping {
    pub fn modbus() -> Self {
        Self::default()
    }

    pub fn http() -> Self {
        Self {
            validation: Some(ConnectionState::Alert),
            unavailable: Some(ConnectionState::Lost),
            other: Some(ConnectionState::Unknown),
        }
    }

    pub fn state_for(&self, class: FailureClass) -> Option<ConnectionState> {
        match class {
            FailureClass::Validation => self.validation,
            FailureClass::Unavailable => self.unavailable,
            FailureClass::Other => self.other,
        }
    }
}
