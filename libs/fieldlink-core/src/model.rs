//! Device / channel / property model and per-property runtime state

use serde::{Deserialize, Serialize};

use crate::types::{ByteOrder, DataType, PropertyValue, RegisterKind, ValueFormat};

pub type DeviceId = u32;
pub type ChannelId = u32;
pub type PropertyId = u32;

// ============================================================================
// Connection State
// ============================================================================

/// Externally visible connection state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Never polled
    #[default]
    Created,
    /// Polled in the current sweep
    Connected,
    /// Link dropped or connector stopped
    Disconnected,
    /// Read attempts exhausted, cooling down
    Lost,
    /// Device cannot be polled (no address) or was stopped by the user
    Stopped,
    /// Device rejected a write
    Alert,
    Unknown,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ConnectionState::Stopped)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Created => write!(f, "CREATED"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Lost => write!(f, "LOST"),
            ConnectionState::Stopped => write!(f, "STOPPED"),
            ConnectionState::Alert => write!(f, "ALERT"),
            ConnectionState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ============================================================================
// Device model
// ============================================================================

/// Where a device answers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceAddress {
    /// Serial line station
    Station { unit: u8 },
    /// TCP endpoint with unit identifier
    Ip {
        host: String,
        port: u16,
        #[serde(default = "default_unit")]
        unit: u8,
    },
}

fn default_unit() -> u8 {
    1
}

impl DeviceAddress {
    pub fn unit(&self) -> u8 {
        match self {
            DeviceAddress::Station { unit } | DeviceAddress::Ip { unit, .. } => *unit,
        }
    }

    /// `host:port` for network devices
    pub fn endpoint(&self) -> Option<String> {
        match self {
            DeviceAddress::Station { .. } => None,
            DeviceAddress::Ip { host, port, .. } => Some(format!("{}:{}", host, port)),
        }
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceAddress::Station { unit } => write!(f, "station {}", unit),
            DeviceAddress::Ip { host, port, unit } => write!(f, "{}:{}#{}", host, port, unit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<DeviceAddress>,
    #[serde(default)]
    pub byte_order: ByteOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub device: DeviceId,
    pub identifier: String,
    /// Start register; channels without one cannot be polled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u16>,
    /// Overrides the register space derived from the property type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_kind: Option<RegisterKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub channel: ChannelId,
    pub identifier: String,
    #[serde(default = "default_true")]
    pub queryable: bool,
    #[serde(default)]
    pub settable: bool,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ValueFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_decimals: Option<u8>,
    /// Minimum interval between successful reads of the owning channel
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reading_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

// ============================================================================
// Property state
// ============================================================================

/// Runtime state of one property
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyState {
    pub actual_value: Option<PropertyValue>,
    pub expected_value: Option<PropertyValue>,
    /// Timestamp of the write currently in flight
    pub pending: Option<i64>,
    pub valid: bool,
}

impl PropertyState {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Partial update of a [`PropertyState`]; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyStateUpdate {
    pub actual_value: Option<Option<PropertyValue>>,
    pub expected_value: Option<Option<PropertyValue>>,
    pub pending: Option<Option<i64>>,
    pub valid: Option<bool>,
}

impl PropertyStateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Property can no longer be trusted: drop expectations and in-flight writes
    pub fn disabled() -> Self {
        Self::new()
            .with_valid(false)
            .with_expected(None)
            .with_pending(None)
    }

    pub fn with_actual(mut self, value: Option<PropertyValue>) -> Self {
        self.actual_value = Some(value);
        self
    }

    pub fn with_expected(mut self, value: Option<PropertyValue>) -> Self {
        self.expected_value = Some(value);
        self
    }

    pub fn with_pending(mut self, pending: Option<i64>) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn with_valid(mut self, valid: bool) -> Self {
        self.valid = Some(valid);
        self
    }

    pub fn apply(&self, state: &mut PropertyState) {
        if let Some(actual) = &self.actual_value {
            state.actual_value = actual.clone();
        }
        if let Some(expected) = &self.expected_value {
            state.expected_value = expected.clone();
        }
        if let Some(pending) = self.pending {
            state.pending = pending;
        }
        if let Some(valid) = self.valid {
            state.valid = valid;
        }
    }

    /// Whether observers of values should hear about this update
    pub fn touches_value(&self) -> bool {
        self.actual_value.is_some() || self.valid.is_some()
    }
}
