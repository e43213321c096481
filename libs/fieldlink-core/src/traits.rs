//! Collaborator traits
//!
//! The engine owns no storage and no wire protocol. Device configuration,
//! connection states, property states, value events and the register
//! transport are all reached through the traits below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::codec::RegisterValues;
use crate::error::TransportError;
use crate::model::{
    Channel, ChannelId, ConnectionState, Device, DeviceAddress, DeviceId, Property, PropertyId,
    PropertyState, PropertyStateUpdate,
};
use crate::types::{DataType, PropertyValue, RegisterKind, ValueFormat};

// ============================================================================
// Configuration and state stores
// ============================================================================

/// Read access to the configured devices
pub trait DeviceConfigRepository: Send + Sync {
    fn devices(&self) -> Vec<Device>;

    fn device(&self, id: DeviceId) -> Option<Device> {
        self.devices().into_iter().find(|d| d.id == id)
    }

    /// Channels of a device, in configuration order
    fn channels(&self, device: DeviceId) -> Vec<Channel>;

    fn channel(&self, id: ChannelId) -> Option<Channel>;

    /// Properties of a channel, in configuration order
    fn properties(&self, channel: ChannelId) -> Vec<Property>;

    fn property(&self, id: PropertyId) -> Option<Property>;

    /// First channel of a device bound to `address` in the given register space.
    /// Channels without an explicit register kind match any space.
    fn find_channel_by_address(
        &self,
        device: DeviceId,
        address: u16,
        kind: RegisterKind,
    ) -> Option<Channel> {
        self.channels(device).into_iter().find(|c| {
            c.address == Some(address) && c.register_kind.map_or(true, |k| k == kind)
        })
    }
}

/// Converts between user-facing and device-level values
pub trait ValueTransformer: Send + Sync {
    /// Data type the device reports for a property
    fn determine_device_read_data_type(
        &self,
        data_type: DataType,
        format: Option<&ValueFormat>,
    ) -> DataType;

    /// Data type the device expects when a property is written
    fn determine_device_write_data_type(
        &self,
        data_type: DataType,
        format: Option<&ValueFormat>,
    ) -> DataType;

    /// `None` when the raw value cannot be represented (e.g. out of range)
    fn transform_value_from_device(
        &self,
        property: &Property,
        raw: &PropertyValue,
    ) -> Option<PropertyValue>;

    /// `None` when the user value has no device representation
    fn transform_value_to_device(
        &self,
        property: &Property,
        value: &PropertyValue,
    ) -> Option<PropertyValue>;
}

/// Externally visible connection states
pub trait ConnectionStateStore: Send + Sync {
    /// Unknown devices report [`ConnectionState::Created`]
    fn state(&self, device: DeviceId) -> ConnectionState;

    fn set_state(&self, device: DeviceId, state: ConnectionState);
}

/// Per-property runtime state
pub trait PropertyStateStore: Send + Sync {
    fn get(&self, property: PropertyId) -> Option<PropertyState>;

    /// Apply a partial update, creating the state if needed
    fn set(&self, property: PropertyId, update: PropertyStateUpdate);
}

// ============================================================================
// Events
// ============================================================================

/// Notification emitted towards observers of the connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorEvent {
    DeviceState {
        device: DeviceId,
        state: ConnectionState,
        timestamp: i64,
    },
    PropertyValue {
        device: DeviceId,
        channel: ChannelId,
        property: PropertyId,
        value: Option<PropertyValue>,
        valid: bool,
        timestamp: i64,
    },
}

impl ConnectorEvent {
    pub fn device(&self) -> DeviceId {
        match self {
            ConnectorEvent::DeviceState { device, .. }
            | ConnectorEvent::PropertyValue { device, .. } => *device,
        }
    }
}

/// Sink for [`ConnectorEvent`]s; must not block the scheduler
pub trait MessageQueue: Send + Sync {
    fn append(&self, event: ConnectorEvent);
}

// ============================================================================
// Transport
// ============================================================================

/// Register-level request protocol
///
/// Calls are issued one at a time by the scheduler task. Implementations
/// own connection management and timeouts.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn read_coils(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, TransportError>;

    async fn read_discrete_inputs(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, TransportError>;

    async fn read_holding_registers(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, TransportError>;

    async fn read_input_registers(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, TransportError>;

    async fn write_single_coil(
        &self,
        station: &DeviceAddress,
        address: u16,
        value: bool,
    ) -> Result<(), TransportError>;

    async fn write_single_holding(
        &self,
        station: &DeviceAddress,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError>;

    async fn write_multiple_holding(
        &self,
        station: &DeviceAddress,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError>;

    /// Dispatch a read on the register space
    async fn read(
        &self,
        station: &DeviceAddress,
        kind: RegisterKind,
        start: u16,
        quantity: u16,
    ) -> Result<RegisterValues, TransportError> {
        let values = match kind {
            RegisterKind::Coil => {
                RegisterValues::Bits(self.read_coils(station, start, quantity).await?)
            },
            RegisterKind::DiscreteInput => {
                RegisterValues::Bits(self.read_discrete_inputs(station, start, quantity).await?)
            },
            RegisterKind::Holding => {
                RegisterValues::Words(self.read_holding_registers(station, start, quantity).await?)
            },
            RegisterKind::Input => {
                RegisterValues::Words(self.read_input_registers(station, start, quantity).await?)
            },
        };
        Ok(values)
    }

    /// Release connections; called once when the connector stops
    async fn close(&self) {}
}
