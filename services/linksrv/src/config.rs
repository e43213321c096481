//! linksrv configuration
//!
//! One file describes the engine tuning, the transport and the device
//! tree. Devices nest their channels, channels nest their properties; the
//! parent ids are filled in when the tree is flattened into a repository.

use std::collections::HashSet;
use std::path::Path;

use common::LogConfig;
use fieldlink_core::{
    ByteOrder, Channel, ChannelId, DataType, DefaultValueTransformer, Device, DeviceAddress,
    DeviceId, EngineConfig, MemoryRepository, Property, PropertyId, RegisterKind, ValueFormat,
    ValueTransformer,
};
use fieldlink_modbus::ModbusTransportConfig;
use serde::{Deserialize, Serialize};

use crate::error::{LinksrvError, Result};

/// Environment variable prefix, e.g. `LINKSRV_ENGINE__TICK_INTERVAL_MS=20`
pub const ENV_PREFIX: &str = "LINKSRV";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinksrvConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub transport: ModbusTransportConfig,
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Capacity of the event channel between the engine and the consumer
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            event_queue_size: default_event_queue_size(),
        }
    }
}

fn default_service_name() -> String {
    "linksrv".to_string()
}

fn default_event_queue_size() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    pub id: DeviceId,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<DeviceAddress>,
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Disabled devices start STOPPED and are never polled
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub channels: Vec<ChannelDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    pub id: ChannelId,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_kind: Option<RegisterKind>,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub id: PropertyId,
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
    #[serde(default)]
    pub reading_delay_ms: u64,
}

impl PropertyDefinition {
    fn to_property(&self, channel: ChannelId) -> Property {
        Property {
            id: self.id,
            channel,
            identifier: self.identifier.clone(),
            queryable: self.queryable,
            settable: self.settable,
            data_type: self.data_type,
            format: self.format.clone(),
            number_of_decimals: self.number_of_decimals,
            reading_delay_ms: self.reading_delay_ms,
        }
    }
}

impl ChannelDefinition {
    /// Register space and register count the engine reads for this channel
    fn read_span(&self) -> Option<(RegisterKind, u16)> {
        let property = self.properties.iter().find(|p| p.queryable)?;
        let read_type = DefaultValueTransformer
            .determine_device_read_data_type(property.data_type, property.format.as_ref());
        let kind = match self.register_kind {
            Some(kind) if kind.supports(read_type) => kind,
            Some(_) => return None,
            None => RegisterKind::classify(read_type, property.settable)?,
        };
        let size = if kind.is_bit() {
            1
        } else {
            read_type.register_count()
        };
        Some((kind, size))
    }
}

impl LinksrvConfig {
    /// Load from file, layered over defaults and `LINKSRV_*` variables
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(common::load_config(path, ENV_PREFIX)?)
    }

    pub fn disabled_devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.iter().filter(|d| !d.enabled).map(|d| d.id)
    }

    pub fn channel_count(&self) -> usize {
        self.devices.iter().map(|d| d.channels.len()).sum()
    }

    pub fn property_count(&self) -> usize {
        self.devices
            .iter()
            .flat_map(|d| &d.channels)
            .map(|c| c.properties.len())
            .sum()
    }

    /// Flatten the device tree into an in-memory repository
    pub fn to_repository(&self) -> MemoryRepository {
        let repository = MemoryRepository::new();
        for device in &self.devices {
            repository.upsert_device(Device {
                id: device.id,
                identifier: device.identifier.clone(),
                address: device.address.clone(),
                byte_order: device.byte_order,
            });
            for channel in &device.channels {
                repository.upsert_channel(Channel {
                    id: channel.id,
                    device: device.id,
                    identifier: channel.identifier.clone(),
                    address: channel.address,
                    register_kind: channel.register_kind,
                });
                for property in &channel.properties {
                    repository.upsert_property(property.to_property(channel.id));
                }
            }
        }
        repository
    }

    /// Check the configuration; returns non-fatal warnings
    ///
    /// Ids must be unique across the whole file.
    pub fn validate(&self) -> Result<Vec<String>> {
        self.engine.validate()?;
        self.transport.validate()?;

        let mut devices = HashSet::new();
        let mut channels = HashSet::new();
        let mut properties = HashSet::new();
        for device in &self.devices {
            if !devices.insert(device.id) {
                return Err(LinksrvError::DuplicateDevice(device.id));
            }
            for channel in &device.channels {
                if !channels.insert(channel.id) {
                    return Err(LinksrvError::DuplicateChannel(channel.id));
                }
                for property in &channel.properties {
                    if !properties.insert(property.id) {
                        return Err(LinksrvError::DuplicateProperty(property.id));
                    }
                }
            }
        }

        Ok(self.warnings())
    }

    fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for device in &self.devices {
            if device.address.is_none() && device.enabled {
                warnings.push(format!(
                    "Device {} has no address and will be stopped",
                    device.identifier
                ));
            }

            let mut spans: Vec<(RegisterKind, u16, u16, &str)> = Vec::new();
            for channel in &device.channels {
                let Some(address) = channel.address else {
                    warnings.push(format!(
                        "Channel {}/{} has no address and will never be read",
                        device.identifier, channel.identifier
                    ));
                    continue;
                };
                let Some((kind, size)) = channel.read_span() else {
                    warnings.push(format!(
                        "Channel {}/{} has no queryable property with a register type",
                        device.identifier, channel.identifier
                    ));
                    continue;
                };
                let end = address.saturating_add(size);
                if let Some((_, _, _, other)) = spans
                    .iter()
                    .find(|(k, start, stop, _)| *k == kind && address < *stop && *start < end)
                {
                    warnings.push(format!(
                        "Channel {}/{} overlaps {} registers of channel {}",
                        device.identifier,
                        channel.identifier,
                        kind.as_str(),
                        other
                    ));
                }
                spans.push((kind, address, end, channel.identifier.as_str()));
            }
        }
        warnings
    }
}
