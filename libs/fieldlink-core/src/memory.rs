//! In-memory collaborator implementations
//!
//! Suitable for embedded deployments and tests. Configuration lives in
//! ordered maps behind a `RwLock`; runtime state lives in DashMaps.

use std::collections::BTreeMap;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::{
    Channel, ChannelId, ConnectionState, Device, DeviceId, Property, PropertyId, PropertyState,
    PropertyStateUpdate,
};
use crate::traits::{
    ConnectionStateStore, ConnectorEvent, DeviceConfigRepository, MessageQueue, PropertyStateStore,
};

// ============================================================================
// Repository
// ============================================================================

#[derive(Debug, Default)]
struct Tables {
    devices: BTreeMap<DeviceId, Device>,
    channels: BTreeMap<ChannelId, Channel>,
    properties: BTreeMap<PropertyId, Property>,
}

/// Device configuration held in memory, mutable at runtime
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: Device) -> Self {
        self.upsert_device(device);
        self
    }

    pub fn with_channel(self, channel: Channel) -> Self {
        self.upsert_channel(channel);
        self
    }

    pub fn with_property(self, property: Property) -> Self {
        self.upsert_property(property);
        self
    }

    pub fn upsert_device(&self, device: Device) {
        self.tables.write().devices.insert(device.id, device);
    }

    pub fn upsert_channel(&self, channel: Channel) {
        self.tables.write().channels.insert(channel.id, channel);
    }

    pub fn upsert_property(&self, property: Property) {
        self.tables.write().properties.insert(property.id, property);
    }

    /// Remove a device together with its channels and properties
    pub fn remove_device(&self, id: DeviceId) -> Option<Device> {
        let mut tables = self.tables.write();
        let removed = tables.devices.remove(&id)?;
        let channels: Vec<ChannelId> = tables
            .channels
            .values()
            .filter(|c| c.device == id)
            .map(|c| c.id)
            .collect();
        tables.channels.retain(|_, c| c.device != id);
        tables.properties.retain(|_, p| !channels.contains(&p.channel));
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.tables.read().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeviceConfigRepository for MemoryRepository {
    fn devices(&self) -> Vec<Device> {
        self.tables.read().devices.values().cloned().collect()
    }

    fn device(&self, id: DeviceId) -> Option<Device> {
        self.tables.read().devices.get(&id).cloned()
    }

    fn channels(&self, device: DeviceId) -> Vec<Channel> {
        self.tables
            .read()
            .channels
            .values()
            .filter(|c| c.device == device)
            .cloned()
            .collect()
    }

    fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.tables.read().channels.get(&id).cloned()
    }

    fn properties(&self, channel: ChannelId) -> Vec<Property> {
        self.tables
            .read()
            .properties
            .values()
            .filter(|p| p.channel == channel)
            .cloned()
            .collect()
    }

    fn property(&self, id: PropertyId) -> Option<Property> {
        self.tables.read().properties.get(&id).cloned()
    }
}

// ============================================================================
// State stores
// ============================================================================

/// Connection and property states held in memory
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    connection: DashMap<DeviceId, ConnectionState>,
    properties: DashMap<PropertyId, PropertyState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every known connection state
    pub fn connection_states(&self) -> Vec<(DeviceId, ConnectionState)> {
        let mut states: Vec<_> = self
            .connection
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        states.sort_by_key(|(id, _)| *id);
        states
    }

    pub fn clear(&self) {
        self.connection.clear();
        self.properties.clear();
    }
}

impl ConnectionStateStore for MemoryStateStore {
    fn state(&self, device: DeviceId) -> ConnectionState {
        self.connection
            .get(&device)
            .map(|s| *s)
            .unwrap_or_default()
    }

    fn set_state(&self, device: DeviceId, state: ConnectionState) {
        self.connection.insert(device, state);
    }
}

impl PropertyStateStore for MemoryStateStore {
    fn get(&self, property: PropertyId) -> Option<PropertyState> {
        self.properties.get(&property).map(|s| s.clone())
    }

    fn set(&self, property: PropertyId, update: PropertyStateUpdate) {
        let mut entry = self.properties.entry(property).or_default();
        update.apply(entry.value_mut());
    }
}

// ============================================================================
// Event queue
// ============================================================================

/// [`MessageQueue`] feeding a bounded tokio channel
///
/// Events are dropped with a warning when the consumer falls behind.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<ConnectorEvent>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ConnectorEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl MessageQueue for ChannelQueue {
    fn append(&self, event: ConnectorEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event queue full, dropping event for device {}", event.device());
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event queue closed");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, PropertyValue};

    fn property(id: PropertyId, channel: ChannelId) -> Property {
        Property {
            id,
            channel,
            identifier: format!("p{}", id),
            queryable: true,
            settable: false,
            data_type: DataType::UShort,
            format: None,
            number_of_decimals: None,
            reading_delay_ms: 0,
        }
    }

    fn channel(id: ChannelId, device: DeviceId, address: u16) -> Channel {
        Channel {
            id,
            device,
            identifier: format!("c{}", id),
            address: Some(address),
            register_kind: None,
        }
    }

    fn device(id: DeviceId) -> Device {
        Device {
            id,
            identifier: format!("d{}", id),
            address: None,
            byte_order: Default::default(),
        }
    }

    #[test]
    fn test_repository_lookups() {
        let repo = MemoryRepository::new()
            .with_device(device(2))
            .with_device(device(1))
            .with_channel(channel(10, 1, 100))
            .with_channel(channel(11, 2, 100))
            .with_property(property(100, 10))
            .with_property(property(101, 10));

        let ids: Vec<_> = repo.devices().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(repo.channels(1).len(), 1);
        assert_eq!(repo.properties(10).len(), 2);
        assert_eq!(
            repo.find_channel_by_address(2, 100, crate::types::RegisterKind::Input)
                .map(|c| c.id),
            Some(11)
        );
        assert!(repo
            .find_channel_by_address(2, 101, crate::types::RegisterKind::Input)
            .is_none());
    }

    #[test]
    fn test_remove_device_cascades() {
        let repo = MemoryRepository::new()
            .with_device(device(1))
            .with_channel(channel(10, 1, 0))
            .with_property(property(100, 10));

        assert!(repo.remove_device(1).is_some());
        assert!(repo.is_empty());
        assert!(repo.channel(10).is_none());
        assert!(repo.property(100).is_none());
    }

    #[test]
    fn test_state_store_defaults_and_updates() {
        let store = MemoryStateStore::new();
        assert_eq!(store.state(1), ConnectionState::Created);
        assert!(PropertyStateStore::get(&store, 5).is_none());

        store.set_state(1, ConnectionState::Connected);
        assert_eq!(store.state(1), ConnectionState::Connected);

        store.set(
            5,
            PropertyStateUpdate::new()
                .with_actual(Some(PropertyValue::Integer(3)))
                .with_valid(true),
        );
        let state = PropertyStateStore::get(&store, 5).unwrap_or_default();
        assert!(state.valid);
        assert_eq!(state.actual_value, Some(PropertyValue::Integer(3)));
    }

    #[tokio::test]
    async fn test_channel_queue_drops_when_full() {
        let (queue, mut rx) = ChannelQueue::new(1);
        let event = |device| ConnectorEvent::DeviceState {
            device,
            state: ConnectionState::Connected,
            timestamp: 0,
        };

        queue.append(event(1));
        queue.append(event(2));

        assert_eq!(rx.recv().await.map(|e| e.device()), Some(1));
        assert!(rx.try_recv().is_err());
    }
}
