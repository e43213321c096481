//! Bundle of collaborators shared by the scheduler and its executors

use std::sync::Arc;

use tracing::info;

use crate::model::{ChannelId, ConnectionState, DeviceId, PropertyId, PropertyStateUpdate};
use crate::time::Clock;
use crate::traits::{
    ConnectionStateStore, ConnectorEvent, DeviceConfigRepository, MessageQueue, PropertyStateStore,
    Transport, ValueTransformer,
};

#[derive(Clone)]
pub struct ConnectorContext {
    pub repository: Arc<dyn DeviceConfigRepository>,
    pub transformer: Arc<dyn ValueTransformer>,
    pub connection_states: Arc<dyn ConnectionStateStore>,
    pub property_states: Arc<dyn PropertyStateStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
}

impl ConnectorContext {
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn device_state(&self, device: DeviceId) -> ConnectionState {
        self.connection_states.state(device)
    }

    /// Move a device to `state`; no-op (and no event) when already there
    pub fn set_device_state(&self, device: DeviceId, state: ConnectionState) {
        let previous = self.connection_states.state(device);
        if previous == state {
            return;
        }
        self.connection_states.set_state(device, state);
        info!("Device {} state: {} -> {}", device, previous, state);
        self.queue.append(ConnectorEvent::DeviceState {
            device,
            state,
            timestamp: self.now(),
        });
    }

    /// Apply a property update and publish the resulting value
    ///
    /// Every fresh reading is published. Updates that only touch validity
    /// are published when they change what observers see.
    pub fn update_property(
        &self,
        device: DeviceId,
        channel: ChannelId,
        property: PropertyId,
        update: PropertyStateUpdate,
    ) {
        if !update.touches_value() {
            self.property_states.set(property, update);
            return;
        }

        let previous = self.property_states.get(property);
        let fresh_reading = matches!(update.actual_value, Some(Some(_)));
        self.property_states.set(property, update);
        let Some(state) = self.property_states.get(property) else {
            return;
        };
        let unchanged = previous.map_or(false, |p| {
            p.valid == state.valid && p.actual_value == state.actual_value
        });
        if unchanged && !fresh_reading {
            return;
        }

        self.queue.append(ConnectorEvent::PropertyValue {
            device,
            channel,
            property,
            value: state.actual_value,
            valid: state.valid,
            timestamp: self.now(),
        });
    }
}

impl std::fmt::Debug for ConnectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorContext")
            .field("transport", &self.transport.name())
            .finish_non_exhaustive()
    }
}
