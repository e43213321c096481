//! Event consumer
//!
//! Drains the engine's event channel and logs what it sees. Runs until the
//! last sender is dropped.

use std::collections::HashMap;

use fieldlink_core::{ConnectionState, ConnectorEvent, DeviceId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Counters collected while consuming
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStats {
    pub device_states: usize,
    pub property_values: usize,
    pub invalid_values: usize,
    /// Last reported state per device
    pub last_states: HashMap<DeviceId, ConnectionState>,
}

impl EventStats {
    pub fn total(&self) -> usize {
        self.device_states + self.property_values
    }

    fn record(&mut self, event: &ConnectorEvent) {
        match event {
            ConnectorEvent::DeviceState { device, state, .. } => {
                self.device_states += 1;
                self.last_states.insert(*device, *state);
            },
            ConnectorEvent::PropertyValue { valid, .. } => {
                self.property_values += 1;
                if !valid {
                    self.invalid_values += 1;
                }
            },
        }
    }
}

pub async fn consume(mut events: mpsc::Receiver<ConnectorEvent>) -> EventStats {
    let mut stats = EventStats::default();

    while let Some(event) = events.recv().await {
        stats.record(&event);
        match &event {
            ConnectorEvent::DeviceState { device, state, .. } => match state {
                ConnectionState::Lost | ConnectionState::Alert => {
                    warn!("Device {} is {:?}", device, state)
                },
                _ => info!("Device {} is {:?}", device, state),
            },
            ConnectorEvent::PropertyValue {
                device,
                property,
                value: Some(value),
                valid: true,
                ..
            } => debug!("Device {} property {} = {}", device, property, value.as_string()),
            ConnectorEvent::PropertyValue {
                device, property, ..
            } => debug!("Device {} property {} invalid", device, property),
        }
    }

    debug!("Event channel closed after {} events", stats.total());
    stats
}
