//! Write command execution
//!
//! A write pushes the expected value of a property to the device. Writes
//! of the same property are debounced, and the in-flight marker (`pending`)
//! is always cleared once the command completes, whatever the outcome.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::codec;
use crate::config::{EngineConfig, WriteFailureMapping};
use crate::context::ConnectorContext;
use crate::error::{ConnectorError, Result};
use crate::model::{
    Channel, ChannelId, Device, DeviceId, Property, PropertyId, PropertyState,
    PropertyStateUpdate,
};
use crate::types::{PropertyValue, RegisterKind};

/// Result of a write command that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Value sent to the device
    Written,
    /// Another write of the property is in flight or happened recently
    Debounced,
}

/// Write request queued towards the scheduler task
#[derive(Debug)]
pub struct WriteCommand {
    pub device: DeviceId,
    pub channel: ChannelId,
    pub property: PropertyId,
    pub reply: Option<oneshot::Sender<Result<WriteOutcome>>>,
}

/// Register-level payload of one write
#[derive(Debug, Clone, PartialEq)]
enum DeviceWrite {
    Coil(bool),
    Register(u16),
    Registers(Vec<u16>),
}

#[derive(Debug)]
pub struct WriteCommandExecutor {
    debounce_ms: i64,
    mapping: WriteFailureMapping,
    /// Property -> timestamp of its last write attempt
    recent_writes: HashMap<PropertyId, i64>,
}

impl WriteCommandExecutor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            debounce_ms: config.write_debounce_ms,
            mapping: config.write_failure_mapping,
            recent_writes: HashMap::new(),
        }
    }

    /// Drop debounce entries older than the window; returns how many went
    pub fn purge_expired(&mut self, now: i64) -> usize {
        let before = self.recent_writes.len();
        let window = self.debounce_ms;
        self.recent_writes.retain(|_, ts| now - *ts <= window);
        before - self.recent_writes.len()
    }

    pub fn recent_writes(&self) -> usize {
        self.recent_writes.len()
    }

    /// Execute a queued command and answer its caller
    pub async fn handle(&mut self, ctx: &ConnectorContext, command: WriteCommand) {
        let result = self
            .execute(ctx, command.device, command.channel, command.property)
            .await;
        if let Some(reply) = command.reply {
            if reply.send(result).is_err() {
                debug!("Write caller for property {} went away", command.property);
            }
        }
    }

    /// Push the expected value of a property to its device
    pub async fn execute(
        &mut self,
        ctx: &ConnectorContext,
        device: DeviceId,
        channel: ChannelId,
        property: PropertyId,
    ) -> Result<WriteOutcome> {
        let (device, channel, property) = Self::resolve(ctx, device, channel, property)?;
        let (Some(station), Some(address)) = (device.address.clone(), channel.address) else {
            return Err(ConnectorError::config(format!(
                "property {} has no device or register address",
                property.identifier
            )));
        };
        if !property.settable {
            return Err(ConnectorError::not_supported(format!(
                "property {} is read-only",
                property.identifier
            )));
        }

        let now = ctx.now();
        let state = ctx.property_states.get(property.id).unwrap_or_default();
        let Some(expected) = state.expected_value.clone() else {
            self.clear_pending(ctx, property.id);
            return Err(ConnectorError::invalid_state(format!(
                "property {} has no expected value",
                property.identifier
            )));
        };

        if self.is_debounced(&state, property.id, now) {
            debug!("Write of property {} debounced", property.identifier);
            return Ok(WriteOutcome::Debounced);
        }

        ctx.property_states
            .set(property.id, PropertyStateUpdate::new().with_pending(Some(now)));
        self.recent_writes.insert(property.id, now);

        let request = match self.encode(ctx, &device, &channel, &property, &expected) {
            Ok(request) => request,
            Err(e) => {
                self.abort(ctx, property.id);
                return Err(e);
            },
        };

        let result = match &request {
            DeviceWrite::Coil(value) => {
                ctx.transport
                    .write_single_coil(&station, address, *value)
                    .await
            },
            DeviceWrite::Register(value) => {
                ctx.transport
                    .write_single_holding(&station, address, *value)
                    .await
            },
            DeviceWrite::Registers(values) => {
                ctx.transport
                    .write_multiple_holding(&station, address, values)
                    .await
            },
        };

        match result {
            Ok(()) => {
                self.clear_pending(ctx, property.id);
                info!(
                    "Device {} property {} <- {}",
                    device.identifier, property.identifier, expected
                );
                Ok(WriteOutcome::Written)
            },
            Err(e) => {
                self.abort(ctx, property.id);
                error!(
                    "Device {} property {} write failed: {}",
                    device.identifier, property.identifier, e
                );
                if let Some(state) = self.mapping.state_for(e.failure_class()) {
                    ctx.set_device_state(device.id, state);
                }
                Err(e.into())
            },
        }
    }

    fn resolve(
        ctx: &ConnectorContext,
        device: DeviceId,
        channel: ChannelId,
        property: PropertyId,
    ) -> Result<(Device, Channel, Property)> {
        let device = ctx
            .repository
            .device(device)
            .ok_or_else(|| ConnectorError::not_found(format!("device {}", device)))?;
        if ctx.device_state(device.id).is_stopped() {
            return Err(ConnectorError::invalid_state(format!(
                "device {} is stopped",
                device.identifier
            )));
        }
        let channel = ctx
            .repository
            .channel(channel)
            .filter(|c| c.device == device.id)
            .ok_or_else(|| {
                ConnectorError::not_found(format!("channel {} of device {}", channel, device.id))
            })?;
        let property = ctx
            .repository
            .property(property)
            .filter(|p| p.channel == channel.id)
            .ok_or_else(|| {
                ConnectorError::not_found(format!("property {} of channel {}", property, channel.id))
            })?;
        Ok((device, channel, property))
    }

    fn is_debounced(&self, state: &PropertyState, property: PropertyId, now: i64) -> bool {
        let within = |ts: i64| now - ts <= self.debounce_ms;
        state.pending.map_or(false, within)
            || self.recent_writes.get(&property).copied().map_or(false, within)
    }

    fn encode(
        &self,
        ctx: &ConnectorContext,
        device: &Device,
        channel: &Channel,
        property: &Property,
        expected: &PropertyValue,
    ) -> Result<DeviceWrite> {
        let data_type = ctx
            .transformer
            .determine_device_write_data_type(property.data_type, property.format.as_ref());
        let kind = channel
            .register_kind
            .or_else(|| RegisterKind::classify(data_type, true))
            .ok_or_else(|| {
                ConnectorError::not_supported(format!(
                    "{} values cannot be written to registers",
                    data_type
                ))
            })?;
        if !kind.is_writable() {
            return Err(ConnectorError::not_supported(format!(
                "{} is read-only",
                kind
            )));
        }

        let value = ctx
            .transformer
            .transform_value_to_device(property, expected)
            .ok_or_else(|| {
                ConnectorError::validation(format!(
                    "'{}' is not a valid value for {}",
                    expected, property.identifier
                ))
            })?;

        match kind {
            RegisterKind::Coil => value
                .as_strict_bool()
                .map(DeviceWrite::Coil)
                .ok_or_else(|| {
                    ConnectorError::validation(format!(
                        "'{}' is not a boolean (0, 1, true, false)",
                        value
                    ))
                }),
            _ => {
                let words = codec::encode(&value, data_type, device.byte_order)?;
                Ok(match words.as_slice() {
                    [word] => DeviceWrite::Register(*word),
                    _ => DeviceWrite::Registers(words),
                })
            },
        }
    }

    fn clear_pending(&self, ctx: &ConnectorContext, property: PropertyId) {
        ctx.property_states
            .set(property, PropertyStateUpdate::new().with_pending(None));
    }

    /// Failed attempts do not hold the debounce window
    fn abort(&mut self, ctx: &ConnectorContext, property: PropertyId) {
        self.clear_pending(ctx, property);
        self.recent_writes.remove(&property);
    }
}
