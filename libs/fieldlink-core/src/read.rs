//! Read cycle of one device
//!
//! Builds the read addresses of a device, batches them into range reads
//! and applies the responses to property states and liveness slots.

use tracing::{debug, error, warn};

use crate::batcher::{AddressBatcher, ReadAddress, ReadRequest};
use crate::codec::{self, RegisterValues};
use crate::config::EngineConfig;
use crate::context::ConnectorContext;
use crate::error::{ConnectorError, TransportError};
use crate::liveness::LivenessTracker;
use crate::model::{Channel, ChannelId, ConnectionState, Device, PropertyId, PropertyStateUpdate};
use crate::types::{DataType, PropertyValue, RegisterKind};

#[derive(Debug, Clone)]
pub struct ReadCycleExecutor {
    config: EngineConfig,
}

impl ReadCycleExecutor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Read address of a channel, or `None` when the channel should not be
    /// read this cycle.
    ///
    /// A channel without a register address disables all of its properties.
    /// A channel that exhausted its attempts marks the device lost here.
    pub fn create_read_address(
        &self,
        ctx: &ConnectorContext,
        tracker: &mut LivenessTracker,
        device: &Device,
        channel: &Channel,
        now: i64,
    ) -> Option<ReadAddress> {
        let Some(address) = channel.address else {
            self.disable_channel(ctx, device, channel);
            return None;
        };

        let properties = ctx.repository.properties(channel.id);
        if properties.is_empty() {
            debug!("Channel {} has no property", channel.identifier);
            return None;
        }
        let property = properties.into_iter().find(|p| p.queryable)?;

        if tracker.is_exhausted(channel.id) {
            self.mark_exhausted(ctx, tracker, device, channel.id, property.id, now);
            return None;
        }

        if tracker.is_reading_delayed(channel.id, property.reading_delay_ms, now) {
            return None;
        }

        let data_type = ctx
            .transformer
            .determine_device_read_data_type(property.data_type, property.format.as_ref());
        let kind = match channel.register_kind {
            Some(kind) if kind.supports(data_type) => kind,
            Some(kind) => {
                warn!(
                    "Channel {}: {} cannot hold {} data",
                    channel.identifier, kind, data_type
                );
                return None;
            },
            None => match RegisterKind::classify(data_type, property.settable) {
                Some(kind) => kind,
                None => {
                    warn!(
                        "Channel {}: data type {} cannot be read from registers",
                        channel.identifier, data_type
                    );
                    return None;
                },
            },
        };
        let size = if kind.is_bit() {
            1
        } else {
            data_type.register_count()
        };

        Some(ReadAddress {
            channel: channel.id,
            property: property.id,
            kind,
            address,
            size,
            data_type,
        })
    }

    /// Batched requests for every readable channel of a device
    pub fn build_requests(
        &self,
        ctx: &ConnectorContext,
        tracker: &mut LivenessTracker,
        device: &Device,
        now: i64,
    ) -> Vec<ReadRequest> {
        let addresses: Vec<ReadAddress> = ctx
            .repository
            .channels(device.id)
            .iter()
            .filter_map(|channel| self.create_read_address(ctx, tracker, device, channel, now))
            .collect();
        AddressBatcher::plan(addresses, &self.config)
    }

    /// Run one read cycle. Returns `true` when at least one request was sent.
    ///
    /// The first failed request aborts the cycle; the rest of the device
    /// waits for its next turn.
    pub async fn execute(
        &self,
        ctx: &ConnectorContext,
        tracker: &mut LivenessTracker,
        device: &Device,
    ) -> bool {
        let Some(station) = device.address.as_ref() else {
            return false;
        };
        let requests = self.build_requests(ctx, tracker, device, ctx.now());
        if requests.is_empty() {
            return false;
        }

        for request in &requests {
            let now = ctx.now();
            for address in &request.addresses {
                tracker.record_attempt(address.channel, now);
            }
            debug!(
                "Device {} read {} start={} quantity={}",
                device.identifier, request.kind, request.start, request.quantity
            );

            match ctx
                .transport
                .read(station, request.kind, request.start, request.quantity)
                .await
            {
                Ok(values) => self.handle_success(ctx, tracker, device, request, &values),
                Err(e) => {
                    self.handle_failure(ctx, tracker, device, request, &e);
                    return true;
                },
            }
        }
        true
    }

    fn handle_success(
        &self,
        ctx: &ConnectorContext,
        tracker: &mut LivenessTracker,
        device: &Device,
        request: &ReadRequest,
        values: &RegisterValues,
    ) {
        let now = ctx.now();
        for address in &request.addresses {
            let Some(property) = ctx.repository.property(address.property) else {
                debug!("Property {} vanished during read", address.property);
                continue;
            };

            let raw = match codec::decode(
                values,
                request.offset_of(address),
                address.data_type,
                device.byte_order,
            ) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Device {} property {}: {}", device.identifier, property.identifier, e);
                    self.invalidate(ctx, device, address);
                    continue;
                },
            };
            tracker.record_success(address.channel, now);

            let Some(value) = ctx.transformer.transform_value_from_device(&property, &raw) else {
                warn!(
                    "Device {} property {}: value {} rejected",
                    device.identifier, property.identifier, raw
                );
                self.invalidate(ctx, device, address);
                continue;
            };

            let mut update = PropertyStateUpdate::new()
                .with_actual(Some(value.clone()))
                .with_valid(true);
            let reached_expected = ctx
                .property_states
                .get(property.id)
                .and_then(|s| s.expected_value)
                .map_or(false, |expected| reached_expected(&expected, &value, address.data_type));
            if reached_expected {
                update = update.with_expected(None).with_pending(None);
            }
            ctx.update_property(device.id, address.channel, property.id, update);
        }
    }

    fn handle_failure(
        &self,
        ctx: &ConnectorContext,
        tracker: &mut LivenessTracker,
        device: &Device,
        request: &ReadRequest,
        error: &TransportError,
    ) {
        error!(
            "Device {} read {} start={} quantity={} failed: {}",
            device.identifier, request.kind, request.start, request.quantity, error
        );
        if error.is_connection_failure() {
            ctx.set_device_state(device.id, ConnectionState::Disconnected);
        }

        let now = ctx.now();
        for address in &request.addresses {
            self.invalidate(ctx, device, address);
            let failures = tracker.record_failure(address.channel);
            if failures >= tracker.max_attempts() {
                self.mark_exhausted(ctx, tracker, device, address.channel, address.property, now);
            }
        }
    }

    fn mark_exhausted(
        &self,
        ctx: &ConnectorContext,
        tracker: &mut LivenessTracker,
        device: &Device,
        channel: ChannelId,
        property: PropertyId,
        now: i64,
    ) {
        let err = ConnectorError::ExhaustedRetries {
            channel,
            attempts: tracker.failure_count(channel),
        };
        error!("Device {} lost: {}", device.identifier, err);

        tracker.clear_channel(channel);
        tracker.mark_lost(device.id, now);
        ctx.update_property(
            device.id,
            channel,
            property,
            PropertyStateUpdate::new().with_valid(false),
        );
        ctx.set_device_state(device.id, ConnectionState::Lost);
    }

    fn invalidate(&self, ctx: &ConnectorContext, device: &Device, address: &ReadAddress) {
        ctx.update_property(
            device.id,
            address.channel,
            address.property,
            PropertyStateUpdate::new().with_valid(false),
        );
    }

    fn disable_channel(&self, ctx: &ConnectorContext, device: &Device, channel: &Channel) {
        debug!(
            "Channel {} of device {} has no address, disabling properties",
            channel.identifier, device.identifier
        );
        for property in ctx.repository.properties(channel.id) {
            ctx.update_property(
                device.id,
                channel.id,
                property.id,
                PropertyStateUpdate::disabled(),
            );
        }
    }
}

/// Compare at the precision the device stores; floats travel as f32
fn reached_expected(expected: &PropertyValue, actual: &PropertyValue, device_type: DataType) -> bool {
    match (device_type, expected.as_f64(), actual.as_f64()) {
        (DataType::Float, Some(x), Some(y)) => (x as f32).to_bits() == (y as f32).to_bits(),
        _ => expected.loosely_equals(actual),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::memory::MemoryRepository;
    use crate::model::PropertyState;
    use crate::test_utils::{channel, property, tcp_device, TestHarness};
    use crate::traits::{ConnectorEvent, DeviceConfigRepository, PropertyStateStore};

    fn executor() -> ReadCycleExecutor {
        ReadCycleExecutor::new(&EngineConfig::default())
    }

    fn single_channel(data_type: DataType, settable: bool) -> TestHarness {
        TestHarness::new(
            MemoryRepository::new()
                .with_device(tcp_device(1, 1))
                .with_channel(channel(10, 1, Some(100)))
                .with_property(property(100, 10, data_type, settable)),
        )
    }

    // ========== create_read_address() tests ==========

    #[test]
    fn test_read_address_classification() {
        let h = single_channel(DataType::Float, true);
        let mut tracker = LivenessTracker::new(5, 5_000);
        let device = tcp_device(1, 1);

        let address = executor()
            .create_read_address(&h.ctx, &mut tracker, &device, &channel(10, 1, Some(100)), 0)
            .unwrap();

        assert_eq!(address.kind, RegisterKind::Holding);
        assert_eq!(address.size, 2);
        assert_eq!(address.address, 100);
        assert_eq!(address.property, 100);
    }

    #[test]
    fn test_switch_reads_from_coil() {
        let h = single_channel(DataType::Switch, true);
        let mut tracker = LivenessTracker::new(5, 5_000);

        let address = executor()
            .create_read_address(
                &h.ctx,
                &mut tracker,
                &tcp_device(1, 1),
                &channel(10, 1, Some(100)),
                0,
            )
            .unwrap();

        assert_eq!(address.kind, RegisterKind::Coil);
        assert_eq!(address.size, 1);
        assert_eq!(address.data_type, DataType::Boolean);
    }

    #[test]
    fn test_unaddressed_channel_disables_properties() {
        let h = TestHarness::new(
            MemoryRepository::new()
                .with_device(tcp_device(1, 1))
                .with_channel(channel(10, 1, None))
                .with_property(property(100, 10, DataType::UShort, true))
                .with_property(property(101, 10, DataType::UShort, true)),
        );
        for id in [100, 101] {
            h.states.set(
                id,
                PropertyStateUpdate::new()
                    .with_expected(Some(PropertyValue::Integer(1)))
                    .with_pending(Some(5))
                    .with_valid(true),
            );
        }
        let mut tracker = LivenessTracker::new(5, 5_000);

        let address = executor().create_read_address(
            &h.ctx,
            &mut tracker,
            &tcp_device(1, 1),
            &channel(10, 1, None),
            0,
        );

        assert!(address.is_none());
        for id in [100, 101] {
            let state = h.property_state(id);
            assert!(!state.valid);
            assert_eq!(state.expected_value, None);
            assert_eq!(state.pending, None);
        }
    }

    #[test]
    fn test_non_queryable_and_unreadable_properties() {
        let mut p = property(100, 10, DataType::UShort, false);
        p.queryable = false;
        let h = TestHarness::new(
            MemoryRepository::new()
                .with_device(tcp_device(1, 1))
                .with_channel(channel(10, 1, Some(0)))
                .with_property(p)
                .with_channel(channel(11, 1, Some(1)))
                .with_property(property(110, 11, DataType::String, false))
                .with_channel(channel(12, 1, Some(2))),
        );
        let mut tracker = LivenessTracker::new(5, 5_000);
        let device = tcp_device(1, 1);
        let exec = executor();

        for c in [10, 11, 12] {
            let ch = h.repository.channel(c).unwrap();
            assert!(exec
                .create_read_address(&h.ctx, &mut tracker, &device, &ch, 0)
                .is_none());
        }
    }

    #[test]
    fn test_reading_delay_defers_channel() {
        let mut p = property(100, 10, DataType::UShort, false);
        p.reading_delay_ms = 1_000;
        let h = TestHarness::new(
            MemoryRepository::new()
                .with_device(tcp_device(1, 1))
                .with_channel(channel(10, 1, Some(0)))
                .with_property(p),
        );
        let mut tracker = LivenessTracker::new(5, 5_000);
        tracker.record_success(10, 10_000);
        let device = tcp_device(1, 1);
        let ch = channel(10, 1, Some(0));

        assert!(executor()
            .create_read_address(&h.ctx, &mut tracker, &device, &ch, 10_500)
            .is_none());
        assert!(executor()
            .create_read_address(&h.ctx, &mut tracker, &device, &ch, 11_000)
            .is_some());
    }

    #[test]
    fn test_incompatible_register_kind_override() {
        let h = single_channel(DataType::Float, false);
        let mut ch = channel(10, 1, Some(100));
        ch.register_kind = Some(RegisterKind::Coil);
        let mut tracker = LivenessTracker::new(5, 5_000);

        assert!(executor()
            .create_read_address(&h.ctx, &mut tracker, &tcp_device(1, 1), &ch, 0)
            .is_none());

        ch.register_kind = Some(RegisterKind::Holding);
        let address = executor()
            .create_read_address(&h.ctx, &mut tracker, &tcp_device(1, 1), &ch, 0)
            .unwrap();
        assert_eq!(address.kind, RegisterKind::Holding);
    }

    // ========== execute() tests ==========

    #[tokio::test]
    async fn test_successful_read_updates_state_and_reconciles() {
        let h = single_channel(DataType::UShort, true);
        h.transport.set_words(1, RegisterKind::Holding, 100, &[42]);
        h.states.set(
            100,
            PropertyStateUpdate::new()
                .with_expected(Some(PropertyValue::Integer(42)))
                .with_pending(Some(1)),
        );
        let mut tracker = LivenessTracker::new(5, 5_000);

        assert!(executor().execute(&h.ctx, &mut tracker, &tcp_device(1, 1)).await);

        assert_eq!(
            h.property_state(100),
            PropertyState {
                actual_value: Some(PropertyValue::Integer(42)),
                expected_value: None,
                pending: None,
                valid: true,
            }
        );
        assert_eq!(tracker.last_success(10), Some(h.ctx.now()));
    }

    #[tokio::test]
    async fn test_float_expected_value_reconciles_at_device_precision() {
        let h = single_channel(DataType::Float, true);
        let bits = 21.3f32.to_bits();
        h.transport
            .set_words(1, RegisterKind::Holding, 100, &[(bits >> 16) as u16, bits as u16]);
        h.states.set(
            100,
            PropertyStateUpdate::new()
                .with_expected(Some(PropertyValue::Float(21.3)))
                .with_pending(Some(1)),
        );
        let mut tracker = LivenessTracker::new(5, 5_000);

        executor().execute(&h.ctx, &mut tracker, &tcp_device(1, 1)).await;

        let state = h.property_state(100);
        assert_eq!(state.actual_value, Some(PropertyValue::Float(f64::from(21.3f32))));
        assert_eq!(state.expected_value, None);
        assert_eq!(state.pending, None);
    }

    #[tokio::test]
    async fn test_repeated_invalidation_is_published_once() {
        let h = single_channel(DataType::UShort, false);
        h.transport.set_words(1, RegisterKind::Input, 100, &[9]);
        let mut tracker = LivenessTracker::new(5, 5_000);
        let device = tcp_device(1, 1);
        let property_events = || {
            h.queue
                .events()
                .into_iter()
                .filter_map(|e| match e {
                    ConnectorEvent::PropertyValue { value, valid, .. } => Some((value, valid)),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };

        // Every reading is published, even when the value repeats
        executor().execute(&h.ctx, &mut tracker, &device).await;
        executor().execute(&h.ctx, &mut tracker, &device).await;
        assert_eq!(property_events().len(), 2);

        h.transport.fail_reads(TransportError::timeout("no answer"));
        executor().execute(&h.ctx, &mut tracker, &device).await;
        executor().execute(&h.ctx, &mut tracker, &device).await;

        let events = property_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], (Some(PropertyValue::Integer(9)), false));
    }

    #[tokio::test]
    async fn test_mismatched_expected_value_is_kept() {
        let h = single_channel(DataType::UShort, true);
        h.transport.set_words(1, RegisterKind::Holding, 100, &[7]);
        h.states.set(
            100,
            PropertyStateUpdate::new().with_expected(Some(PropertyValue::Integer(8))),
        );
        let mut tracker = LivenessTracker::new(5, 5_000);

        executor().execute(&h.ctx, &mut tracker, &tcp_device(1, 1)).await;

        let state = h.property_state(100);
        assert_eq!(state.actual_value, Some(PropertyValue::Integer(7)));
        assert_eq!(state.expected_value, Some(PropertyValue::Integer(8)));
    }

    #[tokio::test]
    async fn test_nothing_to_read() {
        let h = TestHarness::new(
            MemoryRepository::new()
                .with_device(tcp_device(1, 1))
                .with_channel(channel(10, 1, None)),
        );
        let mut tracker = LivenessTracker::new(5, 5_000);

        assert!(!executor().execute(&h.ctx, &mut tracker, &tcp_device(1, 1)).await);
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_invalidates_and_counts() {
        let h = single_channel(DataType::UShort, false);
        h.states.set(100, PropertyStateUpdate::new().with_valid(true));
        h.transport.fail_next(TransportError::timeout("no answer"));
        let mut tracker = LivenessTracker::new(5, 5_000);

        assert!(executor().execute(&h.ctx, &mut tracker, &tcp_device(1, 1)).await);

        assert!(!h.property_state(100).valid);
        assert_eq!(tracker.failure_count(10), 1);
        // A timeout is not a link failure
        assert_eq!(h.device_state(1), ConnectionState::Created);
    }

    #[tokio::test]
    async fn test_connection_failure_disconnects_device() {
        let h = single_channel(DataType::UShort, false);
        h.transport.fail_next(TransportError::connection("reset by peer"));
        let mut tracker = LivenessTracker::new(5, 5_000);

        executor().execute(&h.ctx, &mut tracker, &tcp_device(1, 1)).await;

        assert_eq!(h.device_state(1), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_requests() {
        let h = TestHarness::new(
            MemoryRepository::new()
                .with_device(tcp_device(1, 1))
                .with_channel(channel(10, 1, Some(0)))
                .with_property(property(100, 10, DataType::UShort, false))
                .with_channel(channel(11, 1, Some(500)))
                .with_property(property(110, 11, DataType::UShort, false)),
        );
        h.transport.fail_next(TransportError::timeout("no answer"));
        let mut tracker = LivenessTracker::new(5, 5_000);

        executor().execute(&h.ctx, &mut tracker, &tcp_device(1, 1)).await;

        assert_eq!(h.transport.reads().len(), 1);
        assert_eq!(tracker.failure_count(10), 1);
        // The second request was never sent
        assert_eq!(tracker.failure_count(11), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_marks_device_lost() {
        let h = single_channel(DataType::UShort, false);
        h.transport
            .fail_reads(TransportError::exception(0x04, "server device failure"));
        let mut tracker = LivenessTracker::new(2, 5_000);
        let device = tcp_device(1, 1);

        executor().execute(&h.ctx, &mut tracker, &device).await;
        assert_eq!(tracker.failure_count(10), 1);
        assert!(!tracker.is_lost(1));

        executor().execute(&h.ctx, &mut tracker, &device).await;
        assert!(tracker.is_lost(1));
        assert_eq!(tracker.slot(10), None);
        assert_eq!(h.device_state(1), ConnectionState::Lost);
        assert_eq!(h.queue.device_states(1), vec![ConnectionState::Lost]);
    }

    #[tokio::test]
    async fn test_out_of_range_value_is_invalid() {
        let mut p = property(100, 10, DataType::UShort, false);
        p.format = Some(crate::types::ValueFormat::Range {
            min: None,
            max: Some(100.0),
        });
        let h = TestHarness::new(
            MemoryRepository::new()
                .with_device(tcp_device(1, 1))
                .with_channel(channel(10, 1, Some(3)))
                .with_property(p),
        );
        h.transport.set_words(1, RegisterKind::Input, 3, &[250]);
        let mut tracker = LivenessTracker::new(5, 5_000);

        executor().execute(&h.ctx, &mut tracker, &tcp_device(1, 1)).await;

        let state = h.property_state(100);
        assert!(!state.valid);
        assert_eq!(state.actual_value, None);
        // The read itself worked
        assert_eq!(tracker.failure_count(10), 0);
    }
}
