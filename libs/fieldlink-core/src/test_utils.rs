//! Test utilities for fieldlink-core
//!
//! Shared fixtures for unit tests, integration tests and downstream crates:
//! a scriptable in-memory transport, an event recorder and a harness that
//! wires them into a [`ConnectorContext`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context::ConnectorContext;
use crate::error::TransportError;
use crate::memory::{MemoryRepository, MemoryStateStore};
use crate::model::{
    Channel, ChannelId, ConnectionState, Device, DeviceAddress, DeviceId, Property, PropertyId,
    PropertyState,
};
use crate::time::ManualClock;
use crate::traits::{ConnectorEvent, MessageQueue, PropertyStateStore, Transport};
use crate::transform::DefaultValueTransformer;
use crate::types::{ByteOrder, DataType, RegisterKind};

/// Start time of every harness clock
pub const TEST_EPOCH_MS: i64 = 1_700_000_000_000;

// ==================== Scripted Transport ====================

/// One request observed by [`ScriptedTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Read {
        unit: u8,
        kind: RegisterKind,
        start: u16,
        quantity: u16,
    },
    WriteCoil {
        unit: u8,
        address: u16,
        value: bool,
    },
    WriteRegister {
        unit: u8,
        address: u16,
        value: u16,
    },
    WriteRegisters {
        unit: u8,
        address: u16,
        values: Vec<u16>,
    },
}

impl TransportCall {
    pub fn is_read(&self) -> bool {
        matches!(self, TransportCall::Read { .. })
    }

    pub fn unit(&self) -> u8 {
        match self {
            TransportCall::Read { unit, .. }
            | TransportCall::WriteCoil { unit, .. }
            | TransportCall::WriteRegister { unit, .. }
            | TransportCall::WriteRegisters { unit, .. } => *unit,
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<TransportCall>,
    bits: HashMap<(u8, RegisterKind, u16), bool>,
    words: HashMap<(u8, RegisterKind, u16), u16>,
    next_failures: VecDeque<TransportError>,
    read_failure: Option<TransportError>,
    write_failure: Option<TransportError>,
    unit_failures: HashMap<u8, TransportError>,
    kind_failures: HashMap<RegisterKind, TransportError>,
}

impl Script {
    fn failure(&mut self, unit: u8, kind: Option<RegisterKind>) -> Option<TransportError> {
        if let Some(err) = self.next_failures.pop_front() {
            return Some(err);
        }
        if let Some(err) = self.unit_failures.get(&unit) {
            return Some(err.clone());
        }
        let is_read = kind.is_some();
        if let Some(err) = kind.and_then(|k| self.kind_failures.get(&k)) {
            return Some(err.clone());
        }
        if is_read {
            self.read_failure.clone()
        } else {
            self.write_failure.clone()
        }
    }
}

/// In-memory register image answering requests, with scriptable failures
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bit(&self, unit: u8, kind: RegisterKind, address: u16, value: bool) {
        self.script.lock().bits.insert((unit, kind, address), value);
    }

    pub fn set_words(&self, unit: u8, kind: RegisterKind, start: u16, values: &[u16]) {
        let mut script = self.script.lock();
        for (i, value) in values.iter().enumerate() {
            script
                .words
                .insert((unit, kind, start.wrapping_add(i as u16)), *value);
        }
    }

    pub fn word(&self, unit: u8, kind: RegisterKind, address: u16) -> u16 {
        self.script
            .lock()
            .words
            .get(&(unit, kind, address))
            .copied()
            .unwrap_or(0)
    }

    pub fn bit(&self, unit: u8, kind: RegisterKind, address: u16) -> bool {
        self.script
            .lock()
            .bits
            .get(&(unit, kind, address))
            .copied()
            .unwrap_or(false)
    }

    /// Fail the next request, whatever it is
    pub fn fail_next(&self, error: TransportError) {
        self.script.lock().next_failures.push_back(error);
    }

    /// Fail every read until [`recover`](Self::recover)
    pub fn fail_reads(&self, error: TransportError) {
        self.script.lock().read_failure = Some(error);
    }

    /// Fail every write until [`recover`](Self::recover)
    pub fn fail_writes(&self, error: TransportError) {
        self.script.lock().write_failure = Some(error);
    }

    /// Fail every request to one unit until [`recover`](Self::recover)
    pub fn fail_unit(&self, unit: u8, error: TransportError) {
        self.script.lock().unit_failures.insert(unit, error);
    }

    /// Fail every read of one register space until [`recover`](Self::recover)
    pub fn fail_reads_of(&self, kind: RegisterKind, error: TransportError) {
        self.script.lock().kind_failures.insert(kind, error);
    }

    pub fn recover(&self) {
        let mut script = self.script.lock();
        script.next_failures.clear();
        script.read_failure = None;
        script.write_failure = None;
        script.unit_failures.clear();
        script.kind_failures.clear();
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.script.lock().calls.clone()
    }

    pub fn reads(&self) -> Vec<TransportCall> {
        self.calls().into_iter().filter(|c| c.is_read()).collect()
    }

    pub fn writes(&self) -> Vec<TransportCall> {
        self.calls().into_iter().filter(|c| !c.is_read()).collect()
    }

    pub fn clear_calls(&self) {
        self.script.lock().calls.clear();
    }

    fn read_bits(
        &self,
        station: &DeviceAddress,
        kind: RegisterKind,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, TransportError> {
        let unit = station.unit();
        let mut script = self.script.lock();
        script.calls.push(TransportCall::Read {
            unit,
            kind,
            start,
            quantity,
        });
        if let Some(err) = script.failure(unit, Some(kind)) {
            return Err(err);
        }
        Ok((0..quantity)
            .map(|i| {
                script
                    .bits
                    .get(&(unit, kind, start.wrapping_add(i)))
                    .copied()
                    .unwrap_or(false)
            })
            .collect())
    }

    fn read_words(
        &self,
        station: &DeviceAddress,
        kind: RegisterKind,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let unit = station.unit();
        let mut script = self.script.lock();
        script.calls.push(TransportCall::Read {
            unit,
            kind,
            start,
            quantity,
        });
        if let Some(err) = script.failure(unit, Some(kind)) {
            return Err(err);
        }
        Ok((0..quantity)
            .map(|i| {
                script
                    .words
                    .get(&(unit, kind, start.wrapping_add(i)))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    fn write(&self, call: TransportCall) -> Result<(), TransportError> {
        let unit = call.unit();
        let mut script = self.script.lock();
        script.calls.push(call.clone());
        if let Some(err) = script.failure(unit, None) {
            return Err(err);
        }
        match call {
            TransportCall::WriteCoil { address, value, .. } => {
                script.bits.insert((unit, RegisterKind::Coil, address), value);
            },
            TransportCall::WriteRegister { address, value, .. } => {
                script
                    .words
                    .insert((unit, RegisterKind::Holding, address), value);
            },
            TransportCall::WriteRegisters {
                address, values, ..
            } => {
                for (i, value) in values.into_iter().enumerate() {
                    script.words.insert(
                        (unit, RegisterKind::Holding, address.wrapping_add(i as u16)),
                        value,
                    );
                }
            },
            TransportCall::Read { .. } => {},
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn read_coils(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, TransportError> {
        self.read_bits(station, RegisterKind::Coil, start, quantity)
    }

    async fn read_discrete_inputs(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, TransportError> {
        self.read_bits(station, RegisterKind::DiscreteInput, start, quantity)
    }

    async fn read_holding_registers(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.read_words(station, RegisterKind::Holding, start, quantity)
    }

    async fn read_input_registers(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.read_words(station, RegisterKind::Input, start, quantity)
    }

    async fn write_single_coil(
        &self,
        station: &DeviceAddress,
        address: u16,
        value: bool,
    ) -> Result<(), TransportError> {
        self.write(TransportCall::WriteCoil {
            unit: station.unit(),
            address,
            value,
        })
    }

    async fn write_single_holding(
        &self,
        station: &DeviceAddress,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        self.write(TransportCall::WriteRegister {
            unit: station.unit(),
            address,
            value,
        })
    }

    async fn write_multiple_holding(
        &self,
        station: &DeviceAddress,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        self.write(TransportCall::WriteRegisters {
            unit: station.unit(),
            address,
            values: values.to_vec(),
        })
    }
}

// ==================== Event Recorder ====================

/// [`MessageQueue`] keeping every event in memory
#[derive(Debug, Default)]
pub struct RecordingQueue {
    events: Mutex<Vec<ConnectorEvent>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConnectorEvent> {
        self.events.lock().clone()
    }

    /// Connection states published for one device, in order
    pub fn device_states(&self, device: DeviceId) -> Vec<ConnectionState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ConnectorEvent::DeviceState {
                    device: d, state, ..
                } if *d == device => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl MessageQueue for RecordingQueue {
    fn append(&self, event: ConnectorEvent) {
        self.events.lock().push(event);
    }
}

// ==================== Fixtures ====================

pub fn tcp_device(id: DeviceId, unit: u8) -> Device {
    Device {
        id,
        identifier: format!("device-{}", id),
        address: Some(DeviceAddress::Ip {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit,
        }),
        byte_order: ByteOrder::Abcd,
    }
}

pub fn unaddressed_device(id: DeviceId) -> Device {
    Device {
        id,
        identifier: format!("device-{}", id),
        address: None,
        byte_order: ByteOrder::Abcd,
    }
}

pub fn channel(id: ChannelId, device: DeviceId, address: Option<u16>) -> Channel {
    Channel {
        id,
        device,
        identifier: format!("channel-{}", id),
        address,
        register_kind: None,
    }
}

pub fn property(id: PropertyId, channel: ChannelId, data_type: DataType, settable: bool) -> Property {
    Property {
        id,
        channel,
        identifier: format!("property-{}", id),
        queryable: true,
        settable,
        data_type,
        format: None,
        number_of_decimals: None,
        reading_delay_ms: 0,
    }
}

/// Everything needed to drive the engine without I/O
pub struct TestHarness {
    pub ctx: ConnectorContext,
    pub repository: Arc<MemoryRepository>,
    pub states: Arc<MemoryStateStore>,
    pub queue: Arc<RecordingQueue>,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    pub fn new(repository: MemoryRepository) -> Self {
        let repository = Arc::new(repository);
        let states = Arc::new(MemoryStateStore::new());
        let queue = Arc::new(RecordingQueue::new());
        let transport = Arc::new(ScriptedTransport::new());
        let clock = Arc::new(ManualClock::new(TEST_EPOCH_MS));
        let ctx = ConnectorContext {
            repository: repository.clone(),
            transformer: Arc::new(DefaultValueTransformer),
            connection_states: states.clone(),
            property_states: states.clone(),
            queue: queue.clone(),
            transport: transport.clone(),
            clock: clock.clone(),
        };
        Self {
            ctx,
            repository,
            states,
            queue,
            transport,
            clock,
        }
    }

    pub fn property_state(&self, property: PropertyId) -> PropertyState {
        PropertyStateStore::get(self.states.as_ref(), property).unwrap_or_default()
    }

    pub fn device_state(&self, device: DeviceId) -> ConnectionState {
        self.ctx.device_state(device)
    }
}
