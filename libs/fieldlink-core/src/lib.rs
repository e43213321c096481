//! fieldlink-core - polling engine for register-based field devices
//!
//! A single scheduler task walks the configured devices round-robin, one
//! device per tick. For each device it turns channels into read addresses,
//! batches them into range reads, and tracks per-channel liveness so that
//! unresponsive devices are declared LOST and cooled down. Writes are queued
//! to the same task and debounced per property.
//!
//! Storage, events and the wire protocol are injected through the traits
//! in [`traits`]; [`memory`] provides in-process implementations.

pub mod batcher;
pub mod codec;
pub mod config;
pub mod connector;
pub mod context;
pub mod error;
pub mod liveness;
pub mod memory;
pub mod model;
pub mod read;
pub mod scheduler;
pub mod test_utils;
pub mod time;
pub mod traits;
pub mod transform;
pub mod types;
pub mod write;

pub use batcher::{AddressBatcher, ReadAddress, ReadRequest};
pub use codec::RegisterValues;
pub use config::{EngineConfig, WriteFailureMapping};
pub use connector::{Connector, ConnectorHandle};
pub use context::ConnectorContext;
pub use error::{ConnectorError, FailureClass, Result, TransportError};
pub use liveness::{LivenessTracker, TrackerSlot};
pub use memory::{ChannelQueue, MemoryRepository, MemoryStateStore};
pub use model::{
    Channel, ChannelId, ConnectionState, Device, DeviceAddress, DeviceId, Property, PropertyId,
    PropertyState, PropertyStateUpdate,
};
pub use read::ReadCycleExecutor;
pub use scheduler::{DeviceScheduler, SchedulerState, TickOutcome};
pub use time::{Clock, ManualClock, SystemClock};
pub use traits::{
    ConnectionStateStore, ConnectorEvent, DeviceConfigRepository, MessageQueue,
    PropertyStateStore, Transport, ValueTransformer,
};
pub use transform::DefaultValueTransformer;
pub use types::{ByteOrder, DataType, EnumMapping, PropertyValue, RegisterKind, ValueFormat};
pub use write::{WriteCommand, WriteCommandExecutor, WriteOutcome};
