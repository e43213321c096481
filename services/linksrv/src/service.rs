//! Service wiring: configuration in, running connector out

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use fieldlink_core::{
    ChannelQueue, ConnectionState, Connector, ConnectorContext, ConnectorEvent,
    DefaultValueTransformer, MemoryStateStore, SystemClock,
};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::LinksrvConfig;
use crate::consumer::{consume, EventStats};

/// Engine collaborators built from a configuration
pub struct Wiring {
    pub ctx: ConnectorContext,
    pub states: Arc<MemoryStateStore>,
    pub events: mpsc::Receiver<ConnectorEvent>,
}

/// Build repository, stores, event channel and transport
///
/// Disabled devices are marked STOPPED before the connector starts.
pub fn wire(config: &LinksrvConfig) -> anyhow::Result<Wiring> {
    let repository = Arc::new(config.to_repository());
    let states = Arc::new(MemoryStateStore::new());
    let (queue, events) = ChannelQueue::new(config.service.event_queue_size);
    let transport = fieldlink_modbus::from_config(&config.transport)
        .context("Failed to create transport")?;

    let ctx = ConnectorContext {
        repository,
        transformer: Arc::new(DefaultValueTransformer),
        connection_states: states.clone(),
        property_states: states.clone(),
        queue: Arc::new(queue),
        transport,
        clock: Arc::new(SystemClock),
    };

    for device in config.disabled_devices() {
        ctx.set_device_state(device, ConnectionState::Stopped);
    }

    Ok(Wiring { ctx, states, events })
}

/// Run the connector until `shutdown` resolves
///
/// Returns the counters of the event consumer once every event produced
/// before the disconnect has been drained.
pub async fn run<F>(config: LinksrvConfig, shutdown: F) -> anyhow::Result<EventStats>
where
    F: Future<Output = ()>,
{
    let Wiring { ctx, events, .. } = wire(&config)?;
    let consumer = tokio::spawn(consume(events));

    info!(
        "Starting {} with {} devices over {}",
        config.service.name,
        config.devices.len(),
        ctx.transport.name()
    );
    let handle = Connector::new(ctx.clone(), config.engine.clone())
        .context("Failed to create connector")?
        .start();

    shutdown.await;

    info!("Shutting down connector");
    handle.disconnect().await.context("Connector shutdown failed")?;
    drop(ctx);

    let stats = consumer.await.context("Event consumer failed")?;
    info!(
        "{} stopped: {} device state events, {} property events",
        config.service.name, stats.device_states, stats.property_values
    );
    Ok(stats)
}
