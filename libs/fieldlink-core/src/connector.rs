//! Connector lifecycle
//!
//! [`Connector::start`] spawns the scheduler task and hands back a
//! [`ConnectorHandle`] used to queue writes and to disconnect.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EngineConfig;
use crate::context::ConnectorContext;
use crate::error::{ConnectorError, Result};
use crate::model::{ChannelId, DeviceId, PropertyId, PropertyStateUpdate};
use crate::scheduler::DeviceScheduler;
use crate::types::PropertyValue;
use crate::write::{WriteCommand, WriteOutcome};

pub struct Connector {
    ctx: ConnectorContext,
    config: EngineConfig,
}

impl Connector {
    pub fn new(ctx: ConnectorContext, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { ctx, config })
    }

    /// Spawn the scheduler on the current tokio runtime.
    ///
    /// No device state is touched here; devices become CONNECTED when the
    /// scheduler first reaches them.
    pub fn start(self) -> ConnectorHandle {
        let (tx, rx) = mpsc::channel(self.config.command_queue_size);
        let token = CancellationToken::new();
        let ctx = self.ctx.clone();
        let scheduler = DeviceScheduler::new(self.ctx, self.config);
        let join = tokio::spawn(scheduler.run(rx, token.clone()));

        info!("Connector started");
        ConnectorHandle {
            commands: tx,
            token,
            join,
            ctx,
        }
    }
}

pub struct ConnectorHandle {
    commands: mpsc::Sender<WriteCommand>,
    token: CancellationToken,
    join: JoinHandle<()>,
    ctx: ConnectorContext,
}

impl ConnectorHandle {
    /// Queue a write of the property's expected value and wait for the outcome
    pub async fn write_property(
        &self,
        device: DeviceId,
        channel: ChannelId,
        property: PropertyId,
    ) -> Result<WriteOutcome> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(WriteCommand {
                device,
                channel,
                property,
                reply: Some(reply),
            })
            .await
            .map_err(|_| ConnectorError::Closed)?;
        rx.await.map_err(|_| ConnectorError::Closed)?
    }

    /// Record `value` as the property's expected value, then write it
    pub async fn set_expected_and_write(
        &self,
        device: DeviceId,
        channel: ChannelId,
        property: PropertyId,
        value: PropertyValue,
    ) -> Result<WriteOutcome> {
        if self.is_closed() {
            return Err(ConnectorError::Closed);
        }
        self.ctx.property_states.set(
            property,
            PropertyStateUpdate::new().with_expected(Some(value)),
        );
        self.write_property(device, channel, property).await
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.join.is_finished()
    }

    /// Stop polling, wait for the in-flight request and mark every
    /// non-stopped device DISCONNECTED
    pub async fn disconnect(self) -> Result<()> {
        self.token.cancel();
        self.join
            .await
            .map_err(|e| ConnectorError::internal(format!("scheduler task failed: {}", e)))?;
        info!("Connector disconnected");
        Ok(())
    }
}

impl std::fmt::Debug for ConnectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorHandle")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
