//! Device scheduler
//!
//! Round-robin polling: each tick services at most one device, in ascending
//! id order, and a device is serviced at most once per sweep. Ticks that
//! find no device with work close the sweep and start a new one.

use std::collections::HashSet;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::ConnectorContext;
use crate::liveness::LivenessTracker;
use crate::model::{ConnectionState, DeviceId};
use crate::read::ReadCycleExecutor;
use crate::write::{WriteCommand, WriteCommandExecutor};

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A device sent at least one request
    Serviced(DeviceId),
    /// No device had work; the sweep starts over on the next tick
    SweepCompleted,
    /// Scheduler has been closed
    Closed,
}

#[derive(Debug, Default)]
pub struct SchedulerState {
    pub closed: bool,
    processed_devices: HashSet<DeviceId>,
}

impl SchedulerState {
    pub fn processed_devices(&self) -> &HashSet<DeviceId> {
        &self.processed_devices
    }
}

#[derive(Debug)]
pub struct DeviceScheduler {
    ctx: ConnectorContext,
    config: EngineConfig,
    state: SchedulerState,
    liveness: LivenessTracker,
    reader: ReadCycleExecutor,
    writer: WriteCommandExecutor,
}

impl DeviceScheduler {
    pub fn new(ctx: ConnectorContext, config: EngineConfig) -> Self {
        Self {
            liveness: LivenessTracker::from_config(&config),
            reader: ReadCycleExecutor::new(&config),
            writer: WriteCommandExecutor::new(&config),
            state: SchedulerState::default(),
            ctx,
            config,
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    pub fn writer(&self) -> &WriteCommandExecutor {
        &self.writer
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed
    }

    pub fn close(&mut self) {
        self.state.closed = true;
    }

    /// One scheduler tick
    pub async fn handle_communication(&mut self) -> TickOutcome {
        if self.state.closed {
            return TickOutcome::Closed;
        }

        let now = self.ctx.now();
        let purged = self.writer.purge_expired(now);
        if purged > 0 {
            debug!("Purged {} expired write debounce entries", purged);
        }

        let mut devices = self.ctx.repository.devices();
        devices.sort_by_key(|d| d.id);

        for device in &devices {
            if self.state.processed_devices.contains(&device.id) {
                continue;
            }
            let current = self.ctx.device_state(device.id);
            if current.is_stopped() {
                continue;
            }
            if device.address.is_none() {
                warn!("Device {} has no address, stopping it", device.identifier);
                self.ctx.set_device_state(device.id, ConnectionState::Stopped);
                continue;
            }

            if self.liveness.is_in_cooldown(device.id, now) {
                self.ctx.set_device_state(device.id, ConnectionState::Lost);
                continue;
            }
            if self.liveness.is_lost(device.id) {
                info!("Device {} cooldown over, retrying", device.identifier);
                self.liveness.clear_lost(device.id);
            }

            self.ctx
                .set_device_state(device.id, ConnectionState::Connected);
            self.state.processed_devices.insert(device.id);

            if self
                .reader
                .execute(&self.ctx, &mut self.liveness, device)
                .await
            {
                return TickOutcome::Serviced(device.id);
            }
        }

        self.state.processed_devices.clear();
        TickOutcome::SweepCompleted
    }

    /// Execute one queued write command between ticks
    pub async fn handle_write(&mut self, command: WriteCommand) {
        if self.state.closed {
            if let Some(reply) = command.reply {
                let _ = reply.send(Err(crate::error::ConnectorError::Closed));
            }
            return;
        }
        self.writer.handle(&self.ctx, command).await;
    }

    /// Drive ticks and write commands until cancelled
    pub async fn run(mut self, mut commands: mpsc::Receiver<WriteCommand>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        info!(
            "Scheduler started: transport={}, tick={}ms",
            self.ctx.transport.name(),
            self.config.tick_interval_ms
        );

        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    info!("Scheduler received cancellation signal, shutting down");
                    break;
                }
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_write(command).await,
                    None => {
                        debug!("Write command channel closed");
                        commands_open = false;
                    },
                },
                _ = interval.tick() => {
                    if self.handle_communication().await == TickOutcome::Closed {
                        break;
                    }
                }
            }
        }

        self.shutdown(&mut commands).await;
    }

    async fn shutdown(&mut self, commands: &mut mpsc::Receiver<WriteCommand>) {
        self.close();
        commands.close();
        while let Ok(command) = commands.try_recv() {
            self.handle_write(command).await;
        }

        for device in self.ctx.repository.devices() {
            if !self.ctx.device_state(device.id).is_stopped() {
                self.ctx
                    .set_device_state(device.id, ConnectionState::Disconnected);
            }
        }
        self.ctx.transport.close().await;
        info!("Scheduler terminated");
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::memory::MemoryRepository;
    use crate::test_utils::{channel, property, tcp_device, unaddressed_device, TestHarness};
    use crate::traits::ConnectionStateStore;
    use crate::types::DataType;
    use tracing_test::traced_test;

    fn two_devices() -> MemoryRepository {
        MemoryRepository::new()
            .with_device(tcp_device(2, 2))
            .with_device(tcp_device(1, 1))
            .with_channel(channel(10, 1, Some(0)))
            .with_property(property(100, 10, DataType::UShort, false))
            .with_channel(channel(20, 2, Some(0)))
            .with_property(property(200, 20, DataType::UShort, false))
    }

    #[tokio::test]
    async fn test_round_robin_by_id() {
        let h = TestHarness::new(two_devices());
        let mut scheduler = DeviceScheduler::new(h.ctx.clone(), EngineConfig::default());

        assert_eq!(scheduler.handle_communication().await, TickOutcome::Serviced(1));
        assert_eq!(scheduler.handle_communication().await, TickOutcome::Serviced(2));
        assert_eq!(
            scheduler.handle_communication().await,
            TickOutcome::SweepCompleted
        );
        assert!(scheduler.state().processed_devices().is_empty());
        assert_eq!(scheduler.handle_communication().await, TickOutcome::Serviced(1));

        let units: Vec<u8> = h.transport.reads().iter().map(|c| c.unit()).collect();
        assert_eq!(units, vec![1, 2, 1]);
        assert_eq!(h.device_state(1), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_stopped_device_is_skipped() {
        let h = TestHarness::new(two_devices());
        h.states.set_state(1, ConnectionState::Stopped);
        let mut scheduler = DeviceScheduler::new(h.ctx.clone(), EngineConfig::default());

        assert_eq!(scheduler.handle_communication().await, TickOutcome::Serviced(2));
        assert_eq!(h.device_state(1), ConnectionState::Stopped);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_unaddressed_device_is_stopped() {
        let h = TestHarness::new(MemoryRepository::new().with_device(unaddressed_device(5)));
        let mut scheduler = DeviceScheduler::new(h.ctx.clone(), EngineConfig::default());

        assert_eq!(
            scheduler.handle_communication().await,
            TickOutcome::SweepCompleted
        );
        assert_eq!(h.device_state(5), ConnectionState::Stopped);
        assert_eq!(h.queue.device_states(5), vec![ConnectionState::Stopped]);
        assert!(logs_contain("has no address, stopping it"));
    }

    #[tokio::test]
    async fn test_lost_device_cools_down() {
        let h = TestHarness::new(
            MemoryRepository::new()
                .with_device(tcp_device(1, 1))
                .with_channel(channel(10, 1, Some(0)))
                .with_property(property(100, 10, DataType::UShort, false)),
        );
        h.transport.fail_reads(TransportError::timeout("no answer"));
        let config = EngineConfig {
            read_max_attempts: 1,
            lost_delay_ms: 1_000,
            ..Default::default()
        };
        let mut scheduler = DeviceScheduler::new(h.ctx.clone(), config);

        assert_eq!(scheduler.handle_communication().await, TickOutcome::Serviced(1));
        assert_eq!(h.device_state(1), ConnectionState::Lost);

        // Within the cooldown: no request, state stays LOST
        scheduler.handle_communication().await;
        h.clock.advance(999);
        assert_eq!(
            scheduler.handle_communication().await,
            TickOutcome::SweepCompleted
        );
        assert_eq!(h.transport.reads().len(), 1);
        assert_eq!(h.device_state(1), ConnectionState::Lost);

        h.clock.advance(1);
        h.transport.recover();
        assert_eq!(scheduler.handle_communication().await, TickOutcome::Serviced(1));
        assert_eq!(h.device_state(1), ConnectionState::Connected);
        assert!(!scheduler.liveness().is_lost(1));
    }

    #[tokio::test]
    async fn test_closed_scheduler_is_noop() {
        let h = TestHarness::new(two_devices());
        let mut scheduler = DeviceScheduler::new(h.ctx.clone(), EngineConfig::default());
        scheduler.close();

        assert_eq!(scheduler.handle_communication().await, TickOutcome::Closed);
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_disconnects() {
        let h = TestHarness::new(two_devices());
        h.states.set_state(2, ConnectionState::Stopped);
        let scheduler = DeviceScheduler::new(h.ctx.clone(), EngineConfig::default());
        let (_tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();

        let task = tokio::spawn(scheduler.run(rx, token.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        token.cancel();
        task.await.unwrap();

        assert!(!h.transport.reads().is_empty());
        assert_eq!(h.device_state(1), ConnectionState::Disconnected);
        assert_eq!(h.device_state(2), ConnectionState::Stopped);
    }
}
