//! Per-channel liveness tracking
//!
//! Each channel holds one slot that is either the timestamp of its last
//! successful read or the number of consecutive failures since then. A
//! device whose channel exhausts its attempts is marked lost and cools
//! down before it is polled again.

use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::model::{ChannelId, DeviceId};

/// Liveness slot of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerSlot {
    LastSuccess(i64),
    FailureCount(u32),
}

#[derive(Debug)]
pub struct LivenessTracker {
    slots: HashMap<ChannelId, TrackerSlot>,
    lost_devices: HashMap<DeviceId, i64>,
    max_attempts: u32,
    lost_delay_ms: i64,
}

impl LivenessTracker {
    pub fn new(max_attempts: u32, lost_delay_ms: i64) -> Self {
        Self {
            slots: HashMap::new(),
            lost_devices: HashMap::new(),
            max_attempts,
            lost_delay_ms,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.read_max_attempts, config.lost_delay_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn slot(&self, channel: ChannelId) -> Option<TrackerSlot> {
        self.slots.get(&channel).copied()
    }

    pub fn record_success(&mut self, channel: ChannelId, now: i64) {
        self.slots.insert(channel, TrackerSlot::LastSuccess(now));
    }

    /// Optimistically stamp a channel before its request goes out.
    ///
    /// A channel that is already counting failures keeps its count, so a
    /// failing channel still reaches the attempt limit.
    pub fn record_attempt(&mut self, channel: ChannelId, now: i64) {
        match self.slots.get(&channel) {
            Some(TrackerSlot::FailureCount(_)) => {},
            _ => {
                self.slots.insert(channel, TrackerSlot::LastSuccess(now));
            },
        }
    }

    /// Count one more failed read and return the new count
    pub fn record_failure(&mut self, channel: ChannelId) -> u32 {
        let count = match self.slots.get(&channel) {
            Some(TrackerSlot::FailureCount(n)) => n.saturating_add(1),
            _ => 1,
        };
        self.slots.insert(channel, TrackerSlot::FailureCount(count));
        count
    }

    pub fn failure_count(&self, channel: ChannelId) -> u32 {
        match self.slots.get(&channel) {
            Some(TrackerSlot::FailureCount(n)) => *n,
            _ => 0,
        }
    }

    pub fn last_success(&self, channel: ChannelId) -> Option<i64> {
        match self.slots.get(&channel) {
            Some(TrackerSlot::LastSuccess(ts)) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_exhausted(&self, channel: ChannelId) -> bool {
        self.failure_count(channel) >= self.max_attempts
    }

    /// Whether the channel was read less than `delay_ms` ago
    pub fn is_reading_delayed(&self, channel: ChannelId, delay_ms: u64, now: i64) -> bool {
        if delay_ms == 0 {
            return false;
        }
        self.last_success(channel)
            .map_or(false, |ts| now - ts < delay_ms as i64)
    }

    pub fn clear_channel(&mut self, channel: ChannelId) {
        self.slots.remove(&channel);
    }

    pub fn mark_lost(&mut self, device: DeviceId, now: i64) {
        self.lost_devices.insert(device, now);
    }

    pub fn lost_at(&self, device: DeviceId) -> Option<i64> {
        self.lost_devices.get(&device).copied()
    }

    pub fn is_lost(&self, device: DeviceId) -> bool {
        self.lost_devices.contains_key(&device)
    }

    /// Lost and still inside the cooldown window
    pub fn is_in_cooldown(&self, device: DeviceId, now: i64) -> bool {
        self.lost_at(device)
            .map_or(false, |ts| now - ts < self.lost_delay_ms)
    }

    pub fn clear_lost(&mut self, device: DeviceId) {
        self.lost_devices.remove(&device);
    }
}
