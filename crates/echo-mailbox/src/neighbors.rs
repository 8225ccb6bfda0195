//! NeighborTable: soft-state membership from heartbeats.
//!
//! Pure state: record observations, answer membership queries, sweep
//! records older than the retention window. Time is injected through the
//! `*_at` variants; the plain variants read the wall clock.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::types::{now_ms, DeviceId};

/// Tracks when each device was last observed.
#[derive(Debug, Default)]
pub struct NeighborTable {
    /// Last observation time per device (Unix ms).
    last_seen: HashMap<DeviceId, u64>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat (or any message) from a device.
    pub fn touch(&mut self, device_id: DeviceId) {
        self.touch_at(device_id, now_ms());
    }

    /// Record an observation with a specific timestamp.
    pub fn touch_at(&mut self, device_id: DeviceId, timestamp: u64) {
        self.last_seen.insert(device_id, timestamp);
    }

    /// Every known device, stale or not.
    ///
    /// Callers rely on [`sweep`](Self::sweep) having removed expired records.
    pub fn neighbors(&self) -> BTreeSet<DeviceId> {
        self.last_seen.keys().copied().collect()
    }

    /// Devices whose age at `now` does not exceed `retention`.
    pub fn neighbors_within(&self, retention: Duration, now: u64) -> BTreeSet<DeviceId> {
        let retention = retention_ms(retention);
        self.last_seen
            .iter()
            .filter(|&(_, &last)| now.saturating_sub(last) <= retention)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Remove every record older than `retention`. Returns removed ids.
    pub fn sweep(&mut self, retention: Duration) -> Vec<DeviceId> {
        self.sweep_at(retention, now_ms())
    }

    /// Sweep as of a specific time.
    pub fn sweep_at(&mut self, retention: Duration, now: u64) -> Vec<DeviceId> {
        let retention = retention_ms(retention);
        let mut removed = vec![];
        self.last_seen.retain(|&id, &mut last| {
            if now.saturating_sub(last) > retention {
                removed.push(id);
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn last_seen(&self, device_id: &DeviceId) -> Option<u64> {
        self.last_seen.get(device_id).copied()
    }

    /// Forget a device immediately.
    pub fn remove(&mut self, device_id: &DeviceId) -> bool {
        self.last_seen.remove(device_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

pub(crate) fn retention_ms(retention: Duration) -> u64 {
    u64::try_from(retention.as_millis()).unwrap_or(u64::MAX)
}
