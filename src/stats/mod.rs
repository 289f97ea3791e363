//! Interval statistics for the whole stream

use serde::{Deserialize, Serialize};

use crate::constants::{PCR_CLOCK_HZ, PCR_TICKS_PER_MS, PCR_WRAP};
use crate::timestamp::ts_diff;
use crate::types::Counters;

/// Bits per second for `bytes` spread over `ticks` of the 27 MHz clock.
pub fn bitrate_bps(bytes: u64, ticks: u64) -> Option<u64> {
    if ticks == 0 {
        return None;
    }
    Some((bytes as u128 * 8 * PCR_CLOCK_HZ as u128 / ticks as u128) as u64)
}

/// Rolls stream-wide counters over fixed windows of the processor clock.
///
/// Per-PID counters live on the PID entries; the processor rolls them at the
/// same moments this manager reports a window boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsManager {
    interval_ticks: u64,
    window_start: Option<u64>,
    pub current: Counters,
    pub previous: Counters,
    pub null_packets: u64,
    pub previous_null_packets: u64,
    /// Length of the previous window in 27 MHz ticks.
    pub previous_ticks: u64,
    pub intervals: u64,
    /// Packets since the statistics window was (re)started.
    pub total: Counters,
}

impl StatsManager {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ticks: interval_ms.max(1) * PCR_TICKS_PER_MS,
            window_start: None,
            current: Counters::default(),
            previous: Counters::default(),
            null_packets: 0,
            previous_null_packets: 0,
            previous_ticks: 0,
            intervals: 0,
            total: Counters::default(),
        }
    }

    pub fn count(&mut self, bytes: usize, null: bool) {
        self.current.count(bytes);
        self.total.count(bytes);
        if null {
            self.null_packets += 1;
        }
    }

    /// Feeds the clock; returns true when a window closed and the per-PID
    /// counters should be rolled as well.
    pub fn tick(&mut self, now: u64) -> bool {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return false;
        };
        let elapsed = ts_diff(now, start, PCR_WRAP);
        if elapsed < 0 {
            // clock went backwards: restart the window
            self.window_start = Some(now);
            return false;
        }
        if (elapsed as u64) < self.interval_ticks {
            return false;
        }

        self.previous = std::mem::take(&mut self.current);
        self.previous_null_packets = std::mem::take(&mut self.null_packets);
        self.previous_ticks = elapsed as u64;
        self.window_start = Some(now);
        self.intervals += 1;
        true
    }

    /// Zeroes every counter and forgets the window start.
    pub fn restart(&mut self) {
        *self = StatsManager {
            interval_ticks: self.interval_ticks,
            ..StatsManager::new(1)
        };
    }

    /// Transport rate over the previous window.
    pub fn bitrate(&self) -> Option<u64> {
        bitrate_bps(self.previous.bytes, self.previous_ticks)
    }

    /// Null packet share of the previous window, 0.0..=1.0.
    pub fn null_ratio(&self) -> Option<f64> {
        (self.previous.packets > 0)
            .then(|| self.previous_null_packets as f64 / self.previous.packets as f64)
    }
}

impl Default for StatsManager {
    fn default() -> Self {
        Self::new(crate::constants::STATS_INTERVAL_MS)
    }
}
