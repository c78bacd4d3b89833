// candrv/src/health.rs
//
// Bus health and bus-load tracking.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Bus health tracking.
//!
//! The health state is shared between the poll thread and the caller's
//! threads. The scalar counters are atomics and the statistics window is
//! kept behind a mutex, so every read is consistent, if possibly stale.

use crate::errors::ErrorReport;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Mutex, PoisonError,
    },
    time::Instant,
};

/// The default number of consecutive transmit failures after which the bus
/// is considered off.
pub const DEFAULT_BUS_OFF_THRESHOLD: u32 = 10;

// ===== BusStatistics =====

/// Rolling bus-load counters since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStatistics {
    /// Number of frames parsed, data or error
    pub frame_count: u64,
    /// Sum of the worst-case wire bit length of each frame
    pub wire_bits_total: u64,
    /// Sum of the payload bits of each frame
    pub payload_bits_total: u64,
    /// When the window started
    pub window_start: Instant,
}

impl BusStatistics {
    /// Creates an empty window starting now.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Creates an empty window starting at the given time.
    pub fn starting_at(window_start: Instant) -> Self {
        Self {
            frame_count: 0,
            wire_bits_total: 0,
            payload_bits_total: 0,
            window_start,
        }
    }

    /// Accounts for one frame.
    pub fn record(&mut self, wire_bits: u64, payload_bits: u64) {
        self.frame_count += 1;
        self.wire_bits_total += wire_bits;
        self.payload_bits_total += payload_bits;
    }

    /// Zeroes the counters and restarts the window now.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// The bus load of the window, as a percentage of the bitrate.
    pub fn load(&self, bitrate: u32) -> u8 {
        self.load_at(bitrate, Instant::now())
    }

    /// The bus load of the window ending at `now`, as a percentage of the
    /// bitrate.
    ///
    /// This is zero when no time has elapsed (at millisecond resolution) or
    /// the bitrate is zero. The result is clamped to 100, since the wire bit
    /// counts are worst-case estimates.
    pub fn load_at(&self, bitrate: u32, now: Instant) -> u8 {
        let elapsed_ms = now.saturating_duration_since(self.window_start).as_millis() as u64;
        if elapsed_ms == 0 || bitrate == 0 {
            return 0;
        }
        let bit_capacity = bitrate as u64 * elapsed_ms;
        let load = self.wire_bits_total.saturating_mul(100 * 1000) / bit_capacity;
        load.min(100) as u8
    }
}

impl Default for BusStatistics {
    fn default() -> Self {
        Self::new()
    }
}

// ===== BusHealth =====

/// The health state of a bus: consecutive transmit failures, a latched
/// bus-off condition and the bus-load statistics.
#[derive(Debug)]
pub struct BusHealth {
    tx_errors: AtomicU32,
    bus_off: AtomicBool,
    threshold: u32,
    stats: Mutex<BusStatistics>,
}

impl BusHealth {
    /// Creates a healthy state with the given bus-off threshold.
    pub fn new(threshold: u32) -> Self {
        Self {
            tx_errors: AtomicU32::new(0),
            bus_off: AtomicBool::new(false),
            threshold,
            stats: Mutex::new(BusStatistics::new()),
        }
    }

    /// The number of consecutive transmit failures from buffer exhaustion.
    pub fn tx_errors(&self) -> u32 {
        self.tx_errors.load(Ordering::Relaxed)
    }

    /// Whether the latched bus-off flag is set.
    pub fn bus_off_latched(&self) -> bool {
        self.bus_off.load(Ordering::Relaxed)
    }

    /// Determines if the bus is off: either latched by an error frame, or
    /// more consecutive transmit failures than the threshold.
    pub fn is_bus_off(&self) -> bool {
        self.bus_off_latched() || self.tx_errors() > self.threshold
    }

    /// A frame was sent.
    pub fn record_tx_ok(&self) {
        self.tx_errors.store(0, Ordering::Relaxed);
    }

    /// A send failed because the transmit buffers were exhausted.
    pub fn record_tx_overflow(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A data frame was received: the bus works again.
    pub fn record_clean_rx(&self) {
        self.tx_errors.store(0, Ordering::Relaxed);
        self.bus_off.store(false, Ordering::Relaxed);
    }

    /// An error frame was received.
    ///
    /// A bus-off report sets the latch. Other error frames leave it as it
    /// is: only a clean receive or a reconfiguration clears it.
    pub fn record_error_frame(&self, report: &ErrorReport) {
        if report.is_bus_off() {
            self.bus_off.store(true, Ordering::Relaxed);
        }
    }

    /// The link was reconfigured, which restarts the controller.
    pub fn clear(&self) {
        self.record_clean_rx();
    }

    /// Accounts for a received frame in the statistics.
    pub fn record_frame(&self, wire_bits: u64, payload_bits: u64) {
        self.stats().record(wire_bits, payload_bits);
    }

    /// A copy of the current statistics window.
    pub fn statistics(&self) -> BusStatistics {
        *self.stats()
    }

    /// Computes the bus load of the current window, then starts a new one.
    pub fn take_load(&self, bitrate: u32) -> u8 {
        let mut stats = self.stats();
        let load = stats.load(bitrate);
        stats.reset();
        load
    }

    /// Starts a new statistics window.
    pub fn reset_statistics(&self) {
        self.stats().reset();
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, BusStatistics> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BusHealth {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_OFF_THRESHOLD)
    }
}

/////////////////////////////////////////////////////////////////////////////
