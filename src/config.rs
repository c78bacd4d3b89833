// candrv/src/config.rs
//
// Session configuration.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Session configuration.

use crate::{errors::ERR_MASK_DEFAULT, health::DEFAULT_BUS_OFF_THRESHOLD};
use libc::canid_t;
use std::time::Duration;

/// The default bitrate, in bit/s.
pub const DEFAULT_BITRATE: u32 = 250_000;

/// The default transmit queue length of the interface.
pub const DEFAULT_TX_QUEUE_LEN: u32 = 1000;

/// The parameters of a [`Session`](crate::Session).
///
/// ```
/// use candrv::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::default()
///     .with_bitrate(500_000)
///     .with_poll_wait(Duration::from_millis(20));
/// assert_eq!(1000, config.tx_queue_len);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// The bitrate applied to the link when it is opened, in bit/s
    pub bitrate: u32,
    /// The transmit queue length applied to the link
    pub tx_queue_len: u32,
    /// The send timeout of the socket
    pub send_timeout: Duration,
    /// How long a synchronous receive waits for a frame
    pub receive_wait: Duration,
    /// The bounded readiness wait of each poll loop iteration
    pub poll_wait: Duration,
    /// The number of consecutive transmit failures tolerated before the
    /// bus is considered off
    pub bus_off_threshold: u32,
    /// The error classes reported by the kernel as error frames
    pub error_mask: canid_t,
    /// Whether dropping the session brings the link administratively down
    pub link_down_on_drop: bool,
}

impl SessionConfig {
    /// Sets the bitrate, in bit/s.
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Sets the transmit queue length.
    pub fn with_tx_queue_len(mut self, len: u32) -> Self {
        self.tx_queue_len = len;
        self
    }

    /// Sets the socket send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the synchronous receive wait.
    pub fn with_receive_wait(mut self, wait: Duration) -> Self {
        self.receive_wait = wait;
        self
    }

    /// Sets the poll loop wait.
    pub fn with_poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait = wait;
        self
    }

    /// Sets the bus-off threshold.
    pub fn with_bus_off_threshold(mut self, threshold: u32) -> Self {
        self.bus_off_threshold = threshold;
        self
    }

    /// Sets the error-notification mask.
    pub fn with_error_mask(mut self, mask: canid_t) -> Self {
        self.error_mask = mask;
        self
    }

    /// Sets whether the link is brought down when the session is dropped.
    pub fn with_link_down_on_drop(mut self, on: bool) -> Self {
        self.link_down_on_drop = on;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            tx_queue_len: DEFAULT_TX_QUEUE_LEN,
            send_timeout: Duration::from_micros(500),
            receive_wait: Duration::from_micros(100),
            poll_wait: Duration::from_millis(5),
            bus_off_threshold: DEFAULT_BUS_OFF_THRESHOLD,
            error_mask: ERR_MASK_DEFAULT,
            link_down_on_drop: true,
        }
    }
}

/// Converts a wait to whole milliseconds for the poll calls, rounding up so
/// that a short non-zero wait never becomes a non-blocking check.
pub(crate) fn wait_millis(wait: Duration) -> u16 {
    let ms = (wait.as_micros() + 999) / 1000;
    ms.min(u16::MAX as u128) as u16
}

/////////////////////////////////////////////////////////////////////////////
