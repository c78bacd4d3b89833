// candrv/src/driver.rs
//
// Adapter wiring a session into a protocol stack.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! An adapter for protocol stacks that pull frames on their own schedule.
//!
//! A [`CanDriver`] runs the session's poll loop on a background thread,
//! which pushes every received data frame into an [`RxQueue`]. The stack
//! then pops frames without ever blocking on the poll thread, and sends
//! through the same session.

use crate::{
    config::DEFAULT_BITRATE,
    frame::FrameDescriptor,
    link::{LinkControl, NetlinkLink},
    Error, Result, Session,
};
use log::{error, info, warn};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

/// The queue length above which each push logs a warning.
pub const RX_QUEUE_WARN_LEN: usize = 100;

/// A FIFO of received frames, shared between the poll thread and the
/// protocol stack.
///
/// The queue is unbounded, but warns when the consumer falls behind.
#[derive(Debug, Default)]
pub struct RxQueue {
    frames: Mutex<VecDeque<FrameDescriptor>>,
}

impl RxQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame received on the named interface.
    pub fn push(&self, iface: &str, frame: FrameDescriptor) {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        frames.push_back(frame);
        if frames.len() > RX_QUEUE_WARN_LEN {
            warn!("{}: RX queue has {} frames", iface, frames.len());
        }
    }

    /// Takes the oldest frame, if there is one and the queue is not being
    /// pushed to right now.
    pub fn try_pop(&self) -> Option<FrameDescriptor> {
        self.frames.try_lock().ok()?.pop_front()
    }

    /// The number of queued frames.
    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Determines if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all the queued frames.
    pub fn clear(&self) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// A CAN driver for a protocol stack, backed by a session and a background
/// poll thread.
#[derive(Debug)]
pub struct CanDriver<L: LinkControl + 'static = NetlinkLink> {
    session: Arc<Session<L>>,
    queue: Arc<RxQueue>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl CanDriver {
    /// Creates a driver for the named interface. Nothing happens until it
    /// is enabled.
    pub fn new(iface: &str) -> Self {
        Self::with_session(Session::new(iface, DEFAULT_BITRATE))
    }
}

impl<L: LinkControl + 'static> CanDriver<L> {
    /// Creates a driver around an existing session.
    pub fn with_session(session: Session<L>) -> Self {
        Self {
            session: Arc::new(session),
            queue: Arc::new(RxQueue::new()),
            poller: Mutex::new(None),
        }
    }

    /// The underlying session.
    pub fn session(&self) -> &Session<L> {
        &self.session
    }

    /// The receive queue.
    pub fn queue(&self) -> &RxQueue {
        &self.queue
    }

    /// (Re)starts the driver at the given bitrate.
    ///
    /// Any running poll thread is stopped first. A bitrate that can't be
    /// applied is logged, and the driver is started anyway.
    pub fn enable(&self, bitrate: u32) -> Result<()> {
        self.stop();

        let name = self.session.name();
        if self.session.set_bitrate(bitrate) {
            info!("{}: bitrate changed to {}", name, bitrate);
        } else {
            warn!("{}: bitrate not changed, still {}", name, self.session.bitrate());
        }

        self.queue.clear();
        self.session.try_open()?;

        let session = Arc::clone(&self.session);
        let queue = Arc::clone(&self.queue);
        let handle = thread::spawn(move || {
            let name = session.name();
            session.poll(|frame| queue.push(name, frame));
        });
        *self.poller() = Some(handle);
        Ok(())
    }

    /// Sends a frame with a standard (11-bit) identifier.
    ///
    /// This is refused while the bus is off.
    pub fn send(&self, frame: &FrameDescriptor) -> Result<()> {
        if self.session.is_bus_off() {
            return Err(Error::BusOff);
        }
        if frame.is_extended() {
            return Err(Error::InvalidId(frame.raw_id()));
        }
        self.session
            .try_send(frame.raw_id(), false, frame.len(), frame.payload())
    }

    /// Takes the oldest received frame, without blocking.
    pub fn read(&self) -> Option<FrameDescriptor> {
        self.queue.try_pop()
    }

    /// Handles a reset request from the protocol stack. The controller
    /// recovers on its own, so this only logs.
    pub fn reset(&self) {
        info!("{}: reset requested", self.session.name());
    }

    /// Closes the session and waits for the poll thread to finish.
    pub fn close(&self) {
        self.stop();
    }

    fn poller(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self) {
        self.session.close();
        let handle = self.poller().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("{}: poll thread panicked", self.session.name());
            }
        }
    }
}

impl<L: LinkControl + 'static> Drop for CanDriver<L> {
    fn drop(&mut self) {
        self.stop();
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SessionConfig, link::fake::FakeLink};

    const NO_IFACE: &str = "nosuchcan0";

    fn frame(id: u32) -> FrameDescriptor {
        FrameDescriptor::new(id, false, &[id as u8]).unwrap()
    }

    fn driver(link: Arc<FakeLink>) -> CanDriver<Arc<FakeLink>> {
        CanDriver::with_session(Session::with_link(
            NO_IFACE,
            SessionConfig::default(),
            link,
        ))
    }

    #[test]
    fn test_queue_fifo() {
        let queue = RxQueue::new();
        assert!(queue.try_pop().is_none());

        queue.push("can0", frame(1));
        queue.push("can0", frame(2));
        assert_eq!(2, queue.len());

        assert_eq!(Some(frame(1)), queue.try_pop());
        assert_eq!(Some(frame(2)), queue.try_pop());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_over_warning_level() {
        let queue = RxQueue::new();
        for id in 0..=RX_QUEUE_WARN_LEN as u32 {
            queue.push("can0", frame(id));
        }
        assert_eq!(RX_QUEUE_WARN_LEN + 1, queue.len());
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_does_not_block() {
        let queue = RxQueue::new();
        queue.push("can0", frame(1));

        let _guard = queue.frames.lock().unwrap();
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_enable_without_interface() {
        let link = Arc::new(FakeLink::new(NO_IFACE, "can"));
        let drv = driver(Arc::clone(&link));

        assert!(matches!(drv.enable(500_000), Err(Error::Socket { .. })));
        assert_eq!(500_000, drv.session().bitrate());
        assert!(link.state().is_up);
        assert!(drv.read().is_none());

        drv.reset();
        drv.close();
    }

    #[test]
    fn test_send_refusals() {
        let drv = driver(Arc::new(FakeLink::new(NO_IFACE, "can")));

        let ext = FrameDescriptor::new(0x1234, true, &[]).unwrap();
        assert!(matches!(drv.send(&ext), Err(Error::InvalidId(0x1234))));
        assert!(matches!(drv.send(&frame(0x10)), Err(Error::NotOpen)));

        for _ in 0..11 {
            drv.session().health().record_tx_overflow();
        }
        assert!(matches!(drv.send(&frame(0x10)), Err(Error::BusOff)));
    }
}
