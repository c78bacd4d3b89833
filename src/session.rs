// candrv/src/session.rs
//
// The driver session for one CAN interface.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The driver session for one CAN interface.
//!
//! A [`Session`] owns the interface on behalf of a higher protocol layer.
//! Creating one has no side effects. Opening it configures the link and
//! binds a raw socket; closing it releases the socket; dropping it also
//! brings the link down.
//!
//! All the operations take `&self`, so a session can be shared in an `Arc`
//! between the thread running [`Session::poll`] and the threads that send
//! frames or monitor the bus. Only one thread should read frames at a time,
//! either through `poll` or through `receive`.

use crate::{
    config::SessionConfig,
    frame::{worst_case_bit_length, Decoded, FrameDescriptor, FrameFormat, WireFrame},
    health::{BusHealth, BusStatistics},
    id::IdFlags,
    is_buffer_exhaustion,
    link::{self, LinkControl, NetlinkLink},
    poll,
    socket::{FrameSocket, RawRead},
    Error, Result,
};
use log::{debug, error, info, trace, warn};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, PoisonError, RwLock,
};

/// An open socket, with the stop flag for the poll loops running on it.
///
/// Every open creates a new channel and the flag is only ever set, so a
/// poll loop always watches the flag of the socket it reads from.
#[derive(Debug)]
struct Channel {
    sock: FrameSocket,
    stop: AtomicBool,
}

impl Channel {
    fn new(sock: FrameSocket) -> Self {
        Self {
            sock,
            stop: AtomicBool::new(false),
        }
    }
}

/// A driver session for one CAN interface.
#[derive(Debug)]
pub struct Session<L: LinkControl = NetlinkLink> {
    name: String,
    config: SessionConfig,
    bitrate: AtomicU32,
    link: L,
    channel: RwLock<Option<Arc<Channel>>>,
    health: BusHealth,
}

impl Session {
    /// Creates a session for the named interface, to run at the given
    /// bitrate. Nothing is configured until the session is opened.
    pub fn new(name: &str, bitrate: u32) -> Self {
        Self::with_config(name, SessionConfig::default().with_bitrate(bitrate))
    }

    /// Creates a session with a full configuration.
    pub fn with_config(name: &str, config: SessionConfig) -> Self {
        Self::with_link(name, config, NetlinkLink)
    }
}

impl<L: LinkControl> Session<L> {
    /// Creates a session that configures the link through `link`.
    pub fn with_link(name: &str, config: SessionConfig, link: L) -> Self {
        Self {
            name: name.to_string(),
            bitrate: AtomicU32::new(config.bitrate),
            health: BusHealth::new(config.bus_off_threshold),
            config,
            link,
            channel: RwLock::new(None),
        }
    }

    /// The interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured bitrate, in bit/s.
    pub fn bitrate(&self) -> u32 {
        self.bitrate.load(Ordering::Relaxed)
    }

    /// The session configuration, as created.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The link controller.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// The bus health state.
    pub fn health(&self) -> &BusHealth {
        &self.health
    }

    /// Determines if the session has an open socket.
    pub fn is_open(&self) -> bool {
        self.channel().is_some()
    }

    /// Determines if the bus is considered off.
    pub fn is_bus_off(&self) -> bool {
        self.health.is_bus_off()
    }

    /// A copy of the current bus statistics window.
    pub fn statistics(&self) -> BusStatistics {
        self.health.statistics()
    }

    fn channel(&self) -> Option<Arc<Channel>> {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ----- Lifecycle -----

    /// Opens the session, returning whether it is open.
    ///
    /// See [`Session::try_open`].
    pub fn open(&self) -> bool {
        match self.try_open() {
            Ok(()) => true,
            Err(err) => {
                error!("{}: unable to open: {}", self.name, err);
                false
            }
        }
    }

    /// Opens the session.
    ///
    /// The link is configured with the bitrate and queue length and brought
    /// up. Link configuration failures are logged but don't prevent the
    /// socket from being opened, since the link may already be usable (as a
    /// vcan link is, without a bitrate). The socket is then created, bound,
    /// and configured; if any of those steps fail the session stays closed.
    ///
    /// This does nothing if the session is already open.
    pub fn try_open(&self) -> Result<()> {
        let mut slot = self.channel.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }

        if let Err(err) = link::apply(
            &self.link,
            &self.name,
            self.bitrate(),
            self.config.tx_queue_len,
        ) {
            warn!("{}: link configuration incomplete: {}", self.name, err);
        }

        let sock = FrameSocket::open(&self.name, &self.config)?;
        self.health.reset_statistics();
        *slot = Some(Arc::new(Channel::new(sock)));
        info!("{}: open at {} bit/s", self.name, self.bitrate());
        Ok(())
    }

    /// Closes the session.
    ///
    /// A poll loop running on the socket is signaled to stop, and returns
    /// within one poll wait. Raw CAN sockets can't be shut down, so a
    /// blocked reader is not woken; the descriptor is released once the
    /// last user of it is done. This always succeeds.
    pub fn close(&self) -> bool {
        let chan = self
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(chan) = chan {
            chan.stop.store(true, Ordering::Release);
            if let Err(err) = chan.sock.shutdown() {
                trace!("{}: socket shutdown: {}", self.name, err);
            }
            info!("{}: closed", self.name);
        }
        true
    }

    /// Changes the bitrate, returning whether it took effect.
    ///
    /// See [`Session::try_set_bitrate`].
    pub fn set_bitrate(&self, bitrate: u32) -> bool {
        match self.try_set_bitrate(bitrate) {
            Ok(()) => true,
            Err(err) => {
                error!("{}: unable to set bitrate {}: {}", self.name, bitrate, err);
                false
            }
        }
    }

    /// Changes the bitrate.
    ///
    /// An open session is closed first. The link is brought down, then the
    /// new bitrate and the queue length are applied. On success the bitrate
    /// is kept for the next open and the bus health is cleared, since the
    /// controller restarts. The link is left down; opening the session again
    /// brings it up.
    pub fn try_set_bitrate(&self, bitrate: u32) -> Result<()> {
        self.close();
        link::reconfigure(&self.link, &self.name, bitrate, self.config.tx_queue_len)?;
        self.bitrate.store(bitrate, Ordering::Relaxed);
        self.health.clear();
        Ok(())
    }

    // ----- Frames -----

    /// Sends a data frame, returning whether it was queued.
    ///
    /// See [`Session::try_send`].
    pub fn send(&self, id: u32, extended: bool, len: usize, data: &[u8]) -> bool {
        self.try_send(id, extended, len, data).is_ok()
    }

    /// Sends a data frame with the first `len` bytes of `data`.
    ///
    /// This is refused while the bus is off. A failure to queue the frame
    /// because the transmit buffers are full counts toward the bus-off
    /// threshold. There are no retries.
    pub fn try_send(&self, id: u32, extended: bool, len: usize, data: &[u8]) -> Result<()> {
        if len > libc::CAN_MAX_DLEN {
            return Err(Error::InvalidLength(len));
        }
        if self.is_bus_off() {
            return Err(Error::BusOff);
        }
        let frame = WireFrame::encode(id, extended, len, data)?;
        let chan = self.channel().ok_or(Error::NotOpen)?;

        match chan.sock.write_frame(&frame) {
            Ok(()) => {
                self.health.record_tx_ok();
                debug!("{}: TX {:?}", self.name, frame);
                Ok(())
            }
            Err(err) => {
                if is_buffer_exhaustion(&err) {
                    self.health.record_tx_overflow();
                }
                error!(
                    "{}: send failed (errno {}): {}",
                    self.name,
                    err.raw_os_error().unwrap_or(0),
                    err
                );
                Err(Error::Transmit(err))
            }
        }
    }

    /// Receives a data frame, if one is ready within the receive wait.
    ///
    /// Error frames are accounted for and logged, but not returned.
    pub fn receive(&self) -> Option<FrameDescriptor> {
        match self.try_receive() {
            Ok(frame) => frame,
            Err(err) => {
                debug!("{}: receive: {}", self.name, err);
                None
            }
        }
    }

    /// Receives a data frame, if one is ready within the receive wait.
    pub fn try_receive(&self) -> Result<Option<FrameDescriptor>> {
        let chan = self.channel().ok_or(Error::NotOpen)?;

        if !chan
            .sock
            .wait_readable(self.config.receive_wait)
            .map_err(Error::Receive)?
        {
            return Ok(None);
        }

        match chan.sock.read_raw().map_err(Error::Receive)? {
            RawRead::Frame(frame) => Ok(self.ingest(&frame)),
            RawRead::Short(n) => Err(Error::ShortRead(n)),
        }
    }

    /// Runs the poll loop on the calling thread, handing every data frame
    /// to `sink` until the session is closed.
    ///
    /// Returns false if the session is not open, or the loop could not be
    /// started. Read failures and short reads are logged and skipped.
    pub fn poll<F>(&self, mut sink: F) -> bool
    where
        F: FnMut(FrameDescriptor),
    {
        let Some(chan) = self.channel() else {
            return false;
        };

        let res = poll::run(
            &self.name,
            &chan.sock,
            &chan.stop,
            self.config.poll_wait,
            |read| match read {
                Ok(RawRead::Frame(frame)) => {
                    if let Some(desc) = self.ingest(&frame) {
                        sink(desc);
                    }
                }
                Ok(RawRead::Short(n)) => trace!("{}: discarded short read of {} bytes", self.name, n),
                Err(err) => error!("{}: read failed: {}", self.name, err),
            },
        );

        match res {
            Ok(()) => true,
            Err(err) => {
                error!("{}: unable to start the poll loop: {}", self.name, err);
                false
            }
        }
    }

    /// Computes the bus load since the last call, as a percentage, and
    /// starts a new window.
    pub fn bus_load(&self) -> u8 {
        self.health.take_load(self.bitrate())
    }

    /// Accounts for a received frame, returning it if it is a data frame.
    fn ingest(&self, frame: &WireFrame) -> Option<FrameDescriptor> {
        let len = frame.len();
        let extended = frame.id_flags().contains(IdFlags::EFF);
        self.health.record_frame(
            worst_case_bit_length(extended, len, FrameFormat::Classic),
            len as u64 * 8,
        );

        match frame.decode() {
            Decoded::Data(desc) => {
                self.health.record_clean_rx();
                trace!("{}: RX {}", self.name, desc);
                Some(desc)
            }
            Decoded::Error(report) => {
                warn!("{}: bus error: {}", self.name, report);
                self.health.record_error_frame(&report);
                None
            }
        }
    }
}

impl<L: LinkControl> Drop for Session<L> {
    /// Closes the session and, unless configured otherwise, brings the link
    /// down. Failures are only logged.
    fn drop(&mut self) {
        self.close();

        if self.config.link_down_on_drop {
            match self.link.resolve(&self.name) {
                Ok(mut link) => {
                    let _ = link::set_admin_down(&self.link, &mut link);
                }
                Err(err) => debug!("{}: link not brought down: {}", self.name, err),
            }
        }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::ErrorClass,
        id::CAN_ERR_FLAG,
        link::fake::FakeLink,
    };
    use libc::can_frame;
    use std::{mem, sync::mpsc, thread, time::Duration};

    const NO_IFACE: &str = "nosuchcan0";

    fn session(link: Arc<FakeLink>) -> Session<Arc<FakeLink>> {
        Session::with_link(NO_IFACE, SessionConfig::default(), link)
    }

    // Opens the session on a unix datagram socket, which polls like a
    // CAN socket that never receives anything.
    fn open_unbound<L: LinkControl>(sess: &Session<L>) {
        let sock = socket2::Socket::new(socket2::Domain::UNIX, socket2::Type::DGRAM, None).unwrap();
        *sess.channel.write().unwrap() =
            Some(Arc::new(Channel::new(FrameSocket::from_socket(sock))));
    }

    fn error_frame(classes: ErrorClass, data: [u8; 8]) -> WireFrame {
        let mut raw: can_frame = unsafe { mem::zeroed() };
        raw.can_id = CAN_ERR_FLAG | classes.bits();
        raw.can_dlc = 8;
        raw.data = data;
        WireFrame::from(raw)
    }

    #[test]
    fn test_new_has_no_side_effects() {
        let link = Arc::new(FakeLink::new(NO_IFACE, "can"));
        let sess = session(Arc::clone(&link));
        assert_eq!(NO_IFACE, sess.name());
        assert_eq!(250_000, sess.bitrate());
        assert!(!sess.is_open());
        assert!(link.calls().is_empty());
    }

    #[test]
    fn test_open_without_socket() {
        let link = Arc::new(FakeLink::new(NO_IFACE, "can"));
        let sess = session(Arc::clone(&link));

        // the link is configured, but there's no such interface to bind
        assert!(matches!(sess.try_open(), Err(Error::Socket { .. })));
        assert!(!sess.open());
        assert!(!sess.is_open());
        assert!(link.state().is_up);
        assert_eq!(Some(250_000), link.state().bitrate);

        assert!(matches!(
            sess.try_send(0x123, false, 0, &[]),
            Err(Error::NotOpen)
        ));
        assert!(matches!(sess.try_receive(), Err(Error::NotOpen)));
        assert!(sess.receive().is_none());
        assert!(!sess.poll(|_| ()));
        assert!(sess.close());
        assert!(sess.close());
    }

    #[test]
    fn test_send_checks() {
        let sess = session(Arc::new(FakeLink::new(NO_IFACE, "can")));
        assert!(matches!(
            sess.try_send(0x123, false, 9, &[0; 9]),
            Err(Error::InvalidLength(9))
        ));
        assert!(matches!(
            sess.try_send(0x800, false, 0, &[]),
            Err(Error::InvalidId(0x800))
        ));
        assert!(!sess.send(0x123, false, 9, &[0; 9]));
    }

    #[test]
    fn test_ingest_data_frame() {
        let sess = session(Arc::new(FakeLink::new(NO_IFACE, "can")));
        let frame = WireFrame::encode(0x123, false, 4, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let desc = sess.ingest(&frame).unwrap();
        assert_eq!(0x123, desc.raw_id());
        assert_eq!(&[0xDE, 0xAD, 0xBE, 0xEF], desc.data());

        let stats = sess.statistics();
        assert_eq!(1, stats.frame_count);
        assert_eq!(95, stats.wire_bits_total);
        assert_eq!(32, stats.payload_bits_total);
    }

    #[test]
    fn test_bus_off_until_clean_receive() {
        let sess = session(Arc::new(FakeLink::new(NO_IFACE, "can")));

        assert!(sess
            .ingest(&error_frame(ErrorClass::BUS_OFF, [0; 8]))
            .is_none());
        assert!(sess.is_bus_off());
        assert_eq!(1, sess.statistics().frame_count);

        assert!(matches!(
            sess.try_send(0x123, false, 0, &[]),
            Err(Error::BusOff)
        ));

        let frame = WireFrame::encode(0x10, false, 1, &[1]).unwrap();
        assert!(sess.ingest(&frame).is_some());
        assert!(!sess.is_bus_off());
    }

    #[test]
    fn test_bus_off_survives_other_error_frames() {
        let sess = session(Arc::new(FakeLink::new(NO_IFACE, "can")));

        sess.ingest(&error_frame(ErrorClass::BUS_OFF, [0; 8]));
        sess.ingest(&error_frame(ErrorClass::BUS_ERROR, [0; 8]));
        sess.ingest(&error_frame(ErrorClass::NO_ACK, [0; 8]));
        assert!(sess.is_bus_off());

        let frame = WireFrame::encode(0x10, false, 0, &[]).unwrap();
        sess.ingest(&frame);
        assert!(!sess.is_bus_off());
    }

    #[test]
    fn test_bus_off_until_bitrate_change() {
        let link = Arc::new(FakeLink::new(NO_IFACE, "can"));
        let sess = session(Arc::clone(&link));

        sess.ingest(&error_frame(ErrorClass::CONTROLLER, [0, 0x20, 0, 0, 0, 0, 0, 0]));
        assert!(sess.is_bus_off());

        assert!(sess.set_bitrate(500_000));
        assert!(!sess.is_bus_off());
        assert_eq!(500_000, sess.bitrate());
        assert_eq!(vec!["bitrate 500000", "qlen 1000"], link.calls());
    }

    #[test]
    fn test_tx_overflow_bus_off() {
        let sess = session(Arc::new(FakeLink::new(NO_IFACE, "can")));
        for _ in 0..11 {
            sess.health().record_tx_overflow();
        }
        assert!(sess.is_bus_off());

        // a successful send alone doesn't clear it; sending is refused anyway
        assert!(matches!(
            sess.try_send(0x123, false, 0, &[]),
            Err(Error::BusOff)
        ));

        let frame = WireFrame::encode(0x10, false, 0, &[]).unwrap();
        sess.ingest(&frame);
        assert!(!sess.is_bus_off());
    }

    #[test]
    fn test_bitrate_change_then_open() {
        let link = Arc::new(FakeLink::new(NO_IFACE, "can"));
        let sess = session(Arc::clone(&link));
        open_unbound(&sess);
        link.link.lock().unwrap().is_up = true;

        assert!(sess.set_bitrate(500_000));
        assert!(!sess.is_open());
        assert!(!link.state().is_up);

        // opening again brings the link back up at the new bitrate
        assert!(matches!(sess.try_open(), Err(Error::Socket { .. })));
        assert!(link.state().is_up);
        assert_eq!(Some(500_000), link.state().bitrate);
    }

    #[test]
    fn test_poll_after_close() {
        let sess = session(Arc::new(FakeLink::new(NO_IFACE, "can")));
        open_unbound(&sess);
        assert!(sess.is_open());

        sess.close();
        assert!(!sess.is_open());
        assert!(!sess.poll(|_| ()));
    }

    #[test]
    fn test_close_stops_a_starting_poll() {
        let sess = Arc::new(session(Arc::new(FakeLink::new(NO_IFACE, "can"))));

        for _ in 0..50 {
            open_unbound(&sess);

            let (done_tx, done_rx) = mpsc::channel();
            let poller = Arc::clone(&sess);
            thread::spawn(move || {
                let _ = done_tx.send(poller.poll(|_| ()));
            });
            sess.close();

            // whether the loop started before or after the close, it ends
            assert!(done_rx.recv_timeout(Duration::from_secs(1)).is_ok());
        }
    }

    #[test]
    fn test_failed_bitrate_change() {
        let link = Arc::new(FakeLink::failing_bitrate(NO_IFACE, -libc::EBUSY));
        let sess = session(Arc::clone(&link));

        sess.ingest(&error_frame(ErrorClass::BUS_OFF, [0; 8]));
        assert!(!sess.set_bitrate(500_000));
        assert_eq!(250_000, sess.bitrate());
        assert!(sess.is_bus_off());
    }

    #[test]
    fn test_bus_load_resets_window() {
        let sess = session(Arc::new(FakeLink::new(NO_IFACE, "can")));
        assert_eq!(0, sess.bus_load());

        let frame = WireFrame::encode(0x123, false, 8, &[0; 8]).unwrap();
        sess.ingest(&frame);
        assert_eq!(1, sess.statistics().frame_count);

        assert!(sess.bus_load() <= 100);
        assert_eq!(0, sess.statistics().frame_count);
    }

    #[test]
    fn test_drop_brings_link_down() {
        let link = Arc::new(FakeLink::new(NO_IFACE, "can"));
        link.link.lock().unwrap().is_up = true;

        drop(session(Arc::clone(&link)));
        assert!(!link.state().is_up);
        assert_eq!(vec!["admin down"], link.calls());

        let link = Arc::new(FakeLink::new(NO_IFACE, "can"));
        link.link.lock().unwrap().is_up = true;
        let config = SessionConfig::default().with_link_down_on_drop(false);
        drop(Session::with_link(NO_IFACE, config, Arc::clone(&link)));
        assert!(link.state().is_up);
    }
}
