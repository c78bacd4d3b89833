// candrv/tests/session.rs
//
// Integration tests for the driver session.
//
// The `vcan_tests` require a 'vcan0' interface that is up. As root:
//
//   ip link add dev vcan0 type vcan
//   ip link set up vcan0
//

use candrv::{Error, Session, SessionConfig};

#[cfg(feature = "vcan_tests")]
use candrv::{CanDriver, FrameDescriptor};
#[cfg(feature = "vcan_tests")]
use serial_test::serial;
#[cfg(feature = "vcan_tests")]
use std::{
    sync::{mpsc, Arc},
    thread,
    time::{Duration, Instant},
};

// The virtual CAN interface to use for tests.
#[cfg(feature = "vcan_tests")]
const VCAN: &str = "vcan0";

#[cfg(feature = "vcan_tests")]
fn vcan_session() -> Session {
    let config = SessionConfig::default().with_link_down_on_drop(false);
    Session::with_config(VCAN, config)
}

#[test]
fn test_nonexistant_device() {
    let config = SessionConfig::default().with_link_down_on_drop(false);
    let session = Session::with_config("invalid", config);

    assert!(matches!(session.try_open(), Err(Error::Socket { .. })));
    assert!(!session.open());
    assert!(!session.send(0x123, false, 0, &[]));
    assert!(session.receive().is_none());
    assert!(session.close());
}

#[test]
#[cfg(feature = "vcan_tests")]
#[serial]
fn vcan_open_close() {
    let session = vcan_session();
    assert!(session.open());
    assert!(session.is_open());
    assert!(session.open());

    // nothing on the bus
    assert!(session.receive().is_none());

    assert!(session.close());
    assert!(!session.is_open());
    assert!(session.open());
}

#[test]
#[cfg(feature = "vcan_tests")]
#[serial]
fn vcan_poll_receives_frame() {
    let rx = Arc::new(vcan_session());
    let tx = vcan_session();
    assert!(rx.open());
    assert!(tx.open());

    let (frame_tx, frame_rx) = mpsc::channel();
    let poller = {
        let rx = Arc::clone(&rx);
        thread::spawn(move || {
            rx.poll(|frame| {
                let _ = frame_tx.send(frame);
            })
        })
    };

    assert!(tx.send(0x123, false, 4, &[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0]));

    let frame = frame_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(0x123, frame.raw_id());
    assert!(!frame.is_extended());
    assert_eq!(4, frame.len());
    assert_eq!(&[0xDE, 0xAD, 0xBE, 0xEF], frame.data());

    let stats = rx.statistics();
    assert_eq!(1, stats.frame_count);
    assert_eq!(95, stats.wire_bits_total);
    assert_eq!(32, stats.payload_bits_total);

    assert!(rx.bus_load() <= 100);
    assert_eq!(0, rx.statistics().wire_bits_total);

    // closing stops the loop within its bounded wait
    let start = Instant::now();
    assert!(rx.close());
    assert!(poller.join().unwrap());
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
#[cfg(feature = "vcan_tests")]
#[serial]
fn vcan_receive_frame() {
    let rx = vcan_session();
    let tx = vcan_session();
    assert!(rx.open());
    assert!(tx.open());

    assert!(tx.send(0x1ABCDEF, true, 2, &[1, 2]));

    let frame = (0..100)
        .find_map(|_| rx.receive())
        .expect("no frame received");
    assert_eq!(0x1ABCDEF, frame.raw_id());
    assert!(frame.is_extended());
    assert_eq!(&[1, 2], frame.data());
    assert!(!rx.is_bus_off());
}

#[test]
#[cfg(feature = "vcan_tests")]
#[serial]
fn vcan_driver_queue() {
    let config = SessionConfig::default().with_link_down_on_drop(false);
    let driver = CanDriver::with_session(Session::with_config(VCAN, config));

    // enabling may take the link down and up again, so open the sender after
    driver.enable(250_000).unwrap();
    let tx = vcan_session();
    assert!(tx.open());

    let frame: FrameDescriptor = "7E0#0102".parse().unwrap();
    assert!(tx.send(frame.raw_id(), false, frame.len(), frame.data()));

    let start = Instant::now();
    let received = loop {
        if let Some(received) = driver.read() {
            break received;
        }
        assert!(start.elapsed() < Duration::from_secs(1), "no frame queued");
        thread::sleep(Duration::from_millis(1));
    };
    assert_eq!(frame, received);

    driver.close();
    assert!(!driver.session().is_open());
}

#[test]
#[cfg(feature = "vcan_tests")]
#[serial]
fn vcan_driver_close_right_after_enable() {
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        let config = SessionConfig::default().with_link_down_on_drop(false);
        let driver = CanDriver::with_session(Session::with_config(VCAN, config));
        for _ in 0..20 {
            driver.enable(250_000).unwrap();
            driver.close();
        }
        let _ = done_tx.send(());
    });

    // each close has to join a poll thread that may have just started
    assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
}
