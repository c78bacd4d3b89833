// candrv/src/lib.rs
//
// The main lib file for the Linux SocketCAN interface driver.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! SocketCAN interface driver.
//!
//! The Linux kernel exposes CAN controllers as network interfaces
//! (see <https://www.kernel.org/doc/Documentation/networking/can.txt>).
//! This crate owns the lifecycle of one such interface on behalf of a
//! higher protocol layer:
//!
//! - It configures the link through the kernel's routing netlink channel
//!   (admin up/down, bitrate, transmit queue length).
//! - It opens a raw CAN socket bound to the interface, with every bus error
//!   class reported back as an error frame.
//! - It sends and receives classic CAN 2.0 frames, decoding error frames
//!   into a human-readable [`ErrorReport`].
//! - It tracks bus health (consecutive transmit failures and a latched
//!   bus-off condition) and a rolling bus-load statistic.
//!
//! The entry point is [`Session`]. Frames can be pulled synchronously with
//! [`Session::receive`] or delivered to a closure by [`Session::poll`],
//! which is meant to run on a dedicated thread:
//!
//! ```no_run
//! use candrv::Session;
//! use std::{sync::Arc, thread};
//!
//! let session = Arc::new(Session::new("can0", 250_000));
//! assert!(session.open());
//!
//! let rx = Arc::clone(&session);
//! let poller = thread::spawn(move || {
//!     rx.poll(|frame| println!("{:X}", frame));
//! });
//!
//! session.send(0x123, false, 4, &[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0]);
//! println!("bus load: {}%", session.bus_load());
//!
//! session.close();
//! poller.join().unwrap();
//! ```
//!
//! For wiring a session into a protocol stack that polls for frames on its
//! own schedule, see [`CanDriver`], which runs the poll loop in the
//! background and queues the received frames.

// clippy: do not warn about things like "SocketCAN" inside the docs
#![allow(clippy::doc_markdown)]
#![warn(missing_docs)]

use std::{io, mem, slice};

pub mod addr;
pub use addr::CanAddr;

pub mod config;
pub use config::SessionConfig;

pub mod driver;
pub use driver::{CanDriver, RxQueue};

pub mod errors;
pub use errors::{
    ControllerStatus, ErrorClass, ErrorReport, Location, ProtocolViolation, TransceiverFault,
    ViolationType,
};

pub mod frame;
pub use frame::{Decoded, FrameDescriptor, FrameFormat, WireFrame};

pub mod health;
pub use health::{BusHealth, BusStatistics};

pub mod id;
pub use id::IdFlags;

pub mod link;
pub use link::{LinkControl, LinkRef, NetlinkLink};

pub mod nl;
pub use nl::CanInterface;

mod poll;

pub mod session;
pub use session::Session;

pub mod socket;
pub use socket::{FrameSocket, RawRead, SocketOptions};

/////////////////////////////////////////////////////////////////////////////
// Errors

/// Failures reported by the driver.
///
/// Bus faults decoded from error frames are not part of this type; they are
/// surfaced as [`ErrorReport`] values and folded into the session's health
/// state instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No link with this name exists in the kernel link table.
    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),
    /// The link exists but is not a CAN link, so CAN parameters don't apply.
    #[error("interface '{0}' is not a CAN link")]
    NotCanLink(String),
    /// The kernel rejected a link change request.
    #[error("{op} rejected by the kernel (code {code})")]
    Netlink {
        /// The operation that was attempted
        op: &'static str,
        /// The numeric (negative errno) code returned by the kernel
        code: i32,
    },
    /// The CAN socket could not be allocated, bound or configured.
    #[error("socket {op} failed: {source}")]
    Socket {
        /// The step of the socket setup that failed
        op: &'static str,
        /// The underlying OS error
        #[source]
        source: io::Error,
    },
    /// The session is closed.
    #[error("the CAN socket is not open")]
    NotOpen,
    /// A frame was given more payload than classic CAN allows.
    #[error("invalid frame length {0} (max 8)")]
    InvalidLength(usize),
    /// An identifier does not fit in the requested 11 or 29 bits.
    #[error("identifier {0:#X} does not fit the frame format")]
    InvalidId(u32),
    /// Sending is refused while the bus is considered off.
    #[error("the bus is off")]
    BusOff,
    /// The kernel refused to queue a frame for transmission.
    #[error("transmit failed: {0}")]
    Transmit(#[source] io::Error),
    /// Reading from the socket failed.
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),
    /// A read returned fewer bytes than a whole frame.
    #[error("short read of {0} bytes")]
    ShortRead(usize),
    /// A textual frame could not be parsed.
    #[error("invalid frame text: {0}")]
    Parse(String),
}

impl Error {
    /// Gets the numeric OS or kernel code carried by the failure, if any.
    pub fn os_code(&self) -> Option<i32> {
        use Error::*;
        match self {
            Netlink { code, .. } => Some(*code),
            Socket { source, .. } | Transmit(source) | Receive(source) => source.raw_os_error(),
            _ => None,
        }
    }

    /// Determines if this is a transmit failure caused by the kernel or the
    /// controller running out of buffer space.
    pub fn is_buffer_exhaustion(&self) -> bool {
        match self {
            Error::Transmit(err) => is_buffer_exhaustion(err),
            _ => false,
        }
    }
}

/// Determines if an OS error means the transmit buffers are exhausted.
pub(crate) fn is_buffer_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOBUFS) | Some(libc::EOVERFLOW))
}

/// A result type for the driver.
pub type Result<T> = std::result::Result<T, Error>;

/////////////////////////////////////////////////////////////////////////////
// Helper functions

/// Gets a byte slice for any sized variable.
///
/// Note that this should normally be unsafe, but since we're only
/// using it internally for types sent to/from the OS, it's OK.
pub(crate) fn as_bytes<T: Sized>(val: &T) -> &[u8] {
    let sz = mem::size_of::<T>();
    unsafe { slice::from_raw_parts::<'_, u8>(val as *const _ as *const u8, sz) }
}

/// Gets a mutable byte slice for any sized variable.
pub(crate) fn as_bytes_mut<T: Sized>(val: &mut T) -> &mut [u8] {
    let sz = mem::size_of::<T>();
    unsafe { slice::from_raw_parts_mut(val as *mut _ as *mut u8, sz) }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_exhaustion() {
        let err = Error::Transmit(io::Error::from_raw_os_error(libc::ENOBUFS));
        assert!(err.is_buffer_exhaustion());
        assert_eq!(Some(libc::ENOBUFS), err.os_code());

        let err = Error::Transmit(io::Error::from_raw_os_error(libc::EOVERFLOW));
        assert!(err.is_buffer_exhaustion());

        let err = Error::Transmit(io::Error::from_raw_os_error(libc::ENETDOWN));
        assert!(!err.is_buffer_exhaustion());

        let err = Error::Receive(io::Error::from_raw_os_error(libc::ENOBUFS));
        assert!(!err.is_buffer_exhaustion());
    }

    #[test]
    fn test_netlink_code() {
        let err = Error::Netlink {
            op: "set bitrate",
            code: -libc::EBUSY,
        };
        assert_eq!(Some(-libc::EBUSY), err.os_code());
        assert!(err.to_string().contains("set bitrate"));
        assert!(Error::NotOpen.os_code().is_none());
    }
}
