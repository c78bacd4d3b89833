// candrv/src/socket.rs
//
// The raw CAN socket of a session.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The raw CAN socket used to move frames to and from the bus.
//!
//! A [`FrameSocket`] only exists fully configured: it is bound to the
//! interface, has the error-notification mask installed and a short send
//! timeout. If any step of opening fails, no socket is returned.

use crate::{
    config::{wait_millis, SessionConfig},
    frame::{WireFrame, FRAME_SIZE},
    CanAddr, Error, Result,
};
use libc::{canid_t, socklen_t, AF_CAN};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use socket2::SockAddr;
use std::{
    io::{self, Read, Write},
    mem,
    net::Shutdown,
    os::{
        raw::{c_int, c_void},
        unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd},
    },
    time::Duration,
};

pub use libc::{CAN_RAW_ERR_FILTER, SOL_CAN_RAW};

/// The outcome of a single read from the socket.
#[derive(Debug, Clone, Copy)]
pub enum RawRead {
    /// A whole frame was read
    Frame(WireFrame),
    /// A partial read of this many bytes, which can't be decoded
    Short(usize),
}

/// Traits for setting CAN socket options.
pub trait SocketOptions: AsRawFd {
    /// Sets an option on the socket.
    ///
    /// The libc `setsockopt` function is set to set various options on a socket.
    /// `set_socket_option` offers a somewhat type-safe wrapper that does not
    /// require messing around with `*const c_void`s.
    ///
    /// A proper `std::io::Error` will be returned on failure.
    ///
    /// Note that the `val` parameter must be specified correctly; if an option
    /// expects an integer, it is advisable to pass in a `c_int`, not the default
    /// of `i32`.
    fn set_socket_option<T>(&self, level: c_int, name: c_int, val: &T) -> io::Result<()> {
        let ret = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                level,
                name,
                val as *const _ as *const c_void,
                mem::size_of::<T>() as socklen_t,
            )
        };

        match ret {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    /// Sets the error mask on the socket.
    ///
    /// By default no error conditions are reported as special error frames
    /// by the socket. Setting a non-empty mask of error classes causes the
    /// socket to receive notification about those conditions.
    fn set_error_filter(&self, mask: canid_t) -> io::Result<()> {
        self.set_socket_option(SOL_CAN_RAW, CAN_RAW_ERR_FILTER, &mask)
    }
}

/// A raw socket for classic CAN 2.0 frames, bound to one interface.
#[derive(Debug)]
pub struct FrameSocket {
    sock: socket2::Socket,
    ifindex: u32,
}

impl FrameSocket {
    /// Opens and configures a socket on the named interface.
    pub fn open(ifname: &str, config: &SessionConfig) -> Result<Self> {
        let addr = CanAddr::from_iface(ifname).map_err(|source| Error::Socket {
            op: "interface lookup",
            source,
        })?;
        Self::open_addr(&addr, config)
    }

    /// Opens and configures a socket on the interface at the address.
    pub fn open_addr(addr: &CanAddr, config: &SessionConfig) -> Result<Self> {
        let af_can = socket2::Domain::from(AF_CAN);
        let can_raw = socket2::Protocol::from(libc::CAN_RAW);

        let sock = socket2::Socket::new_raw(af_can, socket2::Type::RAW, Some(can_raw))
            .map_err(|source| Error::Socket { op: "open", source })?;
        sock.bind(&SockAddr::from(*addr))
            .map_err(|source| Error::Socket { op: "bind", source })?;

        let sock = Self {
            sock,
            ifindex: addr.ifindex(),
        };
        sock.set_error_filter(config.error_mask)
            .map_err(|source| Error::Socket {
                op: "set error filter",
                source,
            })?;
        sock.set_send_timeout(config.send_timeout)
            .map_err(|source| Error::Socket {
                op: "set send timeout",
                source,
            })?;
        Ok(sock)
    }

    /// The kernel index of the bound interface.
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// Sets how long a write may block before failing.
    pub fn set_send_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.sock.set_write_timeout(Some(timeout))
    }

    /// Writes one frame to the socket.
    pub fn write_frame(&self, frame: &WireFrame) -> io::Result<()> {
        (&self.sock).write_all(frame.as_bytes())
    }

    /// Blocks for one read from the socket.
    pub fn read_raw(&self) -> io::Result<RawRead> {
        let mut frame = WireFrame::default();
        match (&self.sock).read(frame.as_bytes_mut())? {
            FRAME_SIZE => Ok(RawRead::Frame(frame)),
            n => Ok(RawRead::Short(n)),
        }
    }

    /// Waits up to `wait` (at millisecond resolution, rounded up) for the
    /// socket to become readable.
    pub fn wait_readable(&self, wait: Duration) -> io::Result<bool> {
        let mut fds = [PollFd::new(self.as_fd(), PollFlags::POLLIN)];
        let n = poll(&mut fds, PollTimeout::from(wait_millis(wait)))?;
        Ok(n > 0)
    }

    /// Shuts down both directions of the socket.
    ///
    /// Raw CAN sockets don't implement this and fail with `EOPNOTSUPP`, so
    /// it does not wake a thread blocked on the socket.
    pub fn shutdown(&self) -> io::Result<()> {
        self.sock.shutdown(Shutdown::Both)
    }

    /// Wraps a socket of another family, for tests that need a pollable
    /// descriptor without a CAN interface.
    #[cfg(test)]
    pub(crate) fn from_socket(sock: socket2::Socket) -> Self {
        Self { sock, ifindex: 0 }
    }
}

impl SocketOptions for FrameSocket {}

impl AsRawFd for FrameSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }
}

impl AsFd for FrameSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.sock.as_fd()
    }
}

/////////////////////////////////////////////////////////////////////////////
