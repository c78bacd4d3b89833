// candrv/src/poll.rs
//
// The readiness loop that drains a session socket.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The poll loop.
//!
//! The socket is registered for read readiness with an epoll instance.
//! Each iteration waits a bounded time, so that the stop flag is observed
//! promptly, then reads one frame if the socket is ready. Wait and read
//! failures never end the loop; only the stop flag does.

use crate::{
    config::wait_millis,
    socket::{FrameSocket, RawRead},
};
use log::{debug, trace};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

const SOCKET_TOKEN: u64 = 1;

/// Runs the loop until `stop` is set, handing every read to `on_read`.
///
/// Fails only if the epoll instance can't be set up.
pub(crate) fn run<F>(
    iface: &str,
    sock: &FrameSocket,
    stop: &AtomicBool,
    wait: Duration,
    mut on_read: F,
) -> io::Result<()>
where
    F: FnMut(io::Result<RawRead>),
{
    let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
    epoll.add(sock, EpollEvent::new(EpollFlags::EPOLLIN, SOCKET_TOKEN))?;

    let wait_ms = wait_millis(wait);
    let mut events = [EpollEvent::empty(); 4];
    debug!("{}: poll loop started", iface);

    while !stop.load(Ordering::Acquire) {
        let n = match epoll.wait(&mut events, wait_ms) {
            Ok(n) => n,
            Err(err) => {
                trace!("{}: poll wait failed: {}", iface, err);
                continue;
            }
        };
        for event in &events[..n] {
            if event.data() == SOCKET_TOKEN {
                on_read(sock.read_raw());
            }
        }
    }

    if let Err(err) = epoll.delete(sock) {
        trace!("{}: unable to unregister socket: {}", iface, err);
    }
    debug!("{}: poll loop stopped", iface);
    Ok(())
}
