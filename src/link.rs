// candrv/src/link.rs
//
// Kernel link configuration of a CAN interface.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Link configuration.
//!
//! The kernel side of a CAN interface is configured through a narrow
//! capability, [`LinkControl`], which can resolve a link by name and apply
//! a raw change to its admin state, bitrate or transmit queue length. The
//! production implementation, [`NetlinkLink`], talks rtnetlink.
//!
//! The free functions in this module build the idempotent operations on top
//! of it: each one compares against the current value of the link, skips
//! the request if nothing would change, and otherwise applies a change
//! scoped to the link's index. Links are resolved fresh for every
//! operation, since interfaces can come and go at any time.

use crate::{
    nl::{nl_error_code, CanInterface},
    Error, Result,
};
use log::{debug, error, info};
use std::sync::Arc;

/// A link as last read from the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRef {
    /// The interface name
    pub name: String,
    /// The kernel index of the interface
    pub index: u32,
    /// Whether the link is administratively up
    pub is_up: bool,
    /// The link kind, like "can" or "vcan", if reported
    pub kind: Option<String>,
    /// The current bitrate, for CAN links
    pub bitrate: Option<u32>,
    /// The transmit queue length
    pub tx_queue_len: Option<u32>,
}

impl LinkRef {
    /// Determines if this is a link to a CAN controller, which has a
    /// bitrate.
    pub fn is_can(&self) -> bool {
        self.kind.as_deref() == Some("can")
    }
}

/// The raw capability to look up and change a network link.
///
/// Implementations apply exactly the requested change, without comparing
/// against the current state.
pub trait LinkControl: Send + Sync {
    /// Looks up the link with the given name.
    fn resolve(&self, name: &str) -> Result<LinkRef>;

    /// Sets the admin state of the link.
    fn change_admin_state(&self, link: &LinkRef, up: bool) -> Result<()>;

    /// Sets the bitrate of a CAN link.
    fn change_bitrate(&self, link: &LinkRef, bitrate: u32) -> Result<()>;

    /// Sets the transmit queue length of the link.
    fn change_queue_length(&self, link: &LinkRef, len: u32) -> Result<()>;
}

impl<T: LinkControl + ?Sized> LinkControl for Arc<T> {
    fn resolve(&self, name: &str) -> Result<LinkRef> {
        (**self).resolve(name)
    }

    fn change_admin_state(&self, link: &LinkRef, up: bool) -> Result<()> {
        (**self).change_admin_state(link, up)
    }

    fn change_bitrate(&self, link: &LinkRef, bitrate: u32) -> Result<()> {
        (**self).change_bitrate(link, bitrate)
    }

    fn change_queue_length(&self, link: &LinkRef, len: u32) -> Result<()> {
        (**self).change_queue_length(link, len)
    }
}

// ===== NetlinkLink =====

/// Link control through the kernel's routing netlink channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetlinkLink;

impl NetlinkLink {
    fn iface(link: &LinkRef) -> CanInterface {
        CanInterface::open_iface(link.index)
    }
}

impl LinkControl for NetlinkLink {
    fn resolve(&self, name: &str) -> Result<LinkRef> {
        let iface =
            CanInterface::open(name).map_err(|_| Error::InterfaceNotFound(name.to_string()))?;
        let details = iface.details().map_err(|err| Error::Netlink {
            op: "query link",
            code: nl_error_code(&err),
        })?;

        Ok(LinkRef {
            name: details.name.unwrap_or_else(|| name.to_string()),
            index: details.index,
            is_up: details.is_up,
            kind: details.kind,
            bitrate: details.bitrate,
            tx_queue_len: details.tx_queue_len,
        })
    }

    fn change_admin_state(&self, link: &LinkRef, up: bool) -> Result<()> {
        let iface = Self::iface(link);
        let res = if up {
            iface.bring_up()
        } else {
            iface.bring_down()
        };
        res.map_err(|err| Error::Netlink {
            op: "set admin state",
            code: nl_error_code(&err),
        })
    }

    fn change_bitrate(&self, link: &LinkRef, bitrate: u32) -> Result<()> {
        Self::iface(link)
            .set_bitrate(bitrate)
            .map_err(|err| Error::Netlink {
                op: "set bitrate",
                code: nl_error_code(&err),
            })
    }

    fn change_queue_length(&self, link: &LinkRef, len: u32) -> Result<()> {
        Self::iface(link)
            .set_txqlen(len)
            .map_err(|err| Error::Netlink {
                op: "set queue length",
                code: nl_error_code(&err),
            })
    }
}

// ===== Idempotent operations =====

fn code_of(err: &Error) -> i32 {
    err.os_code().unwrap_or(-libc::EIO)
}

/// Sets the admin state of the link, if it differs.
///
/// Returns whether a change was applied. The cached state in `link` is
/// updated on success.
pub fn set_admin_up<L>(ctl: &L, link: &mut LinkRef, up: bool) -> Result<bool>
where
    L: LinkControl + ?Sized,
{
    if link.is_up == up {
        return Ok(false);
    }
    let state = if up { "up" } else { "down" };

    match ctl.change_admin_state(link, up) {
        Ok(()) => {
            link.is_up = up;
            info!("{}: link is {}", link.name, state);
            Ok(true)
        }
        Err(err) => {
            error!(
                "{}: unable to set link {} (code {})",
                link.name,
                state,
                code_of(&err)
            );
            Err(err)
        }
    }
}

/// Sets the bitrate of a CAN link, if it differs.
///
/// Most controllers only accept this while the link is down. Fails with
/// [`Error::NotCanLink`] for links that have no bitrate.
pub fn set_bitrate<L>(ctl: &L, link: &mut LinkRef, bitrate: u32) -> Result<bool>
where
    L: LinkControl + ?Sized,
{
    if !link.is_can() {
        return Err(Error::NotCanLink(link.name.clone()));
    }
    if link.bitrate == Some(bitrate) {
        return Ok(false);
    }

    match ctl.change_bitrate(link, bitrate) {
        Ok(()) => {
            link.bitrate = Some(bitrate);
            info!("{}: bitrate set to {}", link.name, bitrate);
            Ok(true)
        }
        Err(err) => {
            error!(
                "{}: unable to set bitrate {} (code {})",
                link.name,
                bitrate,
                code_of(&err)
            );
            Err(err)
        }
    }
}

/// Sets the transmit queue length of the link, if it differs.
pub fn set_queue_length<L>(ctl: &L, link: &mut LinkRef, len: u32) -> Result<bool>
where
    L: LinkControl + ?Sized,
{
    if link.tx_queue_len == Some(len) {
        return Ok(false);
    }
    ctl.change_queue_length(link, len)?;
    link.tx_queue_len = Some(len);
    debug!("{}: queue length set to {}", link.name, len);
    Ok(true)
}

/// Brings the link down.
pub fn set_admin_down<L>(ctl: &L, link: &mut LinkRef) -> Result<bool>
where
    L: LinkControl + ?Sized,
{
    set_admin_up(ctl, link, false)
}

/// Prepares a link for use: applies the bitrate and queue length, then
/// brings it up.
///
/// Every step is attempted even if an earlier one fails, since a link that
/// is not CAN (like vcan) can still be brought up. The first failure is
/// returned.
pub fn apply<L>(ctl: &L, name: &str, bitrate: u32, queue_len: u32) -> Result<LinkRef>
where
    L: LinkControl + ?Sized,
{
    let mut link = ctl.resolve(name)?;

    let results = [
        set_bitrate(ctl, &mut link, bitrate),
        set_queue_length(ctl, &mut link, queue_len),
        set_admin_up(ctl, &mut link, true),
    ];
    for res in results {
        res?;
    }
    Ok(link)
}

/// Reconfigures a link: brings it down, then applies the bitrate and queue
/// length. Stops at the first failure.
pub fn reconfigure<L>(ctl: &L, name: &str, bitrate: u32, queue_len: u32) -> Result<LinkRef>
where
    L: LinkControl + ?Sized,
{
    let mut link = ctl.resolve(name)?;
    set_admin_down(ctl, &mut link)?;
    set_bitrate(ctl, &mut link, bitrate)?;
    set_queue_length(ctl, &mut link, queue_len)?;
    Ok(link)
}

/////////////////////////////////////////////////////////////////////////////
