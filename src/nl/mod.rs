// candrv/src/nl/mod.rs
//
// Netlink access to the SocketCAN interfaces.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN Netlink access
//!
//! For SocketCAN, netlink is the primary way for a user-space application to
//! query or set the parameters of a CAN interface, such as the bitrate or
//! the admin state.
//!
//! Netlink is a socket-based mechanism, similar to Unix-domain sockets, which
//! allows a user-space program communicate with the kernel.
//!
//! The CAN netlink header file for the Linux kernel has the definition of
//! the constants and data structures that are sent back and forth to the
//! kernel over netlink. It can be found in the Linux sources here:
//!
//! <https://github.com/torvalds/linux/blob/master/include/uapi/linux/can/netlink.h?ts=4>
//!
//! The main Linux user-space client to communicate with network interfaces,
//! including CAN is _iproute2_. The CAN-specific code for it is here:
//!
//! <https://github.com/iproute2/iproute2/blob/main/ip/iplink_can.c?ts=4>
//!

use neli::{
    attr::Attribute,
    consts::{
        nl::{NlType, NlmF, NlmFFlags},
        rtnl::{Arphrd, RtAddrFamily, Rtm},
        rtnl::{Iff, IffFlags, Ifla, IflaInfo},
        socket::NlFamily,
    },
    err::NlError,
    nl::{NlPayload, Nlmsghdr},
    rtnl::{Ifinfomsg, Rtattr},
    socket::NlSocketHandle,
    types::{Buffer, RtBuffer},
    ToBytes,
};
use nix::{self, net::if_::if_nametoindex, unistd};
use std::{
    ffi::CStr,
    fmt::Debug,
    os::raw::{c_int, c_uint},
};

/// Low-level Netlink CAN struct bindings.
mod rt;

pub use rt::IflaCan;

/// A result for Netlink errors.
pub type NlResult<T> = Result<T, NlError>;

/// A Netlink error from an info query
pub type NlInfoError = NlError<Rtm, Ifinfomsg>;

/// CAN bit-timing parameters
pub type CanBitTiming = rt::can_bittiming;

/// Gets the numeric code of a netlink failure.
///
/// A rejection by the kernel carries a negative errno. Failures on our side
/// of the channel are reported as `-EIO`.
pub fn nl_error_code<T, P>(err: &NlError<T, P>) -> i32 {
    match err {
        NlError::Nlmsgerr(msg) => msg.error,
        _ => -libc::EIO,
    }
}

/// The details of the interface which can be obtained with the
/// `CanInterface::details()` function.
#[derive(Debug, Default, Clone)]
pub struct InterfaceDetails {
    /// The name of the interface
    pub name: Option<String>,
    /// The index of the interface
    pub index: c_uint,
    /// Whether the interface is currently up
    pub is_up: bool,
    /// The link kind, like "can" or "vcan"
    pub kind: Option<String>,
    /// The transmit queue length
    pub tx_queue_len: Option<u32>,
    /// The bitrate, for CAN links with bit timing
    pub bitrate: Option<u32>,
}

impl InterfaceDetails {
    /// Creates a new set of interface details with the specified `index`.
    pub fn new(index: c_uint) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Fills in the details from a Linkinfo attribute.
    fn parse_link_info(&mut self, link_info: &Rtattr<Ifla, Buffer>) -> Result<(), NlInfoError> {
        for info in link_info.get_attr_handle::<IflaInfo>()?.get_attrs() {
            match info.rta_type {
                IflaInfo::Kind => {
                    self.kind = CStr::from_bytes_until_nul(info.rta_payload.as_ref())
                        .map(|s| s.to_string_lossy().into_owned())
                        .ok();
                }
                IflaInfo::Data => {
                    for attr in info.get_attr_handle::<IflaCan>()?.get_attrs() {
                        if attr.rta_type == IflaCan::BitTiming {
                            let timing = attr.get_payload_as::<CanBitTiming>()?;
                            self.bitrate = Some(timing.bitrate);
                        }
                    }
                }
                _ => (),
            }
        }
        Ok(())
    }
}

// ===== CanInterface =====

/// SocketCAN Netlink CanInterface
///
/// Controlled through the kernel's Netlink interface, CAN devices can be
/// brought up or down or configured or queried through this.
///
/// Note that it is entirely possible for another user/process to modify,
/// remove and re-add an interface while you are holding this object with a
/// reference to it.
///
/// Some actions possible on this interface require the process/user to have
/// the `CAP_NET_ADMIN` capability, like the root user does. This is
/// indicated by their documentation starting with "PRIVILEGED:".
#[allow(missing_copy_implementations)]
#[derive(Debug)]
pub struct CanInterface {
    if_index: c_uint,
}

impl CanInterface {
    /// Open a CAN interface by name.
    pub fn open(ifname: &str) -> Result<Self, nix::Error> {
        let if_index = if_nametoindex(ifname)?;
        Ok(Self::open_iface(if_index))
    }

    /// Open a CAN interface by index.
    ///
    /// Note that no checks are performed when calling this function, nor
    /// does it test to determine if the interface with the specified index
    /// actually exists.
    pub fn open_iface(if_index: u32) -> Self {
        let if_index = if_index as c_uint;
        Self { if_index }
    }

    /// Creates an `Ifinfomsg` for this CAN interface from a buffer
    fn info_msg(&self, buf: RtBuffer<Ifla, Buffer>) -> Ifinfomsg {
        Ifinfomsg::new(
            RtAddrFamily::Unspecified,
            Arphrd::Netrom,
            self.if_index as c_int,
            IffFlags::empty(),
            IffFlags::empty(),
            buf,
        )
    }

    /// Sends an info message to the kernel.
    fn send_info_msg(msg_type: Rtm, info: Ifinfomsg, additional_flags: &[NlmF]) -> NlResult<()> {
        let mut nl = Self::open_route_socket()?;

        let hdr = Nlmsghdr::new(
            None,
            msg_type,
            {
                let mut flags = NlmFFlags::new(&[NlmF::Request, NlmF::Ack]);
                for flag in additional_flags {
                    flags.set(flag);
                }
                flags
            },
            None,
            None,
            NlPayload::Payload(info),
        );
        Self::send_and_read_ack(&mut nl, hdr)
    }

    /// Sends a message down a netlink socket, and checks if an ACK was
    /// properly received.
    fn send_and_read_ack<T, P>(sock: &mut NlSocketHandle, msg: Nlmsghdr<T, P>) -> NlResult<()>
    where
        T: NlType + Debug,
        P: ToBytes + Debug,
    {
        sock.send(msg)?;

        // An error response from the kernel comes back as an Err
        if let Some(Nlmsghdr {
            nl_payload: NlPayload::Ack(_),
            ..
        }) = sock.recv()?
        {
            Ok(())
        } else {
            Err(NlError::NoAck)
        }
    }

    /// Opens a new netlink socket, bound to this process' PID.
    fn open_route_socket<T, P>() -> Result<NlSocketHandle, NlError<T, P>> {
        let pid = unistd::getpid().as_raw() as u32;

        // no multicast groups, we want no notifications
        let sock = NlSocketHandle::connect(NlFamily::Route, Some(pid), &[])?;
        Ok(sock)
    }

    /// Sends a query to the kernel and returns the response info message
    /// to the caller.
    fn query_details(&self) -> Result<Option<Nlmsghdr<Rtm, Ifinfomsg>>, NlInfoError> {
        let mut sock = Self::open_route_socket()?;

        let info = self.info_msg({
            let mut buffer = RtBuffer::new();
            buffer.push(Rtattr::new(None, Ifla::ExtMask, rt::EXT_FILTER_VF)?);
            buffer
        });

        let hdr = Nlmsghdr::new(
            None,
            Rtm::Getlink,
            NlmFFlags::new(&[NlmF::Request]),
            None,
            None,
            NlPayload::Payload(info),
        );

        sock.send(hdr)?;
        sock.recv::<'_, Rtm, Ifinfomsg>()
    }

    /// Bring down this interface.
    ///
    /// PRIVILEGED: This requires root privilege.
    ///
    pub fn bring_down(&self) -> NlResult<()> {
        let info = Ifinfomsg::down(
            RtAddrFamily::Unspecified,
            Arphrd::Netrom,
            self.if_index as c_int,
            RtBuffer::new(),
        );
        Self::send_info_msg(Rtm::Newlink, info, &[])
    }

    /// Bring up this interface
    ///
    /// PRIVILEGED: This requires root privilege.
    ///
    pub fn bring_up(&self) -> NlResult<()> {
        let info = Ifinfomsg::up(
            RtAddrFamily::Unspecified,
            Arphrd::Netrom,
            self.if_index as c_int,
            RtBuffer::new(),
        );
        Self::send_info_msg(Rtm::Newlink, info, &[])
    }

    /// Creates a virtual CAN (vcan) interface with the given name, for
    /// testing without a CAN controller.
    ///
    /// PRIVILEGED: This requires root privilege.
    ///
    pub fn create_vcan(name: &str) -> NlResult<Self> {
        if name.len() > libc::IFNAMSIZ {
            return Err(NlError::Msg("Interface name too long".into()));
        }

        let info = Ifinfomsg::new(
            RtAddrFamily::Unspecified,
            Arphrd::Netrom,
            0,
            IffFlags::empty(),
            IffFlags::empty(),
            {
                let mut buffer = RtBuffer::new();
                buffer.push(Rtattr::new(None, Ifla::Ifname, name)?);
                let mut linkinfo = Rtattr::new(None, Ifla::Linkinfo, Vec::<u8>::new())?;
                linkinfo.add_nested_attribute(&Rtattr::new(None, IflaInfo::Kind, "vcan")?)?;
                buffer.push(linkinfo);
                buffer
            },
        );
        Self::send_info_msg(Rtm::Newlink, info, &[NlmF::Create, NlmF::Excl])?;

        // the kernel picks the index, and doesn't report it back
        if_nametoindex(name)
            .map(Self::open_iface)
            .map_err(|_| NlError::Msg("Interface deleted after creation".into()))
    }

    /// Delete the interface.
    ///
    /// PRIVILEGED: This requires root privilege.
    ///
    pub fn delete(self) -> Result<(), (Self, NlError)> {
        let info = self.info_msg(RtBuffer::new());
        match Self::send_info_msg(Rtm::Dellink, info, &[]) {
            Ok(()) => Ok(()),
            Err(err) => Err((self, err)),
        }
    }

    /// Queries the current state of the interface in one round trip.
    pub fn details(&self) -> Result<InterfaceDetails, NlInfoError> {
        let msg_hdr = self.query_details()?.ok_or(NlInfoError::NoAck)?;
        let mut info = InterfaceDetails::new(self.if_index);

        if let Ok(payload) = msg_hdr.get_payload() {
            info.is_up = payload.ifi_flags.contains(&Iff::Up);

            for attr in payload.rtattrs.iter() {
                match attr.rta_type {
                    Ifla::Ifname => {
                        info.name = CStr::from_bytes_until_nul(attr.rta_payload.as_ref())
                            .map(|s| s.to_string_lossy().into_owned())
                            .ok();
                    }
                    Ifla::Txqlen => {
                        info.tx_queue_len = attr.get_payload_as::<u32>().ok();
                    }
                    Ifla::Linkinfo => info.parse_link_info(attr)?,
                    _ => (),
                }
            }
        }
        Ok(info)
    }

    /// Sets the transmit queue length of the interface.
    ///
    /// PRIVILEGED: This requires root privilege.
    ///
    pub fn set_txqlen(&self, len: u32) -> NlResult<()> {
        let info = self.info_msg({
            let mut buffer = RtBuffer::new();
            buffer.push(Rtattr::new(None, Ifla::Txqlen, &len.to_ne_bytes()[..])?);
            buffer
        });
        Self::send_info_msg(Rtm::Newlink, info, &[])
    }

    /// Set a CAN-specific parameter.
    ///
    /// This sends a netlink message down to the kernel to set an attribute
    /// in the CAN link info. The message is scoped to links of kind "can".
    ///
    /// PRIVILEGED: This requires root privilege.
    ///
    pub fn set_can_param<P>(&self, param_type: IflaCan, param: P) -> NlResult<()>
    where
        P: ToBytes + neli::Size,
    {
        let info = self.info_msg({
            let mut data = Rtattr::new(None, IflaInfo::Data, Buffer::new())?;
            data.add_nested_attribute(&Rtattr::new(None, param_type, param)?)?;

            let mut link_info = Rtattr::new(None, Ifla::Linkinfo, Buffer::new())?;
            link_info.add_nested_attribute(&Rtattr::new(None, IflaInfo::Kind, "can")?)?;
            link_info.add_nested_attribute(&data)?;

            let mut rtattrs = RtBuffer::new();
            rtattrs.push(link_info);
            rtattrs
        });
        Self::send_info_msg(Rtm::Newlink, info, &[])
    }

    /// Set the bitrate of this interface, letting the kernel compute the
    /// sample point.
    ///
    /// The bitrate can *not* be changed if the interface is UP. It is
    /// specified in Hz (bps).
    ///
    /// PRIVILEGED: This requires root privilege.
    ///
    pub fn set_bitrate(&self, bitrate: u32) -> NlResult<()> {
        self.set_can_param(
            IflaCan::BitTiming,
            CanBitTiming {
                bitrate,
                ..CanBitTiming::default()
            },
        )
    }
}

/////////////////////////////////////////////////////////////////////////////
