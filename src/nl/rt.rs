// candrv/src/nl/rt.rs
//
// Low-level Netlink SocketCAN data structs, constants, and bindings.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Low-level Netlink SocketCAN data structs, constants, and bindings.
//!
//! These are missing from the `libc` and `neli` Rust crates.
//!

#![allow(non_camel_case_types)]

use libc::c_uint;
use neli::{FromBytes, Size, ToBytes};

/// CAN netlink attribute types, from linux/can/netlink.h.
///
/// Currently missing from the published `neli` 0.6 releases.
#[neli::neli_enum(serialized_type = "u16")]
pub enum IflaCan {
    Unspec = 0,
    BitTiming = 1,
    BitTimingConst = 2,
    Clock = 3,
    State = 4,
}

impl neli::consts::rtnl::RtaType for IflaCan {}

/// Ask the kernel to skip the per-VF stats in a link query.
pub const EXT_FILTER_VF: c_uint = 1 << 0;

/// CAN bit-timing parameters
///
/// For further information, please read chapter "8 BIT TIMING
/// REQUIREMENTS" of the "Bosch CAN Specification version 2.0"
/// at http://www.semiconductors.bosch.de/pdf/can2spec.pdf.
///
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, FromBytes, ToBytes)]
pub struct can_bittiming {
    pub bitrate: u32,      // Bit-rate in bits/second
    pub sample_point: u32, // Sample point in one-tenth of a percent
    pub tq: u32,           // Time quanta (TQ) in nanoseconds
    pub prop_seg: u32,     // Propagation segment in TQs
    pub phase_seg1: u32,   // Phase buffer segment 1 in TQs
    pub phase_seg2: u32,   // Phase buffer segment 2 in TQs
    pub sjw: u32,          // Synchronisation jump width in TQs
    pub brp: u32,          // Bit-rate prescaler
}

impl Size for can_bittiming {
    fn unpadded_size(&self) -> usize {
        std::mem::size_of::<can_bittiming>()
    }
}
