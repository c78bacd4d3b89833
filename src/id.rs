// candrv/src/id.rs
//
// CANbus identifiers and the SocketCAN ID word.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CANbus identifiers and the composite SocketCAN ID word.
//!
//! The kernel packs the 11 or 29-bit identifier together with three flag
//! bits (extended format, remote request, error frame) into a single
//! 32-bit `canid_t`.

use crate::{Error, Result};
use bitflags::bitflags;
use embedded_can::{ExtendedId, Id, StandardId};
use libc::canid_t;

pub use libc::{CAN_EFF_FLAG, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_ERR_MASK, CAN_RTR_FLAG, CAN_SFF_MASK};

bitflags! {
    /// Bit flags in the composite SocketCAN ID word.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct IdFlags: canid_t {
        /// Indicates frame uses a 29-bit extended ID
        const EFF = CAN_EFF_FLAG;
        /// Indicates a remote request frame.
        const RTR = CAN_RTR_FLAG;
        /// Indicates an error frame.
        const ERR = CAN_ERR_FLAG;
    }
}

/// Gets the identifier mask for the frame format.
#[inline]
pub fn id_mask(extended: bool) -> canid_t {
    if extended {
        CAN_EFF_MASK
    } else {
        CAN_SFF_MASK
    }
}

/// Builds the composite ID word for a data frame.
///
/// The identifier must fit in 11 bits for a standard frame or 29 bits for
/// an extended one. The EFF flag is set for extended frames.
pub fn id_word(id: u32, extended: bool) -> Result<canid_t> {
    if id & !id_mask(extended) != 0 {
        return Err(Error::InvalidId(id));
    }
    Ok(if extended { id | CAN_EFF_FLAG } else { id })
}

/// Gets the flag bits from an ID word.
#[inline]
pub fn id_flags(word: canid_t) -> IdFlags {
    IdFlags::from_bits_truncate(word)
}

/// Gets the bare identifier out of an ID word, masked to the width
/// indicated by its EFF flag.
#[inline]
pub fn raw_id(word: canid_t) -> u32 {
    word & id_mask(id_flags(word).contains(IdFlags::EFF))
}

/// Converts the identifier parts into an embedded-hal `Id`.
pub fn hal_id(id: u32, extended: bool) -> Option<Id> {
    if extended {
        ExtendedId::new(id).map(Id::Extended)
    } else {
        u16::try_from(id)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    }
}

/// Splits an embedded-hal `Id` into the raw identifier and extended flag.
pub fn id_parts(id: impl Into<Id>) -> (u32, bool) {
    match id.into() {
        Id::Standard(id) => (id.as_raw() as u32, false),
        Id::Extended(id) => (id.as_raw(), true),
    }
}

/////////////////////////////////////////////////////////////////////////////
