// candrv/src/frame.rs
//
// The wire frame codec for classic CAN 2.0 frames.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN bus frames.
//!
//! At the lowest level, [libc](https://crates.io/crates/libc) defines the
//! classic CAN frame as a struct that is binary compatible with the C
//! data type sent to and from the kernel:
//! - [can_frame](https://docs.rs/libc/latest/libc/struct.can_frame.html)
//!   The Classic CAN 2.0 frame with up to 8 bytes of data.
//!
//! That is wrapped here as a [`WireFrame`]. Higher layers never see it;
//! they get the logical fields of a data frame as a [`FrameDescriptor`],
//! while error frames are turned into an [`ErrorReport`].
//!

use crate::{
    as_bytes, as_bytes_mut,
    errors::ErrorReport,
    id::{hal_id, id_flags, id_parts, id_word, raw_id, IdFlags},
    Error, Result,
};
use embedded_can::{Frame as EmbeddedFrame, Id, StandardId};
use itertools::Itertools;
use libc::{can_frame, canid_t};
use std::{fmt, mem, str::FromStr};

pub use libc::CAN_MAX_DLEN;

/// The number of bytes in a whole classic frame, as read from the socket.
pub const FRAME_SIZE: usize = mem::size_of::<can_frame>();

/// Formats a byte slice as space-separated, upper-case hex pairs.
///
/// ```
/// assert_eq!("DE AD 00", candrv::frame::hex_dump(&[0xDE, 0xAD, 0x00]));
/// ```
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes.iter().map(|v| format!("{:02X}", v)).join(" ")
}

/// The framing used to estimate the time a frame occupies the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Classic CAN 2.0
    Classic,
    /// CAN Flexible Data rate
    Fd,
}

/// Computes a worst-case number of bits a frame occupies on the wire,
/// including bit stuffing.
///
/// This is only an estimate for bus-load accounting.
pub fn worst_case_bit_length(extended: bool, len: usize, format: FrameFormat) -> u64 {
    let len = len as u64;
    match format {
        FrameFormat::Classic => (if extended { 80 } else { 55 }) + len * 10,
        FrameFormat::Fd => {
            let id_bits = if extended { 29 } else { 11 };
            let crc_bits = if len >= 16 { 21 } else { 17 };
            (1 + id_bits + crc_bits + 5 + 12 + len * 8) * 5 / 4
        }
    }
}

// ===== WireFrame =====

/// A classic CAN frame in the kernel's binary layout.
#[derive(Clone, Copy)]
pub struct WireFrame(can_frame);

impl WireFrame {
    /// Encodes the logical fields of a data frame.
    ///
    /// The extended-frame flag is set in the ID word when requested, and
    /// the first `len` bytes of `payload` are copied. Fails if `len` is
    /// more than 8, if `payload` is shorter than `len`, or if the identifier
    /// doesn't fit the frame format.
    pub fn encode(id: u32, extended: bool, len: usize, payload: &[u8]) -> Result<Self> {
        if len > CAN_MAX_DLEN || payload.len() < len {
            return Err(Error::InvalidLength(len));
        }
        let mut frame = Self::default();
        frame.0.can_id = id_word(id, extended)?;
        frame.0.can_dlc = len as u8;
        frame.0.data[..len].copy_from_slice(&payload[..len]);
        Ok(frame)
    }

    /// Gets the composite SocketCAN ID word, with EFF/RTR/ERR flags
    pub fn id_word(&self) -> canid_t {
        self.0.can_id
    }

    /// Gets the EFF/RTR/ERR flags from the ID word
    pub fn id_flags(&self) -> IdFlags {
        id_flags(self.0.can_id)
    }

    /// Determines if this is an error frame.
    pub fn is_error_frame(&self) -> bool {
        self.id_flags().contains(IdFlags::ERR)
    }

    /// The data length, clamped to the classic maximum of 8.
    pub fn len(&self) -> usize {
        (self.0.can_dlc as usize).min(CAN_MAX_DLEN)
    }

    /// Determines if the frame carries no data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole 8-byte data field.
    pub fn raw_data(&self) -> [u8; 8] {
        self.0.data
    }

    /// Decodes the frame into a data frame or an error report.
    ///
    /// The error flag is inspected first. Otherwise the identifier is masked
    /// to 29 or 11 bits, according to the extended flag.
    pub fn decode(&self) -> Decoded {
        match ErrorReport::from_wire(self) {
            Some(report) => Decoded::Error(report),
            None => {
                let extended = self.id_flags().contains(IdFlags::EFF);
                Decoded::Data(FrameDescriptor {
                    id: raw_id(self.0.can_id),
                    extended,
                    len: self.len() as u8,
                    data: self.0.data,
                })
            }
        }
    }

    /// Gets the underlying C frame.
    pub fn as_raw(&self) -> &can_frame {
        &self.0
    }

    /// Gets the frame as the bytes written to the socket.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        as_bytes(&self.0)
    }

    /// Gets the frame as a buffer to read from the socket.
    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        as_bytes_mut(&mut self.0)
    }
}

impl Default for WireFrame {
    /// The default frame has all fields and data set to zero.
    fn default() -> Self {
        Self(unsafe { mem::zeroed() })
    }
}

impl From<can_frame> for WireFrame {
    fn from(frame: can_frame) -> Self {
        Self(frame)
    }
}

impl fmt::Debug for WireFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "WireFrame {{ {:X}#{} }}",
            self.0.can_id,
            hex_dump(&self.0.data[..self.len()])
        )
    }
}

impl From<&FrameDescriptor> for WireFrame {
    fn from(frame: &FrameDescriptor) -> Self {
        let mut wire = Self::default();
        wire.0.can_id = if frame.extended {
            frame.id | IdFlags::EFF.bits()
        } else {
            frame.id
        };
        wire.0.can_dlc = frame.len;
        wire.0.data = frame.data;
        wire
    }
}

/// The result of decoding a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// A data frame
    Data(FrameDescriptor),
    /// A bus error report
    Error(ErrorReport),
}

// ===== FrameDescriptor =====

/// The logical fields of a classic CAN data frame.
///
/// The length never exceeds 8, and the identifier always fits in the 11 or
/// 29 bits implied by the extended flag.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    id: u32,
    extended: bool,
    len: u8,
    data: [u8; 8],
}

impl FrameDescriptor {
    /// Creates a data frame from its identifier and payload.
    pub fn new(id: u32, extended: bool, data: &[u8]) -> Result<Self> {
        if data.len() > CAN_MAX_DLEN {
            return Err(Error::InvalidLength(data.len()));
        }
        id_word(id, extended)?;
        let mut frame = Self {
            id,
            extended,
            len: data.len() as u8,
            data: [0; 8],
        };
        frame.data[..data.len()].copy_from_slice(data);
        Ok(frame)
    }

    /// The bare identifier, without any flags.
    pub fn raw_id(&self) -> u32 {
        self.id
    }

    /// Whether the frame uses a 29-bit identifier.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// The data length.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Determines if the frame carries no data.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid data bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// The whole payload buffer. Bytes past the length are unspecified.
    pub fn payload(&self) -> &[u8; 8] {
        &self.data
    }

    /// The worst-case number of bits the frame occupies on the wire.
    pub fn wire_bits(&self) -> u64 {
        worst_case_bit_length(self.extended, self.len(), FrameFormat::Classic)
    }
}

impl fmt::Display for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::UpperHex::fmt(self, f)
    }
}

impl fmt::UpperHex for FrameDescriptor {
    /// Formats the frame like candump: `123#DEADBEEF`
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.extended {
            write!(f, "{:08X}#", self.id)?;
        } else {
            write!(f, "{:03X}#", self.id)?;
        }
        write!(f, "{}", hex::encode_upper(self.data()))
    }
}

impl FromStr for FrameDescriptor {
    type Err = Error;

    /// Parses a frame in candump form, `<id>#<hexdata>`.
    ///
    /// The identifier is extended if it is written with eight hex digits or
    /// doesn't fit in 11 bits. Dots between data bytes are ignored.
    fn from_str(s: &str) -> Result<Self> {
        let parse_err = || Error::Parse(s.to_string());

        let (id_txt, data_txt) = s.trim().split_once('#').ok_or_else(parse_err)?;
        let id = u32::from_str_radix(id_txt, 16).map_err(|_| parse_err())?;
        let extended = id_txt.len() == 8 || id > libc::CAN_SFF_MASK;
        let data = hex::decode(data_txt.replace('.', "")).map_err(|_| parse_err())?;
        Self::new(id, extended, &data)
    }
}

impl EmbeddedFrame for FrameDescriptor {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let (id, extended) = id_parts(id);
        FrameDescriptor::new(id, extended, data).ok()
    }

    /// Remote frames are not supported.
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        self.extended
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        hal_id(self.id, self.extended).unwrap_or(Id::Standard(StandardId::ZERO))
    }

    fn dlc(&self) -> usize {
        self.len()
    }

    fn data(&self) -> &[u8] {
        FrameDescriptor::data(self)
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::ErrorClass, id::CAN_ERR_FLAG};
    use embedded_can::ExtendedId;

    const PAYLOAD: [u8; 8] = [0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04];

    #[test]
    fn test_defaults() {
        let frame = WireFrame::default();
        assert_eq!(0, frame.id_word());
        assert!(frame.id_flags().is_empty());
        assert!(frame.is_empty());
        assert_eq!(16, FRAME_SIZE);
    }

    #[test]
    fn test_encode() {
        let frame = WireFrame::encode(0x123, false, 4, &PAYLOAD).unwrap();
        assert_eq!(0x123, frame.id_word());
        assert_eq!(4, frame.len());
        assert_eq!([0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0], frame.raw_data());

        let frame = WireFrame::encode(0x1234_5678, true, 8, &PAYLOAD).unwrap();
        assert_eq!(0x1234_5678 | libc::CAN_EFF_FLAG, frame.id_word());
        assert!(frame.id_flags().contains(IdFlags::EFF));

        assert!(matches!(
            WireFrame::encode(0x123, false, 9, &[0; 9]),
            Err(Error::InvalidLength(9))
        ));
        assert!(matches!(
            WireFrame::encode(0x123, false, 4, &[0; 2]),
            Err(Error::InvalidLength(4))
        ));
        assert!(matches!(
            WireFrame::encode(0x800, false, 0, &[]),
            Err(Error::InvalidId(0x800))
        ));
    }

    #[test]
    fn test_decode_recovers_fields() {
        for extended in [false, true] {
            let id = if extended { 0x1ABC_DEF0 } else { 0x5A5 };
            for len in 0..=8 {
                let frame = WireFrame::encode(id, extended, len, &PAYLOAD).unwrap();
                let Decoded::Data(desc) = frame.decode() else {
                    panic!("expected a data frame");
                };
                assert_eq!(id, desc.raw_id());
                assert_eq!(extended, desc.is_extended());
                assert_eq!(len, desc.len());
                assert_eq!(&PAYLOAD[..len], desc.data());
            }
        }
    }

    #[test]
    fn test_decode_error_frame() {
        let mut raw: can_frame = unsafe { mem::zeroed() };
        raw.can_id = CAN_ERR_FLAG | ErrorClass::BUS_OFF.bits();
        raw.can_dlc = 8;
        let frame = WireFrame::from(raw);
        assert!(frame.is_error_frame());

        match frame.decode() {
            Decoded::Error(report) => {
                assert_eq!(ErrorClass::BUS_OFF, report.classes());
                assert!(report.is_bus_off());
            }
            Decoded::Data(_) => panic!("expected an error report"),
        }
    }

    #[test]
    fn test_decode_clamps_dlc() {
        let mut raw: can_frame = unsafe { mem::zeroed() };
        raw.can_id = 0x100;
        raw.can_dlc = 15;
        let Decoded::Data(desc) = WireFrame::from(raw).decode() else {
            panic!("expected a data frame");
        };
        assert_eq!(8, desc.len());
    }

    #[test]
    fn test_bit_length() {
        assert_eq!(95, worst_case_bit_length(false, 4, FrameFormat::Classic));
        assert_eq!(80, worst_case_bit_length(true, 0, FrameFormat::Classic));
        assert_eq!(135, worst_case_bit_length(false, 8, FrameFormat::Classic));

        // (1 + 11 + 17 + 5 + 12 + 64) * 5 / 4
        assert_eq!(137, worst_case_bit_length(false, 8, FrameFormat::Fd));

        for format in [FrameFormat::Classic, FrameFormat::Fd] {
            for extended in [false, true] {
                let lens: Vec<u64> = (0..=64)
                    .map(|len| worst_case_bit_length(extended, len, format))
                    .collect();
                assert!(lens.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn test_descriptor() {
        let frame = FrameDescriptor::new(0x123, false, &PAYLOAD[..4]).unwrap();
        assert_eq!(95, frame.wire_bits());
        assert_eq!(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0], frame.payload());

        assert!(matches!(
            FrameDescriptor::new(0x123, false, &[0; 9]),
            Err(Error::InvalidLength(9))
        ));
        assert!(FrameDescriptor::new(0x800, false, &[]).is_err());
        assert!(FrameDescriptor::new(0x800, true, &[]).is_ok());
    }

    #[test]
    fn test_wire_round_trip() {
        let desc = FrameDescriptor::new(0x1F, true, &[1, 2, 3]).unwrap();
        let wire = WireFrame::from(&desc);
        assert_eq!(Decoded::Data(desc), wire.decode());
    }

    #[test]
    fn test_hex_format() {
        let frame = FrameDescriptor::new(0x123, false, &PAYLOAD[..4]).unwrap();
        assert_eq!("123#DEADBEEF", frame.to_string());
        assert_eq!("123#DEADBEEF", format!("{:X}", frame));

        let frame = FrameDescriptor::new(0x1F, true, &[]).unwrap();
        assert_eq!("0000001F#", frame.to_string());

        assert_eq!("DE AD BE EF", hex_dump(&PAYLOAD[..4]));
        assert_eq!("", hex_dump(&[]));
    }

    #[test]
    fn test_parse() {
        let frame: FrameDescriptor = "123#DEADBEEF".parse().unwrap();
        assert_eq!(0x123, frame.raw_id());
        assert!(!frame.is_extended());
        assert_eq!(&[0xDE, 0xAD, 0xBE, 0xEF], frame.data());

        let frame: FrameDescriptor = "0000001F#01.02".parse().unwrap();
        assert!(frame.is_extended());
        assert_eq!(&[1, 2], frame.data());

        let frame: FrameDescriptor = "12345#".parse().unwrap();
        assert!(frame.is_extended());
        assert!(frame.is_empty());

        assert!(matches!("123".parse::<FrameDescriptor>(), Err(Error::Parse(_))));
        assert!("XYZ#00".parse::<FrameDescriptor>().is_err());
        assert!("123#0".parse::<FrameDescriptor>().is_err());
        assert!("123#000102030405060708".parse::<FrameDescriptor>().is_err());
    }

    #[test]
    fn test_embedded_frame() {
        let frame = <FrameDescriptor as EmbeddedFrame>::new(ExtendedId::MAX, &[1, 2]).unwrap();
        assert!(EmbeddedFrame::is_extended(&frame));
        assert_eq!(Id::Extended(ExtendedId::MAX), EmbeddedFrame::id(&frame));
        assert_eq!(2, frame.dlc());
        assert!(!frame.is_remote_frame());
        assert!(<FrameDescriptor as EmbeddedFrame>::new_remote(StandardId::MAX, 0).is_none());
    }
}
