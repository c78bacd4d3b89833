// candrv/src/errors.rs
//
// Decoding of CAN bus error frames.
//
// This file is part of the 'candrv' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN bus error reports.
//!
//! Most information about the errors on the CANbus are determined from an
//! error frame. To receive them, the error mask must be set on the socket
//! for the types of errors that the application would like to receive.
//!
//! See [RAW Socket Option CAN_RAW_ERR_FILTER](https://docs.kernel.org/networking/can.html#raw-socket-option-can-raw-err-filter)
//!
//! The general classes of errors are encoded in the error bits of the CAN ID
//! of an error frame, and more than one can be present at a time. Some of
//! the classes carry more detail in the data bytes of the frame:
//!
//! ```text
//! Lost Arbitration   (0x02) => data[0]
//! Controller Problem (0x04) => data[1]
//! Protocol Violation (0x08) => data[2..3]
//! Transceiver Status (0x10) => data[4]
//! ```
//!
//! All of this error information is not well documented, but can be extracted
//! from the Linux kernel header file
//! [linux/can/error.h](https://raw.githubusercontent.com/torvalds/linux/master/include/uapi/linux/can/error.h)
//!

use crate::{
    frame::WireFrame,
    id::{IdFlags, CAN_ERR_MASK},
};
use bitflags::bitflags;
use itertools::Itertools;
use libc::canid_t;
use std::fmt;

/// The detail byte value used by the kernel when no detail is available.
pub const UNSPECIFIED: u8 = 0x00;

bitflags! {
    /// The error classes carried in the ID word of an error frame.
    ///
    /// The same bits are used as the socket's error-notification mask.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ErrorClass: canid_t {
        /// TX timeout (by netdevice driver)
        const TX_TIMEOUT = 0x0000_0001;
        /// Lost arbitration, see data[0]
        const LOST_ARBITRATION = 0x0000_0002;
        /// Controller problem, see data[1]
        const CONTROLLER = 0x0000_0004;
        /// Protocol violation, see data[2..3]
        const PROTOCOL = 0x0000_0008;
        /// Transceiver status, see data[4]
        const TRANSCEIVER = 0x0000_0010;
        /// Received no ACK on transmission
        const NO_ACK = 0x0000_0020;
        /// Bus off
        const BUS_OFF = 0x0000_0040;
        /// Bus error (may flood!)
        const BUS_ERROR = 0x0000_0080;
        /// Controller restarted
        const RESTARTED = 0x0000_0100;
    }

    /// Controller error status, from data[1] of an error frame.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControllerStatus: u8 {
        /// RX buffer overflow
        const RX_OVERFLOW = 0x01;
        /// TX buffer overflow
        const TX_OVERFLOW = 0x02;
        /// Reached warning level for RX errors
        const RX_WARNING = 0x04;
        /// Reached warning level for TX errors
        const TX_WARNING = 0x08;
        /// Reached error passive status RX
        const RX_PASSIVE = 0x10;
        /// Reached error passive status TX
        const TX_PASSIVE = 0x20;
        /// Recovered to error active state
        const ACTIVE = 0x40;
    }

    /// The type of protocol violation, from data[2] of an error frame.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ViolationType: u8 {
        /// Single bit error
        const BIT = 0x01;
        /// Frame format error
        const FORM = 0x02;
        /// Bit stuffing error
        const STUFF = 0x04;
        /// Unable to send dominant bit
        const BIT0 = 0x08;
        /// Unable to send recessive bit
        const BIT1 = 0x10;
        /// Bus overload
        const OVERLOAD = 0x20;
        /// Active error announcement
        const ACTIVE = 0x40;
        /// Error occurred on transmission
        const TX = 0x80;
    }
}

/// Error classes reported by default on a session socket: all of them.
pub const ERR_MASK_DEFAULT: canid_t = ErrorClass::all().bits();

const ERROR_CLASS_NAMES: [(ErrorClass, &str); 9] = [
    (ErrorClass::TX_TIMEOUT, "TX timeout"),
    (ErrorClass::LOST_ARBITRATION, "lost arbitration"),
    (ErrorClass::CONTROLLER, "controller fault"),
    (ErrorClass::PROTOCOL, "protocol violation"),
    (ErrorClass::TRANSCEIVER, "transceiver fault"),
    (ErrorClass::NO_ACK, "no ACK on TX"),
    (ErrorClass::BUS_OFF, "bus off"),
    (ErrorClass::BUS_ERROR, "bus error"),
    (ErrorClass::RESTARTED, "controller restarted"),
];

const CONTROLLER_STATUS_NAMES: [(ControllerStatus, &str); 7] = [
    (ControllerStatus::RX_OVERFLOW, "RX buffer overflow"),
    (ControllerStatus::TX_OVERFLOW, "TX buffer overflow"),
    (ControllerStatus::RX_WARNING, "RX warning"),
    (ControllerStatus::TX_WARNING, "TX warning"),
    (ControllerStatus::RX_PASSIVE, "RX passive error"),
    (ControllerStatus::TX_PASSIVE, "TX passive error"),
    (ControllerStatus::ACTIVE, "recovered to active error"),
];

const VIOLATION_TYPE_NAMES: [(ViolationType, &str); 8] = [
    (ViolationType::BIT, "single bit error"),
    (ViolationType::FORM, "frame format error"),
    (ViolationType::STUFF, "bit stuffing error"),
    (ViolationType::BIT0, "unable to send dominant bit"),
    (ViolationType::BIT1, "unable to send recessive bit"),
    (ViolationType::OVERLOAD, "bus overload"),
    (ViolationType::ACTIVE, "active error announcement"),
    (ViolationType::TX, "TX failure"),
];

impl fmt::Display for ErrorClass {
    /// Lists the names of the classes present, comma separated.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = ERROR_CLASS_NAMES
            .iter()
            .filter(|(class, _)| self.contains(*class))
            .map(|(_, name)| name);
        write!(f, "{}", names.format(", "))
    }
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = CONTROLLER_STATUS_NAMES
            .iter()
            .filter(|(status, _)| self.contains(*status))
            .map(|(_, name)| name);
        write!(f, "{}", names.format(", "))
    }
}

// ===== Location =====

/// The location of a CANbus protocol violation.
///
/// This describes where inside a received frame (as in the field or bit)
/// an error occurred.
///
/// This is derived from `data[3]` of an error frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    /// Start of frame.
    StartOfFrame,
    /// ID bits 28-21 (SFF: 10-3)
    Id2821,
    /// ID bits 20-18 (SFF: 2-0)
    Id2018,
    /// substitute RTR (SFF: RTR)
    SubstituteRtr,
    /// extension of identifier
    IdentifierExtension,
    /// ID bits 17-13
    Id1713,
    /// ID bits 12-5
    Id1205,
    /// ID bits 4-0
    Id0400,
    /// RTR bit
    Rtr,
    /// Reserved bit 1
    Reserved1,
    /// Reserved bit 0
    Reserved0,
    /// Data length
    DataLengthCode,
    /// Data section
    DataSection,
    /// CRC sequence
    CrcSequence,
    /// CRC delimiter
    CrcDelimiter,
    /// ACK slot
    AckSlot,
    /// ACK delimiter
    AckDelimiter,
    /// End-of-frame
    EndOfFrame,
    /// Intermission (between frames)
    Intermission,
}

impl Location {
    /// Decodes the location byte of an error frame.
    ///
    /// Returns `None` for the unspecified location and for codes the kernel
    /// does not define.
    pub fn from_code(code: u8) -> Option<Self> {
        use Location::*;
        Some(match code {
            0x03 => StartOfFrame,
            0x02 => Id2821,
            0x06 => Id2018,
            0x04 => SubstituteRtr,
            0x05 => IdentifierExtension,
            0x07 => Id1713,
            0x0F => Id1205,
            0x0E => Id0400,
            0x0C => Rtr,
            0x0D => Reserved1,
            0x09 => Reserved0,
            0x0B => DataLengthCode,
            0x0A => DataSection,
            0x08 => CrcSequence,
            0x18 => CrcDelimiter,
            0x19 => AckSlot,
            0x1B => AckDelimiter,
            0x1A => EndOfFrame,
            0x12 => Intermission,
            _ => return None,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Location::*;
        let msg = match *self {
            StartOfFrame => "start of frame",
            Id2821 => "ID [28-21]",
            Id2018 => "ID [20-18]",
            SubstituteRtr => "SRTR",
            IdentifierExtension => "ID extension",
            Id1713 => "ID [17-13]",
            Id1205 => "ID [12-5]",
            Id0400 => "ID [4-0]",
            Rtr => "RTR",
            Reserved1 => "reserved 1",
            Reserved0 => "reserved 0",
            DataLengthCode => "DLC",
            DataSection => "payload",
            CrcSequence => "CRC",
            CrcDelimiter => "CRC delimiter",
            AckSlot => "ACK",
            AckDelimiter => "ACK delimiter",
            EndOfFrame => "end of frame",
            Intermission => "intermission",
        };
        f.write_str(msg)
    }
}

// ===== ProtocolViolation =====

/// The detail of a protocol violation: what went wrong, and where.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProtocolViolation {
    /// The type(s) of violation
    pub vtype: ViolationType,
    /// The raw location code, `0` if unspecified
    pub location: u8,
}

impl ProtocolViolation {
    /// Gets the decoded location, if one was specified.
    pub fn location(&self) -> Option<Location> {
        Location::from_code(self.location)
    }
}

impl fmt::Display for ProtocolViolation {
    /// Lists each violation type, each followed by the location when one
    /// was reported.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let location = match (self.location, self.location()) {
            (UNSPECIFIED, _) => String::new(),
            (_, Some(loc)) => format!(" on {}", loc),
            (code, None) => format!(" on unknown location ({:#04X})", code),
        };
        let parts = VIOLATION_TYPE_NAMES
            .iter()
            .filter(|(vtype, _)| self.vtype.contains(*vtype))
            .map(|(_, name)| format!("{}{}", name, location));
        write!(f, "{}", parts.format(", "))
    }
}

// ===== TransceiverFault =====

/// A wiring fault reported by the CAN transceiver.
///
/// This is derived from `data[4]` of an error frame. The low nibble
/// describes CAN_H and the high nibble describes CAN_L, so up to two faults
/// can be reported at once.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TransceiverFault {
    /// CAN High, no wire
    CanHighNoWire,
    /// CAN High, short to BAT
    CanHighShortToBat,
    /// CAN High, short to VCC
    CanHighShortToVcc,
    /// CAN High, short to GND
    CanHighShortToGnd,
    /// CAN Low, no wire
    CanLowNoWire,
    /// CAN Low, short to BAT
    CanLowShortToBat,
    /// CAN Low, short to VCC
    CanLowShortToVcc,
    /// CAN Low, short to GND
    CanLowShortToGnd,
    /// CAN Low short to CAN High
    CanLowShortToCanHigh,
}

const TRANSCEIVER_FAULTS: [(u8, u8, TransceiverFault); 9] = [
    (0x0F, 0x04, TransceiverFault::CanHighNoWire),
    (0x0F, 0x05, TransceiverFault::CanHighShortToBat),
    (0x0F, 0x06, TransceiverFault::CanHighShortToVcc),
    (0x0F, 0x07, TransceiverFault::CanHighShortToGnd),
    (0xF0, 0x40, TransceiverFault::CanLowNoWire),
    (0xF0, 0x50, TransceiverFault::CanLowShortToBat),
    (0xF0, 0x60, TransceiverFault::CanLowShortToVcc),
    (0xF0, 0x70, TransceiverFault::CanLowShortToGnd),
    (0xF0, 0x80, TransceiverFault::CanLowShortToCanHigh),
];

impl TransceiverFault {
    /// Decodes every fault present in the transceiver status byte.
    pub fn decode(status: u8) -> Vec<Self> {
        TRANSCEIVER_FAULTS
            .iter()
            .filter(|(mask, value, _)| status & mask == *value)
            .map(|(_, _, fault)| *fault)
            .collect()
    }
}

impl fmt::Display for TransceiverFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TransceiverFault::*;
        let msg = match *self {
            CanHighNoWire => "no wire on CAN_H",
            CanHighShortToBat => "CAN_H shorted to Vbatt",
            CanHighShortToVcc => "CAN_H shorted to Vcc",
            CanHighShortToGnd => "CAN_H shorted to ground",
            CanLowNoWire => "no wire on CAN_L",
            CanLowShortToBat => "CAN_L shorted to Vbatt",
            CanLowShortToVcc => "CAN_L shorted to Vcc",
            CanLowShortToGnd => "CAN_L shorted to ground",
            CanLowShortToCanHigh => "CAN_L shorted to CAN_H",
        };
        f.write_str(msg)
    }
}

// ===== ErrorReport =====

/// A bus error report decoded from an error frame.
///
/// This is never treated as a failure of the driver; the bus is expected to
/// produce transient errors in normal operation. The report is logged and
/// folded into the session's health state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ErrorReport {
    classes: ErrorClass,
    data: [u8; 8],
}

impl ErrorReport {
    /// Creates a report from the ID word and data bytes of an error frame.
    pub fn new(id_word: canid_t, data: [u8; 8]) -> Self {
        Self {
            classes: ErrorClass::from_bits_truncate(id_word & CAN_ERR_MASK),
            data,
        }
    }

    /// Creates a report from a wire frame, if it is an error frame.
    pub fn from_wire(frame: &WireFrame) -> Option<Self> {
        frame
            .id_flags()
            .contains(IdFlags::ERR)
            .then(|| Self::new(frame.id_word(), frame.raw_data()))
    }

    /// The error classes present in the report.
    pub fn classes(&self) -> ErrorClass {
        self.classes
    }

    /// The raw detail bytes of the error frame.
    pub fn data(&self) -> &[u8; 8] {
        &self.data
    }

    /// The bit position at which arbitration was lost, if the report has
    /// the lost-arbitration class and the position was specified.
    pub fn arbitration_bit(&self) -> Option<u8> {
        match self.data[0] {
            UNSPECIFIED => None,
            bit => self
                .classes
                .contains(ErrorClass::LOST_ARBITRATION)
                .then_some(bit),
        }
    }

    /// The controller status, if the report has the controller class and
    /// the status was specified.
    pub fn controller_status(&self) -> Option<ControllerStatus> {
        match self.data[1] {
            UNSPECIFIED => None,
            status => self
                .classes
                .contains(ErrorClass::CONTROLLER)
                .then(|| ControllerStatus::from_bits_retain(status)),
        }
    }

    /// The protocol violation detail, if the report has the protocol class
    /// and the violation type was specified.
    pub fn protocol_violation(&self) -> Option<ProtocolViolation> {
        match self.data[2] {
            UNSPECIFIED => None,
            vtype => self
                .classes
                .contains(ErrorClass::PROTOCOL)
                .then(|| ProtocolViolation {
                    vtype: ViolationType::from_bits_retain(vtype),
                    location: self.data[3],
                }),
        }
    }

    /// The transceiver faults, if the report has the transceiver class and
    /// the status was specified.
    pub fn transceiver_faults(&self) -> Option<Vec<TransceiverFault>> {
        match self.data[4] {
            UNSPECIFIED => None,
            status => self
                .classes
                .contains(ErrorClass::TRANSCEIVER)
                .then(|| TransceiverFault::decode(status)),
        }
    }

    /// Determines if the report puts the controller off the bus: either the
    /// bus-off class directly, or a controller fault reaching either
    /// error-passive level.
    pub fn is_bus_off(&self) -> bool {
        self.classes.contains(ErrorClass::BUS_OFF)
            || (self.classes.contains(ErrorClass::CONTROLLER)
                && ControllerStatus::from_bits_retain(self.data[1])
                    .intersects(ControllerStatus::TX_PASSIVE | ControllerStatus::RX_PASSIVE))
    }

    /// Composes the human-readable description of the report.
    ///
    /// The classes are listed in a fixed order, comma separated. The result
    /// only depends on the bytes of the frame.
    pub fn translate(&self) -> String {
        ERROR_CLASS_NAMES
            .iter()
            .filter(|(class, _)| self.classes.contains(*class))
            .map(|(class, name)| self.clause(*class, name))
            .join(", ")
    }

    fn clause(&self, class: ErrorClass, name: &str) -> String {
        if class == ErrorClass::LOST_ARBITRATION {
            match self.arbitration_bit() {
                Some(bit) => format!("{} on bit {}", name, bit),
                None => format!("{} on unknown bit", name),
            }
        } else if class == ErrorClass::CONTROLLER {
            match self.controller_status() {
                Some(status) => format!("{} [{}]", name, status),
                None => format!("unspecified {}", name),
            }
        } else if class == ErrorClass::PROTOCOL {
            match self.protocol_violation() {
                Some(violation) => format!("{} [{}]", name, violation),
                None => format!("unspecified {}", name),
            }
        } else if class == ErrorClass::TRANSCEIVER {
            match self.transceiver_faults() {
                Some(faults) => format!("{} [{}]", name, faults.iter().format(", ")),
                None => format!("unspecified {}", name),
            }
        } else {
            name.to_string()
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.translate())
    }
}

impl embedded_can::Error for ErrorReport {
    fn kind(&self) -> embedded_can::ErrorKind {
        use embedded_can::ErrorKind;

        let overflow = ControllerStatus::RX_OVERFLOW | ControllerStatus::TX_OVERFLOW;
        if self
            .controller_status()
            .map_or(false, |status| status.intersects(overflow))
        {
            return ErrorKind::Overrun;
        }
        if self.classes.contains(ErrorClass::NO_ACK) {
            return ErrorKind::Acknowledge;
        }
        if let Some(violation) = self.protocol_violation() {
            let vtype = violation.vtype;
            if vtype.intersects(ViolationType::BIT | ViolationType::BIT0 | ViolationType::BIT1) {
                return ErrorKind::Bit;
            }
            if vtype.contains(ViolationType::STUFF) {
                return ErrorKind::Stuff;
            }
            if vtype.contains(ViolationType::FORM) {
                return ErrorKind::Form;
            }
            if matches!(
                violation.location(),
                Some(Location::CrcSequence | Location::CrcDelimiter)
            ) {
                return ErrorKind::Crc;
            }
        }
        ErrorKind::Other
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::CAN_ERR_FLAG;
    use embedded_can::{Error as _, ErrorKind};

    fn report(classes: ErrorClass, data: [u8; 8]) -> ErrorReport {
        ErrorReport::new(CAN_ERR_FLAG | classes.bits(), data)
    }

    #[test]
    fn test_simple_classes() {
        let rpt = report(ErrorClass::TX_TIMEOUT, [0; 8]);
        assert_eq!("TX timeout", rpt.translate());

        let rpt = report(ErrorClass::NO_ACK | ErrorClass::BUS_ERROR, [0; 8]);
        assert_eq!("no ACK on TX, bus error", rpt.translate());

        let rpt = report(ErrorClass::RESTARTED | ErrorClass::BUS_OFF, [0; 8]);
        assert_eq!("bus off, controller restarted", rpt.translate());
    }

    #[test]
    fn test_lost_arbitration() {
        let rpt = report(ErrorClass::LOST_ARBITRATION, [5, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Some(5), rpt.arbitration_bit());
        assert_eq!("lost arbitration on bit 5", rpt.translate());

        let rpt = report(ErrorClass::LOST_ARBITRATION, [0; 8]);
        assert_eq!(None, rpt.arbitration_bit());
        assert_eq!("lost arbitration on unknown bit", rpt.translate());
    }

    #[test]
    fn test_controller_fault() {
        let rpt = report(ErrorClass::CONTROLLER, [0, 0x10, 0, 0, 0, 0, 0, 0]);
        assert_eq!("controller fault [RX passive error]", rpt.translate());

        let rpt = report(ErrorClass::CONTROLLER, [0, 0x03, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            "controller fault [RX buffer overflow, TX buffer overflow]",
            rpt.translate()
        );

        let rpt = report(ErrorClass::CONTROLLER, [0; 8]);
        assert_eq!(None, rpt.controller_status());
        assert_eq!("unspecified controller fault", rpt.translate());
    }

    #[test]
    fn test_protocol_violation() {
        let rpt = report(ErrorClass::PROTOCOL, [0, 0, 0x04, 0x0E, 0, 0, 0, 0]);
        let violation = rpt.protocol_violation().unwrap();
        assert_eq!(ViolationType::STUFF, violation.vtype);
        assert_eq!(Some(Location::Id0400), violation.location());
        assert_eq!("protocol violation [bit stuffing error on ID [4-0]]", rpt.translate());

        let rpt = report(ErrorClass::PROTOCOL, [0, 0, 0x03, 0x00, 0, 0, 0, 0]);
        assert_eq!(
            "protocol violation [single bit error, frame format error]",
            rpt.translate()
        );

        let rpt = report(ErrorClass::PROTOCOL, [0, 0, 0x80, 0x1F, 0, 0, 0, 0]);
        assert_eq!(
            "protocol violation [TX failure on unknown location (0x1F)]",
            rpt.translate()
        );

        let rpt = report(ErrorClass::PROTOCOL, [0; 8]);
        assert_eq!("unspecified protocol violation", rpt.translate());
    }

    #[test]
    fn test_locations() {
        let codes = [
            0x03, 0x02, 0x06, 0x04, 0x05, 0x07, 0x0F, 0x0E, 0x0C, 0x0D, 0x09, 0x0B, 0x0A, 0x08,
            0x18, 0x19, 0x1B, 0x1A, 0x12,
        ];
        let names: Vec<String> = codes
            .iter()
            .filter_map(|code| Location::from_code(*code))
            .map(|loc| loc.to_string())
            .unique()
            .collect();
        assert_eq!(19, names.len());
        assert_eq!(None, Location::from_code(UNSPECIFIED));
    }

    #[test]
    fn test_transceiver_fault() {
        let rpt = report(ErrorClass::TRANSCEIVER, [0, 0, 0, 0, 0x04, 0, 0, 0]);
        assert_eq!("transceiver fault [no wire on CAN_H]", rpt.translate());

        let rpt = report(ErrorClass::TRANSCEIVER, [0, 0, 0, 0, 0x57, 0, 0, 0]);
        assert_eq!(
            Some(vec![
                TransceiverFault::CanHighShortToGnd,
                TransceiverFault::CanLowShortToBat
            ]),
            rpt.transceiver_faults()
        );
        assert_eq!(
            "transceiver fault [CAN_H shorted to ground, CAN_L shorted to Vbatt]",
            rpt.translate()
        );

        let rpt = report(ErrorClass::TRANSCEIVER, [0; 8]);
        assert_eq!("unspecified transceiver fault", rpt.translate());
    }

    #[test]
    fn test_composed_order() {
        let rpt = report(
            ErrorClass::BUS_OFF | ErrorClass::CONTROLLER | ErrorClass::TX_TIMEOUT,
            [0, 0x20, 0, 0, 0, 0, 0, 0],
        );
        assert_eq!(
            "TX timeout, controller fault [TX passive error], bus off",
            rpt.translate()
        );
        assert_eq!(rpt.translate(), rpt.to_string());
    }

    #[test]
    fn test_detail_ignored_without_class() {
        let rpt = report(ErrorClass::NO_ACK, [7, 0x10, 0x01, 0x03, 0x04, 0, 0, 0]);
        assert_eq!(None, rpt.arbitration_bit());
        assert_eq!(None, rpt.controller_status());
        assert_eq!(None, rpt.protocol_violation());
        assert_eq!(None, rpt.transceiver_faults());
        assert_eq!("no ACK on TX", rpt.translate());
    }

    #[test]
    fn test_bus_off_condition() {
        assert!(report(ErrorClass::BUS_OFF, [0; 8]).is_bus_off());
        assert!(report(ErrorClass::CONTROLLER, [0, 0x10, 0, 0, 0, 0, 0, 0]).is_bus_off());
        assert!(report(ErrorClass::CONTROLLER, [0, 0x20, 0, 0, 0, 0, 0, 0]).is_bus_off());
        assert!(!report(ErrorClass::CONTROLLER, [0, 0x04, 0, 0, 0, 0, 0, 0]).is_bus_off());
        assert!(!report(ErrorClass::NO_ACK, [0, 0x10, 0, 0, 0, 0, 0, 0]).is_bus_off());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(ErrorKind::Acknowledge, report(ErrorClass::NO_ACK, [0; 8]).kind());
        assert_eq!(
            ErrorKind::Overrun,
            report(ErrorClass::CONTROLLER, [0, 0x01, 0, 0, 0, 0, 0, 0]).kind()
        );
        assert_eq!(
            ErrorKind::Stuff,
            report(ErrorClass::PROTOCOL, [0, 0, 0x04, 0, 0, 0, 0, 0]).kind()
        );
        assert_eq!(ErrorKind::Other, report(ErrorClass::BUS_OFF, [0; 8]).kind());
    }

    #[test]
    fn test_class_display() {
        let classes = ErrorClass::TX_TIMEOUT | ErrorClass::RESTARTED;
        assert_eq!("TX timeout, controller restarted", classes.to_string());
        assert_eq!(0x1FF, ERR_MASK_DEFAULT);
    }
}
