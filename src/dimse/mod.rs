//! DICOM message service element (DIMSE) module.
//!
//! This module provides the DIMSE vocabulary
//! (command fields, status codes, priorities),
//! the codec for the command set carried in P-Data command fragments,
//! and the request/response message model
//! dispatched by the client and server drivers.
pub mod commands;
pub mod messages;

use std::fmt::Display;

pub use commands::{CommandSet, Tag};
pub use messages::{Message, Request, RequestPayload, Response, ResponsePayload};

/// The command field codes identifying each DIMSE message type.
///
/// Response codes have bit 15 set;
/// C-CANCEL uses a single shared code.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[allow(non_camel_case_types)]
#[repr(u16)]
pub enum CommandField {
    C_STORE_RQ = 0x0001,
    C_STORE_RSP = 0x8001,
    C_GET_RQ = 0x0010,
    C_GET_RSP = 0x8010,
    C_FIND_RQ = 0x0020,
    C_FIND_RSP = 0x8020,
    C_MOVE_RQ = 0x0021,
    C_MOVE_RSP = 0x8021,
    C_ECHO_RQ = 0x0030,
    C_ECHO_RSP = 0x8030,
    N_EVENT_REPORT_RQ = 0x0100,
    N_EVENT_REPORT_RSP = 0x8100,
    N_GET_RQ = 0x0110,
    N_GET_RSP = 0x8110,
    N_SET_RQ = 0x0120,
    N_SET_RSP = 0x8120,
    N_ACTION_RQ = 0x0130,
    N_ACTION_RSP = 0x8130,
    N_CREATE_RQ = 0x0140,
    N_CREATE_RSP = 0x8140,
    N_DELETE_RQ = 0x0150,
    N_DELETE_RSP = 0x8150,
    C_CANCEL_RQ = 0x0FFF,
}

impl CommandField {
    /// Interpret a command field code.
    pub fn from_code(code: u16) -> Option<Self> {
        let field = match code {
            0x0001 => CommandField::C_STORE_RQ,
            0x8001 => CommandField::C_STORE_RSP,
            0x0010 => CommandField::C_GET_RQ,
            0x8010 => CommandField::C_GET_RSP,
            0x0020 => CommandField::C_FIND_RQ,
            0x8020 => CommandField::C_FIND_RSP,
            0x0021 => CommandField::C_MOVE_RQ,
            0x8021 => CommandField::C_MOVE_RSP,
            0x0030 => CommandField::C_ECHO_RQ,
            0x8030 => CommandField::C_ECHO_RSP,
            0x0100 => CommandField::N_EVENT_REPORT_RQ,
            0x8100 => CommandField::N_EVENT_REPORT_RSP,
            0x0110 => CommandField::N_GET_RQ,
            0x8110 => CommandField::N_GET_RSP,
            0x0120 => CommandField::N_SET_RQ,
            0x8120 => CommandField::N_SET_RSP,
            0x0130 => CommandField::N_ACTION_RQ,
            0x8130 => CommandField::N_ACTION_RSP,
            0x0140 => CommandField::N_CREATE_RQ,
            0x8140 => CommandField::N_CREATE_RSP,
            0x0150 => CommandField::N_DELETE_RQ,
            0x8150 => CommandField::N_DELETE_RSP,
            0x0FFF => CommandField::C_CANCEL_RQ,
            _ => return None,
        };
        Some(field)
    }

    /// Whether this command field identifies a response message.
    pub fn is_response(self) -> bool {
        (self as u16) & 0x8000 != 0
    }
}

/// The priority of a composite service request.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum Priority {
    Low = 0x0002,
    Medium = 0x0000,
    High = 0x0001,
}

impl Priority {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(Priority::Medium),
            0x0001 => Some(Priority::High),
            0x0002 => Some(Priority::Low),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// The value of the command data set type element
/// indicating that no data set follows the command set.
pub const NO_DATA_SET: u16 = 0x0101;

/// The value of the command data set type element
/// conventionally used when a data set follows the command set.
///
/// Any value other than [`NO_DATA_SET`] means a data set is present.
pub const DATA_SET_PRESENT: u16 = 0x0001;

/// A DIMSE status code, as carried in response messages.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Status(pub u16);

impl Status {
    /// The operation completed.
    pub const SUCCESS: Status = Status(0x0000);
    /// The operation was terminated by a C-CANCEL.
    pub const CANCEL: Status = Status(0xFE00);
    /// More responses are forthcoming.
    pub const PENDING: Status = Status(0xFF00);
    /// More responses are forthcoming;
    /// one or more optional keys were not supported.
    pub const PENDING_WITH_WARNINGS: Status = Status(0xFF01);
    /// Failure: invalid SOP instance.
    pub const INVALID_SOP_INSTANCE: Status = Status(0x0117);
    /// Failure: no such SOP class.
    pub const NO_SUCH_SOP_CLASS: Status = Status(0x0118);
    /// Failure: processing failure.
    pub const PROCESSING_FAILURE: Status = Status(0x0110);
    /// Failure: SOP class not supported.
    pub const SOP_CLASS_NOT_SUPPORTED: Status = Status(0x0122);
    /// Failure: unrecognized operation.
    pub const UNRECOGNIZED_OPERATION: Status = Status(0x0211);
    /// Failure: mistyped argument.
    pub const MISTYPED_ARGUMENT: Status = Status(0x0212);
    /// Refused: out of resources.
    pub const OUT_OF_RESOURCES: Status = Status(0xA700);
    /// Refused: move destination unknown.
    pub const MOVE_DESTINATION_UNKNOWN: Status = Status(0xA801);
    /// Failure: identifier does not match SOP class.
    pub const IDENTIFIER_DOES_NOT_MATCH_SOP_CLASS: Status = Status(0xA900);
    /// Failure: unable to process.
    pub const UNABLE_TO_PROCESS: Status = Status(0xC000);

    /// The raw status code.
    pub fn code(self) -> u16 {
        self.0
    }

    /// Classify the status code.
    pub fn category(self) -> StatusCategory {
        match self.0 {
            0x0000 => StatusCategory::Success,
            0xFF00 | 0xFF01 => StatusCategory::Pending,
            0xFE00 => StatusCategory::Cancel,
            0x0001 | 0x0107 | 0x0116 => StatusCategory::Warning,
            code if (0xB000..=0xBFFF).contains(&code) => StatusCategory::Warning,
            _ => StatusCategory::Failure,
        }
    }

    /// Whether more responses will follow for the same request.
    pub fn is_pending(self) -> bool {
        self.category() == StatusCategory::Pending
    }

    /// Whether this status resolves its request
    /// (anything but a pending status).
    pub fn is_terminal(self) -> bool {
        !self.is_pending()
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (0x{:04X})", self.category(), self.0)
    }
}

/// The broad classes of DIMSE status codes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StatusCategory {
    Success,
    Warning,
    Failure,
    Cancel,
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_field_codes_round_trip() {
        for code in [
            0x0001, 0x8001, 0x0010, 0x8010, 0x0020, 0x8020, 0x0021, 0x8021, 0x0030, 0x8030,
            0x0100, 0x8100, 0x0110, 0x8110, 0x0120, 0x8120, 0x0130, 0x8130, 0x0140, 0x8140,
            0x0150, 0x8150, 0x0FFF,
        ] {
            let field = CommandField::from_code(code).unwrap();
            assert_eq!(field as u16, code);
        }
        assert_eq!(CommandField::from_code(0x4242), None);
    }

    #[test]
    fn response_bit() {
        assert!(CommandField::C_ECHO_RSP.is_response());
        assert!(CommandField::N_GET_RSP.is_response());
        assert!(!CommandField::C_ECHO_RQ.is_response());
        assert!(!CommandField::C_CANCEL_RQ.is_response());
    }

    #[test]
    fn status_categories() {
        assert_eq!(Status::SUCCESS.category(), StatusCategory::Success);
        assert_eq!(Status::PENDING.category(), StatusCategory::Pending);
        assert_eq!(Status::PENDING_WITH_WARNINGS.category(), StatusCategory::Pending);
        assert_eq!(Status::CANCEL.category(), StatusCategory::Cancel);
        assert_eq!(Status(0xB007).category(), StatusCategory::Warning);
        assert_eq!(Status::OUT_OF_RESOURCES.category(), StatusCategory::Failure);
        assert_eq!(Status::UNABLE_TO_PROCESS.category(), StatusCategory::Failure);

        assert!(Status::PENDING.is_pending());
        assert!(!Status::PENDING.is_terminal());
        assert!(Status::CANCEL.is_terminal());
        assert!(Status::SUCCESS.is_terminal());
    }
}
