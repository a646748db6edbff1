//! The DIMSE command set and its codec.
//!
//! Every DIMSE message starts with a command set:
//! a group 0000 data set always encoded in Implicit VR Little Endian,
//! regardless of the transfer syntax negotiated for the data set
//! that may follow it.
//! The element vocabulary is closed,
//! so this codec handles exactly the command elements
//! and leaves general attribute decoding to external data set codecs.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::{Cursor, Read};

use byteordered::byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};

use crate::dimse::NO_DATA_SET;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not read command element header at position {}", position))]
    ReadElementHeader {
        position: u64,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("could not read value of command element {}", tag))]
    ReadElementValue {
        tag: Tag,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("invalid length {} for command element {}", length, tag))]
    InvalidElementLength {
        tag: Tag,
        length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("command element {} is not valid ISO 646 text", tag))]
    InvalidText { tag: Tag, backtrace: Backtrace },

    /// missing command field element
    MissingCommandField { backtrace: Backtrace },

    #[snafu(display("missing command element {}", tag))]
    MissingElement { tag: Tag, backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A DICOM tag: group and element numbers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u16, pub u16);

impl Tag {
    /// The group number.
    pub fn group(self) -> u16 {
        self.0
    }

    /// The element number.
    pub fn element(self) -> u16 {
        self.1
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:04X},{:04X})", self.0, self.1)
    }
}

/// The command elements known to this crate.
pub mod tags {
    use super::Tag;

    pub const COMMAND_GROUP_LENGTH: Tag = Tag(0x0000, 0x0000);
    pub const AFFECTED_SOP_CLASS_UID: Tag = Tag(0x0000, 0x0002);
    pub const REQUESTED_SOP_CLASS_UID: Tag = Tag(0x0000, 0x0003);
    pub const COMMAND_FIELD: Tag = Tag(0x0000, 0x0100);
    pub const MESSAGE_ID: Tag = Tag(0x0000, 0x0110);
    pub const MESSAGE_ID_BEING_RESPONDED_TO: Tag = Tag(0x0000, 0x0120);
    pub const MOVE_DESTINATION: Tag = Tag(0x0000, 0x0600);
    pub const PRIORITY: Tag = Tag(0x0000, 0x0700);
    pub const COMMAND_DATA_SET_TYPE: Tag = Tag(0x0000, 0x0800);
    pub const STATUS: Tag = Tag(0x0000, 0x0900);
    pub const OFFENDING_ELEMENT: Tag = Tag(0x0000, 0x0901);
    pub const ERROR_COMMENT: Tag = Tag(0x0000, 0x0902);
    pub const AFFECTED_SOP_INSTANCE_UID: Tag = Tag(0x0000, 0x1000);
    pub const REQUESTED_SOP_INSTANCE_UID: Tag = Tag(0x0000, 0x1001);
    pub const EVENT_TYPE_ID: Tag = Tag(0x0000, 0x1002);
    pub const ATTRIBUTE_IDENTIFIER_LIST: Tag = Tag(0x0000, 0x1005);
    pub const ACTION_TYPE_ID: Tag = Tag(0x0000, 0x1008);
    pub const NUMBER_OF_REMAINING_SUBOPERATIONS: Tag = Tag(0x0000, 0x1020);
    pub const NUMBER_OF_COMPLETED_SUBOPERATIONS: Tag = Tag(0x0000, 0x1021);
    pub const NUMBER_OF_FAILED_SUBOPERATIONS: Tag = Tag(0x0000, 0x1022);
    pub const NUMBER_OF_WARNING_SUBOPERATIONS: Tag = Tag(0x0000, 0x1023);
    pub const MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE: Tag = Tag(0x0000, 0x1030);
    pub const MOVE_ORIGINATOR_MESSAGE_ID: Tag = Tag(0x0000, 0x1031);
}

/// The value of one command element.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum CommandValue {
    /// an unsigned 16-bit value (US)
    U16(u16),
    /// a unique identifier (UI), padded with NUL to even length on the wire
    Uid(String),
    /// a text value (AE, LO, ...), padded with space to even length on the wire
    Text(String),
    /// a list of attribute tags (AT)
    Tags(Vec<Tag>),
    /// a value preserved verbatim for elements outside the known vocabulary
    Bytes(Vec<u8>),
}

/// An in-memory command set:
/// the group 0000 elements of one DIMSE message,
/// in ascending tag order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSet {
    elements: BTreeMap<Tag, CommandValue>,
}

impl CommandSet {
    /// Create an empty command set.
    pub fn new() -> Self {
        CommandSet::default()
    }

    /// Insert or replace an element.
    pub fn put(&mut self, tag: Tag, value: CommandValue) {
        self.elements.insert(tag, value);
    }

    pub fn put_u16(&mut self, tag: Tag, value: u16) {
        self.put(tag, CommandValue::U16(value));
    }

    pub fn put_uid(&mut self, tag: Tag, value: impl Into<String>) {
        self.put(tag, CommandValue::Uid(value.into()));
    }

    pub fn put_text(&mut self, tag: Tag, value: impl Into<String>) {
        self.put(tag, CommandValue::Text(value.into()));
    }

    pub fn put_tags(&mut self, tag: Tag, value: Vec<Tag>) {
        self.put(tag, CommandValue::Tags(value));
    }

    /// Fetch an element value.
    pub fn get(&self, tag: Tag) -> Option<&CommandValue> {
        self.elements.get(&tag)
    }

    /// Fetch an unsigned 16-bit element value.
    pub fn u16_value(&self, tag: Tag) -> Option<u16> {
        match self.get(tag) {
            Some(CommandValue::U16(value)) => Some(*value),
            _ => None,
        }
    }

    /// Fetch a string element value (UID or text).
    pub fn str_value(&self, tag: Tag) -> Option<&str> {
        match self.get(tag) {
            Some(CommandValue::Uid(value)) | Some(CommandValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    /// Fetch an attribute tag list element value.
    pub fn tags_value(&self, tag: Tag) -> Option<&[Tag]> {
        match self.get(tag) {
            Some(CommandValue::Tags(value)) => Some(value),
            _ => None,
        }
    }

    /// The command field code of this message.
    pub fn command_field(&self) -> Result<u16> {
        self.u16_value(tags::COMMAND_FIELD)
            .context(MissingCommandFieldSnafu)
    }

    /// A required unsigned 16-bit element.
    pub fn required_u16(&self, tag: Tag) -> Result<u16> {
        self.u16_value(tag).context(MissingElementSnafu { tag })
    }

    /// A required string element.
    pub fn required_str(&self, tag: Tag) -> Result<&str> {
        self.str_value(tag).context(MissingElementSnafu { tag })
    }

    /// Whether a data set follows this command set.
    ///
    /// Any data set type value other than the null value means present.
    pub fn has_data_set(&self) -> bool {
        self.u16_value(tags::COMMAND_DATA_SET_TYPE)
            .map(|v| v != NO_DATA_SET)
            .unwrap_or(false)
    }

    /// Encode the command set in Implicit VR Little Endian,
    /// with the group length element recomputed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (tag, value) in &self.elements {
            if *tag == tags::COMMAND_GROUP_LENGTH {
                continue;
            }
            write_element(&mut body, *tag, value);
        }

        let mut out = Vec::with_capacity(body.len() + 12);
        // group length precedes the rest of the group
        write_element(
            &mut out,
            tags::COMMAND_GROUP_LENGTH,
            &CommandValue::Bytes((body.len() as u32).to_le_bytes().to_vec()),
        );
        out.extend(body);
        out
    }

    /// Decode a command set from its Implicit VR Little Endian form.
    pub fn from_bytes(data: &[u8]) -> Result<CommandSet> {
        let mut cursor = Cursor::new(data);
        let mut elements = BTreeMap::new();

        while cursor.position() < data.len() as u64 {
            let position = cursor.position();
            let group = cursor
                .read_u16::<LittleEndian>()
                .context(ReadElementHeaderSnafu { position })?;
            let element = cursor
                .read_u16::<LittleEndian>()
                .context(ReadElementHeaderSnafu { position })?;
            let tag = Tag(group, element);
            let length = cursor
                .read_u32::<LittleEndian>()
                .context(ReadElementHeaderSnafu { position })?;
            ensure!(
                length % 2 == 0 && length as u64 <= data.len() as u64 - cursor.position(),
                InvalidElementLengthSnafu { tag, length }
            );

            let mut value = vec![0; length as usize];
            cursor
                .read_exact(&mut value)
                .context(ReadElementValueSnafu { tag })?;

            elements.insert(tag, decode_value(tag, value)?);
        }

        Ok(CommandSet { elements })
    }
}

/// Decode an element value according to the known vocabulary.
fn decode_value(tag: Tag, value: Vec<u8>) -> Result<CommandValue> {
    use self::tags::*;

    match tag {
        COMMAND_FIELD | MESSAGE_ID | MESSAGE_ID_BEING_RESPONDED_TO | PRIORITY
        | COMMAND_DATA_SET_TYPE | STATUS | EVENT_TYPE_ID | ACTION_TYPE_ID
        | NUMBER_OF_REMAINING_SUBOPERATIONS | NUMBER_OF_COMPLETED_SUBOPERATIONS
        | NUMBER_OF_FAILED_SUBOPERATIONS | NUMBER_OF_WARNING_SUBOPERATIONS
        | MOVE_ORIGINATOR_MESSAGE_ID => {
            ensure!(
                value.len() == 2,
                InvalidElementLengthSnafu {
                    tag,
                    length: value.len() as u32
                }
            );
            Ok(CommandValue::U16(u16::from_le_bytes([value[0], value[1]])))
        }
        AFFECTED_SOP_CLASS_UID | REQUESTED_SOP_CLASS_UID | AFFECTED_SOP_INSTANCE_UID
        | REQUESTED_SOP_INSTANCE_UID => Ok(CommandValue::Uid(decode_text(tag, &value)?)),
        MOVE_DESTINATION | MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE | ERROR_COMMENT => {
            Ok(CommandValue::Text(decode_text(tag, &value)?))
        }
        ATTRIBUTE_IDENTIFIER_LIST | OFFENDING_ELEMENT => {
            ensure!(
                value.len() % 4 == 0,
                InvalidElementLengthSnafu {
                    tag,
                    length: value.len() as u32
                }
            );
            let tags = value
                .chunks_exact(4)
                .map(|chunk| {
                    Tag(
                        u16::from_le_bytes([chunk[0], chunk[1]]),
                        u16::from_le_bytes([chunk[2], chunk[3]]),
                    )
                })
                .collect();
            Ok(CommandValue::Tags(tags))
        }
        _ => Ok(CommandValue::Bytes(value)),
    }
}

fn decode_text(tag: Tag, value: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(value)
        .ok()
        .filter(|text| text.is_ascii())
        .context(InvalidTextSnafu { tag })?;
    Ok(text.trim_end_matches(['\0', ' ']).to_string())
}

/// Write one element in Implicit VR Little Endian:
/// tag (4), length (4), value (even-padded).
fn write_element(out: &mut Vec<u8>, tag: Tag, value: &CommandValue) {
    let bytes = match value {
        CommandValue::U16(v) => v.to_le_bytes().to_vec(),
        CommandValue::Uid(text) => padded_bytes(text, 0x00),
        CommandValue::Text(text) => padded_bytes(text, b' '),
        CommandValue::Tags(list) => {
            let mut bytes = Vec::with_capacity(list.len() * 4);
            for tag in list {
                bytes.extend(tag.group().to_le_bytes());
                bytes.extend(tag.element().to_le_bytes());
            }
            bytes
        }
        CommandValue::Bytes(bytes) => bytes.clone(),
    };

    let _ = out.write_u16::<LittleEndian>(tag.group());
    let _ = out.write_u16::<LittleEndian>(tag.element());
    let _ = out.write_u32::<LittleEndian>(bytes.len() as u32);
    out.extend(bytes);
}

/// Pad string bytes to even length with the given fill byte.
fn padded_bytes(text: &str, pad: u8) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    if bytes.len() % 2 != 0 {
        bytes.push(pad);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimse::{CommandField, DATA_SET_PRESENT};
    use crate::uids;

    fn echo_rq() -> CommandSet {
        let mut cs = CommandSet::new();
        cs.put_uid(tags::AFFECTED_SOP_CLASS_UID, uids::VERIFICATION);
        cs.put_u16(tags::COMMAND_FIELD, CommandField::C_ECHO_RQ as u16);
        cs.put_u16(tags::MESSAGE_ID, 7);
        cs.put_u16(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET);
        cs
    }

    #[test]
    fn encode_decode_round_trip() {
        let cs = echo_rq();
        let bytes = cs.to_bytes();
        let decoded = CommandSet::from_bytes(&bytes).unwrap();

        assert_eq!(
            decoded.command_field().unwrap(),
            CommandField::C_ECHO_RQ as u16
        );
        assert_eq!(decoded.u16_value(tags::MESSAGE_ID), Some(7));
        assert_eq!(
            decoded.str_value(tags::AFFECTED_SOP_CLASS_UID),
            Some(uids::VERIFICATION)
        );
        assert!(!decoded.has_data_set());
    }

    #[test]
    fn group_length_accounts_for_all_elements() {
        let bytes = echo_rq().to_bytes();
        // tag (4) + length (4) + value (4)
        let group_length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(group_length as usize, bytes.len() - 12);
    }

    #[test]
    fn uid_values_are_nul_padded() {
        let mut cs = CommandSet::new();
        // odd length UID
        cs.put_uid(tags::AFFECTED_SOP_CLASS_UID, "1.2.3");
        let bytes = cs.to_bytes();
        assert_eq!(bytes.len() % 2, 0);
        assert_eq!(bytes[bytes.len() - 1], 0x00);

        let decoded = CommandSet::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.str_value(tags::AFFECTED_SOP_CLASS_UID), Some("1.2.3"));
    }

    #[test]
    fn attribute_identifier_list_round_trip() {
        let mut cs = CommandSet::new();
        cs.put_u16(tags::COMMAND_FIELD, CommandField::N_GET_RQ as u16);
        cs.put_tags(
            tags::ATTRIBUTE_IDENTIFIER_LIST,
            vec![Tag(0x0010, 0x0010), Tag(0x0010, 0x0020)],
        );
        cs.put_u16(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET);

        let decoded = CommandSet::from_bytes(&cs.to_bytes()).unwrap();
        assert_eq!(
            decoded.tags_value(tags::ATTRIBUTE_IDENTIFIER_LIST),
            Some(&[Tag(0x0010, 0x0010), Tag(0x0010, 0x0020)][..])
        );
    }

    #[test]
    fn data_set_type_flags_presence() {
        let mut cs = echo_rq();
        assert!(!cs.has_data_set());
        cs.put_u16(tags::COMMAND_DATA_SET_TYPE, DATA_SET_PRESENT);
        assert!(cs.has_data_set());
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = echo_rq().to_bytes();
        assert!(CommandSet::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
