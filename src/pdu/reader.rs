//! PDU decoding from its wire form.
//!
//! [`read_pdu`] consumes one PDU from a byte source.
//! It operates on buffered input:
//! when the source does not yet hold a full PDU,
//! it reports "not enough data" instead of failing,
//! so that callers can fetch more bytes and retry.
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, ErrorKind, Read};
use tracing::warn;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("invalid max PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("could not read PDU field `{}`", field))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("invalid item length {} (must be >= 2)", length))]
    InvalidItemLength { length: u32 },

    #[snafu(display("incoming PDU too large: length {}, maximum is {}", pdu_length, max_pdu_length))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("PDU contained an unexpected item {:?}", var_item))]
    UnexpectedPduVariable {
        var_item: PduVariableItem,
        backtrace: Backtrace,
    },

    /// multiple transfer syntaxes were accepted in one presentation context
    MultipleTransferSyntaxesAccepted { backtrace: Backtrace },

    /// invalid reject source or reason
    InvalidRejectSourceOrReason { backtrace: Backtrace },

    /// invalid abort source or reason
    InvalidAbortSourceOrReason { backtrace: Backtrace },

    /// invalid presentation context result reason
    InvalidPresentationContextResultReason { backtrace: Backtrace },

    /// invalid transfer syntax sub-item
    InvalidTransferSyntaxSubItem { backtrace: Backtrace },

    /// unknown presentation context sub-item
    UnknownPresentationContextSubItem { backtrace: Backtrace },

    #[snafu(display("text field `{}` is not valid ISO 646 text", field))]
    DecodeText {
        field: &'static str,
        backtrace: Backtrace,
    },

    /// missing application context name
    MissingApplicationContextName { backtrace: Backtrace },

    /// missing abstract syntax
    MissingAbstractSyntax { backtrace: Backtrace },

    /// missing transfer syntax
    MissingTransferSyntax { backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Read one PDU from a buffered byte source.
///
/// Returns `Ok(None)` when the source does not yet contain a full PDU,
/// in which case the reader position is left unspecified
/// and the caller should rewind, gather more bytes and retry.
///
/// In strict mode, PDUs longer than `max_pdu_length` are rejected;
/// otherwise they are admitted up to [`MAXIMUM_PDU_SIZE`]
/// with a warning.
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Option<Pdu>>
where
    R: Read,
{
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );

    // PDU-type (1) + reserved (1)
    let mut head = [0; 2];
    if let Err(e) = reader.read_exact(&mut head) {
        if e.kind() == ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e).context(ReadPduFieldSnafu { field: "type" });
    }
    let pdu_type = head[0];

    let pdu_length = match reader.read_u32::<BigEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context(ReadPduFieldSnafu { field: "length" }),
    };

    if strict {
        ensure!(
            pdu_length <= max_pdu_length,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length
            }
        );
    } else if pdu_length > max_pdu_length {
        ensure!(
            pdu_length <= MAXIMUM_PDU_SIZE,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: MAXIMUM_PDU_SIZE
            }
        );
        warn!(
            "Incoming PDU was too large: length {}, maximum is {}",
            pdu_length, max_pdu_length
        );
    }

    let mut bytes = vec![0; pdu_length as usize];
    if let Err(e) = reader.read_exact(&mut bytes) {
        if e.kind() == ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e).context(ReadPduFieldSnafu { field: "payload" });
    }
    let mut cursor = Cursor::new(bytes.as_slice());

    match pdu_type {
        0x01 | 0x02 => read_association_pdu(&mut cursor, pdu_type).map(Some),
        0x03 => {
            // A-ASSOCIATE-RJ: reserved (1), result (1), source (1), reason (1)
            cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Reserved" })?;
            let result = AssociationRJResult::from(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Result" })?,
            )
            .context(InvalidRejectSourceOrReasonSnafu)?;
            let source = AssociationRJSource::from(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Source" })?,
                cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Reason/Diag.",
                })?,
            )
            .context(InvalidRejectSourceOrReasonSnafu)?;

            Ok(Some(Pdu::AssociationRJ(AssociationRJ { result, source })))
        }
        0x04 => {
            // P-DATA-TF: a sequence of presentation data value items
            let mut values = vec![];
            while cursor.position() < cursor.get_ref().len() as u64 {
                // item-length (4), context id (1), message control header (1)
                let item_length = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-Length",
                })?;
                ensure!(
                    item_length >= 2,
                    InvalidItemLengthSnafu {
                        length: item_length
                    }
                );

                let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Presentation-context-ID",
                })?;

                // bit 0: command (1) or data set (0) material;
                // bit 1: last fragment of its stream
                let header = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Message Control Header",
                })?;
                let value_type = if header & 0x01 > 0 {
                    PDataValueType::Command
                } else {
                    PDataValueType::Data
                };
                let is_last = (header & 0x02) > 0;

                let data =
                    read_n(&mut cursor, (item_length - 2) as usize).context(ReadPduFieldSnafu {
                        field: "Presentation-data-value",
                    })?;

                values.push(PDataValue {
                    presentation_context_id,
                    value_type,
                    is_last,
                    data,
                })
            }
            Ok(Some(Pdu::PData { data: values }))
        }
        0x05 => Ok(Some(Pdu::ReleaseRQ)),
        0x06 => Ok(Some(Pdu::ReleaseRP)),
        0x07 => {
            // A-ABORT: reserved (2), source (1), reason (1)
            let mut reserved = [0_u8; 2];
            cursor
                .read_exact(&mut reserved)
                .context(ReadPduFieldSnafu { field: "Reserved" })?;
            let source = AbortRQSource::from(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Source" })?,
                cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Reason/Diag",
                })?,
            )
            .context(InvalidAbortSourceOrReasonSnafu)?;
            Ok(Some(Pdu::AbortRQ { source }))
        }
        _ => Ok(Some(Pdu::Unknown {
            pdu_type,
            data: bytes,
        })),
    }
}

/// Read the common body of an A-ASSOCIATE-RQ (0x01) or A-ASSOCIATE-AC (0x02).
fn read_association_pdu(cursor: &mut Cursor<&[u8]>, pdu_type: u8) -> Result<Pdu> {
    // protocol-version (2), reserved (2),
    // called AE title (16), calling AE title (16), reserved (32)
    let protocol_version = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Protocol-version",
    })?;
    cursor
        .read_u16::<BigEndian>()
        .context(ReadPduFieldSnafu { field: "Reserved" })?;

    let mut ae_bytes = [0; 16];
    cursor.read_exact(&mut ae_bytes).context(ReadPduFieldSnafu {
        field: "Called-AE-title",
    })?;
    let called_ae_title = decode_text(&ae_bytes, "Called-AE-title")?;

    let mut ae_bytes = [0; 16];
    cursor.read_exact(&mut ae_bytes).context(ReadPduFieldSnafu {
        field: "Calling-AE-title",
    })?;
    let calling_ae_title = decode_text(&ae_bytes, "Calling-AE-title")?;

    let mut reserved = [0_u8; 32];
    cursor
        .read_exact(&mut reserved)
        .context(ReadPduFieldSnafu { field: "Reserved" })?;

    let mut application_context_name: Option<String> = None;
    let mut contexts_proposed = vec![];
    let mut contexts_result = vec![];
    let mut user_variables = vec![];

    while cursor.position() < cursor.get_ref().len() as u64 {
        match read_pdu_variable(cursor)? {
            PduVariableItem::ApplicationContext(val) => {
                application_context_name = Some(val);
            }
            PduVariableItem::PresentationContextProposed(val) if pdu_type == 0x01 => {
                contexts_proposed.push(val);
            }
            PduVariableItem::PresentationContextResult(val) if pdu_type == 0x02 => {
                contexts_result.push(val);
            }
            PduVariableItem::UserVariables(val) => {
                user_variables = val;
            }
            var_item => {
                return UnexpectedPduVariableSnafu { var_item }.fail();
            }
        }
    }

    let application_context_name =
        application_context_name.context(MissingApplicationContextNameSnafu)?;

    if pdu_type == 0x01 {
        Ok(Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts: contexts_proposed,
            user_variables,
        }))
    } else {
        Ok(Pdu::AssociationAC(AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts: contexts_result,
            user_variables,
        }))
    }
}

fn read_n<R>(reader: &mut R, bytes_to_read: usize) -> std::io::Result<Vec<u8>>
where
    R: Read,
{
    let mut result = vec![0; bytes_to_read];
    reader.read_exact(&mut result)?;
    Ok(result)
}

/// Decode an ISO 646 text field, trimming padding.
fn decode_text(bytes: &[u8], field: &'static str) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .ok()
        .filter(|text| text.is_ascii())
        .context(DecodeTextSnafu { field })?;
    Ok(text.trim_end_matches(['\0', ' ']).trim_start().to_string())
}

/// Decode a UID field, trimming padding and trailing null characters.
fn decode_uid(bytes: &[u8], field: &'static str) -> Result<String> {
    decode_text(bytes, field)
}

fn read_pdu_variable(reader: &mut Cursor<&[u8]>) -> Result<PduVariableItem> {
    // item-type (1), reserved (1), item-length (2)
    let item_type = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;
    reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Reserved" })?;
    let item_length = reader.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })?;

    let bytes = read_n(reader, item_length as usize).context(ReadPduFieldSnafu {
        field: "Item data",
    })?;
    let mut cursor = Cursor::new(bytes.as_slice());

    match item_type {
        0x10 => {
            // application context item
            let val = decode_uid(&bytes, "Application-context-name")?;
            Ok(PduVariableItem::ApplicationContext(val))
        }
        0x20 => {
            // proposed presentation context item:
            // context id (1), reserved (3), abstract/transfer syntax sub-items
            let mut abstract_syntax: Option<String> = None;
            let mut transfer_syntaxes = vec![];

            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            let mut reserved = [0_u8; 3];
            cursor
                .read_exact(&mut reserved)
                .context(ReadPduFieldSnafu { field: "Reserved" })?;

            while cursor.position() < cursor.get_ref().len() as u64 {
                let sub_item_type = cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Item-type" })?;
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Reserved" })?;
                let sub_item_length =
                    cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                        field: "Item-length",
                    })?;
                let sub_item_bytes = read_n(&mut cursor, sub_item_length as usize).context(
                    ReadPduFieldSnafu {
                        field: "Sub-item data",
                    },
                )?;
                match sub_item_type {
                    0x30 => {
                        abstract_syntax =
                            Some(decode_uid(&sub_item_bytes, "Abstract-syntax-name")?);
                    }
                    0x40 => {
                        transfer_syntaxes
                            .push(decode_uid(&sub_item_bytes, "Transfer-syntax-name")?);
                    }
                    _ => {
                        return UnknownPresentationContextSubItemSnafu.fail();
                    }
                }
            }

            Ok(PduVariableItem::PresentationContextProposed(
                PresentationContextProposed {
                    id: presentation_context_id,
                    abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
                    transfer_syntaxes,
                },
            ))
        }
        0x21 => {
            // presentation context result item:
            // context id (1), reserved (1), result/reason (1), reserved (1),
            // one transfer syntax sub-item
            let mut transfer_syntax: Option<String> = None;

            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Reserved" })?;
            let reason = PresentationContextResultReason::from(cursor.read_u8().context(
                ReadPduFieldSnafu {
                    field: "Result/Reason",
                },
            )?)
            .context(InvalidPresentationContextResultReasonSnafu)?;
            cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Reserved" })?;

            while cursor.position() < cursor.get_ref().len() as u64 {
                let sub_item_type = cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Item-type" })?;
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Reserved" })?;
                let sub_item_length =
                    cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                        field: "Item-length",
                    })?;
                let sub_item_bytes = read_n(&mut cursor, sub_item_length as usize).context(
                    ReadPduFieldSnafu {
                        field: "Sub-item data",
                    },
                )?;
                match sub_item_type {
                    0x40 => {
                        ensure!(
                            transfer_syntax.is_none(),
                            MultipleTransferSyntaxesAcceptedSnafu
                        );
                        transfer_syntax =
                            Some(decode_uid(&sub_item_bytes, "Transfer-syntax-name")?);
                    }
                    _ => {
                        return InvalidTransferSyntaxSubItemSnafu.fail();
                    }
                }
            }

            Ok(PduVariableItem::PresentationContextResult(
                PresentationContextResult {
                    id: presentation_context_id,
                    reason,
                    transfer_syntax: transfer_syntax.context(MissingTransferSyntaxSnafu)?,
                },
            ))
        }
        0x50 => {
            // user information item: a sequence of user data sub-items
            let mut user_variables = vec![];

            while cursor.position() < cursor.get_ref().len() as u64 {
                let sub_item_type = cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Item-type" })?;
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Reserved" })?;
                let sub_item_length =
                    cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                        field: "Item-length",
                    })?;

                match sub_item_type {
                    0x51 => {
                        // maximum length received
                        user_variables.push(UserVariableItem::MaxLength(
                            cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                                field: "Maximum-length-received",
                            })?,
                        ));
                    }
                    0x52 => {
                        let bytes = read_n(&mut cursor, sub_item_length as usize).context(
                            ReadPduFieldSnafu {
                                field: "Implementation-class-uid",
                            },
                        )?;
                        user_variables.push(UserVariableItem::ImplementationClassUID(decode_uid(
                            &bytes,
                            "Implementation-class-uid",
                        )?));
                    }
                    0x53 => {
                        // asynchronous operations window
                        let max_operations_invoked =
                            cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                                field: "Maximum-number-operations-invoked",
                            })?;
                        let max_operations_performed =
                            cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                                field: "Maximum-number-operations-performed",
                            })?;
                        user_variables.push(UserVariableItem::AsynchronousOperationsWindow {
                            max_operations_invoked,
                            max_operations_performed,
                        });
                    }
                    0x55 => {
                        let bytes = read_n(&mut cursor, sub_item_length as usize).context(
                            ReadPduFieldSnafu {
                                field: "Implementation-version-name",
                            },
                        )?;
                        user_variables.push(UserVariableItem::ImplementationVersionName(
                            decode_text(&bytes, "Implementation-version-name")?,
                        ));
                    }
                    0x56 => {
                        // SOP class extended negotiation
                        let sop_class_uid_length =
                            cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                                field: "SOP-class-uid-length",
                            })?;
                        let uid_bytes = read_n(&mut cursor, sop_class_uid_length as usize)
                            .context(ReadPduFieldSnafu {
                                field: "SOP-class-uid",
                            })?;
                        let sop_class_uid = decode_uid(&uid_bytes, "SOP-class-uid")?;
                        let data_length = sub_item_length
                            .saturating_sub(2)
                            .saturating_sub(sop_class_uid_length);
                        let data = read_n(&mut cursor, data_length as usize).context(
                            ReadPduFieldSnafu {
                                field: "Service-class-application-information",
                            },
                        )?;
                        user_variables
                            .push(UserVariableItem::SopClassExtendedNegotiation(sop_class_uid, data));
                    }
                    0x58 => {
                        // user identity negotiation
                        let user_identity_type = cursor.read_u8().context(ReadPduFieldSnafu {
                            field: "User-Identity-type",
                        })?;
                        let positive_response_requested =
                            cursor.read_u8().context(ReadPduFieldSnafu {
                                field: "User-Identity-positive-response-requested",
                            })?;
                        let primary_field_length =
                            cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                                field: "User-Identity-primary-field-length",
                            })?;
                        let primary_field = read_n(&mut cursor, primary_field_length as usize)
                            .context(ReadPduFieldSnafu {
                                field: "User-Identity-primary-field",
                            })?;
                        // only non-zero for username and password identities
                        let secondary_field_length =
                            cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                                field: "User-Identity-secondary-field-length",
                            })?;
                        let secondary_field = read_n(&mut cursor, secondary_field_length as usize)
                            .context(ReadPduFieldSnafu {
                                field: "User-Identity-secondary-field",
                            })?;

                        match UserIdentityType::from(user_identity_type) {
                            Some(user_identity_type) => {
                                user_variables.push(UserVariableItem::UserIdentityItem(
                                    UserIdentity::new(
                                        positive_response_requested == 1,
                                        user_identity_type,
                                        primary_field,
                                        secondary_field,
                                    ),
                                ));
                            }
                            None => {
                                warn!("Unknown user identity type code {}", user_identity_type);
                            }
                        }
                    }
                    0x59 => {
                        // user identity server response
                        let server_response_length =
                            cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                                field: "User-Identity-server-response-length",
                            })?;
                        let server_response = read_n(&mut cursor, server_response_length as usize)
                            .context(ReadPduFieldSnafu {
                                field: "User-Identity-server-response",
                            })?;
                        user_variables
                            .push(UserVariableItem::UserIdentityServerResponse(server_response));
                    }
                    _ => {
                        user_variables.push(UserVariableItem::Unknown(
                            sub_item_type,
                            read_n(&mut cursor, sub_item_length as usize)
                                .context(ReadPduFieldSnafu { field: "Unknown" })?,
                        ));
                    }
                }
            }

            Ok(PduVariableItem::UserVariables(user_variables))
        }
        _ => Ok(PduVariableItem::Unknown(item_type)),
    }
}
