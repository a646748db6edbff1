//! PDU encoding into its wire form.
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use snafu::{Backtrace, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not write chunk of {} PDU structure: {}", name, source))]
    WriteChunk {
        /// the name of the PDU structure
        name: &'static str,
        source: WriteChunkError,
    },

    #[snafu(display("could not write field `{}`: {}", field, source))]
    WriteField {
        field: &'static str,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("text field `{}` is not valid ISO 646 text", field))]
    EncodeText {
        field: &'static str,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum WriteChunkError {
    #[snafu(display("failed to build chunk: {}", source))]
    BuildChunk {
        backtrace: Backtrace,
        source: Box<Error>,
    },
    #[snafu(display("failed to write chunk: {}", source))]
    WriteChunkData {
        backtrace: Backtrace,
        source: std::io::Error,
    },
}

/// Write a chunk whose big-endian u32 length precedes its content.
///
/// The content is built by `func` into an intermediate buffer,
/// since the length is not known until the chunk is complete.
fn write_chunk_u32<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;

    writer
        .write_u32::<BigEndian>(data.len() as u32)
        .context(WriteChunkDataSnafu)?;
    writer.write_all(&data).context(WriteChunkDataSnafu)?;
    Ok(())
}

/// Write a chunk whose big-endian u16 length precedes its content.
fn write_chunk_u16<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;

    writer
        .write_u16::<BigEndian>(data.len() as u16)
        .context(WriteChunkDataSnafu)?;
    writer.write_all(&data).context(WriteChunkDataSnafu)?;
    Ok(())
}

/// Encode an ISO 646 text field.
fn encode_text(text: &str, field: &'static str) -> Result<Vec<u8>> {
    if !text.is_ascii() {
        return EncodeTextSnafu { field }.fail();
    }
    Ok(text.as_bytes().to_vec())
}

/// Write one PDU in its wire form.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    match pdu {
        Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            writer
                .write_all(&[0x01, 0x00])
                .context(WriteFieldSnafu { field: "PDU-type" })?;

            write_chunk_u32(writer, |writer| {
                write_association_fixed_fields(
                    writer,
                    *protocol_version,
                    called_ae_title,
                    calling_ae_title,
                )?;
                write_pdu_variable_application_context_name(writer, application_context_name)?;
                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_proposed(writer, presentation_context)?;
                }
                write_pdu_variable_user_variables(writer, user_variables)?;
                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RQ",
            })?;
            Ok(())
        }
        Pdu::AssociationAC(AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            writer
                .write_all(&[0x02, 0x00])
                .context(WriteFieldSnafu { field: "PDU-type" })?;

            write_chunk_u32(writer, |writer| {
                // the AE title fields of the AC are formally reserved,
                // but echoing the RQ values is the common practice
                write_association_fixed_fields(
                    writer,
                    *protocol_version,
                    called_ae_title,
                    calling_ae_title,
                )?;
                write_pdu_variable_application_context_name(writer, application_context_name)?;
                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_result(writer, presentation_context)?;
                }
                write_pdu_variable_user_variables(writer, user_variables)?;
                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-AC",
            })?;
            Ok(())
        }
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            writer
                .write_all(&[0x03, 0x00])
                .context(WriteFieldSnafu { field: "PDU-type" })?;

            write_chunk_u32(writer, |writer| {
                // reserved (1), result (1), source (1), reason (1)
                writer
                    .write_u8(0x00)
                    .context(WriteFieldSnafu { field: "Reserved" })?;
                writer
                    .write_u8(*result as u8)
                    .context(WriteFieldSnafu { field: "Result" })?;
                let (source_code, reason_code) = reject_source_codes(source);
                writer
                    .write_u8(source_code)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason_code).context(WriteFieldSnafu {
                    field: "Reason/Diag.",
                })?;
                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RJ",
            })?;
            Ok(())
        }
        Pdu::PData { data } => {
            writer
                .write_all(&[0x04, 0x00])
                .context(WriteFieldSnafu { field: "PDU-type" })?;

            write_chunk_u32(writer, |writer| {
                for pdv in data {
                    write_chunk_u32(writer, |writer| {
                        writer
                            .write_u8(pdv.presentation_context_id)
                            .context(WriteFieldSnafu {
                                field: "Presentation-context-ID",
                            })?;

                        let mut message_header = 0x00;
                        if let PDataValueType::Command = pdv.value_type {
                            message_header |= 0x01;
                        }
                        if pdv.is_last {
                            message_header |= 0x02;
                        }
                        writer.write_u8(message_header).context(WriteFieldSnafu {
                            field: "Message Control Header",
                        })?;
                        writer.write_all(&pdv.data).context(WriteFieldSnafu {
                            field: "Presentation-data-value",
                        })?;
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "Presentation-data-value item",
                    })?;
                }
                Ok(())
            })
            .context(WriteChunkSnafu { name: "P-DATA-TF" })?;
            Ok(())
        }
        Pdu::ReleaseRQ => {
            writer
                .write_all(&[0x05, 0x00])
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_all(&[0_u8; 4])
                    .context(WriteFieldSnafu { field: "Reserved" })
            })
            .context(WriteChunkSnafu {
                name: "A-RELEASE-RQ",
            })?;
            Ok(())
        }
        Pdu::ReleaseRP => {
            writer
                .write_all(&[0x06, 0x00])
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_all(&[0_u8; 4])
                    .context(WriteFieldSnafu { field: "Reserved" })
            })
            .context(WriteChunkSnafu {
                name: "A-RELEASE-RP",
            })?;
            Ok(())
        }
        Pdu::AbortRQ { source } => {
            writer
                .write_all(&[0x07, 0x00])
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            write_chunk_u32(writer, |writer| {
                // reserved (2), source (1), reason (1)
                writer
                    .write_all(&[0x00, 0x00])
                    .context(WriteFieldSnafu { field: "Reserved" })?;
                let (source_code, reason_code) = abort_source_codes(source);
                writer
                    .write_u8(source_code)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason_code).context(WriteFieldSnafu {
                    field: "Reason/Diag",
                })?;
                Ok(())
            })
            .context(WriteChunkSnafu { name: "A-ABORT" })?;
            Ok(())
        }
        Pdu::Unknown { pdu_type, data } => {
            writer
                .write_all(&[*pdu_type, 0x00])
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            write_chunk_u32(writer, |writer| {
                writer.write_all(data).context(WriteFieldSnafu {
                    field: "Unknown data",
                })
            })
            .context(WriteChunkSnafu { name: "Unknown" })?;
            Ok(())
        }
    }
}

/// Write the fixed prefix shared by A-ASSOCIATE-RQ and A-ASSOCIATE-AC:
/// protocol-version (2), reserved (2),
/// called AE title (16), calling AE title (16), reserved (32).
fn write_association_fixed_fields(
    writer: &mut dyn Write,
    protocol_version: u16,
    called_ae_title: &str,
    calling_ae_title: &str,
) -> Result<()> {
    writer
        .write_u16::<BigEndian>(protocol_version)
        .context(WriteFieldSnafu {
            field: "Protocol-version",
        })?;
    writer
        .write_u16::<BigEndian>(0x00)
        .context(WriteFieldSnafu { field: "Reserved" })?;

    let mut ae_title_bytes = encode_text(called_ae_title, "Called-AE-title")?;
    ae_title_bytes.resize(16, b' ');
    writer.write_all(&ae_title_bytes).context(WriteFieldSnafu {
        field: "Called-AE-title",
    })?;

    let mut ae_title_bytes = encode_text(calling_ae_title, "Calling-AE-title")?;
    ae_title_bytes.resize(16, b' ');
    writer.write_all(&ae_title_bytes).context(WriteFieldSnafu {
        field: "Calling-AE-title",
    })?;

    writer
        .write_all(&[0; 32])
        .context(WriteFieldSnafu { field: "Reserved" })?;
    Ok(())
}

fn reject_source_codes(source: &AssociationRJSource) -> (u8, u8) {
    match source {
        AssociationRJSource::ServiceUser(reason) => (
            0x01,
            match reason {
                AssociationRJServiceUserReason::NoReasonGiven => 0x01,
                AssociationRJServiceUserReason::ApplicationContextNameNotSupported => 0x02,
                AssociationRJServiceUserReason::CallingAeTitleNotRecognized => 0x03,
                AssociationRJServiceUserReason::CalledAeTitleNotRecognized => 0x07,
                AssociationRJServiceUserReason::Reserved(code) => *code,
            },
        ),
        AssociationRJSource::ServiceProviderAcse(reason) => (
            0x02,
            match reason {
                AssociationRJServiceProviderAcseReason::NoReasonGiven => 0x01,
                AssociationRJServiceProviderAcseReason::ProtocolVersionNotSupported => 0x02,
            },
        ),
        AssociationRJSource::ServiceProviderPresentation(reason) => (
            0x03,
            match reason {
                AssociationRJServiceProviderPresentationReason::TemporaryCongestion => 0x01,
                AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => 0x02,
                AssociationRJServiceProviderPresentationReason::Reserved(code) => *code,
            },
        ),
    }
}

fn abort_source_codes(source: &AbortRQSource) -> (u8, u8) {
    match source {
        AbortRQSource::ServiceUser => (0x00, 0x00),
        AbortRQSource::Reserved => (0x01, 0x00),
        AbortRQSource::ServiceProvider(reason) => (
            0x02,
            match reason {
                AbortRQServiceProviderReason::ReasonNotSpecified => 0x00,
                AbortRQServiceProviderReason::UnrecognizedPdu => 0x01,
                AbortRQServiceProviderReason::UnexpectedPdu => 0x02,
                AbortRQServiceProviderReason::Reserved => 0x03,
                AbortRQServiceProviderReason::UnrecognizedPduParameter => 0x04,
                AbortRQServiceProviderReason::UnexpectedPduParameter => 0x05,
                AbortRQServiceProviderReason::InvalidPduParameter => 0x06,
            },
        ),
    }
}

fn write_pdu_variable_application_context_name(
    writer: &mut dyn Write,
    application_context_name: &str,
) -> Result<()> {
    writer
        .write_all(&[0x10, 0x00])
        .context(WriteFieldSnafu { field: "Item-type" })?;
    write_chunk_u16(writer, |writer| {
        writer
            .write_all(&encode_text(
                application_context_name,
                "Application-context-name",
            )?)
            .context(WriteFieldSnafu {
                field: "Application-context-name",
            })
    })
    .context(WriteChunkSnafu {
        name: "Application Context Item",
    })?;
    Ok(())
}

fn write_pdu_variable_presentation_context_proposed(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextProposed,
) -> Result<()> {
    writer
        .write_all(&[0x20, 0x00])
        .context(WriteFieldSnafu { field: "Item-type" })?;

    write_chunk_u16(writer, |writer| {
        // context id (1), reserved (3)
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;
        writer
            .write_all(&[0x00; 3])
            .context(WriteFieldSnafu { field: "Reserved" })?;

        // abstract syntax sub-item
        writer
            .write_all(&[0x30, 0x00])
            .context(WriteFieldSnafu { field: "Item-type" })?;
        write_chunk_u16(writer, |writer| {
            writer
                .write_all(&encode_text(
                    &presentation_context.abstract_syntax,
                    "Abstract-syntax-name",
                )?)
                .context(WriteFieldSnafu {
                    field: "Abstract-syntax-name",
                })
        })
        .context(WriteChunkSnafu {
            name: "Abstract Syntax Sub-Item",
        })?;

        // one transfer syntax sub-item per offered syntax
        for transfer_syntax in &presentation_context.transfer_syntaxes {
            writer
                .write_all(&[0x40, 0x00])
                .context(WriteFieldSnafu { field: "Item-type" })?;
            write_chunk_u16(writer, |writer| {
                writer
                    .write_all(&encode_text(transfer_syntax, "Transfer-syntax-name")?)
                    .context(WriteFieldSnafu {
                        field: "Transfer-syntax-name",
                    })
            })
            .context(WriteChunkSnafu {
                name: "Transfer Syntax Sub-Item",
            })?;
        }
        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "Presentation Context Item",
    })?;
    Ok(())
}

fn write_pdu_variable_presentation_context_result(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextResult,
) -> Result<()> {
    writer
        .write_all(&[0x21, 0x00])
        .context(WriteFieldSnafu { field: "Item-type" })?;

    write_chunk_u16(writer, |writer| {
        // context id (1), reserved (1), result/reason (1), reserved (1)
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;
        writer
            .write_u8(0x00)
            .context(WriteFieldSnafu { field: "Reserved" })?;
        writer
            .write_u8(presentation_context.reason as u8)
            .context(WriteFieldSnafu {
                field: "Result/Reason",
            })?;
        writer
            .write_u8(0x00)
            .context(WriteFieldSnafu { field: "Reserved" })?;

        // exactly one transfer syntax sub-item
        writer
            .write_all(&[0x40, 0x00])
            .context(WriteFieldSnafu { field: "Item-type" })?;
        write_chunk_u16(writer, |writer| {
            writer
                .write_all(&encode_text(
                    &presentation_context.transfer_syntax,
                    "Transfer-syntax-name",
                )?)
                .context(WriteFieldSnafu {
                    field: "Transfer-syntax-name",
                })
        })
        .context(WriteChunkSnafu {
            name: "Transfer Syntax Sub-Item",
        })?;
        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "Presentation Context Item",
    })?;
    Ok(())
}

fn write_pdu_variable_user_variables(
    writer: &mut dyn Write,
    user_variables: &[UserVariableItem],
) -> Result<()> {
    if user_variables.is_empty() {
        return Ok(());
    }

    writer
        .write_all(&[0x50, 0x00])
        .context(WriteFieldSnafu { field: "Item-type" })?;

    write_chunk_u16(writer, |writer| {
        for user_variable in user_variables {
            match user_variable {
                UserVariableItem::MaxLength(max_length) => {
                    writer
                        .write_all(&[0x51, 0x00])
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u32::<BigEndian>(*max_length)
                            .context(WriteFieldSnafu {
                                field: "Maximum-length-received",
                            })
                    })
                    .context(WriteChunkSnafu {
                        name: "Maximum-length-received",
                    })?;
                }
                UserVariableItem::ImplementationClassUID(implementation_class_uid) => {
                    writer
                        .write_all(&[0x52, 0x00])
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_all(&encode_text(
                                implementation_class_uid,
                                "Implementation-class-uid",
                            )?)
                            .context(WriteFieldSnafu {
                                field: "Implementation-class-uid",
                            })
                    })
                    .context(WriteChunkSnafu {
                        name: "Implementation-class-uid",
                    })?;
                }
                UserVariableItem::AsynchronousOperationsWindow {
                    max_operations_invoked,
                    max_operations_performed,
                } => {
                    writer
                        .write_all(&[0x53, 0x00])
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u16::<BigEndian>(*max_operations_invoked)
                            .context(WriteFieldSnafu {
                                field: "Maximum-number-operations-invoked",
                            })?;
                        writer
                            .write_u16::<BigEndian>(*max_operations_performed)
                            .context(WriteFieldSnafu {
                                field: "Maximum-number-operations-performed",
                            })
                    })
                    .context(WriteChunkSnafu {
                        name: "Asynchronous Operations Window",
                    })?;
                }
                UserVariableItem::ImplementationVersionName(implementation_version_name) => {
                    writer
                        .write_all(&[0x55, 0x00])
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_all(&encode_text(
                                implementation_version_name,
                                "Implementation-version-name",
                            )?)
                            .context(WriteFieldSnafu {
                                field: "Implementation-version-name",
                            })
                    })
                    .context(WriteChunkSnafu {
                        name: "Implementation-version-name",
                    })?;
                }
                UserVariableItem::SopClassExtendedNegotiation(sop_class_uid, data) => {
                    writer
                        .write_all(&[0x56, 0x00])
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    write_chunk_u16(writer, |writer| {
                        let uid_bytes = encode_text(sop_class_uid, "SOP-class-uid")?;
                        writer
                            .write_u16::<BigEndian>(uid_bytes.len() as u16)
                            .context(WriteFieldSnafu {
                                field: "SOP-class-uid-length",
                            })?;
                        writer.write_all(&uid_bytes).context(WriteFieldSnafu {
                            field: "SOP-class-uid",
                        })?;
                        writer.write_all(data).context(WriteFieldSnafu {
                            field: "Service-class-application-information",
                        })
                    })
                    .context(WriteChunkSnafu {
                        name: "SOP Class Extended Negotiation Sub-Item",
                    })?;
                }
                UserVariableItem::UserIdentityItem(user_identity) => {
                    writer
                        .write_all(&[0x58, 0x00])
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u8(user_identity.identity_type().to_u8())
                            .context(WriteFieldSnafu {
                                field: "User-Identity-type",
                            })?;
                        writer
                            .write_u8(u8::from(user_identity.positive_response_requested()))
                            .context(WriteFieldSnafu {
                                field: "User-Identity-positive-response-requested",
                            })?;
                        writer
                            .write_u16::<BigEndian>(user_identity.primary_field().len() as u16)
                            .context(WriteFieldSnafu {
                                field: "User-Identity-primary-field-length",
                            })?;
                        writer
                            .write_all(user_identity.primary_field())
                            .context(WriteFieldSnafu {
                                field: "User-Identity-primary-field",
                            })?;
                        writer
                            .write_u16::<BigEndian>(user_identity.secondary_field().len() as u16)
                            .context(WriteFieldSnafu {
                                field: "User-Identity-secondary-field-length",
                            })?;
                        writer
                            .write_all(user_identity.secondary_field())
                            .context(WriteFieldSnafu {
                                field: "User-Identity-secondary-field",
                            })
                    })
                    .context(WriteChunkSnafu {
                        name: "User Identity Sub-Item",
                    })?;
                }
                UserVariableItem::UserIdentityServerResponse(server_response) => {
                    writer
                        .write_all(&[0x59, 0x00])
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u16::<BigEndian>(server_response.len() as u16)
                            .context(WriteFieldSnafu {
                                field: "User-Identity-server-response-length",
                            })?;
                        writer.write_all(server_response).context(WriteFieldSnafu {
                            field: "User-Identity-server-response",
                        })
                    })
                    .context(WriteChunkSnafu {
                        name: "User Identity Server Response Sub-Item",
                    })?;
                }
                UserVariableItem::Unknown(item_type, data) => {
                    writer
                        .write_all(&[*item_type, 0x00])
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    write_chunk_u16(writer, |writer| {
                        writer.write_all(data).context(WriteFieldSnafu {
                            field: "Unknown Data",
                        })
                    })
                    .context(WriteChunkSnafu { name: "Unknown" })?;
                }
            }
        }
        Ok(())
    })
    .context(WriteChunkSnafu { name: "User-data" })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_chunks_with_preceding_u32_length() -> Result<()> {
        let mut bytes = vec![0u8; 0];
        write_chunk_u32(&mut bytes, |writer| {
            writer
                .write_u8(0x02)
                .context(WriteFieldSnafu { field: "Field1" })?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_u8(0x03)
                    .context(WriteFieldSnafu { field: "Field2" })?;
                Ok(())
            })
            .context(WriteChunkSnafu { name: "Chunk2" })
        })
        .context(WriteChunkSnafu { name: "Chunk1" })?;

        assert_eq!(bytes, &[0, 0, 0, 6, 2, 0, 0, 0, 1, 3]);
        Ok(())
    }

    #[test]
    fn write_chunks_with_preceding_u16_length() -> Result<()> {
        let mut bytes = vec![0u8; 0];
        write_chunk_u16(&mut bytes, |writer| {
            writer
                .write_u8(0x02)
                .context(WriteFieldSnafu { field: "Field1" })?;
            write_chunk_u16(writer, |writer| {
                writer
                    .write_u8(0x03)
                    .context(WriteFieldSnafu { field: "Field2" })?;
                Ok(())
            })
            .context(WriteChunkSnafu { name: "Chunk2" })
        })
        .context(WriteChunkSnafu { name: "Chunk1" })?;

        assert_eq!(bytes, &[0, 4, 2, 0, 1, 3]);
        Ok(())
    }

    #[test]
    fn rejects_non_ascii_ae_titles() {
        let pdu = Pdu::AssociationRQ(AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "STÖRE-SCU".to_string(),
            called_ae_title: "ANY-SCP".to_string(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![],
            user_variables: vec![],
        });
        let mut out = Vec::new();
        assert!(write_pdu(&mut out, &pdu).is_err());
    }
}
