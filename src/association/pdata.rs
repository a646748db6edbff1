//! Fragmentation and reassembly of DIMSE messages
//! over presentation data values.
//!
//! Outgoing messages are split into P-DATA-TF PDUs
//! whose length never exceeds the peer's declared maximum,
//! command fragments before data fragments.
//! Incoming fragments are fed to a [`MessageAssembler`]
//! which reconstitutes one complete command set
//! (plus its data set bytes, when announced)
//! before anything reaches the dispatcher.

use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};

use crate::dimse::commands::{self, CommandSet};
use crate::pdu::{PDataValue, PDataValueType, Pdu, PDU_HEADER_SIZE};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// failed to decode the reassembled command set
    DecodeCommand {
        #[snafu(backtrace)]
        source: commands::Error,
    },

    #[snafu(display(
        "data fragment for presentation context {} arrived without a preceding command",
        presentation_context_id
    ))]
    DataBeforeCommand {
        presentation_context_id: u8,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "fragment for presentation context {} interleaved into a message on context {}",
        got,
        expected
    ))]
    InterleavedContext {
        expected: u8,
        got: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("command fragment arrived after the command set was completed"))]
    CommandAfterCompletion { backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Overhead of one presentation data value item inside a P-DATA-TF PDU:
/// item length (4), context id (1), message control header (1).
const PDV_HEADER_SIZE: u32 = 6;

/// Split one fragment stream (command or data set bytes)
/// into P-DATA-TF PDUs,
/// each no longer than `max_pdu_length` on the wire.
///
/// Always yields at least one PDU,
/// with the last fragment flag set on the final one.
pub fn split_into_pdata(
    presentation_context_id: u8,
    value_type: PDataValueType,
    bytes: &[u8],
    max_pdu_length: u32,
) -> Vec<Pdu> {
    // room for the PDV payload once the PDV header is accounted for
    let max_fragment = max_pdu_length.saturating_sub(PDV_HEADER_SIZE).max(1) as usize;

    let mut pdus = Vec::with_capacity(bytes.len() / max_fragment + 1);
    let mut chunks = bytes.chunks(max_fragment).peekable();
    if chunks.peek().is_none() {
        // zero-length stream still needs its last-fragment marker
        return vec![Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last: true,
                data: Vec::new(),
            }],
        }];
    }
    while let Some(chunk) = chunks.next() {
        pdus.push(Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last: chunks.peek().is_none(),
                data: chunk.to_vec(),
            }],
        });
    }
    pdus
}

/// The maximum PDU length required to carry `fragment_len` PDV payload bytes.
pub fn pdu_length_for_fragment(fragment_len: u32) -> u32 {
    fragment_len + PDV_HEADER_SIZE + PDU_HEADER_SIZE
}

/// One fully reassembled DIMSE message:
/// its presentation context, its command set,
/// and the data set bytes that followed it, if any.
#[derive(Debug, Clone)]
pub struct AssembledMessage {
    pub presentation_context_id: u8,
    pub command_set: CommandSet,
    pub data: Option<Vec<u8>>,
}

/// Reassembles command and data fragment streams
/// into complete DIMSE messages.
///
/// Within one association the fragment stream is strictly ordered,
/// so at most one message is in flight at a time;
/// fragments from a different presentation context
/// arriving mid-message are a protocol violation.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    presentation_context_id: Option<u8>,
    command_buffer: Vec<u8>,
    command_set: Option<CommandSet>,
    data_buffer: Vec<u8>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        MessageAssembler::default()
    }

    /// Whether a message is partially assembled.
    pub fn in_progress(&self) -> bool {
        self.presentation_context_id.is_some()
    }

    /// Feed one presentation data value.
    ///
    /// Returns a complete message once its last fragment arrived.
    pub fn push(&mut self, pdv: PDataValue) -> Result<Option<AssembledMessage>> {
        match self.presentation_context_id {
            None => {
                self.presentation_context_id = Some(pdv.presentation_context_id);
            }
            Some(expected) => {
                ensure!(
                    expected == pdv.presentation_context_id,
                    InterleavedContextSnafu {
                        expected,
                        got: pdv.presentation_context_id,
                    }
                );
            }
        }

        match pdv.value_type {
            PDataValueType::Command => {
                ensure!(self.command_set.is_none(), CommandAfterCompletionSnafu);
                self.command_buffer.extend(pdv.data);
                if !pdv.is_last {
                    return Ok(None);
                }

                let command_set = CommandSet::from_bytes(&self.command_buffer)
                    .context(DecodeCommandSnafu)?;
                self.command_buffer.clear();
                if command_set.has_data_set() {
                    // hold on for the data fragment stream
                    self.command_set = Some(command_set);
                    Ok(None)
                } else {
                    Ok(Some(self.complete(command_set, None)))
                }
            }
            PDataValueType::Data => {
                let command_set = self.command_set.take().context(DataBeforeCommandSnafu {
                    presentation_context_id: pdv.presentation_context_id,
                })?;
                self.data_buffer.extend(pdv.data);
                if pdv.is_last {
                    let data = std::mem::take(&mut self.data_buffer);
                    Ok(Some(self.complete(command_set, Some(data))))
                } else {
                    self.command_set = Some(command_set);
                    Ok(None)
                }
            }
        }
    }

    fn complete(&mut self, command_set: CommandSet, data: Option<Vec<u8>>) -> AssembledMessage {
        let presentation_context_id = self.presentation_context_id.take().unwrap_or_default();
        self.command_buffer.clear();
        self.data_buffer.clear();
        self.command_set = None;
        AssembledMessage {
            presentation_context_id,
            command_set,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimse::{Priority, Request, Status};
    use crate::pdu::MINIMUM_PDU_SIZE;
    use crate::uids;
    use crate::Dataset;
    use matches::assert_matches;

    fn pdvs(pdus: Vec<Pdu>) -> Vec<PDataValue> {
        pdus.into_iter()
            .flat_map(|pdu| match pdu {
                Pdu::PData { data } => data,
                other => panic!("expected PData, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn small_message_fits_one_pdu() {
        let command = Request::c_echo(1).to_command_set().to_bytes();
        let pdus = split_into_pdata(1, PDataValueType::Command, &command, MINIMUM_PDU_SIZE);
        assert_eq!(pdus.len(), 1);

        let values = pdvs(pdus);
        assert!(values[0].is_last);
        assert_eq!(values[0].value_type, PDataValueType::Command);
        assert_eq!(values[0].data, command);
    }

    #[test]
    fn large_stream_splits_at_the_pdu_limit() {
        let payload: Vec<u8> = (0..10_000_u32).map(|i| i as u8).collect();
        let pdus = split_into_pdata(3, PDataValueType::Data, &payload, MINIMUM_PDU_SIZE);
        assert_eq!(pdus.len(), 3);

        let values = pdvs(pdus);
        let max_fragment = (MINIMUM_PDU_SIZE - 6) as usize;
        assert_eq!(values[0].data.len(), max_fragment);
        assert_eq!(values[1].data.len(), max_fragment);
        assert!(!values[0].is_last);
        assert!(!values[1].is_last);
        assert!(values[2].is_last);

        let total: Vec<u8> = values.into_iter().flat_map(|v| v.data).collect();
        assert_eq!(total, payload);
    }

    #[test]
    fn reassembles_command_without_data() {
        let command = Request::c_echo(5).to_command_set();
        let mut assembler = MessageAssembler::new();

        let message = assembler
            .push(PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Command,
                is_last: true,
                data: command.to_bytes(),
            })
            .unwrap()
            .expect("complete message");

        assert_eq!(message.presentation_context_id, 1);
        assert_eq!(message.command_set, command);
        assert!(message.data.is_none());
        assert!(!assembler.in_progress());
    }

    #[test]
    fn reassembles_fragmented_command_and_data() {
        let identifier = Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![0xAB; 9_000]);
        let request = Request::c_find(2, uids::STUDY_ROOT_QR_FIND, Priority::Medium, identifier.clone());
        let command_bytes = request.to_command_set().to_bytes();

        let mut fragments = pdvs(split_into_pdata(
            5,
            PDataValueType::Command,
            &command_bytes,
            MINIMUM_PDU_SIZE,
        ));
        fragments.extend(pdvs(split_into_pdata(
            5,
            PDataValueType::Data,
            identifier.data(),
            MINIMUM_PDU_SIZE,
        )));

        let mut assembler = MessageAssembler::new();
        let mut complete = None;
        for fragment in fragments {
            if let Some(message) = assembler.push(fragment).unwrap() {
                assert!(complete.is_none(), "only one message expected");
                complete = Some(message);
            }
        }

        let message = complete.expect("message must complete");
        assert_eq!(message.presentation_context_id, 5);
        assert!(message.command_set.has_data_set());
        assert_eq!(message.data.as_deref(), Some(identifier.data()));
    }

    #[test]
    fn data_without_command_is_a_violation() {
        let mut assembler = MessageAssembler::new();
        let outcome = assembler.push(PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![1, 2, 3],
        });
        assert_matches!(outcome, Err(Error::DataBeforeCommand { .. }));
    }

    #[test]
    fn interleaved_context_is_a_violation() {
        let request = Request::c_store(
            7,
            uids::CT_IMAGE_STORAGE,
            "1.2.3",
            Priority::Medium,
            Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![0; 16]),
        );
        let mut assembler = MessageAssembler::new();
        assembler
            .push(PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Command,
                is_last: true,
                data: request.to_command_set().to_bytes(),
            })
            .unwrap();

        let outcome = assembler.push(PDataValue {
            presentation_context_id: 3,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![0; 16],
        });
        assert_matches!(outcome, Err(Error::InterleavedContext { expected: 1, got: 3, .. }));
    }

    #[test]
    fn assembler_is_reusable_across_messages() {
        let mut assembler = MessageAssembler::new();
        for message_id in 1..=3 {
            let request = Request::c_echo(message_id);
            let message = assembler
                .push(PDataValue {
                    presentation_context_id: 1,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: request.to_command_set().to_bytes(),
                })
                .unwrap()
                .expect("complete message");
            let response = crate::dimse::Response::from_request(&request, Status::SUCCESS);
            assert_eq!(
                message.command_set.u16_value(commands::tags::MESSAGE_ID),
                Some(message_id)
            );
            assert_eq!(response.message_id_being_responded_to(), message_id);
        }
    }
}
