//! Association requester module.
//!
//! The [`Client`] driver plays the initiator role:
//! it queues DIMSE requests,
//! derives the presentation contexts they need,
//! negotiates an association over a fresh TCP connection,
//! transmits the requests strictly in order,
//! dispatches the responses,
//! and releases the association.
//!
//! # Example
//!
//! ```no_run
//! # use dicom_dimse::association::client::Client;
//! # use dicom_dimse::dimse::{Request, StatusCategory};
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = Client::new();
//! client.add_request(Request::c_echo(1));
//! let outcomes = client.send("10.0.0.5:104", "ECHO-SCU", "MAIN-SCP")?;
//! assert_eq!(
//!     outcomes[0].final_response().unwrap().status().category(),
//!     StatusCategory::Success,
//! );
//! # Ok(())
//! # }
//! ```

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use bytes::BytesMut;
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use tracing::{debug, warn};

use crate::association::machine::{State, StateMachine, TimeoutOptions};
use crate::association::pdata::{self, split_into_pdata, MessageAssembler};
use crate::association::{wire, Association, PresentationContext};
use crate::dataset::Dataset;
use crate::dimse::messages::{self, Message};
use crate::dimse::{Request, RequestPayload, Response};
use crate::pdu::{
    AbortRQSource, AssociationRJ, PDataValueType, Pdu, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE,
};
use crate::statistics::{MeteredStream, Statistics};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// no requests were queued for sending
    NothingToSend { backtrace: Backtrace },

    /// the association parameters were invalid
    InvalidAssociation {
        #[snafu(backtrace)]
        source: super::Error,
    },

    /// could not connect to the peer
    Connect {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// could not configure the transport socket
    ConfigureSocket {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to send the association request
    SendRequest {
        #[snafu(backtrace)]
        source: wire::Error,
    },

    /// failed to receive the association response
    ReceiveResponse {
        #[snafu(backtrace)]
        source: wire::Error,
    },

    #[snafu(display("association rejected by the peer: {}", association_rj.source))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    #[snafu(display("association aborted by the peer"))]
    PeerAborted {
        abort_source: AbortRQSource,
        backtrace: Backtrace,
    },

    /// the association was aborted locally
    Aborted { backtrace: Backtrace },

    /// no presentation contexts accepted by the peer
    NoAcceptedPresentationContexts { backtrace: Backtrace },

    #[snafu(display(
        "no accepted presentation context to send request {} (SOP class `{}`)",
        message_id,
        sop_class_uid
    ))]
    NoAcceptedPresentationContext {
        message_id: u16,
        sop_class_uid: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "data set of request {} is encoded in `{}`, but the accepted transfer syntax is `{}`",
        message_id,
        encoded,
        accepted
    ))]
    DatasetTransferSyntaxNotNegotiated {
        message_id: u16,
        encoded: String,
        accepted: String,
        backtrace: Backtrace,
    },

    #[snafu(display("unexpected PDU from the peer: {}", pdu.short_description()))]
    UnexpectedPdu { pdu: Box<Pdu>, backtrace: Backtrace },

    #[snafu(display("unrecognized PDU from the peer: {}", pdu.short_description()))]
    UnknownPdu { pdu: Box<Pdu>, backtrace: Backtrace },

    /// failed to send a DIMSE message
    Send {
        #[snafu(backtrace)]
        source: wire::Error,
    },

    /// failed to receive a DIMSE message
    Receive {
        #[snafu(backtrace)]
        source: wire::Error,
    },

    /// failed to reassemble the incoming DIMSE message
    Reassemble {
        #[snafu(backtrace)]
        source: pdata::Error,
    },

    /// failed to decode the incoming DIMSE message
    DecodeMessage {
        #[snafu(backtrace)]
        source: messages::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the error was caused by a transport deadline expiry.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::SendRequest { source }
            | Error::ReceiveResponse { source }
            | Error::Send { source }
            | Error::Receive { source } => source.is_timeout(),
            _ => false,
        }
    }
}

/// The terminal record of one queued request:
/// the request itself and every response observed for it,
/// in emission order.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub request: Request,
    pub responses: Vec<Response>,
}

impl RequestOutcome {
    /// The terminal response, if one arrived.
    pub fn final_response(&self) -> Option<&Response> {
        self.responses.last().filter(|rsp| rsp.status().is_terminal())
    }

    /// The responses with a pending status, in emission order.
    pub fn pending_responses(&self) -> impl Iterator<Item = &Response> {
        self.responses.iter().filter(|rsp| rsp.status().is_pending())
    }
}

/// Control handle passed to the response event sink,
/// through which in-flight operations are cancelled
/// or the whole association is torn down.
#[derive(Debug, Default)]
pub struct ClientControl {
    cancel: Option<u16>,
    abort: bool,
}

impl ClientControl {
    /// Emit a C-CANCEL correlated to the given outstanding message id.
    ///
    /// The in-flight multi-response sequence then ends
    /// with the next terminal status reported by the peer.
    pub fn cancel(&mut self, message_id: u16) {
        self.cancel = Some(message_id);
    }

    /// Abort the association immediately,
    /// regardless of outstanding operations.
    pub fn abort(&mut self) {
        self.abort = true;
    }
}

/// A DIMSE client: the association initiator.
///
/// Queue requests with [`add_request`](Self::add_request),
/// optionally prepare explicit presentation contexts,
/// then [`send`](Self::send) everything over one association.
#[derive(Debug)]
pub struct Client {
    requests: Vec<Request>,
    presentation_contexts: Vec<PresentationContext>,
    max_pdu_length: u32,
    strict: bool,
    timeouts: TimeoutOptions,
    statistics: Arc<Statistics>,
}

impl Default for Client {
    fn default() -> Self {
        Client {
            requests: Vec::new(),
            presentation_contexts: Vec::new(),
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            timeouts: TimeoutOptions::default(),
            statistics: Arc::new(Statistics::new()),
        }
    }
}

impl Client {
    /// Create a client with an empty request queue.
    pub fn new() -> Self {
        Client::default()
    }

    /// Queue a request for the next [`send`](Self::send).
    pub fn add_request(&mut self, request: Request) {
        self.requests.push(request);
    }

    /// Add an explicitly prepared presentation context,
    /// proposed alongside the contexts derived from queued requests.
    ///
    /// A request whose SOP class matches this context's abstract syntax
    /// will use it instead of a derived default.
    pub fn add_presentation_context(&mut self, context: PresentationContext) {
        self.presentation_contexts.push(context);
    }

    /// Override the maximum PDU length announced to the peer.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode:
    /// whether received PDUs must not surpass
    /// the announced maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the wall-clock deadlines for this client.
    pub fn timeouts(mut self, timeouts: TimeoutOptions) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The byte counters of the most recent connection.
    pub fn statistics(&self) -> Arc<Statistics> {
        Arc::clone(&self.statistics)
    }

    /// Send every queued request over a new association,
    /// discarding progress events.
    pub fn send<A>(
        &mut self,
        address: A,
        calling_ae_title: &str,
        called_ae_title: &str,
    ) -> Result<Vec<RequestOutcome>>
    where
        A: ToSocketAddrs,
    {
        self.send_with(address, calling_ae_title, called_ae_title, |_, _| {})
    }

    /// Send every queued request over a new association.
    ///
    /// `events` observes every response as it arrives,
    /// including intermediate pending responses of
    /// C-FIND/C-MOVE/C-GET sequences,
    /// and may cancel the in-flight operation or abort the association
    /// through the [`ClientControl`] handle.
    pub fn send_with<A, F>(
        &mut self,
        address: A,
        calling_ae_title: &str,
        called_ae_title: &str,
        mut events: F,
    ) -> Result<Vec<RequestOutcome>>
    where
        A: ToSocketAddrs,
        F: FnMut(&Response, &mut ClientControl),
    {
        ensure!(!self.requests.is_empty(), NothingToSendSnafu);

        // a fresh connection starts from zeroed counters
        self.statistics.reset();

        let mut association = Association::new(calling_ae_title, called_ae_title)
            .context(InvalidAssociationSnafu)?;
        association
            .set_max_pdu_length(self.max_pdu_length)
            .context(InvalidAssociationSnafu)?;
        for context in self.presentation_contexts.drain(..) {
            association
                .insert_presentation_context(context)
                .context(InvalidAssociationSnafu)?;
        }
        for request in &self.requests {
            if !matches!(request.payload(), RequestPayload::CCancel) {
                association
                    .add_presentation_context_from_request(request, None)
                    .context(InvalidAssociationSnafu)?;
            }
        }

        let mut machine = StateMachine::new();
        machine.transition(State::ConnectRequested).expect("fresh machine");

        let socket = self.connect(address)?;
        socket
            .set_read_timeout(self.timeouts.associate_timeout)
            .context(ConfigureSocketSnafu)?;
        socket
            .set_write_timeout(self.timeouts.write_timeout)
            .context(ConfigureSocketSnafu)?;
        let mut stream = MeteredStream::new(socket, Arc::clone(&self.statistics));
        let mut write_buffer = Vec::with_capacity(self.max_pdu_length as usize);
        let mut read_buffer = BytesMut::with_capacity(self.max_pdu_length as usize);

        // negotiation phase
        let rq = association.to_association_rq();
        wire::write_pdu_to_wire(&mut stream, &mut write_buffer, &rq.into())
            .context(SendRequestSnafu)?;
        machine.transition(State::AssociateRequestSent).expect("after connect");

        let pdu = match wire::read_pdu_from_wire(
            &mut stream,
            &mut read_buffer,
            MAXIMUM_PDU_SIZE,
            self.strict,
        ) {
            Ok(pdu) => pdu,
            Err(source) => {
                self.local_abort(&mut stream, &mut write_buffer, &mut machine);
                return Err(Error::ReceiveResponse { source });
            }
        };

        let peer_max_pdu_length = match pdu {
            Pdu::AssociationAC(ac) => {
                if let Err(source) = association.apply_association_ac(&ac) {
                    self.local_abort(&mut stream, &mut write_buffer, &mut machine);
                    return Err(Error::InvalidAssociation { source });
                }
                machine.transition(State::Established).expect("after request sent");
                association.max_pdu_length()
            }
            Pdu::AssociationRJ(association_rj) => {
                machine.abort();
                return RejectedSnafu { association_rj }.fail();
            }
            Pdu::AbortRQ { source } => {
                machine.abort();
                return PeerAbortedSnafu {
                    abort_source: source,
                }
                .fail();
            }
            pdu @ Pdu::Unknown { .. } => {
                self.local_abort(&mut stream, &mut write_buffer, &mut machine);
                return UnknownPduSnafu { pdu: Box::new(pdu) }.fail();
            }
            pdu => {
                self.local_abort(&mut stream, &mut write_buffer, &mut machine);
                return UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail();
            }
        };

        if !association
            .presentation_contexts()
            .iter()
            .any(|pc| pc.is_accepted())
        {
            self.local_abort(&mut stream, &mut write_buffer, &mut machine);
            return NoAcceptedPresentationContextsSnafu.fail();
        }
        debug!(
            peer_max_pdu_length,
            contexts = association.presentation_contexts().len(),
            "association established"
        );

        // every queued request must be coverable before
        // a single DIMSE byte goes out
        let requests: Vec<Request> = self.requests.drain(..).collect();
        for request in &requests {
            if matches!(request.payload(), RequestPayload::CCancel) {
                continue;
            }
            let context = association
                .accepted_presentation_context_for(request)
                .with_context(|| NoAcceptedPresentationContextSnafu {
                    message_id: request.message_id(),
                    sop_class_uid: request.sop_class_uid().to_string(),
                })?;
            if let (Some(dataset), Some(accepted)) =
                (request.dataset(), context.accepted_transfer_syntax())
            {
                ensure!(
                    dataset.transfer_syntax() == accepted,
                    DatasetTransferSyntaxNotNegotiatedSnafu {
                        message_id: request.message_id(),
                        encoded: dataset.transfer_syntax().to_string(),
                        accepted: accepted.to_string(),
                    }
                );
            }
        }

        // data transfer phase
        stream
            .get_ref()
            .set_read_timeout(self.timeouts.read_timeout)
            .context(ConfigureSocketSnafu)?;

        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            let outcome = self.exchange(
                &association,
                &mut stream,
                &mut write_buffer,
                &mut read_buffer,
                &mut machine,
                peer_max_pdu_length,
                request,
                &mut events,
            )?;
            outcomes.push(outcome);
        }

        // release handshake
        machine.transition(State::ReleaseRequested).expect("established");
        wire::write_pdu_to_wire(&mut stream, &mut write_buffer, &Pdu::ReleaseRQ)
            .context(SendSnafu)?;
        match wire::read_pdu_from_wire(
            &mut stream,
            &mut read_buffer,
            self.max_pdu_length,
            self.strict,
        ) {
            Ok(Pdu::ReleaseRP) => {
                machine.transition(State::Released).expect("release requested");
            }
            Ok(pdu) => {
                self.local_abort(&mut stream, &mut write_buffer, &mut machine);
                return UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail();
            }
            Err(source) => {
                machine.abort();
                return Err(Error::Receive { source });
            }
        }
        let _ = stream.get_mut().shutdown(std::net::Shutdown::Both);

        Ok(outcomes)
    }

    /// Resolve and connect, honoring the connect deadline.
    fn connect<A: ToSocketAddrs>(&self, address: A) -> Result<TcpStream> {
        let mut last_error = None;
        let addresses = address.to_socket_addrs().context(ConnectSnafu)?;
        for address in addresses {
            let attempt = match self.timeouts.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&address, timeout),
                None => TcpStream::connect(address),
            };
            match attempt {
                Ok(socket) => return Ok(socket),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
        }))
        .context(ConnectSnafu)
    }

    /// Transmit one request and drain its responses.
    #[allow(clippy::too_many_arguments)]
    fn exchange<F>(
        &self,
        association: &Association,
        stream: &mut MeteredStream<TcpStream>,
        write_buffer: &mut Vec<u8>,
        read_buffer: &mut BytesMut,
        machine: &mut StateMachine,
        peer_max_pdu_length: u32,
        request: Request,
        events: &mut F,
    ) -> Result<RequestOutcome>
    where
        F: FnMut(&Response, &mut ClientControl),
    {
        let is_cancel = matches!(request.payload(), RequestPayload::CCancel);
        let context = if is_cancel {
            None
        } else {
            // validated before the data transfer phase began
            Some(
                association
                    .accepted_presentation_context_for(&request)
                    .expect("request context was pre-validated"),
            )
        };
        // a C-CANCEL travels over any accepted context
        let context_id = context
            .map(|pc| pc.id())
            .or_else(|| {
                association
                    .presentation_contexts()
                    .iter()
                    .find(|pc| pc.is_accepted())
                    .map(|pc| pc.id())
            })
            .expect("at least one accepted context");

        self.send_message(
            stream,
            write_buffer,
            context_id,
            &request,
            peer_max_pdu_length,
        )?;

        let mut outcome = RequestOutcome {
            request,
            responses: Vec::new(),
        };
        if is_cancel {
            // no response correlates to a C-CANCEL itself
            return Ok(outcome);
        }

        let mut assembler = MessageAssembler::new();
        let mut control = ClientControl::default();
        loop {
            let pdu = match wire::read_pdu_from_wire(
                stream,
                read_buffer,
                self.max_pdu_length,
                self.strict,
            ) {
                Ok(pdu) => pdu,
                Err(source) => {
                    self.local_abort(stream, write_buffer, machine);
                    return Err(Error::Receive { source });
                }
            };

            let values = match pdu {
                Pdu::PData { data } => data,
                Pdu::AbortRQ { source } => {
                    machine.abort();
                    return PeerAbortedSnafu {
                        abort_source: source,
                    }
                    .fail();
                }
                pdu @ Pdu::Unknown { .. } => {
                    self.local_abort(stream, write_buffer, machine);
                    return UnknownPduSnafu { pdu: Box::new(pdu) }.fail();
                }
                pdu => {
                    self.local_abort(stream, write_buffer, machine);
                    return UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail();
                }
            };

            for pdv in values {
                let complete = match assembler.push(pdv) {
                    Ok(complete) => complete,
                    Err(source) => {
                        self.local_abort(stream, write_buffer, machine);
                        return Err(Error::Reassemble { source });
                    }
                };
                let Some(message) = complete else { continue };

                let mut decoded = match Message::from_command_set(&message.command_set) {
                    Ok(decoded) => decoded,
                    Err(source) => {
                        self.local_abort(stream, write_buffer, machine);
                        return Err(Error::DecodeMessage { source });
                    }
                };
                if let Some(data) = message.data {
                    let transfer_syntax = association
                        .presentation_context(message.presentation_context_id)
                        .and_then(|pc| pc.accepted_transfer_syntax())
                        .unwrap_or(crate::uids::IMPLICIT_VR_LITTLE_ENDIAN);
                    decoded.set_dataset(Dataset::decode(data, transfer_syntax));
                }

                let response = match decoded {
                    Message::Response(response) => response,
                    Message::Request(other) => {
                        warn!(
                            command = ?other.command_field(),
                            "ignoring unexpected request from the acceptor"
                        );
                        continue;
                    }
                };
                if response.message_id_being_responded_to() != outcome.request.message_id() {
                    warn!(
                        got = response.message_id_being_responded_to(),
                        expected = outcome.request.message_id(),
                        "response does not correlate to the pending request"
                    );
                    continue;
                }

                events(&response, &mut control);
                let terminal = response.status().is_terminal();
                outcome.responses.push(response);

                if control.abort {
                    self.local_abort(stream, write_buffer, machine);
                    return AbortedSnafu.fail();
                }
                if let Some(message_id) = control.cancel.take() {
                    let cancel =
                        Request::c_cancel(message_id, outcome.request.sop_class_uid());
                    self.send_message(stream, write_buffer, context_id, &cancel, peer_max_pdu_length)?;
                }

                if terminal {
                    return Ok(outcome);
                }
            }
        }
    }

    /// Encode one request and send its command (and data) fragments.
    fn send_message(
        &self,
        stream: &mut MeteredStream<TcpStream>,
        write_buffer: &mut Vec<u8>,
        context_id: u8,
        request: &Request,
        peer_max_pdu_length: u32,
    ) -> Result<()> {
        let command_bytes = request.to_command_set().to_bytes();
        for pdu in split_into_pdata(
            context_id,
            PDataValueType::Command,
            &command_bytes,
            peer_max_pdu_length,
        ) {
            wire::write_pdu_to_wire(stream, write_buffer, &pdu).context(SendSnafu)?;
        }
        if let Some(dataset) = request.dataset() {
            for pdu in split_into_pdata(
                context_id,
                PDataValueType::Data,
                dataset.data(),
                peer_max_pdu_length,
            ) {
                wire::write_pdu_to_wire(stream, write_buffer, &pdu).context(SendSnafu)?;
            }
        }
        Ok(())
    }

    /// Send a service-user A-ABORT and tear down the transport.
    fn local_abort(
        &self,
        stream: &mut MeteredStream<TcpStream>,
        write_buffer: &mut Vec<u8>,
        machine: &mut StateMachine,
    ) {
        let _ = wire::write_pdu_to_wire(
            stream,
            write_buffer,
            &Pdu::AbortRQ {
                source: AbortRQSource::ServiceUser,
            },
        );
        let _ = stream.get_mut().shutdown(std::net::Shutdown::Both);
        machine.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_requests_is_rejected() {
        let mut client = Client::new();
        let outcome = client.send("127.0.0.1:11112", "ECHO-SCU", "ANY-SCP");
        assert!(matches!(outcome, Err(Error::NothingToSend { .. })));
    }

    #[test]
    fn outcome_final_response_requires_terminal_status() {
        use crate::dimse::Status;

        let request = Request::c_echo(1);
        let pending = Response::from_request(&request, Status::PENDING);
        let success = Response::from_request(&request, Status::SUCCESS);

        let outcome = RequestOutcome {
            request,
            responses: vec![pending.clone()],
        };
        assert!(outcome.final_response().is_none());
        assert_eq!(outcome.pending_responses().count(), 1);

        let outcome = RequestOutcome {
            request: Request::c_echo(1),
            responses: vec![pending, success],
        };
        assert!(outcome.final_response().is_some());
    }
}
