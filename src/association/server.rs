//! Association acceptor module.
//!
//! The acceptor side is split in two:
//! [`Scp`] drives a single accepted connection
//! (negotiation, message dispatch, release or abort),
//! and [`Server`] is the connection factory
//! binding a listening socket to fresh [`ServiceHandler`] instances,
//! one per connection.
//!
//! The embedding application supplies the behavior
//! by implementing [`ServiceHandler`]:
//! one method per DIMSE service plus the lifecycle hooks.
//! Services left to their default implementations
//! answer with an unrecognized-operation failure
//! (except C-ECHO, which succeeds).
//!
//! # Example
//!
//! ```no_run
//! # use dicom_dimse::association::server::{Server, ServerOptions, ServiceHandler};
//! # use dicom_dimse::association::Association;
//! # use dicom_dimse::uids;
//! struct EchoHandler;
//!
//! impl ServiceHandler for EchoHandler {
//!     fn association_requested(&mut self, association: &mut Association) {
//!         association.negotiate(
//!             &[uids::VERIFICATION],
//!             &[uids::IMPLICIT_VR_LITTLE_ENDIAN, uids::EXPLICIT_VR_LITTLE_ENDIAN],
//!         );
//!     }
//! }
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::new(
//!     ServerOptions::new().ae_title("ECHO-SCP"),
//!     || EchoHandler,
//! );
//! server.listen("0.0.0.0:104")?;
//! # Ok(())
//! # }
//! ```

use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use bytes::BytesMut;
use snafu::{Backtrace, ResultExt, Snafu};
use tracing::{debug, info, warn};

use crate::association::machine::{State, StateMachine, TimeoutOptions};
use crate::association::pdata::{self, split_into_pdata, MessageAssembler};
use crate::association::wire::{self, Transport};
use crate::association::{Association, Error as AssociationError};
use crate::dataset::{self, Dataset};
use crate::dimse::messages::{self, Message};
use crate::dimse::{Request, RequestPayload, Response, Status};
use crate::pdu::{
    AbortRQServiceProviderReason, AbortRQSource, AssociationRJ, AssociationRJResult,
    AssociationRJServiceUserReason, AssociationRJSource, PDataValueType, Pdu, DEFAULT_MAX_PDU,
};
use crate::statistics::{MeteredStream, Statistics};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// could not bind the listening socket
    Bind {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// could not configure the transport socket
    ConfigureSocket {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to receive a PDU
    Receive {
        #[snafu(backtrace)]
        source: wire::Error,
    },

    /// failed to send a PDU
    Send {
        #[snafu(backtrace)]
        source: wire::Error,
    },

    #[snafu(display("association request rejected: {}", rejection.source))]
    AssociationRejected {
        rejection: AssociationRJ,
        backtrace: Backtrace,
    },

    /// the peer released the association before it was established
    PrematureRelease { backtrace: Backtrace },

    /// the received association request was invalid
    InvalidAssociation {
        #[snafu(backtrace)]
        source: AssociationError,
    },

    #[snafu(display("unexpected PDU from the peer: {}", pdu.short_description()))]
    UnexpectedPdu { pdu: Box<Pdu>, backtrace: Backtrace },

    #[snafu(display("unrecognized PDU from the peer: {}", pdu.short_description()))]
    UnknownPdu { pdu: Box<Pdu>, backtrace: Backtrace },

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

    /// a handler response carried a data set
    /// in a transfer syntax that was not negotiated
    ResponseDataset {
        #[snafu(backtrace)]
        source: dataset::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A finite, one-shot sequence of responses
/// produced by a multi-response service handler.
pub type Responses = Box<dyn Iterator<Item = Response>>;

fn unrecognized(request: &Request) -> Response {
    Response::from_request(request, Status::UNRECOGNIZED_OPERATION)
}

/// The caller-supplied behavior of an acceptor:
/// one method per DIMSE service and the lifecycle hooks.
///
/// Every service method receives the decoded request
/// (with its data set attached when one was sent)
/// and produces the response(s) to transmit.
/// C-FIND, C-GET and C-MOVE produce a sequence of responses
/// which must end with a terminal (non-pending) status;
/// the driver drains the sequence under cancellation checks.
#[allow(unused_variables)]
pub trait ServiceHandler {
    /// Decide the fate of each proposed presentation context
    /// before the association is acknowledged,
    /// typically through [`Association::negotiate`].
    ///
    /// Leaving a context without a result rejects it.
    fn association_requested(&mut self, association: &mut Association) {}

    fn c_echo(&mut self, request: &Request) -> Response {
        Response::from_request(request, Status::SUCCESS)
    }

    fn c_store(&mut self, request: &Request) -> Response {
        unrecognized(request)
    }

    fn c_find(&mut self, request: &Request) -> Responses {
        Box::new(std::iter::once(unrecognized(request)))
    }

    fn c_get(&mut self, request: &Request) -> Responses {
        Box::new(std::iter::once(unrecognized(request)))
    }

    fn c_move(&mut self, request: &Request) -> Responses {
        Box::new(std::iter::once(unrecognized(request)))
    }

    fn n_create(&mut self, request: &Request) -> Response {
        unrecognized(request)
    }

    fn n_action(&mut self, request: &Request) -> Response {
        unrecognized(request)
    }

    fn n_delete(&mut self, request: &Request) -> Response {
        unrecognized(request)
    }

    fn n_event_report(&mut self, request: &Request) -> Response {
        unrecognized(request)
    }

    fn n_get(&mut self, request: &Request) -> Response {
        unrecognized(request)
    }

    fn n_set(&mut self, request: &Request) -> Response {
        unrecognized(request)
    }

    /// A C-CANCEL arrived for the operation
    /// with the carried message id.
    fn c_cancel(&mut self, request: &Request) {}

    /// The peer asked to release the association.
    fn release_requested(&mut self) {}

    /// The association was torn down by an A-ABORT
    /// or by transport loss.
    fn aborted(&mut self, source: &AbortRQSource) {}
}

/// Options for accepting associations.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    ae_title: String,
    max_pdu_length: u32,
    strict: bool,
    require_called_ae_title: bool,
    timeouts: TimeoutOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            ae_title: "THIS-SCP".to_string(),
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            require_called_ae_title: false,
            timeouts: TimeoutOptions::default(),
        }
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        ServerOptions::default()
    }

    /// Define the application entity title of this node.
    ///
    /// The default is `THIS-SCP`.
    pub fn ae_title(mut self, ae_title: impl Into<String>) -> Self {
        self.ae_title = ae_title.into();
        self
    }

    /// Override the maximum PDU length announced to peers.
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

    /// Only accept association requests whose called AE title
    /// matches this node's AE title.
    pub fn accept_called_ae_title(mut self) -> Self {
        self.require_called_ae_title = true;
        self
    }

    /// Set the wall-clock deadlines for accepted connections.
    pub fn timeouts(mut self, timeouts: TimeoutOptions) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// The outcome of polling for a C-CANCEL between
/// multi-response emissions.
enum CancelCheck {
    Continue,
    Cancelled(Request),
    Aborted(AbortRQSource),
}

/// One accepted association:
/// the per-connection state machine of the acceptor role.
#[derive(Debug)]
pub struct Scp<S, H> {
    stream: S,
    handler: H,
    association: Association,
    machine: StateMachine,
    assembler: MessageAssembler,
    read_buffer: BytesMut,
    write_buffer: Vec<u8>,
    peer_max_pdu_length: u32,
    max_pdu_length: u32,
    strict: bool,
}

impl<S, H> Scp<S, H>
where
    S: Transport,
    H: ServiceHandler,
{
    /// Negotiate an association over the given transport stream.
    ///
    /// Reads the A-ASSOCIATE-RQ, checks it,
    /// lets the handler decide the presentation context results
    /// and sends the acknowledgement.
    pub fn establish(options: &ServerOptions, mut stream: S, mut handler: H) -> Result<Self> {
        let mut machine = StateMachine::new();
        machine.transition(State::ConnectRequested).expect("fresh machine");

        let mut read_buffer = BytesMut::with_capacity(options.max_pdu_length as usize);
        let mut write_buffer = Vec::with_capacity(options.max_pdu_length as usize);

        let pdu = wire::read_pdu_from_wire(
            &mut stream,
            &mut read_buffer,
            options.max_pdu_length,
            options.strict,
        )
        .context(ReceiveSnafu)?;

        let rq = match pdu {
            Pdu::AssociationRQ(rq) => rq,
            Pdu::ReleaseRQ => {
                wire::write_pdu_to_wire(&mut stream, &mut write_buffer, &Pdu::ReleaseRP)
                    .context(SendSnafu)?;
                return PrematureReleaseSnafu.fail();
            }
            pdu @ Pdu::Unknown { .. } => {
                abort_with(
                    &mut stream,
                    &mut write_buffer,
                    AbortRQServiceProviderReason::UnrecognizedPdu,
                );
                return UnknownPduSnafu { pdu: Box::new(pdu) }.fail();
            }
            pdu => {
                abort_with(
                    &mut stream,
                    &mut write_buffer,
                    AbortRQServiceProviderReason::UnexpectedPdu,
                );
                return UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail();
            }
        };
        machine
            .transition(State::AssociateRequestReceived)
            .expect("after connect");

        if rq.protocol_version & 0x0001 == 0 {
            return Self::reject(
                &mut stream,
                &mut write_buffer,
                AssociationRJSource::ServiceProviderAcse(
                    crate::pdu::AssociationRJServiceProviderAcseReason::ProtocolVersionNotSupported,
                ),
            );
        }
        if rq.application_context_name != crate::uids::APPLICATION_CONTEXT_NAME {
            return Self::reject(
                &mut stream,
                &mut write_buffer,
                AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
                ),
            );
        }
        if options.require_called_ae_title && rq.called_ae_title != options.ae_title {
            return Self::reject(
                &mut stream,
                &mut write_buffer,
                AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::CalledAeTitleNotRecognized,
                ),
            );
        }

        let mut association =
            Association::from_association_rq(&rq).context(InvalidAssociationSnafu)?;
        // the requester's announced maximum bounds what we may send;
        // our own maximum is what we announce back
        let peer_max_pdu_length = association.max_pdu_length();
        association
            .set_max_pdu_length(options.max_pdu_length)
            .context(InvalidAssociationSnafu)?;

        handler.association_requested(&mut association);

        let ac = association.to_association_ac();
        let accepted = ac
            .presentation_contexts
            .iter()
            .filter(|pc| pc.reason == crate::pdu::PresentationContextResultReason::Acceptance)
            .count();
        wire::write_pdu_to_wire(&mut stream, &mut write_buffer, &ac.into())
            .context(SendSnafu)?;
        machine.transition(State::Established).expect("after request received");
        debug!(
            calling = association.calling_ae_title(),
            accepted,
            proposed = association.presentation_contexts().len(),
            "association established"
        );

        Ok(Scp {
            stream,
            handler,
            association,
            machine,
            assembler: MessageAssembler::new(),
            read_buffer,
            write_buffer,
            peer_max_pdu_length,
            max_pdu_length: options.max_pdu_length,
            strict: options.strict,
        })
    }

    fn reject(
        stream: &mut S,
        write_buffer: &mut Vec<u8>,
        source: AssociationRJSource,
    ) -> Result<Self> {
        let rejection = AssociationRJ {
            result: AssociationRJResult::Permanent,
            source,
        };
        wire::write_pdu_to_wire(stream, write_buffer, &rejection.clone().into())
            .context(SendSnafu)?;
        AssociationRejectedSnafu { rejection }.fail()
    }

    /// The negotiated association descriptor.
    pub fn association(&self) -> &Association {
        &self.association
    }

    /// Serve the association until the peer releases it,
    /// aborts it, or a protocol violation forces a local abort.
    pub fn run(mut self) -> Result<()> {
        loop {
            let pdu = match wire::read_pdu_from_wire(
                &mut self.stream,
                &mut self.read_buffer,
                self.max_pdu_length,
                self.strict,
            ) {
                Ok(pdu) => pdu,
                Err(source) => {
                    self.machine.abort();
                    let abort_source =
                        AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::ReasonNotSpecified);
                    self.handler.aborted(&abort_source);
                    let _ = self.stream.close();
                    return Err(Error::Receive { source });
                }
            };

            match pdu {
                Pdu::PData { data } => {
                    for pdv in data {
                        let complete = match self.assembler.push(pdv) {
                            Ok(complete) => complete,
                            Err(source) => {
                                self.local_abort(AbortRQServiceProviderReason::InvalidPduParameter);
                                return Err(Error::Reassemble { source });
                            }
                        };
                        if let Some(message) = complete {
                            self.dispatch(
                                message.presentation_context_id,
                                &message.command_set,
                                message.data,
                            )?;
                        }
                    }
                }
                Pdu::ReleaseRQ => {
                    self.handler.release_requested();
                    self.machine
                        .transition(State::ReleaseRequested)
                        .expect("established");
                    wire::write_pdu_to_wire(&mut self.stream, &mut self.write_buffer, &Pdu::ReleaseRP)
                        .context(SendSnafu)?;
                    self.machine.transition(State::Released).expect("release requested");
                    let _ = self.stream.close();
                    info!("association released");
                    return Ok(());
                }
                Pdu::AbortRQ { source } => {
                    self.machine.abort();
                    self.handler.aborted(&source);
                    let _ = self.stream.close();
                    info!("association aborted by the peer");
                    return Ok(());
                }
                pdu @ Pdu::Unknown { .. } => {
                    self.local_abort(AbortRQServiceProviderReason::UnrecognizedPdu);
                    return UnknownPduSnafu { pdu: Box::new(pdu) }.fail();
                }
                pdu => {
                    self.local_abort(AbortRQServiceProviderReason::UnexpectedPdu);
                    return UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail();
                }
            }
        }
    }

    /// Dispatch one reassembled message to the handler.
    fn dispatch(
        &mut self,
        presentation_context_id: u8,
        command_set: &crate::dimse::CommandSet,
        data: Option<Vec<u8>>,
    ) -> Result<()> {
        let mut message = match Message::from_command_set(command_set) {
            Ok(message) => message,
            Err(source) => {
                self.local_abort(AbortRQServiceProviderReason::InvalidPduParameter);
                return Err(Error::DecodeMessage { source });
            }
        };
        if let Some(data) = data {
            let transfer_syntax = self
                .association
                .presentation_context(presentation_context_id)
                .and_then(|pc| pc.accepted_transfer_syntax())
                .unwrap_or(crate::uids::IMPLICIT_VR_LITTLE_ENDIAN)
                .to_string();
            message.set_dataset(Dataset::decode(data, transfer_syntax));
        }

        let request = match message {
            Message::Request(request) => request,
            Message::Response(response) => {
                warn!(
                    status = %response.status(),
                    "ignoring unexpected response message in the acceptor role"
                );
                return Ok(());
            }
        };

        match request.payload() {
            RequestPayload::CEcho => {
                let response = self.handler.c_echo(&request);
                self.respond(presentation_context_id, response)
            }
            RequestPayload::CStore { .. } => {
                let response = self.handler.c_store(&request);
                self.respond(presentation_context_id, response)
            }
            RequestPayload::CFind { .. } => {
                let responses = self.handler.c_find(&request);
                self.respond_sequence(presentation_context_id, &request, responses)
            }
            RequestPayload::CGet { .. } => {
                let responses = self.handler.c_get(&request);
                self.respond_sequence(presentation_context_id, &request, responses)
            }
            RequestPayload::CMove { .. } => {
                let responses = self.handler.c_move(&request);
                self.respond_sequence(presentation_context_id, &request, responses)
            }
            RequestPayload::CCancel => {
                // no operation in flight: nothing to answer
                self.handler.c_cancel(&request);
                Ok(())
            }
            RequestPayload::NCreate => {
                let response = self.handler.n_create(&request);
                self.respond(presentation_context_id, response)
            }
            RequestPayload::NAction { .. } => {
                let response = self.handler.n_action(&request);
                self.respond(presentation_context_id, response)
            }
            RequestPayload::NDelete => {
                let response = self.handler.n_delete(&request);
                self.respond(presentation_context_id, response)
            }
            RequestPayload::NEventReport { .. } => {
                let response = self.handler.n_event_report(&request);
                self.respond(presentation_context_id, response)
            }
            RequestPayload::NGet { .. } => {
                let response = self.handler.n_get(&request);
                self.respond(presentation_context_id, response)
            }
            RequestPayload::NSet => {
                let response = self.handler.n_set(&request);
                self.respond(presentation_context_id, response)
            }
        }
    }

    /// Drain a multi-response sequence,
    /// checking for C-CANCEL before each emission.
    fn respond_sequence(
        &mut self,
        presentation_context_id: u8,
        request: &Request,
        responses: Responses,
    ) -> Result<()> {
        let mut terminal_sent = false;
        for response in responses {
            match self.check_for_cancel(request.message_id())? {
                CancelCheck::Continue => {}
                CancelCheck::Cancelled(cancel) => {
                    self.handler.c_cancel(&cancel);
                    self.respond(
                        presentation_context_id,
                        Response::from_request(request, Status::CANCEL),
                    )?;
                    return Ok(());
                }
                CancelCheck::Aborted(source) => {
                    self.machine.abort();
                    self.handler.aborted(&source);
                    let _ = self.stream.close();
                    return Ok(());
                }
            }

            let terminal = response.status().is_terminal();
            self.respond(presentation_context_id, response)?;
            if terminal {
                terminal_sent = true;
                break;
            }
        }

        if !terminal_sent {
            // the producer dried up without a terminal status;
            // the peer must not be left waiting
            warn!(
                message_id = request.message_id(),
                "multi-response producer ended without a terminal status"
            );
            self.respond(
                presentation_context_id,
                Response::from_request(request, Status::PROCESSING_FAILURE),
            )?;
        }
        Ok(())
    }

    /// Poll the transport for an already-arrived C-CANCEL
    /// correlated to the in-flight operation.
    fn check_for_cancel(&mut self, message_id: u16) -> Result<CancelCheck> {
        if self.stream.try_fill(&mut self.read_buffer).unwrap_or(0) == 0
            && self.read_buffer.is_empty()
        {
            return Ok(CancelCheck::Continue);
        }

        while let Some(pdu) =
            wire::take_buffered_pdu(&mut self.read_buffer, self.max_pdu_length, self.strict)
                .context(ReceiveSnafu)?
        {
            match pdu {
                Pdu::PData { data } => {
                    for pdv in data {
                        let complete = self.assembler.push(pdv).context(ReassembleSnafu)?;
                        let Some(message) = complete else { continue };
                        match Message::from_command_set(&message.command_set)
                            .context(DecodeMessageSnafu)?
                        {
                            Message::Request(request)
                                if matches!(request.payload(), RequestPayload::CCancel) =>
                            {
                                if request.message_id() == message_id {
                                    return Ok(CancelCheck::Cancelled(request));
                                }
                                warn!(
                                    got = request.message_id(),
                                    expected = message_id,
                                    "C-CANCEL does not correlate to the operation in flight"
                                );
                            }
                            other => {
                                // DIMSE exchanges are serialized per association
                                warn!(
                                    "ignoring interleaved message during a multi-response sequence: {:?}",
                                    match other {
                                        Message::Request(r) => r.command_field(),
                                        Message::Response(r) => r.command_field(),
                                    }
                                );
                            }
                        }
                    }
                }
                Pdu::AbortRQ { source } => return Ok(CancelCheck::Aborted(source)),
                pdu => {
                    warn!(
                        "ignoring unexpected PDU during a multi-response sequence: {}",
                        pdu.short_description()
                    );
                }
            }
        }
        Ok(CancelCheck::Continue)
    }

    /// Encode and send one response over the given context.
    fn respond(&mut self, presentation_context_id: u8, response: Response) -> Result<()> {
        let accepted_transfer_syntax = self
            .association
            .presentation_context(presentation_context_id)
            .and_then(|pc| pc.accepted_transfer_syntax())
            .unwrap_or(crate::uids::IMPLICIT_VR_LITTLE_ENDIAN)
            .to_string();

        let command_bytes = response.to_command_set().to_bytes();
        for pdu in split_into_pdata(
            presentation_context_id,
            PDataValueType::Command,
            &command_bytes,
            self.peer_max_pdu_length,
        ) {
            wire::write_pdu_to_wire(&mut self.stream, &mut self.write_buffer, &pdu)
                .context(SendSnafu)?;
        }
        if let Some(dataset) = response.dataset() {
            let bytes = dataset
                .encode(&accepted_transfer_syntax)
                .context(ResponseDatasetSnafu)?;
            for pdu in split_into_pdata(
                presentation_context_id,
                PDataValueType::Data,
                bytes,
                self.peer_max_pdu_length,
            ) {
                wire::write_pdu_to_wire(&mut self.stream, &mut self.write_buffer, &pdu)
                    .context(SendSnafu)?;
            }
        }
        Ok(())
    }

    /// Send a provider A-ABORT with the given reason
    /// and tear down the transport.
    fn local_abort(&mut self, reason: AbortRQServiceProviderReason) {
        let source = AbortRQSource::ServiceProvider(reason);
        let _ = wire::write_pdu_to_wire(
            &mut self.stream,
            &mut self.write_buffer,
            &Pdu::AbortRQ {
                source: source.clone(),
            },
        );
        self.machine.abort();
        self.handler.aborted(&source);
        let _ = self.stream.close();
    }
}

fn abort_with<S: Transport>(
    stream: &mut S,
    write_buffer: &mut Vec<u8>,
    reason: AbortRQServiceProviderReason,
) {
    let _ = wire::write_pdu_to_wire(
        stream,
        write_buffer,
        &Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(reason),
        },
    );
    let _ = stream.close();
}

/// A DIMSE server: the connection factory of the acceptor role.
///
/// Binds a listening socket and serves each accepted connection
/// with a fresh handler produced by the factory,
/// one association state machine and one statistics instance each.
#[derive(Debug)]
pub struct Server<F> {
    options: ServerOptions,
    handler_factory: F,
    statistics: Arc<Statistics>,
}

impl<F, H> Server<F>
where
    F: Fn() -> H,
    H: ServiceHandler,
{
    /// Create a server producing one handler per accepted connection.
    pub fn new(options: ServerOptions, handler_factory: F) -> Self {
        Server {
            options,
            handler_factory,
            statistics: Arc::new(Statistics::new()),
        }
    }

    /// The aggregate byte counters over every connection
    /// served so far.
    pub fn statistics(&self) -> Arc<Statistics> {
        Arc::clone(&self.statistics)
    }

    /// Serve one already-accepted connection to completion.
    ///
    /// The connection's byte counters are merged into the aggregate
    /// when it ends, successfully or not.
    pub fn serve_connection(&self, stream: TcpStream) -> Result<()> {
        stream
            .set_read_timeout(
                self.options
                    .timeouts
                    .associate_timeout
                    .or(self.options.timeouts.read_timeout),
            )
            .context(ConfigureSocketSnafu)?;
        stream
            .set_write_timeout(self.options.timeouts.write_timeout)
            .context(ConfigureSocketSnafu)?;

        let connection_statistics = Arc::new(Statistics::new());
        let metered = MeteredStream::new(stream, Arc::clone(&connection_statistics));

        let outcome = (|| {
            let scp = Scp::establish(&self.options, metered, (self.handler_factory)())?;
            scp.stream
                .get_ref()
                .set_read_timeout(self.options.timeouts.read_timeout)
                .context(ConfigureSocketSnafu)?;
            scp.run()
        })();

        self.statistics.merge(&connection_statistics);
        outcome
    }

    /// Bind the given address and serve incoming connections,
    /// one thread per accepted connection.
    ///
    /// Individual connection failures are logged and do not
    /// stop the listener.
    pub fn listen<A: ToSocketAddrs>(&self, address: A) -> Result<()>
    where
        F: Sync,
    {
        let listener = TcpListener::bind(address).context(BindSnafu)?;
        info!(ae_title = %self.options.ae_title, "listening for associations");

        std::thread::scope(|scope| {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let server = &*self;
                        scope.spawn(move || {
                            if let Err(e) = server.serve_connection(stream) {
                                warn!("connection ended with an error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("could not accept connection: {}", e);
                    }
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingHandler {
        released: bool,
    }

    impl ServiceHandler for RecordingHandler {
        fn association_requested(&mut self, association: &mut Association) {
            association.negotiate(
                &[crate::uids::VERIFICATION],
                &[crate::uids::IMPLICIT_VR_LITTLE_ENDIAN],
            );
        }

        fn release_requested(&mut self) {
            self.released = true;
        }
    }

    #[test]
    fn default_handler_answers_echo_with_success() {
        struct Bare;
        impl ServiceHandler for Bare {}

        let request = Request::c_echo(9);
        let response = Bare.c_echo(&request);
        assert_eq!(response.status(), Status::SUCCESS);
        assert_eq!(response.message_id_being_responded_to(), 9);
    }

    #[test]
    fn default_handler_rejects_unimplemented_services() {
        struct Bare;
        impl ServiceHandler for Bare {}

        let request = Request::n_delete(3, "1.2.3", "1.2.3.1");
        let response = Bare.n_delete(&request);
        assert_eq!(response.status(), Status::UNRECOGNIZED_OPERATION);

        let mut responses = Bare.c_find(&Request::c_find(
            4,
            crate::uids::STUDY_ROOT_QR_FIND,
            crate::dimse::Priority::Medium,
            Dataset::new(crate::uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![]),
        ));
        let only = responses.next().unwrap();
        assert_eq!(only.status(), Status::UNRECOGNIZED_OPERATION);
        assert!(responses.next().is_none());
    }

    #[test]
    fn handler_hook_negotiates_contexts() {
        let mut handler = RecordingHandler::default();
        let mut association = Association::new("SCU", "SCP").unwrap();
        let id = association
            .add_presentation_context(crate::uids::VERIFICATION, None)
            .unwrap();
        association
            .presentation_context_mut(id)
            .unwrap()
            .add_transfer_syntax(crate::uids::IMPLICIT_VR_LITTLE_ENDIAN)
            .unwrap();
        handler.association_requested(&mut association);
        assert!(association.presentation_contexts()[0].is_accepted());

        handler.release_requested();
        assert!(handler.released);
    }
}
