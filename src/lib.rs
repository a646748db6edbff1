//! This crate contains the types and methods needed to exchange
//! DIMSE messages with DICOM nodes through the upper layer protocol.
//!
//! It covers the protocol core between the transport
//! and the application:
//! association negotiation with its presentation context model,
//! the PDU wire codec,
//! the DIMSE request/response message model,
//! and role-specific drivers for both sides of an association.
//!
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_
//!   and their readers and writers.
//! - The [`association`] module
//!   comprises the negotiation model
//!   and the [`Client`] (requester) and [`Server`]/[`Scp`] (acceptor)
//!   drivers.
//! - The [`dimse`] module
//!   provides the command dictionary,
//!   the command set codec
//!   and the [`Request`]/[`Response`] message model.
//! - The [`dataset`] module
//!   defines the opaque data set artifact
//!   produced and consumed by an external data set codec.
//! - The [`uids`] module
//!   gathers the well-known UIDs this crate works with.
//!
//! Data set content interpretation and transport security
//! are out of scope:
//! data sets travel as encoded bytes keyed by transfer syntax,
//! and the acceptor driver works over any duplex byte stream.

pub mod association;
pub mod dataset;
pub mod dimse;
pub mod pdu;
pub mod statistics;
pub mod uids;

/// The implementation class UID announced by this crate
/// during association negotiation,
/// generated as per the standard, part 5, section B.2.
///
/// This UID may change in future versions,
/// even between patch versions.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.168233547299471269632718926584236848812";
/// The implementation version name announced by this crate
/// during association negotiation.
///
/// This name may change in future versions,
/// even between patch versions.
pub const IMPLEMENTATION_VERSION_NAME: &str = "DICOM-DIMSE 0.1";

// re-exports

pub use association::client::{Client, ClientControl, RequestOutcome};
pub use association::server::{Scp, Server, ServerOptions, ServiceHandler};
pub use association::{Association, PresentationContext};
pub use dataset::Dataset;
pub use dimse::{Request, Response, Status};
pub use pdu::read_pdu;
pub use pdu::write_pdu;
pub use pdu::Pdu;
pub use statistics::Statistics;
