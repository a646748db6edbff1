//! Protocol data unit module.
//!
//! The types in this module represent the seven messages of the
//! DICOM Upper Layer Protocol in memory,
//! together with the enumerated reason codes
//! for association rejection and abortion.
//! [`reader`] and [`writer`] convert them from and to their wire form.
pub mod reader;
pub mod writer;

use std::fmt::Display;

pub use reader::read_pdu;
pub use writer::write_pdu;

/// The default maximum PDU size
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU size,
/// as specified by the standard
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The maximum PDU size,
/// as specified by the standard
pub const MAXIMUM_PDU_SIZE: u32 = 131_072;

/// The length of the PDU header in bytes:
/// PDU type (1), reserved (1), PDU length (4).
pub const PDU_HEADER_SIZE: u32 = 6;

/// An in-memory representation of a full protocol data unit.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Pdu {
    /// Unrecognized PDU type
    Unknown { pdu_type: u8, data: Vec<u8> },
    /// Association request (A-ASSOCIATE-RQ)
    AssociationRQ(AssociationRQ),
    /// Association acknowledgement (A-ASSOCIATE-AC)
    AssociationAC(AssociationAC),
    /// Association rejection (A-ASSOCIATE-RJ)
    AssociationRJ(AssociationRJ),
    /// P-Data (P-DATA-TF)
    PData { data: Vec<PDataValue> },
    /// Association release request (A-RELEASE-RQ)
    ReleaseRQ,
    /// Association release reply (A-RELEASE-RP)
    ReleaseRP,
    /// Association abort (A-ABORT)
    AbortRQ { source: AbortRQSource },
}

/// An in-memory representation of an association request.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AssociationRQ {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextProposed>,
    pub user_variables: Vec<UserVariableItem>,
}

impl From<AssociationRQ> for Pdu {
    fn from(value: AssociationRQ) -> Self {
        Pdu::AssociationRQ(value)
    }
}

/// An in-memory representation of an association acknowledgement.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AssociationAC {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextResult>,
    pub user_variables: Vec<UserVariableItem>,
}

impl From<AssociationAC> for Pdu {
    fn from(value: AssociationAC) -> Self {
        Pdu::AssociationAC(value)
    }
}

/// An in-memory representation of an association rejection.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AssociationRJ {
    pub result: AssociationRJResult,
    pub source: AssociationRJSource,
}

impl From<AssociationRJ> for Pdu {
    fn from(value: AssociationRJ) -> Self {
        Pdu::AssociationRJ(value)
    }
}

/// Message component for a proposed presentation context.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PresentationContextProposed {
    /// the presentation context identifier (odd, 1-255)
    pub id: u8,
    /// the abstract syntax UID
    /// (commonly referring to the requested SOP class)
    pub abstract_syntax: String,
    /// the transfer syntax UIDs offered for this context,
    /// in order of preference
    pub transfer_syntaxes: Vec<String>,
}

/// Message component for a negotiated presentation context.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PresentationContextResult {
    /// the presentation context identifier
    pub id: u8,
    /// the outcome of the negotiation for this context
    pub reason: PresentationContextResultReason,
    /// the accepted transfer syntax UID
    /// (not significant unless the reason is acceptance)
    pub transfer_syntax: String,
}

/// The outcome of a presentation context negotiation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    pub(crate) fn from(reason: u8) -> Option<Self> {
        match reason {
            0 => Some(PresentationContextResultReason::Acceptance),
            1 => Some(PresentationContextResultReason::UserRejection),
            2 => Some(PresentationContextResultReason::NoReason),
            3 => Some(PresentationContextResultReason::AbstractSyntaxNotSupported),
            4 => Some(PresentationContextResultReason::TransferSyntaxesNotSupported),
            _ => None,
        }
    }
}

impl Display for PresentationContextResultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            PresentationContextResultReason::Acceptance => "acceptance",
            PresentationContextResultReason::UserRejection => "user rejection",
            PresentationContextResultReason::NoReason => "no reason",
            PresentationContextResultReason::AbstractSyntaxNotSupported => {
                "abstract syntax not supported"
            }
            PresentationContextResultReason::TransferSyntaxesNotSupported => {
                "transfer syntaxes not supported"
            }
        };
        f.write_str(msg)
    }
}

/// Whether an association rejection is permanent or transient.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AssociationRJResult {
    Permanent = 1,
    Transient = 2,
}

impl AssociationRJResult {
    pub(crate) fn from(value: u8) -> Option<Self> {
        match value {
            1 => Some(AssociationRJResult::Permanent),
            2 => Some(AssociationRJResult::Transient),
            _ => None,
        }
    }
}

/// The source and reason of an association rejection.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum AssociationRJSource {
    ServiceUser(AssociationRJServiceUserReason),
    ServiceProviderAcse(AssociationRJServiceProviderAcseReason),
    ServiceProviderPresentation(AssociationRJServiceProviderPresentationReason),
}

impl AssociationRJSource {
    pub(crate) fn from(source: u8, reason: u8) -> Option<Self> {
        use AssociationRJServiceProviderAcseReason as Acse;
        use AssociationRJServiceProviderPresentationReason as Pres;
        use AssociationRJServiceUserReason as User;
        let result = match (source, reason) {
            (1, 1) => AssociationRJSource::ServiceUser(User::NoReasonGiven),
            (1, 2) => AssociationRJSource::ServiceUser(User::ApplicationContextNameNotSupported),
            (1, 3) => AssociationRJSource::ServiceUser(User::CallingAeTitleNotRecognized),
            (1, 7) => AssociationRJSource::ServiceUser(User::CalledAeTitleNotRecognized),
            (1, x @ 4..=6) | (1, x @ 8..=10) => AssociationRJSource::ServiceUser(User::Reserved(x)),
            (2, 1) => AssociationRJSource::ServiceProviderAcse(Acse::NoReasonGiven),
            (2, 2) => AssociationRJSource::ServiceProviderAcse(Acse::ProtocolVersionNotSupported),
            (3, 1) => AssociationRJSource::ServiceProviderPresentation(Pres::TemporaryCongestion),
            (3, 2) => AssociationRJSource::ServiceProviderPresentation(Pres::LocalLimitExceeded),
            (3, x @ 0) | (3, x @ 3..=7) => {
                AssociationRJSource::ServiceProviderPresentation(Pres::Reserved(x))
            }
            _ => return None,
        };
        Some(result)
    }
}

impl Display for AssociationRJSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJSource::ServiceUser(r) => Display::fmt(r, f),
            AssociationRJSource::ServiceProviderAcse(r) => Display::fmt(r, f),
            AssociationRJSource::ServiceProviderPresentation(r) => Display::fmt(r, f),
        }
    }
}

/// Rejection reasons attributed to the service user.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum AssociationRJServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAeTitleNotRecognized,
    CalledAeTitleNotRecognized,
    Reserved(u8),
}

impl Display for AssociationRJServiceUserReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceUserReason::NoReasonGiven => f.write_str("no reason given"),
            AssociationRJServiceUserReason::ApplicationContextNameNotSupported => {
                f.write_str("application context name not supported")
            }
            AssociationRJServiceUserReason::CallingAeTitleNotRecognized => {
                f.write_str("calling AE title not recognized")
            }
            AssociationRJServiceUserReason::CalledAeTitleNotRecognized => {
                f.write_str("called AE title not recognized")
            }
            AssociationRJServiceUserReason::Reserved(code) => write!(f, "reserved code {}", code),
        }
    }
}

/// Rejection reasons attributed to the ACSE function of the provider.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum AssociationRJServiceProviderAcseReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
}

impl Display for AssociationRJServiceProviderAcseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceProviderAcseReason::NoReasonGiven => f.write_str("no reason given"),
            AssociationRJServiceProviderAcseReason::ProtocolVersionNotSupported => {
                f.write_str("protocol version not supported")
            }
        }
    }
}

/// Rejection reasons attributed to the presentation function of the provider.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum AssociationRJServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

impl Display for AssociationRJServiceProviderPresentationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceProviderPresentationReason::TemporaryCongestion => {
                f.write_str("temporary congestion")
            }
            AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => {
                f.write_str("local limit exceeded")
            }
            AssociationRJServiceProviderPresentationReason::Reserved(code) => {
                write!(f, "reserved code {}", code)
            }
        }
    }
}

/// A presentation data value item of a P-DATA-TF PDU:
/// one fragment of a DIMSE message.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PDataValue {
    /// the presentation context this fragment belongs to
    pub presentation_context_id: u8,
    /// whether the fragment is command or data set material
    pub value_type: PDataValueType,
    /// whether this is the last fragment of its stream
    pub is_last: bool,
    /// the fragment payload
    pub data: Vec<u8>,
}

/// Whether a presentation data value fragment
/// carries command set or data set bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PDataValueType {
    Command,
    Data,
}

/// The source of an A-ABORT.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum AbortRQSource {
    ServiceUser,
    ServiceProvider(AbortRQServiceProviderReason),
    Reserved,
}

impl AbortRQSource {
    pub(crate) fn from(source: u8, reason: u8) -> Option<Self> {
        use AbortRQServiceProviderReason as Provider;
        let result = match (source, reason) {
            (0, _) => AbortRQSource::ServiceUser,
            (1, _) => AbortRQSource::Reserved,
            (2, 0) => AbortRQSource::ServiceProvider(Provider::ReasonNotSpecified),
            (2, 1) => AbortRQSource::ServiceProvider(Provider::UnrecognizedPdu),
            (2, 2) => AbortRQSource::ServiceProvider(Provider::UnexpectedPdu),
            (2, 3) => AbortRQSource::ServiceProvider(Provider::Reserved),
            (2, 4) => AbortRQSource::ServiceProvider(Provider::UnrecognizedPduParameter),
            (2, 5) => AbortRQSource::ServiceProvider(Provider::UnexpectedPduParameter),
            (2, 6) => AbortRQSource::ServiceProvider(Provider::InvalidPduParameter),
            _ => return None,
        };
        Some(result)
    }
}

/// The provider reasons of an A-ABORT.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AbortRQServiceProviderReason {
    /// Reason not specified
    ReasonNotSpecified,
    /// Unrecognized PDU
    UnrecognizedPdu,
    /// Unexpected PDU
    UnexpectedPdu,
    /// Reserved
    Reserved,
    /// Unrecognized PDU parameter
    UnrecognizedPduParameter,
    /// Unexpected PDU parameter
    UnexpectedPduParameter,
    /// Invalid PDU parameter
    InvalidPduParameter,
}

impl Display for AbortRQServiceProviderReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            AbortRQServiceProviderReason::ReasonNotSpecified => "reason not specified",
            AbortRQServiceProviderReason::UnrecognizedPdu => "unrecognized PDU",
            AbortRQServiceProviderReason::UnexpectedPdu => "unexpected PDU",
            AbortRQServiceProviderReason::Reserved => "reserved code",
            AbortRQServiceProviderReason::UnrecognizedPduParameter => "unrecognized PDU parameter",
            AbortRQServiceProviderReason::UnexpectedPduParameter => "unexpected PDU parameter",
            AbortRQServiceProviderReason::InvalidPduParameter => "invalid PDU parameter",
        };
        f.write_str(msg)
    }
}

/// A variable item of an A-ASSOCIATE-RQ or A-ASSOCIATE-AC PDU.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum PduVariableItem {
    Unknown(u8),
    ApplicationContext(String),
    PresentationContextProposed(PresentationContextProposed),
    PresentationContextResult(PresentationContextResult),
    UserVariables(Vec<UserVariableItem>),
}

/// A sub-item of the user information item.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum UserVariableItem {
    Unknown(u8, Vec<u8>),
    MaxLength(u32),
    ImplementationClassUID(String),
    ImplementationVersionName(String),
    AsynchronousOperationsWindow {
        max_operations_invoked: u16,
        max_operations_performed: u16,
    },
    SopClassExtendedNegotiation(String, Vec<u8>),
    UserIdentityItem(UserIdentity),
    UserIdentityServerResponse(Vec<u8>),
}

/// A user identity negotiation sub-item.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct UserIdentity {
    positive_response_requested: bool,
    identity_type: UserIdentityType,
    primary_field: Vec<u8>,
    secondary_field: Vec<u8>,
}

impl UserIdentity {
    pub fn new(
        positive_response_requested: bool,
        identity_type: UserIdentityType,
        primary_field: Vec<u8>,
        secondary_field: Vec<u8>,
    ) -> Self {
        UserIdentity {
            positive_response_requested,
            identity_type,
            primary_field,
            secondary_field,
        }
    }

    pub fn positive_response_requested(&self) -> bool {
        self.positive_response_requested
    }

    pub fn identity_type(&self) -> UserIdentityType {
        self.identity_type
    }

    pub fn primary_field(&self) -> &[u8] {
        &self.primary_field
    }

    pub fn secondary_field(&self) -> &[u8] {
        &self.secondary_field
    }
}

/// The type of a user identity.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum UserIdentityType {
    Username,
    UsernamePassword,
    KerberosServiceTicket,
    SamlAssertion,
    Jwt,
}

impl UserIdentityType {
    pub(crate) fn from(user_identity_type: u8) -> Option<Self> {
        match user_identity_type {
            1 => Some(Self::Username),
            2 => Some(Self::UsernamePassword),
            3 => Some(Self::KerberosServiceTicket),
            4 => Some(Self::SamlAssertion),
            5 => Some(Self::Jwt),
            _ => None,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Username => 1,
            Self::UsernamePassword => 2,
            Self::KerberosServiceTicket => 3,
            Self::SamlAssertion => 4,
            Self::Jwt => 5,
        }
    }
}

impl Pdu {
    /// Provide a short description of the PDU,
    /// which abbreviates P-Data payloads to their lengths.
    pub fn short_description(&self) -> impl std::fmt::Display + '_ {
        PduShortDescription(self)
    }
}

struct PduShortDescription<'a>(&'a Pdu);

impl std::fmt::Display for PduShortDescription<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Pdu::Unknown { pdu_type, data } => {
                write!(
                    f,
                    "Unknown {{ pdu_type: {}, data: {} bytes }}",
                    pdu_type,
                    data.len()
                )
            }
            Pdu::AssociationRQ { .. }
            | Pdu::AssociationAC { .. }
            | Pdu::AssociationRJ { .. }
            | Pdu::ReleaseRQ
            | Pdu::ReleaseRP
            | Pdu::AbortRQ { .. } => std::fmt::Debug::fmt(self.0, f),
            Pdu::PData { data } => {
                write!(f, "PData [")?;
                for (i, pdv) in data.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "({:?}, {} bytes)", pdv.value_type, pdv.data.len())?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdu_short_description() {
        let pdu = Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        };
        assert_eq!(
            &pdu.short_description().to_string(),
            "AbortRQ { source: ServiceUser }",
        );

        let pdu = Pdu::PData {
            data: vec![PDataValue {
                is_last: true,
                presentation_context_id: 3,
                value_type: PDataValueType::Data,
                data: vec![0x55; 256],
            }],
        };
        assert_eq!(&pdu.short_description().to_string(), "PData [(Data, 256 bytes)]");
    }

    #[test]
    fn reject_source_codes() {
        assert_eq!(
            AssociationRJSource::from(1, 3),
            Some(AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CallingAeTitleNotRecognized
            ))
        );
        assert_eq!(
            AssociationRJSource::from(2, 2),
            Some(AssociationRJSource::ServiceProviderAcse(
                AssociationRJServiceProviderAcseReason::ProtocolVersionNotSupported
            ))
        );
        assert_eq!(AssociationRJSource::from(4, 1), None);
    }

    #[test]
    fn abort_source_codes() {
        assert_eq!(
            AbortRQSource::from(2, 1),
            Some(AbortRQSource::ServiceProvider(
                AbortRQServiceProviderReason::UnrecognizedPdu
            ))
        );
        assert_eq!(AbortRQSource::from(3, 0), None);
    }
}
