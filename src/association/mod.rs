//! DICOM association module.
//!
//! This module contains the association negotiation model and
//! the abstractions for establishing associations between
//! application entities over TCP/IP.
//!
//! The [`Association`] type describes one negotiable session:
//! the calling and called AE titles, the PDU size limits,
//! the asynchronous operations window, user identity negotiation,
//! and the set of [`PresentationContext`]s proposed for it.
//! An association requester builds one through the [`Client`][1] driver;
//! an acceptor reconstructs one from a received A-ASSOCIATE-RQ
//! and records the per-context outcomes before acknowledging.
//!
//! [1]: crate::association::client::Client
pub mod client;
pub mod machine;
pub mod pdata;
pub mod server;
pub mod wire;

use snafu::{ensure, Backtrace, OptionExt, Snafu};

use crate::dimse::Request;
use crate::pdu::{
    AssociationAC, AssociationRQ, PresentationContextProposed, PresentationContextResult,
    PresentationContextResultReason, UserIdentity, UserVariableItem,
};
use crate::uids;
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

pub use client::{Client, ClientControl, RequestOutcome};
pub use machine::{State, StateMachine, TimeoutOptions};
pub use server::{Scp, Server, ServerOptions, ServiceHandler};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("invalid application entity title `{}`", value))]
    InvalidAeTitle { value: String, backtrace: Backtrace },

    #[snafu(display("invalid maximum PDU length {}", value))]
    InvalidMaxPduLength { value: u32, backtrace: Backtrace },

    #[snafu(display("invalid asynchronous operations window {}/{}", invoked, performed))]
    InvalidAsyncOps {
        invoked: u16,
        performed: u16,
        backtrace: Backtrace,
    },

    #[snafu(display("invalid presentation context id {} (must be odd, 1-255)", id))]
    InvalidPresentationContextId { id: u8, backtrace: Backtrace },

    #[snafu(display("presentation context id {} already in use", id))]
    DuplicatePresentationContextId { id: u8, backtrace: Backtrace },

    /// no free presentation context id left
    NoFreePresentationContextId { backtrace: Backtrace },

    #[snafu(display("no presentation context with id {}", id))]
    UnknownPresentationContext { id: u8, backtrace: Backtrace },

    #[snafu(display("presentation context {} was already negotiated", id))]
    ContextAlreadyNegotiated { id: u8, backtrace: Backtrace },

    #[snafu(display("transfer syntax `{}` was not proposed for context {}", uid, id))]
    TransferSyntaxNotProposed {
        uid: String,
        id: u8,
        backtrace: Backtrace,
    },

    /// the acceptance result requires an accepted transfer syntax
    AcceptanceRequiresTransferSyntax { backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A negotiable pairing of one abstract syntax
/// with candidate transfer syntaxes.
///
/// Proposed by the association requester,
/// resolved by the acceptor to at most one accepted transfer syntax,
/// immutable once a result has been recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationContext {
    id: u8,
    abstract_syntax: String,
    transfer_syntaxes: Vec<String>,
    result: Option<PresentationContextResultReason>,
}

impl PresentationContext {
    /// Create a presentation context proposal without transfer syntaxes.
    ///
    /// The id must be an odd integer between 1 and 255.
    pub fn new(id: u8, abstract_syntax: impl Into<String>) -> Result<Self> {
        ensure!(id % 2 == 1, InvalidPresentationContextIdSnafu { id });
        Ok(PresentationContext {
            id,
            abstract_syntax: abstract_syntax.into(),
            transfer_syntaxes: Vec::new(),
            result: None,
        })
    }

    /// Create a presentation context proposal
    /// with an initial transfer syntax.
    pub fn with_transfer_syntax(
        id: u8,
        abstract_syntax: impl Into<String>,
        transfer_syntax: impl Into<String>,
    ) -> Result<Self> {
        let mut context = PresentationContext::new(id, abstract_syntax)?;
        context.transfer_syntaxes.push(transfer_syntax.into());
        Ok(context)
    }

    /// The presentation context identifier.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// The abstract syntax UID of this context.
    pub fn abstract_syntax(&self) -> &str {
        &self.abstract_syntax
    }

    /// The transfer syntax UIDs currently carried by this context:
    /// the ordered proposal before negotiation,
    /// exactly the accepted one after acceptance.
    pub fn transfer_syntaxes(&self) -> &[String] {
        &self.transfer_syntaxes
    }

    /// The negotiation result, if one was recorded.
    pub fn result(&self) -> Option<PresentationContextResultReason> {
        self.result
    }

    /// Whether this context was accepted by the acceptor.
    pub fn is_accepted(&self) -> bool {
        self.result == Some(PresentationContextResultReason::Acceptance)
    }

    /// The accepted transfer syntax,
    /// present only once the context was accepted.
    pub fn accepted_transfer_syntax(&self) -> Option<&str> {
        if self.is_accepted() {
            self.transfer_syntaxes.first().map(|uid| uid.as_str())
        } else {
            None
        }
    }

    /// Add a transfer syntax to the proposal.
    ///
    /// Fails once the context carries a negotiation result.
    pub fn add_transfer_syntax(&mut self, uid: impl Into<String>) -> Result<()> {
        ensure!(
            self.result.is_none(),
            ContextAlreadyNegotiatedSnafu { id: self.id }
        );
        let uid = uid.into();
        if !self.transfer_syntaxes.contains(&uid) {
            self.transfer_syntaxes.push(uid);
        }
        Ok(())
    }

    /// Remove a transfer syntax from the proposal.
    ///
    /// Fails once the context carries a negotiation result.
    pub fn remove_transfer_syntax(&mut self, uid: &str) -> Result<()> {
        ensure!(
            self.result.is_none(),
            ContextAlreadyNegotiatedSnafu { id: self.id }
        );
        self.transfer_syntaxes.retain(|candidate| candidate != uid);
        Ok(())
    }

    /// Whether the proposal carries the given transfer syntax.
    pub fn has_transfer_syntax(&self, uid: &str) -> bool {
        self.transfer_syntaxes.iter().any(|candidate| candidate == uid)
    }

    /// Record an acceptance for the given transfer syntax,
    /// which must be one of the proposed UIDs.
    /// The set of transfer syntaxes collapses to exactly that one.
    pub fn accept(&mut self, transfer_syntax: &str) -> Result<()> {
        ensure!(
            self.has_transfer_syntax(transfer_syntax),
            TransferSyntaxNotProposedSnafu {
                uid: transfer_syntax,
                id: self.id,
            }
        );
        self.transfer_syntaxes = vec![transfer_syntax.to_string()];
        self.result = Some(PresentationContextResultReason::Acceptance);
        Ok(())
    }

    /// Record a rejection, clearing any previously accepted syntax.
    pub fn reject(&mut self, reason: PresentationContextResultReason) -> Result<()> {
        ensure!(
            reason != PresentationContextResultReason::Acceptance,
            AcceptanceRequiresTransferSyntaxSnafu
        );
        self.result = Some(reason);
        Ok(())
    }

    /// Apply the acceptor negotiation tie-break against
    /// the transfer syntaxes this side supports:
    /// walk the offered syntaxes in proposal order
    /// and accept the first supported one.
    /// An empty support list accepts the first offered syntax.
    ///
    /// Records the result on this context and reports it.
    pub fn negotiate<T>(&mut self, supported_transfer_syntaxes: &[T]) -> PresentationContextResultReason
    where
        T: AsRef<str>,
    {
        let chosen = if supported_transfer_syntaxes.is_empty() {
            self.transfer_syntaxes.first().cloned()
        } else {
            self.transfer_syntaxes
                .iter()
                .find(|offered| {
                    supported_transfer_syntaxes
                        .iter()
                        .any(|supported| supported.as_ref() == offered.as_str())
                })
                .cloned()
        };

        match chosen {
            Some(uid) => {
                // membership was just established
                let _ = self.accept(&uid);
                PresentationContextResultReason::Acceptance
            }
            None => {
                let _ = self.reject(PresentationContextResultReason::TransferSyntaxesNotSupported);
                PresentationContextResultReason::TransferSyntaxesNotSupported
            }
        }
    }
}

/// The negotiated session descriptor of one association:
/// peer identities, PDU and operation limits,
/// user identity negotiation,
/// and the proposed presentation contexts in proposal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    calling_ae_title: String,
    called_ae_title: String,
    max_pdu_length: u32,
    implementation_class_uid: String,
    implementation_version_name: String,
    max_async_ops_invoked: u16,
    max_async_ops_performed: u16,
    async_ops_negotiated: bool,
    user_identity: Option<UserIdentity>,
    user_identity_server_response: Option<Vec<u8>>,
    presentation_contexts: Vec<PresentationContext>,
}

impl Association {
    /// Create an association descriptor
    /// between the given application entities.
    pub fn new(calling_ae_title: impl Into<String>, called_ae_title: impl Into<String>) -> Result<Self> {
        let mut association = Association {
            calling_ae_title: String::new(),
            called_ae_title: String::new(),
            max_pdu_length: crate::pdu::DEFAULT_MAX_PDU,
            implementation_class_uid: IMPLEMENTATION_CLASS_UID.to_string(),
            implementation_version_name: IMPLEMENTATION_VERSION_NAME.to_string(),
            max_async_ops_invoked: 1,
            max_async_ops_performed: 1,
            async_ops_negotiated: false,
            user_identity: None,
            user_identity_server_response: None,
            presentation_contexts: Vec::new(),
        };
        association.set_calling_ae_title(calling_ae_title)?;
        association.set_called_ae_title(called_ae_title)?;
        Ok(association)
    }

    /// The AE title of the association requester.
    pub fn calling_ae_title(&self) -> &str {
        &self.calling_ae_title
    }

    /// Set the AE title of the association requester.
    pub fn set_calling_ae_title(&mut self, value: impl Into<String>) -> Result<()> {
        self.calling_ae_title = validated_ae_title(value.into())?;
        Ok(())
    }

    /// The AE title of the association acceptor.
    pub fn called_ae_title(&self) -> &str {
        &self.called_ae_title
    }

    /// Set the AE title of the association acceptor.
    pub fn set_called_ae_title(&mut self, value: impl Into<String>) -> Result<()> {
        self.called_ae_title = validated_ae_title(value.into())?;
        Ok(())
    }

    /// The maximum PDU length this entity admits.
    pub fn max_pdu_length(&self) -> u32 {
        self.max_pdu_length
    }

    /// Set the maximum PDU length this entity admits.
    pub fn set_max_pdu_length(&mut self, value: u32) -> Result<()> {
        ensure!(value > 0, InvalidMaxPduLengthSnafu { value });
        self.max_pdu_length = value;
        Ok(())
    }

    /// The implementation class UID announced by this entity.
    pub fn implementation_class_uid(&self) -> &str {
        &self.implementation_class_uid
    }

    pub fn set_implementation_class_uid(&mut self, value: impl Into<String>) {
        self.implementation_class_uid = value.into();
    }

    /// The implementation version name announced by this entity.
    pub fn implementation_version_name(&self) -> &str {
        &self.implementation_version_name
    }

    pub fn set_implementation_version_name(&mut self, value: impl Into<String>) {
        self.implementation_version_name = value.into();
    }

    /// Whether an asynchronous operations window was negotiated.
    pub fn async_ops_negotiated(&self) -> bool {
        self.async_ops_negotiated
    }

    /// The maximum number of operations this entity may invoke
    /// without awaiting their responses.
    pub fn max_async_ops_invoked(&self) -> u16 {
        self.max_async_ops_invoked
    }

    /// The maximum number of operations this entity is willing to perform
    /// concurrently.
    pub fn max_async_ops_performed(&self) -> u16 {
        self.max_async_ops_performed
    }

    /// Negotiate an asynchronous operations window.
    /// Both bounds must be at least 1.
    pub fn set_async_ops(&mut self, invoked: u16, performed: u16) -> Result<()> {
        ensure!(
            invoked >= 1 && performed >= 1,
            InvalidAsyncOpsSnafu { invoked, performed }
        );
        self.max_async_ops_invoked = invoked;
        self.max_async_ops_performed = performed;
        self.async_ops_negotiated = true;
        Ok(())
    }

    /// The user identity proposed for this association, if any.
    pub fn user_identity(&self) -> Option<&UserIdentity> {
        self.user_identity.as_ref()
    }

    /// Propose a user identity for this association.
    pub fn set_user_identity(&mut self, identity: UserIdentity) {
        self.user_identity = Some(identity);
    }

    /// The server response to the user identity negotiation, if any.
    pub fn user_identity_server_response(&self) -> Option<&[u8]> {
        self.user_identity_server_response.as_deref()
    }

    /// Record the server response to the user identity negotiation.
    pub fn set_user_identity_server_response(&mut self, response: Vec<u8>) {
        self.user_identity_server_response = Some(response);
    }

    /// The presentation contexts of this association,
    /// in proposal order.
    pub fn presentation_contexts(&self) -> &[PresentationContext] {
        &self.presentation_contexts
    }

    /// Look up a presentation context by id.
    pub fn presentation_context(&self, id: u8) -> Option<&PresentationContext> {
        self.presentation_contexts.iter().find(|pc| pc.id == id)
    }

    /// Look up a presentation context by id, mutably.
    pub fn presentation_context_mut(&mut self, id: u8) -> Option<&mut PresentationContext> {
        self.presentation_contexts.iter_mut().find(|pc| pc.id == id)
    }

    /// Add a presentation context for the given abstract syntax
    /// and return its id.
    ///
    /// When `id` is omitted, the next unused odd id is assigned.
    pub fn add_presentation_context(
        &mut self,
        abstract_syntax: impl Into<String>,
        id: Option<u8>,
    ) -> Result<u8> {
        let id = match id {
            Some(id) => {
                ensure!(id % 2 == 1, InvalidPresentationContextIdSnafu { id });
                ensure!(
                    self.presentation_context(id).is_none(),
                    DuplicatePresentationContextIdSnafu { id }
                );
                id
            }
            None => self.next_free_context_id()?,
        };
        self.presentation_contexts
            .push(PresentationContext::new(id, abstract_syntax)?);
        Ok(id)
    }

    /// Insert an explicitly built presentation context,
    /// keeping its id, and return that id.
    pub fn insert_presentation_context(&mut self, context: PresentationContext) -> Result<u8> {
        ensure!(
            self.presentation_context(context.id).is_none(),
            DuplicatePresentationContextIdSnafu { id: context.id }
        );
        let id = context.id;
        self.presentation_contexts.push(context);
        Ok(id)
    }

    /// Add a presentation context for the given abstract syntax,
    /// or return the id of an existing context with the same
    /// abstract syntax.
    pub fn add_or_get_presentation_context(
        &mut self,
        abstract_syntax: impl Into<String>,
    ) -> Result<u8> {
        let abstract_syntax = abstract_syntax.into();
        if let Some(pc) = self
            .presentation_contexts
            .iter()
            .find(|pc| pc.abstract_syntax == abstract_syntax)
        {
            return Ok(pc.id);
        }
        self.add_presentation_context(abstract_syntax, None)
    }

    /// Derive a presentation context for the given request:
    /// its abstract syntax is the request's SOP class,
    /// its transfer syntaxes default to the crate's preferred defaults
    /// unless one is named.
    ///
    /// Returns the id of the derived or already-present context.
    pub fn add_presentation_context_from_request(
        &mut self,
        request: &Request,
        transfer_syntax: Option<&str>,
    ) -> Result<u8> {
        let id = self.add_or_get_presentation_context(request.sop_class_uid())?;
        let context = self
            .presentation_context_mut(id)
            .context(UnknownPresentationContextSnafu { id })?;
        match transfer_syntax {
            Some(uid) => context.add_transfer_syntax(uid)?,
            // default only contexts which do not carry a proposal yet,
            // so an explicitly prepared context keeps its own syntaxes
            None if context.transfer_syntaxes.is_empty() => {
                for uid in uids::DEFAULT_TRANSFER_SYNTAXES {
                    context.add_transfer_syntax(*uid)?;
                }
            }
            None => {}
        }
        Ok(id)
    }

    /// Find the first presentation context carrying both
    /// the given abstract syntax and the given transfer syntax.
    pub fn find_presentation_context(
        &self,
        abstract_syntax: &str,
        transfer_syntax: &str,
    ) -> Option<u8> {
        self.presentation_contexts
            .iter()
            .find(|pc| {
                pc.abstract_syntax == abstract_syntax && pc.has_transfer_syntax(transfer_syntax)
            })
            .map(|pc| pc.id)
    }

    /// Resolve the accepted presentation context
    /// a given request can be sent over.
    ///
    /// `None` means no context for the request's SOP class was accepted:
    /// the request cannot be sent over this association.
    pub fn accepted_presentation_context_for(&self, request: &Request) -> Option<&PresentationContext> {
        self.presentation_contexts
            .iter()
            .find(|pc| pc.abstract_syntax == request.sop_class_uid() && pc.is_accepted())
    }

    /// Apply the acceptor tie-break to every proposed context:
    /// contexts whose abstract syntax is not in `supported_abstract_syntaxes`
    /// are rejected (an empty list supports every abstract syntax);
    /// the rest accept their first offered transfer syntax
    /// present in `supported_transfer_syntaxes`
    /// (an empty list supports every transfer syntax).
    pub fn negotiate<A, T>(
        &mut self,
        supported_abstract_syntaxes: &[A],
        supported_transfer_syntaxes: &[T],
    ) where
        A: AsRef<str>,
        T: AsRef<str>,
    {
        for context in &mut self.presentation_contexts {
            let abstract_supported = supported_abstract_syntaxes.is_empty()
                || supported_abstract_syntaxes
                    .iter()
                    .any(|uid| uid.as_ref() == context.abstract_syntax);
            if !abstract_supported {
                let _ = context.reject(PresentationContextResultReason::AbstractSyntaxNotSupported);
                continue;
            }
            context.negotiate(supported_transfer_syntaxes);
        }
    }

    /// The next odd context id not yet in use.
    fn next_free_context_id(&self) -> Result<u8> {
        (1..=255_u8)
            .step_by(2)
            .find(|id| self.presentation_context(*id).is_none())
            .context(NoFreePresentationContextIdSnafu)
    }

    /// Build the A-ASSOCIATE-RQ announcing this association proposal.
    pub fn to_association_rq(&self) -> AssociationRQ {
        let mut user_variables = vec![
            UserVariableItem::MaxLength(self.max_pdu_length),
            UserVariableItem::ImplementationClassUID(self.implementation_class_uid.clone()),
            UserVariableItem::ImplementationVersionName(self.implementation_version_name.clone()),
        ];
        if self.async_ops_negotiated {
            user_variables.push(UserVariableItem::AsynchronousOperationsWindow {
                max_operations_invoked: self.max_async_ops_invoked,
                max_operations_performed: self.max_async_ops_performed,
            });
        }
        if let Some(identity) = &self.user_identity {
            user_variables.push(UserVariableItem::UserIdentityItem(identity.clone()));
        }

        AssociationRQ {
            protocol_version: 1,
            calling_ae_title: self.calling_ae_title.clone(),
            called_ae_title: self.called_ae_title.clone(),
            application_context_name: uids::APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: self
                .presentation_contexts
                .iter()
                .map(|pc| PresentationContextProposed {
                    id: pc.id,
                    abstract_syntax: pc.abstract_syntax.clone(),
                    transfer_syntaxes: pc.transfer_syntaxes.clone(),
                })
                .collect(),
            user_variables,
        }
    }

    /// Reconstruct the proposed association from a received A-ASSOCIATE-RQ.
    pub fn from_association_rq(rq: &AssociationRQ) -> Result<Association> {
        let mut association = Association::new(&rq.calling_ae_title, &rq.called_ae_title)?;
        for pc in &rq.presentation_contexts {
            let mut context = PresentationContext::new(pc.id, &pc.abstract_syntax)?;
            for uid in &pc.transfer_syntaxes {
                context.add_transfer_syntax(uid)?;
            }
            ensure!(
                association.presentation_context(pc.id).is_none(),
                DuplicatePresentationContextIdSnafu { id: pc.id }
            );
            association.presentation_contexts.push(context);
        }
        association.absorb_user_variables(&rq.user_variables)?;
        Ok(association)
    }

    /// Build the A-ASSOCIATE-AC acknowledging this association,
    /// reporting the result recorded on every proposed context.
    /// Contexts without a recorded result are reported as user-rejected.
    pub fn to_association_ac(&self) -> AssociationAC {
        let mut user_variables = vec![
            UserVariableItem::MaxLength(self.max_pdu_length),
            UserVariableItem::ImplementationClassUID(self.implementation_class_uid.clone()),
            UserVariableItem::ImplementationVersionName(self.implementation_version_name.clone()),
        ];
        if self.async_ops_negotiated {
            user_variables.push(UserVariableItem::AsynchronousOperationsWindow {
                max_operations_invoked: self.max_async_ops_invoked,
                max_operations_performed: self.max_async_ops_performed,
            });
        }
        if let Some(response) = &self.user_identity_server_response {
            user_variables.push(UserVariableItem::UserIdentityServerResponse(response.clone()));
        }

        AssociationAC {
            protocol_version: 1,
            calling_ae_title: self.calling_ae_title.clone(),
            called_ae_title: self.called_ae_title.clone(),
            application_context_name: uids::APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: self
                .presentation_contexts
                .iter()
                .map(|pc| PresentationContextResult {
                    id: pc.id,
                    reason: pc
                        .result
                        .unwrap_or(PresentationContextResultReason::UserRejection),
                    transfer_syntax: pc
                        .accepted_transfer_syntax()
                        .unwrap_or(uids::IMPLICIT_VR_LITTLE_ENDIAN)
                        .to_string(),
                })
                .collect(),
            user_variables,
        }
    }

    /// Apply the results of a received A-ASSOCIATE-AC
    /// to this association proposal.
    ///
    /// An accepted transfer syntax outside the proposed set
    /// is a protocol violation and fails.
    pub fn apply_association_ac(&mut self, ac: &AssociationAC) -> Result<()> {
        for result in &ac.presentation_contexts {
            let context = self
                .presentation_context_mut(result.id)
                .context(UnknownPresentationContextSnafu { id: result.id })?;
            match result.reason {
                PresentationContextResultReason::Acceptance => {
                    context.accept(&result.transfer_syntax)?;
                }
                reason => {
                    context.reject(reason)?;
                }
            }
        }
        self.absorb_user_variables(&ac.user_variables)?;
        Ok(())
    }

    /// Record the negotiable parameters found in peer user variables.
    fn absorb_user_variables(&mut self, user_variables: &[UserVariableItem]) -> Result<()> {
        for item in user_variables {
            match item {
                UserVariableItem::MaxLength(length) if *length > 0 => {
                    self.max_pdu_length = *length;
                }
                // zero means no maximum was specified
                UserVariableItem::MaxLength(_) => {
                    self.max_pdu_length = crate::pdu::MAXIMUM_PDU_SIZE;
                }
                UserVariableItem::ImplementationClassUID(uid) => {
                    self.implementation_class_uid = uid.clone();
                }
                UserVariableItem::ImplementationVersionName(name) => {
                    self.implementation_version_name = name.clone();
                }
                UserVariableItem::AsynchronousOperationsWindow {
                    max_operations_invoked,
                    max_operations_performed,
                } => {
                    self.set_async_ops(
                        (*max_operations_invoked).max(1),
                        (*max_operations_performed).max(1),
                    )?;
                }
                UserVariableItem::UserIdentityItem(identity) => {
                    self.user_identity = Some(identity.clone());
                }
                UserVariableItem::UserIdentityServerResponse(response) => {
                    self.user_identity_server_response = Some(response.clone());
                }
                UserVariableItem::SopClassExtendedNegotiation(..)
                | UserVariableItem::Unknown(..) => {}
            }
        }
        Ok(())
    }
}

/// Validate an application entity title:
/// non-empty after trimming, at most 16 ISO 646 characters.
fn validated_ae_title(value: String) -> Result<String> {
    let trimmed = value.trim();
    ensure!(
        !trimmed.is_empty() && trimmed.len() <= 16 && trimmed.is_ascii(),
        InvalidAeTitleSnafu { value }
    );
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimse::{Priority, Request};
    use crate::Dataset;
    use matches::assert_matches;

    fn sample_request() -> Request {
        Request::c_find(
            1,
            uids::STUDY_ROOT_QR_FIND,
            Priority::Medium,
            Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![0; 2]),
        )
    }

    #[test]
    fn ae_titles_are_validated() {
        assert_matches!(
            Association::new("", "ANY-SCP"),
            Err(Error::InvalidAeTitle { .. })
        );
        assert_matches!(
            Association::new("A-TITLE-THAT-IS-TOO-LONG", "ANY-SCP"),
            Err(Error::InvalidAeTitle { .. })
        );
        assert_matches!(
            Association::new("STÖRE-SCU", "ANY-SCP"),
            Err(Error::InvalidAeTitle { .. })
        );

        let association = Association::new(" ECHO-SCU ", "ANY-SCP").unwrap();
        assert_eq!(association.calling_ae_title(), "ECHO-SCU");
    }

    #[test]
    fn parameter_ranges_are_validated() {
        let mut association = Association::new("SCU", "SCP").unwrap();
        assert_matches!(
            association.set_max_pdu_length(0),
            Err(Error::InvalidMaxPduLength { .. })
        );
        association.set_max_pdu_length(16_384).unwrap();

        assert_matches!(
            association.set_async_ops(0, 1),
            Err(Error::InvalidAsyncOps { .. })
        );
        association.set_async_ops(2, 1).unwrap();
        assert!(association.async_ops_negotiated());
        assert_eq!(association.max_async_ops_invoked(), 2);
    }

    #[test]
    fn context_ids_are_odd_and_sequential() {
        let mut association = Association::new("SCU", "SCP").unwrap();
        let id1 = association
            .add_presentation_context(uids::VERIFICATION, None)
            .unwrap();
        let id2 = association
            .add_presentation_context(uids::CT_IMAGE_STORAGE, None)
            .unwrap();
        assert_eq!((id1, id2), (1, 3));

        assert_matches!(
            association.add_presentation_context(uids::MR_IMAGE_STORAGE, Some(2)),
            Err(Error::InvalidPresentationContextId { id: 2, .. })
        );
        assert_matches!(
            association.add_presentation_context(uids::MR_IMAGE_STORAGE, Some(1)),
            Err(Error::DuplicatePresentationContextId { id: 1, .. })
        );
        let id3 = association
            .add_presentation_context(uids::MR_IMAGE_STORAGE, Some(21))
            .unwrap();
        assert_eq!(id3, 21);
        // the next automatic id skips over the explicit 21
        let id4 = association
            .add_presentation_context(uids::ULTRASOUND_IMAGE_STORAGE, None)
            .unwrap();
        assert_eq!(id4, 5);
    }

    #[test]
    fn add_or_get_is_idempotent() {
        let mut association = Association::new("SCU", "SCP").unwrap();
        let first = association
            .add_or_get_presentation_context(uids::VERIFICATION)
            .unwrap();
        let second = association
            .add_or_get_presentation_context(uids::VERIFICATION)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(association.presentation_contexts().len(), 1);
    }

    #[test]
    fn context_from_request_defaults_transfer_syntaxes() {
        let mut association = Association::new("SCU", "SCP").unwrap();
        let id = association
            .add_presentation_context_from_request(&sample_request(), None)
            .unwrap();
        let context = association.presentation_context(id).unwrap();
        assert_eq!(context.abstract_syntax(), uids::STUDY_ROOT_QR_FIND);
        assert_eq!(
            context.transfer_syntaxes(),
            &[
                uids::EXPLICIT_VR_LITTLE_ENDIAN.to_string(),
                uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string(),
            ]
        );
    }

    #[test]
    fn tie_break_accepts_first_offered_supported_syntax() {
        let mut context = PresentationContext::new(1, uids::CT_IMAGE_STORAGE).unwrap();
        context.add_transfer_syntax(uids::JPEG_BASELINE).unwrap();
        context
            .add_transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .unwrap();
        context
            .add_transfer_syntax(uids::IMPLICIT_VR_LITTLE_ENDIAN)
            .unwrap();

        // both little endian syntaxes are supported; the offer order wins
        let reason = context.negotiate(&[
            uids::IMPLICIT_VR_LITTLE_ENDIAN,
            uids::EXPLICIT_VR_LITTLE_ENDIAN,
        ]);
        assert_eq!(reason, PresentationContextResultReason::Acceptance);
        assert_eq!(
            context.accepted_transfer_syntax(),
            Some(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        );
        // acceptance collapsed the proposal
        assert_eq!(context.transfer_syntaxes().len(), 1);
    }

    #[test]
    fn tie_break_rejects_without_common_syntax() {
        let mut context = PresentationContext::new(1, uids::CT_IMAGE_STORAGE).unwrap();
        context.add_transfer_syntax(uids::JPEG_BASELINE).unwrap();

        let reason = context.negotiate(&[uids::IMPLICIT_VR_LITTLE_ENDIAN]);
        assert_eq!(
            reason,
            PresentationContextResultReason::TransferSyntaxesNotSupported
        );
        assert_eq!(context.accepted_transfer_syntax(), None);
    }

    #[test]
    fn negotiated_context_is_frozen() {
        let mut context =
            PresentationContext::with_transfer_syntax(1, uids::VERIFICATION, uids::IMPLICIT_VR_LITTLE_ENDIAN)
                .unwrap();
        context.accept(uids::IMPLICIT_VR_LITTLE_ENDIAN).unwrap();

        assert_matches!(
            context.add_transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
            Err(Error::ContextAlreadyNegotiated { id: 1, .. })
        );
        assert_matches!(
            context.remove_transfer_syntax(uids::IMPLICIT_VR_LITTLE_ENDIAN),
            Err(Error::ContextAlreadyNegotiated { id: 1, .. })
        );
    }

    #[test]
    fn accept_requires_proposed_member() {
        let mut context =
            PresentationContext::with_transfer_syntax(1, uids::VERIFICATION, uids::IMPLICIT_VR_LITTLE_ENDIAN)
                .unwrap();
        assert_matches!(
            context.accept(uids::JPEG_BASELINE),
            Err(Error::TransferSyntaxNotProposed { .. })
        );
    }

    #[test]
    fn association_rq_round_trip() {
        let mut association = Association::new("FIND-SCU", "MAIN-SCP").unwrap();
        association.set_max_pdu_length(32_768).unwrap();
        let id = association
            .add_presentation_context_from_request(&sample_request(), None)
            .unwrap();

        let rq = association.to_association_rq();
        let rebuilt = Association::from_association_rq(&rq).unwrap();

        assert_eq!(rebuilt.calling_ae_title(), "FIND-SCU");
        assert_eq!(rebuilt.called_ae_title(), "MAIN-SCP");
        assert_eq!(rebuilt.max_pdu_length(), 32_768);
        let context = rebuilt.presentation_context(id).unwrap();
        assert_eq!(context.abstract_syntax(), uids::STUDY_ROOT_QR_FIND);
        assert_eq!(
            context.transfer_syntaxes(),
            association.presentation_context(id).unwrap().transfer_syntaxes()
        );
    }

    #[test]
    fn apply_ac_updates_context_results() {
        let mut association = Association::new("SCU", "SCP").unwrap();
        let id = association
            .add_presentation_context_from_request(&sample_request(), None)
            .unwrap();

        let mut acceptor = Association::from_association_rq(&association.to_association_rq()).unwrap();
        acceptor.negotiate(
            &[uids::STUDY_ROOT_QR_FIND],
            &[uids::IMPLICIT_VR_LITTLE_ENDIAN],
        );
        association
            .apply_association_ac(&acceptor.to_association_ac())
            .unwrap();

        let context = association.presentation_context(id).unwrap();
        assert!(context.is_accepted());
        assert_eq!(
            context.accepted_transfer_syntax(),
            Some(uids::IMPLICIT_VR_LITTLE_ENDIAN)
        );
        assert!(association
            .accepted_presentation_context_for(&sample_request())
            .is_some());
    }

    #[test]
    fn accepted_context_resolution_fails_without_match() {
        let mut association = Association::new("SCU", "SCP").unwrap();
        association
            .add_presentation_context_from_request(&sample_request(), None)
            .unwrap();
        // nothing negotiated yet
        assert!(association
            .accepted_presentation_context_for(&sample_request())
            .is_none());
    }
}
