//! The DIMSE request/response message model.
//!
//! [`Request`] and [`Response`] carry the correlation core shared by all
//! services (message id, SOP class/instance UIDs, and for responses the
//! status and error comment), plus a service-specific payload variant.
//! [`Message`] classifies a decoded command set into one or the other,
//! which is how the drivers dispatch incoming messages.

use snafu::{Backtrace, OptionExt, ResultExt, Snafu};

use crate::dataset::Dataset;
use crate::dimse::commands::{self, tags, CommandSet, Tag};
use crate::dimse::{CommandField, Priority, Status, DATA_SET_PRESENT, NO_DATA_SET};
use crate::uids;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// failed to decode the command set
    DecodeCommandSet {
        #[snafu(backtrace)]
        source: commands::Error,
    },

    #[snafu(display("unsupported command field code 0x{:04X}", code))]
    UnsupportedCommandField { code: u16, backtrace: Backtrace },

    #[snafu(display("missing command element {}", tag))]
    MissingField {
        tag: Tag,
        #[snafu(backtrace)]
        source: commands::Error,
    },

    #[snafu(display("invalid priority code 0x{:04X}", code))]
    InvalidPriority { code: u16, backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The service-specific part of a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    CEcho,
    CStore {
        priority: Priority,
        /// set when this store is a sub-operation of a C-MOVE
        move_originator_ae_title: Option<String>,
        move_originator_message_id: Option<u16>,
    },
    CFind {
        priority: Priority,
    },
    CGet {
        priority: Priority,
    },
    CMove {
        priority: Priority,
        move_destination: String,
    },
    /// cancels the in-flight multi-response operation
    /// with the carried message id
    CCancel,
    NCreate,
    NAction {
        action_type_id: u16,
    },
    NDelete,
    NEventReport {
        event_type_id: u16,
    },
    NGet {
        attribute_identifier_list: Vec<Tag>,
    },
    NSet,
}

/// A DIMSE request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    message_id: u16,
    sop_class_uid: String,
    sop_instance_uid: Option<String>,
    payload: RequestPayload,
    dataset: Option<Dataset>,
}

impl Request {
    /// Create a C-ECHO request against the verification SOP class.
    pub fn c_echo(message_id: u16) -> Self {
        Request {
            message_id,
            sop_class_uid: uids::VERIFICATION.to_string(),
            sop_instance_uid: None,
            payload: RequestPayload::CEcho,
            dataset: None,
        }
    }

    /// Create a C-STORE request for the given SOP instance.
    pub fn c_store(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
        priority: Priority,
        dataset: Dataset,
    ) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: Some(sop_instance_uid.into()),
            payload: RequestPayload::CStore {
                priority,
                move_originator_ae_title: None,
                move_originator_message_id: None,
            },
            dataset: Some(dataset),
        }
    }

    /// Create a C-FIND request with the given query identifier.
    pub fn c_find(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        priority: Priority,
        identifier: Dataset,
    ) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: None,
            payload: RequestPayload::CFind { priority },
            dataset: Some(identifier),
        }
    }

    /// Create a C-GET request with the given retrieve identifier.
    pub fn c_get(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        priority: Priority,
        identifier: Dataset,
    ) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: None,
            payload: RequestPayload::CGet { priority },
            dataset: Some(identifier),
        }
    }

    /// Create a C-MOVE request
    /// directing the sub-operations at `move_destination`.
    pub fn c_move(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        move_destination: impl Into<String>,
        priority: Priority,
        identifier: Dataset,
    ) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: None,
            payload: RequestPayload::CMove {
                priority,
                move_destination: move_destination.into(),
            },
            dataset: Some(identifier),
        }
    }

    /// Create a C-CANCEL for the operation
    /// started by the request with the given message id.
    ///
    /// The SOP class carried is informational only;
    /// cancellation is correlated by message id.
    pub fn c_cancel(message_id: u16, sop_class_uid: impl Into<String>) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: None,
            payload: RequestPayload::CCancel,
            dataset: None,
        }
    }

    /// Create an N-CREATE request.
    pub fn n_create(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        sop_instance_uid: Option<String>,
        attributes: Option<Dataset>,
    ) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid,
            payload: RequestPayload::NCreate,
            dataset: attributes,
        }
    }

    /// Create an N-ACTION request.
    pub fn n_action(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
        action_type_id: u16,
        action_information: Option<Dataset>,
    ) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: Some(sop_instance_uid.into()),
            payload: RequestPayload::NAction { action_type_id },
            dataset: action_information,
        }
    }

    /// Create an N-DELETE request.
    pub fn n_delete(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
    ) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: Some(sop_instance_uid.into()),
            payload: RequestPayload::NDelete,
            dataset: None,
        }
    }

    /// Create an N-EVENT-REPORT request.
    pub fn n_event_report(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
        event_type_id: u16,
        event_information: Option<Dataset>,
    ) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: Some(sop_instance_uid.into()),
            payload: RequestPayload::NEventReport { event_type_id },
            dataset: event_information,
        }
    }

    /// Create an N-GET request for the given attributes.
    pub fn n_get(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
        attribute_identifier_list: Vec<Tag>,
    ) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: Some(sop_instance_uid.into()),
            payload: RequestPayload::NGet {
                attribute_identifier_list,
            },
            dataset: None,
        }
    }

    /// Create an N-SET request with the given modification list.
    pub fn n_set(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
        modification_list: Dataset,
    ) -> Self {
        Request {
            message_id,
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: Some(sop_instance_uid.into()),
            payload: RequestPayload::NSet,
            dataset: Some(modification_list),
        }
    }

    /// The initiator-assigned message id.
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    /// The SOP class UID this request operates on.
    pub fn sop_class_uid(&self) -> &str {
        &self.sop_class_uid
    }

    /// The SOP instance UID this request operates on, if any.
    pub fn sop_instance_uid(&self) -> Option<&str> {
        self.sop_instance_uid.as_deref()
    }

    /// The service-specific payload.
    pub fn payload(&self) -> &RequestPayload {
        &self.payload
    }

    /// The data set carried with this request, if any.
    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    /// Attach a data set after construction,
    /// replacing any previous one.
    pub fn set_dataset(&mut self, dataset: Dataset) {
        self.dataset = Some(dataset);
    }

    /// The command field code of this request.
    pub fn command_field(&self) -> CommandField {
        match self.payload {
            RequestPayload::CEcho => CommandField::C_ECHO_RQ,
            RequestPayload::CStore { .. } => CommandField::C_STORE_RQ,
            RequestPayload::CFind { .. } => CommandField::C_FIND_RQ,
            RequestPayload::CGet { .. } => CommandField::C_GET_RQ,
            RequestPayload::CMove { .. } => CommandField::C_MOVE_RQ,
            RequestPayload::CCancel => CommandField::C_CANCEL_RQ,
            RequestPayload::NCreate => CommandField::N_CREATE_RQ,
            RequestPayload::NAction { .. } => CommandField::N_ACTION_RQ,
            RequestPayload::NDelete => CommandField::N_DELETE_RQ,
            RequestPayload::NEventReport { .. } => CommandField::N_EVENT_REPORT_RQ,
            RequestPayload::NGet { .. } => CommandField::N_GET_RQ,
            RequestPayload::NSet => CommandField::N_SET_RQ,
        }
    }

    /// Whether this request expects a sequence of responses
    /// rather than exactly one.
    pub fn is_multi_response(&self) -> bool {
        matches!(
            self.payload,
            RequestPayload::CFind { .. } | RequestPayload::CGet { .. } | RequestPayload::CMove { .. }
        )
    }

    /// Build the command set for this request.
    pub fn to_command_set(&self) -> CommandSet {
        let field = self.command_field();
        let mut cs = CommandSet::new();
        cs.put_u16(tags::COMMAND_FIELD, field as u16);
        cs.put_u16(
            tags::COMMAND_DATA_SET_TYPE,
            if self.dataset.is_some() {
                DATA_SET_PRESENT
            } else {
                NO_DATA_SET
            },
        );

        if let RequestPayload::CCancel = self.payload {
            // a C-CANCEL correlates through the responded-to id
            // and carries nothing else
            cs.put_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO, self.message_id);
            return cs;
        }

        cs.put_u16(tags::MESSAGE_ID, self.message_id);

        let (class_tag, instance_tag) = if uses_requested_identifiers(field) {
            (tags::REQUESTED_SOP_CLASS_UID, tags::REQUESTED_SOP_INSTANCE_UID)
        } else {
            (tags::AFFECTED_SOP_CLASS_UID, tags::AFFECTED_SOP_INSTANCE_UID)
        };
        cs.put_uid(class_tag, &self.sop_class_uid);
        if let Some(sop_instance_uid) = &self.sop_instance_uid {
            cs.put_uid(instance_tag, sop_instance_uid);
        }

        match &self.payload {
            RequestPayload::CStore {
                priority,
                move_originator_ae_title,
                move_originator_message_id,
            } => {
                cs.put_u16(tags::PRIORITY, *priority as u16);
                if let Some(ae_title) = move_originator_ae_title {
                    cs.put_text(tags::MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE, ae_title);
                }
                if let Some(id) = move_originator_message_id {
                    cs.put_u16(tags::MOVE_ORIGINATOR_MESSAGE_ID, *id);
                }
            }
            RequestPayload::CFind { priority } | RequestPayload::CGet { priority } => {
                cs.put_u16(tags::PRIORITY, *priority as u16);
            }
            RequestPayload::CMove {
                priority,
                move_destination,
            } => {
                cs.put_u16(tags::PRIORITY, *priority as u16);
                cs.put_text(tags::MOVE_DESTINATION, move_destination);
            }
            RequestPayload::NAction { action_type_id } => {
                cs.put_u16(tags::ACTION_TYPE_ID, *action_type_id);
            }
            RequestPayload::NEventReport { event_type_id } => {
                cs.put_u16(tags::EVENT_TYPE_ID, *event_type_id);
            }
            RequestPayload::NGet {
                attribute_identifier_list,
            } => {
                if !attribute_identifier_list.is_empty() {
                    cs.put_tags(
                        tags::ATTRIBUTE_IDENTIFIER_LIST,
                        attribute_identifier_list.clone(),
                    );
                }
            }
            _ => {}
        }

        cs
    }

    /// Reconstruct a request from a decoded command set.
    pub fn from_command_set(cs: &CommandSet) -> Result<Request> {
        let code = cs.command_field().context(DecodeCommandSetSnafu)?;
        let field =
            CommandField::from_code(code).context(UnsupportedCommandFieldSnafu { code })?;

        if let CommandField::C_CANCEL_RQ = field {
            let message_id = cs
                .required_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)
                .context(MissingFieldSnafu {
                    tag: tags::MESSAGE_ID_BEING_RESPONDED_TO,
                })?;
            return Ok(Request {
                message_id,
                sop_class_uid: cs
                    .str_value(tags::AFFECTED_SOP_CLASS_UID)
                    .unwrap_or_default()
                    .to_string(),
                sop_instance_uid: None,
                payload: RequestPayload::CCancel,
                dataset: None,
            });
        }

        let message_id = cs
            .required_u16(tags::MESSAGE_ID)
            .context(MissingFieldSnafu {
                tag: tags::MESSAGE_ID,
            })?;
        let (class_tag, instance_tag) = if uses_requested_identifiers(field) {
            (tags::REQUESTED_SOP_CLASS_UID, tags::REQUESTED_SOP_INSTANCE_UID)
        } else {
            (tags::AFFECTED_SOP_CLASS_UID, tags::AFFECTED_SOP_INSTANCE_UID)
        };
        let sop_class_uid = cs
            .required_str(class_tag)
            .context(MissingFieldSnafu { tag: class_tag })?
            .to_string();
        let sop_instance_uid = cs.str_value(instance_tag).map(|uid| uid.to_string());

        let payload = match field {
            CommandField::C_ECHO_RQ => RequestPayload::CEcho,
            CommandField::C_STORE_RQ => RequestPayload::CStore {
                priority: read_priority(cs)?,
                move_originator_ae_title: cs
                    .str_value(tags::MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE)
                    .map(|s| s.to_string()),
                move_originator_message_id: cs.u16_value(tags::MOVE_ORIGINATOR_MESSAGE_ID),
            },
            CommandField::C_FIND_RQ => RequestPayload::CFind {
                priority: read_priority(cs)?,
            },
            CommandField::C_GET_RQ => RequestPayload::CGet {
                priority: read_priority(cs)?,
            },
            CommandField::C_MOVE_RQ => RequestPayload::CMove {
                priority: read_priority(cs)?,
                move_destination: cs
                    .required_str(tags::MOVE_DESTINATION)
                    .context(MissingFieldSnafu {
                        tag: tags::MOVE_DESTINATION,
                    })?
                    .to_string(),
            },
            CommandField::N_CREATE_RQ => RequestPayload::NCreate,
            CommandField::N_ACTION_RQ => RequestPayload::NAction {
                action_type_id: cs
                    .required_u16(tags::ACTION_TYPE_ID)
                    .context(MissingFieldSnafu {
                        tag: tags::ACTION_TYPE_ID,
                    })?,
            },
            CommandField::N_DELETE_RQ => RequestPayload::NDelete,
            CommandField::N_EVENT_REPORT_RQ => RequestPayload::NEventReport {
                event_type_id: cs
                    .required_u16(tags::EVENT_TYPE_ID)
                    .context(MissingFieldSnafu {
                        tag: tags::EVENT_TYPE_ID,
                    })?,
            },
            CommandField::N_GET_RQ => RequestPayload::NGet {
                attribute_identifier_list: cs
                    .tags_value(tags::ATTRIBUTE_IDENTIFIER_LIST)
                    .map(|tags| tags.to_vec())
                    .unwrap_or_default(),
            },
            CommandField::N_SET_RQ => RequestPayload::NSet,
            _ => return UnsupportedCommandFieldSnafu { code }.fail(),
        };

        Ok(Request {
            message_id,
            sop_class_uid,
            sop_instance_uid,
            payload,
            dataset: None,
        })
    }
}

/// The service-specific part of a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    CEcho,
    CStore,
    CFind,
    CGet {
        remaining: Option<u16>,
        completed: Option<u16>,
        failed: Option<u16>,
        warning: Option<u16>,
    },
    CMove {
        remaining: Option<u16>,
        completed: Option<u16>,
        failed: Option<u16>,
        warning: Option<u16>,
    },
    NCreate,
    NAction {
        action_type_id: Option<u16>,
    },
    NDelete,
    NEventReport {
        event_type_id: Option<u16>,
    },
    NGet,
    NSet,
}

/// A DIMSE response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    message_id_being_responded_to: u16,
    sop_class_uid: Option<String>,
    sop_instance_uid: Option<String>,
    status: Status,
    error_comment: Option<String>,
    payload: ResponsePayload,
    dataset: Option<Dataset>,
}

impl Response {
    /// Derive a response from the request it answers.
    ///
    /// This is the only way correlating identifiers are filled in,
    /// so a response built here always points back at its request.
    pub fn from_request(request: &Request, status: Status) -> Response {
        let payload = match request.payload() {
            RequestPayload::CEcho | RequestPayload::CCancel => ResponsePayload::CEcho,
            RequestPayload::CStore { .. } => ResponsePayload::CStore,
            RequestPayload::CFind { .. } => ResponsePayload::CFind,
            RequestPayload::CGet { .. } => ResponsePayload::CGet {
                remaining: None,
                completed: None,
                failed: None,
                warning: None,
            },
            RequestPayload::CMove { .. } => ResponsePayload::CMove {
                remaining: None,
                completed: None,
                failed: None,
                warning: None,
            },
            RequestPayload::NCreate => ResponsePayload::NCreate,
            RequestPayload::NAction { action_type_id } => ResponsePayload::NAction {
                action_type_id: Some(*action_type_id),
            },
            RequestPayload::NDelete => ResponsePayload::NDelete,
            RequestPayload::NEventReport { event_type_id } => ResponsePayload::NEventReport {
                event_type_id: Some(*event_type_id),
            },
            RequestPayload::NGet { .. } => ResponsePayload::NGet,
            RequestPayload::NSet => ResponsePayload::NSet,
        };

        Response {
            message_id_being_responded_to: request.message_id(),
            sop_class_uid: Some(request.sop_class_uid().to_string()),
            sop_instance_uid: request.sop_instance_uid().map(|uid| uid.to_string()),
            status,
            error_comment: None,
            payload,
            dataset: None,
        }
    }

    /// Attach a data set (e.g. a C-FIND match identifier).
    pub fn with_dataset(mut self, dataset: Dataset) -> Response {
        self.dataset = Some(dataset);
        self
    }

    /// Attach an error comment.
    pub fn with_error_comment(mut self, comment: impl Into<String>) -> Response {
        self.error_comment = Some(comment.into());
        self
    }

    /// Record sub-operation progress counters
    /// on a C-GET or C-MOVE response.
    ///
    /// Has no effect on other services.
    pub fn with_progress(
        mut self,
        remaining: Option<u16>,
        completed: Option<u16>,
        failed: Option<u16>,
        warning: Option<u16>,
    ) -> Response {
        match &mut self.payload {
            ResponsePayload::CGet {
                remaining: r,
                completed: c,
                failed: f,
                warning: w,
            }
            | ResponsePayload::CMove {
                remaining: r,
                completed: c,
                failed: f,
                warning: w,
            } => {
                *r = remaining;
                *c = completed;
                *f = failed;
                *w = warning;
            }
            _ => {}
        }
        self
    }

    /// The message id of the request this response answers.
    pub fn message_id_being_responded_to(&self) -> u16 {
        self.message_id_being_responded_to
    }

    /// The SOP class UID, if echoed by the responder.
    pub fn sop_class_uid(&self) -> Option<&str> {
        self.sop_class_uid.as_deref()
    }

    /// The SOP instance UID, if echoed by the responder.
    pub fn sop_instance_uid(&self) -> Option<&str> {
        self.sop_instance_uid.as_deref()
    }

    /// The status of the operation.
    pub fn status(&self) -> Status {
        self.status
    }

    /// The error comment, if the responder supplied one.
    pub fn error_comment(&self) -> Option<&str> {
        self.error_comment.as_deref()
    }

    /// The service-specific payload.
    pub fn payload(&self) -> &ResponsePayload {
        &self.payload
    }

    /// The data set carried with this response, if any.
    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    /// The command field code of this response.
    pub fn command_field(&self) -> CommandField {
        match self.payload {
            ResponsePayload::CEcho => CommandField::C_ECHO_RSP,
            ResponsePayload::CStore => CommandField::C_STORE_RSP,
            ResponsePayload::CFind => CommandField::C_FIND_RSP,
            ResponsePayload::CGet { .. } => CommandField::C_GET_RSP,
            ResponsePayload::CMove { .. } => CommandField::C_MOVE_RSP,
            ResponsePayload::NCreate => CommandField::N_CREATE_RSP,
            ResponsePayload::NAction { .. } => CommandField::N_ACTION_RSP,
            ResponsePayload::NDelete => CommandField::N_DELETE_RSP,
            ResponsePayload::NEventReport { .. } => CommandField::N_EVENT_REPORT_RSP,
            ResponsePayload::NGet => CommandField::N_GET_RSP,
            ResponsePayload::NSet => CommandField::N_SET_RSP,
        }
    }

    /// Build the command set for this response.
    pub fn to_command_set(&self) -> CommandSet {
        let mut cs = CommandSet::new();
        cs.put_u16(tags::COMMAND_FIELD, self.command_field() as u16);
        cs.put_u16(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            self.message_id_being_responded_to,
        );
        cs.put_u16(tags::STATUS, self.status.code());
        cs.put_u16(
            tags::COMMAND_DATA_SET_TYPE,
            if self.dataset.is_some() {
                DATA_SET_PRESENT
            } else {
                NO_DATA_SET
            },
        );
        if let Some(sop_class_uid) = &self.sop_class_uid {
            cs.put_uid(tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
        }
        if let Some(sop_instance_uid) = &self.sop_instance_uid {
            cs.put_uid(tags::AFFECTED_SOP_INSTANCE_UID, sop_instance_uid);
        }
        if let Some(comment) = &self.error_comment {
            cs.put_text(tags::ERROR_COMMENT, comment);
        }

        match &self.payload {
            ResponsePayload::CGet {
                remaining,
                completed,
                failed,
                warning,
            }
            | ResponsePayload::CMove {
                remaining,
                completed,
                failed,
                warning,
            } => {
                if let Some(count) = remaining {
                    cs.put_u16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS, *count);
                }
                if let Some(count) = completed {
                    cs.put_u16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, *count);
                }
                if let Some(count) = failed {
                    cs.put_u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS, *count);
                }
                if let Some(count) = warning {
                    cs.put_u16(tags::NUMBER_OF_WARNING_SUBOPERATIONS, *count);
                }
            }
            ResponsePayload::NAction {
                action_type_id: Some(id),
            } => {
                cs.put_u16(tags::ACTION_TYPE_ID, *id);
            }
            ResponsePayload::NEventReport {
                event_type_id: Some(id),
            } => {
                cs.put_u16(tags::EVENT_TYPE_ID, *id);
            }
            _ => {}
        }

        cs
    }

    /// Reconstruct a response from a decoded command set.
    pub fn from_command_set(cs: &CommandSet) -> Result<Response> {
        let code = cs.command_field().context(DecodeCommandSetSnafu)?;
        let field =
            CommandField::from_code(code).context(UnsupportedCommandFieldSnafu { code })?;

        let remaining = cs.u16_value(tags::NUMBER_OF_REMAINING_SUBOPERATIONS);
        let completed = cs.u16_value(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS);
        let failed = cs.u16_value(tags::NUMBER_OF_FAILED_SUBOPERATIONS);
        let warning = cs.u16_value(tags::NUMBER_OF_WARNING_SUBOPERATIONS);

        let payload = match field {
            CommandField::C_ECHO_RSP => ResponsePayload::CEcho,
            CommandField::C_STORE_RSP => ResponsePayload::CStore,
            CommandField::C_FIND_RSP => ResponsePayload::CFind,
            CommandField::C_GET_RSP => ResponsePayload::CGet {
                remaining,
                completed,
                failed,
                warning,
            },
            CommandField::C_MOVE_RSP => ResponsePayload::CMove {
                remaining,
                completed,
                failed,
                warning,
            },
            CommandField::N_CREATE_RSP => ResponsePayload::NCreate,
            CommandField::N_ACTION_RSP => ResponsePayload::NAction {
                action_type_id: cs.u16_value(tags::ACTION_TYPE_ID),
            },
            CommandField::N_DELETE_RSP => ResponsePayload::NDelete,
            CommandField::N_EVENT_REPORT_RSP => ResponsePayload::NEventReport {
                event_type_id: cs.u16_value(tags::EVENT_TYPE_ID),
            },
            CommandField::N_GET_RSP => ResponsePayload::NGet,
            CommandField::N_SET_RSP => ResponsePayload::NSet,
            _ => return UnsupportedCommandFieldSnafu { code }.fail(),
        };

        Ok(Response {
            message_id_being_responded_to: cs
                .required_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)
                .context(MissingFieldSnafu {
                    tag: tags::MESSAGE_ID_BEING_RESPONDED_TO,
                })?,
            sop_class_uid: cs
                .str_value(tags::AFFECTED_SOP_CLASS_UID)
                .map(|uid| uid.to_string()),
            sop_instance_uid: cs
                .str_value(tags::AFFECTED_SOP_INSTANCE_UID)
                .map(|uid| uid.to_string()),
            status: Status(cs.required_u16(tags::STATUS).context(MissingFieldSnafu {
                tag: tags::STATUS,
            })?),
            error_comment: cs
                .str_value(tags::ERROR_COMMENT)
                .map(|comment| comment.to_string()),
            payload,
            dataset: None,
        })
    }
}

/// A decoded DIMSE message, classified by direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Classify and decode a command set into a request or a response.
    pub fn from_command_set(cs: &CommandSet) -> Result<Message> {
        let code = cs.command_field().context(DecodeCommandSetSnafu)?;
        let field =
            CommandField::from_code(code).context(UnsupportedCommandFieldSnafu { code })?;
        if field.is_response() {
            Response::from_command_set(cs).map(Message::Response)
        } else {
            Request::from_command_set(cs).map(Message::Request)
        }
    }

    /// Whether the carried command set announces a data set to follow.
    pub fn expects_dataset(cs: &CommandSet) -> bool {
        cs.has_data_set()
    }

    /// Attach a received data set to the carried message.
    pub fn set_dataset(&mut self, dataset: Dataset) {
        match self {
            Message::Request(request) => request.dataset = Some(dataset),
            Message::Response(response) => response.dataset = Some(dataset),
        }
    }
}

/// Whether a request addresses its target through the
/// requested (rather than affected) SOP identifiers.
fn uses_requested_identifiers(field: CommandField) -> bool {
    matches!(
        field,
        CommandField::N_GET_RQ
            | CommandField::N_SET_RQ
            | CommandField::N_ACTION_RQ
            | CommandField::N_DELETE_RQ
    )
}

fn read_priority(cs: &CommandSet) -> Result<Priority> {
    let code = cs.u16_value(tags::PRIORITY).unwrap_or(0x0000);
    Priority::from_code(code).context(InvalidPrioritySnafu { code })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uids;
    use matches::assert_matches;
    use rstest::rstest;

    #[test]
    fn response_from_request_correlates() {
        let request = Request::c_store(
            41,
            uids::CT_IMAGE_STORAGE,
            "1.2.3.4.5",
            Priority::Medium,
            Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![0; 8]),
        );
        let response = Response::from_request(&request, Status::SUCCESS);

        assert_eq!(response.message_id_being_responded_to(), 41);
        assert_eq!(response.sop_class_uid(), Some(uids::CT_IMAGE_STORAGE));
        assert_eq!(response.sop_instance_uid(), Some("1.2.3.4.5"));
        assert_eq!(response.status(), Status::SUCCESS);
        assert_matches!(response.payload(), ResponsePayload::CStore);
    }

    #[test]
    fn echo_request_round_trip() {
        let request = Request::c_echo(3);
        let cs = request.to_command_set();
        assert!(!cs.has_data_set());

        let decoded = Request::from_command_set(&CommandSet::from_bytes(&cs.to_bytes()).unwrap())
            .unwrap();
        assert_eq!(decoded, request);
    }

    #[rstest]
    #[case(Request::c_find(
        5,
        uids::STUDY_ROOT_QR_FIND,
        Priority::High,
        Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![1, 2]),
    ))]
    #[case(Request::c_move(
        6,
        uids::STUDY_ROOT_QR_MOVE,
        "STORE-SCP",
        Priority::Medium,
        Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![1, 2]),
    ))]
    #[case(Request::n_action(7, "1.2.840.10008.1.20.1", "1.2.840.10008.1.20.1.1", 1, None))]
    #[case(Request::n_get(8, "1.2.3", "1.2.3.1", vec![Tag(0x0010, 0x0010)]))]
    fn request_command_set_round_trip(#[case] request: Request) {
        let cs = request.to_command_set();
        let decoded = CommandSet::from_bytes(&cs.to_bytes()).unwrap();
        let rebuilt = Request::from_command_set(&decoded).unwrap();

        assert_eq!(rebuilt.message_id(), request.message_id());
        assert_eq!(rebuilt.sop_class_uid(), request.sop_class_uid());
        assert_eq!(rebuilt.sop_instance_uid(), request.sop_instance_uid());
        assert_eq!(rebuilt.payload(), request.payload());
    }

    #[test]
    fn cancel_round_trip_correlates_by_responded_to_id() {
        let request = Request::c_cancel(99, uids::STUDY_ROOT_QR_FIND);
        let cs = request.to_command_set();
        assert_eq!(cs.u16_value(tags::MESSAGE_ID_BEING_RESPONDED_TO), Some(99));

        let decoded = Request::from_command_set(&cs).unwrap();
        assert_eq!(decoded.message_id(), 99);
        assert_matches!(decoded.payload(), RequestPayload::CCancel);
    }

    #[test]
    fn find_response_with_progress_and_comment() {
        let request = Request::c_move(
            11,
            uids::STUDY_ROOT_QR_MOVE,
            "DEST",
            Priority::Medium,
            Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![0; 4]),
        );
        let response = Response::from_request(&request, Status::PENDING)
            .with_progress(Some(4), Some(2), Some(0), Some(0))
            .with_error_comment("still working");

        let cs = response.to_command_set();
        let rebuilt = Response::from_command_set(&cs).unwrap();

        assert_eq!(rebuilt.status(), Status::PENDING);
        assert!(rebuilt.status().is_pending());
        assert_eq!(rebuilt.error_comment(), Some("still working"));
        assert_matches!(
            rebuilt.payload(),
            ResponsePayload::CMove {
                remaining: Some(4),
                completed: Some(2),
                ..
            }
        );
    }

    #[test]
    fn message_classification() {
        let request_cs = Request::c_echo(1).to_command_set();
        assert_matches!(
            Message::from_command_set(&request_cs).unwrap(),
            Message::Request(_)
        );

        let response_cs =
            Response::from_request(&Request::c_echo(1), Status::SUCCESS).to_command_set();
        assert_matches!(
            Message::from_command_set(&response_cs).unwrap(),
            Message::Response(_)
        );

        let mut bogus = CommandSet::new();
        bogus.put_u16(tags::COMMAND_FIELD, 0x4242);
        assert_matches!(
            Message::from_command_set(&bogus),
            Err(Error::UnsupportedCommandField { code: 0x4242, .. })
        );
    }
}
