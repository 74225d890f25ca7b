//! Authentication flow state machine.
//!
//! Flow Overview:
//! 1) `INITIAL`: authorize the target service, load the session handed over by
//!    the transport and decide SSO participation.
//! 2) Without credentials, a participating session either yields a service
//!    ticket directly or just confirms the session; a non-participating one
//!    requires renewal; no session means credentials (or a gateway redirect).
//! 3) With credentials, the finalizer produces one authentication
//!    (`CREDENTIALS_ACCEPTED`), which is reconciled with the session
//!    (`SESSION_ESTABLISHED` or `SESSION_ESTABLISHED_WITH_WARNINGS`).
//! 4) A target service then gets a service ticket (`SERVICE_TICKET_ISSUED`).
//!
//! Transitions are computed by the pure [`step`] function; every pair it does
//! not define ends in `TERMINAL_ERROR`.

mod orchestrator;

pub use orchestrator::FlowOrchestrator;

use crate::adaptive::ClientInfo;
use crate::authentication::AuthenticationAttempt;
use crate::messages::Message;
use crate::service::Service;
use serde::Serialize;
use std::fmt;
use ulid::Ulid;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    Initial,
    CredentialsRequired,
    Gateway,
    CredentialsAccepted,
    CredentialsRejected,
    MultifactorRequired,
    SessionEstablished,
    SessionEstablishedWithWarnings,
    ServiceTicketIssued,
    RenewRequired,
    TerminalError,
}

impl FlowState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::CredentialsRequired => "CREDENTIALS_REQUIRED",
            Self::Gateway => "GATEWAY",
            Self::CredentialsAccepted => "CREDENTIALS_ACCEPTED",
            Self::CredentialsRejected => "CREDENTIALS_REJECTED",
            Self::MultifactorRequired => "MULTIFACTOR_REQUIRED",
            Self::SessionEstablished => "SESSION_ESTABLISHED",
            Self::SessionEstablishedWithWarnings => "SESSION_ESTABLISHED_WITH_WARNINGS",
            Self::ServiceTicketIssued => "SERVICE_TICKET_ISSUED",
            Self::RenewRequired => "RENEW_REQUIRED",
            Self::TerminalError => "TERMINAL_ERROR",
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened while in the current state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlowEvent {
    /// No credentials and no usable session.
    CredentialsMissing,
    /// Gateway request without a usable session.
    GatewayBypass,
    /// Existing session participates; nothing else to do.
    SessionParticipating,
    /// Existing session may not be reused for this request.
    RenewRequested,
    CredentialsFinalized,
    CredentialsRejected,
    MultifactorRequested,
    SessionReconciled { warnings: bool },
    ServiceTicketGranted,
    Failed,
}

/// The transition table.
#[must_use]
pub fn step(state: FlowState, event: FlowEvent) -> FlowState {
    use FlowEvent as E;
    use FlowState as S;

    match (state, event) {
        (S::Initial, E::CredentialsMissing) => S::CredentialsRequired,
        (S::Initial, E::GatewayBypass) => S::Gateway,
        (S::Initial, E::SessionParticipating) => S::SessionEstablished,
        (S::Initial, E::RenewRequested) => S::RenewRequired,
        (S::Initial, E::CredentialsFinalized) => S::CredentialsAccepted,
        (S::Initial, E::CredentialsRejected) => S::CredentialsRejected,
        (S::Initial | S::CredentialsAccepted, E::MultifactorRequested) => S::MultifactorRequired,
        (
            S::Initial | S::SessionEstablished | S::SessionEstablishedWithWarnings,
            E::ServiceTicketGranted,
        ) => S::ServiceTicketIssued,
        (S::CredentialsAccepted, E::SessionReconciled { warnings: false }) => {
            S::SessionEstablished
        }
        (S::CredentialsAccepted, E::SessionReconciled { warnings: true }) => {
            S::SessionEstablishedWithWarnings
        }
        _ => S::TerminalError,
    }
}

/// Everything the transport extracted from one inbound request.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: Ulid,
    pub existing_session_id: Option<String>,
    pub service: Option<Service>,
    pub renew: bool,
    pub gateway: bool,
    pub public_workstation: bool,
    pub attempts: Vec<AuthenticationAttempt>,
    pub client: ClientInfo,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: Ulid::new(),
            existing_session_id: None,
            service: None,
            renew: false,
            gateway: false,
            public_workstation: false,
            attempts: Vec::new(),
            client: ClientInfo::default(),
        }
    }

    #[must_use]
    pub fn with_existing_session(mut self, id: Option<String>) -> Self {
        self.existing_session_id = id;
        self
    }

    #[must_use]
    pub fn with_service(mut self, service: Service) -> Self {
        self.service = Some(service);
        self
    }

    #[must_use]
    pub fn with_renew(mut self, renew: bool) -> Self {
        self.renew = renew;
        self
    }

    #[must_use]
    pub fn with_gateway(mut self, gateway: bool) -> Self {
        self.gateway = gateway;
        self
    }

    #[must_use]
    pub fn with_public_workstation(mut self, public_workstation: bool) -> Self {
        self.public_workstation = public_workstation;
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: AuthenticationAttempt) -> Self {
        self.attempts.push(attempt);
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.attempts.is_empty()
    }
}

/// The single result of evaluating a request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Transition {
    pub request_id: String,
    pub state: FlowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_granting_ticket_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_ticket_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multifactor_provider: Option<String>,
    pub messages: Vec<Message>,
    /// Set for internal faults that operations must look at.
    pub alert: bool,
}
