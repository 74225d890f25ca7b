//! Map flow errors to named outcomes.
//!
//! Handlers are evaluated strictly in the order they were registered and the
//! first non-empty answer wins. Order is policy: a specific account-status
//! handler must sit before the generic credential-failure handler or it will
//! never be consulted.

use crate::error::{AuthnFailure, FlowError, InvalidTicketDetail, UnauthorizedReason};
use crate::messages::{Message, MessageSink};
use crate::service::Service;
use serde::Serialize;
use tracing::{debug, error};

pub const OUTCOME_ERROR: &str = "error";
pub const OUTCOME_AUTHENTICATION_FAILURE: &str = "authenticationFailure";
pub const OUTCOME_ADAPTIVE_POLICY_DENIED: &str = "adaptivePolicyDenied";
pub const OUTCOME_UNAVAILABLE: &str = "unavailable";
pub const OUTCOME_INVALID_TICKET: &str = "invalidTicket";
pub const OUTCOME_UNAUTHORIZED_SERVICE: &str = "unauthorizedService";
pub const OUTCOME_UNAUTHORIZED_SSO_SERVICE: &str = "unauthorizedSsoService";
pub const OUTCOME_AUTHENTICATION_PREVENTED: &str = "authenticationPrevented";

pub const CODE_UNKNOWN_ERROR: &str = "error.unknown";

/// What the resolver knows about the request besides the error itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResolutionContext<'a> {
    pub service: Option<&'a Service>,
    pub renew: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Resolution {
    pub outcome: String,
    pub message: Message,
}

impl Resolution {
    #[must_use]
    pub fn new(outcome: &str, message: Message) -> Self {
        Self {
            outcome: outcome.to_string(),
            message,
        }
    }
}

pub trait TransitionHandler: Send + Sync {
    fn supports(&self, error: &FlowError, context: &ResolutionContext<'_>) -> bool;

    fn handle(&self, error: &FlowError, context: &ResolutionContext<'_>) -> Option<Resolution>;
}

type Predicate = dyn Fn(&FlowError) -> bool + Send + Sync;
type Handler = dyn Fn(&FlowError) -> Option<Resolution> + Send + Sync;

/// A `(predicate, handler)` pair.
pub struct PredicateHandler {
    name: &'static str,
    predicate: Box<Predicate>,
    handler: Box<Handler>,
}

impl PredicateHandler {
    pub fn new<P, H>(name: &'static str, predicate: P, handler: H) -> Self
    where
        P: Fn(&FlowError) -> bool + Send + Sync + 'static,
        H: Fn(&FlowError) -> Option<Resolution> + Send + Sync + 'static,
    {
        Self {
            name,
            predicate: Box::new(predicate),
            handler: Box::new(handler),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl TransitionHandler for PredicateHandler {
    fn supports(&self, error: &FlowError, _context: &ResolutionContext<'_>) -> bool {
        (self.predicate)(error)
    }

    fn handle(&self, error: &FlowError, _context: &ResolutionContext<'_>) -> Option<Resolution> {
        (self.handler)(error)
    }
}

pub struct ExceptionResolver {
    handlers: Vec<Box<dyn TransitionHandler>>,
}

impl Default for ExceptionResolver {
    fn default() -> Self {
        Self::new(default_handlers())
    }
}

impl ExceptionResolver {
    #[must_use]
    pub fn new(handlers: Vec<Box<dyn TransitionHandler>>) -> Self {
        Self { handlers }
    }

    /// Resolve `error` and append its message to `sink`. Never fails: errors
    /// nobody claims resolve to the generic `error` outcome.
    pub fn resolve(
        &self,
        error: &FlowError,
        context: &ResolutionContext<'_>,
        sink: &mut dyn MessageSink,
    ) -> Resolution {
        let resolution = self
            .handlers
            .iter()
            .filter(|handler| handler.supports(error, context))
            .find_map(|handler| handler.handle(error, context))
            .unwrap_or_else(|| Resolution::new(OUTCOME_ERROR, Message::error(CODE_UNKNOWN_ERROR)));

        if error.requires_alert() {
            error!(alert = true, %error, outcome = %resolution.outcome, "internal fault resolved");
        } else {
            debug!(%error, outcome = %resolution.outcome, "error resolved");
        }

        sink.add(resolution.message.clone());
        resolution
    }
}

fn account_status_outcome(failure: AuthnFailure) -> Option<&'static str> {
    match failure {
        AuthnFailure::AccountLocked => Some("accountLocked"),
        AuthnFailure::AccountDisabled => Some("accountDisabled"),
        AuthnFailure::AccountExpired => Some("accountExpired"),
        AuthnFailure::MustChangePassword => Some("mustChangePassword"),
        AuthnFailure::InvalidLoginLocation => Some("invalidLoginLocation"),
        AuthnFailure::InvalidLoginTime => Some("invalidLoginTime"),
        _ => None,
    }
}

fn failure_message(failure: AuthnFailure) -> Message {
    Message::error(format!("authenticationFailure.{}", failure.code()))
}

/// The standard handler chain.
#[must_use]
pub fn default_handlers() -> Vec<Box<dyn TransitionHandler>> {
    vec![
        Box::new(PredicateHandler::new(
            "account-status",
            |error| error.authn_failure().is_some_and(AuthnFailure::is_account_status),
            |error| {
                let failure = error.authn_failure()?;
                let outcome = account_status_outcome(failure)?;
                Some(Resolution::new(outcome, failure_message(failure)))
            },
        )),
        Box::new(PredicateHandler::new(
            "adaptive",
            |error| matches!(error, FlowError::AdaptivePolicyDenied { .. }),
            |_| {
                Some(Resolution::new(
                    OUTCOME_ADAPTIVE_POLICY_DENIED,
                    Message::error("authenticationFailure.AdaptivePolicyDenied"),
                ))
            },
        )),
        Box::new(PredicateHandler::new(
            "credential-failure",
            |error| matches!(error, FlowError::AuthenticationFailed { .. }),
            |error| {
                let failure = error.authn_failure()?;
                Some(Resolution::new(
                    OUTCOME_AUTHENTICATION_FAILURE,
                    failure_message(failure),
                ))
            },
        )),
        Box::new(PredicateHandler::new(
            "invalid-ticket",
            |error| matches!(error, FlowError::InvalidTicket { .. }),
            |error| match error {
                FlowError::InvalidTicket {
                    detail: InvalidTicketDetail::Unavailable,
                    ..
                } => Some(Resolution::new(
                    OUTCOME_UNAVAILABLE,
                    Message::error("ticketRegistry.unavailable"),
                )),
                FlowError::InvalidTicket { id, .. } => Some(Resolution::new(
                    OUTCOME_INVALID_TICKET,
                    Message::error("ticket.invalid").with_param(id.clone()),
                )),
                _ => None,
            },
        )),
        Box::new(PredicateHandler::new(
            "unauthorized-service",
            |error| matches!(error, FlowError::UnauthorizedService { .. }),
            |error| match error {
                FlowError::UnauthorizedService {
                    service,
                    reason: UnauthorizedReason::SsoDenied,
                } => Some(Resolution::new(
                    OUTCOME_UNAUTHORIZED_SSO_SERVICE,
                    Message::error("service.sso.unauthorized").with_param(service.clone()),
                )),
                FlowError::UnauthorizedService { service, .. } => Some(Resolution::new(
                    OUTCOME_UNAUTHORIZED_SERVICE,
                    Message::error("service.unauthorized").with_param(service.clone()),
                )),
                _ => None,
            },
        )),
        Box::new(PredicateHandler::new(
            "prevented",
            |error| matches!(error, FlowError::Prevented(_)),
            |_| {
                Some(Resolution::new(
                    OUTCOME_AUTHENTICATION_PREVENTED,
                    Message::error("authentication.prevented"),
                ))
            },
        )),
    ]
}
