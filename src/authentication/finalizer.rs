//! Merge every authentication attempt of a request into one result.
//!
//! Rules:
//! - No attempts at all is a caller bug and surfaces as `Prevented`.
//! - Fail-closed: any recorded failure rejects the request.
//! - Fail-open: failures are tolerated while at least one handler succeeded.
//! - The principal comes from the first attempt that resolved one; a different
//!   principal later on is a `MixedPrincipal` rejection.
//! - Maps are unioned in attempt order, later entries replacing earlier ones.

use super::{
    Authentication, AuthenticationAttempt, Principal, ATTR_REMEMBER_ME, ATTR_SUCCESSFUL_HANDLERS,
};
use crate::clock::Clock;
use crate::error::{AuthnFailure, FlowError};
use crate::policy::FailureMode;
use crate::service::Service;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct AuthenticationFinalizer {
    mode: FailureMode,
    clock: Arc<dyn Clock>,
}

impl AuthenticationFinalizer {
    #[must_use]
    pub fn new(mode: FailureMode, clock: Arc<dyn Clock>) -> Self {
        Self { mode, clock }
    }

    /// # Errors
    /// - `Prevented` when no attempt was recorded or no principal was resolved.
    /// - `AuthenticationFailed` with the classified sub-kind otherwise.
    #[instrument(skip_all, fields(attempts = attempts.len(), service = ?service.map(Service::id)))]
    pub fn finalize(
        &self,
        attempts: &[AuthenticationAttempt],
        service: Option<&Service>,
    ) -> Result<Authentication, FlowError> {
        if attempts.is_empty() {
            return Err(FlowError::Prevented(
                "no authentication attempts were recorded".to_string(),
            ));
        }

        let first_failure = attempts.iter().find_map(|attempt| attempt.first_failure());
        let succeeded = attempts.iter().any(AuthenticationAttempt::has_successes);

        match (self.mode, first_failure) {
            (FailureMode::FailClosed, Some((handler, failure))) => {
                debug!(handler, ?failure, "failing closed on handler failure");
                return Err(FlowError::AuthenticationFailed {
                    failure,
                    handler: Some(handler.to_string()),
                });
            }
            (FailureMode::FailOpen, Some((handler, failure))) if !succeeded => {
                return Err(FlowError::AuthenticationFailed {
                    failure,
                    handler: Some(handler.to_string()),
                });
            }
            _ => {}
        }

        if !succeeded {
            return Err(FlowError::rejected(AuthnFailure::UnsupportedCredential));
        }

        let mut principal = elect_principal(attempts)?;
        let mut authentication = Authentication::new(principal.clone(), self.clock.now());

        for attempt in attempts {
            if let Some(contributed) = &attempt.principal {
                principal.attributes.extend(
                    contributed
                        .attributes
                        .iter()
                        .map(|(name, value)| (name.clone(), value.clone())),
                );
            }
            authentication.credentials.push(attempt.credential.clone());
            authentication.successes.extend(
                attempt
                    .successes
                    .iter()
                    .map(|(name, result)| (name.clone(), result.clone())),
            );
            authentication.attributes.extend(
                attempt
                    .attributes
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone())),
            );
        }
        authentication.principal = principal;

        let handlers: Vec<Value> = authentication
            .successes
            .keys()
            .map(|name| Value::String(name.clone()))
            .collect();
        authentication
            .attributes
            .insert(ATTR_SUCCESSFUL_HANDLERS.to_string(), Value::Array(handlers));

        if authentication
            .credentials
            .iter()
            .any(|credential| credential.remember_me)
        {
            authentication
                .attributes
                .insert(ATTR_REMEMBER_ME.to_string(), Value::Bool(true));
        }

        debug!(
            principal = %authentication.principal.id,
            successes = authentication.successes.len(),
            "authentication finalized"
        );
        Ok(authentication)
    }
}

fn elect_principal(attempts: &[AuthenticationAttempt]) -> Result<Principal, FlowError> {
    let mut resolved = attempts.iter().filter_map(|attempt| attempt.principal.as_ref());
    let elected = resolved.next().ok_or_else(|| {
        FlowError::Prevented("authentication succeeded without resolving a principal".to_string())
    })?;
    if resolved.any(|other| other.id != elected.id) {
        return Err(FlowError::rejected(AuthnFailure::MixedPrincipal));
    }
    Ok(Principal::new(&elected.id))
}
