//! Per-credential accumulation of handler outcomes.

use super::{Credential, HandlerResult, Principal};
use crate::error::AuthnFailure;
use crate::messages::MessageDescriptor;
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything the handlers recorded for one submitted credential.
///
/// Failures are kept per handler name so their order is deterministic
/// regardless of the order handlers ran in.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthenticationAttempt {
    pub credential: Credential,
    pub principal: Option<Principal>,
    pub successes: BTreeMap<String, HandlerResult>,
    pub failures: BTreeMap<String, AuthnFailure>,
    pub attributes: BTreeMap<String, Value>,
}

impl AuthenticationAttempt {
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            principal: None,
            successes: BTreeMap::new(),
            failures: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    #[must_use]
    pub fn with_success(mut self, handler_name: &str, warnings: Vec<MessageDescriptor>) -> Self {
        let result = HandlerResult {
            handler_name: handler_name.to_string(),
            credential_id: self.credential.id.clone(),
            warnings,
        };
        self.successes.insert(handler_name.to_string(), result);
        self
    }

    #[must_use]
    pub fn with_failure(mut self, handler_name: &str, failure: AuthnFailure) -> Self {
        self.failures.insert(handler_name.to_string(), failure);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    #[must_use]
    pub fn has_successes(&self) -> bool {
        !self.successes.is_empty()
    }

    /// First failure by handler name.
    #[must_use]
    pub fn first_failure(&self) -> Option<(&str, AuthnFailure)> {
        self.failures
            .iter()
            .next()
            .map(|(handler, failure)| (handler.as_str(), *failure))
    }
}
