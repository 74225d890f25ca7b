//! Authentication values produced by the finalizer and stored inside sessions.
//!
//! Flow Overview:
//! - Credential handlers (external) record their outcome on an
//!   [`AuthenticationAttempt`].
//! - The [`finalizer`] merges every attempt of a request into one
//!   [`Authentication`].
//! - The lifecycle manager compares that value with the session's current one
//!   using essential equality to pick update-in-place or reissue.

pub mod attempt;
pub mod finalizer;

pub use attempt::AuthenticationAttempt;
pub use finalizer::AuthenticationFinalizer;

use crate::messages::MessageDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute listing the handlers that succeeded, sorted by name.
pub const ATTR_SUCCESSFUL_HANDLERS: &str = "successfulAuthenticationHandlers";
/// Attribute set when any credential asked for a long-term session.
pub const ATTR_REMEMBER_ME: &str = "rememberMe";
/// Attribute naming the multifactor providers satisfied by this authentication.
pub const ATTR_AUTHN_CONTEXT_CLASS: &str = "authnContextClass";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl Principal {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }
}

/// Credential metadata. The secret itself never reaches this crate.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    #[serde(default = "default_credential_kind")]
    pub kind: String,
    #[serde(default)]
    pub remember_me: bool,
}

fn default_credential_kind() -> String {
    "password".to_string()
}

impl Credential {
    #[must_use]
    pub fn new(id: &str, kind: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            remember_me: false,
        }
    }

    #[must_use]
    pub fn with_remember_me(mut self, remember_me: bool) -> Self {
        self.remember_me = remember_me;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HandlerResult {
    pub handler_name: String,
    pub credential_id: String,
    #[serde(default)]
    pub warnings: Vec<MessageDescriptor>,
}

/// One completed authentication transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Authentication {
    pub principal: Principal,
    pub credentials: Vec<Credential>,
    pub successes: BTreeMap<String, HandlerResult>,
    pub attributes: BTreeMap<String, Value>,
    pub authentication_date: DateTime<Utc>,
}

impl Authentication {
    #[must_use]
    pub fn new(principal: Principal, authentication_date: DateTime<Utc>) -> Self {
        Self {
            principal,
            credentials: Vec::new(),
            successes: BTreeMap::new(),
            attributes: BTreeMap::new(),
            authentication_date,
        }
    }

    /// Equality on principal, credentials, successes and attributes. The
    /// authentication date is ignored.
    #[must_use]
    pub fn is_essentially_equal(&self, other: &Self) -> bool {
        self.principal == other.principal
            && self.credentials == other.credentials
            && self.successes == other.successes
            && self.attributes == other.attributes
    }

    /// Replace this record with a newer, essentially equal transaction. The
    /// newer transaction re-validated everything, so its successes and
    /// attributes win.
    pub fn supersede(&mut self, newer: Self) {
        self.principal = newer.principal;
        self.credentials = newer.credentials;
        self.successes = newer.successes;
        self.attributes = newer.attributes;
        self.authentication_date = newer.authentication_date;
    }

    /// Handler warnings in handler name order.
    #[must_use]
    pub fn warnings(&self) -> Vec<MessageDescriptor> {
        self.successes
            .values()
            .flat_map(|result| result.warnings.iter().cloned())
            .collect()
    }

    #[must_use]
    pub fn is_remember_me(&self) -> bool {
        matches!(self.attributes.get(ATTR_REMEMBER_ME), Some(Value::Bool(true)))
    }

    /// Whether this authentication already satisfied `provider`, either by a
    /// handler of that name or through the authentication context attribute.
    #[must_use]
    pub fn satisfies_provider(&self, provider: &str) -> bool {
        if self.successes.contains_key(provider) {
            return true;
        }
        match self.attributes.get(ATTR_AUTHN_CONTEXT_CLASS) {
            Some(Value::String(value)) => value == provider,
            Some(Value::Array(values)) => values
                .iter()
                .any(|value| value.as_str() == Some(provider)),
            _ => false,
        }
    }
}
