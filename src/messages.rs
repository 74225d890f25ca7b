//! Severity-tagged message codes handed to the presentation layer.
//!
//! The core never renders text. Every message carries a stable code that a
//! localization layer resolves, plus positional parameters.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub severity: Severity,
    pub code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

impl Message {
    #[must_use]
    pub fn new(severity: Severity, code: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn info(code: impl Into<String>) -> Self {
        Self::new(Severity::Info, code)
    }

    #[must_use]
    pub fn warning(code: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code)
    }

    #[must_use]
    pub fn error(code: impl Into<String>) -> Self {
        Self::new(Severity::Error, code)
    }

    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }
}

/// A warning raised by an authentication handler, e.g. an upcoming password
/// expiration. Carried inside handler results until the flow turns it into a
/// [`Message`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub code: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl MessageDescriptor {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    #[must_use]
    pub fn to_warning(&self) -> Message {
        Message {
            severity: Severity::Warning,
            code: self.code.clone(),
            params: self.params.clone(),
        }
    }
}

/// Destination for messages produced while resolving a request.
pub trait MessageSink {
    fn add(&mut self, message: Message);
}

impl MessageSink for Vec<Message> {
    fn add(&mut self, message: Message) {
        self.push(message);
    }
}
