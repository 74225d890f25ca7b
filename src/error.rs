//! Error taxonomy shared by the lifecycle manager, the finalizer and the flow.
//!
//! Variants are closed kinds with an explicit sub-kind field; the resolver
//! dispatches on them with ordered predicates instead of type hierarchies.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a ticket reference could not be honoured.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidTicketDetail {
    NotFound,
    Expired,
    WrongKind,
    /// The registry could not be reached; the request may be retried.
    Unavailable,
    ServiceMismatch,
}

impl fmt::Display for InvalidTicketDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = match self {
            Self::NotFound => "not found",
            Self::Expired => "expired",
            Self::WrongKind => "unexpected ticket kind",
            Self::Unavailable => "ticket registry unavailable",
            Self::ServiceMismatch => "service does not match",
        };
        f.write_str(detail)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnauthorizedReason {
    NotRegistered,
    Disabled,
    SsoDenied,
    ProxyingDenied,
}

impl fmt::Display for UnauthorizedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NotRegistered => "not registered",
            Self::Disabled => "disabled",
            Self::SsoDenied => "single sign-on not allowed",
            Self::ProxyingDenied => "proxying not allowed",
        };
        f.write_str(reason)
    }
}

/// Classified credential rejection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum AuthnFailure {
    #[error("bad password")]
    BadPassword,
    #[error("unknown principal")]
    UnknownPrincipal,
    #[error("account locked")]
    AccountLocked,
    #[error("account disabled")]
    AccountDisabled,
    #[error("account expired")]
    AccountExpired,
    #[error("password must be changed")]
    MustChangePassword,
    #[error("login not allowed from this location")]
    InvalidLoginLocation,
    #[error("login not allowed at this time")]
    InvalidLoginTime,
    #[error("unsupported credential type")]
    UnsupportedCredential,
    #[error("credentials resolved to different principals")]
    MixedPrincipal,
}

impl AuthnFailure {
    /// Stable identifier used to build message codes.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::BadPassword => "BadPassword",
            Self::UnknownPrincipal => "UnknownPrincipal",
            Self::AccountLocked => "AccountLocked",
            Self::AccountDisabled => "AccountDisabled",
            Self::AccountExpired => "AccountExpired",
            Self::MustChangePassword => "MustChangePassword",
            Self::InvalidLoginLocation => "InvalidLoginLocation",
            Self::InvalidLoginTime => "InvalidLoginTime",
            Self::UnsupportedCredential => "UnsupportedCredential",
            Self::MixedPrincipal => "MixedPrincipal",
        }
    }

    /// Failures that describe the account rather than the credential.
    #[must_use]
    pub fn is_account_status(self) -> bool {
        matches!(
            self,
            Self::AccountLocked
                | Self::AccountDisabled
                | Self::AccountExpired
                | Self::MustChangePassword
                | Self::InvalidLoginLocation
                | Self::InvalidLoginTime
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FlowError {
    #[error("invalid ticket {id}: {detail}")]
    InvalidTicket {
        id: String,
        detail: InvalidTicketDetail,
    },

    #[error("service {service} is not authorized: {reason}")]
    UnauthorizedService {
        service: String,
        reason: UnauthorizedReason,
    },

    #[error("authentication failed: {failure}")]
    AuthenticationFailed {
        failure: AuthnFailure,
        handler: Option<String>,
    },

    #[error("adaptive authentication policy denied the request: {reason}")]
    AdaptivePolicyDenied { reason: String },

    /// Unexpected internal fault, distinct from a confirmed rejection.
    #[error("authentication prevented: {0}")]
    Prevented(String),
}

impl FlowError {
    #[must_use]
    pub fn invalid_ticket(id: impl Into<String>, detail: InvalidTicketDetail) -> Self {
        Self::InvalidTicket {
            id: id.into(),
            detail,
        }
    }

    #[must_use]
    pub fn unavailable(id: impl Into<String>) -> Self {
        Self::invalid_ticket(id, InvalidTicketDetail::Unavailable)
    }

    #[must_use]
    pub fn unauthorized(service: impl Into<String>, reason: UnauthorizedReason) -> Self {
        Self::UnauthorizedService {
            service: service.into(),
            reason,
        }
    }

    #[must_use]
    pub fn rejected(failure: AuthnFailure) -> Self {
        Self::AuthenticationFailed {
            failure,
            handler: None,
        }
    }

    /// Internal faults must not be counted as credential rejections; they are
    /// tagged for operational alerting instead.
    #[must_use]
    pub fn requires_alert(&self) -> bool {
        matches!(
            self,
            Self::Prevented(_)
                | Self::InvalidTicket {
                    detail: InvalidTicketDetail::Unavailable,
                    ..
                }
        )
    }

    #[must_use]
    pub fn authn_failure(&self) -> Option<AuthnFailure> {
        match self {
            Self::AuthenticationFailed { failure, .. } => Some(*failure),
            _ => None,
        }
    }
}
