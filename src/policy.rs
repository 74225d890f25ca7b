//! Immutable configuration threaded through every component constructor.

use crate::adaptive::AdaptivePolicy;
use crate::ticket::ExpirationPolicy;
use regex::Regex;

/// How handler failures are treated when other handlers succeeded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FailureMode {
    /// Any failure rejects the request.
    #[default]
    FailClosed,
    /// Failures are ignored when at least one handler succeeded.
    FailOpen,
}

impl FailureMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailClosed => "fail-closed",
            Self::FailOpen => "fail-open",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "fail-closed" => Some(Self::FailClosed),
            "fail-open" => Some(Self::FailOpen),
            _ => None,
        }
    }
}

/// What happens to a session whose authentication diverged from a newer
/// transaction presented with the same cookie.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DivergencePolicy {
    /// Leave the previous session to expire on its own.
    #[default]
    RetainPrevious,
    /// Destroy the previous session once the new one is stored.
    DestroyPrevious,
}

impl DivergencePolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetainPrevious => "retain-previous",
            Self::DestroyPrevious => "destroy-previous",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "retain-previous" => Some(Self::RetainPrevious),
            "destroy-previous" => Some(Self::DestroyPrevious),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TicketPolicy {
    ticket_granting: ExpirationPolicy,
    remember_me: ExpirationPolicy,
    service_ticket: ExpirationPolicy,
    proxy_granting: ExpirationPolicy,
    proxy_ticket: ExpirationPolicy,
    id_suffix: Option<String>,
}

impl Default for TicketPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ticket_granting: ExpirationPolicy::default_ticket_granting_ticket(),
            remember_me: ExpirationPolicy::default_remember_me(),
            service_ticket: ExpirationPolicy::default_service_ticket(),
            proxy_granting: ExpirationPolicy::default_ticket_granting_ticket(),
            proxy_ticket: ExpirationPolicy::default_service_ticket(),
            id_suffix: None,
        }
    }

    #[must_use]
    pub fn with_ticket_granting(mut self, policy: ExpirationPolicy) -> Self {
        self.ticket_granting = policy;
        self
    }

    #[must_use]
    pub fn with_remember_me(mut self, policy: ExpirationPolicy) -> Self {
        self.remember_me = policy;
        self
    }

    #[must_use]
    pub fn with_service_ticket(mut self, policy: ExpirationPolicy) -> Self {
        self.service_ticket = policy;
        self
    }

    #[must_use]
    pub fn with_proxy_granting(mut self, policy: ExpirationPolicy) -> Self {
        self.proxy_granting = policy;
        self
    }

    #[must_use]
    pub fn with_proxy_ticket(mut self, policy: ExpirationPolicy) -> Self {
        self.proxy_ticket = policy;
        self
    }

    #[must_use]
    pub fn with_id_suffix(mut self, suffix: Option<String>) -> Self {
        self.id_suffix = suffix;
        self
    }

    #[must_use]
    pub fn ticket_granting(&self) -> &ExpirationPolicy {
        &self.ticket_granting
    }

    #[must_use]
    pub fn remember_me(&self) -> &ExpirationPolicy {
        &self.remember_me
    }

    #[must_use]
    pub fn service_ticket(&self) -> &ExpirationPolicy {
        &self.service_ticket
    }

    #[must_use]
    pub fn proxy_granting(&self) -> &ExpirationPolicy {
        &self.proxy_granting
    }

    #[must_use]
    pub fn proxy_ticket(&self) -> &ExpirationPolicy {
        &self.proxy_ticket
    }

    #[must_use]
    pub fn id_suffix(&self) -> Option<&str> {
        self.id_suffix.as_deref()
    }
}

#[derive(Clone, Debug)]
pub struct SsoPolicy {
    sso_enabled: bool,
    create_cookie_on_renewed_authentication: bool,
    required_service_pattern: Option<Regex>,
}

impl Default for SsoPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SsoPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sso_enabled: true,
            create_cookie_on_renewed_authentication: true,
            required_service_pattern: None,
        }
    }

    #[must_use]
    pub fn with_sso_enabled(mut self, enabled: bool) -> Self {
        self.sso_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_create_cookie_on_renewed_authentication(mut self, create: bool) -> Self {
        self.create_cookie_on_renewed_authentication = create;
        self
    }

    /// # Errors
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn with_required_service_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.required_service_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    #[must_use]
    pub fn sso_enabled(&self) -> bool {
        self.sso_enabled
    }

    #[must_use]
    pub fn create_cookie_on_renewed_authentication(&self) -> bool {
        self.create_cookie_on_renewed_authentication
    }

    #[must_use]
    pub fn required_service_pattern(&self) -> Option<&Regex> {
        self.required_service_pattern.as_ref()
    }
}

/// Everything the core needs to know about deployment policy.
#[derive(Clone, Debug, Default)]
pub struct Policy {
    tickets: TicketPolicy,
    sso: SsoPolicy,
    failure_mode: FailureMode,
    divergence: DivergencePolicy,
    adaptive: AdaptivePolicy,
}

impl Policy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tickets(mut self, tickets: TicketPolicy) -> Self {
        self.tickets = tickets;
        self
    }

    #[must_use]
    pub fn with_sso(mut self, sso: SsoPolicy) -> Self {
        self.sso = sso;
        self
    }

    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    #[must_use]
    pub fn with_divergence(mut self, divergence: DivergencePolicy) -> Self {
        self.divergence = divergence;
        self
    }

    #[must_use]
    pub fn with_adaptive(mut self, adaptive: AdaptivePolicy) -> Self {
        self.adaptive = adaptive;
        self
    }

    #[must_use]
    pub fn tickets(&self) -> &TicketPolicy {
        &self.tickets
    }

    #[must_use]
    pub fn sso(&self) -> &SsoPolicy {
        &self.sso
    }

    #[must_use]
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    #[must_use]
    pub fn divergence(&self) -> DivergencePolicy {
        self.divergence
    }

    #[must_use]
    pub fn adaptive(&self) -> &AdaptivePolicy {
        &self.adaptive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let policy = Policy::new();
        assert_eq!(policy.failure_mode(), FailureMode::FailClosed);
        assert_eq!(policy.divergence(), DivergencePolicy::RetainPrevious);
        assert!(policy.sso().sso_enabled());
        assert!(policy.sso().required_service_pattern().is_none());
        assert!(!policy.adaptive().is_enabled());
        assert_eq!(
            policy.tickets().service_ticket(),
            &ExpirationPolicy::default_service_ticket()
        );
    }

    #[test]
    fn enum_names_round_trip() {
        for mode in [FailureMode::FailClosed, FailureMode::FailOpen] {
            assert_eq!(FailureMode::parse(mode.as_str()), Some(mode));
        }
        for divergence in [DivergencePolicy::RetainPrevious, DivergencePolicy::DestroyPrevious] {
            assert_eq!(DivergencePolicy::parse(divergence.as_str()), Some(divergence));
        }
        assert_eq!(DivergencePolicy::parse("nope"), None);
    }
}
