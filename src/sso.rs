//! SSO participation: may the existing session be reused for this request?
//!
//! Strategies only read the request; they never touch the registry. The
//! evaluator chains them so that every supporting strategy must agree before a
//! session participates.

use crate::policy::SsoPolicy;
use crate::service::{RegisteredService, Service};
use crate::ticket::TicketGrantingTicket;
use crate::transport::CookieOptions;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

/// The request shape SSO strategies look at.
#[derive(Clone, Copy, Debug, Default)]
pub struct SsoRequest<'a> {
    pub renew: bool,
    pub public_workstation: bool,
    pub service: Option<&'a Service>,
    pub registered_service: Option<&'a RegisteredService>,
    pub session: Option<&'a TicketGrantingTicket>,
    pub now: DateTime<Utc>,
}

/// Ephemeral per-request decision. Never persisted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct SsoDecision {
    pub participating: bool,
    pub create_cookie: bool,
}

pub trait SsoParticipationStrategy: Send + Sync {
    fn supports(&self, request: &SsoRequest<'_>) -> bool;

    fn is_participating(&self, request: &SsoRequest<'_>) -> bool;

    /// `None` leaves the decision to the next strategy.
    fn is_create_cookie_on_renewed_authentication(&self, request: &SsoRequest<'_>)
        -> Option<bool>;
}

/// Renew flag first, then the global switch, then the registered service and
/// its session age limit.
#[derive(Clone, Copy, Debug)]
pub struct DefaultSsoStrategy {
    sso_enabled: bool,
    create_cookie_on_renewed_authentication: bool,
}

impl DefaultSsoStrategy {
    #[must_use]
    pub fn new(policy: &SsoPolicy) -> Self {
        Self {
            sso_enabled: policy.sso_enabled(),
            create_cookie_on_renewed_authentication: policy
                .create_cookie_on_renewed_authentication(),
        }
    }
}

impl SsoParticipationStrategy for DefaultSsoStrategy {
    fn supports(&self, _request: &SsoRequest<'_>) -> bool {
        true
    }

    fn is_participating(&self, request: &SsoRequest<'_>) -> bool {
        if request.renew || !self.sso_enabled {
            return false;
        }
        let Some(registered) = request.registered_service else {
            return true;
        };
        registered.sso_enabled
            && request.session.map_or(true, |session| {
                registered.accepts_session_created_at(session.state.creation_time, request.now)
            })
    }

    fn is_create_cookie_on_renewed_authentication(
        &self,
        request: &SsoRequest<'_>,
    ) -> Option<bool> {
        request
            .registered_service
            .and_then(|registered| registered.create_cookie_on_renewed_authentication)
            .or(Some(self.create_cookie_on_renewed_authentication))
    }
}

/// The session participates only once it has already been used for a
/// service matching the pattern.
#[derive(Clone, Debug)]
pub struct RequiredServiceStrategy {
    pattern: Regex,
}

impl RequiredServiceStrategy {
    #[must_use]
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }
}

impl SsoParticipationStrategy for RequiredServiceStrategy {
    fn supports(&self, request: &SsoRequest<'_>) -> bool {
        request.session.is_some()
    }

    fn is_participating(&self, request: &SsoRequest<'_>) -> bool {
        request.session.is_some_and(|session| {
            session
                .services
                .keys()
                .any(|service| self.pattern.is_match(service))
        })
    }

    fn is_create_cookie_on_renewed_authentication(
        &self,
        _request: &SsoRequest<'_>,
    ) -> Option<bool> {
        None
    }
}

#[derive(Default)]
pub struct ChainingSsoStrategy {
    strategies: Vec<Box<dyn SsoParticipationStrategy>>,
}

impl ChainingSsoStrategy {
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn SsoParticipationStrategy>>) -> Self {
        Self { strategies }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn SsoParticipationStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }
}

impl SsoParticipationStrategy for ChainingSsoStrategy {
    fn supports(&self, request: &SsoRequest<'_>) -> bool {
        self.strategies
            .iter()
            .any(|strategy| strategy.supports(request))
    }

    fn is_participating(&self, request: &SsoRequest<'_>) -> bool {
        self.strategies
            .iter()
            .filter(|strategy| strategy.supports(request))
            .all(|strategy| strategy.is_participating(request))
    }

    fn is_create_cookie_on_renewed_authentication(
        &self,
        request: &SsoRequest<'_>,
    ) -> Option<bool> {
        let decided = self
            .strategies
            .iter()
            .filter(|strategy| strategy.supports(request))
            .find_map(|strategy| strategy.is_create_cookie_on_renewed_authentication(request));
        Some(decided.unwrap_or(true))
    }
}

pub struct SsoParticipationEvaluator {
    strategy: ChainingSsoStrategy,
    sso_enabled: bool,
}

impl SsoParticipationEvaluator {
    /// Default strategy, plus the required-service strategy when a pattern is
    /// configured.
    #[must_use]
    pub fn from_policy(policy: &SsoPolicy) -> Self {
        let mut strategy =
            ChainingSsoStrategy::default().with_strategy(Box::new(DefaultSsoStrategy::new(policy)));
        if let Some(pattern) = policy.required_service_pattern() {
            strategy =
                strategy.with_strategy(Box::new(RequiredServiceStrategy::new(pattern.clone())));
        }
        Self {
            strategy,
            sso_enabled: policy.sso_enabled(),
        }
    }

    #[must_use]
    pub fn new(strategy: ChainingSsoStrategy, sso_enabled: bool) -> Self {
        Self {
            strategy,
            sso_enabled,
        }
    }

    #[must_use]
    pub fn decide(&self, request: &SsoRequest<'_>) -> SsoDecision {
        let participating = self.strategy.is_participating(request);
        let create_cookie = if !self.sso_enabled {
            false
        } else if request.renew {
            self.strategy
                .is_create_cookie_on_renewed_authentication(request)
                .unwrap_or(true)
        } else {
            true
        };
        SsoDecision {
            participating,
            create_cookie,
        }
    }
}

/// Cookie options for a newly bound session.
#[must_use]
pub fn cookie_options(public_workstation: bool, remember_me: bool) -> CookieOptions {
    CookieOptions {
        persistent: !public_workstation || remember_me,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::{Authentication, Principal};
    use crate::ticket::ExpirationPolicy;
    use chrono::{TimeZone, Utc};

    fn session(services: &[&str]) -> TicketGrantingTicket {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut tgt = TicketGrantingTicket::new(
            "TGT-1-x".to_string(),
            Authentication::new(Principal::new("casuser"), now),
            now,
            ExpirationPolicy::NeverExpires,
        );
        for (index, service) in services.iter().enumerate() {
            tgt.grant(&format!("ST-{index}-x"), &Service::new(service), now);
        }
        tgt
    }

    fn registered(sso_enabled: bool) -> RegisteredService {
        RegisteredService::new(1, "app", r"https://app\.example\.com/.*")
            .expect("valid pattern")
            .with_sso_enabled(sso_enabled)
    }

    #[test]
    fn renew_short_circuits_participation() {
        let evaluator = SsoParticipationEvaluator::from_policy(&SsoPolicy::new());
        let tgt = session(&[]);
        let request = SsoRequest {
            renew: true,
            session: Some(&tgt),
            ..SsoRequest::default()
        };
        assert!(!evaluator.decide(&request).participating);
    }

    #[test]
    fn global_switch_disables_participation_and_cookie() {
        let policy = SsoPolicy::new().with_sso_enabled(false);
        let evaluator = SsoParticipationEvaluator::from_policy(&policy);
        let decision = evaluator.decide(&SsoRequest::default());
        assert_eq!(
            decision,
            SsoDecision {
                participating: false,
                create_cookie: false
            }
        );
    }

    #[test]
    fn registered_service_can_opt_out_of_sso() {
        let evaluator = SsoParticipationEvaluator::from_policy(&SsoPolicy::new());
        let service = registered(false);
        let request = SsoRequest {
            registered_service: Some(&service),
            ..SsoRequest::default()
        };
        assert!(!evaluator.decide(&request).participating);

        let service = registered(true);
        let request = SsoRequest {
            registered_service: Some(&service),
            ..SsoRequest::default()
        };
        assert!(evaluator.decide(&request).participating);
    }

    #[test]
    fn registered_service_rejects_sessions_older_than_its_limit() {
        let evaluator = SsoParticipationEvaluator::from_policy(&SsoPolicy::new());
        let service = registered(true).with_ticket_granting_ticket_max_age(Some(3600));
        let tgt = session(&[]);
        let created = tgt.state.creation_time;

        let young = SsoRequest {
            registered_service: Some(&service),
            session: Some(&tgt),
            now: created + chrono::Duration::minutes(30),
            ..SsoRequest::default()
        };
        assert!(evaluator.decide(&young).participating);

        let old = SsoRequest {
            now: created + chrono::Duration::hours(2),
            ..young
        };
        assert!(!evaluator.decide(&old).participating);

        let without_session = SsoRequest {
            session: None,
            ..old
        };
        assert!(evaluator.decide(&without_session).participating);
    }

    #[test]
    fn cookie_on_renew_prefers_service_override() {
        let policy = SsoPolicy::new().with_create_cookie_on_renewed_authentication(true);
        let evaluator = SsoParticipationEvaluator::from_policy(&policy);
        let service = registered(true).with_create_cookie_on_renewed_authentication(Some(false));
        let request = SsoRequest {
            renew: true,
            registered_service: Some(&service),
            ..SsoRequest::default()
        };
        assert!(!evaluator.decide(&request).create_cookie);

        let policy = SsoPolicy::new().with_create_cookie_on_renewed_authentication(false);
        let evaluator = SsoParticipationEvaluator::from_policy(&policy);
        let request = SsoRequest {
            renew: true,
            ..SsoRequest::default()
        };
        assert!(!evaluator.decide(&request).create_cookie);
    }

    #[test]
    fn required_service_must_be_in_session() {
        let policy = SsoPolicy::new()
            .with_required_service_pattern(r"^https://portal\.example\.com/.*")
            .expect("valid regex");
        let evaluator = SsoParticipationEvaluator::from_policy(&policy);

        let fresh = session(&["https://app.example.com/"]);
        let request = SsoRequest {
            session: Some(&fresh),
            ..SsoRequest::default()
        };
        assert!(!evaluator.decide(&request).participating);

        let visited = session(&["https://portal.example.com/home"]);
        let request = SsoRequest {
            session: Some(&visited),
            ..SsoRequest::default()
        };
        assert!(evaluator.decide(&request).participating);
    }

    #[test]
    fn chain_cookie_defaults_to_true_without_opinion() {
        let chain = ChainingSsoStrategy::new(vec![Box::new(RequiredServiceStrategy::new(
            Regex::new(".*").expect("valid regex"),
        ))]);
        let tgt = session(&[]);
        let request = SsoRequest {
            session: Some(&tgt),
            ..SsoRequest::default()
        };
        assert_eq!(chain.is_create_cookie_on_renewed_authentication(&request), Some(true));
    }

    #[test]
    fn public_workstation_gets_session_cookie_unless_remembered() {
        assert!(cookie_options(false, false).persistent);
        assert!(!cookie_options(true, false).persistent);
        assert!(cookie_options(true, true).persistent);
    }
}
