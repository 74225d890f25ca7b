//! Offline replay of recorded request scenarios.
//!
//! A scenario lists registered services and a sequence of requests made by
//! one simulated browser. Handler outcomes are recorded in the scenario, so no
//! real credential store is consulted. Each request produces one JSON line on
//! stdout.

use crate::adaptive::ClientInfo;
use crate::authentication::{AuthenticationAttempt, Credential, Principal};
use crate::clock::{Clock, ManualClock};
use crate::error::AuthnFailure;
use crate::flow::{FlowOrchestrator, RequestContext, Transition};
use crate::manager::{Assertion, TicketLifecycleManager};
use crate::messages::{Message, MessageDescriptor};
use crate::policy::Policy;
use crate::registry::InMemoryTicketRegistry;
use crate::resolver::ResolutionContext;
use crate::service::{RegisteredServiceDefinition, Service, ServiceRegistry};
use crate::transport::{InMemoryCookieJar, SessionCookieBinder};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Args {
    pub scenario: PathBuf,
    pub validate: bool,
    pub policy: Policy,
}

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub services: Vec<RegisteredServiceDefinition>,
    pub requests: Vec<ScenarioRequest>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioRequest {
    pub name: Option<String>,
    pub service: Option<Service>,
    pub renew: bool,
    pub gateway: bool,
    pub public_workstation: bool,
    /// Drop the cookie jar before sending, as a new browser would.
    pub new_browser: bool,
    /// Move the clock forward before the request.
    pub advance_seconds: i64,
    /// Destroy the current session instead of evaluating a request.
    pub logout: bool,
    pub client: ClientInfo,
    pub attempts: Vec<ScenarioAttempt>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioAttempt {
    pub credential: Credential,
    #[serde(default)]
    pub principal: Option<Principal>,
    #[serde(default)]
    pub successes: Vec<ScenarioSuccess>,
    #[serde(default)]
    pub failures: BTreeMap<String, AuthnFailure>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioSuccess {
    pub handler: String,
    #[serde(default)]
    pub warnings: Vec<MessageDescriptor>,
}

impl From<ScenarioAttempt> for AuthenticationAttempt {
    fn from(recorded: ScenarioAttempt) -> Self {
        let mut attempt = Self::new(recorded.credential);
        if let Some(principal) = recorded.principal {
            attempt = attempt.with_principal(principal);
        }
        for success in recorded.successes {
            attempt = attempt.with_success(&success.handler, success.warnings);
        }
        for (handler, failure) in recorded.failures {
            attempt = attempt.with_failure(&handler, failure);
        }
        for (name, value) in recorded.attributes {
            attempt = attempt.with_attribute(&name, value);
        }
        attempt
    }
}

#[derive(Debug, Serialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion: Option<Assertion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct Logout {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub services: Vec<Service>,
}

/// One line of replay output.
#[derive(Debug, Serialize)]
pub struct Line {
    pub step: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout: Option<Logout>,
}

/// Load the scenario named in `args` and replay it to stdout.
///
/// # Errors
/// Returns an error if the scenario cannot be read or parsed, or if output
/// cannot be written.
pub fn execute(args: Args) -> Result<()> {
    let raw = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("failed to read scenario {}", args.scenario.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse scenario {}", args.scenario.display()))?;

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let lines = replay(scenario, &args.policy, args.validate, clock)?;
    for line in &lines {
        serde_json::to_writer(&mut out, line).context("failed to write replay output")?;
        writeln!(out).context("failed to write replay output")?;
    }
    Ok(())
}

/// Run every request of `scenario` through one orchestrator sharing a
/// registry and a cookie jar.
///
/// # Errors
/// Returns an error if a registered service carries an invalid pattern.
pub fn replay(
    scenario: Scenario,
    policy: &Policy,
    validate: bool,
    clock: Arc<ManualClock>,
) -> Result<Vec<Line>> {
    let services = ServiceRegistry::from_definitions(scenario.services)
        .context("invalid registered service")?;
    info!(services = services.len(), requests = scenario.requests.len(), "replaying scenario");

    let shared_clock: Arc<dyn Clock> = clock.clone();
    let manager = Arc::new(TicketLifecycleManager::new(
        Arc::new(InMemoryTicketRegistry::new()),
        Arc::new(services),
        policy,
        shared_clock.clone(),
    ));
    let orchestrator = FlowOrchestrator::new(manager, policy, shared_clock);

    let mut jar = InMemoryCookieJar::new();
    let mut lines = Vec::with_capacity(scenario.requests.len());

    for (step, request) in scenario.requests.into_iter().enumerate() {
        if request.advance_seconds > 0 {
            let by = Duration::try_seconds(request.advance_seconds).with_context(|| {
                format!(
                    "request {step}: advance_seconds {} is out of range",
                    request.advance_seconds
                )
            })?;
            clock.advance(by);
        }
        if request.new_browser {
            jar = InMemoryCookieJar::new();
        }

        let name = request.name.clone();
        if request.logout {
            lines.push(Line {
                step,
                name,
                transition: None,
                validation: None,
                logout: Some(logout(&orchestrator, &jar)),
            });
            continue;
        }

        let service = request.service.clone();
        let mut context = RequestContext::new()
            .with_existing_session(jar.session_id())
            .with_renew(request.renew)
            .with_gateway(request.gateway)
            .with_public_workstation(request.public_workstation)
            .with_client(request.client);
        if let Some(service) = request.service {
            context = context.with_service(service);
        }
        for attempt in request.attempts {
            context = context.with_attempt(attempt.into());
        }

        let transition = orchestrator.evaluate_request(&context, &jar);
        debug!(step, state = %transition.state, "replayed request");

        let validation = match (&transition.service_ticket_id, &service) {
            (Some(ticket), Some(service)) if validate => {
                Some(validate_ticket(&orchestrator, ticket, service))
            }
            _ => None,
        };

        lines.push(Line {
            step,
            name,
            transition: Some(transition),
            validation,
            logout: None,
        });
    }

    Ok(lines)
}

fn validate_ticket(orchestrator: &FlowOrchestrator, ticket: &str, service: &Service) -> Validation {
    match orchestrator.manager().validate_service_ticket(ticket, service) {
        Ok(assertion) => Validation {
            valid: true,
            assertion: Some(assertion),
            outcome: None,
            messages: Vec::new(),
        },
        Err(err) => {
            let mut messages = Vec::new();
            let resolution = orchestrator.resolver().resolve(
                &err,
                &ResolutionContext {
                    service: Some(service),
                    renew: false,
                },
                &mut messages,
            );
            Validation {
                valid: false,
                assertion: None,
                outcome: Some(resolution.outcome),
                messages,
            }
        }
    }
}

fn logout(orchestrator: &FlowOrchestrator, jar: &InMemoryCookieJar) -> Logout {
    let session = jar.session_id();
    let services = match &session {
        Some(id) => orchestrator
            .manager()
            .destroy_ticket_granting_ticket(id)
            .unwrap_or_else(|err| {
                warn!(session = %id, error = %err, "logout failed");
                Vec::new()
            }),
        None => Vec::new(),
    };
    if let Err(err) = jar.clear() {
        warn!(error = %err, "failed to clear session cookie");
    }
    Logout { session, services }
}
