use super::{step, FlowEvent, FlowState, RequestContext, Transition};
use crate::adaptive::AdaptivePolicy;
use crate::authentication::AuthenticationFinalizer;
use crate::clock::Clock;
use crate::error::FlowError;
use crate::manager::TicketLifecycleManager;
use crate::messages::Message;
use crate::policy::Policy;
use crate::resolver::{ExceptionResolver, ResolutionContext};
use crate::service::RegisteredService;
use crate::sso::{cookie_options, SsoParticipationEvaluator, SsoRequest};
use crate::transport::SessionCookieBinder;
use std::sync::Arc;
use tracing::{info, info_span, warn};

/// Mutable scratch state of one evaluation.
struct Run {
    state: FlowState,
    outcome: Option<String>,
    ticket_granting_ticket_id: Option<String>,
    service_ticket_id: Option<String>,
    multifactor_provider: Option<String>,
    messages: Vec<Message>,
    alert: bool,
}

impl Run {
    fn new() -> Self {
        Self {
            state: FlowState::Initial,
            outcome: None,
            ticket_granting_ticket_id: None,
            service_ticket_id: None,
            multifactor_provider: None,
            messages: Vec::new(),
            alert: false,
        }
    }

    fn advance(&mut self, event: FlowEvent) {
        self.state = step(self.state, event);
    }

    fn into_transition(self, request_id: String) -> Transition {
        Transition {
            request_id,
            state: self.state,
            outcome: self.outcome,
            ticket_granting_ticket_id: self.ticket_granting_ticket_id,
            service_ticket_id: self.service_ticket_id,
            multifactor_provider: self.multifactor_provider,
            messages: self.messages,
            alert: self.alert,
        }
    }
}

/// Sequences the evaluator, finalizer, lifecycle manager and resolver for
/// each request.
pub struct FlowOrchestrator {
    manager: Arc<TicketLifecycleManager>,
    finalizer: AuthenticationFinalizer,
    sso: SsoParticipationEvaluator,
    adaptive: AdaptivePolicy,
    resolver: ExceptionResolver,
}

impl FlowOrchestrator {
    #[must_use]
    pub fn new(manager: Arc<TicketLifecycleManager>, policy: &Policy, clock: Arc<dyn Clock>) -> Self {
        Self {
            manager,
            finalizer: AuthenticationFinalizer::new(policy.failure_mode(), clock),
            sso: SsoParticipationEvaluator::from_policy(policy.sso()),
            adaptive: policy.adaptive().clone(),
            resolver: ExceptionResolver::default(),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: ExceptionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn manager(&self) -> &TicketLifecycleManager {
        &self.manager
    }

    #[must_use]
    pub fn resolver(&self) -> &ExceptionResolver {
        &self.resolver
    }

    /// Evaluate one request. Never fails: every error is resolved into a
    /// transition with attached messages.
    pub fn evaluate_request(
        &self,
        context: &RequestContext,
        binder: &dyn SessionCookieBinder,
    ) -> Transition {
        let request_id = context.request_id.to_string();
        let span = info_span!(
            "evaluate_request",
            request_id = %request_id,
            service = context.service.as_ref().map(|s| s.id().to_string()),
            renew = context.renew,
            gateway = context.gateway,
        );
        let _guard = span.enter();

        let mut run = Run::new();
        if let Err(err) = self.drive(context, binder, &mut run) {
            self.fail(&err, context, &mut run);
        }

        info!(
            state = %run.state,
            outcome = run.outcome.as_deref(),
            ticket_granting_ticket = run.ticket_granting_ticket_id.as_deref(),
            service_ticket = run.service_ticket_id.as_deref(),
            "request evaluated"
        );
        run.into_transition(request_id)
    }

    fn fail(&self, err: &FlowError, context: &RequestContext, run: &mut Run) {
        let resolution_context = ResolutionContext {
            service: context.service.as_ref(),
            renew: context.renew,
        };
        let resolution = self
            .resolver
            .resolve(err, &resolution_context, &mut run.messages);
        let event = match err {
            FlowError::AuthenticationFailed { .. } | FlowError::AdaptivePolicyDenied { .. } => {
                FlowEvent::CredentialsRejected
            }
            _ => FlowEvent::Failed,
        };
        run.advance(event);
        run.outcome = Some(resolution.outcome);
        run.alert = err.requires_alert();
    }

    fn drive(
        &self,
        context: &RequestContext,
        binder: &dyn SessionCookieBinder,
        run: &mut Run,
    ) -> Result<(), FlowError> {
        let service = context.service.as_ref();
        let registered = service
            .map(|service| self.manager.services().ensure_access(service))
            .transpose()?;

        if context.has_credentials() {
            self.adaptive.evaluate(&context.client)?;
        }

        let existing_id = context
            .existing_session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let session = match existing_id {
            Some(id) => self.manager.ticket_granting_ticket(id)?,
            None => None,
        };
        if existing_id.is_some() && session.is_none() {
            if let Err(err) = binder.clear() {
                warn!(error = %err, "failed to clear cookie of dead session");
            }
        }

        let decision = self.sso.decide(&SsoRequest {
            renew: context.renew,
            public_workstation: context.public_workstation,
            service,
            registered_service: registered,
            session: session.as_ref(),
            now: self.manager.now(),
        });

        if !context.has_credentials() {
            let Some(session) = session else {
                run.advance(if context.gateway {
                    FlowEvent::GatewayBypass
                } else {
                    FlowEvent::CredentialsMissing
                });
                return Ok(());
            };
            if !decision.participating {
                run.advance(FlowEvent::RenewRequested);
                return Ok(());
            }

            run.ticket_granting_ticket_id = Some(session.id().to_string());
            if let Some(provider) = unsatisfied_provider(registered, &session.authentication) {
                run.multifactor_provider = Some(provider.to_string());
                run.advance(FlowEvent::MultifactorRequested);
                return Ok(());
            }
            match service {
                Some(service) => {
                    let ticket = self
                        .manager
                        .issue_service_ticket(session.id(), service, None)?;
                    run.service_ticket_id = Some(ticket.id().to_string());
                    run.advance(FlowEvent::ServiceTicketGranted);
                }
                None => run.advance(FlowEvent::SessionParticipating),
            }
            return Ok(());
        }

        let authentication = self.finalizer.finalize(&context.attempts, service)?;
        run.advance(FlowEvent::CredentialsFinalized);

        if let Some(provider) = unsatisfied_provider(registered, &authentication) {
            run.multifactor_provider = Some(provider.to_string());
            run.advance(FlowEvent::MultifactorRequested);
            return Ok(());
        }

        // Renewal always reissues, so the existing session is not offered.
        let reconcile_from = if context.renew { None } else { existing_id };
        let warnings = authentication.warnings();
        let tgt = self
            .manager
            .reconcile(authentication.clone(), reconcile_from)?;
        run.ticket_granting_ticket_id = Some(tgt.id().to_string());
        run.messages
            .extend(warnings.iter().map(|warning| warning.to_warning()));
        run.advance(FlowEvent::SessionReconciled {
            warnings: !warnings.is_empty(),
        });

        if decision.create_cookie {
            let options = cookie_options(
                context.public_workstation,
                tgt.authentication.is_remember_me(),
            );
            self.manager
                .send_session_cookie(tgt.id(), existing_id, binder, options)?;
        }

        if let Some(service) = service {
            let ticket = self
                .manager
                .issue_service_ticket(tgt.id(), service, Some(&authentication))?;
            run.service_ticket_id = Some(ticket.id().to_string());
            run.advance(FlowEvent::ServiceTicketGranted);
        }
        Ok(())
    }
}

fn unsatisfied_provider<'a>(
    registered: Option<&'a RegisteredService>,
    authentication: &crate::authentication::Authentication,
) -> Option<&'a str> {
    registered
        .and_then(|registered| registered.multifactor_provider.as_deref())
        .filter(|provider| !authentication.satisfies_provider(provider))
}
