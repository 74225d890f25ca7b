//! Ticket lifecycle manager.
//!
//! Flow Overview:
//! - `reconcile` decides whether a finalized authentication creates a session,
//!   updates the existing one in place, or replaces it.
//! - `issue_service_ticket` derives a single-use ticket from a live session.
//! - `send_session_cookie` binds the session id and only then destroys the
//!   session the previous cookie pointed to.
//! - `destroy_ticket_granting_ticket` is logout: it cascades to every ticket
//!   issued from the session.
//!
//! Concurrency: the manager keeps no ticket between calls. Every decision is
//! taken on a fresh registry read. Write-backs are versioned
//! (`update_if_unchanged`): a write that lost against another request is
//! re-applied on a fresh read, and a concurrently destroyed session is
//! noticed. Deletes are idempotent. A "not found" from a racing request is a
//! normal outcome, not corruption.

mod proxy;
mod validation;

pub use validation::Assertion;

use crate::authentication::Authentication;
use crate::clock::Clock;
use crate::error::{AuthnFailure, FlowError, InvalidTicketDetail, UnauthorizedReason};
use crate::policy::{DivergencePolicy, Policy, TicketPolicy};
use crate::registry::{TicketRegistry, UpdateOutcome};
use crate::service::{Service, ServiceRegistry};
use crate::ticket::{
    ServiceTicket, Ticket, TicketGrantingTicket, TicketIdGenerator, TicketKind, TicketState,
};
use crate::transport::{CookieOptions, SessionCookieBinder};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Proxy chains deeper than this are treated as broken.
const MAX_CHAIN_DEPTH: usize = 16;

/// Versioned write-backs lost this many times in a row give up as unavailable.
const MAX_UPDATE_ATTEMPTS: usize = 16;

/// Result of a checked read of a ticket-granting ticket.
#[derive(Debug)]
enum Fetched {
    Live(TicketGrantingTicket),
    Expired,
    Missing,
    WrongKind,
}

impl Fetched {
    fn into_live(self, id: &str) -> Result<TicketGrantingTicket, FlowError> {
        match self {
            Self::Live(tgt) => Ok(tgt),
            Self::Expired => Err(FlowError::invalid_ticket(id, InvalidTicketDetail::Expired)),
            Self::Missing => Err(FlowError::invalid_ticket(id, InvalidTicketDetail::NotFound)),
            Self::WrongKind => Err(FlowError::invalid_ticket(id, InvalidTicketDetail::WrongKind)),
        }
    }
}

pub struct TicketLifecycleManager {
    registry: Arc<dyn TicketRegistry>,
    services: Arc<ServiceRegistry>,
    tickets: TicketPolicy,
    divergence: DivergencePolicy,
    ids: TicketIdGenerator,
    clock: Arc<dyn Clock>,
}

impl TicketLifecycleManager {
    #[must_use]
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        services: Arc<ServiceRegistry>,
        policy: &Policy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tickets = policy.tickets().clone();
        let ids = TicketIdGenerator::new(tickets.id_suffix().map(ToString::to_string));
        Self {
            registry,
            services,
            tickets,
            divergence: policy.divergence(),
            ids,
            clock,
        }
    }

    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn new_id(&self, kind: TicketKind) -> Result<String, FlowError> {
        self.ids
            .new_ticket_id(kind)
            .map_err(|err| FlowError::Prevented(err.to_string()))
    }

    fn get(&self, id: &str) -> Result<Option<Ticket>, FlowError> {
        self.registry.get(id).map_err(|err| {
            warn!(ticket = id, error = %err, "ticket registry read failed");
            FlowError::unavailable(id)
        })
    }

    fn store(&self, ticket: Ticket) -> Result<(), FlowError> {
        let id = ticket.id().to_string();
        self.registry.add_or_update(ticket).map_err(|err| {
            warn!(ticket = %id, error = %err, "ticket registry write failed");
            FlowError::unavailable(id)
        })
    }

    /// Write back a ticket at the version it was read at.
    fn store_if_unchanged(&self, ticket: Ticket) -> Result<UpdateOutcome, FlowError> {
        let id = ticket.id().to_string();
        self.registry.update_if_unchanged(ticket).map_err(|err| {
            warn!(ticket = %id, error = %err, "ticket registry update failed");
            FlowError::unavailable(id)
        })
    }

    /// Read-modify-write of a live granting ticket. `apply` runs on a fresh
    /// read each attempt, so a change stored by a concurrent request is never
    /// overwritten. Returns the stored ticket, or how the ticket stopped being
    /// live.
    fn update_granting<F>(
        &self,
        id: &str,
        kind: TicketKind,
        mut apply: F,
    ) -> Result<Fetched, FlowError>
    where
        F: FnMut(&mut TicketGrantingTicket) -> Result<(), FlowError>,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let mut tgt = match self.fetch_granting(id, kind)? {
                Fetched::Live(tgt) => tgt,
                other => return Ok(other),
            };
            apply(&mut tgt)?;
            match self.store_if_unchanged(Ticket::TicketGranting(tgt.clone()))? {
                UpdateOutcome::Stored => {
                    tgt.state.version = tgt.state.version.wrapping_add(1);
                    return Ok(Fetched::Live(tgt));
                }
                UpdateOutcome::Missing => return Ok(Fetched::Missing),
                UpdateOutcome::Conflict => {
                    debug!(ticket = id, attempt, "granting ticket changed concurrently; retrying");
                }
            }
        }
        warn!(ticket = id, "granting ticket update kept losing to concurrent writers");
        Err(FlowError::unavailable(id))
    }

    fn remove(&self, id: &str) -> Result<bool, FlowError> {
        self.registry.delete(id).map_err(|err| {
            warn!(ticket = id, error = %err, "ticket registry delete failed");
            FlowError::unavailable(id)
        })
    }

    /// Read a granting ticket of `kind` and check it, and every parent, for
    /// expiration.
    fn fetch_granting(&self, id: &str, kind: TicketKind) -> Result<Fetched, FlowError> {
        let tgt = match self.get(id)? {
            None => return Ok(Fetched::Missing),
            Some(Ticket::TicketGranting(tgt)) if tgt.kind() == kind => tgt,
            Some(_) => return Ok(Fetched::WrongKind),
        };
        let now = self.now();
        if tgt.state.is_expired(now) || self.is_parent_expired(&tgt, now)? {
            return Ok(Fetched::Expired);
        }
        Ok(Fetched::Live(tgt))
    }

    fn is_parent_expired(
        &self,
        tgt: &TicketGrantingTicket,
        now: DateTime<Utc>,
    ) -> Result<bool, FlowError> {
        let mut parent = tgt.parent.clone();
        let mut depth = 0;
        while let Some(parent_id) = parent {
            depth += 1;
            if depth > MAX_CHAIN_DEPTH {
                return Ok(true);
            }
            match self.get(&parent_id)? {
                Some(Ticket::TicketGranting(ancestor)) if !ancestor.state.is_expired(now) => {
                    parent = ancestor.parent;
                }
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Checked read of a session. Expired, missing and wrong-kind ids all read
    /// as `None`.
    ///
    /// # Errors
    /// `InvalidTicket { detail: Unavailable }` when the registry fails.
    pub fn ticket_granting_ticket(
        &self,
        id: &str,
    ) -> Result<Option<TicketGrantingTicket>, FlowError> {
        match self.fetch_granting(id, TicketKind::TicketGranting)? {
            Fetched::Live(tgt) => Ok(Some(tgt)),
            _ => Ok(None),
        }
    }

    fn issue_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> Result<TicketGrantingTicket, FlowError> {
        let id = self.new_id(TicketKind::TicketGranting)?;
        let policy = if authentication.is_remember_me() {
            self.tickets.remember_me().clone()
        } else {
            self.tickets.ticket_granting().clone()
        };
        let tgt = TicketGrantingTicket::new(id, authentication, self.now(), policy);
        self.store(Ticket::TicketGranting(tgt.clone()))?;
        info!(ticket = tgt.id(), principal = %tgt.authentication.principal.id, "ticket-granting ticket issued");
        Ok(tgt)
    }

    /// Create, update in place, or replace the session for `authentication`.
    ///
    /// 1. No existing id: issue a new session.
    /// 2. Existing id missing, of another kind, or expired: drop the stale
    ///    entry (expired only) and issue.
    /// 3. Essentially equal authentication: update the session in place.
    /// 4. Divergent authentication: issue a new session; the previous one is
    ///    destroyed only under [`DivergencePolicy::DestroyPrevious`].
    ///
    /// # Errors
    /// - `InvalidTicket { id: existing, detail: Unavailable }` when the
    ///   registry fails while reading or updating the existing session.
    /// - `Prevented` when no ticket id could be generated.
    #[instrument(skip(self, authentication), fields(principal = %authentication.principal.id))]
    pub fn reconcile(
        &self,
        authentication: Authentication,
        existing_session_id: Option<&str>,
    ) -> Result<TicketGrantingTicket, FlowError> {
        let Some(existing) = existing_session_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            return self.issue_ticket_granting_ticket(authentication);
        };

        let tgt = match self.fetch_granting(existing, TicketKind::TicketGranting)? {
            Fetched::Live(tgt) => tgt,
            Fetched::Expired => {
                debug!(ticket = existing, "existing session expired; removing it");
                if let Err(err) = self.remove(existing) {
                    warn!(ticket = existing, error = %err, "failed to remove expired session");
                }
                return self.issue_ticket_granting_ticket(authentication);
            }
            Fetched::Missing | Fetched::WrongKind => {
                debug!(ticket = existing, "existing session not usable; issuing a new one");
                return self.issue_ticket_granting_ticket(authentication);
            }
        };

        if tgt.authentication.is_essentially_equal(&authentication) {
            let updated = self.update_granting(existing, TicketKind::TicketGranting, |tgt| {
                tgt.authentication.supersede(authentication.clone());
                Ok(())
            })?;
            if let Fetched::Live(tgt) = updated {
                debug!(ticket = existing, "session updated in place");
                return Ok(tgt);
            }
            info!(ticket = existing, "session destroyed concurrently; issuing a new one");
            return self.issue_ticket_granting_ticket(authentication);
        }

        let fresh = self.issue_ticket_granting_ticket(authentication)?;
        if self.divergence == DivergencePolicy::DestroyPrevious {
            match self.destroy_ticket_granting_ticket(existing) {
                Ok(_) => info!(previous = existing, ticket = fresh.id(), "divergent session replaced"),
                Err(err) => warn!(previous = existing, error = %err, "failed to destroy divergent session"),
            }
        } else {
            debug!(previous = existing, ticket = fresh.id(), "divergent session retained");
        }
        Ok(fresh)
    }

    /// Issue a service ticket from a live session.
    ///
    /// `authentication` is present when the caller just collected fresh
    /// credentials; it marks the ticket `from_new_login`. Without it the
    /// ticket is an SSO reuse and the service must allow SSO.
    ///
    /// # Errors
    /// - `InvalidTicket` when the session is missing, expired or destroyed
    ///   concurrently.
    /// - `UnauthorizedService` when the service is unknown, disabled, or
    ///   refuses SSO reuse.
    /// - `AuthenticationFailed(MixedPrincipal)` when fresh credentials belong
    ///   to another principal.
    #[instrument(skip(self, service, authentication), fields(service = %service, fresh = authentication.is_some()))]
    pub fn issue_service_ticket(
        &self,
        tgt_id: &str,
        service: &Service,
        authentication: Option<&Authentication>,
    ) -> Result<ServiceTicket, FlowError> {
        let id = self.new_id(TicketKind::Service)?;
        let now = self.now();

        self.update_granting(tgt_id, TicketKind::TicketGranting, |tgt| {
            let registered = self.services.ensure_access(service)?;
            match authentication {
                Some(fresh) if fresh.principal.id != tgt.authentication.principal.id => {
                    return Err(FlowError::rejected(AuthnFailure::MixedPrincipal));
                }
                Some(_) => {}
                None if !registered.sso_enabled => {
                    return Err(FlowError::unauthorized(
                        service.id(),
                        UnauthorizedReason::SsoDenied,
                    ));
                }
                None => {}
            }
            tgt.grant(&id, service, now);
            Ok(())
        })?
        .into_live(tgt_id)?;

        let ticket = ServiceTicket {
            state: TicketState::new(id, now, self.tickets.service_ticket().clone()),
            service: service.clone(),
            granting_ticket: tgt_id.to_string(),
            from_new_login: authentication.is_some(),
        };
        self.store(Ticket::Service(ticket.clone()))?;
        info!(ticket = ticket.id(), granting_ticket = tgt_id, "service ticket issued");
        Ok(ticket)
    }

    /// Bind `tgt_id` to the client, then destroy the session a different
    /// previous cookie pointed to. The old session is never destroyed before
    /// the new binding succeeded.
    ///
    /// # Errors
    /// `Prevented` when the binding itself fails. A failure to destroy the
    /// previous session is logged and does not fail the call.
    #[instrument(skip(self, binder))]
    pub fn send_session_cookie(
        &self,
        tgt_id: &str,
        existing_cookie_id: Option<&str>,
        binder: &dyn SessionCookieBinder,
        options: CookieOptions,
    ) -> Result<(), FlowError> {
        binder
            .bind(tgt_id, options)
            .map_err(|err| FlowError::Prevented(err.to_string()))?;

        let previous = existing_cookie_id
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != tgt_id);
        if let Some(previous) = previous {
            if let Err(err) = self.destroy_ticket_granting_ticket(previous) {
                warn!(previous, error = %err, "failed to destroy replaced session");
            }
        }
        Ok(())
    }

    /// Logout. Removes the session, every ticket issued from it and every
    /// proxy-granting ticket below it. Returns the services that took part in
    /// the session. Unknown or non-session ids, proxy-granting tickets
    /// included, yield an empty list and destroy nothing.
    ///
    /// # Errors
    /// `InvalidTicket { detail: Unavailable }` when the registry fails.
    #[instrument(skip(self))]
    pub fn destroy_ticket_granting_ticket(&self, id: &str) -> Result<Vec<Service>, FlowError> {
        let root = match self.get(id)? {
            Some(Ticket::TicketGranting(tgt)) if tgt.kind() == TicketKind::TicketGranting => tgt,
            Some(other) => {
                debug!(ticket = id, kind = %other.kind(), "not a session; nothing destroyed");
                return Ok(Vec::new());
            }
            None => return Ok(Vec::new()),
        };

        let mut pending = vec![root.clone()];
        while let Some(tgt) = pending.pop() {
            for child in &tgt.proxy_granting_tickets {
                if let Some(Ticket::TicketGranting(pgt)) = self.get(child)? {
                    pending.push(pgt);
                }
            }
            for descendant in &tgt.descendant_tickets {
                self.remove(descendant)?;
            }
            self.remove(tgt.id())?;
        }

        info!(ticket = id, services = root.services.len(), "ticket-granting ticket destroyed");
        Ok(root.services.into_values().collect())
    }
}

#[cfg(test)]
mod tests;
