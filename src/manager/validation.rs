//! Service and proxy ticket validation.

use super::{TicketLifecycleManager, MAX_UPDATE_ATTEMPTS};
use crate::authentication::Principal;
use crate::error::{FlowError, InvalidTicketDetail};
use crate::service::Service;
use crate::registry::UpdateOutcome;
use crate::ticket::{ServiceTicket, Ticket, TicketKind};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// Outcome of a successful validation, returned to the validating service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Assertion {
    pub principal: Principal,
    pub service: Service,
    pub granting_ticket: String,
    pub from_new_login: bool,
    pub proxied: bool,
    /// The service the proxy-granting ticket was issued to, for proxy tickets.
    pub proxied_by: Option<Service>,
}

impl TicketLifecycleManager {
    /// # Errors
    /// `InvalidTicket` for unknown, expired, already used or mismatched
    /// tickets, and for proxy tickets.
    #[instrument(skip(self, service), fields(service = %service))]
    pub fn validate_service_ticket(
        &self,
        ticket_id: &str,
        service: &Service,
    ) -> Result<Assertion, FlowError> {
        self.validate(ticket_id, service, false)
    }

    /// Like [`Self::validate_service_ticket`] but also accepts proxy tickets.
    ///
    /// # Errors
    /// `InvalidTicket` for unknown, expired, already used or mismatched
    /// tickets.
    #[instrument(skip(self, service), fields(service = %service))]
    pub fn validate_proxy_ticket(
        &self,
        ticket_id: &str,
        service: &Service,
    ) -> Result<Assertion, FlowError> {
        self.validate(ticket_id, service, true)
    }

    /// Every attempt consumes a use before the service is compared, so a
    /// single-use ticket never validates twice whatever the first outcome.
    fn validate(
        &self,
        ticket_id: &str,
        service: &Service,
        accept_proxy: bool,
    ) -> Result<Assertion, FlowError> {
        let (ticket, proxied) = self.consume(ticket_id, accept_proxy)?;

        if ticket.service != *service {
            warn!(
                ticket = ticket_id,
                expected = %ticket.service,
                presented = %service,
                "service ticket presented by another service"
            );
            return Err(FlowError::invalid_ticket(
                ticket_id,
                InvalidTicketDetail::ServiceMismatch,
            ));
        }

        let granting_kind = if proxied {
            TicketKind::ProxyGranting
        } else {
            TicketKind::TicketGranting
        };
        let granting = match self.fetch_granting(&ticket.granting_ticket, granting_kind)? {
            super::Fetched::Live(granting) => granting,
            super::Fetched::Expired => {
                return Err(FlowError::invalid_ticket(
                    ticket_id,
                    InvalidTicketDetail::Expired,
                ))
            }
            super::Fetched::Missing | super::Fetched::WrongKind => {
                return Err(FlowError::invalid_ticket(
                    ticket_id,
                    InvalidTicketDetail::NotFound,
                ))
            }
        };

        info!(ticket = ticket_id, principal = %granting.authentication.principal.id, "ticket validated");
        Ok(Assertion {
            principal: granting.authentication.principal,
            service: ticket.service,
            granting_ticket: ticket.granting_ticket,
            from_new_login: ticket.from_new_login,
            proxied,
            proxied_by: granting.proxied_by,
        })
    }

    /// Read the ticket and persist one consumed use. An exhausted ticket is
    /// deleted; losing that delete to a concurrent validation means the other
    /// request consumed it. A write-back that lost against another validation
    /// is retried on a fresh read, so no use is ever counted twice.
    fn consume(
        &self,
        ticket_id: &str,
        accept_proxy: bool,
    ) -> Result<(ServiceTicket, bool), FlowError> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let (mut ticket, proxied) = match self.get(ticket_id)? {
                None => {
                    return Err(FlowError::invalid_ticket(
                        ticket_id,
                        InvalidTicketDetail::NotFound,
                    ))
                }
                Some(Ticket::Service(ticket)) => (ticket, false),
                Some(Ticket::Proxy(ticket)) if accept_proxy => (ticket, true),
                Some(_) => {
                    return Err(FlowError::invalid_ticket(
                        ticket_id,
                        InvalidTicketDetail::WrongKind,
                    ))
                }
            };

            let now = self.now();
            if ticket.state.is_expired(now) {
                self.remove(ticket_id)?;
                return Err(FlowError::invalid_ticket(
                    ticket_id,
                    InvalidTicketDetail::Expired,
                ));
            }
            ticket.state.update(now);

            if ticket.state.is_expired(now) {
                if self.remove(ticket_id)? {
                    return Ok((ticket, proxied));
                }
                return Err(FlowError::invalid_ticket(
                    ticket_id,
                    InvalidTicketDetail::NotFound,
                ));
            }

            let stored = if proxied {
                Ticket::Proxy(ticket.clone())
            } else {
                Ticket::Service(ticket.clone())
            };
            match self.store_if_unchanged(stored)? {
                UpdateOutcome::Stored => return Ok((ticket, proxied)),
                UpdateOutcome::Missing => {
                    return Err(FlowError::invalid_ticket(
                        ticket_id,
                        InvalidTicketDetail::NotFound,
                    ))
                }
                UpdateOutcome::Conflict => {
                    debug!(ticket = ticket_id, "ticket used concurrently; retrying");
                }
            }
        }
        Err(FlowError::unavailable(ticket_id))
    }
}
