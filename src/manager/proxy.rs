//! Proxy-granting and proxy tickets.

use super::TicketLifecycleManager;
use crate::authentication::Authentication;
use crate::error::{FlowError, InvalidTicketDetail, UnauthorizedReason};
use crate::service::Service;
use crate::ticket::{ServiceTicket, Ticket, TicketGrantingTicket, TicketKind, TicketState};
use tracing::{info, instrument};

impl TicketLifecycleManager {
    /// Grant a proxy-granting ticket to the service an unconsumed service
    /// ticket was issued for. The service ticket itself is left untouched so
    /// it can still be validated.
    ///
    /// # Errors
    /// - `InvalidTicket` when the service ticket or its session is not live.
    /// - `UnauthorizedService(ProxyingDenied)` when the service may not proxy.
    #[instrument(skip(self, authentication))]
    pub fn create_proxy_granting_ticket(
        &self,
        service_ticket_id: &str,
        authentication: Authentication,
    ) -> Result<TicketGrantingTicket, FlowError> {
        let ticket = match self.get(service_ticket_id)? {
            Some(Ticket::Service(ticket)) => ticket,
            Some(_) => {
                return Err(FlowError::invalid_ticket(
                    service_ticket_id,
                    InvalidTicketDetail::WrongKind,
                ))
            }
            None => {
                return Err(FlowError::invalid_ticket(
                    service_ticket_id,
                    InvalidTicketDetail::NotFound,
                ))
            }
        };
        let now = self.now();
        if ticket.state.is_expired(now) {
            return Err(FlowError::invalid_ticket(
                service_ticket_id,
                InvalidTicketDetail::Expired,
            ));
        }

        let registered = self.services.ensure_access(&ticket.service)?;
        if !registered.proxy_allowed {
            return Err(FlowError::unauthorized(
                ticket.service.id(),
                UnauthorizedReason::ProxyingDenied,
            ));
        }

        let id = self.new_id(TicketKind::ProxyGranting)?;
        let mut pgt = TicketGrantingTicket::new(
            id,
            authentication,
            now,
            self.tickets.proxy_granting().clone(),
        );
        pgt.parent = Some(ticket.granting_ticket.clone());
        pgt.proxied_by = Some(ticket.service.clone());

        self.update_granting(&ticket.granting_ticket, TicketKind::TicketGranting, |parent| {
            parent.proxy_granting_tickets.insert(pgt.id().to_string());
            Ok(())
        })?
        .into_live(&ticket.granting_ticket)?;
        self.store(Ticket::TicketGranting(pgt.clone()))?;
        info!(ticket = pgt.id(), proxied_by = %ticket.service, "proxy-granting ticket issued");
        Ok(pgt)
    }

    /// # Errors
    /// - `InvalidTicket` when the proxy-granting ticket is not live.
    /// - `UnauthorizedService` when the target service is unknown or disabled.
    #[instrument(skip(self, service), fields(service = %service))]
    pub fn grant_proxy_ticket(
        &self,
        proxy_granting_ticket_id: &str,
        service: &Service,
    ) -> Result<ServiceTicket, FlowError> {
        let id = self.new_id(TicketKind::Proxy)?;
        let now = self.now();
        self.update_granting(proxy_granting_ticket_id, TicketKind::ProxyGranting, |pgt| {
            self.services.ensure_access(service)?;
            pgt.grant(&id, service, now);
            Ok(())
        })?
        .into_live(proxy_granting_ticket_id)?;

        let ticket = ServiceTicket {
            state: TicketState::new(id, now, self.tickets.proxy_ticket().clone()),
            service: service.clone(),
            granting_ticket: proxy_granting_ticket_id.to_string(),
            from_new_login: false,
        };
        self.store(Ticket::Proxy(ticket.clone()))?;
        info!(ticket = ticket.id(), granting_ticket = proxy_granting_ticket_id, "proxy ticket issued");
        Ok(ticket)
    }
}
