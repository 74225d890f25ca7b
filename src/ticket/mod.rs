//! Ticket model.
//!
//! Tickets are a closed set of variants sharing a composed [`TicketState`].
//! Relationships between tickets are ids, never references: the registry owns
//! every ticket and the manager re-reads before each decision.

pub mod expiration;
pub mod id;

pub use expiration::ExpirationPolicy;
pub use id::{TicketIdError, TicketIdGenerator};

use crate::authentication::Authentication;
use crate::service::Service;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const TICKET_GRANTING_PREFIX: &str = "TGT";
pub const PROXY_GRANTING_PREFIX: &str = "PGT";
pub const SERVICE_PREFIX: &str = "ST";
pub const PROXY_PREFIX: &str = "PT";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    TicketGranting,
    ProxyGranting,
    Service,
    Proxy,
}

impl TicketKind {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::TicketGranting => TICKET_GRANTING_PREFIX,
            Self::ProxyGranting => PROXY_GRANTING_PREFIX,
            Self::Service => SERVICE_PREFIX,
            Self::Proxy => PROXY_PREFIX,
        }
    }

    /// Classify a ticket id by its prefix.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        let (prefix, _) = id.split_once('-')?;
        match prefix {
            TICKET_GRANTING_PREFIX => Some(Self::TicketGranting),
            PROXY_GRANTING_PREFIX => Some(Self::ProxyGranting),
            SERVICE_PREFIX => Some(Self::Service),
            PROXY_PREFIX => Some(Self::Proxy),
            _ => None,
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Identity and lifecycle counters shared by every ticket kind.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TicketState {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub last_time_used: DateTime<Utc>,
    pub previous_time_used: Option<DateTime<Utc>>,
    pub count_of_uses: u32,
    pub expiration_policy: ExpirationPolicy,
    /// Bumped by the registry on every write of an existing ticket.
    #[serde(default)]
    pub version: u64,
}

impl TicketState {
    #[must_use]
    pub fn new(id: String, now: DateTime<Utc>, expiration_policy: ExpirationPolicy) -> Self {
        Self {
            id,
            creation_time: now,
            last_time_used: now,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
            version: 0,
        }
    }

    /// Record one use of the ticket.
    pub fn update(&mut self, now: DateTime<Utc>) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(self, now)
    }
}

/// An SSO session, or a proxy-granting ticket when `proxied_by` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    pub state: TicketState,
    pub authentication: Authentication,
    pub services: BTreeMap<String, Service>,
    pub descendant_tickets: BTreeSet<String>,
    pub proxy_granting_tickets: BTreeSet<String>,
    /// Weak back reference; a child never owns its parent.
    pub parent: Option<String>,
    pub proxied_by: Option<Service>,
}

impl TicketGrantingTicket {
    #[must_use]
    pub fn new(
        id: String,
        authentication: Authentication,
        now: DateTime<Utc>,
        expiration_policy: ExpirationPolicy,
    ) -> Self {
        Self {
            state: TicketState::new(id, now, expiration_policy),
            authentication,
            services: BTreeMap::new(),
            descendant_tickets: BTreeSet::new(),
            proxy_granting_tickets: BTreeSet::new(),
            parent: None,
            proxied_by: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.state.id
    }

    #[must_use]
    pub fn kind(&self) -> TicketKind {
        if self.proxied_by.is_some() {
            TicketKind::ProxyGranting
        } else {
            TicketKind::TicketGranting
        }
    }

    /// Record a ticket issued for `service` from this session.
    pub fn grant(&mut self, ticket_id: &str, service: &Service, now: DateTime<Utc>) {
        self.services
            .insert(service.id().to_string(), service.clone());
        self.descendant_tickets.insert(ticket_id.to_string());
        self.state.update(now);
    }

    /// The root session of a proxy chain, i.e. the session without a parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A single-use ticket bound to one service. Used for both service tickets
/// and proxy tickets.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServiceTicket {
    pub state: TicketState,
    pub service: Service,
    pub granting_ticket: String,
    pub from_new_login: bool,
}

impl ServiceTicket {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.state.id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ticket {
    TicketGranting(TicketGrantingTicket),
    Service(ServiceTicket),
    Proxy(ServiceTicket),
}

impl Ticket {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.state().id
    }

    #[must_use]
    pub fn kind(&self) -> TicketKind {
        match self {
            Self::TicketGranting(tgt) => tgt.kind(),
            Self::Service(_) => TicketKind::Service,
            Self::Proxy(_) => TicketKind::Proxy,
        }
    }

    #[must_use]
    pub fn state(&self) -> &TicketState {
        match self {
            Self::TicketGranting(tgt) => &tgt.state,
            Self::Service(st) | Self::Proxy(st) => &st.state,
        }
    }

    pub fn state_mut(&mut self) -> &mut TicketState {
        match self {
            Self::TicketGranting(tgt) => &mut tgt.state,
            Self::Service(st) | Self::Proxy(st) => &mut st.state,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state().is_expired(now)
    }

    pub fn update(&mut self, now: DateTime<Utc>) {
        self.state_mut().update(now);
    }

    #[must_use]
    pub fn into_ticket_granting(self) -> Option<TicketGrantingTicket> {
        match self {
            Self::TicketGranting(tgt) => Some(tgt),
            _ => None,
        }
    }
}
