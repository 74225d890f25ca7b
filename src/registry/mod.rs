//! Ticket registry port.
//!
//! The registry is the only state shared between concurrent requests. Callers
//! must assume any read is stale by the time they write, so the contract is
//! small: whole-ticket writes, conditional writes that only succeed while the
//! ticket still exists (optionally at the version it was read at), and
//! idempotent deletes.

mod memory;

pub use memory::InMemoryTicketRegistry;

use crate::ticket::{Ticket, TicketKind};
use thiserror::Error;

/// Result of a versioned write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateOutcome {
    Stored,
    /// Another writer stored the ticket after it was read.
    Conflict,
    /// The ticket was deleted after it was read.
    Missing,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("ticket registry unavailable: {0}")]
    Unavailable(String),
}

pub trait TicketRegistry: Send + Sync {
    /// Raw read. Expiration is the caller's concern.
    ///
    /// # Errors
    /// `Unavailable` when the backing store cannot be reached.
    fn get(&self, id: &str) -> Result<Option<Ticket>, RegistryError>;

    /// # Errors
    /// `Unavailable` when the backing store cannot be reached.
    fn add_or_update(&self, ticket: Ticket) -> Result<(), RegistryError>;

    /// Write `ticket` only if a ticket with the same id is still stored.
    /// Returns `false` when it was concurrently deleted.
    ///
    /// # Errors
    /// `Unavailable` when the backing store cannot be reached.
    fn update_if_present(&self, ticket: Ticket) -> Result<bool, RegistryError>;

    /// Write `ticket` only if the stored copy still has the version
    /// `ticket` was read at. A successful write bumps the version.
    ///
    /// # Errors
    /// `Unavailable` when the backing store cannot be reached.
    fn update_if_unchanged(&self, ticket: Ticket) -> Result<UpdateOutcome, RegistryError>;

    /// Returns `true` if this call removed the ticket, `false` if it was
    /// already absent.
    ///
    /// # Errors
    /// `Unavailable` when the backing store cannot be reached.
    fn delete(&self, id: &str) -> Result<bool, RegistryError>;

    /// Used by monitoring only.
    ///
    /// # Errors
    /// `Unavailable` when the backing store cannot be reached.
    fn count(&self, kind: TicketKind) -> Result<usize, RegistryError>;
}
