use super::{RegistryError, TicketRegistry, UpdateOutcome};
use crate::ticket::{Ticket, TicketKind};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reference registry backed by a map behind a `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryTicketRegistry {
    tickets: RwLock<HashMap<String, Ticket>>,
}

impl InMemoryTicketRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Ticket>>, RegistryError> {
        self.tickets
            .read()
            .map_err(|_| RegistryError::Unavailable("ticket map lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Ticket>>, RegistryError> {
        self.tickets
            .write()
            .map_err(|_| RegistryError::Unavailable("ticket map lock poisoned".to_string()))
    }
}

impl TicketRegistry for InMemoryTicketRegistry {
    fn get(&self, id: &str) -> Result<Option<Ticket>, RegistryError> {
        Ok(self.read()?.get(id).cloned())
    }

    fn add_or_update(&self, mut ticket: Ticket) -> Result<(), RegistryError> {
        let mut tickets = self.write()?;
        if let Some(current) = tickets.get(ticket.id()) {
            ticket.state_mut().version = next_version(current);
        }
        tickets.insert(ticket.id().to_string(), ticket);
        Ok(())
    }

    fn update_if_present(&self, mut ticket: Ticket) -> Result<bool, RegistryError> {
        let mut tickets = self.write()?;
        match tickets.get_mut(ticket.id()) {
            Some(slot) => {
                ticket.state_mut().version = next_version(slot);
                *slot = ticket;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update_if_unchanged(&self, mut ticket: Ticket) -> Result<UpdateOutcome, RegistryError> {
        let mut tickets = self.write()?;
        match tickets.get_mut(ticket.id()) {
            Some(slot) if slot.state().version == ticket.state().version => {
                ticket.state_mut().version = next_version(slot);
                *slot = ticket;
                Ok(UpdateOutcome::Stored)
            }
            Some(_) => Ok(UpdateOutcome::Conflict),
            None => Ok(UpdateOutcome::Missing),
        }
    }

    fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        Ok(self.write()?.remove(id).is_some())
    }

    fn count(&self, kind: TicketKind) -> Result<usize, RegistryError> {
        Ok(self
            .read()?
            .values()
            .filter(|ticket| ticket.kind() == kind)
            .count())
    }
}

fn next_version(current: &Ticket) -> u64 {
    current.state().version.wrapping_add(1)
}
