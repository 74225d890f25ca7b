//! Ticket id generation.

use super::TicketKind;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

const RANDOM_BYTES: usize = 32;

#[derive(Debug, Error)]
#[error("failed to generate {kind} ticket id")]
pub struct TicketIdError {
    kind: &'static str,
    #[source]
    source: rand::Error,
}

/// Produces `<PREFIX>-<counter>-<random>[-<suffix>]` ids.
///
/// The counter only makes ids easier to read in logs; unguessability comes
/// from the random part.
#[derive(Debug, Default)]
pub struct TicketIdGenerator {
    counter: AtomicU64,
    suffix: Option<String>,
}

impl TicketIdGenerator {
    /// `suffix` is usually the node name in a clustered deployment.
    #[must_use]
    pub fn new(suffix: Option<String>) -> Self {
        Self {
            counter: AtomicU64::new(0),
            suffix: suffix.filter(|value| !value.trim().is_empty()),
        }
    }

    /// # Errors
    /// Returns an error if the OS random number generator fails.
    pub fn new_ticket_id(&self, kind: TicketKind) -> Result<String, TicketIdError> {
        let mut bytes = [0u8; RANDOM_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|source| TicketIdError {
                kind: kind.prefix(),
                source,
            })?;
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let random = Base64UrlUnpadded::encode_string(&bytes);
        Ok(match &self.suffix {
            Some(suffix) => format!("{}-{count}-{random}-{suffix}", kind.prefix()),
            None => format!("{}-{count}-{random}", kind.prefix()),
        })
    }
}
