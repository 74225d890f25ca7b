//! Composable expiration policies.
//!
//! Policies are pure: they read the ticket's counters and timestamps and the
//! supplied `now`, never the wall clock. All time comparisons are strict, so a
//! ticket is still valid at exactly its limit. A limit too large to be
//! represented as a duration is never exceeded.

use super::TicketState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVICE_TICKET_USES: u32 = 1;
pub const DEFAULT_SERVICE_TICKET_TTL_SECONDS: i64 = 10;
pub const DEFAULT_TGT_MAX_TTL_SECONDS: i64 = 8 * 60 * 60;
pub const DEFAULT_TGT_IDLE_SECONDS: i64 = 2 * 60 * 60;
pub const DEFAULT_REMEMBER_ME_TTL_SECONDS: i64 = 14 * 24 * 60 * 60;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    NeverExpires,
    /// Idle limit measured from the last use.
    Timeout { idle_seconds: i64 },
    /// Absolute limit measured from creation.
    HardTimeout { ttl_seconds: i64 },
    MultiUseOrTimeout { uses: u32, ttl_seconds: i64 },
    TicketGrantingTicket {
        max_ttl_seconds: i64,
        idle_seconds: i64,
    },
    /// Expired as soon as any member is.
    Composite { policies: Vec<ExpirationPolicy> },
}

impl ExpirationPolicy {
    #[must_use]
    pub fn default_service_ticket() -> Self {
        Self::MultiUseOrTimeout {
            uses: DEFAULT_SERVICE_TICKET_USES,
            ttl_seconds: DEFAULT_SERVICE_TICKET_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn default_ticket_granting_ticket() -> Self {
        Self::TicketGrantingTicket {
            max_ttl_seconds: DEFAULT_TGT_MAX_TTL_SECONDS,
            idle_seconds: DEFAULT_TGT_IDLE_SECONDS,
        }
    }

    #[must_use]
    pub fn default_remember_me() -> Self {
        Self::HardTimeout {
            ttl_seconds: DEFAULT_REMEMBER_ME_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn is_expired(&self, state: &TicketState, now: DateTime<Utc>) -> bool {
        match self {
            Self::NeverExpires => false,
            Self::Timeout { idle_seconds } => idle_exceeded(state, now, *idle_seconds),
            Self::HardTimeout { ttl_seconds } => ttl_exceeded(state, now, *ttl_seconds),
            Self::MultiUseOrTimeout { uses, ttl_seconds } => {
                state.count_of_uses >= *uses || ttl_exceeded(state, now, *ttl_seconds)
            }
            Self::TicketGrantingTicket {
                max_ttl_seconds,
                idle_seconds,
            } => {
                ttl_exceeded(state, now, *max_ttl_seconds)
                    || idle_exceeded(state, now, *idle_seconds)
            }
            Self::Composite { policies } => policies
                .iter()
                .any(|policy| policy.is_expired(state, now)),
        }
    }
}

fn ttl_exceeded(state: &TicketState, now: DateTime<Utc>, ttl_seconds: i64) -> bool {
    elapsed_beyond(state.creation_time, now, ttl_seconds)
}

// A ticket used "in the future" relative to now (clock skew) is never idle.
fn idle_exceeded(state: &TicketState, now: DateTime<Utc>, idle_seconds: i64) -> bool {
    elapsed_beyond(state.last_time_used, now, idle_seconds)
}

fn elapsed_beyond(since: DateTime<Utc>, now: DateTime<Utc>, limit_seconds: i64) -> bool {
    Duration::try_seconds(limit_seconds).is_some_and(|limit| now - since > limit)
}
