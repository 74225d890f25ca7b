//! # ssoflow (SSO ticket lifecycle & authentication flow core)
//!
//! `ssoflow` decides, for every inbound single-sign-on request, whether an
//! existing session is reused, renewed, updated in place or replaced, and
//! translates authentication successes, warnings and failures into a single
//! named flow transition.
//!
//! ## Tickets
//!
//! A ticket-granting ticket (`TGT-`) represents an established SSO session.
//! Service tickets (`ST-`) are short-lived, single-use credentials issued from
//! a session for one service. Proxy-granting tickets (`PGT-`) and proxy
//! tickets (`PT-`) extend the same model to proxied services.
//!
//! - **Registry owns tickets:** the [`registry::TicketRegistry`] port is the only
//!   shared state. The lifecycle manager never keeps a ticket around between
//!   calls; it re-reads, mutates a local copy and writes it back.
//! - **Expiration is checked on read:** an expired ticket is treated exactly like
//!   a missing one, regardless of when the registry removes it.
//! - **Deletes are idempotent:** destroying an absent ticket is a no-op.
//!
//! ## Flow
//!
//! [`flow::FlowOrchestrator::evaluate_request`] sequences the SSO participation
//! evaluator, the authentication finalizer, the lifecycle manager and the
//! exception resolver. Callers never see a raw error, only a
//! [`flow::Transition`] with attached message codes.
//!
//! ## Orphaned sessions
//!
//! If a request is aborted after a TGT was issued but before its cookie was
//! bound, the TGT stays in the registry until its own expiration policy
//! reclaims it. The core never deletes it speculatively, since a concurrent
//! request may already have adopted it.

pub mod adaptive;
pub mod authentication;
pub mod cli;
pub mod clock;
pub mod error;
pub mod flow;
pub mod manager;
pub mod messages;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod sso;
pub mod ticket;
pub mod transport;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
