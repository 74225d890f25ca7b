//! Session cookie binding port.
//!
//! The core deals only in session ids. Encoding them into a cookie or header
//! is the transport's job; [`InMemoryCookieJar`] stands in for it in tests and
//! the replay tool.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CookieOptions {
    /// Persistent cookies survive a browser restart. Public workstations
    /// only ever get session cookies.
    pub persistent: bool,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("session cookie could not be bound: {0}")]
    BindFailed(String),
}

pub trait SessionCookieBinder: Send + Sync {
    /// # Errors
    /// `BindFailed` when the transport could not persist the binding.
    fn bind(&self, session_id: &str, options: CookieOptions) -> Result<(), TransportError>;

    /// # Errors
    /// `BindFailed` when the transport could not clear the binding.
    fn clear(&self) -> Result<(), TransportError>;
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BoundCookie {
    pub session_id: String,
    pub options: CookieOptions,
}

/// Cookie jar for a single simulated browser.
#[derive(Debug, Default)]
pub struct InMemoryCookieJar {
    cookie: Mutex<Option<BoundCookie>>,
}

impl InMemoryCookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<BoundCookie>> {
        self.cookie
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn current(&self) -> Option<BoundCookie> {
        self.lock().clone()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.lock().as_ref().map(|cookie| cookie.session_id.clone())
    }
}

impl SessionCookieBinder for InMemoryCookieJar {
    fn bind(&self, session_id: &str, options: CookieOptions) -> Result<(), TransportError> {
        if session_id.trim().is_empty() {
            return Err(TransportError::BindFailed("empty session id".to_string()));
        }
        *self.lock() = Some(BoundCookie {
            session_id: session_id.to_string(),
            options,
        });
        Ok(())
    }

    fn clear(&self) -> Result<(), TransportError> {
        *self.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jar_binds_and_clears() {
        let jar = InMemoryCookieJar::new();
        assert!(jar.session_id().is_none());

        jar.bind("TGT-1-a", CookieOptions { persistent: true })
            .expect("bind");
        assert_eq!(jar.session_id().as_deref(), Some("TGT-1-a"));
        assert!(jar.current().expect("cookie").options.persistent);

        jar.clear().expect("clear");
        assert!(jar.current().is_none());
    }

    #[test]
    fn empty_session_id_is_refused() {
        let jar = InMemoryCookieJar::new();
        assert!(jar.bind(" ", CookieOptions::default()).is_err());
    }
}
