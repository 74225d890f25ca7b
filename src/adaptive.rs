//! Risk-based admission of the request context.
//!
//! The adaptive policy only looks at the client: address, user agent and the
//! country resolved by an upstream geolocation step. It runs before any
//! credential is finalized, so a denied request never reaches the handlers.

use crate::error::FlowError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What is known about the client of the current request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct AdaptivePolicy {
    rejected_countries: Vec<String>,
    rejected_ip_addresses: Option<Regex>,
    rejected_user_agents: Option<Regex>,
}

impl AdaptivePolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rejected_countries(mut self, countries: Vec<String>) -> Self {
        self.rejected_countries = countries
            .into_iter()
            .map(|country| country.trim().to_ascii_uppercase())
            .filter(|country| !country.is_empty())
            .collect();
        self
    }

    /// # Errors
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn with_rejected_ip_addresses(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.rejected_ip_addresses = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// # Errors
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn with_rejected_user_agents(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.rejected_user_agents = Some(Regex::new(pattern)?);
        Ok(self)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.rejected_countries.is_empty()
            || self.rejected_ip_addresses.is_some()
            || self.rejected_user_agents.is_some()
    }

    /// # Errors
    /// `AdaptivePolicyDenied` naming the first rule that matched.
    pub fn evaluate(&self, client: &ClientInfo) -> Result<(), FlowError> {
        if let (Some(pattern), Some(ip)) = (&self.rejected_ip_addresses, &client.ip_address) {
            if pattern.is_match(ip) {
                warn!(%ip, "client address rejected by adaptive policy");
                return Err(FlowError::AdaptivePolicyDenied {
                    reason: format!("ip address {ip} is rejected"),
                });
            }
        }

        if let (Some(pattern), Some(agent)) = (&self.rejected_user_agents, &client.user_agent) {
            if pattern.is_match(agent) {
                warn!(%agent, "user agent rejected by adaptive policy");
                return Err(FlowError::AdaptivePolicyDenied {
                    reason: "user agent is rejected".to_string(),
                });
            }
        }

        if let Some(country) = &client.country {
            let country = country.trim().to_ascii_uppercase();
            if self.rejected_countries.contains(&country) {
                warn!(%country, "country rejected by adaptive policy");
                return Err(FlowError::AdaptivePolicyDenied {
                    reason: format!("country {country} is rejected"),
                });
            }
        }

        Ok(())
    }
}
