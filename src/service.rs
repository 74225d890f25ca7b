//! Service identity and the registered-service catalogue.

use crate::error::{FlowError, UnauthorizedReason};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// A target application, identified by its normalized service URL.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Service {
    id: String,
}

impl Service {
    /// Normalize a raw service string. URLs lose their fragment, anything that
    /// does not parse as a URL is kept as trimmed text.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let id = match Url::parse(trimmed) {
            Ok(mut url) => {
                url.set_fragment(None);
                url.to_string()
            }
            Err(_) => trimmed.to_string(),
        };
        Self { id }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl From<String> for Service {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<Service> for String {
    fn from(service: Service) -> Self {
        service.id
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[derive(Debug, Error)]
pub enum ServiceDefinitionError {
    #[error("registered service {id} has an invalid service pattern")]
    InvalidPattern {
        id: u64,
        #[source]
        source: regex::Error,
    },
}

/// Serialized form of a registered service, as found in scenario files.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegisteredServiceDefinition {
    pub id: u64,
    pub name: String,
    pub service_id: String,
    #[serde(default)]
    pub evaluation_order: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub sso_enabled: bool,
    #[serde(default)]
    pub create_cookie_on_renewed_authentication: Option<bool>,
    #[serde(default)]
    pub multifactor_provider: Option<String>,
    #[serde(default)]
    pub proxy_allowed: bool,
    #[serde(default)]
    pub ticket_granting_ticket_max_age_seconds: Option<i64>,
}

const fn default_true() -> bool {
    true
}

/// A service known to the SSO server together with its access rules.
#[derive(Clone, Debug)]
pub struct RegisteredService {
    pub id: u64,
    pub name: String,
    service_id: Regex,
    pub evaluation_order: i32,
    pub enabled: bool,
    pub sso_enabled: bool,
    pub create_cookie_on_renewed_authentication: Option<bool>,
    pub multifactor_provider: Option<String>,
    pub proxy_allowed: bool,
    /// Sessions older than this do not participate in SSO for this service.
    pub ticket_granting_ticket_max_age_seconds: Option<i64>,
}

impl RegisteredService {
    /// Build an enabled, SSO-participating service matching `pattern`.
    ///
    /// # Errors
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn new(id: u64, name: &str, pattern: &str) -> Result<Self, ServiceDefinitionError> {
        Ok(Self {
            id,
            name: name.to_string(),
            service_id: compile_pattern(id, pattern)?,
            evaluation_order: 0,
            enabled: true,
            sso_enabled: true,
            create_cookie_on_renewed_authentication: None,
            multifactor_provider: None,
            proxy_allowed: false,
            ticket_granting_ticket_max_age_seconds: None,
        })
    }

    #[must_use]
    pub fn with_evaluation_order(mut self, order: i32) -> Self {
        self.evaluation_order = order;
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_sso_enabled(mut self, sso_enabled: bool) -> Self {
        self.sso_enabled = sso_enabled;
        self
    }

    #[must_use]
    pub fn with_create_cookie_on_renewed_authentication(mut self, create: Option<bool>) -> Self {
        self.create_cookie_on_renewed_authentication = create;
        self
    }

    #[must_use]
    pub fn with_multifactor_provider(mut self, provider: Option<String>) -> Self {
        self.multifactor_provider = provider;
        self
    }

    #[must_use]
    pub fn with_proxy_allowed(mut self, allowed: bool) -> Self {
        self.proxy_allowed = allowed;
        self
    }

    #[must_use]
    pub fn with_ticket_granting_ticket_max_age(mut self, seconds: Option<i64>) -> Self {
        self.ticket_granting_ticket_max_age_seconds = seconds;
        self
    }

    /// Whether a session created at `created` is still young enough for SSO
    /// into this service. A limit too large to represent never applies.
    #[must_use]
    pub fn accepts_session_created_at(
        &self,
        created: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        self.ticket_granting_ticket_max_age_seconds
            .and_then(Duration::try_seconds)
            .map_or(true, |max_age| now - created <= max_age)
    }

    /// The whole service id must match the pattern.
    #[must_use]
    pub fn matches(&self, service: &Service) -> bool {
        self.service_id.is_match(service.id())
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.service_id.as_str()
    }
}

impl TryFrom<RegisteredServiceDefinition> for RegisteredService {
    type Error = ServiceDefinitionError;

    fn try_from(definition: RegisteredServiceDefinition) -> Result<Self, Self::Error> {
        Ok(Self {
            id: definition.id,
            name: definition.name,
            service_id: compile_pattern(definition.id, &definition.service_id)?,
            evaluation_order: definition.evaluation_order,
            enabled: definition.enabled,
            sso_enabled: definition.sso_enabled,
            create_cookie_on_renewed_authentication: definition
                .create_cookie_on_renewed_authentication,
            multifactor_provider: definition.multifactor_provider,
            proxy_allowed: definition.proxy_allowed,
            ticket_granting_ticket_max_age_seconds: definition
                .ticket_granting_ticket_max_age_seconds,
        })
    }
}

fn compile_pattern(id: u64, pattern: &str) -> Result<Regex, ServiceDefinitionError> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|source| ServiceDefinitionError::InvalidPattern { id, source })
}

/// Ordered catalogue of registered services. Lookups return the first match
/// by evaluation order, then id.
#[derive(Clone, Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<RegisteredService>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(mut services: Vec<RegisteredService>) -> Self {
        services.sort_by_key(|service| (service.evaluation_order, service.id));
        Self { services }
    }

    /// # Errors
    /// Returns an error if any definition carries an invalid pattern.
    pub fn from_definitions(
        definitions: Vec<RegisteredServiceDefinition>,
    ) -> Result<Self, ServiceDefinitionError> {
        let services = definitions
            .into_iter()
            .map(RegisteredService::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(services))
    }

    #[must_use]
    pub fn find(&self, service: &Service) -> Option<&RegisteredService> {
        self.services.iter().find(|registered| registered.matches(service))
    }

    /// Resolve the registered service and check that it may be used at all.
    ///
    /// # Errors
    /// `UnauthorizedService` when the service is unknown or disabled.
    pub fn ensure_access(&self, service: &Service) -> Result<&RegisteredService, FlowError> {
        let registered = self
            .find(service)
            .ok_or_else(|| FlowError::unauthorized(service.id(), UnauthorizedReason::NotRegistered))?;
        if !registered.enabled {
            return Err(FlowError::unauthorized(
                service.id(),
                UnauthorizedReason::Disabled,
            ));
        }
        Ok(registered)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
