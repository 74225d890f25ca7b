use crate::adaptive::AdaptivePolicy;
use crate::policy::{DivergencePolicy, FailureMode, Policy, SsoPolicy, TicketPolicy};
use crate::ticket::expiration::{
    DEFAULT_REMEMBER_ME_TTL_SECONDS, DEFAULT_SERVICE_TICKET_TTL_SECONDS,
    DEFAULT_SERVICE_TICKET_USES, DEFAULT_TGT_IDLE_SECONDS, DEFAULT_TGT_MAX_TTL_SECONDS,
};
use crate::ticket::ExpirationPolicy;
use anyhow::Context;
use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgMatches, Command};

pub const ARG_FAILURE_MODE: &str = "failure-mode";
pub const ARG_DIVERGENCE: &str = "divergence";
pub const ARG_SSO_ENABLED: &str = "sso-enabled";
pub const ARG_CREATE_COOKIE_ON_RENEW: &str = "create-cookie-on-renew";
pub const ARG_REQUIRED_SERVICE_PATTERN: &str = "required-service-pattern";
pub const ARG_TGT_MAX_TTL: &str = "tgt-max-ttl";
pub const ARG_TGT_IDLE: &str = "tgt-idle";
pub const ARG_REMEMBER_ME_TTL: &str = "remember-me-ttl";
pub const ARG_ST_TTL: &str = "st-ttl";
pub const ARG_ST_USES: &str = "st-uses";
pub const ARG_TICKET_SUFFIX: &str = "ticket-suffix";
pub const ARG_REJECT_COUNTRY: &str = "reject-country";
pub const ARG_REJECT_IP: &str = "reject-ip";
pub const ARG_REJECT_USER_AGENT: &str = "reject-user-agent";

#[derive(Debug, Clone)]
pub struct Options {
    pub failure_mode: FailureMode,
    pub divergence: DivergencePolicy,
    pub sso_enabled: bool,
    pub create_cookie_on_renew: bool,
    pub required_service_pattern: Option<String>,
    pub tgt_max_ttl: i64,
    pub tgt_idle: i64,
    pub remember_me_ttl: i64,
    pub st_ttl: i64,
    pub st_uses: u32,
    pub ticket_suffix: Option<String>,
    pub rejected_countries: Vec<String>,
    pub rejected_ip: Option<String>,
    pub rejected_user_agent: Option<String>,
}

impl Options {
    /// Parse policy arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a mode name is unknown.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let get_seconds =
            |id: &str, default: i64| matches.get_one::<i64>(id).copied().unwrap_or(default);

        let failure_mode = match matches.get_one::<String>(ARG_FAILURE_MODE) {
            Some(value) => FailureMode::parse(value)
                .with_context(|| format!("invalid --{ARG_FAILURE_MODE}: {value}"))?,
            None => FailureMode::default(),
        };
        let divergence = match matches.get_one::<String>(ARG_DIVERGENCE) {
            Some(value) => DivergencePolicy::parse(value)
                .with_context(|| format!("invalid --{ARG_DIVERGENCE}: {value}"))?,
            None => DivergencePolicy::default(),
        };

        Ok(Self {
            failure_mode,
            divergence,
            sso_enabled: matches
                .get_one::<bool>(ARG_SSO_ENABLED)
                .copied()
                .unwrap_or(true),
            create_cookie_on_renew: matches
                .get_one::<bool>(ARG_CREATE_COOKIE_ON_RENEW)
                .copied()
                .unwrap_or(true),
            required_service_pattern: get_non_empty(ARG_REQUIRED_SERVICE_PATTERN),
            tgt_max_ttl: get_seconds(ARG_TGT_MAX_TTL, DEFAULT_TGT_MAX_TTL_SECONDS),
            tgt_idle: get_seconds(ARG_TGT_IDLE, DEFAULT_TGT_IDLE_SECONDS),
            remember_me_ttl: get_seconds(ARG_REMEMBER_ME_TTL, DEFAULT_REMEMBER_ME_TTL_SECONDS),
            st_ttl: get_seconds(ARG_ST_TTL, DEFAULT_SERVICE_TICKET_TTL_SECONDS),
            st_uses: matches
                .get_one::<u32>(ARG_ST_USES)
                .copied()
                .unwrap_or(DEFAULT_SERVICE_TICKET_USES),
            ticket_suffix: get_non_empty(ARG_TICKET_SUFFIX),
            rejected_countries: matches
                .get_many::<String>(ARG_REJECT_COUNTRY)
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            rejected_ip: get_non_empty(ARG_REJECT_IP),
            rejected_user_agent: get_non_empty(ARG_REJECT_USER_AGENT),
        })
    }

    /// Build the immutable policy.
    ///
    /// # Errors
    /// Returns an error if one of the patterns is not a valid regular
    /// expression.
    pub fn into_policy(self) -> anyhow::Result<Policy> {
        let tickets = TicketPolicy::new()
            .with_ticket_granting(ExpirationPolicy::TicketGrantingTicket {
                max_ttl_seconds: self.tgt_max_ttl,
                idle_seconds: self.tgt_idle,
            })
            .with_remember_me(ExpirationPolicy::HardTimeout {
                ttl_seconds: self.remember_me_ttl,
            })
            .with_service_ticket(ExpirationPolicy::MultiUseOrTimeout {
                uses: self.st_uses,
                ttl_seconds: self.st_ttl,
            })
            .with_id_suffix(self.ticket_suffix);

        let mut sso = SsoPolicy::new()
            .with_sso_enabled(self.sso_enabled)
            .with_create_cookie_on_renewed_authentication(self.create_cookie_on_renew);
        if let Some(pattern) = &self.required_service_pattern {
            sso = sso
                .with_required_service_pattern(pattern)
                .with_context(|| format!("invalid --{ARG_REQUIRED_SERVICE_PATTERN}"))?;
        }

        let mut adaptive = AdaptivePolicy::new().with_rejected_countries(self.rejected_countries);
        if let Some(pattern) = &self.rejected_ip {
            adaptive = adaptive
                .with_rejected_ip_addresses(pattern)
                .with_context(|| format!("invalid --{ARG_REJECT_IP}"))?;
        }
        if let Some(pattern) = &self.rejected_user_agent {
            adaptive = adaptive
                .with_rejected_user_agents(pattern)
                .with_context(|| format!("invalid --{ARG_REJECT_USER_AGENT}"))?;
        }

        Ok(Policy::new()
            .with_tickets(tickets)
            .with_sso(sso)
            .with_failure_mode(self.failure_mode)
            .with_divergence(self.divergence)
            .with_adaptive(adaptive))
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FAILURE_MODE)
                .long(ARG_FAILURE_MODE)
                .help("How handler failures combine with successes")
                .env("SSOFLOW_FAILURE_MODE")
                .default_value(FailureMode::FailClosed.as_str())
                .value_parser(PossibleValuesParser::new([
                    FailureMode::FailClosed.as_str(),
                    FailureMode::FailOpen.as_str(),
                ])),
        )
        .arg(
            Arg::new(ARG_DIVERGENCE)
                .long(ARG_DIVERGENCE)
                .help("What happens to the old session when a different user signs in")
                .env("SSOFLOW_DIVERGENCE")
                .default_value(DivergencePolicy::RetainPrevious.as_str())
                .value_parser(PossibleValuesParser::new([
                    DivergencePolicy::RetainPrevious.as_str(),
                    DivergencePolicy::DestroyPrevious.as_str(),
                ])),
        )
        .arg(
            Arg::new(ARG_SSO_ENABLED)
                .long(ARG_SSO_ENABLED)
                .help("Allow sessions to be reused across services")
                .env("SSOFLOW_SSO_ENABLED")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_CREATE_COOKIE_ON_RENEW)
                .long(ARG_CREATE_COOKIE_ON_RENEW)
                .help("Bind a session cookie after renewed authentication")
                .env("SSOFLOW_CREATE_COOKIE_ON_RENEW")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_REQUIRED_SERVICE_PATTERN)
                .long(ARG_REQUIRED_SERVICE_PATTERN)
                .help("Sessions only participate for services matching this regex")
                .env("SSOFLOW_REQUIRED_SERVICE_PATTERN"),
        )
        .arg(
            Arg::new(ARG_TGT_MAX_TTL)
                .long(ARG_TGT_MAX_TTL)
                .help("Session hard limit in seconds")
                .env("SSOFLOW_TGT_MAX_TTL")
                .default_value("28800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TGT_IDLE)
                .long(ARG_TGT_IDLE)
                .help("Session idle limit in seconds")
                .env("SSOFLOW_TGT_IDLE")
                .default_value("7200")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REMEMBER_ME_TTL)
                .long(ARG_REMEMBER_ME_TTL)
                .help("Remember-me session lifetime in seconds")
                .env("SSOFLOW_REMEMBER_ME_TTL")
                .default_value("1209600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_ST_TTL)
                .long(ARG_ST_TTL)
                .help("Service ticket lifetime in seconds")
                .env("SSOFLOW_ST_TTL")
                .default_value("10")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_ST_USES)
                .long(ARG_ST_USES)
                .help("Number of validations a service ticket allows")
                .env("SSOFLOW_ST_USES")
                .default_value("1")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_TICKET_SUFFIX)
                .long(ARG_TICKET_SUFFIX)
                .help("Node suffix appended to generated ticket ids")
                .env("SSOFLOW_TICKET_SUFFIX"),
        )
        .arg(
            Arg::new(ARG_REJECT_COUNTRY)
                .long(ARG_REJECT_COUNTRY)
                .help("Reject credentials submitted from these country codes")
                .env("SSOFLOW_REJECT_COUNTRIES")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_REJECT_IP)
                .long(ARG_REJECT_IP)
                .help("Reject credentials submitted from IP addresses matching this regex")
                .env("SSOFLOW_REJECT_IP"),
        )
        .arg(
            Arg::new(ARG_REJECT_USER_AGENT)
                .long(ARG_REJECT_USER_AGENT)
                .help("Reject credentials submitted by user agents matching this regex")
                .env("SSOFLOW_REJECT_USER_AGENT"),
        )
}
