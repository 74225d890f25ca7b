use super::*;
use crate::authentication::{Credential, HandlerResult, Principal, ATTR_REMEMBER_ME};
use crate::clock::ManualClock;
use crate::registry::{InMemoryTicketRegistry, RegistryError};
use std::sync::Mutex;
use crate::service::RegisteredService;
use crate::ticket::ExpirationPolicy;
use crate::transport::{InMemoryCookieJar, TransportError};
use chrono::{Duration, TimeZone};
use serde_json::Value;

const APP: &str = "https://app.example.com/";
const NO_SSO: &str = "https://nosso.example.com/";
const PROXY: &str = "https://proxy.example.com/";
const BACKEND: &str = "https://backend.example.com/";

struct Harness {
    registry: Arc<InMemoryTicketRegistry>,
    clock: Arc<ManualClock>,
    manager: TicketLifecycleManager,
}

fn services() -> ServiceRegistry {
    ServiceRegistry::new(vec![
        RegisteredService::new(1, "app", r"https://app\.example\.com/.*").expect("pattern"),
        RegisteredService::new(2, "nosso", r"https://nosso\.example\.com/.*")
            .expect("pattern")
            .with_sso_enabled(false),
        RegisteredService::new(3, "proxy", r"https://proxy\.example\.com/.*")
            .expect("pattern")
            .with_proxy_allowed(true),
        RegisteredService::new(4, "backend", r"https://backend\.example\.com/.*")
            .expect("pattern"),
    ])
}

fn harness_with(policy: &Policy) -> Harness {
    let registry = Arc::new(InMemoryTicketRegistry::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ));
    let manager = TicketLifecycleManager::new(
        registry.clone(),
        Arc::new(services()),
        policy,
        clock.clone(),
    );
    Harness {
        registry,
        clock,
        manager,
    }
}

fn harness() -> Harness {
    harness_with(&Policy::new())
}

fn authentication(user: &str, handlers: &[&str]) -> Authentication {
    let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut authentication = Authentication::new(Principal::new(user), date);
    authentication.credentials.push(Credential::new(user, "password"));
    for handler in handlers {
        authentication.successes.insert(
            (*handler).to_string(),
            HandlerResult {
                handler_name: (*handler).to_string(),
                credential_id: user.to_string(),
                warnings: Vec::new(),
            },
        );
    }
    authentication
}

fn stored(h: &Harness, id: &str) -> Option<Ticket> {
    h.registry.get(id).expect("registry available")
}

#[test]
fn reconcile_without_session_issues_fresh() {
    let h = harness();
    let blank = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), Some("  "))
        .expect("issued");
    let absent = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let unknown = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), Some("TGT-99-unknown"))
        .expect("issued");

    assert!(blank.id().starts_with("TGT-"));
    assert_ne!(blank.id(), absent.id());
    assert_ne!(unknown.id(), "TGT-99-unknown");
    assert_eq!(h.registry.count(TicketKind::TicketGranting).expect("count"), 3);
}

#[test]
fn reconcile_equal_authentication_updates_in_place() {
    let h = harness();
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");

    for minutes in 1..=3 {
        h.clock.advance(Duration::minutes(minutes));
        let mut again = authentication("casuser", &["Ldap"]);
        again.authentication_date = h.clock.now();
        let updated = h
            .manager
            .reconcile(again, Some(session.id()))
            .expect("updated");
        assert_eq!(updated.id(), session.id());
        assert_eq!(updated.authentication.authentication_date, h.clock.now());
    }
    assert_eq!(h.registry.count(TicketKind::TicketGranting).expect("count"), 1);
}

#[test]
fn reconcile_divergent_authentication_reissues_and_retains_previous() {
    let h = harness();
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let replaced = h
        .manager
        .reconcile(authentication("casuser", &["Ldap", "Otp"]), Some(session.id()))
        .expect("reissued");

    assert_ne!(replaced.id(), session.id());
    assert!(stored(&h, session.id()).is_some(), "previous session retained");
}

#[test]
fn reconcile_divergent_authentication_can_destroy_previous() {
    let h = harness_with(&Policy::new().with_divergence(DivergencePolicy::DestroyPrevious));
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let replaced = h
        .manager
        .reconcile(authentication("other", &["Ldap"]), Some(session.id()))
        .expect("reissued");

    assert_ne!(replaced.id(), session.id());
    assert!(stored(&h, session.id()).is_none(), "previous session destroyed");
    assert!(stored(&h, replaced.id()).is_some());
}

#[test]
fn reconcile_expired_session_is_removed_and_reissued() {
    let policy = Policy::new().with_tickets(
        TicketPolicy::new().with_ticket_granting(ExpirationPolicy::HardTimeout { ttl_seconds: 60 }),
    );
    let h = harness_with(&policy);
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    h.clock.advance(Duration::seconds(61));

    let fresh = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), Some(session.id()))
        .expect("reissued");
    assert_ne!(fresh.id(), session.id());
    assert!(stored(&h, session.id()).is_none());
}

#[test]
fn reconcile_with_service_ticket_id_as_cookie_issues_without_deleting() {
    let h = harness();
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let st = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(APP), None)
        .expect("st");

    let fresh = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), Some(st.id()))
        .expect("issued");
    assert_ne!(fresh.id(), session.id());
    assert!(stored(&h, st.id()).is_some());
}

#[test]
fn remember_me_selects_long_term_policy() {
    let h = harness();
    let mut remembered = authentication("casuser", &["Ldap"]);
    remembered
        .attributes
        .insert(ATTR_REMEMBER_ME.to_string(), Value::Bool(true));
    let tgt = h.manager.reconcile(remembered, None).expect("issued");
    assert_eq!(
        tgt.state.expiration_policy,
        ExpirationPolicy::default_remember_me()
    );

    let plain = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    assert_eq!(
        plain.state.expiration_policy,
        ExpirationPolicy::default_ticket_granting_ticket()
    );
}

#[test]
fn service_ticket_is_recorded_on_session() {
    let h = harness();
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let st = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(APP), None)
        .expect("st");

    assert!(st.id().starts_with("ST-"));
    assert!(!st.from_new_login);
    let tgt = h
        .manager
        .ticket_granting_ticket(session.id())
        .expect("read")
        .expect("live");
    assert!(tgt.services.contains_key(APP));
    assert!(tgt.descendant_tickets.contains(st.id()));
    assert_eq!(tgt.state.count_of_uses, 1);
}

#[test]
fn service_ticket_from_fresh_credentials_is_new_login() {
    let h = harness();
    let authn = authentication("casuser", &["Ldap"]);
    let session = h.manager.reconcile(authn.clone(), None).expect("issued");
    let st = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(APP), Some(&authn))
        .expect("st");
    assert!(st.from_new_login);
}

#[test]
fn service_ticket_rejects_other_principal() {
    let h = harness();
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let other = authentication("mallory", &["Ldap"]);
    let err = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(APP), Some(&other))
        .expect_err("mixed principal");
    assert_eq!(err.authn_failure(), Some(AuthnFailure::MixedPrincipal));
}

#[test]
fn service_ticket_requires_live_session_and_registered_service() {
    let h = harness();
    let err = h
        .manager
        .issue_service_ticket("TGT-1-missing", &Service::new(APP), None)
        .expect_err("no session");
    assert!(matches!(
        err,
        FlowError::InvalidTicket {
            detail: InvalidTicketDetail::NotFound,
            ..
        }
    ));

    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let err = h
        .manager
        .issue_service_ticket(session.id(), &Service::new("https://unknown.example.com/"), None)
        .expect_err("unknown service");
    assert!(matches!(
        err,
        FlowError::UnauthorizedService {
            reason: UnauthorizedReason::NotRegistered,
            ..
        }
    ));

    let err = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(NO_SSO), None)
        .expect_err("sso denied");
    assert!(matches!(
        err,
        FlowError::UnauthorizedService {
            reason: UnauthorizedReason::SsoDenied,
            ..
        }
    ));
}

#[test]
fn service_ticket_validates_once() {
    let h = harness();
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let service = Service::new(APP);
    let st = h
        .manager
        .issue_service_ticket(session.id(), &service, None)
        .expect("st");

    let assertion = h
        .manager
        .validate_service_ticket(st.id(), &service)
        .expect("first validation");
    assert_eq!(assertion.principal.id, "casuser");
    assert_eq!(assertion.granting_ticket, session.id());
    assert!(!assertion.proxied);

    let err = h
        .manager
        .validate_service_ticket(st.id(), &service)
        .expect_err("second validation");
    assert!(matches!(err, FlowError::InvalidTicket { .. }));
}

#[test]
fn failed_validation_still_consumes_the_ticket() {
    let h = harness();
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let service = Service::new(APP);
    let st = h
        .manager
        .issue_service_ticket(session.id(), &service, None)
        .expect("st");

    let err = h
        .manager
        .validate_service_ticket(st.id(), &Service::new(BACKEND))
        .expect_err("mismatch");
    assert!(matches!(
        err,
        FlowError::InvalidTicket {
            detail: InvalidTicketDetail::ServiceMismatch,
            ..
        }
    ));
    assert!(h.manager.validate_service_ticket(st.id(), &service).is_err());
}

#[test]
fn expired_service_ticket_is_rejected_and_removed() {
    let h = harness();
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let service = Service::new(APP);
    let st = h
        .manager
        .issue_service_ticket(session.id(), &service, None)
        .expect("st");
    h.clock.advance(Duration::seconds(11));

    let err = h
        .manager
        .validate_service_ticket(st.id(), &service)
        .expect_err("expired");
    assert!(matches!(
        err,
        FlowError::InvalidTicket {
            detail: InvalidTicketDetail::Expired,
            ..
        }
    ));
    assert!(stored(&h, st.id()).is_none());
}

#[test]
fn logout_cascades_to_descendants_and_proxies() {
    let h = harness();
    let authn = authentication("casuser", &["Ldap"]);
    let session = h.manager.reconcile(authn.clone(), None).expect("issued");
    let app = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(APP), None)
        .expect("st");
    let proxy_st = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(PROXY), None)
        .expect("st");
    let pgt = h
        .manager
        .create_proxy_granting_ticket(proxy_st.id(), authn)
        .expect("pgt");
    let pt = h
        .manager
        .grant_proxy_ticket(pgt.id(), &Service::new(BACKEND))
        .expect("pt");

    let mut services: Vec<String> = h
        .manager
        .destroy_ticket_granting_ticket(session.id())
        .expect("logout")
        .into_iter()
        .map(String::from)
        .collect();
    services.sort();
    assert_eq!(services, vec![APP.to_string(), PROXY.to_string()]);

    for id in [session.id(), app.id(), proxy_st.id(), pgt.id(), pt.id()] {
        assert!(stored(&h, id).is_none(), "{id} survived logout");
    }
    assert!(h
        .manager
        .destroy_ticket_granting_ticket(session.id())
        .expect("idempotent")
        .is_empty());
}

#[test]
fn proxy_ticket_validates_through_proxy_granting_ticket() {
    let h = harness();
    let authn = authentication("casuser", &["Ldap"]);
    let session = h.manager.reconcile(authn.clone(), None).expect("issued");
    let proxy_st = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(PROXY), None)
        .expect("st");
    let pgt = h
        .manager
        .create_proxy_granting_ticket(proxy_st.id(), authn)
        .expect("pgt");
    assert_eq!(pgt.kind(), TicketKind::ProxyGranting);
    assert_eq!(pgt.parent.as_deref(), Some(session.id()));

    let backend = Service::new(BACKEND);
    let pt = h
        .manager
        .grant_proxy_ticket(pgt.id(), &backend)
        .expect("pt");
    assert!(pt.id().starts_with("PT-"));

    let err = h
        .manager
        .validate_service_ticket(pt.id(), &backend)
        .expect_err("service validation refuses proxy tickets");
    assert!(matches!(
        err,
        FlowError::InvalidTicket {
            detail: InvalidTicketDetail::WrongKind,
            ..
        }
    ));

    let assertion = h
        .manager
        .validate_proxy_ticket(pt.id(), &backend)
        .expect("proxy validation");
    assert!(assertion.proxied);
    assert_eq!(assertion.proxied_by, Some(Service::new(PROXY)));
    assert_eq!(assertion.principal.id, "casuser");
}

#[test]
fn proxying_requires_permission() {
    let h = harness();
    let authn = authentication("casuser", &["Ldap"]);
    let session = h.manager.reconcile(authn.clone(), None).expect("issued");
    let st = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(APP), None)
        .expect("st");
    let err = h
        .manager
        .create_proxy_granting_ticket(st.id(), authn)
        .expect_err("proxy denied");
    assert!(matches!(
        err,
        FlowError::UnauthorizedService {
            reason: UnauthorizedReason::ProxyingDenied,
            ..
        }
    ));
}

#[test]
fn proxy_granting_ticket_expires_with_parent() {
    let policy = Policy::new().with_tickets(
        TicketPolicy::new()
            .with_ticket_granting(ExpirationPolicy::HardTimeout { ttl_seconds: 60 })
            .with_proxy_granting(ExpirationPolicy::NeverExpires),
    );
    let h = harness_with(&policy);
    let authn = authentication("casuser", &["Ldap"]);
    let session = h.manager.reconcile(authn.clone(), None).expect("issued");
    let st = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(PROXY), None)
        .expect("st");
    let pgt = h
        .manager
        .create_proxy_granting_ticket(st.id(), authn)
        .expect("pgt");
    h.clock.advance(Duration::seconds(61));

    let err = h
        .manager
        .grant_proxy_ticket(pgt.id(), &Service::new(BACKEND))
        .expect_err("parent expired");
    assert!(matches!(
        err,
        FlowError::InvalidTicket {
            detail: InvalidTicketDetail::Expired,
            ..
        }
    ));
}

struct FailingBinder;

impl SessionCookieBinder for FailingBinder {
    fn bind(&self, _session_id: &str, _options: CookieOptions) -> Result<(), TransportError> {
        Err(TransportError::BindFailed("response already committed".to_string()))
    }

    fn clear(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[test]
fn session_cookie_replaces_old_session_after_binding() {
    let h = harness();
    let old = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let new = h
        .manager
        .reconcile(authentication("other", &["Ldap"]), None)
        .expect("issued");
    let jar = InMemoryCookieJar::new();

    h.manager
        .send_session_cookie(new.id(), Some(old.id()), &jar, CookieOptions::default())
        .expect("bound");
    assert_eq!(jar.session_id().as_deref(), Some(new.id()));
    assert!(stored(&h, old.id()).is_none());
    assert!(stored(&h, new.id()).is_some());
}

#[test]
fn failed_binding_keeps_old_session() {
    let h = harness();
    let old = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let new = h
        .manager
        .reconcile(authentication("other", &["Ldap"]), None)
        .expect("issued");

    let err = h
        .manager
        .send_session_cookie(new.id(), Some(old.id()), &FailingBinder, CookieOptions::default())
        .expect_err("binding failed");
    assert!(matches!(err, FlowError::Prevented(_)));
    assert!(stored(&h, old.id()).is_some());
}

#[test]
fn same_cookie_id_is_not_destroyed() {
    let h = harness();
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let jar = InMemoryCookieJar::new();
    h.manager
        .send_session_cookie(session.id(), Some(session.id()), &jar, CookieOptions::default())
        .expect("bound");
    assert!(stored(&h, session.id()).is_some());
}

#[test]
fn cookie_carrying_proxy_granting_ticket_destroys_nothing() {
    let h = harness();
    let authn = authentication("casuser", &["Ldap"]);
    let session = h.manager.reconcile(authn.clone(), None).expect("issued");
    let proxy_st = h
        .manager
        .issue_service_ticket(session.id(), &Service::new(PROXY), None)
        .expect("st");
    let pgt = h
        .manager
        .create_proxy_granting_ticket(proxy_st.id(), authn)
        .expect("pgt");

    let intruder = h
        .manager
        .reconcile(authentication("mallory", &["Ldap"]), None)
        .expect("issued");
    let jar = InMemoryCookieJar::new();
    h.manager
        .send_session_cookie(intruder.id(), Some(pgt.id()), &jar, CookieOptions::default())
        .expect("bound");

    assert!(stored(&h, pgt.id()).is_some());
    assert!(stored(&h, session.id()).is_some());
    assert!(h
        .manager
        .destroy_ticket_granting_ticket(pgt.id())
        .expect("read")
        .is_empty());
    assert!(stored(&h, pgt.id()).is_some());
}

/// Registry whose conditional writes always lose against a concurrent delete.
struct VanishingRegistry {
    inner: InMemoryTicketRegistry,
}

impl TicketRegistry for VanishingRegistry {
    fn get(&self, id: &str) -> Result<Option<Ticket>, RegistryError> {
        self.inner.get(id)
    }

    fn add_or_update(&self, ticket: Ticket) -> Result<(), RegistryError> {
        self.inner.add_or_update(ticket)
    }

    fn update_if_present(&self, ticket: Ticket) -> Result<bool, RegistryError> {
        self.inner.delete(ticket.id())?;
        self.inner.update_if_present(ticket)
    }

    fn update_if_unchanged(&self, ticket: Ticket) -> Result<UpdateOutcome, RegistryError> {
        self.inner.delete(ticket.id())?;
        self.inner.update_if_unchanged(ticket)
    }

    fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        self.inner.delete(id)
    }

    fn count(&self, kind: TicketKind) -> Result<usize, RegistryError> {
        self.inner.count(kind)
    }
}

#[test]
fn concurrently_destroyed_session_is_reissued_on_update() {
    let registry = Arc::new(VanishingRegistry {
        inner: InMemoryTicketRegistry::new(),
    });
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ));
    let manager =
        TicketLifecycleManager::new(registry.clone(), Arc::new(services()), &Policy::new(), clock);

    let session = manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let fresh = manager
        .reconcile(authentication("casuser", &["Ldap"]), Some(session.id()))
        .expect("reissued instead of failing");
    assert_ne!(fresh.id(), session.id());
    assert!(registry.get(fresh.id()).expect("read").is_some());
}

#[test]
fn unbounded_session_lifetime_never_expires() {
    let h = harness_with(&Policy::new().with_tickets(
        TicketPolicy::new().with_ticket_granting(ExpirationPolicy::HardTimeout {
            ttl_seconds: i64::MAX,
        }),
    ));
    let session = h
        .manager
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    h.clock.advance(Duration::days(365 * 100));
    assert!(h
        .manager
        .ticket_granting_ticket(session.id())
        .expect("read")
        .is_some());
}

type Interleaved = Box<dyn FnOnce() + Send>;

/// Registry that runs another request right before the first versioned
/// write-back, i.e. between that write's read and its write.
struct InterleavingRegistry {
    inner: Arc<InMemoryTicketRegistry>,
    before_write: Mutex<Option<Interleaved>>,
}

impl InterleavingRegistry {
    fn new(inner: Arc<InMemoryTicketRegistry>) -> Self {
        Self {
            inner,
            before_write: Mutex::new(None),
        }
    }

    fn interleave(&self, request: impl FnOnce() + Send + 'static) {
        *self.before_write.lock().expect("lock") = Some(Box::new(request));
    }
}

impl TicketRegistry for InterleavingRegistry {
    fn get(&self, id: &str) -> Result<Option<Ticket>, RegistryError> {
        self.inner.get(id)
    }

    fn add_or_update(&self, ticket: Ticket) -> Result<(), RegistryError> {
        self.inner.add_or_update(ticket)
    }

    fn update_if_present(&self, ticket: Ticket) -> Result<bool, RegistryError> {
        self.inner.update_if_present(ticket)
    }

    fn update_if_unchanged(&self, ticket: Ticket) -> Result<UpdateOutcome, RegistryError> {
        let request = self.before_write.lock().expect("lock").take();
        if let Some(request) = request {
            request();
        }
        self.inner.update_if_unchanged(ticket)
    }

    fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        self.inner.delete(id)
    }

    fn count(&self, kind: TicketKind) -> Result<usize, RegistryError> {
        self.inner.count(kind)
    }
}

/// Two managers over one store: `racing` writes through the interleaving
/// registry, `other` writes directly.
fn interleaved_managers() -> (
    Arc<InMemoryTicketRegistry>,
    Arc<InterleavingRegistry>,
    TicketLifecycleManager,
    Arc<TicketLifecycleManager>,
) {
    let inner = Arc::new(InMemoryTicketRegistry::new());
    let interleaving = Arc::new(InterleavingRegistry::new(inner.clone()));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ));
    let racing = TicketLifecycleManager::new(
        interleaving.clone(),
        Arc::new(services()),
        &Policy::new(),
        clock.clone(),
    );
    let other = Arc::new(TicketLifecycleManager::new(
        inner.clone(),
        Arc::new(services()),
        &Policy::new(),
        clock,
    ));
    (inner, interleaving, racing, other)
}

#[test]
fn in_place_update_keeps_service_ticket_issued_meanwhile() {
    let (inner, interleaving, racing, other) = interleaved_managers();
    let session = other
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let session_id = session.id().to_string();

    let issued = Arc::new(Mutex::new(None));
    {
        let other = other.clone();
        let issued = issued.clone();
        let session_id = session_id.clone();
        interleaving.interleave(move || {
            let st = other
                .issue_service_ticket(&session_id, &Service::new(APP), None)
                .expect("st issued in the other tab");
            *issued.lock().expect("lock") = Some(st.id().to_string());
        });
    }

    let updated = racing
        .reconcile(authentication("casuser", &["Ldap"]), Some(&session_id))
        .expect("updated");
    assert_eq!(updated.id(), session_id);

    let st_id = issued.lock().expect("lock").clone().expect("interleaved request ran");
    let tgt = inner
        .get(&session_id)
        .expect("read")
        .and_then(Ticket::into_ticket_granting)
        .expect("session");
    assert!(tgt.services.contains_key(APP));
    assert!(tgt.descendant_tickets.contains(&st_id));

    racing
        .destroy_ticket_granting_ticket(&session_id)
        .expect("logout");
    assert!(inner.get(&st_id).expect("read").is_none());
}

#[test]
fn concurrent_service_tickets_are_both_recorded() {
    let (inner, interleaving, racing, other) = interleaved_managers();
    let session = other
        .reconcile(authentication("casuser", &["Ldap"]), None)
        .expect("issued");
    let session_id = session.id().to_string();

    let issued = Arc::new(Mutex::new(None));
    {
        let other = other.clone();
        let issued = issued.clone();
        let session_id = session_id.clone();
        interleaving.interleave(move || {
            let st = other
                .issue_service_ticket(&session_id, &Service::new(BACKEND), None)
                .expect("st issued in the other tab");
            *issued.lock().expect("lock") = Some(st.id().to_string());
        });
    }

    let st = racing
        .issue_service_ticket(&session_id, &Service::new(APP), None)
        .expect("st");
    let other_st = issued.lock().expect("lock").clone().expect("interleaved request ran");

    let tgt = inner
        .get(&session_id)
        .expect("read")
        .and_then(Ticket::into_ticket_granting)
        .expect("session");
    assert!(tgt.services.contains_key(APP));
    assert!(tgt.services.contains_key(BACKEND));
    assert!(tgt.descendant_tickets.contains(st.id()));
    assert!(tgt.descendant_tickets.contains(&other_st));
    assert_eq!(tgt.state.count_of_uses, 2);
}

struct UnavailableRegistry;

impl TicketRegistry for UnavailableRegistry {
    fn get(&self, _id: &str) -> Result<Option<Ticket>, RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    fn add_or_update(&self, _ticket: Ticket) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    fn update_if_present(&self, _ticket: Ticket) -> Result<bool, RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    fn update_if_unchanged(&self, _ticket: Ticket) -> Result<UpdateOutcome, RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    fn delete(&self, _id: &str) -> Result<bool, RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    fn count(&self, _kind: TicketKind) -> Result<usize, RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }
}

#[test]
fn registry_failure_is_unavailable_for_existing_session() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ));
    let manager = TicketLifecycleManager::new(
        Arc::new(UnavailableRegistry),
        Arc::new(services()),
        &Policy::new(),
        clock,
    );
    let err = manager
        .reconcile(authentication("casuser", &["Ldap"]), Some("TGT-1-existing"))
        .expect_err("registry down");
    assert_eq!(err, FlowError::unavailable("TGT-1-existing"));
    assert!(err.requires_alert());
}
