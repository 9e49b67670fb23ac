//! SAML2 SSO login orchestration.
//!
//! Wraps the validation pipeline with observer notifications, just-in-time
//! provisioning and the login permission check.

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::claims::AssertionDecrypter;
use crate::clock::Clock;
use crate::config::{SsoConfig, SsoConfigJson};
use crate::decode::XmlAssertionDecoder;
use crate::error::{LoginError, UserStoreError};
use crate::pipeline::{ScreenedAssertion, ValidationOutcome, ValidationPipeline};
use crate::provisioning::{plan_provisioning, PlanKind, ProvisioningPlan};
use crate::sp_identifier::ServiceProviderIdCell;
use crate::trust::TrustAnchorResolver;
use crate::validation::SignatureValidator;

/// Authentication lifecycle hooks.
pub trait AuthenticationObserver: Send + Sync {
    /// A payload passed screening and login is starting for `tenant_domain`.
    fn started(&self, tenant_domain: &str);

    fn completed(&self, tenant_domain: &str, success: bool);
}

/// A user store of a tenant.
pub trait UserStore: Send + Sync {
    /// True for the tenant's primary store.
    fn is_primary(&self) -> bool;

    /// Every role the store knows.
    fn role_names(&self) -> Result<BTreeSet<String>, UserStoreError>;

    /// Roles of `username`, or `None` if the user does not exist.
    fn user_roles(&self, username: &str) -> Result<Option<BTreeSet<String>>, UserStoreError>;

    /// Create or update the user according to `plan`.
    fn apply_plan(&self, username: &str, plan: &ProvisioningPlan) -> Result<(), UserStoreError>;
}

/// Tenant user realms: stores, admin identity and permissions.
pub trait UserRealm: Send + Sync {
    fn primary_store(&self, tenant_domain: &str) -> Result<Arc<dyn UserStore>, UserStoreError>;

    /// Secondary store by user-store domain name, if one exists.
    fn secondary_store(
        &self,
        tenant_domain: &str,
        store_domain: &str,
    ) -> Result<Option<Arc<dyn UserStore>>, UserStoreError>;

    /// Username of the tenant's admin user.
    fn admin_username(&self, tenant_domain: &str) -> Result<String, UserStoreError>;

    fn is_authorized(
        &self,
        tenant_domain: &str,
        username: &str,
        permission: &str,
    ) -> Result<bool, UserStoreError>;
}

/// SAML2 SSO authenticator.
pub struct SsoAuthenticator {
    config: SsoConfig,
    pipeline: ValidationPipeline,
    realm: Arc<dyn UserRealm>,
    observers: Vec<Arc<dyn AuthenticationObserver>>,
    sp_id: Arc<ServiceProviderIdCell>,
}

impl SsoAuthenticator {
    /// Create an authenticator with the given configuration.
    pub fn new(
        config: SsoConfig,
        realm: Arc<dyn UserRealm>,
        resolver: Arc<dyn TrustAnchorResolver>,
        signature_validator: Arc<dyn SignatureValidator>,
    ) -> Result<Self> {
        config.validate().map_err(|e| anyhow!(e))?;

        let pipeline =
            ValidationPipeline::new(config.validation_config(), resolver, signature_validator)
                .with_decoder(Arc::new(XmlAssertionDecoder::new(config.max_payload_bytes)));

        Ok(Self {
            config,
            pipeline,
            realm,
            observers: Vec::new(),
            sp_id: Arc::new(ServiceProviderIdCell::new()),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn AuthenticationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_decrypter(mut self, decrypter: Arc<dyn AssertionDecrypter>) -> Self {
        self.pipeline = self.pipeline.with_decrypter(decrypter);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.pipeline = self.pipeline.with_clock(clock);
        self
    }

    /// Share a service-provider identifier cell with other components.
    pub fn with_sp_id_cell(mut self, cell: Arc<ServiceProviderIdCell>) -> Self {
        self.sp_id = cell;
        self
    }

    pub fn config(&self) -> &SsoConfig {
        &self.config
    }

    /// Merge a JSON overlay into the running configuration.
    ///
    /// The overlay is validated before anything changes. Trust anchors are
    /// owned by the resolver and are not reloaded here.
    pub fn reconfigure(&mut self, overlay: &SsoConfigJson) -> Result<()> {
        let mut config = self.config.clone();
        overlay.apply_to(&mut config);
        config.validate().map_err(|e| anyhow!(e))?;

        self.pipeline.reconfigure(config.validation_config());
        self.pipeline
            .set_decoder(Arc::new(XmlAssertionDecoder::new(config.max_payload_bytes)));
        if config.service_provider_id != self.config.service_provider_id {
            self.sp_id.reset();
        }
        self.config = config;

        info!("Reconfigured SAML2 SSO authenticator");
        Ok(())
    }

    fn service_provider_id(&self) -> String {
        self.sp_id
            .get_or_init(|| self.config.service_provider_id.clone())
            .unwrap_or_else(|| {
                warn!("Service provider identifier is not configured");
                String::new()
            })
    }

    /// Authenticate an encoded SAML payload.
    ///
    /// Returns the outcome with `authorized` set from the login permission.
    /// Observers are notified once the payload passed screening.
    pub fn login(&self, payload: &str) -> Result<ValidationOutcome, LoginError> {
        let sp_id = self.service_provider_id();
        let screened = self.pipeline.screen(payload, &sp_id)?;
        let tenant = screened.tenant_domain().to_string();

        for observer in &self.observers {
            observer.started(&tenant);
        }

        let result = self.complete_login(&screened);
        let success = matches!(&result, Ok(outcome) if outcome.authorized);

        for observer in &self.observers {
            observer.completed(&tenant, success);
        }

        if let Err(ref e) = result {
            warn!(
                user = %screened.username(),
                tenant = %tenant,
                error = %e,
                "SAML2 SSO login failed"
            );
        }

        result
    }

    fn complete_login(&self, screened: &ScreenedAssertion) -> Result<ValidationOutcome, LoginError> {
        let mut outcome = self.pipeline.verify(screened)?;

        if self.config.jit_user_provisioning_enabled {
            self.provision(&outcome)?;
        } else {
            debug!("User provisioning disabled");
        }

        outcome.authorized = self.realm.is_authorized(
            &outcome.tenant_domain,
            &outcome.username,
            &self.config.login_permission,
        )?;

        if outcome.authorized {
            info!(
                user = %outcome.username,
                tenant = %outcome.tenant_domain,
                "User logged in via SAML2 SSO"
            );
        } else {
            warn!(
                user = %outcome.username,
                tenant = %outcome.tenant_domain,
                permission = %self.config.login_permission,
                "Authentication request rejected: user lacks login permission"
            );
        }

        Ok(outcome)
    }

    fn user_store(&self, tenant: &str) -> Result<Arc<dyn UserStore>, UserStoreError> {
        if let Some(domain) = self
            .config
            .provisioning_default_userstore
            .as_deref()
            .filter(|d| !d.is_empty())
        {
            if let Some(store) = self.realm.secondary_store(tenant, domain)? {
                return Ok(store);
            }
            warn!(
                tenant = %tenant,
                userstore = %domain,
                "Provisioning user store not found, using primary store"
            );
        }

        self.realm.primary_store(tenant)
    }

    fn provision(&self, outcome: &ValidationOutcome) -> Result<ProvisioningPlan, UserStoreError> {
        let tenant = &outcome.tenant_domain;
        let store = self.user_store(tenant)?;

        let known_roles = store.role_names()?;
        let existing = store.user_roles(&outcome.username)?;
        let is_super_admin = existing.is_some()
            && store.is_primary()
            && self.realm.admin_username(tenant)? == outcome.username;

        let plan = plan_provisioning(
            outcome,
            existing.as_ref(),
            &known_roles,
            is_super_admin,
            &self.config.provisioning_config(),
        );

        store.apply_plan(&outcome.username, &plan)?;

        match plan.kind {
            PlanKind::Create => info!(
                user = %outcome.username,
                tenant = %tenant,
                roles = ?plan.roles_to_add,
                "User provisioned via SAML2 SSO"
            ),
            PlanKind::Update => info!(
                user = %outcome.username,
                tenant = %tenant,
                added = ?plan.roles_to_add,
                removed = ?plan.roles_to_delete,
                "User roles updated via SAML2 SSO"
            ),
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::{SignatureMismatch, TrustAnchorError, ValidationError};
    use crate::trust::{Credential, TrustAnchor};
    use crate::validation::SignedElement;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct NoAnchors;

    impl TrustAnchorResolver for NoAnchors {
        fn resolve(&self, _: &str) -> Result<TrustAnchor, TrustAnchorError> {
            Err(TrustAnchorError::UnknownTenant)
        }
    }

    struct AcceptAll;

    impl SignatureValidator for AcceptAll {
        fn validate(&self, _: &SignedElement<'_>, _: &Credential) -> Result<(), SignatureMismatch> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl AuthenticationObserver for Recorder {
        fn started(&self, tenant: &str) {
            self.events.lock().unwrap().push(format!("started:{}", tenant));
        }

        fn completed(&self, tenant: &str, success: bool) {
            self.events
                .lock()
                .unwrap()
                .push(format!("completed:{}:{}", tenant, success));
        }
    }

    struct MemoryStore {
        primary: bool,
        roles: BTreeSet<String>,
        users: Mutex<HashMap<String, BTreeSet<String>>>,
        plans: Mutex<Vec<ProvisioningPlan>>,
    }

    impl MemoryStore {
        fn new(primary: bool, roles: &[&str]) -> Self {
            Self {
                primary,
                roles: roles.iter().map(|r| r.to_string()).collect(),
                users: Mutex::new(HashMap::new()),
                plans: Mutex::new(Vec::new()),
            }
        }
    }

    impl UserStore for MemoryStore {
        fn is_primary(&self) -> bool {
            self.primary
        }

        fn role_names(&self) -> Result<BTreeSet<String>, UserStoreError> {
            Ok(self.roles.clone())
        }

        fn user_roles(&self, username: &str) -> Result<Option<BTreeSet<String>>, UserStoreError> {
            Ok(self.users.lock().unwrap().get(username).cloned())
        }

        fn apply_plan(&self, username: &str, plan: &ProvisioningPlan) -> Result<(), UserStoreError> {
            let mut users = self.users.lock().unwrap();
            let roles = users.entry(username.to_string()).or_default();
            roles.retain(|r| !plan.roles_to_delete.contains(r));
            roles.extend(plan.roles_to_add.iter().cloned());
            self.plans.lock().unwrap().push(plan.clone());
            Ok(())
        }
    }

    struct Realm {
        primary: Arc<MemoryStore>,
        secondary: Option<Arc<MemoryStore>>,
        permitted: bool,
    }

    impl UserRealm for Realm {
        fn primary_store(&self, _: &str) -> Result<Arc<dyn UserStore>, UserStoreError> {
            Ok(self.primary.clone())
        }

        fn secondary_store(
            &self,
            _: &str,
            domain: &str,
        ) -> Result<Option<Arc<dyn UserStore>>, UserStoreError> {
            if domain == "FAILING" {
                return Err(UserStoreError("store offline".to_string()));
            }
            Ok(self
                .secondary
                .clone()
                .map(|s| s as Arc<dyn UserStore>))
        }

        fn admin_username(&self, _: &str) -> Result<String, UserStoreError> {
            Ok("admin".to_string())
        }

        fn is_authorized(&self, _: &str, _: &str, permission: &str) -> Result<bool, UserStoreError> {
            assert_eq!(permission, "/permission/admin/login");
            Ok(self.permitted)
        }
    }

    fn realm(permitted: bool) -> Arc<Realm> {
        Arc::new(Realm {
            primary: Arc::new(MemoryStore::new(true, &["admin", "dev", "ops"])),
            secondary: None,
            permitted,
        })
    }

    fn test_config() -> SsoConfig {
        SsoConfig {
            service_provider_id: Some("sp".to_string()),
            response_signature_validation_enabled: false,
            assertion_signature_validation_enabled: false,
            ..Default::default()
        }
    }

    fn authenticator(config: SsoConfig, realm: Arc<Realm>) -> SsoAuthenticator {
        SsoAuthenticator::new(config, realm, Arc::new(NoAnchors), Arc::new(AcceptAll))
            .unwrap()
            .with_clock(Arc::new(FixedClock(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap(),
            )))
    }

    fn payload(subject: &str, audience: &str, roles: &str) -> String {
        BASE64.encode(format!(
            r#"<Assertion ID="_a"><Subject><NameID>{subject}</NameID></Subject><Conditions NotBefore="2024-01-01T00:00:00Z" NotOnOrAfter="2024-01-01T00:05:00Z"><AudienceRestriction><Audience>{audience}</Audience></AudienceRestriction></Conditions><AttributeStatement><Attribute Name="http://wso2.org/claims/role"><AttributeValue>{roles}</AttributeValue></Attribute></AttributeStatement></Assertion>"#
        ))
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = SsoConfig {
            attribute_value_separator: String::new(),
            ..test_config()
        };
        assert!(
            SsoAuthenticator::new(config, realm(true), Arc::new(NoAnchors), Arc::new(AcceptAll))
                .is_err()
        );
    }

    #[test]
    fn test_login_notifies_observers() {
        let recorder = Arc::new(Recorder::default());
        let auth = authenticator(test_config(), realm(true)).with_observer(recorder.clone());

        let outcome = auth.login(&payload("bob@acme.com", "sp", "dev")).unwrap();
        assert!(outcome.authorized);
        assert_eq!(outcome.username, "bob");
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["started:acme.com", "completed:acme.com:true"]
        );
    }

    #[test]
    fn test_screening_failure_skips_observers() {
        let recorder = Arc::new(Recorder::default());
        let auth = authenticator(test_config(), realm(true)).with_observer(recorder.clone());

        let err = auth.login(&payload("bob", "other-sp", "dev")).unwrap_err();
        assert!(matches!(
            err,
            LoginError::Validation(ValidationError::AudienceMismatch)
        ));
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_signature_failure_completes_unsuccessfully() {
        let recorder = Arc::new(Recorder::default());
        let config = SsoConfig {
            assertion_signature_validation_enabled: true,
            ..test_config()
        };
        let auth = authenticator(config, realm(true)).with_observer(recorder.clone());

        let err = auth.login(&payload("bob", "sp", "dev")).unwrap_err();
        assert!(matches!(err, LoginError::Validation(ValidationError::MissingSignature(_))));
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["started:carbon.super", "completed:carbon.super:false"]
        );
    }

    #[test]
    fn test_unauthorized_user() {
        let recorder = Arc::new(Recorder::default());
        let auth = authenticator(test_config(), realm(false)).with_observer(recorder.clone());

        let outcome = auth.login(&payload("bob", "sp", "dev")).unwrap();
        assert!(!outcome.authorized);
        assert_eq!(
            recorder.events.lock().unwrap().last().map(String::as_str),
            Some("completed:carbon.super:false")
        );
    }

    #[test]
    fn test_jit_provisioning_creates_then_updates() {
        let realm = realm(true);
        let config = SsoConfig {
            jit_user_provisioning_enabled: true,
            ..test_config()
        };
        let auth = authenticator(config, realm.clone());

        auth.login(&payload("carol", "sp", "dev,unknown")).unwrap();
        auth.login(&payload("carol", "sp", "ops")).unwrap();

        let plans = realm.primary.plans.lock().unwrap();
        assert_eq!(plans[0].kind, PlanKind::Create);
        assert_eq!(plans[1].kind, PlanKind::Update);

        let users = realm.primary.users.lock().unwrap();
        assert_eq!(
            users.get("carol").unwrap().iter().collect::<Vec<_>>(),
            vec!["ops"]
        );
    }

    #[test]
    fn test_super_admin_keeps_admin_role() {
        let realm = realm(true);
        realm
            .primary
            .users
            .lock()
            .unwrap()
            .insert("admin".to_string(), ["admin".to_string()].into());

        let config = SsoConfig {
            jit_user_provisioning_enabled: true,
            ..test_config()
        };
        authenticator(config, realm.clone())
            .login(&payload("admin", "sp", "dev"))
            .unwrap();

        let users = realm.primary.users.lock().unwrap();
        assert!(users.get("admin").unwrap().contains("admin"));
        assert!(users.get("admin").unwrap().contains("dev"));
    }

    #[test]
    fn test_secondary_store_used_when_configured() {
        let secondary = Arc::new(MemoryStore::new(false, &["dev"]));
        let realm = Arc::new(Realm {
            primary: Arc::new(MemoryStore::new(true, &["dev"])),
            secondary: Some(secondary.clone()),
            permitted: true,
        });
        let config = SsoConfig {
            jit_user_provisioning_enabled: true,
            provisioning_default_userstore: Some("SECONDARY".to_string()),
            ..test_config()
        };

        authenticator(config, realm.clone())
            .login(&payload("dave", "sp", "dev"))
            .unwrap();

        assert_eq!(secondary.plans.lock().unwrap().len(), 1);
        assert!(realm.primary.plans.lock().unwrap().is_empty());
    }

    #[test]
    fn test_user_store_failure() {
        let recorder = Arc::new(Recorder::default());
        let config = SsoConfig {
            jit_user_provisioning_enabled: true,
            provisioning_default_userstore: Some("FAILING".to_string()),
            ..test_config()
        };
        let auth = authenticator(config, realm(true)).with_observer(recorder.clone());

        let err = auth.login(&payload("erin", "sp", "dev")).unwrap_err();
        assert!(matches!(err, LoginError::UserStore(_)));
        assert_eq!(
            recorder.events.lock().unwrap().last().map(String::as_str),
            Some("completed:carbon.super:false")
        );
    }

    #[test]
    fn test_payload_size_limit_applies_to_login() {
        let config = SsoConfig {
            max_payload_bytes: 64,
            ..test_config()
        };
        let auth = authenticator(config, realm(true));

        let err = auth.login(&payload("bob", "sp", "dev")).unwrap_err();
        assert!(matches!(
            err,
            LoginError::Validation(ValidationError::Decode(_))
        ));
    }

    #[test]
    fn test_reconfigure_applies_overlay() {
        let mut auth = authenticator(test_config(), realm(true));
        assert!(auth.login(&payload("bob", "sp", "dev")).is_ok());

        let overlay: SsoConfigJson = serde_json::from_str(
            r#"{"service-provider-id": "new-sp", "attribute-value-separator": "|"}"#,
        )
        .unwrap();
        auth.reconfigure(&overlay).unwrap();

        assert_eq!(auth.config().attribute_value_separator, "|");
        let outcome = auth.login(&payload("bob", "new-sp", "dev|ops")).unwrap();
        assert_eq!(outcome.roles.len(), 2);
        assert!(auth.login(&payload("bob", "sp", "dev")).is_err());

        let overlay = SsoConfigJson {
            max_payload_bytes: Some(64),
            ..Default::default()
        };
        auth.reconfigure(&overlay).unwrap();
        assert!(matches!(
            auth.login(&payload("bob", "new-sp", "dev")),
            Err(LoginError::Validation(ValidationError::Decode(_)))
        ));
    }

    #[test]
    fn test_reconfigure_rejects_invalid_overlay() {
        let mut auth = authenticator(test_config(), realm(true));
        let overlay = SsoConfigJson {
            attribute_value_separator: Some(String::new()),
            ..Default::default()
        };

        assert!(auth.reconfigure(&overlay).is_err());
        assert_eq!(auth.config().attribute_value_separator, ",");
        assert!(auth.login(&payload("bob", "sp", "dev,ops")).is_ok());
    }

    #[test]
    fn test_shared_sp_id_cell() {
        let cell = Arc::new(ServiceProviderIdCell::new());
        cell.get_or_init(|| Some("shared-sp".to_string()));

        let auth = authenticator(test_config(), realm(true)).with_sp_id_cell(cell);
        assert!(auth.login(&payload("bob", "shared-sp", "dev")).is_ok());
        assert!(auth.login(&payload("bob", "sp", "dev")).is_err());
    }
}
