//! SAML2 SSO authenticator configuration.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::decode::DEFAULT_MAX_PAYLOAD_BYTES;
use crate::tenant::SUPER_TENANT_DOMAIN;

/// Default attribute carrying role claims.
pub const DEFAULT_ROLE_CLAIM_ATTRIBUTE: &str = "http://wso2.org/claims/role";

/// Default separator for roles packed into a single attribute value.
pub const DEFAULT_ATTRIBUTE_VALUE_SEPARATOR: &str = ",";

/// Authenticator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SsoConfig {
    /// Identifier this service provider expects in audience restrictions.
    #[serde(default)]
    pub service_provider_id: Option<String>,

    /// Require and verify the Response signature.
    #[serde(default = "default_true")]
    pub response_signature_validation_enabled: bool,

    /// Require and verify the Assertion signature.
    #[serde(default = "default_true")]
    pub assertion_signature_validation_enabled: bool,

    /// Verify signatures with the subject's tenant trust anchor instead of
    /// the super tenant's.
    #[serde(default)]
    pub validate_signature_with_user_domain: bool,

    /// Clock skew tolerance in seconds.
    #[serde(default = "default_time_stamp_skew")]
    pub time_stamp_skew_secs: u64,

    /// Attribute name holding role claims (case-sensitive).
    #[serde(default = "default_role_claim_attribute")]
    pub role_claim_attribute: String,

    /// Separator for several roles packed into one attribute value.
    #[serde(default = "default_attribute_value_separator")]
    pub attribute_value_separator: String,

    /// Create and update local accounts from assertions.
    #[serde(default)]
    pub jit_user_provisioning_enabled: bool,

    /// Secondary user store for provisioned users (primary if unset).
    #[serde(default)]
    pub provisioning_default_userstore: Option<String>,

    /// Role assigned when the assertion declares none.
    #[serde(default)]
    pub provisioning_default_role: Option<String>,

    /// Refuse to keep the admin role on the super admin when the assertion
    /// omits it.
    #[serde(default)]
    pub super_admin_role_required: bool,

    #[serde(default = "default_super_tenant_domain")]
    pub super_tenant_domain: String,

    /// Role every user holds; never removed by provisioning.
    #[serde(default = "default_everyone_role")]
    pub everyone_role: String,

    #[serde(default = "default_admin_role")]
    pub admin_role: String,

    /// Permission a user needs to log in.
    #[serde(default = "default_login_permission")]
    pub login_permission: String,

    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Tenant domain -> IdP signing certificate (PEM).
    #[serde(default)]
    pub idp_certificates: HashMap<String, String>,

    /// Tenant domain -> path of an IdP signing certificate (PEM).
    #[serde(default)]
    pub idp_certificate_files: HashMap<String, PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_time_stamp_skew() -> u64 {
    300 // 5 minutes
}

fn default_role_claim_attribute() -> String {
    DEFAULT_ROLE_CLAIM_ATTRIBUTE.to_string()
}

fn default_attribute_value_separator() -> String {
    DEFAULT_ATTRIBUTE_VALUE_SEPARATOR.to_string()
}

fn default_super_tenant_domain() -> String {
    SUPER_TENANT_DOMAIN.to_string()
}

fn default_everyone_role() -> String {
    "Internal/everyone".to_string()
}

fn default_admin_role() -> String {
    "admin".to_string()
}

fn default_login_permission() -> String {
    "/permission/admin/login".to_string()
}

fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            service_provider_id: None,
            response_signature_validation_enabled: true,
            assertion_signature_validation_enabled: true,
            validate_signature_with_user_domain: false,
            time_stamp_skew_secs: default_time_stamp_skew(),
            role_claim_attribute: default_role_claim_attribute(),
            attribute_value_separator: default_attribute_value_separator(),
            jit_user_provisioning_enabled: false,
            provisioning_default_userstore: None,
            provisioning_default_role: None,
            super_admin_role_required: false,
            super_tenant_domain: default_super_tenant_domain(),
            everyone_role: default_everyone_role(),
            admin_role: default_admin_role(),
            login_permission: default_login_permission(),
            max_payload_bytes: default_max_payload_bytes(),
            idp_certificates: HashMap::new(),
            idp_certificate_files: HashMap::new(),
        }
    }
}

impl SsoConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read SSO config: {:?}", path))?;
        let config: SsoConfig = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse SSO config: {:?}", path))?;
        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.role_claim_attribute.is_empty() {
            return Err("role_claim_attribute must not be empty".to_string());
        }

        if self.attribute_value_separator.is_empty() {
            return Err("attribute_value_separator must not be empty".to_string());
        }

        if self.super_tenant_domain.is_empty() {
            return Err("super_tenant_domain must not be empty".to_string());
        }

        if self.max_payload_bytes == 0 {
            return Err("max_payload_bytes must be positive".to_string());
        }

        if let Some(ref id) = self.service_provider_id {
            if id.trim().is_empty() {
                return Err("service_provider_id must not be blank".to_string());
            }
        }

        Ok(())
    }

    /// Per-call view consumed by the validation pipeline.
    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            response_signature_required: self.response_signature_validation_enabled,
            assertion_signature_required: self.assertion_signature_validation_enabled,
            verify_with_subject_tenant: self.validate_signature_with_user_domain,
            clock_skew_secs: self.time_stamp_skew_secs,
            role_claim_name: self.role_claim_attribute.clone(),
            multi_value_separator: self.attribute_value_separator.clone(),
            super_tenant_domain: self.super_tenant_domain.clone(),
        }
    }

    /// Per-call view consumed by the provisioning planner.
    pub fn provisioning_config(&self) -> ProvisioningConfig {
        ProvisioningConfig {
            default_role: self.provisioning_default_role.clone(),
            everyone_role: self.everyone_role.clone(),
            admin_role: self.admin_role.clone(),
            super_admin_role_required: self.super_admin_role_required,
        }
    }
}

/// Immutable validation settings for a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    pub response_signature_required: bool,
    pub assertion_signature_required: bool,
    pub verify_with_subject_tenant: bool,
    pub clock_skew_secs: u64,
    pub role_claim_name: String,
    pub multi_value_separator: String,
    pub super_tenant_domain: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        SsoConfig::default().validation_config()
    }
}

/// Immutable provisioning settings for a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub default_role: Option<String>,
    pub everyone_role: String,
    pub admin_role: String,
    pub super_admin_role_required: bool,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        SsoConfig::default().provisioning_config()
    }
}

/// JSON overlay for runtime reconfiguration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SsoConfigJson {
    pub service_provider_id: Option<String>,
    pub response_signature_validation_enabled: Option<bool>,
    pub assertion_signature_validation_enabled: Option<bool>,
    pub validate_signature_with_user_domain: Option<bool>,
    pub time_stamp_skew_secs: Option<u64>,
    pub role_claim_attribute: Option<String>,
    pub attribute_value_separator: Option<String>,
    pub jit_user_provisioning_enabled: Option<bool>,
    pub provisioning_default_userstore: Option<String>,
    pub provisioning_default_role: Option<String>,
    pub super_admin_role_required: Option<bool>,
    pub super_tenant_domain: Option<String>,
    pub everyone_role: Option<String>,
    pub admin_role: Option<String>,
    pub login_permission: Option<String>,
    pub max_payload_bytes: Option<usize>,
    #[serde(default)]
    pub idp_certificates: HashMap<String, String>,
    #[serde(default)]
    pub idp_certificate_files: HashMap<String, PathBuf>,
}

impl SsoConfigJson {
    /// Merge JSON config into existing config.
    pub fn apply_to(&self, config: &mut SsoConfig) {
        if let Some(ref id) = self.service_provider_id {
            config.service_provider_id = Some(id.clone());
        }
        if let Some(enabled) = self.response_signature_validation_enabled {
            config.response_signature_validation_enabled = enabled;
        }
        if let Some(enabled) = self.assertion_signature_validation_enabled {
            config.assertion_signature_validation_enabled = enabled;
        }
        if let Some(enabled) = self.validate_signature_with_user_domain {
            config.validate_signature_with_user_domain = enabled;
        }
        if let Some(skew) = self.time_stamp_skew_secs {
            config.time_stamp_skew_secs = skew;
        }
        if let Some(ref claim) = self.role_claim_attribute {
            config.role_claim_attribute = claim.clone();
        }
        if let Some(ref separator) = self.attribute_value_separator {
            config.attribute_value_separator = separator.clone();
        }
        if let Some(enabled) = self.jit_user_provisioning_enabled {
            config.jit_user_provisioning_enabled = enabled;
        }
        if let Some(ref store) = self.provisioning_default_userstore {
            config.provisioning_default_userstore = Some(store.clone());
        }
        if let Some(ref role) = self.provisioning_default_role {
            config.provisioning_default_role = Some(role.clone());
        }
        if let Some(required) = self.super_admin_role_required {
            config.super_admin_role_required = required;
        }
        if let Some(ref domain) = self.super_tenant_domain {
            config.super_tenant_domain = domain.clone();
        }
        if let Some(ref role) = self.everyone_role {
            config.everyone_role = role.clone();
        }
        if let Some(ref role) = self.admin_role {
            config.admin_role = role.clone();
        }
        if let Some(ref permission) = self.login_permission {
            config.login_permission = permission.clone();
        }
        if let Some(max) = self.max_payload_bytes {
            config.max_payload_bytes = max;
        }
        if !self.idp_certificates.is_empty() {
            config.idp_certificates = self.idp_certificates.clone();
        }
        if !self.idp_certificate_files.is_empty() {
            config.idp_certificate_files = self.idp_certificate_files.clone();
        }
    }
}
