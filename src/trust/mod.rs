//! Tenant-scoped trust anchors for IdP signature verification.

mod store;

pub use store::CertificateTrustStore;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::TrustAnchorError;

/// IdP signing certificate, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Certificate DER bytes.
    pub der: Vec<u8>,
    pub subject_dn: String,
    pub issuer_dn: String,
    /// Serial number (colon separated hex).
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// SubjectPublicKeyInfo DER, the verification key.
    pub public_key_der: Vec<u8>,
}

impl Credential {
    pub fn is_valid_at(&self, instant: DateTime<Utc>) -> bool {
        self.not_before <= instant && instant <= self.not_after
    }
}

/// Verification material registered for a tenant.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pub tenant_domain: String,
    pub credential: Arc<Credential>,
}

/// Resolves the trust anchor of a tenant domain.
///
/// Called once per verification; implementations may block.
pub trait TrustAnchorResolver: Send + Sync {
    fn resolve(&self, tenant_domain: &str) -> Result<TrustAnchor, TrustAnchorError>;
}
