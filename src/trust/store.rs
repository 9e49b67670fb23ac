//! PEM certificate trust store keyed by tenant domain.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use x509_parser::prelude::*;

use super::{Credential, TrustAnchor, TrustAnchorResolver};
use crate::config::SsoConfig;
use crate::error::TrustAnchorError;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// In-memory IdP certificates, one per tenant domain.
#[derive(Debug, Default)]
pub struct CertificateTrustStore {
    anchors: RwLock<HashMap<String, Arc<Credential>>>,
}

impl CertificateTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from the inline and file certificates of `config`.
    pub fn from_config(config: &SsoConfig) -> Result<Self> {
        let store = Self::new();

        for (tenant, pem) in &config.idp_certificates {
            store
                .insert_pem(tenant, pem)
                .with_context(|| format!("Invalid IdP certificate for tenant {}", tenant))?;
        }

        for (tenant, path) in &config.idp_certificate_files {
            store.load_file(tenant, path)?;
        }

        Ok(store)
    }

    /// Load a PEM certificate file for `tenant_domain`.
    pub fn load_file(&self, tenant_domain: &str, path: &Path) -> Result<()> {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read IdP certificate: {:?}", path))?;
        self.insert_pem(tenant_domain, &pem)
            .with_context(|| format!("Invalid IdP certificate: {:?}", path))?;
        Ok(())
    }

    /// Register a PEM (or bare base64 DER) certificate, replacing any
    /// previous anchor of the tenant.
    pub fn insert_pem(&self, tenant_domain: &str, pem: &str) -> Result<(), TrustAnchorError> {
        let der = decode_certificate(pem)?;
        let credential = parse_credential(&der)?;

        if !credential.is_valid_at(Utc::now()) {
            warn!(
                tenant = %tenant_domain,
                subject_dn = %credential.subject_dn,
                not_after = %credential.not_after,
                "IdP certificate is outside its validity period"
            );
        }

        info!(
            tenant = %tenant_domain,
            subject_dn = %credential.subject_dn,
            serial = %credential.serial,
            "Registered IdP trust anchor"
        );

        let mut anchors = self
            .anchors
            .write()
            .map_err(|_| TrustAnchorError::Lookup("trust store lock poisoned".to_string()))?;
        anchors.insert(tenant_domain.to_string(), Arc::new(credential));
        Ok(())
    }

    pub fn remove(&self, tenant_domain: &str) -> bool {
        match self.anchors.write() {
            Ok(mut anchors) => anchors.remove(tenant_domain).is_some(),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.anchors.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TrustAnchorResolver for CertificateTrustStore {
    fn resolve(&self, tenant_domain: &str) -> Result<TrustAnchor, TrustAnchorError> {
        let anchors = self
            .anchors
            .read()
            .map_err(|_| TrustAnchorError::Lookup("trust store lock poisoned".to_string()))?;

        let credential = anchors.get(tenant_domain).cloned().ok_or_else(|| {
            debug!(tenant = %tenant_domain, "No trust anchor registered");
            TrustAnchorError::UnknownTenant
        })?;

        Ok(TrustAnchor {
            tenant_domain: tenant_domain.to_string(),
            credential,
        })
    }
}

/// Extract DER bytes from PEM text, or from bare base64.
fn decode_certificate(data: &str) -> Result<Vec<u8>, TrustAnchorError> {
    let data = data.trim();

    let body = match data.find(PEM_BEGIN) {
        Some(start) => {
            let rest = &data[start + PEM_BEGIN.len()..];
            let end = rest.find(PEM_END).ok_or_else(|| {
                TrustAnchorError::InvalidCertificate("missing PEM END marker".to_string())
            })?;
            &rest[..end]
        }
        None => data,
    };

    let base64_content: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if base64_content.is_empty() {
        return Err(TrustAnchorError::InvalidCertificate(
            "empty certificate".to_string(),
        ));
    }

    STANDARD
        .decode(base64_content.as_bytes())
        .map_err(|e| TrustAnchorError::InvalidCertificate(format!("invalid base64: {}", e)))
}

fn parse_credential(der: &[u8]) -> Result<Credential, TrustAnchorError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
        TrustAnchorError::InvalidCertificate(format!("failed to parse X.509 certificate: {:?}", e))
    })?;

    let serial = cert
        .serial
        .to_bytes_be()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":");

    Ok(Credential {
        der: der.to_vec(),
        subject_dn: cert.subject().to_string(),
        issuer_dn: cert.issuer().to_string(),
        serial,
        not_before: timestamp(cert.validity().not_before.timestamp())?,
        not_after: timestamp(cert.validity().not_after.timestamp())?,
        public_key_der: cert.public_key().raw.to_vec(),
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TrustAnchorError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        TrustAnchorError::InvalidCertificate(format!("validity time out of range: {}", secs))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Self-signed, CN=idp.example.com, O=Example IdP (generated with openssl)
    const IDP_CERT_PEM: &str = r#"-----BEGIN CERTIFICATE-----
MIIDQzCCAiugAwIBAgIUaXYv6hcccnV0LY5IQL7RxM6cu20wDQYJKoZIhvcNAQEL
BQAwMDEYMBYGA1UEAwwPaWRwLmV4YW1wbGUuY29tMRQwEgYDVQQKDAtFeGFtcGxl
IElkUDAgFw0yNjEwMTgyMjQzNDBaGA8yMTI2MDkyNDIyNDM0MFowMDEYMBYGA1UE
AwwPaWRwLmV4YW1wbGUuY29tMRQwEgYDVQQKDAtFeGFtcGxlIElkUDCCASIwDQYJ
KoZIhvcNAQEBBQADggEPADCCAQoCggEBAJyFUvj12MpIeT7W1t0t3YrAQIf7iDtZ
9YAAXACHAZrKDapaWIm8NLMXYXwHVeTXRc8Tb1iBBOU6dyC8+MzmPI7Ub2hh+gkh
LlE6CdVenbZaLkQc0vB0o8pNsUUiqrRrLr9YIwbIKc14v0GvN+N6S1T4PvElHyHP
1Od270BrW4BowiG9XtecKWtXvXYfSYNdc21pCncGh0RdD5ADI71aR4Cqt0wwuDuP
MsMqGt54x8bPm4Flx44DSnW5fSxWNRSz/WLmPM2vqbe4+cIjKOj9iYdnVsIvNSWX
UuzE3H3/7G11K/fym+O8mllcoHd0KF2ZhBTV1qPDJSBQwNqby0W+pzUCAwEAAaNT
MFEwHQYDVR0OBBYEFHUZHfyS77iy+iAS/l5M2cjcagIaMB8GA1UdIwQYMBaAFHUZ
HfyS77iy+iAS/l5M2cjcagIaMA8GA1UdEwEB/wQFMAMBAf8wDQYJKoZIhvcNAQEL
BQADggEBAHXXRYwxscsbqLNAs19wic0PRhFmjCb0Wbx6HF2294kNIxN04j1RGRbF
Du5nI+Y7zex/8aqgcPCyvgIsodxHdGwqcdyBAuMluYim5J9+T4EUrcsXv6lIaf8C
bIMbJzH/pswQXQItK8PEhBdRNDTxl1TO5d1L2EZ/2Xht133gZrgppRQofeQO6H3i
FN2u/NuffifSm9YJllNTCfXzbm1rG9Vec9/F38eZEjwBh+EUHZEn7rtSdq8FHYwU
3akncxwv/HdbrEDZtYZ8dQx8CHWYLAOXDnCr+u/XgIHGM7FgReN6VIJgGvC09iQu
FmVemkDX5bJSiDmugNX9p8aCWoGEhu8=
-----END CERTIFICATE-----"#;

    #[test]
    fn test_parse_pem_certificate() {
        let der = decode_certificate(IDP_CERT_PEM).unwrap();
        let credential = parse_credential(&der).unwrap();

        assert!(credential.subject_dn.contains("CN=idp.example.com"));
        assert_eq!(credential.subject_dn, credential.issuer_dn);
        assert!(credential.serial.starts_with("69:76:2f"));
        assert!(!credential.public_key_der.is_empty());
        assert!(credential.is_valid_at(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()));
        assert!(!credential.is_valid_at(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_bare_base64_certificate() {
        let body: String = IDP_CERT_PEM
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect();
        let store = CertificateTrustStore::new();
        assert!(store.insert_pem("carbon.super", &body).is_ok());
    }

    #[test]
    fn test_invalid_certificate() {
        let store = CertificateTrustStore::new();
        assert!(matches!(
            store.insert_pem("t", "not base64 !!"),
            Err(TrustAnchorError::InvalidCertificate(_))
        ));
        assert!(matches!(
            store.insert_pem("t", "aGVsbG8="),
            Err(TrustAnchorError::InvalidCertificate(_))
        ));
        assert!(matches!(
            store.insert_pem("t", "-----BEGIN CERTIFICATE-----\nMIID"),
            Err(TrustAnchorError::InvalidCertificate(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_resolve_by_tenant() {
        let store = CertificateTrustStore::new();
        store.insert_pem("acme.com", IDP_CERT_PEM).unwrap();

        let anchor = store.resolve("acme.com").unwrap();
        assert_eq!(anchor.tenant_domain, "acme.com");
        assert!(anchor.credential.subject_dn.contains("idp.example.com"));

        assert_eq!(
            store.resolve("carbon.super").unwrap_err(),
            TrustAnchorError::UnknownTenant
        );

        assert!(store.remove("acme.com"));
        assert!(store.resolve("acme.com").is_err());
    }

    #[test]
    fn test_from_config_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idp.pem");
        std::fs::write(&path, IDP_CERT_PEM).unwrap();

        let mut config = SsoConfig::default();
        config
            .idp_certificates
            .insert("carbon.super".to_string(), IDP_CERT_PEM.to_string());
        config
            .idp_certificate_files
            .insert("acme.com".to_string(), path);

        let store = CertificateTrustStore::from_config(&config).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.resolve("acme.com").is_ok());
    }

    #[test]
    fn test_from_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SsoConfig::default();
        config
            .idp_certificate_files
            .insert("acme.com".to_string(), dir.path().join("missing.pem"));

        assert!(CertificateTrustStore::from_config(&config).is_err());
    }
}
