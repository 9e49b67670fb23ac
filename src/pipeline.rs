//! Validation pipeline.
//!
//! decode -> status -> assertion + subject -> tenant -> temporal -> audience
//! -> signature -> roles. The first failure short-circuits; an outcome is
//! only produced when every stage passed.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::claims::{extract_roles, locate_assertion, subject_of, AssertionDecrypter, LocatedAssertion};
use crate::clock::{Clock, SystemClock};
use crate::config::ValidationConfig;
use crate::decode::{AssertionDecoder, XmlAssertionDecoder};
use crate::error::{ValidationError, ValidationResult};
use crate::model::{Assertion, SamlDocument, SamlObject};
use crate::tenant::{tenant_aware_username, tenant_domain_of};
use crate::trust::TrustAnchorResolver;
use crate::validation::{validate_audience, validate_validity_period, SignatureValidator, SignatureVerifier};

/// Claims of a fully validated assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    /// Username without the tenant suffix.
    pub username: String,
    pub tenant_domain: String,
    pub roles: BTreeSet<String>,
    pub authorized: bool,
}

/// A payload that passed decoding, status, temporal and audience checks.
/// Signatures are not verified yet.
#[derive(Debug, Clone)]
pub struct ScreenedAssertion {
    document: SamlDocument,
    located: LocatedAssertion,
    subject: String,
    tenant_domain: String,
}

impl ScreenedAssertion {
    pub fn document(&self) -> &SamlDocument {
        &self.document
    }

    pub fn assertion(&self) -> &Assertion {
        &self.located.assertion
    }

    /// Subject identifier as asserted, tenant suffix included.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn tenant_domain(&self) -> &str {
        &self.tenant_domain
    }

    pub fn username(&self) -> &str {
        tenant_aware_username(&self.subject)
    }
}

/// Borrowed collaborators for one validation call.
struct Stages<'a> {
    config: &'a ValidationConfig,
    decoder: &'a dyn AssertionDecoder,
    clock: &'a dyn Clock,
    resolver: &'a dyn TrustAnchorResolver,
    signature_validator: &'a dyn SignatureValidator,
    decrypter: Option<&'a dyn AssertionDecrypter>,
}

impl Stages<'_> {
    fn screen(&self, payload: &str, sp_id: &str) -> ValidationResult<ScreenedAssertion> {
        let document = self.decoder.decode(payload)?;

        if let SamlObject::Response(response) = &document.root {
            if let Some(status) = response.status.as_ref().filter(|s| !s.is_success()) {
                let code = status.code.clone().unwrap_or_default();
                debug!(status = %code, message = ?status.message, "Unsuccessful SAML response");
                return Err(ValidationError::UnsuccessfulStatus(code));
            }
        }

        let located = locate_assertion(
            &document,
            self.decoder,
            self.decrypter,
            &self.config.super_tenant_domain,
        )?;

        let subject = subject_of(&located.assertion)?.to_string();
        let tenant_domain = tenant_domain_of(&subject, &self.config.super_tenant_domain).to_string();

        let conditions = located.assertion.conditions.as_ref();
        validate_validity_period(conditions, self.clock.now(), self.config.clock_skew_secs)?;
        validate_audience(conditions, sp_id)?;

        debug!(subject = %subject, tenant = %tenant_domain, "SAML assertion screened");

        Ok(ScreenedAssertion {
            document,
            located,
            subject,
            tenant_domain,
        })
    }

    fn verify(&self, screened: &ScreenedAssertion) -> ValidationResult<ValidationOutcome> {
        SignatureVerifier::new(self.resolver, self.signature_validator).verify(
            &screened.document,
            &screened.located,
            &screened.tenant_domain,
            self.config,
        )?;

        let roles = extract_roles(
            &screened.located.assertion,
            &self.config.role_claim_name,
            &self.config.multi_value_separator,
        )?;

        let outcome = ValidationOutcome {
            username: screened.username().to_string(),
            tenant_domain: screened.tenant_domain.clone(),
            roles,
            authorized: true,
        };

        info!(
            user = %outcome.username,
            tenant = %outcome.tenant_domain,
            roles = outcome.roles.len(),
            "SAML assertion validated"
        );

        Ok(outcome)
    }
}

fn log_rejection(e: &ValidationError) {
    error!(
        error_kind = %e.kind(),
        security_event = e.is_security_event(),
        error = %e,
        "SAML2 SSO authentication request rejected"
    );
}

/// Owns the collaborators of the validation pipeline.
pub struct ValidationPipeline {
    config: ValidationConfig,
    decoder: Arc<dyn AssertionDecoder>,
    clock: Arc<dyn Clock>,
    resolver: Arc<dyn TrustAnchorResolver>,
    signature_validator: Arc<dyn SignatureValidator>,
    decrypter: Option<Arc<dyn AssertionDecrypter>>,
}

impl ValidationPipeline {
    /// Pipeline with the XML decoder and the system clock.
    pub fn new(
        config: ValidationConfig,
        resolver: Arc<dyn TrustAnchorResolver>,
        signature_validator: Arc<dyn SignatureValidator>,
    ) -> Self {
        Self {
            config,
            decoder: Arc::new(XmlAssertionDecoder::default()),
            clock: Arc::new(SystemClock),
            resolver,
            signature_validator,
            decrypter: None,
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn AssertionDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_decrypter(mut self, decrypter: Arc<dyn AssertionDecrypter>) -> Self {
        self.decrypter = Some(decrypter);
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Replace the validation settings, keeping the collaborators.
    pub fn reconfigure(&mut self, config: ValidationConfig) {
        self.config = config;
    }

    pub fn set_decoder(&mut self, decoder: Arc<dyn AssertionDecoder>) {
        self.decoder = decoder;
    }

    fn stages(&self) -> Stages<'_> {
        Stages {
            config: &self.config,
            decoder: self.decoder.as_ref(),
            clock: self.clock.as_ref(),
            resolver: self.resolver.as_ref(),
            signature_validator: self.signature_validator.as_ref(),
            decrypter: self.decrypter.as_deref(),
        }
    }

    /// Decode the payload and run the checks that need no key material.
    pub fn screen(&self, payload: &str, sp_id: &str) -> ValidationResult<ScreenedAssertion> {
        self.stages()
            .screen(payload, sp_id)
            .inspect_err(log_rejection)
    }

    /// Verify signatures and extract roles from a screened assertion.
    pub fn verify(&self, screened: &ScreenedAssertion) -> ValidationResult<ValidationOutcome> {
        self.stages().verify(screened).inspect_err(log_rejection)
    }

    /// Run every stage.
    pub fn validate(&self, payload: &str, sp_id: &str) -> ValidationResult<ValidationOutcome> {
        let stages = self.stages();
        stages
            .screen(payload, sp_id)
            .and_then(|screened| stages.verify(&screened))
            .inspect_err(log_rejection)
    }
}

/// Validate an encoded SAML payload with the default decoder.
///
/// Encrypted assertions cannot be read without a decrypter; use
/// [`ValidationPipeline::with_decrypter`] for those.
pub fn validate(
    payload: &str,
    config: &ValidationConfig,
    clock: &dyn Clock,
    resolver: &dyn TrustAnchorResolver,
    signature_validator: &dyn SignatureValidator,
    sp_id: &str,
) -> ValidationResult<ValidationOutcome> {
    let decoder = XmlAssertionDecoder::default();
    let stages = Stages {
        config,
        decoder: &decoder,
        clock,
        resolver,
        signature_validator,
        decrypter: None,
    };

    stages
        .screen(payload, sp_id)
        .and_then(|screened| stages.verify(&screened))
        .inspect_err(log_rejection)
}
