//! saml2-sso-check
//!
//! Decodes a SAML payload and reports which SSO checks it passes. No
//! cryptographic verification is performed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};

use saml2_sso_authenticator::claims::{extract_roles, locate_assertion, subject_of};
use saml2_sso_authenticator::decode::{AssertionDecoder, XmlAssertionDecoder};
use saml2_sso_authenticator::error::{SignedPart, ValidationError, ValidationResult};
use saml2_sso_authenticator::model::{IdIndex, SamlObject, SignatureBlock};
use saml2_sso_authenticator::tenant::{tenant_aware_username, tenant_domain_of};
use saml2_sso_authenticator::validation::{
    check_signature_profile, validate_audience, validate_validity_period, ProfileTarget,
};
use saml2_sso_authenticator::{SsoConfig, SERVICE_PROVIDER_ID};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "saml2-sso-check")]
#[command(about = "Inspect a SAML2 SSO payload against the authenticator checks")]
struct Args {
    /// Base64 SAML payload file, `-` for stdin
    #[arg(long)]
    payload: PathBuf,

    /// Authenticator configuration (JSON)
    #[arg(long, env = "SAML2_SSO_CONFIG")]
    config: Option<PathBuf>,

    /// Service provider identifier (overrides config)
    #[arg(long, env = "SAML2_SSO_SP_ID")]
    sp_id: Option<String>,

    /// Evaluation instant (RFC 3339), defaults to now
    #[arg(long, value_parser = parse_instant)]
    at: Option<DateTime<Utc>>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 instant: {}", e))
}

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl Check {
    fn from_result<T>(name: &'static str, result: &ValidationResult<T>) -> Self {
        match result {
            Ok(_) => Self {
                name,
                passed: true,
                error_kind: None,
                detail: None,
            },
            Err(e) => Self {
                name,
                passed: false,
                error_kind: Some(e.kind().as_str()),
                detail: Some(e.to_string()),
            },
        }
    }

    fn skipped(name: &'static str, detail: &str) -> Self {
        Self {
            name,
            passed: true,
            error_kind: None,
            detail: Some(detail.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ConditionsReport {
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: Option<DateTime<Utc>>,
    audiences: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct Report {
    root: Option<&'static str>,
    evaluated_at: Option<DateTime<Utc>>,
    service_provider_id: Option<String>,
    subject: Option<String>,
    username: Option<String>,
    tenant_domain: Option<String>,
    conditions: Option<ConditionsReport>,
    checks: Vec<Check>,
    roles: Vec<String>,
    passed: bool,
}

fn read_payload(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut payload = String::new();
        std::io::stdin()
            .read_to_string(&mut payload)
            .context("Failed to read payload from stdin")?;
        Ok(payload)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read payload: {:?}", path))
    }
}

fn signature_check(
    name: &'static str,
    part: SignedPart,
    enabled: bool,
    element: Option<(ProfileTarget<'_>, Option<&SignatureBlock>)>,
    ids: &IdIndex,
) -> Check {
    if !enabled {
        return Check::skipped(name, "signature validation disabled");
    }
    let Some((target, signature)) = element else {
        return Check::skipped(name, "not applicable");
    };
    let result = signature
        .ok_or(ValidationError::MissingSignature(part))
        .and_then(|s| check_signature_profile(part, &target, s, ids));
    Check::from_result(name, &result)
}

fn inspect(payload: &str, config: &SsoConfig, sp_id: &str, now: DateTime<Utc>) -> Report {
    let mut report = Report {
        evaluated_at: Some(now),
        service_provider_id: Some(sp_id.to_string()),
        ..Default::default()
    };

    let decoder = XmlAssertionDecoder::new(config.max_payload_bytes);
    let decoded = decoder.decode(payload);
    report.checks.push(Check::from_result("decode", &decoded));
    let Ok(document) = decoded else {
        return report;
    };
    report.root = Some(document.root.kind());

    if let SamlObject::Response(response) = &document.root {
        let status = match &response.status {
            Some(s) if !s.is_success() => Err(ValidationError::UnsuccessfulStatus(
                s.code.clone().unwrap_or_default(),
            )),
            _ => Ok(()),
        };
        report.checks.push(Check::from_result("status", &status));
    }

    let located = locate_assertion(&document, &decoder, None, &config.super_tenant_domain);
    report.checks.push(Check::from_result("assertion", &located));
    let Ok(located) = located else {
        return report;
    };
    let assertion = &located.assertion;

    let subject = subject_of(assertion);
    report.checks.push(Check::from_result("subject", &subject));
    if let Ok(subject) = subject {
        report.subject = Some(subject.to_string());
        report.username = Some(tenant_aware_username(subject).to_string());
        report.tenant_domain =
            Some(tenant_domain_of(subject, &config.super_tenant_domain).to_string());
    }

    let conditions = assertion.conditions.as_ref();
    report.conditions = conditions.map(|c| ConditionsReport {
        not_before: c.not_before,
        not_on_or_after: c.not_on_or_after,
        audiences: c
            .audience_restrictions
            .iter()
            .flat_map(|r| r.audiences.iter().cloned())
            .collect(),
    });

    report.checks.push(Check::from_result(
        "temporal",
        &validate_validity_period(conditions, now, config.time_stamp_skew_secs),
    ));
    report
        .checks
        .push(Check::from_result("audience", &validate_audience(conditions, sp_id)));

    let response_element = match &document.root {
        SamlObject::Response(r) => Some((ProfileTarget::response(r), r.signature.as_ref())),
        SamlObject::Assertion(_) => None,
    };
    report.checks.push(signature_check(
        "response_signature_profile",
        SignedPart::Response,
        config.response_signature_validation_enabled,
        response_element,
        &document.ids,
    ));
    report.checks.push(signature_check(
        "assertion_signature_profile",
        SignedPart::Assertion,
        config.assertion_signature_validation_enabled,
        Some((ProfileTarget::assertion(assertion), assertion.signature.as_ref())),
        located.ids(&document),
    ));

    let roles = extract_roles(
        assertion,
        &config.role_claim_attribute,
        &config.attribute_value_separator,
    );
    report.checks.push(Check::from_result("roles", &roles));
    if let Ok(roles) = roles {
        report.roles = roles.into_iter().collect();
    }

    report
}

fn run(args: Args) -> Result<bool> {
    let mut config = match &args.config {
        Some(path) => SsoConfig::from_file(path)?,
        None => SsoConfig::default(),
    };
    if let Some(ref sp_id) = args.sp_id {
        config.service_provider_id = Some(sp_id.clone());
    }

    let sp_id = SERVICE_PROVIDER_ID
        .get_or_init(|| config.service_provider_id.clone())
        .unwrap_or_default();
    let now = args.at.unwrap_or_else(Utc::now);

    let payload = read_payload(&args.payload)?;
    debug!(bytes = payload.len(), "Read SAML payload");

    let mut report = inspect(&payload, &config, &sp_id, now);
    report.passed = report.checks.iter().all(|c| c.passed);

    info!(passed = report.passed, checks = report.checks.len(), "Inspection complete");

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    println!("{}", json);

    Ok(report.passed)
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={},saml2_sso_authenticator={}",
            env!("CARGO_CRATE_NAME"),
            log_level,
            log_level
        ))
        .with_writer(std::io::stderr)
        .json()
        .init();

    if run(args)? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
