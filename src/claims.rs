//! Subject and role claims.
//!
//! Locates the assertion that carries the claims (the first plain assertion
//! of a Response, else the first encrypted one after decryption), reads its
//! subject and collects role values from attribute statements.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::decode::tree::text_content;
use crate::decode::AssertionDecoder;
use crate::error::{DecryptionError, ValidationError, ValidationResult};
use crate::model::{Assertion, AttributeValue, EncryptedAssertion, IdIndex, SamlDocument, SamlObject};

/// Decrypts an `EncryptedAssertion` into assertion XML.
pub trait AssertionDecrypter: Send + Sync {
    fn decrypt(
        &self,
        encrypted: &EncryptedAssertion,
        tenant_domain: &str,
    ) -> Result<String, DecryptionError>;
}

/// The assertion carrying the claims.
#[derive(Debug, Clone)]
pub struct LocatedAssertion {
    pub assertion: Assertion,
    /// Set when the assertion came out of an `EncryptedAssertion`; its
    /// signature covers that document, not the payload.
    pub decrypted: Option<DecryptedDocument>,
}

#[derive(Debug, Clone)]
pub struct DecryptedDocument {
    pub ids: IdIndex,
    pub source: Arc<str>,
}

impl LocatedAssertion {
    /// ID index of the document enclosing the assertion.
    pub fn ids<'a>(&'a self, payload: &'a SamlDocument) -> &'a IdIndex {
        self.decrypted.as_ref().map_or(&payload.ids, |d| &d.ids)
    }

    /// XML source of the document enclosing the assertion.
    pub fn source<'a>(&'a self, payload: &'a SamlDocument) -> &'a str {
        self.decrypted
            .as_ref()
            .map_or(&*payload.source, |d| &*d.source)
    }
}

/// Find the assertion to read claims from.
///
/// `tenant_domain` keys the decryption credential.
pub fn locate_assertion(
    document: &SamlDocument,
    decoder: &dyn AssertionDecoder,
    decrypter: Option<&dyn AssertionDecrypter>,
    tenant_domain: &str,
) -> ValidationResult<LocatedAssertion> {
    let response = match &document.root {
        SamlObject::Assertion(assertion) => {
            return Ok(LocatedAssertion {
                assertion: assertion.clone(),
                decrypted: None,
            })
        }
        SamlObject::Response(response) => response,
    };

    if let Some(assertion) = response.assertions.first() {
        return Ok(LocatedAssertion {
            assertion: assertion.clone(),
            decrypted: None,
        });
    }

    let Some(encrypted) = response.encrypted_assertions.first() else {
        debug!("Response carries no assertion");
        return Err(ValidationError::MissingSubject);
    };

    let decrypter = decrypter.ok_or_else(|| {
        ValidationError::DecryptionFailed("no assertion decrypter configured".to_string())
    })?;

    let xml = decrypter
        .decrypt(encrypted, tenant_domain)
        .map_err(|e| ValidationError::DecryptionFailed(e.0))?;

    let decrypted = decoder.decode_assertion_xml(&xml)?;
    match decrypted.root {
        SamlObject::Assertion(assertion) => {
            debug!(tenant = %tenant_domain, "Decrypted encrypted assertion");
            Ok(LocatedAssertion {
                assertion,
                decrypted: Some(DecryptedDocument {
                    ids: decrypted.ids,
                    source: decrypted.source,
                }),
            })
        }
        SamlObject::Response(_) => Err(ValidationError::DecryptionFailed(
            "decrypted content is not an Assertion".to_string(),
        )),
    }
}

/// Non-blank subject identifier of `assertion`.
pub fn subject_of(assertion: &Assertion) -> ValidationResult<&str> {
    assertion
        .subject_identifier()
        .ok_or(ValidationError::MissingSubject)
}

/// Collect role values from every attribute named exactly `role_claim`.
///
/// A single value is split on `separator`; two or more values are each
/// one role. Empty roles are dropped.
pub fn extract_roles(
    assertion: &Assertion,
    role_claim: &str,
    separator: &str,
) -> ValidationResult<BTreeSet<String>> {
    let mut roles = BTreeSet::new();

    let attributes = assertion
        .attribute_statements
        .iter()
        .flat_map(|s| &s.attributes)
        .filter(|a| a.name == role_claim);

    for attribute in attributes {
        match attribute.values.as_slice() {
            [] => {}
            [single] => {
                let value = value_text(single)?;
                roles.extend(
                    value
                        .split(separator)
                        .filter(|r| !r.is_empty())
                        .map(String::from),
                );
            }
            many => {
                for value in many {
                    let value = value_text(value)?;
                    if !value.is_empty() {
                        roles.insert(value);
                    }
                }
            }
        }
    }

    debug!(role_claim = %role_claim, roles = ?roles, "Extracted role claims");
    Ok(roles)
}

fn value_text(value: &AttributeValue) -> ValidationResult<String> {
    match value {
        AttributeValue::String(s) => Ok(s.clone()),
        AttributeValue::Structured(raw) => text_content(raw),
    }
}
