//! SAML object model consumed by the validators.
//!
//! Produced by the decoder, read-only afterwards.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// SAML 2.0 success status code.
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// A decoded payload: the top-level object plus the document-wide ID index.
#[derive(Debug, Clone)]
pub struct SamlDocument {
    pub root: SamlObject,
    pub ids: IdIndex,
    /// Decoded XML source, shared with signature collaborators.
    pub source: Arc<str>,
}

/// Top-level SAML objects accepted by the pipeline.
#[derive(Debug, Clone)]
pub enum SamlObject {
    Response(Response),
    Assertion(Assertion),
}

impl SamlObject {
    pub fn kind(&self) -> &'static str {
        match self {
            SamlObject::Response(_) => "Response",
            SamlObject::Assertion(_) => "Assertion",
        }
    }
}

/// Occurrence count of every ID-typed attribute value in a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdIndex {
    counts: HashMap<String, usize>,
}

impl IdIndex {
    pub fn record(&mut self, id: &str) {
        *self.counts.entry(id.to_string()).or_insert(0) += 1;
    }

    pub fn occurrences(&self, id: &str) -> usize {
        self.counts.get(id).copied().unwrap_or(0)
    }

    pub fn duplicates(&self) -> impl Iterator<Item = &str> {
        self.counts
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(id, _)| id.as_str())
    }
}

/// SAML protocol Response.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Unprefixed `ID` attribute.
    pub id: Option<String>,
    /// ID-typed attributes on the element, prefixed or not.
    pub id_attribute_count: usize,
    pub destination: Option<String>,
    pub issuer: Option<String>,
    pub status: Option<Status>,
    /// First enveloped signature.
    pub signature: Option<SignatureBlock>,
    pub signature_count: usize,
    pub assertions: Vec<Assertion>,
    pub encrypted_assertions: Vec<EncryptedAssertion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl Status {
    /// Missing status code is treated as success.
    pub fn is_success(&self) -> bool {
        self.code.as_deref().map_or(true, |c| c == STATUS_SUCCESS)
    }
}

/// SAML Assertion.
#[derive(Debug, Clone, Default)]
pub struct Assertion {
    pub id: Option<String>,
    pub id_attribute_count: usize,
    pub issuer: Option<String>,
    pub subject: Option<Subject>,
    pub conditions: Option<Conditions>,
    pub attribute_statements: Vec<AttributeStatement>,
    pub signature: Option<SignatureBlock>,
    pub signature_count: usize,
    /// True when this assertion is the document element.
    pub is_document_root: bool,
}

impl Assertion {
    /// Non-blank subject NameID value.
    pub fn subject_identifier(&self) -> Option<&str> {
        self.subject
            .as_ref()
            .map(|s| s.name_id.trim())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    pub name_id: String,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub audience_restrictions: Vec<AudienceRestriction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudienceRestriction {
    pub audiences: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeStatement {
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<AttributeValue>,
}

/// An attribute value as found on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// `xsi:type="xs:string"` value, already unescaped.
    String(String),
    /// Any other value; raw inner XML whose text content is the value.
    Structured(String),
}

/// An enveloped XML signature and the parts of `SignedInfo` the profile
/// check needs. Cryptographic material stays opaque.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureBlock {
    pub canonicalization_method: Option<String>,
    pub signature_method: Option<String>,
    pub references: Vec<SignatureReference>,
    pub signature_value: String,
    /// Verbatim `SignedInfo` element.
    pub signed_info_xml: String,
    /// Certificate embedded in `KeyInfo`. Never used as a trust anchor.
    pub embedded_certificate: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureReference {
    pub uri: Option<String>,
    pub transforms: Vec<String>,
    pub digest_method: Option<String>,
    pub digest_value: Option<String>,
}

/// An `EncryptedAssertion` kept as raw XML for the decryption collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedAssertion {
    pub raw_xml: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_index_counts() {
        let mut ids = IdIndex::default();
        ids.record("_a");
        ids.record("_b");
        ids.record("_a");

        assert_eq!(ids.occurrences("_a"), 2);
        assert_eq!(ids.occurrences("_b"), 1);
        assert_eq!(ids.occurrences("_c"), 0);
        assert_eq!(ids.duplicates().collect::<Vec<_>>(), vec!["_a"]);
    }

    #[test]
    fn test_status_success() {
        assert!(Status::default().is_success());
        assert!(Status {
            code: Some(STATUS_SUCCESS.to_string()),
            message: None,
        }
        .is_success());
        assert!(!Status {
            code: Some("urn:oasis:names:tc:SAML:2.0:status:Requester".to_string()),
            message: None,
        }
        .is_success());
    }

    #[test]
    fn test_blank_subject_is_missing() {
        let mut assertion = Assertion {
            subject: Some(Subject {
                name_id: "   ".to_string(),
                format: None,
            }),
            ..Default::default()
        };
        assert_eq!(assertion.subject_identifier(), None);

        assertion.subject = Some(Subject {
            name_id: "alice".to_string(),
            format: None,
        });
        assert_eq!(assertion.subject_identifier(), Some("alice"));
    }
}
