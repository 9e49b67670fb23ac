//! Decoding of transport-encoded SAML payloads into the object model.
//!
//! Accepts a top-level `Response` (wrapping any number of plain or
//! encrypted assertions) or a bare `Assertion`. Anything else, and any
//! document carrying a DOCTYPE, is rejected as a decode error.

pub mod binding;
mod saml;
pub mod tree;

use tracing::debug;

use crate::error::{ValidationError, ValidationResult};
use crate::model::{SamlDocument, SamlObject};

pub use binding::decode_payload;

/// Default upper bound on a decoded payload.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Turns an encoded payload into a structured SAML document.
pub trait AssertionDecoder: Send + Sync {
    /// Decode a base64 (optionally deflated) payload.
    fn decode(&self, encoded: &str) -> ValidationResult<SamlDocument>;

    /// Decode the XML of a decrypted assertion. The root must be an
    /// `Assertion`.
    fn decode_assertion_xml(&self, xml: &str) -> ValidationResult<SamlDocument>;
}

/// Decoder built on quick-xml.
#[derive(Debug, Clone)]
pub struct XmlAssertionDecoder {
    max_payload_bytes: usize,
}

impl XmlAssertionDecoder {
    pub fn new(max_payload_bytes: usize) -> Self {
        Self { max_payload_bytes }
    }

    /// Parse already-decoded XML.
    pub fn parse_xml(&self, xml: &str) -> ValidationResult<SamlDocument> {
        if xml.len() > self.max_payload_bytes {
            return Err(ValidationError::decode(format!(
                "SAML document exceeds {} bytes",
                self.max_payload_bytes
            )));
        }

        let root = tree::parse(xml)?;
        let document = saml::to_document(&root, xml)?;

        debug!(root = document.root.kind(), "Decoded SAML document");
        Ok(document)
    }
}

impl Default for XmlAssertionDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

impl AssertionDecoder for XmlAssertionDecoder {
    fn decode(&self, encoded: &str) -> ValidationResult<SamlDocument> {
        let xml = decode_payload(encoded, self.max_payload_bytes)?;
        self.parse_xml(&xml)
    }

    fn decode_assertion_xml(&self, xml: &str) -> ValidationResult<SamlDocument> {
        let document = self.parse_xml(xml)?;
        match document.root {
            SamlObject::Assertion(_) => Ok(document),
            SamlObject::Response(_) => Err(ValidationError::decode(
                "decrypted content is not an Assertion",
            )),
        }
    }
}
