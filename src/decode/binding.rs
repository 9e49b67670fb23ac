//! Transport decoding for the HTTP-POST and HTTP-Redirect bindings.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::io::Read;
use tracing::debug;

use crate::error::{ValidationError, ValidationResult};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Turn a transport-encoded SAML message into its XML text.
///
/// POST binding payloads are plain base64; Redirect binding payloads are
/// raw-DEFLATE compressed before base64 encoding.
pub fn decode_payload(encoded: &str, max_bytes: usize) -> ValidationResult<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(ValidationError::decode("empty SAML payload"));
    }

    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| ValidationError::decode(format!("payload is not valid base64: {}", e)))?;

    if bytes.len() > max_bytes {
        return Err(ValidationError::decode(format!(
            "decoded payload exceeds {} bytes",
            max_bytes
        )));
    }

    let xml_bytes = if looks_like_xml(&bytes) {
        debug!(bytes = bytes.len(), "Decoded POST binding payload");
        bytes
    } else {
        let inflated = inflate(&bytes, max_bytes)?;
        if !looks_like_xml(&inflated) {
            return Err(ValidationError::decode("payload does not contain XML"));
        }
        debug!(
            compressed = bytes.len(),
            inflated = inflated.len(),
            "Decoded Redirect binding payload"
        );
        inflated
    };

    let xml_bytes = xml_bytes
        .strip_prefix(UTF8_BOM)
        .map(<[u8]>::to_vec)
        .unwrap_or(xml_bytes);

    String::from_utf8(xml_bytes)
        .map_err(|_| ValidationError::decode("SAML payload is not valid UTF-8"))
}

fn looks_like_xml(bytes: &[u8]) -> bool {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'<')
}

fn inflate(compressed: &[u8], max_bytes: usize) -> ValidationResult<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::DeflateDecoder::new(compressed)
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| ValidationError::decode(format!("failed to inflate payload: {}", e)))?;

    if out.len() > max_bytes {
        return Err(ValidationError::decode(format!(
            "inflated payload exceeds {} bytes",
            max_bytes
        )));
    }
    Ok(out)
}
