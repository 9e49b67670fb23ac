//! Error taxonomy for SAML2 SSO validation and login.

use thiserror::Error;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Generic message safe to return to the remote party.
pub const PUBLIC_FAILURE_MESSAGE: &str = "SAML2 SSO authentication failed";

/// Reasons a SAML payload is rejected.
///
/// Every variant is terminal for the current attempt. The precise reason is
/// meant for the caller (logs, audit); use [`ValidationError::public_message`]
/// when answering the remote party.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Payload is not base64, not UTF-8, not well-formed XML, or not a
    /// Response/Assertion.
    #[error("malformed SAML payload: {0}")]
    Decode(String),

    /// Response carries a non-success status code.
    #[error("SAML response status is not success: {0}")]
    UnsuccessfulStatus(String),

    /// No assertion, or the assertion has no usable subject identifier.
    #[error("SAML assertion does not contain the username of the subject")]
    MissingSubject,

    #[error("failed to meet SAML assertion condition 'NotBefore'")]
    AssertionNotYetValid,

    #[error("failed to meet SAML assertion condition 'NotOnOrAfter'")]
    AssertionExpired,

    #[error("SAML assertion condition 'NotBefore' must be earlier than 'NotOnOrAfter'")]
    MalformedValidityWindow,

    /// No audience restriction names this service provider.
    #[error("SAML audience restriction does not include this service provider")]
    AudienceMismatch,

    /// Assertion declares no audience restriction at all.
    #[error("SAML assertion does not contain an audience restriction")]
    NoAudienceRestriction,

    /// Signature checking is enabled but the element is not signed.
    #[error("SAML {0} is not signed")]
    MissingSignature(SignedPart),

    /// Signature does not conform to the SAML signature profile.
    #[error("SAML {part} signature does not conform to the signature profile: {reason}")]
    SignatureProfileViolation { part: SignedPart, reason: String },

    #[error("SAML {part} signature validation failed: {reason}")]
    SignatureInvalid { part: SignedPart, reason: String },

    #[error("no trust anchor available for tenant {tenant}: {reason}")]
    TrustAnchorUnavailable { tenant: String, reason: String },

    #[error("failed to decrypt SAML assertion: {0}")]
    DecryptionFailed(String),
}

/// Which signed element a signature error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedPart {
    Response,
    Assertion,
}

impl std::fmt::Display for SignedPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignedPart::Response => write!(f, "response"),
            SignedPart::Assertion => write!(f, "assertion"),
        }
    }
}

/// Stable, data-free classification of a [`ValidationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DecodeError,
    UnsuccessfulStatus,
    MissingSubject,
    AssertionNotYetValid,
    AssertionExpired,
    MalformedValidityWindow,
    AudienceMismatch,
    NoAudienceRestriction,
    MissingSignature,
    SignatureProfileViolation,
    SignatureInvalid,
    TrustAnchorUnavailable,
    DecryptionFailed,
}

impl ErrorKind {
    /// Snake-case code for logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DecodeError => "decode_error",
            ErrorKind::UnsuccessfulStatus => "unsuccessful_status",
            ErrorKind::MissingSubject => "missing_subject",
            ErrorKind::AssertionNotYetValid => "assertion_not_yet_valid",
            ErrorKind::AssertionExpired => "assertion_expired",
            ErrorKind::MalformedValidityWindow => "malformed_validity_window",
            ErrorKind::AudienceMismatch => "audience_mismatch",
            ErrorKind::NoAudienceRestriction => "no_audience_restriction",
            ErrorKind::MissingSignature => "missing_signature",
            ErrorKind::SignatureProfileViolation => "signature_profile_violation",
            ErrorKind::SignatureInvalid => "signature_invalid",
            ErrorKind::TrustAnchorUnavailable => "trust_anchor_unavailable",
            ErrorKind::DecryptionFailed => "decryption_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::Decode(_) => ErrorKind::DecodeError,
            ValidationError::UnsuccessfulStatus(_) => ErrorKind::UnsuccessfulStatus,
            ValidationError::MissingSubject => ErrorKind::MissingSubject,
            ValidationError::AssertionNotYetValid => ErrorKind::AssertionNotYetValid,
            ValidationError::AssertionExpired => ErrorKind::AssertionExpired,
            ValidationError::MalformedValidityWindow => ErrorKind::MalformedValidityWindow,
            ValidationError::AudienceMismatch => ErrorKind::AudienceMismatch,
            ValidationError::NoAudienceRestriction => ErrorKind::NoAudienceRestriction,
            ValidationError::MissingSignature(_) => ErrorKind::MissingSignature,
            ValidationError::SignatureProfileViolation { .. } => {
                ErrorKind::SignatureProfileViolation
            }
            ValidationError::SignatureInvalid { .. } => ErrorKind::SignatureInvalid,
            ValidationError::TrustAnchorUnavailable { .. } => ErrorKind::TrustAnchorUnavailable,
            ValidationError::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
        }
    }

    /// True for errors that indicate an active attack pattern rather than
    /// a routine mismatch.
    pub fn is_security_event(&self) -> bool {
        matches!(self, ValidationError::SignatureProfileViolation { .. })
    }

    /// Message for the remote party. Identical for every kind.
    pub fn public_message(&self) -> &'static str {
        PUBLIC_FAILURE_MESSAGE
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        ValidationError::Decode(msg.into())
    }
}

/// Failure to resolve a tenant's trust anchor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustAnchorError {
    #[error("no trust anchor registered for tenant")]
    UnknownTenant,

    #[error("invalid trust anchor certificate: {0}")]
    InvalidCertificate(String),

    #[error("trust anchor lookup failed: {0}")]
    Lookup(String),
}

/// Cryptographic verification rejected the signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SignatureMismatch(pub String);

/// Encrypted assertion could not be decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DecryptionError(pub String);

/// Failure reported by the user-store collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("user store error: {0}")]
pub struct UserStoreError(pub String);

/// Reasons a login attempt fails after or around validation.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    UserStore(#[from] UserStoreError),
}

impl LoginError {
    pub fn public_message(&self) -> &'static str {
        PUBLIC_FAILURE_MESSAGE
    }
}
