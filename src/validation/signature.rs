//! Enveloped signature verification for Responses and Assertions.
//!
//! Verification runs in two phases. The profile phase checks that the
//! signature covers exactly the element it is attached to, using the
//! document-wide ID index, so relocated or duplicated signed content is
//! rejected before any cryptography runs. The cryptographic phase resolves
//! the tenant trust anchor and hands the element to a [`SignatureValidator`].

use tracing::{debug, warn};

use crate::claims::LocatedAssertion;
use crate::config::ValidationConfig;
use crate::error::{SignatureMismatch, SignedPart, ValidationError, ValidationResult};
use crate::model::{Assertion, IdIndex, Response, SamlDocument, SamlObject, SignatureBlock};
use crate::trust::{Credential, TrustAnchorResolver};

pub const TRANSFORM_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

const ALLOWED_TRANSFORMS: &[&str] = &[
    TRANSFORM_ENVELOPED_SIGNATURE,
    EXC_C14N,
    EXC_C14N_WITH_COMMENTS,
];

const MAX_TRANSFORMS: usize = 2;

/// A signed element that passed the profile check.
#[derive(Debug, Clone, Copy)]
pub struct SignedElement<'a> {
    pub part: SignedPart,
    /// ID the single reference points at (unique in `document`).
    pub id: &'a str,
    pub signature: &'a SignatureBlock,
    /// XML source of the enclosing document.
    pub document: &'a str,
}

/// Cryptographic signature check against a trusted credential.
///
/// Implementations canonicalize the referenced element, compare the digest
/// and verify `SignatureValue` with the credential's public key.
pub trait SignatureValidator: Send + Sync {
    fn validate(
        &self,
        element: &SignedElement<'_>,
        credential: &Credential,
    ) -> Result<(), SignatureMismatch>;
}

/// The signed element as seen by the profile check.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileTarget<'a> {
    /// Unprefixed `ID` attribute.
    pub id: Option<&'a str>,
    /// ID-typed attributes on the element, prefixed or not.
    pub id_attribute_count: usize,
    /// Enveloped `Signature` children.
    pub signature_count: usize,
    pub is_document_root: bool,
}

impl<'a> ProfileTarget<'a> {
    pub fn response(response: &'a Response) -> Self {
        Self {
            id: response.id.as_deref(),
            id_attribute_count: response.id_attribute_count,
            signature_count: response.signature_count,
            is_document_root: true,
        }
    }

    pub fn assertion(assertion: &'a Assertion) -> Self {
        Self {
            id: assertion.id.as_deref(),
            id_attribute_count: assertion.id_attribute_count,
            signature_count: assertion.signature_count,
            is_document_root: assertion.is_document_root,
        }
    }
}

/// Check an enveloped signature against the SAML signature profile.
///
/// Returns the ID the signature covers.
pub fn check_signature_profile<'a>(
    part: SignedPart,
    target: &ProfileTarget<'a>,
    signature: &SignatureBlock,
    ids: &IdIndex,
) -> ValidationResult<&'a str> {
    profile_violation(target, signature, ids).map_err(|reason| {
        warn!(
            security_event = true,
            part = %part,
            element_id = target.id.unwrap_or(""),
            reason = %reason,
            "possible XML signature wrapping attack"
        );
        ValidationError::SignatureProfileViolation { part, reason }
    })
}

fn profile_violation<'a>(
    target: &ProfileTarget<'a>,
    signature: &SignatureBlock,
    ids: &IdIndex,
) -> Result<&'a str, String> {
    let id = match target.id {
        Some(id) if !id.is_empty() => id,
        _ => return Err("signed element has no ID".to_string()),
    };

    if target.id_attribute_count > 1 {
        return Err(format!(
            "signed element carries {} ID attributes",
            target.id_attribute_count
        ));
    }

    if target.signature_count > 1 {
        return Err(format!(
            "signed element carries {} enveloped signatures",
            target.signature_count
        ));
    }

    let occurrences = ids.occurrences(id);
    if occurrences != 1 {
        return Err(format!("ID '{}' occurs {} times in the document", id, occurrences));
    }

    let reference = match signature.references.as_slice() {
        [reference] => reference,
        refs => {
            return Err(format!(
                "expected exactly one Reference, found {}",
                refs.len()
            ))
        }
    };

    match reference.uri.as_deref() {
        Some(uri) if uri.strip_prefix('#') == Some(id) => {}
        None | Some("") if target.is_document_root => {}
        Some(uri) => {
            return Err(format!(
                "Reference URI '{}' does not point at the signed element '{}'",
                uri, id
            ))
        }
        None => return Err("Reference URI is empty on an embedded element".to_string()),
    }

    if reference.transforms.len() > MAX_TRANSFORMS {
        return Err(format!(
            "{} transforms exceed the allowed {}",
            reference.transforms.len(),
            MAX_TRANSFORMS
        ));
    }

    if let Some(t) = reference
        .transforms
        .iter()
        .find(|t| !ALLOWED_TRANSFORMS.contains(&t.as_str()))
    {
        return Err(format!("transform '{}' is not allowed", t));
    }

    match signature.canonicalization_method.as_deref() {
        Some(EXC_C14N) | Some(EXC_C14N_WITH_COMMENTS) => {}
        other => {
            return Err(format!(
                "canonicalization method '{}' is not exclusive C14N",
                other.unwrap_or("")
            ))
        }
    }

    Ok(id)
}

/// Response and assertion signature verification.
pub struct SignatureVerifier<'a> {
    resolver: &'a dyn TrustAnchorResolver,
    validator: &'a dyn SignatureValidator,
}

impl<'a> SignatureVerifier<'a> {
    pub fn new(resolver: &'a dyn TrustAnchorResolver, validator: &'a dyn SignatureValidator) -> Self {
        Self {
            resolver,
            validator,
        }
    }

    /// Verify the enabled signatures of `document` and the located assertion.
    ///
    /// Disabled checks pass. An enabled check on an unsigned element fails
    /// with [`ValidationError::MissingSignature`].
    pub fn verify(
        &self,
        document: &SamlDocument,
        located: &LocatedAssertion,
        subject_tenant: &str,
        config: &ValidationConfig,
    ) -> ValidationResult<()> {
        let mut signed = Vec::with_capacity(2);

        if let SamlObject::Response(response) = &document.root {
            if config.response_signature_required {
                let signature = response
                    .signature
                    .as_ref()
                    .ok_or(ValidationError::MissingSignature(SignedPart::Response))?;
                let id = check_signature_profile(
                    SignedPart::Response,
                    &ProfileTarget::response(response),
                    signature,
                    &document.ids,
                )?;
                signed.push(SignedElement {
                    part: SignedPart::Response,
                    id,
                    signature,
                    document: &document.source,
                });
            }
        }

        if config.assertion_signature_required {
            let assertion = &located.assertion;
            let signature = assertion
                .signature
                .as_ref()
                .ok_or(ValidationError::MissingSignature(SignedPart::Assertion))?;
            let id = check_signature_profile(
                SignedPart::Assertion,
                &ProfileTarget::assertion(assertion),
                signature,
                located.ids(document),
            )?;
            signed.push(SignedElement {
                part: SignedPart::Assertion,
                id,
                signature,
                document: located.source(document),
            });
        }

        if signed.is_empty() {
            debug!("Signature validation disabled");
            return Ok(());
        }

        let anchor_tenant = if config.verify_with_subject_tenant {
            subject_tenant
        } else {
            config.super_tenant_domain.as_str()
        };

        let anchor = self.resolver.resolve(anchor_tenant).map_err(|e| {
            ValidationError::TrustAnchorUnavailable {
                tenant: anchor_tenant.to_string(),
                reason: e.to_string(),
            }
        })?;

        for element in &signed {
            self.validator
                .validate(element, &anchor.credential)
                .map_err(|e| ValidationError::SignatureInvalid {
                    part: element.part,
                    reason: e.0,
                })?;
            debug!(
                part = %element.part,
                id = %element.id,
                tenant = %anchor.tenant_domain,
                "Signature verified"
            );
        }

        Ok(())
    }
}
