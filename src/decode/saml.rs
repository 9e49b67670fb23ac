//! Mapping from the element tree to the SAML object model.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::tree::Element;
use crate::error::{ValidationError, ValidationResult};
use crate::model::{
    Assertion, Attribute, AttributeStatement, AttributeValue, AudienceRestriction, Conditions,
    EncryptedAssertion, IdIndex, Response, SamlDocument, SamlObject, SignatureBlock,
    SignatureReference, Status, Subject,
};

/// Local names of attributes that carry XML IDs in SAML and XML-DSig
/// documents. `id` also covers `xml:id`.
const ID_ATTRIBUTES: &[&str] = &["ID", "Id", "id", "AssertionID"];

pub fn to_document(root: &Element, source: &str) -> ValidationResult<SamlDocument> {
    let object = match root.name.as_str() {
        "Response" => SamlObject::Response(response(root, source)?),
        "Assertion" => SamlObject::Assertion(assertion(root, source, true)?),
        other => {
            return Err(ValidationError::decode(format!(
                "only Response and Assertion objects are accepted, got <{}>",
                other
            )))
        }
    };

    Ok(SamlDocument {
        root: object,
        ids: index_ids(root),
        source: Arc::from(source),
    })
}

fn index_ids(root: &Element) -> IdIndex {
    let mut ids = IdIndex::default();
    root.walk(&mut |element| {
        for value in element.attrs_with_local(ID_ATTRIBUTES) {
            ids.record(value);
        }
    });
    ids
}

fn response(el: &Element, source: &str) -> ValidationResult<Response> {
    let status = el.child("Status").map(|s| Status {
        code: s
            .child("StatusCode")
            .and_then(|c| c.attr("Value"))
            .map(String::from),
        message: s.child("StatusMessage").and_then(Element::trimmed_text),
    });

    let assertions = el
        .children_named("Assertion")
        .map(|a| assertion(a, source, false))
        .collect::<ValidationResult<Vec<_>>>()?;

    let encrypted_assertions = el
        .children_named("EncryptedAssertion")
        .map(|e| EncryptedAssertion {
            raw_xml: source[e.outer.clone()].to_string(),
        })
        .collect();

    Ok(Response {
        id: el.attr_exact("ID").map(String::from),
        id_attribute_count: el.attrs_with_local(ID_ATTRIBUTES).count(),
        destination: el.attr("Destination").map(String::from),
        issuer: el.child("Issuer").and_then(Element::trimmed_text),
        status,
        signature: el.child("Signature").map(|s| signature(s, source)),
        signature_count: el.children_named("Signature").count(),
        assertions,
        encrypted_assertions,
    })
}

fn assertion(el: &Element, source: &str, is_document_root: bool) -> ValidationResult<Assertion> {
    let subject = el
        .child("Subject")
        .and_then(|s| s.child("NameID"))
        .map(|n| Subject {
            name_id: n.text.clone(),
            format: n.attr("Format").map(String::from),
        });

    let conditions = el.child("Conditions").map(parse_conditions).transpose()?;

    let attribute_statements = el
        .children_named("AttributeStatement")
        .map(|s| AttributeStatement {
            attributes: s
                .children_named("Attribute")
                .map(|a| attribute(a, source))
                .collect(),
        })
        .collect();

    Ok(Assertion {
        id: el.attr_exact("ID").map(String::from),
        id_attribute_count: el.attrs_with_local(ID_ATTRIBUTES).count(),
        issuer: el.child("Issuer").and_then(Element::trimmed_text),
        subject,
        conditions,
        attribute_statements,
        signature: el.child("Signature").map(|s| signature(s, source)),
        signature_count: el.children_named("Signature").count(),
        is_document_root,
    })
}

fn parse_conditions(el: &Element) -> ValidationResult<Conditions> {
    Ok(Conditions {
        not_before: el.attr("NotBefore").map(parse_instant).transpose()?,
        not_on_or_after: el.attr("NotOnOrAfter").map(parse_instant).transpose()?,
        audience_restrictions: el
            .children_named("AudienceRestriction")
            .map(|r| AudienceRestriction {
                audiences: r
                    .children_named("Audience")
                    .filter_map(Element::trimmed_text)
                    .collect(),
            })
            .collect(),
    })
}

fn parse_instant(value: &str) -> ValidationResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ValidationError::decode(format!("invalid timestamp '{}': {}", value, e)))
}

fn attribute(el: &Element, source: &str) -> Attribute {
    Attribute {
        name: el.attr("Name").unwrap_or_default().to_string(),
        values: el
            .children_named("AttributeValue")
            .map(|v| attribute_value(v, source))
            .collect(),
    }
}

fn attribute_value(el: &Element, source: &str) -> AttributeValue {
    let is_string = el
        .attr("type")
        .is_some_and(|t| t.rsplit(':').next() == Some("string"));

    if is_string {
        AttributeValue::String(el.text.clone())
    } else {
        AttributeValue::Structured(source[el.inner.clone()].to_string())
    }
}

fn signature(el: &Element, source: &str) -> SignatureBlock {
    let signed_info = el.child("SignedInfo");

    let references = signed_info
        .map(|si| {
            si.children_named("Reference")
                .map(|r| SignatureReference {
                    uri: r.attr("URI").map(String::from),
                    transforms: r
                        .child("Transforms")
                        .map(|t| {
                            t.children_named("Transform")
                                .filter_map(|x| x.attr("Algorithm").map(String::from))
                                .collect()
                        })
                        .unwrap_or_default(),
                    digest_method: r
                        .child("DigestMethod")
                        .and_then(|d| d.attr("Algorithm"))
                        .map(String::from),
                    digest_value: r.child("DigestValue").and_then(Element::trimmed_text),
                })
                .collect()
        })
        .unwrap_or_default();

    let embedded_certificate = el
        .child("KeyInfo")
        .and_then(|k| k.child("X509Data"))
        .and_then(|d| d.child("X509Certificate"))
        .and_then(Element::trimmed_text);

    SignatureBlock {
        canonicalization_method: signed_info
            .and_then(|si| si.child("CanonicalizationMethod"))
            .and_then(|c| c.attr("Algorithm"))
            .map(String::from),
        signature_method: signed_info
            .and_then(|si| si.child("SignatureMethod"))
            .and_then(|m| m.attr("Algorithm"))
            .map(String::from),
        references,
        signature_value: el
            .child("SignatureValue")
            .and_then(Element::trimmed_text)
            .unwrap_or_default(),
        signed_info_xml: signed_info
            .map(|si| source[si.outer.clone()].to_string())
            .unwrap_or_default(),
        embedded_certificate,
    }
}
