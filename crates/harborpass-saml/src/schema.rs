//! Structural protocol-schema checks
//!
//! Applied when `security.want_xml_validation` is on. The full OASIS XSDs
//! are not evaluated here; this enforces the protocol-schema subset the
//! validators rely on — namespaces, Version="2.0", required identifiers and
//! children — so malformed messages fail with a schema error rather than a
//! confusing downstream one.

use harborpass_xmlsec::Document;

use crate::clock::parse_instant;
use crate::constants::{NS_ASSERTION, NS_PROTOCOL};
use crate::error::{ErrorKind, SamlError, SamlResult};

/// Validate the structure of a `<samlp:Response>` document
pub fn validate_response_structure(doc: &Document) -> SamlResult<()> {
    let root = doc.root();
    check_protocol_namespace(doc, root)?;
    check_message_header(doc, root, "Response")?;

    let status = doc.find_child(root, NS_PROTOCOL, "Status").ok_or_else(|| {
        SamlError::new(ErrorKind::SchemaViolation, "Response has no Status")
    })?;
    let status_code = doc
        .find_child(status, NS_PROTOCOL, "StatusCode")
        .ok_or_else(|| {
            SamlError::new(ErrorKind::SchemaViolation, "Status has no StatusCode")
        })?;
    if doc.attribute(status_code, "Value").is_none() {
        return Err(SamlError::new(
            ErrorKind::SchemaViolation,
            "StatusCode has no Value",
        ));
    }

    for assertion in doc.find_children(root, NS_ASSERTION, "Assertion") {
        check_assertion_structure(doc, assertion)?;
    }
    Ok(())
}

/// Validate the structure of an inbound logout message
pub fn validate_logout_structure(doc: &Document, local_name: &str) -> SamlResult<()> {
    let root = doc.root();
    check_protocol_namespace(doc, root)?;
    check_message_header(doc, root, local_name)
}

fn check_protocol_namespace(doc: &Document, root: harborpass_xmlsec::NodeId) -> SamlResult<()> {
    match doc.element_namespace(root) {
        Some(NS_PROTOCOL) => Ok(()),
        other => Err(SamlError::new(
            ErrorKind::InvalidXmlNamespace,
            format!(
                "document element is in namespace {:?}, expected {}",
                other, NS_PROTOCOL
            ),
        )),
    }
}

fn check_message_header(
    doc: &Document,
    node: harborpass_xmlsec::NodeId,
    local_name: &str,
) -> SamlResult<()> {
    if doc.element(node).map(|e| e.name.local.as_str()) != Some(local_name) {
        return Err(SamlError::new(
            ErrorKind::SchemaViolation,
            format!("document element is not a {}", local_name),
        ));
    }
    if doc.attribute(node, "Version") != Some("2.0") {
        return Err(SamlError::new(
            ErrorKind::SchemaViolation,
            format!("{} Version is not 2.0", local_name),
        ));
    }
    if doc.attribute(node, "ID").map_or(true, str::is_empty) {
        return Err(SamlError::new(
            ErrorKind::SchemaViolation,
            format!("{} has no ID", local_name),
        ));
    }
    match doc.attribute(node, "IssueInstant") {
        Some(value) => {
            parse_instant(value)?;
        }
        None => {
            return Err(SamlError::new(
                ErrorKind::SchemaViolation,
                format!("{} has no IssueInstant", local_name),
            ))
        }
    }
    Ok(())
}

fn check_assertion_structure(
    doc: &Document,
    assertion: harborpass_xmlsec::NodeId,
) -> SamlResult<()> {
    if doc.attribute(assertion, "Version") != Some("2.0") {
        return Err(SamlError::new(
            ErrorKind::SchemaViolation,
            "Assertion Version is not 2.0",
        ));
    }
    if doc.attribute(assertion, "ID").map_or(true, str::is_empty) {
        return Err(SamlError::new(
            ErrorKind::SchemaViolation,
            "Assertion has no ID",
        ));
    }
    if doc.find_child(assertion, NS_ASSERTION, "Issuer").is_none() {
        return Err(SamlError::new(
            ErrorKind::SchemaViolation,
            "Assertion has no Issuer",
        ));
    }
    Ok(())
}
