//! Embedded (enveloped) XML Digital Signatures
//!
//! Signing produces a `ds:Signature` child of the target element: the
//! reference digest covers the exclusive canonicalization of the element
//! with the signature removed, and the RSA signature covers the
//! canonicalized `SignedInfo`. Verification enforces the strict profile the
//! SAML validators rely on: exactly one `Reference`, a same-document `#ID`
//! URI resolving to the element being verified, only the
//! enveloped-signature and exclusive-C14N transforms, and the
//! deprecated-algorithm policy.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use subtle::ConstantTimeEq;

use crate::algorithms::{
    DigestAlgorithm, SignatureAlgorithm, C14N_EXCLUSIVE, C14N_EXCLUSIVE_WITH_COMMENTS,
    TRANSFORM_ENVELOPED, XMLDSIG_NS,
};
use crate::c14n::canonicalize;
use crate::certs::Certificate;
use crate::dom::{Document, NodeId};
use crate::error::{XmlSecError, XmlSecResult};
use crate::keys::{verify_signature, PrivateKey};

/// Key material candidates for signature verification
#[derive(Debug)]
pub struct VerificationKeys<'a> {
    /// Configured certificates; any one of them validating is a pass
    pub certificates: &'a [Certificate],
    /// Fingerprint fallback used when no full certificate is configured:
    /// the certificate embedded in the signature is accepted iff its
    /// fingerprint matches one of these entries
    pub fingerprints: &'a [(String, DigestAlgorithm)],
}

/// Verification policy knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct SignaturePolicy {
    /// Reject SHA1-based signatures and digests
    pub reject_deprecated: bool,
}

/// Find the `ds:Signature` that is a direct child of an element
pub fn find_signature(doc: &Document, element: NodeId) -> Option<NodeId> {
    doc.find_child(element, XMLDSIG_NS, "Signature")
}

/// Verify the enveloped signature that is a direct child of `apex`.
///
/// The `Reference` must resolve, through a document-unique `ID`, to `apex`
/// itself; anything else is treated as a wrapping attempt.
pub fn verify_enveloped(
    doc: &Document,
    apex: NodeId,
    keys: &VerificationKeys<'_>,
    policy: &SignaturePolicy,
) -> XmlSecResult<()> {
    let signature = find_signature(doc, apex)
        .ok_or_else(|| XmlSecError::MissingElement("Signature".to_string()))?;
    let signed_info = doc
        .find_child(signature, XMLDSIG_NS, "SignedInfo")
        .ok_or_else(|| XmlSecError::MissingElement("SignedInfo".to_string()))?;

    let c14n_uri = required_algorithm(doc, signed_info, "CanonicalizationMethod")?;
    let signed_info_comments = match c14n_uri.as_str() {
        C14N_EXCLUSIVE => false,
        C14N_EXCLUSIVE_WITH_COMMENTS => true,
        other => return Err(XmlSecError::UnsupportedAlgorithm(other.to_string())),
    };

    let signature_algorithm =
        SignatureAlgorithm::from_uri(&required_algorithm(doc, signed_info, "SignatureMethod")?)?;
    if policy.reject_deprecated && signature_algorithm.is_deprecated() {
        return Err(XmlSecError::DeprecatedAlgorithm(
            signature_algorithm.uri().to_string(),
        ));
    }

    let references = doc.find_children(signed_info, XMLDSIG_NS, "Reference");
    let reference = match references.as_slice() {
        [] => return Err(XmlSecError::MissingReference),
        [reference] => *reference,
        _ => {
            return Err(XmlSecError::InvalidReference(
                "more than one Reference".to_string(),
            ))
        }
    };

    let uri = doc
        .attribute(reference, "URI")
        .ok_or_else(|| XmlSecError::MissingAttribute("Reference/@URI".to_string()))?;
    let target_id = uri.strip_prefix('#').ok_or_else(|| {
        XmlSecError::InvalidReference(format!("not a same-document reference: {}", uri))
    })?;
    let ids = doc.ids()?;
    let target = ids
        .get(target_id)
        .copied()
        .ok_or_else(|| XmlSecError::InvalidReference(format!("unresolved ID: {}", target_id)))?;
    if target != apex {
        return Err(XmlSecError::InvalidReference(
            "reference does not cover the signed element".to_string(),
        ));
    }

    let mut digest_comments = false;
    if let Some(transforms) = doc.find_child(reference, XMLDSIG_NS, "Transforms") {
        let mut saw_enveloped = false;
        for transform in doc.find_children(transforms, XMLDSIG_NS, "Transform") {
            let algorithm = doc
                .attribute(transform, "Algorithm")
                .ok_or_else(|| XmlSecError::MissingAttribute("Transform/@Algorithm".to_string()))?;
            match algorithm {
                TRANSFORM_ENVELOPED => saw_enveloped = true,
                C14N_EXCLUSIVE => digest_comments = false,
                C14N_EXCLUSIVE_WITH_COMMENTS => digest_comments = true,
                other => return Err(XmlSecError::UnexpectedTransform(other.to_string())),
            }
        }
        if !saw_enveloped {
            return Err(XmlSecError::UnexpectedTransform(
                "enveloped-signature transform absent".to_string(),
            ));
        }
    } else {
        return Err(XmlSecError::UnexpectedTransform(
            "enveloped-signature transform absent".to_string(),
        ));
    }

    let digest_algorithm =
        DigestAlgorithm::from_uri(&required_algorithm(doc, reference, "DigestMethod")?)?;
    if policy.reject_deprecated && digest_algorithm.is_deprecated() {
        return Err(XmlSecError::DeprecatedAlgorithm(
            digest_algorithm.uri().to_string(),
        ));
    }

    let digest_value = doc
        .find_child(reference, XMLDSIG_NS, "DigestValue")
        .map(|n| doc.text(n))
        .ok_or_else(|| XmlSecError::MissingElement("DigestValue".to_string()))?;
    let expected_digest = decode_base64(&digest_value)?;

    let canonical = canonicalize(doc, apex, digest_comments, Some(signature));
    let computed_digest = digest_algorithm.digest(canonical.as_bytes());
    if !bool::from(computed_digest.ct_eq(&expected_digest)) {
        return Err(XmlSecError::DigestMismatch);
    }

    let signature_value = doc
        .find_child(signature, XMLDSIG_NS, "SignatureValue")
        .map(|n| doc.text(n))
        .ok_or_else(|| XmlSecError::MissingElement("SignatureValue".to_string()))?;
    let signature_bytes = decode_base64(&signature_value)?;

    let signed_info_canonical = canonicalize(doc, signed_info, signed_info_comments, None);

    let candidates = candidate_keys(doc, signature, keys)?;
    for key in &candidates {
        if verify_signature(
            key,
            signature_algorithm,
            signed_info_canonical.as_bytes(),
            &signature_bytes,
        ) {
            return Ok(());
        }
    }
    Err(XmlSecError::SignatureMismatch)
}

fn candidate_keys(
    doc: &Document,
    signature: NodeId,
    keys: &VerificationKeys<'_>,
) -> XmlSecResult<Vec<rsa::RsaPublicKey>> {
    if !keys.certificates.is_empty() {
        return Ok(keys
            .certificates
            .iter()
            .map(|c| c.public_key().clone())
            .collect());
    }
    if keys.fingerprints.is_empty() {
        return Err(XmlSecError::NoMatchingCertificate);
    }
    let embedded = embedded_certificate(doc, signature)?
        .ok_or(XmlSecError::NoMatchingCertificate)?;
    let matched = keys
        .fingerprints
        .iter()
        .any(|(expected, algorithm)| embedded.matches_fingerprint(expected, *algorithm));
    if !matched {
        tracing::warn!("embedded certificate matches no configured fingerprint");
        return Err(XmlSecError::NoMatchingCertificate);
    }
    Ok(vec![embedded.public_key().clone()])
}

/// The certificate embedded in a signature's `KeyInfo`, if any
pub fn embedded_certificate(
    doc: &Document,
    signature: NodeId,
) -> XmlSecResult<Option<Certificate>> {
    let nodes = doc.find_descendants(signature, XMLDSIG_NS, "X509Certificate");
    match nodes.first() {
        Some(&node) => Certificate::from_base64(&doc.text(node)).map(Some),
        None => Ok(None),
    }
}

fn required_algorithm(doc: &Document, parent: NodeId, child: &str) -> XmlSecResult<String> {
    let node = doc
        .find_child(parent, XMLDSIG_NS, child)
        .ok_or_else(|| XmlSecError::MissingElement(child.to_string()))?;
    doc.attribute(node, "Algorithm")
        .map(str::to_string)
        .ok_or_else(|| XmlSecError::MissingAttribute(format!("{}/@Algorithm", child)))
}

fn decode_base64(value: &str) -> XmlSecResult<Vec<u8>> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(STANDARD.decode(compact.as_bytes())?)
}

/// Sign `apex` in place with an enveloped signature.
///
/// The element must carry an `ID` attribute. The signature is inserted as a
/// child at `insert_index` (SAML messages place it directly after `Issuer`).
pub fn sign_enveloped(
    doc: &mut Document,
    apex: NodeId,
    key: &PrivateKey,
    certificate: Option<&Certificate>,
    signature_algorithm: SignatureAlgorithm,
    digest_algorithm: DigestAlgorithm,
    insert_index: usize,
) -> XmlSecResult<()> {
    let id = doc
        .attribute(apex, "ID")
        .ok_or_else(|| XmlSecError::MissingAttribute("ID".to_string()))?
        .to_string();

    let canonical = canonicalize(doc, apex, false, None);
    let digest = STANDARD.encode(digest_algorithm.digest(canonical.as_bytes()));

    let key_info = match certificate.and_then(|c| c.der()) {
        Some(der) => format!(
            "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>",
            STANDARD.encode(der)
        ),
        None => String::new(),
    };

    let template = format!(
        concat!(
            "<ds:Signature xmlns:ds=\"{ns}\">",
            "<ds:SignedInfo>",
            "<ds:CanonicalizationMethod Algorithm=\"{c14n}\"/>",
            "<ds:SignatureMethod Algorithm=\"{sig}\"/>",
            "<ds:Reference URI=\"#{id}\">",
            "<ds:Transforms>",
            "<ds:Transform Algorithm=\"{enveloped}\"/>",
            "<ds:Transform Algorithm=\"{c14n}\"/>",
            "</ds:Transforms>",
            "<ds:DigestMethod Algorithm=\"{digest_alg}\"/>",
            "<ds:DigestValue>{digest}</ds:DigestValue>",
            "</ds:Reference>",
            "</ds:SignedInfo>",
            "<ds:SignatureValue></ds:SignatureValue>",
            "{key_info}",
            "</ds:Signature>"
        ),
        ns = XMLDSIG_NS,
        c14n = C14N_EXCLUSIVE,
        sig = signature_algorithm.uri(),
        enveloped = TRANSFORM_ENVELOPED,
        id = id,
        digest_alg = digest_algorithm.uri(),
        digest = digest,
        key_info = key_info,
    );

    let mut signature_doc = Document::parse(&template)?;
    let signed_info = signature_doc
        .find_child(signature_doc.root(), XMLDSIG_NS, "SignedInfo")
        .ok_or_else(|| XmlSecError::MissingElement("SignedInfo".to_string()))?;
    let signed_info_canonical = canonicalize(&signature_doc, signed_info, false, None);
    let signature_value = key.sign(signature_algorithm, signed_info_canonical.as_bytes())?;
    let value_node = signature_doc
        .find_child(signature_doc.root(), XMLDSIG_NS, "SignatureValue")
        .ok_or_else(|| XmlSecError::MissingElement("SignatureValue".to_string()))?;
    signature_doc.set_text(value_node, STANDARD.encode(signature_value));

    doc.insert_subtree(apex, insert_index, &signature_doc, signature_doc.root());
    Ok(())
}
