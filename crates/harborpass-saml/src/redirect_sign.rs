//! Redirect-binding query-string signatures
//!
//! The signed octet string is the exact concatenation
//! `SAMLRequest=E(payload)&RelayState=E(relay)&SigAlg=E(alg)` (the
//! RelayState clause omitted when absent); its order is contractual.
//! Verification reconstructs the string from the values as the sender
//! encoded them: either the raw query-string clauses
//! (`retrieveParametersFromServer`) or the parsed values re-encoded with the
//! configured percent-encoding flavor.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use harborpass_xmlsec::keys::verify_signature;
use harborpass_xmlsec::SignatureAlgorithm;

use crate::error::{ErrorKind, SamlError, SamlResult};
use crate::http::HttpRequest;
use crate::settings::Settings;

/// Which query parameter carries the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// `SAMLRequest`
    Request,
    /// `SAMLResponse`
    Response,
}

impl MessageType {
    /// The query parameter name
    pub fn param_name(&self) -> &'static str {
        match self {
            Self::Request => "SAMLRequest",
            Self::Response => "SAMLResponse",
        }
    }
}

/// Percent-encode a value, optionally lowercasing the hex digits
pub fn percent_encode(value: &str, lowercase: bool) -> String {
    let encoded = urlencoding::encode(value).into_owned();
    if lowercase {
        lowercase_hex(&encoded)
    } else {
        encoded
    }
}

fn lowercase_hex(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '%' {
            for _ in 0..2 {
                if let Some(h) = chars.next() {
                    out.push(h.to_ascii_lowercase());
                }
            }
        }
    }
    out
}

/// Build the octet string covered by the signature
pub fn build_signed_string(
    message_type: MessageType,
    payload: &str,
    relay_state: Option<&str>,
    sig_alg: &str,
    lowercase: bool,
) -> String {
    let mut signed = format!(
        "{}={}",
        message_type.param_name(),
        percent_encode(payload, lowercase)
    );
    if let Some(relay_state) = relay_state {
        signed.push_str("&RelayState=");
        signed.push_str(&percent_encode(relay_state, lowercase));
    }
    signed.push_str("&SigAlg=");
    signed.push_str(&percent_encode(sig_alg, lowercase));
    signed
}

/// Build the complete signed query string
/// (`...&SigAlg=...&Signature=...`) for a redirect
pub fn signed_query(
    message_type: MessageType,
    payload: &str,
    relay_state: Option<&str>,
    settings: &Settings,
) -> SamlResult<String> {
    let key = settings.sp_private_key().ok_or_else(|| {
        SamlError::new(
            ErrorKind::PrivateKeyNotFound,
            "message signing requested but no SP private key is configured",
        )
    })?;
    let algorithm = settings.signature_algorithm();
    let lowercase = settings.security().lowercase_url_encoding;
    let signed_string =
        build_signed_string(message_type, payload, relay_state, algorithm.uri(), lowercase);
    let signature = key.sign(algorithm, signed_string.as_bytes())?;
    Ok(format!(
        "{}&Signature={}",
        signed_string,
        percent_encode(&STANDARD.encode(signature), lowercase)
    ))
}

/// Build an unsigned query string for a redirect
pub fn unsigned_query(
    message_type: MessageType,
    payload: &str,
    relay_state: Option<&str>,
    lowercase: bool,
) -> String {
    let mut query = format!(
        "{}={}",
        message_type.param_name(),
        percent_encode(payload, lowercase)
    );
    if let Some(relay_state) = relay_state {
        query.push_str("&RelayState=");
        query.push_str(&percent_encode(relay_state, lowercase));
    }
    query
}

/// Verify the `Signature` parameter of a received redirect-binding message.
///
/// When `retrieve_from_server` is set the signed string is rebuilt from the
/// raw query-string clauses, preserving the sender's exact encoding;
/// otherwise the parsed values are re-encoded per
/// `security.lowercase_url_encoding`.
pub fn verify_query(
    request: &HttpRequest,
    message_type: MessageType,
    settings: &Settings,
    retrieve_from_server: bool,
) -> SamlResult<()> {
    let signature_param = request.param("Signature").ok_or_else(|| {
        SamlError::new(ErrorKind::NoSignedElement, "no Signature on the query string")
    })?;
    let signature = STANDARD.decode(signature_param).map_err(|e| {
        SamlError::new(ErrorKind::InvalidSignature, format!("signature is not base64: {}", e))
    })?;

    // SigAlg predates mandatory signing metadata; its absence means RSA-SHA1
    let sig_alg_uri = request
        .param("SigAlg")
        .unwrap_or_else(|| SignatureAlgorithm::RsaSha1.uri());
    let algorithm = SignatureAlgorithm::from_uri(sig_alg_uri)
        .map_err(|e| SamlError::new(ErrorKind::InvalidSignatureAlgorithm, e.to_string()))?;
    if settings.security().reject_deprecated_algorithm && algorithm.is_deprecated() {
        return Err(SamlError::new(
            ErrorKind::InvalidSignatureAlgorithm,
            format!("deprecated signature algorithm: {}", algorithm.uri()),
        ));
    }

    let signed_string = if retrieve_from_server {
        let mut signed = request
            .raw_clause(message_type.param_name())
            .ok_or_else(|| {
                SamlError::new(
                    ErrorKind::InvalidSignature,
                    format!("{} absent from raw query string", message_type.param_name()),
                )
            })?
            .to_string();
        if let Some(clause) = request.raw_clause("RelayState") {
            signed.push('&');
            signed.push_str(clause);
        }
        if let Some(clause) = request.raw_clause("SigAlg") {
            signed.push('&');
            signed.push_str(clause);
        }
        signed
    } else {
        let payload = request.param(message_type.param_name()).ok_or_else(|| {
            SamlError::new(
                ErrorKind::InvalidSignature,
                format!("{} parameter absent", message_type.param_name()),
            )
        })?;
        let lowercase = settings.security().lowercase_url_encoding;
        let mut signed = format!(
            "{}={}",
            message_type.param_name(),
            percent_encode(payload, lowercase)
        );
        if let Some(relay_state) = request.param("RelayState") {
            signed.push_str("&RelayState=");
            signed.push_str(&percent_encode(relay_state, lowercase));
        }
        if let Some(sig_alg) = request.param("SigAlg") {
            signed.push_str("&SigAlg=");
            signed.push_str(&percent_encode(sig_alg, lowercase));
        }
        signed
    };

    let certificates = settings.idp_certificates();
    if certificates.is_empty() {
        // fingerprints cannot help here: redirect signatures embed no certificate
        return Err(SamlError::new(
            ErrorKind::InvalidSignature,
            "no IdP certificate configured for redirect-binding verification",
        ));
    }
    for certificate in certificates {
        if verify_signature(
            certificate.public_key(),
            algorithm,
            signed_string.as_bytes(),
            &signature,
        ) {
            return Ok(());
        }
    }
    tracing::warn!("redirect-binding signature did not verify under any IdP certificate");
    Err(SamlError::new(
        ErrorKind::InvalidSignature,
        "query-string signature did not verify under any IdP certificate",
    ))
}
