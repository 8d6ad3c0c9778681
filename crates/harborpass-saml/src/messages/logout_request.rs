//! LogoutRequest: outbound builder and inbound decoder/validator

use chrono::{DateTime, Utc};

use harborpass_xmlsec::algorithms::XMLDSIG_NS;
use harborpass_xmlsec::dsig::{self, SignaturePolicy, VerificationKeys};
use harborpass_xmlsec::{encryption, Document};

use crate::binding;
use crate::clock::{format_instant, parse_instant, Clock};
use crate::constants::{nameid_format, NS_ASSERTION, NS_PROTOCOL};
use crate::error::{ErrorKind, SamlError, SamlResult};
use crate::messages::{escape_xml, generate_id};
use crate::settings::Settings;

/// Options for building a LogoutRequest
#[derive(Debug, Clone, Default)]
pub struct LogoutRequestOptions {
    /// Subject to log out; defaults to the SP entity ID in entity format
    pub name_id: Option<String>,
    /// NameID format override
    pub name_id_format: Option<String>,
    /// NameQualifier attribute
    pub name_id_name_qualifier: Option<String>,
    /// SPNameQualifier attribute
    pub name_id_sp_name_qualifier: Option<String>,
    /// Session indexes to terminate
    pub session_indexes: Vec<String>,
}

/// An outbound `<samlp:LogoutRequest>`
#[derive(Debug, Clone)]
pub struct LogoutRequest {
    id: String,
    xml: String,
}

impl LogoutRequest {
    /// Build a request against the configured IdP SLO endpoint
    pub fn new(
        settings: &Settings,
        clock: &dyn Clock,
        options: &LogoutRequestOptions,
    ) -> SamlResult<Self> {
        let idp = settings.idp();
        let sp = settings.sp();
        let destination = idp.slo_url.as_deref().ok_or_else(|| {
            SamlError::new(
                ErrorKind::SingleLogoutNotSupported,
                "the IdP has no Single Logout endpoint configured",
            )
        })?;

        let id = generate_id();
        let issue_instant = format_instant(clock.now());

        let (value, format) = match &options.name_id {
            Some(name_id) => {
                let format = options
                    .name_id_format
                    .clone()
                    .unwrap_or_else(|| sp.name_id_format.clone());
                (name_id.clone(), format)
            }
            // no session subject: identify ourselves
            None => (sp.entity_id.clone(), nameid_format::ENTITY.to_string()),
        };

        let encrypt = settings.security().want_name_id_encrypted
            || format == nameid_format::ENCRYPTED;

        let mut name_id_attrs = String::new();
        if !encrypt && format != nameid_format::UNSPECIFIED {
            name_id_attrs.push_str(&format!(" Format=\"{}\"", escape_xml(&format)));
        }
        if let Some(qualifier) = &options.name_id_name_qualifier {
            name_id_attrs.push_str(&format!(" NameQualifier=\"{}\"", escape_xml(qualifier)));
        }
        if let Some(qualifier) = &options.name_id_sp_name_qualifier {
            name_id_attrs.push_str(&format!(" SPNameQualifier=\"{}\"", escape_xml(qualifier)));
        }

        let name_id_xml = format!(
            "<saml:NameID xmlns:saml=\"{}\"{}>{}</saml:NameID>",
            NS_ASSERTION,
            name_id_attrs,
            escape_xml(&value)
        );

        let subject_xml = if encrypt {
            let certificate = settings.idp_certificates().first().ok_or_else(|| {
                SamlError::new(
                    ErrorKind::EncryptionError,
                    "NameID encryption requires an IdP certificate",
                )
            })?;
            let encrypted =
                encryption::encrypt_element(name_id_xml.as_bytes(), certificate.public_key())?;
            format!("<saml:EncryptedID>{}</saml:EncryptedID>", encrypted)
        } else {
            name_id_xml
        };

        let session_indexes: String = options
            .session_indexes
            .iter()
            .map(|index| {
                format!(
                    "<samlp:SessionIndex>{}</samlp:SessionIndex>",
                    escape_xml(index)
                )
            })
            .collect();

        let xml = format!(
            concat!(
                "<samlp:LogoutRequest xmlns:samlp=\"{ns_protocol}\" xmlns:saml=\"{ns_assertion}\"",
                " ID=\"{id}\" Version=\"2.0\" IssueInstant=\"{instant}\"",
                " Destination=\"{destination}\">",
                "<saml:Issuer>{issuer}</saml:Issuer>",
                "{subject}",
                "{session_indexes}",
                "</samlp:LogoutRequest>"
            ),
            ns_protocol = NS_PROTOCOL,
            ns_assertion = NS_ASSERTION,
            id = id,
            instant = issue_instant,
            destination = escape_xml(destination),
            issuer = escape_xml(&sp.entity_id),
            subject = subject_xml,
            session_indexes = session_indexes,
        );

        Ok(Self { id, xml })
    }

    /// The request ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The raw XML
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Redirect-binding form
    pub fn encoded(&self, deflate: bool) -> SamlResult<String> {
        if deflate {
            binding::deflate_encode(&self.xml)
        } else {
            Ok(binding::base64_encode(&self.xml))
        }
    }
}

/// An inbound, decoded `<samlp:LogoutRequest>` (IdP-initiated SLO)
#[derive(Debug)]
pub struct ReceivedLogoutRequest {
    doc: Document,
    xml: String,
    id: Option<String>,
    issuer: Option<String>,
    destination: Option<String>,
    not_on_or_after: Option<DateTime<Utc>>,
    name_id: Option<String>,
    session_indexes: Vec<String>,
}

impl ReceivedLogoutRequest {
    /// Decode a Redirect-binding `SAMLRequest` value and parse it
    pub fn decode(settings: &Settings, encoded: &str) -> SamlResult<Self> {
        let xml = binding::redirect_decode(encoded)?;
        let doc = Document::parse(&xml).map_err(SamlError::from)?;
        let root = doc.root();
        if !doc.is_named(root, NS_PROTOCOL, "LogoutRequest") {
            return Err(SamlError::new(
                ErrorKind::InvalidXml,
                "document element is not a samlp:LogoutRequest",
            ));
        }

        let id = doc.attribute(root, "ID").map(str::to_string);
        let issuer = doc
            .find_child(root, NS_ASSERTION, "Issuer")
            .map(|n| doc.text(n));
        let destination = doc.attribute(root, "Destination").map(str::to_string);
        let not_on_or_after = match doc.attribute(root, "NotOnOrAfter") {
            Some(value) => Some(parse_instant(value)?),
            None => None,
        };

        let name_id = Self::extract_name_id(&doc, settings)?;

        let session_indexes = doc
            .find_children(root, NS_PROTOCOL, "SessionIndex")
            .into_iter()
            .map(|n| doc.text(n))
            .collect();

        Ok(Self {
            xml,
            id,
            issuer,
            destination,
            not_on_or_after,
            name_id,
            session_indexes,
            doc,
        })
    }

    fn extract_name_id(doc: &Document, settings: &Settings) -> SamlResult<Option<String>> {
        let root = doc.root();
        if let Some(name_id) = doc.find_child(root, NS_ASSERTION, "NameID") {
            return Ok(Some(doc.text(name_id)));
        }
        if let Some(encrypted_id) = doc.find_child(root, NS_ASSERTION, "EncryptedID") {
            let key = settings.sp_private_key().ok_or_else(|| {
                SamlError::new(
                    ErrorKind::DecryptionError,
                    "encrypted NameID received but no SP private key is configured",
                )
            })?;
            let encrypted_data = encryption::find_encrypted_data(doc, encrypted_id)?;
            let plaintext = encryption::decrypt_to_string(
                doc,
                encrypted_data,
                key,
                settings.security().reject_deprecated_algorithm,
            )?;
            let fragment = Document::parse(&plaintext).map_err(SamlError::from)?;
            if !fragment.is_named(fragment.root(), NS_ASSERTION, "NameID") {
                return Err(SamlError::new(
                    ErrorKind::DecryptionError,
                    "decrypted EncryptedID payload is not a NameID",
                ));
            }
            return Ok(Some(fragment.text(fragment.root())));
        }
        Ok(None)
    }

    /// Validate the request per the configured policy.
    ///
    /// Environment checks (destination, issuer, expiry, NameID presence) run
    /// in strict mode only; non-strict deployments still get the signature
    /// check on the query string, which lives with the orchestrator.
    pub fn validate(&self, settings: &Settings, clock: &dyn Clock) -> SamlResult<()> {
        if !settings.is_strict() {
            return Ok(());
        }

        if settings.security().want_xml_validation {
            crate::schema::validate_logout_structure(&self.doc, "LogoutRequest")?;
        }

        if self.id.is_none() {
            return Err(SamlError::new(
                ErrorKind::SchemaViolation,
                "LogoutRequest has no ID",
            ));
        }

        if let Some(destination) = &self.destination {
            if !destination.is_empty() {
                let slo_url = settings.sp().slo_url.as_deref().unwrap_or_default();
                if !urls_match(destination, slo_url) {
                    return Err(SamlError::new(
                        ErrorKind::InvalidDestination,
                        format!(
                            "LogoutRequest destination {} does not match the SP SLO endpoint",
                            destination
                        ),
                    ));
                }
            }
        }

        match &self.issuer {
            Some(issuer) if issuer == &settings.idp().entity_id => {}
            Some(issuer) => {
                return Err(SamlError::new(
                    ErrorKind::InvalidIssuer,
                    format!("unexpected LogoutRequest issuer: {}", issuer),
                ))
            }
            None => {
                return Err(SamlError::new(
                    ErrorKind::InvalidIssuer,
                    "LogoutRequest has no Issuer",
                ))
            }
        }

        if let Some(not_on_or_after) = self.not_on_or_after {
            let deadline = not_on_or_after + settings.allowed_clock_drift();
            if clock.now() >= deadline {
                return Err(SamlError::new(
                    ErrorKind::AssertionExpired,
                    "LogoutRequest is no longer valid",
                ));
            }
        }

        if self.name_id.as_deref().unwrap_or("").is_empty() {
            return Err(SamlError::new(
                ErrorKind::InvalidNameId,
                "LogoutRequest carries no NameID",
            ));
        }

        Ok(())
    }

    /// Verify an embedded (POST-binding) signature on the request. The
    /// Redirect binding signs the query string instead; that check lives
    /// with the orchestrator.
    pub fn validate_embedded_signature(&self, settings: &Settings) -> SamlResult<()> {
        if dsig::find_signature(&self.doc, self.doc.root()).is_none() {
            return Err(SamlError::new(
                ErrorKind::NoSignedElement,
                "LogoutRequest carries no embedded signature",
            ));
        }
        let keys = VerificationKeys {
            certificates: settings.idp_certificates(),
            fingerprints: settings.idp_fingerprints(),
        };
        let policy = SignaturePolicy {
            reject_deprecated: settings.security().reject_deprecated_algorithm,
        };
        dsig::verify_enveloped(&self.doc, self.doc.root(), &keys, &policy)?;
        Ok(())
    }

    /// The request ID
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The Issuer value
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// The subject being logged out (decrypted when it arrived encrypted)
    pub fn name_id(&self) -> Option<&str> {
        self.name_id.as_deref()
    }

    /// Session indexes named by the request
    pub fn session_indexes(&self) -> &[String] {
        &self.session_indexes
    }

    /// Request deadline
    pub fn not_on_or_after(&self) -> Option<DateTime<Utc>> {
        self.not_on_or_after
    }

    /// The decoded XML
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Whether the document carries an embedded signature element
    pub fn has_embedded_signature(&self) -> bool {
        self.doc
            .find_child(self.doc.root(), XMLDSIG_NS, "Signature")
            .is_some()
    }
}

/// Compare endpoint URLs, tolerating a trailing slash
pub(crate) fn urls_match(received: &str, expected: &str) -> bool {
    received.trim_end_matches('/') == expected.trim_end_matches('/')
}
