//! LogoutResponse: outbound builder and inbound decoder/validator

use harborpass_xmlsec::Document;

use crate::binding;
use crate::clock::{format_instant, Clock};
use crate::constants::{NS_ASSERTION, NS_PROTOCOL, STATUS_SUCCESS};
use crate::error::{ErrorKind, SamlError, SamlResult};
use crate::messages::logout_request::urls_match;
use crate::messages::{escape_xml, generate_id};
use crate::settings::Settings;

/// An outbound `<samlp:LogoutResponse>` answering an IdP-initiated logout
#[derive(Debug, Clone)]
pub struct LogoutResponse {
    id: String,
    xml: String,
}

impl LogoutResponse {
    /// Build a Success response correlated to an inbound LogoutRequest
    pub fn new(
        settings: &Settings,
        clock: &dyn Clock,
        in_response_to: Option<&str>,
    ) -> SamlResult<Self> {
        let idp = settings.idp();
        let destination = idp
            .slo_response_url
            .as_deref()
            .or(idp.slo_url.as_deref())
            .ok_or_else(|| {
                SamlError::new(
                    ErrorKind::SingleLogoutNotSupported,
                    "the IdP has no Single Logout endpoint configured",
                )
            })?;

        let id = generate_id();
        let issue_instant = format_instant(clock.now());
        let in_response_to_attr = match in_response_to {
            Some(value) => format!(" InResponseTo=\"{}\"", escape_xml(value)),
            None => String::new(),
        };

        let xml = format!(
            concat!(
                "<samlp:LogoutResponse xmlns:samlp=\"{ns_protocol}\" xmlns:saml=\"{ns_assertion}\"",
                " ID=\"{id}\" Version=\"2.0\" IssueInstant=\"{instant}\"",
                " Destination=\"{destination}\"{in_response_to}>",
                "<saml:Issuer>{issuer}</saml:Issuer>",
                "<samlp:Status><samlp:StatusCode Value=\"{status}\"/></samlp:Status>",
                "</samlp:LogoutResponse>"
            ),
            ns_protocol = NS_PROTOCOL,
            ns_assertion = NS_ASSERTION,
            id = id,
            instant = issue_instant,
            destination = escape_xml(destination),
            in_response_to = in_response_to_attr,
            issuer = escape_xml(&settings.sp().entity_id),
            status = STATUS_SUCCESS,
        );

        Ok(Self { id, xml })
    }

    /// The response ID
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

/// An inbound, decoded `<samlp:LogoutResponse>` (SLO completion)
#[derive(Debug)]
pub struct ReceivedLogoutResponse {
    doc: Document,
    xml: String,
    id: Option<String>,
    issuer: Option<String>,
    destination: Option<String>,
    in_response_to: Option<String>,
    status_code: Option<String>,
    status_message: Option<String>,
}

impl ReceivedLogoutResponse {
    /// Decode a Redirect-binding `SAMLResponse` value and parse it
    pub fn decode(encoded: &str) -> SamlResult<Self> {
        let xml = binding::redirect_decode(encoded)?;
        let doc = Document::parse(&xml).map_err(SamlError::from)?;
        let root = doc.root();
        if !doc.is_named(root, NS_PROTOCOL, "LogoutResponse") {
            return Err(SamlError::new(
                ErrorKind::InvalidXml,
                "document element is not a samlp:LogoutResponse",
            ));
        }

        let status = doc.find_child(root, NS_PROTOCOL, "Status");
        let status_code = status
            .and_then(|s| doc.find_child(s, NS_PROTOCOL, "StatusCode"))
            .and_then(|c| doc.attribute(c, "Value").map(str::to_string));
        let status_message = status
            .and_then(|s| doc.find_child(s, NS_PROTOCOL, "StatusMessage"))
            .map(|m| doc.text(m));

        Ok(Self {
            id: doc.attribute(root, "ID").map(str::to_string),
            issuer: doc
                .find_child(root, NS_ASSERTION, "Issuer")
                .map(|n| doc.text(n)),
            destination: doc.attribute(root, "Destination").map(str::to_string),
            in_response_to: doc.attribute(root, "InResponseTo").map(str::to_string),
            status_code,
            status_message,
            xml,
            doc,
        })
    }

    /// Validate the response: status must be Success, and in strict mode the
    /// structure, issuer, destination and InResponseTo correlation must hold
    pub fn validate(&self, settings: &Settings, expected_request_id: Option<&str>) -> SamlResult<()> {
        if settings.is_strict() && settings.security().want_xml_validation {
            crate::schema::validate_logout_structure(&self.doc, "LogoutResponse")?;
        }

        match &self.status_code {
            Some(code) if code == STATUS_SUCCESS => {}
            Some(code) => {
                let detail = match &self.status_message {
                    Some(message) => format!("logout failed with status {}: {}", code, message),
                    None => format!("logout failed with status {}", code),
                };
                return Err(SamlError::new(ErrorKind::ResponseStatusError, detail));
            }
            None => {
                return Err(SamlError::new(
                    ErrorKind::ResponseStatusError,
                    "LogoutResponse carries no StatusCode",
                ))
            }
        }

        if !settings.is_strict() {
            return Ok(());
        }

        match &self.issuer {
            Some(issuer) if issuer == &settings.idp().entity_id => {}
            Some(issuer) => {
                return Err(SamlError::new(
                    ErrorKind::InvalidIssuer,
                    format!("unexpected LogoutResponse issuer: {}", issuer),
                ))
            }
            None => {
                return Err(SamlError::new(
                    ErrorKind::InvalidIssuer,
                    "LogoutResponse has no Issuer",
                ))
            }
        }

        if let Some(destination) = &self.destination {
            if !destination.is_empty() {
                let slo_url = settings.sp().slo_url.as_deref().unwrap_or_default();
                if !urls_match(destination, slo_url) {
                    return Err(SamlError::new(
                        ErrorKind::InvalidDestination,
                        format!(
                            "LogoutResponse destination {} does not match the SP SLO endpoint",
                            destination
                        ),
                    ));
                }
            }
        }

        if let (Some(expected), Some(actual)) = (expected_request_id, &self.in_response_to) {
            if expected != actual {
                return Err(SamlError::new(
                    ErrorKind::InvalidInResponseTo,
                    format!(
                        "LogoutResponse InResponseTo {} does not match the request {}",
                        actual, expected
                    ),
                ));
            }
        }

        Ok(())
    }

    /// The response ID
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The InResponseTo correlation value
    pub fn in_response_to(&self) -> Option<&str> {
        self.in_response_to.as_deref()
    }

    /// Top-level status code
    pub fn status_code(&self) -> Option<&str> {
        self.status_code.as_deref()
    }

    /// The decoded XML
    pub fn xml(&self) -> &str {
        &self.xml
    }
}
