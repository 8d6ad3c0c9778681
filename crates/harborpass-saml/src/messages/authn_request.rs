//! AuthnRequest builder

use crate::binding;
use crate::clock::{format_instant, Clock};
use crate::constants::{nameid_format, CM_BEARER, NS_ASSERTION, NS_PROTOCOL};
use crate::error::SamlResult;
use crate::messages::{escape_xml, generate_id};
use crate::settings::Settings;

/// Options for building an AuthnRequest
#[derive(Debug, Clone)]
pub struct AuthnRequestOptions {
    /// Ask the IdP to re-authenticate even with a live session
    pub force_authn: bool,
    /// Ask the IdP not to interact with the user
    pub is_passive: bool,
    /// Emit a `NameIDPolicy` element
    pub set_nameid_policy: bool,
    /// Request authentication for a specific subject
    pub name_id_value_req: Option<String>,
}

impl Default for AuthnRequestOptions {
    fn default() -> Self {
        Self {
            force_authn: false,
            is_passive: false,
            set_nameid_policy: true,
            name_id_value_req: None,
        }
    }
}

/// An outbound `<samlp:AuthnRequest>`
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    id: String,
    xml: String,
}

impl AuthnRequest {
    /// Build a request against the configured IdP SSO endpoint
    pub fn new(settings: &Settings, clock: &dyn Clock, options: &AuthnRequestOptions) -> Self {
        let id = generate_id();
        let issue_instant = format_instant(clock.now());
        let sp = settings.sp();
        let idp = settings.idp();
        let security = settings.security();

        let mut flags = String::new();
        if options.force_authn {
            flags.push_str(" ForceAuthn=\"true\"");
        }
        if options.is_passive {
            flags.push_str(" IsPassive=\"true\"");
        }

        let subject = match &options.name_id_value_req {
            Some(value) => format!(
                concat!(
                    "<saml:Subject>",
                    "<saml:NameID Format=\"{format}\">{value}</saml:NameID>",
                    "<saml:SubjectConfirmation Method=\"{bearer}\"/>",
                    "</saml:Subject>"
                ),
                format = escape_xml(&sp.name_id_format),
                value = escape_xml(value),
                bearer = CM_BEARER,
            ),
            None => String::new(),
        };

        let nameid_policy = if options.set_nameid_policy {
            // an encrypted-format SP still asks the IdP for persistent ids
            let format = if sp.name_id_format == nameid_format::ENCRYPTED {
                nameid_format::PERSISTENT
            } else {
                &sp.name_id_format
            };
            format!(
                "<samlp:NameIDPolicy Format=\"{}\" AllowCreate=\"true\"/>",
                escape_xml(format)
            )
        } else {
            String::new()
        };

        let requested_authn_context = if security.requested_authn_context.is_empty() {
            String::new()
        } else {
            let refs: String = security
                .requested_authn_context
                .iter()
                .map(|class_ref| {
                    format!(
                        "<saml:AuthnContextClassRef>{}</saml:AuthnContextClassRef>",
                        escape_xml(class_ref)
                    )
                })
                .collect();
            format!(
                "<samlp:RequestedAuthnContext Comparison=\"{}\">{}</samlp:RequestedAuthnContext>",
                escape_xml(&security.requested_authn_context_comparison),
                refs
            )
        };

        let xml = format!(
            concat!(
                "<samlp:AuthnRequest xmlns:samlp=\"{ns_protocol}\" xmlns:saml=\"{ns_assertion}\"",
                " ID=\"{id}\" Version=\"2.0\" IssueInstant=\"{instant}\"",
                " Destination=\"{destination}\"",
                " ProtocolBinding=\"{protocol_binding}\"",
                " AssertionConsumerServiceURL=\"{acs_url}\"{flags}>",
                "<saml:Issuer>{issuer}</saml:Issuer>",
                "{subject}",
                "{nameid_policy}",
                "{requested_authn_context}",
                "</samlp:AuthnRequest>"
            ),
            ns_protocol = NS_PROTOCOL,
            ns_assertion = NS_ASSERTION,
            id = id,
            instant = issue_instant,
            destination = escape_xml(&idp.sso_url),
            protocol_binding = sp.acs_binding.urn(),
            acs_url = escape_xml(&sp.acs_url),
            flags = flags,
            issuer = escape_xml(&sp.entity_id),
            subject = subject,
            nameid_policy = nameid_policy,
            requested_authn_context = requested_authn_context,
        );

        Self { id, xml }
    }

    /// The request ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The raw XML
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Redirect-binding form: raw DEFLATE + base64 when `deflate`, plain
    /// base64 otherwise
    pub fn encoded(&self, deflate: bool) -> SamlResult<String> {
        if deflate {
            binding::deflate_encode(&self.xml)
        } else {
            Ok(binding::base64_encode(&self.xml))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::test_support::test_settings;
    use harborpass_xmlsec::Document;

    #[test]
    fn test_basic_request_shape() {
        let settings = test_settings(|_| {});
        let request = AuthnRequest::new(&settings, &SystemClock, &AuthnRequestOptions::default());

        let doc = Document::parse(request.xml()).unwrap();
        let root = doc.root();
        assert!(doc.is_named(root, NS_PROTOCOL, "AuthnRequest"));
        assert_eq!(doc.attribute(root, "ID"), Some(request.id()));
        assert_eq!(doc.attribute(root, "Version"), Some("2.0"));
        assert_eq!(
            doc.attribute(root, "Destination"),
            Some("https://idp.example/sso")
        );
        assert_eq!(
            doc.attribute(root, "AssertionConsumerServiceURL"),
            Some("https://sp.example/acs")
        );
        assert_eq!(doc.attribute(root, "ForceAuthn"), None);

        let issuer = doc.find_child(root, NS_ASSERTION, "Issuer").unwrap();
        assert_eq!(doc.text(issuer), "https://sp.example/meta");

        let policy = doc.find_child(root, NS_PROTOCOL, "NameIDPolicy").unwrap();
        assert_eq!(doc.attribute(policy, "AllowCreate"), Some("true"));
    }

    #[test]
    fn test_force_authn_and_passive_flags() {
        let settings = test_settings(|_| {});
        let options = AuthnRequestOptions {
            force_authn: true,
            is_passive: true,
            ..Default::default()
        };
        let request = AuthnRequest::new(&settings, &SystemClock, &options);
        let doc = Document::parse(request.xml()).unwrap();
        assert_eq!(doc.attribute(doc.root(), "ForceAuthn"), Some("true"));
        assert_eq!(doc.attribute(doc.root(), "IsPassive"), Some("true"));
    }

    #[test]
    fn test_nameid_policy_omitted() {
        let settings = test_settings(|_| {});
        let options = AuthnRequestOptions {
            set_nameid_policy: false,
            ..Default::default()
        };
        let request = AuthnRequest::new(&settings, &SystemClock, &options);
        let doc = Document::parse(request.xml()).unwrap();
        assert!(doc.find_child(doc.root(), NS_PROTOCOL, "NameIDPolicy").is_none());
    }

    #[test]
    fn test_subject_for_requested_nameid() {
        let settings = test_settings(|_| {});
        let options = AuthnRequestOptions {
            name_id_value_req: Some("alice@example.com".to_string()),
            ..Default::default()
        };
        let request = AuthnRequest::new(&settings, &SystemClock, &options);
        let doc = Document::parse(request.xml()).unwrap();
        let subject = doc.find_child(doc.root(), NS_ASSERTION, "Subject").unwrap();
        let name_id = doc.find_child(subject, NS_ASSERTION, "NameID").unwrap();
        assert_eq!(doc.text(name_id), "alice@example.com");
    }

    #[test]
    fn test_requested_authn_context() {
        let settings = test_settings(|c| {
            c.security.requested_authn_context =
                vec![crate::constants::AC_PASSWORD_PROTECTED_TRANSPORT.to_string()];
        });
        let request = AuthnRequest::new(&settings, &SystemClock, &AuthnRequestOptions::default());
        let doc = Document::parse(request.xml()).unwrap();
        let context = doc
            .find_child(doc.root(), NS_PROTOCOL, "RequestedAuthnContext")
            .unwrap();
        assert_eq!(doc.attribute(context, "Comparison"), Some("exact"));
        let class_ref = doc
            .find_child(context, NS_ASSERTION, "AuthnContextClassRef")
            .unwrap();
        assert_eq!(
            doc.text(class_ref),
            crate::constants::AC_PASSWORD_PROTECTED_TRANSPORT
        );
    }

    #[test]
    fn test_redirect_encoding_round_trip() {
        let settings = test_settings(|_| {});
        let request = AuthnRequest::new(&settings, &SystemClock, &AuthnRequestOptions::default());
        let encoded = request.encoded(true).unwrap();
        let xml = crate::binding::redirect_decode(&encoded).unwrap();
        assert_eq!(xml, request.xml());
    }
}
