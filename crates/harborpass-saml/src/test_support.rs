//! Shared fixtures for unit tests

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;

use harborpass_xmlsec::{dsig, encryption, Certificate, Document, PrivateKey};

use crate::constants::{nameid_format, NS_ASSERTION, NS_PROTOCOL};
use crate::settings::{
    Binding, CompressionConfig, IdpConfig, SecurityConfig, Settings, SettingsConfig, SpConfig,
};

/// SP signing/decryption key, generated once per test binary
pub static SP_KEY: Lazy<PrivateKey> = Lazy::new(|| PrivateKey::generate(2048).unwrap());

/// IdP signing key; its public half doubles as the configured IdP certificate
pub static IDP_KEY: Lazy<PrivateKey> = Lazy::new(|| PrivateKey::generate(2048).unwrap());

/// A minimal valid configuration tree
pub fn base_config() -> SettingsConfig {
    SettingsConfig {
        strict: true,
        sp: SpConfig {
            entity_id: "https://sp.example/meta".to_string(),
            acs_url: "https://sp.example/acs".to_string(),
            acs_binding: Binding::HttpPost,
            slo_url: Some("https://sp.example/slo".to_string()),
            slo_binding: Binding::HttpRedirect,
            name_id_format: nameid_format::UNSPECIFIED.to_string(),
            private_key: None,
            certificate: None,
            new_certificate: None,
        },
        idp: IdpConfig {
            entity_id: "https://idp.example/meta".to_string(),
            sso_url: "https://idp.example/sso".to_string(),
            sso_binding: Binding::HttpRedirect,
            slo_url: Some("https://idp.example/slo".to_string()),
            slo_binding: Binding::HttpRedirect,
            slo_response_url: None,
            x509certs: Vec::new(),
            cert_fingerprints: Vec::new(),
            cert_fingerprint_algorithm: "sha1".to_string(),
        },
        security: SecurityConfig::default(),
        compression: CompressionConfig::default(),
        contacts: Vec::new(),
        organization: None,
    }
}

/// Build frozen settings from a mutated [`base_config`], wiring the fixture
/// SP key and the IdP verification key
pub fn test_settings(mutate: impl FnOnce(&mut SettingsConfig)) -> Settings {
    let mut config = base_config();
    config.sp.private_key = Some(SP_KEY.to_pem().unwrap());
    mutate(&mut config);
    Settings::new(config)
        .unwrap()
        .with_idp_certificates(vec![Certificate::from_public_key(IDP_KEY.public_key())])
}

/// Knobs for fabricating an IdP response, all defaulted to the happy path
pub struct ResponseOptions {
    pub response_id: String,
    pub assertion_id: String,
    pub in_response_to: Option<String>,
    pub destination: Option<String>,
    pub issuer: String,
    pub audience: Option<String>,
    pub recipient: String,
    pub subject_not_on_or_after_secs: i64,
    pub conditions_not_before_secs: Option<i64>,
    pub conditions_not_on_or_after_secs: Option<i64>,
    pub session_index: Option<String>,
    pub session_not_on_or_after_secs: Option<i64>,
    pub name_id: String,
    pub attributes: Vec<(String, Option<String>, Vec<String>)>,
    pub status: String,
    pub sign_assertion: bool,
    pub sign_response: bool,
    pub encrypt_assertion: bool,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            response_id: "_r1".to_string(),
            assertion_id: "_a1".to_string(),
            in_response_to: None,
            destination: Some("https://sp.example/acs".to_string()),
            issuer: "https://idp.example/meta".to_string(),
            audience: Some("https://sp.example/meta".to_string()),
            recipient: "https://sp.example/acs".to_string(),
            subject_not_on_or_after_secs: 300,
            conditions_not_before_secs: Some(-300),
            conditions_not_on_or_after_secs: Some(300),
            session_index: Some("_s1".to_string()),
            session_not_on_or_after_secs: None,
            name_id: "alice@example".to_string(),
            attributes: vec![("uid".to_string(), None, vec!["alice".to_string()])],
            status: crate::constants::STATUS_SUCCESS.to_string(),
            sign_assertion: true,
            sign_response: false,
            encrypt_assertion: false,
        }
    }
}

/// Fabricate the XML of an IdP response at instant `now`, signing with
/// [`IDP_KEY`] and encrypting (when asked) to [`SP_KEY`]
pub fn build_response_xml(options: &ResponseOptions, now: DateTime<Utc>) -> String {
    let instant = crate::clock::format_instant(now);
    let fmt_offset =
        |secs: i64| crate::clock::format_instant(now + Duration::seconds(secs));

    let conditions = {
        let mut attrs = String::new();
        if let Some(secs) = options.conditions_not_before_secs {
            attrs.push_str(&format!(" NotBefore=\"{}\"", fmt_offset(secs)));
        }
        if let Some(secs) = options.conditions_not_on_or_after_secs {
            attrs.push_str(&format!(" NotOnOrAfter=\"{}\"", fmt_offset(secs)));
        }
        let audience = options
            .audience
            .as_ref()
            .map(|a| {
                format!(
                    "<saml:AudienceRestriction><saml:Audience>{}</saml:Audience></saml:AudienceRestriction>",
                    a
                )
            })
            .unwrap_or_default();
        format!("<saml:Conditions{}>{}</saml:Conditions>", attrs, audience)
    };

    let scd_irt = options
        .in_response_to
        .as_ref()
        .map(|v| format!(" InResponseTo=\"{}\"", v))
        .unwrap_or_default();
    let subject = format!(
        concat!(
            "<saml:Subject>",
            "<saml:NameID Format=\"{format}\">{name_id}</saml:NameID>",
            "<saml:SubjectConfirmation Method=\"{bearer}\">",
            "<saml:SubjectConfirmationData Recipient=\"{recipient}\" NotOnOrAfter=\"{nooa}\"{irt}/>",
            "</saml:SubjectConfirmation>",
            "</saml:Subject>"
        ),
        format = nameid_format::EMAIL_ADDRESS,
        name_id = options.name_id,
        bearer = crate::constants::CM_BEARER,
        recipient = options.recipient,
        nooa = fmt_offset(options.subject_not_on_or_after_secs),
        irt = scd_irt,
    );

    let authn_statement = {
        let index = options
            .session_index
            .as_ref()
            .map(|i| format!(" SessionIndex=\"{}\"", i))
            .unwrap_or_default();
        let session_nooa = options
            .session_not_on_or_after_secs
            .map(|secs| format!(" SessionNotOnOrAfter=\"{}\"", fmt_offset(secs)))
            .unwrap_or_default();
        format!(
            concat!(
                "<saml:AuthnStatement AuthnInstant=\"{instant}\"{index}{session_nooa}>",
                "<saml:AuthnContext><saml:AuthnContextClassRef>{class}</saml:AuthnContextClassRef></saml:AuthnContext>",
                "</saml:AuthnStatement>"
            ),
            instant = instant,
            index = index,
            session_nooa = session_nooa,
            class = crate::constants::AC_PASSWORD_PROTECTED_TRANSPORT,
        )
    };

    let attribute_statement = if options.attributes.is_empty() {
        String::new()
    } else {
        let attributes: String = options
            .attributes
            .iter()
            .map(|(name, friendly, values)| {
                let friendly_attr = friendly
                    .as_ref()
                    .map(|f| format!(" FriendlyName=\"{}\"", f))
                    .unwrap_or_default();
                let values: String = values
                    .iter()
                    .map(|v| format!("<saml:AttributeValue>{}</saml:AttributeValue>", v))
                    .collect();
                format!(
                    "<saml:Attribute Name=\"{}\"{}>{}</saml:Attribute>",
                    name, friendly_attr, values
                )
            })
            .collect();
        format!("<saml:AttributeStatement>{}</saml:AttributeStatement>", attributes)
    };

    let assertion_xml = format!(
        concat!(
            "<saml:Assertion xmlns:saml=\"{ns_assertion}\" ID=\"{id}\" Version=\"2.0\" IssueInstant=\"{instant}\">",
            "<saml:Issuer>{issuer}</saml:Issuer>",
            "{subject}",
            "{conditions}",
            "{authn_statement}",
            "{attribute_statement}",
            "</saml:Assertion>"
        ),
        ns_assertion = NS_ASSERTION,
        id = options.assertion_id,
        instant = instant,
        issuer = options.issuer,
        subject = subject,
        conditions = conditions,
        authn_statement = authn_statement,
        attribute_statement = attribute_statement,
    );

    let assertion_block = if options.encrypt_assertion {
        // sign the standalone assertion, then encrypt it to the SP key
        let signed_assertion = if options.sign_assertion {
            sign_fragment(&assertion_xml)
        } else {
            assertion_xml
        };
        let encrypted =
            encryption::encrypt_element(signed_assertion.as_bytes(), &SP_KEY.public_key())
                .unwrap();
        format!(
            "<saml:EncryptedAssertion xmlns:saml=\"{}\">{}</saml:EncryptedAssertion>",
            NS_ASSERTION, encrypted
        )
    } else if options.sign_assertion {
        sign_fragment(&assertion_xml)
    } else {
        assertion_xml
    };

    let destination = options
        .destination
        .as_ref()
        .map(|d| format!(" Destination=\"{}\"", d))
        .unwrap_or_default();
    let in_response_to = options
        .in_response_to
        .as_ref()
        .map(|v| format!(" InResponseTo=\"{}\"", v))
        .unwrap_or_default();

    let response_xml = format!(
        concat!(
            "<samlp:Response xmlns:samlp=\"{ns_protocol}\" xmlns:saml=\"{ns_assertion}\"",
            " ID=\"{id}\" Version=\"2.0\" IssueInstant=\"{instant}\"{destination}{in_response_to}>",
            "<saml:Issuer>{issuer}</saml:Issuer>",
            "<samlp:Status><samlp:StatusCode Value=\"{status}\"/></samlp:Status>",
            "{assertion}",
            "</samlp:Response>"
        ),
        ns_protocol = NS_PROTOCOL,
        ns_assertion = NS_ASSERTION,
        id = options.response_id,
        instant = instant,
        destination = destination,
        in_response_to = in_response_to,
        issuer = options.issuer,
        status = options.status,
        assertion = assertion_block,
    );

    if options.sign_response {
        sign_fragment(&response_xml)
    } else {
        response_xml
    }
}

/// Sign an XML fragment's document element with [`IDP_KEY`], placing the
/// signature after the Issuer child
fn sign_fragment(xml: &str) -> String {
    let mut doc = Document::parse(xml).unwrap();
    let root = doc.root();
    dsig::sign_enveloped(
        &mut doc,
        root,
        &IDP_KEY,
        None,
        harborpass_xmlsec::SignatureAlgorithm::RsaSha256,
        harborpass_xmlsec::DigestAlgorithm::Sha256,
        1,
    )
    .unwrap();
    doc.to_xml(doc.root())
}

/// Base64 a response for the POST binding
pub fn encode_response(xml: &str) -> String {
    crate::binding::base64_encode(xml)
}
