//! Shared fixtures for the end-to-end scenarios
#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;

use harborpass_saml::settings::{
    Binding, CompressionConfig, IdpConfig, SecurityConfig, SettingsConfig, SpConfig,
};
use harborpass_saml::{clock, Settings};
use harborpass_xmlsec::{dsig, Certificate, DigestAlgorithm, Document, PrivateKey,
    SignatureAlgorithm};

pub const SP_ENTITY: &str = "https://sp.example/meta";
pub const SP_ACS: &str = "https://sp.example/acs";
pub const SP_SLO: &str = "https://sp.example/slo";
pub const IDP_ENTITY: &str = "https://idp.example/meta";
pub const IDP_SSO: &str = "https://idp.example/sso";
pub const IDP_SLO: &str = "https://idp.example/slo";

pub static SP_KEY: Lazy<PrivateKey> = Lazy::new(|| PrivateKey::generate(2048).unwrap());
pub static IDP_KEY: Lazy<PrivateKey> = Lazy::new(|| PrivateKey::generate(2048).unwrap());

pub fn now() -> DateTime<Utc> {
    clock::parse_instant("2024-06-01T12:00:00Z").unwrap()
}

pub fn base_config() -> SettingsConfig {
    SettingsConfig {
        strict: true,
        sp: SpConfig {
            entity_id: SP_ENTITY.to_string(),
            acs_url: SP_ACS.to_string(),
            acs_binding: Binding::HttpPost,
            slo_url: Some(SP_SLO.to_string()),
            slo_binding: Binding::HttpRedirect,
            name_id_format: "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified".to_string(),
            private_key: Some(SP_KEY.to_pem().unwrap()),
            certificate: None,
            new_certificate: None,
        },
        idp: IdpConfig {
            entity_id: IDP_ENTITY.to_string(),
            sso_url: IDP_SSO.to_string(),
            sso_binding: Binding::HttpRedirect,
            slo_url: Some(IDP_SLO.to_string()),
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

/// Frozen settings with the fixture keys wired in
pub fn settings(mutate: impl FnOnce(&mut SettingsConfig)) -> Settings {
    let mut config = base_config();
    mutate(&mut config);
    Settings::new(config)
        .unwrap()
        .with_idp_certificates(vec![Certificate::from_public_key(IDP_KEY.public_key())])
}

/// Knobs for the fabricated IdP response
pub struct ResponseSpec {
    pub in_response_to: Option<String>,
    pub destination: String,
    pub issuer: String,
    pub audience: String,
    pub recipient: String,
    pub subject_expiry_secs: i64,
    pub conditions_expiry_secs: i64,
    pub session_index: String,
    pub name_id: String,
    pub attributes: Vec<(String, Vec<String>)>,
    pub sign_assertion: bool,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            in_response_to: None,
            destination: SP_ACS.to_string(),
            issuer: IDP_ENTITY.to_string(),
            audience: SP_ENTITY.to_string(),
            recipient: SP_ACS.to_string(),
            subject_expiry_secs: 300,
            conditions_expiry_secs: 300,
            session_index: "_s1".to_string(),
            name_id: "alice@example".to_string(),
            attributes: vec![("uid".to_string(), vec!["alice".to_string()])],
            sign_assertion: true,
        }
    }
}

/// Fabricate a response the way the fixture IdP would: RSA-SHA256 enveloped
/// signature on the assertion, placed after its Issuer
pub fn build_response(spec: &ResponseSpec, at: DateTime<Utc>) -> String {
    let instant = clock::format_instant(at);
    let subject_expiry = clock::format_instant(at + Duration::seconds(spec.subject_expiry_secs));
    let conditions_expiry =
        clock::format_instant(at + Duration::seconds(spec.conditions_expiry_secs));
    let not_before = clock::format_instant(at - Duration::seconds(300));

    let scd_irt = spec
        .in_response_to
        .as_ref()
        .map(|v| format!(" InResponseTo=\"{}\"", v))
        .unwrap_or_default();
    let response_irt = scd_irt.clone();

    let attributes: String = spec
        .attributes
        .iter()
        .map(|(name, values)| {
            let values: String = values
                .iter()
                .map(|v| format!("<saml:AttributeValue>{}</saml:AttributeValue>", v))
                .collect();
            format!("<saml:Attribute Name=\"{}\">{}</saml:Attribute>", name, values)
        })
        .collect();

    let assertion = format!(
        concat!(
            "<saml:Assertion xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\"",
            " ID=\"_a1\" Version=\"2.0\" IssueInstant=\"{instant}\">",
            "<saml:Issuer>{issuer}</saml:Issuer>",
            "<saml:Subject>",
            "<saml:NameID Format=\"urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress\">{name_id}</saml:NameID>",
            "<saml:SubjectConfirmation Method=\"urn:oasis:names:tc:SAML:2.0:cm:bearer\">",
            "<saml:SubjectConfirmationData Recipient=\"{recipient}\" NotOnOrAfter=\"{subject_expiry}\"{scd_irt}/>",
            "</saml:SubjectConfirmation>",
            "</saml:Subject>",
            "<saml:Conditions NotBefore=\"{not_before}\" NotOnOrAfter=\"{conditions_expiry}\">",
            "<saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction>",
            "</saml:Conditions>",
            "<saml:AuthnStatement AuthnInstant=\"{instant}\" SessionIndex=\"{session_index}\">",
            "<saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml:AuthnContextClassRef></saml:AuthnContext>",
            "</saml:AuthnStatement>",
            "<saml:AttributeStatement>{attributes}</saml:AttributeStatement>",
            "</saml:Assertion>"
        ),
        instant = instant,
        issuer = spec.issuer,
        name_id = spec.name_id,
        recipient = spec.recipient,
        subject_expiry = subject_expiry,
        scd_irt = scd_irt,
        not_before = not_before,
        conditions_expiry = conditions_expiry,
        audience = spec.audience,
        session_index = spec.session_index,
        attributes = attributes,
    );

    let assertion = if spec.sign_assertion {
        sign_as_idp(&assertion)
    } else {
        assertion
    };

    format!(
        concat!(
            "<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\"",
            " xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\"",
            " ID=\"_r1\" Version=\"2.0\" IssueInstant=\"{instant}\"",
            " Destination=\"{destination}\"{response_irt}>",
            "<saml:Issuer>{issuer}</saml:Issuer>",
            "<samlp:Status><samlp:StatusCode Value=\"urn:oasis:names:tc:SAML:2.0:status:Success\"/></samlp:Status>",
            "{assertion}",
            "</samlp:Response>"
        ),
        instant = instant,
        destination = spec.destination,
        response_irt = response_irt,
        issuer = spec.issuer,
        assertion = assertion,
    )
}

/// Sign a fragment's document element with the fixture IdP key
pub fn sign_as_idp(xml: &str) -> String {
    let mut doc = Document::parse(xml).unwrap();
    let root = doc.root();
    dsig::sign_enveloped(
        &mut doc,
        root,
        &IDP_KEY,
        None,
        SignatureAlgorithm::RsaSha256,
        DigestAlgorithm::Sha256,
        1,
    )
    .unwrap();
    doc.to_xml(doc.root())
}

pub fn encode_post(xml: &str) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(xml.as_bytes())
}

/// Parse a query string into an [`harborpass_saml::HttpRequest`] the way an
/// HTTP layer would: decoded params plus the raw string
pub fn request_from_query(query: &str) -> harborpass_saml::HttpRequest {
    let mut request = harborpass_saml::HttpRequest::new().with_query_string(query);
    for clause in query.split('&') {
        if let Some((name, value)) = clause.split_once('=') {
            request = request.with_param(name, urlencoding::decode(value).unwrap().into_owned());
        }
    }
    request
}
