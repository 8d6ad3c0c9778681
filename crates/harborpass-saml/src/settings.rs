//! SP settings: a frozen configuration view
//!
//! Raw configuration arrives as a plain serde tree ([`SettingsConfig`]) with
//! PEM strings for key material. [`Settings::new`] validates everything,
//! parses keys and certificates once, and freezes the result. After
//! construction the only permitted mutation is the explicit strict-mode
//! setter.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use harborpass_xmlsec::{Certificate, DigestAlgorithm, PrivateKey, SignatureAlgorithm};

use crate::constants::nameid_format;
use crate::error::{ErrorKind, SamlError, SamlResult};

/// SAML HTTP binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Binding {
    /// HTTP-POST
    #[serde(rename = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST")]
    HttpPost,
    /// HTTP-Redirect
    #[serde(rename = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect")]
    HttpRedirect,
}

impl Binding {
    /// The binding URN
    pub fn urn(&self) -> &'static str {
        match self {
            Self::HttpPost => crate::constants::BINDING_HTTP_POST,
            Self::HttpRedirect => crate::constants::BINDING_HTTP_REDIRECT,
        }
    }
}

/// Service Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpConfig {
    /// SP entity ID
    pub entity_id: String,

    /// Assertion Consumer Service URL
    pub acs_url: String,

    /// ACS binding (HTTP-POST is the only binding `process_response` accepts)
    #[serde(default = "default_post_binding")]
    pub acs_binding: Binding,

    /// Single Logout Service URL
    #[serde(default)]
    pub slo_url: Option<String>,

    /// SLO binding
    #[serde(default = "default_redirect_binding")]
    pub slo_binding: Binding,

    /// Requested NameID format
    #[serde(default = "default_nameid_format")]
    pub name_id_format: String,

    /// SP private key, PEM (PKCS#8 or PKCS#1)
    #[serde(default)]
    pub private_key: Option<String>,

    /// SP certificate, PEM
    #[serde(default)]
    pub certificate: Option<String>,

    /// Next SP certificate during rollover, PEM
    #[serde(default)]
    pub new_certificate: Option<String>,
}

fn default_post_binding() -> Binding {
    Binding::HttpPost
}
fn default_redirect_binding() -> Binding {
    Binding::HttpRedirect
}
fn default_nameid_format() -> String {
    nameid_format::UNSPECIFIED.to_string()
}

/// Identity Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// IdP entity ID
    pub entity_id: String,

    /// IdP Single Sign-On URL
    pub sso_url: String,

    /// SSO binding
    #[serde(default = "default_redirect_binding")]
    pub sso_binding: Binding,

    /// IdP Single Logout URL
    #[serde(default)]
    pub slo_url: Option<String>,

    /// SLO binding
    #[serde(default = "default_redirect_binding")]
    pub slo_binding: Binding,

    /// Where LogoutResponses are sent when it differs from `slo_url`
    #[serde(default)]
    pub slo_response_url: Option<String>,

    /// IdP certificates: PEM blocks or bare base64 DER bodies
    #[serde(default)]
    pub x509certs: Vec<String>,

    /// Certificate fingerprints, used when no full certificate is configured
    #[serde(default)]
    pub cert_fingerprints: Vec<String>,

    /// Fingerprint digest algorithm name ("sha1", "sha256", ...)
    #[serde(default = "default_fingerprint_algorithm")]
    pub cert_fingerprint_algorithm: String,
}

fn default_fingerprint_algorithm() -> String {
    "sha1".to_string()
}

/// Security toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Sign outbound AuthnRequests
    #[serde(default)]
    pub authn_requests_signed: bool,

    /// Sign outbound LogoutRequests
    #[serde(default)]
    pub logout_request_signed: bool,

    /// Sign outbound LogoutResponses
    #[serde(default)]
    pub logout_response_signed: bool,

    /// Require signatures on inbound messages
    #[serde(default)]
    pub want_messages_signed: bool,

    /// Require signatures on inbound assertions
    #[serde(default)]
    pub want_assertions_signed: bool,

    /// Require inbound assertions to be encrypted
    #[serde(default)]
    pub want_assertions_encrypted: bool,

    /// Require a NameID on inbound assertions
    #[serde(default = "default_true")]
    pub want_name_id: bool,

    /// Require (and emit) encrypted NameIDs
    #[serde(default)]
    pub want_name_id_encrypted: bool,

    /// Require an AttributeStatement on inbound assertions
    #[serde(default = "default_true")]
    pub want_attribute_statement: bool,

    /// Sign published SP metadata
    #[serde(default)]
    pub sign_metadata: bool,

    /// Run the protocol schema check on inbound messages
    #[serde(default = "default_true")]
    pub want_xml_validation: bool,

    /// AuthnContext class refs to request; empty omits the element
    #[serde(default)]
    pub requested_authn_context: Vec<String>,

    /// RequestedAuthnContext comparison attribute
    #[serde(default = "default_comparison")]
    pub requested_authn_context_comparison: String,

    /// Signature algorithm URI for outbound signing
    #[serde(default = "default_signature_algorithm")]
    pub signature_algorithm: String,

    /// Digest algorithm URI for outbound signing
    #[serde(default = "default_digest_algorithm")]
    pub digest_algorithm: String,

    /// Percent-encode with lowercase hex when building signed query strings
    #[serde(default)]
    pub lowercase_url_encoding: bool,

    /// Reject SHA1-based signatures/digests and RSA-1.5 key transport
    #[serde(default)]
    pub reject_deprecated_algorithm: bool,

    /// Treat an InResponseTo on an unsolicited response as an error
    #[serde(default)]
    pub reject_unsolicited_responses_with_in_response_to: bool,

    /// Clock skew tolerated by temporal checks, in seconds
    #[serde(default)]
    pub allowed_clock_drift_secs: i64,

    /// Where the OASIS protocol schemas are mounted, for deployments that
    /// validate against the full XSDs
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_comparison() -> String {
    "exact".to_string()
}
fn default_signature_algorithm() -> String {
    SignatureAlgorithm::RsaSha256.uri().to_string()
}
fn default_digest_algorithm() -> String {
    DigestAlgorithm::Sha256.uri().to_string()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            authn_requests_signed: false,
            logout_request_signed: false,
            logout_response_signed: false,
            want_messages_signed: false,
            want_assertions_signed: false,
            want_assertions_encrypted: false,
            want_name_id: true,
            want_name_id_encrypted: false,
            want_attribute_statement: true,
            sign_metadata: false,
            want_xml_validation: true,
            requested_authn_context: Vec::new(),
            requested_authn_context_comparison: default_comparison(),
            signature_algorithm: default_signature_algorithm(),
            digest_algorithm: default_digest_algorithm(),
            lowercase_url_encoding: false,
            reject_deprecated_algorithm: false,
            reject_unsolicited_responses_with_in_response_to: false,
            allowed_clock_drift_secs: 0,
            schema_path: None,
        }
    }
}

/// Redirect-binding compression preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// DEFLATE outbound requests
    #[serde(default = "default_true")]
    pub requests: bool,

    /// DEFLATE outbound responses
    #[serde(default = "default_true")]
    pub responses: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            requests: true,
            responses: true,
        }
    }
}

/// A technical or support contact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Contact type ("technical", "support", ...)
    pub contact_type: String,
    /// Given name
    pub given_name: String,
    /// Email address
    pub email_address: String,
}

/// Organization data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Organization name
    pub name: String,
    /// Display name
    pub display_name: String,
    /// Organization URL
    pub url: String,
}

/// Raw settings tree, as loaded from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Strict mode: run the full validation pipeline on inbound messages
    #[serde(default = "default_true")]
    pub strict: bool,

    /// Service Provider
    pub sp: SpConfig,

    /// Identity Provider
    pub idp: IdpConfig,

    /// Security toggles
    #[serde(default)]
    pub security: SecurityConfig,

    /// Compression preferences
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Contacts
    #[serde(default)]
    pub contacts: Vec<Contact>,

    /// Organization
    #[serde(default)]
    pub organization: Option<Organization>,
}

/// Validated, frozen settings
#[derive(Debug)]
pub struct Settings {
    config: SettingsConfig,
    strict: bool,
    sp_private_key: Option<PrivateKey>,
    sp_certificate: Option<Certificate>,
    sp_new_certificate: Option<Certificate>,
    idp_certificates: Vec<Certificate>,
    idp_fingerprints: Vec<(String, DigestAlgorithm)>,
    signature_algorithm: SignatureAlgorithm,
    digest_algorithm: DigestAlgorithm,
}

impl Settings {
    /// Validate a configuration tree and freeze it.
    ///
    /// Every problem found is reported at once in the error detail.
    pub fn new(config: SettingsConfig) -> SamlResult<Self> {
        let problems = Self::check(&config);
        if !problems.is_empty() {
            return Err(SamlError::new(
                ErrorKind::SettingsInvalid,
                problems.join("; "),
            ));
        }

        let sp_private_key = match &config.sp.private_key {
            Some(pem) => Some(PrivateKey::from_pem(pem)?),
            None => None,
        };
        let sp_certificate = match &config.sp.certificate {
            Some(pem) => Some(Certificate::from_any(pem)?),
            None => None,
        };
        let sp_new_certificate = match &config.sp.new_certificate {
            Some(pem) => Some(Certificate::from_any(pem)?),
            None => None,
        };
        let idp_certificates = config
            .idp
            .x509certs
            .iter()
            .map(|value| Certificate::from_any(value))
            .collect::<Result<Vec<_>, _>>()?;
        let fingerprint_algorithm =
            DigestAlgorithm::from_name(&config.idp.cert_fingerprint_algorithm)?;
        let idp_fingerprints = config
            .idp
            .cert_fingerprints
            .iter()
            .map(|fp| (fp.clone(), fingerprint_algorithm))
            .collect();
        let signature_algorithm = SignatureAlgorithm::from_uri(&config.security.signature_algorithm)?;
        let digest_algorithm = DigestAlgorithm::from_uri(&config.security.digest_algorithm)?;

        Ok(Self {
            strict: config.strict,
            sp_private_key,
            sp_certificate,
            sp_new_certificate,
            idp_certificates,
            idp_fingerprints,
            signature_algorithm,
            digest_algorithm,
            config,
        })
    }

    /// Collect every validation problem in a configuration tree
    pub fn check(config: &SettingsConfig) -> Vec<String> {
        let mut problems = Vec::new();

        if config.sp.entity_id.trim().is_empty() {
            problems.push("sp.entity_id must not be empty".to_string());
        }
        if url::Url::parse(&config.sp.acs_url).is_err() {
            problems.push(format!("sp.acs_url is not a valid URL: {}", config.sp.acs_url));
        }
        if let Some(slo) = &config.sp.slo_url {
            if url::Url::parse(slo).is_err() {
                problems.push(format!("sp.slo_url is not a valid URL: {}", slo));
            }
        }
        if config.idp.entity_id.trim().is_empty() {
            problems.push("idp.entity_id must not be empty".to_string());
        }
        if url::Url::parse(&config.idp.sso_url).is_err() {
            problems.push(format!(
                "idp.sso_url is not a valid URL: {}",
                config.idp.sso_url
            ));
        }
        if config.idp.sso_binding != Binding::HttpRedirect {
            problems.push("idp.sso_binding must be HTTP-Redirect".to_string());
        }
        if let Some(slo) = &config.idp.slo_url {
            if url::Url::parse(slo).is_err() {
                problems.push(format!("idp.slo_url is not a valid URL: {}", slo));
            }
            if config.idp.slo_binding != Binding::HttpRedirect {
                problems.push("idp.slo_binding must be HTTP-Redirect".to_string());
            }
        }

        let security = &config.security;
        let signing_requested = security.authn_requests_signed
            || security.logout_request_signed
            || security.logout_response_signed;
        if signing_requested && config.sp.private_key.is_none() {
            problems.push("outbound signing enabled but sp.private_key is absent".to_string());
        }
        if (security.want_assertions_encrypted || security.want_name_id_encrypted)
            && config.sp.private_key.is_none()
        {
            problems.push("inbound decryption enabled but sp.private_key is absent".to_string());
        }
        if SignatureAlgorithm::from_uri(&security.signature_algorithm).is_err() {
            problems.push(format!(
                "unknown signature algorithm: {}",
                security.signature_algorithm
            ));
        }
        if DigestAlgorithm::from_uri(&security.digest_algorithm).is_err() {
            problems.push(format!(
                "unknown digest algorithm: {}",
                security.digest_algorithm
            ));
        }
        if DigestAlgorithm::from_name(&config.idp.cert_fingerprint_algorithm).is_err() {
            problems.push(format!(
                "unknown fingerprint algorithm: {}",
                config.idp.cert_fingerprint_algorithm
            ));
        }
        if security.allowed_clock_drift_secs < 0 {
            problems.push("security.allowed_clock_drift_secs must not be negative".to_string());
        }

        problems
    }

    /// Replace the parsed IdP certificates with programmatic key material
    /// (key stores, out-of-band distribution, tests). Consumes the settings
    /// before first use, so the frozen-after-construction rule holds.
    pub fn with_idp_certificates(mut self, certificates: Vec<Certificate>) -> Self {
        self.idp_certificates = certificates;
        self
    }

    /// Install a programmatic SP key pair
    pub fn with_sp_key_pair(
        mut self,
        private_key: PrivateKey,
        certificate: Option<Certificate>,
    ) -> Self {
        self.sp_private_key = Some(private_key);
        self.sp_certificate = certificate;
        self
    }

    /// Whether strict mode is active
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// The explicit strict-mode setter, the only mutation permitted after
    /// construction
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// SP configuration
    pub fn sp(&self) -> &SpConfig {
        &self.config.sp
    }

    /// IdP configuration
    pub fn idp(&self) -> &IdpConfig {
        &self.config.idp
    }

    /// Security toggles
    pub fn security(&self) -> &SecurityConfig {
        &self.config.security
    }

    /// Compression preferences
    pub fn compression(&self) -> &CompressionConfig {
        &self.config.compression
    }

    /// Contacts
    pub fn contacts(&self) -> &[Contact] {
        &self.config.contacts
    }

    /// Organization
    pub fn organization(&self) -> Option<&Organization> {
        self.config.organization.as_ref()
    }

    /// SP private key
    pub fn sp_private_key(&self) -> Option<&PrivateKey> {
        self.sp_private_key.as_ref()
    }

    /// SP certificate
    pub fn sp_certificate(&self) -> Option<&Certificate> {
        self.sp_certificate.as_ref()
    }

    /// Next SP certificate during rollover
    pub fn sp_new_certificate(&self) -> Option<&Certificate> {
        self.sp_new_certificate.as_ref()
    }

    /// Parsed IdP certificates
    pub fn idp_certificates(&self) -> &[Certificate] {
        &self.idp_certificates
    }

    /// Configured IdP fingerprints with their digest algorithm
    pub fn idp_fingerprints(&self) -> &[(String, DigestAlgorithm)] {
        &self.idp_fingerprints
    }

    /// Outbound signature algorithm
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm
    }

    /// Outbound digest algorithm
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    /// Clock skew tolerated by temporal checks
    pub fn allowed_clock_drift(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.security.allowed_clock_drift_secs)
    }
}
