//! Error model for the SAML SP core
//!
//! Every failure carries a stable [`ErrorKind`] label (telemetry keys on the
//! exact strings) plus a human-readable detail. Per-message validation
//! failures never propagate as `Err` out of the orchestrator: they accumulate
//! on [`crate::auth::Auth`] and leave the session unauthenticated. Only
//! construction errors and transport misuse raise.

use thiserror::Error;

use harborpass_xmlsec::XmlSecError;

/// Result type for SAML operations
pub type SamlResult<T> = Result<T, SamlError>;

/// Stable error kind labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Configuration validation failed at construction
    SettingsInvalid,
    /// Signing requested without an SP private key
    PrivateKeyNotFound,
    /// `SAMLResponse` parameter missing (wrong binding or routing bug)
    SamlResponseNotFound,
    /// Neither `SAMLRequest` nor `SAMLResponse` present on the SLO endpoint
    SamlLogoutMessageNotFound,
    /// XML is not well formed or uses forbidden constructs
    InvalidXml,
    /// Message violates the protocol schema subset
    SchemaViolation,
    /// Root element is not in the expected SAML namespace
    InvalidXmlNamespace,
    /// Signature verification failed
    InvalidSignature,
    /// A required signature is absent
    NoSignedElement,
    /// More than one signed element, or a duplicated ID
    DuplicatedSignedElement,
    /// Signature, digest or key-transport algorithm rejected by policy
    InvalidSignatureAlgorithm,
    /// Issuer does not match the configured IdP entity ID
    InvalidIssuer,
    /// Audience restriction does not include the SP entity ID
    InvalidAudience,
    /// Destination does not match the expected SP endpoint
    InvalidDestination,
    /// NameID missing, empty, or carrying a wrong qualifier
    InvalidNameId,
    /// NameID format conflicts with the configured SP format
    InvalidNameIdFormat,
    /// InResponseTo does not correlate with the outstanding request
    InvalidInResponseTo,
    /// Unsolicited response carries an InResponseTo
    UnexpectedInResponseTo,
    /// Assertion or session no longer valid
    AssertionExpired,
    /// Assertion not yet valid
    AssertionTooEarly,
    /// No AuthnStatement in the assertion
    NoAuthnStatement,
    /// No AttributeStatement in the assertion
    NoAttributeStatements,
    /// Response status was not Success
    ResponseStatusError,
    /// Required encryption is absent
    EncryptionError,
    /// Decryption failed
    DecryptionError,
    /// Logout requested without a configured IdP SLO endpoint
    SingleLogoutNotSupported,
}

impl ErrorKind {
    /// The stable label exposed to telemetry
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SettingsInvalid => "SettingsInvalid",
            Self::PrivateKeyNotFound => "PrivateKeyNotFound",
            Self::SamlResponseNotFound => "SamlResponseNotFound",
            Self::SamlLogoutMessageNotFound => "SamlLogoutMessageNotFound",
            Self::InvalidXml => "InvalidXml",
            Self::SchemaViolation => "SchemaViolation",
            Self::InvalidXmlNamespace => "InvalidXmlNamespace",
            Self::InvalidSignature => "InvalidSignature",
            Self::NoSignedElement => "NoSignedElement",
            Self::DuplicatedSignedElement => "DuplicatedSignedElement",
            Self::InvalidSignatureAlgorithm => "InvalidSignatureAlgorithm",
            Self::InvalidIssuer => "InvalidIssuer",
            Self::InvalidAudience => "InvalidAudience",
            Self::InvalidDestination => "InvalidDestination",
            Self::InvalidNameId => "InvalidNameId",
            Self::InvalidNameIdFormat => "InvalidNameIdFormat",
            Self::InvalidInResponseTo => "InvalidInResponseTo",
            Self::UnexpectedInResponseTo => "UnexpectedInResponseTo",
            Self::AssertionExpired => "AssertionExpired",
            Self::AssertionTooEarly => "AssertionTooEarly",
            Self::NoAuthnStatement => "NoAuthnStatement",
            Self::NoAttributeStatements => "NoAttributeStatements",
            Self::ResponseStatusError => "ResponseStatusError",
            Self::EncryptionError => "EncryptionError",
            Self::DecryptionError => "DecryptionError",
            Self::SingleLogoutNotSupported => "SingleLogoutNotSupported",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A SAML validation or processing error: stable kind plus detail
#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct SamlError {
    /// Stable error kind
    pub kind: ErrorKind,
    /// Human-readable detail
    pub detail: String,
}

impl SamlError {
    /// Create an error with a kind and detail string
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<XmlSecError> for SamlError {
    fn from(err: XmlSecError) -> Self {
        let kind = match &err {
            XmlSecError::XmlParse(_) | XmlSecError::DtdForbidden => ErrorKind::InvalidXml,
            XmlSecError::DuplicateId(_) => ErrorKind::DuplicatedSignedElement,
            XmlSecError::UnsupportedAlgorithm(_) | XmlSecError::DeprecatedAlgorithm(_) => {
                ErrorKind::InvalidSignatureAlgorithm
            }
            XmlSecError::MissingElement(_)
            | XmlSecError::MissingAttribute(_)
            | XmlSecError::MissingReference
            | XmlSecError::InvalidReference(_)
            | XmlSecError::UnexpectedTransform(_)
            | XmlSecError::DigestMismatch
            | XmlSecError::SignatureMismatch
            | XmlSecError::NoMatchingCertificate => ErrorKind::InvalidSignature,
            XmlSecError::KeyParse(_)
            | XmlSecError::CertificateParse(_)
            | XmlSecError::SigningFailed(_) => ErrorKind::SettingsInvalid,
            XmlSecError::DecryptionFailed(_) | XmlSecError::Encoding(_) => {
                ErrorKind::DecryptionError
            }
            XmlSecError::EncryptionFailed(_) => ErrorKind::EncryptionError,
        };
        SamlError::new(kind, err.to_string())
    }
}
