//! Error types for XML security operations

use thiserror::Error;

/// Result type for XML security operations
pub type XmlSecResult<T> = Result<T, XmlSecError>;

/// XML security error types
#[derive(Debug, Error)]
pub enum XmlSecError {
    /// XML is not well formed or uses forbidden constructs
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Document carries a DTD, an entity definition or an external reference
    #[error("DTD and entity declarations are forbidden")]
    DtdForbidden,

    /// Two elements in the same document carry the same ID value
    #[error("Duplicate ID attribute value: {0}")]
    DuplicateId(String),

    /// A required element is absent
    #[error("Missing element: {0}")]
    MissingElement(String),

    /// A required attribute is absent
    #[error("Missing attribute: {0}")]
    MissingAttribute(String),

    /// A Signature carries no Reference
    #[error("Signature has no Reference")]
    MissingReference,

    /// Reference URI is not a same-document ID reference to the signed element
    #[error("Invalid signature reference: {0}")]
    InvalidReference(String),

    /// A transform other than enveloped-signature or exclusive C14N
    #[error("Unexpected transform: {0}")]
    UnexpectedTransform(String),

    /// Algorithm URI outside the supported set
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Algorithm is in the deprecated set and policy rejects it
    #[error("Deprecated algorithm rejected by policy: {0}")]
    DeprecatedAlgorithm(String),

    /// Reference digest does not match the canonicalized content
    #[error("Reference digest mismatch")]
    DigestMismatch,

    /// Signature value does not verify under any candidate key
    #[error("Signature verification failed")]
    SignatureMismatch,

    /// No configured certificate or fingerprint matches the signature
    #[error("No matching certificate for signature")]
    NoMatchingCertificate,

    /// Private key material could not be parsed
    #[error("Key parse error: {0}")]
    KeyParse(String),

    /// RSA signing operation failed
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Certificate could not be parsed
    #[error("Certificate parse error: {0}")]
    CertificateParse(String),

    /// XML Encryption unwrap failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// XML Encryption wrap failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Base64 or UTF-8 decoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl From<quick_xml::Error> for XmlSecError {
    fn from(err: quick_xml::Error) -> Self {
        XmlSecError::XmlParse(err.to_string())
    }
}

impl From<base64::DecodeError> for XmlSecError {
    fn from(err: base64::DecodeError) -> Self {
        XmlSecError::Encoding(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for XmlSecError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        XmlSecError::Encoding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = XmlSecError::DuplicateId("_abc".to_string());
        assert_eq!(err.to_string(), "Duplicate ID attribute value: _abc");

        let err = XmlSecError::DigestMismatch;
        assert_eq!(err.to_string(), "Reference digest mismatch");
    }
}
