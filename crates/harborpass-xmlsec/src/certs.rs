//! X.509 certificate handling
//!
//! IdP certificates arrive as PEM blocks, bare base64 bodies (the form
//! embedded in `KeyInfo/X509Data/X509Certificate`), or — for deployments
//! that distribute verification keys out of band — as raw RSA public keys.
//! Fingerprints are computed over the DER encoding and compared
//! case-insensitively with colons stripped.

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::algorithms::DigestAlgorithm;
use crate::error::{XmlSecError, XmlSecResult};

/// A signature-verification certificate
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Option<Vec<u8>>,
    public_key: RsaPublicKey,
}

impl Certificate {
    /// Parse a PEM `CERTIFICATE` block
    pub fn from_pem(pem: &str) -> XmlSecResult<Self> {
        let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
            .map_err(|e| XmlSecError::CertificateParse(e.to_string()))?;
        Self::from_der(parsed.contents)
    }

    /// Parse DER bytes
    pub fn from_der(der: Vec<u8>) -> XmlSecResult<Self> {
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| XmlSecError::CertificateParse(e.to_string()))?;
        let spki = cert.public_key();
        let public_key = match RsaPublicKey::from_pkcs1_der(&spki.subject_public_key.data) {
            Ok(key) => key,
            Err(_) => RsaPublicKey::from_public_key_der(spki.raw)
                .map_err(|e| XmlSecError::CertificateParse(e.to_string()))?,
        };
        Ok(Self {
            der: Some(der),
            public_key,
        })
    }

    /// Parse a bare base64 DER body, tolerating embedded whitespace
    pub fn from_base64(body: &str) -> XmlSecResult<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        let der = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| XmlSecError::CertificateParse(e.to_string()))?;
        Self::from_der(der)
    }

    /// Parse either form: a PEM block or a bare base64 body
    pub fn from_any(value: &str) -> XmlSecResult<Self> {
        if value.contains("-----BEGIN") {
            Self::from_pem(value)
        } else {
            Self::from_base64(value)
        }
    }

    /// Wrap a raw RSA public key with no certificate bytes. Fingerprint
    /// matching is unavailable for such entries.
    pub fn from_public_key(public_key: RsaPublicKey) -> Self {
        Self {
            der: None,
            public_key,
        }
    }

    /// The embedded RSA public key
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// DER bytes when the full certificate is known
    pub fn der(&self) -> Option<&[u8]> {
        self.der.as_deref()
    }

    /// Lowercase-hex fingerprint of the DER encoding
    pub fn fingerprint(&self, algorithm: DigestAlgorithm) -> XmlSecResult<String> {
        let der = self.der.as_deref().ok_or_else(|| {
            XmlSecError::CertificateParse("no certificate bytes to fingerprint".to_string())
        })?;
        Ok(hex::encode(algorithm.digest(der)))
    }

    /// Compare against an expected fingerprint, ignoring case and colons
    pub fn matches_fingerprint(&self, expected: &str, algorithm: DigestAlgorithm) -> bool {
        match self.fingerprint(algorithm) {
            Ok(actual) => actual == normalize_fingerprint(expected),
            Err(_) => false,
        }
    }
}

/// Strip colons and lowercase a fingerprint for comparison
pub fn normalize_fingerprint(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != ':')
        .collect::<String>()
        .to_ascii_lowercase()
}
