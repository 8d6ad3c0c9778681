//! Algorithm URI registry for XML Digital Signature and XML Encryption
//!
//! Maps the algorithm identifiers that appear on the wire to typed enums and
//! carries the deprecated-algorithm policy.

use crate::error::{XmlSecError, XmlSecResult};

/// XML Digital Signature namespace
pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
/// XML Encryption namespace
pub const XMLENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";
/// Exclusive canonicalization, without comments
pub const C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
/// Exclusive canonicalization, with comments
pub const C14N_EXCLUSIVE_WITH_COMMENTS: &str =
    "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";
/// Enveloped-signature transform
pub const TRANSFORM_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// RSA signature algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// RSA-SHA1 (deprecated)
    RsaSha1,
    /// RSA-SHA256 (default)
    RsaSha256,
    /// RSA-SHA384
    RsaSha384,
    /// RSA-SHA512
    RsaSha512,
}

impl SignatureAlgorithm {
    /// The XMLDSig algorithm URI
    pub fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            Self::RsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384",
            Self::RsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
        }
    }

    /// Resolve a URI to a signature algorithm
    pub fn from_uri(uri: &str) -> XmlSecResult<Self> {
        match uri {
            "http://www.w3.org/2000/09/xmldsig#rsa-sha1" => Ok(Self::RsaSha1),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => Ok(Self::RsaSha256),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => Ok(Self::RsaSha384),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Ok(Self::RsaSha512),
            _ => Err(XmlSecError::UnsupportedAlgorithm(uri.to_string())),
        }
    }

    /// Whether the algorithm is in the deprecated set
    pub fn is_deprecated(&self) -> bool {
        matches!(self, Self::RsaSha1)
    }
}

impl Default for SignatureAlgorithm {
    fn default() -> Self {
        Self::RsaSha256
    }
}

/// Digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-1 (deprecated)
    Sha1,
    /// SHA-256 (default)
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// The XMLDSig/XMLEnc digest URI
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Sha1 => "http://www.w3.org/2000/09/xmldsig#sha1",
            Self::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            Self::Sha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            Self::Sha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    /// Resolve a URI to a digest algorithm
    pub fn from_uri(uri: &str) -> XmlSecResult<Self> {
        match uri {
            "http://www.w3.org/2000/09/xmldsig#sha1" => Ok(Self::Sha1),
            "http://www.w3.org/2001/04/xmlenc#sha256" => Ok(Self::Sha256),
            "http://www.w3.org/2001/04/xmldsig-more#sha384" => Ok(Self::Sha384),
            "http://www.w3.org/2001/04/xmlenc#sha512" => Ok(Self::Sha512),
            _ => Err(XmlSecError::UnsupportedAlgorithm(uri.to_string())),
        }
    }

    /// Resolve a short name ("sha1", "sha256", ...) as used for fingerprints
    pub fn from_name(name: &str) -> XmlSecResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(XmlSecError::UnsupportedAlgorithm(name.to_string())),
        }
    }

    /// Whether the algorithm is in the deprecated set
    pub fn is_deprecated(&self) -> bool {
        matches!(self, Self::Sha1)
    }

    /// Digest arbitrary bytes with this algorithm
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        use sha1::Sha1;
        use sha2::{Digest, Sha256, Sha384, Sha512};
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl Default for DigestAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

/// Block ciphers for EncryptedData payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCipher {
    /// AES-128 in CBC mode
    Aes128Cbc,
    /// AES-192 in CBC mode
    Aes192Cbc,
    /// AES-256 in CBC mode
    Aes256Cbc,
    /// AES-128 in GCM mode
    Aes128Gcm,
    /// AES-192 in GCM mode
    Aes192Gcm,
    /// AES-256 in GCM mode
    Aes256Gcm,
    /// Triple DES in CBC mode
    TripleDesCbc,
}

impl BlockCipher {
    /// The XMLEnc algorithm URI
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Aes128Cbc => "http://www.w3.org/2001/04/xmlenc#aes128-cbc",
            Self::Aes192Cbc => "http://www.w3.org/2001/04/xmlenc#aes192-cbc",
            Self::Aes256Cbc => "http://www.w3.org/2001/04/xmlenc#aes256-cbc",
            Self::Aes128Gcm => "http://www.w3.org/2009/xmlenc11#aes128-gcm",
            Self::Aes192Gcm => "http://www.w3.org/2009/xmlenc11#aes192-gcm",
            Self::Aes256Gcm => "http://www.w3.org/2009/xmlenc11#aes256-gcm",
            Self::TripleDesCbc => "http://www.w3.org/2001/04/xmlenc#tripledes-cbc",
        }
    }

    /// Resolve a URI to a block cipher
    pub fn from_uri(uri: &str) -> XmlSecResult<Self> {
        match uri {
            "http://www.w3.org/2001/04/xmlenc#aes128-cbc" => Ok(Self::Aes128Cbc),
            "http://www.w3.org/2001/04/xmlenc#aes192-cbc" => Ok(Self::Aes192Cbc),
            "http://www.w3.org/2001/04/xmlenc#aes256-cbc" => Ok(Self::Aes256Cbc),
            "http://www.w3.org/2009/xmlenc11#aes128-gcm" => Ok(Self::Aes128Gcm),
            "http://www.w3.org/2009/xmlenc11#aes192-gcm" => Ok(Self::Aes192Gcm),
            "http://www.w3.org/2009/xmlenc11#aes256-gcm" => Ok(Self::Aes256Gcm),
            "http://www.w3.org/2001/04/xmlenc#tripledes-cbc" => Ok(Self::TripleDesCbc),
            _ => Err(XmlSecError::UnsupportedAlgorithm(uri.to_string())),
        }
    }

    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes128Gcm => 16,
            Self::Aes192Cbc | Self::Aes192Gcm | Self::TripleDesCbc => 24,
            Self::Aes256Cbc | Self::Aes256Gcm => 32,
        }
    }

    /// IV length in bytes carried at the front of the ciphertext
    pub fn iv_len(&self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc => 16,
            Self::Aes128Gcm | Self::Aes192Gcm | Self::Aes256Gcm => 12,
            Self::TripleDesCbc => 8,
        }
    }

    /// Cipher block size in bytes (CBC padding granularity)
    pub fn block_len(&self) -> usize {
        match self {
            Self::TripleDesCbc => 8,
            _ => 16,
        }
    }

    /// Whether this is an authenticated (GCM) mode
    pub fn is_aead(&self) -> bool {
        matches!(self, Self::Aes128Gcm | Self::Aes192Gcm | Self::Aes256Gcm)
    }
}

/// Key transport algorithms for EncryptedKey
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransport {
    /// RSA-OAEP with MGF1(SHA-1)
    RsaOaepMgf1p,
    /// RSA PKCS#1 v1.5 (deprecated)
    Rsa15,
}

impl KeyTransport {
    /// The XMLEnc algorithm URI
    pub fn uri(&self) -> &'static str {
        match self {
            Self::RsaOaepMgf1p => "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p",
            Self::Rsa15 => "http://www.w3.org/2001/04/xmlenc#rsa-1_5",
        }
    }

    /// Resolve a URI to a key transport algorithm
    pub fn from_uri(uri: &str) -> XmlSecResult<Self> {
        match uri {
            "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p" => Ok(Self::RsaOaepMgf1p),
            "http://www.w3.org/2001/04/xmlenc#rsa-1_5" => Ok(Self::Rsa15),
            _ => Err(XmlSecError::UnsupportedAlgorithm(uri.to_string())),
        }
    }

    /// Whether the algorithm is in the deprecated set
    pub fn is_deprecated(&self) -> bool {
        matches!(self, Self::Rsa15)
    }
}
