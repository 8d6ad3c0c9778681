//! RSA key material
//!
//! The SP private key signs outbound messages (PKCS#1 v1.5 over the digest
//! named by the signature algorithm) and unwraps EncryptedKey transport.
//! Key bytes are zeroized when the key drops; Debug output is redacted.

use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::{Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::algorithms::{KeyTransport, SignatureAlgorithm};
use crate::error::{XmlSecError, XmlSecResult};

/// An RSA private key for signing and key-transport decryption
#[derive(Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl PrivateKey {
    /// Load from a PEM string, accepting PKCS#8 (`BEGIN PRIVATE KEY`) and
    /// PKCS#1 (`BEGIN RSA PRIVATE KEY`) encodings
    pub fn from_pem(pem: &str) -> XmlSecResult<Self> {
        let inner = match RsaPrivateKey::from_pkcs8_pem(pem) {
            Ok(key) => key,
            Err(pkcs8_err) => RsaPrivateKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
                XmlSecError::KeyParse(format!(
                    "not PKCS#8 ({}) nor PKCS#1 ({})",
                    pkcs8_err, pkcs1_err
                ))
            })?,
        };
        Ok(Self { inner })
    }

    /// Generate a fresh key of the given size in bits
    pub fn generate(bits: usize) -> XmlSecResult<Self> {
        let inner = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| XmlSecError::KeyParse(e.to_string()))?;
        Ok(Self { inner })
    }

    /// The corresponding public key
    pub fn public_key(&self) -> RsaPublicKey {
        self.inner.to_public_key()
    }

    /// Serialize to PKCS#8 PEM
    pub fn to_pem(&self) -> XmlSecResult<String> {
        self.inner
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| XmlSecError::KeyParse(e.to_string()))
    }

    /// Sign an octet string with PKCS#1 v1.5 and the algorithm's digest
    pub fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> XmlSecResult<Vec<u8>> {
        let result = match algorithm {
            SignatureAlgorithm::RsaSha1 => self
                .inner
                .sign(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data)),
            SignatureAlgorithm::RsaSha256 => self
                .inner
                .sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data)),
            SignatureAlgorithm::RsaSha384 => self
                .inner
                .sign(Pkcs1v15Sign::new::<Sha384>(), &Sha384::digest(data)),
            SignatureAlgorithm::RsaSha512 => self
                .inner
                .sign(Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(data)),
        };
        result.map_err(|e| XmlSecError::SigningFailed(e.to_string()))
    }

    /// Unwrap an EncryptedKey ciphertext
    pub fn decrypt_key_transport(
        &self,
        transport: KeyTransport,
        ciphertext: &[u8],
    ) -> XmlSecResult<Vec<u8>> {
        let result = match transport {
            KeyTransport::RsaOaepMgf1p => self.inner.decrypt(Oaep::new::<Sha1>(), ciphertext),
            KeyTransport::Rsa15 => self.inner.decrypt(Pkcs1v15Encrypt, ciphertext),
        };
        result.map_err(|e| XmlSecError::DecryptionFailed(e.to_string()))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Verify a PKCS#1 v1.5 signature over an octet string
pub fn verify_signature(
    key: &RsaPublicKey,
    algorithm: SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> bool {
    let result = match algorithm {
        SignatureAlgorithm::RsaSha1 => {
            key.verify(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data), signature)
        }
        SignatureAlgorithm::RsaSha256 => key.verify(
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(data),
            signature,
        ),
        SignatureAlgorithm::RsaSha384 => key.verify(
            Pkcs1v15Sign::new::<Sha384>(),
            &Sha384::digest(data),
            signature,
        ),
        SignatureAlgorithm::RsaSha512 => key.verify(
            Pkcs1v15Sign::new::<Sha512>(),
            &Sha512::digest(data),
            signature,
        ),
    };
    result.is_ok()
}

/// Wrap a content-encryption key for a recipient
pub fn encrypt_key_transport(
    key: &RsaPublicKey,
    transport: KeyTransport,
    plaintext: &[u8],
) -> XmlSecResult<Vec<u8>> {
    let result = match transport {
        KeyTransport::RsaOaepMgf1p => key.encrypt(&mut OsRng, Oaep::new::<Sha1>(), plaintext),
        KeyTransport::Rsa15 => key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext),
    };
    result.map_err(|e| XmlSecError::EncryptionFailed(e.to_string()))
}
