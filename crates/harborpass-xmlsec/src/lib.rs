//! # HarborPass XML Security Module
//!
//! XML Digital Signature and XML Encryption primitives for the HarborPass
//! SAML toolkit.
//!
//! ## Features
//!
//! - **Hardened DOM**: namespace-aware document model that rejects DTDs,
//!   entity definitions and external references at parse time
//! - **Exclusive C14N**: canonical XML 1.0 (exclusive), with and without
//!   comments, the byte-exact input for digests and signatures
//! - **XMLDSig**: enveloped signature creation and strict verification
//!   (single same-document reference, fixed transform set, constant-time
//!   digest comparison, deprecated-algorithm policy)
//! - **XMLEnc**: EncryptedKey unwrap (RSA-OAEP, RSA-1.5) and payload
//!   decryption (AES-CBC, AES-GCM, 3DES-CBC), plus fragment encryption for
//!   outbound NameID protection
//! - **Key hygiene**: private keys and content keys zeroized after use,
//!   redacted Debug output
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for XML security operations
//! - [`dom`] - Hardened XML document model
//! - [`c14n`] - Exclusive canonicalization
//! - [`algorithms`] - Algorithm URI registry and deprecation policy
//! - [`keys`] - RSA private key material
//! - [`certs`] - X.509 certificates and fingerprints
//! - [`dsig`] - Enveloped XML signatures
//! - [`encryption`] - XML Encryption unwrap and wrap

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod algorithms;
pub mod c14n;
pub mod certs;
pub mod dom;
pub mod dsig;
pub mod encryption;
pub mod error;
pub mod keys;

pub use algorithms::{BlockCipher, DigestAlgorithm, KeyTransport, SignatureAlgorithm};
pub use certs::Certificate;
pub use dom::{Document, NodeId};
pub use error::{XmlSecError, XmlSecResult};
pub use keys::PrivateKey;
