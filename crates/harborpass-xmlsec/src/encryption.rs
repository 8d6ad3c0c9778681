//! XML Encryption unwrap and wrap
//!
//! Decrypts `EncryptedAssertion`/`EncryptedID` payloads: the `EncryptedKey`
//! is unwrapped with the SP private key, then the content is decrypted with
//! the block cipher named on the `EncryptedData`. CBC payloads carry the IV
//! as the first cipher block and use XMLEnc padding (the final byte names
//! the pad length; pad bytes themselves are arbitrary). GCM payloads carry a
//! 12-byte IV and a trailing 16-byte tag. The forward direction encrypts a
//! fragment under a fresh AES-128-CBC key wrapped with RSA-OAEP, as used for
//! outbound NameID encryption.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use rsa::RsaPublicKey;
use zeroize::Zeroizing;

use crate::algorithms::{BlockCipher, KeyTransport, XMLDSIG_NS, XMLENC_NS};
use crate::dom::{Document, NodeId};
use crate::error::{XmlSecError, XmlSecResult};
use crate::keys::{encrypt_key_transport, PrivateKey};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type TdesCbcDec = cbc::Decryptor<des::TdesEde3>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192Gcm = aes_gcm::AesGcm<aes::Aes192, aes::cipher::consts::U12>;

/// Locate the `xenc:EncryptedData` inside a wrapper element such as
/// `EncryptedAssertion` or `EncryptedID`
pub fn find_encrypted_data(doc: &Document, wrapper: NodeId) -> XmlSecResult<NodeId> {
    if doc.is_named(wrapper, XMLENC_NS, "EncryptedData") {
        return Ok(wrapper);
    }
    doc.find_child(wrapper, XMLENC_NS, "EncryptedData")
        .ok_or_else(|| XmlSecError::MissingElement("EncryptedData".to_string()))
}

/// Decrypt an `EncryptedData` element with the SP private key.
///
/// Returns the plaintext bytes of the encrypted fragment.
pub fn decrypt_encrypted_data(
    doc: &Document,
    encrypted_data: NodeId,
    key: &PrivateKey,
    reject_deprecated: bool,
) -> XmlSecResult<Vec<u8>> {
    let cipher = BlockCipher::from_uri(&encryption_method(doc, encrypted_data)?)?;

    let key_info = doc
        .find_child(encrypted_data, XMLDSIG_NS, "KeyInfo")
        .ok_or_else(|| XmlSecError::DecryptionFailed("no KeyInfo".to_string()))?;
    let encrypted_key = if doc.is_named(key_info, XMLENC_NS, "EncryptedKey") {
        key_info
    } else {
        *doc.find_descendants(key_info, XMLENC_NS, "EncryptedKey")
            .first()
            .ok_or_else(|| XmlSecError::DecryptionFailed("no EncryptedKey".to_string()))?
    };

    let transport = KeyTransport::from_uri(&encryption_method(doc, encrypted_key)?)?;
    if reject_deprecated && transport.is_deprecated() {
        return Err(XmlSecError::DeprecatedAlgorithm(transport.uri().to_string()));
    }

    let wrapped = cipher_value(doc, encrypted_key)?;
    let cek = Zeroizing::new(key.decrypt_key_transport(transport, &wrapped)?);
    if cek.len() != cipher.key_len() {
        return Err(XmlSecError::DecryptionFailed(format!(
            "content key is {} bytes, cipher needs {}",
            cek.len(),
            cipher.key_len()
        )));
    }

    let payload = cipher_value(doc, encrypted_data)?;
    if payload.len() <= cipher.iv_len() {
        return Err(XmlSecError::DecryptionFailed(
            "ciphertext shorter than IV".to_string(),
        ));
    }
    let (iv, ciphertext) = payload.split_at(cipher.iv_len());

    match cipher {
        BlockCipher::Aes128Cbc => {
            let padded = cbc_decrypt::<Aes128CbcDec>(&cek, iv, ciphertext)?;
            strip_xmlenc_padding(padded, cipher.block_len())
        }
        BlockCipher::Aes192Cbc => {
            let padded = cbc_decrypt::<Aes192CbcDec>(&cek, iv, ciphertext)?;
            strip_xmlenc_padding(padded, cipher.block_len())
        }
        BlockCipher::Aes256Cbc => {
            let padded = cbc_decrypt::<Aes256CbcDec>(&cek, iv, ciphertext)?;
            strip_xmlenc_padding(padded, cipher.block_len())
        }
        BlockCipher::TripleDesCbc => {
            let padded = cbc_decrypt::<TdesCbcDec>(&cek, iv, ciphertext)?;
            strip_xmlenc_padding(padded, cipher.block_len())
        }
        BlockCipher::Aes128Gcm => gcm_decrypt::<Aes128Gcm>(&cek, iv, ciphertext),
        BlockCipher::Aes192Gcm => gcm_decrypt::<Aes192Gcm>(&cek, iv, ciphertext),
        BlockCipher::Aes256Gcm => gcm_decrypt::<Aes256Gcm>(&cek, iv, ciphertext),
    }
}

/// Decrypt an `EncryptedData` element and interpret the plaintext as UTF-8
pub fn decrypt_to_string(
    doc: &Document,
    encrypted_data: NodeId,
    key: &PrivateKey,
    reject_deprecated: bool,
) -> XmlSecResult<String> {
    let plaintext = decrypt_encrypted_data(doc, encrypted_data, key, reject_deprecated)?;
    String::from_utf8(plaintext)
        .map_err(|e| XmlSecError::DecryptionFailed(format!("plaintext is not UTF-8: {}", e)))
}

/// Encrypt an XML fragment for a recipient.
///
/// Emits an `xenc:EncryptedData` element: a fresh AES-128-CBC content key
/// wrapped with RSA-OAEP, the IV prepended to the ciphertext.
pub fn encrypt_element(plaintext: &[u8], recipient: &RsaPublicKey) -> XmlSecResult<String> {
    let mut cek = Zeroizing::new([0u8; 16]);
    rand::thread_rng().fill_bytes(cek.as_mut());
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = Aes128CbcEnc::new_from_slices(cek.as_ref(), &iv)
        .map_err(|e| XmlSecError::EncryptionFailed(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mut payload = iv.to_vec();
    payload.extend_from_slice(&ciphertext);

    let wrapped = encrypt_key_transport(recipient, KeyTransport::RsaOaepMgf1p, cek.as_ref())?;

    Ok(format!(
        concat!(
            "<xenc:EncryptedData xmlns:xenc=\"{xenc}\" Type=\"{xenc}Element\">",
            "<xenc:EncryptionMethod Algorithm=\"{cipher}\"/>",
            "<ds:KeyInfo xmlns:ds=\"{ds}\">",
            "<xenc:EncryptedKey>",
            "<xenc:EncryptionMethod Algorithm=\"{transport}\"/>",
            "<xenc:CipherData><xenc:CipherValue>{wrapped}</xenc:CipherValue></xenc:CipherData>",
            "</xenc:EncryptedKey>",
            "</ds:KeyInfo>",
            "<xenc:CipherData><xenc:CipherValue>{payload}</xenc:CipherValue></xenc:CipherData>",
            "</xenc:EncryptedData>"
        ),
        xenc = XMLENC_NS,
        ds = XMLDSIG_NS,
        cipher = BlockCipher::Aes128Cbc.uri(),
        transport = KeyTransport::RsaOaepMgf1p.uri(),
        wrapped = STANDARD.encode(wrapped),
        payload = STANDARD.encode(payload),
    ))
}

fn encryption_method(doc: &Document, parent: NodeId) -> XmlSecResult<String> {
    let node = doc
        .find_child(parent, XMLENC_NS, "EncryptionMethod")
        .ok_or_else(|| XmlSecError::MissingElement("EncryptionMethod".to_string()))?;
    doc.attribute(node, "Algorithm")
        .map(str::to_string)
        .ok_or_else(|| XmlSecError::MissingAttribute("EncryptionMethod/@Algorithm".to_string()))
}

fn cipher_value(doc: &Document, parent: NodeId) -> XmlSecResult<Vec<u8>> {
    let cipher_data = doc
        .find_child(parent, XMLENC_NS, "CipherData")
        .ok_or_else(|| XmlSecError::MissingElement("CipherData".to_string()))?;
    let value = doc
        .find_child(cipher_data, XMLENC_NS, "CipherValue")
        .map(|n| doc.text(n))
        .ok_or_else(|| XmlSecError::MissingElement("CipherValue".to_string()))?;
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(STANDARD.decode(compact.as_bytes())?)
}

fn cbc_decrypt<D>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> XmlSecResult<Vec<u8>>
where
    D: KeyIvInit + BlockDecryptMut,
{
    D::new_from_slices(key, iv)
        .map_err(|e| XmlSecError::DecryptionFailed(e.to_string()))?
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|e| XmlSecError::DecryptionFailed(e.to_string()))
}

fn gcm_decrypt<C: KeyInit + Aead>(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> XmlSecResult<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|e| XmlSecError::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| XmlSecError::DecryptionFailed("GCM authentication failed".to_string()))
}

/// XMLEnc padding: the final byte names the pad length; pad bytes are
/// arbitrary, so only the length byte is checked.
fn strip_xmlenc_padding(mut data: Vec<u8>, block: usize) -> XmlSecResult<Vec<u8>> {
    let pad = *data
        .last()
        .ok_or_else(|| XmlSecError::DecryptionFailed("empty plaintext".to_string()))?
        as usize;
    if pad == 0 || pad > block || pad > data.len() {
        return Err(XmlSecError::DecryptionFailed(
            "invalid block padding".to_string(),
        ));
    }
    data.truncate(data.len() - pad);
    Ok(data)
}
