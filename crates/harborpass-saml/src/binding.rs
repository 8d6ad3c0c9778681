//! Binding codecs
//!
//! HTTP-Redirect carries `DEFLATE (RFC 1951, no zlib wrapper) → base64 →
//! percent-encode`; HTTP-POST carries plain base64 over the raw XML.
//! Inbound decoding tolerates both shapes: some IdPs skip compression on the
//! Redirect binding, so INFLATE failure falls back to the raw bytes.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{ErrorKind, SamlError, SamlResult};

/// Raw-DEFLATE then base64, the Redirect-binding encoding
pub fn deflate_encode(xml: &str) -> SamlResult<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .map_err(|e| SamlError::new(ErrorKind::InvalidXml, format!("deflate failed: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| SamlError::new(ErrorKind::InvalidXml, format!("deflate failed: {}", e)))?;
    Ok(STANDARD.encode(compressed))
}

/// Plain base64, the POST-binding encoding
pub fn base64_encode(xml: &str) -> String {
    STANDARD.encode(xml.as_bytes())
}

/// Base64-decode without inflating (POST binding)
pub fn base64_decode(value: &str) -> SamlResult<Vec<u8>> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| SamlError::new(ErrorKind::InvalidXml, format!("invalid base64: {}", e)))
}

/// Decode a Redirect-binding message: base64, then INFLATE with a raw-bytes
/// fallback for uncompressed senders
pub fn redirect_decode(value: &str) -> SamlResult<String> {
    let raw = base64_decode(value)?;
    let mut inflated = Vec::new();
    let mut decoder = DeflateDecoder::new(raw.as_slice());
    match decoder.read_to_end(&mut inflated) {
        Ok(_) if !inflated.is_empty() => String::from_utf8(inflated).map_err(|e| {
            SamlError::new(ErrorKind::InvalidXml, format!("message is not UTF-8: {}", e))
        }),
        _ => String::from_utf8(raw).map_err(|e| {
            SamlError::new(ErrorKind::InvalidXml, format!("message is not UTF-8: {}", e))
        }),
    }
}

/// Decode a POST-binding message: base64 only
pub fn post_decode(value: &str) -> SamlResult<String> {
    String::from_utf8(base64_decode(value)?).map_err(|e| {
        SamlError::new(ErrorKind::InvalidXml, format!("message is not UTF-8: {}", e))
    })
}

/// Append a pre-encoded query string to an endpoint URL
pub fn append_query(url: &str, query: &str) -> String {
    if url.contains('?') {
        format!("{}&{}", url, query)
    } else {
        format!("{}?{}", url, query)
    }
}
