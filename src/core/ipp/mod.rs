// src/core/ipp/mod.rs

//! Internet Printing Protocol message handling: decoding responses, encoding
//! the attribute request, and the small checks the scanner makes before decoding.

pub mod decoder;
pub mod request;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use decoder::{decode, Decoded, Decoder, Message};

/// Media type of IPP messages.
pub const CONTENT_TYPE: &str = "application/ipp";

/// Status code `server-error-version-not-supported`.
pub const STATUS_VERSION_NOT_SUPPORTED: u16 = 0x0503;

// --- Message model ---

/// The fixed 8-byte prefix of every IPP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IppHeader {
    pub version_major: u8,
    pub version_minor: u8,
    /// Operation id in requests, status code in responses.
    pub status_code: u16,
    pub request_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub tag: u8,
    pub bytes: Vec<u8>,
}

impl AttributeValue {
    /// The value as text, for tags that carry character data.
    pub fn as_text(&self) -> Option<String> {
        is_text_tag(self.tag).then(|| String::from_utf8_lossy(&self.bytes).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<AttributeValue>,
}

impl Attribute {
    pub fn text_values(&self) -> Vec<String> {
        self.values.iter().filter_map(AttributeValue::as_text).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeGroup {
    pub tag: u8,
    pub attributes: Vec<Attribute>,
}

/// Character-string value tags: text, name, keyword, uri, uriScheme,
/// charset, naturalLanguage and mimeMediaType.
fn is_text_tag(tag: u8) -> bool {
    (0x41..=0x49).contains(&tag)
}

/// Errors that stop decoding. Attributes read before the error are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeError {
    #[error("Fewer body bytes read than expected.")]
    BodyTooShort,

    #[error("Reported field length runs out of bounds.")]
    InvalidLength,
}

// --- Pre-decode checks ---

/// Result of looking at a response's status code before decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// Too short to carry a status code.
    NotApplicable,
    /// The server rejected the request's protocol version.
    NotSupported,
    Supported,
}

/// Reads the status code at bytes 2..4 of a response.
pub fn version_check(body: &[u8]) -> VersionCheck {
    match body.get(2..4) {
        Some(&[hi, lo]) if u16::from_be_bytes([hi, lo]) == STATUS_VERSION_NOT_SUPPORTED => {
            VersionCheck::NotSupported
        }
        Some(_) => VersionCheck::Supported,
        None => VersionCheck::NotApplicable,
    }
}

/// Whether one Content-Type value names `wanted`.
///
/// Accepts parameters (`application/ipp; x=y`), a trailing comma-separated
/// token (`application/ipp, public`), and a bare subtype (`IPP`), all
/// case-insensitively.
pub fn matches_content_type(value: &str, wanted: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    let media_type = value
        .split(';')
        .next()
        .unwrap_or_default()
        .split(',')
        .next()
        .unwrap_or_default()
        .trim();
    let wanted = wanted.to_ascii_lowercase();
    if media_type == wanted {
        return true;
    }
    match wanted.split_once('/') {
        Some((_, subtype)) => !media_type.contains('/') && media_type == subtype,
        None => false,
    }
}

/// Whether any of the response's Content-Type values names `wanted`.
pub fn has_content_type<'a, I>(values: I, wanted: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    values.into_iter().any(|v| matches_content_type(v, wanted))
}
