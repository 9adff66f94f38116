// src/core/scanner/capture.rs

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

/// How far into a body to look for a `<meta charset>` declaration.
const META_PRESCAN_BYTES: usize = 1024;

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#)
        .unwrap_or_else(|e| unreachable!("invalid meta charset pattern: {}", e))
});

/// Hex SHA-256 of the captured bytes, or `None` when nothing was captured.
pub fn digest(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    Some(format!("{:x}", Sha256::digest(bytes)))
}

/// The `charset` parameter of a Content-Type value, if any.
fn content_type_charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c| c == '"' || c == '\''))
    })
}

fn meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(META_PRESCAN_BYTES)];
    let label = META_CHARSET.captures(head)?.get(1)?.as_bytes();
    // A document cannot declare itself UTF-16 in ASCII; HTML treats that as UTF-8.
    Encoding::for_label(label).map(Encoding::output_encoding)
}

/// Best-effort guess at the body's encoding: byte-order mark, declared
/// charset, `<meta>` declaration, UTF-8 validity, then windows-1252.
pub fn detect_encoding(bytes: &[u8], content_type: Option<&str>) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    if let Some(encoding) = content_type
        .and_then(content_type_charset)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
    {
        return encoding;
    }
    if let Some(encoding) = meta_charset(bytes) {
        return encoding;
    }
    if std::str::from_utf8(bytes).is_ok() {
        UTF_8
    } else {
        WINDOWS_1252
    }
}

/// Decodes a captured body for display. Malformed input falls back to the
/// raw bytes rather than failing.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = detect_encoding(bytes, content_type);
    let without_bom = match Encoding::for_bom(bytes) {
        Some((_, bom_len)) => &bytes[bom_len..],
        None => bytes,
    };
    match encoding.decode_without_bom_handling_and_without_replacement(without_bom) {
        Some(text) => text.into_owned(),
        None => {
            debug!(encoding = encoding.name(), "Body did not decode cleanly, keeping raw bytes.");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
