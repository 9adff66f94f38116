// src/core/ipp/request.rs

/// Operation id of Get-Printer-Attributes.
pub const GET_PRINTER_ATTRIBUTES: u16 = 0x000B;

const OPERATION_ATTRIBUTES_TAG: u8 = 0x01;
const END_OF_ATTRIBUTES_TAG: u8 = 0x03;
const KEYWORD: u8 = 0x44;
const URI: u8 = 0x45;
const CHARSET: u8 = 0x47;
const NATURAL_LANGUAGE: u8 = 0x48;

/// Protocol versions to offer, newest first.
pub const VERSIONS: [(u8, u8); 4] = [(2, 1), (2, 0), (1, 1), (1, 0)];

fn push_attribute(buf: &mut Vec<u8>, tag: u8, name: &str, value: &str) {
    buf.push(tag);
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

/// The URI a printer is addressed by inside the request body.
pub fn printer_uri(use_tls: bool, host: &str, port: u16, endpoint: &str) -> String {
    let scheme = if use_tls { "ipps" } else { "ipp" };
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    format!("{}://{}:{}{}", scheme, host, port, endpoint)
}

/// Encodes a Get-Printer-Attributes request asking for every attribute.
pub fn get_printer_attributes(version: (u8, u8), printer_uri: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + printer_uri.len());
    buf.extend_from_slice(&[version.0, version.1]);
    buf.extend_from_slice(&GET_PRINTER_ATTRIBUTES.to_be_bytes());
    buf.extend_from_slice(&1u32.to_be_bytes());
    buf.push(OPERATION_ATTRIBUTES_TAG);
    push_attribute(&mut buf, CHARSET, "attributes-charset", "utf-8");
    push_attribute(&mut buf, NATURAL_LANGUAGE, "attributes-natural-language", "en-us");
    push_attribute(&mut buf, URI, "printer-uri", printer_uri);
    push_attribute(&mut buf, KEYWORD, "requested-attributes", "all");
    buf.push(END_OF_ATTRIBUTES_TAG);
    buf
}
