// src/core/models.rs

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::core::ipp::{Attribute, IppHeader};

// --- Targets ---

/// What to scan. At least one of `domain` / `ip` is set; when both are, the
/// domain is resolved to `ip` for the initial host only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScanTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ScanTarget {
    pub fn from_ip(ip: IpAddr) -> Self {
        Self { ip: Some(ip), ..Default::default() }
    }

    pub fn from_domain(domain: impl Into<String>) -> Self {
        Self { domain: Some(domain.into()), ..Default::default() }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// The name used in URLs and `Host` headers: the domain when known, else the IP.
    pub fn host(&self) -> Option<String> {
        self.domain
            .clone()
            .or_else(|| self.ip.map(|ip| ip.to_string()))
    }

    /// The address to substitute when `host` is looked up, if this target pins one.
    pub fn pinned_ip_for(&self, host: &str) -> Option<IpAddr> {
        match (&self.domain, self.ip) {
            (Some(domain), Some(ip)) if domain == host => Some(ip),
            _ => None,
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.ip, &self.domain) {
            (Some(ip), Some(domain)) => write!(f, "{} ({})", domain, ip)?,
            (Some(ip), None) => write!(f, "{}", ip)?,
            (None, Some(domain)) => write!(f, "{}", domain)?,
            (None, None) => write!(f, "<empty>")?,
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

/// Parses the input line format `ip`, `domain`, `ip,domain` or any of those
/// followed by `,port`.
impl FromStr for ScanTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if fields.is_empty() || fields.len() > 3 || fields[0].is_empty() {
            return Err(format!("invalid target line {:?}", s));
        }

        let mut target = ScanTarget::default();
        match fields[0].parse::<IpAddr>() {
            Ok(ip) => target.ip = Some(ip),
            Err(_) => target.domain = Some(fields[0].to_string()),
        }
        if let Some(second) = fields.get(1).filter(|f| !f.is_empty()) {
            if target.domain.is_some() {
                return Err(format!("expected an IP before the domain in {:?}", s));
            }
            target.domain = Some(second.to_string());
        }
        if let Some(port) = fields.get(2).filter(|f| !f.is_empty()) {
            let port = port
                .parse::<u16>()
                .map_err(|e| format!("invalid port {:?}: {}", port, e))?;
            target.port = Some(port);
        }
        Ok(target)
    }
}

// --- Status ---

/// Coarse outcome of one scan, as consumed by whatever drives the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ScanStatus {
    Success,
    ConnectionRefused,
    ConnectionTimeout,
    ConnectionClosed,
    IoTimeout,
    ProtocolError,
    ApplicationError,
    UnknownError,
}

// --- TLS ---

/// Summary of the leaf certificate the server presented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject_name: String,
    pub issuer_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
}

/// What was negotiated on one TLS connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsLog {
    pub server_name: String,
    pub version: Option<String>,
    pub cipher_suite: Option<String>,
    pub certificate: Option<CertificateInfo>,
}

// --- HTTP ---

/// The request as it went on the wire for one hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, Vec<String>>,
}

/// One response as captured by the scanner, either a redirect hop or the final one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub protocol: String,
    pub status_code: u16,
    pub status_line: String,
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    pub request: HttpRequest,
    pub body_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_log: Option<TlsLog>,
}

impl HttpResponse {
    /// First value of a response header.
    ///
    /// # Arguments
    /// * `name` - Header name, in any case.
    ///
    /// # Returns
    /// The first value received for `name`, or `None` when it was absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value received for `name`, in arrival order.
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Final response plus every redirect response seen before it, in order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HttpResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponse>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub redirect_response_chain: Vec<HttpResponse>,
}

// --- IPP ---

/// What the IPP module learned, on top of the HTTP exchange that carried it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IppResults {
    pub version_major: Option<u8>,
    pub version_minor: Option<u8>,
    pub version_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cups_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipp_header: Option<IppHeader>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_cups_version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attribute_ipp_versions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attribute_printer_uris: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_make_and_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
    #[serde(flatten)]
    pub http: HttpResults,
}

// --- Report ---

/// Module-specific results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanResults {
    Http(HttpResults),
    Ipp(IppResults),
}

/// One line of scanner output: what was scanned, how it went, and what was seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub module: String,
    pub target: ScanTarget,
    pub status: ScanStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
