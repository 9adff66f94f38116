// src/core/scanner/ipp_scanner.rs

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderValue;
use tracing::{debug, error, info, warn};

use super::http_scanner::{with_tls_retry, HttpScanner, Outcome, RequestSpec};
use crate::core::config::ScanConfiguration;
use crate::core::error::ScanError;
use crate::core::ipp::request::{get_printer_attributes, printer_uri, VERSIONS};
use crate::core::ipp::{has_content_type, version_check, Decoder, VersionCheck, CONTENT_TYPE};
use crate::core::models::{HttpResponse, IppResults, ScanTarget};
use crate::core::net::resolver::HostResolver;

static RE_CUPS_SERVER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bCUPS/(\d[\w.]*)").unwrap_or_else(|e| unreachable!("invalid CUPS pattern: {}", e))
});

/// CUPS version advertised in a `Server` header such as `CUPS/2.4 IPP/2.1`.
pub fn cups_version_from_server(server: &str) -> Option<String> {
    RE_CUPS_SERVER
        .captures(server)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Fills the IPP half of `results` from a captured response body.
fn record_response(results: &mut IppResults, response: &HttpResponse, body: &[u8], capture_limit: usize) {
    results.cups_version = response.header("server").and_then(cups_version_from_server);

    let decoded = Decoder::with_capture_limit(capture_limit).decode(body);
    if let Some(e) = decoded.error {
        warn!(error = %e, "IPP response did not decode cleanly.");
        results.decode_error = Some(e.to_string());
    }
    let message = decoded.message;

    let first_text = |name: &str| {
        message
            .find(name)
            .and_then(|a| a.text_values().into_iter().next())
    };
    let all_text = |name: &str| message.find(name).map(|a| a.text_values()).unwrap_or_default();

    results.attribute_cups_version = first_text("cups-version");
    results.attribute_make_and_model = first_text("printer-make-and-model");
    results.attribute_ipp_versions = all_text("ipp-versions-supported");
    results.attribute_printer_uris = all_text("printer-uri-supported");
    results.ipp_header = message.header;
    results.attributes = message.attributes().cloned().collect();
}

/// Printer discovery over IPP: a Get-Printer-Attributes request sent through
/// the HTTP engine, stepping down protocol versions until one is accepted.
pub struct IppScanner {
    http: HttpScanner,
}

impl IppScanner {
    pub fn new(config: ScanConfiguration) -> Self {
        Self { http: HttpScanner::new(config) }
    }

    pub fn with_resolver(config: ScanConfiguration, resolver: HostResolver) -> Self {
        Self { http: HttpScanner::with_resolver(config, resolver) }
    }

    pub fn config(&self) -> &ScanConfiguration {
        self.http.config()
    }

    pub async fn scan(&self, target: &ScanTarget) -> Outcome<IppResults> {
        info!(target = %target, "Starting IPP scan.");
        let outcome =
            with_tls_retry(self.config(), target, move |use_tls| self.attempt(target, use_tls)).await;
        match &outcome.error {
            None => info!(
                target = %target,
                version = outcome.results.version_string.as_deref().unwrap_or("-"),
                "IPP scan finished."
            ),
            Some(e) => error!(target = %target, error = %e, status = %outcome.status(), "IPP scan failed."),
        }
        outcome
    }

    async fn attempt(&self, target: &ScanTarget, use_tls: bool) -> Outcome<IppResults> {
        let config = self.config();
        let mut session = self.http.session(target, use_tls);
        let mut results = IppResults::default();

        let host = match session.host() {
            Ok(host) => host,
            Err(e) => return Outcome { results, error: Some(e) },
        };
        let uri = printer_uri(use_tls, &host, session.port(), &config.endpoint);
        let capture_limit = usize::try_from(config.max_body_bytes()).unwrap_or(usize::MAX);

        let mut error = None;
        for (i, &(major, minor)) in VERSIONS.iter().enumerate() {
            let request = RequestSpec::post(
                &config.endpoint,
                HeaderValue::from_static(CONTENT_TYPE),
                get_printer_attributes((major, minor), &uri),
            );
            debug!(uri = %uri, major, minor, "Sending Get-Printer-Attributes.");

            let body = match session.fetch(&request).await {
                Ok(body) => body,
                Err(e) => {
                    error = Some(e);
                    break;
                }
            };
            let Some(response) = session.results().response.clone() else {
                break;
            };

            let content_types = response.header_values("content-type");
            if !has_content_type(content_types.iter().map(String::as_str), CONTENT_TYPE) {
                error = Some(ScanError::UnexpectedContentType {
                    wanted: CONTENT_TYPE,
                    found: content_types.join(", "),
                });
                break;
            }

            if version_check(&body) == VersionCheck::NotSupported && i + 1 < VERSIONS.len() {
                debug!(major, minor, "Version not supported, stepping down.");
                continue;
            }

            results.version_major = Some(major);
            results.version_minor = Some(minor);
            results.version_string = Some(format!("IPP/{}.{}", major, minor));
            record_response(&mut results, &response, &body, capture_limit);
            break;
        }

        session.cleanup();
        results.http = session.into_results();
        Outcome { results, error }
    }
}
