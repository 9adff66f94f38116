// src/core/scanner/http_scanner.rs

use std::collections::BTreeMap;
use std::future::Future;

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST,
    LOCATION, USER_AGENT,
};
use reqwest::Method;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::{Host, Position, Url};

use super::capture;
use crate::core::config::ScanConfiguration;
use crate::core::error::ScanError;
use crate::core::models::{HttpRequest, HttpResponse, HttpResults, ScanStatus, ScanTarget};
use crate::core::net::connection::{join_host_port, ConnectionManager};
use crate::core::net::http1::{self, Request};
use crate::core::net::resolver::{points_to_localhost, HostResolver};
use crate::core::net::tls::TlsSettings;

/// What to send on the first hop of an attempt.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub endpoint: String,
    pub content_type: Option<HeaderValue>,
    pub body: Option<Vec<u8>>,
}

impl RequestSpec {
    /// A body-less request using the configured method and endpoint.
    pub fn from_config(config: &ScanConfiguration) -> Self {
        Self {
            method: config.method.clone(),
            endpoint: config.endpoint.clone(),
            content_type: None,
            body: None,
        }
    }

    pub fn post(endpoint: &str, content_type: HeaderValue, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            endpoint: endpoint.to_string(),
            content_type: Some(content_type),
            body: Some(body),
        }
    }

    /// Applies the method rewriting a browser does when following `status`.
    fn follow(&mut self, status: u16) {
        let drop_body = match status {
            303 => self.method != Method::HEAD,
            301 | 302 => self.method == Method::POST,
            _ => false,
        };
        if drop_body {
            self.method = Method::GET;
            self.body = None;
            self.content_type = None;
        }
    }
}

/// Results of one scan, plus the error that ended it early, if any.
#[derive(Debug)]
pub struct Outcome<T> {
    pub results: T,
    pub error: Option<ScanError>,
}

impl<T> Outcome<T> {
    pub fn status(&self) -> ScanStatus {
        self.error
            .as_ref()
            .map_or(ScanStatus::Success, ScanError::status)
    }
}

/// Runs `attempt` over the configured transport and, when it fails over
/// plaintext with `retry_https` set, once more over TLS. The retry's outcome
/// replaces the first one.
pub async fn with_tls_retry<T, F, Fut>(
    config: &ScanConfiguration,
    target: &ScanTarget,
    mut attempt: F,
) -> Outcome<T>
where
    F: FnMut(bool) -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    let first = attempt(config.use_https).await;
    match &first.error {
        Some(e) if config.retry_https && !config.use_https => {
            warn!(target = %target, error = %e, "Plaintext attempt failed, retrying over TLS.");
            attempt(true).await
        }
        _ => first,
    }
}

/// Builds the URL of the first hop, leaving out the scheme's default port.
pub fn build_url(use_tls: bool, host: &str, port: u16, endpoint: &str) -> Result<Url, ScanError> {
    let (scheme, default_port) = if use_tls { ("https", 443) } else { ("http", 80) };
    let authority = if port != default_port {
        join_host_port(host, port)
    } else if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    Ok(Url::parse(&format!("{}://{}{}", scheme, authority, endpoint))?)
}

/// The URL's host as it is dialed: IPv6 literals without brackets.
fn bare_host(url: &Url) -> String {
    match url.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(host) => host.to_string(),
        None => String::new(),
    }
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

fn header_map_to_btree(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        map.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

/// One request/response pair on a fresh connection.
struct Exchange {
    response: HttpResponse,
    body: Vec<u8>,
    location: Option<String>,
}

/// One bounded attempt against a target: a private set of connections, a
/// global deadline, and the results gathered so far.
pub struct ScanSession<'a> {
    config: &'a ScanConfiguration,
    target: &'a ScanTarget,
    use_tls: bool,
    conns: ConnectionManager,
    results: HttpResults,
}

impl<'a> ScanSession<'a> {
    pub fn new(
        config: &'a ScanConfiguration,
        target: &'a ScanTarget,
        resolver: HostResolver,
        use_tls: bool,
    ) -> Self {
        let deadline = Instant::now() + config.timeout;
        let conns = ConnectionManager::new(
            target.clone(),
            resolver,
            TlsSettings::new(config.override_sig_hash),
            config.connect_timeout,
            deadline,
        );
        Self {
            config,
            target,
            use_tls,
            conns,
            results: HttpResults::default(),
        }
    }

    pub fn uses_tls(&self) -> bool {
        self.use_tls
    }

    pub fn deadline(&self) -> Instant {
        self.conns.deadline()
    }

    /// The port to scan: the target's own, else the configured one.
    pub fn port(&self) -> u16 {
        self.target.port.unwrap_or(self.config.port)
    }

    /// The host used in the first URL: the domain when known, else the IP.
    pub fn host(&self) -> Result<String, ScanError> {
        self.target
            .host()
            .ok_or(ScanError::InvalidUrl(url::ParseError::EmptyHost))
    }

    pub fn initial_url(&self, endpoint: &str) -> Result<Url, ScanError> {
        build_url(self.use_tls, &self.host()?, self.port(), endpoint)
    }

    /// Responses gathered by the latest `fetch`.
    pub fn results(&self) -> &HttpResults {
        &self.results
    }

    pub fn into_results(mut self) -> HttpResults {
        std::mem::take(&mut self.results)
    }

    /// Closes every connection the session opened.
    pub fn cleanup(&mut self) {
        self.conns.cleanup();
    }

    /// Sends `request`, following redirects as configured, and returns the
    /// captured body of the response that ends up in `results().response`.
    ///
    /// Each call starts from empty results. On error the results keep every
    /// redirect hop seen before the failure.
    pub async fn fetch(&mut self, request: &RequestSpec) -> Result<Vec<u8>, ScanError> {
        self.results = HttpResults::default();
        let mut url = self.initial_url(&request.endpoint)?;
        let mut current = request.clone();
        let mut requests_made = 0usize;

        loop {
            let exchange = self.exchange(&url, &current).await?;
            requests_made += 1;

            let status = exchange.response.status_code;
            let location = match exchange.location {
                Some(location) if is_redirect(status) => location,
                _ => {
                    self.results.response = Some(exchange.response);
                    return Ok(exchange.body);
                }
            };

            let next = url.join(&location)?;
            let next_host = bare_host(&next);
            debug!(status, from = %url, to = %next, "Following redirect.");

            if !self.config.follow_localhost_redirects {
                let resolver = self.conns.system_resolver();
                if points_to_localhost(&next_host, resolver, self.deadline()).await {
                    warn!(location = %next, "Refusing redirect to localhost.");
                    return Err(ScanError::RedirectToLocalhost);
                }
            }

            self.results.redirect_response_chain.push(exchange.response);
            if requests_made > self.config.max_redirects {
                if self.config.redirects_succeed {
                    info!(redirects = requests_made, "Redirect limit reached, reporting last redirect.");
                    self.results.response = self.results.redirect_response_chain.last().cloned();
                    return Ok(exchange.body);
                }
                return Err(ScanError::TooManyRedirects);
            }

            current.follow(status);
            url = next;
        }
    }

    fn request_headers(&self, url: &Url, request: &RequestSpec) -> Vec<(HeaderName, HeaderValue)> {
        let custom = &self.config.custom_headers;
        let mut headers: Vec<(HeaderName, HeaderValue)> = Vec::new();
        let push_default = |headers: &mut Vec<_>, name: HeaderName, value: HeaderValue| {
            if !custom.contains(&name) {
                headers.push((name, value));
            }
        };

        let host = match url.port() {
            Some(port) => join_host_port(url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&host) {
            push_default(&mut headers, HOST, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.config.user_agent) {
            push_default(&mut headers, USER_AGENT, value);
        }
        push_default(&mut headers, ACCEPT, HeaderValue::from_static("*/*"));
        if let Some(content_type) = &request.content_type {
            push_default(&mut headers, CONTENT_TYPE, content_type.clone());
        }

        for (name, value) in custom.iter() {
            if name != CONNECTION && name != CONTENT_LENGTH {
                headers.push((name.clone(), value.clone()));
            }
        }

        if let Some(body) = &request.body {
            headers.push((CONTENT_LENGTH, HeaderValue::from(body.len())));
        }
        headers.push((CONNECTION, HeaderValue::from_static("close")));
        headers
    }

    async fn exchange(&mut self, url: &Url, request: &RequestSpec) -> Result<Exchange, ScanError> {
        let host = bare_host(url);
        let port = url
            .port_or_known_default()
            .ok_or(ScanError::InvalidUrl(url::ParseError::InvalidPort))?;
        let conn_id = match url.scheme() {
            "https" => self.conns.dial_tls(&host, port).await?,
            "http" => self.conns.dial(&host, port).await?,
            other => {
                return Err(ScanError::Protocol(format!("unsupported scheme {:?} in {}", other, url)));
            }
        };

        let wire = Request {
            method: request.method.clone(),
            target: url[Position::BeforePath..Position::AfterQuery].to_string(),
            headers: self.request_headers(url, request),
            body: request.body.clone(),
        };
        let mut sent = HeaderMap::new();
        for (name, value) in &wire.headers {
            sent.append(name.clone(), value.clone());
        }
        let http_request = HttpRequest {
            method: wire.method.to_string(),
            url: url.to_string(),
            headers: header_map_to_btree(&sent),
        };

        let deadline = self.deadline();
        let max_bytes = usize::try_from(self.config.max_body_bytes()).unwrap_or(usize::MAX);
        let conn = self
            .conns
            .get_mut(conn_id)
            .ok_or_else(|| ScanError::Protocol("connection closed before use".to_string()))?;
        let tls_log = conn.tls_log().cloned();

        debug!(method = %wire.method, url = %url, "Sending request.");
        let received = http1::exchange(&mut *conn, &wire, max_bytes, deadline).await;
        self.conns.close(conn_id);
        let received = received?;

        let content_type = received.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let location = received
            .headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        debug!(status = received.status.as_u16(), captured = received.body.len(), "Received response.");

        let response = HttpResponse {
            protocol: received.protocol(),
            status_code: received.status.as_u16(),
            status_line: received.status_line(),
            headers: header_map_to_btree(&received.headers),
            content_length: received
                .headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
            request: http_request,
            body_text: capture::decode_body(&received.body, content_type),
            body_sha256: capture::digest(&received.body),
            tls_log,
        };

        Ok(Exchange { response, body: received.body, location })
    }
}

/// The plain HTTP banner grab.
pub struct HttpScanner {
    config: ScanConfiguration,
    resolver: HostResolver,
}

impl HttpScanner {
    pub fn new(config: ScanConfiguration) -> Self {
        Self::with_resolver(config, HostResolver::system())
    }

    pub fn with_resolver(config: ScanConfiguration, resolver: HostResolver) -> Self {
        Self { config, resolver }
    }

    pub fn config(&self) -> &ScanConfiguration {
        &self.config
    }

    /// Opens a fresh attempt against `target` with its own deadline and connections.
    pub fn session<'a>(&'a self, target: &'a ScanTarget, use_tls: bool) -> ScanSession<'a> {
        ScanSession::new(&self.config, target, self.resolver.clone(), use_tls)
    }

    /// Fetches the configured endpoint from `target`.
    ///
    /// # Returns
    /// The response (and any redirect chain) together with the error that ended
    /// the attempt, if one did. Partial results survive errors.
    pub async fn scan(&self, target: &ScanTarget) -> Outcome<HttpResults> {
        info!(target = %target, "Starting HTTP scan.");
        let outcome = with_tls_retry(&self.config, target, move |use_tls| self.attempt(target, use_tls)).await;
        match &outcome.error {
            None => info!(target = %target, "HTTP scan finished."),
            Some(e) => error!(target = %target, error = %e, status = %outcome.status(), "HTTP scan failed."),
        }
        outcome
    }

    async fn attempt(&self, target: &ScanTarget, use_tls: bool) -> Outcome<HttpResults> {
        let mut session = self.session(target, use_tls);
        let request = RequestSpec::from_config(&self.config);
        let error = session.fetch(&request).await.err();
        session.cleanup();
        Outcome { results: session.into_results(), error }
    }
}
