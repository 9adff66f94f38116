// tests/http_scan_test.rs

use std::net::SocketAddr;
use std::time::Duration;

use sha2::{Digest, Sha256};
use vanguard_grab::core::config::{HeaderTable, ScanConfiguration, ScanFlags};
use vanguard_grab::core::error::ErrorKind;
use vanguard_grab::core::models::{ScanStatus, ScanTarget};
use vanguard_grab::core::net::resolver::HostResolver;
use vanguard_grab::core::scanner::http_scanner::HttpScanner;
use vanguard_grab::core::scanner::ModuleKind;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn local_config() -> ScanConfiguration {
    let mut config = ScanFlags::default().validate(ModuleKind::Http).unwrap();
    config.timeout = Duration::from_secs(5);
    config.connect_timeout = Duration::from_secs(5);
    config
}

fn scanner(config: ScanConfiguration) -> HttpScanner {
    HttpScanner::with_resolver(config, HostResolver::fixed("127.0.0.1".parse().unwrap()))
}

fn target_for(server: &MockServer) -> ScanTarget {
    let addr: &SocketAddr = server.address();
    ScanTarget::from_ip(addr.ip()).with_port(addr.port())
}

#[tokio::test]
async fn test_plain_get_captures_body_and_digest() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("server", "mock")
                .set_body_string("<html>hello</html>"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let outcome = scanner(local_config()).scan(&target_for(&mock_server)).await;

    assert_eq!(outcome.status(), ScanStatus::Success);
    assert!(outcome.results.redirect_response_chain.is_empty());
    let response = outcome.results.response.expect("response");
    assert_eq!(response.status_code, 200);
    assert_eq!(response.protocol, "HTTP/1.1");
    assert_eq!(response.header("Server"), Some("mock"));
    assert_eq!(response.body_text, "<html>hello</html>");
    assert_eq!(
        response.body_sha256.as_deref(),
        Some(format!("{:x}", Sha256::digest(b"<html>hello</html>")).as_str())
    );
    assert_eq!(response.request.method, "GET");
    assert!(response.tls_log.is_none());
}

#[tokio::test]
async fn test_body_is_truncated_to_max_size() {
    let mock_server = MockServer::start().await;
    let big = "a".repeat(5000);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(big))
        .mount(&mock_server)
        .await;

    let mut config = local_config();
    config.max_size = 1;
    let outcome = scanner(config).scan(&target_for(&mock_server)).await;

    let response = outcome.results.response.expect("response");
    assert_eq!(response.content_length, Some(5000));
    assert_eq!(response.body_text.len(), 1024);
    assert_eq!(
        response.body_sha256,
        Some(format!("{:x}", Sha256::digest([b'a'; 1024])))
    );
}

#[tokio::test]
async fn test_empty_body_has_no_digest() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let outcome = scanner(local_config()).scan(&target_for(&mock_server)).await;

    assert_eq!(outcome.status(), ScanStatus::Success);
    let response = outcome.results.response.expect("response");
    assert_eq!(response.status_code, 204);
    assert!(response.body_text.is_empty());
    assert!(response.body_sha256.is_none());
}

#[tokio::test]
async fn test_follows_redirects_within_limit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/next")
                .set_body_string("moved"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
        .mount(&mock_server)
        .await;

    let mut config = local_config();
    config.max_redirects = 1;
    config.follow_localhost_redirects = true;
    let outcome = scanner(config).scan(&target_for(&mock_server)).await;

    assert_eq!(outcome.status(), ScanStatus::Success);
    let chain = &outcome.results.redirect_response_chain;
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].status_code, 302);
    assert_eq!(chain[0].body_text, "moved");

    let response = outcome.results.response.expect("response");
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body_text, "landed");
    assert!(response.request.url.ends_with("/next"));
}

#[tokio::test]
async fn test_redirect_overflow() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/loop"))
        .mount(&mock_server)
        .await;

    let mut config = local_config();
    config.endpoint = "/loop".to_string();
    config.max_redirects = 2;
    config.follow_localhost_redirects = true;

    let outcome = scanner(config.clone()).scan(&target_for(&mock_server)).await;
    assert_eq!(outcome.error.as_ref().map(|e| e.kind()), Some(ErrorKind::TooManyRedirects));
    assert_eq!(outcome.status(), ScanStatus::ApplicationError);
    assert_eq!(outcome.results.redirect_response_chain.len(), 3);
    assert!(outcome.results.response.is_none());

    config.redirects_succeed = true;
    let outcome = scanner(config).scan(&target_for(&mock_server)).await;
    assert_eq!(outcome.status(), ScanStatus::Success);
    assert_eq!(outcome.results.redirect_response_chain.len(), 3);
    assert_eq!(outcome.results.response.expect("response").status_code, 301);
}

#[tokio::test]
async fn test_zero_redirects_rejects_the_first_redirect() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(307).insert_header("location", "/elsewhere"))
        .mount(&mock_server)
        .await;

    let mut config = local_config();
    config.follow_localhost_redirects = true;
    let outcome = scanner(config).scan(&target_for(&mock_server)).await;

    assert_eq!(outcome.error.as_ref().map(|e| e.kind()), Some(ErrorKind::TooManyRedirects));
    assert_eq!(outcome.results.redirect_response_chain.len(), 1);
}

#[tokio::test]
async fn test_redirect_to_localhost_is_refused() {
    let mock_server = MockServer::start().await;
    let port = mock_server.address().port();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("http://localhost:{}/next", port)),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = local_config();
    config.max_redirects = 5;
    let outcome = scanner(config).scan(&target_for(&mock_server)).await;

    assert_eq!(outcome.error.as_ref().map(|e| e.kind()), Some(ErrorKind::RedirectToLocalhost));
    assert_eq!(outcome.status(), ScanStatus::ApplicationError);
    assert!(outcome.results.redirect_response_chain.is_empty());
}

#[tokio::test]
async fn test_default_headers_send_accept_only() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("accept", "*/*"))
        .and(header("connection", "close"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let outcome = scanner(local_config()).scan(&target_for(&mock_server)).await;
    let request = outcome.results.response.expect("response").request;
    assert_eq!(request.headers.get("accept"), Some(&vec!["*/*".to_string()]));
    assert!(request.headers.contains_key("user-agent"));
    assert!(request.headers.contains_key("host"));
}

#[tokio::test]
async fn test_custom_headers_override_defaults() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("accept", "text/html"))
        .and(header("x-scan", "1"))
        .and(header("user-agent", "grabber/2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = local_config();
    config.custom_headers =
        HeaderTable::from_pairs(&["Accept", "X-Scan", "User-Agent"], &["text/html", "1", "grabber/2"]).unwrap();
    let outcome = scanner(config).scan(&target_for(&mock_server)).await;

    assert_eq!(outcome.status(), ScanStatus::Success);
    let request = outcome.results.response.expect("response").request;
    assert_eq!(request.headers.get("accept"), Some(&vec!["text/html".to_string()]));
    assert_eq!(request.headers.get("user-agent"), Some(&vec!["grabber/2".to_string()]));
}

#[tokio::test]
async fn test_retry_over_tls_replaces_the_first_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/again"))
        .mount(&mock_server)
        .await;

    let mut config = local_config();
    config.follow_localhost_redirects = true;
    config.retry_https = true;
    let outcome = scanner(config).scan(&target_for(&mock_server)).await;

    // The plaintext attempt hit the redirect limit; the TLS retry against a
    // plaintext server fails in the handshake and that is what gets reported.
    assert_eq!(outcome.error.as_ref().map(|e| e.kind()), Some(ErrorKind::Tls));
    assert!(outcome.results.redirect_response_chain.is_empty());
    assert!(outcome.results.response.is_none());
}

#[tokio::test]
async fn test_slow_server_hits_the_deadline() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let mut config = local_config();
    config.timeout = Duration::from_millis(500);
    let started = std::time::Instant::now();
    let outcome = scanner(config).scan(&target_for(&mock_server)).await;

    assert_eq!(outcome.error.as_ref().map(|e| e.kind()), Some(ErrorKind::Timeout));
    assert_eq!(outcome.status(), ScanStatus::IoTimeout);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_refused_connection() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let target = ScanTarget::from_ip("127.0.0.1".parse().unwrap()).with_port(port);
    let outcome = scanner(local_config()).scan(&target).await;

    assert_eq!(outcome.error.as_ref().map(|e| e.kind()), Some(ErrorKind::Dial));
    assert_eq!(outcome.status(), ScanStatus::ConnectionRefused);
}

#[tokio::test]
async fn test_redirect_to_pinned_domain_is_judged_by_dns() {
    let mock_server = MockServer::start().await;
    let addr = *mock_server.address();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("http://printer.test:{}/next", addr.port())),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
        .expect(1)
        .mount(&mock_server)
        .await;

    // The domain is pinned to the mock server's loopback address for dialing,
    // while DNS itself answers with a public address.
    let target = ScanTarget {
        domain: Some("printer.test".to_string()),
        ip: Some(addr.ip()),
        port: Some(addr.port()),
    };
    let mut config = local_config();
    config.max_redirects = 3;
    let scanner = HttpScanner::with_resolver(config, HostResolver::fixed("192.0.2.10".parse().unwrap()));
    let outcome = scanner.scan(&target).await;

    assert_eq!(outcome.status(), ScanStatus::Success, "{:?}", outcome.error);
    assert_eq!(outcome.results.redirect_response_chain.len(), 1);
    assert_eq!(outcome.results.response.expect("response").body_text, "landed");
}
