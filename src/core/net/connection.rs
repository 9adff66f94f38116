// src/core/net/connection.rs

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::resolver::HostResolver;
use super::tls::{tls_log, TlsSettings};
use super::{effective_deadline, until};
use crate::core::error::ScanError;
use crate::core::models::{ScanTarget, TlsLog};

/// A socket opened by a session, plain or TLS-wrapped.
pub enum Connection {
    Plain(TcpStream),
    Tls {
        stream: Box<TlsStream<TcpStream>>,
        log: TlsLog,
    },
}

impl Connection {
    /// Handshake details, for TLS connections only.
    pub fn tls_log(&self) -> Option<&TlsLog> {
        match self {
            Connection::Plain(_) => None,
            Connection::Tls { log, .. } => Some(log),
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Connection::Tls { stream, .. } => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Connection::Tls { stream, .. } => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Connection::Tls { stream, .. } => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Connection::Tls { stream, .. } => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Index of a connection registered with a `ConnectionManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnId(usize);

/// Opens connections for one session and owns every one of them until
/// `cleanup` (or drop) closes them.
pub struct ConnectionManager {
    target: ScanTarget,
    system_resolver: HostResolver,
    tls: TlsSettings,
    connect_timeout: Duration,
    deadline: Instant,
    connections: Vec<Option<Connection>>,
}

impl ConnectionManager {
    pub fn new(
        target: ScanTarget,
        system_resolver: HostResolver,
        tls: TlsSettings,
        connect_timeout: Duration,
        deadline: Instant,
    ) -> Self {
        Self {
            target,
            system_resolver,
            tls,
            connect_timeout,
            deadline,
            connections: Vec::new(),
        }
    }

    /// The session's global deadline; no dial or handshake outlives it.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The resolver to use for `host`: the target's pinned IP when `host` is
    /// the target's own domain, real DNS otherwise. Checked on every dial so
    /// redirects to other hosts are resolved normally.
    pub fn resolver_for(&self, host: &str) -> HostResolver {
        match self.target.pinned_ip_for(host) {
            Some(ip) => HostResolver::fixed(ip),
            None => self.system_resolver.clone(),
        }
    }

    /// The resolver without target pinning, as real DNS would answer.
    pub fn system_resolver(&self) -> &HostResolver {
        &self.system_resolver
    }

    /// Opens a plain TCP connection and registers it.
    pub async fn dial(&mut self, host: &str, port: u16) -> Result<ConnId, ScanError> {
        let stream = self.connect(host, port).await?;
        Ok(self.register(Connection::Plain(stream)))
    }

    /// Opens a TCP connection, wraps it in TLS and completes the handshake
    /// before registering it. The TLS stream owns the raw socket, so one
    /// registration covers both.
    pub async fn dial_tls(&mut self, host: &str, port: u16) -> Result<ConnId, ScanError> {
        let address = join_host_port(host, port);
        let raw = self.connect(host, port).await?;

        let tls_error = |source: io::Error| ScanError::Tls {
            address: address.clone(),
            source,
        };
        let config = self
            .tls
            .client_config()
            .map_err(|e| tls_error(io::Error::other(e)))?;
        let server_name = TlsSettings::server_name(host)
            .map_err(|e| tls_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let deadline = effective_deadline(self.deadline, self.connect_timeout);
        debug!(address = %address, "Performing TLS handshake.");
        let stream = until(deadline, TlsConnector::from(config).connect(server_name, raw))
            .await
            .ok_or_else(|| {
                tls_error(io::Error::new(io::ErrorKind::TimedOut, "handshake timed out"))
            })?
            .map_err(|e| {
                warn!(address = %address, error = %e, "TLS handshake failed.");
                tls_error(e)
            })?;

        let log = tls_log(host, stream.get_ref().1);
        debug!(address = %address, version = ?log.version, cipher = ?log.cipher_suite, "TLS handshake complete.");
        Ok(self.register(Connection::Tls {
            stream: Box::new(stream),
            log,
        }))
    }

    /// Borrows a registered connection.
    ///
    /// # Returns
    /// `None` once the connection was closed or the manager cleaned up.
    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.connections.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Closes the connection early; it stays counted but is no longer usable.
    pub fn close(&mut self, id: ConnId) {
        if let Some(slot) = self.connections.get_mut(id.0) {
            slot.take();
        }
    }

    pub fn open_count(&self) -> usize {
        self.connections.iter().filter(|c| c.is_some()).count()
    }

    /// Closes every registered connection. Safe to call any number of times.
    pub fn cleanup(&mut self) {
        let open = self.open_count();
        if open > 0 {
            debug!(connections = open, "Closing session connections.");
        }
        self.connections.clear();
    }

    fn register(&mut self, conn: Connection) -> ConnId {
        self.connections.push(Some(conn));
        ConnId(self.connections.len() - 1)
    }

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, ScanError> {
        let address = join_host_port(host, port);
        let deadline = effective_deadline(self.deadline, self.connect_timeout);
        let dial_error = |source: io::Error| ScanError::Dial {
            address: address.clone(),
            source,
        };

        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        let addrs = self
            .resolver_for(bare_host)
            .lookup(bare_host, deadline)
            .await
            .map_err(dial_error)?;

        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses to dial");
        for ip in addrs {
            let socket_addr = SocketAddr::new(ip, port);
            debug!(address = %address, ip = %socket_addr, "Dialing.");
            match until(deadline, TcpStream::connect(socket_addr)).await {
                Some(Ok(stream)) => return Ok(stream),
                Some(Err(e)) => {
                    debug!(ip = %socket_addr, error = %e, "Connect failed, trying next address.");
                    last_error = e;
                }
                None => {
                    last_error = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
                    break;
                }
            }
        }
        Err(dial_error(last_error))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// `host:port`, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn manager(target: ScanTarget, timeout: Duration) -> ConnectionManager {
        ConnectionManager::new(
            target,
            HostResolver::fixed("192.0.2.1".parse().unwrap()),
            TlsSettings::new(false),
            timeout,
            Instant::now() + timeout,
        )
    }

    #[test]
    fn joins_host_and_port() {
        assert_eq!(join_host_port("example.com", 80), "example.com:80");
        assert_eq!(join_host_port("::1", 443), "[::1]:443");
        assert_eq!(join_host_port("[::1]", 443), "[::1]:443");
    }

    #[tokio::test]
    async fn pins_only_the_target_domain() {
        let target = ScanTarget {
            domain: Some("printer.example".into()),
            ip: Some("127.0.0.1".parse().unwrap()),
            port: None,
        };
        let conns = manager(target, Duration::from_secs(1));
        let soon = Instant::now() + Duration::from_secs(1);

        let pinned = conns.resolver_for("printer.example").lookup("printer.example", soon).await.unwrap();
        assert_eq!(pinned, vec!["127.0.0.1".parse::<std::net::IpAddr>().unwrap()]);

        let other = conns.resolver_for("elsewhere.example").lookup("elsewhere.example", soon).await.unwrap();
        assert_eq!(other, vec!["192.0.2.1".parse::<std::net::IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn dials_through_the_pinned_address_and_cleans_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let mut held = Vec::new();
            for _ in 0..2 {
                let (sock, _) = listener.accept().await.unwrap();
                held.push(sock);
            }
            held
        });

        let target = ScanTarget {
            domain: Some("printer.example".into()),
            ip: Some("127.0.0.1".parse().unwrap()),
            port: Some(port),
        };
        let mut conns = manager(target, Duration::from_secs(5));
        let first = conns.dial("printer.example", port).await.unwrap();
        let second = conns.dial("127.0.0.1", port).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(conns.open_count(), 2);
        assert!(conns.get_mut(first).unwrap().tls_log().is_none());

        conns.cleanup();
        conns.cleanup();
        assert_eq!(conns.open_count(), 0);
        assert!(conns.get_mut(first).is_none());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn refused_dial_is_a_dial_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut conns = manager(ScanTarget::from_ip("127.0.0.1".parse().unwrap()), Duration::from_secs(2));
        let err = conns.dial("127.0.0.1", port).await.unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Dial);
        assert_eq!(conns.open_count(), 0);
    }

    #[tokio::test]
    async fn handshake_against_plaintext_is_a_tls_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = sock.read(&mut buf).await;
            let _ = sock.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });

        let mut conns = manager(ScanTarget::from_ip("127.0.0.1".parse().unwrap()), Duration::from_secs(5));
        let err = conns.dial_tls("127.0.0.1", port).await.unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Tls);
        assert_eq!(conns.open_count(), 0);
    }
}
