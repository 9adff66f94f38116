// src/core/net/http1.rs

//! One HTTP/1.1 exchange per connection, driven by hyper's client connection
//! over a socket the `ConnectionManager` already opened and registered.

use std::io;
use std::pin::pin;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::http1::Builder;
use hyper::ext::ReasonPhrase;
use hyper::Uri;
use hyper_util::rt::TokioIo;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::debug;

use super::until;
use crate::core::error::ScanError;

/// Read-buffer ceiling; a status line plus headers larger than this is rejected.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// A request ready to be sent over a connection.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Origin-form target: path plus optional query.
    pub target: String,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    fn to_hyper(&self) -> Result<hyper::Request<Full<Bytes>>, ScanError> {
        let body = self.body.clone().map(Bytes::from).unwrap_or_default();
        let mut request = hyper::Request::new(Full::new(body));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self
            .target
            .parse::<Uri>()
            .map_err(|e| ScanError::Protocol(format!("bad request target {:?}: {}", self.target, e)))?;
        for (name, value) in &self.headers {
            request.headers_mut().append(name.clone(), value.clone());
        }
        Ok(request)
    }
}

/// A response head plus as much of its body as the capture limit allowed.
#[derive(Debug, Clone)]
pub struct Response {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    /// The protocol as it appears on the status line, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> String {
        format!("{:?}", self.version)
    }

    pub fn status_line(&self) -> String {
        format!("{} {}", self.status.as_u16(), self.reason).trim_end().to_string()
    }
}

/// Sends `request` over `io` and reads the response.
///
/// The head must arrive before `deadline`. The body is read until it ends,
/// `max_bytes` are held or the deadline passes, whichever comes first; a body
/// cut short by the peer or the clock keeps what arrived.
///
/// # Returns
/// The response, or the `ScanError` that kept a response head from arriving.
pub async fn exchange<T>(
    io: T,
    request: &Request,
    max_bytes: usize,
    deadline: Instant,
) -> Result<Response, ScanError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let outgoing = request.to_hyper()?;
    let mut builder = Builder::new();
    builder.title_case_headers(true).max_buf_size(MAX_HEAD_BYTES);
    let (mut sender, conn) = builder
        .handshake::<_, Full<Bytes>>(TokioIo::new(io))
        .await
        .map_err(|e| wire_error("starting the exchange", e))?;

    let work = async {
        let response = until(deadline, sender.send_request(outgoing))
            .await
            .ok_or(ScanError::Timeout("waiting for the response"))?
            .map_err(|e| wire_error("reading the response", e))?;
        let (parts, mut body) = response.into_parts();
        let reason = parts
            .extensions
            .get::<ReasonPhrase>()
            .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned())
            .or_else(|| parts.status.canonical_reason().map(str::to_string))
            .unwrap_or_default();
        let body = capture(&mut body, max_bytes, deadline).await;
        Ok::<_, ScanError>(Response {
            version: parts.version,
            status: parts.status,
            reason,
            headers: parts.headers,
            body,
        })
    };

    let mut conn = pin!(conn);
    let mut work = pin!(work);
    tokio::select! {
        biased;
        result = &mut work => result,
        ended = &mut conn => {
            if let Err(e) = ended {
                debug!(error = %e, "Connection ended with an error.");
            }
            work.await
        }
    }
}

async fn capture(body: &mut Incoming, max_bytes: usize, deadline: Instant) -> Vec<u8> {
    let mut captured = Vec::new();
    let read = async {
        while captured.len() < max_bytes {
            let Some(frame) = body.frame().await else {
                break;
            };
            if let Ok(data) = frame?.into_data() {
                let room = max_bytes - captured.len();
                captured.extend_from_slice(&data[..data.len().min(room)]);
            }
        }
        Ok::<_, hyper::Error>(())
    };
    let outcome = until(deadline, read).await;
    match outcome {
        Some(Ok(())) => {}
        Some(Err(e)) => debug!(error = %e, captured = captured.len(), "Body read ended early."),
        None => debug!(captured = captured.len(), "Deadline reached while reading body."),
    }
    captured
}

fn wire_error(stage: &'static str, e: hyper::Error) -> ScanError {
    let io_kind = std::error::Error::source(&e)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .map(io::Error::kind);
    match io_kind {
        Some(kind) => ScanError::Io { stage, source: io::Error::new(kind, e) },
        None if e.is_incomplete_message() => ScanError::Io {
            stage,
            source: io::Error::new(io::ErrorKind::UnexpectedEof, e),
        },
        None => ScanError::Protocol(e.to_string()),
    }
}
