// src/core/error.rs

use std::io;

use serde::Serialize;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::core::models::ScanStatus;

/// Structural tag for a `ScanError`, so callers can compare failures by kind
/// instead of matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    Dial,
    Tls,
    RedirectToLocalhost,
    TooManyRedirects,
    Timeout,
    Protocol,
    Io,
    InvalidUrl,
    UnexpectedContentType,
}

/// Everything that can end a scan attempt early.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("dial {address} failed: {source}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {address} failed: {source}")]
    Tls {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Redirecting to localhost")]
    RedirectToLocalhost,

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("deadline expired while {0}")]
    Timeout(&'static str),

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error("I/O error while {stage}: {source}")]
    Io {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unexpected content type {found:?}, wanted {wanted}")]
    UnexpectedContentType { wanted: &'static str, found: String },
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::Dial { .. } => ErrorKind::Dial,
            ScanError::Tls { .. } => ErrorKind::Tls,
            ScanError::RedirectToLocalhost => ErrorKind::RedirectToLocalhost,
            ScanError::TooManyRedirects => ErrorKind::TooManyRedirects,
            ScanError::Timeout(_) => ErrorKind::Timeout,
            ScanError::Protocol(_) => ErrorKind::Protocol,
            ScanError::Io { .. } => ErrorKind::Io,
            ScanError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            ScanError::UnexpectedContentType { .. } => ErrorKind::UnexpectedContentType,
        }
    }

    /// Maps the failure onto the coarse status the surrounding framework reports.
    pub fn status(&self) -> ScanStatus {
        match self {
            ScanError::Dial { source, .. } => match source.kind() {
                io::ErrorKind::ConnectionRefused => ScanStatus::ConnectionRefused,
                io::ErrorKind::TimedOut => ScanStatus::ConnectionTimeout,
                _ => ScanStatus::UnknownError,
            },
            ScanError::Tls { source, .. } => match source.kind() {
                io::ErrorKind::TimedOut => ScanStatus::IoTimeout,
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::UnexpectedEof => ScanStatus::ConnectionClosed,
                _ => ScanStatus::ProtocolError,
            },
            ScanError::RedirectToLocalhost | ScanError::TooManyRedirects => {
                ScanStatus::ApplicationError
            }
            ScanError::Timeout(_) => ScanStatus::IoTimeout,
            ScanError::Protocol(_) | ScanError::UnexpectedContentType { .. } => {
                ScanStatus::ProtocolError
            }
            ScanError::Io { source, .. } => match source.kind() {
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => ScanStatus::ConnectionClosed,
                _ => ScanStatus::UnknownError,
            },
            ScanError::InvalidUrl(_) => ScanStatus::UnknownError,
        }
    }
}

/// Raised while turning `ScanFlags` into a `ScanConfiguration`, before any scan runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("custom-headers-names must be specified if custom-headers-values is provided")]
    MissingHeaderNames,

    #[error("custom-headers-values must be specified if custom-headers-names is provided")]
    MissingHeaderValues,

    #[error("custom-headers-{list} has an unterminated quoted field")]
    UnterminatedQuote { list: &'static str },

    #[error("could not parse custom-headers-{list}: {source}")]
    HeaderList {
        list: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("inconsistent number of HTTP header names ({names}) and values ({values})")]
    HeaderCountMismatch { names: usize, values: usize },

    #[error("invalid custom header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid request method {0:?}")]
    InvalidMethod(String),

    #[error("endpoint must start with '/': {0:?}")]
    InvalidEndpoint(String),

    #[error("could not read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("could not parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
