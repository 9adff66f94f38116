// src/core/mod.rs

// Root of the `core` module: everything needed to turn one target into one
// scan report.

/// Flags as read from disk and the validated configuration built from them.
pub mod config;

/// `ScanError` and `ConfigError`, plus their mapping onto scan statuses.
pub mod error;

/// Internet Printing Protocol encoding and decoding.
pub mod ipp;

/// Targets, results and the report envelope.
pub mod models;

/// Deadlines, connections, TLS and the HTTP/1.1 exchange.
pub mod net;

/// The scan modules and the redirect-following engine they share.
pub mod scanner;
