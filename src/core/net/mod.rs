// src/core/net/mod.rs

//! Sockets, name resolution, TLS and HTTP/1.1 exchanges, all bounded by
//! a per-session deadline.

pub mod connection;
pub mod http1;
pub mod resolver;
pub mod tls;

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// The instant a single operation must finish by: whichever comes first of
/// its own timeout (counted from now) and the session's global deadline.
pub fn effective_deadline(session_deadline: Instant, timeout: Duration) -> Instant {
    let own = Instant::now()
        .checked_add(timeout)
        .unwrap_or(session_deadline);
    own.min(session_deadline)
}

/// Runs `fut` until `deadline`, returning `None` if the deadline passed first.
pub async fn until<F: Future>(deadline: Instant, fut: F) -> Option<F::Output> {
    tokio::time::timeout_at(deadline, fut).await.ok()
}
