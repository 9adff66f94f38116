// src/core/net/resolver.rs

use std::io;
use std::net::IpAddr;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::until;

/// Answers host lookups for a session.
///
/// `System` asks real DNS. `Fixed` answers every lookup with one address and is
/// only used when the dialed host is the target's own domain.
#[derive(Clone)]
pub enum HostResolver {
    System(TokioAsyncResolver),
    Fixed(IpAddr),
}

impl HostResolver {
    /// A resolver backed by the system configuration, or public defaults when
    /// that cannot be read.
    pub fn system() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read system resolver configuration, using defaults.");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        HostResolver::System(resolver)
    }

    pub fn fixed(ip: IpAddr) -> Self {
        HostResolver::Fixed(ip)
    }

    /// Resolves `host` to addresses, failing once `deadline` passes.
    pub async fn lookup(&self, host: &str, deadline: Instant) -> io::Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        match self {
            HostResolver::Fixed(ip) => {
                debug!(host, ip = %ip, "Answering lookup with pinned address.");
                Ok(vec![*ip])
            }
            HostResolver::System(resolver) => {
                let lookup = until(deadline, resolver.lookup_ip(host))
                    .await
                    .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "DNS lookup timed out"))?
                    .map_err(|e| io::Error::other(format!("lookup {}: {}", host, e)))?;
                let addrs: Vec<IpAddr> = lookup.iter().collect();
                if addrs.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no addresses for {}", host),
                    ));
                }
                debug!(host, count = addrs.len(), "Resolved host.");
                Ok(addrs)
            }
        }
    }
}

fn is_local_ip(ip: &IpAddr) -> bool {
    ip.is_loopback() || ip.is_unspecified()
}

/// Whether a redirect to `host` would land on this machine: a loopback or
/// all-zero literal, the name `localhost`, or a name that resolves to one.
///
/// Lookup failures count as "not local".
pub async fn points_to_localhost(host: &str, resolver: &HostResolver, deadline: Instant) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_local_ip(&ip);
    }
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match resolver.lookup(host, deadline).await {
        Ok(addrs) => addrs.iter().any(is_local_ip),
        Err(e) => {
            debug!(host, error = %e, "Lookup for localhost check failed.");
            false
        }
    }
}
