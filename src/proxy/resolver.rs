use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::lookup_host;
use tokio::time::timeout;

use super::upstream::ConnectError;

/// Splits a `Host` header value into host name and port. An explicit port wins over
/// `default_port`; bracketed IPv6 literals are unwrapped.
pub fn split_authority(authority: &str, default_port: u16) -> Result<(&str, u16), ConnectError> {
    let invalid = || ConnectError::InvalidHost(authority.to_string());
    let authority = authority.trim();
    if authority.is_empty() {
        return Err(invalid());
    }

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None if tail.is_empty() => default_port,
            None => return Err(invalid()),
        };
        return Ok((host, port));
    }

    match authority.rsplit_once(':') {
        // More than one colon without brackets: a bare IPv6 literal.
        Some((host, _)) if host.contains(':') => Ok((authority, default_port)),
        Some((host, port)) => {
            let port = port.parse().map_err(|_| invalid())?;
            if host.is_empty() {
                return Err(invalid());
            }
            Ok((host, port))
        }
        None => Ok((authority, default_port)),
    }
}

/// Resolves `host:port`, de-duplicating the answer. IP literals skip the lookup.
pub async fn resolve_host(
    host: &str,
    port: u16,
    timeout_dur: Duration,
) -> Result<Vec<SocketAddr>, ConnectError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let addrs = timeout(timeout_dur, lookup_host((host, port)))
        .await
        .map_err(|_| ConnectError::Timeout(format!("resolving {host}:{port}")))?
        .map_err(|source| ConnectError::Resolve {
            host: host.to_string(),
            source,
        })?;

    let mut seen = HashSet::new();
    let unique: Vec<SocketAddr> = addrs.filter(|addr| seen.insert(*addr)).collect();
    if unique.is_empty() {
        return Err(ConnectError::NoAddresses {
            host: host.to_string(),
        });
    }
    Ok(unique)
}
