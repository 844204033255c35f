use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::resolver;

/// Why an origin connection could not be established.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("request carries no Host header")]
    MissingHost,
    #[error("invalid host '{0}'")]
    InvalidHost(String),
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("{host} resolved to no addresses")]
    NoAddresses { host: String },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("timed out {0}")]
    Timeout(String),
}

impl ConnectError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectError::MissingHost => "missing_host",
            ConnectError::InvalidHost(_) => "invalid_host",
            ConnectError::Resolve { .. } | ConnectError::NoAddresses { .. } => "resolve",
            ConnectError::Connect { .. } => "connect",
            ConnectError::Timeout(_) => "timeout",
        }
    }
}

/// Resolves the authority from a `Host` header and connects to the first address that answers.
pub async fn connect_authority(
    authority: &str,
    default_port: u16,
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr), ConnectError> {
    let (host, port) = resolver::split_authority(authority, default_port)?;
    let addrs = resolver::resolve_host(host, port, connect_timeout).await?;
    connect_to_addrs(&addrs, connect_timeout).await
}

/// Attempt to connect to the supplied socket addresses in order.
pub async fn connect_to_addrs(
    addrs: &[SocketAddr],
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr), ConnectError> {
    let mut last_err = None;
    for addr in addrs {
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(
                        host = %addr.ip(),
                        port = addr.port(),
                        error = %err,
                        "failed to set TCP_NODELAY on origin stream"
                    );
                }
                debug!(host = %addr.ip(), port = addr.port(), "connected to origin");
                return Ok((stream, *addr));
            }
            Ok(Err(source)) => {
                last_err = Some(ConnectError::Connect {
                    addr: *addr,
                    source,
                });
            }
            Err(_) => {
                last_err = Some(ConnectError::Timeout(format!("connecting to {addr}")));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ConnectError::NoAddresses {
        host: "origin".to_string(),
    }))
}
