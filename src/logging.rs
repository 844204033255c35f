use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Result, anyhow};
use http::StatusCode;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_thread_ids(true)
            .with_thread_names(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

/// One completed (or abandoned) request/response cycle of a session.
#[derive(Debug, Clone)]
pub struct RelayLogEvent {
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub method: String,
    pub host: String,
    pub target: String,
    pub status: u16,
    pub cache_lookup: Option<String>,
    pub cache_store: Option<String>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed_ms: u128,
    pub origin_addr: Option<String>,
    pub error_reason: Option<String>,
}

#[derive(Debug)]
pub struct RelayLogBuilder {
    event: RelayLogEvent,
}

impl RelayLogBuilder {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            event: RelayLogEvent {
                client_ip: peer.ip(),
                client_port: peer.port(),
                method: String::new(),
                host: String::new(),
                target: String::new(),
                status: 0,
                cache_lookup: None,
                cache_store: None,
                bytes_in: 0,
                bytes_out: 0,
                elapsed_ms: 0,
                origin_addr: None,
                error_reason: None,
            },
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.event.method = method.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.event.host = host.into();
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.event.target = target.into();
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.event.status = status.as_u16();
        self
    }

    pub fn cache_lookup(mut self, value: impl Into<String>) -> Self {
        self.event.cache_lookup = Some(value.into());
        self
    }

    pub fn cache_store(mut self, value: impl Into<String>) -> Self {
        self.event.cache_store = Some(value.into());
        self
    }

    pub fn bytes(mut self, in_bytes: u64, out_bytes: u64) -> Self {
        self.event.bytes_in = in_bytes;
        self.event.bytes_out = out_bytes;
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.event.elapsed_ms = elapsed.as_millis();
        self
    }

    pub fn origin_addr(mut self, addr: impl Into<String>) -> Self {
        self.event.origin_addr = Some(addr.into());
        self
    }

    pub fn error_reason(mut self, reason: impl Into<String>) -> Self {
        self.event.error_reason = Some(reason.into());
        self
    }

    pub fn build(self) -> RelayLogEvent {
        self.event
    }

    pub fn log(self) {
        log_relay(self.build());
    }
}

pub fn log_relay(event: RelayLogEvent) {
    let RelayLogEvent {
        client_ip,
        client_port,
        method,
        host,
        target: path,
        status,
        cache_lookup,
        cache_store,
        bytes_in,
        bytes_out,
        elapsed_ms,
        origin_addr,
        error_reason,
    } = event;

    tracing::info!(
        target = "relay",
        client_ip = %client_ip,
        client_port,
        method,
        host,
        path,
        status,
        cache_lookup = cache_lookup.as_deref(),
        cache_store = cache_store.as_deref(),
        bytes_in,
        bytes_out,
        elapsed_ms,
        origin_addr = origin_addr.as_deref(),
        error_reason = error_reason.as_deref()
    );

    crate::metrics::record_relay(
        StatusCode::from_u16(status).ok(),
        Duration::from_millis(elapsed_ms as u64),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buf.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn strip_ansi(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '\x1b' && chars.peek() == Some(&'[') {
                chars.next();
                for next in chars.by_ref() {
                    if next == 'm' {
                        break;
                    }
                }
                continue;
            }
            out.push(ch);
        }
        out
    }

    #[test]
    fn relay_log_includes_cache_fields() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = BufferWriter {
            buf: buffer.clone(),
        };
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_target(false)
            .without_time()
            .compact()
            .finish();

        let peer: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let event = RelayLogBuilder::new(peer)
            .method("GET")
            .host("example.com")
            .target("/resource")
            .status(StatusCode::OK)
            .cache_lookup("revalidated")
            .cache_store("refreshed")
            .build();

        tracing::subscriber::with_default(subscriber, || {
            log_relay(event);
        });

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let output = strip_ansi(&output);
        assert!(
            output.contains("cache_lookup=\"revalidated\""),
            "missing cache_lookup in output: {output}"
        );
        assert!(
            output.contains("cache_store=\"refreshed\""),
            "missing cache_store in output: {output}"
        );
    }
}
