use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, bail};
use http::StatusCode;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
};

use crate::proxy::http::HttpMessage;
use crate::util::timeout_with_context;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("connections_total", "Accepted client connections")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register connections_total");
    counter
});

static ACCEPT_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("accept_errors_total", "Failed accept attempts")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register accept_errors_total");
    counter
});

static ACTIVE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("active_sessions", "Currently running relay sessions")
        .expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register active_sessions");
    gauge
});

static RELAY_STATUS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "relay_status_total",
        "Responses delivered to clients by status class",
    );
    let vec = IntCounterVec::new(opts, &["status_class"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register relay_status_total");
    vec
});

static RELAY_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "relay_latency_seconds",
        "Time from complete client request to delivered response",
    )
    .buckets(latency_buckets());
    let vec = HistogramVec::new(opts, &["status_class"]).expect("create histogram vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register relay_latency_seconds");
    vec
});

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookup_total", "Cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookup_total");
    vec
});

static CACHE_REVALIDATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cache_revalidated_total",
        "Cached payloads served after a 304 from the origin",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_revalidated_total");
    counter
});

static CACHE_STORE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_store_total", "Payloads written to cache cells").expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_total");
    counter
});

static CACHE_STORE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_store_errors_total", "Failed cache cell writes")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_errors_total");
    counter
});

static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cache_evictions_total",
        "Live cache entries displaced by an insert",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_evictions_total");
    counter
});

static ORIGIN_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let vec = IntCounterVec::new(
        Opts::new("origin_errors_total", "Origin failures by kind"),
        &["kind"],
    )
    .expect("create origin_errors_total");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register origin_errors_total");
    vec
});

fn latency_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

const METRICS_MAX_REQUEST_BYTES: usize = 8192;
const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);

fn status_class(status: Option<StatusCode>) -> &'static str {
    match status.map(|status| status.as_u16()) {
        Some(100..=199) => "1xx",
        Some(200..=299) => "2xx",
        Some(300..=399) => "3xx",
        Some(400..=499) => "4xx",
        Some(500..=599) => "5xx",
        _ => "other",
    }
}

pub fn record_connection() {
    CONNECTIONS_TOTAL.inc();
}

pub fn record_accept_error() {
    ACCEPT_ERRORS_TOTAL.inc();
}

/// Counts one running session in `active_sessions` for as long as it is alive, including when
/// the session task unwinds.
#[must_use = "the session stops being counted when the guard is dropped"]
pub struct ActiveSessionGuard {
    _private: (),
}

impl ActiveSessionGuard {
    pub fn new() -> Self {
        ACTIVE_SESSIONS.inc();
        Self { _private: () }
    }
}

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        ACTIVE_SESSIONS.dec();
    }
}

pub fn record_relay(status: Option<StatusCode>, elapsed: Duration) {
    let class = status_class(status);
    RELAY_STATUS_TOTAL.with_label_values(&[class]).inc();
    RELAY_LATENCY_SECONDS
        .with_label_values(&[class])
        .observe(elapsed.as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let label = if hit { "hit" } else { "miss" };
    CACHE_LOOKUP_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_cache_revalidated() {
    CACHE_REVALIDATED_TOTAL.inc();
}

pub fn record_cache_store() {
    CACHE_STORE_TOTAL.inc();
}

pub fn record_cache_store_error() {
    CACHE_STORE_ERRORS_TOTAL.inc();
}

pub fn record_cache_eviction() {
    CACHE_EVICTIONS_TOTAL.inc();
}

pub fn record_origin_error(kind: &str) {
    ORIGIN_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encode metrics");
    buffer
}

pub async fn serve(addr: SocketAddr, path: String) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let path = if path.is_empty() {
        "/metrics".to_string()
    } else {
        path
    };
    loop {
        let (stream, _) = listener.accept().await?;
        let path = path.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(stream, &path).await {
                tracing::debug!(error = %err, "metrics handler error");
            }
        });
    }
}

async fn handle_stream<S>(stream: S, path: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    handle_stream_with_limits(
        stream,
        path,
        METRICS_READ_TIMEOUT,
        METRICS_MAX_REQUEST_BYTES,
    )
    .await
}

async fn handle_stream_with_limits<S>(
    mut stream: S,
    path: &str,
    read_timeout: Duration,
    max_bytes: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = HttpMessage::default();
    let mut buf = [0u8; 1024];
    while request.is_empty() || !request.is_complete() {
        let read = timeout_with_context(
            read_timeout,
            stream.read(&mut buf),
            "reading metrics request",
        )
        .await?;
        if read == 0 {
            if request.is_empty() {
                return Ok(());
            }
            break;
        }
        request.append(&buf[..read]);
        if request.len() > max_bytes {
            bail!("metrics request exceeded allowed size");
        }
    }

    let response = if request.method() == Some("GET") && request.target() == Some(path) {
        let body = gather();
        build_response(200, TextEncoder::new().format_type(), body)
    } else {
        build_response(404, "text/plain", b"not found".to_vec())
    };

    stream.write_all(&response).await?;
    stream.shutdown().await?;
    Ok(())
}

fn build_response(status: u16, content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let mut response = header.into_bytes();
    response.extend_from_slice(&body);
    response
}
