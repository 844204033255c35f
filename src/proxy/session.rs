use std::net::SocketAddr;
use std::time::{Instant, SystemTime};

use anyhow::Result;
use http::StatusCode;
use tokio::net::TcpStream;
use tracing::{Instrument, debug, info_span, warn};

use super::AppContext;
use super::backoff::Backoff;
use super::cache::{InsertOutcome, RequestKey};
use super::http::{BAD_REQUEST_RESPONSE, HttpMessage};
use super::transport::{ReadStatus, Received, Transport};
use super::upstream::ConnectError;
use crate::cli::RelayMode;
use crate::logging::RelayLogBuilder;

/// Where a session is in its request/response cycle.
#[derive(Debug)]
enum RelayState {
    AwaitingClientRequest,
    ResolvingOrigin(Cycle),
    Forwarding(Cycle),
    AwaitingOriginResponse(Cycle),
    Responding(Cycle, Response),
    Terminated,
}

/// One request/response exchange.
#[derive(Debug)]
struct Cycle {
    request: HttpMessage,
    key: RequestKey,
    /// Set when the request was forwarded with `If-Modified-Since`.
    revalidating: bool,
    /// Forward the request exactly as the client sent it, skipping the cache lookup.
    unconditional: bool,
    started: Instant,
    log: RelayLogBuilder,
    bytes_in: u64,
    bytes_out: u64,
}

#[derive(Debug)]
struct Response {
    message: HttpMessage,
    /// The origin closed before the message was complete.
    truncated: bool,
}

impl Cycle {
    fn new(peer: SocketAddr, request: HttpMessage) -> Self {
        let mut log = RelayLogBuilder::new(peer);
        if let Some(method) = request.method() {
            log = log.method(method);
        }
        if let Some(target) = request.target() {
            log = log.target(target);
        }
        if let Some(host) = request.host() {
            log = log.host(host);
        }
        Self {
            key: RequestKey::from(&request),
            bytes_in: request.len() as u64,
            request,
            revalidating: false,
            unconditional: false,
            started: Instant::now(),
            log,
            bytes_out: 0,
        }
    }

    fn finish(self, status: Option<StatusCode>) {
        let mut log = self
            .log
            .bytes(self.bytes_in, self.bytes_out)
            .elapsed(self.started.elapsed());
        if let Some(status) = status {
            log = log.status(status);
        }
        log.log();
    }
}

/// Per-connection relay between one client and the origins it names.
pub struct Session {
    app: AppContext,
    peer: SocketAddr,
    client: Transport,
    origin: Option<Transport>,
    backoff: Backoff,
}

impl Session {
    pub fn new(stream: TcpStream, peer: SocketAddr, app: AppContext) -> Self {
        let client = Transport::new(stream, peer, app.settings.max_message_size);
        let backoff = Backoff::from_settings(&app.settings);
        Self {
            app,
            peer,
            client,
            origin: None,
            backoff,
        }
    }

    /// Drives the session until it terminates, then releases both connections.
    pub async fn run(mut self) -> Result<()> {
        let span = info_span!("session", peer = %self.peer);
        let result = self.drive().instrument(span).await;
        self.close();
        result
    }

    async fn drive(&mut self) -> Result<()> {
        let mut state = RelayState::AwaitingClientRequest;
        loop {
            state = match state {
                RelayState::AwaitingClientRequest => self.await_client_request().await,
                RelayState::ResolvingOrigin(cycle) => self.resolve_origin(cycle).await?,
                RelayState::Forwarding(cycle) => self.forward(cycle).await?,
                RelayState::AwaitingOriginResponse(cycle) => {
                    self.await_origin_response(cycle).await
                }
                RelayState::Responding(cycle, response) => self.respond(cycle, response).await?,
                RelayState::Terminated => return Ok(()),
            };
        }
    }

    fn close(&mut self) {
        self.client.disconnect();
        if let Some(mut origin) = self.origin.take() {
            origin.disconnect();
        }
    }

    async fn await_client_request(&mut self) -> RelayState {
        let deadline = Instant::now() + self.app.settings.client_timeout();
        self.backoff.reset();
        loop {
            let Received {
                status,
                bytes_read,
                message,
            } = self.client.receive();
            if bytes_read > 0 {
                self.backoff.reset();
            }
            match status {
                ReadStatus::Complete => {
                    debug!(bytes = message.len(), "client request received");
                    return RelayState::ResolvingOrigin(Cycle::new(self.peer, message));
                }
                ReadStatus::WouldBlock => {}
                ReadStatus::PeerClosed => {
                    debug!(pending = message.len(), "client closed connection");
                    return RelayState::Terminated;
                }
                ReadStatus::Failed(err) => {
                    debug!(error = %err, "client read failed");
                    return RelayState::Terminated;
                }
                ReadStatus::Malformed(err) => {
                    debug!(error = %err, "dropping malformed client request");
                    return RelayState::Terminated;
                }
            }
            if Instant::now() >= deadline {
                debug!("client idle timeout");
                return RelayState::Terminated;
            }
            self.backoff.wait(self.client.readable()).await;
        }
    }

    async fn resolve_origin(&mut self, mut cycle: Cycle) -> Result<RelayState> {
        if let Some(mut previous) = self.origin.take() {
            previous.disconnect();
        }

        let settings = &self.app.settings;
        let connected = match cycle.request.host() {
            Some(authority) => {
                Transport::connect(
                    authority,
                    settings.origin_port,
                    settings.upstream_connect_timeout(),
                    settings.max_message_size,
                )
                .await
            }
            None => Err(ConnectError::MissingHost),
        };

        match connected {
            Ok(origin) => {
                cycle.log = cycle.log.origin_addr(origin.peer().to_string());
                self.origin = Some(origin);
                Ok(RelayState::Forwarding(cycle))
            }
            Err(err) => {
                warn!(error = %err, "origin connect failed");
                crate::metrics::record_origin_error(err.kind());
                self.client.send(BAD_REQUEST_RESPONSE).await?;
                cycle.bytes_out = BAD_REQUEST_RESPONSE.len() as u64;
                cycle.log = cycle.log.error_reason(err.kind());
                cycle.finish(Some(StatusCode::BAD_REQUEST));
                Ok(RelayState::Terminated)
            }
        }
    }

    async fn forward(&mut self, mut cycle: Cycle) -> Result<RelayState> {
        let cached_at: Option<SystemTime> = if cycle.unconditional {
            None
        } else {
            let cached_at = self.app.cache.timestamp_of(&cycle.key);
            crate::metrics::record_cache_lookup(cached_at.is_some());
            cached_at
        };

        let outbound = match cached_at {
            Some(timestamp) => {
                cycle.revalidating = true;
                cycle.log = cycle.log.cache_lookup("hit");
                cycle.request.with_conditional_header(timestamp)?
            }
            None if cycle.unconditional => cycle.request.clone(),
            None => {
                cycle.log = cycle.log.cache_lookup("miss");
                cycle.request.clone()
            }
        };

        let Some(origin) = self.origin.as_mut() else {
            return Ok(RelayState::Terminated);
        };
        if let Err(err) = origin.send(outbound.as_bytes()).await {
            warn!(error = %err, "failed to send request to origin");
            crate::metrics::record_origin_error("send");
            cycle.log = cycle.log.error_reason("origin_send");
            cycle.finish(None);
            return Ok(RelayState::Terminated);
        }
        Ok(RelayState::AwaitingOriginResponse(cycle))
    }

    async fn await_origin_response(&mut self, mut cycle: Cycle) -> RelayState {
        let deadline = Instant::now() + self.app.settings.upstream_timeout();
        self.backoff.reset();
        let Some(origin) = self.origin.as_mut() else {
            return RelayState::Terminated;
        };

        let reason = loop {
            let Received {
                status,
                bytes_read,
                message,
            } = origin.receive();
            if bytes_read > 0 {
                self.backoff.reset();
            }
            match status {
                ReadStatus::Complete => {
                    return RelayState::Responding(
                        cycle,
                        Response {
                            message,
                            truncated: false,
                        },
                    );
                }
                ReadStatus::PeerClosed if !message.is_empty() => {
                    debug!(bytes = message.len(), "origin closed mid-response");
                    return RelayState::Responding(
                        cycle,
                        Response {
                            message,
                            truncated: true,
                        },
                    );
                }
                ReadStatus::PeerClosed => break "origin_closed",
                ReadStatus::Failed(err) => {
                    debug!(error = %err, "origin read failed");
                    break "origin_read";
                }
                ReadStatus::Malformed(err) => {
                    debug!(error = %err, "malformed origin response");
                    break "origin_malformed";
                }
                ReadStatus::WouldBlock => {}
            }
            if Instant::now() >= deadline {
                break "origin_timeout";
            }
            self.backoff.wait(origin.readable()).await;
        };

        crate::metrics::record_origin_error(reason);
        cycle.log = cycle.log.error_reason(reason);
        cycle.finish(None);
        RelayState::Terminated
    }

    async fn respond(&mut self, mut cycle: Cycle, response: Response) -> Result<RelayState> {
        let status = response.message.status_code().ok();

        if status == Some(StatusCode::NOT_MODIFIED) && cycle.revalidating {
            let payload = match self.app.cache.get(&cycle.key).await {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    debug!("cached response evicted during revalidation");
                    return Ok(Self::retry_unconditionally(cycle));
                }
                Err(err) => {
                    warn!(error = ?err, "failed to read cached response");
                    return Ok(Self::retry_unconditionally(cycle));
                }
            };
            self.client.send(&payload).await?;
            self.app.cache.refresh(&cycle.key);
            crate::metrics::record_cache_revalidated();
            cycle.bytes_out = payload.len() as u64;
            cycle.log = cycle.log.cache_store("revalidated");
            let sent_status = HttpMessage::from(payload).status_code().ok();
            return self.complete_cycle(cycle, sent_status);
        }

        self.client.send(response.message.as_bytes()).await?;
        cycle.bytes_out = response.message.len() as u64;
        let stored = self.store_response(&cycle.key, &response, status).await;
        cycle.log = cycle.log.cache_store(stored);
        self.complete_cycle(cycle, status)
    }

    /// The origin confirmed a payload that is no longer readable. Fetches a full response with
    /// the request exactly as the client sent it.
    fn retry_unconditionally(mut cycle: Cycle) -> RelayState {
        cycle.revalidating = false;
        cycle.unconditional = true;
        cycle.log = cycle.log.cache_lookup("stale");
        RelayState::ResolvingOrigin(cycle)
    }

    fn complete_cycle(&mut self, cycle: Cycle, status: Option<StatusCode>) -> Result<RelayState> {
        cycle.finish(status);
        if let Some(mut origin) = self.origin.take() {
            origin.disconnect();
        }
        Ok(match self.app.settings.relay_mode {
            RelayMode::Single => RelayState::Terminated,
            RelayMode::Persistent => RelayState::AwaitingClientRequest,
        })
    }

    /// Caches a live response under the original request; returns the outcome label for the
    /// relay log.
    async fn store_response(
        &self,
        key: &RequestKey,
        response: &Response,
        status: Option<StatusCode>,
    ) -> &'static str {
        let cacheable = status.is_some_and(|status| status != StatusCode::NOT_MODIFIED);
        if response.truncated || !cacheable {
            return "skipped";
        }
        match self.app.cache.insert(key, response.message.as_bytes()).await {
            Ok(InsertOutcome::Refreshed) => "refreshed",
            Ok(InsertOutcome::Stored { slot, .. }) => {
                debug!(slot, "response cached");
                "stored"
            }
            Err(err) => {
                warn!(error = ?err, "failed to cache response");
                crate::metrics::record_cache_store_error();
                "error"
            }
        }
    }
}
