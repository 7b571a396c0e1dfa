//! Request pipeline
//!
//! Validates incoming payloads, admits them through the concurrency gate,
//! forwards them to the model server through an endpoint adapter, relays
//! the response (streamed or buffered), and finalizes exactly one workload
//! sample per admitted request on every exit path, client disconnects
//! included.

use crate::gate::{ConcurrencyGate, GatePass};
use crate::report::ReporterHandle;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use sidecar_adapters::{EndpointAdapter, ParsedRequest};
use sidecar_core::{
    CapacityEstimate, Error, HealthCell, HealthState, Result, WorkerConfig, WorkloadSample,
    WorkloadTracker,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Terminator chunk appended after the last upstream chunk, even when the
/// upstream stream ends without one
pub const STREAM_TERMINATOR: &[u8] = b"\n";

/// Streamed response body relayed to the client
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Outcome of a forwarded request
pub enum UpstreamReply {
    /// Buffered 200 response, adapter-transformed
    Json(Value),
    /// Non-200 upstream status, passed through untransformed
    Status(u16),
    /// Streamed 200 response; chunks relay verbatim and in order
    Stream(ByteStream),
}

impl std::fmt::Debug for UpstreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamReply::Json(v) => f.debug_tuple("Json").field(v).finish(),
            UpstreamReply::Status(s) => f.debug_tuple("Status").field(s).finish(),
            UpstreamReply::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// The worker's connection to its model server.
///
/// Constructed once at startup and shared by reference into every
/// handler. Holds the process-wide health cell, workload ledger, and
/// concurrency gate.
pub struct Backend {
    config: WorkerConfig,
    client: reqwest::Client,
    health: HealthCell,
    gate: ConcurrencyGate,
    tracker: WorkloadTracker,
    capacity: CapacityEstimate,
    reporter: ReporterHandle,
    reqnum: AtomicU64,
}

impl Backend {
    pub fn new(
        config: WorkerConfig,
        health: HealthCell,
        tracker: WorkloadTracker,
        capacity: CapacityEstimate,
        reporter: ReporterHandle,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::config(format!("failed to build upstream client: {}", e)))?;
        let gate = ConcurrencyGate::new(config.gate_mode);

        Ok(Self {
            config,
            client,
            health,
            gate,
            tracker,
            capacity,
            reporter,
            reqnum: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthCell {
        &self.health
    }

    pub fn tracker(&self) -> &WorkloadTracker {
        &self.tracker
    }

    pub fn capacity(&self) -> &CapacityEstimate {
        &self.capacity
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Next request number for log correlation
    fn next_reqnum(&self) -> u64 {
        self.reqnum.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Run one client request through the full pipeline
    pub async fn handle_request(
        &self,
        adapter: &dyn EndpointAdapter,
        body: &Value,
    ) -> Result<UpstreamReply> {
        let reqnum = self.next_reqnum();
        let parsed = adapter.parse(body, reqnum).map_err(Error::validation)?;
        debug!(
            reqnum = parsed.auth.reqnum,
            route = adapter.route(),
            units = parsed.units,
            "request accepted"
        );
        self.execute(adapter, parsed).await
    }

    /// Forward an already-validated request. Shared with the calibrator so
    /// benchmark traffic flows through the same gate as real traffic.
    pub(crate) async fn execute(
        &self,
        adapter: &dyn EndpointAdapter,
        parsed: ParsedRequest,
    ) -> Result<UpstreamReply> {
        match self.health.current() {
            HealthState::Ready => {}
            HealthState::Crashed => return Err(Error::Crashed),
            state => return Err(Error::not_ready(state)),
        }

        let pass = self.gate.admit().await?;

        // The pending sample is recorded before the upstream call so load
        // is visible for the whole lifetime of a long-running request
        let sample = self.tracker.begin(parsed.units);
        self.reporter.notify();
        let mut ticket = RequestTicket {
            tracker: self.tracker.clone(),
            reporter: self.reporter.clone(),
            pass: Some(pass),
            sample: Some(sample),
        };

        let reqnum = parsed.auth.reqnum;
        let url = self.config.model_server.endpoint(adapter.upstream_path());
        let mut request = self.client.post(&url).json(&parsed.upstream_body);
        if !adapter.streaming() {
            // Streamed responses are only bounded on connection, not body
            request = request.timeout(self.config.model_server.request_timeout());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                ticket.finish(false);
                warn!(reqnum, "upstream call failed: {}", e);
                return Err(Error::upstream(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            ticket.finish(false);
            debug!(reqnum, status = status.as_u16(), "upstream status passed through");
            return Ok(UpstreamReply::Status(status.as_u16()));
        }

        if adapter.streaming() {
            let upstream = response.bytes_stream().boxed();
            return Ok(UpstreamReply::Stream(relay_stream(upstream, ticket)));
        }

        match response.json::<Value>().await {
            Ok(body) => {
                ticket.finish(true);
                Ok(UpstreamReply::Json(adapter.transform_response(body)))
            }
            Err(e) => {
                ticket.finish(false);
                warn!(reqnum, "upstream body read failed: {}", e);
                Err(Error::upstream(e.to_string()))
            }
        }
    }

    /// Forward a diagnostic GET to the model server, mapping connection
    /// failure to a fixed internal-error status
    pub async fn passthrough(&self, path: &str) -> (u16, Bytes) {
        let url = self.config.model_server.endpoint(path);
        let request = self
            .client
            .get(&url)
            .timeout(self.config.model_server.request_timeout());

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.bytes().await {
                    Ok(body) => (status, body),
                    Err(e) => {
                        warn!(path, "passthrough body read failed: {}", e);
                        (500, Bytes::new())
                    }
                }
            }
            Err(e) => {
                warn!(path, "passthrough failed: {}", e);
                (500, Bytes::new())
            }
        }
    }
}

/// Finalizes one workload sample exactly once.
///
/// Held by the pipeline for buffered requests and moved into the relayed
/// stream for streamed ones. Dropping an unfinished ticket counts the
/// request as failed, which is what makes mid-stream client disconnects
/// release the gate and keep pending counts honest.
struct RequestTicket {
    tracker: WorkloadTracker,
    reporter: ReporterHandle,
    pass: Option<GatePass>,
    sample: Option<WorkloadSample>,
}

impl RequestTicket {
    fn finish(&mut self, success: bool) {
        if let Some(mut sample) = self.sample.take() {
            self.tracker.finish(&mut sample, success);
            // Release the gate before nudging telemetry
            self.pass.take();
            self.reporter.notify();
            debug!(units = sample.units, success, "request finalized");
        }
    }
}

impl Drop for RequestTicket {
    fn drop(&mut self) {
        self.finish(false);
    }
}

/// Relay upstream chunks verbatim and in order, append the terminator,
/// and finalize the ticket on completion, error, or abandonment.
fn relay_stream(
    upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    ticket: RequestTicket,
) -> ByteStream {
    enum Relay {
        Active {
            upstream: BoxStream<'static, reqwest::Result<Bytes>>,
            ticket: RequestTicket,
        },
        Done,
    }

    futures::stream::unfold(Relay::Active { upstream, ticket }, |state| async move {
        match state {
            Relay::Active {
                mut upstream,
                mut ticket,
            } => match upstream.next().await {
                Some(Ok(chunk)) => Some((Ok(chunk), Relay::Active { upstream, ticket })),
                Some(Err(e)) => {
                    ticket.finish(false);
                    Some((Err(Error::upstream(e.to_string())), Relay::Done))
                }
                None => {
                    ticket.finish(true);
                    Some((Ok(Bytes::from_static(STREAM_TERMINATOR)), Relay::Done))
                }
            },
            Relay::Done => None,
        }
    })
    .boxed()
}
