//! # sidecar-adapters
//!
//! Endpoint adapters for the sidecar worker.
//!
//! An adapter binds a worker-facing route to a model server endpoint: it
//! validates the wire payload, produces the upstream request body and its
//! workload estimate, and transforms the response where the model family
//! needs it. Adapters are registered once at startup in an
//! [`AdapterRegistry`] and immutable afterwards.
//!
//! ## Provided model families
//!
//! - **Text generation** ([`textgen`]): `/generate` and `/generate_stream`
//! - **Speech to text** ([`asr`]): `/asr`

use serde_json::Value;
use sidecar_core::{ApiPayload, AuthContext, Error, FieldErrors, RequestEnvelope, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub mod asr;
pub mod textgen;

pub use asr::TranscribeEndpoint;
pub use textgen::{GenerateEndpoint, GenerateStreamEndpoint};

/// A validated request, ready to forward
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    /// Request context extracted alongside the payload
    pub auth: AuthContext,
    /// Body to send to the model server
    pub upstream_body: Value,
    /// Workload-unit estimate for this request
    pub units: u64,
}

/// Per-endpoint translation of wire payload to model server payload.
///
/// Implemented once per model family and registered at startup; the
/// request pipeline dispatches through the registry, never by reflection.
pub trait EndpointAdapter: Send + Sync {
    /// Worker-facing route served by this adapter
    fn route(&self) -> &str;

    /// Model server endpoint the request is forwarded to
    fn upstream_path(&self) -> &str;

    /// Whether the response body is relayed as a chunked stream
    fn streaming(&self) -> bool {
        false
    }

    /// Validate a wire body into a forwardable request.
    ///
    /// `assigned_reqnum` is used when the client did not carry its own
    /// request number.
    fn parse(
        &self,
        body: &Value,
        assigned_reqnum: u64,
    ) -> std::result::Result<ParsedRequest, FieldErrors>;

    /// Canonical request used by the capacity benchmark
    fn benchmark_request(&self) -> ParsedRequest;

    /// Transform a buffered upstream response body for the client.
    ///
    /// Streaming adapters never see this; their chunks pass verbatim.
    fn transform_response(&self, upstream: Value) -> Value {
        upstream
    }
}

/// Validate a wire body with a concrete payload type.
///
/// Shared by every adapter implementation: splits the auth/payload
/// envelope, runs field-by-field validation, and carries the payload's
/// workload estimate into the parsed request.
pub fn parse_with<P: ApiPayload>(
    body: &Value,
    assigned_reqnum: u64,
) -> std::result::Result<ParsedRequest, FieldErrors> {
    let envelope = RequestEnvelope::split(body);
    let payload = P::from_value(envelope.payload)?;
    Ok(ParsedRequest {
        auth: AuthContext::from_value(envelope.auth, assigned_reqnum),
        upstream_body: payload.to_upstream(),
        units: payload.workload(),
    })
}

/// Build a benchmark request from a payload's canonical test instance
pub fn benchmark_with<P: ApiPayload>() -> ParsedRequest {
    let payload = P::for_test();
    ParsedRequest {
        auth: AuthContext::from_value(None, 0),
        upstream_body: payload.to_upstream(),
        units: payload.workload(),
    }
}

/// Startup-built routing table of endpoint adapters.
///
/// One binding per routable endpoint; the designated benchmark adapter is
/// the one the calibrator drives.
pub struct AdapterRegistry {
    entries: HashMap<String, Arc<dyn EndpointAdapter>>,
    routes: Vec<String>,
    benchmark: Arc<dyn EndpointAdapter>,
}

impl AdapterRegistry {
    /// Create a registry; the benchmark adapter is registered implicitly
    pub fn new(benchmark: Arc<dyn EndpointAdapter>) -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
            routes: Vec::new(),
            benchmark: benchmark.clone(),
        };
        registry
            .register(benchmark)
            .expect("benchmark adapter registers into an empty registry");
        registry
    }

    /// Register an adapter; duplicate routes are a startup error
    pub fn register(&mut self, adapter: Arc<dyn EndpointAdapter>) -> Result<()> {
        let route = adapter.route().to_string();
        if self.entries.contains_key(&route) {
            return Err(Error::config(format!(
                "Duplicate adapter route: {}",
                route
            )));
        }
        self.routes.push(route.clone());
        self.entries.insert(route, adapter);
        Ok(())
    }

    /// Look up the adapter bound to a route
    pub fn get(&self, route: &str) -> Option<&Arc<dyn EndpointAdapter>> {
        self.entries.get(route)
    }

    /// Adapters in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn EndpointAdapter>> {
        self.routes.iter().filter_map(|route| self.entries.get(route))
    }

    /// The adapter the calibrator benchmarks with
    pub fn benchmark_adapter(&self) -> &Arc<dyn EndpointAdapter> {
        &self.benchmark
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry for a text-generation model server (TGI-style)
pub fn text_generation_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new(Arc::new(GenerateEndpoint::default()));
    registry
        .register(Arc::new(GenerateStreamEndpoint::default()))
        .expect("stream route does not collide with the buffered route");
    registry
}

/// Registry for a speech-to-text model server (Whisper-style)
pub fn speech_to_text_registry() -> AdapterRegistry {
    AdapterRegistry::new(Arc::new(TranscribeEndpoint::default()))
}
