//! Worker-facing HTTP server
//!
//! The router is built once at startup from the adapter registry: one
//! POST route per adapter plus the fixed operational routes. Handlers
//! receive the shared app state by reference through their closures; no
//! module-level mutable state exists.

use crate::handler;
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use sidecar_adapters::AdapterRegistry;
use sidecar_backend::Backend;
use sidecar_core::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Context shared by every handler, constructed once at startup
pub struct AppState {
    pub backend: Arc<Backend>,
}

/// Build the worker's router from the adapter registry
pub fn build_router(backend: Arc<Backend>, registry: &AdapterRegistry) -> Router {
    let state = Arc::new(AppState { backend });

    let mut app = Router::new().route("/ping", get(handler::ping));

    app = app.route("/healthcheck", {
        let state = state.clone();
        get(move || handler::healthcheck(state.clone()))
    });

    for path in ["/health", "/info", "/metrics"] {
        let state = state.clone();
        app = app.route(path, get(move || handler::diagnostics(state.clone(), path)));
    }

    for adapter in registry.iter() {
        let adapter = Arc::clone(adapter);
        let state = state.clone();
        let path = adapter.route().to_string();
        app = app.route(
            &path,
            post(move |body: Bytes| handler::endpoint(state.clone(), adapter.clone(), body)),
        );
    }

    app.layer(TraceLayer::new_for_http())
}

/// Serve until a shutdown signal arrives
pub async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("worker listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for ctrl-c or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::{Json, Response};
    use serde_json::{json, Value};
    use sidecar_adapters::text_generation_registry;
    use sidecar_backend::ReporterHandle;
    use sidecar_core::{
        CapacityEstimate, GateMode, HealthCell, WorkerConfig, WorkloadTracker,
    };

    async fn spawn_app(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn make_backend(url: String, health: HealthCell) -> Arc<Backend> {
        let mut config = WorkerConfig::default();
        config.model_server.url = url;
        config.model_server.request_timeout_seconds = 5;
        config.gate_mode = GateMode::Exclusive;

        Arc::new(
            Backend::new(
                config,
                health,
                WorkloadTracker::new(),
                CapacityEstimate::new(1.0),
                ReporterHandle::disabled(),
            )
            .unwrap(),
        )
    }

    async fn spawn_worker(url: String, health: HealthCell) -> SocketAddr {
        let backend = make_backend(url, health);
        let registry = text_generation_registry();
        spawn_app(build_router(backend, &registry)).await
    }

    #[tokio::test]
    async fn test_ping_answers_in_any_health_state() {
        let health = HealthCell::new();
        let addr = spawn_worker("http://127.0.0.1:1".to_string(), health.clone()).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{}/ping", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "pong");

        health.mark_crashed("fatal");
        let response = client
            .get(format!("http://{}/ping", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_missing_fields_yield_422_field_map() {
        let health = HealthCell::new();
        health.mark_ready();
        let addr = spawn_worker("http://127.0.0.1:1".to_string(), health).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/generate", addr))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 422);
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body,
            json!({"inputs": "missing parameter", "parameters": "missing parameter"})
        );
    }

    #[tokio::test]
    async fn test_malformed_json_yields_422() {
        let health = HealthCell::new();
        health.mark_ready();
        let addr = spawn_worker("http://127.0.0.1:1".to_string(), health).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/generate", addr))
            .body("not json at all")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 422);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"body": "invalid json"}));
    }

    #[tokio::test]
    async fn test_not_ready_yields_503() {
        let addr = spawn_worker("http://127.0.0.1:1".to_string(), HealthCell::new()).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/generate", addr))
            .json(&json!({"inputs": "hi", "parameters": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 503);
    }

    #[tokio::test]
    async fn test_unreachable_model_server_yields_500() {
        let health = HealthCell::new();
        health.mark_ready();
        let addr = spawn_worker("http://127.0.0.1:1".to_string(), health.clone()).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/generate", addr))
            .json(&json!({"inputs": "hi", "parameters": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 500);
        // Health is driven by the log monitor, not by transport failures
        assert_eq!(health.current(), sidecar_core::HealthState::Ready);
    }

    #[tokio::test]
    async fn test_asr_unreachable_model_server_keeps_serving() {
        let health = HealthCell::new();
        health.mark_ready();
        let backend = make_backend("http://127.0.0.1:1".to_string(), health.clone());
        let registry = sidecar_adapters::speech_to_text_registry();
        let addr = spawn_app(build_router(backend, &registry)).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/asr", addr))
            .json(&json!({"audio_file": "clip.wav"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 500);
        assert_eq!(health.current(), sidecar_core::HealthState::Ready);

        // The next request is still attempted, not short-circuited
        let response = client
            .post(format!("http://{}/asr", addr))
            .json(&json!({"audio_file": "clip.wav"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 500);
    }

    #[tokio::test]
    async fn test_buffered_generate_roundtrip() {
        let upstream = Router::new().route(
            "/generate",
            post(|Json(_): Json<Value>| async { Json(json!({"generated_text": "hello"})) }),
        );
        let upstream_addr = spawn_app(upstream).await;

        let health = HealthCell::new();
        health.mark_ready();
        let addr = spawn_worker(format!("http://{}", upstream_addr), health).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/generate", addr))
            .json(&json!({"inputs": "hi there", "parameters": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"generated_text": "hello"}));
    }

    #[tokio::test]
    async fn test_upstream_status_passthrough() {
        let upstream = Router::new().route("/generate", post(|| async { StatusCode::BAD_GATEWAY }));
        let upstream_addr = spawn_app(upstream).await;

        let health = HealthCell::new();
        health.mark_ready();
        let addr = spawn_worker(format!("http://{}", upstream_addr), health).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/generate", addr))
            .json(&json!({"inputs": "hi", "parameters": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 502);
    }

    #[tokio::test]
    async fn test_streaming_roundtrip_with_terminator() {
        async fn sse() -> Response {
            Response::builder()
                .header("content-type", "text/event-stream")
                .body(Body::from("data: a\n\ndata: b\n\n"))
                .unwrap()
        }

        let upstream = Router::new().route("/generate_stream", post(sse));
        let upstream_addr = spawn_app(upstream).await;

        let health = HealthCell::new();
        health.mark_ready();
        let addr = spawn_worker(format!("http://{}", upstream_addr), health).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/generate_stream", addr))
            .json(&json!({"inputs": "hi", "parameters": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
        let body = response.text().await.unwrap();
        assert_eq!(body, "data: a\n\ndata: b\n\n\n");
    }

    #[tokio::test]
    async fn test_diagnostic_passthrough_routes() {
        let upstream = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/info", get(|| async { Json(json!({"model_id": "m"})) }));
        let upstream_addr = spawn_app(upstream).await;

        let health = HealthCell::new();
        let addr = spawn_worker(format!("http://{}", upstream_addr), health).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{}/healthcheck", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "ok");

        let response = client
            .get(format!("http://{}/info", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"model_id": "m"}));

        // No /metrics on the stub: the upstream 404 is forwarded as-is
        let response = client
            .get(format!("http://{}/metrics", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_healthcheck_maps_connection_failure_to_500() {
        let addr = spawn_worker("http://127.0.0.1:1".to_string(), HealthCell::new()).await;

        let response = reqwest::Client::new()
            .get(format!("http://{}/healthcheck", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 500);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let addr = spawn_worker("http://127.0.0.1:1".to_string(), HealthCell::new()).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/asr", addr))
            .json(&json!({"audio_file": "clip.wav"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }
}
