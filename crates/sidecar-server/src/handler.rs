//! Route handlers and error-to-response mapping

use crate::server::AppState;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use serde_json::{json, Value};
use sidecar_adapters::EndpointAdapter;
use sidecar_backend::UpstreamReply;
use sidecar_core::{Error, FieldErrors};
use std::sync::Arc;
use tracing::{debug, error};

/// Liveness probe: answers regardless of the model server's health
pub async fn ping() -> &'static str {
    "pong"
}

/// Passthrough of the model server's health endpoint
pub async fn healthcheck(state: Arc<AppState>) -> impl IntoResponse {
    let (status, body) = state.backend.passthrough("/health").await;
    passthrough_response(status, body)
}

/// Diagnostic passthrough for a fixed model server path
pub async fn diagnostics(state: Arc<AppState>, path: &'static str) -> impl IntoResponse {
    let (status, body) = state.backend.passthrough(path).await;
    passthrough_response(status, body)
}

fn passthrough_response(status: u16, body: Bytes) -> (StatusCode, Bytes) {
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        body,
    )
}

/// Adapter-bound endpoint: parse the body, run the pipeline, map the
/// outcome onto an HTTP response
pub async fn endpoint(
    state: Arc<AppState>,
    adapter: Arc<dyn EndpointAdapter>,
    body: Bytes,
) -> Response {
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            let mut fields = FieldErrors::new();
            fields.invalid("body", "invalid json");
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(fields.to_value())).into_response();
        }
    };

    match state.backend.handle_request(adapter.as_ref(), &parsed).await {
        Ok(UpstreamReply::Json(body)) => (StatusCode::OK, Json(body)).into_response(),
        Ok(UpstreamReply::Status(status)) => StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Ok(UpstreamReply::Stream(stream)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => error_response(e),
    }
}

/// Map a pipeline error to the client-facing response.
///
/// Only validation detail is client-visible; transport and internal
/// failures stay opaque.
pub fn error_response(error: Error) -> Response {
    let status = StatusCode::from_u16(error.to_http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    match error {
        Error::Validation(fields) => {
            debug!(%fields, "rejecting invalid payload");
            (status, Json(fields.to_value())).into_response()
        }
        Error::NotReady(state) => {
            debug!(%state, "rejecting request, model server not ready");
            (status, Json(json!({"error": "model server not ready"}))).into_response()
        }
        Error::Crashed => {
            (status, Json(json!({"error": "model server unavailable"}))).into_response()
        }
        other => {
            error!("request failed: {}", other);
            (status, Json(json!({"error": "internal server error"}))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecar_core::HealthState;

    #[test]
    fn test_validation_maps_to_422_with_field_map() {
        let mut fields = FieldErrors::new();
        fields.missing("inputs");
        let response = error_response(Error::validation(fields));
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_not_ready_maps_to_503() {
        let response = error_response(Error::not_ready(HealthState::Loading));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let response = error_response(Error::Crashed);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_transport_maps_to_opaque_500() {
        let response = error_response(Error::upstream("10.1.2.3:5001 refused"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
