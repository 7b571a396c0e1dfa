//! Error handling for the sidecar worker
//!
//! Provides a unified error type and result type for use across all
//! sidecar components.

use crate::health::HealthState;
use crate::payload::FieldErrors;

/// Result type alias for sidecar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the sidecar worker
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request payload failed validation; one entry per offending field
    #[error("Payload validation failed: {0}")]
    Validation(FieldErrors),

    /// The model server is not ready to accept requests
    #[error("Model server is not ready (state: {0})")]
    NotReady(HealthState),

    /// The model server hit an unrecoverable error; this instance must be replaced
    #[error("Model server has crashed")]
    Crashed,

    /// Transport-level failure talking to the model server
    #[error("Upstream request failed: {0}")]
    UpstreamTransport(String),

    /// Autoscaler telemetry push failed; never surfaced to clients
    #[error("Telemetry push failed: {0}")]
    Reporting(String),

    /// Capacity benchmark could not complete
    #[error("Calibration failed: {0}")]
    Calibration(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration parsing errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a validation error from a field error map
    pub fn validation(fields: FieldErrors) -> Self {
        Self::Validation(fields)
    }

    /// Create a not-ready error for the given health state
    pub fn not_ready(state: HealthState) -> Self {
        Self::NotReady(state)
    }

    /// Create an upstream transport error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamTransport(msg.into())
    }

    /// Create a reporting error
    pub fn reporting(msg: impl Into<String>) -> Self {
        Self::Reporting(msg.into())
    }

    /// Create a calibration error
    pub fn calibration(msg: impl Into<String>) -> Self {
        Self::Calibration(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Check if this error indicates a client-side problem
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Check if the failure detail may be shown to the client.
    ///
    /// Transport and reporting failures stay opaque so internal topology
    /// never leaks through an error body.
    pub fn is_client_visible(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotReady(_) => "not_ready",
            Error::Crashed => "crashed",
            Error::UpstreamTransport(_) => "upstream_transport",
            Error::Reporting(_) => "reporting",
            Error::Calibration(_) => "calibration",
            Error::InvalidConfiguration(_) => "configuration",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }

    /// Convert to the HTTP status code returned to the worker's client
    pub fn to_http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 422,                  // Unprocessable Entity
            Error::NotReady(_) | Error::Crashed => 503,   // Service Unavailable
            _ => 500,                                     // Internal Server Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::config("invalid setting");
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert_eq!(err.to_string(), "Configuration error: invalid setting");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::config("test").category(), "configuration");
        assert_eq!(Error::upstream("test").category(), "upstream_transport");
        assert_eq!(Error::Crashed.category(), "crashed");
        assert_eq!(
            Error::not_ready(HealthState::Loading).category(),
            "not_ready"
        );
    }

    #[test]
    fn test_http_status_codes() {
        let mut fields = FieldErrors::new();
        fields.missing("inputs");
        assert_eq!(Error::validation(fields).to_http_status(), 422);
        assert_eq!(Error::not_ready(HealthState::Starting).to_http_status(), 503);
        assert_eq!(Error::Crashed.to_http_status(), 503);
        assert_eq!(Error::upstream("connection refused").to_http_status(), 500);
        assert_eq!(Error::reporting("push failed").to_http_status(), 500);
    }

    #[test]
    fn test_client_visibility() {
        let mut fields = FieldErrors::new();
        fields.missing("audio_file");
        assert!(Error::validation(fields).is_client_visible());
        assert!(!Error::upstream("10.0.0.3:5001 refused").is_client_visible());
        assert!(!Error::reporting("autoscaler 502").is_client_visible());
    }
}
