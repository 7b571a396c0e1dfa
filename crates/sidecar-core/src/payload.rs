//! Payload contract for endpoint adapters
//!
//! Wire bodies arrive as untyped JSON and are validated field-by-field
//! into a strongly typed payload. Validation collects every offending
//! field rather than stopping at the first, so a client sees the complete
//! field-to-reason map in one 422 response.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Reason recorded for an absent required field
pub const MISSING_PARAMETER: &str = "missing parameter";

/// Field-to-reason map produced by payload validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a required field that was absent
    pub fn missing(&mut self, field: impl Into<String>) {
        self.0.insert(field.into(), MISSING_PARAMETER.to_string());
    }

    /// Record a field that was present but malformed
    pub fn invalid(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.insert(field.into(), reason.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// The bare map, serialized as the 422 response body
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.0).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, reason) in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field, reason)?;
            first = false;
        }
        Ok(())
    }
}

/// Pull a required string field, recording any absence or type mismatch
pub fn require_str(value: &Value, field: &str, errors: &mut FieldErrors) -> Option<String> {
    match value.get(field) {
        None | Some(Value::Null) => {
            errors.missing(field);
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.invalid(field, "expected a string");
            None
        }
    }
}

/// Pull a required object field, recording any absence or type mismatch
pub fn require_object(value: &Value, field: &str, errors: &mut FieldErrors) -> Option<Value> {
    match value.get(field) {
        None | Some(Value::Null) => {
            errors.missing(field);
            None
        }
        Some(v @ Value::Object(_)) => Some(v.clone()),
        Some(_) => {
            errors.invalid(field, "expected an object");
            None
        }
    }
}

/// A per-endpoint, strongly typed request body.
///
/// Implemented once per model family. The canonical test instance drives
/// the capacity benchmark and must be deterministic: serializing and
/// workload-estimating it yields the same result on every call.
pub trait ApiPayload: Sized + Send + Sync + 'static {
    /// Validate raw wire JSON into a typed payload, enumerating every
    /// missing or malformed field on failure
    fn from_value(value: &Value) -> std::result::Result<Self, FieldErrors>;

    /// Body forwarded to the model server
    fn to_upstream(&self) -> Value;

    /// Workload-unit estimate for this request
    fn workload(&self) -> u64;

    /// Canonical instance used for benchmarking
    fn for_test() -> Self;
}

/// Request context extracted alongside the payload.
///
/// Owned per request and discarded after the response completes. The
/// request number is assigned monotonically by the worker when the client
/// did not supply one, and is used for log correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    /// Monotonically assigned request number
    pub reqnum: u64,
    /// Autoscaler-issued request signature, when present
    pub signature: Option<String>,
    /// Cost the autoscaler attributed to this request
    pub cost: Option<f64>,
    /// Endpoint name the request was signed for
    pub endpoint: Option<String>,
}

impl AuthContext {
    /// Extract auth fields from the optional `auth_data` object.
    ///
    /// Auth fields are best-effort: absent or mistyped entries fall back
    /// to `None` rather than failing validation, since enforcement lives
    /// with the autoscaler.
    pub fn from_value(auth: Option<&Value>, assigned_reqnum: u64) -> Self {
        let get_str = |field: &str| {
            auth.and_then(|a| a.get(field))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };
        let reqnum = auth
            .and_then(|a| a.get("reqnum"))
            .and_then(Value::as_u64)
            .unwrap_or(assigned_reqnum);
        let cost = auth.and_then(|a| a.get("cost")).and_then(Value::as_f64);

        Self {
            reqnum,
            signature: get_str("signature"),
            cost,
            endpoint: get_str("endpoint"),
        }
    }
}

/// Split an incoming wire body into its auth and payload halves.
///
/// The wire format is `{"auth_data": {...}, "payload": {...}}`; a body
/// without the `payload` wrapper is treated as a bare payload object.
#[derive(Debug, Clone, Copy)]
pub struct RequestEnvelope<'a> {
    pub auth: Option<&'a Value>,
    pub payload: &'a Value,
}

impl<'a> RequestEnvelope<'a> {
    pub fn split(body: &'a Value) -> Self {
        let auth = body.get("auth_data");
        let payload = body.get("payload").unwrap_or(body);
        Self { auth, payload }
    }
}
