//! Text-generation adapters (TGI-style model servers)
//!
//! Serves `/generate` (buffered JSON) and `/generate_stream` (chunked
//! event stream). The upstream wire format is the Hugging Face TGI
//! `{inputs, parameters}` body.

use crate::{benchmark_with, parse_with, EndpointAdapter, ParsedRequest};
use serde_json::{json, Value};
use sidecar_core::payload::{require_object, require_str};
use sidecar_core::{ApiPayload, FieldErrors, LogAction, LogRule};

/// Words in the canonical benchmark prompt
const BENCHMARK_PROMPT_WORDS: usize = 256;

/// Generation length requested for benchmark runs
const BENCHMARK_MAX_NEW_TOKENS: u32 = 64;

/// Default log classification rules for TGI-style servers
pub fn default_log_rules() -> Vec<LogRule> {
    vec![
        LogRule::new(
            LogAction::ModelLoaded,
            r#""message":"Connected","target":"text_generation_router""#,
        ),
        LogRule::new(LogAction::Info, r#""message":"Download"#),
        LogRule::new(LogAction::ModelError, "Error: WebserverFailed"),
        LogRule::new(LogAction::ModelError, "Error: DownloadError"),
    ]
}

/// Request body for text generation
#[derive(Debug, Clone, PartialEq)]
pub struct TextPayload {
    /// Prompt text forwarded verbatim
    pub inputs: String,
    /// Generation parameters, owned by the model server's schema
    pub parameters: Value,
}

impl ApiPayload for TextPayload {
    fn from_value(value: &Value) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();
        let inputs = require_str(value, "inputs", &mut errors);
        let parameters = require_object(value, "parameters", &mut errors);
        match (inputs, parameters) {
            (Some(inputs), Some(parameters)) => Ok(Self { inputs, parameters }),
            _ => Err(errors),
        }
    }

    fn to_upstream(&self) -> Value {
        json!({
            "inputs": self.inputs,
            "parameters": self.parameters,
        })
    }

    fn workload(&self) -> u64 {
        self.inputs.split_whitespace().count() as u64
    }

    fn for_test() -> Self {
        // Fixed prompt: the benchmark workload must be identical run to run
        let words: Vec<&str> = ["a", "quick", "brown", "fox", "jumps", "over", "the", "lazy", "dog"]
            .into_iter()
            .cycle()
            .take(BENCHMARK_PROMPT_WORDS)
            .collect();
        Self {
            inputs: words.join(" "),
            parameters: json!({ "max_new_tokens": BENCHMARK_MAX_NEW_TOKENS }),
        }
    }
}

/// Buffered text generation, `POST /generate`
#[derive(Debug, Default)]
pub struct GenerateEndpoint;

impl EndpointAdapter for GenerateEndpoint {
    fn route(&self) -> &str {
        "/generate"
    }

    fn upstream_path(&self) -> &str {
        "/generate"
    }

    fn parse(&self, body: &Value, assigned_reqnum: u64) -> Result<ParsedRequest, FieldErrors> {
        parse_with::<TextPayload>(body, assigned_reqnum)
    }

    fn benchmark_request(&self) -> ParsedRequest {
        benchmark_with::<TextPayload>()
    }
}

/// Streamed text generation, `POST /generate_stream`.
///
/// Upstream chunks are relayed verbatim; no response transform applies.
#[derive(Debug, Default)]
pub struct GenerateStreamEndpoint;

impl EndpointAdapter for GenerateStreamEndpoint {
    fn route(&self) -> &str {
        "/generate_stream"
    }

    fn upstream_path(&self) -> &str {
        "/generate_stream"
    }

    fn streaming(&self) -> bool {
        true
    }

    fn parse(&self, body: &Value, assigned_reqnum: u64) -> Result<ParsedRequest, FieldErrors> {
        parse_with::<TextPayload>(body, assigned_reqnum)
    }

    fn benchmark_request(&self) -> ParsedRequest {
        benchmark_with::<TextPayload>()
    }
}
