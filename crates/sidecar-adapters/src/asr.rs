//! Speech-to-text adapter (Whisper-style model servers)
//!
//! Serves `/asr`. Workload is measured in seconds of audio.

use crate::{benchmark_with, parse_with, EndpointAdapter, ParsedRequest};
use serde_json::{json, Value};
use sidecar_core::payload::require_str;
use sidecar_core::{ApiPayload, FieldErrors, LogAction, LogRule};

/// Assumed clip length until real durations are probed, in seconds
const ESTIMATED_CLIP_SECONDS: u64 = 30;

/// Clip shipped with the worker image for benchmarking
const BENCHMARK_CLIP: &str = "samples/benchmark_clip.mp3";

/// Default log classification rules for Whisper-style servers
pub fn default_log_rules() -> Vec<LogRule> {
    vec![
        LogRule::new(LogAction::ModelLoaded, "Application startup complete."),
        LogRule::new(LogAction::Info, "100%"),
        LogRule::new(LogAction::ModelError, "CUDA error"),
        LogRule::new(LogAction::ModelError, "CUDA out of memory"),
    ]
}

/// Request body for transcription
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    /// Path or URL of the audio to transcribe, resolved by the model server
    pub audio_file: String,
}

impl ApiPayload for AudioPayload {
    fn from_value(value: &Value) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();
        match require_str(value, "audio_file", &mut errors) {
            Some(audio_file) => Ok(Self { audio_file }),
            None => Err(errors),
        }
    }

    fn to_upstream(&self) -> Value {
        json!({ "audio_file": self.audio_file })
    }

    fn workload(&self) -> u64 {
        // TODO: probe the referenced file for its real duration
        ESTIMATED_CLIP_SECONDS
    }

    fn for_test() -> Self {
        Self {
            audio_file: BENCHMARK_CLIP.to_string(),
        }
    }
}

/// Transcription, `POST /asr`
#[derive(Debug, Default)]
pub struct TranscribeEndpoint;

impl EndpointAdapter for TranscribeEndpoint {
    fn route(&self) -> &str {
        "/asr"
    }

    fn upstream_path(&self) -> &str {
        "/asr"
    }

    fn parse(&self, body: &Value, assigned_reqnum: u64) -> Result<ParsedRequest, FieldErrors> {
        parse_with::<AudioPayload>(body, assigned_reqnum)
    }

    fn benchmark_request(&self) -> ParsedRequest {
        benchmark_with::<AudioPayload>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_audio_file() {
        let err = AudioPayload::from_value(&json!({})).unwrap_err();
        assert_eq!(err.to_value(), json!({"audio_file": "missing parameter"}));
    }

    #[test]
    fn test_valid_payload() {
        let payload = AudioPayload::from_value(&json!({"audio_file": "clip.wav"})).unwrap();
        assert_eq!(payload.audio_file, "clip.wav");
        assert_eq!(payload.to_upstream(), json!({"audio_file": "clip.wav"}));
    }

    #[test]
    fn test_workload_is_stable() {
        let payload = AudioPayload::for_test();
        assert_eq!(payload.workload(), payload.workload());
        assert_eq!(payload.workload(), ESTIMATED_CLIP_SECONDS);
    }

    #[test]
    fn test_adapter_binding() {
        let adapter = TranscribeEndpoint;
        assert_eq!(adapter.route(), "/asr");
        assert_eq!(adapter.upstream_path(), "/asr");
        assert!(!adapter.streaming());

        let bench = adapter.benchmark_request();
        assert_eq!(bench.units, ESTIMATED_CLIP_SECONDS);
        assert_eq!(bench.upstream_body, json!({"audio_file": BENCHMARK_CLIP}));
    }
}
