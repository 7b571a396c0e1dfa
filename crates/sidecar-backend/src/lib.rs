//! # sidecar-backend
//!
//! Orchestration engine for the sidecar worker.
//!
//! This crate owns everything between the worker's HTTP surface and the
//! local model inference server:
//!
//! - The request pipeline: validate, admit, forward, relay, meter
//! - The concurrency gate enforcing parallel or exclusive execution
//! - The readiness monitor driving health state from the server's log
//! - The capacity calibrator benchmarking units/second throughput
//! - The autoscaler reporter pushing best-effort load telemetry

pub mod backend;
pub mod calibrate;
pub mod gate;
pub mod monitor;
pub mod report;

// Re-export main types
pub use backend::{Backend, UpstreamReply};
pub use gate::ConcurrencyGate;
pub use monitor::{LogAction, LogMonitor, LogRule, MonitorHandle};
pub use report::{AutoscalerReporter, HttpReportSink, ReportSink, ReporterHandle, WorkerStatus};
