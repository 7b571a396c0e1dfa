//! Capacity calibration
//!
//! Once the model server first reports ready, a fixed number of synthetic
//! requests built from the benchmark adapter's canonical payload measure
//! real throughput. The runs flow through the normal pipeline, so an
//! exclusive-mode backend is never double-booked while calibrating. A
//! failed benchmark keeps the conservative default capacity; it never
//! crashes the worker.

use crate::backend::{Backend, UpstreamReply};
use futures::StreamExt;
use sidecar_adapters::AdapterRegistry;
use sidecar_core::{Error, Result};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run the benchmark and overwrite the capacity estimate.
///
/// Returns the measured units/second on success.
pub async fn calibrate(backend: &Backend, registry: &AdapterRegistry) -> Result<f64> {
    let runs = backend.config().benchmark.runs;
    if runs == 0 {
        info!("benchmark disabled, keeping default capacity");
        return Ok(backend.capacity().units_per_second());
    }

    let adapter = registry.benchmark_adapter();
    let mut total_units = 0u64;
    let mut total_seconds = 0f64;

    for run in 1..=runs {
        let request = adapter.benchmark_request();
        let units = request.units;

        let started = Instant::now();
        let reply = backend.execute(adapter.as_ref(), request).await?;
        drain(reply).await?;
        let elapsed = started.elapsed().as_secs_f64();

        debug!(run, units, elapsed_s = elapsed, "benchmark run complete");
        total_units += units;
        total_seconds += elapsed;
    }

    if total_seconds <= 0.0 {
        return Err(Error::calibration("benchmark produced no measurable duration"));
    }

    let measured = total_units as f64 / total_seconds;
    backend.capacity().calibrate_to(measured);
    info!(units_per_second = measured, "capacity calibrated");
    Ok(measured)
}

/// Calibrate, logging failure and keeping the default estimate
pub async fn calibrate_or_default(backend: &Backend, registry: &AdapterRegistry) {
    if let Err(e) = calibrate(backend, registry).await {
        warn!(
            "calibration failed, keeping default capacity of {} units/s: {}",
            backend.capacity().units_per_second(),
            e
        );
    }
}

/// Consume a benchmark reply fully so the gate is held for the real
/// duration of the response
async fn drain(reply: UpstreamReply) -> Result<()> {
    match reply {
        UpstreamReply::Json(_) => Ok(()),
        UpstreamReply::Status(status) => Err(Error::calibration(format!(
            "model server answered {} during benchmark",
            status
        ))),
        UpstreamReply::Stream(mut stream) => {
            while let Some(chunk) = stream.next().await {
                chunk?;
            }
            Ok(())
        }
    }
}
