//! Best-effort autoscaler telemetry
//!
//! Every sample start/finish nudges the reporter; a periodic tick covers
//! idle stretches. Pushes describe pending workload, capacity, and health
//! so the autoscaler can decide when this worker needs company. A failed
//! push is logged and discarded: telemetry must never touch the primary
//! request path or surface to a client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sidecar_core::{CapacityEstimate, Error, HealthCell, HealthState, Result, WorkloadTracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// One telemetry push. The remote owns the full schema; these fields are
/// the ones this worker guarantees on every update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub health: HealthState,
    pub pending_requests: u64,
    pub pending_units: u64,
    pub capacity_units_per_second: f64,
    pub expected_drain_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// Destination for telemetry pushes.
///
/// Narrow by design: the autoscaler's wire contract lives behind this
/// trait so deployments can swap transports without touching the engine.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn push(&self, status: &WorkerStatus) -> Result<()>;
}

/// Production sink: authenticated JSON POST to the autoscaler
pub struct HttpReportSink {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpReportSink {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::config(format!("failed to build telemetry client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn push(&self, status: &WorkerStatus) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(status)
            .send()
            .await
            .map_err(|e| Error::reporting(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::reporting(format!(
                "autoscaler answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Cheap handle the pipeline uses to nudge the reporter.
///
/// `notify` never blocks and never fails: a full channel means a push is
/// already queued, which is all a nudge asks for.
#[derive(Debug, Clone)]
pub struct ReporterHandle {
    tx: Option<mpsc::Sender<()>>,
}

impl ReporterHandle {
    /// Handle that drops every nudge; for tests and disabled telemetry
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(());
        }
    }
}

/// Background push loop with its own start/stop lifecycle
pub struct AutoscalerReporter {
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
    handle: ReporterHandle,
}

impl AutoscalerReporter {
    /// Spawn the reporter task
    pub fn spawn(
        worker_id: impl Into<String>,
        interval: Duration,
        health: HealthCell,
        tracker: WorkloadTracker,
        capacity: CapacityEstimate,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        let (nudge_tx, nudge_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(report_loop(
            worker_id.into(),
            interval,
            health,
            tracker,
            capacity,
            sink,
            nudge_rx,
            shutdown_rx,
        ));

        Self {
            shutdown: Some(shutdown_tx),
            task,
            handle: ReporterHandle { tx: Some(nudge_tx) },
        }
    }

    pub fn handle(&self) -> ReporterHandle {
        self.handle.clone()
    }

    /// Stop the reporter and wait for the task to wind down
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!("reporter task failed: {}", e);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn report_loop(
    worker_id: String,
    interval: Duration,
    health: HealthCell,
    tracker: WorkloadTracker,
    capacity: CapacityEstimate,
    sink: Arc<dyn ReportSink>,
    mut nudges: mpsc::Receiver<()>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("reporter stopping");
                return;
            }
            _ = ticker.tick() => {}
            nudge = nudges.recv() => {
                if nudge.is_none() {
                    return;
                }
                // Coalesce a burst of nudges into one push
                while nudges.try_recv().is_ok() {}
            }
        }

        let status = build_status(&worker_id, &health, &tracker, &capacity);
        if let Err(e) = sink.push(&status).await {
            warn!("autoscaler push failed: {}", e);
        }
    }
}

fn build_status(
    worker_id: &str,
    health: &HealthCell,
    tracker: &WorkloadTracker,
    capacity: &CapacityEstimate,
) -> WorkerStatus {
    let snapshot = tracker.snapshot();
    WorkerStatus {
        worker_id: worker_id.to_string(),
        health: health.current(),
        pending_requests: snapshot.pending_requests,
        pending_units: snapshot.pending_units,
        capacity_units_per_second: capacity.units_per_second(),
        expected_drain_seconds: capacity.expected_drain_seconds(snapshot.pending_units),
        timestamp: Utc::now(),
    }
}
