//! Log-driven readiness monitor
//!
//! The inference server's log stream is the source of truth for its
//! lifecycle: the monitor tails newly appended lines for the lifetime of
//! the process and classifies each one against an ordered rule set,
//! driving the shared health cell. The file's format and content are not
//! under this system's control; matching is plain substring containment.

use sidecar_core::HealthCell;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub use sidecar_core::{LogAction, LogRule};

/// Background task tailing the model server log.
///
/// Marks the health cell `Loading` once the log file appears, `Ready` on
/// the startup marker, and `Crashed` on a fatal marker. Runs until
/// stopped; the log is a growing stream, never a fixed snapshot.
pub struct LogMonitor {
    path: PathBuf,
    rules: Vec<LogRule>,
    health: HealthCell,
    poll_interval: Duration,
}

/// Handle to a running monitor. Dropping it stops the task.
pub struct MonitorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the monitor and wait for the task to wind down
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!("log monitor task failed: {}", e);
            }
        }
    }
}

impl LogMonitor {
    pub fn new(
        path: impl Into<PathBuf>,
        rules: Vec<LogRule>,
        health: HealthCell,
        poll_interval: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            rules,
            health,
            poll_interval,
        }
    }

    /// Spawn the tail loop
    pub fn start(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(shutdown_rx));
        MonitorHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        info!("tailing model server log at {}", self.path.display());

        let mut file: Option<tokio::fs::File> = None;
        let mut carry = String::new();
        let mut buf = vec![0u8; 8192];

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("log monitor stopping");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if file.is_none() {
                match tokio::fs::File::open(&self.path).await {
                    Ok(f) => {
                        // The server process exists and is writing its log
                        self.health.mark_loading();
                        file = Some(f);
                    }
                    Err(_) => continue,
                }
            }

            if let Some(reader) = file.as_mut() {
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            carry.push_str(&String::from_utf8_lossy(&buf[..n]));
                            while let Some(newline) = carry.find('\n') {
                                let line: String = carry.drain(..=newline).collect();
                                self.classify(line.trim_end());
                            }
                        }
                        Err(e) => {
                            warn!("log read failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Apply every matching rule to one complete line
    fn classify(&self, line: &str) {
        for rule in &self.rules {
            if !line.contains(&rule.pattern) {
                continue;
            }
            match rule.action {
                LogAction::ModelLoaded => {
                    self.health.mark_ready();
                }
                LogAction::Info => {
                    info!(line, "model server progress");
                }
                LogAction::ModelError => {
                    self.health.mark_crashed(line);
                }
            }
        }
    }
}
