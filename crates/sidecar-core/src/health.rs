//! Model server health lifecycle
//!
//! The worker's view of the inference server moves through
//! `Starting -> Loading -> Ready`, with `Crashed` reachable from any state
//! and absorbing. The readiness monitor is the only writer; the request
//! pipeline and the reporter observe through cheap clones of [`HealthCell`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Lifecycle state of the backing model server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Worker is up, model server not yet observed
    Starting,
    /// Model server log exists; the model is loading
    Loading,
    /// Startup-complete marker seen; requests may be forwarded
    Ready,
    /// Fatal marker seen; no further forwarding for the process lifetime
    Crashed,
}

impl HealthState {
    /// Stable lowercase name, used in telemetry payloads and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Starting => "starting",
            HealthState::Loading => "loading",
            HealthState::Ready => "ready",
            HealthState::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, synchronized health state cell.
///
/// Wraps a watch channel so observers can either poll [`current`] or
/// suspend on transitions via [`wait_ready`] / [`subscribe`]. Transitions
/// are monotone; once `Crashed` is entered no later call changes the state.
///
/// [`current`]: HealthCell::current
/// [`wait_ready`]: HealthCell::wait_ready
/// [`subscribe`]: HealthCell::subscribe
#[derive(Debug, Clone)]
pub struct HealthCell {
    tx: Arc<watch::Sender<HealthState>>,
}

impl HealthCell {
    /// Create a new cell in the `Starting` state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(HealthState::Starting);
        Self { tx: Arc::new(tx) }
    }

    /// Current state snapshot
    pub fn current(&self) -> HealthState {
        *self.tx.borrow()
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.tx.subscribe()
    }

    /// Record that the model server exists and is loading.
    ///
    /// Only valid from `Starting`; returns whether the state changed.
    pub fn mark_loading(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == HealthState::Starting {
                info!("model server is loading");
                *state = HealthState::Loading;
                true
            } else {
                false
            }
        })
    }

    /// Record that the model finished loading.
    ///
    /// Idempotent: repeated startup markers in the log transition once.
    /// Ignored after a crash. Returns whether the state changed.
    pub fn mark_ready(&self) -> bool {
        self.tx.send_if_modified(|state| {
            match *state {
                HealthState::Starting | HealthState::Loading => {
                    info!("model server is ready");
                    *state = HealthState::Ready;
                    true
                }
                HealthState::Ready | HealthState::Crashed => false,
            }
        })
    }

    /// Record an unrecoverable model failure. Absorbing; the first call wins.
    pub fn mark_crashed(&self, reason: &str) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == HealthState::Crashed {
                false
            } else {
                error!(reason, "model server crashed, instance requires replacement");
                *state = HealthState::Crashed;
                true
            }
        })
    }

    /// Suspend until the server becomes `Ready`.
    ///
    /// Fails with [`Error::Crashed`] if the crash state wins the race.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.subscribe();
        loop {
            match *rx.borrow_and_update() {
                HealthState::Ready => return Ok(()),
                HealthState::Crashed => return Err(Error::Crashed),
                _ => {}
            }
            rx.changed()
                .await
                .map_err(|_| Error::config("health cell dropped while waiting for ready"))?;
        }
    }
}

impl Default for HealthCell {
    fn default() -> Self {
        Self::new()
    }
}
