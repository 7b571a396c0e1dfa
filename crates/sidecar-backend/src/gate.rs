//! Request admission control
//!
//! Most inference servers cannot interleave evaluation safely, so an
//! exclusive-mode gate holds its one permit from admission until the
//! response body is fully drained. Queued arrivals are released in FIFO
//! order; the tokio semaphore's fair queue is what provides that ordering.

use sidecar_core::{Error, GateMode, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission-control primitive for the request pipeline
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    mode: GateMode,
    slot: Option<Arc<Semaphore>>,
}

/// Proof of admission. Dropping it releases the slot.
#[derive(Debug)]
pub struct GatePass {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyGate {
    pub fn new(mode: GateMode) -> Self {
        let slot = match mode {
            GateMode::Parallel => None,
            GateMode::Exclusive => Some(Arc::new(Semaphore::new(1))),
        };
        Self { mode, slot }
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    /// Admit a request, suspending until a slot is free.
    ///
    /// Parallel mode admits immediately. Exclusive mode queues behind the
    /// request currently in flight, strictly in arrival order.
    pub async fn admit(&self) -> Result<GatePass> {
        let permit = match &self.slot {
            None => None,
            Some(slot) => Some(
                slot.clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::config("concurrency gate closed"))?,
            ),
        };
        Ok(GatePass { _permit: permit })
    }

    /// Whether a request could be admitted without waiting
    pub fn is_idle(&self) -> bool {
        match &self.slot {
            None => true,
            Some(slot) => slot.available_permits() > 0,
        }
    }
}
