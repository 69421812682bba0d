//! Counting admission gate.
//!
//! Bounds the number of concurrently executing handler invocations for
//! one binding. The receive loop acquires a slot *before* dispatching a
//! handler task, so the (N+1)-th dispatch blocks while N are
//! outstanding — back-pressure comes from suspending the loop, not from
//! queueing unbounded tasks.
//!
//! During drain, [`AdmissionGate::drain`] waits for every slot to come
//! home, bounded by the supervisor's drain deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{Result, WorkerError};

/// One reserved in-flight message slot. Dropping it releases the slot.
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

/// Admission gate sized to a binding's `max_concurrent_messages`.
#[derive(Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn admit(&self) -> Result<SlotPermit> {
        // ---
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::Transport("admission gate closed".into()))?;

        Ok(SlotPermit { _permit: permit })
    }

    /// Number of slots currently out.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until every slot has been released, or the timeout elapses.
    ///
    /// Returns `true` when the gate drained fully. On timeout the
    /// acquired permits are released again; stragglers keep their slots
    /// and their messages are abandoned to broker-native redelivery.
    pub async fn drain(&self, timeout: Duration) -> bool {
        // ---
        let all = self.capacity as u32;
        match tokio::time::timeout(timeout, self.semaphore.acquire_many(all)).await {
            Ok(Ok(permits)) => {
                drop(permits);
                true
            }
            Ok(Err(_)) | Err(_) => false,
        }
    }
}
