//! Render Limiter
//!
//! A counting semaphore that caps the number of in-flight render fetches
//! across every request in the process. Find calls are intentionally not
//! limited; only the per-leaf data fetches are.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Process-wide cap on concurrent render fetches.
#[derive(Clone)]
pub struct Limiter {
    sem: Arc<Semaphore>,
    capacity: usize,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Blocks until a slot is free. The permit releases its slot on drop.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        match self.sem.clone().acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is never closed.
            Err(_) => unreachable!("limiter semaphore closed"),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }
}
