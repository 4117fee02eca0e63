//! Request counter shared between the origin's connection workers and the
//! orchestrating task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic count of requests that reached the origin's handler logic.
///
/// Cloning yields another handle to the same count. Each origin instance owns
/// a fresh counter, so scenarios never observe each other's requests.
#[derive(Debug, Clone, Default)]
pub struct RequestCounter(Arc<AtomicU64>);

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
