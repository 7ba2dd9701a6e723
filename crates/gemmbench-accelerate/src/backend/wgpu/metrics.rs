use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Device traffic counters, shared by the context and every fence.
pub struct GpuMetrics {
    submissions: AtomicU64,
    fence_waits: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_read_back: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub submissions: u64,
    pub fence_waits: u64,
    pub bytes_uploaded: u64,
    pub bytes_read_back: u64,
}

impl Default for GpuMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuMetrics {
    pub fn new() -> Self {
        Self {
            submissions: AtomicU64::new(0),
            fence_waits: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            bytes_read_back: AtomicU64::new(0),
        }
    }

    pub fn inc_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fence_wait(&self) {
        self.fence_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_uploaded(&self, bytes: u64) {
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_read_back(&self, bytes: u64) {
        self.bytes_read_back.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submissions: self.submissions.load(Ordering::Relaxed),
            fence_waits: self.fence_waits.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_read_back: self.bytes_read_back.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.submissions.store(0, Ordering::Relaxed);
        self.fence_waits.store(0, Ordering::Relaxed);
        self.bytes_uploaded.store(0, Ordering::Relaxed);
        self.bytes_read_back.store(0, Ordering::Relaxed);
    }
}
