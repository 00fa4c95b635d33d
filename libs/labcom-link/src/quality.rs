//! Per-Connection Data Quality Counters
//!
//! Success/failure/checksum tallies kept by each connection and read (and
//! reset) by the monitoring side. Plain atomics so the hot receive path
//! never takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualitySnapshot {
    pub success_count: u64,
    pub failure_count: u64,
    pub checksum_error_count: u64,
}

/// Data-quality counters for one instrument connection
#[derive(Debug, Default)]
pub struct QualityCounters {
    success_count: AtomicU64,
    failure_count: AtomicU64,
    checksum_error_count: AtomicU64,
}

impl QualityCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successfully validated frame or message
    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a general receive failure (parse error, timeout, short frame)
    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a checksum or CRC mismatch
    pub fn record_checksum_error(&self) {
        self.checksum_error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QualitySnapshot {
        QualitySnapshot {
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            checksum_error_count: self.checksum_error_count.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters, returning the values they held
    pub fn reset(&self) -> QualitySnapshot {
        QualitySnapshot {
            success_count: self.success_count.swap(0, Ordering::Relaxed),
            failure_count: self.failure_count.swap(0, Ordering::Relaxed),
            checksum_error_count: self.checksum_error_count.swap(0, Ordering::Relaxed),
        }
    }
}
