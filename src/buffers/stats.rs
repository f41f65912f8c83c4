//! Buffer pool counters
//!
//! Counters are local to the process that holds the pool handle; the pool
//! itself only shares its free-list.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of pool activity seen by one process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferPoolStats {
    /// Successful allocations
    pub allocations: u64,
    /// Allocations that found the pool empty
    pub allocation_failures: u64,
    /// Buffers returned to the pool
    pub releases: u64,
}

impl BufferPoolStats {
    /// Fraction of allocation attempts that succeeded (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let attempts = self.allocations + self.allocation_failures;
        if attempts == 0 {
            return 1.0;
        }
        self.allocations as f64 / attempts as f64
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "BufferPoolStats {{ allocations: {}, failures: {}, releases: {}, success_rate: {:.2}% }}",
            self.allocations,
            self.allocation_failures,
            self.releases,
            self.success_rate() * 100.0
        )
    }
}

/// Thread-safe counters behind [`BufferPoolStats`]
#[derive(Debug, Default)]
pub struct AtomicBufferPoolStats {
    allocations: AtomicU64,
    allocation_failures: AtomicU64,
    releases: AtomicU64,
}

impl AtomicBufferPoolStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful allocation
    pub fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an allocation failure
    pub fn record_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a release
    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> BufferPoolStats {
        BufferPoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }
}
