//! Per-worker record: the worker's ring plus traffic counters

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::ringbuf::RingQueue;

/// Counters for one worker ring, local to the process holding the record
#[derive(Debug, Default)]
pub struct ClientStats {
    rx: AtomicU64,
    rx_drop: AtomicU64,
}

impl ClientStats {
    /// Buffers delivered to the ring
    pub fn rx(&self) -> u64 {
        self.rx.load(Ordering::Relaxed)
    }

    /// Buffers dropped because the ring was full
    pub fn rx_drop(&self) -> u64 {
        self.rx_drop.load(Ordering::Relaxed)
    }

    pub fn record_rx(&self, count: usize) {
        self.rx.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_drop(&self, count: usize) {
        self.rx_drop.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// One worker's receive ring as seen by the owner or by the worker itself
#[derive(Debug, Clone)]
pub struct ClientRecord {
    worker_index: usize,
    rx_q: RingQueue,
    stats: Arc<ClientStats>,
}

impl ClientRecord {
    pub fn new(worker_index: usize, rx_q: RingQueue) -> Self {
        Self {
            worker_index,
            rx_q,
            stats: Arc::new(ClientStats::default()),
        }
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn rx_q(&self) -> &RingQueue {
        &self.rx_q
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }
}
