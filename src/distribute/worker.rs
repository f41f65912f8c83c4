//! Worker consume loop

use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::{
    buffers::{BufferRef, PacketPool},
    client::ClientRecord,
    config::PACKET_READ_SIZE,
    error::{DistError, Result},
    init::Handles,
    ports::PortId,
};

use super::IdleStrategy;

/// Drains one worker ring, hands each frame to a handler and releases it
#[derive(Debug)]
pub struct Worker {
    record: ClientRecord,
    pool: PacketPool,
    burst: Vec<BufferRef>,
}

impl Worker {
    /// Build from an attacher's handles
    pub fn new(handles: &Handles) -> Result<Self> {
        let record = handles.worker().cloned().ok_or_else(|| {
            DistError::invalid_parameter("role", format!("{} has no worker ring", handles.role))
        })?;

        Ok(Self {
            record,
            pool: handles.pool.clone(),
            burst: Vec::with_capacity(PACKET_READ_SIZE),
        })
    }

    pub fn worker_index(&self) -> usize {
        self.record.worker_index()
    }

    /// Dequeue one burst; returns frames handled
    ///
    /// Every dequeued buffer is released even when some fail validation;
    /// the first such failure is returned after the burst is drained.
    pub fn poll<F>(&mut self, mut handler: F) -> Result<usize>
    where
        F: FnMut(PortId, &[u8]),
    {
        self.record.rx_q().dequeue_burst(&mut self.burst, PACKET_READ_SIZE);

        let mut handled = 0;
        let mut first_err = None;
        for buf in self.burst.drain(..) {
            let index = buf.index();
            let checked = self
                .pool
                .port_of(&buf)
                .and_then(|port| Ok((port, self.pool.frame(&buf)?)));
            let outcome = match checked {
                Ok((port, frame)) => {
                    handler(port, frame);
                    self.pool.release(buf)
                }
                // not ours to release
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => handled += 1,
                Err(e) => {
                    warn!("Worker {}: dropping buffer {}: {}", self.record.worker_index(), index, e);
                    first_err.get_or_insert(e);
                }
            }
        }

        if handled > 0 {
            self.record.stats().record_rx(handled);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }

    /// Poll until `running` is cleared; returns frames handled
    pub fn run<F>(
        &mut self,
        mut handler: F,
        idle: &mut dyn IdleStrategy,
        running: &AtomicBool,
    ) -> Result<u64>
    where
        F: FnMut(PortId, &[u8]),
    {
        info!("Worker {} consuming from {}", self.worker_index(), self.record.rx_q().name());
        let mut total = 0u64;
        while running.load(Ordering::Relaxed) {
            let handled = self.poll(&mut handler)?;
            total += handled as u64;
            idle.idle(handled);
        }
        Ok(total)
    }
}
