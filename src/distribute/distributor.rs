//! Owner receive loop: ports to worker rings

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::{
    buffers::{BufferRef, PacketPool},
    client::ClientRecord,
    config::PACKET_READ_SIZE,
    error::{DistError, Result},
    init::Handles,
    ports::{PortDriver, PortTable},
};

use super::IdleStrategy;

/// Totals over every worker ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributorStats {
    pub rx: u64,
    pub rx_drop: u64,
}

/// Reads bursts from every port and hands frames round-robin to workers
///
/// Frames are staged per worker and flushed after each port burst with an
/// all-or-nothing bulk enqueue. A batch that does not fit is released back
/// to the pool and counted as dropped on that worker.
#[derive(Debug)]
pub struct Distributor {
    ports: PortTable,
    pool: PacketPool,
    clients: Vec<ClientRecord>,
    staged: Vec<Vec<BufferRef>>,
    rx_burst: Vec<BufferRef>,
    next_client: usize,
}

impl Distributor {
    /// Build from the owner's handles
    pub fn new(handles: &Handles) -> Result<Self> {
        let clients = handles.clients().to_vec();
        if clients.is_empty() {
            return Err(DistError::invalid_parameter(
                "role",
                format!("{} has no worker rings to distribute to", handles.role),
            ));
        }

        Ok(Self {
            ports: handles.ports.clone(),
            pool: handles.pool.clone(),
            staged: clients
                .iter()
                .map(|_| Vec::with_capacity(PACKET_READ_SIZE))
                .collect(),
            clients,
            rx_burst: Vec::with_capacity(PACKET_READ_SIZE),
            next_client: 0,
        })
    }

    /// One pass over every port; returns frames received
    pub fn poll(&mut self, driver: &mut dyn PortDriver) -> usize {
        let mut received = 0;
        for i in 0..self.ports.num_ports() {
            let port = self.ports.ids()[i];
            let count = driver.rx_burst(port, &self.pool, &mut self.rx_burst, PACKET_READ_SIZE);
            if count == 0 {
                continue;
            }
            received += count;

            let mut burst = std::mem::take(&mut self.rx_burst);
            for buf in burst.drain(..) {
                self.stage(buf);
            }
            self.rx_burst = burst;
            self.flush_all();
        }
        received
    }

    fn stage(&mut self, buf: BufferRef) {
        let client = self.next_client;
        self.staged[client].push(buf);
        if self.staged[client].len() >= PACKET_READ_SIZE {
            self.flush(client);
        }
        self.next_client = (client + 1) % self.clients.len();
    }

    fn flush(&mut self, client: usize) {
        if self.staged[client].is_empty() {
            return;
        }

        let batch = std::mem::replace(&mut self.staged[client], Vec::with_capacity(PACKET_READ_SIZE));
        let count = batch.len();
        let record = &self.clients[client];

        match record.rx_q().enqueue_bulk(batch) {
            Ok(()) => record.stats().record_rx(count),
            Err(rejected) => {
                for buf in rejected {
                    if let Err(e) = self.pool.release(buf) {
                        warn!("Dropping buffer for worker {}: {}", client, e);
                    }
                }
                record.stats().record_drop(count);
                debug!("Worker {} ring full, dropped {} frames", client, count);
            }
        }
    }

    /// Push every staged batch to its ring
    pub fn flush_all(&mut self) {
        for client in 0..self.clients.len() {
            self.flush(client);
        }
    }

    /// Poll until `running` is cleared
    pub fn run(
        &mut self,
        driver: &mut dyn PortDriver,
        idle: &mut dyn IdleStrategy,
        running: &AtomicBool,
    ) -> DistributorStats {
        info!(
            "Distributing from ports {:?} to {} workers",
            self.ports.ids(),
            self.clients.len()
        );
        while running.load(Ordering::Relaxed) {
            let received = self.poll(driver);
            idle.idle(received);
        }
        self.flush_all();
        self.stats()
    }

    /// Worker records in ring order
    pub fn clients(&self) -> &[ClientRecord] {
        &self.clients
    }

    pub fn stats(&self) -> DistributorStats {
        self.clients
            .iter()
            .fold(DistributorStats::default(), |acc, c| DistributorStats {
                rx: acc.rx + c.stats().rx(),
                rx_drop: acc.rx_drop + c.stats().rx_drop(),
            })
    }
}
