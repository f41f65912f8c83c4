//! Create and attach strategies
//!
//! The owner creates every shared object in a fixed order: port table, buffer
//! pool, port bring-up, worker rings. An attacher resolves the same names in
//! the same order and never creates anything.

use log::{debug, info};

use crate::{
    buffers::{current_numa_node, pool_buffer_count, PacketPool},
    client::ClientRecord,
    config::DistConfig,
    error::{DistError, Result},
    names::{rx_queue_name, MZ_PORT_INFO, PKTMBUF_POOL_NAME},
    ports::{check_all_ports_link_status, PortDriver, PortTable},
    registry::{ResourceKind, ResourceRegistry},
    ringbuf::RingQueue,
};

use super::{Queues, Role};

/// One way of obtaining the shared objects
pub trait InitStrategy {
    /// Role this strategy initialises
    fn role(&self) -> Role;

    /// Obtain the port descriptor table
    fn port_table(
        &self,
        registry: &dyn ResourceRegistry,
        config: &DistConfig,
        driver: &dyn PortDriver,
    ) -> Result<PortTable>;

    /// Obtain the packet buffer pool
    fn buffer_pool(
        &self,
        registry: &dyn ResourceRegistry,
        config: &DistConfig,
        ports: &PortTable,
    ) -> Result<PacketPool>;

    /// Bring up ports; attachers have nothing to do
    fn bring_up_ports(
        &self,
        ports: &PortTable,
        pool: &PacketPool,
        driver: &mut dyn PortDriver,
        config: &DistConfig,
    ) -> Result<()>;

    /// Obtain the worker rings this role uses
    fn queues(
        &self,
        registry: &dyn ResourceRegistry,
        config: &DistConfig,
        ports: &PortTable,
    ) -> Result<Queues>;
}

/// Owner path: creates and publishes every object
#[derive(Debug, Default, Clone, Copy)]
pub struct CreateStrategy;

impl CreateStrategy {
    /// Buffer count and byte size of the pool for `config`
    ///
    /// Fails with `InsufficientSpace` when the count overflows or the pool
    /// would exceed `config.max_pool_bytes`.
    pub fn pool_sizing(config: &DistConfig, num_ports: usize) -> Result<(usize, usize)> {
        let count = pool_buffer_count(
            config.worker_count,
            num_ports,
            config.mbufs_per_worker,
            config.mbufs_per_port,
        )
        .ok_or_else(|| DistError::insufficient_space(usize::MAX, config.max_pool_bytes))?;

        let bytes = PacketPool::required_size(count, config.buffer_size)
            .ok_or_else(|| DistError::insufficient_space(usize::MAX, config.max_pool_bytes))?;
        if bytes > config.max_pool_bytes {
            return Err(DistError::insufficient_space(bytes, config.max_pool_bytes));
        }
        Ok((count, bytes))
    }
}

impl InitStrategy for CreateStrategy {
    fn role(&self) -> Role {
        Role::Owner
    }

    fn port_table(
        &self,
        registry: &dyn ResourceRegistry,
        config: &DistConfig,
        driver: &dyn PortDriver,
    ) -> Result<PortTable> {
        config.validate()?;

        let available = driver.available_ports();
        if let Some(&port) = config.ports.iter().find(|p| !available.contains(p)) {
            return Err(DistError::PortUnavailable { port });
        }

        let region = registry.create(MZ_PORT_INFO, ResourceKind::PortTable, PortTable::required_size())?;
        let table = PortTable::create(region, &config.ports, config.worker_count)?;
        debug!("Published port table with ports {:?}", table.ids());
        Ok(table)
    }

    fn buffer_pool(
        &self,
        registry: &dyn ResourceRegistry,
        config: &DistConfig,
        ports: &PortTable,
    ) -> Result<PacketPool> {
        let (count, bytes) = Self::pool_sizing(config, ports.num_ports())?;
        debug!(
            "Creating mbuf pool '{}' [{} mbufs, {} bytes] ...",
            PKTMBUF_POOL_NAME, count, bytes
        );

        let region = registry.create(PKTMBUF_POOL_NAME, ResourceKind::BufferPool, bytes)?;
        PacketPool::create(region, count, config.buffer_size, current_numa_node())
    }

    fn bring_up_ports(
        &self,
        ports: &PortTable,
        pool: &PacketPool,
        driver: &mut dyn PortDriver,
        config: &DistConfig,
    ) -> Result<()> {
        for &port in ports.ids() {
            driver.init_port(port, pool).map_err(|e| match e {
                DistError::PortInit { .. } | DistError::PortUnavailable { .. } => e,
                other => DistError::port_init(port, other.to_string()),
            })?;
        }
        check_all_ports_link_status(ports, driver, config.link_wait);
        Ok(())
    }

    fn queues(
        &self,
        registry: &dyn ResourceRegistry,
        config: &DistConfig,
        _ports: &PortTable,
    ) -> Result<Queues> {
        let size = RingQueue::required_size(config.ring_size)
            .ok_or_else(|| DistError::memory("Ring size overflows usize"))?;

        let mut clients = Vec::with_capacity(config.worker_count);
        for i in 0..config.worker_count {
            let name = rx_queue_name(i);
            let region = registry.create(&name, ResourceKind::RingQueue, size)?;
            let ring = RingQueue::create(region, config.ring_size)?;
            clients.push(ClientRecord::new(i, ring));
        }
        debug!("Created {} worker rings of {} slots", clients.len(), config.ring_size);
        Ok(Queues::Owner(clients))
    }
}

/// Attacher path: resolves everything by name
#[derive(Debug, Clone, Copy)]
pub struct AttachStrategy {
    worker_index: usize,
}

impl AttachStrategy {
    pub fn new(worker_index: usize) -> Self {
        Self { worker_index }
    }
}

impl InitStrategy for AttachStrategy {
    fn role(&self) -> Role {
        Role::Attacher {
            worker_index: self.worker_index,
        }
    }

    fn port_table(
        &self,
        registry: &dyn ResourceRegistry,
        _config: &DistConfig,
        _driver: &dyn PortDriver,
    ) -> Result<PortTable> {
        let table = PortTable::attach(registry.lookup(MZ_PORT_INFO)?)?;
        if self.worker_index >= table.num_workers() {
            return Err(DistError::WorkerOutOfRange {
                index: self.worker_index,
                count: table.num_workers(),
            });
        }
        Ok(table)
    }

    fn buffer_pool(
        &self,
        registry: &dyn ResourceRegistry,
        _config: &DistConfig,
        _ports: &PortTable,
    ) -> Result<PacketPool> {
        let pool = PacketPool::attach(registry.lookup(PKTMBUF_POOL_NAME)?)?;
        debug!("Attached to mbuf pool '{}' [{} mbufs]", pool.name(), pool.capacity());
        Ok(pool)
    }

    fn bring_up_ports(
        &self,
        _ports: &PortTable,
        _pool: &PacketPool,
        _driver: &mut dyn PortDriver,
        _config: &DistConfig,
    ) -> Result<()> {
        Ok(())
    }

    fn queues(
        &self,
        registry: &dyn ResourceRegistry,
        _config: &DistConfig,
        _ports: &PortTable,
    ) -> Result<Queues> {
        let name = rx_queue_name(self.worker_index);
        let ring = RingQueue::attach(registry.lookup(&name)?)?;
        info!("Worker {} attached to ring {}", self.worker_index, ring.name());
        Ok(Queues::Worker(ClientRecord::new(self.worker_index, ring)))
    }
}

pub(super) fn strategy_for(role: Role) -> Box<dyn InitStrategy> {
    match role {
        Role::Owner => Box::new(CreateStrategy),
        Role::Attacher { worker_index } => Box::new(AttachStrategy::new(worker_index)),
    }
}
