//! Startup configuration and compile-time limits

use std::time::Duration;

use crate::{
    error::{DistError, Result},
    ports::{LinkWait, PortId},
};

/// Capacity of the shared port table
pub const MAX_PORTS: usize = 32;

/// Upper bound on the number of worker processes
pub const MAX_WORKERS: usize = 64;

/// Default buffers reserved per worker
pub const MBUFS_PER_WORKER: usize = 1536;

/// Default buffers reserved per port
pub const MBUFS_PER_PORT: usize = 1536;

/// Default slot count of each per-worker ring
pub const CLIENT_QUEUE_RINGSIZE: usize = 128;

/// Largest frame a buffer carries
pub const MAX_FRAME_SIZE: usize = 2048;

/// Default data bytes per buffer
pub const MBUF_DATA_SIZE: usize = MAX_FRAME_SIZE;

/// Burst size for port reads and per-worker flushes
pub const PACKET_READ_SIZE: usize = 32;

/// Size of the registry control region (64KB)
pub const DEFAULT_CONTROL_SIZE: usize = 64 * 1024;

/// Longest accepted resource name, in bytes
pub const MAX_NAME_LEN: usize = 32;

/// Default ceiling on the bytes a buffer pool may occupy (1GB)
pub const DEFAULT_MAX_POOL_BYTES: usize = 1024 * 1024 * 1024;

/// Resolved startup parameters for one process
#[derive(Debug, Clone, PartialEq)]
pub struct DistConfig {
    /// Number of worker processes (and rings)
    pub worker_count: usize,
    /// Ports the owner brings up, in table order
    pub ports: Vec<PortId>,
    /// Buffers reserved per worker
    pub mbufs_per_worker: usize,
    /// Buffers reserved per port
    pub mbufs_per_port: usize,
    /// Data bytes per buffer
    pub buffer_size: usize,
    /// Slots per worker ring (power of two)
    pub ring_size: usize,
    /// Creation fails if the pool would exceed this many bytes
    pub max_pool_bytes: usize,
    /// How long the owner waits for links before reporting them
    pub link_wait: LinkWait,
}

impl Default for DistConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            ports: Vec::new(),
            mbufs_per_worker: MBUFS_PER_WORKER,
            mbufs_per_port: MBUFS_PER_PORT,
            buffer_size: MBUF_DATA_SIZE,
            ring_size: CLIENT_QUEUE_RINGSIZE,
            max_pool_bytes: DEFAULT_MAX_POOL_BYTES,
            link_wait: LinkWait::default(),
        }
    }
}

impl DistConfig {
    /// Start a builder
    pub fn builder() -> DistConfigBuilder {
        DistConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 || self.worker_count > MAX_WORKERS {
            return Err(DistError::invalid_parameter(
                "worker_count",
                format!("Worker count must be in 1..={}", MAX_WORKERS),
            ));
        }

        if self.ports.len() > MAX_PORTS {
            return Err(DistError::invalid_parameter(
                "ports",
                format!("At most {} ports are supported", MAX_PORTS),
            ));
        }

        for (i, port) in self.ports.iter().enumerate() {
            if self.ports[..i].contains(port) {
                return Err(DistError::invalid_parameter(
                    "ports",
                    format!("Port {} listed twice", port),
                ));
            }
        }

        if self.buffer_size == 0 || self.buffer_size > u32::MAX as usize {
            return Err(DistError::invalid_parameter(
                "buffer_size",
                "Buffer size must be between 1 and u32::MAX",
            ));
        }

        if self.ring_size == 0 || !self.ring_size.is_power_of_two() {
            return Err(DistError::invalid_parameter(
                "ring_size",
                "Ring size must be a power of two",
            ));
        }

        Ok(())
    }
}

/// Builder for [`DistConfig`]
#[derive(Debug, Default)]
pub struct DistConfigBuilder {
    config: DistConfig,
}

impl DistConfigBuilder {
    /// Create a new builder with default sizing
    pub fn new() -> Self {
        Self {
            config: DistConfig::default(),
        }
    }

    /// Set the worker count
    pub fn workers(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Set the ports to bring up
    pub fn ports(mut self, ports: impl IntoIterator<Item = PortId>) -> Self {
        self.config.ports = ports.into_iter().collect();
        self
    }

    /// Set buffers per worker
    pub fn mbufs_per_worker(mut self, count: usize) -> Self {
        self.config.mbufs_per_worker = count;
        self
    }

    /// Set buffers per port
    pub fn mbufs_per_port(mut self, count: usize) -> Self {
        self.config.mbufs_per_port = count;
        self
    }

    /// Set data bytes per buffer
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Set ring size
    pub fn ring_size(mut self, size: usize) -> Self {
        self.config.ring_size = size;
        self
    }

    /// Set the pool byte ceiling
    pub fn max_pool_bytes(mut self, bytes: usize) -> Self {
        self.config.max_pool_bytes = bytes;
        self
    }

    /// Set the link wait policy
    pub fn link_wait(mut self, timeout: Duration, interval: Duration) -> Self {
        self.config.link_wait = LinkWait { timeout, interval };
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<DistConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
