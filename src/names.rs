//! Resource name keys
//!
//! Owner and attachers build these independently, so they depend only on
//! fixed literals and the worker index.

use crate::{
    config::MAX_NAME_LEN,
    error::{DistError, Result},
};

/// Name of the packet buffer pool
pub const PKTMBUF_POOL_NAME: &str = "MProc_pktmbuf_pool";

/// Name of the shared port table
pub const MZ_PORT_INFO: &str = "MProc_port_info";

/// Prefix of every per-worker receive ring
pub const RX_QUEUE_PREFIX: &str = "rx_q_";

/// Name of the receive ring for `worker_index`
pub fn rx_queue_name(worker_index: usize) -> String {
    format!("{}{}", RX_QUEUE_PREFIX, worker_index)
}

/// Check that `name` can be used as a registry key
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DistError::invalid_parameter("name", "Name cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DistError::invalid_parameter(
            "name",
            format!("Name '{}' longer than {} bytes", name, MAX_NAME_LEN),
        ));
    }
    if name.contains('/') || name.contains('\0') || name.starts_with('.') {
        return Err(DistError::invalid_parameter(
            "name",
            format!("Name '{}' contains a reserved character", name),
        ));
    }
    Ok(())
}
