//! Packet buffer pool shared by all processes
//!
//! The owner creates the pool once; every process allocates and releases
//! buffers through its own handle to the same shared free-list.

pub mod buffer;
pub mod pool;
pub mod stats;

pub use buffer::BufferRef;
pub use pool::{current_numa_node, pool_buffer_count, PacketPool};
pub use stats::{AtomicBufferPoolStats, BufferPoolStats};
