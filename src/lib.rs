//! # mpdist - Multi-process packet distribution over shared memory
//!
//! One owner process receives frames from a set of network ports and hands
//! them to a fixed number of worker processes. All exchange goes through
//! named objects in shared memory: a port descriptor table, one packet buffer
//! pool, and one single-producer single-consumer ring per worker.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── owner ─────────────────────────────┐
//! │  PortDriver ──rx_burst──► Distributor ──enqueue_bulk──┐        │
//! └───────────────────────────────────────────────────────┼────────┘
//!                                                         ▼
//!   MProc_port_info    MProc_pktmbuf_pool    rx_q_0  rx_q_1 ... rx_q_N
//!                                                         │
//! ┌──────────────────────── worker i ─────────────────────┼────────┐
//! │  Worker ◄──dequeue_burst── rx_q_i     release ──► pool         │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Objects are published through a [`ResourceRegistry`]. [`initialize`]
//! creates them (owner) or resolves them by name (attacher) and returns the
//! [`Handles`] the rest of the program works with.

pub mod buffers;
pub mod client;
pub mod config;
pub mod distribute;
pub mod error;
pub mod init;
pub mod memory;
pub mod names;
pub mod ports;
pub mod registry;
pub mod ringbuf;

pub use buffers::{BufferPoolStats, BufferRef, PacketPool};
pub use client::{ClientRecord, ClientStats};
pub use config::{DistConfig, DistConfigBuilder};
pub use distribute::{Distributor, DistributorStats, IdleStrategy, Worker};
pub use error::{DistError, Result};
pub use init::{initialize, Handles, ProcessType, Queues, Role};
pub use memory::{BackingType, RegionConfig, SharedMemoryRegion};
pub use ports::{LinkStatus, LinkWait, PortDriver, PortId, PortTable, SoftPortDriver};
pub use registry::{LocalRegistry, RegistryConfig, RegistryEntry, ResourceKind, ResourceRegistry, ShmRegistry};
pub use ringbuf::RingQueue;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
