//! Named resource registry
//!
//! The only channel through which objects created by the owner become visible
//! to attachers. Two backends share one trait: [`LocalRegistry`] keeps
//! anonymous mappings in a process-local map, [`ShmRegistry`] keeps
//! file-backed mappings under a namespace directory.

pub mod control;
pub mod local;
pub mod shm;
pub mod types;

use std::sync::Arc;

use crate::{error::Result, memory::SharedMemoryRegion};

pub use control::{ControlHeader, ControlRegion};
pub use local::LocalRegistry;
pub use shm::{RegistryConfig, ShmRegistry};
pub use types::{process_alive, RegistryEntry, ResourceKind};

/// Key-value store of shared memory regions
pub trait ResourceRegistry: Send + Sync {
    /// Create a zero-filled region of `size` bytes under `name`
    ///
    /// Fails with `RegionExists` if the name is taken.
    fn create(&self, name: &str, kind: ResourceKind, size: usize) -> Result<Arc<SharedMemoryRegion>>;

    /// Resolve a region created earlier, possibly by another process
    ///
    /// Fails with `RegionNotFound` if nothing was published under `name`.
    fn lookup(&self, name: &str) -> Result<Arc<SharedMemoryRegion>>;

    /// Whether `name` is currently published
    fn contains(&self, name: &str) -> bool;

    /// All published entries, ordered by name
    fn entries(&self) -> Result<Vec<RegistryEntry>>;
}
