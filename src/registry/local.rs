//! In-process registry backed by anonymous mappings

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use log::debug;

use crate::{
    error::{DistError, Result},
    memory::SharedMemoryRegion,
    names::validate_name,
};

use super::{RegistryEntry, ResourceKind, ResourceRegistry};

/// Registry whose regions live only inside the current process
///
/// Owner and attacher roles can share one instance through an `Arc`, which
/// makes the whole lifecycle testable without touching the filesystem.
#[derive(Debug, Default)]
pub struct LocalRegistry {
    regions: RwLock<BTreeMap<String, (RegistryEntry, Arc<SharedMemoryRegion>)>>,
}

impl LocalRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a region; handles already resolved stay valid
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut regions = self.regions.write().unwrap();
        regions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DistError::region_not_found(name))
    }

    /// Number of published regions
    pub fn len(&self) -> usize {
        self.regions.read().unwrap().len()
    }

    /// True when nothing is published
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceRegistry for LocalRegistry {
    fn create(&self, name: &str, kind: ResourceKind, size: usize) -> Result<Arc<SharedMemoryRegion>> {
        validate_name(name)?;

        let mut regions = self.regions.write().unwrap();
        if regions.contains_key(name) {
            return Err(DistError::region_exists(name));
        }

        let region = Arc::new(SharedMemoryRegion::anonymous(name, size)?);
        regions.insert(
            name.to_string(),
            (RegistryEntry::new(name, kind, size), Arc::clone(&region)),
        );
        debug!("Created {} '{}' [{} bytes]", kind.label(), name, size);

        Ok(region)
    }

    fn lookup(&self, name: &str) -> Result<Arc<SharedMemoryRegion>> {
        let regions = self.regions.read().unwrap();
        regions
            .get(name)
            .map(|(_, region)| Arc::clone(region))
            .ok_or_else(|| DistError::region_not_found(name))
    }

    fn contains(&self, name: &str) -> bool {
        self.regions.read().unwrap().contains_key(name)
    }

    fn entries(&self) -> Result<Vec<RegistryEntry>> {
        let regions = self.regions.read().unwrap();
        Ok(regions.values().map(|(entry, _)| entry.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_lookup_shares_memory() {
        let registry = LocalRegistry::new();
        let created = registry
            .create("rx_q_0", ResourceKind::RingQueue, 4096)
            .unwrap();
        let found = registry.lookup("rx_q_0").unwrap();

        assert!(Arc::ptr_eq(&created, &found));
        assert!(registry.contains("rx_q_0"));
        assert_eq!(registry.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_create_fails() {
        let registry = LocalRegistry::new();
        registry.create("rx_q_0", ResourceKind::RingQueue, 64).unwrap();
        let again = registry.create("rx_q_0", ResourceKind::RingQueue, 64);
        assert!(matches!(again, Err(DistError::RegionExists { .. })));
    }

    #[test]
    fn test_lookup_before_create_fails() {
        let registry = LocalRegistry::new();
        assert!(matches!(
            registry.lookup("MProc_pktmbuf_pool"),
            Err(DistError::RegionNotFound { .. })
        ));
    }

    #[test]
    fn test_remove() {
        let registry = LocalRegistry::new();
        registry.create("a", ResourceKind::PortTable, 64).unwrap();
        registry.remove("a").unwrap();
        assert!(registry.is_empty());
        assert!(registry.remove("a").is_err());
    }
}
