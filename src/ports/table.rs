//! Shared port descriptor table

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    config::MAX_PORTS,
    error::{DistError, Result},
    memory::SharedMemoryRegion,
};

use super::PortId;

const PORT_TABLE_MAGIC: u64 = 0x4D50_4449_5354_5054; // "MPDISTPT"
const PORT_TABLE_VERSION: u32 = 1;

#[repr(C)]
struct PortInfo {
    magic: AtomicU64,
    version: u32,
    num_ports: u32,
    num_workers: u32,
    max_ports: u32,
    id: [PortId; MAX_PORTS],
}

/// Read-only view of the port table published by the owner
#[derive(Debug, Clone)]
pub struct PortTable {
    region: Arc<SharedMemoryRegion>,
}

impl PortTable {
    /// Bytes needed for the table
    pub const fn required_size() -> usize {
        std::mem::size_of::<PortInfo>()
    }

    /// Zero the region, record the ports and worker count, then publish
    pub fn create(region: Arc<SharedMemoryRegion>, ports: &[PortId], num_workers: usize) -> Result<Self> {
        if region.size() < Self::required_size() {
            return Err(DistError::insufficient_space(
                Self::required_size(),
                region.size(),
            ));
        }
        if ports.len() > MAX_PORTS {
            return Err(DistError::invalid_parameter(
                "ports",
                format!("{} ports exceed table capacity {}", ports.len(), MAX_PORTS),
            ));
        }

        // SAFETY: the table is not published until magic is stored, so the
        // owner has exclusive access; size checked above.
        unsafe {
            let base = region.as_mut_ptr_unsafe::<u8>();
            std::ptr::write_bytes(base, 0, Self::required_size());

            let info = base as *mut PortInfo;
            std::ptr::addr_of_mut!((*info).version).write(PORT_TABLE_VERSION);
            std::ptr::addr_of_mut!((*info).num_ports).write(ports.len() as u32);
            std::ptr::addr_of_mut!((*info).num_workers).write(num_workers as u32);
            std::ptr::addr_of_mut!((*info).max_ports).write(MAX_PORTS as u32);
            let ids = std::ptr::addr_of_mut!((*info).id) as *mut PortId;
            std::ptr::copy_nonoverlapping(ports.as_ptr(), ids, ports.len());

            (*info).magic.store(PORT_TABLE_MAGIC, Ordering::Release);
        }

        Ok(Self { region })
    }

    /// Attach to the table published by the owner
    pub fn attach(region: Arc<SharedMemoryRegion>) -> Result<Self> {
        if region.size() < Self::required_size() {
            return Err(DistError::layout(region.name(), "region smaller than port table"));
        }

        let table = Self { region };
        let info = table.info();
        if info.magic.load(Ordering::Acquire) != PORT_TABLE_MAGIC {
            return Err(DistError::not_initialised(table.region.name()));
        }
        if info.version != PORT_TABLE_VERSION || info.max_ports as usize != MAX_PORTS {
            return Err(DistError::layout(
                table.region.name(),
                format!(
                    "port table v{} with {} slots, expected v{} with {}",
                    info.version, info.max_ports, PORT_TABLE_VERSION, MAX_PORTS
                ),
            ));
        }
        if info.num_ports as usize > MAX_PORTS {
            return Err(DistError::layout(table.region.name(), "port count exceeds capacity"));
        }

        Ok(table)
    }

    fn info(&self) -> &PortInfo {
        // SAFETY: size checked on create/attach; the table is immutable
        // after magic is published.
        unsafe { &*self.region.as_ptr::<PortInfo>() }
    }

    /// Port identifiers in table order
    pub fn ids(&self) -> &[PortId] {
        let info = self.info();
        &info.id[..info.num_ports as usize]
    }

    /// Number of populated entries
    pub fn num_ports(&self) -> usize {
        self.info().num_ports as usize
    }

    /// Worker count the owner was started with
    pub fn num_workers(&self) -> usize {
        self.info().num_workers as usize
    }

    /// Whether `port` is in the table
    pub fn contains(&self, port: PortId) -> bool {
        self.ids().contains(&port)
    }
}

unsafe impl Send for PortTable {}
unsafe impl Sync for PortTable {}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Arc<SharedMemoryRegion> {
        Arc::new(SharedMemoryRegion::anonymous("MProc_port_info", PortTable::required_size()).unwrap())
    }

    #[test]
    fn test_create_and_attach() {
        let region = region();
        let owner = PortTable::create(Arc::clone(&region), &[0, 2, 5], 4).unwrap();
        assert_eq!(owner.ids(), &[0, 2, 5]);

        let attached = PortTable::attach(region).unwrap();
        assert_eq!(attached.ids(), &[0, 2, 5]);
        assert_eq!(attached.num_ports(), 3);
        assert_eq!(attached.num_workers(), 4);
        assert!(attached.contains(5));
        assert!(!attached.contains(1));
    }

    #[test]
    fn test_empty_table() {
        let table = PortTable::create(region(), &[], 1).unwrap();
        assert!(table.ids().is_empty());
    }

    #[test]
    fn test_too_many_ports() {
        let ports: Vec<PortId> = (0..=MAX_PORTS as PortId).collect();
        assert!(PortTable::create(region(), &ports, 1).is_err());
    }

    #[test]
    fn test_attach_before_publish_fails() {
        assert!(matches!(
            PortTable::attach(region()),
            Err(DistError::NotInitialised { .. })
        ));
    }
}
