//! Control region: the on-disk directory of a shm namespace
//!
//! The owner is the only writer. Entries are serialized with bincode behind
//! the header; readers copy them out under a sequence counter that is odd
//! while a write is in progress.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        atomic::{fence, AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::{Duration, SystemTime},
};

use log::debug;

use crate::{
    error::{DistError, Result},
    memory::{RegionConfig, SharedMemoryRegion},
};

use super::types::{process_alive, RegistryEntry};

/// Read attempts before giving up on a writer that keeps the sequence odd
const READ_RETRIES: usize = 10_000;

/// Header at offset 0 of the control region
#[repr(C)]
pub struct ControlHeader {
    /// Magic number, written last
    pub magic: AtomicU64,
    /// Version of the control structure
    pub version: u64,
    /// Total size of the control region
    pub total_size: u64,
    /// Offset to the serialized entries
    pub registry_offset: u64,
    /// Bytes available for entries
    pub registry_size: u64,
    /// Process id of the namespace owner
    pub owner_pid: u64,
    /// Seqlock counter, odd while the owner rewrites entries
    pub sequence: AtomicU64,
    /// Length of the serialized entries
    pub entries_len: AtomicU64,
    /// Creation timestamp (seconds since the epoch)
    pub created_at: u64,
    /// Last modified timestamp (seconds since the epoch)
    pub last_modified: AtomicU64,
}

impl ControlHeader {
    /// Magic number constant
    pub const MAGIC: u64 = 0x4D50_4449_5354_0001; // "MPDIST" + version

    /// Current version constant
    pub const VERSION: u64 = 1;

    /// Validate the header
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.magic.load(Ordering::Acquire) != Self::MAGIC {
            return Err(DistError::not_initialised(name));
        }

        if self.version != Self::VERSION {
            return Err(DistError::layout(
                name,
                format!("unsupported control header version {}", self.version),
            ));
        }

        if self.registry_offset + self.registry_size > self.total_size {
            return Err(DistError::layout(name, "registry extends beyond region bounds"));
        }

        Ok(())
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Control region shared by the owner and every attacher of a namespace
#[derive(Debug)]
pub struct ControlRegion {
    region: Arc<SharedMemoryRegion>,
    /// Owner-side copy of the entries; empty on attachers
    registry: RwLock<BTreeMap<String, RegistryEntry>>,
    writable: bool,
}

impl ControlRegion {
    /// Create the control region of a fresh namespace (owner)
    pub fn create(name: &str, path: &Path, size: usize, permissions: u32) -> Result<Self> {
        let header_size = std::mem::size_of::<ControlHeader>();
        let size = size.max(header_size + 4096);

        let region = Arc::new(SharedMemoryRegion::new(
            RegionConfig::new(name, size)
                .with_file_path(path)
                .with_permissions(permissions),
        )?);

        // SAFETY: the file was just created with create_new, so no other
        // process maps it yet; the region is page aligned and large enough.
        unsafe {
            let header = region.as_mut_ptr_unsafe::<ControlHeader>();
            std::ptr::addr_of_mut!((*header).version).write(ControlHeader::VERSION);
            std::ptr::addr_of_mut!((*header).total_size).write(size as u64);
            std::ptr::addr_of_mut!((*header).registry_offset).write(header_size as u64);
            std::ptr::addr_of_mut!((*header).registry_size).write((size - header_size) as u64);
            std::ptr::addr_of_mut!((*header).owner_pid).write(std::process::id() as u64);
            std::ptr::addr_of_mut!((*header).created_at).write(unix_secs(SystemTime::now()));
            (*header).magic.store(ControlHeader::MAGIC, Ordering::Release);
        }

        debug!("Created control region '{}' ({} bytes)", name, size);

        Ok(Self {
            region,
            registry: RwLock::new(BTreeMap::new()),
            writable: true,
        })
    }

    /// Open the control region of an existing namespace (attacher)
    pub fn open(name: &str, path: &Path) -> Result<Self> {
        let region = Arc::new(SharedMemoryRegion::new(RegionConfig::open(name, path))?);
        if region.size() < std::mem::size_of::<ControlHeader>() {
            return Err(DistError::layout(name, "control region too small"));
        }

        let control = Self {
            region,
            registry: RwLock::new(BTreeMap::new()),
            writable: false,
        };
        control.header().validate(name)?;
        Ok(control)
    }

    fn header(&self) -> &ControlHeader {
        // SAFETY: size checked on open and guaranteed on create; all mutable
        // header fields are atomics.
        unsafe { &*self.region.as_ptr::<ControlHeader>() }
    }

    /// Process id recorded by the owner
    pub fn owner_pid(&self) -> u32 {
        self.header().owner_pid as u32
    }

    /// Whether the owner recorded in the header is still running
    pub fn owner_alive(&self) -> bool {
        process_alive(self.owner_pid())
    }

    /// Current sequence number (even when stable)
    pub fn sequence(&self) -> u64 {
        self.header().sequence.load(Ordering::Acquire)
    }

    /// When the owner created the namespace
    pub fn created_at(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.header().created_at)
    }

    /// Publish a new entry (owner only)
    pub fn register(&self, entry: RegistryEntry) -> Result<()> {
        self.require_writable()?;
        let mut registry = self.registry.write().unwrap();
        if registry.contains_key(&entry.name) {
            return Err(DistError::region_exists(&entry.name));
        }
        let name = entry.name.clone();
        registry.insert(name.clone(), entry);
        if let Err(e) = self.save(&registry) {
            registry.remove(&name);
            return Err(e);
        }
        Ok(())
    }

    fn require_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(DistError::NotOwner {
                namespace: self.region.name().to_string(),
            })
        }
    }

    fn save(&self, registry: &BTreeMap<String, RegistryEntry>) -> Result<()> {
        let serialized = bincode::serialize(registry)?;
        let header = self.header();
        let offset = header.registry_offset as usize;
        let available = header.registry_size as usize;

        if serialized.len() > available {
            return Err(DistError::insufficient_space(serialized.len(), available));
        }

        header.sequence.fetch_add(1, Ordering::AcqRel);
        // SAFETY: only the owner writes this area, and offset + available is
        // within the region (checked by validate / set on create).
        unsafe {
            let dst = self.region.as_mut_ptr_unsafe::<u8>().add(offset);
            std::ptr::copy_nonoverlapping(serialized.as_ptr(), dst, serialized.len());
        }
        header
            .entries_len
            .store(serialized.len() as u64, Ordering::Release);
        header
            .last_modified
            .store(unix_secs(SystemTime::now()), Ordering::Relaxed);
        header.sequence.fetch_add(1, Ordering::Release);

        Ok(())
    }

    /// Snapshot of all published entries
    pub fn entries(&self) -> Result<BTreeMap<String, RegistryEntry>> {
        if self.writable {
            return Ok(self.registry.read().unwrap().clone());
        }

        let header = self.header();
        let offset = header.registry_offset as usize;
        let available = header.registry_size as usize;

        for _ in 0..READ_RETRIES {
            let before = header.sequence.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let len = header.entries_len.load(Ordering::Acquire) as usize;
            if len == 0 {
                return Ok(BTreeMap::new());
            }
            if len > available {
                return Err(DistError::layout(self.region.name(), "entry table overflows region"));
            }

            let bytes = self.region.as_slice()[offset..offset + len].to_vec();
            fence(Ordering::Acquire);

            if header.sequence.load(Ordering::Relaxed) == before {
                return Ok(bincode::deserialize(&bytes)?);
            }
        }

        Err(DistError::layout(
            self.region.name(),
            "owner kept rewriting the entry table",
        ))
    }

    /// Look up one entry
    pub fn entry(&self, name: &str) -> Result<Option<RegistryEntry>> {
        Ok(self.entries()?.remove(name))
    }
}
