//! Filesystem-backed registry shared between processes
//!
//! Layout of a namespace:
//!
//! ```text
//! <base_dir>/<namespace>/
//!     .registry            control region (header + entry table)
//!     MProc_port_info      one file per published resource
//!     MProc_pktmbuf_pool
//!     rx_q_0 .. rx_q_N
//! <base_dir>/.<namespace>.lock   flock held by the owner while it runs
//! ```
//!
//! The lock file lives outside the namespace directory so that purging the
//! directory never unlinks a lock someone else is holding.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::ErrorKind,
    os::unix::{fs::OpenOptionsExt, io::AsRawFd},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use log::{debug, info, warn};
use nix::{
    errno::Errno,
    fcntl::{flock, FlockArg},
};

use crate::{
    config::DEFAULT_CONTROL_SIZE,
    error::{DistError, Result},
    memory::{RegionConfig, SharedMemoryRegion},
    names::validate_name,
};

use super::{control::ControlRegion, RegistryEntry, ResourceKind, ResourceRegistry};

/// File name of the control region inside a namespace directory
pub const CONTROL_FILE: &str = ".registry";

/// Where a shm namespace lives
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Directory holding namespaces (`/dev/shm` when available)
    pub base_dir: PathBuf,
    /// Namespace shared by one owner and its attachers
    pub namespace: String,
    /// Permissions for created files
    pub permissions: u32,
    /// Size of the control region
    pub control_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let shm = PathBuf::from("/dev/shm");
        let base_dir = if shm.is_dir() {
            shm
        } else {
            std::env::temp_dir()
        };

        Self {
            base_dir,
            namespace: "mpdist".to_string(),
            permissions: 0o600,
            control_size: DEFAULT_CONTROL_SIZE,
        }
    }
}

impl RegistryConfig {
    /// Configuration for `namespace` under the default base directory
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Set the base directory
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Set file permissions
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Directory of the namespace
    pub fn namespace_dir(&self) -> PathBuf {
        self.base_dir.join(&self.namespace)
    }

    /// Path of the control region
    pub fn control_path(&self) -> PathBuf {
        self.namespace_dir().join(CONTROL_FILE)
    }

    /// Path of the lock file that serializes owner claims
    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(format!(".{}.lock", self.namespace))
    }

    /// Path of the file backing `name`
    pub fn resource_path(&self, name: &str) -> PathBuf {
        self.namespace_dir().join(name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.namespace)
            .map_err(|_| DistError::invalid_parameter("namespace", "Invalid namespace name"))
    }
}

/// Exclusive claim on a namespace
///
/// The kernel drops the lock when the holder exits, so a crashed owner never
/// keeps the namespace claimed.
#[derive(Debug)]
struct OwnerLock {
    _file: File,
}

impl OwnerLock {
    /// Take the claim, or `None` while another owner holds it
    fn try_acquire(config: &RegistryConfig) -> Result<Option<Self>> {
        fs::create_dir_all(&config.base_dir)
            .map_err(|e| DistError::from_io(e, "Failed to create base directory"))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(config.permissions)
            .open(config.lock_path())
            .map_err(|e| DistError::from_io(e, "Failed to open namespace lock"))?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(e) if e == Errno::EWOULDBLOCK => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Registry of file-backed regions under one namespace directory
#[derive(Debug)]
pub struct ShmRegistry {
    config: RegistryConfig,
    control: ControlRegion,
    owner: bool,
    /// Regions this process already mapped
    mapped: RwLock<HashMap<String, Arc<SharedMemoryRegion>>>,
    /// Held for the owner's lifetime; `None` on attachers
    claim: Option<OwnerLock>,
}

impl ShmRegistry {
    /// Claim the namespace as its owner
    ///
    /// Claims are serialized through the namespace lock. A namespace whose
    /// lock is held, by a running owner or one still publishing, is a
    /// collision; anything found in the directory once the lock is ours was
    /// left behind by a dead owner and is reclaimed.
    pub fn create(config: RegistryConfig) -> Result<Self> {
        config.validate()?;

        let Some(claim) = OwnerLock::try_acquire(&config)? else {
            return Err(DistError::region_exists(match Self::live_owner(&config) {
                Some(pid) => format!("{} (owned by running pid {})", config.namespace, pid),
                None => format!("{} (being claimed by another owner)", config.namespace),
            }));
        };

        if let Some(pid) = Self::live_owner(&config) {
            return Err(DistError::region_exists(format!(
                "{} (owned by running pid {})",
                config.namespace, pid
            )));
        }

        if config.namespace_dir().exists() {
            warn!(
                "Reclaiming stale namespace '{}' at {}",
                config.namespace,
                config.namespace_dir().display()
            );
            Self::purge(&config)?;
        }

        fs::create_dir_all(config.namespace_dir())
            .map_err(|e| DistError::from_io(e, "Failed to create namespace directory"))?;

        let control = ControlRegion::create(
            &config.namespace,
            &config.control_path(),
            config.control_size,
            config.permissions,
        )?;
        info!(
            "Namespace '{}' owned by pid {}",
            config.namespace,
            control.owner_pid()
        );

        Ok(Self {
            config,
            control,
            owner: true,
            mapped: RwLock::new(HashMap::new()),
            claim: Some(claim),
        })
    }

    /// Attach to a namespace created by a running owner
    pub fn attach(config: RegistryConfig) -> Result<Self> {
        config.validate()?;

        let control = ControlRegion::open(&config.namespace, &config.control_path())?;
        if !control.owner_alive() {
            return Err(DistError::OwnerGone {
                name: config.namespace.clone(),
                pid: control.owner_pid(),
            });
        }

        debug!(
            "Attached to namespace '{}' (owner pid {})",
            config.namespace,
            control.owner_pid()
        );

        Ok(Self {
            config,
            control,
            owner: false,
            mapped: RwLock::new(HashMap::new()),
            claim: None,
        })
    }

    /// Pid of the running owner of the namespace, if any
    pub fn live_owner(config: &RegistryConfig) -> Option<u32> {
        let control = ControlRegion::open(&config.namespace, &config.control_path()).ok()?;
        control.owner_alive().then(|| control.owner_pid())
    }

    /// Whether an owner currently holds the namespace lock
    pub fn is_claimed(config: &RegistryConfig) -> Result<bool> {
        Ok(OwnerLock::try_acquire(config)?.is_none())
    }

    /// Purge a namespace only if no owner holds it
    pub fn purge_stale(config: &RegistryConfig) -> Result<usize> {
        config.validate()?;
        let Some(_claim) = OwnerLock::try_acquire(config)? else {
            return Err(DistError::region_exists(format!(
                "{} (claimed by a running owner)",
                config.namespace
            )));
        };
        Self::purge(config)
    }

    /// Delete every file of a namespace; returns how many were removed
    ///
    /// Takes no lock: callers that may race an owner use [`purge_stale`].
    ///
    /// [`purge_stale`]: ShmRegistry::purge_stale
    pub fn purge(config: &RegistryConfig) -> Result<usize> {
        let dir = config.namespace_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(DistError::from_io(e, "Failed to read namespace directory")),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry
                .map_err(|e| DistError::from_io(e, "Failed to read namespace entry"))?
                .path();
            remove_file(&path)?;
            removed += 1;
        }

        fs::remove_dir(&dir)
            .map_err(|e| DistError::from_io(e, "Failed to remove namespace directory"))?;
        debug!("Purged {} files from {}", removed, dir.display());

        Ok(removed)
    }

    /// Release all mappings and delete the namespace (owner only)
    pub fn teardown(self) -> Result<usize> {
        if !self.owner {
            return Err(DistError::NotOwner {
                namespace: self.config.namespace.clone(),
            });
        }
        let Self {
            config,
            control,
            mapped,
            claim,
            ..
        } = self;
        drop(mapped);
        drop(control);
        // purge under the claim
        let removed = Self::purge(&config);
        drop(claim);
        removed
    }

    /// Whether this process owns the namespace
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Pid recorded by the owner
    pub fn owner_pid(&self) -> u32 {
        self.control.owner_pid()
    }

    /// Namespace configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DistError::from_io(e, "Failed to remove resource file")),
    }
}

impl ResourceRegistry for ShmRegistry {
    fn create(&self, name: &str, kind: ResourceKind, size: usize) -> Result<Arc<SharedMemoryRegion>> {
        validate_name(name)?;
        if !self.owner {
            return Err(DistError::NotOwner {
                namespace: self.config.namespace.clone(),
            });
        }

        let region = Arc::new(SharedMemoryRegion::new(
            RegionConfig::new(name, size)
                .with_file_path(self.config.resource_path(name))
                .with_permissions(self.config.permissions),
        )?);

        if let Err(e) = self.control.register(RegistryEntry::new(name, kind, size)) {
            let _ = remove_file(&self.config.resource_path(name));
            return Err(e);
        }

        self.mapped
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::clone(&region));
        debug!("Created {} '{}' [{} bytes]", kind.label(), name, size);

        Ok(region)
    }

    fn lookup(&self, name: &str) -> Result<Arc<SharedMemoryRegion>> {
        if let Some(region) = self.mapped.read().unwrap().get(name) {
            return Ok(Arc::clone(region));
        }

        validate_name(name)?;
        let entry = self
            .control
            .entry(name)?
            .ok_or_else(|| DistError::region_not_found(name))?;

        if !self.control.owner_alive() {
            return Err(DistError::OwnerGone {
                name: name.to_string(),
                pid: self.control.owner_pid(),
            });
        }

        let region = Arc::new(SharedMemoryRegion::new(
            RegionConfig::open(name, self.config.resource_path(name)),
        )?);
        if region.size() as u64 != entry.size {
            return Err(DistError::layout(
                name,
                format!("registry says {} bytes, file holds {}", entry.size, region.size()),
            ));
        }

        self.mapped
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::clone(&region));
        debug!("Attached {} '{}'", entry.kind.label(), name);

        Ok(region)
    }

    fn contains(&self, name: &str) -> bool {
        matches!(self.control.entry(name), Ok(Some(_)))
    }

    fn entries(&self) -> Result<Vec<RegistryEntry>> {
        Ok(self.control.entries()?.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> RegistryConfig {
        RegistryConfig::new("test_ns").with_base_dir(temp_dir.path())
    }

    #[test]
    fn test_owner_creates_attacher_looks_up() {
        let temp_dir = TempDir::new().unwrap();
        let owner = ShmRegistry::create(config(&temp_dir)).unwrap();
        let _created = owner
            .create("rx_q_0", ResourceKind::RingQueue, 4096)
            .unwrap();

        let attacher = ShmRegistry::attach(config(&temp_dir)).unwrap();
        assert!(!attacher.is_owner());
        let found = attacher.lookup("rx_q_0").unwrap();
        assert_eq!(found.size(), 4096);
        assert!(attacher.contains("rx_q_0"));
        assert!(!attacher.contains("rx_q_1"));
    }

    #[test]
    fn test_attach_without_owner_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = ShmRegistry::attach(config(&temp_dir));
        assert!(matches!(result, Err(DistError::RegionNotFound { .. })));
    }

    #[test]
    fn test_second_owner_collides() {
        let temp_dir = TempDir::new().unwrap();
        let _owner = ShmRegistry::create(config(&temp_dir)).unwrap();
        let second = ShmRegistry::create(config(&temp_dir));
        assert!(matches!(second, Err(DistError::RegionExists { .. })));
    }

    #[test]
    fn test_attacher_cannot_create() {
        let temp_dir = TempDir::new().unwrap();
        let _owner = ShmRegistry::create(config(&temp_dir)).unwrap();
        let attacher = ShmRegistry::attach(config(&temp_dir)).unwrap();
        let result = attacher.create("rx_q_0", ResourceKind::RingQueue, 64);
        assert!(matches!(result, Err(DistError::NotOwner { .. })));
    }

    #[test]
    fn test_teardown_removes_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let owner = ShmRegistry::create(config(&temp_dir)).unwrap();
        owner.create("rx_q_0", ResourceKind::RingQueue, 64).unwrap();
        owner.create("rx_q_1", ResourceKind::RingQueue, 64).unwrap();

        let removed = owner.teardown().unwrap();
        assert_eq!(removed, 3);
        assert!(!config(&temp_dir).namespace_dir().exists());
        assert!(ShmRegistry::live_owner(&config(&temp_dir)).is_none());
    }
}
