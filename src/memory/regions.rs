//! Shared memory region implementation

use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    os::unix::fs::OpenOptionsExt,
    path::PathBuf,
};

use memmap2::{MmapMut, MmapOptions};

use crate::error::{DistError, Result};

use super::config::{BackingType, RegionConfig};

/// A mapped region of memory, shared with every process mapping the same file
#[derive(Debug)]
pub struct SharedMemoryRegion {
    name: String,
    mmap: MmapMut,
    /// Keeps the file open for the lifetime of the mapping
    _file: Option<File>,
}

impl SharedMemoryRegion {
    /// Create or open a shared memory region
    pub fn new(config: RegionConfig) -> Result<Self> {
        config.validate()?;

        let (file, mmap) = match config.backing_type {
            BackingType::FileBacked if config.create => Self::create_file_backing(&config)?,
            BackingType::FileBacked => Self::open_file_backing(&config)?,
            BackingType::Anonymous => (None, Self::create_anonymous(config.size)?),
        };

        Ok(Self {
            name: config.name,
            mmap,
            _file: file,
        })
    }

    /// Anonymous region of `size` zeroed bytes
    pub fn anonymous(name: impl Into<String>, size: usize) -> Result<Self> {
        Self::new(RegionConfig::new(name, size).with_backing_type(BackingType::Anonymous))
    }

    fn create_file_backing(config: &RegionConfig) -> Result<(Option<File>, MmapMut)> {
        let path = Self::require_path(config)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(config.permissions)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => DistError::region_exists(&config.name),
                _ => DistError::from_io(e, "Failed to create region file"),
            })?;

        // set_len on a fresh file yields zero-filled pages
        file.set_len(config.size as u64)
            .map_err(|e| DistError::from_io(e, "Failed to set region size"))?;

        let mmap = Self::map_file(&file, config.size)?;
        Ok((Some(file), mmap))
    }

    fn open_file_backing(config: &RegionConfig) -> Result<(Option<File>, MmapMut)> {
        let path = Self::require_path(config)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DistError::region_not_found(&config.name),
                _ => DistError::from_io(e, "Failed to open region file"),
            })?;

        let len = file
            .metadata()
            .map_err(|e| DistError::from_io(e, "Failed to stat region file"))?
            .len() as usize;

        if len == 0 {
            return Err(DistError::not_initialised(&config.name));
        }
        if config.size != 0 && config.size != len {
            return Err(DistError::layout(
                &config.name,
                format!("expected {} bytes, file holds {}", config.size, len),
            ));
        }

        let mmap = Self::map_file(&file, len)?;
        Ok((Some(file), mmap))
    }

    fn require_path(config: &RegionConfig) -> Result<&PathBuf> {
        config.file_path.as_ref().ok_or_else(|| {
            DistError::invalid_parameter("file_path", "File-backed region needs a path")
        })
    }

    fn map_file(file: &File, size: usize) -> Result<MmapMut> {
        // SAFETY: the mapping is shared between processes; every
        // structure placed in it is accessed through atomics or is immutable
        // after publication.
        unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(file)
                .map_err(|e| DistError::from_io(e, "Failed to create memory mapping"))
        }
    }

    fn create_anonymous(size: usize) -> Result<MmapMut> {
        MmapOptions::new()
            .len(size)
            .map_anon()
            .map_err(|e| DistError::from_io(e, "Failed to create anonymous mapping"))
    }

    /// Get the raw memory slice (read-only)
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Get a typed pointer to the start of the region
    pub fn as_ptr<T>(&self) -> *const T {
        self.mmap.as_ptr() as *const T
    }

    /// Get a mutable typed pointer from a shared reference
    ///
    /// # Safety
    /// Caller must ensure writes through the pointer do not race with other
    /// accesses, either by exclusive access during initialisation or by using
    /// atomic types for the pointee.
    pub unsafe fn as_mut_ptr_unsafe<T>(&self) -> *mut T {
        self.mmap.as_ptr() as *mut T
    }

    /// Get the size of the region
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Get the name of the region
    pub fn name(&self) -> &str {
        &self.name
    }
}

unsafe impl Send for SharedMemoryRegion {}
unsafe impl Sync for SharedMemoryRegion {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_open_sees_same_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("MProc_port_info");

        let owner = SharedMemoryRegion::new(
            RegionConfig::new("MProc_port_info", 4096).with_file_path(&path),
        )
        .unwrap();
        unsafe { *owner.as_mut_ptr_unsafe::<u8>() = 42 };

        let attached = SharedMemoryRegion::new(RegionConfig::open("MProc_port_info", &path)).unwrap();
        assert_eq!(attached.size(), 4096);
        assert_eq!(attached.as_slice()[0], 42);
        assert!(path.exists());
    }

    #[test]
    fn test_create_twice_is_collision() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rx_q_0");
        let config = RegionConfig::new("rx_q_0", 4096).with_file_path(&path);

        let _first = SharedMemoryRegion::new(config.clone()).unwrap();
        let second = SharedMemoryRegion::new(config);
        assert!(matches!(second, Err(DistError::RegionExists { .. })));
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let result = SharedMemoryRegion::new(RegionConfig::open(
            "rx_q_9",
            temp_dir.path().join("rx_q_9"),
        ));
        assert!(matches!(result, Err(DistError::RegionNotFound { .. })));
    }

    #[test]
    fn test_anonymous_region_is_zeroed() {
        let region = SharedMemoryRegion::anonymous("anon", 8192).unwrap();
        assert_eq!(region.size(), 8192);
        assert!(region.as_slice().iter().all(|&b| b == 0));
    }
}
