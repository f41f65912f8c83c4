//! Configuration types for shared memory regions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Types of shared memory backing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingType {
    /// File-backed mapping, visible to every process that can open the path
    FileBacked,
    /// Anonymous mapping, visible only inside this process
    Anonymous,
}

impl Default for BackingType {
    fn default() -> Self {
        Self::FileBacked
    }
}

impl BackingType {
    /// Get a human-readable name for the backing type
    pub fn name(&self) -> &'static str {
        match self {
            BackingType::FileBacked => "file-backed",
            BackingType::Anonymous => "anonymous",
        }
    }
}

/// Configuration for creating or opening a shared memory region
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Name of the shared memory region
    pub name: String,
    /// Total size of the region in bytes (ignored when opening)
    pub size: usize,
    /// Backing type for the shared memory
    pub backing_type: BackingType,
    /// File path for file-backed regions
    pub file_path: Option<PathBuf>,
    /// Create a new region (fails if it exists) or open an existing one
    pub create: bool,
    /// Permissions for newly created files (Unix permissions)
    pub permissions: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: 0,
            backing_type: BackingType::default(),
            file_path: None,
            create: true,
            permissions: 0o600,
        }
    }
}

impl RegionConfig {
    /// Create a new region configuration
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    /// Configuration for attaching to an existing file-backed region
    pub fn open(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            file_path: Some(path.into()),
            create: false,
            ..Default::default()
        }
    }

    /// Set the backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set the file path for file-backed regions
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set whether to create the region
    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Set the permissions for the region
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::DistError;

        if self.name.is_empty() {
            return Err(DistError::invalid_parameter(
                "name",
                "Region name cannot be empty",
            ));
        }

        if self.create && self.size == 0 {
            return Err(DistError::invalid_parameter(
                "size",
                "Region size must be greater than 0",
            ));
        }

        match self.backing_type {
            BackingType::FileBacked if self.file_path.is_none() => {
                Err(DistError::invalid_parameter(
                    "file_path",
                    "File path must be specified for file-backed regions",
                ))
            }
            BackingType::Anonymous if !self.create => Err(DistError::invalid_parameter(
                "create",
                "Anonymous regions cannot be opened, only created",
            )),
            _ => Ok(()),
        }
    }
}
