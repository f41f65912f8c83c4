//! Error types and handling for mpdist
//!
//! Every variant here describes a startup or programming failure. Steady-state
//! transport conditions (full ring, empty ring, exhausted pool) are not errors
//! and never appear in this enum; they are reported through `Option` or by
//! handing the buffer back to the caller.

/// Result type alias for mpdist operations
pub type Result<T> = std::result::Result<T, DistError>;

/// Error types for the shared resource lifecycle and transport
#[derive(Debug, thiserror::Error)]
pub enum DistError {
    /// I/O related errors (file operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Memory allocation or mapping failures
    #[error("Memory error: {message}")]
    Memory { message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Named resource does not exist
    #[error("Resource not found: {name}")]
    RegionNotFound { name: String },

    /// Named resource already exists
    #[error("Resource already exists: {name}")]
    RegionExists { name: String },

    /// Resource exists but its layout is not valid
    #[error("Invalid layout for {name}: {message}")]
    Layout { name: String, message: String },

    /// Resource exists but its creator has not finished publishing it
    #[error("{name} is not initialised yet")]
    NotInitialised { name: String },

    /// The process that created the namespace is no longer running
    #[error("Owner process {pid} of {name} is gone")]
    OwnerGone { name: String, pid: u32 },

    /// A mutating registry call was made by a process that does not own the namespace
    #[error("Not the owner of namespace {namespace}")]
    NotOwner { namespace: String },

    /// Requested sizing does not fit
    #[error("Insufficient space: requested {requested}, available {available}")]
    InsufficientSpace { requested: usize, available: usize },

    /// A requested port is not reported by the driver
    #[error("Port {port} is not available")]
    PortUnavailable { port: u16 },

    /// Port bring-up failed in the driver
    #[error("Cannot initialise port {port}: {message}")]
    PortInit { port: u16, message: String },

    /// Worker index outside the owner's worker count
    #[error("Worker index {index} out of range (owner runs {count} workers)")]
    WorkerOutOfRange { index: usize, count: usize },

    /// Buffer released twice or released to a pool it does not belong to
    #[error("Invalid buffer release: {message}")]
    InvalidBuffer { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Platform-specific errors
    #[error("Platform error: {message}")]
    Platform { message: String },
}

impl DistError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a memory error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a resource not found error
    pub fn region_not_found(name: impl Into<String>) -> Self {
        Self::RegionNotFound { name: name.into() }
    }

    /// Create a resource exists error
    pub fn region_exists(name: impl Into<String>) -> Self {
        Self::RegionExists { name: name.into() }
    }

    /// Create a layout error
    pub fn layout(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Layout {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a not-initialised error
    pub fn not_initialised(name: impl Into<String>) -> Self {
        Self::NotInitialised { name: name.into() }
    }

    /// Create an insufficient space error
    pub fn insufficient_space(requested: usize, available: usize) -> Self {
        Self::InsufficientSpace {
            requested,
            available,
        }
    }

    /// Create a port bring-up error
    pub fn port_init(port: u16, message: impl Into<String>) -> Self {
        Self::PortInit {
            port,
            message: message.into(),
        }
    }

    /// Create an invalid buffer error
    pub fn invalid_buffer(message: impl Into<String>) -> Self {
        Self::InvalidBuffer {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// True for errors that mean "the owner is not there (yet)" on the attach path
    pub fn is_missing_owner(&self) -> bool {
        matches!(
            self,
            DistError::RegionNotFound { .. }
                | DistError::OwnerGone { .. }
                | DistError::NotInitialised { .. }
        )
    }
}

impl From<std::io::Error> for DistError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<bincode::Error> for DistError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(format!("Bincode error: {}", err))
    }
}

impl From<nix::Error> for DistError {
    fn from(err: nix::Error) -> Self {
        Self::platform(err.to_string())
    }
}
