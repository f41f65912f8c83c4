//! Registry entry types

use std::time::SystemTime;

use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
use serde::{Deserialize, Serialize};

/// Class of object stored under a registry name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Shared port descriptor table
    PortTable,
    /// Packet buffer pool
    BufferPool,
    /// Per-worker ring queue
    RingQueue,
}

impl ResourceKind {
    /// Short label used in logs and listings
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::PortTable => "port-table",
            ResourceKind::BufferPool => "buffer-pool",
            ResourceKind::RingQueue => "ring",
        }
    }
}

/// One published resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Registry key
    pub name: String,
    /// What lives in the region
    pub kind: ResourceKind,
    /// Region size in bytes
    pub size: u64,
    /// Process that created the region
    pub creator_pid: u32,
    /// Creation timestamp
    pub created_at: SystemTime,
}

impl RegistryEntry {
    /// Create an entry owned by the calling process
    pub fn new(name: impl Into<String>, kind: ResourceKind, size: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            size: size as u64,
            creator_pid: std::process::id(),
            created_at: SystemTime::now(),
        }
    }

    /// Get the age of this entry in seconds
    pub fn age_seconds(&self) -> Option<u64> {
        self.created_at.elapsed().ok().map(|d| d.as_secs())
    }

    /// Check if the creator process is still alive
    pub fn creator_alive(&self) -> bool {
        process_alive(self.creator_pid)
    }
}

/// Whether a process with `pid` exists
///
/// EPERM means the process exists but belongs to another user.
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_belongs_to_current_process() {
        let entry = RegistryEntry::new("rx_q_0", ResourceKind::RingQueue, 4096);
        assert_eq!(entry.creator_pid, std::process::id());
        assert!(entry.creator_alive());
        assert_eq!(entry.kind.label(), "ring");
    }

    #[test]
    fn test_process_alive_rejects_bogus_pids() {
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }
}
