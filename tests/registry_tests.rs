//! Registry tests: namespace ownership, lookups and stale reclaim

use std::{
    fs::OpenOptions,
    os::unix::fs::FileExt,
    process::Command,
    sync::{Arc, Barrier},
    thread,
};

use mpdist::{
    error::DistError,
    registry::{LocalRegistry, RegistryConfig, ResourceKind, ResourceRegistry, ShmRegistry},
};
use tempfile::TempDir;

/// Byte offset of `magic` in the control header
const MAGIC_OFFSET: u64 = 0;

/// Byte offset of `owner_pid` in the control header
const OWNER_PID_OFFSET: u64 = 40;

fn dead_pid() -> u32 {
    let mut child = Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn test_lookup_before_create_fails() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new("early").with_base_dir(temp_dir.path());

        assert!(matches!(
            ShmRegistry::attach(config.clone()),
            Err(DistError::RegionNotFound { .. })
        ));

        let owner = ShmRegistry::create(config.clone()).unwrap();
        let attacher = ShmRegistry::attach(config).unwrap();
        assert!(matches!(
            attacher.lookup("rx_q_0"),
            Err(DistError::RegionNotFound { .. })
        ));
        assert!(!attacher.contains("rx_q_0"));

        owner.create("rx_q_0", ResourceKind::RingQueue, 4096).unwrap();
        assert!(attacher.contains("rx_q_0"));
        assert_eq!(attacher.lookup("rx_q_0").unwrap().size(), 4096);
    }

    #[test]
    fn test_entries_listed_in_name_order() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new("listing").with_base_dir(temp_dir.path());
        let owner = ShmRegistry::create(config.clone()).unwrap();

        owner.create("rx_q_1", ResourceKind::RingQueue, 1024).unwrap();
        owner.create("MProc_port_info", ResourceKind::PortTable, 512).unwrap();
        owner.create("rx_q_0", ResourceKind::RingQueue, 1024).unwrap();

        let attacher = ShmRegistry::attach(config).unwrap();
        let names: Vec<String> = attacher.entries().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["MProc_port_info", "rx_q_0", "rx_q_1"]);
    }

    #[test]
    fn test_writes_visible_across_mappings() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new("visible").with_base_dir(temp_dir.path());
        let owner = ShmRegistry::create(config.clone()).unwrap();
        let region = owner.create("MProc_port_info", ResourceKind::PortTable, 64).unwrap();

        let attacher = ShmRegistry::attach(config).unwrap();
        let mapped = attacher.lookup("MProc_port_info").unwrap();

        unsafe { *region.as_mut_ptr_unsafe::<u64>() = 0xFEED };
        assert_eq!(unsafe { *mapped.as_ptr::<u64>() }, 0xFEED);
    }

    #[test]
    fn test_dead_owner_is_reported_and_reclaimed() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new("stale").with_base_dir(temp_dir.path());

        let owner = ShmRegistry::create(config.clone()).unwrap();
        owner.create("rx_q_0", ResourceKind::RingQueue, 1024).unwrap();
        drop(owner);

        let control = OpenOptions::new().write(true).open(config.control_path()).unwrap();
        control
            .write_all_at(&(dead_pid() as u64).to_ne_bytes(), OWNER_PID_OFFSET)
            .unwrap();
        drop(control);

        assert!(ShmRegistry::live_owner(&config).is_none());
        assert!(matches!(
            ShmRegistry::attach(config.clone()),
            Err(DistError::OwnerGone { .. })
        ));

        let reclaimed = ShmRegistry::create(config.clone()).unwrap();
        assert!(reclaimed.entries().unwrap().is_empty());
        assert_eq!(ShmRegistry::live_owner(&config), Some(std::process::id()));
    }

    #[test]
    fn test_full_control_region_rejects_without_phantom_entry() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = RegistryConfig::new("crowded").with_base_dir(temp_dir.path());
        config.control_size = 0;
        let owner = ShmRegistry::create(config.clone()).unwrap();

        let mut published = 0;
        let rejected = loop {
            let name = format!("rx_q_{}", published);
            match owner.create(&name, ResourceKind::RingQueue, 64) {
                Ok(_) => published += 1,
                Err(e) => break (name, e),
            }
        };
        assert!(matches!(rejected.1, DistError::InsufficientSpace { .. }));

        assert!(!owner.contains(&rejected.0));
        assert!(matches!(
            owner.lookup(&rejected.0),
            Err(DistError::RegionNotFound { .. })
        ));
        assert!(!config.resource_path(&rejected.0).exists());

        let attacher = ShmRegistry::attach(config).unwrap();
        assert_eq!(owner.entries().unwrap().len(), published);
        assert_eq!(attacher.entries().unwrap().len(), published);
    }

    #[test]
    fn test_live_owner_collision() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new("taken").with_base_dir(temp_dir.path());
        let _owner = ShmRegistry::create(config.clone()).unwrap();

        assert!(matches!(
            ShmRegistry::create(config),
            Err(DistError::RegionExists { .. })
        ));
    }

    #[test]
    fn test_owner_still_publishing_is_not_reclaimed() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new("publishing").with_base_dir(temp_dir.path());
        let first = ShmRegistry::create(config.clone()).unwrap();
        first.create("rx_q_0", ResourceKind::RingQueue, 1024).unwrap();

        // control header as it looks before the owner stores its magic
        let control = OpenOptions::new().write(true).open(config.control_path()).unwrap();
        control.write_all_at(&0u64.to_ne_bytes(), MAGIC_OFFSET).unwrap();
        drop(control);

        assert!(ShmRegistry::live_owner(&config).is_none());
        assert!(ShmRegistry::is_claimed(&config).unwrap());
        assert!(matches!(
            ShmRegistry::attach(config.clone()),
            Err(DistError::NotInitialised { .. })
        ));
        assert!(matches!(
            ShmRegistry::create(config.clone()),
            Err(DistError::RegionExists { .. })
        ));
        assert!(matches!(
            ShmRegistry::purge_stale(&config),
            Err(DistError::RegionExists { .. })
        ));
        assert!(config.resource_path("rx_q_0").exists());

        drop(first);
        assert!(!ShmRegistry::is_claimed(&config).unwrap());
        let second = ShmRegistry::create(config.clone()).unwrap();
        assert!(second.entries().unwrap().is_empty());
        assert!(!config.resource_path("rx_q_0").exists());
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new("contended").with_base_dir(temp_dir.path());
        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));

        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let config = config.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ShmRegistry::create(config)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<&ShmRegistry> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        for result in &results {
            if let Err(e) = result {
                assert!(matches!(e, DistError::RegionExists { .. }), "unexpected {}", e);
            }
        }

        let winner = winners[0];
        winner.create("rx_q_0", ResourceKind::RingQueue, 1024).unwrap();
        let attacher = ShmRegistry::attach(config).unwrap();
        assert_eq!(attacher.owner_pid(), winner.owner_pid());
        assert!(attacher.contains("rx_q_0"));
    }

    #[test]
    fn test_purge_stale_refuses_running_owner() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new("guarded").with_base_dir(temp_dir.path());
        let owner = ShmRegistry::create(config.clone()).unwrap();

        assert!(ShmRegistry::purge_stale(&config).is_err());
        assert!(config.control_path().exists());

        drop(owner);
        assert_eq!(ShmRegistry::purge_stale(&config).unwrap(), 1);
    }

    #[test]
    fn test_purge_counts_files() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new("purged").with_base_dir(temp_dir.path());
        let owner = ShmRegistry::create(config.clone()).unwrap();
        owner.create("rx_q_0", ResourceKind::RingQueue, 1024).unwrap();
        owner.create("rx_q_1", ResourceKind::RingQueue, 1024).unwrap();
        drop(owner);

        assert_eq!(ShmRegistry::purge(&config).unwrap(), 3);
        assert!(!config.namespace_dir().exists());
        assert_eq!(ShmRegistry::purge(&config).unwrap(), 0);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let registry = LocalRegistry::new();
        assert!(registry.create("", ResourceKind::RingQueue, 64).is_err());
        assert!(registry.create("a/b", ResourceKind::RingQueue, 64).is_err());
        assert!(registry
            .create(&"x".repeat(64), ResourceKind::RingQueue, 64)
            .is_err());

        let temp_dir = TempDir::new().unwrap();
        let bad = RegistryConfig::new("../escape").with_base_dir(temp_dir.path());
        assert!(ShmRegistry::create(bad).is_err());
    }
}
