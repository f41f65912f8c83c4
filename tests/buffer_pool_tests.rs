//! Buffer pool tests: exhaustion, misuse and contention between handles

use std::{
    collections::HashSet,
    sync::{Arc, Barrier, Mutex},
    thread,
};

use mpdist::{
    buffers::{pool_buffer_count, BufferRef, PacketPool},
    config::{MBUFS_PER_PORT, MBUFS_PER_WORKER},
    error::DistError,
    memory::SharedMemoryRegion,
};

#[cfg(test)]
mod buffer_pool_tests {
    use super::*;

    fn shared_pool(capacity: usize) -> (Arc<SharedMemoryRegion>, PacketPool) {
        let size = PacketPool::required_size(capacity, 128).unwrap();
        let region = Arc::new(SharedMemoryRegion::anonymous("MProc_pktmbuf_pool", size).unwrap());
        let pool = PacketPool::create(Arc::clone(&region), capacity, 128, 0).unwrap();
        (region, pool)
    }

    #[test]
    fn test_capacity_formula() {
        assert_eq!(pool_buffer_count(4, 1, 512, 1024), Some(3072));
        assert_eq!(
            pool_buffer_count(2, 2, MBUFS_PER_WORKER, MBUFS_PER_PORT),
            Some(2 * MBUFS_PER_WORKER + 2 * MBUFS_PER_PORT)
        );
    }

    #[test]
    fn test_exhaustion_then_release() {
        let (_region, pool) = shared_pool(16);
        let mut held: Vec<BufferRef> = (0..16).map(|_| pool.allocate().unwrap()).collect();
        assert!(pool.allocate().is_none());
        assert!(pool.allocate().is_none());

        pool.release(held.pop().unwrap()).unwrap();
        let again = pool.allocate().unwrap();
        held.push(again);

        let unique: HashSet<u32> = held.iter().map(|b| b.index()).collect();
        assert_eq!(unique.len(), 16);
        for buf in held {
            pool.release(buf).unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.allocation_failures, 2);
        assert_eq!(stats.releases, 17);
    }

    #[test]
    fn test_double_release_through_other_handle() {
        let (region, owner) = shared_pool(4);
        let worker = PacketPool::attach(region).unwrap();

        let raw = owner.allocate().unwrap().into_raw();
        worker.release(unsafe { BufferRef::from_raw(raw) }).unwrap();
        let second = owner.release(unsafe { BufferRef::from_raw(raw) });
        assert!(matches!(second, Err(DistError::InvalidBuffer { .. })));
        assert_eq!(owner.available(), 4);
    }

    #[test]
    fn test_concurrent_allocate_release_across_handles() {
        let (region, owner) = shared_pool(64);
        let thread_count = 4;
        let rounds = 2_000;
        let barrier = Arc::new(Barrier::new(thread_count));
        let live = Arc::new(Mutex::new(HashSet::new()));

        let mut handles = Vec::new();
        for _ in 0..thread_count {
            let pool = PacketPool::attach(Arc::clone(&region)).unwrap();
            let barrier = Arc::clone(&barrier);
            let live = Arc::clone(&live);

            handles.push(thread::spawn(move || {
                barrier.wait();
                for _ in 0..rounds {
                    let Some(buf) = pool.allocate() else {
                        thread::yield_now();
                        continue;
                    };
                    assert!(live.lock().unwrap().insert(buf.index()), "buffer handed out twice");
                    live.lock().unwrap().remove(&buf.index());
                    pool.release(buf).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(owner.available(), 64);
        assert_eq!(owner.in_use(), 0);
    }
}
