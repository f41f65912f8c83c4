//! Single-producer single-consumer ring of buffer references in shared memory
//!
//! # Memory Layout
//!
//! ```text
//! +------------------------------------+  0
//! | RingHeader   magic/version/mask    |
//! +------------------------------------+  64
//! | head         producer position     |
//! +------------------------------------+  128
//! | tail         consumer position     |
//! +------------------------------------+  192
//! | slots[capacity]  raw BufferRef     |
//! +------------------------------------+
//! ```
//!
//! Positions grow without bound and are masked on access, so all `capacity`
//! slots are usable.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    buffers::BufferRef,
    error::{DistError, Result},
    memory::SharedMemoryRegion,
};

const RING_MAGIC: u64 = 0x4D50_4449_5354_5251; // "MPDISTRQ"
const RING_VERSION: u32 = 1;

#[repr(C, align(64))]
struct RingHeader {
    magic: AtomicU64,
    version: u32,
    capacity: u32,
    mask: u64,
}

#[repr(C, align(64))]
struct Position {
    value: AtomicU64,
}

#[repr(C)]
struct RingControl {
    header: RingHeader,
    head: Position,
    tail: Position,
}

const SLOTS_OFFSET: usize = std::mem::size_of::<RingControl>();

/// Handle to a ring published in shared memory
///
/// One process enqueues (the distributor) and one dequeues (the worker
/// owning the ring). Neither side ever blocks.
#[derive(Debug, Clone)]
pub struct RingQueue {
    region: Arc<SharedMemoryRegion>,
    capacity: u64,
    mask: u64,
}

impl RingQueue {
    /// Bytes of shared memory needed for a ring of `capacity` slots
    pub fn required_size(capacity: usize) -> Option<usize> {
        capacity.checked_mul(8)?.checked_add(SLOTS_OFFSET)
    }

    /// Lay out an empty ring in `region`
    pub fn create(region: Arc<SharedMemoryRegion>, capacity: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity > u32::MAX as usize {
            return Err(DistError::invalid_parameter(
                "capacity",
                "Capacity must be a power of 2 and greater than 0",
            ));
        }

        let required = Self::required_size(capacity)
            .ok_or_else(|| DistError::memory("Ring size overflows usize"))?;
        if required > region.size() {
            return Err(DistError::insufficient_space(required, region.size()));
        }

        // SAFETY: the ring is unpublished until magic is stored; the region
        // holds the control block plus `capacity` slots.
        unsafe {
            let base = region.as_mut_ptr_unsafe::<u8>();
            std::ptr::write_bytes(base.add(SLOTS_OFFSET), 0, capacity * 8);

            let control = base as *mut RingControl;
            std::ptr::addr_of_mut!((*control).header.version).write(RING_VERSION);
            std::ptr::addr_of_mut!((*control).header.capacity).write(capacity as u32);
            std::ptr::addr_of_mut!((*control).header.mask).write(capacity as u64 - 1);
            (*control).head.value.store(0, Ordering::Relaxed);
            (*control).tail.value.store(0, Ordering::Relaxed);
            (*control).header.magic.store(RING_MAGIC, Ordering::Release);
        }

        Ok(Self {
            region,
            capacity: capacity as u64,
            mask: capacity as u64 - 1,
        })
    }

    /// Attach to a ring created by another process
    pub fn attach(region: Arc<SharedMemoryRegion>) -> Result<Self> {
        if region.size() < SLOTS_OFFSET {
            return Err(DistError::layout(region.name(), "region smaller than ring header"));
        }

        // SAFETY: size checked above; header fields are immutable once magic
        // is published.
        let header = unsafe { &(*region.as_ptr::<RingControl>()).header };
        if header.magic.load(Ordering::Acquire) != RING_MAGIC {
            return Err(DistError::not_initialised(region.name()));
        }
        if header.version != RING_VERSION {
            return Err(DistError::layout(
                region.name(),
                format!("unsupported ring version {}", header.version),
            ));
        }

        let capacity = header.capacity as usize;
        let fits = Self::required_size(capacity).map_or(false, |s| s <= region.size());
        if !capacity.is_power_of_two() || header.mask != capacity as u64 - 1 || !fits {
            return Err(DistError::layout(region.name(), "ring header does not match region"));
        }

        Ok(Self {
            region,
            capacity: capacity as u64,
            mask: capacity as u64 - 1,
        })
    }

    fn control(&self) -> &RingControl {
        // SAFETY: validated on create/attach.
        unsafe { &*self.region.as_ptr::<RingControl>() }
    }

    fn slot(&self, position: u64) -> &AtomicU64 {
        // SAFETY: masked index is below capacity, and the slot array
        // directly follows the control block.
        unsafe {
            let slots = self.region.as_ptr::<u8>().add(SLOTS_OFFSET) as *const AtomicU64;
            &*slots.add((position & self.mask) as usize)
        }
    }

    /// Append one buffer; a full ring hands it back unchanged
    pub fn enqueue(&self, buf: BufferRef) -> std::result::Result<(), BufferRef> {
        let control = self.control();
        let head = control.head.value.load(Ordering::Relaxed);
        let tail = control.tail.value.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= self.capacity {
            return Err(buf);
        }

        self.slot(head).store(buf.into_raw(), Ordering::Relaxed);
        control.head.value.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Append every buffer or none of them
    pub fn enqueue_bulk(&self, bufs: Vec<BufferRef>) -> std::result::Result<(), Vec<BufferRef>> {
        let control = self.control();
        let head = control.head.value.load(Ordering::Relaxed);
        let tail = control.tail.value.load(Ordering::Acquire);

        let free = self.capacity - head.wrapping_sub(tail);
        if bufs.len() as u64 > free {
            return Err(bufs);
        }

        let mut position = head;
        for buf in bufs {
            self.slot(position).store(buf.into_raw(), Ordering::Relaxed);
            position = position.wrapping_add(1);
        }
        control.head.value.store(position, Ordering::Release);
        Ok(())
    }

    /// Take the oldest buffer, or `None` if the ring is empty
    pub fn dequeue(&self) -> Option<BufferRef> {
        let control = self.control();
        let tail = control.tail.value.load(Ordering::Relaxed);
        let head = control.head.value.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        let raw = self.slot(tail).load(Ordering::Relaxed);
        control.tail.value.store(tail.wrapping_add(1), Ordering::Release);
        // SAFETY: the producer moved ownership into this slot and the tail
        // advance above makes us its only reader.
        Some(unsafe { BufferRef::from_raw(raw) })
    }

    /// Move up to `max` buffers into `out`; returns how many were taken
    pub fn dequeue_burst(&self, out: &mut Vec<BufferRef>, max: usize) -> usize {
        let control = self.control();
        let tail = control.tail.value.load(Ordering::Relaxed);
        let head = control.head.value.load(Ordering::Acquire);

        let count = head.wrapping_sub(tail).min(max as u64);
        if count == 0 {
            return 0;
        }

        out.reserve(count as usize);
        for i in 0..count {
            let raw = self.slot(tail.wrapping_add(i)).load(Ordering::Relaxed);
            // SAFETY: as for `dequeue`; each slot is read exactly once.
            out.push(unsafe { BufferRef::from_raw(raw) });
        }
        control.tail.value.store(tail.wrapping_add(count), Ordering::Release);
        count as usize
    }

    /// Slots in the ring
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Buffers currently queued
    pub fn len(&self) -> usize {
        let control = self.control();
        let head = control.head.value.load(Ordering::Acquire);
        let tail = control.tail.value.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.capacity) as usize
    }

    /// Check if the ring is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the ring is full
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Name the ring was published under
    pub fn name(&self) -> &str {
        self.region.name()
    }
}

unsafe impl Send for RingQueue {}
unsafe impl Sync for RingQueue {}
