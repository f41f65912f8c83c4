//! Packet buffer pool living inside a shared memory region
//!
//! # Memory Layout
//!
//! ```text
//! +------------------------------------------+
//! | PoolHeader (cache aligned)               |
//! +------------------------------------------+
//! | next[capacity]   AtomicU32 free-list     |
//! +------------------------------------------+
//! | state[capacity]  AtomicU8 FREE / IN_USE  |
//! +------------------------------------------+
//! | slot[0]  SlotHeader + buf_size data      |
//! | ...                                      |
//! | slot[capacity-1]                         |
//! +------------------------------------------+
//! ```
//!
//! The free-list is a tagged index stack: `free_head` packs a 32-bit ABA tag
//! above the index of the top free slot. Every attached process pushes and
//! pops concurrently.

use std::{
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::SystemTime,
};

use crate::{
    error::{DistError, Result},
    memory::SharedMemoryRegion,
    ports::PortId,
};

use super::{
    buffer::BufferRef,
    stats::{AtomicBufferPoolStats, BufferPoolStats},
};

const POOL_MAGIC: u64 = 0x4D50_4449_5354_504C; // "MPDISTPL"
const POOL_VERSION: u32 = 1;
const NIL: u32 = u32::MAX;
const STATE_FREE: u8 = 0;
const STATE_IN_USE: u8 = 1;
const CACHE_LINE: usize = 64;

#[repr(C, align(64))]
struct PoolHeader {
    magic: AtomicU64,
    version: u32,
    buf_size: u32,
    capacity: u32,
    slot_stride: u32,
    pool_tag: u32,
    socket_id: u32,
    free_head: AtomicU64,
    free_count: AtomicU64,
}

#[repr(C)]
struct SlotHeader {
    data_len: u32,
    port: u32,
}

const SLOT_HEADER_SIZE: usize = CACHE_LINE;

fn align_up(value: usize) -> Option<usize> {
    value.checked_add(CACHE_LINE - 1).map(|v| v & !(CACHE_LINE - 1))
}

/// Offsets of each section inside the region
#[derive(Debug, Clone, Copy, PartialEq)]
struct PoolLayout {
    next_offset: usize,
    state_offset: usize,
    slots_offset: usize,
    slot_stride: usize,
    total_size: usize,
}

impl PoolLayout {
    fn compute(capacity: usize, buf_size: usize) -> Option<Self> {
        let next_offset = align_up(std::mem::size_of::<PoolHeader>())?;
        let state_offset = align_up(next_offset.checked_add(capacity.checked_mul(4)?)?)?;
        let slots_offset = align_up(state_offset.checked_add(capacity)?)?;
        let slot_stride = align_up(SLOT_HEADER_SIZE.checked_add(buf_size)?)?;
        let total_size = slots_offset.checked_add(slot_stride.checked_mul(capacity)?)?;

        Some(Self {
            next_offset,
            state_offset,
            slots_offset,
            slot_stride,
            total_size,
        })
    }
}

/// Number of buffers the owner creates for `workers` workers and `ports` ports
///
/// Returns `None` if the product overflows.
pub fn pool_buffer_count(
    workers: usize,
    ports: usize,
    per_worker: usize,
    per_port: usize,
) -> Option<usize> {
    workers
        .checked_mul(per_worker)?
        .checked_add(ports.checked_mul(per_port)?)
}

/// NUMA node of the CPU this thread runs on
pub fn current_numa_node() -> u32 {
    #[cfg(target_os = "linux")]
    {
        let mut cpu: libc::c_uint = 0;
        let mut node: libc::c_uint = 0;
        // SAFETY: getcpu writes two c_uints; the cache argument is unused.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_getcpu,
                &mut cpu as *mut libc::c_uint,
                &mut node as *mut libc::c_uint,
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if rc == 0 {
            return node;
        }
    }
    0
}

fn fresh_pool_tag() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() ^ d.as_secs() as u32)
        .unwrap_or(0);
    let mixed = nanos
        .wrapping_mul(0x9E37_79B9)
        .wrapping_add(std::process::id().rotate_left(16))
        .wrapping_add(COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_mul(0x85EB_CA6B));
    mixed.max(1)
}

/// Handle to a shared pool of fixed-size packet buffers
#[derive(Debug, Clone)]
pub struct PacketPool {
    region: Arc<SharedMemoryRegion>,
    layout: PoolLayout,
    capacity: u32,
    buf_size: usize,
    tag: u32,
    stats: Arc<AtomicBufferPoolStats>,
}

impl PacketPool {
    /// Bytes of shared memory needed for a pool
    pub fn required_size(capacity: usize, buf_size: usize) -> Option<usize> {
        PoolLayout::compute(capacity, buf_size).map(|l| l.total_size)
    }

    /// Lay out a new pool in a zero-filled region
    pub fn create(
        region: Arc<SharedMemoryRegion>,
        capacity: usize,
        buf_size: usize,
        socket_id: u32,
    ) -> Result<Self> {
        if capacity == 0 || capacity >= NIL as usize {
            return Err(DistError::invalid_parameter(
                "capacity",
                "Pool capacity must be between 1 and u32::MAX - 1",
            ));
        }
        if buf_size == 0 || buf_size > u32::MAX as usize {
            return Err(DistError::invalid_parameter(
                "buf_size",
                "Buffer size must be between 1 and u32::MAX",
            ));
        }

        let layout = PoolLayout::compute(capacity, buf_size)
            .ok_or_else(|| DistError::memory("Pool size overflows usize"))?;
        if layout.total_size > region.size() {
            return Err(DistError::insufficient_space(layout.total_size, region.size()));
        }

        let tag = fresh_pool_tag();

        // SAFETY: the region was just created and is not yet published under
        // a magic number, so nothing else reads it; offsets come from layout
        // and fit in the region.
        unsafe {
            let base = region.as_mut_ptr_unsafe::<u8>();
            let header = base as *mut PoolHeader;
            std::ptr::addr_of_mut!((*header).version).write(POOL_VERSION);
            std::ptr::addr_of_mut!((*header).buf_size).write(buf_size as u32);
            std::ptr::addr_of_mut!((*header).capacity).write(capacity as u32);
            std::ptr::addr_of_mut!((*header).slot_stride).write(layout.slot_stride as u32);
            std::ptr::addr_of_mut!((*header).pool_tag).write(tag);
            std::ptr::addr_of_mut!((*header).socket_id).write(socket_id);

            let next = base.add(layout.next_offset) as *const AtomicU32;
            for i in 0..capacity {
                let link = if i + 1 < capacity { (i + 1) as u32 } else { NIL };
                (*next.add(i)).store(link, Ordering::Relaxed);
            }
            let state = base.add(layout.state_offset) as *const AtomicU8;
            for i in 0..capacity {
                (*state.add(i)).store(STATE_FREE, Ordering::Relaxed);
            }

            (*header).free_head.store(0, Ordering::Relaxed);
            (*header).free_count.store(capacity as u64, Ordering::Relaxed);
            (*header).magic.store(POOL_MAGIC, Ordering::Release);
        }

        Ok(Self {
            region,
            layout,
            capacity: capacity as u32,
            buf_size,
            tag,
            stats: Arc::new(AtomicBufferPoolStats::new()),
        })
    }

    /// Attach to a pool created by another process
    pub fn attach(region: Arc<SharedMemoryRegion>) -> Result<Self> {
        let name = region.name().to_string();
        if region.size() < std::mem::size_of::<PoolHeader>() {
            return Err(DistError::layout(&name, "region smaller than pool header"));
        }

        // SAFETY: size checked above; mutable fields are atomics and the
        // plain fields are immutable once magic is published.
        let header = unsafe { &*region.as_ptr::<PoolHeader>() };
        if header.magic.load(Ordering::Acquire) != POOL_MAGIC {
            return Err(DistError::not_initialised(&name));
        }
        if header.version != POOL_VERSION {
            return Err(DistError::layout(
                &name,
                format!("unsupported pool version {}", header.version),
            ));
        }

        let capacity = header.capacity as usize;
        let buf_size = header.buf_size as usize;
        let layout = PoolLayout::compute(capacity, buf_size)
            .ok_or_else(|| DistError::layout(&name, "pool header sizes overflow"))?;
        if layout.total_size > region.size() || layout.slot_stride != header.slot_stride as usize {
            return Err(DistError::layout(&name, "pool header does not match region"));
        }

        let tag = header.pool_tag;
        Ok(Self {
            region,
            layout,
            capacity: capacity as u32,
            buf_size,
            tag,
            stats: Arc::new(AtomicBufferPoolStats::new()),
        })
    }

    fn header(&self) -> &PoolHeader {
        // SAFETY: validated on create/attach.
        unsafe { &*self.region.as_ptr::<PoolHeader>() }
    }

    fn next_link(&self, index: u32) -> &AtomicU32 {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity and the next array holds capacity entries.
        unsafe {
            let base = self.region.as_ptr::<u8>().add(self.layout.next_offset) as *const AtomicU32;
            &*base.add(index as usize)
        }
    }

    fn state(&self, index: u32) -> &AtomicU8 {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity and the state array holds capacity entries.
        unsafe {
            let base = self.region.as_ptr::<u8>().add(self.layout.state_offset) as *const AtomicU8;
            &*base.add(index as usize)
        }
    }

    fn slot_ptr(&self, index: u32) -> *mut u8 {
        // SAFETY: index < capacity keeps the slot inside the region.
        unsafe {
            self.region
                .as_mut_ptr_unsafe::<u8>()
                .add(self.layout.slots_offset + index as usize * self.layout.slot_stride)
        }
    }

    /// Take a free buffer, or `None` when the pool is exhausted
    pub fn allocate(&self) -> Option<BufferRef> {
        let header = self.header();
        let mut head = header.free_head.load(Ordering::Acquire);

        let index = loop {
            let index = head as u32;
            if index == NIL {
                self.stats.record_failure();
                return None;
            }

            let next = self.next_link(index).load(Ordering::Acquire);
            let tag = ((head >> 32) + 1) & 0xFFFF_FFFF;
            let new_head = (tag << 32) | next as u64;

            match header.free_head.compare_exchange_weak(
                head,
                new_head,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break index,
                Err(actual) => head = actual,
            }
        };

        let claimed = self
            .state(index)
            .compare_exchange(STATE_FREE, STATE_IN_USE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        debug_assert!(claimed, "free-list handed out buffer {} twice", index);

        header.free_count.fetch_sub(1, Ordering::Relaxed);
        // SAFETY: we own the slot exclusively until it is released.
        unsafe {
            let slot = self.slot_ptr(index) as *mut SlotHeader;
            (*slot).data_len = 0;
            (*slot).port = 0;
        }
        self.stats.record_allocation();

        Some(BufferRef::new(self.tag, index))
    }

    /// Return a buffer to the pool
    ///
    /// A buffer from another pool, or one that is not currently allocated,
    /// is rejected and the pool is left untouched.
    pub fn release(&self, buf: BufferRef) -> Result<()> {
        let index = self.check(&buf)?;
        if self
            .state(index)
            .compare_exchange(STATE_IN_USE, STATE_FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DistError::invalid_buffer(format!(
                "buffer {} released twice",
                index
            )));
        }

        let header = self.header();
        let mut head = header.free_head.load(Ordering::Acquire);
        loop {
            self.next_link(index).store(head as u32, Ordering::Release);
            let tag = ((head >> 32) + 1) & 0xFFFF_FFFF;
            let new_head = (tag << 32) | index as u64;

            match header.free_head.compare_exchange_weak(
                head,
                new_head,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }

        header.free_count.fetch_add(1, Ordering::Relaxed);
        self.stats.record_release();
        Ok(())
    }

    /// Slot index of a reference minted by this pool
    ///
    /// Rejects references carrying another pool's tag, an index past the
    /// end of the slot array, or a slot that is currently free.
    pub fn check(&self, buf: &BufferRef) -> Result<u32> {
        if buf.pool_tag() != self.tag {
            return Err(DistError::invalid_buffer(format!(
                "buffer {} belongs to pool {:#x}, not {:#x}",
                buf.index(),
                buf.pool_tag(),
                self.tag
            )));
        }

        let index = buf.index();
        if index >= self.capacity {
            return Err(DistError::invalid_buffer(format!(
                "index {} outside pool of {}",
                index, self.capacity
            )));
        }

        if self.state(index).load(Ordering::Acquire) != STATE_IN_USE {
            return Err(DistError::invalid_buffer(format!(
                "buffer {} is not allocated",
                index
            )));
        }
        Ok(index)
    }

    /// Copy a received frame into the buffer; returns the bytes stored
    pub fn fill(&self, buf: &mut BufferRef, port: PortId, frame: &[u8]) -> Result<usize> {
        let index = self.check(buf)?;
        let len = frame.len().min(self.buf_size);
        // SAFETY: `buf` is the unique owner of an in-range slot, and len fits
        // the data area behind the slot header.
        unsafe {
            let slot = self.slot_ptr(index);
            std::ptr::copy_nonoverlapping(frame.as_ptr(), slot.add(SLOT_HEADER_SIZE), len);
            let header = slot as *mut SlotHeader;
            (*header).data_len = len as u32;
            (*header).port = port as u32;
        }
        Ok(len)
    }

    /// Frame stored in the buffer
    pub fn frame<'a>(&'a self, buf: &'a BufferRef) -> Result<&'a [u8]> {
        let index = self.check(buf)?;
        // SAFETY: `buf` owns an in-range slot, so no one writes it while borrowed.
        unsafe {
            let slot = self.slot_ptr(index);
            let len = ((*(slot as *const SlotHeader)).data_len as usize).min(self.buf_size);
            Ok(std::slice::from_raw_parts(slot.add(SLOT_HEADER_SIZE), len))
        }
    }

    /// Port the frame arrived on
    pub fn port_of(&self, buf: &BufferRef) -> Result<PortId> {
        let index = self.check(buf)?;
        // SAFETY: as for `frame`.
        Ok(unsafe { (*(self.slot_ptr(index) as *const SlotHeader)).port as PortId })
    }

    /// Total number of buffers
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Buffers currently on the free-list
    pub fn available(&self) -> usize {
        self.header().free_count.load(Ordering::Relaxed) as usize
    }

    /// Buffers currently allocated by any process
    pub fn in_use(&self) -> usize {
        self.capacity().saturating_sub(self.available())
    }

    /// Data bytes per buffer
    pub fn buffer_size(&self) -> usize {
        self.buf_size
    }

    /// NUMA node recorded by the owner
    pub fn socket_id(&self) -> u32 {
        self.header().socket_id
    }

    /// Tag stamped into every reference from this pool
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Name the pool was published under
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Counters for this process
    pub fn stats(&self) -> BufferPoolStats {
        self.stats.snapshot()
    }
}

unsafe impl Send for PacketPool {}
unsafe impl Sync for PacketPool {}
