//! Buffer references exchanged through rings

/// Owning reference to one buffer of a [`PacketPool`](super::PacketPool)
///
/// The reference carries the pool's tag and the buffer index, never a
/// pointer, so it means the same thing in every process mapping the pool.
/// It is deliberately neither `Clone` nor `Copy`: whoever holds it owns the
/// buffer until it is enqueued or released.
#[must_use = "dropping a BufferRef leaks the buffer; release it to its pool"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BufferRef {
    raw: u64,
}

impl BufferRef {
    pub(crate) fn new(pool_tag: u32, index: u32) -> Self {
        Self {
            raw: ((pool_tag as u64) << 32) | index as u64,
        }
    }

    /// Slot index inside the pool
    pub fn index(&self) -> u32 {
        self.raw as u32
    }

    /// Tag of the pool the buffer came from
    pub fn pool_tag(&self) -> u32 {
        (self.raw >> 32) as u32
    }

    /// Give up ownership and return the wire encoding
    pub fn into_raw(self) -> u64 {
        self.raw
    }

    /// Rebuild a reference from its wire encoding
    ///
    /// # Safety
    /// `raw` must come from [`BufferRef::into_raw`] and must not be turned
    /// back into a reference more than once, otherwise two owners exist.
    pub unsafe fn from_raw(raw: u64) -> Self {
        Self { raw }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding() {
        let buf = BufferRef::new(0xABCD_0001, 42);
        assert_eq!(buf.index(), 42);
        assert_eq!(buf.pool_tag(), 0xABCD_0001);

        let raw = buf.into_raw();
        let back = unsafe { BufferRef::from_raw(raw) };
        assert_eq!(back.index(), 42);
        assert_eq!(back.pool_tag(), 0xABCD_0001);
    }
}
