use core::fmt;
use std::sync::Arc;

use crate::buffer::{check_range, BoundedBuffer, BufferResult};

/// A shared, zero-copy window onto a [`BoundedBuffer`].
///
/// All offsets are relative to the start of the mapping. The region keeps the storage alive for
/// as long as it exists, even if the device that owned the buffer has been released.
///
/// Accesses through a mapping are not serialised with the owning device's lock: a concurrent
/// session write may be observed byte by byte.
#[derive(Clone)]
pub struct MappedRegion {
    buffer: Arc<BoundedBuffer>,
    start: usize,
    len: usize,
}

impl MappedRegion {
    /// Maps `len` bytes of `buffer` starting at byte `start`.
    pub fn new(buffer: Arc<BoundedBuffer>, start: usize, len: usize) -> BufferResult<Self> {
        check_range(buffer.capacity(), start, len)?;
        Ok(Self { buffer, start, len })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte offset of the mapping inside the device memory.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Whether both mappings view the same backing storage.
    pub fn shares_storage_with(&self, other: &MappedRegion) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    pub fn read_into(&self, offset: usize, dst: &mut [u8]) -> BufferResult<()> {
        let range = check_range(self.len, offset, dst.len())?;
        self.buffer.read_into(self.start + range.start, dst)
    }

    pub fn write_from(&self, offset: usize, src: &[u8]) -> BufferResult<()> {
        let range = check_range(self.len, offset, src.len())?;
        self.buffer.write_from(self.start + range.start, src)
    }

    pub fn load(&self, offset: usize) -> BufferResult<u8> {
        let range = check_range(self.len, offset, 1)?;
        self.buffer.load(self.start + range.start)
    }

    pub fn store(&self, offset: usize, value: u8) -> BufferResult<()> {
        let range = check_range(self.len, offset, 1)?;
        self.buffer.store(self.start + range.start, value)
    }

    /// Reads a NUL-terminated byte string starting at `offset`.
    ///
    /// Stops at the end of the mapping if no terminator is found.
    pub fn read_cstr(&self, offset: usize) -> BufferResult<Vec<u8>> {
        check_range(self.len, offset, 0)?;
        let mut out = Vec::new();
        for pos in offset..self.len {
            match self.load(pos)? {
                0 => break,
                b => out.push(b),
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("start", &self.start)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferError, PAGE_SIZE};

    #[test]
    fn mapping_and_buffer_share_storage() {
        let buffer = Arc::new(BoundedBuffer::new(2 * PAGE_SIZE).unwrap());
        let map = MappedRegion::new(buffer.clone(), PAGE_SIZE, PAGE_SIZE).unwrap();

        map.write_from(0, b"abc").unwrap();
        let mut dst = [0u8; 3];
        buffer.read_into(PAGE_SIZE, &mut dst).unwrap();
        assert_eq!(&dst, b"abc");

        buffer.store(PAGE_SIZE + 10, 0x5a).unwrap();
        assert_eq!(map.load(10).unwrap(), 0x5a);
    }

    #[test]
    fn offsets_are_bounded_by_the_mapping_not_the_buffer() {
        let buffer = Arc::new(BoundedBuffer::new(2 * PAGE_SIZE).unwrap());
        let map = MappedRegion::new(buffer, 0, 16).unwrap();

        assert!(matches!(
            map.write_from(15, &[1, 2]),
            Err(BufferError::OutOfRange { capacity: 16, .. })
        ));
        assert!(matches!(map.load(16), Err(BufferError::OutOfRange { .. })));
    }

    #[test]
    fn mapping_past_the_buffer_is_rejected() {
        let buffer = Arc::new(BoundedBuffer::new(PAGE_SIZE).unwrap());
        assert!(MappedRegion::new(buffer.clone(), 1, PAGE_SIZE).is_err());
        assert!(MappedRegion::new(buffer, PAGE_SIZE, 1).is_err());
    }

    #[test]
    fn mapping_outlives_the_original_owner() {
        let buffer = Arc::new(BoundedBuffer::new(PAGE_SIZE).unwrap());
        let map = MappedRegion::new(buffer.clone(), 0, PAGE_SIZE).unwrap();
        drop(buffer);

        map.write_from(0, b"still here\0").unwrap();
        assert_eq!(map.read_cstr(0).unwrap(), b"still here");
    }

    #[test]
    fn read_cstr_stops_at_end_of_mapping() {
        let buffer = Arc::new(BoundedBuffer::new(PAGE_SIZE).unwrap());
        let map = MappedRegion::new(buffer, 0, 4).unwrap();
        map.write_from(0, b"abcd").unwrap();
        assert_eq!(map.read_cstr(1).unwrap(), b"bcd");
        assert_eq!(map.read_cstr(4).unwrap(), b"");
    }
}
