use core::fmt;
use core::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

/// Granularity of device memory mappings.
pub const PAGE_SIZE: usize = 4096;

/// Errors returned by [`BoundedBuffer`] and [`crate::MappedRegion`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The requested range does not fit inside the buffer (or mapping).
    #[error("device memory access out of range: offset={offset} len={len} capacity={capacity}")]
    OutOfRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// The host allocator refused the backing storage.
    #[error("failed to allocate {capacity} bytes of device memory")]
    OutOfMemory { capacity: usize },

    #[error("device memory capacity must be > 0")]
    ZeroCapacity,
}

pub type BufferResult<T> = Result<T, BufferError>;

pub(crate) fn check_range(capacity: usize, offset: usize, len: usize) -> BufferResult<Range<usize>> {
    let end = offset.checked_add(len).ok_or(BufferError::OutOfRange {
        offset,
        len,
        capacity,
    })?;
    if end > capacity {
        return Err(BufferError::OutOfRange {
            offset,
            len,
            capacity,
        });
    }
    Ok(offset..end)
}

/// Zero-initialised byte storage of a fixed capacity.
///
/// # Concurrency
/// Bytes are stored as `AtomicU8` and accessed with relaxed byte-granular loads/stores, so the
/// storage can be shared with [`crate::MappedRegion`]s and touched from several threads. The atomics provide *no* ordering between bytes: callers that need a
/// consistent multi-byte view (session reads/writes) serialise through the owning device's lock,
/// whose acquire/release edges order the relaxed accesses.
pub struct BoundedBuffer {
    bytes: Box<[AtomicU8]>,
}

impl BoundedBuffer {
    /// Allocates `capacity` zeroed bytes.
    ///
    /// Allocation failure is reported as [`BufferError::OutOfMemory`] instead of aborting the
    /// process.
    pub fn new(capacity: usize) -> BufferResult<Self> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(capacity)
            .map_err(|_| BufferError::OutOfMemory { capacity })?;
        bytes.resize_with(capacity, || AtomicU8::new(0));

        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the storage is made of whole pages and can therefore back a mapping.
    pub fn is_page_backed(&self) -> bool {
        self.capacity() % PAGE_SIZE == 0
    }

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read_into(&self, offset: usize, dst: &mut [u8]) -> BufferResult<()> {
        let range = check_range(self.capacity(), offset, dst.len())?;
        for (slot, byte) in dst.iter_mut().zip(&self.bytes[range]) {
            *slot = byte.load(Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copies `src` into the buffer starting at `offset`.
    pub fn write_from(&self, offset: usize, src: &[u8]) -> BufferResult<()> {
        let range = check_range(self.capacity(), offset, src.len())?;
        for (byte, value) in self.bytes[range].iter().zip(src.iter().copied()) {
            byte.store(value, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn load(&self, index: usize) -> BufferResult<u8> {
        let range = check_range(self.capacity(), index, 1)?;
        Ok(self.bytes[range.start].load(Ordering::Relaxed))
    }

    pub fn store(&self, index: usize, value: u8) -> BufferResult<()> {
        let range = check_range(self.capacity(), index, 1)?;
        self.bytes[range.start].store(value, Ordering::Relaxed);
        Ok(())
    }

    /// Copies the whole buffer out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.iter().map(|b| b.load(Ordering::Relaxed)).collect()
    }
}

impl fmt::Debug for BoundedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedBuffer")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
