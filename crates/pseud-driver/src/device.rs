use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use pseud_mem::{BoundedBuffer, BufferError, MappedRegion, PAGE_SIZE};
use tracing::{debug, error};

use crate::lock::{AbortSignal, Acquire, DeviceLock, DeviceLockGuard};
use crate::transfer::{TransferIn, TransferOut};
use crate::{DeviceError, DeviceResult};

/// Reference point of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// `SEEK_SET`
    Start,
    /// `SEEK_CUR`
    Current,
    /// `SEEK_END`
    End,
}

impl TryFrom<i32> for Whence {
    type Error = DeviceError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Whence::Start),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            _ => Err(DeviceError::InvalidArgument("unsupported whence")),
        }
    }
}

/// One pseudo-device: a fixed-size memory region, the lock serialising session I/O on it, and the
/// debug cursor used by the attribute accessors.
pub struct Device {
    id: u32,
    node_name: String,
    buffer: Arc<BoundedBuffer>,
    lock: DeviceLock,
    pub(crate) debug_address: AtomicUsize,
}

impl Device {
    /// Allocates a zeroed device of `capacity` bytes.
    pub fn new(id: u32, name: &str, capacity: usize) -> DeviceResult<Self> {
        let buffer = BoundedBuffer::new(capacity).map_err(|err| match err {
            BufferError::ZeroCapacity => DeviceError::InvalidArgument("device capacity must be > 0"),
            _ => DeviceError::OutOfMemory,
        })?;

        Ok(Self {
            id,
            node_name: format!("{name}_{id}"),
            buffer: Arc::new(buffer),
            lock: DeviceLock::new(),
            debug_address: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Device node name, `{name}_{id}`.
    #[inline]
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub(crate) fn buffer(&self) -> &BoundedBuffer {
        &self.buffer
    }

    /// Holds the device lock (uninterruptibly) for as long as the guard lives.
    pub fn lock(&self) -> DeviceLockGuard<'_> {
        self.lock.lock()
    }

    /// Reads up to `dst.len()` bytes at `*pos`, advancing `*pos` by the number of bytes copied.
    ///
    /// Reading at or past the end returns 0. On [`DeviceError::TransferFault`] `*pos` is left
    /// unchanged.
    pub fn read<D>(
        &self,
        pos: &mut u64,
        dst: &mut D,
        mode: Acquire,
        signal: &AbortSignal,
    ) -> DeviceResult<usize>
    where
        D: TransferOut + ?Sized,
    {
        let _guard = self.lock.acquire(mode, signal)?;

        let capacity = self.capacity() as u64;
        if *pos >= capacity {
            debug!(device = %self.node_name, pos = *pos, "read at end of device memory");
            return Ok(0);
        }

        let offset = *pos as usize;
        let count = (dst.len() as u64).min(capacity - *pos) as usize;

        let mut staging = vec![0u8; count];
        self.buffer
            .read_into(offset, &mut staging)
            .map_err(|_| DeviceError::TransferFault)?;
        if let Err(fault) = dst.copy_out(&staging) {
            debug!(device = %self.node_name, pos = *pos, count, "read fault");
            return Err(fault.into());
        }

        *pos += count as u64;
        debug!(device = %self.node_name, count, "read");
        Ok(count)
    }

    /// Writes up to `src.len()` bytes at `*pos`, advancing `*pos` by the number of bytes copied.
    ///
    /// The count is clamped to the room left before the end; writing at or past the end copies
    /// nothing and returns 0. On [`DeviceError::TransferFault`] neither the device memory nor
    /// `*pos` is modified.
    pub fn write<S>(
        &self,
        pos: &mut u64,
        src: &mut S,
        mode: Acquire,
        signal: &AbortSignal,
    ) -> DeviceResult<usize>
    where
        S: TransferIn + ?Sized,
    {
        let _guard = self.lock.acquire(mode, signal)?;

        let capacity = self.capacity() as u64;
        let count = (src.len() as u64).min(capacity.saturating_sub(*pos)) as usize;
        if count == 0 {
            debug!(device = %self.node_name, pos = *pos, "write with no room left");
            return Ok(0);
        }

        let mut staging = vec![0u8; count];
        if let Err(fault) = src.copy_in(&mut staging) {
            debug!(device = %self.node_name, pos = *pos, count, "write fault");
            return Err(fault.into());
        }
        self.buffer
            .write_from(*pos as usize, &staging)
            .map_err(|_| DeviceError::TransferFault)?;

        *pos += count as u64;
        debug!(device = %self.node_name, count, "written");
        Ok(count)
    }

    /// Moves `*pos` relative to `whence`, saturating into `[0, capacity]`.
    ///
    /// Always waits for the lock (uninterruptibly).
    pub fn seek(&self, pos: &mut u64, delta: i64, whence: Whence) -> u64 {
        let _guard = self.lock.lock();

        let capacity = self.capacity() as i128;
        let delta = i128::from(delta);
        let candidate = match whence {
            Whence::Start => delta,
            Whence::Current => i128::from(*pos) + delta,
            Whence::End => capacity + delta,
        };

        let new_pos = candidate.clamp(0, capacity) as u64;
        *pos = new_pos;
        debug!(device = %self.node_name, new_pos, "seek");
        new_pos
    }

    /// Maps `length` bytes of device memory starting at page `page_offset`.
    ///
    /// The mapping shares the device's storage and bypasses the device lock.
    pub fn map(&self, length: usize, page_offset: u64) -> DeviceResult<MappedRegion> {
        if !self.buffer.is_page_backed() {
            error!(device = %self.node_name, capacity = self.capacity(), "device memory is not page backed");
            return Err(DeviceError::NotMappable);
        }

        let offset = page_offset
            .checked_mul(PAGE_SIZE as u64)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(DeviceError::MapFault)?;
        if length == 0 {
            return Err(DeviceError::InvalidArgument("mapping length must be > 0"));
        }
        let end = offset
            .checked_add(length)
            .ok_or(DeviceError::InvalidArgument("mapping range overflows"))?;
        if end > self.capacity() {
            return Err(DeviceError::InvalidArgument(
                "mapping extends past the end of device memory",
            ));
        }

        let region = MappedRegion::new(self.buffer.clone(), offset, length).map_err(|err| {
            error!(device = %self.node_name, %err, "failed to map device memory");
            DeviceError::MapFault
        })?;
        debug!(device = %self.node_name, offset, length, "mapped");
        Ok(region)
    }

    /// Copies the whole device memory out without taking the lock.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.to_vec()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("node_name", &self.node_name)
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
