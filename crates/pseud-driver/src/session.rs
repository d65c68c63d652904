use std::sync::Arc;

use pseud_mem::MappedRegion;
use tracing::debug;

use crate::device::{Device, Whence};
use crate::lock::{AbortSignal, Acquire};
use crate::transfer::{SliceSource, TransferIn, TransferOut};
use crate::{DeviceError, DeviceResult};

/// One open handle on a device, carrying its own file offset.
///
/// Blocking acquisitions made through the session can be aborted by raising the session's
/// [`AbortSignal`] (see [`Session::abort_signal`]).
pub struct Session {
    id: u32,
    device: Option<Arc<Device>>,
    pos: u64,
    signal: AbortSignal,
}

impl Session {
    pub(crate) fn open(device: Arc<Device>) -> Self {
        debug!(device = %device.node_name(), "open");
        Self {
            id: device.id(),
            device: Some(device),
            pos: 0,
            signal: AbortSignal::new(),
        }
    }

    fn device(&self) -> DeviceResult<&Arc<Device>> {
        self.device
            .as_ref()
            .ok_or(DeviceError::NotFound { id: self.id })
    }

    /// Id of the device this session was opened on.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current file offset.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Capacity of the device behind the session.
    pub fn capacity(&self) -> DeviceResult<usize> {
        Ok(self.device()?.capacity())
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// A handle on this session's abort signal. Raising it from another thread interrupts a
    /// blocking read or write waiting for the device lock.
    pub fn abort_signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn read(&mut self, buf: &mut [u8], mode: Acquire) -> DeviceResult<usize> {
        self.read_into(buf, mode)
    }

    pub fn read_into<D>(&mut self, dst: &mut D, mode: Acquire) -> DeviceResult<usize>
    where
        D: TransferOut + ?Sized,
    {
        let device = self.device()?.clone();
        device.read(&mut self.pos, dst, mode, &self.signal)
    }

    pub fn write(&mut self, buf: &[u8], mode: Acquire) -> DeviceResult<usize> {
        self.write_from(&mut SliceSource(buf), mode)
    }

    pub fn write_from<S>(&mut self, src: &mut S, mode: Acquire) -> DeviceResult<usize>
    where
        S: TransferIn + ?Sized,
    {
        let device = self.device()?.clone();
        device.write(&mut self.pos, src, mode, &self.signal)
    }

    pub fn seek(&mut self, delta: i64, whence: Whence) -> DeviceResult<u64> {
        let device = self.device()?.clone();
        Ok(device.seek(&mut self.pos, delta, whence))
    }

    /// [`Session::seek`] with a raw `SEEK_SET`/`SEEK_CUR`/`SEEK_END` value.
    pub fn llseek(&mut self, delta: i64, whence: i32) -> DeviceResult<u64> {
        let whence = Whence::try_from(whence)?;
        self.seek(delta, whence)
    }

    pub fn mmap(&self, length: usize, page_offset: u64) -> DeviceResult<MappedRegion> {
        self.device()?.map(length, page_offset)
    }

    /// Drops the session's reference to the device. Further I/O fails with
    /// [`DeviceError::NotFound`]; closing again is a no-op.
    pub fn close(&mut self) {
        if let Some(device) = self.device.take() {
            debug!(device = %device.node_name(), "release");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("pos", &self.pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::open(Arc::new(Device::new(2, "pseud", 4096).unwrap()))
    }

    #[test]
    fn offset_is_shared_by_read_write_and_seek() {
        let mut s = session();
        assert_eq!(s.write(b"abcdef", Acquire::Blocking).unwrap(), 6);
        assert_eq!(s.position(), 6);

        assert_eq!(s.seek(2, Whence::Start).unwrap(), 2);
        let mut buf = [0u8; 3];
        assert_eq!(s.read(&mut buf, Acquire::Blocking).unwrap(), 3);
        assert_eq!(&buf, b"cde");
        assert_eq!(s.position(), 5);
    }

    #[test]
    fn capacity_is_gone_once_closed() {
        let mut s = session();
        assert_eq!(s.capacity(), Ok(4096));
        s.close();
        assert_eq!(s.capacity(), Err(DeviceError::NotFound { id: 2 }));
    }

    #[test]
    fn llseek_rejects_unknown_whence_without_moving() {
        let mut s = session();
        s.seek(10, Whence::Start).unwrap();
        assert!(matches!(
            s.llseek(0, 3),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert_eq!(s.position(), 10);
        assert_eq!(s.llseek(100, 2).unwrap(), 4096);
    }

    #[test]
    fn closed_session_rejects_io_and_close_is_idempotent() {
        let mut s = session();
        s.close();
        s.close();
        assert!(!s.is_open());

        let mut buf = [0u8; 1];
        assert_eq!(
            s.read(&mut buf, Acquire::Blocking),
            Err(DeviceError::NotFound { id: 2 })
        );
        assert_eq!(
            s.write(b"x", Acquire::Blocking),
            Err(DeviceError::NotFound { id: 2 })
        );
        assert_eq!(s.seek(0, Whence::Start), Err(DeviceError::NotFound { id: 2 }));
        assert_eq!(s.mmap(1, 0).unwrap_err(), DeviceError::NotFound { id: 2 });
    }

    #[test]
    fn sessions_have_independent_offsets() {
        let device = Arc::new(Device::new(0, "pseud", 4096).unwrap());
        let mut a = Session::open(device.clone());
        let mut b = Session::open(device);

        a.write(b"0123456789", Acquire::Blocking).unwrap();
        assert_eq!(a.position(), 10);
        assert_eq!(b.position(), 0);

        let mut buf = [0u8; 4];
        b.read(&mut buf, Acquire::Blocking).unwrap();
        assert_eq!(&buf, b"0123");
    }
}
