//! Copying bytes across the caller boundary.
//!
//! A session read copies device bytes *out* into a [`TransferOut`]; a session write copies bytes
//! *in* from a [`TransferIn`]. Either side may fail with [`TransferFault`] (the equivalent of a
//! bad user pointer), in which case the device operation fails without moving the file offset.

use crate::DeviceError;

/// The caller's buffer could not be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFault;

impl From<TransferFault> for DeviceError {
    fn from(_: TransferFault) -> Self {
        DeviceError::TransferFault
    }
}

/// Destination of a device read.
pub trait TransferOut {
    /// Number of bytes the caller asked for.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `src` into the start of the destination. `src.len() <= self.len()`.
    fn copy_out(&mut self, src: &[u8]) -> Result<(), TransferFault>;
}

/// Source of a device write.
pub trait TransferIn {
    /// Number of bytes the caller offered.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `dst` from the start of the source. `dst.len() <= self.len()`.
    fn copy_in(&mut self, dst: &mut [u8]) -> Result<(), TransferFault>;
}

impl TransferOut for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_out(&mut self, src: &[u8]) -> Result<(), TransferFault> {
        self.get_mut(..src.len())
            .ok_or(TransferFault)?
            .copy_from_slice(src);
        Ok(())
    }
}

/// Read-only source over a borrowed slice.
#[derive(Debug, Clone, Copy)]
pub struct SliceSource<'a>(pub &'a [u8]);

impl TransferIn for SliceSource<'_> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn copy_in(&mut self, dst: &mut [u8]) -> Result<(), TransferFault> {
        dst.copy_from_slice(self.0.get(..dst.len()).ok_or(TransferFault)?);
        Ok(())
    }
}
