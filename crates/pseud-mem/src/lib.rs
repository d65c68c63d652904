//! Fixed-capacity device memory for the pseudo-device driver.
//!
//! Every pseudo-device owns exactly one [`BoundedBuffer`]: a zero-initialised byte array whose
//! capacity is chosen at creation and never changes. The buffer only hands out bounds-checked
//! copy APIs; there is no way to obtain a reference into the storage.
//!
//! [`MappedRegion`] is the zero-copy view handed to callers that map device memory. It shares the
//! buffer's storage, so writes through either path are visible through the other.

#![forbid(unsafe_code)]

mod buffer;
mod mapped;

pub use buffer::{BoundedBuffer, BufferError, BufferResult, PAGE_SIZE};
pub use mapped::MappedRegion;
