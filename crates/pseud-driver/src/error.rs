use thiserror::Error;

use crate::config::ConfigError;

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors surfaced by device, registry and session operations.
///
/// Every failing operation reports exactly one of these and leaves the device state as it was
/// before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Malformed input: unknown whence, unparsable attribute text, out-of-range address/value,
    /// oversized mapping or an id outside the registry bitmap.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Non-blocking acquisition found the device lock held.
    #[error("device is busy")]
    WouldBlock,

    /// Blocking acquisition was aborted by the caller's abort signal.
    #[error("interrupted while waiting for the device lock")]
    Interrupted,

    /// Copying to or from the caller's buffer failed.
    #[error("bad address while copying device data")]
    TransferFault,

    /// The mapping could not be established.
    #[error("failed to map device memory")]
    MapFault,

    /// The backing storage cannot be mapped (not page-backed).
    #[error("device memory is not mappable")]
    NotMappable,

    #[error("out of memory while allocating device memory")]
    OutOfMemory,

    #[error("device id {id} is already registered")]
    AlreadyRegistered { id: u32 },

    #[error("device id {id} is not registered")]
    NotRegistered { id: u32 },

    #[error("no such device: {id}")]
    NotFound { id: u32 },
}

/// POSIX error numbers used by [`DeviceError::errno`].
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EINTR: i32 = 4;
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const EEXIST: i32 = 17;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
}

impl DeviceError {
    /// The errno a file-like host surface should report for this error.
    pub fn errno(&self) -> i32 {
        match self {
            DeviceError::InvalidArgument(_) => errno::EINVAL,
            DeviceError::WouldBlock => errno::EAGAIN,
            DeviceError::Interrupted => errno::EINTR,
            DeviceError::TransferFault => errno::EFAULT,
            DeviceError::MapFault | DeviceError::OutOfMemory => errno::ENOMEM,
            DeviceError::NotMappable => errno::EIO,
            DeviceError::AlreadyRegistered { .. } => errno::EEXIST,
            DeviceError::NotRegistered { .. } => errno::ENOENT,
            DeviceError::NotFound { .. } => errno::ENODEV,
        }
    }

    /// Transient failures the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::WouldBlock | DeviceError::Interrupted)
    }
}

/// Errors returned while bringing a [`crate::Driver`] up.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid driver configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to create device {id}: {source}")]
    Device {
        id: u32,
        #[source]
        source: DeviceError,
    },
}
