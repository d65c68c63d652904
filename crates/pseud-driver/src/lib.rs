//! Memory-backed pseudo devices.
//!
//! A [`Driver`] owns a [`Registry`] of [`Device`]s, each a fixed-size zeroed memory region with
//! its own lock. Hosts open [`Session`]s on a device to read, write, seek and map its memory, and
//! reach the per-device debug cursor through the text [`Attribute`]s `address` and `value`.
//!
//! ```
//! use pseud_driver::{Acquire, Driver, DriverConfig, Whence};
//!
//! let driver = Driver::init(DriverConfig::default()).unwrap();
//! let mut session = driver.open(1).unwrap();
//! session.write(b"hello", Acquire::Blocking).unwrap();
//! session.seek(0, Whence::Start).unwrap();
//!
//! let mut buf = [0u8; 5];
//! session.read(&mut buf, Acquire::Blocking).unwrap();
//! assert_eq!(&buf, b"hello");
//! ```

#![forbid(unsafe_code)]

mod attr;
mod config;
mod device;
mod driver;
mod error;
mod lock;
mod registry;
mod session;
mod transfer;

pub use attr::{Attribute, ADDRESS_ATTR_NAME, VALUE_ATTR_NAME};
pub use config::{
    parse_id_list, ConfigError, DriverConfig, DEFAULT_DEVMEM_LEN, DEFAULT_DRIVER_NAME,
    ENV_DEVICES, ENV_DEVMEM_LEN, ENV_DRIVER_NAME, ENV_MAX_DEVICES,
};
pub use device::{Device, Whence};
pub use driver::{DeviceInfo, Driver};
pub use error::{errno, DeviceError, DeviceResult, InitError};
pub use lock::{AbortSignal, Acquire, DeviceLock, DeviceLockGuard};
pub use registry::{Registry, MAX_DEVICES};
pub use session::Session;
pub use transfer::{SliceSource, TransferFault, TransferIn, TransferOut};

pub use pseud_mem::{MappedRegion, PAGE_SIZE};
