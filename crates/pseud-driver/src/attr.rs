//! Text attributes exposed on every device node.
//!
//! `address` selects a byte of device memory (the debug cursor) and `value` reads or writes the
//! byte under it. Both are line-oriented: output ends with `\n`, input may carry surrounding
//! whitespace and a trailing newline.
//!
//! `value` accesses take the device lock (uninterruptibly) so they never interleave with a session
//! read or write. The cursor itself is a single atomic and is not serialised with session I/O.

use std::sync::atomic::Ordering;

use tracing::error;

use crate::device::Device;
use crate::{DeviceError, DeviceResult};

pub const ADDRESS_ATTR_NAME: &str = "address";
pub const VALUE_ATTR_NAME: &str = "value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Address,
    Value,
}

impl Attribute {
    pub const ALL: [Attribute; 2] = [Attribute::Address, Attribute::Value];

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Address => ADDRESS_ATTR_NAME,
            Attribute::Value => VALUE_ATTR_NAME,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attr| attr.name() == name)
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Device {
    /// Current debug cursor.
    pub fn cursor(&self) -> usize {
        self.debug_address.load(Ordering::SeqCst)
    }

    pub fn get_cursor(&self) -> String {
        format!("{}\n", self.cursor())
    }

    /// Parses a signed integer and makes it the debug cursor.
    ///
    /// Returns the number of input bytes consumed.
    pub fn set_cursor(&self, text: &str) -> DeviceResult<usize> {
        let address = text
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|address| usize::try_from(address).ok())
            .filter(|&address| address < self.capacity());
        let Some(address) = address else {
            error!(device = %self.node_name(), input = text.trim(), "invalid address");
            return Err(DeviceError::InvalidArgument("invalid address"));
        };

        self.debug_address.store(address, Ordering::SeqCst);
        Ok(text.len())
    }

    /// The byte under the debug cursor.
    pub fn get_byte(&self) -> DeviceResult<String> {
        let _guard = self.lock();
        let value = self
            .buffer()
            .load(self.cursor())
            .map_err(|_| DeviceError::InvalidArgument("invalid address"))?;
        Ok(format!("{value}\n"))
    }

    /// Parses an integer in `0..=255` and stores it under the debug cursor.
    ///
    /// Returns the number of input bytes consumed.
    pub fn set_byte(&self, text: &str) -> DeviceResult<usize> {
        let value = text
            .trim()
            .parse::<i32>()
            .ok()
            .and_then(|value| u8::try_from(value).ok());
        let Some(value) = value else {
            error!(device = %self.node_name(), input = text.trim(), "invalid value");
            return Err(DeviceError::InvalidArgument("invalid value"));
        };

        let _guard = self.lock();
        self.buffer()
            .store(self.cursor(), value)
            .map_err(|_| DeviceError::InvalidArgument("invalid address"))?;
        Ok(text.len())
    }

    pub fn show(&self, attr: Attribute) -> DeviceResult<String> {
        match attr {
            Attribute::Address => Ok(self.get_cursor()),
            Attribute::Value => self.get_byte(),
        }
    }

    pub fn store(&self, attr: Attribute, text: &str) -> DeviceResult<usize> {
        match attr {
            Attribute::Address => self.set_cursor(text),
            Attribute::Value => self.set_byte(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::new(0, "pseud", 4096).unwrap()
    }

    #[test]
    fn cursor_defaults_to_zero() {
        let dev = device();
        assert_eq!(dev.get_cursor(), "0\n");
        assert_eq!(dev.get_byte().unwrap(), "0\n");
    }

    #[test]
    fn cursor_bounds() {
        let dev = device();
        assert!(matches!(
            dev.set_cursor("-1"),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            dev.set_cursor("4096"),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            dev.set_cursor("twelve"),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(dev.set_cursor(""), Err(DeviceError::InvalidArgument(_))));

        assert_eq!(dev.set_cursor("4095\n").unwrap(), 5);
        assert_eq!(dev.get_cursor(), "4095\n");

        // A rejected store keeps the previous cursor.
        assert!(dev.set_cursor("9999").is_err());
        assert_eq!(dev.cursor(), 4095);
    }

    #[test]
    fn byte_round_trip_at_cursor() {
        let dev = device();
        dev.set_cursor("0").unwrap();
        dev.set_byte("255").unwrap();
        assert_eq!(dev.get_byte().unwrap(), "255\n");

        dev.set_cursor(" 17 ").unwrap();
        dev.set_byte("42\n").unwrap();
        assert_eq!(dev.snapshot()[17], 42);
        assert_eq!(dev.snapshot()[0], 255);
    }

    #[test]
    fn value_bounds() {
        let dev = device();
        for bad in ["256", "-1", "0x10", "", "1.5"] {
            assert!(
                matches!(dev.set_byte(bad), Err(DeviceError::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(dev.snapshot().iter().all(|b| *b == 0));
    }

    #[test]
    fn show_and_store_dispatch_by_attribute() {
        let dev = device();
        dev.store(Attribute::Address, "3").unwrap();
        dev.store(Attribute::Value, "7").unwrap();
        assert_eq!(dev.show(Attribute::Address).unwrap(), "3\n");
        assert_eq!(dev.show(Attribute::Value).unwrap(), "7\n");
    }

    #[test]
    fn attribute_names() {
        assert_eq!(Attribute::from_name("address"), Some(Attribute::Address));
        assert_eq!(Attribute::from_name("value"), Some(Attribute::Value));
        assert_eq!(Attribute::from_name("size"), None);
        assert_eq!(Attribute::Value.to_string(), "value");
    }
}
