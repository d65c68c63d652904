use std::env;

use serde::Deserialize;
use thiserror::Error;

use crate::registry::MAX_DEVICES;

pub const DEFAULT_DRIVER_NAME: &str = "pseud";

/// One page in the reference deployment.
pub const DEFAULT_DEVMEM_LEN: usize = pseud_mem::PAGE_SIZE;

pub const ENV_DRIVER_NAME: &str = "PSEUD_DRIVER_NAME";
pub const ENV_DEVMEM_LEN: &str = "PSEUD_DEVMEM_LEN";
pub const ENV_MAX_DEVICES: &str = "PSEUD_MAX_DEVICES";
pub const ENV_DEVICES: &str = "PSEUD_DEVICES";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("driver name must not be empty")]
    EmptyDriverName,

    #[error("devmem_len must be > 0")]
    ZeroDevmemLen,

    #[error("max_devices must be in 1..={max} (got {got})")]
    MaxDevices { got: usize, max: usize },

    #[error("device id {id} is out of range (max_devices = {max_devices})")]
    DeviceIdOutOfRange { id: u32, max_devices: usize },

    #[error("device id {id} is listed more than once")]
    DuplicateDeviceId { id: u32 },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Deployment-time driver settings.
///
/// Device capacity is a single value for every instance created by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Base name of the device nodes (`{driver_name}_{id}`).
    pub driver_name: String,
    /// Capacity of every device's memory, in bytes.
    pub devmem_len: usize,
    /// Width of the id bitmap; ids must be `< max_devices`.
    pub max_devices: usize,
    /// Devices created by [`crate::Driver::init`], in order.
    pub devices: Vec<u32>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            devmem_len: DEFAULT_DEVMEM_LEN,
            max_devices: MAX_DEVICES,
            devices: vec![0, 1, 2],
        }
    }
}

impl DriverConfig {
    /// Builds a config from the `PSEUD_*` environment variables, falling back to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Like [`DriverConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_DRIVER_NAME) {
            config.driver_name = name.trim().to_string();
        }
        if let Some(value) = lookup(ENV_DEVMEM_LEN) {
            config.devmem_len = parse_env(ENV_DEVMEM_LEN, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_DEVICES) {
            config.max_devices = parse_env(ENV_MAX_DEVICES, &value)?;
        }
        if let Some(value) = lookup(ENV_DEVICES) {
            config.devices = parse_id_list(&value).ok_or_else(|| ConfigError::InvalidEnv {
                var: ENV_DEVICES,
                value: value.clone(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver_name.is_empty() {
            return Err(ConfigError::EmptyDriverName);
        }
        if self.devmem_len == 0 {
            return Err(ConfigError::ZeroDevmemLen);
        }
        if self.max_devices == 0 || self.max_devices > MAX_DEVICES {
            return Err(ConfigError::MaxDevices {
                got: self.max_devices,
                max: MAX_DEVICES,
            });
        }
        for (i, &id) in self.devices.iter().enumerate() {
            if id as usize >= self.max_devices {
                return Err(ConfigError::DeviceIdOutOfRange {
                    id,
                    max_devices: self.max_devices,
                });
            }
            if self.devices[..i].contains(&id) {
                return Err(ConfigError::DuplicateDeviceId { id });
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

/// Parses a comma separated id list. An empty string yields an empty list.
pub fn parse_id_list(value: &str) -> Option<Vec<u32>> {
    let value = value.trim();
    if value.is_empty() {
        return Some(Vec::new());
    }
    value.split(',').map(|id| id.trim().parse().ok()).collect()
}
