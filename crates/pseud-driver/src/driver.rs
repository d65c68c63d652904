use std::sync::Arc;

use tracing::{error, info, warn};

use crate::attr::Attribute;
use crate::config::{ConfigError, DriverConfig};
use crate::device::Device;
use crate::registry::Registry;
use crate::session::Session;
use crate::{DeviceResult, InitError};

/// Summary of one live device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: u32,
    pub node_name: String,
    pub capacity: usize,
}

impl DeviceInfo {
    fn of(device: &Device) -> Self {
        Self {
            id: device.id(),
            node_name: device.node_name().to_string(),
            capacity: device.capacity(),
        }
    }
}

/// Owns the registry and every device created through it.
///
/// This is the host-facing surface: devices are created and destroyed here, sessions are opened
/// here, and attribute requests are routed here by id. Dropping the driver tears down any device
/// still live.
pub struct Driver {
    config: DriverConfig,
    registry: Registry,
}

impl Driver {
    /// A driver with an empty registry.
    pub fn new(config: DriverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry: Registry::new(config.max_devices),
            config,
        })
    }

    /// A driver with every device listed in `config.devices` created, in order.
    ///
    /// If any creation fails the devices created so far are removed again and the failure is
    /// returned.
    pub fn init(config: DriverConfig) -> Result<Self, InitError> {
        let driver = Self::new(config)?;

        for &id in &driver.config.devices {
            if let Err(source) = driver.create(id) {
                error!(id, %source, "failed to create device, unwinding");
                driver.shutdown();
                return Err(InitError::Device { id, source });
            }
        }

        info!(
            driver = %driver.config.driver_name,
            devices = driver.registry.len(),
            "driver initialised"
        );
        Ok(driver)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Creates device `id` named after the driver.
    pub fn create(&self, id: u32) -> DeviceResult<Arc<Device>> {
        self.create_named(id, &self.config.driver_name)
    }

    /// Creates device `id` with node name `{name}_{id}`.
    pub fn create_named(&self, id: u32, name: &str) -> DeviceResult<Arc<Device>> {
        let device = Device::new(id, name, self.config.devmem_len)?;
        let device = self.registry.allocate(device)?;
        info!(device = %device.node_name(), capacity = device.capacity(), "device created");
        Ok(device)
    }

    /// Creates a device under the lowest free id.
    pub fn create_next(&self) -> DeviceResult<Arc<Device>> {
        let device = self
            .registry
            .allocate_next(&self.config.driver_name, self.config.devmem_len)?;
        info!(device = %device.node_name(), capacity = device.capacity(), "device created");
        Ok(device)
    }

    /// Unregisters device `id`. Sessions and mappings still holding it keep a detached instance.
    pub fn remove(&self, id: u32) -> DeviceResult<()> {
        let device = self.registry.release(id)?;
        info!(device = %device.node_name(), "device removed");
        Ok(())
    }

    pub fn lookup(&self, id: u32) -> DeviceResult<Arc<Device>> {
        self.registry.lookup(id)
    }

    pub fn open(&self, id: u32) -> DeviceResult<Session> {
        Ok(Session::open(self.registry.lookup(id)?))
    }

    pub fn attr_show(&self, id: u32, attr: Attribute) -> DeviceResult<String> {
        self.registry.lookup(id)?.show(attr)
    }

    pub fn attr_store(&self, id: u32, attr: Attribute, text: &str) -> DeviceResult<usize> {
        self.registry.lookup(id)?.store(attr, text)
    }

    /// Live devices ordered by id.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.registry
            .devices()
            .iter()
            .map(|device| DeviceInfo::of(device))
            .collect()
    }

    /// Removes every device and consumes the driver.
    pub fn exit(self) {
        // Drop does the work.
    }

    fn shutdown(&self) {
        for id in self.registry.live_ids() {
            if let Ok(device) = self.registry.release(id) {
                warn!(
                    device = %device.node_name(),
                    handles = Arc::strong_count(&device) - 1,
                    "device still present at teardown"
                );
                info!(device = %device.node_name(), "device removed");
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            self.shutdown();
        }
        info!(driver = %self.config.driver_name, "driver exited");
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.config)
            .field("live_ids", &self.registry.live_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Acquire, DeviceError};

    fn config(devices: Vec<u32>) -> DriverConfig {
        DriverConfig {
            devices,
            ..DriverConfig::default()
        }
    }

    #[test]
    fn init_creates_the_default_fleet() {
        let driver = Driver::init(DriverConfig::default()).unwrap();
        let names: Vec<_> = driver.devices().into_iter().map(|d| d.node_name).collect();
        assert_eq!(names, ["pseud_0", "pseud_1", "pseud_2"]);
        assert!(driver.devices().iter().all(|d| d.capacity == 4096));
    }

    #[test]
    fn init_rejects_invalid_config() {
        let err = Driver::init(DriverConfig {
            devmem_len: 0,
            ..DriverConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, InitError::Config(ConfigError::ZeroDevmemLen)));
    }

    #[test]
    fn create_and_remove_follow_the_registry() {
        let driver = Driver::new(config(vec![])).unwrap();
        driver.create(4).unwrap();
        assert_eq!(
            driver.create(4).unwrap_err(),
            DeviceError::AlreadyRegistered { id: 4 }
        );
        driver.remove(4).unwrap();
        assert_eq!(driver.remove(4).unwrap_err(), DeviceError::NotRegistered { id: 4 });
        driver.create(4).unwrap();
    }

    #[test]
    fn create_next_uses_the_lowest_free_id() {
        let driver = Driver::init(config(vec![0, 2])).unwrap();
        assert_eq!(driver.create_next().unwrap().id(), 1);
        assert_eq!(driver.create_next().unwrap().id(), 3);
    }

    #[test]
    fn open_requires_a_live_device() {
        let driver = Driver::init(config(vec![0])).unwrap();
        assert_eq!(driver.open(7).unwrap_err(), DeviceError::NotFound { id: 7 });

        let mut session = driver.open(0).unwrap();
        session.write(b"abc", Acquire::Blocking).unwrap();
        assert_eq!(&driver.lookup(0).unwrap().snapshot()[..3], b"abc");
    }

    #[test]
    fn attributes_are_routed_by_id() {
        let driver = Driver::init(config(vec![1])).unwrap();
        driver.attr_store(1, Attribute::Address, "10\n").unwrap();
        driver.attr_store(1, Attribute::Value, "99").unwrap();
        assert_eq!(driver.attr_show(1, Attribute::Value).unwrap(), "99\n");
        assert_eq!(
            driver.attr_show(0, Attribute::Address).unwrap_err(),
            DeviceError::NotFound { id: 0 }
        );
    }

    #[test]
    fn session_survives_removal_of_its_device() {
        let driver = Driver::init(config(vec![0])).unwrap();
        let mut session = driver.open(0).unwrap();
        driver.remove(0).unwrap();

        // The session keeps the detached instance alive; the registry no longer knows it.
        assert_eq!(session.write(b"late", Acquire::Blocking).unwrap(), 4);
        assert!(driver.lookup(0).is_err());
    }

    #[test]
    fn exit_releases_everything() {
        let driver = Driver::init(DriverConfig::default()).unwrap();
        let device = driver.lookup(1).unwrap();
        driver.exit();
        // Only our handle remains.
        assert_eq!(Arc::strong_count(&device), 1);
    }
}
