use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::Device;
use crate::{DeviceError, DeviceResult};

/// Width of the live-id bitmap (`BITS_PER_LONG` on 64-bit hosts).
pub const MAX_DEVICES: usize = u64::BITS as usize;

#[derive(Default)]
struct RegistryState {
    live_ids: u64,
    instances: BTreeMap<u32, Arc<Device>>,
}

impl RegistryState {
    fn is_live(&self, id: u32) -> bool {
        self.live_ids & (1u64 << id) != 0
    }
}

/// Tracks which device ids are in use.
///
/// `live_ids` and `instances` are updated together under one mutex, so an id is marked live iff
/// an instance with that id is present. The mutex is never held across device I/O and is never
/// taken while a device lock is held.
pub struct Registry {
    max_devices: usize,
    state: Mutex<RegistryState>,
}

impl Registry {
    /// `max_devices` is clamped to `1..=MAX_DEVICES`.
    pub fn new(max_devices: usize) -> Self {
        Self {
            max_devices: max_devices.clamp(1, MAX_DEVICES),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn max_devices(&self) -> usize {
        self.max_devices
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        // Every critical section updates the bitmap and the map together without early returns
        // in between, so the state is consistent even after a panic elsewhere.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_id(&self, id: u32) -> DeviceResult<()> {
        if id as usize >= self.max_devices {
            return Err(DeviceError::InvalidArgument("device id out of range"));
        }
        Ok(())
    }

    /// Registers `device` under its id.
    pub fn allocate(&self, device: Device) -> DeviceResult<Arc<Device>> {
        let id = device.id();
        self.check_id(id)?;

        let mut state = self.state();
        if state.is_live(id) {
            return Err(DeviceError::AlreadyRegistered { id });
        }
        let device = Arc::new(device);
        state.live_ids |= 1u64 << id;
        state.instances.insert(id, device.clone());
        Ok(device)
    }

    /// Creates and registers a device under the lowest free id.
    ///
    /// The device memory is allocated outside the registry mutex. If another caller claims the
    /// picked id in the meantime, the next free id is tried.
    pub fn allocate_next(&self, name: &str, capacity: usize) -> DeviceResult<Arc<Device>> {
        loop {
            let id = self
                .free_id()
                .ok_or(DeviceError::InvalidArgument("no free device id"))?;
            let device = Device::new(id, name, capacity)?;
            match self.allocate(device) {
                Err(DeviceError::AlreadyRegistered { .. }) => continue,
                claimed => return claimed,
            }
        }
    }

    /// Unregisters `id` and hands back its instance.
    pub fn release(&self, id: u32) -> DeviceResult<Arc<Device>> {
        if id as usize >= self.max_devices {
            return Err(DeviceError::NotRegistered { id });
        }

        let mut state = self.state();
        if !state.is_live(id) {
            return Err(DeviceError::NotRegistered { id });
        }
        state.live_ids &= !(1u64 << id);
        state
            .instances
            .remove(&id)
            .ok_or(DeviceError::NotRegistered { id })
    }

    pub fn lookup(&self, id: u32) -> DeviceResult<Arc<Device>> {
        self.state()
            .instances
            .get(&id)
            .cloned()
            .ok_or(DeviceError::NotFound { id })
    }

    pub fn is_live(&self, id: u32) -> bool {
        id < u64::BITS && self.state().is_live(id)
    }

    /// Lowest id not currently in use.
    pub fn free_id(&self) -> Option<u32> {
        let free = (!self.state().live_ids).trailing_zeros();
        ((free as usize) < self.max_devices).then_some(free)
    }

    /// Live ids in ascending order.
    pub fn live_ids(&self) -> Vec<u32> {
        self.state().instances.keys().copied().collect()
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.state().instances.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().live_ids.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(MAX_DEVICES)
    }
}
