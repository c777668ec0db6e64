//! The set of open devices, shared between whoever polls them and whoever
//! renders them.
//!
//! A registry is created once by the program and passed to the parts that
//! need device access. Handles are reference counted, so a device removed
//! from the registry stays alive until the last holder lets go.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::device::SweepSource;

pub type DeviceHandle = Arc<Mutex<Box<dyn SweepSource>>>;

#[derive(Default)]
pub struct DeviceRegistry {
    devices: Vec<(u32, DeviceHandle)>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a source and hand back a shared handle to it.
    /// A source with an id already registered replaces the old entry.
    pub fn register(&mut self, source: Box<dyn SweepSource>) -> DeviceHandle {
        let id = source.device_id();
        info!(device_id = id, name = source.name(), kind = %source.kind(), "Registering device");
        let handle: DeviceHandle = Arc::new(Mutex::new(source));
        match self.devices.iter_mut().find(|(i, _)| *i == id) {
            Some(entry) => {
                debug!(device_id = id, "Replacing registered device");
                entry.1 = handle.clone();
            }
            None => self.devices.push((id, handle.clone())),
        }
        handle
    }

    pub fn get(&self, device_id: u32) -> Option<DeviceHandle> {
        self.devices
            .iter()
            .find(|(id, _)| *id == device_id)
            .map(|(_, h)| h.clone())
    }

    pub fn remove(&mut self, device_id: u32) -> Option<DeviceHandle> {
        let idx = self.devices.iter().position(|(id, _)| *id == device_id)?;
        debug!(device_id, "Removing device");
        Some(self.devices.remove(idx).1)
    }

    pub fn ids(&self) -> Vec<u32> {
        self.devices.iter().map(|(id, _)| *id).collect()
    }

    pub fn handles(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.devices.iter().map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
