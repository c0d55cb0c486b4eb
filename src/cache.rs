use std::collections::BTreeMap;

use crate::types::Device;

/// Every device seen since the client was built, keyed by upstream id.
///
/// Records are replaced wholesale and never removed: upstream drops units
/// from a payload transiently, and a stale record beats a vanished one.
#[derive(Debug, Default)]
pub(crate) struct DeviceCache {
    devices: BTreeMap<String, Device>,
}

impl DeviceCache {
    /// Insert or replace the record for `device.id`, returning the old one.
    pub fn upsert(&mut self, device: Device) -> Option<Device> {
        self.devices.insert(device.id.clone(), device)
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn values(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}
