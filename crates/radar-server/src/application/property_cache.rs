//! Last-known device properties.

use std::collections::HashMap;

use dashmap::DashMap;

/// Per-device snapshot of property key → value.
///
/// Each device's map is only touched while holding its `DashMap` entry, so
/// concurrent updates to the same device never interleave.
#[derive(Default)]
pub struct PropertyCache {
    snapshots: DashMap<String, HashMap<String, String>>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `values` into the device snapshot.  Existing keys absent from
    /// `values` are kept.
    pub fn update<I>(&self, device_id: &str, values: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.snapshots
            .entry(device_id.to_string())
            .or_default()
            .extend(values);
    }

    /// Replaces the whole snapshot for a device.
    pub fn replace(&self, device_id: &str, values: HashMap<String, String>) {
        self.snapshots.insert(device_id.to_string(), values);
    }

    /// Copy of the snapshot; empty if nothing is cached.
    pub fn get(&self, device_id: &str) -> HashMap<String, String> {
        self.snapshots
            .get(device_id)
            .map(|snapshot| snapshot.value().clone())
            .unwrap_or_default()
    }

    pub fn get_value(&self, device_id: &str, key: &str) -> Option<String> {
        self.snapshots
            .get(device_id)
            .and_then(|snapshot| snapshot.value().get(key).cloned())
    }

    pub fn clear(&self, device_id: &str) {
        self.snapshots.remove(device_id);
    }

    pub fn clear_all(&self) {
        self.snapshots.clear();
    }

    /// Number of devices with a snapshot.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
