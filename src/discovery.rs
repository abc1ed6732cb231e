use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A device announced on the network, e.g. a Wi-Fi flashable receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryEvent {
    Added(DiscoveredDevice),
    Updated(DiscoveredDevice),
    Removed { name: String },
}

/// Live view of discovered devices keyed by name.
///
/// Only [`DiscoveredDevices::apply`] mutates the map; readers get copies.
#[derive(Debug, Default)]
pub struct DiscoveredDevices {
    devices: BTreeMap<String, DiscoveredDevice>,
}

impl DiscoveredDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. Events must be applied in arrival order.
    pub fn apply(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Added(device) | DiscoveryEvent::Updated(device) => {
                self.devices.insert(device.name.clone(), device);
            }
            DiscoveryEvent::Removed { name } => {
                self.devices.remove(&name);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<DiscoveredDevice> {
        self.devices.get(name).cloned()
    }

    pub fn snapshot(&self) -> Vec<DiscoveredDevice> {
        self.devices.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
