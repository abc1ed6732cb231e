use crate::core::{Device, DeviceTarget};
use crate::error::CatalogError;
use std::collections::HashSet;
use std::path::Path;

/// Read-only set of supported devices, validated as a whole when loaded.
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    devices: Vec<Device>,
}

impl DeviceCatalog {
    pub fn new(devices: Vec<Device>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for device in &devices {
            validate_device(device)?;
            if !seen.insert(device.id.as_str()) {
                return Err(CatalogError::DuplicateDevice(device.id.clone()));
            }
        }
        tracing::info!("Loaded device catalog with {} devices", devices.len());
        Ok(Self { devices })
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let devices: Vec<Device> = serde_json::from_str(json)?;
        Self::new(devices)
    }

    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn find(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.id == id)
    }

    pub fn find_target(&self, device_id: &str, target_name: &str) -> Option<&DeviceTarget> {
        self.find(device_id)?
            .targets
            .iter()
            .find(|target| target.name == target_name)
    }
}

fn validate_device(device: &Device) -> Result<(), CatalogError> {
    let reason = if device.id.trim().is_empty() {
        Some("empty id")
    } else if device.targets.is_empty() {
        Some("no targets")
    } else if device.supported_define_keys.is_empty() {
        Some("no supported define keys")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(CatalogError::InvalidDevice {
            id: device.id.clone(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
