//! Bus enumeration
//!
//! Produces the set of attached devices from the backend's registry view,
//! skipping entries whose descriptors cannot be read.

use super::backend::UsbBackend;
use super::matcher::DeviceMatcher;
use common::ScannedDevice;
use protocol::{DeviceDescriptor, EnumerationError};
use std::collections::BTreeSet;
use tracing::{trace, warn};

pub struct DeviceEnumerator {
    matcher: DeviceMatcher,
}

impl DeviceEnumerator {
    pub fn new(matcher: DeviceMatcher) -> Self {
        Self { matcher }
    }

    pub fn matcher(&self) -> &DeviceMatcher {
        &self.matcher
    }

    /// All readable attached devices
    ///
    /// Fails only when the registry itself is unavailable.
    pub fn scan(
        &self,
        backend: &dyn UsbBackend,
    ) -> Result<BTreeSet<DeviceDescriptor>, EnumerationError> {
        let entries = backend.list_devices()?;

        let devices: BTreeSet<DeviceDescriptor> = entries
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    warn!("Skipping device: {}", e);
                    None
                }
            })
            .collect();

        trace!("Enumerated {} devices", devices.len());
        Ok(devices)
    }

    /// Supported devices among `devices`, in descriptor order
    pub fn supported(&self, devices: &BTreeSet<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
        devices
            .iter()
            .filter(|d| self.matcher.is_supported(d))
            .cloned()
            .collect()
    }

    /// Tag every device with the matcher's verdict
    pub fn classify(&self, devices: &BTreeSet<DeviceDescriptor>) -> Vec<ScannedDevice> {
        devices
            .iter()
            .map(|d| ScannedDevice {
                descriptor: d.clone(),
                supported: self.matcher.is_supported(d),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::simulated::{SimulatedBackend, SimulatedDevice};
    use common::test_utils::{create_mock_foreign_devices, create_mock_iphone};

    fn backend_with_foreign() -> SimulatedBackend {
        let backend = SimulatedBackend::new();
        for device in create_mock_foreign_devices() {
            backend.attach(SimulatedDevice::passive(device));
        }
        backend
    }

    #[test]
    fn test_scan_lists_all_readable_devices() {
        let backend = backend_with_foreign();
        backend.attach(SimulatedDevice::phone(create_mock_iphone(7)));

        let enumerator = DeviceEnumerator::new(DeviceMatcher::default());
        let devices = enumerator.scan(&backend).unwrap();

        assert_eq!(devices.len(), 4);
        assert_eq!(enumerator.supported(&devices), vec![create_mock_iphone(7)]);
    }

    #[test]
    fn test_unreadable_descriptor_skipped() {
        let backend = backend_with_foreign();
        backend.attach(SimulatedDevice::phone(create_mock_iphone(7)).unreadable());

        let enumerator = DeviceEnumerator::new(DeviceMatcher::default());
        let devices = enumerator.scan(&backend).unwrap();

        assert_eq!(devices.len(), 3);
        assert!(enumerator.supported(&devices).is_empty());
    }

    #[test]
    fn test_registry_unavailable() {
        let backend = backend_with_foreign();
        backend.set_registry_available(false);

        let enumerator = DeviceEnumerator::new(DeviceMatcher::default());
        assert!(matches!(
            enumerator.scan(&backend),
            Err(EnumerationError::RegistryUnavailable(_))
        ));
    }

    #[test]
    fn test_classify_flags_supported() {
        let backend = backend_with_foreign();
        backend.attach(SimulatedDevice::phone(create_mock_iphone(7)));

        let enumerator = DeviceEnumerator::new(DeviceMatcher::default());
        let devices = enumerator.scan(&backend).unwrap();
        let scanned = enumerator.classify(&devices);

        assert_eq!(scanned.len(), 4);
        assert_eq!(scanned.iter().filter(|d| d.supported).count(), 1);
    }
}
