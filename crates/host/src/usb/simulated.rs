//! In-memory USB backend
//!
//! Devices can be attached, detached and made to misbehave at runtime. The
//! backend is cheaply cloneable; clones share the same simulated bus, so a
//! test keeps one clone to drive the bus while the worker owns another.

use super::backend::{EndpointInfo, HardwareError, OpenDevice, UsbBackend};
use protocol::{DeviceDescriptor, EnumerationError, NegotiationError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SimInterface {
    pub number: u8,
    pub openable: bool,
    /// Claimed by another process; opening fails with `Busy`
    pub held_elsewhere: bool,
    pub endpoints: Vec<EndpointInfo>,
}

impl SimInterface {
    pub fn new(number: u8, endpoints: Vec<EndpointInfo>) -> Self {
        Self {
            number,
            openable: true,
            held_elsewhere: false,
            endpoints,
        }
    }

    pub fn unopenable(mut self) -> Self {
        self.openable = false;
        self
    }

    pub fn held_elsewhere(mut self) -> Self {
        self.held_elsewhere = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SimConfiguration {
    pub settable: bool,
    pub interfaces: Vec<SimInterface>,
}

impl SimConfiguration {
    pub fn new(interfaces: Vec<SimInterface>) -> Self {
        Self {
            settable: true,
            interfaces,
        }
    }

    pub fn unsettable(mut self) -> Self {
        self.settable = false;
        self
    }
}

/// A device on the simulated bus
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub descriptor: DeviceDescriptor,
    /// When false, enumeration reports the descriptor as unreadable
    pub readable: bool,
    pub open_error: Option<NegotiationError>,
    pub configurations: Vec<SimConfiguration>,
    pub fail_writes: bool,
}

impl SimulatedDevice {
    /// One configuration, interface 0 with bulk IN 0x81 and bulk OUT 0x02
    pub fn phone(descriptor: DeviceDescriptor) -> Self {
        Self::with_topology(
            descriptor,
            vec![SimConfiguration::new(vec![SimInterface::new(
                0,
                vec![EndpointInfo::bulk(0x81), EndpointInfo::bulk(0x02)],
            )])],
        )
    }

    /// A device exposing only an IN endpoint
    pub fn passive(descriptor: DeviceDescriptor) -> Self {
        Self::with_topology(
            descriptor,
            vec![SimConfiguration::new(vec![SimInterface::new(
                0,
                vec![EndpointInfo::bulk(0x81)],
            )])],
        )
    }

    pub fn with_topology(descriptor: DeviceDescriptor, configurations: Vec<SimConfiguration>) -> Self {
        Self {
            descriptor,
            readable: true,
            open_error: None,
            configurations,
            fail_writes: false,
        }
    }

    pub fn unreadable(mut self) -> Self {
        self.readable = false;
        self
    }

    pub fn with_open_error(mut self, error: NegotiationError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

/// One accepted write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub descriptor: DeviceDescriptor,
    pub endpoint: u8,
    pub data: Vec<u8>,
}

struct SimState {
    registry_available: bool,
    devices: Vec<SimulatedDevice>,
    open: HashSet<DeviceDescriptor>,
    claimed: HashSet<(DeviceDescriptor, u8)>,
    writes: Vec<RecordedWrite>,
}

impl SimState {
    fn device(&self, descriptor: &DeviceDescriptor) -> Option<&SimulatedDevice> {
        self.devices.iter().find(|d| &d.descriptor == descriptor)
    }
}

#[derive(Clone)]
pub struct SimulatedBackend {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    /// Empty bus with a reachable registry
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                registry_available: true,
                devices: Vec::new(),
                open: HashSet::new(),
                claimed: HashSet::new(),
                writes: Vec::new(),
            })),
        }
    }

    pub fn with_devices(devices: impl IntoIterator<Item = SimulatedDevice>) -> Self {
        let backend = Self::new();
        for device in devices {
            backend.attach(device);
        }
        backend
    }

    /// Plug a device in, replacing any device with the same descriptor
    pub fn attach(&self, device: SimulatedDevice) {
        let mut state = self.lock();
        state.devices.retain(|d| d.descriptor != device.descriptor);
        debug!("Simulated attach: {}", device.descriptor);
        state.devices.push(device);
    }

    /// Unplug a device; returns whether it was attached
    pub fn detach(&self, descriptor: &DeviceDescriptor) -> bool {
        let mut state = self.lock();
        let before = state.devices.len();
        state.devices.retain(|d| &d.descriptor != descriptor);
        debug!("Simulated detach: {}", descriptor);
        state.devices.len() != before
    }

    pub fn detach_all(&self) {
        self.lock().devices.clear();
    }

    pub fn set_registry_available(&self, available: bool) {
        self.lock().registry_available = available;
    }

    pub fn set_write_failure(&self, descriptor: &DeviceDescriptor, fail: bool) {
        let mut state = self.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| &d.descriptor == descriptor) {
            device.fail_writes = fail;
        }
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    /// Devices currently held open by a session
    pub fn open_device_count(&self) -> usize {
        self.lock().open.len()
    }

    pub fn claimed_interface_count(&self) -> usize {
        self.lock().claimed.len()
    }

    pub fn is_open(&self, descriptor: &DeviceDescriptor) -> bool {
        self.lock().open.contains(descriptor)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl UsbBackend for SimulatedBackend {
    fn list_devices(
        &self,
    ) -> Result<Vec<Result<DeviceDescriptor, EnumerationError>>, EnumerationError> {
        let state = self.lock();
        if !state.registry_available {
            return Err(EnumerationError::RegistryUnavailable(
                "simulated registry offline".to_string(),
            ));
        }

        Ok(state
            .devices
            .iter()
            .map(|d| {
                if d.readable {
                    Ok(d.descriptor.clone())
                } else {
                    Err(EnumerationError::DescriptorUnreadable {
                        bus_number: d.descriptor.bus_number,
                        address: d.descriptor.address,
                        reason: "simulated read failure".to_string(),
                    })
                }
            })
            .collect())
    }

    fn open_device(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Box<dyn OpenDevice>, NegotiationError> {
        let mut state = self.lock();

        let device = state
            .device(descriptor)
            .ok_or(NegotiationError::PlugInUnavailable)?;
        if let Some(e) = &device.open_error {
            return Err(e.clone());
        }
        let configurations = device.configurations.clone();

        if !state.open.insert(descriptor.clone()) {
            return Err(NegotiationError::DeviceBusy);
        }

        Ok(Box::new(SimOpenDevice {
            state: self.state.clone(),
            descriptor: descriptor.clone(),
            configurations,
            claimed: Vec::new(),
            closed: false,
        }))
    }
}

struct SimOpenDevice {
    state: Arc<Mutex<SimState>>,
    descriptor: DeviceDescriptor,
    configurations: Vec<SimConfiguration>,
    claimed: Vec<u8>,
    closed: bool,
}

impl SimOpenDevice {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn configuration(&self, index: u8) -> Result<&SimConfiguration, HardwareError> {
        self.configurations
            .get(index as usize)
            .ok_or(HardwareError::NotFound)
    }
}

impl OpenDevice for SimOpenDevice {
    fn num_configurations(&self) -> u8 {
        self.configurations.len() as u8
    }

    fn set_configuration(&mut self, config_index: u8) -> Result<(), HardwareError> {
        if self.configuration(config_index)?.settable {
            Ok(())
        } else {
            Err(HardwareError::Busy)
        }
    }

    fn interface_numbers(&self, config_index: u8) -> Result<Vec<u8>, HardwareError> {
        Ok(self
            .configuration(config_index)?
            .interfaces
            .iter()
            .map(|i| i.number)
            .collect())
    }

    fn open_interface(
        &mut self,
        config_index: u8,
        interface: u8,
    ) -> Result<Vec<EndpointInfo>, HardwareError> {
        let found = self
            .configuration(config_index)?
            .interfaces
            .iter()
            .find(|i| i.number == interface)
            .cloned()
            .ok_or(HardwareError::NotFound)?;
        if !found.openable {
            return Err(HardwareError::Access);
        }
        if found.held_elsewhere {
            return Err(HardwareError::Busy);
        }

        let key = (self.descriptor.clone(), interface);
        self.lock().claimed.insert(key);
        self.claimed.push(interface);
        Ok(found.endpoints)
    }

    fn close_interface(&mut self, interface: u8) {
        if let Some(pos) = self.claimed.iter().position(|&i| i == interface) {
            self.claimed.remove(pos);
            let key = (self.descriptor.clone(), interface);
            self.lock().claimed.remove(&key);
        }
    }

    fn write(
        &mut self,
        endpoint: &EndpointInfo,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, HardwareError> {
        let mut state = self.lock();
        let device = state
            .device(&self.descriptor)
            .ok_or(HardwareError::NoDevice)?;
        if device.fail_writes {
            return Err(HardwareError::Pipe);
        }

        state.writes.push(RecordedWrite {
            descriptor: self.descriptor.clone(),
            endpoint: endpoint.address,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        for interface in std::mem::take(&mut self.claimed) {
            let key = (self.descriptor.clone(), interface);
            self.lock().claimed.remove(&key);
        }
        let descriptor = self.descriptor.clone();
        self.lock().open.remove(&descriptor);
        self.closed = true;
    }
}

impl Drop for SimOpenDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::create_mock_iphone;

    #[test]
    fn test_second_open_is_busy() {
        let phone = create_mock_iphone(5);
        let backend = SimulatedBackend::with_devices([SimulatedDevice::phone(phone.clone())]);

        let first = backend.open_device(&phone).unwrap();
        assert!(matches!(
            backend.open_device(&phone),
            Err(NegotiationError::DeviceBusy)
        ));

        drop(first);
        assert!(backend.open_device(&phone).is_ok());
    }

    #[test]
    fn test_close_releases_claims() {
        let phone = create_mock_iphone(5);
        let backend = SimulatedBackend::with_devices([SimulatedDevice::phone(phone.clone())]);

        let mut device = backend.open_device(&phone).unwrap();
        device.open_interface(0, 0).unwrap();
        assert_eq!(backend.claimed_interface_count(), 1);
        assert!(backend.is_open(&phone));

        device.close();
        device.close();
        assert_eq!(backend.claimed_interface_count(), 0);
        assert_eq!(backend.open_device_count(), 0);
    }

    #[test]
    fn test_write_after_detach_fails() {
        let phone = create_mock_iphone(5);
        let backend = SimulatedBackend::with_devices([SimulatedDevice::phone(phone.clone())]);

        let mut device = backend.open_device(&phone).unwrap();
        let endpoint = EndpointInfo::bulk(0x02);
        assert_eq!(device.write(&endpoint, &[1, 2, 3], Duration::from_millis(10)), Ok(3));

        backend.detach(&phone);
        assert_eq!(
            device.write(&endpoint, &[1, 2, 3], Duration::from_millis(10)),
            Err(HardwareError::NoDevice)
        );
        assert_eq!(backend.writes().len(), 1);
    }
}
