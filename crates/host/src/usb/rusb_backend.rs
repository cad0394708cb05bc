//! libusb-backed hardware access
//!
//! Product strings are read during enumeration only for devices whose name
//! can affect matching (see [`name_affects_match`]).
//!
//! Error mapping: `open()` failures become [`NegotiationError`]s directly.
//! A device held by another process usually opens fine and then fails
//! `claim_interface` with `Busy`; negotiation reports `DeviceBusy` when
//! every interface it tried failed that way.

use super::backend::{EndpointInfo, HardwareError, OpenDevice, TransferKind, UsbBackend};
use super::matcher::name_affects_match;
use protocol::{DeviceDescriptor, EnumerationError, NegotiationError};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for string descriptor reads during enumeration
const STRING_READ_TIMEOUT: Duration = Duration::from_millis(200);

pub fn map_rusb_error(err: rusb::Error) -> HardwareError {
    match err {
        rusb::Error::NotFound => HardwareError::NotFound,
        rusb::Error::NoDevice => HardwareError::NoDevice,
        rusb::Error::Busy => HardwareError::Busy,
        rusb::Error::Access => HardwareError::Access,
        rusb::Error::Timeout => HardwareError::Timeout,
        rusb::Error::Pipe => HardwareError::Pipe,
        _ => HardwareError::Other(err.to_string()),
    }
}

fn map_open_error(err: rusb::Error) -> NegotiationError {
    match err {
        rusb::Error::Busy => NegotiationError::DeviceBusy,
        rusb::Error::NotFound | rusb::Error::NoDevice => {
            NegotiationError::DeviceInterfaceUnavailable
        }
        _ => NegotiationError::PlugInUnavailable,
    }
}

fn map_transfer_type(kind: rusb::TransferType) -> TransferKind {
    match kind {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}

/// Real USB bus through libusb
pub struct RusbBackend {
    context: Context,
}

impl RusbBackend {
    pub fn new() -> Result<Self, rusb::Error> {
        Ok(Self {
            context: Context::new()?,
        })
    }

    fn find_device(&self, descriptor: &DeviceDescriptor) -> Result<Device<Context>, NegotiationError> {
        let devices = self.context.devices().map_err(|e| {
            warn!("Failed to list USB devices: {}", e);
            NegotiationError::PlugInUnavailable
        })?;

        devices
            .iter()
            .find(|device| {
                device.bus_number() == descriptor.bus_number
                    && device.address() == descriptor.address
                    && device.device_descriptor().is_ok_and(|d| {
                        d.vendor_id() == descriptor.vendor_id
                            && d.product_id() == descriptor.product_id
                    })
            })
            .ok_or(NegotiationError::PlugInUnavailable)
    }
}

impl UsbBackend for RusbBackend {
    fn list_devices(
        &self,
    ) -> Result<Vec<Result<DeviceDescriptor, EnumerationError>>, EnumerationError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| EnumerationError::RegistryUnavailable(e.to_string()))?;

        Ok(devices.iter().map(|device| read_descriptor(&device)).collect())
    }

    fn open_device(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Box<dyn OpenDevice>, NegotiationError> {
        let device = self.find_device(descriptor)?;

        let device_descriptor = device.device_descriptor().map_err(|e| {
            warn!("Failed to read device descriptor of {}: {}", descriptor, e);
            NegotiationError::DeviceInterfaceUnavailable
        })?;

        let handle = device.open().map_err(|e| {
            warn!("Failed to open {}: {}", descriptor, e);
            map_open_error(e)
        })?;

        debug!("Opened {}", descriptor);

        Ok(Box::new(RusbDevice {
            num_configurations: device_descriptor.num_configurations(),
            device,
            handle,
            claimed: Vec::new(),
            detached: Vec::new(),
            closed: false,
        }))
    }
}

/// Build a descriptor; the product string is best-effort and gated
fn read_descriptor(device: &Device<Context>) -> Result<DeviceDescriptor, EnumerationError> {
    let bus_number = device.bus_number();
    let address = device.address();

    let raw = device
        .device_descriptor()
        .map_err(|e| EnumerationError::DescriptorUnreadable {
            bus_number,
            address,
            reason: e.to_string(),
        })?;

    let wants_name = name_affects_match(raw.vendor_id());
    let name = raw.product_string_index().filter(|_| wants_name).and_then(|_| {
        let handle = device.open().ok()?;
        let language = *handle.read_languages(STRING_READ_TIMEOUT).ok()?.first()?;
        handle
            .read_product_string(language, &raw, STRING_READ_TIMEOUT)
            .ok()
    });

    let descriptor = DeviceDescriptor::new(raw.vendor_id(), raw.product_id()).at(bus_number, address);
    Ok(match name {
        Some(name) if !name.trim().is_empty() => descriptor.with_name(name.trim()),
        _ => descriptor,
    })
}

struct RusbDevice {
    device: Device<Context>,
    handle: DeviceHandle<Context>,
    num_configurations: u8,
    claimed: Vec<u8>,
    /// Interfaces whose kernel driver we detached
    detached: Vec<u8>,
    closed: bool,
}

impl RusbDevice {
    fn release(&mut self, interface: u8) {
        if let Err(e) = self.handle.release_interface(interface) {
            debug!("Failed to release interface {}: {}", interface, e);
        }
        if let Some(pos) = self.detached.iter().position(|&i| i == interface) {
            self.detached.remove(pos);
            if let Err(e) = self.handle.attach_kernel_driver(interface) {
                debug!("Failed to reattach kernel driver on interface {}: {}", interface, e);
            }
        }
    }
}

impl OpenDevice for RusbDevice {
    fn num_configurations(&self) -> u8 {
        self.num_configurations
    }

    fn set_configuration(&mut self, config_index: u8) -> Result<(), HardwareError> {
        let config = self
            .device
            .config_descriptor(config_index)
            .map_err(map_rusb_error)?;

        if self.handle.active_configuration().ok() == Some(config.number()) {
            return Ok(());
        }

        self.handle
            .set_active_configuration(config.number())
            .map_err(map_rusb_error)
    }

    fn interface_numbers(&self, config_index: u8) -> Result<Vec<u8>, HardwareError> {
        let config = self
            .device
            .config_descriptor(config_index)
            .map_err(map_rusb_error)?;
        Ok(config.interfaces().map(|i| i.number()).collect())
    }

    fn open_interface(
        &mut self,
        config_index: u8,
        interface: u8,
    ) -> Result<Vec<EndpointInfo>, HardwareError> {
        let config = self
            .device
            .config_descriptor(config_index)
            .map_err(map_rusb_error)?;

        let setting = config
            .interfaces()
            .find(|i| i.number() == interface)
            .and_then(|i| i.descriptors().next())
            .ok_or(HardwareError::NotFound)?;

        let endpoints: Vec<EndpointInfo> = setting
            .endpoint_descriptors()
            .map(|ep| EndpointInfo {
                address: ep.address(),
                kind: map_transfer_type(ep.transfer_type()),
                max_packet_size: ep.max_packet_size(),
            })
            .collect();

        if let Ok(true) = self.handle.kernel_driver_active(interface) {
            match self.handle.detach_kernel_driver(interface) {
                Ok(()) => self.detached.push(interface),
                Err(e) => warn!("Failed to detach kernel driver on interface {}: {}", interface, e),
            }
        }

        if let Err(e) = self.handle.claim_interface(interface) {
            if let Some(pos) = self.detached.iter().position(|&i| i == interface) {
                self.detached.remove(pos);
                let _ = self.handle.attach_kernel_driver(interface);
            }
            return Err(map_rusb_error(e));
        }

        self.claimed.push(interface);
        Ok(endpoints)
    }

    fn close_interface(&mut self, interface: u8) {
        if let Some(pos) = self.claimed.iter().position(|&i| i == interface) {
            self.claimed.remove(pos);
            self.release(interface);
        }
    }

    fn write(
        &mut self,
        endpoint: &EndpointInfo,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HardwareError> {
        let result = match endpoint.kind {
            TransferKind::Interrupt => self.handle.write_interrupt(endpoint.address, data, timeout),
            _ => self.handle.write_bulk(endpoint.address, data, timeout),
        };
        result.map_err(map_rusb_error)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        for interface in std::mem::take(&mut self.claimed) {
            self.release(interface);
        }
        self.closed = true;
    }
}

impl Drop for RusbDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), HardwareError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), HardwareError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), HardwareError::NoDevice);
        assert!(matches!(
            map_rusb_error(rusb::Error::Overflow),
            HardwareError::Other(_)
        ));
    }

    #[test]
    fn test_map_open_error() {
        assert_eq!(map_open_error(rusb::Error::Busy), NegotiationError::DeviceBusy);
        assert_eq!(
            map_open_error(rusb::Error::NoDevice),
            NegotiationError::DeviceInterfaceUnavailable
        );
        assert_eq!(
            map_open_error(rusb::Error::Access),
            NegotiationError::PlugInUnavailable
        );
    }

    #[test]
    fn test_backend_creation() {
        // Context creation needs libusb; without it we only check it fails cleanly
        match RusbBackend::new() {
            Ok(backend) => {
                let _ = backend.list_devices();
            }
            Err(e) => eprintln!("libusb unavailable (expected in sandboxes): {}", e),
        }
    }
}
