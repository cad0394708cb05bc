//! Endpoint negotiation
//!
//! Walks a device's configurations and interfaces until one exposes an OUT
//! endpoint. Failures of individual configurations or interfaces are
//! skipped; only a failure to open the device at all, or an exhaustive walk
//! with nothing usable, is reported. An exhaustive walk where every
//! interface was busy reports `DeviceBusy` rather than `NoEndpointFound`.
//!
//! The resulting [`EndpointHandle`] owns the open device and the claimed
//! interface. Closing releases the interface before the device.

use super::backend::{EndpointInfo, HardwareError, OpenDevice, UsbBackend};
use protocol::{DeviceDescriptor, NegotiationError};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Exclusive session on one OUT endpoint
pub struct EndpointHandle {
    device: Box<dyn OpenDevice>,
    descriptor: DeviceDescriptor,
    configuration: u8,
    interface: u8,
    endpoint: EndpointInfo,
    closed: bool,
}

impl EndpointHandle {
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn endpoint(&self) -> &EndpointInfo {
        &self.endpoint
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, HardwareError> {
        if self.closed {
            return Err(HardwareError::NoDevice);
        }
        self.device.write(&self.endpoint, data, timeout)
    }

    /// Release the interface, then the device; idempotent
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.device.close_interface(self.interface);
        self.device.close();
        self.closed = true;
        debug!("Released endpoint {:#04x} on {}", self.endpoint.address, self.descriptor);
    }
}

impl Drop for EndpointHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run the negotiation pipeline against one device
pub fn negotiate(
    backend: &dyn UsbBackend,
    descriptor: &DeviceDescriptor,
) -> Result<EndpointHandle, NegotiationError> {
    let mut device = backend.open_device(descriptor)?;

    match find_out_endpoint(device.as_mut()) {
        Ok((configuration, interface, endpoint)) => {
            info!(
                "Negotiated endpoint {:#04x} (config {}, interface {}) on {}",
                endpoint.address, configuration, interface, descriptor
            );
            Ok(EndpointHandle {
                device,
                descriptor: descriptor.clone(),
                configuration,
                interface,
                endpoint,
                closed: false,
            })
        }
        Err(e) => {
            device.close();
            Err(e)
        }
    }
}

fn find_out_endpoint(device: &mut dyn OpenDevice) -> Result<(u8, u8, EndpointInfo), NegotiationError> {
    let mut attempts = 0usize;
    let mut busy = 0usize;

    for config in 0..device.num_configurations() {
        if let Err(e) = device.set_configuration(config) {
            debug!("Skipping configuration {}: {}", config, e);
            continue;
        }

        let interfaces = match device.interface_numbers(config) {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!("Skipping configuration {}: {}", config, e);
                continue;
            }
        };

        for interface in interfaces {
            attempts += 1;
            let endpoints = match device.open_interface(config, interface) {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    if e == HardwareError::Busy {
                        busy += 1;
                    }
                    debug!("Skipping interface {}: {}", interface, e);
                    continue;
                }
            };

            if let Some(endpoint) = endpoints.into_iter().find(EndpointInfo::is_out) {
                return Ok((config, interface, endpoint));
            }

            trace!("Interface {} has no OUT endpoint", interface);
            device.close_interface(interface);
        }
    }

    if attempts > 0 && busy == attempts {
        Err(NegotiationError::DeviceBusy)
    } else {
        Err(NegotiationError::NoEndpointFound)
    }
}

/// Holds at most one negotiated session
#[derive(Default)]
pub struct InterfaceNegotiator {
    session: Option<EndpointHandle>,
}

impl InterfaceNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for `descriptor`, negotiating one if none is held
    ///
    /// A session held for a different device is released first.
    pub fn open(
        &mut self,
        backend: &dyn UsbBackend,
        descriptor: &DeviceDescriptor,
    ) -> Result<&mut EndpointHandle, NegotiationError> {
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.is_closed() || s.descriptor() != descriptor)
        {
            self.close();
        }

        if self.session.is_none() {
            self.session = Some(negotiate(backend, descriptor)?);
        }

        self.session.as_mut().ok_or(NegotiationError::NoEndpointFound)
    }

    pub fn session(&self) -> Option<&EndpointHandle> {
        self.session.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Release the held session, if any; idempotent
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}
