//! Hardware capability seam
//!
//! Everything above this module talks to the bus through [`UsbBackend`] and
//! [`OpenDevice`]. Two implementations exist: [`super::RusbBackend`] for real
//! hardware and [`super::SimulatedBackend`] for tests and `--simulate`.

use protocol::{DeviceDescriptor, EnumerationError, NegotiationError};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single hardware step below the negotiation pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("Device not found")]
    NotFound,

    #[error("Device disconnected")]
    NoDevice,

    #[error("Resource busy")]
    Busy,

    #[error("Access denied")]
    Access,

    #[error("Operation timed out")]
    Timeout,

    #[error("Pipe error (endpoint stalled)")]
    Pipe,

    #[error("{0}")]
    Other(String),
}

/// USB transfer type of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint of an opened interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub kind: TransferKind,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    pub fn bulk(address: u8) -> Self {
        Self {
            address,
            kind: TransferKind::Bulk,
            max_packet_size: 512,
        }
    }

    /// Host-to-device endpoints have bit 7 of the address clear
    pub fn is_out(&self) -> bool {
        self.address & 0x80 == 0
    }
}

/// Access to the USB registry
pub trait UsbBackend: Send {
    /// Every attached device
    ///
    /// Outer error: the registry itself is unreachable. Inner errors: one
    /// device's descriptor could not be read; callers skip those entries.
    fn list_devices(
        &self,
    ) -> Result<Vec<Result<DeviceDescriptor, EnumerationError>>, EnumerationError>;

    /// Locate the device, obtain its interface and open it exclusively
    fn open_device(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Box<dyn OpenDevice>, NegotiationError>;
}

/// A device held open by this process
///
/// Configurations are addressed by index (0-based), interfaces by number.
/// `close` must be idempotent; implementations also release on drop.
pub trait OpenDevice: Send {
    fn num_configurations(&self) -> u8;

    fn set_configuration(&mut self, config_index: u8) -> Result<(), HardwareError>;

    fn interface_numbers(&self, config_index: u8) -> Result<Vec<u8>, HardwareError>;

    /// Claim an interface and list its endpoints
    fn open_interface(
        &mut self,
        config_index: u8,
        interface: u8,
    ) -> Result<Vec<EndpointInfo>, HardwareError>;

    fn close_interface(&mut self, interface: u8);

    /// Write `data` to `endpoint`, returning the number of bytes accepted
    fn write(
        &mut self,
        endpoint: &EndpointInfo,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HardwareError>;

    fn close(&mut self);
}
