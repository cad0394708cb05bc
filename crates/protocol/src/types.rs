//! Device and connection type definitions
//!
//! This module defines the types shared by the host crates: the connection
//! state published to subscribers, the descriptor snapshot read from each
//! attached device, and the error conditions of the USB layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Connection state published to subscribers
///
/// Exactly one value is live at a time. The state machine in the host crate
/// is the only writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No supported device present
    #[default]
    Disconnected,
    /// A supported device was present in the last scan
    Connected,
    /// A negotiation or write failure was surfaced
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error(_))
    }

    /// User-facing one-line description
    pub fn status_message(&self) -> String {
        match self {
            ConnectionState::Connected => "Connected to USB device".to_string(),
            ConnectionState::Disconnected => "No device connected".to_string(),
            ConnectionState::Error(message) => format!("Connection error: {}", message),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status_message())
    }
}

/// Snapshot of an attached device's identifying properties
///
/// Read from hardware on every scan and never persisted. `bus_number` and
/// `address` locate the physical device for negotiation; they are 0 when
/// the source does not report a location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Product string (if readable)
    pub display_name: Option<String>,
    /// Bus number
    #[serde(default)]
    pub bus_number: u8,
    /// Device address on the bus
    #[serde(default)]
    pub address: u8,
}

impl DeviceDescriptor {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            display_name: None,
            bus_number: 0,
            address: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn at(mut self, bus_number: u8, address: u8) -> Self {
        self.bus_number = bus_number;
        self.address = address;
        self
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} bus {:03} addr {:03}",
            self.vendor_id, self.product_id, self.bus_number, self.address
        )?;
        if let Some(name) = &self.display_name {
            write!(f, " \"{}\"", name)?;
        }
        Ok(())
    }
}

/// Device enumeration error
///
/// Per-device failures are skipped by the enumerator; only a failure to
/// list the bus at all reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnumerationError {
    /// The host USB registry could not be queried
    #[error("USB registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// A single device's descriptor could not be read
    #[error("Unreadable device at bus {bus_number} addr {address}: {reason}")]
    DescriptorUnreadable {
        bus_number: u8,
        address: u8,
        reason: String,
    },
}

/// Device negotiation error
///
/// Recoverable at the session level: the caller may retry `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// The host refused to create a user client for the device
    #[error("USB plug-in interface unavailable")]
    PlugInUnavailable,
    /// The device interface could not be obtained
    #[error("USB device interface unavailable")]
    DeviceInterfaceUnavailable,
    /// Another owner holds the device open
    #[error("USB device is busy")]
    DeviceBusy,
    /// No configuration/interface combination exposed an OUT endpoint
    #[error("No OUT endpoint found on device")]
    NoEndpointFound,
}

/// Endpoint write error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The pipe write did not signal success
    #[error("Pipe write to endpoint {endpoint:#04x} failed: {reason}")]
    PipeWriteFailed { endpoint: u8, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_messages() {
        assert_eq!(
            ConnectionState::Connected.status_message(),
            "Connected to USB device"
        );
        assert_eq!(
            ConnectionState::Disconnected.status_message(),
            "No device connected"
        );
        assert_eq!(
            ConnectionState::Error("USB Communication Error".into()).status_message(),
            "Connection error: USB Communication Error"
        );
    }

    #[test]
    fn test_default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::default().is_connected());
    }

    #[test]
    fn test_descriptor_builders() {
        let d = DeviceDescriptor::new(0x05ac, 0x12a8).with_name("iPhone").at(1, 7);
        assert_eq!(d.vendor_id, 0x05ac);
        assert_eq!(d.display_name.as_deref(), Some("iPhone"));
        assert_eq!((d.bus_number, d.address), (1, 7));
        assert_eq!(format!("{}", d), "05ac:12a8 bus 001 addr 007 \"iPhone\"");
    }

    #[test]
    fn test_write_error_display() {
        let err = WriteError::PipeWriteFailed {
            endpoint: 0x02,
            reason: "Pipe error".into(),
        };
        assert_eq!(
            format!("{}", err),
            "Pipe write to endpoint 0x02 failed: Pipe error"
        );
    }
}
