//! Protocol library for gps-usb-host
//!
//! This crate defines the location-update wire packet sent to an attached
//! mobile device, the location sample it carries, and the domain types shared
//! between the host crates (connection state, device descriptors and the
//! error taxonomy of the USB layer).
//!
//! # Example
//!
//! ```
//! use protocol::{LocationSample, decode_packet, encode_packet, PACKET_SIZE};
//! use std::time::{Duration, UNIX_EPOCH};
//!
//! let sample = LocationSample::new(
//!     37.7749,
//!     -122.4194,
//!     10.0,
//!     UNIX_EPOCH + Duration::from_millis(1_700_000_000_000),
//! );
//! assert!(sample.is_valid());
//!
//! let packet = encode_packet(&sample);
//! assert_eq!(packet.len(), PACKET_SIZE);
//!
//! let decoded = decode_packet(&packet).unwrap();
//! assert_eq!(decoded, sample);
//! ```

pub mod error;
pub mod location;
pub mod packet;
pub mod types;

pub use error::{DecodeError, LocationError};
pub use location::LocationSample;
pub use packet::{
    CMD_LOCATION_UPDATE, PACKET_MAGIC, PACKET_SIZE, PAYLOAD_LENGTH, WirePacket, checksum,
    decode_packet, encode_packet,
};
pub use types::{
    ConnectionState, DeviceDescriptor, EnumerationError, NegotiationError, WriteError,
};
