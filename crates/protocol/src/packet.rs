//! Location-update packet codec
//!
//! # Packet Format
//!
//! Fixed 39 bytes, all multi-byte fields big-endian:
//! ```text
//! [Magic: FF AA 55 BB][Command: 0x01][PayloadLength: 32]
//! [Latitude: f64 bits][Longitude: f64 bits][Altitude: f64 bits]
//! [Timestamp: u64 ms since epoch][Checksum: XOR of bytes 0..38]
//! ```
//!
//! `PayloadLength` is a documented constant covering the four 8-byte
//! payload fields only. It is never computed from the payload; a layout
//! change that breaks it fails to compile.

use crate::{error::DecodeError, location::LocationSample};
use byteorder::{BigEndian, ByteOrder};
use std::time::{Duration, UNIX_EPOCH};

/// Leading magic bytes of every packet
pub const PACKET_MAGIC: [u8; 4] = [0xFF, 0xAA, 0x55, 0xBB];

/// Command byte for a location update
pub const CMD_LOCATION_UPDATE: u8 = 0x01;

/// Declared payload length (three doubles and the timestamp)
pub const PAYLOAD_LENGTH: u8 = 32;

/// Total encoded packet size
pub const PACKET_SIZE: usize = 39;

const HEADER_SIZE: usize = 6;
const LATITUDE_OFFSET: usize = HEADER_SIZE;
const LONGITUDE_OFFSET: usize = LATITUDE_OFFSET + 8;
const ALTITUDE_OFFSET: usize = LONGITUDE_OFFSET + 8;
const TIMESTAMP_OFFSET: usize = ALTITUDE_OFFSET + 8;
const CHECKSUM_OFFSET: usize = TIMESTAMP_OFFSET + 8;

const _: () = assert!(CHECKSUM_OFFSET - HEADER_SIZE == PAYLOAD_LENGTH as usize);
const _: () = assert!(CHECKSUM_OFFSET + 1 == PACKET_SIZE);

/// One encoded location packet
pub type WirePacket = [u8; PACKET_SIZE];

/// XOR of all bytes
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Encode a sample into its wire packet
///
/// Deterministic and total: ranges are not checked here, callers validate
/// the sample first.
///
/// # Example
/// ```
/// use protocol::{LocationSample, encode_packet, PACKET_MAGIC};
/// use std::time::UNIX_EPOCH;
///
/// let packet = encode_packet(&LocationSample::new(1.0, 2.0, 3.0, UNIX_EPOCH));
/// assert_eq!(&packet[..4], &PACKET_MAGIC);
/// assert_eq!(packet[5], 32);
/// ```
pub fn encode_packet(sample: &LocationSample) -> WirePacket {
    let mut packet = [0u8; PACKET_SIZE];

    packet[..4].copy_from_slice(&PACKET_MAGIC);
    packet[4] = CMD_LOCATION_UPDATE;
    packet[5] = PAYLOAD_LENGTH;

    BigEndian::write_f64(&mut packet[LATITUDE_OFFSET..LONGITUDE_OFFSET], sample.latitude);
    BigEndian::write_f64(&mut packet[LONGITUDE_OFFSET..ALTITUDE_OFFSET], sample.longitude);
    BigEndian::write_f64(&mut packet[ALTITUDE_OFFSET..TIMESTAMP_OFFSET], sample.altitude);
    BigEndian::write_u64(
        &mut packet[TIMESTAMP_OFFSET..CHECKSUM_OFFSET],
        sample.timestamp_millis(),
    );

    packet[CHECKSUM_OFFSET] = checksum(&packet[..CHECKSUM_OFFSET]);
    packet
}

/// Decode and verify a wire packet
///
/// The checksum is verified before any header field, so a corrupted byte
/// anywhere before the checksum reports [`DecodeError::BadChecksum`].
pub fn decode_packet(bytes: &[u8]) -> Result<LocationSample, DecodeError> {
    if bytes.len() != PACKET_SIZE {
        return Err(DecodeError::BadLength {
            expected: PACKET_SIZE,
            actual: bytes.len(),
        });
    }

    let computed = checksum(&bytes[..CHECKSUM_OFFSET]);
    if computed != bytes[CHECKSUM_OFFSET] {
        return Err(DecodeError::BadChecksum {
            expected: bytes[CHECKSUM_OFFSET],
            computed,
        });
    }

    if bytes[..4] != PACKET_MAGIC {
        return Err(DecodeError::BadMagic {
            found: [bytes[0], bytes[1], bytes[2], bytes[3]],
        });
    }

    if bytes[4] != CMD_LOCATION_UPDATE {
        return Err(DecodeError::BadCommand(bytes[4]));
    }

    if bytes[5] != PAYLOAD_LENGTH {
        return Err(DecodeError::BadLength {
            expected: PAYLOAD_LENGTH as usize,
            actual: bytes[5] as usize,
        });
    }

    let millis = BigEndian::read_u64(&bytes[TIMESTAMP_OFFSET..CHECKSUM_OFFSET]);

    Ok(LocationSample {
        latitude: BigEndian::read_f64(&bytes[LATITUDE_OFFSET..LONGITUDE_OFFSET]),
        longitude: BigEndian::read_f64(&bytes[LONGITUDE_OFFSET..ALTITUDE_OFFSET]),
        altitude: BigEndian::read_f64(&bytes[ALTITUDE_OFFSET..TIMESTAMP_OFFSET]),
        timestamp: UNIX_EPOCH + Duration::from_millis(millis),
    })
}
