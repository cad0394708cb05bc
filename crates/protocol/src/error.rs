//! Protocol error types

use thiserror::Error;

/// Errors produced while decoding a location packet
///
/// Only the verification path decodes packets; the live send path is
/// encode-only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Leading magic bytes are not `FF AA 55 BB`
    #[error("Bad magic: {found:02x?}")]
    BadMagic { found: [u8; 4] },

    /// Command byte is not a location update
    #[error("Unknown command byte: {0:#04x}")]
    BadCommand(u8),

    /// Packet size or declared payload length does not match the fixed layout
    #[error("Bad length: expected {expected}, got {actual}")]
    BadLength { expected: usize, actual: usize },

    /// Trailing XOR checksum does not match the packet contents
    #[error("Bad checksum: packet carries {expected:#04x}, computed {computed:#04x}")]
    BadChecksum { expected: u8, computed: u8 },
}

/// Caller-level validation failure for a location sample
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    #[error("{field} {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::BadChecksum {
            expected: 0x12,
            computed: 0x34,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Bad checksum"));
        assert!(msg.contains("0x12"));
        assert!(msg.contains("0x34"));

        let err = DecodeError::BadLength {
            expected: 39,
            actual: 12,
        };
        assert_eq!(format!("{}", err), "Bad length: expected 39, got 12");
    }

    #[test]
    fn test_out_of_range_display() {
        let err = LocationError::OutOfRange {
            field: "latitude",
            value: 95.0,
            min: -90.0,
            max: 90.0,
        };
        assert_eq!(format!("{}", err), "latitude 95 out of range [-90, 90]");
    }
}
