//! Packet writes over a negotiated endpoint

use super::negotiator::EndpointHandle;
use protocol::WriteError;
use std::time::Duration;
use tracing::trace;

/// Default time a single packet write may take
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

pub struct TransportWriter {
    timeout: Duration,
}

impl Default for TransportWriter {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_TIMEOUT)
    }
}

impl TransportWriter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write one whole packet; a short write counts as failure
    pub fn write(&self, handle: &mut EndpointHandle, packet: &[u8]) -> Result<(), WriteError> {
        let endpoint = handle.endpoint().address;

        match handle.write(packet, self.timeout) {
            Ok(written) if written == packet.len() => {
                trace!("Wrote {} bytes to endpoint {:#04x}", written, endpoint);
                Ok(())
            }
            Ok(written) => Err(WriteError::PipeWriteFailed {
                endpoint,
                reason: format!("short write: {} of {} bytes", written, packet.len()),
            }),
            Err(e) => Err(WriteError::PipeWriteFailed {
                endpoint,
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::negotiator::negotiate;
    use crate::usb::simulated::{SimulatedBackend, SimulatedDevice};
    use common::test_utils::create_mock_iphone;

    #[test]
    fn test_write_records_packet() {
        let phone = create_mock_iphone(2);
        let backend = SimulatedBackend::with_devices([SimulatedDevice::phone(phone.clone())]);
        let mut handle = negotiate(&backend, &phone).unwrap();

        TransportWriter::default().write(&mut handle, &[0xAA; 39]).unwrap();

        let writes = backend.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].endpoint, 0x02);
        assert_eq!(writes[0].data, vec![0xAA; 39]);
    }

    #[test]
    fn test_write_failure_names_endpoint() {
        let phone = create_mock_iphone(2);
        let backend =
            SimulatedBackend::with_devices([SimulatedDevice::phone(phone.clone()).failing_writes()]);
        let mut handle = negotiate(&backend, &phone).unwrap();

        let err = TransportWriter::default().write(&mut handle, &[0; 39]).unwrap_err();
        assert!(matches!(err, WriteError::PipeWriteFailed { endpoint: 0x02, .. }));
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn test_write_on_closed_handle_fails() {
        let phone = create_mock_iphone(2);
        let backend = SimulatedBackend::with_devices([SimulatedDevice::phone(phone.clone())]);
        let mut handle = negotiate(&backend, &phone).unwrap();
        handle.close();

        assert!(TransportWriter::default().write(&mut handle, &[0; 39]).is_err());
    }
}
