//! Test utilities for gps-usb-host
//!
//! Provides descriptor builders, sample fixtures and async helpers used by
//! the tests of every crate in the workspace.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{create_mock_iphone, APPLE_VENDOR_ID};
//!
//! let device = create_mock_iphone(1);
//! assert_eq!(device.vendor_id, APPLE_VENDOR_ID);
//! ```

use protocol::{DeviceDescriptor, LocationSample};
use std::future::Future;
use std::time::{Duration, UNIX_EPOCH};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Apple vendor ID
pub const APPLE_VENDOR_ID: u16 = 0x05AC;

/// Product ID of the original iPhone
pub const IPHONE_PRODUCT_ID: u16 = 0x12A8;

/// Create an iPhone descriptor at bus 1, the given address
pub fn create_mock_iphone(address: u8) -> DeviceDescriptor {
    DeviceDescriptor::new(APPLE_VENDOR_ID, IPHONE_PRODUCT_ID)
        .with_name("iPhone")
        .at(1, address)
}

/// Create a descriptor with no product string at bus 1
pub fn create_mock_device(vendor_id: u16, product_id: u16, address: u8) -> DeviceDescriptor {
    DeviceDescriptor::new(vendor_id, product_id).at(1, address)
}

/// Create a list of unrelated, unsupported devices (keyboard, hub, storage)
pub fn create_mock_foreign_devices() -> Vec<DeviceDescriptor> {
    vec![
        create_mock_device(0x046d, 0xc31c, 2).with_name("USB Keyboard"),
        create_mock_device(0x1d6b, 0x0002, 1).with_name("xHCI Host Controller"),
        create_mock_device(0x0781, 0x5567, 3).with_name("Cruzer Blade"),
    ]
}

/// San Francisco sample with a millisecond-quantized timestamp
pub fn create_sample_location() -> LocationSample {
    LocationSample::new(
        37.7749,
        -122.4194,
        10.0,
        UNIX_EPOCH + Duration::from_millis(1_700_000_000_000),
    )
}

/// Run a future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::with_timeout;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let result = with_timeout(Duration::from_secs(1), async { 42 }).await;
/// assert_eq!(result.unwrap(), 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Timeout error for tests
#[derive(Debug)]
pub struct TimeoutError {
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_iphone() {
        let device = create_mock_iphone(4);
        assert_eq!(device.vendor_id, 0x05ac);
        assert_eq!(device.product_id, 0x12a8);
        assert_eq!(device.address, 4);
    }

    #[test]
    fn test_foreign_devices_are_not_apple() {
        assert!(
            create_mock_foreign_devices()
                .iter()
                .all(|d| d.vendor_id != APPLE_VENDOR_ID)
        );
    }

    #[test]
    fn test_sample_location_is_valid() {
        assert!(create_sample_location().is_valid());
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;
        assert!(result.is_err());
    }
}
