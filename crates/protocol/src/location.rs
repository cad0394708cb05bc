//! Simulated GPS location sample

use crate::error::LocationError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Valid latitude range in degrees
pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
/// Valid longitude range in degrees
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);
/// Valid altitude range in meters
pub const ALTITUDE_RANGE: (f64, f64) = (-1000.0, 100_000.0);

/// One simulated location fix
///
/// Range validity is a precondition of sending, not an invariant of the
/// type: construct freely, then call [`LocationSample::validate`] before the
/// sample is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub timestamp: SystemTime,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, timestamp: SystemTime) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            timestamp,
        }
    }

    /// Sample stamped with the current wall clock, truncated to milliseconds
    pub fn now(latitude: f64, longitude: f64, altitude: f64) -> Self {
        let timestamp = UNIX_EPOCH + Duration::from_millis(millis_since_epoch(SystemTime::now()));
        Self::new(latitude, longitude, altitude, timestamp)
    }

    /// Timestamp as milliseconds since the Unix epoch
    ///
    /// Saturates: pre-epoch times give 0, times past `u64::MAX` ms give
    /// `u64::MAX`.
    pub fn timestamp_millis(&self) -> u64 {
        millis_since_epoch(self.timestamp)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Check every coordinate against its range
    ///
    /// Reports the first offending field, in latitude, longitude, altitude
    /// order. NaN never satisfies a range.
    pub fn validate(&self) -> Result<(), LocationError> {
        check_range("latitude", self.latitude, LATITUDE_RANGE)?;
        check_range("longitude", self.longitude, LONGITUDE_RANGE)?;
        check_range("altitude", self.altitude, ALTITUDE_RANGE)?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), LocationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(LocationError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
