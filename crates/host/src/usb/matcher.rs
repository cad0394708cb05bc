//! Supported-device rule
//!
//! A device is supported when it is an Apple mobile device (Apple vendor ID
//! plus either a mobile product ID or a mobile product name), or when it
//! matches one of the configured `VID:PID` filters.

use protocol::DeviceDescriptor;
use std::ops::RangeInclusive;
use std::str::FromStr;
use tracing::warn;

pub const APPLE_VENDOR_ID: u16 = 0x05AC;

/// Product IDs assigned to iPhone, iPad and iPod touch models
pub const MOBILE_PRODUCT_IDS: RangeInclusive<u16> = 0x1290..=0x12AF;

const MOBILE_NAME_KEYWORDS: [&str; 3] = ["iphone", "ipad", "ipod"];

/// Built-in rule: Apple vendor and a mobile product ID or name
pub fn is_apple_mobile_device(descriptor: &DeviceDescriptor) -> bool {
    if descriptor.vendor_id != APPLE_VENDOR_ID {
        return false;
    }
    if MOBILE_PRODUCT_IDS.contains(&descriptor.product_id) {
        return true;
    }
    descriptor.display_name.as_deref().is_some_and(|name| {
        let name = name.to_lowercase();
        MOBILE_NAME_KEYWORDS.iter().any(|k| name.contains(k))
    })
}

/// Whether a device's product string can change its match result
///
/// Only the built-in Apple rule looks at names; `VID:PID` filters never do.
/// Enumeration reads product strings only for these devices, so foreign
/// devices are not woken on every scan.
pub fn name_affects_match(vendor_id: u16) -> bool {
    vendor_id == APPLE_VENDOR_ID
}

/// Parsed `0xVID:0xPID` pattern; either side may be `*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VidPidFilter {
    vendor_id: Option<u16>,
    product_id: Option<u16>,
}

impl VidPidFilter {
    pub fn matches(&self, descriptor: &DeviceDescriptor) -> bool {
        self.vendor_id.is_none_or(|v| v == descriptor.vendor_id)
            && self.product_id.is_none_or(|p| p == descriptor.product_id)
    }
}

impl FromStr for VidPidFilter {
    type Err = String;

    fn from_str(filter: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(format!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x05ac:0x12a8' or '0x05ac:*')",
                filter
            ));
        }

        Ok(Self {
            vendor_id: parse_id(parts[0], "VID")?,
            product_id: parse_id(parts[1], "PID")?,
        })
    }
}

fn parse_id(id: &str, name: &str) -> Result<Option<u16>, String> {
    if id == "*" {
        return Ok(None);
    }

    let hex_part = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .ok_or_else(|| format!("Invalid {} '{}', must start with '0x' (e.g., '0x05ac')", name, id))?;

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(format!("Invalid {} '{}', hex part must be 1-4 digits", name, id));
    }

    u16::from_str_radix(hex_part, 16)
        .map(Some)
        .map_err(|_| format!("Invalid {} '{}', not a valid hex number", name, id))
}

/// Decides whether a descriptor belongs to a supported device
#[derive(Debug, Clone, Default)]
pub struct DeviceMatcher {
    extra_filters: Vec<VidPidFilter>,
}

impl DeviceMatcher {
    /// Built-in rule plus extra filters; malformed filters are skipped
    pub fn with_filters<S: AsRef<str>>(filters: &[S]) -> Self {
        let extra_filters = filters
            .iter()
            .filter_map(|f| match f.as_ref().parse::<VidPidFilter>() {
                Ok(filter) => Some(filter),
                Err(e) => {
                    warn!("Ignoring device filter: {}", e);
                    None
                }
            })
            .collect();

        Self { extra_filters }
    }

    pub fn is_supported(&self, descriptor: &DeviceDescriptor) -> bool {
        is_apple_mobile_device(descriptor) || self.extra_filters.iter().any(|f| f.matches(descriptor))
    }

    pub fn filter_count(&self) -> usize {
        self.extra_filters.len()
    }
}
