//! Common utilities for gps-usb-host
//!
//! This crate provides the pieces shared by the host library and its
//! consumers: error handling, logging setup, the dispatch queue that
//! subscriber callbacks run on, the typed subscription bus, and the async
//! channel bridge to the device worker thread.

pub mod bus;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use bus::{StateStream, Subscription, SubscriptionBus, SubscriptionToken};
pub use channel::{
    HostBridge, HostCommand, HostWorker, RefreshReason, ScannedDevice, create_host_bridge,
};
pub use dispatch::DispatchQueue;
pub use error::{Error, Result};
pub use logging::setup_logging;
