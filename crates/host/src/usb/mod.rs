//! USB subsystem
//!
//! Enumeration, device matching, endpoint negotiation and packet writes.
//! All of it runs on the device worker thread ([`worker`]); nothing here is
//! called from async tasks directly.

pub mod backend;
pub mod enumerator;
pub mod matcher;
pub mod negotiator;
pub mod rusb_backend;
pub mod simulated;
pub mod transport;
pub mod worker;

pub use backend::{EndpointInfo, HardwareError, OpenDevice, TransferKind, UsbBackend};
pub use enumerator::DeviceEnumerator;
pub use matcher::{
    APPLE_VENDOR_ID, DeviceMatcher, MOBILE_PRODUCT_IDS, VidPidFilter, name_affects_match,
};
pub use negotiator::{EndpointHandle, InterfaceNegotiator, negotiate};
pub use rusb_backend::RusbBackend;
pub use simulated::{
    RecordedWrite, SimConfiguration, SimInterface, SimulatedBackend, SimulatedDevice,
};
pub use transport::{DEFAULT_WRITE_TIMEOUT, TransportWriter};
pub use worker::{DeviceWorkerThread, ScanTimer, spawn_device_worker};
