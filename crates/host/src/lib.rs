//! GPS-over-USB host
//!
//! Detects a supported mobile device on the USB bus, tracks its connection
//! state, and streams location packets to it over a negotiated OUT
//! endpoint.
//!
//! # Example
//!
//! ```no_run
//! use common::DispatchQueue;
//! use host::{DeviceService, ServiceOptions, SimulatedBackend, SimulatedDevice};
//! use protocol::{DeviceDescriptor, LocationSample};
//!
//! # #[tokio::main]
//! # async fn main() -> common::Result<()> {
//! let phone = DeviceDescriptor::new(0x05ac, 0x12a8).with_name("iPhone").at(1, 5);
//! let backend = SimulatedBackend::with_devices([SimulatedDevice::phone(phone)]);
//! let (queue, _dispatch) = DispatchQueue::spawn("state-dispatch")?;
//!
//! let mut service = DeviceService::start(Box::new(backend), queue, ServiceOptions::default())?;
//! let _subscription = service.subscribe(|state| println!("{}", state.status_message()));
//!
//! if service.connect().await {
//!     service.send_location(LocationSample::now(37.7749, -122.4194, 10.0)).await;
//! }
//! service.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod route;
pub mod service;
pub mod state;
pub mod usb;

pub use config::{BackendKind, HostConfig};
pub use route::{MovementType, Route, RouteError, RoutePlayer, Waypoint};
pub use service::{DeviceService, ServiceOptions};
pub use state::ConnectionStateMachine;
pub use usb::{
    DeviceEnumerator, DeviceMatcher, InterfaceNegotiator, RusbBackend, SimulatedBackend,
    SimulatedDevice, TransportWriter, UsbBackend,
};
