//! Device worker thread
//!
//! Owns the backend, the state machine and the negotiated session. Callers
//! reach it only through [`HostCommand`]s, so scans, negotiation, writes and
//! state transitions are serialized on this one thread.
//!
//! A [`ScanTimer`] task on the tokio runtime feeds it `Refresh` commands at
//! a fixed interval.

use crate::state::ConnectionStateMachine;
use crate::usb::{
    DeviceEnumerator, DeviceMatcher, InterfaceNegotiator, TransportWriter, UsbBackend,
};
use common::{HostBridge, HostCommand, HostWorker, RefreshReason, SubscriptionBus};
use protocol::{ConnectionState, DeviceDescriptor, LocationSample, encode_packet};
use std::collections::BTreeSet;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

pub struct DeviceWorkerThread {
    backend: Box<dyn UsbBackend>,
    enumerator: DeviceEnumerator,
    negotiator: InterfaceNegotiator,
    writer: TransportWriter,
    state: ConnectionStateMachine,
    worker: HostWorker,
    /// Supported devices seen by the last scan
    present: Vec<DeviceDescriptor>,
}

impl DeviceWorkerThread {
    pub fn new(
        worker: HostWorker,
        backend: Box<dyn UsbBackend>,
        matcher: DeviceMatcher,
        writer: TransportWriter,
        bus: SubscriptionBus<ConnectionState>,
    ) -> Self {
        Self {
            backend,
            enumerator: DeviceEnumerator::new(matcher),
            negotiator: InterfaceNegotiator::new(),
            writer,
            state: ConnectionStateMachine::new(bus),
            worker,
            present: Vec::new(),
        }
    }

    /// Process commands until `Shutdown` or until every bridge is dropped
    pub fn run(mut self) {
        info!("Device worker started");

        loop {
            match self.worker.recv_command() {
                Ok(HostCommand::Shutdown) => {
                    info!("Device worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => {
                    debug!("Command channel closed");
                    break;
                }
            }
        }

        self.worker.close();
        self.negotiator.close();
        info!("Device worker stopped");
    }

    fn handle_command(&mut self, cmd: HostCommand) {
        // A panicking command must not take the worker down with it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in device command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::Refresh { reason, response } => {
                self.scan(reason);
                if let Some(response) = response {
                    let _ = response.send(self.state.current().clone());
                }
            }

            HostCommand::ListDevices { response } => {
                let devices = self.scan(RefreshReason::Manual);
                let _ = response.send(self.enumerator.classify(&devices));
            }

            HostCommand::Connect { response } => {
                self.scan(RefreshReason::Manual);
                let _ = response.send(self.connect());
            }

            HostCommand::Disconnect { response } => {
                if self.negotiator.is_open() {
                    info!("Releasing endpoint on request");
                }
                self.negotiator.close();
                let _ = response.send(());
            }

            HostCommand::IsDeviceAvailable { response } => {
                let _ = response.send(!self.present.is_empty());
            }

            HostCommand::SendLocation { sample, response } => {
                let _ = response.send(self.send_location(sample));
            }

            HostCommand::SetErrorState { message, response } => {
                self.state.set_error_state(message);
                if let Some(response) = response {
                    let _ = response.send(());
                }
            }

            HostCommand::Shutdown => {
                // Handled in run()
            }
        }
    }

    /// Enumerate, update the state machine and drop stale sessions
    fn scan(&mut self, reason: RefreshReason) -> BTreeSet<DeviceDescriptor> {
        let devices = match self.enumerator.scan(self.backend.as_ref()) {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device scan failed, treating bus as empty: {}", e);
                BTreeSet::new()
            }
        };

        self.present = self.enumerator.supported(&devices);
        trace!(
            "Scan ({:?}): {} devices, {} supported",
            reason,
            devices.len(),
            self.present.len()
        );

        if let Some(ConnectionState::Disconnected) = self.state.apply_scan(!self.present.is_empty()) {
            self.negotiator.close();
        }

        let stale = self
            .negotiator
            .session()
            .is_some_and(|s| !self.present.contains(s.descriptor()));
        if stale {
            debug!("Held device disappeared, releasing endpoint");
            self.negotiator.close();
        }

        devices
    }

    /// Negotiate with the first supported device unless a session is held
    fn connect(&mut self) -> bool {
        let Some(target) = self.present.first().cloned() else {
            debug!("Connect requested with no supported device present");
            return false;
        };

        match self.negotiator.open(self.backend.as_ref(), &target) {
            Ok(_) => true,
            Err(e) => {
                error!("Negotiation with {} failed: {}", target, e);
                self.state.set_error_state(e.to_string());
                false
            }
        }
    }

    fn send_location(&mut self, sample: LocationSample) -> bool {
        if let Err(e) = sample.validate() {
            warn!("Rejected location sample: {}", e);
            return false;
        }

        let Some(target) = self.present.first().cloned() else {
            debug!("No supported device present, dropping sample");
            return false;
        };

        let handle = match self.negotiator.open(self.backend.as_ref(), &target) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Negotiation with {} failed: {}", target, e);
                self.state.set_error_state(e.to_string());
                return false;
            }
        };

        let packet = encode_packet(&sample);
        match self.writer.write(handle, &packet) {
            Ok(()) => {
                debug!(
                    "Sent location {:.6}, {:.6}, {:.1}",
                    sample.latitude, sample.longitude, sample.altitude
                );
                true
            }
            Err(e) => {
                error!("{}", e);
                self.negotiator.close();
                self.state.set_error_state(e.to_string());
                false
            }
        }
    }
}

/// Spawn the device worker on its own thread
pub fn spawn_device_worker(thread: DeviceWorkerThread) -> common::Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("host-device-worker".to_string())
        .spawn(move || thread.run())?;
    Ok(handle)
}

/// Periodic scan trigger
///
/// A runtime task that sends `Refresh { Timer }` on every interval tick.
/// The first tick is skipped; the service scans once on startup.
pub struct ScanTimer {
    task: tokio::task::JoinHandle<()>,
}

impl ScanTimer {
    /// Spawn the timer task on `runtime`; `interval` must be non-zero
    pub fn start(runtime: &Handle, bridge: HostBridge, interval: Duration) -> common::Result<Self> {
        if interval.is_zero() {
            return Err(common::Error::Config(
                "scan interval must be greater than zero".to_string(),
            ));
        }

        let task = runtime.spawn(async move {
            debug!("Scan timer started ({:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let cmd = HostCommand::Refresh {
                    reason: RefreshReason::Timer,
                    response: None,
                };
                if let Err(e) = bridge.send_command(cmd).await {
                    debug!("Scan timer stopping: {}", e);
                    break;
                }
            }
        });

        Ok(Self { task })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the timer task
    pub fn stop(self) {
        self.task.abort();
        debug!("Scan timer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::{SimulatedBackend, SimulatedDevice};
    use common::test_utils::{create_mock_iphone, create_sample_location};
    use common::{DispatchQueue, create_host_bridge};

    fn start(backend: &SimulatedBackend) -> (HostBridge, JoinHandle<()>, SubscriptionBus<ConnectionState>) {
        let (bridge, worker) = create_host_bridge();
        let bus = SubscriptionBus::new(ConnectionState::Disconnected, DispatchQueue::manual("worker-test"));
        let thread = DeviceWorkerThread::new(
            worker,
            Box::new(backend.clone()),
            DeviceMatcher::default(),
            TransportWriter::default(),
            bus.clone(),
        );
        (bridge, spawn_device_worker(thread).unwrap(), bus)
    }

    #[test]
    fn test_worker_scan_and_send() {
        let backend = SimulatedBackend::new();
        let (bridge, handle, bus) = start(&backend);

        backend.attach(SimulatedDevice::phone(create_mock_iphone(4)));
        let state = bridge
            .request_blocking(|r| HostCommand::Refresh {
                reason: RefreshReason::Manual,
                response: Some(r),
            })
            .unwrap();
        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(bus.current(), ConnectionState::Connected);

        let sent = bridge
            .request_blocking(|response| HostCommand::SendLocation {
                sample: create_sample_location(),
                response,
            })
            .unwrap();
        assert!(sent);
        assert_eq!(backend.writes().len(), 1);

        bridge.send_command_blocking(HostCommand::Shutdown).unwrap();
        handle.join().unwrap();
        assert_eq!(backend.open_device_count(), 0);
    }

    #[test]
    fn test_worker_stops_when_bridge_dropped() {
        let backend = SimulatedBackend::new();
        let (bridge, handle, _bus) = start(&backend);
        drop(bridge);
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_scan_timer_triggers_refresh() {
        let (bridge, worker) = create_host_bridge();
        let timer = ScanTimer::start(&Handle::current(), bridge, Duration::from_millis(10)).unwrap();

        let (cmd, worker) = tokio::task::spawn_blocking(move || (worker.recv_command(), worker))
            .await
            .unwrap();
        assert!(matches!(
            cmd.unwrap(),
            HostCommand::Refresh {
                reason: RefreshReason::Timer,
                response: None
            }
        ));

        timer.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        while worker.try_recv_command().is_some() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(worker.try_recv_command().is_none());
    }

    #[tokio::test]
    async fn test_scan_timer_rejects_zero_interval() {
        let (bridge, worker) = create_host_bridge();
        assert!(matches!(
            ScanTimer::start(&Handle::current(), bridge, Duration::ZERO),
            Err(common::Error::Config(_))
        ));
        assert!(worker.try_recv_command().is_none());
    }

    #[tokio::test]
    async fn test_scan_timer_ends_when_worker_gone() {
        let (bridge, worker) = create_host_bridge();
        let timer = ScanTimer::start(&Handle::current(), bridge, Duration::from_millis(5)).unwrap();
        worker.close();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!timer.is_running());
    }
}
