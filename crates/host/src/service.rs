//! Device service: the consumer-facing handle
//!
//! Starting the service spawns the device worker thread, plus the scan
//! timer task on a tokio runtime.
//! Async and blocking methods forward to the worker over the command
//! bridge; subscriptions go straight to the state bus, whose callbacks run
//! on the [`DispatchQueue`] the consumer passed in.
//!
//! If the worker is gone (after [`DeviceService::shutdown`]), every call
//! degrades to its "nothing happened" value: `false`, an empty list, or the
//! last published state.

use crate::config::HostConfig;
use crate::route::{Route, RouteError, RoutePlayer};
use crate::usb::{
    DeviceMatcher, DeviceWorkerThread, ScanTimer, TransportWriter, UsbBackend,
    spawn_device_worker,
};
use common::{
    DispatchQueue, HostBridge, HostCommand, RefreshReason, ScannedDevice, StateStream,
    Subscription, SubscriptionBus, SubscriptionToken, create_host_bridge,
};
use protocol::{ConnectionState, LocationSample};
use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Runtime parameters of a [`DeviceService`]
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub scan_interval: Duration,
    pub write_timeout: Duration,
    pub route_tick: Duration,
    pub matcher: DeviceMatcher,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from(&HostConfig::default())
    }
}

impl From<&HostConfig> for ServiceOptions {
    fn from(config: &HostConfig) -> Self {
        Self {
            scan_interval: config.scan.interval(),
            write_timeout: config.usb.write_timeout(),
            route_tick: config.route.tick(),
            matcher: DeviceMatcher::with_filters(&config.usb.extra_filters),
        }
    }
}

pub struct DeviceService {
    bridge: HostBridge,
    bus: SubscriptionBus<ConnectionState>,
    timer: Option<ScanTimer>,
    worker: Option<JoinHandle<()>>,
    route_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    route_tick: Duration,
    runtime: Handle,
}

impl DeviceService {
    /// Spawn the worker and scan timer and run the first scan
    ///
    /// Must be called from within a tokio runtime; use
    /// [`DeviceService::start_with_runtime`] elsewhere.
    pub fn start(
        backend: Box<dyn UsbBackend>,
        dispatch: DispatchQueue,
        options: ServiceOptions,
    ) -> common::Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| common::Error::Config(format!("No tokio runtime: {}", e)))?;
        Self::start_with_runtime(runtime, backend, dispatch, options)
    }

    /// [`DeviceService::start`] with the scan timer and route playback
    /// running on `runtime`
    pub fn start_with_runtime(
        runtime: Handle,
        backend: Box<dyn UsbBackend>,
        dispatch: DispatchQueue,
        options: ServiceOptions,
    ) -> common::Result<Self> {
        if options.scan_interval.is_zero() {
            return Err(common::Error::Config(
                "scan interval must be greater than zero".to_string(),
            ));
        }

        let bus = SubscriptionBus::new(ConnectionState::Disconnected, dispatch);
        let (bridge, worker) = create_host_bridge();

        let thread = DeviceWorkerThread::new(
            worker,
            backend,
            options.matcher,
            TransportWriter::new(options.write_timeout),
            bus.clone(),
        );
        let worker_handle = spawn_device_worker(thread)?;

        bridge.send_command_blocking(HostCommand::Refresh {
            reason: RefreshReason::Manual,
            response: None,
        })?;
        let timer = ScanTimer::start(&runtime, bridge.clone(), options.scan_interval)?;

        info!(
            "Device service started (scan every {:?})",
            options.scan_interval
        );

        Ok(Self {
            bridge,
            bus,
            timer: Some(timer),
            worker: Some(worker_handle),
            route_task: Mutex::new(None),
            route_tick: options.route_tick,
            runtime,
        })
    }

    /// Scan, then negotiate an endpoint if a supported device is present
    pub async fn connect(&self) -> bool {
        let result = self
            .bridge
            .request(|response| HostCommand::Connect { response })
            .await;
        or_fallback(result, "connect", false)
    }

    /// Release any held endpoint
    pub async fn disconnect(&self) {
        let result = self
            .bridge
            .request(|response| HostCommand::Disconnect { response })
            .await;
        or_fallback(result, "disconnect", ())
    }

    pub async fn is_device_available(&self) -> bool {
        let result = self
            .bridge
            .request(|response| HostCommand::IsDeviceAvailable { response })
            .await;
        or_fallback(result, "is_device_available", false)
    }

    /// Validate, encode and write one sample
    pub async fn send_location(&self, sample: LocationSample) -> bool {
        let result = self
            .bridge
            .request(|response| HostCommand::SendLocation { sample, response })
            .await;
        or_fallback(result, "send_location", false)
    }

    /// Scan now; returns the state after the scan
    pub async fn refresh(&self) -> ConnectionState {
        self.refresh_with(RefreshReason::Manual).await
    }

    /// The application became active; scan now
    pub async fn app_activated(&self) -> ConnectionState {
        self.refresh_with(RefreshReason::AppActivated).await
    }

    async fn refresh_with(&self, reason: RefreshReason) -> ConnectionState {
        let result = self
            .bridge
            .request(|response| HostCommand::Refresh {
                reason,
                response: Some(response),
            })
            .await;
        or_fallback(result, "refresh", self.bus.current())
    }

    /// Force the Error state
    pub async fn set_error_state(&self, message: impl Into<String>) {
        let message = message.into();
        let result = self
            .bridge
            .request(|response| HostCommand::SetErrorState {
                message,
                response: Some(response),
            })
            .await;
        or_fallback(result, "set_error_state", ())
    }

    /// Scan and report every readable device with its match result
    pub async fn list_devices(&self) -> Vec<ScannedDevice> {
        let result = self
            .bridge
            .request(|response| HostCommand::ListDevices { response })
            .await;
        or_fallback(result, "list_devices", Vec::new())
    }

    /// Blocking [`DeviceService::connect`]; not for use inside a runtime
    pub fn connect_blocking(&self) -> bool {
        let result = self
            .bridge
            .request_blocking(|response| HostCommand::Connect { response });
        or_fallback(result, "connect", false)
    }

    pub fn disconnect_blocking(&self) {
        let result = self
            .bridge
            .request_blocking(|response| HostCommand::Disconnect { response });
        or_fallback(result, "disconnect", ())
    }

    pub fn is_device_available_blocking(&self) -> bool {
        let result = self
            .bridge
            .request_blocking(|response| HostCommand::IsDeviceAvailable { response });
        or_fallback(result, "is_device_available", false)
    }

    pub fn send_location_blocking(&self, sample: LocationSample) -> bool {
        let result = self
            .bridge
            .request_blocking(|response| HostCommand::SendLocation { sample, response });
        or_fallback(result, "send_location", false)
    }

    pub fn refresh_blocking(&self) -> ConnectionState {
        let result = self.bridge.request_blocking(|response| HostCommand::Refresh {
            reason: RefreshReason::Manual,
            response: Some(response),
        });
        or_fallback(result, "refresh", self.bus.current())
    }

    /// Last published state
    pub fn state(&self) -> ConnectionState {
        self.bus.current()
    }

    /// Register a state callback; it first receives the current state
    pub fn subscribe<F>(&self, callback: F) -> Subscription<ConnectionState>
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.bus.unsubscribe(token)
    }

    /// State changes as an async stream
    pub fn watch(&self) -> StateStream<ConnectionState> {
        self.bus.watch()
    }

    /// Play `route` at `speed_mps`, one sample per configured tick
    ///
    /// Replaces any route already playing. Samples that cannot be delivered
    /// are skipped; playback stops early only if the worker is gone.
    pub async fn follow_route(&self, route: Route, speed_mps: f64) -> Result<(), RouteError> {
        let mut player = RoutePlayer::new(&route, speed_mps, self.route_tick)?;
        let bridge = self.bridge.clone();
        let tick = self.route_tick;
        let name = route.name;

        let task = self.runtime.spawn(async move {
            info!("Following route '{}' at {} m/s", name, speed_mps);
            let mut interval = tokio::time::interval(tick);

            loop {
                interval.tick().await;
                let Some(sample) = player.next() else {
                    break;
                };

                match bridge
                    .request(|response| HostCommand::SendLocation { sample, response })
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => debug!("Route sample not delivered"),
                    Err(e) => {
                        warn!("Route playback stopped: {}", e);
                        return;
                    }
                }
            }

            info!("Finished route '{}'", name);
        });

        if let Some(previous) = self.route_slot().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    pub fn stop_following_route(&self) {
        if let Some(task) = self.route_slot().take() {
            task.abort();
            debug!("Route playback cancelled");
        }
    }

    pub fn is_following_route(&self) -> bool {
        self.route_slot()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop route playback, the scan timer and the worker; idempotent
    ///
    /// The worker releases any held endpoint before exiting.
    pub fn shutdown(&mut self) {
        self.stop_following_route();

        if let Some(timer) = self.timer.take() {
            timer.stop();
        }

        if let Some(worker) = self.worker.take() {
            if let Err(e) = self.bridge.send_command_blocking(HostCommand::Shutdown) {
                debug!("Worker already stopped: {}", e);
            }
            if worker.join().is_err() {
                error!("Device worker thread panicked");
            }
            info!("Device service stopped");
        }
    }

    fn route_slot(&self) -> MutexGuard<'_, Option<tokio::task::JoinHandle<()>>> {
        self.route_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DeviceService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn or_fallback<T>(result: common::Result<T>, operation: &str, fallback: T) -> T {
    result.unwrap_or_else(|e| {
        warn!("{} failed: {}", operation, e);
        fallback
    })
}
