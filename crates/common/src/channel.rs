//! Async channel bridge between callers and the device worker thread
//!
//! Every mutation of connection state and every hardware call happens on the
//! worker thread. Callers (async tasks, UI threads, the scan timer) only send
//! [`HostCommand`]s and wait on the oneshot response carried inside.

use async_channel::{Receiver, Sender, bounded};
use protocol::{ConnectionState, DeviceDescriptor, LocationSample};
use tokio::sync::oneshot;

/// Why a scan was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// Periodic scan timer
    Timer,
    /// Explicit request from the consumer
    Manual,
    /// The application became active
    AppActivated,
}

/// One enumerated device and whether the matcher accepted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub descriptor: DeviceDescriptor,
    pub supported: bool,
}

/// Commands from callers to the device worker
#[derive(Debug)]
pub enum HostCommand {
    /// Scan the bus and apply the result to the state machine
    Refresh {
        reason: RefreshReason,
        /// Receives the state after the scan (None for timer scans)
        response: Option<oneshot::Sender<ConnectionState>>,
    },

    /// Scan, then report every enumerated device
    ListDevices {
        response: oneshot::Sender<Vec<ScannedDevice>>,
    },

    /// Scan and negotiate an endpoint with a supported device
    Connect { response: oneshot::Sender<bool> },

    /// Release any held endpoint
    Disconnect { response: oneshot::Sender<()> },

    /// Whether the last scan found a supported device
    IsDeviceAvailable { response: oneshot::Sender<bool> },

    /// Validate, encode and write one location sample
    SendLocation {
        sample: LocationSample,
        response: oneshot::Sender<bool>,
    },

    /// Force the Error state
    SetErrorState {
        message: String,
        response: Option<oneshot::Sender<()>>,
    },

    /// Release all handles and stop the worker
    Shutdown,
}

/// Caller side of the bridge
#[derive(Clone)]
pub struct HostBridge {
    cmd_tx: Sender<HostCommand>,
}

impl HostBridge {
    /// Send a command from an async context
    pub async fn send_command(&self, cmd: HostCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command from a plain thread
    pub fn send_command_blocking(&self, cmd: HostCommand) -> crate::Result<()> {
        self.cmd_tx
            .send_blocking(cmd)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command built around a fresh oneshot and await its response
    pub async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> HostCommand,
    ) -> crate::Result<R> {
        let (tx, rx) = oneshot::channel();
        self.send_command(build(tx)).await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Blocking counterpart of [`HostBridge::request`]
    ///
    /// Must not be called from within an async runtime.
    pub fn request_blocking<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> HostCommand,
    ) -> crate::Result<R> {
        let (tx, rx) = oneshot::channel();
        self.send_command_blocking(build(tx))?;
        rx.blocking_recv()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Worker side of the bridge
pub struct HostWorker {
    cmd_rx: Receiver<HostCommand>,
}

impl HostWorker {
    /// Receive the next command (blocking)
    pub fn recv_command(&self) -> crate::Result<HostCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<HostCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Stop accepting commands
    pub fn close(&self) {
        self.cmd_rx.close();
    }
}

/// Create the channel bridge between callers and the worker thread
///
/// Returns (HostBridge for callers, HostWorker for the worker thread)
pub fn create_host_bridge() -> (HostBridge, HostWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    (HostBridge { cmd_tx }, HostWorker { cmd_rx })
}
