//! Connection state machine
//!
//! Driven by scan results and error reports from the device worker; every
//! transition is published on the state bus.
//!
//! | current      | supported device found | none found   |
//! |--------------|------------------------|--------------|
//! | Disconnected | Connected              | (no change)  |
//! | Connected    | (no change)            | Disconnected |
//! | Error        | Connected              | (no change)  |
//!
//! `set_error_state` always publishes, even when the state is already an
//! identical Error.

use common::SubscriptionBus;
use protocol::ConnectionState;
use tracing::{info, warn};

pub struct ConnectionStateMachine {
    state: ConnectionState,
    bus: SubscriptionBus<ConnectionState>,
}

impl ConnectionStateMachine {
    /// Starts from whatever the bus currently holds
    pub fn new(bus: SubscriptionBus<ConnectionState>) -> Self {
        Self {
            state: bus.current(),
            bus,
        }
    }

    pub fn current(&self) -> &ConnectionState {
        &self.state
    }

    /// Apply one scan result; returns the new state if it changed
    pub fn apply_scan(&mut self, supported_found: bool) -> Option<ConnectionState> {
        let next = match (&self.state, supported_found) {
            (ConnectionState::Disconnected, true) | (ConnectionState::Error(_), true) => {
                ConnectionState::Connected
            }
            (ConnectionState::Connected, false) => ConnectionState::Disconnected,
            _ => return None,
        };

        self.transition(next.clone());
        Some(next)
    }

    pub fn set_error_state(&mut self, message: impl Into<String>) {
        let next = ConnectionState::Error(message.into());
        warn!("Connection error: {}", next);
        self.state = next.clone();
        self.bus.publish(next);
    }

    fn transition(&mut self, next: ConnectionState) {
        info!("Connection state: {} -> {}", self.state, next);
        self.state = next.clone();
        self.bus.publish(next);
    }
}
