//! Connection lifecycle state machine.
//!
//! Tracks the single logical subscription: which connection epoch is
//! current, how many connections have been lost since the last manual
//! re-subscription, and whether the retry budget is spent. Performs no I/O.

use std::time::Duration;

use tracing::{debug, info, warn};

use skywatch_core::ReconnectPolicy;
use skywatch_tree::{ConnectionState, EventBus, SyncEvent};

use crate::error::{SyncError, SyncResult};

/// A reconnect the session should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    /// Number of connections lost so far, starting at 1.
    pub attempt: u32,
    /// How long to wait before connecting again.
    pub delay: Duration,
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    /// Connections lost since the last reset.
    retries: u32,
    /// Identifies the current connection attempt.
    epoch: u64,
    policy: ReconnectPolicy,
    bus: EventBus,
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy, bus: EventBus) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retries: 0,
            epoch: 0,
            policy,
            bus,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retries
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Whether events tagged with `epoch` belong to the live connection.
    pub fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch
    }

    /// Start a new connection attempt and return its epoch.
    ///
    /// Any connection from an earlier epoch becomes stale.
    pub fn begin_connect(&mut self) -> u64 {
        self.epoch += 1;
        self.transition(ConnectionState::Connecting);
        self.epoch
    }

    /// The transport for `epoch` is open. Returns `false` for a stale epoch.
    pub fn on_open(&mut self, epoch: u64) -> bool {
        if !self.is_current(epoch) || self.state != ConnectionState::Connecting {
            debug!(epoch, current = self.epoch, "ignoring open from stale connection");
            return false;
        }
        self.transition(ConnectionState::Connected);
        true
    }

    /// The transport for `epoch` closed or failed to open.
    ///
    /// Returns `Ok(Some(retry))` when another connection should be made,
    /// `Ok(None)` when the close is stale, and `Err(RetryExhausted)` once the
    /// budget is spent. The state is then `GivenUp` until
    /// [`reset_retries`](Self::reset_retries) and a fresh
    /// [`begin_connect`](Self::begin_connect).
    pub fn on_close(&mut self, epoch: u64) -> SyncResult<Option<Retry>> {
        if !self.is_current(epoch) {
            debug!(epoch, current = self.epoch, "ignoring close from stale connection");
            return Ok(None);
        }
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Ok(None);
        }

        self.retries += 1;
        self.transition(ConnectionState::Disconnected);

        if self.retries >= self.policy.max_attempts {
            warn!(
                lost = self.retries,
                max_attempts = self.policy.max_attempts,
                "retry budget exhausted"
            );
            self.transition(ConnectionState::GivenUp);
            return Err(SyncError::RetryExhausted(self.retries));
        }

        let attempt = self.retries;
        let delay = self.policy.delay_for(attempt);
        self.transition(ConnectionState::Reconnecting { attempt });
        Ok(Some(Retry { attempt, delay }))
    }

    /// Zero the retry counter (manual re-subscription).
    pub fn reset_retries(&mut self) {
        if self.retries > 0 {
            debug!(previous = self.retries, "retry counter reset");
        }
        self.retries = 0;
    }

    /// Tear down: the live epoch becomes stale and the state `Disconnected`.
    pub fn shutdown(&mut self) {
        self.epoch += 1;
        self.transition(ConnectionState::Disconnected);
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        info!(from = %self.state, to = %next, epoch = self.epoch, "connection state changed");
        self.state = next;
        self.bus.publish(SyncEvent::ConnectionStateChanged(next));
    }
}
