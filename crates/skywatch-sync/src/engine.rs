//! SyncEngine - owns the tree and drives it from connection events.
//!
//! One engine is created per sync session and dropped with it. Every method
//! corresponds to one external event and returns whatever the session must
//! write to the socket in response.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use skywatch_core::{Command, Filter, ReconnectPolicy, SessionSettings};
use skywatch_tree::{ConnectionState, EntityTree, EventBus, SyncEvent};

use crate::connection::{ConnectionManager, Retry};
use crate::error::SyncResult;
use crate::filter::FilterController;
use crate::interpreter::{self, ApplyReport};

/// Process-wide subscription state, as seen by a presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionState {
    pub filter: Filter,
    pub connection: ConnectionState,
    pub retry_count: u32,
}

#[derive(Debug)]
pub struct SyncEngine {
    tree: EntityTree,
    connection: ConnectionManager,
    filter: FilterController,
    bus: EventBus,
}

impl SyncEngine {
    pub fn new(policy: ReconnectPolicy, filter: Filter) -> Self {
        let bus = EventBus::new();
        Self {
            tree: EntityTree::new(bus.clone()),
            connection: ConnectionManager::new(policy, bus.clone()),
            filter: FilterController::new(filter),
            bus,
        }
    }

    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::new(settings.reconnect, settings.filter)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        self.bus.subscribe()
    }

    pub fn tree(&self) -> &EntityTree {
        &self.tree
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn subscription(&self) -> SubscriptionState {
        SubscriptionState {
            filter: self.filter.current(),
            connection: self.connection.state(),
            retry_count: self.connection.retry_count(),
        }
    }

    // ── Connection events ──────────────────────────────────────────

    /// Start a connection attempt; returns its epoch.
    pub fn begin_connect(&mut self) -> u64 {
        self.connection.begin_connect()
    }

    /// The transport for `epoch` opened. Returns the commands to send on
    /// it, or `None` if the epoch is stale and the link should be dropped.
    pub fn on_open(&mut self, epoch: u64) -> Option<Vec<Command>> {
        if !self.connection.on_open(epoch) {
            return None;
        }
        Some(self.filter.on_connected().into_iter().collect())
    }

    /// A text frame arrived on `epoch`. Frames from stale or unopened
    /// connections are discarded.
    pub fn on_frame(&mut self, epoch: u64, text: &str) -> Option<ApplyReport> {
        if !self.connection.is_current(epoch) || !self.connection.is_connected() {
            debug!(epoch, "dropping frame from inactive connection");
            return None;
        }

        match interpreter::apply_frame(&mut self.tree, text) {
            Ok(report) => {
                debug!(
                    applied = report.applied,
                    ignored = report.ignored,
                    rejected = report.rejected.len(),
                    "notification applied"
                );
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                None
            }
        }
    }

    /// The transport for `epoch` closed. See [`ConnectionManager::on_close`].
    pub fn on_close(&mut self, epoch: u64) -> SyncResult<Option<Retry>> {
        self.connection.on_close(epoch)
    }

    /// Heartbeat to send on a timer tick, if connected.
    pub fn heartbeat(&self) -> Option<Command> {
        self.connection.is_connected().then_some(Command::Heartbeat)
    }

    // ── User events ────────────────────────────────────────────────

    /// Select a new filter; returns the command to send, if connected.
    pub fn apply_filter(&mut self, filter: Filter) -> Option<Command> {
        self.filter
            .apply(filter, &mut self.tree, &mut self.connection)
    }

    /// Manual recovery: zero the retry budget and start a fresh connection.
    pub fn reconnect(&mut self) -> u64 {
        self.connection.reset_retries();
        self.connection.begin_connect()
    }

    pub fn shutdown(&mut self) {
        self.connection.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skywatch_core::FilterCriterion;
    use crate::error::SyncError;

    const SNAPSHOT: &str = r#"{
        "Action": "List",
        "Data": {
            "/a": {"Service": {
                "Config": {"Name": "svcX", "Version": "1.0", "Region": "regionA",
                           "ServiceAddr": {"IPAddress": "10.0.0.1", "Port": 8000}},
                "Registered": true
            }}
        }
    }"#;

    fn connected(filter: Filter) -> (SyncEngine, u64) {
        let mut engine = SyncEngine::new(ReconnectPolicy::default(), filter);
        let epoch = engine.begin_connect();
        engine.on_open(epoch).unwrap();
        (engine, epoch)
    }

    #[test]
    fn initial_subscription_state() {
        let engine = SyncEngine::new(ReconnectPolicy::default(), Filter::default());
        assert_eq!(
            engine.subscription(),
            SubscriptionState {
                filter: Filter::AllInstances,
                connection: ConnectionState::Disconnected,
                retry_count: 0,
            }
        );
        assert!(engine.heartbeat().is_none());
    }

    #[test]
    fn frames_apply_only_on_live_connection() {
        let mut engine = SyncEngine::new(ReconnectPolicy::default(), Filter::default());
        let epoch = engine.begin_connect();
        assert!(engine.on_frame(epoch, SNAPSHOT).is_none());

        engine.on_open(epoch).unwrap();
        let report = engine.on_frame(epoch, SNAPSHOT).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(engine.tree().instance_count(), 1);

        assert!(engine.on_frame(epoch - 1, SNAPSHOT).is_none());
    }

    #[test]
    fn undecodable_frame_keeps_session_alive() {
        let (mut engine, epoch) = connected(Filter::default());
        assert!(engine.on_frame(epoch, "garbage").is_none());
        assert!(engine.connection().is_connected());
    }

    #[test]
    fn heartbeat_only_while_connected() {
        let (mut engine, epoch) = connected(Filter::default());
        assert_eq!(engine.heartbeat(), Some(Command::Heartbeat));

        engine.on_close(epoch).unwrap();
        assert!(engine.heartbeat().is_none());
    }

    #[test]
    fn non_default_filter_is_restored_on_open() {
        let mut engine = SyncEngine::new(ReconnectPolicy::default(), Filter::RegisteredOnly);
        let epoch = engine.begin_connect();
        assert_eq!(
            engine.on_open(epoch),
            Some(vec![Command::Filter(FilterCriterion::Registered(true))])
        );

        let (mut engine, _) = connected(Filter::AllInstances);
        let epoch = engine.begin_connect();
        assert_eq!(engine.on_open(epoch), Some(Vec::new()));
    }

    #[test]
    fn apply_filter_updates_subscription() {
        let (mut engine, epoch) = connected(Filter::default());
        engine.on_frame(epoch, SNAPSHOT);

        let cmd = engine.apply_filter(Filter::UnregisteredOnly);
        assert_eq!(cmd, Some(Command::Filter(FilterCriterion::Registered(false))));
        assert!(engine.tree().is_empty());
        assert_eq!(engine.subscription().filter, Filter::UnregisteredOnly);
    }

    #[test]
    fn reconnect_after_giving_up() {
        let mut engine = SyncEngine::new(
            ReconnectPolicy {
                max_attempts: 1,
                ..ReconnectPolicy::default()
            },
            Filter::default(),
        );
        let epoch = engine.begin_connect();
        assert!(matches!(
            engine.on_close(epoch),
            Err(SyncError::RetryExhausted(1))
        ));
        assert_eq!(engine.subscription().connection, ConnectionState::GivenUp);

        let epoch = engine.reconnect();
        assert_eq!(engine.subscription().retry_count, 0);
        assert_eq!(engine.subscription().connection, ConnectionState::Connecting);
        assert!(engine.on_open(epoch).is_some());
    }

    #[test]
    fn shutdown_ignores_in_flight_events() {
        let (mut engine, epoch) = connected(Filter::default());
        engine.shutdown();
        assert!(engine.on_frame(epoch, SNAPSHOT).is_none());
        assert!(engine.on_close(epoch).unwrap().is_none());
        assert!(engine.tree().is_empty());
    }
}
