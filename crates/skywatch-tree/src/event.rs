//! Change events and the bus that delivers them.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::model::{Instance, InstanceId, Node, NodeId, Region, RegionId};

/// Lifecycle of the single logical subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// About to retry after losing connection number `attempt`.
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted; only a manual reconnect leaves this state.
    GivenUp,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::GivenUp => f.write_str("given up"),
        }
    }
}

/// Everything a presentation layer can observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A new region, before any of its nodes; those follow as `NodeAdded`.
    RegionAdded(Region),
    RegionRemoved { region_id: RegionId },
    /// A new node, before any of its instances.
    NodeAdded(Node),
    NodeRemoved { node_id: NodeId, region_id: RegionId },
    InstanceAdded(Instance),
    InstanceUpdated(Instance),
    InstanceRemoved {
        instance_id: InstanceId,
        node_id: NodeId,
        region_id: RegionId,
    },
    /// A batch rebuild finished; carries the full tree.
    TreeRebuilt(Vec<Region>),
    /// The tree was discarded wholesale (snapshot boundary).
    TreeCleared,
    ConnectionStateChanged(ConnectionState),
}

impl SyncEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::RegionAdded(_) => "region_added",
            SyncEvent::RegionRemoved { .. } => "region_removed",
            SyncEvent::NodeAdded(_) => "node_added",
            SyncEvent::NodeRemoved { .. } => "node_removed",
            SyncEvent::InstanceAdded(_) => "instance_added",
            SyncEvent::InstanceUpdated(_) => "instance_updated",
            SyncEvent::InstanceRemoved { .. } => "instance_removed",
            SyncEvent::TreeRebuilt(_) => "tree_rebuilt",
            SyncEvent::TreeCleared => "tree_cleared",
            SyncEvent::ConnectionStateChanged(_) => "connection_state_changed",
        }
    }
}

/// Fan-out of [`SyncEvent`]s to any number of subscribers.
///
/// Cloning the bus shares the subscriber list. Subscribers whose receiver
/// was dropped are pruned on the next publish.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. It sees every event published from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SyncEvent) {
        let mut subscribers = self.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        trace!(event = event.name(), subscribers = subscribers.len(), "event published");
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<SyncEvent>>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
