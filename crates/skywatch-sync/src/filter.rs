//! Filter controller - user filter selection to subscription changes.

use tracing::{debug, info};

use skywatch_core::{Command, Filter};
use skywatch_tree::EntityTree;

use crate::connection::ConnectionManager;

#[derive(Debug, Default)]
pub struct FilterController {
    current: Filter,
}

impl FilterController {
    pub fn new(initial: Filter) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> Filter {
        self.current
    }

    /// Switch to `filter`.
    ///
    /// Clears the tree, zeroes the retry counter, and returns the `Filter`
    /// command to send if the connection is up. The server answers with a
    /// fresh `List` scoped to the new filter over the same connection.
    pub fn apply(
        &mut self,
        filter: Filter,
        tree: &mut EntityTree,
        connection: &mut ConnectionManager,
    ) -> Option<Command> {
        info!(from = %self.current, to = %filter, "filter selected");
        self.current = filter;
        tree.reset();
        connection.reset_retries();

        if connection.is_connected() {
            Some(filter.command())
        } else {
            debug!(state = %connection.state(), "not connected, filter command dropped");
            None
        }
    }

    /// Command to restore the current filter on a fresh connection.
    ///
    /// A new server connection starts unfiltered, so nothing is sent for
    /// `AllInstances`.
    pub fn on_connected(&self) -> Option<Command> {
        match self.current {
            Filter::AllInstances => None,
            filter => Some(filter.command()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skywatch_core::{FilterCriterion, ReconnectPolicy};
    use skywatch_tree::{EventBus, InstanceData, SyncEvent};

    fn instance() -> InstanceData {
        InstanceData {
            id: "10.0.0.1:8000".into(),
            service: "svcX".into(),
            version: "1.0".into(),
            address: "10.0.0.1:8000".into(),
            admin_address: "10.0.0.1:8000".into(),
            registered: true,
        }
    }

    #[test]
    fn registered_only_clears_tree_and_resets_retries() {
        let bus = EventBus::new();
        let mut tree = EntityTree::new(bus.clone());
        let mut conn = ConnectionManager::new(ReconnectPolicy::default(), bus.clone());

        for _ in 0..4 {
            let epoch = conn.begin_connect();
            conn.on_close(epoch).unwrap();
        }
        assert_eq!(conn.retry_count(), 4);

        let epoch = conn.begin_connect();
        conn.on_open(epoch);
        tree.upsert_instance("regionA", "10.0.0.1", instance());
        let mut rx = bus.subscribe();

        let mut filters = FilterController::default();
        let cmd = filters.apply(Filter::RegisteredOnly, &mut tree, &mut conn);

        assert_eq!(cmd, Some(Command::Filter(FilterCriterion::Registered(true))));
        assert_eq!(conn.retry_count(), 0);
        assert!(tree.is_empty());
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::TreeCleared);
        assert_eq!(filters.current(), Filter::RegisteredOnly);
    }

    #[test]
    fn command_is_dropped_while_disconnected() {
        let bus = EventBus::new();
        let mut tree = EntityTree::new(bus.clone());
        let mut conn = ConnectionManager::new(ReconnectPolicy::default(), bus);

        let mut filters = FilterController::default();
        assert!(filters.apply(Filter::UnregisteredOnly, &mut tree, &mut conn).is_none());
        assert_eq!(filters.current(), Filter::UnregisteredOnly);
    }

    #[test]
    fn restores_non_default_filter_on_connect() {
        assert!(FilterController::new(Filter::AllInstances).on_connected().is_none());
        assert_eq!(
            FilterController::new(Filter::UnregisteredOnly).on_connected(),
            Some(Command::Filter(FilterCriterion::Registered(false)))
        );
    }
}
