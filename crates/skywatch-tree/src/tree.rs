//! EntityTree - the live Region → Node → Instance hierarchy.
//!
//! The tree is the only mutable state a sync session shares with its
//! presentation layer, and it is mutated from a single task. Readers follow
//! it through the [`EventBus`] or take a [`snapshot`](EntityTree::snapshot).

use tracing::debug;

use crate::event::{EventBus, SyncEvent};
use crate::model::*;

/// Where an upsert landed and what it had to create on the way.
struct Placement {
    region: usize,
    node: usize,
    instance: usize,
    region_created: bool,
    node_created: bool,
    instance_created: bool,
}

/// The client-side registry view.
#[derive(Debug, Default)]
pub struct EntityTree {
    regions: Vec<Region>,
    bus: EventBus,
}

impl EntityTree {
    /// Create an empty tree publishing to `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            regions: Vec::new(),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ── Single-mode mutations ──────────────────────────────────────

    /// Insert or overwrite one instance, creating its region and node on
    /// demand. Returns `true` if the instance was created.
    ///
    /// Publishes `RegionAdded` / `NodeAdded` for anything created, then
    /// `InstanceAdded` or `InstanceUpdated`.
    pub fn upsert_instance(&mut self, region: &str, host: &str, data: InstanceData) -> bool {
        let at = self.place(region, host, data);

        if at.region_created {
            self.bus.publish(SyncEvent::RegionAdded(Region::new(region)));
        }
        if at.node_created {
            self.bus.publish(SyncEvent::NodeAdded(Node::new(region, host)));
        }

        let instance = self.regions[at.region].nodes[at.node].instances[at.instance].clone();
        if at.instance_created {
            self.bus.publish(SyncEvent::InstanceAdded(instance));
        } else {
            self.bus.publish(SyncEvent::InstanceUpdated(instance));
        }

        at.instance_created
    }

    /// Remove one instance, pruning its node and region if they empty out.
    ///
    /// Returns `false` (and publishes nothing) if the instance is unknown.
    pub fn remove_instance(&mut self, region: &str, host: &str, instance_id: &str) -> bool {
        let Some(ri) = self.region_position(region) else {
            return false;
        };
        let Some(ni) = self.regions[ri].position(host) else {
            return false;
        };
        let Some(ii) = self.regions[ri].nodes[ni].position(instance_id) else {
            return false;
        };

        self.regions[ri].nodes[ni].instances.remove(ii);
        self.bus.publish(SyncEvent::InstanceRemoved {
            instance_id: instance_id.to_string(),
            node_id: host.to_string(),
            region_id: region.to_string(),
        });

        if self.regions[ri].nodes[ni].instances.is_empty() {
            self.regions[ri].nodes.remove(ni);
            debug!(%region, node = %host, "pruned empty node");
            self.bus.publish(SyncEvent::NodeRemoved {
                node_id: host.to_string(),
                region_id: region.to_string(),
            });
        }

        if self.regions[ri].nodes.is_empty() {
            self.regions.remove(ri);
            debug!(%region, "pruned empty region");
            self.bus.publish(SyncEvent::RegionRemoved {
                region_id: region.to_string(),
            });
        }

        true
    }

    /// Discard the whole tree. Publishes a single `TreeCleared`, never
    /// per-entity removals.
    pub fn reset(&mut self) {
        let dropped = self.regions.len();
        self.regions.clear();
        debug!(regions = dropped, "tree reset");
        self.bus.publish(SyncEvent::TreeCleared);
    }

    // ── Batch mode ─────────────────────────────────────────────────

    /// Upsert every row in order without per-row events, then publish one
    /// `TreeRebuilt` carrying the resulting tree. Returns the row count.
    pub fn apply_batch<I>(&mut self, rows: I) -> usize
    where
        I: IntoIterator<Item = InstanceRow>,
    {
        let mut applied = 0;
        for row in rows {
            self.place(&row.region, &row.host, row.data);
            applied += 1;
        }

        debug!(
            rows = applied,
            regions = self.regions.len(),
            instances = self.instance_count(),
            "tree rebuilt"
        );
        self.bus.publish(SyncEvent::TreeRebuilt(self.snapshot()));
        applied
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Deep copy of all regions in display order.
    pub fn snapshot(&self) -> Vec<Region> {
        self.regions.clone()
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == name)
    }

    pub fn contains_region(&self, name: &str) -> bool {
        self.region_position(name).is_some()
    }

    pub fn instance(&self, region: &str, host: &str, instance_id: &str) -> Option<&Instance> {
        self.region(region)?.node(host)?.instance(instance_id)
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.regions.iter().map(|r| r.nodes.len()).sum()
    }

    pub fn instance_count(&self) -> usize {
        self.regions.iter().map(Region::instance_count).sum()
    }

    // ── Internals ──────────────────────────────────────────────────

    fn region_position(&self, name: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.id == name)
    }

    /// Locate-or-create region, node, and instance. Publishes nothing.
    fn place(&mut self, region: &str, host: &str, data: InstanceData) -> Placement {
        let (ri, region_created) = match self.region_position(region) {
            Some(ri) => (ri, false),
            None => {
                self.regions.push(Region::new(region));
                (self.regions.len() - 1, true)
            }
        };

        let r = &mut self.regions[ri];
        let (ni, node_created) = match r.position(host) {
            Some(ni) => (ni, false),
            None => {
                r.nodes.push(Node::new(region, host));
                (r.nodes.len() - 1, true)
            }
        };

        let node = &mut r.nodes[ni];
        let (ii, instance_created) = match node.position(&data.id) {
            Some(ii) => {
                node.instances[ii].overwrite(data);
                (ii, false)
            }
            None => {
                node.instances.push(Instance::new(region, host, data));
                (node.instances.len() - 1, true)
            }
        };

        Placement {
            region: ri,
            node: ni,
            instance: ii,
            region_created,
            node_created,
            instance_created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn data(port: u16, registered: bool) -> InstanceData {
        let addr = format!("10.0.0.1:{port}");
        InstanceData {
            id: addr.clone(),
            service: "svcX".to_string(),
            version: "1.0".to_string(),
            address: addr.clone(),
            admin_address: addr,
            registered,
        }
    }

    fn row(region: &str, host: &str, d: InstanceData) -> InstanceRow {
        InstanceRow {
            region: region.to_string(),
            host: host.to_string(),
            data: d,
        }
    }

    fn tree_with_events() -> (EntityTree, UnboundedReceiver<SyncEvent>) {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        (EntityTree::new(bus), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[test]
    fn upsert_creates_region_node_and_instance() {
        let (mut tree, mut rx) = tree_with_events();

        assert!(tree.upsert_instance("regionA", "10.0.0.1", data(8000, true)));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        let SyncEvent::RegionAdded(added) = &events[0] else {
            panic!("expected RegionAdded, got {:?}", events[0]);
        };
        assert_eq!(added.id, "regionA");
        assert!(added.nodes.is_empty());
        let SyncEvent::NodeAdded(node) = &events[1] else {
            panic!("expected NodeAdded, got {:?}", events[1]);
        };
        assert_eq!(node.id, "10.0.0.1");
        assert_eq!(node.region, "regionA");
        assert!(node.instances.is_empty());
        let SyncEvent::InstanceAdded(instance) = &events[2] else {
            panic!("expected InstanceAdded, got {:?}", events[2]);
        };
        assert_eq!(instance.id, "10.0.0.1:8000");
        assert_eq!(instance.node, "10.0.0.1");
        assert_eq!(instance.region, "regionA");
    }

    #[test]
    fn upsert_same_identity_is_last_write_wins() {
        let (mut tree, mut rx) = tree_with_events();
        tree.upsert_instance("regionA", "10.0.0.1", data(8000, true));
        drain(&mut rx);

        let mut second = data(8000, false);
        second.version = "2.0".to_string();
        assert!(!tree.upsert_instance("regionA", "10.0.0.1", second));

        assert_eq!(tree.instance_count(), 1);
        let inst = tree.instance("regionA", "10.0.0.1", "10.0.0.1:8000").unwrap();
        assert_eq!(inst.version, "2.0");
        assert!(!inst.registered);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SyncEvent::InstanceUpdated(_)));
    }

    #[test]
    fn remove_cascades_once_per_level() {
        let (mut tree, mut rx) = tree_with_events();
        tree.upsert_instance("regionA", "10.0.0.1", data(8000, true));
        drain(&mut rx);

        assert!(tree.remove_instance("regionA", "10.0.0.1", "10.0.0.1:8000"));
        assert!(tree.is_empty());

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                SyncEvent::InstanceRemoved {
                    instance_id: "10.0.0.1:8000".into(),
                    node_id: "10.0.0.1".into(),
                    region_id: "regionA".into(),
                },
                SyncEvent::NodeRemoved {
                    node_id: "10.0.0.1".into(),
                    region_id: "regionA".into(),
                },
                SyncEvent::RegionRemoved {
                    region_id: "regionA".into()
                },
            ]
        );
    }

    #[test]
    fn region_survives_while_another_node_remains() {
        let (mut tree, mut rx) = tree_with_events();
        tree.upsert_instance("regionA", "10.0.0.1", data(8000, true));
        let mut other = data(8000, true);
        other.id = "10.0.0.2:8000".to_string();
        tree.upsert_instance("regionA", "10.0.0.2", other);
        drain(&mut rx);

        tree.remove_instance("regionA", "10.0.0.1", "10.0.0.1:8000");
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], SyncEvent::NodeRemoved { .. }));
        assert!(tree.contains_region("regionA"));
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn removing_absent_instance_is_noop() {
        let (mut tree, mut rx) = tree_with_events();
        tree.upsert_instance("regionA", "10.0.0.1", data(8000, true));
        drain(&mut rx);

        assert!(!tree.remove_instance("regionA", "10.0.0.1", "10.0.0.1:9999"));
        assert!(!tree.remove_instance("regionA", "10.0.0.9", "10.0.0.9:8000"));
        assert!(!tree.remove_instance("regionB", "10.0.0.1", "10.0.0.1:8000"));

        assert!(drain(&mut rx).is_empty());
        assert_eq!(tree.instance_count(), 1);
    }

    #[test]
    fn reset_publishes_single_cleared_event() {
        let (mut tree, mut rx) = tree_with_events();
        tree.upsert_instance("regionA", "10.0.0.1", data(8000, true));
        tree.upsert_instance("regionB", "10.0.0.1", data(8001, true));
        drain(&mut rx);

        tree.reset();

        assert!(tree.is_empty());
        assert_eq!(drain(&mut rx), vec![SyncEvent::TreeCleared]);
    }

    #[test]
    fn reset_then_replay_is_structurally_identical() {
        let rows = vec![
            row("regionA", "10.0.0.1", data(8000, true)),
            row("regionA", "10.0.0.1", data(8001, false)),
            row("regionB", "10.0.0.1", data(8002, true)),
        ];

        let mut tree = EntityTree::default();
        tree.apply_batch(rows.clone());
        let before = tree.snapshot();

        tree.reset();
        tree.apply_batch(rows);
        assert_eq!(tree.snapshot(), before);
    }

    #[test]
    fn batch_is_silent_until_rebuilt() {
        let (mut tree, mut rx) = tree_with_events();

        let applied = tree.apply_batch(vec![
            row("regionA", "10.0.0.1", data(8000, true)),
            row("regionA", "10.0.0.2", data(8001, true)),
        ]);
        assert_eq!(applied, 2);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let SyncEvent::TreeRebuilt(regions) = &events[0] else {
            panic!("expected TreeRebuilt");
        };
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].nodes.len(), 2);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut tree = EntityTree::default();
        tree.apply_batch(vec![
            row("zeta", "10.0.0.1", data(8000, true)),
            row("alpha", "10.0.0.1", data(8000, true)),
            row("mid", "10.0.0.1", data(8000, true)),
        ]);

        let names: Vec<&str> = tree.regions().map(Region::name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn same_address_in_two_regions_is_two_instances() {
        let mut tree = EntityTree::default();
        tree.upsert_instance("regionA", "10.0.0.1", data(8000, true));
        tree.upsert_instance("regionB", "10.0.0.1", data(8000, true));

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.node_count(), 2);
        assert_eq!(tree.instance_count(), 2);
    }
}
