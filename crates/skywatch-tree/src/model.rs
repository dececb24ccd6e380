//! Entity types held by the tree.
//!
//! Regions and nodes carry only their identity and children; instances
//! carry the service fields reported by the registry plus plain-id
//! back-references to their node and region.

use serde::{Deserialize, Serialize};

/// Region name, unique within the tree.
pub type RegionId = String;

/// Host address of a node, unique within its region.
pub type NodeId = String;

/// `ip:port` of an instance, unique within its node.
pub type InstanceId = String;

// ── Instance ──────────────────────────────────────────────────────

/// Mutable fields of an instance, as carried by one notification row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceData {
    pub id: InstanceId,
    pub service: String,
    pub version: String,
    pub address: String,
    pub admin_address: String,
    pub registered: bool,
}

/// One instance row destined for a batch rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRow {
    pub region: RegionId,
    pub host: NodeId,
    pub data: InstanceData,
}

/// A single running service process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub service: String,
    pub version: String,
    pub address: String,
    pub admin_address: String,
    pub registered: bool,
    /// Owning node.
    pub node: NodeId,
    /// Owning region.
    pub region: RegionId,
}

impl Instance {
    pub(crate) fn new(region: &str, host: &str, data: InstanceData) -> Self {
        Self {
            id: data.id,
            service: data.service,
            version: data.version,
            address: data.address,
            admin_address: data.admin_address,
            registered: data.registered,
            node: host.to_string(),
            region: region.to_string(),
        }
    }

    /// Overwrite the mutable fields in place. Identity is unchanged.
    pub(crate) fn overwrite(&mut self, data: InstanceData) {
        self.service = data.service;
        self.version = data.version;
        self.address = data.address;
        self.admin_address = data.admin_address;
        self.registered = data.registered;
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// A host machine running one or more instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Host address; doubles as the display name.
    pub id: NodeId,
    pub region: RegionId,
    pub instances: Vec<Instance>,
}

impl Node {
    pub(crate) fn new(region: &str, host: &str) -> Self {
        Self {
            id: host.to_string(),
            region: region.to_string(),
            instances: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.id
    }

    pub fn instance(&self, id: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.instances.iter().position(|i| i.id == id)
    }
}

// ── Region ────────────────────────────────────────────────────────

/// A named partition of the deployment (datacenter, zone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub nodes: Vec<Node>,
}

impl Region {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            id: name.to_string(),
            nodes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.id
    }

    pub fn node(&self, host: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == host)
    }

    pub(crate) fn position(&self, host: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == host)
    }

    /// Total instances across all nodes of this region.
    pub fn instance_count(&self) -> usize {
        self.nodes.iter().map(|n| n.instances.len()).sum()
    }
}
