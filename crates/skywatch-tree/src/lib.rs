//! skywatch-tree - the client-side model of the service registry.
//!
//! Holds the live Region → Node → Instance hierarchy and publishes a typed
//! change event for every mutation, so a presentation layer can follow the
//! tree without polling it.
//!
//! # Architecture
//!
//! ```text
//! EntityTree
//!   ├── Region (keyed by name, insertion ordered)
//!   │   └── Node (keyed by host address)
//!   │       └── Instance (keyed by ip:port)
//!   └── EventBus ──► subscribers (mpsc receivers)
//! ```
//!
//! Mutations come in two modes. Single-mode calls (`upsert_instance`,
//! `remove_instance`) publish one event per change. `apply_batch` publishes
//! nothing per row and a single `TreeRebuilt` at the end. Empty nodes and
//! regions are pruned as soon as their last child leaves.

pub mod event;
pub mod model;
pub mod tree;

pub use event::{ConnectionState, EventBus, SyncEvent};
pub use model::*;
pub use tree::EntityTree;
