//! skywatch-sync - keeps an [`EntityTree`] consistent with the registry.
//!
//! # Architecture
//!
//! ```text
//! Session (one tokio task, one event at a time)
//!   ├── transport: WebSocket reader task per connection epoch
//!   ├── heartbeat timer (only while connected)
//!   ├── reconnect delay (optional backoff)
//!   └── SyncEngine (no I/O)
//!       ├── ConnectionManager  state machine, retry budget, epochs
//!       ├── interpreter        List / Update frames → tree mutations
//!       ├── FilterController   filter → command, tree reset, retry reset
//!       └── EntityTree ──► EventBus ──► presentation sinks
//! ```
//!
//! The engine decides, the session performs I/O. Every engine entry point
//! returns the command (if any) the session must write to the socket, so
//! the whole synchronization algorithm is testable without a network.
//!
//! [`EntityTree`]: skywatch_tree::EntityTree

pub mod connection;
pub mod engine;
pub mod error;
pub mod filter;
pub mod interpreter;
pub mod session;
pub mod transport;

pub use connection::{ConnectionManager, Retry};
pub use engine::{SubscriptionState, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use filter::FilterController;
pub use interpreter::ApplyReport;
pub use session::{Session, SessionCommand, SessionHandle};
