pub mod config;
pub mod error;
pub mod filter;
pub mod protocol;

pub use config::{ReconnectPolicy, SessionSettings, SkywatchConfig};
pub use error::{ProtoError, ProtoResult};
pub use filter::Filter;
pub use protocol::*;
