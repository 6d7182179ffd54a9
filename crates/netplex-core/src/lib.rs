//! Netplex Core
//!
//! Multiplexes the sub-protocols of a networked object graph over one peer
//! transport:
//! - Command dispatch to path cache, RPC and replication collaborators
//! - Peer membership and session lifecycle
//! - Hub relaying between clients of a star network
//! - A raw channel for opaque application bytes

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod interfaces;
pub mod link;
pub mod node_path;
mod raw;
mod relay;
pub mod router;
mod session;

#[cfg(test)]
mod testing;

pub use config::MultiplexerConfig;
pub use engine::Multiplexer;
pub use error::{CoreError, CoreResult};
pub use events::MultiplexerEvent;
pub use interfaces::{
    CacheInterface, DetachedCache, DetachedReplication, DetachedRpc, ObjectConfig, ObjectId,
    ReplicationInterface, RpcInterface, SpawnerConfig, SynchronizerConfig,
};
pub use link::{PeerLink, TrafficStats};
pub use node_path::NodePath;
pub use router::{RelayRole, RouteDecision};

/// Default object graph root
pub const DEFAULT_ROOT_PATH: &str = "/root";
