//! Collaborator interfaces
//!
//! The multiplexer only demultiplexes. Path caching, remote calls and state
//! replication each own their own wire sub-format past the command tag and
//! are plugged in through these traits. Every inbound hook gets the
//! [`PeerLink`] so it can reply through the normal send path.

use serde::{Deserialize, Serialize};

use netplex_network::PeerId;

use crate::error::{CoreError, CoreResult};
use crate::link::PeerLink;
use crate::node_path::NodePath;

/// Handle to an object in the embedding object graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Describes which objects a spawner replicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnerConfig {
    /// Parent under which spawned objects appear
    pub spawn_path: NodePath,
}

/// Describes which properties a synchronizer keeps in sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizerConfig {
    /// Object whose state is synchronized
    pub root_path: NodePath,
    /// Property names to replicate
    pub properties: Vec<String>,
}

/// Per-object configuration handed to the multiplexer by the object graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectConfig {
    /// Set or clear the multiplexer root; takes no object
    RootPath(NodePath),
    /// Register or unregister a spawner
    Spawner(SpawnerConfig),
    /// Start or stop a synchronizer
    Synchronizer(SynchronizerConfig),
}

/// Object path interning: long paths are sent once, then referenced by id
pub trait CacheInterface {
    fn on_simplify_path(&mut self, link: &mut PeerLink, from: PeerId, packet: &[u8])
        -> CoreResult<()>;

    fn on_confirm_path(&mut self, link: &mut PeerLink, from: PeerId, packet: &[u8])
        -> CoreResult<()>;

    fn on_peer_change(&mut self, link: &mut PeerLink, peer: PeerId, connected: bool);

    /// Forget every cached path
    fn clear(&mut self);
}

/// Remote procedure calls
pub trait RpcInterface {
    fn on_remote_call(&mut self, link: &mut PeerLink, from: PeerId, packet: &[u8])
        -> CoreResult<()>;

    /// Call `method` on `object` at `target` (peer id, 0 for all, -id for all but id)
    fn rpc_call(
        &mut self,
        link: &mut PeerLink,
        object: ObjectId,
        target: PeerId,
        method: &str,
        args: &[u8],
    ) -> CoreResult<()>;

    /// Digest of the RPC configuration of `object`, used to detect mismatches
    fn rpc_fingerprint(&self, object: ObjectId) -> String;
}

/// Spawn/despawn/sync replication
pub trait ReplicationInterface {
    fn on_spawn_receive(&mut self, link: &mut PeerLink, from: PeerId, packet: &[u8])
        -> CoreResult<()>;

    fn on_despawn_receive(&mut self, link: &mut PeerLink, from: PeerId, packet: &[u8])
        -> CoreResult<()>;

    fn on_sync_receive(&mut self, link: &mut PeerLink, from: PeerId, packet: &[u8])
        -> CoreResult<()>;

    fn on_peer_change(&mut self, link: &mut PeerLink, peer: PeerId, connected: bool);

    /// Once per tick, after the receive queue is drained
    fn on_tick(&mut self, link: &mut PeerLink);

    /// Forget all replication state
    fn on_reset(&mut self);

    fn on_spawn_register(&mut self, object: ObjectId, config: &SpawnerConfig) -> CoreResult<()>;

    fn on_spawn_unregister(&mut self, object: ObjectId, config: &SpawnerConfig)
        -> CoreResult<()>;

    fn on_replication_start(&mut self, object: ObjectId, config: &SynchronizerConfig)
        -> CoreResult<()>;

    fn on_replication_stop(&mut self, object: ObjectId, config: &SynchronizerConfig)
        -> CoreResult<()>;
}

/// Cache that ignores path traffic
#[derive(Debug, Default)]
pub struct DetachedCache;

impl CacheInterface for DetachedCache {
    fn on_simplify_path(&mut self, _: &mut PeerLink, from: PeerId, _: &[u8]) -> CoreResult<()> {
        tracing::trace!("Ignoring path simplification from {}", from);
        Ok(())
    }

    fn on_confirm_path(&mut self, _: &mut PeerLink, from: PeerId, _: &[u8]) -> CoreResult<()> {
        tracing::trace!("Ignoring path confirmation from {}", from);
        Ok(())
    }

    fn on_peer_change(&mut self, _: &mut PeerLink, _: PeerId, _: bool) {}

    fn clear(&mut self) {}
}

/// RPC layer with no callable objects
#[derive(Debug, Default)]
pub struct DetachedRpc;

impl RpcInterface for DetachedRpc {
    fn on_remote_call(&mut self, _: &mut PeerLink, from: PeerId, _: &[u8]) -> CoreResult<()> {
        tracing::trace!("Ignoring remote call from {}", from);
        Ok(())
    }

    fn rpc_call(
        &mut self,
        _: &mut PeerLink,
        object: ObjectId,
        _: PeerId,
        method: &str,
        _: &[u8],
    ) -> CoreResult<()> {
        Err(CoreError::NotConfigured(format!(
            "No RPC layer to call {} on {}",
            method, object
        )))
    }

    fn rpc_fingerprint(&self, _: ObjectId) -> String {
        String::new()
    }
}

/// Replication layer that tracks nothing
#[derive(Debug, Default)]
pub struct DetachedReplication;

impl ReplicationInterface for DetachedReplication {
    fn on_spawn_receive(&mut self, _: &mut PeerLink, from: PeerId, _: &[u8]) -> CoreResult<()> {
        tracing::trace!("Ignoring spawn from {}", from);
        Ok(())
    }

    fn on_despawn_receive(&mut self, _: &mut PeerLink, from: PeerId, _: &[u8]) -> CoreResult<()> {
        tracing::trace!("Ignoring despawn from {}", from);
        Ok(())
    }

    fn on_sync_receive(&mut self, _: &mut PeerLink, from: PeerId, _: &[u8]) -> CoreResult<()> {
        tracing::trace!("Ignoring sync from {}", from);
        Ok(())
    }

    fn on_peer_change(&mut self, _: &mut PeerLink, _: PeerId, _: bool) {}

    fn on_tick(&mut self, _: &mut PeerLink) {}

    fn on_reset(&mut self) {}

    fn on_spawn_register(&mut self, _: ObjectId, _: &SpawnerConfig) -> CoreResult<()> {
        Ok(())
    }

    fn on_spawn_unregister(&mut self, _: ObjectId, _: &SpawnerConfig) -> CoreResult<()> {
        Ok(())
    }

    fn on_replication_start(&mut self, _: ObjectId, _: &SynchronizerConfig) -> CoreResult<()> {
        Ok(())
    }

    fn on_replication_stop(&mut self, _: ObjectId, _: &SynchronizerConfig) -> CoreResult<()> {
        Ok(())
    }
}
