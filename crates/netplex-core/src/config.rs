//! Multiplexer configuration

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::node_path::NodePath;

/// Multiplexer configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// Route client-to-client traffic through the hub
    pub server_relay: bool,

    /// Let the RPC layer decode full objects from the wire
    pub allow_object_decoding: bool,

    /// Ask the transport to refuse new connections once attached
    pub refuse_new_connections: bool,

    /// Object graph root all replication and path caching is relative to
    pub root_path: NodePath,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            server_relay: true,
            allow_object_decoding: false,
            refuse_new_connections: false,
            root_path: NodePath::new(crate::DEFAULT_ROOT_PATH),
        }
    }
}

impl MultiplexerConfig {
    /// Create config for pure point-to-point operation (no hub relaying)
    pub fn direct_only() -> Self {
        Self {
            server_relay: false,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> CoreResult<()> {
        NodePath::parse_root(self.root_path.as_str())?;
        Ok(())
    }
}
