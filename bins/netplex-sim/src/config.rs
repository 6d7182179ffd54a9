//! Simulator configuration

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use netplex_core::{MultiplexerConfig, NodePath};

/// Main simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of clients joining the hub
    pub clients: usize,
    /// Milliseconds between ticks
    pub tick_interval_ms: u64,
    /// Total ticks to run
    pub ticks: u32,
    /// Route client-to-client traffic through the hub
    pub server_relay: bool,
    /// Raw messages each client sends, one per tick
    pub messages: u32,
    /// Root path every peer is configured with
    pub root_path: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            clients: 3,
            tick_interval_ms: 50,
            ticks: 20,
            server_relay: true,
            messages: 3,
            root_path: netplex_core::DEFAULT_ROOT_PATH.to_string(),
        }
    }
}

/// Ticks spent on the join handshake before any message is sent
pub const WARMUP_TICKS: u32 = 2;

impl SimConfig {
    /// Load configuration from file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.clients == 0 || self.clients > 64 {
            anyhow::bail!("clients must be between 1 and 64");
        }

        if self.tick_interval_ms == 0 {
            anyhow::bail!("tick_interval_ms must be positive");
        }

        if self.ticks <= WARMUP_TICKS + self.messages {
            anyhow::bail!(
                "ticks must exceed {} to deliver {} messages",
                WARMUP_TICKS + self.messages,
                self.messages
            );
        }

        NodePath::parse_root(self.root_path.as_str()).context("Invalid root_path")?;
        Ok(())
    }

    /// Multiplexer settings shared by every simulated peer
    pub fn multiplexer(&self) -> MultiplexerConfig {
        MultiplexerConfig {
            server_relay: self.server_relay,
            root_path: NodePath::new(self.root_path.as_str()),
            ..Default::default()
        }
    }
}
