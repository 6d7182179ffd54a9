//! Network error types

use thiserror::Error;

use crate::transport::PeerId;

/// Network layer errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Invalid packet
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Packet too short for the header it claims
    #[error("Packet too short: need {needed} bytes, got {actual}")]
    PacketTooShort { needed: usize, actual: usize },

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    /// Receive queue was empty
    #[error("No packet available")]
    NoPacketAvailable,
}

impl NetworkError {
    /// Whether this error describes a bad packet rather than a transport fault
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            NetworkError::InvalidPacket(_) | NetworkError::PacketTooShort { .. }
        )
    }
}

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;
