//! Core multiplexer errors

use thiserror::Error;

/// Core multiplexer errors
#[derive(Debug, Error)]
pub enum CoreError {
    /// No transport, or the transport is disconnected, or the root path is unset
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Undersized or invalid packet header
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// Operation invoked in a mode/role combination that forbids it
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// Bad argument to a configuration or send call
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Transport failure
    #[error("Network error: {0}")]
    Network(#[from] netplex_network::NetworkError),
}

impl CoreError {
    /// Lift a codec failure into the dispatch taxonomy
    pub(crate) fn from_codec(err: netplex_network::NetworkError) -> Self {
        if err.is_malformed() {
            CoreError::MalformedPacket(err.to_string())
        } else {
            CoreError::Network(err)
        }
    }
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
