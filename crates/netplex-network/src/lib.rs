//! Netplex Network Layer
//!
//! Provides the pieces the multiplexer sits on:
//! - Command framing (3-bit command tag, system/relay header)
//! - The Peer Transport contract
//! - An in-memory star network for tests and simulation

pub mod error;
pub mod loopback;
pub mod packet;
pub mod transport;

pub use error::{NetworkError, NetworkResult};
pub use loopback::{LoopbackNetwork, LoopbackPeer};
pub use packet::{Command, SysCommand, SysPacket, CMD_MASK, SYS_CMD_SIZE};
pub use transport::{
    ConnectionStatus, IncomingPacket, PeerId, PeerTransport, TransferMode, TransportEvent,
    TARGET_PEER_BROADCAST, TARGET_PEER_SERVER,
};
