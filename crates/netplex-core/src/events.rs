//! Notifications surfaced to the embedding layer

use bytes::Bytes;

use netplex_network::PeerId;

/// Something the object graph should react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiplexerEvent {
    /// A peer joined, directly or announced by the hub
    PeerConnected(PeerId),
    /// A peer left
    PeerDisconnected(PeerId),
    /// Our connection to the hub completed
    ConnectedToHost,
    /// Our connection attempt failed
    ConnectionFailed,
    /// The hub went away; all session state has been reset
    HostDisconnected,
    /// Raw application bytes arrived
    PeerPacket { from: PeerId, payload: Bytes },
}
