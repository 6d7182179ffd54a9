//! Peer Transport contract
//!
//! The multiplexer never touches sockets. It drives an implementation of
//! [`PeerTransport`] that owns connection setup, polling and the physical
//! send/receive of whole framed packets.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::NetworkResult;

/// Signed peer identity.
///
/// `0` is the unassigned / broadcast sentinel, `1` is the hub. Negative values
/// only appear as send targets and mean "everyone except `|id|`".
pub type PeerId = i32;

/// Send target meaning "every connected peer"
pub const TARGET_PEER_BROADCAST: PeerId = 0;

/// Reserved id of the hub (server) peer
pub const TARGET_PEER_SERVER: PeerId = 1;

/// Delivery guarantee requested for the next physical send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Best effort, may be dropped or reordered
    Unreliable,
    /// Best effort, stale packets dropped instead of reordered
    UnreliableOrdered,
    /// Retransmitted until acknowledged, in order
    #[default]
    Reliable,
}

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    /// Connecting or connected
    pub fn is_active(&self) -> bool {
        !matches!(self, ConnectionStatus::Disconnected)
    }
}

/// A packet popped from the transport's receive queue
#[derive(Debug, Clone)]
pub struct IncomingPacket {
    /// Immediate sender as reported by the transport
    pub from: PeerId,

    /// Channel the packet arrived on
    pub channel: u8,

    /// Transfer mode the packet was sent with
    pub mode: TransferMode,

    /// Packet bytes, command header included
    pub data: Bytes,
}

/// Connection lifecycle notifications raised by a transport while polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer established a direct link with us
    PeerConnected(PeerId),
    /// A directly linked peer went away
    PeerDisconnected(PeerId),
    /// Our connection to the hub completed
    ConnectionSucceeded,
    /// Our connection attempt to the hub failed
    ConnectionFailed,
    /// The hub went away
    ServerDisconnected,
}

/// Transport consumed by the multiplexer.
///
/// Target, mode and channel are sticky transport state: they apply to every
/// `put_packet` until changed.
pub trait PeerTransport {
    /// Perform pending network I/O and report lifecycle events raised by it
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Current connection state
    fn connection_status(&self) -> ConnectionStatus;

    /// Number of packets waiting in the receive queue
    fn available_packet_count(&self) -> usize;

    /// Pop the next received packet
    fn next_packet(&mut self) -> NetworkResult<IncomingPacket>;

    /// Send `data` to the current target with the current mode and channel
    fn put_packet(&mut self, data: &[u8]) -> NetworkResult<()>;

    /// Set the target of subsequent sends
    fn set_target_peer(&mut self, peer: PeerId);

    /// Set the transfer mode of subsequent sends
    fn set_transfer_mode(&mut self, mode: TransferMode);

    /// Set the channel of subsequent sends
    fn set_transfer_channel(&mut self, channel: u8);

    /// Our own id, `0` until assigned
    fn unique_id(&self) -> PeerId;

    /// Whether the hub on this transport forwards packets between clients
    fn is_server_relay_supported(&self) -> bool;

    /// Stop (or resume) accepting new incoming connections
    fn set_refuse_new_connections(&mut self, refuse: bool);

    fn is_refusing_new_connections(&self) -> bool;
}
