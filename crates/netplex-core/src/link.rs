//! Peer Link
//!
//! Owns the attached transport, the registry of connected peers and the send
//! path every outbound packet goes through. Collaborator interfaces receive a
//! `&mut PeerLink` so they can send while the multiplexer dispatches to them.

use std::collections::BTreeSet;

use bytes::BytesMut;
use tracing::{trace, warn};

use netplex_network::packet::encode_relay_into;
use netplex_network::{
    ConnectionStatus, PeerId, PeerTransport, TransferMode, TARGET_PEER_SERVER,
};

use crate::error::{CoreError, CoreResult};
use crate::node_path::NodePath;
use crate::router::{route, RelayRole, RouteDecision};

/// Traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets_in: u64,
    pub packets_out: u64,
    /// Packets rejected by dispatch
    pub packets_dropped: u64,
    /// Envelopes forwarded on behalf of other peers (hub only)
    pub packets_relayed: u64,
}

/// Transport, peer registry and send path
pub struct PeerLink {
    transport: Option<Box<dyn PeerTransport>>,
    connected_peers: BTreeSet<PeerId>,
    server_relay: bool,
    allow_object_decoding: bool,
    root_path: NodePath,
    /// Logical origin of the packet being dispatched, 0 outside dispatch
    remote_sender_id: PeerId,
    relay_buffer: BytesMut,
    stats: TrafficStats,
}

impl PeerLink {
    pub(crate) fn new(server_relay: bool, allow_object_decoding: bool, root_path: NodePath) -> Self {
        Self {
            transport: None,
            connected_peers: BTreeSet::new(),
            server_relay,
            allow_object_decoding,
            root_path,
            remote_sender_id: 0,
            relay_buffer: BytesMut::new(),
            stats: TrafficStats::default(),
        }
    }

    // === Transport slot ===

    pub(crate) fn replace_transport(
        &mut self,
        transport: Option<Box<dyn PeerTransport>>,
    ) -> Option<Box<dyn PeerTransport>> {
        std::mem::replace(&mut self.transport, transport)
    }

    pub(crate) fn transport(&self) -> Option<&dyn PeerTransport> {
        self.transport.as_deref()
    }

    pub(crate) fn transport_mut(&mut self) -> Option<&mut (dyn PeerTransport + 'static)> {
        self.transport.as_deref_mut()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Transport status, `Disconnected` when none is attached
    pub fn connection_status(&self) -> ConnectionStatus {
        self.transport
            .as_ref()
            .map_or(ConnectionStatus::Disconnected, |t| t.connection_status())
    }

    /// A transport is attached and connecting or connected
    pub fn is_active(&self) -> bool {
        self.connection_status().is_active()
    }

    /// Our id on the transport, 0 when none is attached
    pub fn unique_id(&self) -> PeerId {
        self.transport.as_ref().map_or(0, |t| t.unique_id())
    }

    pub fn relay_role(&self) -> RelayRole {
        match &self.transport {
            Some(t) => RelayRole::resolve(
                self.server_relay,
                t.unique_id(),
                t.is_server_relay_supported(),
            ),
            None => RelayRole::Disabled,
        }
    }

    // === Settings ===

    pub fn is_server_relay_enabled(&self) -> bool {
        self.server_relay
    }

    pub(crate) fn set_server_relay(&mut self, enabled: bool) {
        self.server_relay = enabled;
    }

    pub fn allow_object_decoding(&self) -> bool {
        self.allow_object_decoding
    }

    pub(crate) fn set_allow_object_decoding(&mut self, allow: bool) {
        self.allow_object_decoding = allow;
    }

    pub fn root_path(&self) -> &NodePath {
        &self.root_path
    }

    pub(crate) fn set_root_path(&mut self, path: NodePath) {
        self.root_path = path;
    }

    // === Origin tracking ===

    /// Origin of the packet currently being dispatched.
    ///
    /// When a packet was relayed this is the original sender, never the hub.
    pub fn remote_sender_id(&self) -> PeerId {
        self.remote_sender_id
    }

    pub(crate) fn set_remote_sender_id(&mut self, id: PeerId) {
        self.remote_sender_id = id;
    }

    // === Peer registry ===

    pub fn connected_peers(&self) -> &BTreeSet<PeerId> {
        &self.connected_peers
    }

    pub fn is_peer_connected(&self, id: PeerId) -> bool {
        self.connected_peers.contains(&id)
    }

    pub(crate) fn insert_peer(&mut self, id: PeerId) -> bool {
        self.connected_peers.insert(id)
    }

    pub(crate) fn remove_peer(&mut self, id: PeerId) -> bool {
        self.connected_peers.remove(&id)
    }

    /// Drop all peers, release scratch bytes and reset counters
    pub(crate) fn reset(&mut self) {
        self.connected_peers.clear();
        self.relay_buffer.clear();
        self.remote_sender_id = 0;
        self.stats = TrafficStats::default();
    }

    // === Stats ===

    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.stats.bytes_in += bytes as u64;
        self.stats.packets_in += 1;
    }

    pub(crate) fn record_dropped(&mut self) {
        self.stats.packets_dropped += 1;
    }

    // === Send path ===

    /// Set the transfer mode of subsequent sends
    pub fn set_transfer_mode(&mut self, mode: TransferMode) {
        if let Some(t) = self.transport.as_mut() {
            t.set_transfer_mode(mode);
        }
    }

    /// Set the channel of subsequent sends
    pub fn set_transfer_channel(&mut self, channel: u8) {
        if let Some(t) = self.transport.as_mut() {
            t.set_transfer_channel(channel);
        }
    }

    /// Send a command packet to `to`.
    ///
    /// `to` is a peer id, `0` for everyone, or `-id` for everyone but `id`.
    /// Mode and channel must already be set on the transport.
    pub fn send_command(&mut self, to: PeerId, packet: &[u8]) -> CoreResult<()> {
        let role = self.relay_role();
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or_else(|| CoreError::NotConfigured("No transport attached".into()))?;

        match route(to, role) {
            RouteDecision::Relay { destination } => {
                encode_relay_into(&mut self.relay_buffer, destination, packet);
                trace!(
                    "Relaying {} bytes for {} via hub",
                    self.relay_buffer.len(),
                    destination
                );
                transport.set_target_peer(TARGET_PEER_SERVER);
                transport.put_packet(&self.relay_buffer)?;
                self.stats.bytes_out += self.relay_buffer.len() as u64;
                self.stats.packets_out += 1;
            }
            RouteDecision::BroadcastExcept { excluded } => {
                for &peer in &self.connected_peers {
                    if peer == excluded {
                        continue;
                    }
                    transport.set_target_peer(peer);
                    if let Err(e) = transport.put_packet(packet) {
                        warn!("Failed to send to peer {}: {}", peer, e);
                        continue;
                    }
                    self.stats.bytes_out += packet.len() as u64;
                    self.stats.packets_out += 1;
                }
            }
            RouteDecision::Direct(target) => {
                trace!("Sending {} bytes to {}", packet.len(), target);
                transport.set_target_peer(target);
                transport.put_packet(packet)?;
                self.stats.bytes_out += packet.len() as u64;
                self.stats.packets_out += 1;
            }
        }
        Ok(())
    }

    /// Send the same bytes to each listed peer, bypassing relay routing
    pub(crate) fn send_each(&mut self, targets: &[PeerId], packet: &[u8]) {
        let Some(transport) = self.transport.as_deref_mut() else {
            return;
        };
        for &peer in targets {
            transport.set_target_peer(peer);
            match transport.put_packet(packet) {
                Ok(()) => {
                    self.stats.bytes_out += packet.len() as u64;
                    self.stats.packets_out += 1;
                }
                Err(e) => warn!("Failed to send to peer {}: {}", peer, e),
            }
        }
    }

    /// Re-wrap `inner` in a relay envelope stamped with `source` and send it
    /// to each target
    pub(crate) fn forward_relayed(&mut self, source: PeerId, inner: &[u8], targets: &[PeerId]) {
        encode_relay_into(&mut self.relay_buffer, source, inner);
        let Some(transport) = self.transport.as_deref_mut() else {
            return;
        };
        for &peer in targets {
            transport.set_target_peer(peer);
            match transport.put_packet(&self.relay_buffer) {
                Ok(()) => {
                    self.stats.bytes_out += self.relay_buffer.len() as u64;
                    self.stats.packets_out += 1;
                    self.stats.packets_relayed += 1;
                }
                Err(e) => warn!("Failed to relay to peer {}: {}", peer, e),
            }
        }
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("has_transport", &self.transport.is_some())
            .field("connected_peers", &self.connected_peers)
            .field("server_relay", &self.server_relay)
            .field("root_path", &self.root_path)
            .field("remote_sender_id", &self.remote_sender_id)
            .finish()
    }
}
