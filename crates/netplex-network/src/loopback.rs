//! In-memory star network
//!
//! One hub (id 1) and any number of clients share a process-local switch.
//! Clients only have a direct link to the hub, which is exactly the topology
//! the relay router exists for. Delivery is immediate and lossless regardless
//! of transfer mode.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{NetworkError, NetworkResult};
use crate::transport::{
    ConnectionStatus, IncomingPacket, PeerId, PeerTransport, TransferMode, TransportEvent,
    TARGET_PEER_BROADCAST, TARGET_PEER_SERVER,
};

/// Per-peer mailbox
struct Endpoint {
    status: ConnectionStatus,
    inbox: VecDeque<IncomingPacket>,
    events: Vec<TransportEvent>,
}

impl Endpoint {
    fn new(status: ConnectionStatus) -> Self {
        Self {
            status,
            inbox: VecDeque::new(),
            events: Vec::new(),
        }
    }
}

struct Switch {
    endpoints: HashMap<PeerId, Endpoint>,
    next_client_id: PeerId,
    relay_supported: bool,
    refusing: bool,
}

impl Switch {
    fn deliver(&mut self, to: PeerId, packet: IncomingPacket) -> NetworkResult<()> {
        let endpoint = self
            .endpoints
            .get_mut(&to)
            .filter(|e| e.status.is_active())
            .ok_or(NetworkError::PeerNotFound(to))?;
        endpoint.inbox.push_back(packet);
        Ok(())
    }

    fn client_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .endpoints
            .iter()
            .filter(|(&id, e)| id != TARGET_PEER_SERVER && e.status.is_active())
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Factory for peers attached to one in-memory switch
#[derive(Clone)]
pub struct LoopbackNetwork {
    switch: Arc<Mutex<Switch>>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    /// Create a network whose hub supports relaying
    pub fn new() -> Self {
        Self::with_relay_support(true)
    }

    /// Create a network, choosing whether the hub advertises relay support
    pub fn with_relay_support(relay_supported: bool) -> Self {
        Self {
            switch: Arc::new(Mutex::new(Switch {
                endpoints: HashMap::new(),
                next_client_id: TARGET_PEER_SERVER + 1,
                relay_supported,
                refusing: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Switch> {
        self.switch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring up the hub. It is connected immediately.
    pub fn create_server(&self) -> LoopbackPeer {
        let mut switch = self.lock();
        switch
            .endpoints
            .insert(TARGET_PEER_SERVER, Endpoint::new(ConnectionStatus::Connected));
        debug!("Loopback hub up");
        LoopbackPeer::new(self.switch.clone(), TARGET_PEER_SERVER)
    }

    /// Start connecting a new client. The handshake completes on its first poll.
    pub fn create_client(&self) -> LoopbackPeer {
        let mut switch = self.lock();
        let id = switch.next_client_id;
        switch.next_client_id += 1;

        let hub_accepts = !switch.refusing
            && switch
                .endpoints
                .get(&TARGET_PEER_SERVER)
                .map_or(false, |e| e.status.is_active());

        let mut endpoint = Endpoint::new(ConnectionStatus::Connecting);
        if hub_accepts {
            endpoint.events.push(TransportEvent::ConnectionSucceeded);
            endpoint
                .events
                .push(TransportEvent::PeerConnected(TARGET_PEER_SERVER));
            if let Some(hub) = switch.endpoints.get_mut(&TARGET_PEER_SERVER) {
                hub.events.push(TransportEvent::PeerConnected(id));
            }
            debug!("Loopback client {} connecting", id);
        } else {
            endpoint.events.push(TransportEvent::ConnectionFailed);
            debug!("Loopback client {} refused", id);
        }
        switch.endpoints.insert(id, endpoint);

        LoopbackPeer::new(self.switch.clone(), id)
    }

    /// Ids of clients currently linked to the hub
    pub fn client_ids(&self) -> Vec<PeerId> {
        self.lock().client_ids()
    }
}

/// One peer's view of a [`LoopbackNetwork`]
pub struct LoopbackPeer {
    switch: Arc<Mutex<Switch>>,
    id: PeerId,
    target: PeerId,
    mode: TransferMode,
    channel: u8,
}

impl LoopbackPeer {
    fn new(switch: Arc<Mutex<Switch>>, id: PeerId) -> Self {
        Self {
            switch,
            id,
            target: TARGET_PEER_BROADCAST,
            mode: TransferMode::Reliable,
            channel: 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Switch> {
        self.switch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_server(&self) -> bool {
        self.id == TARGET_PEER_SERVER
    }

    /// Tear down this peer's links. Idempotent.
    pub fn close(&mut self) {
        let mut switch = self.lock();
        let Some(endpoint) = switch.endpoints.get_mut(&self.id) else {
            return;
        };
        if !endpoint.status.is_active() {
            return;
        }
        endpoint.status = ConnectionStatus::Disconnected;
        endpoint.inbox.clear();

        if self.is_server() {
            for id in switch.client_ids() {
                if let Some(client) = switch.endpoints.get_mut(&id) {
                    client.events.push(TransportEvent::ServerDisconnected);
                }
            }
            debug!("Loopback hub closed");
        } else {
            switch.endpoints.remove(&self.id);
            if let Some(hub) = switch.endpoints.get_mut(&TARGET_PEER_SERVER) {
                hub.events.push(TransportEvent::PeerDisconnected(self.id));
            }
            debug!("Loopback client {} closed", self.id);
        }
    }
}

impl Drop for LoopbackPeer {
    fn drop(&mut self) {
        self.close();
    }
}

impl PeerTransport for LoopbackPeer {
    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut switch = self.lock();
        let Some(endpoint) = switch.endpoints.get_mut(&self.id) else {
            return Vec::new();
        };
        let events = std::mem::take(&mut endpoint.events);
        for event in &events {
            match event {
                TransportEvent::ConnectionSucceeded => {
                    endpoint.status = ConnectionStatus::Connected;
                }
                TransportEvent::ConnectionFailed | TransportEvent::ServerDisconnected => {
                    endpoint.status = ConnectionStatus::Disconnected;
                    endpoint.inbox.clear();
                }
                _ => {}
            }
        }
        events
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.lock()
            .endpoints
            .get(&self.id)
            .map_or(ConnectionStatus::Disconnected, |e| e.status)
    }

    fn available_packet_count(&self) -> usize {
        self.lock()
            .endpoints
            .get(&self.id)
            .map_or(0, |e| e.inbox.len())
    }

    fn next_packet(&mut self) -> NetworkResult<IncomingPacket> {
        self.lock()
            .endpoints
            .get_mut(&self.id)
            .and_then(|e| e.inbox.pop_front())
            .ok_or(NetworkError::NoPacketAvailable)
    }

    fn put_packet(&mut self, data: &[u8]) -> NetworkResult<()> {
        let mut switch = self.lock();
        let connected = switch
            .endpoints
            .get(&self.id)
            .map_or(false, |e| e.status == ConnectionStatus::Connected);
        if !connected {
            return Err(NetworkError::NotConnected);
        }

        let packet = IncomingPacket {
            from: self.id,
            channel: self.channel,
            mode: self.mode,
            data: Bytes::copy_from_slice(data),
        };
        trace!(
            "Loopback {} -> {}: {} bytes ({:?}, channel {})",
            self.id,
            self.target,
            data.len(),
            self.mode,
            self.channel
        );

        if !self.is_server() {
            // A client's only link is the hub.
            return match self.target {
                TARGET_PEER_BROADCAST | TARGET_PEER_SERVER => {
                    switch.deliver(TARGET_PEER_SERVER, packet)
                }
                t if t < 0 && t.wrapping_neg() != TARGET_PEER_SERVER => {
                    switch.deliver(TARGET_PEER_SERVER, packet)
                }
                t if t < 0 => Ok(()),
                t => Err(NetworkError::PeerNotFound(t)),
            };
        }

        match self.target {
            t if t > 0 => switch.deliver(t, packet),
            t => {
                for id in switch.client_ids() {
                    if t < 0 && id == t.wrapping_neg() {
                        continue;
                    }
                    switch.deliver(id, packet.clone())?;
                }
                Ok(())
            }
        }
    }

    fn set_target_peer(&mut self, peer: PeerId) {
        self.target = peer;
    }

    fn set_transfer_mode(&mut self, mode: TransferMode) {
        self.mode = mode;
    }

    fn set_transfer_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    fn unique_id(&self) -> PeerId {
        self.id
    }

    fn is_server_relay_supported(&self) -> bool {
        self.lock().relay_supported
    }

    fn set_refuse_new_connections(&mut self, refuse: bool) {
        if self.is_server() {
            self.lock().refusing = refuse;
        }
    }

    fn is_refusing_new_connections(&self) -> bool {
        self.lock().refusing
    }
}
