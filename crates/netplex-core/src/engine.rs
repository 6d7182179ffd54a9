//! Multiplexer - dispatch loop and public surface
//!
//! Drains the transport once per tick, classifies each packet by its command
//! tag and hands it to the sub-protocol that owns it. Outbound traffic from
//! every sub-protocol funnels through [`PeerLink::send_command`].

use std::collections::VecDeque;

use bytes::BytesMut;
use tracing::{debug, error, trace, warn};

use netplex_network::{
    Command, ConnectionStatus, IncomingPacket, PeerId, PeerTransport,
};

use crate::config::MultiplexerConfig;
use crate::error::{CoreError, CoreResult};
use crate::events::MultiplexerEvent;
use crate::interfaces::{
    CacheInterface, DetachedCache, DetachedReplication, DetachedRpc, ObjectConfig, ObjectId,
    ReplicationInterface, RpcInterface,
};
use crate::link::{PeerLink, TrafficStats};
use crate::node_path::NodePath;

/// The sub-protocol multiplexer
pub struct Multiplexer {
    pub(crate) link: PeerLink,
    pub(crate) cache: Box<dyn CacheInterface>,
    pub(crate) rpc: Box<dyn RpcInterface>,
    pub(crate) replication: Box<dyn ReplicationInterface>,
    /// Scratch buffer owned by the raw channel
    pub(crate) raw_buffer: BytesMut,
    pub(crate) refuse_new_connections: bool,
    pub(crate) events: VecDeque<MultiplexerEvent>,
}

impl Multiplexer {
    /// Create a multiplexer that only speaks the raw channel
    pub fn new(config: MultiplexerConfig) -> CoreResult<Self> {
        Self::with_interfaces(
            config,
            Box::new(DetachedCache),
            Box::new(DetachedRpc),
            Box::new(DetachedReplication),
        )
    }

    /// Create a multiplexer with explicit collaborators
    pub fn with_interfaces(
        config: MultiplexerConfig,
        cache: Box<dyn CacheInterface>,
        rpc: Box<dyn RpcInterface>,
        replication: Box<dyn ReplicationInterface>,
    ) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            link: PeerLink::new(
                config.server_relay,
                config.allow_object_decoding,
                config.root_path,
            ),
            cache,
            rpc,
            replication,
            raw_buffer: BytesMut::new(),
            refuse_new_connections: config.refuse_new_connections,
            events: VecDeque::new(),
        })
    }

    // === Dispatch loop ===

    /// Run one tick: poll the transport, drain its queue, then tick replication.
    ///
    /// Per-packet failures are logged and counted, never returned. Only a
    /// missing transport or a failing receive queue surfaces as an error.
    pub fn poll(&mut self) -> CoreResult<()> {
        if !self.link.is_active() {
            // A dead transport may still hold the events that explain why.
            if self.link.has_transport() {
                self.deliver_transport_events();
            }
            return Err(CoreError::NotConfigured(
                "No transport attached, or transport is disconnected".into(),
            ));
        }

        self.deliver_transport_events();

        // Polling may have torn the connection down.
        if !self.link.is_active() {
            debug!("Transport went away while polling");
            return Ok(());
        }

        loop {
            let Some(transport) = self.link.transport_mut() else {
                break;
            };
            if transport.available_packet_count() == 0 {
                break;
            }
            let packet = transport.next_packet()?;
            self.dispatch(packet);

            if !self.link.is_active() {
                debug!("Transport went away while dispatching");
                break;
            }
        }

        self.replication.on_tick(&mut self.link);
        Ok(())
    }

    fn deliver_transport_events(&mut self) {
        let events = match self.link.transport_mut() {
            Some(transport) => transport.poll(),
            None => Vec::new(),
        };
        for event in events {
            self.handle_transport_event(event);
        }
    }

    /// Route one received packet. Never fails; rejected packets are logged.
    pub(crate) fn dispatch(&mut self, packet: IncomingPacket) {
        let IncomingPacket {
            from,
            channel,
            mode,
            data,
        } = packet;
        self.link.record_received(data.len());
        trace!("Dispatching {} bytes from {}", data.len(), from);

        let is_system = data
            .first()
            .map_or(false, |&b| Command::from_header(b).is_system());

        let result = if is_system {
            // Sys handling sets the sender itself, it may differ from `from`.
            self.process_sys(from, data, mode, channel)
        } else {
            self.link.set_remote_sender_id(from);
            let result = self.process_packet(from, &data);
            self.link.set_remote_sender_id(0);
            result
        };

        if let Err(e) = result {
            self.link.record_dropped();
            error!("Dropped packet from peer {}: {}", from, e);
        }
    }

    /// Hand an application packet to the sub-protocol that owns its command
    pub(crate) fn process_packet(&mut self, from: PeerId, packet: &[u8]) -> CoreResult<()> {
        let command = Command::of(packet).map_err(CoreError::from_codec)?;

        if self.link.root_path().is_empty() {
            return Err(CoreError::NotConfigured(
                "Multiplexer root path is not set".into(),
            ));
        }

        let link = &mut self.link;
        match command {
            Command::SimplifyPath => self.cache.on_simplify_path(link, from, packet),
            Command::ConfirmPath => self.cache.on_confirm_path(link, from, packet),
            Command::RemoteCall => self.rpc.on_remote_call(link, from, packet),
            Command::Raw => self.process_raw(from, packet),
            Command::Spawn => self.replication.on_spawn_receive(link, from, packet),
            Command::Despawn => self.replication.on_despawn_receive(link, from, packet),
            Command::Sync => self.replication.on_sync_receive(link, from, packet),
            Command::Sys => Err(CoreError::MalformedPacket(format!(
                "Invalid network command from {}",
                from
            ))),
        }
    }

    // === Events ===

    pub(crate) fn emit(&mut self, event: MultiplexerEvent) {
        self.events.push_back(event);
    }

    /// Take every notification raised since the last call
    pub fn drain_events(&mut self) -> Vec<MultiplexerEvent> {
        self.events.drain(..).collect()
    }

    /// Take the oldest pending notification
    pub fn next_event(&mut self) -> Option<MultiplexerEvent> {
        self.events.pop_front()
    }

    // === Root path ===

    /// Set the object graph root. Must be absolute, or empty to unset.
    pub fn set_root_path(&mut self, path: NodePath) -> CoreResult<()> {
        if !path.is_empty() && !path.is_absolute() {
            return Err(CoreError::InvalidParameter(format!(
                "Root path must be absolute: {}",
                path
            )));
        }
        let current = self.link.root_path();
        if !current.is_empty()
            && !path.is_empty()
            && *current != path
            && !self.link.connected_peers().is_empty()
        {
            return Err(CoreError::PreconditionViolation(format!(
                "Cannot move root from {} to {} while peers are connected",
                current, path
            )));
        }
        self.link.set_root_path(path);
        Ok(())
    }

    pub fn root_path(&self) -> &NodePath {
        self.link.root_path()
    }

    // === Object configuration ===

    /// Register a root path, spawner or synchronizer
    pub fn object_configuration_add(
        &mut self,
        object: Option<ObjectId>,
        config: ObjectConfig,
    ) -> CoreResult<()> {
        match (object, config) {
            (None, ObjectConfig::RootPath(path)) => self.set_root_path(path),
            (Some(object), ObjectConfig::Spawner(spawner)) => {
                self.replication.on_spawn_register(object, &spawner)
            }
            (Some(object), ObjectConfig::Synchronizer(sync)) => {
                self.replication.on_replication_start(object, &sync)
            }
            (object, config) => Err(CoreError::InvalidParameter(format!(
                "Unsupported configuration {:?} for object {:?}",
                config, object
            ))),
        }
    }

    /// Undo a previous [`Multiplexer::object_configuration_add`]
    pub fn object_configuration_remove(
        &mut self,
        object: Option<ObjectId>,
        config: ObjectConfig,
    ) -> CoreResult<()> {
        match (object, config) {
            (None, ObjectConfig::RootPath(path)) => {
                if *self.link.root_path() != path {
                    return Err(CoreError::InvalidParameter(format!(
                        "Root path {} is not the configured root {}",
                        path,
                        self.link.root_path()
                    )));
                }
                self.set_root_path(NodePath::empty())
            }
            (Some(object), ObjectConfig::Spawner(spawner)) => {
                self.replication.on_spawn_unregister(object, &spawner)
            }
            (Some(object), ObjectConfig::Synchronizer(sync)) => {
                self.replication.on_replication_stop(object, &sync)
            }
            (object, config) => Err(CoreError::InvalidParameter(format!(
                "Unsupported configuration {:?} for object {:?}",
                config, object
            ))),
        }
    }

    // === RPC ===

    /// Call `method` on `object` at `target`
    pub fn rpc(
        &mut self,
        object: ObjectId,
        target: PeerId,
        method: &str,
        args: &[u8],
    ) -> CoreResult<()> {
        self.rpc.rpc_call(&mut self.link, object, target, method, args)
    }

    pub fn rpc_fingerprint(&self, object: ObjectId) -> String {
        self.rpc.rpc_fingerprint(object)
    }

    // === Settings and queries ===

    /// Enable or disable hub relaying. Only allowed while disconnected.
    pub fn set_server_relay_enabled(&mut self, enabled: bool) -> CoreResult<()> {
        if self.link.is_active() {
            return Err(CoreError::PreconditionViolation(
                "Cannot change server relay while the transport is active".into(),
            ));
        }
        self.link.set_server_relay(enabled);
        Ok(())
    }

    pub fn is_server_relay_enabled(&self) -> bool {
        self.link.is_server_relay_enabled()
    }

    pub fn set_allow_object_decoding(&mut self, allow: bool) {
        self.link.set_allow_object_decoding(allow);
    }

    pub fn is_object_decoding_allowed(&self) -> bool {
        self.link.allow_object_decoding()
    }

    /// Refuse new connections now and on every transport attached later
    pub fn set_refuse_new_connections(&mut self, refuse: bool) {
        self.refuse_new_connections = refuse;
        if let Some(transport) = self.link.transport_mut() {
            transport.set_refuse_new_connections(refuse);
        }
    }

    pub fn is_refusing_new_connections(&self) -> bool {
        self.link
            .transport()
            .map_or(self.refuse_new_connections, |t| t.is_refusing_new_connections())
    }

    /// Our id, 0 when no transport is attached
    pub fn unique_id(&self) -> PeerId {
        if !self.link.has_transport() {
            warn!("No transport attached, unique id unavailable");
        }
        self.link.unique_id()
    }

    /// Ids of every connected peer, excluding ourselves
    pub fn peer_ids(&self) -> Vec<PeerId> {
        if !self.link.has_transport() {
            warn!("No transport attached, assuming no peers are connected");
            return Vec::new();
        }
        self.link.connected_peers().iter().copied().collect()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.link.connection_status()
    }

    /// Origin of the packet being dispatched, 0 outside dispatch
    pub fn remote_sender_id(&self) -> PeerId {
        self.link.remote_sender_id()
    }

    pub fn stats(&self) -> TrafficStats {
        self.link.stats()
    }

    pub fn link(&self) -> &PeerLink {
        &self.link
    }

    /// Whether a transport is attached, whatever its state
    pub fn has_transport(&self) -> bool {
        self.link.has_transport()
    }

    /// Borrow the attached transport
    pub fn transport(&self) -> Option<&dyn PeerTransport> {
        self.link.transport()
    }
}
