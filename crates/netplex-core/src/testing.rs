//! Test doubles: a scripted transport and a recording collaborator

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;

use netplex_network::{
    ConnectionStatus, IncomingPacket, NetworkError, NetworkResult, PeerId, PeerTransport,
    TransferMode, TransportEvent,
};

use crate::config::MultiplexerConfig;
use crate::engine::Multiplexer;
use crate::error::{CoreError, CoreResult};
use crate::interfaces::{
    CacheInterface, ObjectId, ReplicationInterface, RpcInterface, SpawnerConfig,
    SynchronizerConfig,
};
use crate::link::PeerLink;

/// One physical send observed by the scripted transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub target: PeerId,
    pub mode: TransferMode,
    pub channel: u8,
    pub data: Vec<u8>,
}

impl Sent {
    pub fn reliable(target: PeerId, data: Vec<u8>) -> Self {
        Self {
            target,
            mode: TransferMode::Reliable,
            channel: 0,
            data,
        }
    }
}

/// Shared state behind a [`ScriptedTransport`]
#[derive(Debug)]
pub struct Script {
    pub status: ConnectionStatus,
    pub unique_id: PeerId,
    pub relay_supported: bool,
    pub refusing: bool,
    pub inbox: VecDeque<IncomingPacket>,
    pub pending_events: Vec<TransportEvent>,
    pub sent: Vec<Sent>,
    /// Number of calls that mutate transport state or send
    pub calls: usize,
    pub disconnect_on_poll: bool,
    pub disconnect_after_packets: Option<usize>,
    /// Fail the next pop even though the inbox is not empty
    pub fail_next_packet: bool,
    target: PeerId,
    mode: TransferMode,
    channel: u8,
    popped: usize,
}

impl Script {
    pub fn queue(&mut self, from: PeerId, data: &[u8]) {
        self.queue_with(from, 0, TransferMode::Reliable, data);
    }

    pub fn queue_with(&mut self, from: PeerId, channel: u8, mode: TransferMode, data: &[u8]) {
        self.inbox.push_back(IncomingPacket {
            from,
            channel,
            mode,
            data: Bytes::copy_from_slice(data),
        });
    }

    pub fn take_sent(&mut self) -> Vec<Sent> {
        std::mem::take(&mut self.sent)
    }
}

/// Transport whose inbox and status are driven by the test
pub struct ScriptedTransport {
    script: Rc<RefCell<Script>>,
}

/// A connected scripted transport with our id and relay support
pub fn scripted(unique_id: PeerId, relay_supported: bool) -> (ScriptedTransport, Rc<RefCell<Script>>) {
    let script = Rc::new(RefCell::new(Script {
        status: ConnectionStatus::Connected,
        unique_id,
        relay_supported,
        refusing: false,
        inbox: VecDeque::new(),
        pending_events: Vec::new(),
        sent: Vec::new(),
        calls: 0,
        disconnect_on_poll: false,
        disconnect_after_packets: None,
        fail_next_packet: false,
        target: 0,
        mode: TransferMode::Reliable,
        channel: 0,
        popped: 0,
    }));
    (
        ScriptedTransport {
            script: Rc::clone(&script),
        },
        script,
    )
}

impl PeerTransport for ScriptedTransport {
    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut s = self.script.borrow_mut();
        if s.disconnect_on_poll {
            s.status = ConnectionStatus::Disconnected;
        }
        std::mem::take(&mut s.pending_events)
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.script.borrow().status
    }

    fn available_packet_count(&self) -> usize {
        self.script.borrow().inbox.len()
    }

    fn next_packet(&mut self) -> NetworkResult<IncomingPacket> {
        let mut s = self.script.borrow_mut();
        if std::mem::take(&mut s.fail_next_packet) {
            return Err(NetworkError::NotConnected);
        }
        let packet = s.inbox.pop_front().ok_or(NetworkError::NoPacketAvailable)?;
        s.popped += 1;
        if s.disconnect_after_packets == Some(s.popped) {
            s.status = ConnectionStatus::Disconnected;
        }
        Ok(packet)
    }

    fn put_packet(&mut self, data: &[u8]) -> NetworkResult<()> {
        let mut s = self.script.borrow_mut();
        s.calls += 1;
        if s.status != ConnectionStatus::Connected {
            return Err(NetworkError::NotConnected);
        }
        let sent = Sent {
            target: s.target,
            mode: s.mode,
            channel: s.channel,
            data: data.to_vec(),
        };
        s.sent.push(sent);
        Ok(())
    }

    fn set_target_peer(&mut self, peer: PeerId) {
        let mut s = self.script.borrow_mut();
        s.calls += 1;
        s.target = peer;
    }

    fn set_transfer_mode(&mut self, mode: TransferMode) {
        let mut s = self.script.borrow_mut();
        s.calls += 1;
        s.mode = mode;
    }

    fn set_transfer_channel(&mut self, channel: u8) {
        let mut s = self.script.borrow_mut();
        s.calls += 1;
        s.channel = channel;
    }

    fn unique_id(&self) -> PeerId {
        self.script.borrow().unique_id
    }

    fn is_server_relay_supported(&self) -> bool {
        self.script.borrow().relay_supported
    }

    fn set_refuse_new_connections(&mut self, refuse: bool) {
        self.script.borrow_mut().refusing = refuse;
    }

    fn is_refusing_new_connections(&self) -> bool {
        self.script.borrow().refusing
    }
}

/// A collaborator call, with the sender slot as seen during the call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SimplifyPath { from: PeerId, sender: PeerId, data: Vec<u8> },
    ConfirmPath { from: PeerId, sender: PeerId, data: Vec<u8> },
    RemoteCall { from: PeerId, sender: PeerId, data: Vec<u8> },
    Spawn { from: PeerId, sender: PeerId },
    Despawn { from: PeerId, sender: PeerId },
    Sync { from: PeerId, sender: PeerId },
    CachePeer { peer: PeerId, connected: bool },
    ReplicationPeer { peer: PeerId, connected: bool },
    CacheClear,
    ReplicationReset,
    Tick,
    RpcCall { object: ObjectId, target: PeerId, method: String },
    SpawnRegister(ObjectId),
    SpawnUnregister(ObjectId),
    ReplicationStart(ObjectId),
    ReplicationStop(ObjectId),
}

pub type CallLog = Rc<RefCell<Vec<Call>>>;

/// Implements every collaborator interface and records each call.
///
/// Remote calls whose second byte is `0xFF` fail after being recorded.
#[derive(Clone, Default)]
pub struct Recorder {
    log: CallLog,
}

impl Recorder {
    fn push(&self, call: Call) {
        self.log.borrow_mut().push(call);
    }
}

/// A multiplexer wired to one shared [`Recorder`]
pub fn recording_multiplexer(config: MultiplexerConfig) -> (Multiplexer, CallLog) {
    let recorder = Recorder::default();
    let log = Rc::clone(&recorder.log);
    let mux = Multiplexer::with_interfaces(
        config,
        Box::new(recorder.clone()),
        Box::new(recorder.clone()),
        Box::new(recorder),
    )
    .unwrap();
    (mux, log)
}

impl CacheInterface for Recorder {
    fn on_simplify_path(&mut self, link: &mut PeerLink, from: PeerId, packet: &[u8]) -> CoreResult<()> {
        self.push(Call::SimplifyPath {
            from,
            sender: link.remote_sender_id(),
            data: packet.to_vec(),
        });
        Ok(())
    }

    fn on_confirm_path(&mut self, link: &mut PeerLink, from: PeerId, packet: &[u8]) -> CoreResult<()> {
        self.push(Call::ConfirmPath {
            from,
            sender: link.remote_sender_id(),
            data: packet.to_vec(),
        });
        Ok(())
    }

    fn on_peer_change(&mut self, _: &mut PeerLink, peer: PeerId, connected: bool) {
        self.push(Call::CachePeer { peer, connected });
    }

    fn clear(&mut self) {
        self.push(Call::CacheClear);
    }
}

impl RpcInterface for Recorder {
    fn on_remote_call(&mut self, link: &mut PeerLink, from: PeerId, packet: &[u8]) -> CoreResult<()> {
        self.push(Call::RemoteCall {
            from,
            sender: link.remote_sender_id(),
            data: packet.to_vec(),
        });
        if packet.get(1) == Some(&0xFF) {
            return Err(CoreError::MalformedPacket("Rejected by recorder".into()));
        }
        Ok(())
    }

    fn rpc_call(
        &mut self,
        link: &mut PeerLink,
        object: ObjectId,
        target: PeerId,
        method: &str,
        args: &[u8],
    ) -> CoreResult<()> {
        self.push(Call::RpcCall {
            object,
            target,
            method: method.to_string(),
        });
        let mut packet = vec![netplex_network::Command::RemoteCall.tag()];
        packet.extend_from_slice(args);
        link.send_command(target, &packet)
    }

    fn rpc_fingerprint(&self, object: ObjectId) -> String {
        format!("recorder-{}", object.0)
    }
}

impl ReplicationInterface for Recorder {
    fn on_spawn_receive(&mut self, link: &mut PeerLink, from: PeerId, _: &[u8]) -> CoreResult<()> {
        self.push(Call::Spawn {
            from,
            sender: link.remote_sender_id(),
        });
        Ok(())
    }

    fn on_despawn_receive(&mut self, link: &mut PeerLink, from: PeerId, _: &[u8]) -> CoreResult<()> {
        self.push(Call::Despawn {
            from,
            sender: link.remote_sender_id(),
        });
        Ok(())
    }

    fn on_sync_receive(&mut self, link: &mut PeerLink, from: PeerId, _: &[u8]) -> CoreResult<()> {
        self.push(Call::Sync {
            from,
            sender: link.remote_sender_id(),
        });
        Ok(())
    }

    fn on_peer_change(&mut self, _: &mut PeerLink, peer: PeerId, connected: bool) {
        self.push(Call::ReplicationPeer { peer, connected });
    }

    fn on_tick(&mut self, _: &mut PeerLink) {
        self.push(Call::Tick);
    }

    fn on_reset(&mut self) {
        self.push(Call::ReplicationReset);
    }

    fn on_spawn_register(&mut self, object: ObjectId, _: &SpawnerConfig) -> CoreResult<()> {
        self.push(Call::SpawnRegister(object));
        Ok(())
    }

    fn on_spawn_unregister(&mut self, object: ObjectId, _: &SpawnerConfig) -> CoreResult<()> {
        self.push(Call::SpawnUnregister(object));
        Ok(())
    }

    fn on_replication_start(&mut self, object: ObjectId, _: &SynchronizerConfig) -> CoreResult<()> {
        self.push(Call::ReplicationStart(object));
        Ok(())
    }

    fn on_replication_stop(&mut self, object: ObjectId, _: &SynchronizerConfig) -> CoreResult<()> {
        self.push(Call::ReplicationStop(object));
        Ok(())
    }
}
