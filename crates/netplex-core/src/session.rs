//! Session lifecycle
//!
//! Transport assignment, peer membership and teardown.

use bytes::BytesMut;
use tracing::{debug, info, warn};

use netplex_network::packet::write_sys_header;
use netplex_network::{
    ConnectionStatus, PeerId, PeerTransport, SysCommand, TransferMode, TransportEvent,
};

use crate::engine::Multiplexer;
use crate::error::{CoreError, CoreResult};
use crate::events::MultiplexerEvent;
use crate::router::RelayRole;

impl Multiplexer {
    /// Attach a transport, or detach the current one with `None`.
    ///
    /// Any previous transport is dropped and all session state cleared before
    /// the new one is installed. The replacement must already be connecting
    /// or connected.
    pub fn configure_transport(
        &mut self,
        transport: Option<Box<dyn PeerTransport>>,
    ) -> CoreResult<()> {
        if let Some(t) = transport.as_ref() {
            if t.connection_status() == ConnectionStatus::Disconnected {
                return Err(CoreError::PreconditionViolation(
                    "Supplied transport must be connecting or connected".into(),
                ));
            }
        }

        if let Some(old) = self.link.replace_transport(None) {
            debug!("Detaching transport {}", old.unique_id());
            drop(old);
            self.clear();
        }

        if let Some(mut t) = transport {
            t.set_refuse_new_connections(self.refuse_new_connections);
            info!(
                "Attached transport as peer {} ({:?})",
                t.unique_id(),
                t.connection_status()
            );
            self.link.replace_transport(Some(t));
        }

        self.replication.on_reset();
        Ok(())
    }

    /// Drop every connected peer and all collaborator state.
    ///
    /// The transport stays attached. Calling this twice is the same as once.
    pub fn clear(&mut self) {
        self.link.reset();
        self.cache.clear();
        self.replication.on_reset();
        self.raw_buffer.clear();
    }

    pub(crate) fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected(id) => self.add_peer(id),
            TransportEvent::PeerDisconnected(id) => self.del_peer(id),
            TransportEvent::ConnectionSucceeded => {
                info!("Connected to hub as peer {}", self.link.unique_id());
                self.emit(MultiplexerEvent::ConnectedToHost);
            }
            TransportEvent::ConnectionFailed => {
                warn!("Connection to hub failed");
                self.emit(MultiplexerEvent::ConnectionFailed);
            }
            TransportEvent::ServerDisconnected => {
                warn!("Hub disconnected, resetting session");
                self.clear();
                self.emit(MultiplexerEvent::HostDisconnected);
            }
        }
    }

    /// Register a newly joined peer.
    ///
    /// As the relay hub, existing peers learn about the newcomer and the
    /// newcomer learns about each existing peer before local state changes.
    pub(crate) fn add_peer(&mut self, id: PeerId) {
        if id <= 0 {
            warn!("Ignoring join of invalid peer id {}", id);
            return;
        }
        if id == self.link.unique_id() || self.link.is_peer_connected(id) {
            warn!("Ignoring duplicate join of peer {}", id);
            return;
        }

        if self.link.relay_role() == RelayRole::Hub {
            self.link.set_transfer_channel(0);
            self.link.set_transfer_mode(TransferMode::Reliable);

            let existing: Vec<PeerId> = self.link.connected_peers().iter().copied().collect();
            let mut notice = BytesMut::new();
            for peer in existing {
                notice.clear();
                write_sys_header(&mut notice, SysCommand::AddPeer, id);
                self.link.send_each(&[peer], &notice);

                notice.clear();
                write_sys_header(&mut notice, SysCommand::AddPeer, peer);
                self.link.send_each(&[id], &notice);
            }
        }

        self.link.insert_peer(id);
        self.cache.on_peer_change(&mut self.link, id, true);
        self.replication.on_peer_change(&mut self.link, id, true);
        debug!("Peer {} connected", id);
        self.emit(MultiplexerEvent::PeerConnected(id));
    }

    /// Unregister a departed peer.
    ///
    /// Replication is told before the path cache so ids it still holds
    /// resolve during its teardown.
    pub(crate) fn del_peer(&mut self, id: PeerId) {
        if !self.link.is_peer_connected(id) {
            warn!("Ignoring departure of unknown peer {}", id);
            return;
        }

        if self.link.relay_role() == RelayRole::Hub {
            self.link.set_transfer_channel(0);
            self.link.set_transfer_mode(TransferMode::Reliable);

            let others: Vec<PeerId> = self
                .link
                .connected_peers()
                .iter()
                .copied()
                .filter(|&p| p != id)
                .collect();
            let mut notice = BytesMut::new();
            write_sys_header(&mut notice, SysCommand::DelPeer, id);
            self.link.send_each(&others, &notice);
        }

        self.replication.on_peer_change(&mut self.link, id, false);
        self.cache.on_peer_change(&mut self.link, id, false);
        self.link.remove_peer(id);
        debug!("Peer {} disconnected", id);
        self.emit(MultiplexerEvent::PeerDisconnected(id));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;
    use crate::config::MultiplexerConfig;
    use crate::testing::{recording_multiplexer, scripted, Call, Sent};
    use netplex_network::{SysPacket, TARGET_PEER_SERVER};

    fn sys(packet: SysPacket) -> Vec<u8> {
        packet.to_bytes().to_vec()
    }

    #[test]
    fn test_disconnected_transport_rejected() {
        let mut mux = Multiplexer::new(MultiplexerConfig::default()).unwrap();
        let (transport, script) = scripted(1, true);
        script.borrow_mut().status = ConnectionStatus::Disconnected;

        assert!(matches!(
            mux.configure_transport(Some(Box::new(transport))),
            Err(CoreError::PreconditionViolation(_))
        ));
        assert!(!mux.has_transport());
    }

    #[test]
    fn test_hub_announces_membership() {
        let mut mux = Multiplexer::new(MultiplexerConfig::default()).unwrap();
        let (transport, script) = scripted(TARGET_PEER_SERVER, true);
        mux.configure_transport(Some(Box::new(transport))).unwrap();

        mux.add_peer(2);
        assert!(script.borrow().sent.is_empty());

        mux.add_peer(3);
        let sent = script.borrow_mut().take_sent();
        assert_eq!(
            sent,
            vec![
                Sent::reliable(2, sys(SysPacket::add_peer(3))),
                Sent::reliable(3, sys(SysPacket::add_peer(2))),
            ]
        );

        mux.add_peer(4);
        let sent = script.borrow_mut().take_sent();
        assert_eq!(
            sent,
            vec![
                Sent::reliable(2, sys(SysPacket::add_peer(4))),
                Sent::reliable(4, sys(SysPacket::add_peer(2))),
                Sent::reliable(3, sys(SysPacket::add_peer(4))),
                Sent::reliable(4, sys(SysPacket::add_peer(3))),
            ]
        );

        mux.del_peer(3);
        let sent = script.borrow_mut().take_sent();
        assert_eq!(
            sent,
            vec![
                Sent::reliable(2, sys(SysPacket::del_peer(3))),
                Sent::reliable(4, sys(SysPacket::del_peer(3))),
            ]
        );
        assert_eq!(mux.peer_ids(), vec![2, 4]);
    }

    #[test]
    fn test_no_announcements_without_relay() {
        let mut mux = Multiplexer::new(MultiplexerConfig::direct_only()).unwrap();
        let (transport, script) = scripted(TARGET_PEER_SERVER, true);
        mux.configure_transport(Some(Box::new(transport))).unwrap();

        mux.add_peer(2);
        mux.add_peer(3);
        mux.del_peer(2);
        assert!(script.borrow().sent.is_empty());
        assert_eq!(mux.peer_ids(), vec![3]);
    }

    #[test]
    fn test_collaborator_order() {
        let (mut mux, log) = recording_multiplexer(MultiplexerConfig::default());
        let (transport, _script) = scripted(5, true);
        mux.configure_transport(Some(Box::new(transport))).unwrap();
        log.borrow_mut().clear();

        mux.add_peer(1);
        mux.del_peer(1);

        assert_eq!(
            *log.borrow(),
            vec![
                Call::CachePeer { peer: 1, connected: true },
                Call::ReplicationPeer { peer: 1, connected: true },
                Call::ReplicationPeer { peer: 1, connected: false },
                Call::CachePeer { peer: 1, connected: false },
            ]
        );
        assert_eq!(
            mux.drain_events(),
            vec![
                MultiplexerEvent::PeerConnected(1),
                MultiplexerEvent::PeerDisconnected(1),
            ]
        );
    }

    #[test]
    fn test_own_id_never_registered() {
        let mut mux = Multiplexer::new(MultiplexerConfig::default()).unwrap();
        let (transport, _script) = scripted(6, true);
        mux.configure_transport(Some(Box::new(transport))).unwrap();

        mux.add_peer(6);
        assert!(mux.peer_ids().is_empty());
        assert!(mux.drain_events().is_empty());
    }

    #[test]
    fn test_non_positive_ids_never_registered() {
        let (mut mux, log) = recording_multiplexer(MultiplexerConfig::default());
        let (transport, script) = scripted(TARGET_PEER_SERVER, true);
        mux.configure_transport(Some(Box::new(transport))).unwrap();
        log.borrow_mut().clear();

        {
            let mut s = script.borrow_mut();
            s.pending_events.push(TransportEvent::PeerConnected(0));
            s.pending_events.push(TransportEvent::PeerConnected(-2));
        }
        mux.poll().unwrap();

        assert!(mux.peer_ids().is_empty());
        assert!(mux.drain_events().is_empty());
        assert!(script.borrow().sent.is_empty());
        assert_eq!(*log.borrow(), vec![Call::Tick]);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (mut mux, log) = recording_multiplexer(MultiplexerConfig::default());
        let (transport, _script) = scripted(1, true);
        mux.configure_transport(Some(Box::new(transport))).unwrap();
        mux.add_peer(2);
        mux.add_peer(3);

        mux.clear();
        let once = (mux.peer_ids(), mux.stats(), mux.remote_sender_id());
        mux.clear();
        let twice = (mux.peer_ids(), mux.stats(), mux.remote_sender_id());

        assert_eq!(once, twice);
        assert!(once.0.is_empty());
        assert!(mux.has_transport());
        let resets = log
            .borrow()
            .iter()
            .filter(|c| **c == Call::CacheClear)
            .count();
        assert_eq!(resets, 2);
    }

    #[test]
    fn test_reassignment_clears_state() {
        let (mut mux, log) = recording_multiplexer(MultiplexerConfig::default());
        let (first, _) = scripted(1, true);
        mux.configure_transport(Some(Box::new(first))).unwrap();
        mux.add_peer(2);
        log.borrow_mut().clear();

        let (second, _) = scripted(4, true);
        mux.configure_transport(Some(Box::new(second))).unwrap();

        assert!(mux.peer_ids().is_empty());
        assert_eq!(mux.unique_id(), 4);
        assert_eq!(
            *log.borrow(),
            vec![Call::CacheClear, Call::ReplicationReset, Call::ReplicationReset]
        );

        mux.configure_transport(None).unwrap();
        assert!(!mux.has_transport());
        assert_eq!(mux.unique_id(), 0);
    }

    #[test]
    fn test_old_transport_events_unreachable_after_swap() {
        let mut mux = Multiplexer::new(MultiplexerConfig::default()).unwrap();
        let (first, first_script) = scripted(1, true);
        mux.configure_transport(Some(Box::new(first))).unwrap();

        let (second, _) = scripted(1, true);
        mux.configure_transport(Some(Box::new(second))).unwrap();

        first_script
            .borrow_mut()
            .pending_events
            .push(TransportEvent::PeerConnected(9));
        mux.poll().unwrap();
        assert!(mux.peer_ids().is_empty());
    }

    #[test]
    fn test_host_lost() {
        let (mut mux, log) = recording_multiplexer(MultiplexerConfig::default());
        let (transport, script) = scripted(3, true);
        mux.configure_transport(Some(Box::new(transport))).unwrap();
        mux.add_peer(1);
        mux.drain_events();
        log.borrow_mut().clear();

        {
            let mut s = script.borrow_mut();
            s.pending_events.push(TransportEvent::ServerDisconnected);
            s.status = ConnectionStatus::Disconnected;
        }
        assert!(matches!(mux.poll(), Err(CoreError::NotConfigured(_))));

        assert!(mux.peer_ids().is_empty());
        assert_eq!(mux.drain_events(), vec![MultiplexerEvent::HostDisconnected]);

        // Nothing left to deliver on the next tick.
        assert!(matches!(mux.poll(), Err(CoreError::NotConfigured(_))));
        assert!(mux.drain_events().is_empty());
        assert!(log.borrow().contains(&Call::ReplicationReset));
        assert!(!log.borrow().contains(&Call::Tick));
    }

    #[test]
    fn test_connection_events_surface() {
        let mut mux = Multiplexer::new(MultiplexerConfig::default()).unwrap();
        let (transport, script) = scripted(3, true);
        script.borrow_mut().status = ConnectionStatus::Connecting;
        mux.configure_transport(Some(Box::new(transport))).unwrap();

        {
            let mut s = script.borrow_mut();
            s.pending_events.push(TransportEvent::ConnectionSucceeded);
            s.pending_events.push(TransportEvent::PeerConnected(1));
            s.status = ConnectionStatus::Connected;
        }
        mux.poll().unwrap();

        assert_eq!(
            mux.drain_events(),
            vec![
                MultiplexerEvent::ConnectedToHost,
                MultiplexerEvent::PeerConnected(1),
            ]
        );
    }

    #[derive(Debug, Clone)]
    enum Membership {
        Join(PeerId),
        Leave(PeerId),
    }

    fn membership() -> impl Strategy<Value = Membership> {
        prop_oneof![
            (2..12i32).prop_map(Membership::Join),
            (2..12i32).prop_map(Membership::Leave),
        ]
    }

    proptest! {
        #[test]
        fn registry_tracks_membership(ops in prop::collection::vec(membership(), 0..64)) {
            let mut mux = Multiplexer::new(MultiplexerConfig::default()).unwrap();
            let (transport, _script) = scripted(TARGET_PEER_SERVER, true);
            mux.configure_transport(Some(Box::new(transport))).unwrap();

            let mut model = BTreeSet::new();
            for op in ops {
                match op {
                    Membership::Join(id) => {
                        mux.add_peer(id);
                        model.insert(id);
                    }
                    Membership::Leave(id) => {
                        mux.del_peer(id);
                        model.remove(&id);
                    }
                }
                prop_assert_eq!(mux.peer_ids(), model.iter().copied().collect::<Vec<_>>());
            }
        }
    }
}
