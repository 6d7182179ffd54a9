//! Relay router
//!
//! Handles Sys packets: hub-announced membership changes and relay envelopes.
//! On the hub an envelope's peer field selects the destination; on a client
//! it names the original sender.

use bytes::Bytes;
use tracing::{error, trace};

use netplex_network::{PeerId, SysCommand, SysPacket, TransferMode, TARGET_PEER_SERVER};

use crate::engine::Multiplexer;
use crate::error::{CoreError, CoreResult};
use crate::router::RelayRole;

impl Multiplexer {
    pub(crate) fn process_sys(
        &mut self,
        from: PeerId,
        data: Bytes,
        mode: TransferMode,
        channel: u8,
    ) -> CoreResult<()> {
        let packet = SysPacket::from_bytes(data).map_err(CoreError::from_codec)?;
        let role = self.link.relay_role();

        match packet.command {
            SysCommand::AddPeer | SysCommand::DelPeer => {
                if role != RelayRole::Client || from != TARGET_PEER_SERVER {
                    error!(
                        "Membership notice from {} rejected (role {:?})",
                        from, role
                    );
                    return Err(CoreError::PreconditionViolation(format!(
                        "Membership notice from {} while {:?}",
                        from, role
                    )));
                }
                if packet.peer <= 0 {
                    error!("Membership notice from {} names invalid peer {}", from, packet.peer);
                    return Err(CoreError::PreconditionViolation(format!(
                        "Membership notice for invalid peer {}",
                        packet.peer
                    )));
                }
                if packet.command == SysCommand::AddPeer {
                    self.add_peer(packet.peer);
                } else {
                    self.del_peer(packet.peer);
                }
                Ok(())
            }
            SysCommand::Relay => self.process_relay(from, packet, role, mode, channel),
        }
    }

    fn process_relay(
        &mut self,
        from: PeerId,
        packet: SysPacket,
        role: RelayRole,
        mode: TransferMode,
        channel: u8,
    ) -> CoreResult<()> {
        if !role.is_active() {
            error!("Relay envelope from {} while relay is inactive", from);
            return Err(CoreError::PreconditionViolation(format!(
                "Relay envelope from {} while relay is inactive",
                from
            )));
        }
        if packet.payload.is_empty() {
            return Err(CoreError::MalformedPacket(format!(
                "Empty relay envelope from {}",
                from
            )));
        }

        let origin = match role {
            RelayRole::Hub => {
                let selector = packet.peer;
                let targets = self.relay_targets(from, selector)?;

                self.link.set_transfer_mode(mode);
                self.link.set_transfer_channel(channel);
                trace!(
                    "Relaying {} bytes from {} to {:?}",
                    packet.payload.len(),
                    from,
                    targets
                );
                self.link.forward_relayed(from, &packet.payload, &targets);

                if selector != 0 && selector != -1 {
                    return Ok(());
                }
                from
            }
            _ => {
                if from != TARGET_PEER_SERVER {
                    error!("Relay envelope from non-hub peer {}", from);
                    return Err(CoreError::PreconditionViolation(format!(
                        "Relay envelope from non-hub peer {}",
                        from
                    )));
                }
                packet.peer
            }
        };

        // Inner frame: the origin is the relayed sender, never the hub.
        // process_packet rejects Command::Sys, so this re-enters at most once.
        self.link.set_remote_sender_id(origin);
        let result = self.process_packet(origin, &packet.payload);
        self.link.set_remote_sender_id(0);
        result
    }

    /// Peers a hub forwards an envelope to
    fn relay_targets(&self, from: PeerId, selector: PeerId) -> CoreResult<Vec<PeerId>> {
        if selector > 0 {
            if !self.link.is_peer_connected(selector) {
                error!("Relay from {} to unknown peer {}", from, selector);
                return Err(CoreError::PreconditionViolation(format!(
                    "Relay destination {} is not connected",
                    selector
                )));
            }
            return Ok(vec![selector]);
        }

        let excluded = selector.wrapping_neg();
        Ok(self
            .link
            .connected_peers()
            .iter()
            .copied()
            .filter(|&p| p != from && (selector == 0 || p != excluded))
            .collect())
    }
}
