//! Raw channel
//!
//! Opaque application bytes behind a single command byte.

use bytes::{BufMut, Bytes};
use tracing::trace;

use netplex_network::{Command, ConnectionStatus, PeerId, TransferMode};

use crate::engine::Multiplexer;
use crate::error::{CoreError, CoreResult};
use crate::events::MultiplexerEvent;

impl Multiplexer {
    /// Send opaque bytes to `to` (peer id, 0 for all, -id for all but id)
    pub fn send_raw(
        &mut self,
        data: &[u8],
        to: PeerId,
        mode: TransferMode,
        channel: u8,
    ) -> CoreResult<()> {
        if data.is_empty() {
            return Err(CoreError::InvalidParameter(
                "Trying to send an empty raw packet".into(),
            ));
        }
        if self.link.connection_status() != ConnectionStatus::Connected {
            return Err(CoreError::NotConfigured(
                "Trying to send a raw packet while no transport is connected".into(),
            ));
        }

        self.raw_buffer.clear();
        self.raw_buffer.reserve(data.len() + 1);
        self.raw_buffer.put_u8(Command::Raw.tag());
        self.raw_buffer.put_slice(data);

        self.link.set_transfer_mode(mode);
        self.link.set_transfer_channel(channel);
        self.link.send_command(to, &self.raw_buffer)
    }

    pub(crate) fn process_raw(&mut self, from: PeerId, packet: &[u8]) -> CoreResult<()> {
        if packet.len() < 2 {
            return Err(CoreError::MalformedPacket(format!(
                "Raw packet from {} carries no payload",
                from
            )));
        }
        trace!("Raw packet of {} bytes from {}", packet.len() - 1, from);
        self.emit(MultiplexerEvent::PeerPacket {
            from,
            payload: Bytes::copy_from_slice(&packet[1..]),
        });
        Ok(())
    }
}
