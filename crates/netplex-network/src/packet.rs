//! Command framing for the multiplexed protocol
//!
//! Wire format:
//! [Flags|Command: 1 byte][Sub-protocol payload: variable]
//!
//! Only the low three bits of the first byte are the command tag; the upper
//! bits belong to whichever sub-protocol owns the command.
//!
//! System packets carry a fixed header:
//! [Command::Sys: 1 byte][SysCommand: 1 byte][Peer: 4 bytes LE][Tail: variable]

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, NetworkResult};
use crate::transport::PeerId;

/// Bits of the first byte reserved for the command tag
pub const CMD_MASK: u8 = 0x07;

/// Fixed size of a system packet header
pub const SYS_CMD_SIZE: usize = 6;

/// Top level command carried in the low bits of byte 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    /// Announce a path id mapping (path cache)
    SimplifyPath = 0,
    /// Acknowledge a path id mapping (path cache)
    ConfirmPath = 1,
    /// Remote procedure call
    RemoteCall = 2,
    /// Opaque application bytes
    Raw = 3,
    /// Replication: object spawned
    Spawn = 4,
    /// Replication: object despawned
    Despawn = 5,
    /// Replication: state sync
    Sync = 6,
    /// Membership and relay control
    Sys = 7,
}

impl Command {
    /// Extract the command from a header byte, ignoring sub-protocol flag bits
    pub fn from_header(byte: u8) -> Self {
        match byte & CMD_MASK {
            0 => Self::SimplifyPath,
            1 => Self::ConfirmPath,
            2 => Self::RemoteCall,
            3 => Self::Raw,
            4 => Self::Spawn,
            5 => Self::Despawn,
            6 => Self::Sync,
            _ => Self::Sys,
        }
    }

    /// Classify a packet by its first byte
    pub fn of(packet: &[u8]) -> NetworkResult<Self> {
        packet
            .first()
            .map(|&b| Self::from_header(b))
            .ok_or_else(|| NetworkError::InvalidPacket("Empty packet".into()))
    }

    /// Header byte with no sub-protocol flags set
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Check if this command is handled by the system/relay layer
    pub fn is_system(&self) -> bool {
        matches!(self, Command::Sys)
    }
}

/// Sub-command of a [`Command::Sys`] packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SysCommand {
    /// Hub announces a peer joining
    AddPeer = 0,
    /// Hub announces a peer leaving
    DelPeer = 1,
    /// Relay envelope around an application packet
    Relay = 2,
}

impl TryFrom<u8> for SysCommand {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0 => Ok(Self::AddPeer),
            1 => Ok(Self::DelPeer),
            2 => Ok(Self::Relay),
            _ => Err(NetworkError::InvalidPacket(format!(
                "Unknown system command: 0x{:02x}",
                value
            ))),
        }
    }
}

/// A decoded system packet.
///
/// `peer` is the subject of AddPeer/DelPeer. For Relay it is the destination
/// selector when sent towards the hub and the original source when sent by
/// the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysPacket {
    pub command: SysCommand,
    pub peer: PeerId,
    pub payload: Bytes,
}

impl SysPacket {
    /// Membership notice: `peer` joined
    pub fn add_peer(peer: PeerId) -> Self {
        Self {
            command: SysCommand::AddPeer,
            peer,
            payload: Bytes::new(),
        }
    }

    /// Membership notice: `peer` left
    pub fn del_peer(peer: PeerId) -> Self {
        Self {
            command: SysCommand::DelPeer,
            peer,
            payload: Bytes::new(),
        }
    }

    /// Relay envelope around `inner`
    pub fn relay(peer: PeerId, inner: impl Into<Bytes>) -> Self {
        Self {
            command: SysCommand::Relay,
            peer,
            payload: inner.into(),
        }
    }

    /// Total encoded size
    pub fn size(&self) -> usize {
        SYS_CMD_SIZE + self.payload.len()
    }

    /// Append the encoded packet to `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        write_sys_header(buf, self.command, self.peer);
        buf.put_slice(&self.payload);
    }

    /// Serialize packet to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Deserialize a system packet. The tail after the header is kept opaque.
    pub fn from_bytes(mut bytes: Bytes) -> NetworkResult<Self> {
        if bytes.len() < SYS_CMD_SIZE {
            return Err(NetworkError::PacketTooShort {
                needed: SYS_CMD_SIZE,
                actual: bytes.len(),
            });
        }

        let command = Command::from_header(bytes.get_u8());
        if !command.is_system() {
            return Err(NetworkError::InvalidPacket(format!(
                "Not a system packet: {:?}",
                command
            )));
        }
        let command = SysCommand::try_from(bytes.get_u8())?;
        let peer = bytes.get_i32_le();

        Ok(Self {
            command,
            peer,
            payload: bytes,
        })
    }
}

/// Write the fixed six byte system header
pub fn write_sys_header(buf: &mut BytesMut, command: SysCommand, peer: PeerId) {
    buf.reserve(SYS_CMD_SIZE);
    buf.put_u8(Command::Sys.tag());
    buf.put_u8(command as u8);
    buf.put_i32_le(peer);
}

/// Encode a relay envelope into a reusable buffer, replacing its contents
pub fn encode_relay_into(buf: &mut BytesMut, peer: PeerId, inner: &[u8]) {
    buf.clear();
    buf.reserve(SYS_CMD_SIZE + inner.len());
    write_sys_header(buf, SysCommand::Relay, peer);
    buf.put_slice(inner);
}
