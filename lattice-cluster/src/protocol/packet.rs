//! Packet envelope and typed command payloads.
//!
//! A packet is a small envelope — command code, correlation id, optional
//! reply-to id — around payload bytes. The payload is decoded per command
//! code, so an envelope with an unrecognized command still decodes and can
//! be skipped (the protocol is forward-tolerant of unknown commands).

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use lattice_core::serialization;
use lattice_ring::NodeDescriptor;

use crate::error::{ClusterError, ClusterResult};

/// Command codes carried in the packet envelope.
///
/// Code 1 is reserved. Values must agree across all nodes of a cluster;
/// there is no protocol version negotiation.
pub mod command {
    /// Liveness probe; empty payload, no reply.
    pub const HEARTBEAT: u16 = 0;
    /// Sender's membership descriptor.
    pub const DISTRIBUTION: u16 = 2;
    /// Addresses of peers known to the sender.
    pub const PEERLIST: u16 = 3;
    /// Key-value operation request; expects a reply.
    pub const KV_REQUEST: u16 = 4;
    /// Successful key-value reply.
    pub const KV_ACK: u16 = 5;
    /// Key-value reply for a missing key.
    pub const KV_NOT_FOUND: u16 = 6;
}

/// 128-bit packet correlation identifier.
///
/// Every packet gets a fresh random id; replies echo the request's id in
/// the envelope's `reply_to` field so the requester can match them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketId(pub [u8; 16]);

impl PacketId {
    /// The all-zero id used in `reply_to` for packets that are not replies.
    pub const NONE: PacketId = PacketId([0u8; 16]);

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Check whether this is the no-reply sentinel.
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Key-value operation codes inside a [`KvPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvCommand {
    /// Store a value.
    Set,
    /// Fetch a value.
    Get,
    /// Remove a value.
    Delete,
}

impl fmt::Display for KvCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvCommand::Set => write!(f, "set"),
            KvCommand::Get => write!(f, "get"),
            KvCommand::Delete => write!(f, "delete"),
        }
    }
}

/// Payload for key-value requests and replies.
///
/// Requests for Get/Delete carry an empty value and zero flags/expiry;
/// replies to Get carry the retrieved value and flags. `expires_at` is unix
/// seconds with 0 meaning no expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvPacket {
    /// Which operation this packet requests or answers.
    pub command: KvCommand,
    /// The key being operated on; replies echo it.
    pub key: String,
    /// Value bytes (Set requests, Get replies).
    pub value: Vec<u8>,
    /// Caller-defined flags stored alongside the value.
    pub flags: u32,
    /// Absolute expiry in unix seconds; 0 = never.
    pub expires_at: u64,
}

impl KvPacket {
    /// Build a Set request payload.
    pub fn set(key: impl Into<String>, value: Vec<u8>, flags: u32, expires_at: u64) -> Self {
        Self {
            command: KvCommand::Set,
            key: key.into(),
            value,
            flags,
            expires_at,
        }
    }

    /// Build a Get request payload.
    pub fn get(key: impl Into<String>) -> Self {
        Self {
            command: KvCommand::Get,
            key: key.into(),
            value: Vec::new(),
            flags: 0,
            expires_at: 0,
        }
    }

    /// Build a Delete request payload.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            command: KvCommand::Delete,
            key: key.into(),
            value: Vec::new(),
            flags: 0,
            expires_at: 0,
        }
    }

    /// Build a reply payload echoing just the key.
    pub fn echo(command: KvCommand, key: impl Into<String>) -> Self {
        Self {
            command,
            key: key.into(),
            value: Vec::new(),
            flags: 0,
            expires_at: 0,
        }
    }
}

/// Typed view of a decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness probe.
    Heartbeat,
    /// Sender's membership descriptor.
    Distribution(NodeDescriptor),
    /// Peer addresses known to the sender.
    PeerList(Vec<SocketAddr>),
    /// Key-value operation request.
    KvRequest(KvPacket),
    /// Successful key-value reply.
    KvAck(KvPacket),
    /// Key-value reply for a missing key.
    KvNotFound(KvPacket),
    /// Command code this node does not recognize.
    Unknown(u16),
}

impl Command {
    /// Get a human-readable name for the command type.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Heartbeat => "heartbeat",
            Command::Distribution(_) => "distribution",
            Command::PeerList(_) => "peerlist",
            Command::KvRequest(_) => "kv_request",
            Command::KvAck(_) => "kv_ack",
            Command::KvNotFound(_) => "kv_not_found",
            Command::Unknown(_) => "unknown",
        }
    }
}

/// The wire packet envelope.
///
/// Immutable once constructed. The payload is kept as raw bytes in the
/// envelope and decoded on demand via [`Packet::decode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Command code; see [`command`].
    pub command: u16,
    /// This packet's correlation id.
    pub id: PacketId,
    /// For replies, the id of the request being answered; otherwise
    /// [`PacketId::NONE`].
    pub reply_to: PacketId,
    /// Bincode-encoded payload, shaped per command code.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a heartbeat packet.
    pub fn heartbeat() -> Self {
        Self {
            command: command::HEARTBEAT,
            id: PacketId::generate(),
            reply_to: PacketId::NONE,
            payload: Vec::new(),
        }
    }

    /// Build a distribution packet announcing `descriptor`.
    pub fn distribution(descriptor: &NodeDescriptor) -> ClusterResult<Self> {
        Ok(Self {
            command: command::DISTRIBUTION,
            id: PacketId::generate(),
            reply_to: PacketId::NONE,
            payload: serialization::serialize(descriptor)?,
        })
    }

    /// Build a peerlist packet carrying known peer addresses.
    pub fn peerlist(addrs: &[SocketAddr]) -> ClusterResult<Self> {
        Ok(Self {
            command: command::PEERLIST,
            id: PacketId::generate(),
            reply_to: PacketId::NONE,
            payload: serialization::serialize(&addrs.to_vec())?,
        })
    }

    /// Build a key-value request packet.
    pub fn kv_request(kv: &KvPacket) -> ClusterResult<Self> {
        Ok(Self {
            command: command::KV_REQUEST,
            id: PacketId::generate(),
            reply_to: PacketId::NONE,
            payload: serialization::serialize(kv)?,
        })
    }

    /// Build a reply packet answering `request_id`.
    pub fn kv_reply(command: u16, request_id: PacketId, kv: &KvPacket) -> ClusterResult<Self> {
        Ok(Self {
            command,
            id: PacketId::generate(),
            reply_to: request_id,
            payload: serialization::serialize(kv)?,
        })
    }

    /// Check whether this packet answers an earlier request.
    pub fn is_reply(&self) -> bool {
        !self.reply_to.is_none()
    }

    /// Decode the payload into its typed command.
    ///
    /// Unknown command codes decode to [`Command::Unknown`]; malformed
    /// payloads for known commands are errors.
    pub fn decode(&self) -> ClusterResult<Command> {
        let cmd = match self.command {
            command::HEARTBEAT => Command::Heartbeat,
            command::DISTRIBUTION => {
                Command::Distribution(serialization::deserialize(&self.payload)?)
            }
            command::PEERLIST => Command::PeerList(serialization::deserialize(&self.payload)?),
            command::KV_REQUEST => Command::KvRequest(serialization::deserialize(&self.payload)?),
            command::KV_ACK => Command::KvAck(serialization::deserialize(&self.payload)?),
            command::KV_NOT_FOUND => {
                Command::KvNotFound(serialization::deserialize(&self.payload)?)
            }
            other => Command::Unknown(other),
        };
        Ok(cmd)
    }

    /// Decode a KV reply (ack or not-found), as returned by
    /// request/reply round trips.
    pub fn decode_kv_reply(&self) -> ClusterResult<(bool, KvPacket)> {
        match self.command {
            command::KV_ACK => Ok((true, serialization::deserialize(&self.payload)?)),
            command::KV_NOT_FOUND => Ok((false, serialization::deserialize(&self.payload)?)),
            other => Err(ClusterError::UnexpectedReply(other)),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet(command={}, id={}", self.command, self.id)?;
        if self.is_reply() {
            write!(f, ", reply_to={}", self.reply_to)?;
        }
        write!(f, ", {} payload bytes)", self.payload.len())
    }
}
