//! Wire protocol: packet envelope, typed commands, and framing.

pub mod framing;
pub mod packet;

pub use framing::PacketCodec;
pub use packet::{command, Command, KvCommand, KvPacket, Packet, PacketId};
