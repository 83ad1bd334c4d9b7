//! Wire types and codecs shared by the AgentCP transports.
//!
//! Three distinct encodings live here:
//! - the `{cmd, data}` JSON envelope spoken over the session WebSocket
//!   ([`envelope`]),
//! - the CRC-checked binary frame used for stream chunks ([`frame`]),
//! - the varint + big-endian UDP packets of the heartbeat channel ([`udp`]).
//!
//! Everything in this crate is pure data — no sockets, no clocks beyond
//! timestamp helpers.

pub mod block;
pub mod envelope;
pub mod frame;
pub mod udp;

pub use block::{Block, Instruction, Message};
pub use envelope::Envelope;
pub use frame::{BinaryFrame, FrameHeader};
pub use udp::{
    HeartbeatRequest, HeartbeatResponse, InviteRequest, InviteResponse, UdpHeader, UdpMessage,
};
