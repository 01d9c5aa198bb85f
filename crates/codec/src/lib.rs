//! Wire protocol for the control channel between the orchestrator and its
//! client/relay agents.
//!
//! Each message is `[type:u8][len:u16 big-endian][payload:len bytes]`, where
//! the payload is a UTF-8 JSON object whose schema is fixed by `type`. The
//! four message types are `Send`, `Receive`, `Info` and `Ports`.

mod error;
mod framing;
mod message;

pub use error::Error;
pub use framing::MessageCodec;
pub use message::{InfoKind, InfoPayload, Message, MessageType, PortsPayload, UdpEvent};
