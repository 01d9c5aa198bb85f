//! Plumbing shared by the client and relay probe agents: a mutex-guarded
//! control-stream writer (many UDP readers, one stream) and the
//! consecutive-port-block binder both agents use to claim their UDP sockets.

pub mod control;
pub mod udp;

pub use control::{ControlReader, ControlWriter, connect};
pub use udp::bind_port_block;
