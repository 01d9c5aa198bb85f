//! The NAT classification inference engine.
//!
//! This crate holds everything the orchestrator's event loop needs to reason
//! about: the connection table, per-client probe state, the rules for
//! folding `Receive` reports into that state, the tick-driven probe
//! schedule, and the final classification/report rendering. It does no I/O
//! of its own — framing, sockets and DNS resolution live in the server
//! binary that drives this crate.

pub mod classify;
pub mod client_state;
pub mod connection;
pub mod constants;
pub mod error;
pub mod orchestrator;

pub use client_state::ClientState;
pub use connection::{ConnId, Connection, Role};
pub use error::{AdmissionError, ProtocolError};
pub use orchestrator::{Orchestrator, ReceiveOutcome, TickEvent};
