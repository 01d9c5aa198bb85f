use std::net::SocketAddr;

use codec::Message;
use tokio::sync::mpsc::UnboundedSender;

use crate::constants::{CLIENT_PORTS_COUNT, RELAY_PORTS_COUNT};

/// Identifies a connection for the lifetime of the orchestrator process.
///
/// Connections are never looked up by peer IP except when correlating a UDP
/// arrival back to its client or relay (see
/// [`crate::orchestrator::Orchestrator::handle_receive`]); everywhere else a
/// peer is its `ConnId`, not its address.
pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Relay,
}

impl Role {
    pub fn min_ports(self) -> usize {
        match self {
            Self::Client => CLIENT_PORTS_COUNT,
            Self::Relay => RELAY_PORTS_COUNT,
        }
    }
}

/// One accepted control connection, relay or client.
pub struct Connection {
    pub addr: SocketAddr,
    pub role: Role,
    /// Set at most once, by the first `Ports` message. Truncated to
    /// `role.min_ports()` entries.
    pub ports: Option<Vec<u16>>,
    outbox: UnboundedSender<Message>,
}

impl Connection {
    pub fn new(addr: SocketAddr, role: Role, outbox: UnboundedSender<Message>) -> Self {
        Self {
            addr,
            role,
            ports: None,
            outbox,
        }
    }

    pub fn min_ports(&self) -> usize {
        self.role.min_ports()
    }

    /// Queue a message for the writer task. Best-effort: if the peer's
    /// reader/writer pair has already torn down, the send silently fails and
    /// the caller finds out about it via the subsequent `Closed` event.
    pub fn enqueue(&self, message: Message) {
        let _ = self.outbox.send(message);
    }
}
