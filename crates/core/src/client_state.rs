use std::time::Instant;

use crate::connection::ConnId;
use crate::constants::{CLIENT_PORTS_COUNT, PUNCH_TIMEOUT};

/// Per-client probe state, born when the client connection is admitted and
/// paired with two relays, and torn down with the connection.
///
/// A zero entry in `nat_ports` (and in the two single-port fields) is the
/// "not yet observed" sentinel, never a real NAT-assigned source port.
pub struct ClientState {
    created: Instant,

    /// `relays[0]` is A, `relays[1]` is B.
    pub relays: [ConnId; 2],

    pub nat_ports: [u16; CLIENT_PORTS_COUNT],
    pub nat_port_dependent_port: u16,
    pub nat_endpoint_dependent_port: u16,

    pub received: bool,
    pub received_port_dependent: bool,
    pub received_endpoint_dependent: bool,
    pub received_hairpinning: bool,
}

impl ClientState {
    pub fn new(relays: [ConnId; 2]) -> Self {
        Self {
            created: Instant::now(),
            relays,
            nat_ports: [0; CLIENT_PORTS_COUNT],
            nat_port_dependent_port: 0,
            nat_endpoint_dependent_port: 0,
            received: false,
            received_port_dependent: false,
            received_endpoint_dependent: false,
            received_hairpinning: false,
        }
    }

    pub fn done(&self) -> bool {
        self.nat_ports.iter().all(|&p| p != 0)
            && self.nat_port_dependent_port != 0
            && self.nat_endpoint_dependent_port != 0
            && self.received
            && self.received_port_dependent
            && self.received_endpoint_dependent
            && self.received_hairpinning
    }

    pub fn timed_out_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created) > PUNCH_TIMEOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_done_until_every_field_set() {
        let mut state = ClientState::new([1, 2]);
        assert!(!state.done());

        state.nat_ports = [1, 2, 3, 4, 5];
        state.nat_port_dependent_port = 1;
        state.nat_endpoint_dependent_port = 1;
        state.received = true;
        state.received_port_dependent = true;
        state.received_endpoint_dependent = true;
        assert!(!state.done(), "hairpin flag still missing");

        state.received_hairpinning = true;
        assert!(state.done());
    }
}
