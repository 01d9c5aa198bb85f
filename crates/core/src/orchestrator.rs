use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use ahash::AHashMap;
use codec::{InfoKind, InfoPayload, UdpEvent};
use rand::seq::SliceRandom;
use tokio::sync::mpsc::UnboundedSender;

use crate::client_state::ClientState;
use crate::connection::{ConnId, Connection, Role};
use crate::constants::CLIENT_RELAYS_COUNT;
use crate::error::{AdmissionError, ProtocolError};

/// What happened when a `Receive` report was folded into a client-state.
/// Exposed mainly so callers can log something more useful than "ignored".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    NatPort { client_port: usize, nat_port: u16 },
    NatPortDependent(u16),
    NatEndpointDependent(u16),
    Received,
    ReceivedPortDependent,
    ReceivedEndpointDependent,
    Hairpin,
    Ignored,
}

/// One thing for the caller to do as a result of a tick: either relay a
/// probe `Send` command to some connection, or close out a finished client.
pub enum TickEvent {
    Probe { target: ConnId, event: UdpEvent },
    Finalize { client: ConnId, info: InfoPayload },
}

/// Owns the entire connection table and all per-client probe state.
///
/// This is deliberately synchronous and lock-free: per the design, the
/// server event loop is the only mutator, so there is nothing here to
/// protect with a `Mutex`. All I/O (accepting sockets, framing bytes,
/// resolving the relay allow-list) lives outside this crate.
#[derive(Default)]
pub struct Orchestrator {
    connections: AHashMap<ConnId, Connection>,
    clients: AHashMap<ConnId, ClientState>,
    next_id: u64,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_id(&mut self) -> ConnId {
        self.next_id += 1;
        self.next_id
    }

    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn client_ids(&self) -> Vec<ConnId> {
        self.clients.keys().copied().collect()
    }

    pub fn relay_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.role == Role::Relay)
            .count()
    }

    /// Admit a newly-accepted connection whose role has already been
    /// determined (by allow-list IP membership, resolved outside this
    /// crate). On success the connection is registered; for a client, two
    /// distinct relays are chosen uniformly at random from the currently
    /// connected pool and fixed for the client-state's lifetime.
    pub fn admit(
        &mut self,
        id: ConnId,
        addr: SocketAddr,
        role: Role,
        outbox: UnboundedSender<codec::Message>,
        rng: &mut impl rand::Rng,
    ) -> Result<(), AdmissionError> {
        match role {
            Role::Relay => {
                let duplicate = self
                    .connections
                    .values()
                    .any(|c| c.role == Role::Relay && c.addr.ip() == addr.ip());
                if duplicate {
                    return Err(AdmissionError::RelayAlreadyConnected);
                }
            }
            Role::Client => {
                let relay_ids: Vec<ConnId> = self
                    .connections
                    .iter()
                    .filter(|(_, c)| c.role == Role::Relay)
                    .map(|(id, _)| *id)
                    .collect();

                if relay_ids.len() < CLIENT_RELAYS_COUNT {
                    return Err(AdmissionError::NotEnoughRelays);
                }

                let chosen: Vec<ConnId> = relay_ids
                    .choose_multiple(rng, CLIENT_RELAYS_COUNT)
                    .copied()
                    .collect();
                self.clients
                    .insert(id, ClientState::new([chosen[0], chosen[1]]));
            }
        }

        self.connections
            .insert(id, Connection::new(addr, role, outbox));
        Ok(())
    }

    /// Apply a `Ports` message. Accepted at most once per connection; only
    /// the role's minimum number of entries is retained.
    pub fn set_ports(&mut self, id: ConnId, ports: Vec<u16>) -> Result<(), ProtocolError> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(ProtocolError::UnknownConnection)?;

        if conn.ports.is_some() {
            return Err(ProtocolError::DuplicatePorts);
        }

        let want = conn.min_ports();
        if ports.len() < want {
            return Err(ProtocolError::NotEnoughPorts {
                want,
                got: ports.len(),
            });
        }

        if !pairwise_distinct(&ports) {
            return Err(ProtocolError::DuplicatePortValues);
        }

        conn.ports = Some(ports[..want].to_vec());
        Ok(())
    }

    /// Fold a `Receive` report into whatever client-state it corresponds to,
    /// per the table in §4.4.3. Anything that doesn't resolve to a known
    /// client/relay/port triple is ignored: that's expected whenever
    /// filtering blocks a probe.
    pub fn handle_receive(&mut self, from: ConnId, event: &UdpEvent) -> ReceiveOutcome {
        let Some(tag) = event.tag() else {
            return ReceiveOutcome::Ignored;
        };
        let source_ip = IpAddr::from(event.ip);

        let Some(conn) = self.connections.get(&from) else {
            return ReceiveOutcome::Ignored;
        };

        match conn.role {
            Role::Relay => {
                let client_id = self.connections.iter().find_map(|(id, c)| {
                    (c.role == Role::Client && c.addr.ip() == source_ip && self.clients.contains_key(id))
                        .then_some(*id)
                });
                let Some(client_id) = client_id else {
                    return ReceiveOutcome::Ignored;
                };
                self.apply_client_to_relay(client_id, from, tag, event.port, event.local_port)
            }
            Role::Client => {
                let client_id = from;
                if conn.addr.ip() == source_ip {
                    return self.apply_hairpin(client_id, event);
                }

                let Some(state) = self.clients.get(&client_id) else {
                    return ReceiveOutcome::Ignored;
                };
                let relay_id = state.relays.iter().copied().find(|rid| {
                    self.connections
                        .get(rid)
                        .is_some_and(|r| r.addr.ip() == source_ip)
                });
                let Some(relay_id) = relay_id else {
                    return ReceiveOutcome::Ignored;
                };

                self.apply_relay_to_client(client_id, relay_id, event.local_port, event.port)
            }
        }
    }

    /// `C*k -> A0`, `C0 -> A1` or `C0 -> B0`: a relay reporting an arrival
    /// whose tag names the client's sending local port.
    fn apply_client_to_relay(
        &mut self,
        client_id: ConnId,
        relay_id: ConnId,
        client_port: u16,
        client_nat_port: u16,
        relay_port: u16,
    ) -> ReceiveOutcome {
        let Some(relay_index) = self.relay_index(client_id, relay_id) else {
            return ReceiveOutcome::Ignored;
        };
        let Some(client_port_index) = self.client_port_index(client_id, client_port) else {
            return ReceiveOutcome::Ignored;
        };
        let Some(relay_port_index) = self.relay_port_index(relay_id, relay_port) else {
            return ReceiveOutcome::Ignored;
        };

        let state = self
            .clients
            .get_mut(&client_id)
            .expect("client_id resolved via relay_index implies a live client-state");

        if relay_index == 0 && relay_port_index == 0 {
            state.nat_ports[client_port_index] = client_nat_port;
            ReceiveOutcome::NatPort {
                client_port: client_port_index,
                nat_port: client_nat_port,
            }
        } else if client_port_index == 0 && relay_index == 0 && relay_port_index == 1 {
            state.nat_port_dependent_port = client_nat_port;
            ReceiveOutcome::NatPortDependent(client_nat_port)
        } else if client_port_index == 0 && relay_index == 1 && relay_port_index == 0 {
            state.nat_endpoint_dependent_port = client_nat_port;
            ReceiveOutcome::NatEndpointDependent(client_nat_port)
        } else {
            ReceiveOutcome::Ignored
        }
    }

    /// `A0 -> C1`, `A1 -> C1` or `B0 -> C1`: the client reporting an arrival
    /// on its second port from one of its two relays.
    fn apply_relay_to_client(
        &mut self,
        client_id: ConnId,
        relay_id: ConnId,
        client_port: u16,
        relay_port: u16,
    ) -> ReceiveOutcome {
        let Some(relay_index) = self.relay_index(client_id, relay_id) else {
            return ReceiveOutcome::Ignored;
        };
        let Some(client_port_index) = self.client_port_index(client_id, client_port) else {
            return ReceiveOutcome::Ignored;
        };
        let Some(relay_port_index) = self.relay_port_index(relay_id, relay_port) else {
            return ReceiveOutcome::Ignored;
        };

        if client_port_index != 1 {
            return ReceiveOutcome::Ignored;
        }

        let state = self
            .clients
            .get_mut(&client_id)
            .expect("client_id resolved via relay_index implies a live client-state");

        match (relay_index, relay_port_index) {
            (0, 0) => {
                state.received = true;
                ReceiveOutcome::Received
            }
            (0, 1) => {
                state.received_port_dependent = true;
                ReceiveOutcome::ReceivedPortDependent
            }
            (1, 0) => {
                state.received_endpoint_dependent = true;
                ReceiveOutcome::ReceivedEndpointDependent
            }
            _ => ReceiveOutcome::Ignored,
        }
    }

    /// A client reporting a packet whose source is its own public IP: a
    /// hairpin loopback through the NAT.
    ///
    /// The original inference only checked the `C1` arrival against
    /// `nat_ports[2]`; here both self-send directions (`C1 <- natPorts[2]`
    /// and `C2 <- natPorts[1]`, see the tick schedule) are accepted, since a
    /// NAT that hairpins one direction but not the other is still hairpinning.
    fn apply_hairpin(&mut self, client_id: ConnId, event: &UdpEvent) -> ReceiveOutcome {
        let Some(ports) = self.connections.get(&client_id).and_then(|c| c.ports.clone()) else {
            return ReceiveOutcome::Ignored;
        };
        let Some(state) = self.clients.get_mut(&client_id) else {
            return ReceiveOutcome::Ignored;
        };

        let via_c1 = ports.get(1) == Some(&event.local_port) && event.port == state.nat_ports[2];
        let via_c2 = ports.get(2) == Some(&event.local_port) && event.port == state.nat_ports[1];

        if via_c1 || via_c2 {
            state.received_hairpinning = true;
            ReceiveOutcome::Hairpin
        } else {
            ReceiveOutcome::Ignored
        }
    }

    fn relay_index(&self, client_id: ConnId, relay_id: ConnId) -> Option<usize> {
        self.clients
            .get(&client_id)?
            .relays
            .iter()
            .position(|&r| r == relay_id)
    }

    fn client_port_index(&self, client_id: ConnId, port: u16) -> Option<usize> {
        self.connections
            .get(&client_id)?
            .ports
            .as_ref()?
            .iter()
            .position(|&p| p == port)
    }

    fn relay_port_index(&self, relay_id: ConnId, port: u16) -> Option<usize> {
        self.connections
            .get(&relay_id)?
            .ports
            .as_ref()?
            .iter()
            .position(|&p| p == port)
    }

    /// The probe commands to (re-)emit this tick for one live client, per
    /// §4.4.4. Returns nothing if the client, its relays, or any of their
    /// port lists aren't fully registered yet.
    fn probe_commands(&self, client_id: ConnId) -> Vec<(ConnId, UdpEvent)> {
        let mut out = Vec::new();

        let Some(client) = self.connections.get(&client_id) else {
            return out;
        };
        let Some(state) = self.clients.get(&client_id) else {
            return out;
        };
        let Some(client_ports) = client.ports.as_ref() else {
            return out;
        };

        let relay_a_id = state.relays[0];
        let relay_b_id = state.relays[1];
        let Some(relay_a) = self.connections.get(&relay_a_id) else {
            return out;
        };
        let Some(relay_b) = self.connections.get(&relay_b_id) else {
            return out;
        };
        let (Some(a_ports), Some(b_ports)) = (relay_a.ports.as_ref(), relay_b.ports.as_ref())
        else {
            return out;
        };

        let client_ip = to_v4(client.addr.ip());
        let a_ip = to_v4(relay_a.addr.ip());
        let b_ip = to_v4(relay_b.addr.ip());

        // C*k -> A0, emitted N-1 down to 0: the reverse order lets the
        // classifier later detect contiguous/ascending port assignment.
        for k in (0..client_ports.len()).rev() {
            out.push((
                client_id,
                UdpEvent::tagged(client_ports[k], a_ip, a_ports[0]),
            ));
        }
        // C0 -> A1
        out.push((
            client_id,
            UdpEvent::tagged(client_ports[0], a_ip, a_ports[1]),
        ));
        // C0 -> B0
        out.push((
            client_id,
            UdpEvent::tagged(client_ports[0], b_ip, b_ports[0]),
        ));

        let nat_port_c1 = state.nat_ports[1];
        if nat_port_c1 != 0 {
            // A0 -> C1, A1 -> C1
            out.push((
                relay_a_id,
                UdpEvent::tagged(a_ports[0], client_ip, nat_port_c1),
            ));
            out.push((
                relay_a_id,
                UdpEvent::tagged(a_ports[1], client_ip, nat_port_c1),
            ));
            // B0 -> C1
            out.push((
                relay_b_id,
                UdpEvent::tagged(b_ports[0], client_ip, nat_port_c1),
            ));
        }

        let nat_port_c2 = state.nat_ports[2];
        if nat_port_c1 != 0 && nat_port_c2 != 0 {
            // C1 -> (own IP, natPorts[2]), C2 -> (own IP, natPorts[1])
            out.push((
                client_id,
                UdpEvent::tagged(client_ports[1], client_ip, nat_port_c2),
            ));
            out.push((
                client_id,
                UdpEvent::tagged(client_ports[2], client_ip, nat_port_c1),
            ));
        }

        out
    }

    /// Drive one tick: finalize every client-state that is done or has timed
    /// out, and re-emit the probe schedule for everyone still live.
    pub fn tick(&mut self, now: Instant) -> Vec<TickEvent> {
        let mut events = Vec::new();

        for client_id in self.client_ids() {
            let Some(state) = self.clients.get(&client_id) else {
                continue;
            };

            if state.timed_out_at(now) || state.done() {
                let ports = self
                    .connections
                    .get(&client_id)
                    .and_then(|c| c.ports.clone())
                    .unwrap_or_default();
                let message = crate::classify::render(&ports, state);
                events.push(TickEvent::Finalize {
                    client: client_id,
                    info: InfoPayload {
                        message_type: InfoKind::Ok,
                        message,
                    },
                });
                continue;
            }

            for (target, event) in self.probe_commands(client_id) {
                events.push(TickEvent::Probe { target, event });
            }
        }

        events
    }

    /// Remove a connection (it closed, or was torn down as a protocol
    /// violation). If it was a relay, returns the clients that depended on
    /// it, so the caller can close them too with the "relay disconnected"
    /// message — this is the one case where removal cascades.
    pub fn remove(&mut self, id: ConnId) -> Vec<ConnId> {
        let Some(conn) = self.connections.remove(&id) else {
            return Vec::new();
        };
        self.clients.remove(&id);

        if conn.role == Role::Client {
            return Vec::new();
        }

        self.clients
            .iter()
            .filter(|(_, state)| state.relays.contains(&id))
            .map(|(cid, _)| *cid)
            .collect()
    }
}

fn pairwise_distinct(ports: &[u16]) -> bool {
    for i in 0..ports.len() {
        for j in (i + 1)..ports.len() {
            if ports[i] == ports[j] {
                return false;
            }
        }
    }
    true
}

fn to_v4(ip: IpAddr) -> [u8; 4] {
    match ip {
        IpAddr::V4(v4) => v4.octets(),
        // Non-goal: IPv6 is never bound by this system; fall back rather
        // than panic so a misbehaving peer can't take the loop down.
        IpAddr::V6(_) => [0, 0, 0, 0],
    }
}
