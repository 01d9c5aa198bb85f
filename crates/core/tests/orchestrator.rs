use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use nat_diag_core::{AdmissionError, Orchestrator, ReceiveOutcome, Role, TickEvent};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn addr(ip: [u8; 4], port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port)
}

fn sink() -> tokio::sync::mpsc::UnboundedSender<codec::Message> {
    tokio::sync::mpsc::unbounded_channel().0
}

#[test]
fn client_rejected_without_enough_relays() {
    let mut orch = Orchestrator::new();
    let mut rng = StdRng::seed_from_u64(1);

    let relay_id = orch.alloc_id();
    orch.admit(relay_id, addr([10, 0, 0, 1], 1), Role::Relay, sink(), &mut rng)
        .unwrap();

    let client_id = orch.alloc_id();
    let err = orch
        .admit(client_id, addr([10, 0, 0, 2], 1), Role::Client, sink(), &mut rng)
        .unwrap_err();
    assert_eq!(err, AdmissionError::NotEnoughRelays);
    assert_eq!(err.message(), "Internal error: Not enough relays available.");
}

#[test]
fn duplicate_relay_ip_rejected() {
    let mut orch = Orchestrator::new();
    let mut rng = StdRng::seed_from_u64(1);

    let first = orch.alloc_id();
    orch.admit(first, addr([10, 0, 0, 1], 1), Role::Relay, sink(), &mut rng)
        .unwrap();

    let second = orch.alloc_id();
    let err = orch
        .admit(second, addr([10, 0, 0, 1], 2), Role::Relay, sink(), &mut rng)
        .unwrap_err();
    assert_eq!(err, AdmissionError::RelayAlreadyConnected);
}

#[test]
fn ports_message_rejects_duplicates_and_shortfall() {
    let mut orch = Orchestrator::new();
    let mut rng = StdRng::seed_from_u64(1);

    let relay = orch.alloc_id();
    orch.admit(relay, addr([10, 0, 0, 1], 1), Role::Relay, sink(), &mut rng)
        .unwrap();

    assert!(orch.set_ports(relay, vec![1, 2]).is_ok());
    assert!(orch.set_ports(relay, vec![3, 4]).is_err(), "ports set twice");

    let relay2 = orch.alloc_id();
    orch.admit(relay2, addr([10, 0, 0, 2], 1), Role::Relay, sink(), &mut rng)
        .unwrap();
    assert!(orch.set_ports(relay2, vec![5, 5]).is_err(), "duplicate values");
    assert!(orch.set_ports(relay2, vec![5]).is_err(), "not enough ports");
}

/// Full happy-path walk: admit two relays and a client, register ports,
/// report every probe reflection the schedule expects, and confirm the
/// client-state reaches Done() with a full-cone classification.
#[test]
fn full_probe_sequence_reaches_done_full_cone() {
    let mut orch = Orchestrator::new();
    let mut rng = StdRng::seed_from_u64(7);

    let relay_a = orch.alloc_id();
    orch.admit(relay_a, addr([203, 0, 113, 1], 0), Role::Relay, sink(), &mut rng)
        .unwrap();
    orch.set_ports(relay_a, vec![9000, 9001]).unwrap();

    let relay_b = orch.alloc_id();
    orch.admit(relay_b, addr([203, 0, 113, 2], 0), Role::Relay, sink(), &mut rng)
        .unwrap();
    orch.set_ports(relay_b, vec![9100, 9101]).unwrap();

    let client = orch.alloc_id();
    orch.admit(client, addr([198, 51, 100, 5], 0), Role::Client, sink(), &mut rng)
        .unwrap();
    let client_ports = vec![34500, 34501, 34502, 34503, 34504];
    orch.set_ports(client, client_ports.clone()).unwrap();

    // Relay A reports each client port's source port, reflected to A0.
    for (k, &nat_port) in [40000u16, 40001, 40002, 40003, 40004].iter().enumerate() {
        let event = codec::UdpEvent::tagged(9000, [198, 51, 100, 5], nat_port)
            .with_tag(client_ports[k]);
        let outcome = orch.handle_receive(relay_a, &event);
        assert_eq!(
            outcome,
            ReceiveOutcome::NatPort {
                client_port: k,
                nat_port
            }
        );
    }

    // C0 -> A1 and C0 -> B0, both full-cone (same external port as natPorts[0]).
    let event = codec::UdpEvent::tagged(9001, [198, 51, 100, 5], 40000).with_tag(client_ports[0]);
    assert_eq!(
        orch.handle_receive(relay_a, &event),
        ReceiveOutcome::NatPortDependent(40000)
    );

    let event = codec::UdpEvent::tagged(9100, [198, 51, 100, 5], 40000).with_tag(client_ports[0]);
    assert_eq!(
        orch.handle_receive(relay_b, &event),
        ReceiveOutcome::NatEndpointDependent(40000)
    );

    // Client reports arrivals on its second port from both of A's ports and from B0.
    let event = codec::UdpEvent::tagged(client_ports[1], [203, 0, 113, 1], 9000).with_tag(9000);
    assert_eq!(orch.handle_receive(client, &event), ReceiveOutcome::Received);

    let event = codec::UdpEvent::tagged(client_ports[1], [203, 0, 113, 1], 9001).with_tag(9001);
    assert_eq!(
        orch.handle_receive(client, &event),
        ReceiveOutcome::ReceivedPortDependent
    );

    let event = codec::UdpEvent::tagged(client_ports[1], [203, 0, 113, 2], 9100).with_tag(9100);
    assert_eq!(
        orch.handle_receive(client, &event),
        ReceiveOutcome::ReceivedEndpointDependent
    );

    // Hairpin: client sees its own public IP on C1 with source port == natPorts[2].
    let event =
        codec::UdpEvent::tagged(client_ports[1], [198, 51, 100, 5], 40002).with_tag(client_ports[2]);
    assert_eq!(orch.handle_receive(client, &event), ReceiveOutcome::Hairpin);

    let events = orch.tick(Instant::now());
    let finalized = events.iter().find_map(|e| match e {
        TickEvent::Finalize { client: c, info } if *c == client => Some(info.message.clone()),
        _ => None,
    });
    let message = finalized.expect("client should be Done()");
    assert!(message.contains("Hole-punching is supported."));
    assert!(message.contains("Filtering: endpoint-independent."));
    assert!(message.contains("Mapping: endpoint-independent."));
    assert!(message.contains("Hairpinning is supported."));
    assert!(message.contains("Assignment preserves contiguity."));
}

#[test]
fn removing_a_relay_collapses_its_clients() {
    let mut orch = Orchestrator::new();
    let mut rng = StdRng::seed_from_u64(3);

    let relay_a = orch.alloc_id();
    orch.admit(relay_a, addr([203, 0, 113, 1], 0), Role::Relay, sink(), &mut rng)
        .unwrap();
    let relay_b = orch.alloc_id();
    orch.admit(relay_b, addr([203, 0, 113, 2], 0), Role::Relay, sink(), &mut rng)
        .unwrap();

    let client = orch.alloc_id();
    orch.admit(client, addr([198, 51, 100, 5], 0), Role::Client, sink(), &mut rng)
        .unwrap();

    let collapsed = orch.remove(relay_a);
    assert_eq!(collapsed, vec![client]);

    // The real event loop would now close each collapsed client in turn.
    assert!(orch.remove(client).is_empty());

    // Removing the other relay finds no dependents left: the client-state
    // was already torn down above.
    let collapsed = orch.remove(relay_b);
    assert!(collapsed.is_empty());
}
