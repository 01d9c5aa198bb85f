use crate::client_state::ClientState;

/// The three RFC 4787/5780 classes, applied independently to NAT filtering
/// and NAT mapping behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    EndpointIndependent,
    AddressDependent,
    AddressAndPortDependent,
}

impl Class {
    fn label(self) -> &'static str {
        match self {
            Self::EndpointIndependent => "endpoint-independent",
            Self::AddressDependent => "address-dependent",
            Self::AddressAndPortDependent => "address and port-dependent",
        }
    }
}

/// A completed classification, or the UDP-blocked verdict.
pub enum Verdict {
    Blocked,
    Classified {
        filtering: Class,
        mapping: Class,
        hole_punching: bool,
        hairpinning: bool,
        parity_preserving: bool,
        port_preserving: bool,
        contiguity_preserving: bool,
    },
}

/// Run the classification rules over a finalized (done or timed-out) client.
///
/// `local_ports` is the client's registered port list; `state` is its
/// accumulated probe observations.
pub fn classify(local_ports: &[u16], state: &ClientState) -> Verdict {
    if !state.received || state.nat_ports[0] == 0 {
        return Verdict::Blocked;
    }

    let filtering = if state.received_endpoint_dependent {
        Class::EndpointIndependent
    } else if state.received_port_dependent {
        Class::AddressDependent
    } else {
        Class::AddressAndPortDependent
    };

    let (mapping, hole_punching) = if state.nat_endpoint_dependent_port == state.nat_ports[0] {
        (Class::EndpointIndependent, true)
    } else if state.nat_port_dependent_port == state.nat_ports[0] {
        (Class::AddressDependent, false)
    } else {
        (Class::AddressAndPortDependent, false)
    };

    let (parity_preserving, port_preserving, contiguity_preserving) =
        assignment_properties(local_ports, &state.nat_ports);

    Verdict::Classified {
        filtering,
        mapping,
        hole_punching,
        hairpinning: state.received_hairpinning,
        parity_preserving,
        port_preserving,
        contiguity_preserving,
    }
}

/// Evaluate parity/port/contiguity preservation across the observed
/// (non-zero) `nat_ports` entries.
///
/// Contiguity is checked in reverse emission order (probes went out
/// `C[N-1]..C[0]`), so a NAT that allocates external ports in arrival order
/// shows up as `nat_ports[k] == nat_ports[k+1] - 1` when walked backwards. A
/// zero (unobserved) entry breaks the running contiguity check; it does not
/// affect parity/port preservation, which are evaluated per-entry.
fn assignment_properties(local_ports: &[u16], nat_ports: &[u16]) -> (bool, bool, bool) {
    let mut parity = true;
    let mut preserved = true;
    let mut contiguous = true;
    let mut prev: Option<u16> = None;

    for k in (0..local_ports.len()).rev() {
        let nat = nat_ports[k];
        if nat == 0 {
            prev = None;
            continue;
        }

        let local = local_ports[k];
        if local % 2 != nat % 2 {
            parity = false;
        }
        if local != nat {
            preserved = false;
        }
        if let Some(prev_nat) = prev {
            if prev_nat != nat + 1 {
                contiguous = false;
            }
        }
        prev = Some(nat);
    }

    (parity, preserved, contiguous)
}

/// Render the fixed, user-facing finalization text (§4.4.5 of the protocol
/// design). Line order is part of the external contract: result line,
/// hole-punching line, filtering/mapping lines, optional hairpinning line,
/// optional parity/preserved/contiguous lines.
pub fn render(local_ports: &[u16], state: &ClientState) -> String {
    match classify(local_ports, state) {
        Verdict::Blocked => "Test failed. UDP is blocked.".to_string(),
        Verdict::Classified {
            filtering,
            mapping,
            hole_punching,
            hairpinning,
            parity_preserving,
            port_preserving,
            contiguity_preserving,
        } => {
            let mut out = String::from("Test complete.\n");
            out += if hole_punching {
                "Hole-punching is supported.\n"
            } else {
                "Hole-punching is NOT supported.\n"
            };
            out += &format!(
                "Filtering: {}.\nMapping: {}.\n",
                filtering.label(),
                mapping.label()
            );
            if hairpinning {
                out += "Hairpinning is supported.\n";
            }
            if parity_preserving {
                out += "Assignment preserves parity.\n";
            }
            if port_preserving {
                out += "Assignment preserves local port.\n";
            }
            if contiguity_preserving {
                out += "Assignment preserves contiguity.\n";
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(
        nat_ports: [u16; 5],
        nat_port_dependent_port: u16,
        nat_endpoint_dependent_port: u16,
        received: bool,
        received_port_dependent: bool,
        received_endpoint_dependent: bool,
        received_hairpinning: bool,
    ) -> ClientState {
        let mut state = ClientState::new([1, 2]);
        state.nat_ports = nat_ports;
        state.nat_port_dependent_port = nat_port_dependent_port;
        state.nat_endpoint_dependent_port = nat_endpoint_dependent_port;
        state.received = received;
        state.received_port_dependent = received_port_dependent;
        state.received_endpoint_dependent = received_endpoint_dependent;
        state.received_hairpinning = received_hairpinning;
        state
    }

    #[test]
    fn udp_blocked() {
        let state = state_with([0, 0, 0, 0, 0], 0, 0, false, false, false, false);
        assert_eq!(
            render(&[34500, 34501, 34502, 34503, 34504], &state),
            "Test failed. UDP is blocked."
        );
    }

    #[test]
    fn full_cone_nat() {
        let state = state_with(
            [40000, 40001, 40002, 40003, 40004],
            40000,
            40000,
            true,
            true,
            true,
            true,
        );
        let msg = render(&[34500, 34501, 34502, 34503, 34504], &state);
        assert!(msg.contains("Hole-punching is supported.\n"));
        assert!(msg.contains("Filtering: endpoint-independent.\n"));
        assert!(msg.contains("Mapping: endpoint-independent.\n"));
        assert!(msg.contains("Hairpinning is supported.\n"));
        assert!(msg.contains("Assignment preserves parity.\n"));
        assert!(!msg.contains("Assignment preserves local port.\n"));
        assert!(msg.contains("Assignment preserves contiguity.\n"));
    }

    #[test]
    fn symmetric_nat() {
        let state = state_with([50000, 50010, 50020, 50030, 50040], 50050, 50060, true, false, false, false);
        let msg = render(&[34500, 34501, 34502, 34503, 34504], &state);
        assert!(msg.contains("Hole-punching is NOT supported.\n"));
        assert!(msg.contains("Filtering: address and port-dependent.\n"));
        assert!(msg.contains("Mapping: address and port-dependent.\n"));
        assert!(!msg.contains("Hairpinning"));
        assert!(!msg.contains("parity"));
        assert!(!msg.contains("local port"));
        assert!(!msg.contains("contiguity"));
    }

    #[test]
    fn port_preserving_cone() {
        let ports = [34500u16, 34501, 34502, 34503, 34504];
        let state = state_with(ports, 34500, 34500, true, true, true, true);
        let msg = render(&ports, &state);
        assert!(msg.contains("Assignment preserves local port.\n"));
        assert!(msg.contains("Assignment preserves parity.\n"));
        assert!(msg.contains("Assignment preserves contiguity.\n"));
    }
}
