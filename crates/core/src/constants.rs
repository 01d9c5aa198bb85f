use std::time::Duration;

/// Every client-state is paired with exactly this many relays (A, B).
pub const CLIENT_RELAYS_COUNT: usize = 2;

/// Number of UDP ports a client registers and that the orchestrator probes.
pub const CLIENT_PORTS_COUNT: usize = 5;

/// Number of UDP ports a relay must register.
pub const RELAY_PORTS_COUNT: usize = 2;

/// A client-state that hasn't reached [`crate::client_state::ClientState::done`]
/// within this long since creation is finalized as a timeout.
pub const PUNCH_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the orchestrator re-emits the probe schedule. Probes are
/// unreliable UDP; repetition on every tick is the retry policy, there is no
/// separate per-probe state machine.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// How long a relay agent waits after losing its control connection before
/// it tries to reconnect.
pub const RELAY_RECONNECT_BACKOFF: Duration = Duration::from_secs(15);

/// Size of the buffer each UDP socket reader allocates per recv.
pub const UDP_RECV_BUFFER: usize = 1536;
