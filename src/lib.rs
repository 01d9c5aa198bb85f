//! Rendezvous server binary: wires a TCP acceptor, per-connection framed
//! readers/writers and the [`natcore::Orchestrator`] together. All of the
//! actual inference lives in `nat-diag-core`; this crate is purely the I/O
//! and configuration shell around it.

pub mod config;
pub mod eventloop;
pub mod relays;

use std::sync::Arc;

use config::Config;

/// Opened so integration tests can start the server directly, the same way
/// `main` does, without going through a CLI invocation.
pub async fn server_main(config: Arc<Config>) -> anyhow::Result<()> {
    let allowed_relays = relays::resolve(&config.server.allowed_relay_hosts).await?;
    eventloop::run(config.server.port, allowed_relays).await
}
