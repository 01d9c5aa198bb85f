use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use agent_net::{ControlReader, ControlWriter};
use clap::Parser;
use codec::{Message, UdpEvent};
use futures::StreamExt;
use natcore::constants::{RELAY_PORTS_COUNT, RELAY_RECONNECT_BACKOFF, UDP_RECV_BUFFER};
use tokio::net::UdpSocket;

#[derive(Parser)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"), version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// server host:port
    #[arg(long)]
    host: String,

    /// verbose logging
    #[arg(long)]
    debug: bool,

    /// local udp port to reflect traffic on; repeat at least twice
    #[arg(long = "port", required = true)]
    ports: Vec<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.debug { log::Level::Debug } else { log::Level::Info };
    simple_logger::init_with_level(level).expect("logger already initialized");

    if cli.ports.len() < RELAY_PORTS_COUNT {
        anyhow::bail!(
            "relay requires at least {RELAY_PORTS_COUNT} -port flags, got {}",
            cli.ports.len()
        );
    }

    let host: SocketAddr = tokio::net::lookup_host(&cli.host)
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("could not resolve {}", cli.host))?;

    let mut sockets = Vec::with_capacity(cli.ports.len());
    for port in &cli.ports {
        sockets.push(Arc::new(UdpSocket::bind(("0.0.0.0", *port)).await?));
    }
    log::info!("bound udp ports: {:?}", cli.ports);

    // Sockets are bound once and outlive every reconnection attempt below.
    loop {
        match connect_and_serve(host, &sockets).await {
            Ok(()) => log::info!("control stream closed by server, reconnecting"),
            Err(err) => log::warn!("control connection failed: {err:#}"),
        }
        log::info!("reconnecting in {:?}", RELAY_RECONNECT_BACKOFF);
        tokio::time::sleep(RELAY_RECONNECT_BACKOFF).await;
    }
}

async fn connect_and_serve(host: SocketAddr, sockets: &[Arc<UdpSocket>]) -> anyhow::Result<()> {
    log::info!("connecting to {host}");
    let (mut reader, writer) = agent_net::connect(host).await?;

    let mut ports = Vec::with_capacity(sockets.len());
    for socket in sockets {
        ports.push(socket.local_addr()?.port());
    }
    writer
        .send(Message::Ports(codec::PortsPayload { ports: ports.clone() }))
        .await?;

    // Readers are scoped to this connection attempt: while disconnected,
    // writes through a stale `ControlWriter` are simply dropped (its
    // `FramedWrite` errors on the next send), so nothing needs to know the
    // writer went away beyond aborting these tasks on disconnect.
    let reader_tasks: Vec<_> = sockets
        .iter()
        .map(|socket| tokio::spawn(udp_reader(socket.clone(), writer.clone())))
        .collect();

    let result = control_loop(&mut reader, sockets, &ports).await;
    for task in reader_tasks {
        task.abort();
    }
    result
}

/// Service `Send` commands; `Info` is ignored (the relay never reports a
/// test result, it only reflects traffic).
async fn control_loop(reader: &mut ControlReader, sockets: &[Arc<UdpSocket>], ports: &[u16]) -> anyhow::Result<()> {
    while let Some(message) = reader.next().await {
        match message? {
            Message::Send(event) => handle_send(sockets, ports, event).await,
            Message::Info(_) => {}
            other => log::warn!("ignoring unexpected message type {:?}", other.message_type()),
        }
    }
    Ok(())
}

async fn handle_send(sockets: &[Arc<UdpSocket>], ports: &[u16], event: UdpEvent) {
    let Some(index) = ports.iter().position(|&p| p == event.local_port) else {
        log::warn!("server sent to unregistered local port {}", event.local_port);
        return;
    };

    let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(event.ip)), event.port);
    if let Err(err) = sockets[index].send_to(&event.data, dest).await {
        log::debug!("udp send to {dest} failed (ignored, best-effort): {err}");
    }
}

async fn udp_reader(socket: Arc<UdpSocket>, writer: ControlWriter) {
    let local_port = match socket.local_addr() {
        Ok(addr) => addr.port(),
        Err(_) => return,
    };

    let mut buf = vec![0u8; UDP_RECV_BUFFER];
    loop {
        let (size, from) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("udp socket on port {local_port} recv error: {err}");
                continue;
            }
        };

        let ip = match from.ip() {
            IpAddr::V4(v4) => v4.octets(),
            IpAddr::V6(_) => continue,
        };

        let event = UdpEvent {
            local_port,
            ip,
            port: from.port(),
            data: buf[..size].to_vec(),
        };

        // Best-effort: if the stream is mid-reconnect this send fails and is
        // dropped, same as any other lost probe.
        let _ = writer.send(Message::Receive(event)).await;
    }
}
