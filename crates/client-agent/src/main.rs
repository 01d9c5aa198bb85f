use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use agent_net::ControlWriter;
use clap::Parser;
use codec::{InfoKind, Message, UdpEvent};
use futures::StreamExt;
use natcore::constants::CLIENT_PORTS_COUNT;
use tokio::net::UdpSocket;

const DEFAULT_HOST: &str = "127.0.0.1:23458";
const DEFAULT_LOCAL_PORT: u16 = 34500;
const MAX_BIND_ATTEMPTS: u32 = 10;

#[derive(Parser)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"), version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// server host, optionally with a port; without a port an SRV lookup
    /// for `_punchcheck._tcp.<host>` is attempted
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.debug { log::Level::Debug } else { log::Level::Info };
    simple_logger::init_with_level(level).expect("logger already initialized");

    match run(&cli.host).await {
        Ok(success) => {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            log::error!("client agent failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(host: &str) -> anyhow::Result<bool> {
    let server_addr = resolve_server(host).await?;
    log::info!("connecting to {server_addr}");
    let (mut reader, writer) = agent_net::connect(server_addr).await?;

    let sockets = agent_net::bind_port_block(DEFAULT_LOCAL_PORT, CLIENT_PORTS_COUNT as u16, MAX_BIND_ATTEMPTS).await?;
    let mut ports = Vec::with_capacity(sockets.len());
    for socket in &sockets {
        ports.push(socket.local_addr()?.port());
    }
    log::info!("bound udp ports: {ports:?}");

    writer
        .send(Message::Ports(codec::PortsPayload { ports: ports.clone() }))
        .await?;

    let sockets: Vec<Arc<UdpSocket>> = sockets.into_iter().map(Arc::new).collect();
    for socket in &sockets {
        tokio::spawn(udp_reader(socket.clone(), writer.clone()));
    }

    while let Some(message) = reader.next().await {
        match message? {
            Message::Send(event) => handle_send(&sockets, &ports, event).await?,
            Message::Info(info) => {
                let success = matches!(info.message_type, InfoKind::Ok);
                println!("{}", info.message);
                return Ok(success);
            }
            other => {
                log::warn!("ignoring unexpected message type {:?}", other.message_type());
            }
        }
    }

    anyhow::bail!("control stream closed before a result arrived")
}

async fn handle_send(sockets: &[Arc<UdpSocket>], ports: &[u16], event: UdpEvent) -> anyhow::Result<()> {
    let Some(index) = ports.iter().position(|&p| p == event.local_port) else {
        anyhow::bail!("server sent to unregistered local port {}", event.local_port);
    };

    let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(event.ip)), event.port);
    if let Err(err) = sockets[index].send_to(&event.data, dest).await {
        log::debug!("udp send to {dest} failed (ignored, best-effort): {err}");
    }
    Ok(())
}

/// Forward every datagram arriving on one UDP socket as a `Receive` report,
/// serialized onto the shared control stream.
async fn udp_reader(socket: Arc<UdpSocket>, writer: ControlWriter) {
    let local_port = match socket.local_addr() {
        Ok(addr) => addr.port(),
        Err(_) => return,
    };

    let mut buf = vec![0u8; natcore::constants::UDP_RECV_BUFFER];
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

        if writer.send(Message::Receive(event)).await.is_err() {
            log::warn!("control stream closed, udp reader on port {local_port} exiting");
            return;
        }
    }
}

async fn resolve_server(host: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Some((name, port)) = host.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            let mut addrs = tokio::net::lookup_host((name, port)).await?;
            if let Some(addr) = addrs.next() {
                return Ok(addr);
            }
        }
    }

    resolve_via_srv(host).await
}

async fn resolve_via_srv(host: &str) -> anyhow::Result<SocketAddr> {
    use hickory_resolver::TokioAsyncResolver;

    let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
    let name = format!("_punchcheck._tcp.{host}");
    let srv = resolver.srv_lookup(&name).await?;

    let target = srv
        .iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("SRV lookup for {name} returned no targets"))?;

    let resolved = resolver.lookup_ip(target.target().to_utf8()).await?;
    let ip = resolved
        .iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("SRV target {} has no address", target.target()))?;

    Ok(SocketAddr::new(ip, target.port()))
}
