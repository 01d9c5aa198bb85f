use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use codec::{InfoKind, Message, MessageCodec};
use futures::{SinkExt, StreamExt};
use natcore::{ConnId, Orchestrator, ReceiveOutcome, Role, TickEvent};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

/// Everything a reader task or the acceptor hands back to the single loop
/// that owns the [`Orchestrator`]. The loop is the only task that ever
/// touches orchestrator state, so none of it needs locking.
enum Event {
    New {
        id: ConnId,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<Message>,
    },
    Read {
        id: ConnId,
        message: Message,
    },
    Closed {
        id: ConnId,
    },
}

/// Accept connections forever, spawning a reader and a writer task for
/// each. IDs are handed out here, before the loop has even seen the
/// connection, so a reader can tag its very first `Read` event correctly.
async fn accept_loop(listener: TcpListener, events: mpsc::Sender<Event>, next_id: Arc<AtomicU64>) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("tcp accept error: {err}");
                continue;
            }
        };
        let _ = socket.set_nodelay(true);

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();

        log::info!("tcp connection accepted: id={id}, addr={addr}");
        if events
            .send(Event::New {
                id,
                addr,
                outbox: outbox_tx,
            })
            .await
            .is_err()
        {
            return;
        }

        let (read_half, write_half) = socket.into_split();

        let reader_events = events.clone();
        tokio::spawn(async move {
            let mut framed = FramedRead::new(read_half, MessageCodec);
            loop {
                match framed.next().await {
                    Some(Ok(message)) => {
                        if reader_events.send(Event::Read { id, message }).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        log::warn!("connection {id} framing error: {err}");
                        break;
                    }
                    None => break,
                }
            }
            let _ = reader_events.send(Event::Closed { id }).await;
        });

        tokio::spawn(async move {
            let mut framed = FramedWrite::new(write_half, MessageCodec);
            while let Some(message) = outbox_rx.recv().await {
                if let Err(err) = framed.send(message).await {
                    log::warn!("connection {id} write error: {err}");
                    break;
                }
            }
        });
    }
}

/// Drive the connection table and probe schedule for as long as the
/// process runs. Never returns unless the acceptor itself dies.
pub async fn run(port: u16, allowed_relays: HashSet<IpAddr>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("nat-diag server listening: {}", listener.local_addr()?);

    // Bounded: a misbehaving or flooding peer's reader task should feel
    // backpressure rather than let the queue of unread events grow without
    // bound.
    let (events_tx, mut events_rx) = mpsc::channel(1000);
    let next_id = Arc::new(AtomicU64::new(1));
    tokio::spawn(accept_loop(listener, events_tx, next_id));

    let mut orch = Orchestrator::new();
    let mut rng = rand::rng();
    let mut ticker = tokio::time::interval(natcore::constants::TICK_INTERVAL);

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else {
                    log::warn!("event channel closed, acceptor must have died");
                    return Ok(());
                };
                handle_event(&mut orch, &allowed_relays, event, &mut rng);
            }
            _ = ticker.tick() => {
                run_tick(&mut orch, Instant::now());
            }
        }
    }
}

fn handle_event(
    orch: &mut Orchestrator,
    allowed_relays: &HashSet<IpAddr>,
    event: Event,
    rng: &mut impl rand::Rng,
) {
    match event {
        Event::New { id, addr, outbox } => {
            let role = if allowed_relays.contains(&addr.ip()) {
                Role::Relay
            } else {
                Role::Client
            };

            match orch.admit(id, addr, role, outbox.clone(), rng) {
                Ok(()) => {
                    log::info!("admitted connection {id} ({addr}) as {role:?}");
                }
                Err(err) => {
                    log::warn!("rejecting connection {id} ({addr}): {err}");
                    let _ = outbox.send(Message::info(InfoKind::Error, err.message()));
                }
            }
        }
        Event::Read { id, message } => handle_read(orch, id, message),
        Event::Closed { id } => {
            log::info!("connection {id} closed");
            close_connection(orch, id, None);
        }
    }
}

fn handle_read(orch: &mut Orchestrator, id: ConnId, message: Message) {
    match message {
        Message::Ports(payload) => {
            if let Err(err) = orch.set_ports(id, payload.ports) {
                close_connection(orch, id, Some(Message::info(InfoKind::Error, err.message())));
            }
        }
        Message::Receive(event) => {
            let outcome = orch.handle_receive(id, &event);
            if outcome != ReceiveOutcome::Ignored {
                log::trace!("connection {id} receive => {outcome:?}");
            }
        }
        other => {
            let kind = other.message_type();
            log::warn!("connection {id} sent an unexpected message type: {kind:?}");
            close_connection(
                orch,
                id,
                Some(Message::info(
                    InfoKind::Error,
                    format!("Internal error: Unexpected message type: {kind:?}."),
                )),
            );
        }
    }
}

fn run_tick(orch: &mut Orchestrator, now: Instant) {
    for event in orch.tick(now) {
        match event {
            TickEvent::Probe { target, event } => {
                if let Some(conn) = orch.connection(target) {
                    conn.enqueue(Message::Send(event));
                }
            }
            TickEvent::Finalize { client, info } => {
                log::info!("client {client} finalized: {}", info.message.replace('\n', " / "));
                close_connection(orch, client, Some(Message::Info(info)));
            }
        }
    }
}

/// Send a closing message (if any) to a connection, then remove it. If the
/// removed connection was a relay, every client that depended on it is
/// closed in turn with a "relay disconnected" notice — this is the one
/// place removal cascades.
fn close_connection(orch: &mut Orchestrator, id: ConnId, info: Option<Message>) {
    let existed = match orch.connection(id) {
        Some(conn) => {
            if let Some(msg) = info {
                conn.enqueue(msg);
            }
            true
        }
        None => false,
    };
    if !existed {
        return;
    }

    for dependent in orch.remove(id) {
        close_connection(
            orch,
            dependent,
            Some(Message::info(
                InfoKind::Error,
                "Internal error: Relay disconnected during the test.",
            )),
        );
    }
}
