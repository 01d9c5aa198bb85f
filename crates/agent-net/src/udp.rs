use std::io;

use tokio::net::UdpSocket;

/// Bind `count` consecutive UDP ports starting at `start`. If any port in
/// the block is unavailable, the whole block shifts up by `count` and the
/// attempt is retried, up to `max_attempts` times.
pub async fn bind_port_block(start: u16, count: u16, max_attempts: u32) -> io::Result<Vec<UdpSocket>> {
    let mut base = start;
    let mut last_err = None;

    for _ in 0..max_attempts {
        match bind_block(base, count).await {
            Ok(sockets) => return Ok(sockets),
            Err(err) => {
                log::warn!("failed to bind udp port block starting at {base}: {err}");
                last_err = Some(err);
                base = base.saturating_add(count);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "no ports available")))
}

async fn bind_block(start: u16, count: u16) -> io::Result<Vec<UdpSocket>> {
    let mut sockets = Vec::with_capacity(count as usize);
    for offset in 0..count {
        let port = start
            .checked_add(offset)
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "port block overflowed u16"))?;
        sockets.push(UdpSocket::bind(("0.0.0.0", port)).await?);
    }
    Ok(sockets)
}
