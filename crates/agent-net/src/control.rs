use std::sync::Arc;

use codec::{Message, MessageCodec};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

/// The read half of a control stream. Owned by a single task: there is
/// never more than one reader, so it needs no guard.
pub type ControlReader = FramedRead<OwnedReadHalf, MessageCodec>;

/// The write half of a control stream, shared across every UDP-reader task
/// that needs to report an arrival. The stream itself is not safe for
/// concurrent writers, so every send goes through this mutex.
#[derive(Clone)]
pub struct ControlWriter {
    inner: Arc<Mutex<FramedWrite<OwnedWriteHalf, MessageCodec>>>,
}

impl ControlWriter {
    pub fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FramedWrite::new(write_half, MessageCodec))),
        }
    }

    pub async fn send(&self, message: Message) -> Result<(), codec::Error> {
        self.inner.lock().await.send(message).await
    }
}

/// Open the control connection and disable Nagle, matching how the server
/// treats an accepted socket.
pub async fn connect(addr: impl tokio::net::ToSocketAddrs) -> std::io::Result<(ControlReader, ControlWriter)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    Ok((
        FramedRead::new(read_half, MessageCodec),
        ControlWriter::new(write_half),
    ))
}
