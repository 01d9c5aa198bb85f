use std::fmt;

/// Errors that can occur while framing or decoding a control message.
///
/// Any of these is fatal to the connection it occurred on: the caller is
/// expected to close the stream, never to attempt recovery mid-frame.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    UnknownType(u8),
    PayloadTooLarge(usize),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {}", e),
            Self::Json(e) => write!(f, "malformed message payload: {}", e),
            Self::UnknownType(tag) => write!(f, "unknown message type: {}", tag),
            Self::PayloadTooLarge(size) => {
                write!(f, "payload of {} bytes exceeds the u16 frame length", size)
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
