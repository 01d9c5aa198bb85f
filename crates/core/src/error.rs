use std::fmt;

/// Rejections raised when a new connection is admitted. Each one carries the
/// literal user-facing text sent back in the closing `Info` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    RelayAlreadyConnected,
    NotEnoughRelays,
}

impl AdmissionError {
    pub fn message(self) -> &'static str {
        match self {
            Self::RelayAlreadyConnected => "Internal error: Relay is already connected.",
            Self::NotEnoughRelays => "Internal error: Not enough relays available.",
        }
    }
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for AdmissionError {}

/// Protocol violations on an already-admitted connection. Each is fatal to
/// the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    UnknownConnection,
    DuplicatePorts,
    NotEnoughPorts { want: usize, got: usize },
    DuplicatePortValues,
}

impl ProtocolError {
    pub fn message(self) -> String {
        match self {
            Self::UnknownConnection => "Internal error: Unknown connection.".to_string(),
            Self::DuplicatePorts => "Internal error: Unexpected ports message.".to_string(),
            Self::NotEnoughPorts { want, got } => format!(
                "Internal error: Invalid ports message: not enough ports: want {want}, got {got}."
            ),
            Self::DuplicatePortValues => {
                "Internal error: Invalid ports message: ports are not unique.".to_string()
            }
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for ProtocolError {}
