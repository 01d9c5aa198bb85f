use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The tag byte identifying a control message's payload schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Send = 0,
    Receive = 1,
    Info = 2,
    Ports = 3,
}

impl MessageType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Send,
            1 => Self::Receive,
            2 => Self::Info,
            3 => Self::Ports,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// A UDP probe directive or report: who sent/received it, and the 2-byte
/// sender-local-port tag that rides along as the payload.
///
/// `Send` and `Receive` share this shape on the wire; they are kept as
/// distinct [`Message`] variants because they travel in opposite directions
/// and mean different things to whoever reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpEvent {
    pub local_port: u16,
    pub ip: [u8; 4],
    pub port: u16,
    pub data: Vec<u8>,
}

impl UdpEvent {
    /// Build the directive for a probe: the payload is always the
    /// big-endian encoding of the sender's own local port, used by the
    /// receiving side to correlate a reflected datagram back to its origin.
    pub fn tagged(local_port: u16, ip: [u8; 4], port: u16) -> Self {
        Self {
            local_port,
            ip,
            port,
            data: local_port.to_be_bytes().to_vec(),
        }
    }

    /// Override the 2-byte tag carried in `data`, independently of
    /// `local_port`. Used when constructing a `Receive` report, where the
    /// tag names the *original sender's* local port rather than the
    /// reporting socket's own.
    pub fn with_tag(mut self, tag: u16) -> Self {
        self.data = tag.to_be_bytes().to_vec();
        self
    }

    /// Decode the 2-byte sender-local-port tag carried in `data`.
    ///
    /// Only exactly 2-byte payloads are meaningful; anything else is not a
    /// probe tag and must be ignored by the caller.
    pub fn tag(&self) -> Option<u16> {
        let bytes: [u8; 2] = self.data.as_slice().try_into().ok()?;
        Some(u16::from_be_bytes(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortsPayload {
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InfoKind {
    Error = 0,
    Ok = 1,
}

impl Serialize for InfoKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for InfoKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match u8::deserialize(deserializer)? {
            0 => Ok(Self::Error),
            1 => Ok(Self::Ok),
            other => Err(serde::de::Error::custom(format!(
                "invalid info message_type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoPayload {
    pub message_type: InfoKind,
    pub message: String,
}

/// A decoded control message: the tag byte plus its JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Send(UdpEvent),
    Receive(UdpEvent),
    Info(InfoPayload),
    Ports(PortsPayload),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Send(_) => MessageType::Send,
            Self::Receive(_) => MessageType::Receive,
            Self::Info(_) => MessageType::Info,
            Self::Ports(_) => MessageType::Ports,
        }
    }

    pub fn info(kind: InfoKind, message: impl Into<String>) -> Self {
        Self::Info(InfoPayload {
            message_type: kind,
            message: message.into(),
        })
    }

    pub(crate) fn to_payload_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(match self {
            Self::Send(p) => serde_json::to_vec(p)?,
            Self::Receive(p) => serde_json::to_vec(p)?,
            Self::Info(p) => serde_json::to_vec(p)?,
            Self::Ports(p) => serde_json::to_vec(p)?,
        })
    }

    /// Parse a payload of the given type, tolerating trailing bytes inside
    /// the declared frame length: only the leading JSON value is consumed.
    pub(crate) fn from_payload_bytes(
        ty: MessageType,
        bytes: &[u8],
    ) -> Result<Self, Error> {
        let mut de = serde_json::Deserializer::from_slice(bytes);

        Ok(match ty {
            MessageType::Send => Self::Send(UdpEvent::deserialize(&mut de)?),
            MessageType::Receive => Self::Receive(UdpEvent::deserialize(&mut de)?),
            MessageType::Info => Self::Info(InfoPayload::deserialize(&mut de)?),
            MessageType::Ports => Self::Ports(PortsPayload::deserialize(&mut de)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrips_through_send_event() {
        let event = UdpEvent::tagged(34502, [203, 0, 113, 5], 40000);
        assert_eq!(event.tag(), Some(34502));
    }

    #[test]
    fn non_two_byte_payload_has_no_tag() {
        let event = UdpEvent {
            local_port: 1,
            ip: [0, 0, 0, 0],
            port: 1,
            data: vec![1, 2, 3],
        };
        assert_eq!(event.tag(), None);
    }
}
