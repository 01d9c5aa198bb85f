use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;
use crate::message::{Message, MessageType};

const HEADER_LEN: usize = 3;

/// `[type:u8][len:u16 big-endian][payload:len bytes]` over a reliable byte
/// stream.
///
/// One instance is shared by a connection's reader and writer halves only in
/// the sense that both use the same framing rules; the codec itself holds no
/// state beyond what [`tokio_util::codec`] needs to track a partial frame.
#[derive(Debug, Default)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let tag = src[0];
        let len = u16::from_be_bytes([src[1], src[2]]) as usize;

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let ty = MessageType::from_tag(tag).ok_or(Error::UnknownType(tag))?;

        let mut frame = src.split_to(HEADER_LEN + len);
        frame.advance(HEADER_LEN);

        Message::from_payload_bytes(ty, &frame).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Error> {
        let payload = item.to_payload_bytes()?;
        let len: u16 = payload
            .len()
            .try_into()
            .map_err(|_| Error::PayloadTooLarge(payload.len()))?;

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u8(item.message_type().tag());
        dst.put_u16(len);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{InfoKind, PortsPayload, UdpEvent};

    fn roundtrip(msg: Message) -> Message {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn ports_message_roundtrips() {
        let msg = Message::Ports(PortsPayload {
            ports: vec![34500, 34501, 34502, 34503, 34504],
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn send_message_roundtrips() {
        let msg = Message::Send(UdpEvent::tagged(34500, [198, 51, 100, 7], 40000));
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn info_message_roundtrips() {
        let msg = Message::info(InfoKind::Ok, "Test failed. UDP is blocked.");
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn decoder_waits_for_full_frame() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(
                Message::Ports(PortsPayload {
                    ports: vec![1, 2],
                }),
                &mut buf,
            )
            .unwrap();

        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        buf.put_u8(9);
        buf.put_u16(0);
        assert!(matches!(codec.decode(&mut buf), Err(Error::UnknownType(9))));
    }

    #[test]
    fn trailing_bytes_within_frame_are_tolerated() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        let payload = br#"{"ports":[1,2]}garbage"#;
        buf.put_u8(MessageType::Ports.tag());
        buf.put_u16(payload.len() as u16);
        buf.extend_from_slice(payload);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            decoded,
            Message::Ports(PortsPayload {
                ports: vec![1, 2]
            })
        );
    }
}
