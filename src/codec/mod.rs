//! The BGP message wire codec.
//!
//! Treated by the rest of the crate as a pure function pair: `parse(bytes) ->
//! Result<Message, ParseError>` and `encode(Message) -> bytes`. Nothing here
//! touches I/O or holds state across calls.

mod header;
mod notification;
mod open;
mod update;

pub use header::{header_length, BgpHeader, MessageType, BGP_HEADER_LEN, BGP_MAX_LEN};
pub use notification::{ErrorCode, NotificationMessage, CEASE_COLLISION_RESOLUTION};
pub use open::{OpenMessage, BGP_VERSION};
pub use update::UpdateMessage;

use bytes::BytesMut;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Open(OpenMessage),
    Update(UpdateMessage),
    Notification(NotificationMessage),
    Keepalive,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("message shorter than the BGP header")]
    Truncated,
    #[error("message length {0} outside the allowed header range")]
    BadLength(u16),
    #[error("unknown message type {0}")]
    BadType(u8),
    #[error("malformed message body")]
    Malformed,
}

/// Parses exactly one full message, header included.
pub fn parse(input: &[u8]) -> Result<Message, ParseError> {
    if input.len() < BGP_HEADER_LEN as usize {
        return Err(ParseError::Truncated);
    }
    let (rest, header) = header::BgpHeader::parse(input).map_err(|e| match e {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let _ = e;
            ParseError::BadType(input[18])
        }
        nom::Err::Incomplete(_) => ParseError::Truncated,
    })?;
    if header.length < BGP_HEADER_LEN || header.length > BGP_MAX_LEN {
        return Err(ParseError::BadLength(header.length));
    }
    if input.len() < header.length as usize {
        return Err(ParseError::Truncated);
    }

    match header.typ {
        MessageType::Keepalive => Ok(Message::Keepalive),
        MessageType::Open => open::OpenMessage::parse_body(rest)
            .map(|(_, m)| Message::Open(m))
            .map_err(|_| ParseError::Malformed),
        MessageType::Update => update::UpdateMessage::parse_body(rest, &header)
            .map(|(_, m)| Message::Update(m))
            .map_err(|_| ParseError::Malformed),
        MessageType::Notification => notification::NotificationMessage::parse_body(rest, &header)
            .map(|(_, m)| Message::Notification(m))
            .map_err(|_| ParseError::Malformed),
    }
}

/// Encodes a message, including the 19-byte header with its length field set.
pub fn encode(msg: &Message) -> BytesMut {
    let mut buf = BytesMut::new();
    match msg {
        Message::Open(m) => m.emit(&mut buf),
        Message::Update(m) => m.emit(&mut buf),
        Message::Notification(m) => m.emit(&mut buf),
        Message::Keepalive => {
            let header = header::BgpHeader::new(MessageType::Keepalive, BGP_HEADER_LEN);
            header.emit(&mut buf);
        }
    }
    buf
}

/// Patches the 2-byte length field (offset 16..18) once the full body has
/// been written to `buf`.
fn patch_length(buf: &mut BytesMut) {
    const LENGTH_POS: std::ops::Range<usize> = 16..18;
    let length = buf.len() as u16;
    buf[LENGTH_POS].copy_from_slice(&length.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn keepalive_round_trips() {
        let msg = Message::Keepalive;
        let bytes = encode(&msg);
        assert_eq!(bytes.len(), BGP_HEADER_LEN as usize);
        assert_eq!(parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn open_round_trips() {
        let msg = Message::Open(OpenMessage::new(65002, 45, Ipv4Addr::new(2, 2, 2, 2)));
        let bytes = encode(&msg);
        assert_eq!(parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn update_round_trips() {
        let msg = Message::Update(UpdateMessage {
            withdrawn: vec![],
            path_attrs: vec![1, 2, 3, 4],
            nlri: vec![24, 10, 0, 0],
        });
        let bytes = encode(&msg);
        assert_eq!(parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn notification_round_trips() {
        let msg = Message::Notification(NotificationMessage::cease_collision());
        let bytes = encode(&msg);
        assert_eq!(parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn header_length_reads_length_field() {
        let msg = Message::Keepalive;
        let bytes = encode(&msg);
        assert_eq!(header_length(&bytes), BGP_HEADER_LEN);
    }

    #[test]
    fn rejects_short_length() {
        let mut bytes = encode(&Message::Keepalive);
        bytes[17] = 10; // length field now 10, below the 19-byte minimum
        assert_eq!(parse(&bytes), Err(ParseError::BadLength(10)));
    }

    #[test]
    fn rejects_unknown_type() {
        let mut bytes = encode(&Message::Keepalive);
        *bytes.last_mut().unwrap() = 200;
        assert!(matches!(parse(&bytes), Err(ParseError::BadType(200))));
    }
}
