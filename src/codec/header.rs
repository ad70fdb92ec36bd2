use bytes::{BufMut, BytesMut};
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

pub const BGP_HEADER_LEN: u16 = 19;
pub const BGP_MAX_LEN: u16 = 4096;
const MARKER: [u8; 16] = [0xff; 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    Keepalive = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(MessageType::Open),
            2 => Ok(MessageType::Update),
            3 => Ok(MessageType::Notification),
            4 => Ok(MessageType::Keepalive),
            v => Err(v),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BgpHeader {
    pub length: u16,
    pub typ: MessageType,
}

impl BgpHeader {
    pub fn new(typ: MessageType, length: u16) -> Self {
        Self { length, typ }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], BgpHeader> {
        let (input, _marker) = nom::bytes::complete::take(16usize)(input)?;
        let (input, length) = be_u16(input)?;
        let (input, typ) = be_u8(input)?;
        let typ = typ.try_into().map_err(|_| {
            nom::Err::Error(nom::error::make_error(input, nom::error::ErrorKind::Tag))
        })?;
        Ok((input, BgpHeader { length, typ }))
    }

    pub fn emit(&self, buf: &mut BytesMut) {
        buf.put(&MARKER[..]);
        buf.put_u16(self.length);
        buf.put_u8(self.typ as u8);
    }
}

/// Reads the length field out of a prefix of at least [`BGP_HEADER_LEN`] bytes.
pub fn header_length(input: &[u8]) -> u16 {
    debug_assert!(input.len() >= BGP_HEADER_LEN as usize);
    u16::from_be_bytes([input[16], input[17]])
}
