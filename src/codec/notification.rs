use bytes::{BufMut, BytesMut};
use nom::number::complete::be_u8;
use nom::IResult;

use super::header::{BgpHeader, MessageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MessageHeaderError,
    OpenMessageError,
    UpdateMessageError,
    HoldTimerExpired,
    FsmError,
    Cease,
    Unknown(u8),
}

impl From<u8> for ErrorCode {
    fn from(v: u8) -> Self {
        match v {
            1 => ErrorCode::MessageHeaderError,
            2 => ErrorCode::OpenMessageError,
            3 => ErrorCode::UpdateMessageError,
            4 => ErrorCode::HoldTimerExpired,
            5 => ErrorCode::FsmError,
            6 => ErrorCode::Cease,
            v => ErrorCode::Unknown(v),
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(c: ErrorCode) -> Self {
        match c {
            ErrorCode::MessageHeaderError => 1,
            ErrorCode::OpenMessageError => 2,
            ErrorCode::UpdateMessageError => 3,
            ErrorCode::HoldTimerExpired => 4,
            ErrorCode::FsmError => 5,
            ErrorCode::Cease => 6,
            ErrorCode::Unknown(v) => v,
        }
    }
}

/// Cease sub-codes actually used by the collision arbitrator (RFC 4486).
pub const CEASE_COLLISION_RESOLUTION: u8 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub code: ErrorCode,
    pub sub_code: u8,
    pub data: Vec<u8>,
}

impl NotificationMessage {
    pub fn new(code: ErrorCode, sub_code: u8) -> Self {
        Self {
            code,
            sub_code,
            data: Vec::new(),
        }
    }

    pub fn hold_timer_expired() -> Self {
        Self::new(ErrorCode::HoldTimerExpired, 0)
    }

    pub fn cease_collision() -> Self {
        Self::new(ErrorCode::Cease, CEASE_COLLISION_RESOLUTION)
    }

    pub(super) fn parse_body<'a>(
        input: &'a [u8],
        header: &BgpHeader,
    ) -> IResult<&'a [u8], NotificationMessage> {
        let (input, code) = be_u8(input)?;
        let (input, sub_code) = be_u8(input)?;
        let data_len = (header.length as usize)
            .checked_sub(super::BGP_HEADER_LEN as usize + 2)
            .ok_or_else(|| {
                nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::LengthValue))
            })?;
        let (input, data) = nom::bytes::complete::take(data_len)(input)?;
        Ok((
            input,
            NotificationMessage {
                code: code.into(),
                sub_code,
                data: data.to_vec(),
            },
        ))
    }

    pub(super) fn emit(&self, buf: &mut BytesMut) {
        let header = BgpHeader::new(MessageType::Notification, 0);
        header.emit(buf);
        buf.put_u8(self.code.into());
        buf.put_u8(self.sub_code);
        buf.put(&self.data[..]);
        super::patch_length(buf);
    }
}
