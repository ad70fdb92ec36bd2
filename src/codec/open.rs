use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::header::{BgpHeader, MessageType};

pub const BGP_VERSION: u8 = 4;

/// An `OPEN` message. Optional-parameter negotiation (capabilities) is out of
/// scope: `options` is always empty, matching the Non-goal that drops
/// capability negotiation beyond an empty options list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenMessage {
    pub version: u8,
    pub my_as: u16,
    pub hold_time: u16,
    pub bgp_id: u32,
}

impl OpenMessage {
    pub fn new(my_as: u16, hold_time: u16, bgp_id: Ipv4Addr) -> Self {
        Self {
            version: BGP_VERSION,
            my_as,
            hold_time,
            bgp_id: u32::from(bgp_id),
        }
    }

    pub(super) fn parse_body(input: &[u8]) -> IResult<&[u8], OpenMessage> {
        let (input, version) = be_u8(input)?;
        let (input, my_as) = be_u16(input)?;
        let (input, hold_time) = be_u16(input)?;
        let (input, bgp_id) = nom::number::complete::be_u32(input)?;
        let (input, opt_param_len) = be_u8(input)?;
        let (input, _opts) = nom::bytes::complete::take(opt_param_len as usize)(input)?;
        Ok((
            input,
            OpenMessage {
                version,
                my_as,
                hold_time,
                bgp_id,
            },
        ))
    }

    pub(super) fn emit(&self, buf: &mut BytesMut) {
        let header = BgpHeader::new(MessageType::Open, 0);
        header.emit(buf);
        buf.put_u8(self.version);
        buf.put_u16(self.my_as);
        buf.put_u16(self.hold_time);
        buf.put_u32(self.bgp_id);
        buf.put_u8(0); // opt_param_len: options always empty
        super::patch_length(buf);
    }
}
