use bytes::{BufMut, BytesMut};
use nom::number::complete::be_u16;
use nom::IResult;

use super::header::{BgpHeader, MessageType};

/// An `UPDATE` message. Path-attribute and NLRI semantics (communities,
/// AS-path, MP-reach, ...) are out of this spec's scope, so the three
/// sections are carried as opaque byte spans: enough for the FSM and RIB
/// sink to recognize and forward an update without decoding routing
/// policy it never acts on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateMessage {
    pub withdrawn: Vec<u8>,
    pub path_attrs: Vec<u8>,
    pub nlri: Vec<u8>,
}

impl UpdateMessage {
    pub(super) fn parse_body<'a>(
        input: &'a [u8],
        header: &BgpHeader,
    ) -> IResult<&'a [u8], UpdateMessage> {
        let body_len = header.length as usize - super::BGP_HEADER_LEN as usize;
        let (rest_after_msg, body) = nom::bytes::complete::take(body_len)(input)?;

        let (body, withdrawn_len) = be_u16(body)?;
        let (body, withdrawn) = nom::bytes::complete::take(withdrawn_len as usize)(body)?;
        let (body, path_attr_len) = be_u16(body)?;
        let (nlri, path_attrs) = nom::bytes::complete::take(path_attr_len as usize)(body)?;

        Ok((
            rest_after_msg,
            UpdateMessage {
                withdrawn: withdrawn.to_vec(),
                path_attrs: path_attrs.to_vec(),
                nlri: nlri.to_vec(),
            },
        ))
    }

    pub(super) fn emit(&self, buf: &mut BytesMut) {
        let header = BgpHeader::new(MessageType::Update, 0);
        header.emit(buf);
        buf.put_u16(self.withdrawn.len() as u16);
        buf.put(&self.withdrawn[..]);
        buf.put_u16(self.path_attrs.len() as u16);
        buf.put(&self.path_attrs[..]);
        buf.put(&self.nlri[..]);
        super::patch_length(buf);
    }
}
