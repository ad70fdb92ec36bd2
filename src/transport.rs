//! Framed message I/O over a raw byte-stream transport.
//!
//! `FramedReader` buffers arbitrary-sized reads until it can split off
//! exactly one BGP message (header length field included) and hands the
//! rest back to itself as residual. The writer side is stateless: encode,
//! then one transport write.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{self, Message, BGP_HEADER_LEN};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("connection closed")]
    Closed,
    #[error("connection refused")]
    Refused,
    #[error("read timed out")]
    Timeout,
    #[error("parse error: {0}")]
    ParseError(#[from] codec::ParseError),
    #[error("transport error: {0}")]
    TransportOther(#[source] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("connection closed")]
    Closed,
    #[error("connection refused")]
    Refused,
    #[error("write timed out")]
    Timeout,
    #[error("transport error: {0}")]
    TransportOther(#[source] std::io::Error),
}

fn classify_read_error(e: std::io::Error) -> ReadError {
    use std::io::ErrorKind::*;
    match e.kind() {
        ConnectionRefused => ReadError::Refused,
        TimedOut => ReadError::Timeout,
        ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof => ReadError::Closed,
        _ => ReadError::TransportOther(e),
    }
}

fn classify_write_error(e: std::io::Error) -> WriteError {
    use std::io::ErrorKind::*;
    match e.kind() {
        ConnectionRefused => WriteError::Refused,
        TimedOut => WriteError::Timeout,
        ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof => WriteError::Closed,
        _ => WriteError::TransportOther(e),
    }
}

/// Reconstructs exactly one BGP message per [`read`](FramedReader::read)
/// call, regardless of how the underlying transport chunks bytes.
pub struct FramedReader<R> {
    conn: R,
    residual: Option<BytesMut>,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(conn: R) -> Self {
        Self {
            conn,
            residual: None,
        }
    }

    pub async fn read(&mut self) -> Result<Message, ReadError> {
        loop {
            if let Some(buf) = &self.residual {
                if buf.len() >= BGP_HEADER_LEN as usize {
                    let length = codec::header_length(buf) as usize;
                    if buf.len() >= length {
                        let mut full = self.residual.take().unwrap();
                        let message = full.split_to(length);
                        self.residual = (!full.is_empty()).then_some(full);
                        return codec::parse(&message).map_err(ReadError::from);
                    }
                }
            }

            let mut chunk = [0u8; 4096];
            let n = self
                .conn
                .read(&mut chunk)
                .await
                .map_err(classify_read_error)?;
            if n == 0 {
                return Err(ReadError::Closed);
            }
            self.residual
                .get_or_insert_with(BytesMut::new)
                .extend_from_slice(&chunk[..n]);
        }
    }
}

/// Stateless message writer: encode via the codec, then one transport
/// write.
pub struct FramedWriter<W> {
    conn: W,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(conn: W) -> Self {
        Self { conn }
    }

    pub async fn write(&mut self, msg: &Message) -> Result<(), WriteError> {
        let bytes = codec::encode(msg);
        self.conn
            .write_all(&bytes)
            .await
            .map_err(classify_write_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OpenMessage;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reassembles_a_message_split_across_reads() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = FramedReader::new(server);

        let msg = Message::Open(OpenMessage::new(65001, 90, Ipv4Addr::new(3, 3, 3, 3)));
        let bytes = codec::encode(&msg);

        let writer = tokio::spawn(async move {
            for byte in bytes.iter() {
                client.write_all(&[*byte]).await.unwrap();
            }
        });

        let decoded = reader.read().await.unwrap();
        assert_eq!(decoded, msg);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn reassembles_two_messages_delivered_in_one_chunk() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = FramedReader::new(server);

        let a = Message::Keepalive;
        let b = Message::Open(OpenMessage::new(65002, 45, Ipv4Addr::new(4, 4, 4, 4)));
        let mut bytes = codec::encode(&a);
        bytes.extend_from_slice(&codec::encode(&b));

        client.write_all(&bytes).await.unwrap();
        drop(client);

        assert_eq!(reader.read().await.unwrap(), a);
        assert_eq!(reader.read().await.unwrap(), b);
    }

    #[tokio::test]
    async fn eof_yields_closed() {
        let (client, server) = tokio::io::duplex(4096);
        let mut reader = FramedReader::new(server);
        drop(client);
        assert!(matches!(reader.read().await, Err(ReadError::Closed)));
    }

    #[tokio::test]
    async fn write_round_trips_through_read() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FramedWriter::new(client);
        let mut reader = FramedReader::new(server);

        let msg = Message::Keepalive;
        writer.write(&msg).await.unwrap();
        assert_eq!(reader.read().await.unwrap(), msg);
    }
}
