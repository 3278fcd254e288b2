use crate::discv4::messages::{Message, Packet};

use bytes::BytesMut;
use std::io::{Error, ErrorKind};
use tokio_util::codec::{Decoder, Encoder};

/// Frame decoder for discv4 datagrams, one packet per datagram.
#[derive(Debug, Default)]
pub struct Discv4Codec;

impl Discv4Codec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Discv4Codec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.is_empty() {
            return Ok(None);
        }
        let datagram = buf.split_to(buf.len());
        Ok(Some(Packet::decode(&datagram).map_err(|err| {
            Error::new(ErrorKind::InvalidData, err.to_string())
        })?))
    }
}

impl Encoder<Message> for Discv4Codec {
    type Error = Error;

    fn encode(&mut self, _message: Message, _buf: &mut BytesMut) -> Result<(), Self::Error> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "Discv4Codec is receive-only; senders sign and encode their own packets",
        ))
    }
}
