use crate::discv5::{
    messages::{Packet, PacketCodecError},
    session::SessionKeyProvider,
};

use bytes::BytesMut;
use ethereum_types::H256;
use std::io::{Error, ErrorKind};
use tokio_util::codec::{Decoder, Encoder};

/// Frame decoder for discv5 datagrams addressed to `local_node_id`,
/// one packet per datagram.
#[derive(Debug)]
pub struct Discv5Codec<K> {
    local_node_id: H256,
    keys: K,
}

impl<K: SessionKeyProvider> Discv5Codec<K> {
    pub fn new(local_node_id: H256, keys: K) -> Self {
        Self {
            local_node_id,
            keys,
        }
    }
}

impl<K: SessionKeyProvider> Decoder for Discv5Codec<K> {
    type Item = Packet;
    type Error = PacketCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.is_empty() {
            return Ok(None);
        }
        let datagram = buf.split_to(buf.len());
        Ok(Some(Packet::decode(
            &self.local_node_id,
            &self.keys,
            &datagram,
        )?))
    }
}

impl<K: SessionKeyProvider> Encoder<Packet> for Discv5Codec<K> {
    type Error = PacketCodecError;

    fn encode(&mut self, _packet: Packet, _buf: &mut BytesMut) -> Result<(), Self::Error> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "Discv5Codec is receive-only; senders mask and encrypt their own packets",
        )
        .into())
    }
}
