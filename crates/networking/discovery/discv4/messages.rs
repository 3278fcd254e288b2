use bytes::{BufMut, Bytes};
use ethereum_types::{H256, H512, H520};
use etherscope_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use keccak_hash::keccak;
use secp256k1::{SECP256K1, SecretKey};

use crate::{
    types::{Endpoint, Node, NodeRecord},
    utils::{RecoveryError, recover_public_key},
};

pub(crate) const MAC_SIZE: usize = 32;
const SIGNATURE_SIZE: usize = 65;
/// mac(32) || signature(65); the type byte follows.
const HEADER_SIZE: usize = MAC_SIZE + SIGNATURE_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum PacketDecodeErr {
    #[error(transparent)]
    RLPDecodeError(#[from] RLPDecodeError),
    #[error(transparent)]
    RecoveryError(#[from] RecoveryError),
    #[error("packet below minimum size")]
    InvalidSize,
    #[error("packet hash does not match its content")]
    HashMismatch,
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Ping,
    Pong,
    FindNode,
    Neighbors,
    ENRRequest,
    ENRResponse,
}

impl PacketKind {
    pub const fn code(self) -> u8 {
        match self {
            PacketKind::Ping => 0x01,
            PacketKind::Pong => 0x02,
            PacketKind::FindNode => 0x03,
            PacketKind::Neighbors => 0x04,
            PacketKind::ENRRequest => 0x05,
            PacketKind::ENRResponse => 0x06,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(PacketKind::Ping),
            0x02 => Some(PacketKind::Pong),
            0x03 => Some(PacketKind::FindNode),
            0x04 => Some(PacketKind::Neighbors),
            0x05 => Some(PacketKind::ENRRequest),
            0x06 => Some(PacketKind::ENRResponse),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PacketKind::Ping => "PING",
            PacketKind::Pong => "PONG",
            PacketKind::FindNode => "FINDNODE",
            PacketKind::Neighbors => "NEIGHBORS",
            PacketKind::ENRRequest => "ENRREQUEST",
            PacketKind::ENRResponse => "ENRRESPONSE",
        }
    }
}

/// A fully authenticated discv4 packet.
/// Construction only happens through [`Packet::decode`], so holding one
/// means the mac checked out and the sender key was recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    hash: H256,
    signature: H520,
    message: Message,
    public_key: H512,
}

impl Packet {
    /// Decodes `hash || signature || packet-type || packet-data`.
    ///
    /// The hash covers everything after itself and guards the packet against
    /// truncation; the signature covers the type byte and the body and
    /// yields the sender's public key. Errors are exclusive: no partially
    /// decoded packet is ever returned.
    pub fn decode(encoded_packet: &[u8]) -> Result<Packet, PacketDecodeErr> {
        if encoded_packet.len() < HEADER_SIZE + 1 {
            return Err(PacketDecodeErr::InvalidSize);
        }

        let hash = H256::from_slice(&encoded_packet[..MAC_SIZE]);
        let signature: [u8; SIGNATURE_SIZE] = encoded_packet[MAC_SIZE..HEADER_SIZE]
            .try_into()
            .map_err(|_| PacketDecodeErr::InvalidSize)?;
        let packet_type = encoded_packet[HEADER_SIZE];
        let signed_payload = &encoded_packet[HEADER_SIZE..];

        if hash != keccak(&encoded_packet[MAC_SIZE..]) {
            return Err(PacketDecodeErr::HashMismatch);
        }

        let digest = keccak(signed_payload);
        let public_key = recover_public_key(&digest, &signature)?;

        let kind = PacketKind::from_code(packet_type)
            .ok_or(PacketDecodeErr::UnknownPacketType(packet_type))?;
        let message = Message::decode_with_kind(kind, &signed_payload[1..])?;

        Ok(Packet {
            hash,
            signature: H520(signature),
            message,
            public_key,
        })
    }

    pub fn get_hash(&self) -> H256 {
        self.hash
    }

    pub fn get_signature(&self) -> H520 {
        self.signature
    }

    pub fn get_message(&self) -> &Message {
        &self.message
    }

    pub fn get_public_key(&self) -> H512 {
        self.public_key
    }

    pub fn get_node_id(&self) -> H256 {
        crate::utils::node_id(&self.public_key)
    }

    pub fn kind(&self) -> PacketKind {
        self.message.packet_kind()
    }
}

// All messages may carry more fields than this schema knows about. The
// unknown tail is captured verbatim in `extra` and written back on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A ping message. Should be responded to with a Pong message.
    Ping(PingMessage),
    Pong(PongMessage),
    FindNode(FindNodeMessage),
    Neighbors(NeighborsMessage),
    ENRRequest(ENRRequestMessage),
    ENRResponse(ENRResponseMessage),
}

impl Message {
    pub fn packet_kind(&self) -> PacketKind {
        match self {
            Message::Ping(_) => PacketKind::Ping,
            Message::Pong(_) => PacketKind::Pong,
            Message::FindNode(_) => PacketKind::FindNode,
            Message::Neighbors(_) => PacketKind::Neighbors,
            Message::ENRRequest(_) => PacketKind::ENRRequest,
            Message::ENRResponse(_) => PacketKind::ENRResponse,
        }
    }

    /// Produces the full wire image: `hash || signature || type || body`.
    pub fn encode_with_header(&self, buf: &mut dyn BufMut, signer: &SecretKey) {
        let mut data: Vec<u8> = vec![0; SIGNATURE_SIZE];
        self.encode_with_type(&mut data);

        let digest = keccak(&data[SIGNATURE_SIZE..]);
        let message = secp256k1::Message::from_digest_slice(digest.as_bytes())
            .expect("keccak digest is 32 bytes");
        let (recovery_id, signature) = SECP256K1
            .sign_ecdsa_recoverable(&message, signer)
            .serialize_compact();

        data[..SIGNATURE_SIZE - 1].copy_from_slice(&signature);
        data[SIGNATURE_SIZE - 1] = recovery_id.to_i32() as u8;

        let hash = keccak(&data);
        buf.put_slice(hash.as_bytes());
        buf.put_slice(&data);
    }

    fn encode_with_type(&self, buf: &mut dyn BufMut) {
        buf.put_u8(self.packet_kind().code());
        match self {
            Message::Ping(msg) => msg.encode(buf),
            Message::Pong(msg) => msg.encode(buf),
            Message::FindNode(msg) => msg.encode(buf),
            Message::Neighbors(msg) => msg.encode(buf),
            Message::ENRRequest(msg) => msg.encode(buf),
            Message::ENRResponse(msg) => msg.encode(buf),
        }
    }

    /// Decodes a message body for a known packet kind.
    /// Data past the message list is ignored, as the wire spec requires.
    pub fn decode_with_kind(kind: PacketKind, msg: &[u8]) -> Result<Message, RLPDecodeError> {
        match kind {
            PacketKind::Ping => {
                let (ping, _rest) = PingMessage::decode_unfinished(msg)?;
                Ok(Message::Ping(ping))
            }
            PacketKind::Pong => {
                let (pong, _rest) = PongMessage::decode_unfinished(msg)?;
                Ok(Message::Pong(pong))
            }
            PacketKind::FindNode => {
                let (find_node, _rest) = FindNodeMessage::decode_unfinished(msg)?;
                Ok(Message::FindNode(find_node))
            }
            PacketKind::Neighbors => {
                let (neighbors, _rest) = NeighborsMessage::decode_unfinished(msg)?;
                Ok(Message::Neighbors(neighbors))
            }
            PacketKind::ENRRequest => {
                let (enr_request, _rest) = ENRRequestMessage::decode_unfinished(msg)?;
                Ok(Message::ENRRequest(enr_request))
            }
            PacketKind::ENRResponse => {
                let (enr_response, _rest) = ENRResponseMessage::decode_unfinished(msg)?;
                Ok(Message::ENRResponse(enr_response))
            }
        }
    }
}

/// Collects every item left in the list, prefix included, without
/// interpreting it.
fn decode_tail<'a>(mut decoder: Decoder<'a>) -> Result<(Vec<Bytes>, Decoder<'a>), RLPDecodeError> {
    let mut extra = Vec::new();
    while !decoder.is_done() {
        let (item, rest) = decoder.get_encoded_item()?;
        extra.push(Bytes::from(item));
        decoder = rest;
    }
    Ok((extra, decoder))
}

fn encode_tail<'a>(mut encoder: Encoder<'a>, extra: &[Bytes]) -> Encoder<'a> {
    for item in extra {
        encoder = encoder.encode_raw(item);
    }
    encoder
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingMessage {
    /// The Ping message version. Should be set to 4, but mustn't be enforced.
    pub version: u8,
    /// The endpoint of the sender.
    pub from: Endpoint,
    /// The endpoint of the receiver.
    pub to: Endpoint,
    /// The expiration time of the message. If the message is older than this
    /// time, it shouldn't be responded to.
    pub expiration: u64,
    /// The ENR sequence number of the sender (EIP-868). Optional.
    pub enr_seq: Option<u64>,
    /// Raw trailing fields beyond the known schema.
    pub extra: Vec<Bytes>,
}

impl PingMessage {
    pub fn new(from: Endpoint, to: Endpoint, expiration: u64) -> Self {
        Self {
            version: 4,
            from,
            to,
            expiration,
            enr_seq: None,
            extra: Vec::new(),
        }
    }

    pub fn with_enr_seq(self, enr_seq: u64) -> Self {
        Self {
            enr_seq: Some(enr_seq),
            ..self
        }
    }
}

impl RLPEncode for PingMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        let encoder = Encoder::new(buf)
            .encode_field(&self.version)
            .encode_field(&self.from)
            .encode_field(&self.to)
            .encode_field(&self.expiration)
            .encode_optional_field(&self.enr_seq);
        encode_tail(encoder, &self.extra).finish();
    }
}

impl RLPDecode for PingMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (version, decoder) = decoder.decode_field("version")?;
        let (from, decoder) = decoder.decode_field("from")?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let (enr_seq, decoder) = decoder.decode_optional_field();
        let (extra, decoder) = decode_tail(decoder)?;

        let ping = PingMessage {
            version,
            from,
            to,
            expiration,
            enr_seq,
            extra,
        };
        Ok((ping, decoder.finish()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PongMessage {
    /// The endpoint of the receiver.
    pub to: Endpoint,
    /// The hash of the corresponding ping packet.
    pub ping_hash: H256,
    pub expiration: u64,
    /// The ENR sequence number of the sender (EIP-868). Optional.
    pub enr_seq: Option<u64>,
    pub extra: Vec<Bytes>,
}

impl PongMessage {
    pub fn new(to: Endpoint, ping_hash: H256, expiration: u64) -> Self {
        Self {
            to,
            ping_hash,
            expiration,
            enr_seq: None,
            extra: Vec::new(),
        }
    }

    pub fn with_enr_seq(self, enr_seq: u64) -> Self {
        Self {
            enr_seq: Some(enr_seq),
            ..self
        }
    }
}

impl RLPEncode for PongMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        let encoder = Encoder::new(buf)
            .encode_field(&self.to)
            .encode_field(&self.ping_hash)
            .encode_field(&self.expiration)
            .encode_optional_field(&self.enr_seq);
        encode_tail(encoder, &self.extra).finish();
    }
}

impl RLPDecode for PongMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (ping_hash, decoder) = decoder.decode_field("ping_hash")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let (enr_seq, decoder) = decoder.decode_optional_field();
        let (extra, decoder) = decode_tail(decoder)?;

        let pong = PongMessage {
            to,
            ping_hash,
            expiration,
            enr_seq,
            extra,
        };
        Ok((pong, decoder.finish()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindNodeMessage {
    /// The target is a 64-byte secp256k1 public key.
    pub target: H512,
    pub expiration: u64,
    pub extra: Vec<Bytes>,
}

impl FindNodeMessage {
    pub fn new(target: H512, expiration: u64) -> Self {
        Self {
            target,
            expiration,
            extra: Vec::new(),
        }
    }
}

impl RLPEncode for FindNodeMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        let encoder = Encoder::new(buf)
            .encode_field(&self.target)
            .encode_field(&self.expiration);
        encode_tail(encoder, &self.extra).finish();
    }
}

impl RLPDecode for FindNodeMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (target, decoder) = decoder.decode_field("target")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let (extra, decoder) = decode_tail(decoder)?;

        let find_node = FindNodeMessage {
            target,
            expiration,
            extra,
        };
        Ok((find_node, decoder.finish()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborsMessage {
    /// The list of neighbors closest to the requested target.
    pub nodes: Vec<Node>,
    pub expiration: u64,
    pub extra: Vec<Bytes>,
}

impl NeighborsMessage {
    pub fn new(nodes: Vec<Node>, expiration: u64) -> Self {
        Self {
            nodes,
            expiration,
            extra: Vec::new(),
        }
    }
}

impl RLPEncode for NeighborsMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        let encoder = Encoder::new(buf)
            .encode_field(&self.nodes)
            .encode_field(&self.expiration);
        encode_tail(encoder, &self.extra).finish();
    }
}

impl RLPDecode for NeighborsMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nodes, decoder) = decoder.decode_field("nodes")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let (extra, decoder) = decode_tail(decoder)?;

        let neighbors = NeighborsMessage {
            nodes,
            expiration,
            extra,
        };
        Ok((neighbors, decoder.finish()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ENRRequestMessage {
    pub expiration: u64,
    pub extra: Vec<Bytes>,
}

impl ENRRequestMessage {
    pub fn new(expiration: u64) -> Self {
        Self {
            expiration,
            extra: Vec::new(),
        }
    }
}

impl RLPEncode for ENRRequestMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        let encoder = Encoder::new(buf).encode_field(&self.expiration);
        encode_tail(encoder, &self.extra).finish();
    }
}

impl RLPDecode for ENRRequestMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let (extra, decoder) = decode_tail(decoder)?;
        Ok((ENRRequestMessage { expiration, extra }, decoder.finish()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ENRResponseMessage {
    /// Hash of the whole ENRRequest packet being replied to.
    pub request_hash: H256,
    pub node_record: NodeRecord,
    pub extra: Vec<Bytes>,
}

impl ENRResponseMessage {
    pub fn new(request_hash: H256, node_record: NodeRecord) -> Self {
        Self {
            request_hash,
            node_record,
            extra: Vec::new(),
        }
    }
}

impl RLPEncode for ENRResponseMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        let encoder = Encoder::new(buf)
            .encode_field(&self.request_hash)
            .encode_field(&self.node_record);
        encode_tail(encoder, &self.extra).finish();
    }
}

impl RLPDecode for ENRResponseMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (request_hash, decoder) = decoder.decode_field("request_hash")?;
        let (node_record, decoder) = decoder.decode_field("node_record")?;
        let (extra, decoder) = decode_tail(decoder)?;

        let response = ENRResponseMessage {
            request_hash,
            node_record,
            extra,
        };
        Ok((response, decoder.finish()?))
    }
}
