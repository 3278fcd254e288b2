use bytes::Bytes;
use ethereum_types::{H256, H264, H512};
use etherscope_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use keccak_hash::keccak;
use secp256k1::{PublicKey, SECP256K1, ecdsa::Signature};
use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::OnceLock,
};

use crate::utils::node_id;

/// ENRs are bounded on the wire; anything bigger is hostile.
const MAX_NODE_RECORD_ENCODED_SIZE: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl RLPEncode for Endpoint {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.ip)
            .encode_field(&self.udp_port)
            .encode_field(&self.tcp_port)
            .finish();
    }
}

impl RLPDecode for Endpoint {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (ip, decoder) = decoder.decode_field("ip")?;
        let (udp_port, decoder) = decoder.decode_field("udp_port")?;
        let (tcp_port, decoder) = decoder.decode_field("tcp_port")?;
        let remaining = decoder.finish()?;
        Ok((
            Endpoint {
                ip,
                udp_port,
                tcp_port,
            },
            remaining,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub public_key: H512,
    node_id: OnceLock<H256>,
}

impl Node {
    pub fn new(ip: IpAddr, udp_port: u16, tcp_port: u16, public_key: H512) -> Self {
        Self {
            ip,
            udp_port,
            tcp_port,
            public_key,
            node_id: OnceLock::new(),
        }
    }

    pub fn node_id(&self) -> H256 {
        *self.node_id.get_or_init(|| node_id(&self.public_key))
    }
}

// The cached node id is derived state and must not affect equality.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip
            && self.udp_port == other.udp_port
            && self.tcp_port == other.tcp_port
            && self.public_key == other.public_key
    }
}

impl Eq for Node {}

impl RLPEncode for Node {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.ip)
            .encode_field(&self.udp_port)
            .encode_field(&self.tcp_port)
            .encode_field(&self.public_key)
            .finish();
    }
}

impl RLPDecode for Node {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (ip, decoder) = decoder.decode_field("ip")?;
        let (udp_port, decoder) = decoder.decode_field("udp_port")?;
        let (tcp_port, decoder) = decoder.decode_field("tcp_port")?;
        let (public_key, decoder) = decoder.decode_field("public_key")?;
        // peers may append fields newer than this schema
        let remaining = decoder.finish_unchecked();
        Ok((Node::new(ip, udp_port, tcp_port, public_key), remaining))
    }
}

/// Typed view over the standard ENR key/value pairs.
/// Reference: [ENR records](https://github.com/ethereum/devp2p/blob/master/enr.md)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NodeRecordPairs {
    /// Identity scheme id, "v4" for every record in the wild.
    pub id: Option<String>,
    pub ip: Option<Ipv4Addr>,
    pub ip6: Option<Ipv6Addr>,
    // ports are encoded as plain 2-byte integers, not socket structures
    pub tcp_port: Option<u16>,
    pub udp_port: Option<u16>,
    /// Compressed secp256k1 public key, 33 bytes.
    pub secp256k1: Option<H264>,
}

impl NodeRecordPairs {
    pub fn try_from_raw_pairs(pairs: &[(Bytes, Bytes)]) -> Result<Self, RLPDecodeError> {
        let mut decoded = NodeRecordPairs::default();
        for (key, value) in pairs {
            match key.as_ref() {
                b"id" => decoded.id = Some(String::decode(value)?),
                b"ip" => decoded.ip = Some(Ipv4Addr::decode(value)?),
                b"ip6" => decoded.ip6 = Some(Ipv6Addr::decode(value)?),
                b"tcp" => decoded.tcp_port = Some(u16::decode(value)?),
                b"udp" => decoded.udp_port = Some(u16::decode(value)?),
                b"secp256k1" => decoded.secp256k1 = Some(H264(<[u8; 33]>::decode(value)?)),
                // unknown keys are fine, the record schema is open
                _ => {}
            }
        }
        Ok(decoded)
    }
}

/// An Ethereum Node Record.
/// Pairs are kept raw (key, encoded value) in wire order so unknown entries
/// survive a decode/encode round trip.
/// Reference: [record structure](https://github.com/ethereum/devp2p/blob/master/enr.md#record-structure)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeRecord {
    pub signature: H512,
    pub seq: u64,
    pairs: Vec<(Bytes, Bytes)>,
}

impl NodeRecord {
    pub fn new(signature: H512, seq: u64, pairs: Vec<(Bytes, Bytes)>) -> Self {
        Self {
            signature,
            seq,
            pairs,
        }
    }

    pub fn raw_pairs(&self) -> &[(Bytes, Bytes)] {
        &self.pairs
    }

    pub fn decode_pairs(&self) -> Result<NodeRecordPairs, RLPDecodeError> {
        NodeRecordPairs::try_from_raw_pairs(&self.pairs)
    }

    /// The uncompressed public key held in the record, prefix stripped.
    pub fn public_key(&self) -> Option<H512> {
        let pairs = self.decode_pairs().ok()?;
        let compressed = pairs.secp256k1?;
        let public_key = PublicKey::from_slice(compressed.as_bytes()).ok()?;
        let encoded = public_key.serialize_uncompressed();
        Some(H512::from_slice(&encoded[1..]))
    }

    pub fn node_id(&self) -> Option<H256> {
        self.public_key().map(|key| node_id(&key))
    }

    pub fn get_signature_digest(&self) -> H256 {
        let mut rlp = Vec::new();
        Encoder::new(&mut rlp)
            .encode_field(&self.seq)
            .encode_key_value_list(&self.pairs)
            .finish();
        keccak(&rlp)
    }

    /// Verifies the record signature against the embedded public key.
    pub fn verify_signature(&self) -> bool {
        let Some(compressed) = self.decode_pairs().ok().and_then(|p| p.secp256k1) else {
            return false;
        };
        let Ok(public_key) = PublicKey::from_slice(compressed.as_bytes()) else {
            return false;
        };

        let digest = self.get_signature_digest();
        let Ok(message) = secp256k1::Message::from_digest_slice(digest.as_bytes()) else {
            return false;
        };
        let Ok(signature) = Signature::from_compact(self.signature.as_bytes()) else {
            return false;
        };

        SECP256K1
            .verify_ecdsa(&message, &signature, &public_key)
            .is_ok()
    }
}

impl RLPEncode for NodeRecord {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.signature)
            .encode_field(&self.seq)
            .encode_key_value_list(&self.pairs)
            .finish();
    }
}

impl RLPDecode for NodeRecord {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        if decoder.get_payload_len() > MAX_NODE_RECORD_ENCODED_SIZE {
            return Err(RLPDecodeError::InvalidLength);
        }
        let (signature, decoder) = decoder.decode_field("signature")?;
        let (seq, mut decoder) = decoder.decode_field("seq")?;

        let mut pairs = Vec::new();
        while !decoder.is_done() {
            let (key, rest): (Bytes, _) = decoder.decode_field("key")?;
            let (value, rest) = rest.get_encoded_item()?;
            pairs.push((key, Bytes::from(value)));
            decoder = rest;
        }

        // every field is optional except id
        if !pairs.iter().any(|(key, _)| key.as_ref() == b"id") {
            return Err(RLPDecodeError::Custom(
                "Invalid node record, 'id' field missing".into(),
            ));
        }

        let remaining = decoder.finish()?;
        Ok((
            NodeRecord {
                signature,
                seq,
                pairs,
            },
            remaining,
        ))
    }
}
