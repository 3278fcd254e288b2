use aes::cipher::{KeyIvInit, StreamCipher, StreamCipherError};
use aes_gcm::{Aes128Gcm, KeyInit, aead::AeadMutInPlace};
use bytes::{BufMut, Bytes};
use ethereum_types::H256;
use etherscope_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use std::net::IpAddr;

use crate::{
    discv5::session::{AES_KEY_SIZE, SessionKeyProvider},
    types::NodeRecord,
};

type Aes128Ctr64BE = ctr::Ctr64BE<aes::Aes128>;

// Wire layout per
// https://github.com/ethereum/devp2p/blob/master/discv5/discv5-wire.md
pub const PROTOCOL_ID: &[u8; 6] = b"discv5";
pub const PROTOCOL_VERSION: u16 = 0x0001;
const MIN_PROTOCOL_VERSION: u16 = 0x0001;

pub const GCM_NONCE_SIZE: usize = 12;
pub const ID_NONCE_SIZE: usize = 16;

const MASKING_IV_SIZE: usize = 16;
/// The masking keystream is keyed by the low half of the destination id.
const MASKING_KEY_SIZE: usize = 16;
/// protocol-id(6) || version(2) || flag(1) || nonce(12) || authdata-size(2)
const STATIC_HEADER_SIZE: usize = 6 + 2 + 1 + GCM_NONCE_SIZE + 2;
const STATIC_HEADER_END: usize = MASKING_IV_SIZE + STATIC_HEADER_SIZE;
/// Minimum bytes after the static header on anything that is not WHOAREYOU.
const MIN_MESSAGE_SIZE: usize = 48;
const MAX_PACKET_SIZE: usize = 1280;

/// src-id(32)
const MESSAGE_AUTHDATA_SIZE: usize = 32;
/// id-nonce(16) || enr-seq(8)
const WHOAREYOU_AUTHDATA_SIZE: usize = ID_NONCE_SIZE + 8;
/// src-id(32) || sig-size(1) || eph-key-size(1)
const HANDSHAKE_AUTHDATA_HEAD: usize = 34;

/// Request ids are opaque but capped at 8 bytes on the wire.
const MAX_REQUEST_ID_SIZE: usize = 8;

const FLAG_MESSAGE: u8 = 0x00;
const FLAG_WHOAREYOU: u8 = 0x01;
const FLAG_HANDSHAKE: u8 = 0x02;

#[derive(Debug, thiserror::Error)]
pub enum PacketCodecError {
    #[error("RLP decoding error: {0}")]
    RLPDecodeError(#[from] RLPDecodeError),
    #[error("packet too short")]
    TooShort,
    #[error("packet size out of protocol bounds")]
    InvalidSize,
    #[error("protocol id mismatch in packet header")]
    InvalidProtocolId,
    #[error("version of packet header below minimum")]
    BelowMinVersion,
    #[error("message packet below minimum size")]
    MessageTooShort,
    #[error("declared auth size is beyond packet length")]
    AuthSizeOverflow,
    #[error("auth data does not match its declared layout")]
    InvalidAuthSize,
    #[error("invalid flag value in header: {0}")]
    InvalidFlag(u8),
    #[error("unknown message type: {0}")]
    UnknownPacketType(u8),
    #[error("no session keys for this sender, handshake required")]
    SessionNotEstablished,
    #[error("cannot decrypt message")]
    MessageDecryptFailed,
    #[error("invalid ephemeral pubkey in handshake")]
    InvalidAuthKey,
    #[error("expected ENR in handshake but none sent")]
    MissingRecord,
    #[error("invalid id nonce signature")]
    InvalidNonceSignature,
    #[error("stream cipher error: {0}")]
    CipherError(String),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<StreamCipherError> for PacketCodecError {
    fn from(error: StreamCipherError) -> Self {
        PacketCodecError::CipherError(error.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Ping,
    Pong,
    FindNode,
    Nodes,
    TalkReq,
    TalkRes,
    RegTopic,
    Ticket,
    RegConfirmation,
    TopicQuery,
    /// Sentinel: WHOAREYOU challenges carry no message.
    WhoAreYou,
    /// Sentinel: packets that could not be classified.
    Unknown,
}

impl PacketKind {
    pub const fn code(self) -> u8 {
        match self {
            PacketKind::Ping => 0x01,
            PacketKind::Pong => 0x02,
            PacketKind::FindNode => 0x03,
            PacketKind::Nodes => 0x04,
            PacketKind::TalkReq => 0x05,
            PacketKind::TalkRes => 0x06,
            PacketKind::RegTopic => 0x07,
            PacketKind::Ticket => 0x08,
            PacketKind::RegConfirmation => 0x09,
            PacketKind::TopicQuery => 0x0a,
            PacketKind::WhoAreYou => 0xfe,
            PacketKind::Unknown => 0xff,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(PacketKind::Ping),
            0x02 => Some(PacketKind::Pong),
            0x03 => Some(PacketKind::FindNode),
            0x04 => Some(PacketKind::Nodes),
            0x05 => Some(PacketKind::TalkReq),
            0x06 => Some(PacketKind::TalkRes),
            0x07 => Some(PacketKind::RegTopic),
            0x08 => Some(PacketKind::Ticket),
            0x09 => Some(PacketKind::RegConfirmation),
            0x0a => Some(PacketKind::TopicQuery),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PacketKind::Ping => "PING",
            PacketKind::Pong => "PONG",
            PacketKind::FindNode => "FINDNODE",
            PacketKind::Nodes => "NODES",
            PacketKind::TalkReq => "TALKREQ",
            PacketKind::TalkRes => "TALKRES",
            PacketKind::RegTopic => "REGTOPIC",
            PacketKind::Ticket => "TICKET",
            PacketKind::RegConfirmation => "REGCONFIRMATION",
            PacketKind::TopicQuery => "TOPICQUERY",
            PacketKind::WhoAreYou => "WHOAREYOU",
            PacketKind::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Ordinary(Ordinary),
    WhoAreYou(WhoAreYou),
    Handshake(Handshake),
}

/// The unmasked header of a packet, plus where it ends in the wire image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub static_header: [u8; STATIC_HEADER_SIZE],
    pub version: u16,
    pub flag: u8,
    pub nonce: [u8; GCM_NONCE_SIZE],
    pub authdata: Vec<u8>,
    /// Offset where the masked header ends and the encrypted message begins.
    pub header_end_offset: usize,
}

impl Packet {
    /// Decodes a packet addressed to `dest_id`.
    ///
    /// Message bodies are decrypted with keys from `keys`; a miss surfaces
    /// as [`PacketCodecError::SessionNotEstablished`] so the caller can run
    /// a handshake. The input buffer is never mutated, unmasking happens on
    /// private copies.
    pub fn decode<K: SessionKeyProvider>(
        dest_id: &H256,
        keys: &K,
        encoded_packet: &[u8],
    ) -> Result<Packet, PacketCodecError> {
        let header = Self::decode_header(dest_id, encoded_packet)?;
        let masking_iv = &encoded_packet[..MASKING_IV_SIZE];
        let encrypted_message = &encoded_packet[header.header_end_offset..];

        match header.flag {
            FLAG_MESSAGE => Ok(Packet::Ordinary(Ordinary::decode(
                masking_iv,
                &header,
                keys,
                encrypted_message,
            )?)),
            FLAG_WHOAREYOU => Ok(Packet::WhoAreYou(WhoAreYou::decode(&header.authdata)?)),
            FLAG_HANDSHAKE => Ok(Packet::Handshake(Handshake::decode(
                masking_iv,
                &header,
                keys,
                encrypted_message,
            )?)),
            flag => Err(PacketCodecError::InvalidFlag(flag)),
        }
    }

    /// Unmasks and validates the static header, then unmasks and parses the
    /// flag-dependent auth data. The remaining bytes, starting at
    /// `header_end_offset`, are the still-encrypted message.
    pub fn decode_header(
        dest_id: &H256,
        encoded_packet: &[u8],
    ) -> Result<PacketHeader, PacketCodecError> {
        // the packet structure is
        // masking-iv || masked-header || message
        if encoded_packet.len() < STATIC_HEADER_END {
            return Err(PacketCodecError::TooShort);
        }
        if encoded_packet.len() > MAX_PACKET_SIZE {
            return Err(PacketCodecError::InvalidSize);
        }

        let masking_iv = &encoded_packet[..MASKING_IV_SIZE];
        let mut cipher = <Aes128Ctr64BE as KeyIvInit>::new(
            dest_id[..MASKING_KEY_SIZE].into(),
            masking_iv.into(),
        );

        let mut static_header = [0u8; STATIC_HEADER_SIZE];
        static_header.copy_from_slice(&encoded_packet[MASKING_IV_SIZE..STATIC_HEADER_END]);
        cipher.try_apply_keystream(&mut static_header)?;

        // static-header = protocol-id || version || flag || nonce || authdata-size
        if &static_header[..6] != PROTOCOL_ID {
            return Err(PacketCodecError::InvalidProtocolId);
        }
        let version = u16::from_be_bytes([static_header[6], static_header[7]]);
        if version < MIN_PROTOCOL_VERSION {
            return Err(PacketCodecError::BelowMinVersion);
        }
        let flag = static_header[8];
        let mut nonce = [0u8; GCM_NONCE_SIZE];
        nonce.copy_from_slice(&static_header[9..9 + GCM_NONCE_SIZE]);
        let authdata_size =
            u16::from_be_bytes([static_header[21], static_header[22]]) as usize;

        let remaining = encoded_packet.len() - STATIC_HEADER_END;
        if flag != FLAG_WHOAREYOU && remaining < MIN_MESSAGE_SIZE {
            return Err(PacketCodecError::MessageTooShort);
        }
        if authdata_size > remaining {
            return Err(PacketCodecError::AuthSizeOverflow);
        }

        let authdata_end = STATIC_HEADER_END + authdata_size;
        let mut authdata = encoded_packet[STATIC_HEADER_END..authdata_end].to_vec();
        cipher.try_apply_keystream(&mut authdata)?;

        Ok(PacketHeader {
            static_header,
            version,
            flag,
            nonce,
            authdata,
            header_end_offset: authdata_end,
        })
    }

    pub fn encode(
        &self,
        buf: &mut dyn BufMut,
        masking_iv: u128,
        nonce: &[u8; GCM_NONCE_SIZE],
        dest_id: &H256,
        encrypt_key: &[u8],
    ) -> Result<(), PacketCodecError> {
        let masking_iv_bytes = masking_iv.to_be_bytes();
        buf.put_slice(&masking_iv_bytes);

        let mut cipher = <Aes128Ctr64BE as KeyIvInit>::new(
            dest_id[..MASKING_KEY_SIZE].into(),
            masking_iv_bytes[..].into(),
        );

        let (mut static_header, mut authdata, encrypted_message) = match self {
            Packet::Ordinary(ordinary) => {
                ordinary.encode(nonce, &masking_iv_bytes, encrypt_key)?
            }
            Packet::WhoAreYou(who_are_you) => (
                build_static_header(FLAG_WHOAREYOU, nonce, WHOAREYOU_AUTHDATA_SIZE)?,
                who_are_you.encode_authdata(),
                Vec::new(),
            ),
            Packet::Handshake(handshake) => {
                handshake.encode(nonce, &masking_iv_bytes, encrypt_key)?
            }
        };

        cipher.try_apply_keystream(&mut static_header)?;
        buf.put_slice(&static_header);
        cipher.try_apply_keystream(&mut authdata)?;
        buf.put_slice(&authdata);
        buf.put_slice(&encrypted_message);
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packet::Ordinary(ordinary) => ordinary.message.name(),
            Packet::WhoAreYou(_) => PacketKind::WhoAreYou.name(),
            Packet::Handshake(handshake) => handshake.message.name(),
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Ordinary(ordinary) => ordinary.message.kind(),
            Packet::WhoAreYou(_) => PacketKind::WhoAreYou,
            Packet::Handshake(handshake) => handshake.message.kind(),
        }
    }

    pub fn request_id(&self) -> Bytes {
        match self {
            Packet::Ordinary(ordinary) => ordinary.message.request_id().clone(),
            Packet::WhoAreYou(_) => Bytes::new(),
            Packet::Handshake(handshake) => handshake.message.request_id().clone(),
        }
    }

    /// Overwrites the request id, e.g. when correlating a relayed reply.
    /// A WHOAREYOU challenge carries none, so the call is a no-op there.
    pub fn set_request_id(&mut self, req_id: Bytes) {
        match self {
            Packet::Ordinary(ordinary) => ordinary.message.set_request_id(req_id),
            Packet::WhoAreYou(_) => {}
            Packet::Handshake(handshake) => handshake.message.set_request_id(req_id),
        }
    }
}

fn build_static_header(
    flag: u8,
    nonce: &[u8; GCM_NONCE_SIZE],
    authdata_len: usize,
) -> Result<Vec<u8>, PacketCodecError> {
    let authdata_size =
        u16::try_from(authdata_len).map_err(|_| PacketCodecError::InvalidSize)?;
    let mut header = Vec::with_capacity(STATIC_HEADER_SIZE);
    header.put_slice(PROTOCOL_ID);
    header.put_slice(&PROTOCOL_VERSION.to_be_bytes());
    header.put_u8(flag);
    header.put_slice(nonce);
    header.put_slice(&authdata_size.to_be_bytes());
    Ok(header)
}

// message-ad = masking-iv || static-header || authdata
fn message_ad(masking_iv: &[u8], static_header: &[u8], authdata: &[u8]) -> Vec<u8> {
    let mut ad = Vec::with_capacity(masking_iv.len() + static_header.len() + authdata.len());
    ad.extend_from_slice(masking_iv);
    ad.extend_from_slice(static_header);
    ad.extend_from_slice(authdata);
    ad
}

fn encrypt(
    key: &[u8],
    nonce: &[u8; GCM_NONCE_SIZE],
    message: &mut Vec<u8>,
    ad: &[u8],
) -> Result<(), PacketCodecError> {
    let mut cipher =
        Aes128Gcm::new_from_slice(&key[..AES_KEY_SIZE]).map_err(|_| PacketCodecError::InvalidSize)?;
    cipher
        .encrypt_in_place(nonce.as_slice().into(), ad, message)
        .map_err(|e| PacketCodecError::CipherError(e.to_string()))
}

fn decrypt(
    key: &[u8; AES_KEY_SIZE],
    nonce: &[u8; GCM_NONCE_SIZE],
    message: &mut Vec<u8>,
    ad: &[u8],
) -> Result<(), PacketCodecError> {
    let mut cipher = Aes128Gcm::new(key.into());
    // an authentication tag mismatch means wrong keys or a forged packet
    cipher
        .decrypt_in_place(nonce.as_slice().into(), ad, message)
        .map_err(|_| PacketCodecError::MessageDecryptFailed)
}

/// Flag 0: a plain message from an established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordinary {
    pub src_id: H256,
    pub message: Message,
}

impl Ordinary {
    /// Encodes the packet, returning (static_header, authdata,
    /// encrypted_message), all still unmasked.
    fn encode(
        &self,
        nonce: &[u8; GCM_NONCE_SIZE],
        masking_iv: &[u8],
        encrypt_key: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), PacketCodecError> {
        if encrypt_key.len() < AES_KEY_SIZE {
            return Err(PacketCodecError::InvalidSize);
        }

        let authdata = self.src_id.as_bytes().to_vec();
        let static_header = build_static_header(FLAG_MESSAGE, nonce, authdata.len())?;

        let mut message = Vec::new();
        self.message.encode(&mut message);

        let ad = message_ad(masking_iv, &static_header, &authdata);
        encrypt(encrypt_key, nonce, &mut message, &ad)?;

        Ok((static_header, authdata, message))
    }

    pub fn decode<K: SessionKeyProvider>(
        masking_iv: &[u8],
        header: &PacketHeader,
        keys: &K,
        encrypted_message: &[u8],
    ) -> Result<Ordinary, PacketCodecError> {
        if header.authdata.len() != MESSAGE_AUTHDATA_SIZE {
            return Err(PacketCodecError::InvalidAuthSize);
        }
        let src_id = H256::from_slice(&header.authdata);

        let session = keys
            .lookup_session_keys(&src_id, &header.nonce)
            .ok_or(PacketCodecError::SessionNotEstablished)?;

        let ad = message_ad(masking_iv, &header.static_header, &header.authdata);
        let mut message = encrypted_message.to_vec();
        decrypt(&session.decryption_key, &header.nonce, &mut message, &ad)?;

        let message = Message::decode(&message)?;
        Ok(Ordinary { src_id, message })
    }
}

/// Flag 1: a challenge sent in response to a packet from an unknown sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoAreYou {
    pub id_nonce: [u8; ID_NONCE_SIZE],
    /// Highest ENR sequence number the challenger knows for us.
    pub enr_seq: u64,
}

impl WhoAreYou {
    fn encode_authdata(&self) -> Vec<u8> {
        let mut authdata = Vec::with_capacity(WHOAREYOU_AUTHDATA_SIZE);
        authdata.put_slice(&self.id_nonce);
        authdata.put_slice(&self.enr_seq.to_be_bytes());
        authdata
    }

    pub fn decode(authdata: &[u8]) -> Result<WhoAreYou, PacketCodecError> {
        if authdata.len() != WHOAREYOU_AUTHDATA_SIZE {
            return Err(PacketCodecError::InvalidAuthSize);
        }
        let mut id_nonce = [0u8; ID_NONCE_SIZE];
        id_nonce.copy_from_slice(&authdata[..ID_NONCE_SIZE]);
        let enr_seq = u64::from_be_bytes(
            authdata[ID_NONCE_SIZE..]
                .try_into()
                .map_err(|_| PacketCodecError::InvalidAuthSize)?,
        );
        Ok(WhoAreYou { id_nonce, enr_seq })
    }
}

/// Flag 2: first authenticated message after a WHOAREYOU challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub src_id: H256,
    pub id_signature: Bytes,
    pub eph_pubkey: Bytes,
    /// May be omitted when the enr-seq in WHOAREYOU was current. If that
    /// enr-seq was zero, the record must be present.
    pub record: Option<NodeRecord>,
    pub message: Message,
}

impl Handshake {
    fn encode_authdata(&self, buf: &mut dyn BufMut) -> Result<(), PacketCodecError> {
        let sig_size: u8 = self
            .id_signature
            .len()
            .try_into()
            .map_err(|_| PacketCodecError::InvalidSize)?;
        let eph_key_size: u8 = self
            .eph_pubkey
            .len()
            .try_into()
            .map_err(|_| PacketCodecError::InvalidSize)?;

        buf.put_slice(self.src_id.as_bytes());
        buf.put_u8(sig_size);
        buf.put_u8(eph_key_size);
        buf.put_slice(&self.id_signature);
        buf.put_slice(&self.eph_pubkey);
        if let Some(record) = &self.record {
            record.encode(buf);
        }
        Ok(())
    }

    /// Encodes the handshake, returning (static_header, authdata,
    /// encrypted_message), all still unmasked.
    fn encode(
        &self,
        nonce: &[u8; GCM_NONCE_SIZE],
        masking_iv: &[u8],
        encrypt_key: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), PacketCodecError> {
        if encrypt_key.len() < AES_KEY_SIZE {
            return Err(PacketCodecError::InvalidSize);
        }

        let mut authdata = Vec::new();
        self.encode_authdata(&mut authdata)?;
        let static_header = build_static_header(FLAG_HANDSHAKE, nonce, authdata.len())?;

        let mut message = Vec::new();
        self.message.encode(&mut message);

        let ad = message_ad(masking_iv, &static_header, &authdata);
        encrypt(encrypt_key, nonce, &mut message, &ad)?;

        Ok((static_header, authdata, message))
    }

    pub fn decode<K: SessionKeyProvider>(
        masking_iv: &[u8],
        header: &PacketHeader,
        keys: &K,
        encrypted_message: &[u8],
    ) -> Result<Handshake, PacketCodecError> {
        let authdata = &header.authdata;
        if authdata.len() < HANDSHAKE_AUTHDATA_HEAD {
            return Err(PacketCodecError::InvalidAuthSize);
        }

        let src_id = H256::from_slice(&authdata[..32]);
        let sig_size = authdata[32] as usize;
        let eph_key_size = authdata[33] as usize;

        // both trailing ranges must sit inside the declared auth data
        let trailing_end = HANDSHAKE_AUTHDATA_HEAD + sig_size + eph_key_size;
        if authdata.len() < trailing_end {
            return Err(PacketCodecError::InvalidAuthSize);
        }

        let id_signature =
            Bytes::copy_from_slice(&authdata[HANDSHAKE_AUTHDATA_HEAD..HANDSHAKE_AUTHDATA_HEAD + sig_size]);
        let eph_pubkey =
            Bytes::copy_from_slice(&authdata[HANDSHAKE_AUTHDATA_HEAD + sig_size..trailing_end]);

        let record = if authdata.len() > trailing_end {
            Some(NodeRecord::decode(&authdata[trailing_end..])?)
        } else {
            None
        };

        let session = keys
            .lookup_session_keys(&src_id, &header.nonce)
            .ok_or(PacketCodecError::SessionNotEstablished)?;

        let ad = message_ad(masking_iv, &header.static_header, authdata);
        let mut message = encrypted_message.to_vec();
        decrypt(&session.decryption_key, &header.nonce, &mut message, &ad)?;
        let message = Message::decode(&message)?;

        Ok(Handshake {
            src_id,
            id_signature,
            eph_pubkey,
            record,
            message,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping(PingMessage),
    Pong(PongMessage),
    FindNode(FindNodeMessage),
    Nodes(NodesMessage),
    TalkReq(TalkReqMessage),
    TalkRes(TalkResMessage),
    RegTopic(RegTopicMessage),
    Ticket(TicketMessage),
    RegConfirmation(RegConfirmationMessage),
    TopicQuery(TopicQueryMessage),
}

impl Message {
    pub fn kind(&self) -> PacketKind {
        match self {
            Message::Ping(_) => PacketKind::Ping,
            Message::Pong(_) => PacketKind::Pong,
            Message::FindNode(_) => PacketKind::FindNode,
            Message::Nodes(_) => PacketKind::Nodes,
            Message::TalkReq(_) => PacketKind::TalkReq,
            Message::TalkRes(_) => PacketKind::TalkRes,
            Message::RegTopic(_) => PacketKind::RegTopic,
            Message::Ticket(_) => PacketKind::Ticket,
            Message::RegConfirmation(_) => PacketKind::RegConfirmation,
            Message::TopicQuery(_) => PacketKind::TopicQuery,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn request_id(&self) -> &Bytes {
        match self {
            Message::Ping(msg) => &msg.req_id,
            Message::Pong(msg) => &msg.req_id,
            Message::FindNode(msg) => &msg.req_id,
            Message::Nodes(msg) => &msg.req_id,
            Message::TalkReq(msg) => &msg.req_id,
            Message::TalkRes(msg) => &msg.req_id,
            Message::RegTopic(msg) => &msg.req_id,
            Message::Ticket(msg) => &msg.req_id,
            Message::RegConfirmation(msg) => &msg.req_id,
            Message::TopicQuery(msg) => &msg.req_id,
        }
    }

    pub fn set_request_id(&mut self, mut req_id: Bytes) {
        req_id.truncate(MAX_REQUEST_ID_SIZE);
        let slot = match self {
            Message::Ping(msg) => &mut msg.req_id,
            Message::Pong(msg) => &mut msg.req_id,
            Message::FindNode(msg) => &mut msg.req_id,
            Message::Nodes(msg) => &mut msg.req_id,
            Message::TalkReq(msg) => &mut msg.req_id,
            Message::TalkRes(msg) => &mut msg.req_id,
            Message::RegTopic(msg) => &mut msg.req_id,
            Message::Ticket(msg) => &mut msg.req_id,
            Message::RegConfirmation(msg) => &mut msg.req_id,
            Message::TopicQuery(msg) => &mut msg.req_id,
        };
        *slot = req_id;
    }

    pub fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(self.kind().code());
        match self {
            Message::Ping(msg) => msg.encode(buf),
            Message::Pong(msg) => msg.encode(buf),
            Message::FindNode(msg) => msg.encode(buf),
            Message::Nodes(msg) => msg.encode(buf),
            Message::TalkReq(msg) => msg.encode(buf),
            Message::TalkRes(msg) => msg.encode(buf),
            Message::RegTopic(msg) => msg.encode(buf),
            Message::Ticket(msg) => msg.encode(buf),
            Message::RegConfirmation(msg) => msg.encode(buf),
            Message::TopicQuery(msg) => msg.encode(buf),
        }
    }

    /// Decodes a decrypted `message-type || message-data` body.
    pub fn decode(message: &[u8]) -> Result<Message, PacketCodecError> {
        let message_type = *message.first().ok_or(RLPDecodeError::InvalidLength)?;
        let payload = &message[1..];
        match PacketKind::from_code(message_type) {
            Some(PacketKind::Ping) => Ok(Message::Ping(PingMessage::decode(payload)?)),
            Some(PacketKind::Pong) => Ok(Message::Pong(PongMessage::decode(payload)?)),
            Some(PacketKind::FindNode) => {
                Ok(Message::FindNode(FindNodeMessage::decode(payload)?))
            }
            Some(PacketKind::Nodes) => Ok(Message::Nodes(NodesMessage::decode(payload)?)),
            Some(PacketKind::TalkReq) => Ok(Message::TalkReq(TalkReqMessage::decode(payload)?)),
            Some(PacketKind::TalkRes) => Ok(Message::TalkRes(TalkResMessage::decode(payload)?)),
            Some(PacketKind::RegTopic) => {
                Ok(Message::RegTopic(RegTopicMessage::decode(payload)?))
            }
            Some(PacketKind::Ticket) => Ok(Message::Ticket(TicketMessage::decode(payload)?)),
            Some(PacketKind::RegConfirmation) => Ok(Message::RegConfirmation(
                RegConfirmationMessage::decode(payload)?,
            )),
            Some(PacketKind::TopicQuery) => {
                Ok(Message::TopicQuery(TopicQueryMessage::decode(payload)?))
            }
            _ => Err(PacketCodecError::UnknownPacketType(message_type)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingMessage {
    pub req_id: Bytes,
    /// The ENR sequence number of the sender.
    pub enr_seq: u64,
}

impl RLPEncode for PingMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.req_id)
            .encode_field(&self.enr_seq)
            .finish();
    }
}

impl RLPDecode for PingMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (req_id, decoder) = decoder.decode_field("req_id")?;
        let (enr_seq, decoder) = decoder.decode_field("enr_seq")?;
        Ok((PingMessage { req_id, enr_seq }, decoder.finish()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PongMessage {
    pub req_id: Bytes,
    pub enr_seq: u64,
    /// The external address the sender observed for us.
    pub recipient_addr: IpAddr,
    pub recipient_port: u16,
}

impl RLPEncode for PongMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.req_id)
            .encode_field(&self.enr_seq)
            .encode_field(&self.recipient_addr)
            .encode_field(&self.recipient_port)
            .finish();
    }
}

impl RLPDecode for PongMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (req_id, decoder) = decoder.decode_field("req_id")?;
        let (enr_seq, decoder) = decoder.decode_field("enr_seq")?;
        let (recipient_addr, decoder) = decoder.decode_field("recipient_addr")?;
        let (recipient_port, decoder) = decoder.decode_field("recipient_port")?;
        Ok((
            PongMessage {
                req_id,
                enr_seq,
                recipient_addr,
                recipient_port,
            },
            decoder.finish()?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindNodeMessage {
    pub req_id: Bytes,
    /// Requested log2 distances from the recipient's own id.
    pub distances: Vec<u64>,
}

impl RLPEncode for FindNodeMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.req_id)
            .encode_field(&self.distances)
            .finish();
    }
}

impl RLPDecode for FindNodeMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (req_id, decoder) = decoder.decode_field("req_id")?;
        let (distances, decoder) = decoder.decode_field("distances")?;
        Ok((FindNodeMessage { req_id, distances }, decoder.finish()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodesMessage {
    pub req_id: Bytes,
    /// How many NODES responses the full answer spans.
    pub total: u64,
    pub nodes: Vec<NodeRecord>,
}

impl RLPEncode for NodesMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.req_id)
            .encode_field(&self.total)
            .encode_field(&self.nodes)
            .finish();
    }
}

impl RLPDecode for NodesMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (req_id, decoder) = decoder.decode_field("req_id")?;
        let (total, decoder) = decoder.decode_field("total")?;
        let (nodes, decoder) = decoder.decode_field("nodes")?;
        Ok((
            NodesMessage {
                req_id,
                total,
                nodes,
            },
            decoder.finish()?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkReqMessage {
    pub req_id: Bytes,
    pub protocol: Bytes,
    pub request: Bytes,
}

impl RLPEncode for TalkReqMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.req_id)
            .encode_field(&self.protocol)
            .encode_field(&self.request)
            .finish();
    }
}

impl RLPDecode for TalkReqMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (req_id, decoder) = decoder.decode_field("req_id")?;
        let (protocol, decoder) = decoder.decode_field("protocol")?;
        let (request, decoder) = decoder.decode_field("request")?;
        Ok((
            TalkReqMessage {
                req_id,
                protocol,
                request,
            },
            decoder.finish()?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkResMessage {
    pub req_id: Bytes,
    pub response: Bytes,
}

impl RLPEncode for TalkResMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.req_id)
            .encode_field(&self.response)
            .finish();
    }
}

impl RLPDecode for TalkResMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (req_id, decoder) = decoder.decode_field("req_id")?;
        let (response, decoder) = decoder.decode_field("response")?;
        Ok((TalkResMessage { req_id, response }, decoder.finish()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegTopicMessage {
    pub req_id: Bytes,
    pub topic: Bytes,
    pub record: NodeRecord,
    pub ticket: Bytes,
}

impl RLPEncode for RegTopicMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.req_id)
            .encode_field(&self.topic)
            .encode_field(&self.record)
            .encode_field(&self.ticket)
            .finish();
    }
}

impl RLPDecode for RegTopicMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (req_id, decoder) = decoder.decode_field("req_id")?;
        let (topic, decoder) = decoder.decode_field("topic")?;
        let (record, decoder) = decoder.decode_field("record")?;
        let (ticket, decoder) = decoder.decode_field("ticket")?;
        Ok((
            RegTopicMessage {
                req_id,
                topic,
                record,
                ticket,
            },
            decoder.finish()?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketMessage {
    pub req_id: Bytes,
    pub ticket: Bytes,
    /// Seconds to wait before registering.
    pub wait_time: u64,
}

impl RLPEncode for TicketMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.req_id)
            .encode_field(&self.ticket)
            .encode_field(&self.wait_time)
            .finish();
    }
}

impl RLPDecode for TicketMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (req_id, decoder) = decoder.decode_field("req_id")?;
        let (ticket, decoder) = decoder.decode_field("ticket")?;
        let (wait_time, decoder) = decoder.decode_field("wait_time")?;
        Ok((
            TicketMessage {
                req_id,
                ticket,
                wait_time,
            },
            decoder.finish()?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegConfirmationMessage {
    pub req_id: Bytes,
    pub topic: Bytes,
}

impl RLPEncode for RegConfirmationMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.req_id)
            .encode_field(&self.topic)
            .finish();
    }
}

impl RLPDecode for RegConfirmationMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (req_id, decoder) = decoder.decode_field("req_id")?;
        let (topic, decoder) = decoder.decode_field("topic")?;
        Ok((RegConfirmationMessage { req_id, topic }, decoder.finish()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicQueryMessage {
    pub req_id: Bytes,
    pub topic: Bytes,
}

impl RLPEncode for TopicQueryMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.req_id)
            .encode_field(&self.topic)
            .finish();
    }
}

impl RLPDecode for TopicQueryMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (req_id, decoder) = decoder.decode_field("req_id")?;
        let (topic, decoder) = decoder.decode_field("topic")?;
        Ok((TopicQueryMessage { req_id, topic }, decoder.finish()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        discv5::session::{NoSessionKeys, SessionKeys},
        utils::{node_id, public_key_from_secret_key},
    };
    use aes::cipher::StreamCipher;
    use hex_literal::hex;
    use secp256k1::SecretKey;
    use std::net::Ipv4Addr;

    // Wire test vector identities from
    // https://github.com/ethereum/devp2p/blob/master/discv5/discv5-wire-test-vectors.md
    fn node_b_id() -> H256 {
        let node_b_key = SecretKey::from_slice(&hex!(
            "66fb62bfbd66b9177a138c1e5cddbe4f7c30c343e94e68df8769459cb1cde628"
        ))
        .unwrap();
        node_id(&public_key_from_secret_key(&node_b_key))
    }

    fn session_with_read_key(read_key: [u8; 16]) -> SessionKeys {
        SessionKeys {
            encryption_key: read_key,
            decryption_key: read_key,
        }
    }

    /// Builds a masked packet by hand, for feeding the decoder invalid
    /// headers that the encoder would refuse to produce.
    fn mask_packet(
        dest_id: &H256,
        masking_iv: &[u8; MASKING_IV_SIZE],
        static_header: &[u8],
        authdata: &[u8],
        body: &[u8],
    ) -> Vec<u8> {
        let mut cipher = <Aes128Ctr64BE as KeyIvInit>::new(
            dest_id[..MASKING_KEY_SIZE].into(),
            masking_iv[..].into(),
        );
        let mut out = masking_iv.to_vec();
        let mut header = static_header.to_vec();
        cipher.apply_keystream(&mut header);
        out.extend_from_slice(&header);
        let mut auth = authdata.to_vec();
        cipher.apply_keystream(&mut auth);
        out.extend_from_slice(&auth);
        out.extend_from_slice(body);
        out
    }

    fn sample_record_pairs() -> Vec<(bytes::Bytes, bytes::Bytes)> {
        vec![(
            Bytes::from("id"),
            Bytes::from("v4".to_string().encode_to_vec()),
        )]
    }

    #[test]
    fn known_identities_hash_to_expected_node_ids() {
        assert_eq!(
            node_b_id(),
            H256::from_slice(&hex!(
                "bbbb9d047f0488c0b5a93c1c3f2d8bafc7c8ff337024a55434a0d0555de64db9"
            ))
        );
    }

    #[test]
    fn aes_gcm_encryption_vector() {
        // https://github.com/ethereum/devp2p/blob/master/discv5/discv5-wire-test-vectors.md#encryptiondecryption
        let key = hex!("9f2d77db7004bf8a1a85107ac686990b");
        let nonce = hex!("27b5af763c446acd2749fe8e");
        let ad = hex!("93a7400fa0d6a694ebc24d5cf570f65d04215b6ac00757875e3f3a5f42107903");
        let mut pt = hex!("01c20101").to_vec();

        encrypt(&key, &nonce, &mut pt, &ad).unwrap();
        assert_eq!(pt, hex!("a5d12a2d94b8ccb3ba55558229867dc13bfa3648").to_vec());
    }

    #[test]
    fn whoareyou_packet_encode_vector() {
        // whoareyou.id-nonce = 0x0102030405060708090a0b0c0d0e0f10
        // whoareyou.enr-seq = 0
        let packet = Packet::WhoAreYou(WhoAreYou {
            id_nonce: hex!("0102030405060708090a0b0c0d0e0f10"),
            enr_seq: 0,
        });

        let mut buf = Vec::new();
        packet
            .encode(
                &mut buf,
                0,
                &hex!("0102030405060708090a0b0c"),
                &node_b_id(),
                &[],
            )
            .unwrap();

        let expected = hex!(
            "00000000000000000000000000000000088b3d434277464933a1ccc59f5967ad1d6035f15e528627dde75cd68292f9e6c27d6b66c8100a873fcbaed4e16b8d"
        );
        assert_eq!(buf, expected);
    }

    #[test]
    fn whoareyou_packet_decode_vector() {
        let encoded = hex!(
            "00000000000000000000000000000000088b3d434277464933a1ccc59f5967ad1d6035f15e528627dde75cd68292f9e6c27d6b66c8100a873fcbaed4e16b8d"
        );
        let packet = Packet::decode(&node_b_id(), &NoSessionKeys, &encoded).unwrap();

        let expected = Packet::WhoAreYou(WhoAreYou {
            id_nonce: hex!("0102030405060708090a0b0c0d0e0f10"),
            enr_seq: 0,
        });
        assert_eq!(packet, expected);
        assert_eq!(packet.kind(), PacketKind::WhoAreYou);
        assert_eq!(packet.name(), "WHOAREYOU");
        assert!(packet.request_id().is_empty());
    }

    #[test]
    fn ordinary_ping_packet_vector_roundtrip() {
        // ping.req-id = 0x00000001, ping.enr-seq = 2, read-key = 0
        let node_a_key = SecretKey::from_slice(&hex!(
            "eef77acb6c6a6eebc5b363a475ac583ec7eccdb42b6481424c60f59aa326547f"
        ))
        .unwrap();
        let src_id = node_id(&public_key_from_secret_key(&node_a_key));
        let dest_id = node_b_id();

        let encoded = hex!(
            "00000000000000000000000000000000088b3d4342774649325f313964a39e55ea96c005ad52be8c7560413a7008f16c9e6d2f43bbea8814a546b7409ce783d34c4f53245d08dab84102ed931f66d1492acb308fa1c6715b9d139b81acbdcc"
        );
        let session = session_with_read_key([0; 16]);

        let packet = Packet::decode(&dest_id, &session, &encoded).unwrap();
        let expected = Packet::Ordinary(Ordinary {
            src_id,
            message: Message::Ping(PingMessage {
                req_id: Bytes::from_static(&hex!("00000001")),
                enr_seq: 2,
            }),
        });
        assert_eq!(packet, expected);
        assert_eq!(packet.kind(), PacketKind::Ping);
        assert_eq!(packet.name(), "PING");
        assert_eq!(packet.request_id(), Bytes::from_static(&hex!("00000001")));

        // deterministic re-encode reproduces the wire bytes
        let masking_iv = u128::from_be_bytes(encoded[..16].try_into().unwrap());
        let nonce = hex!("ffffffffffffffffffffffff");
        let mut buf = Vec::new();
        packet
            .encode(&mut buf, masking_iv, &nonce, &dest_id, &[0; 16])
            .unwrap();
        assert_eq!(buf, encoded.to_vec());
    }

    #[test]
    fn handshake_packet_vector_roundtrip() {
        // Ping handshake packet (flag 2), no ENR.
        let dest_id = node_b_id();
        let encoded = hex!(
            "00000000000000000000000000000000088b3d4342774649305f313964a39e55ea96c005ad521d8c7560413a7008f16c9e6d2f43bbea8814a546b7409ce783d34c4f53245d08da4bb252012b2cba3f4f374a90a75cff91f142fa9be3e0a5f3ef268ccb9065aeecfd67a999e7fdc137e062b2ec4a0eb92947f0d9a74bfbf44dfba776b21301f8b65efd5796706adff216ab862a9186875f9494150c4ae06fa4d1f0396c93f215fa4ef524f1eadf5f0f4126b79336671cbcf7a885b1f8bd2a5d839cf8"
        );
        let read_key = hex!("4f9fac6de7567d1e3b1241dffe90f662");
        let session = session_with_read_key(read_key);

        let packet = Packet::decode(&dest_id, &session, &encoded).unwrap();
        let Packet::Handshake(handshake) = &packet else {
            panic!("expected handshake, got {packet:?}");
        };

        assert_eq!(
            handshake.src_id,
            H256::from_slice(&hex!(
                "aaaa8419e9f49d0083561b48287df592939a8d19947d8c0ef88f2a4856a69fbb"
            ))
        );
        assert_eq!(handshake.record, None);
        assert_eq!(
            handshake.eph_pubkey,
            Bytes::from_static(&hex!(
                "039a003ba6517b473fa0cd74aefe99dadfdb34627f90fec6362df85803908f53a5"
            ))
        );
        assert_eq!(
            handshake.message,
            Message::Ping(PingMessage {
                req_id: Bytes::from_static(&hex!("00000001")),
                enr_seq: 1,
            })
        );

        let masking_iv = u128::from_be_bytes(encoded[..16].try_into().unwrap());
        let nonce = hex!("ffffffffffffffffffffffff");
        let mut buf = Vec::new();
        packet
            .encode(&mut buf, masking_iv, &nonce, &dest_id, &read_key)
            .unwrap();
        assert_eq!(buf, encoded.to_vec());
    }

    #[test]
    fn handshake_packet_with_enr_vector_roundtrip() {
        let dest_id = node_b_id();
        let encoded = hex!(
            "00000000000000000000000000000000088b3d4342774649305f313964a39e55ea96c005ad539c8c7560413a7008f16c9e6d2f43bbea8814a546b7409ce783d34c4f53245d08da4bb23698868350aaad22e3ab8dd034f548a1c43cd246be98562fafa0a1fa86d8e7a3b95ae78cc2b988ded6a5b59eb83ad58097252188b902b21481e30e5e285f19735796706adff216ab862a9186875f9494150c4ae06fa4d1f0396c93f215fa4ef524e0ed04c3c21e39b1868e1ca8105e585ec17315e755e6cfc4dd6cb7fd8e1a1f55e49b4b5eb024221482105346f3c82b15fdaae36a3bb12a494683b4a3c7f2ae41306252fed84785e2bbff3b022812d0882f06978df84a80d443972213342d04b9048fc3b1d5fcb1df0f822152eced6da4d3f6df27e70e4539717307a0208cd208d65093ccab5aa596a34d7511401987662d8cf62b139471"
        );
        let read_key = hex!("53b1c075f41876423154e157470c2f48");
        let session = session_with_read_key(read_key);

        let packet = Packet::decode(&dest_id, &session, &encoded).unwrap();
        let Packet::Handshake(handshake) = &packet else {
            panic!("expected handshake, got {packet:?}");
        };

        assert_eq!(
            handshake.src_id,
            H256::from_slice(&hex!(
                "aaaa8419e9f49d0083561b48287df592939a8d19947d8c0ef88f2a4856a69fbb"
            ))
        );
        assert_eq!(
            handshake.message,
            Message::Ping(PingMessage {
                req_id: Bytes::from_static(&hex!("00000001")),
                enr_seq: 1,
            })
        );

        let record = handshake.record.clone().expect("expected ENR in handshake");
        let pairs = record.decode_pairs().unwrap();
        assert_eq!(pairs.id.as_deref(), Some("v4"));
        assert!(pairs.secp256k1.is_some());
        assert!(record.verify_signature());

        let masking_iv = u128::from_be_bytes(encoded[..16].try_into().unwrap());
        let nonce = hex!("ffffffffffffffffffffffff");
        let mut buf = Vec::new();
        packet
            .encode(&mut buf, masking_iv, &nonce, &dest_id, &read_key)
            .unwrap();
        assert_eq!(buf, encoded.to_vec());
    }

    #[test]
    fn handshake_packet_synthetic_roundtrip() {
        let dest_id = node_b_id();
        let handshake = Handshake {
            src_id: H256::repeat_byte(0xaa),
            id_signature: Bytes::from(vec![1; 64]),
            eph_pubkey: Bytes::from(vec![2; 33]),
            record: None,
            message: Message::Ping(PingMessage {
                req_id: Bytes::from_static(&[3]),
                enr_seq: 4,
            }),
        };

        let key = [0x10; 16];
        let nonce = hex!("000102030405060708090a0b");
        let mut buf = Vec::new();
        Packet::Handshake(handshake.clone())
            .encode(&mut buf, 0, &nonce, &dest_id, &key)
            .unwrap();

        let session = session_with_read_key(key);
        let decoded = Packet::decode(&dest_id, &session, &buf).unwrap();
        assert_eq!(decoded, Packet::Handshake(handshake));
    }

    #[test]
    fn missing_session_keys_require_a_handshake() {
        let encoded = hex!(
            "00000000000000000000000000000000088b3d4342774649325f313964a39e55ea96c005ad52be8c7560413a7008f16c9e6d2f43bbea8814a546b7409ce783d34c4f53245d08dab84102ed931f66d1492acb308fa1c6715b9d139b81acbdcc"
        );
        assert!(matches!(
            Packet::decode(&node_b_id(), &NoSessionKeys, &encoded),
            Err(PacketCodecError::SessionNotEstablished)
        ));
    }

    #[test]
    fn wrong_session_keys_fail_decryption() {
        let encoded = hex!(
            "00000000000000000000000000000000088b3d4342774649325f313964a39e55ea96c005ad52be8c7560413a7008f16c9e6d2f43bbea8814a546b7409ce783d34c4f53245d08dab84102ed931f66d1492acb308fa1c6715b9d139b81acbdcc"
        );
        let session = session_with_read_key([0x42; 16]);
        assert!(matches!(
            Packet::decode(&node_b_id(), &session, &encoded),
            Err(PacketCodecError::MessageDecryptFailed)
        ));
    }

    #[test]
    fn corrupted_ciphertext_fails_decryption() {
        let mut encoded = hex!(
            "00000000000000000000000000000000088b3d4342774649325f313964a39e55ea96c005ad52be8c7560413a7008f16c9e6d2f43bbea8814a546b7409ce783d34c4f53245d08dab84102ed931f66d1492acb308fa1c6715b9d139b81acbdcc"
        )
        .to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let session = session_with_read_key([0; 16]);
        assert!(matches!(
            Packet::decode(&node_b_id(), &session, &encoded),
            Err(PacketCodecError::MessageDecryptFailed)
        ));
    }

    #[test]
    fn wrong_destination_fails_header_validation() {
        // unmasking with the wrong recipient id yields a garbage protocol id
        let encoded = hex!(
            "00000000000000000000000000000000088b3d434277464933a1ccc59f5967ad1d6035f15e528627dde75cd68292f9e6c27d6b66c8100a873fcbaed4e16b8d"
        );
        let wrong_dest = H256::repeat_byte(0xcc);
        assert!(matches!(
            Packet::decode(&wrong_dest, &NoSessionKeys, &encoded),
            Err(PacketCodecError::InvalidProtocolId)
        ));
    }

    #[test]
    fn short_buffers_are_rejected() {
        for len in [0, 1, MASKING_IV_SIZE, STATIC_HEADER_END - 1] {
            let buf = vec![0u8; len];
            assert!(matches!(
                Packet::decode(&node_b_id(), &NoSessionKeys, &buf),
                Err(PacketCodecError::TooShort)
            ));
        }
    }

    #[test]
    fn oversized_packet_is_rejected() {
        let buf = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(
            Packet::decode(&node_b_id(), &NoSessionKeys, &buf),
            Err(PacketCodecError::InvalidSize)
        ));
    }

    #[test]
    fn truncated_message_packet_is_rejected() {
        let encoded = hex!(
            "00000000000000000000000000000000088b3d4342774649325f313964a39e55ea96c005ad52be8c7560413a7008f16c9e6d2f43bbea8814a546b7409ce783d34c4f53245d08dab84102ed931f66d1492acb308fa1c6715b9d139b81acbdcc"
        );
        // keep the full header but less than MIN_MESSAGE_SIZE after it
        let truncated = &encoded[..STATIC_HEADER_END + MIN_MESSAGE_SIZE - 1];
        assert!(matches!(
            Packet::decode(&node_b_id(), &NoSessionKeys, truncated),
            Err(PacketCodecError::MessageTooShort)
        ));
    }

    #[test]
    fn declared_auth_size_must_fit_the_packet() {
        let dest_id = node_b_id();
        let nonce = [0u8; GCM_NONCE_SIZE];
        // WHOAREYOU flag skips the minimum-size gate, leaving the auth-size
        // bound as the failing check
        let static_header = build_static_header(FLAG_WHOAREYOU, &nonce, 100).unwrap();
        let authdata = [0u8; WHOAREYOU_AUTHDATA_SIZE];
        let packet = mask_packet(&dest_id, &[0u8; 16], &static_header, &authdata, &[]);

        assert!(matches!(
            Packet::decode(&dest_id, &NoSessionKeys, &packet),
            Err(PacketCodecError::AuthSizeOverflow)
        ));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let dest_id = node_b_id();
        let nonce = [0u8; GCM_NONCE_SIZE];
        let static_header = build_static_header(0x03, &nonce, 32).unwrap();
        let authdata = [0u8; 32];
        let body = [0u8; 16];
        let packet = mask_packet(&dest_id, &[0u8; 16], &static_header, &authdata, &body);

        assert!(matches!(
            Packet::decode(&dest_id, &NoSessionKeys, &packet),
            Err(PacketCodecError::InvalidFlag(0x03))
        ));
    }

    #[test]
    fn version_below_minimum_is_rejected() {
        let dest_id = node_b_id();
        let mut static_header = Vec::with_capacity(STATIC_HEADER_SIZE);
        static_header.put_slice(PROTOCOL_ID);
        static_header.put_slice(&0u16.to_be_bytes());
        static_header.put_u8(FLAG_WHOAREYOU);
        static_header.put_slice(&[0u8; GCM_NONCE_SIZE]);
        static_header.put_slice(&(WHOAREYOU_AUTHDATA_SIZE as u16).to_be_bytes());
        let authdata = [0u8; WHOAREYOU_AUTHDATA_SIZE];
        let packet = mask_packet(&dest_id, &[0u8; 16], &static_header, &authdata, &[]);

        assert!(matches!(
            Packet::decode(&dest_id, &NoSessionKeys, &packet),
            Err(PacketCodecError::BelowMinVersion)
        ));
    }

    #[test]
    fn whoareyou_authdata_must_be_exactly_24_bytes() {
        let dest_id = node_b_id();
        let nonce = [0u8; GCM_NONCE_SIZE];
        let static_header = build_static_header(FLAG_WHOAREYOU, &nonce, 16).unwrap();
        let authdata = [0u8; 16];
        let packet = mask_packet(&dest_id, &[0u8; 16], &static_header, &authdata, &[]);

        assert!(matches!(
            Packet::decode(&dest_id, &NoSessionKeys, &packet),
            Err(PacketCodecError::InvalidAuthSize)
        ));
    }

    #[test]
    fn unknown_message_type_in_plaintext_is_rejected() {
        let plaintext = [0x0b, 0xc2, 0x01, 0x02];
        assert!(matches!(
            Message::decode(&plaintext),
            Err(PacketCodecError::UnknownPacketType(0x0b))
        ));
        assert!(Message::decode(&[]).is_err());
    }

    #[test]
    fn set_request_id_truncates_to_wire_limit() {
        let mut message = Message::Ping(PingMessage {
            req_id: Bytes::from_static(&[1, 2, 3, 4]),
            enr_seq: 1,
        });
        message.set_request_id(Bytes::from(vec![0x11; 12]));
        assert_eq!(message.request_id().len(), MAX_REQUEST_ID_SIZE);
    }

    #[test]
    fn ping_message_roundtrip() {
        let msg = Message::Ping(PingMessage {
            req_id: Bytes::from_static(&[1, 2, 3, 4]),
            enr_seq: 4321,
        });
        let mut buf = Vec::new();
        msg.encode(&mut buf);
        assert_eq!(Message::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn pong_message_roundtrip() {
        let msg = Message::Pong(PongMessage {
            req_id: Bytes::from_static(&[1]),
            enr_seq: 4321,
            recipient_addr: Ipv4Addr::BROADCAST.into(),
            recipient_port: 30303,
        });
        let mut buf = Vec::new();
        msg.encode(&mut buf);
        assert_eq!(Message::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn find_node_message_roundtrip() {
        let msg = Message::FindNode(FindNodeMessage {
            req_id: Bytes::from_static(&[9, 9]),
            distances: vec![0, 255, 256],
        });
        let mut buf = Vec::new();
        msg.encode(&mut buf);
        assert_eq!(Message::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn nodes_message_roundtrip() {
        let record = NodeRecord::new(ethereum_types::H512::repeat_byte(7), 4321, sample_record_pairs());
        let msg = Message::Nodes(NodesMessage {
            req_id: Bytes::from_static(&[1, 2]),
            total: 2,
            nodes: vec![record],
        });
        let mut buf = Vec::new();
        msg.encode(&mut buf);
        assert_eq!(Message::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn talk_messages_roundtrip() {
        let req = Message::TalkReq(TalkReqMessage {
            req_id: Bytes::from_static(&[1]),
            protocol: Bytes::from_static(b"utp"),
            request: Bytes::from_static(&[1, 2, 3, 4]),
        });
        let res = Message::TalkRes(TalkResMessage {
            req_id: Bytes::from_static(&[1]),
            response: Bytes::from_static(&[0, 1, 2, 3]),
        });
        for msg in [req, res] {
            let mut buf = Vec::new();
            msg.encode(&mut buf);
            assert_eq!(Message::decode(&buf).unwrap(), msg);
        }
    }

    #[test]
    fn topic_messages_roundtrip() {
        let record = NodeRecord::new(ethereum_types::H512::repeat_byte(9), 1, sample_record_pairs());
        let messages = [
            Message::RegTopic(RegTopicMessage {
                req_id: Bytes::from_static(&[1]),
                topic: Bytes::from_static(b"topic"),
                record,
                ticket: Bytes::from_static(&[5, 6]),
            }),
            Message::Ticket(TicketMessage {
                req_id: Bytes::from_static(&[1]),
                ticket: Bytes::from_static(&[1, 2, 3, 4]),
                wait_time: 5,
            }),
            Message::RegConfirmation(RegConfirmationMessage {
                req_id: Bytes::from_static(&[1]),
                topic: Bytes::from_static(b"topic"),
            }),
            Message::TopicQuery(TopicQueryMessage {
                req_id: Bytes::from_static(&[2]),
                topic: Bytes::from_static(b"topic"),
            }),
        ];
        for msg in messages {
            let mut buf = Vec::new();
            msg.encode(&mut buf);
            assert_eq!(Message::decode(&buf).unwrap(), msg);
        }
    }
}
