use ethereum_types::H256;
use hkdf::Hkdf;
use secp256k1::{
    Message as SecpMessage, PublicKey, SECP256K1, SecretKey, ecdh::shared_secret_point,
    ecdsa::Signature,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::discv5::messages::{GCM_NONCE_SIZE, Handshake, PacketCodecError};

pub const AES_KEY_SIZE: usize = 16;

const KDF_INFO_TEXT: &[u8] = b"discovery v5 key agreement";
const ID_SIGNATURE_TEXT: &[u8] = b"discovery v5 identity proof";

/// Symmetric keys of an established discv5 session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub encryption_key: [u8; AES_KEY_SIZE],
    pub decryption_key: [u8; AES_KEY_SIZE],
}

/// The capability the codec consumes to decrypt message bodies.
///
/// The session/handshake subsystem that derives keys lives outside the
/// codec; it owns its own locking and replay policy. A lookup miss makes the
/// codec report [`PacketCodecError::SessionNotEstablished`] instead of
/// failing silently.
pub trait SessionKeyProvider {
    fn lookup_session_keys(
        &self,
        node_id: &H256,
        nonce: &[u8; GCM_NONCE_SIZE],
    ) -> Option<SessionKeys>;
}

/// Null provider for consumers that only inspect headers and WHOAREYOU
/// challenges.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessionKeys;

impl SessionKeyProvider for NoSessionKeys {
    fn lookup_session_keys(
        &self,
        _node_id: &H256,
        _nonce: &[u8; GCM_NONCE_SIZE],
    ) -> Option<SessionKeys> {
        None
    }
}

/// A single fixed session, useful in tests and replay tooling.
impl SessionKeyProvider for SessionKeys {
    fn lookup_session_keys(
        &self,
        _node_id: &H256,
        _nonce: &[u8; GCM_NONCE_SIZE],
    ) -> Option<SessionKeys> {
        Some(self.clone())
    }
}

/// Plain session table keyed by sender id. Nonce-based replay filtering is
/// up to the owner of the map.
impl SessionKeyProvider for HashMap<H256, SessionKeys> {
    fn lookup_session_keys(
        &self,
        node_id: &H256,
        _nonce: &[u8; GCM_NONCE_SIZE],
    ) -> Option<SessionKeys> {
        self.get(node_id).cloned()
    }
}

/// Builds the challenge-data of a WHOAREYOU packet:
/// masking-iv || static-header || authdata.
pub fn build_challenge_data(masking_iv: &[u8], static_header: &[u8], authdata: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(masking_iv.len() + static_header.len() + authdata.len());
    data.extend_from_slice(masking_iv);
    data.extend_from_slice(static_header);
    data.extend_from_slice(authdata);
    data
}

/// Derives session keys from the handshake.
/// - `secret_key`: the ECDH secret (ephemeral for the initiator, static for
///   the recipient)
/// - `public_key`: the ECDH public key (dest static for the initiator,
///   ephemeral for the recipient)
/// - `node_id_a` / `node_id_b`: initiator and recipient node ids
/// - `challenge_data`: from the WHOAREYOU challenge
/// - `is_initiator`: which end of the handshake we are
pub fn derive_session_keys(
    secret_key: &SecretKey,
    public_key: &PublicKey,
    node_id_a: &H256,
    node_id_b: &H256,
    challenge_data: &[u8],
    is_initiator: bool,
) -> SessionKeys {
    let shared_secret = compressed_shared_secret(public_key, secret_key);
    let hkdf = Hkdf::<Sha256>::new(Some(challenge_data), &shared_secret);

    let mut kdf_info = KDF_INFO_TEXT.to_vec();
    kdf_info.extend_from_slice(node_id_a.as_bytes());
    kdf_info.extend_from_slice(node_id_b.as_bytes());

    let mut key_data = [0u8; 2 * AES_KEY_SIZE];
    hkdf.expand(&kdf_info, &mut key_data)
        .expect("key_data is 32 bytes long, it can never fail");

    // first half is the initiator's outbound key, second half the recipient's
    let mut initiator_key = [0u8; AES_KEY_SIZE];
    let mut recipient_key = [0u8; AES_KEY_SIZE];
    initiator_key.copy_from_slice(&key_data[..AES_KEY_SIZE]);
    recipient_key.copy_from_slice(&key_data[AES_KEY_SIZE..]);

    let (encryption_key, decryption_key) = if is_initiator {
        (initiator_key, recipient_key)
    } else {
        (recipient_key, initiator_key)
    };

    SessionKeys {
        encryption_key,
        decryption_key,
    }
}

/// Signs the id-signature input used in the handshake:
/// id-signature = id_sign(sha256("discovery v5 identity proof" ||
/// challenge-data || ephemeral-pubkey || node-id-B))
pub fn create_id_signature(
    static_key: &SecretKey,
    challenge_data: &[u8],
    ephemeral_pubkey: &[u8],
    node_id_b: &H256,
) -> Signature {
    let digest = id_signature_digest(challenge_data, ephemeral_pubkey, node_id_b);
    let message = SecpMessage::from_digest_slice(&digest).expect("sha256 digest is 32 bytes");
    SECP256K1.sign_ecdsa(&message, static_key)
}

/// Verifies the id-signature from a handshake.
pub fn verify_id_signature(
    src_pubkey: &PublicKey,
    challenge_data: &[u8],
    ephemeral_pubkey: &[u8],
    node_id_b: &H256,
    signature: &Signature,
) -> bool {
    let digest = id_signature_digest(challenge_data, ephemeral_pubkey, node_id_b);
    let Ok(message) = SecpMessage::from_digest_slice(&digest) else {
        return false;
    };
    SECP256K1
        .verify_ecdsa(&message, signature, src_pubkey)
        .is_ok()
}

fn id_signature_digest(
    challenge_data: &[u8],
    ephemeral_pubkey: &[u8],
    node_id_b: &H256,
) -> [u8; 32] {
    let mut input = ID_SIGNATURE_TEXT.to_vec();
    input.extend_from_slice(challenge_data);
    input.extend_from_slice(ephemeral_pubkey);
    input.extend_from_slice(node_id_b.as_bytes());
    Sha256::digest(&input).into()
}

/// Semantic validation of a parsed handshake, above raw parsing.
///
/// `challenge_enr_seq` is the enr-seq we sent in the WHOAREYOU challenge;
/// when it was zero the sender is obliged to include its record.
/// `known_public_key` is the sender's static key from a previously seen
/// record, used when the handshake omits one.
///
/// Returns the sender's ephemeral public key for the session-key ECDH.
pub fn validate_handshake(
    handshake: &Handshake,
    challenge_data: &[u8],
    challenge_enr_seq: u64,
    known_public_key: Option<&PublicKey>,
    local_node_id: &H256,
) -> Result<PublicKey, PacketCodecError> {
    let ephemeral_pubkey = PublicKey::from_slice(&handshake.eph_pubkey)
        .map_err(|_| PacketCodecError::InvalidAuthKey)?;

    let static_pubkey = match &handshake.record {
        Some(record) => {
            let compressed = record
                .decode_pairs()?
                .secp256k1
                .ok_or(PacketCodecError::MissingRecord)?;
            PublicKey::from_slice(compressed.as_bytes())
                .map_err(|_| PacketCodecError::InvalidAuthKey)?
        }
        None if challenge_enr_seq == 0 => return Err(PacketCodecError::MissingRecord),
        None => *known_public_key.ok_or(PacketCodecError::MissingRecord)?,
    };

    let signature = Signature::from_compact(&handshake.id_signature)
        .map_err(|_| PacketCodecError::InvalidNonceSignature)?;
    if !verify_id_signature(
        &static_pubkey,
        challenge_data,
        &handshake.eph_pubkey,
        local_node_id,
        &signature,
    ) {
        return Err(PacketCodecError::InvalidNonceSignature);
    }

    Ok(ephemeral_pubkey)
}

/// ecdh(pubkey, privkey): the shared secret is the compressed encoding of
/// the shared curve point, not just its x coordinate.
///
/// https://github.com/ethereum/devp2p/blob/master/discv5/discv5-theory.md#identity-specific-cryptography-in-the-handshake
fn compressed_shared_secret(dest_pubkey: &PublicKey, ephemeral_key: &SecretKey) -> [u8; 33] {
    let xy_point = shared_secret_point(dest_pubkey, ephemeral_key);
    let mut compressed = [0u8; 33];
    let y = &xy_point[32..];
    compressed[0] = if y[31] & 1 == 0 { 0x02 } else { 0x03 };
    compressed[1..].copy_from_slice(&xy_point[..32]);
    compressed
}
