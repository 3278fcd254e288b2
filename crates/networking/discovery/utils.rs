use ethereum_types::{H256, H512};
use keccak_hash::keccak;
use secp256k1::{
    Message, PublicKey, SECP256K1, SecretKey,
    ecdsa::{RecoverableSignature, RecoveryId},
};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("signature recovery failed")]
    SignatureRecoveryFailed,
    #[error("recovered public key has {0} bytes, expected 64")]
    UnexpectedKeyLength(usize),
}

/// Computes the node_id from a public key (aka computes the Keccak256 hash of the given public key)
pub fn node_id(public_key: &H512) -> H256 {
    keccak(public_key)
}

pub fn public_key_from_secret_key(secret_key: &SecretKey) -> H512 {
    let public_key = PublicKey::from_secret_key(SECP256K1, secret_key);
    let encoded = public_key.serialize_uncompressed();
    H512::from_slice(&encoded[1..])
}

/// Recovers the signer's uncompressed public key (curve-point prefix
/// stripped) from a 64-byte compact signature plus 1-byte recovery id.
/// Pure function, safe to call from any thread.
pub fn recover_public_key(
    message_hash: &H256,
    signature: &[u8; 65],
) -> Result<H512, RecoveryError> {
    let recovery_id = RecoveryId::from_i32(i32::from(signature[64]))
        .map_err(|_| RecoveryError::SignatureRecoveryFailed)?;
    let signature = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|_| RecoveryError::SignatureRecoveryFailed)?;
    let message = Message::from_digest_slice(message_hash.as_bytes())
        .map_err(|_| RecoveryError::SignatureRecoveryFailed)?;

    let public_key = SECP256K1
        .recover_ecdsa(&message, &signature)
        .map_err(|_| RecoveryError::SignatureRecoveryFailed)?;

    let encoded = public_key.serialize_uncompressed();
    let id = &encoded[1..];
    if id.len() != H512::len_bytes() {
        return Err(RecoveryError::UnexpectedKeyLength(id.len()));
    }
    Ok(H512::from_slice(id))
}
