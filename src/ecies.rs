//! Hybrid encryption to a curve point.
//!
//! ECDH against an ephemeral keypair, SHA-256 of the shared point as the
//! symmetric key, AES-256-GCM for the payload. The rest of the crate treats
//! this as an opaque IND-CCA-secure black box; only [`EncryptedMessage`]
//! is part of the persisted format.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{ProjectivePoint, Scalar};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::curve::{self, serde_point};
use crate::error::{Error, Result};

const IV_LEN: usize = 12;
const MAC_LEN: usize = 16;

/// Wire form of a hybrid ciphertext. All byte fields are hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub ciphertext: String,
    #[serde(with = "serde_point")]
    pub ephemeral_pub_key: ProjectivePoint,
    pub iv: String,
    pub mac: String,
}

/// Encrypts `plaintext` so that only the holder of the scalar behind
/// `to` can read it.
pub fn encrypt(to: &ProjectivePoint, plaintext: &[u8]) -> Result<EncryptedMessage> {
    let ephemeral = curve::random_scalar();
    let ephemeral_pub_key = curve::pub_key_point(&ephemeral);
    let key = shared_key(&(to * &ephemeral))?;

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

    // AES-GCM appends the 16-byte tag; split it out as the mac field.
    let mac = sealed.split_off(sealed.len() - MAC_LEN);
    Ok(EncryptedMessage {
        ciphertext: hex::encode(sealed),
        ephemeral_pub_key,
        iv: hex::encode(iv),
        mac: hex::encode(mac),
    })
}

/// Decrypts a message addressed to `private_key`'s public point.
pub fn decrypt(private_key: &Scalar, message: &EncryptedMessage) -> Result<Vec<u8>> {
    let key = shared_key(&(message.ephemeral_pub_key * private_key))?;
    let iv = hex::decode(&message.iv).map_err(|e| Error::Crypto(format!("bad iv: {e}")))?;
    if iv.len() != IV_LEN {
        return Err(Error::Crypto(format!("bad iv length: {}", iv.len())));
    }

    let mut sealed =
        hex::decode(&message.ciphertext).map_err(|e| Error::Crypto(format!("bad ciphertext: {e}")))?;
    let mac = hex::decode(&message.mac).map_err(|e| Error::Crypto(format!("bad mac: {e}")))?;
    sealed.extend_from_slice(&mac);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
        .map_err(|_| Error::Crypto("decryption failed: wrong key or tampered message".to_string()))
}

fn shared_key(shared_point: &ProjectivePoint) -> Result<[u8; 32]> {
    if *shared_point == ProjectivePoint::IDENTITY {
        return Err(Error::Crypto("degenerate shared point".to_string()));
    }
    let compressed = shared_point.to_affine().to_encoded_point(true);
    let mut hasher = Sha256::new();
    hasher.update(compressed.as_bytes());
    Ok(hasher.finalize().into())
}
