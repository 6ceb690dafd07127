//! Symmetric obfuscation of the shared media reference.
//!
//! The relay stores the reference only in this form; the passphrase travels
//! in the invite URL fragment and never reaches the relay.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

const NONCE_SIZE: usize = 12;

fn cipher_for(passphrase: &str) -> Aes256Gcm {
    let digest = Sha256::digest(passphrase.as_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest))
}

/// Returns `base64(nonce || ciphertext)`.
pub fn encrypt_url(url: &str, passphrase: &str) -> Result<String, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher_for(passphrase)
        .encrypt(nonce, url.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

pub fn decrypt_url(encrypted: &str, passphrase: &str) -> Result<String, CryptoError> {
    let combined = STANDARD
        .decode(encrypted.trim())
        .map_err(|_| CryptoError::InvalidEncoding)?;
    if combined.len() <= NONCE_SIZE {
        return Err(CryptoError::TooShort);
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let plaintext = cipher_for(passphrase)
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
}
