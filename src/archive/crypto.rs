//! AES-256-GCM encryption for backup files.
//!
//! Encrypted file layout: `[16-byte IV][ciphertext ‖ 16-byte GCM tag]`. The
//! authentication tag is part of the ciphertext aes-gcm produces, so a wrong
//! key, a flipped bit, or a truncated file all fail authenticated decryption.

use crate::error::{BackupError, Result};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use sha2::{Digest, Sha256};

/// Initialization vector length in bytes.
pub const IV_LEN: usize = 16;

/// GCM authentication tag length appended to the ciphertext.
pub const TAG_LEN: usize = 16;

pub const ALGORITHM: &str = "aes-256-gcm";

type ArchiveCipher = AesGcm<Aes256, U16>;

/// Derive a 256-bit cipher key from a passphrase.
fn derive_key(passphrase: &str) -> [u8; 32] {
    let digest = Sha256::digest(passphrase.as_bytes());
    digest.into()
}

fn cipher(passphrase: &str) -> Result<ArchiveCipher> {
    let key = derive_key(passphrase);
    ArchiveCipher::new_from_slice(&key)
        .map_err(|e| BackupError::Crypto(format!("failed to create cipher: {e}")))
}

/// Encrypt a buffer with a fresh random IV. Output is `[IV][ciphertext‖tag]`.
pub fn encrypt(passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(passphrase)?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| BackupError::Crypto(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an `[IV][ciphertext‖tag]` buffer, verifying the authentication tag.
pub fn decrypt(passphrase: &str, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_LEN + TAG_LEN {
        return Err(BackupError::Crypto(format!(
            "encrypted payload of {} bytes is shorter than IV + tag",
            data.len()
        )));
    }

    let cipher = cipher(passphrase)?;
    let (iv, ciphertext) = data.split_at(IV_LEN);
    let nonce = Nonce::from_slice(iv);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| BackupError::Crypto("decryption failed: invalid key or corrupted data".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let plaintext = b"container bytes";
        let encrypted = encrypt("secret", plaintext).unwrap();
        assert_eq!(encrypted.len(), IV_LEN + plaintext.len() + TAG_LEN);

        let decrypted = decrypt("secret", &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt("secret", b"container bytes").unwrap();
        let result = decrypt("wrong", &encrypted);
        assert!(matches!(result, Err(BackupError::Crypto(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut encrypted = encrypt("secret", b"container bytes").unwrap();
        let idx = encrypted.len() - TAG_LEN - 1;
        encrypted[idx] ^= 0xFF;

        let result = decrypt("secret", &encrypted);
        assert!(matches!(result, Err(BackupError::Crypto(_))));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let mut encrypted = encrypt("secret", b"container bytes").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;

        let result = decrypt("secret", &encrypted);
        assert!(matches!(result, Err(BackupError::Crypto(_))));
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let a = encrypt("secret", b"same input").unwrap();
        let b = encrypt("secret", b"same input").unwrap();
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
        assert_ne!(a[IV_LEN..], b[IV_LEN..]);
    }

    #[test]
    fn test_short_payload_rejected() {
        let result = decrypt("secret", &[0u8; 8]);
        assert!(matches!(result, Err(BackupError::Crypto(_))));
    }
}
