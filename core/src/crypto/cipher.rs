//! Authenticated symmetric encryption (AES-256-GCM)

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::crypto::errors::{CryptoError, CryptoResult};

/// Symmetric key length
pub const KEY_LEN: usize = 32;

/// Explicit nonce length
pub const NONCE_LEN: usize = 12;

/// Nonce used by the protocol itself. Every protocol key encrypts exactly
/// one message, so the key never repeats under this nonce.
pub const ZERO_NONCE: [u8; NONCE_LEN] = [0u8; NONCE_LEN];

/// Encrypt and authenticate `plaintext`
pub fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionError("AES-GCM seal failed".to_string()))
}

/// Verify and decrypt `ciphertext`
///
/// Fails with `AuthenticationFailure` on a wrong key, wrong nonce or any
/// tampering.
pub fn open(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    Ok(cipher.decrypt(Nonce::from_slice(nonce), ciphertext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_seal_open() {
        let mut key = [0u8; KEY_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = seal(&key, &nonce, b"attack at dawn").unwrap();
        assert_eq!(open(&key, &nonce, &sealed).unwrap(), b"attack at dawn");
        assert!(open(&key, &ZERO_NONCE, &sealed).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&[1u8; KEY_LEN], &ZERO_NONCE, b"secret").unwrap();
        assert!(matches!(
            open(&[2u8; KEY_LEN], &ZERO_NONCE, &sealed),
            Err(CryptoError::AuthenticationFailure(_))
        ));
    }

    #[test]
    fn test_tampering_detected() {
        let mut sealed = seal(&[1u8; KEY_LEN], &ZERO_NONCE, b"secret").unwrap();
        sealed[0] ^= 0xFF;
        assert!(open(&[1u8; KEY_LEN], &ZERO_NONCE, &sealed).is_err());
    }
}
