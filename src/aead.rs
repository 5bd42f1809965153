//! AES-256-GCM envelope with caller-controlled integer IVs
//!
//! Every persisted unit (block record, region footer, chunk footer) is
//! encrypted and authenticated under one 64-bit IV derived from its physical
//! coordinates. The cipher here never invents IVs: uniqueness is guaranteed
//! by the address arithmetic in [`crate::layout`], and reusing an IV under a
//! fixed key would void the authentication guarantees entirely.
//!
//! Tags are detached so the record format can keep the 16-byte tag at the
//! front of each unit, ahead of the data it covers.

use crate::error::{Result, VaultError};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{AeadInPlace, Aes256Gcm, KeyInit, Nonce};

/// Encryption key (32 bytes for AES-256).
pub type AeadKey = [u8; 32];

/// Authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;

/// AES-256-GCM bound to one key for the lifetime of an open store.
pub struct BlockCipher {
    cipher: Aes256Gcm,
}

impl BlockCipher {
    pub fn new(key: &AeadKey) -> Self {
        BlockCipher {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Map an integer IV into the 96-bit GCM nonce: four zero bytes followed
    /// by the big-endian counter.
    fn nonce(iv: u64) -> Nonce<aes_gcm::aead::consts::U12> {
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&iv.to_be_bytes());
        *Nonce::from_slice(&bytes)
    }

    /// Encrypt `body` in place under `iv` and return the detached tag.
    pub fn seal(&self, iv: u64, body: &mut [u8]) -> Result<[u8; TAG_SIZE]> {
        let tag = self
            .cipher
            .encrypt_in_place_detached(&Self::nonce(iv), &[], body)
            .map_err(|_| VaultError::Consistency("encryption failed".to_string()))?;
        Ok(tag.into())
    }

    /// Decrypt `body` in place under `iv`, verifying it against `tag`.
    ///
    /// On tag mismatch `body` contents are unspecified and must be discarded.
    pub fn open(&self, iv: u64, body: &mut [u8], tag: &[u8]) -> Result<()> {
        self.cipher
            .decrypt_in_place_detached(&Self::nonce(iv), &[], body, GenericArray::from_slice(tag))
            .map_err(|_| VaultError::Auth("tag mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AeadKey {
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        key
    }

    #[test]
    fn seal_open_round_trip() {
        let cipher = BlockCipher::new(&key());
        let plain = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut body = plain.clone();

        let tag = cipher.seal(7, &mut body).unwrap();
        assert_ne!(body, plain);

        cipher.open(7, &mut body, &tag).unwrap();
        assert_eq!(body, plain);
    }

    #[test]
    fn wrong_iv_is_rejected() {
        let cipher = BlockCipher::new(&key());
        let mut body = b"payload".to_vec();
        let tag = cipher.seal(1, &mut body).unwrap();

        let err = cipher.open(2, &mut body, &tag).unwrap_err();
        assert!(matches!(err, VaultError::Auth(_)));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let cipher = BlockCipher::new(&key());
        let mut body = vec![0x42u8; 128];
        let tag = cipher.seal(9, &mut body).unwrap();

        body[100] ^= 0x01;
        let err = cipher.open(9, &mut body, &tag).unwrap_err();
        assert!(matches!(err, VaultError::Auth(_)));
    }

    #[test]
    fn tampered_tag_is_rejected() {
        let cipher = BlockCipher::new(&key());
        let mut body = vec![0x42u8; 128];
        let mut tag = cipher.seal(9, &mut body).unwrap();

        tag[0] ^= 0x80;
        let err = cipher.open(9, &mut body, &tag).unwrap_err();
        assert!(matches!(err, VaultError::Auth(_)));
    }

    #[test]
    fn distinct_ivs_give_distinct_ciphertexts() {
        let cipher = BlockCipher::new(&key());
        let mut a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        cipher.seal(0, &mut a).unwrap();
        cipher.seal(1, &mut b).unwrap();
        assert_ne!(a, b);
    }
}
