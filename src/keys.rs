//! Passphrase key derivation
//!
//! The engine itself only ever sees fixed-width symmetric keys. This module
//! turns a passphrase into those keys with Argon2id over a random per-store
//! salt: 64 bytes of output, split into the data key (every unit in the
//! append log) and the metadata key (the sealed `meta` file only). The two
//! domains never share a key, so their IV sequences are independent.

use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::AeadKey;
use crate::error::{Result, VaultError};

/// Salt length stored in the `salt` companion file.
pub const SALT_LEN: usize = 16;

/// Keys derived from a passphrase. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StoreKeys {
    data: AeadKey,
    meta: AeadKey,
}

impl StoreKeys {
    /// Derive both keys from a passphrase and salt (Argon2id, default
    /// parameters: 19 MiB, 2 iterations).
    pub fn derive(passphrase: &str, salt: &[u8; SALT_LEN]) -> Result<Self> {
        let mut output = [0u8; 64];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt, &mut output)
            .map_err(|_| VaultError::KeyDerivation)?;
        let mut data = [0u8; 32];
        let mut meta = [0u8; 32];
        data.copy_from_slice(&output[..32]);
        meta.copy_from_slice(&output[32..]);
        output.zeroize();
        Ok(StoreKeys { data, meta })
    }

    pub fn data(&self) -> &AeadKey {
        &self.data
    }

    pub fn meta(&self) -> &AeadKey {
        &self.meta
    }
}

/// Fresh random salt for a new store.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
