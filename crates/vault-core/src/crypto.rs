//! Password-based encryption for keychain private material.
//!
//! A keychain's seed and its private key are encrypted independently (distinct
//! salts, distinct nonces) even when unlocked with the same passphrase, per the
//! encryption-layering note: mixing the two loses the ability to unlock one
//! without the other.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use bitcoin::hashes::{sha256, Hash};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: wrong password or corrupted data")]
    DecryptionFailed,
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
}

/// Which key-derivation function produced an [`EncryptedPayload`]'s key.
///
/// New ciphertext is always [`KeyDerivation::Argon2id`]. `LegacyDoubleSha256`
/// exists only so ciphertext imported from an older store (which stretched the
/// passphrase with two rounds of SHA-256, per the original AES-CBC discipline)
/// can still be decrypted; it is never produced by [`encrypt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDerivation {
    Argon2id,
    LegacyDoubleSha256,
}

impl KeyDerivation {
    fn tag(self) -> u8 {
        match self {
            KeyDerivation::Argon2id => 1,
            KeyDerivation::LegacyDoubleSha256 => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, CryptoError> {
        match tag {
            1 => Ok(KeyDerivation::Argon2id),
            2 => Ok(KeyDerivation::LegacyDoubleSha256),
            _ => Err(CryptoError::InvalidFormat),
        }
    }
}

/// An independently-salted, independently-nonced AES-256-GCM ciphertext.
///
/// Wire format: `kdf_tag(1) || salt(16) || nonce(12) || ciphertext`.
pub struct EncryptedPayload {
    kdf: KeyDerivation,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + SALT_LEN + NONCE_LEN + self.ciphertext.len());
        out.push(self.kdf.tag());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let header = 1 + SALT_LEN + NONCE_LEN;
        if bytes.len() < header + 16 {
            return Err(CryptoError::InvalidFormat);
        }
        let kdf = KeyDerivation::from_tag(bytes[0])?;
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        salt.copy_from_slice(&bytes[1..1 + SALT_LEN]);
        nonce.copy_from_slice(&bytes[1 + SALT_LEN..header]);
        let ciphertext = bytes[header..].to_vec();
        Ok(Self {
            kdf,
            salt,
            nonce,
            ciphertext,
        })
    }

    pub fn is_empty_sentinel(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

fn derive_key_argon2id(password: &str, salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN], CryptoError> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(KEY_LEN))
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(key)
}

/// Two rounds of SHA-256 over `password || salt`, matching the stretch used by
/// stores written before Argon2id was adopted.
fn derive_key_legacy_double_sha256(password: &str, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    let mut data = Vec::with_capacity(password.len() + SALT_LEN);
    data.extend_from_slice(password.as_bytes());
    data.extend_from_slice(salt);
    let once = sha256::Hash::hash(&data);
    let twice = sha256::Hash::hash(once.as_byte_array());
    *twice.as_byte_array()
}

fn derive_key(kdf: KeyDerivation, password: &str, salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN], CryptoError> {
    match kdf {
        KeyDerivation::Argon2id => derive_key_argon2id(password, salt),
        KeyDerivation::LegacyDoubleSha256 => Ok(derive_key_legacy_double_sha256(password, salt)),
    }
}

/// Encrypt `plaintext` with a fresh random salt and nonce, under Argon2id.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<EncryptedPayload, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let nonce_arr = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&nonce_arr);

    let mut key = derive_key_argon2id(password, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    key.zeroize();

    Ok(EncryptedPayload {
        kdf: KeyDerivation::Argon2id,
        salt,
        nonce,
        ciphertext,
    })
}

/// Decrypt a payload using whichever KDF it was tagged with on encryption.
pub fn decrypt(payload: &EncryptedPayload, password: &str) -> Result<Vec<u8>, CryptoError> {
    let mut key = derive_key(payload.kdf, password, &payload.salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&payload.nonce), payload.ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed);
    key.zeroize();
    plaintext
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let seed = [42u8; 64];
        let encrypted = encrypt(&seed, "correct horse battery staple").unwrap();
        let decrypted = decrypt(&encrypted, "correct horse battery staple").unwrap();
        assert_eq!(decrypted, seed);
    }

    #[test]
    fn wrong_password_fails() {
        let encrypted = encrypt(b"privkeybytes", "right").unwrap();
        assert!(decrypt(&encrypted, "wrong").is_err());
    }

    #[test]
    fn seed_and_privkey_encryptions_use_independent_salts() {
        let seed_enc = encrypt(&[1u8; 64], "same password").unwrap();
        let privkey_enc = encrypt(&[1u8; 32], "same password").unwrap();
        assert_ne!(seed_enc.salt, privkey_enc.salt);
        assert_ne!(seed_enc.nonce, privkey_enc.nonce);
    }

    #[test]
    fn serialization_roundtrip() {
        let encrypted = encrypt(b"some private key material", "pw").unwrap();
        let bytes = encrypted.to_bytes();
        let restored = EncryptedPayload::from_bytes(&bytes).unwrap();
        let decrypted = decrypt(&restored, "pw").unwrap();
        assert_eq!(decrypted, b"some private key material");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let encrypted = encrypt(b"seed material", "pw").unwrap();
        let mut bytes = encrypted.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = EncryptedPayload::from_bytes(&bytes).unwrap();
        assert!(decrypt(&tampered, "pw").is_err());
    }

    #[test]
    fn legacy_kdf_decrypts_payload_encrypted_with_it() {
        let salt = [7u8; SALT_LEN];
        let nonce_arr = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&nonce_arr);
        let key = derive_key_legacy_double_sha256("old password", &salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), b"legacy seed".as_slice())
            .unwrap();
        let payload = EncryptedPayload {
            kdf: KeyDerivation::LegacyDoubleSha256,
            salt,
            nonce,
            ciphertext,
        };
        let decrypted = decrypt(&payload, "old password").unwrap();
        assert_eq!(decrypted, b"legacy seed");
    }

    #[test]
    fn empty_plaintext_round_trips_as_empty_sentinel() {
        let encrypted = encrypt(b"", "pw").unwrap();
        assert!(!encrypted.is_empty_sentinel()); // GCM tag makes ciphertext non-empty
        let decrypted = decrypt(&encrypted, "pw").unwrap();
        assert!(decrypted.is_empty());
    }
}
