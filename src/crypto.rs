use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD_NO_PAD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::KdfParams;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Non-secret salt shared by every room key derivation.
const ROOM_KEY_SALT: &[u8] = b"room_broadcast/room-key/v1";

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionError,
    #[error("Decryption failed")]
    DecryptionError,
    #[error("Invalid key format")]
    InvalidKeyError,
    #[error("Key derivation failed: {0}")]
    KdfError(argon2::Error),
}

/// A 32-byte symmetric key. `Debug` prints only the fingerprint.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyError)?;
        Ok(SessionKey(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short, log-safe identifier for the key.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        BASE64.encode(&digest[..8])
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.fingerprint())
    }
}

/// Derives the room key from the shared room password with Argon2id.
///
/// This is deliberately expensive; call it from a blocking context.
pub fn derive_room_key(password: &[u8], params: &KdfParams) -> Result<SessionKey, CryptoError> {
    let params = Params::new(params.memory_kib, params.time_cost, params.lanes, Some(KEY_LEN))
        .map_err(CryptoError::KdfError)?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon
        .hash_password_into(password, ROOM_KEY_SALT, &mut key)
        .map_err(CryptoError::KdfError)?;
    Ok(SessionKey(key))
}

/// AES-256-GCM with a random nonce prepended to every ciphertext.
pub struct SessionCipher {
    cipher: Aes256Gcm,
}

impl SessionCipher {
    pub fn new(key: &SessionKey) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionError)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(combined)
    }

    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::DecryptionError);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::DecryptionError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHEAP: KdfParams = KdfParams {
        memory_kib: 64,
        time_cost: 1,
        lanes: 1,
    };

    #[test]
    fn room_key_depends_only_on_password_and_params() {
        let a = derive_room_key(b"hunter2", &CHEAP).unwrap();
        let b = derive_room_key(b"hunter2", &CHEAP).unwrap();
        let c = derive_room_key(b"hunter3", &CHEAP).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let heavier = KdfParams {
            time_cost: 2,
            ..CHEAP
        };
        assert_ne!(a, derive_room_key(b"hunter2", &heavier).unwrap());
    }

    #[test]
    fn invalid_cost_parameters_are_reported() {
        let broken = KdfParams {
            memory_kib: 1,
            time_cost: 1,
            lanes: 1,
        };
        assert!(matches!(
            derive_room_key(b"pw", &broken),
            Err(CryptoError::KdfError(_))
        ));
    }

    #[test]
    fn sealed_data_opens_only_with_same_key_and_aad() {
        let key = SessionKey::from_slice(&[7u8; KEY_LEN]).unwrap();
        let cipher = SessionCipher::new(&key);
        let sealed = cipher.seal(b"payload", b"lobby").unwrap();

        assert_eq!(cipher.open(&sealed, b"lobby").unwrap(), b"payload");
        assert!(cipher.open(&sealed, b"kitchen").is_err());

        let other = SessionCipher::new(&SessionKey::from_slice(&[8u8; KEY_LEN]).unwrap());
        assert!(other.open(&sealed, b"lobby").is_err());
        assert!(cipher.open(&sealed[..4], b"lobby").is_err());
    }

    #[test]
    fn keys_must_be_exactly_32_bytes_and_never_print_raw() {
        assert!(SessionKey::from_slice(&[0u8; 31]).is_err());
        let key = SessionKey::from_slice(&[0xAB; KEY_LEN]).unwrap();
        let printed = format!("{key:?}");
        assert!(printed.starts_with("SessionKey("));
        assert!(!printed.contains('['));
        assert_eq!(key.fingerprint().len(), 11);
    }
}
