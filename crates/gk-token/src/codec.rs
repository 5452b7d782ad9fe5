//! AES-256-GCM token codec

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::TokenError;

const NONCE_LEN: usize = 12;

/// Encodes and decodes short opaque identifiers into authenticated,
/// URL-safe strings. The key is derived from a passphrase so that
/// operators can configure a plain string rather than a raw key.
pub struct TokenCodec {
    cipher: Aes256Gcm,
}

impl TokenCodec {
    pub fn new(passphrase: &str) -> Result<Self, TokenError> {
        if passphrase.is_empty() {
            return Err(TokenError::InvalidKey("passphrase must not be empty".to_string()));
        }
        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| TokenError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext` into a URL-safe string: `base64(nonce || ciphertext)`.
    pub fn encode(&self, plaintext: &str) -> String {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // encrypt() only fails on catastrophic misuse (wrong key length),
        // which new_from_slice above already rules out.
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .expect("AES-GCM encryption with a validated key cannot fail");

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        URL_SAFE_NO_PAD.encode(payload)
    }

    pub fn decode(&self, token: &str) -> Result<String, TokenError> {
        let payload = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| TokenError::DecodeFailure(e.to_string()))?;

        if payload.len() < NONCE_LEN {
            return Err(TokenError::DecodeFailure("token too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| TokenError::DecodeFailure("authentication failed".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| TokenError::DecodeFailure(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nonempty_strings() {
        let codec = TokenCodec::new("correct horse battery staple").unwrap();
        for value in ["A", "operator-1", "a-fairly-long-opaque-identifier-string"] {
            let encoded = codec.encode(value);
            assert_eq!(codec.decode(&encoded).unwrap(), value);
        }
    }

    #[test]
    fn encodes_are_url_safe() {
        let codec = TokenCodec::new("pw").unwrap();
        let encoded = codec.encode("some/id+with=chars");
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let codec = TokenCodec::new("pw").unwrap();
        let mut encoded = codec.encode("A").into_bytes();
        let last = encoded.len() - 1;
        encoded[last] = if encoded[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(encoded).unwrap();
        assert!(codec.decode(&tampered).is_err());
    }

    #[test]
    fn rejects_garbage_input() {
        let codec = TokenCodec::new("pw").unwrap();
        assert!(codec.decode("not valid base64 at all!!").is_err());
    }

    #[test]
    fn different_passphrases_cannot_decode_each_other() {
        let a = TokenCodec::new("passphrase-a").unwrap();
        let b = TokenCodec::new("passphrase-b").unwrap();
        let encoded = a.encode("secret-id");
        assert!(b.decode(&encoded).is_err());
    }
}
