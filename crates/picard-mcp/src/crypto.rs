//! Cryptographic helpers.
//!
//! - Opaque 256-bit tokens for codes, access and refresh tokens, client secrets
//! - SHA-256 digests so tokens are only ever stored hashed
//! - XChaCha20-Poly1305 at-rest encryption for memory text
//! - scrypt password hashing for resource owners

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use scrypt::{Params, scrypt};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

/// Nonce size for XChaCha20-Poly1305.
const NONCE_LEN: usize = 24;

/// scrypt cost: N = 2^14, r = 8, p = 1, 32-byte key.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const SCRYPT_KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// Generate an unguessable URL-safe token (256 bits of entropy).
#[must_use]
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256 digest used as the storage key for tokens and secrets.
#[must_use]
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Compare two byte slices in constant time.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Symmetric cipher for memory text at rest.
///
/// The 32-byte key is SHA-256 of the configured secret. Each ciphertext is
/// `base64(nonce || ciphertext || tag)` with a fresh random nonce.
#[derive(Clone)]
pub struct TextCipher {
    cipher: XChaCha20Poly1305,
}

impl TextCipher {
    /// Derive a cipher from a secret of any length.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        Self { cipher: XChaCha20Poly1305::new(Key::from_slice(&key)) }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext =
            self.cipher.encrypt(&nonce, plaintext.as_bytes()).map_err(|_| CryptoError::Encrypt)?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let raw = STANDARD.decode(encoded).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(CryptoError::Encoding("ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}

impl std::fmt::Debug for TextCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextCipher").finish_non_exhaustive()
    }
}

/// Hash a password with scrypt. Format: `base64(salt)$base64(key)`.
pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let key = derive_key(password, &salt)?;
    Ok(format!("{}${}", STANDARD.encode(salt), STANDARD.encode(key)))
}

/// Verify a password against a hash produced by [`hash_password`].
pub fn verify_password(hash: &str, password: &str) -> Result<bool, CryptoError> {
    let (salt, key) = hash
        .split_once('$')
        .ok_or_else(|| CryptoError::Encoding("invalid password hash format".to_string()))?;

    let salt = STANDARD.decode(salt).map_err(|e| CryptoError::Encoding(e.to_string()))?;
    let expected = STANDARD.decode(key).map_err(|e| CryptoError::Encoding(e.to_string()))?;

    let derived = derive_key(password, &salt)?;
    Ok(constant_time_eq(&derived, &expected))
}

fn derive_key(password: &str, salt: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SCRYPT_KEY_LEN)
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))?;

    let mut output = vec![0u8; SCRYPT_KEY_LEN];
    scrypt(password.as_bytes(), salt, &params, &mut output)
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    Ok(output)
}
