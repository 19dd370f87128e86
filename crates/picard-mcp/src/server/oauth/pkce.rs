//! PKCE (Proof Key for Code Exchange), RFC 7636.
//!
//! Server side: S256 verification and parameter syntax checks.
//! Client side: verifier generation and challenge derivation.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::crypto::constant_time_eq;

/// The only challenge method accepted.
pub const METHOD_S256: &str = "S256";

/// 43-128 characters from the unreserved set (RFC 7636 §4.1).
static VERIFIER_SYNTAX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-._~]{43,128}$").ok());

/// `BASE64URL(SHA256(code_verifier))`.
#[must_use]
pub fn challenge_s256(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// Verify a PKCE S256 code challenge in constant time.
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    let computed = challenge_s256(code_verifier);
    constant_time_eq(computed.as_bytes(), code_challenge.as_bytes())
}

/// Verifiers and challenges share the same syntax.
#[must_use]
pub fn is_well_formed(value: &str) -> bool {
    VERIFIER_SYNTAX.as_ref().is_some_and(|re| re.is_match(value))
}

/// Generate a fresh code verifier (32 random bytes, 43 characters).
#[must_use]
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
