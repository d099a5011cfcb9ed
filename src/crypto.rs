//! Secret token codec and credential hashing.
//!
//! Invite secrets and session tokens are 256-bit random values encoded as
//! URL-safe base64. Only their SHA-256 digest (the lookup hash) is ever
//! persisted; the raw value is handed to the caller once and zeroized on drop.
//!
//! Credentials for the database identity provider are hashed with Argon2id.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Number of random bytes behind every secret (256 bits).
pub const SECRET_BYTES: usize = 32;

/// Anything shorter than this cannot be a secret we issued.
pub const MIN_SECRET_LEN: usize = 32;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("credential hashing failed: {0}")]
    HashingFailed(String),
    #[error("stored credential hash is malformed: {0}")]
    MalformedHash(String),
}

/// Raw secret (invite token or session token) as issued to the caller.
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RawSecret(String);

impl RawSecret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for RawSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawSecret([REDACTED])")
    }
}

/// Hex-encoded SHA-256 digest of a secret; safe to store and index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupHash(String);

impl LookupHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn prefix(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for LookupHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates a fresh secret together with its lookup hash.
///
/// Entropy comes from the operating system; failure to read it aborts the
/// process, there is nothing sensible to retry.
pub fn issue() -> (RawSecret, LookupHash) {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let secret = RawSecret(URL_SAFE_NO_PAD.encode(bytes));
    bytes.zeroize();
    let lookup = hash(secret.expose());
    (secret, lookup)
}

/// Deterministic one-way digest used as the storage key.
pub fn hash(secret: &str) -> LookupHash {
    LookupHash(hex::encode(Sha256::digest(secret.as_bytes())))
}

/// Cheap shape check performed before any store lookup.
pub fn is_plausible_secret(raw: &str) -> bool {
    raw.len() >= MIN_SECRET_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[inline]
fn argon2_instance() -> Argon2<'static> {
    #[cfg(test)]
    {
        // Weak parameters keep unit tests fast; never compiled into the service.
        argon2::Params::new(1024, 1, 1, None)
            .map(|params| Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params))
            .unwrap_or_default()
    }

    #[cfg(not(test))]
    {
        Argon2::default()
    }
}

/// Hashes a credential into an Argon2 PHC string.
pub fn hash_credential(credential: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    argon2_instance()
        .hash_password(credential.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CryptoError::HashingFailed(e.to_string()))
}

/// Verifies a credential against a stored PHC string.
pub fn verify_credential(credential: &str, stored: &str) -> Result<bool, CryptoError> {
    let parsed = PasswordHash::new(stored).map_err(|e| CryptoError::MalformedHash(e.to_string()))?;
    Ok(argon2_instance()
        .verify_password(credential.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn issued_secret_is_url_safe_and_long_enough() {
        let (secret, _) = issue();
        assert!(secret.expose().len() >= MIN_SECRET_LEN);
        assert_eq!(secret.expose().len(), 43);
        assert!(is_plausible_secret(secret.expose()));
        assert!(!secret.expose().contains('='));
    }

    #[test]
    fn lookup_hash_matches_rehash_of_secret() {
        let (secret, lookup) = issue();
        assert_eq!(hash(secret.expose()), lookup);
        assert_eq!(lookup.as_str().len(), 64);
        assert_ne!(lookup.as_str(), secret.expose());
    }

    #[test]
    fn secrets_do_not_repeat() {
        let hashes: HashSet<_> = (0..64).map(|_| issue().1).collect();
        assert_eq!(hashes.len(), 64);
    }

    #[test]
    fn debug_output_redacts_secret() {
        let (secret, _) = issue();
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains(secret.expose()));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn short_or_malformed_input_is_not_plausible() {
        assert!(!is_plausible_secret("abc"));
        assert!(!is_plausible_secret(&"a".repeat(31)));
        assert!(!is_plausible_secret(&format!("{}!", "a".repeat(40))));
        assert!(is_plausible_secret(&"a".repeat(32)));
    }

    #[test]
    fn credential_hash_verifies_only_the_original() {
        let stored = hash_credential("correct horse").unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify_credential("correct horse", &stored).unwrap());
        assert!(!verify_credential("wrong horse", &stored).unwrap());
    }

    #[test]
    fn malformed_stored_hash_is_an_error() {
        assert!(matches!(
            verify_credential("anything", "not-a-phc-string"),
            Err(CryptoError::MalformedHash(_))
        ));
    }
}
