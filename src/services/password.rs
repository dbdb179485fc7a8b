//! Password and secret-token hashing
//!
//! Passwords are hashed with Argon2id (random salt per hash, PHC string
//! output). Opaque secrets handed to users, such as password reset tokens,
//! are 32 random bytes; only their SHA-256 digest is persisted so a
//! database leak does not reveal usable tokens.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2,
};
use data_encoding::{BASE64URL_NOPAD, HEXLOWER};
use sha2::{Digest, Sha256};

/// Minimum accepted password length, in characters
pub const MIN_PASSWORD_LEN: usize = 8;

/// Hash a password using Argon2id with the crate's default parameters.
///
/// ```ignore
/// let hash = hash_password("correct horse battery staple")?;
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
        .context("Password hashing failed")?;

    Ok(password_hash.to_string())
}

/// Verify a password against a stored PHC hash.
///
/// Returns `Ok(false)` on mismatch and an error only for malformed hashes.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))
        .context("Failed to parse password hash")?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e))
            .context("Password verification error"),
    }
}

/// A fresh URL-safe secret made of 32 random bytes
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    BASE64URL_NOPAD.encode(&bytes)
}

/// Lowercase hex SHA-256 of a token, the form stored in the database
pub fn hash_token(token: &str) -> String {
    HEXLOWER.encode(&Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2id_and_salted() {
        let first = hash_password("s3cret-pass").expect("hash");
        let second = hash_password("s3cret-pass").expect("hash");

        assert!(first.starts_with("$argon2id$"));
        assert_ne!(first, second);
        assert!(!first.contains("s3cret-pass"));
    }

    #[test]
    fn test_verify_password() {
        let hash = hash_password("correct-password").expect("hash");
        assert!(verify_password("correct-password", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(verify_password("password", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_unicode_password() {
        let hash = hash_password("pässwörd🔐").expect("hash");
        assert!(verify_password("pässwörd🔐", &hash).unwrap());
    }

    #[test]
    fn test_generated_tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        // 32 bytes -> 43 unpadded base64 characters
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_hash_token_is_stable_hex() {
        let digest = hash_token("abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_token("abc"), digest);
        assert_ne!(hash_token("abd"), digest);
    }
}
