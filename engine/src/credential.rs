//! Admin credential hashing and verification.
//!
//! Secrets are stored as `sha256$<salt>$<hex digest>` where the digest covers
//! `salt || secret`. Values written by older clients are plain text and are
//! still accepted by [`verify`].

use sha2::{Digest, Sha256};

const SCHEME: &str = "sha256";

/// Result of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// No credential existed; the supplied secret became the credential.
    FirstTimeSetup,
    /// The secret matched the stored credential.
    Authenticated,
    /// Wrong secret, or an empty one.
    Rejected,
}

impl LoginOutcome {
    pub fn is_success(self) -> bool {
        !matches!(self, LoginOutcome::Rejected)
    }
}

/// Hash `secret` with a fresh random salt.
pub fn hash(secret: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    hash_with_salt(secret, &salt)
}

fn hash_with_salt(secret: &str, salt: &str) -> String {
    format!("{}${}${}", SCHEME, salt, digest(salt, secret))
}

fn digest(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check `secret` against a stored credential.
pub fn verify(stored: &str, secret: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(SCHEME), Some(salt), Some(expected)) => {
            constant_time_eq(digest(salt, secret).as_bytes(), expected.as_bytes())
        }
        _ => constant_time_eq(stored.as_bytes(), secret.as_bytes()),
    }
}

/// Whether `stored` still holds a legacy plain-text secret.
pub fn is_legacy(stored: &str) -> bool {
    !stored.starts_with("sha256$")
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_secret_verifies() {
        let stored = hash("hunter2");
        assert!(stored.starts_with("sha256$"));
        assert!(!is_legacy(&stored));
        assert!(verify(&stored, "hunter2"));
        assert!(!verify(&stored, "hunter3"));
        assert!(!verify(&stored, ""));
    }

    #[test]
    fn salts_differ() {
        assert_ne!(hash("same"), hash("same"));
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            hash_with_salt("pw", "salt"),
            "sha256$salt$21baed949b716c49cbf7d8fe79412f1dc104745650a32081ae0be0b967aeb7f3"
        );
    }

    #[test]
    fn legacy_plaintext_still_verifies() {
        assert!(is_legacy("1234"));
        assert!(verify("1234", "1234"));
        assert!(!verify("1234", "12345"));
    }
}
