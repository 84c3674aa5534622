// ============================
// passport-backend-lib/src/auth/password.rs
// ============================
//! Password hashing and verification.
use scrypt::{password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng}, Scrypt};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use zeroize::Zeroize;

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Password complexity requirements
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordRequirements {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordRequirements {
    fn default() -> Self {
        Self {
            min_length: MIN_PASSWORD_LENGTH,
            require_uppercase: false,
            require_lowercase: true,
            require_digit: true,
            require_special: false,
        }
    }
}

impl PasswordRequirements {
    /// Human-readable summary for validation errors
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("at least {} characters", self.min_length)];
        if self.require_uppercase {
            parts.push("an uppercase letter".to_string());
        }
        if self.require_lowercase {
            parts.push("a lowercase letter".to_string());
        }
        if self.require_digit {
            parts.push("a digit".to_string());
        }
        if self.require_special {
            parts.push("a special character".to_string());
        }
        format!("Password must contain {}", parts.join(", "))
    }
}

/// Hash a password using scrypt
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Scrypt
        .hash_password(plain.as_bytes(), &salt)?
        .to_string();
    Ok(hash)
}

/// Verify a password against a hash
pub fn verify_password(hash: &str, plain: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Scrypt.verify_password(plain.as_bytes(), &parsed_hash).is_ok()
}

/// Checked when no account matches a login, so a miss costs one scrypt
/// verification like a wrong password does
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("no account matches this login").ok());

/// Spend the time of one verification without any account behind it
pub fn verify_dummy_password(plain: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(hash, plain);
    }
}

/// Check if a password meets the complexity requirements
pub fn validate_password_strength(password: &str, requirements: &PasswordRequirements) -> bool {
    if password.chars().count() < requirements.min_length {
        return false;
    }

    if requirements.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
        return false;
    }

    if requirements.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
        return false;
    }

    if requirements.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }

    if requirements.require_special && !password.chars().any(|c| !c.is_alphanumeric()) {
        return false;
    }

    true
}

/// Securely hash a password and zeroize the original
pub fn hash_password_secure(plain: &mut String) -> anyhow::Result<String> {
    let hash = hash_password(plain)?;
    plain.zeroize();
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse 1").unwrap();
        assert!(verify_password(&hash, "correct horse 1"));
        assert!(!verify_password(&hash, "wrong horse 1"));
        assert!(!verify_password("not-a-phc-string", "anything"));
    }

    #[test]
    fn test_dummy_hash_is_a_real_scrypt_hash() {
        let hash = DUMMY_HASH.as_deref().unwrap();
        let parsed = PasswordHash::new(hash).unwrap();
        assert_eq!(parsed.algorithm.as_str(), "scrypt");
        assert!(!verify_password(hash, "anything"));
        verify_dummy_password("anything");
    }

    #[test]
    fn test_hash_password_secure_wipes_input() {
        let mut plain = "secret123".to_string();
        let hash = hash_password_secure(&mut plain).unwrap();
        assert!(plain.is_empty());
        assert!(verify_password(&hash, "secret123"));
    }

    #[test]
    fn test_password_strength() {
        let req = PasswordRequirements::default();
        assert!(validate_password_strength("abcdefg1", &req));
        assert!(!validate_password_strength("abcdefgh", &req));
        assert!(!validate_password_strength("abc1", &req));

        let strict = PasswordRequirements {
            require_uppercase: true,
            require_special: true,
            ..PasswordRequirements::default()
        };
        assert!(!validate_password_strength("abcdefg1", &strict));
        assert!(validate_password_strength("Abcdefg1!", &strict));
        assert!(strict.describe().contains("special"));
    }
}
