// ============================
// passport-backend-lib/src/auth/mod.rs
// ============================
//! Authentication primitives: passwords, tokens, codes and login throttling.

pub mod password;
pub mod rate_limit;
pub mod token;
pub mod token_generator;
pub mod verification;

pub use password::{hash_password, hash_password_secure, verify_dummy_password, verify_password, validate_password_strength, PasswordRequirements, MIN_PASSWORD_LENGTH};
pub use rate_limit::AuthRateLimiter;
pub use token::{Claims, ExtraClaims, TokenSigner};
pub use verification::{VerificationPurpose, VerificationStore};
