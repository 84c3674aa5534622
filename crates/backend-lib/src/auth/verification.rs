//! One-time verification codes for email approval, password recovery and
//! phone login.
//!
//! At most one live code exists per `(purpose, subject)`; issuing again
//! replaces it. Codes are single use and expire after the configured TTL.
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::token_generator::{generate_numeric_code, generate_secure_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationPurpose {
    /// Subject is a user id
    EmailApprove,
    /// Subject is a user id
    Recovery,
    /// Subject is a canonical phone number
    Phone,
}

#[derive(Debug, Clone)]
struct PendingCode {
    code: String,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct VerificationStore {
    codes: Arc<DashMap<(VerificationPurpose, String), PendingCode>>,
    ttl: Duration,
}

impl VerificationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            codes: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh code for a subject
    pub fn issue(&self, purpose: VerificationPurpose, subject: &str) -> String {
        let code = match purpose {
            VerificationPurpose::Phone => generate_numeric_code(),
            VerificationPurpose::EmailApprove | VerificationPurpose::Recovery => {
                generate_secure_token()
            },
        };
        self.codes.insert(
            (purpose, subject.to_string()),
            PendingCode {
                code: code.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        code
    }

    /// Redeem a code without knowing its subject; returns the subject
    pub fn redeem(&self, purpose: VerificationPurpose, code: &str) -> Option<String> {
        let key = self
            .codes
            .iter()
            .find(|entry| entry.key().0 == purpose && entry.value().code == code)
            .map(|entry| entry.key().clone())?;
        let now = Instant::now();
        self.codes
            .remove_if(&key, |_, pending| pending.code == code && pending.expires_at > now)
            .map(|(key, _)| key.1)
    }

    /// Redeem a code issued for a known subject. Check and removal are one
    /// step, so concurrent redemptions of a code succeed at most once.
    pub fn redeem_for(&self, purpose: VerificationPurpose, subject: &str, code: &str) -> bool {
        let key = (purpose, subject.to_string());
        let now = Instant::now();
        self.codes
            .remove_if(&key, |_, pending| pending.code == code && pending.expires_at > now)
            .is_some()
    }

    /// Drop expired codes
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.codes.retain(|_, pending| pending.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_single_use() {
        let store = VerificationStore::new(Duration::from_secs(60));
        let code = store.issue(VerificationPurpose::EmailApprove, "user-1");
        assert_eq!(
            store.redeem(VerificationPurpose::EmailApprove, &code).as_deref(),
            Some("user-1")
        );
        assert!(store.redeem(VerificationPurpose::EmailApprove, &code).is_none());
    }

    #[test]
    fn test_purposes_do_not_mix() {
        let store = VerificationStore::new(Duration::from_secs(60));
        let code = store.issue(VerificationPurpose::Recovery, "user-1");
        assert!(store.redeem(VerificationPurpose::EmailApprove, &code).is_none());
        assert!(store.redeem(VerificationPurpose::Recovery, &code).is_some());
    }

    #[test]
    fn test_phone_codes_are_bound_to_subject() {
        let store = VerificationStore::new(Duration::from_secs(60));
        let code = store.issue(VerificationPurpose::Phone, "+15550001");
        assert_eq!(code.len(), 6);
        assert!(!store.redeem_for(VerificationPurpose::Phone, "+15550002", &code));
        assert!(store.redeem_for(VerificationPurpose::Phone, "+15550001", &code));
        assert!(!store.redeem_for(VerificationPurpose::Phone, "+15550001", &code));
    }

    #[test]
    fn test_concurrent_redemption_succeeds_once() {
        let store = VerificationStore::new(Duration::from_secs(60));
        let code = store.issue(VerificationPurpose::Phone, "+15550001");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let code = code.clone();
                std::thread::spawn(move || {
                    store.redeem_for(VerificationPurpose::Phone, "+15550001", &code)
                })
            })
            .collect();
        let redeemed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(redeemed, 1);
    }

    #[test]
    fn test_wrong_code_keeps_the_live_one() {
        let store = VerificationStore::new(Duration::from_secs(60));
        let code = store.issue(VerificationPurpose::Phone, "+1");
        assert!(!store.redeem_for(VerificationPurpose::Phone, "+1", "000000x"));
        assert!(store.redeem_for(VerificationPurpose::Phone, "+1", &code));
    }

    #[test]
    fn test_reissue_replaces_code() {
        let store = VerificationStore::new(Duration::from_secs(60));
        let first = store.issue(VerificationPurpose::Phone, "+1");
        let second = store.issue(VerificationPurpose::Phone, "+1");
        assert_eq!(store.len(), 1);
        if first != second {
            assert!(!store.redeem_for(VerificationPurpose::Phone, "+1", &first));
        }
        assert!(store.redeem_for(VerificationPurpose::Phone, "+1", &second));
    }

    #[test]
    fn test_expired_codes() {
        let store = VerificationStore::new(Duration::from_millis(5));
        let code = store.issue(VerificationPurpose::EmailApprove, "user-1");
        std::thread::sleep(Duration::from_millis(15));
        assert!(store.redeem(VerificationPurpose::EmailApprove, &code).is_none());

        store.issue(VerificationPurpose::Phone, "+1");
        std::thread::sleep(Duration::from_millis(15));
        store.cleanup();
        assert!(store.is_empty());
    }
}
