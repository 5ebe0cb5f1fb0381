//! Quota-tracked API credentials
//!
//! Usage is reset lazily: every availability read first checks whether the
//! 24h window since `last_reset` has elapsed. There is no background timer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Length of a quota window, in hours
pub const RESET_WINDOW_HOURS: i64 = 24;

/// Lifecycle state of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    /// Sticky until the next daily reset
    RateLimited,
    Error,
    /// Set by configuration only; never cleared by a reset
    Disabled,
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Error => write!(f, "error"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// A single credential with its daily usage
#[derive(Clone)]
pub struct ApiKey {
    secret: String,
    pub provider: String,
    pub daily_limit: u64,
    pub used_today: u64,
    pub last_reset: DateTime<Utc>,
    pub status: KeyStatus,
    pub error_count: u64,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("key", &mask_secret(&self.secret))
            .field("provider", &self.provider)
            .field("daily_limit", &self.daily_limit)
            .field("used_today", &self.used_today)
            .field("last_reset", &self.last_reset)
            .field("status", &self.status)
            .field("error_count", &self.error_count)
            .finish()
    }
}

impl ApiKey {
    pub fn new(secret: impl Into<String>, provider: impl Into<String>, daily_limit: u64) -> Self {
        Self {
            secret: secret.into(),
            provider: provider.into(),
            daily_limit,
            used_today: 0,
            last_reset: Utc::now(),
            status: KeyStatus::Active,
            error_count: 0,
        }
    }

    /// Raw credential, for building requests only
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Display-safe form of the credential
    pub fn masked(&self) -> String {
        mask_secret(&self.secret)
    }

    /// Start a new quota window if 24h have passed. Returns whether it did.
    pub fn reset_if_needed(&mut self) -> bool {
        self.reset_if_needed_at(Utc::now())
    }

    pub fn reset_if_needed_at(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.last_reset < Duration::hours(RESET_WINDOW_HOURS) {
            return false;
        }
        self.used_today = 0;
        self.last_reset = now;
        if self.status != KeyStatus::Disabled {
            self.status = KeyStatus::Active;
        }
        true
    }

    /// Units left in the current window
    pub fn remaining(&mut self) -> u64 {
        self.remaining_at(Utc::now())
    }

    pub fn remaining_at(&mut self, now: DateTime<Utc>) -> u64 {
        self.reset_if_needed_at(now);
        self.daily_limit.saturating_sub(self.used_today)
    }

    pub fn is_available(&mut self) -> bool {
        self.is_available_at(Utc::now())
    }

    pub fn is_available_at(&mut self, now: DateTime<Utc>) -> bool {
        self.remaining_at(now) > 0 && self.status == KeyStatus::Active
    }

    /// Record usage after a successful call
    pub fn charge(&mut self, units: u64) {
        self.used_today = self.used_today.saturating_add(units);
    }

    pub fn mark_rate_limited(&mut self) {
        self.status = KeyStatus::RateLimited;
    }

    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    pub fn disable(&mut self) {
        self.status = KeyStatus::Disabled;
    }
}

/// Mask a secret for logs and Debug output.
/// Shows the first 3 and last 4 chars of keys longer than 7 chars, otherwise "***".
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(limit: u64) -> ApiKey {
        ApiKey::new("sk-test-0123456789", "groq", limit)
    }

    #[test]
    fn test_charge_reduces_remaining() {
        let mut k = key(100);
        k.charge(40);
        assert_eq!(k.used_today, 40);
        assert_eq!(k.remaining(), 60);
        assert!(k.is_available());
    }

    #[test]
    fn test_usage_accumulates_until_reset() {
        let mut k = key(1_000);
        for cost in [10, 25, 7] {
            k.charge(cost);
        }
        assert_eq!(k.used_today, 42);

        let later = k.last_reset + Duration::hours(24);
        assert!(k.reset_if_needed_at(later));
        assert_eq!(k.used_today, 0);
        // Same window: no second reset
        assert!(!k.reset_if_needed_at(later + Duration::hours(23)));
    }

    #[test]
    fn test_no_reset_before_window() {
        let mut k = key(100);
        k.charge(10);
        let almost = k.last_reset + Duration::hours(23) + Duration::minutes(59);
        assert!(!k.reset_if_needed_at(almost));
        assert_eq!(k.used_today, 10);
    }

    #[test]
    fn test_overrun_clamps_remaining() {
        let mut k = key(100);
        k.charge(150);
        assert_eq!(k.remaining(), 0);
        assert!(!k.is_available());
    }

    #[test]
    fn test_rate_limited_until_lazy_reset() {
        let mut k = key(100);
        let start = k.last_reset;
        k.mark_rate_limited();
        assert!(!k.is_available_at(start + Duration::hours(1)));
        assert!(!k.is_available_at(start + Duration::hours(23)));
        assert!(k.is_available_at(start + Duration::hours(24)));
        assert_eq!(k.status, KeyStatus::Active);
    }

    #[test]
    fn test_disabled_survives_reset() {
        let mut k = key(100);
        k.charge(50);
        k.disable();
        assert!(k.reset_if_needed_at(k.last_reset + Duration::hours(30)));
        assert_eq!(k.used_today, 0);
        assert_eq!(k.status, KeyStatus::Disabled);
        assert!(!k.is_available());
    }

    #[test]
    fn test_stale_usage_resets_on_first_read() {
        let mut k = key(100_000);
        k.used_today = 90_000;
        k.last_reset = Utc::now() - Duration::hours(30);
        assert!(k.is_available());
        assert_eq!(k.used_today, 0);
        assert_eq!(k.status, KeyStatus::Active);
    }

    #[test]
    fn test_error_does_not_change_status() {
        let mut k = key(100);
        k.record_error();
        k.record_error();
        assert_eq!(k.error_count, 2);
        assert_eq!(k.status, KeyStatus::Active);
    }

    #[test]
    fn test_debug_hides_secret() {
        let k = key(100);
        let debug = format!("{:?}", k);
        assert!(!debug.contains("sk-test-0123456789"));
        assert!(debug.contains("sk-...6789"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("gsk_abcdefgh"), "gsk...efgh");
    }

    #[test]
    fn test_status_display_matches_serde() {
        for status in [
            KeyStatus::Active,
            KeyStatus::RateLimited,
            KeyStatus::Error,
            KeyStatus::Disabled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }
}
