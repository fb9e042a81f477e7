//! Shared policy helpers for the keydesk core.

use crate::models::ProductKey;

pub const SECONDS_PER_DAY: i64 = 86400;

/// Key lifetime policy: how long a claimed key stays valid when it carries
/// no explicit expiration.
///
/// Every consumer (subscriber classification, admin views) resolves
/// expirations through this one type so the default lives in exactly one
/// place instead of being repeated at call sites.
#[derive(Debug, Clone, Copy)]
pub struct KeyLifetime {
    /// Days of validity assumed from `used_at` when `expires_at` is absent.
    pub default_days: i64,
}

impl Default for KeyLifetime {
    fn default() -> Self {
        Self { default_days: 30 }
    }
}

impl KeyLifetime {
    pub fn new(default_days: i64) -> Self {
        Self { default_days }
    }

    /// Resolve the effective expiration timestamp for a claimed key.
    ///
    /// `used_at` is the claim time; the explicit `expires_at` wins when
    /// present, otherwise the default window applies.
    pub fn effective_expiry(&self, expires_at: Option<i64>, used_at: i64) -> i64 {
        expires_at.unwrap_or(used_at + self.default_days * SECONDS_PER_DAY)
    }

    /// Whether a key is still alive at `now`. Unclaimed keys are never
    /// "alive" in the subscription sense.
    pub fn is_alive(&self, key: &ProductKey, now: i64) -> bool {
        match key.used_at {
            Some(used_at) => self.effective_expiry(key.expires_at, used_at) > now,
            None => false,
        }
    }
}
