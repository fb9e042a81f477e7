use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::models::ProductKey;
use crate::util::KeyLifetime;

use super::Window;

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberDetail {
    pub email: String,
    /// Total claimed keys, ever.
    pub key_count: usize,
    pub active: bool,
    /// Most recent claim time.
    pub latest_used_at: i64,
    /// Latest effective expiry across all of this subscriber's keys.
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberReport {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub subscribers: Vec<SubscriberDetail>,
}

/// Group claimed keys by purchaser email and classify each subscriber as
/// active or inactive at `now`.
///
/// The policy is any-key-alive: one currently-valid key makes the
/// subscriber active no matter how many of their other keys have expired.
/// Subscribers are ordered by email for stable output.
pub fn subscriber_status(keys: &[ProductKey], lifetime: KeyLifetime, now: i64) -> SubscriberReport {
    let mut by_email: BTreeMap<&str, Vec<&ProductKey>> = BTreeMap::new();
    for key in keys {
        if let Some(email) = key.used_by_email.as_deref() {
            by_email.entry(email).or_default().push(key);
        }
    }

    let mut subscribers = Vec::with_capacity(by_email.len());
    let mut active = 0usize;
    for (email, keys) in by_email {
        let is_active = keys.iter().any(|k| lifetime.is_alive(k, now));
        if is_active {
            active += 1;
        }
        let latest_used_at = keys.iter().filter_map(|k| k.used_at).max().unwrap_or(0);
        let expires_at = keys
            .iter()
            .filter_map(|k| k.used_at.map(|u| lifetime.effective_expiry(k.expires_at, u)))
            .max()
            .unwrap_or(0);
        subscribers.push(SubscriberDetail {
            email: email.to_string(),
            key_count: keys.len(),
            active: is_active,
            latest_used_at,
            expires_at,
        });
    }

    SubscriberReport {
        total: subscribers.len(),
        active,
        inactive: subscribers.len() - active,
        subscribers,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoyaltySplit {
    pub new: usize,
    pub returning: usize,
}

/// Split the window's purchasers into first-time and returning customers.
///
/// A purchaser is "new" iff their all-time claimed-key count is exactly 1 —
/// the one claim that put them in this window. Anyone with prior (or
/// additional in-window) claims counts as returning.
pub fn loyalty_split(keys: &[ProductKey], window: Window) -> LoyaltySplit {
    let mut lifetime_counts: HashMap<&str, usize> = HashMap::new();
    for key in keys {
        if key.used_at.is_some() {
            if let Some(email) = key.used_by_email.as_deref() {
                *lifetime_counts.entry(email).or_default() += 1;
            }
        }
    }

    let period_purchasers: HashSet<&str> = keys
        .iter()
        .filter(|k| k.used_at.is_some_and(|t| window.contains(t)))
        .filter_map(|k| k.used_by_email.as_deref())
        .collect();

    let mut split = LoyaltySplit {
        new: 0,
        returning: 0,
    };
    for email in period_purchasers {
        if lifetime_counts.get(email).copied().unwrap_or(0) == 1 {
            split.new += 1;
        } else {
            split.returning += 1;
        }
    }
    split
}
