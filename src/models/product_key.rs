use serde::{Deserialize, Serialize};

/// A single license credential in the key ledger.
///
/// A key is either *available* (`is_used = false`, all three usage fields
/// null) or *claimed* (`is_used = true`, `used_by_email` and `used_at` set).
/// The claim operations move a key between those states atomically; no
/// partial combination is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductKey {
    pub id: String,
    pub product_id: String,
    /// The key value itself. Globally unique across all products.
    pub key: String,
    pub is_used: bool,
    pub used_by_email: Option<String>,
    pub used_at: Option<i64>,
    /// The purchase event that consumed this key, if any.
    pub purchase_intent_id: Option<String>,
    /// Explicit expiration. When absent, consumers assume a default
    /// lifetime from `used_at` (see [`crate::util::KeyLifetime`]).
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

impl ProductKey {
    /// True iff the usage fields are consistent with `is_used`.
    pub fn state_consistent(&self) -> bool {
        if self.is_used {
            self.used_by_email.is_some() && self.used_at.is_some()
        } else {
            self.used_by_email.is_none()
                && self.used_at.is_none()
                && self.purchase_intent_id.is_none()
        }
    }
}

/// Outcome of a bulk key import: how many rows were actually inserted and
/// how many were skipped as duplicates of existing key values.
///
/// The admin surface reports this as "N added, M duplicates skipped".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped: usize,
}
