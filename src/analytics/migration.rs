use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{Product, ProductKey};
use crate::util::SECONDS_PER_DAY;

use super::product_index;

/// A detected product-to-product switch for one purchaser, inferred purely
/// from the chronological order of their claimed keys — no switch event is
/// ever stored.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationEvent {
    pub email: String,
    pub from_product_id: String,
    pub to_product_id: String,
    /// Claim time of the later key.
    pub switched_at: i64,
    /// Whole days between the two claims.
    pub days_between: i64,
    /// True when the destination product's list price is strictly higher.
    pub upgrade: bool,
    /// True when the two products sit in different categories.
    pub cross_category: bool,
}

/// Reconstruct per-purchaser product-switching timelines.
///
/// For each email, claimed keys are sorted by claim time (key id as the
/// tie-break) and every adjacent pair with differing products yields one
/// event. Output is ordered by email, then chronologically.
pub fn migration_events(keys: &[ProductKey], products: &[Product]) -> Vec<MigrationEvent> {
    let products = product_index(products);

    let mut by_email: BTreeMap<&str, Vec<&ProductKey>> = BTreeMap::new();
    for key in keys {
        if key.used_at.is_some() {
            if let Some(email) = key.used_by_email.as_deref() {
                by_email.entry(email).or_default().push(key);
            }
        }
    }

    let mut events = Vec::new();
    for (email, mut claims) in by_email {
        claims.sort_by(|a, b| a.used_at.cmp(&b.used_at).then(a.id.cmp(&b.id)));
        for pair in claims.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            if from.product_id == to.product_id {
                continue;
            }
            let (Some(from_at), Some(to_at)) = (from.used_at, to.used_at) else {
                continue;
            };

            let from_product = products.get(from.product_id.as_str());
            let to_product = products.get(to.product_id.as_str());
            let upgrade = match (from_product, to_product) {
                (Some(f), Some(t)) => t.price > f.price,
                _ => false,
            };
            let cross_category = match (from_product, to_product) {
                (Some(f), Some(t)) => f.category != t.category,
                _ => false,
            };

            events.push(MigrationEvent {
                email: email.to_string(),
                from_product_id: from.product_id.clone(),
                to_product_id: to.product_id.clone(),
                switched_at: to_at,
                days_between: (to_at - from_at) / SECONDS_PER_DAY,
                upgrade,
                cross_category,
            });
        }
    }
    events
}
