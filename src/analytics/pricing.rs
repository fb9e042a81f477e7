use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Product;

/// One marker-substring pricing rule: any product whose title contains
/// `marker` resolves to `price`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialPrice {
    pub marker: String,
    pub price: Decimal,
}

/// Net-price resolution policy for revenue figures.
///
/// Resolution order is a behavioral contract:
/// 1. exact product-title entry in the table,
/// 2. first marker substring contained in the title,
/// 3. `list price * fallback_ratio` (flat platform-fee deduction).
///
/// The table and markers are data — load them from a JSON file via
/// [`crate::Config::pricing_policy`] or build them with the `with_*`
/// methods — so net prices can change without touching code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetPricePolicy {
    pub exact: HashMap<String, Decimal>,
    pub special: Vec<SpecialPrice>,
    pub fallback_ratio: Decimal,
}

impl Default for NetPricePolicy {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            special: Vec::new(),
            fallback_ratio: Decimal::new(85, 2),
        }
    }
}

impl NetPricePolicy {
    pub fn with_exact(mut self, title: impl Into<String>, price: Decimal) -> Self {
        self.exact.insert(title.into(), price);
        self
    }

    pub fn with_special(mut self, marker: impl Into<String>, price: Decimal) -> Self {
        self.special.push(SpecialPrice {
            marker: marker.into(),
            price,
        });
        self
    }

    pub fn with_fallback_ratio(mut self, ratio: Decimal) -> Self {
        self.fallback_ratio = ratio;
        self
    }

    /// Resolve the revenue-bearing net price for a product.
    pub fn net_price(&self, product: &Product) -> Decimal {
        if let Some(price) = self.exact.get(&product.title) {
            return *price;
        }
        for rule in &self.special {
            if product.title.contains(&rule.marker) {
                return rule.price;
            }
        }
        product.price * self.fallback_ratio
    }
}
