use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{Product, ProductKey, PurchaseIntent};
use crate::util::SECONDS_PER_DAY;

use super::{NetPricePolicy, Window, product_index};

/// Net revenue over the window: the sum of resolved net prices for every
/// key whose claim time falls inside `[start, end)`.
pub fn revenue_for_period(
    keys: &[ProductKey],
    products: &[Product],
    policy: &NetPricePolicy,
    window: Window,
) -> Decimal {
    let products = product_index(products);
    keys.iter()
        .filter(|k| k.used_at.is_some_and(|t| window.contains(t)))
        .filter_map(|k| products.get(k.product_id.as_str()))
        .map(|p| policy.net_price(p))
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendGranularity {
    Hourly,
    Daily,
}

impl TrendGranularity {
    /// Hourly buckets for windows up to a day, calendar-day buckets beyond.
    pub fn for_window(window: Window) -> Self {
        if window.len_seconds() <= SECONDS_PER_DAY {
            Self::Hourly
        } else {
            Self::Daily
        }
    }

    fn bucket_seconds(self) -> i64 {
        match self {
            Self::Hourly => 3600,
            Self::Daily => SECONDS_PER_DAY,
        }
    }

    fn floor(self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.bucket_seconds())
    }

    fn label(self, bucket_start: i64) -> String {
        let dt = DateTime::<Utc>::from_timestamp(bucket_start, 0).unwrap_or_default();
        match self {
            Self::Hourly => dt.format("%Y-%m-%d %H:00").to_string(),
            Self::Daily => dt.format("%Y-%m-%d").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendBucket {
    pub label: String,
    /// Bucket start, unix seconds (UTC-aligned).
    pub start: i64,
    pub count: usize,
    pub revenue: Decimal,
}

/// Sales counts and net revenue bucketed over the window. Buckets cover the
/// whole window, empty ones included, so the sequence is finite and
/// deterministic for a given snapshot.
pub fn sales_trend(
    keys: &[ProductKey],
    products: &[Product],
    policy: &NetPricePolicy,
    window: Window,
) -> Vec<TrendBucket> {
    if window.len_seconds() == 0 {
        return Vec::new();
    }

    let granularity = TrendGranularity::for_window(window);
    let step = granularity.bucket_seconds();
    let first = granularity.floor(window.start);

    let mut buckets = Vec::new();
    let mut start = first;
    while start < window.end {
        buckets.push(TrendBucket {
            label: granularity.label(start),
            start,
            count: 0,
            revenue: Decimal::ZERO,
        });
        start += step;
    }

    let products = product_index(products);
    for key in keys {
        let Some(used_at) = key.used_at else { continue };
        if !window.contains(used_at) {
            continue;
        }
        let idx = ((granularity.floor(used_at) - first) / step) as usize;
        if let Some(bucket) = buckets.get_mut(idx) {
            bucket.count += 1;
            if let Some(product) = products.get(key.product_id.as_str()) {
                bucket.revenue += policy.net_price(product);
            }
        }
    }

    buckets
}

#[derive(Debug, Clone, Serialize)]
pub struct CountrySales {
    pub country: String,
    pub count: usize,
    pub revenue: Decimal,
}

/// Top purchase countries for the window, by net revenue descending.
///
/// Each period key is joined to its purchase intent for the country; keys
/// claimed without a purchase intent carry no geography and are skipped.
pub fn top_countries(
    keys: &[ProductKey],
    intents: &[PurchaseIntent],
    products: &[Product],
    policy: &NetPricePolicy,
    window: Window,
    limit: usize,
) -> Vec<CountrySales> {
    let products = product_index(products);
    let intents: HashMap<&str, &PurchaseIntent> =
        intents.iter().map(|i| (i.id.as_str(), i)).collect();

    let mut by_country: HashMap<String, (usize, Decimal)> = HashMap::new();
    for key in keys {
        if !key.used_at.is_some_and(|t| window.contains(t)) {
            continue;
        }
        let Some(intent) = key
            .purchase_intent_id
            .as_deref()
            .and_then(|id| intents.get(id))
        else {
            continue;
        };
        let country = intent.country.clone().unwrap_or_else(|| "unknown".into());
        let entry = by_country.entry(country).or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        if let Some(product) = products.get(key.product_id.as_str()) {
            entry.1 += policy.net_price(product);
        }
    }

    let mut ranked: Vec<CountrySales> = by_country
        .into_iter()
        .map(|(country, (count, revenue))| CountrySales {
            country,
            count,
            revenue,
        })
        .collect();
    // Ties broken by name so the ranking is stable across calls.
    ranked.sort_by(|a, b| b.revenue.cmp(&a.revenue).then(a.country.cmp(&b.country)));
    ranked.truncate(limit);
    ranked
}
