use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    /// List price in currency units. Analytics derive a net price from this
    /// via the configured pricing policy.
    pub price: Decimal,
    pub category: String,
    /// Hidden products stay in the catalog (existing keys keep referencing
    /// them) but are excluded from the public listing.
    pub visible: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub title: String,
    pub price: Decimal,
    pub category: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProduct {
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<String>,
    pub visible: Option<bool>,
}
