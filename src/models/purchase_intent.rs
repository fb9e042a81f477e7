use serde::{Deserialize, Serialize};

/// A record of a checkout attempt. Created by the checkout flow before
/// payment completes and never mutated afterwards; keys that were delivered
/// for it point back via `ProductKey::purchase_intent_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseIntent {
    pub id: String,
    pub email: String,
    pub phone: Option<String>,
    pub product_id: String,
    pub country: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseIntent {
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub product_id: String,
    #[serde(default)]
    pub country: Option<String>,
}
