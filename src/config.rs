use std::env;

use crate::analytics::NetPricePolicy;
use crate::error::{AppError, Result};
use crate::util::KeyLifetime;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Days a claimed key stays valid when it has no explicit expiration.
    pub key_lifetime_days: i64,
    /// Optional path to a JSON net-price table (see `NetPricePolicy`).
    pub pricing_table_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let key_lifetime_days: i64 = env::var("KEY_LIFETIME_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Self {
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "keydesk.db".to_string()),
            key_lifetime_days,
            pricing_table_path: env::var("PRICING_TABLE_PATH").ok(),
        }
    }

    pub fn key_lifetime(&self) -> KeyLifetime {
        KeyLifetime::new(self.key_lifetime_days)
    }

    /// Load the pricing policy from the configured table file, or fall back
    /// to the built-in default (no exact entries, 85% of list).
    pub fn pricing_policy(&self) -> Result<NetPricePolicy> {
        match &self.pricing_table_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    AppError::BadRequest(format!("cannot read pricing table {path}: {e}"))
                })?;
                Ok(serde_json::from_str(&raw)?)
            }
            None => Ok(NetPricePolicy::default()),
        }
    }
}
