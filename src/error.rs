//! Error types for the keydesk core.
//!
//! Business-logic failures (`OutOfStock`, `AlreadyUsed`, `NotFound`) are
//! deterministic outcomes of the current ledger state and must not be
//! retried by callers. Transient store failures are surfaced separately so
//! the embedding application can retry with backoff; see
//! [`AppError::is_transient`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// No available key exists for the requested product at claim time.
    /// Checkout must treat this as a fulfillment failure, never a success.
    #[error("no available key in stock for product {product_id}")]
    OutOfStock { product_id: String },

    /// A manual claim targeted a key value already bound to a purchase.
    /// The existing binding is left untouched.
    #[error("key '{key}' is already bound to a previous purchase")]
    AlreadyUsed { key: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// The underlying store was unreachable or the pool was exhausted.
    /// Safe to retry with backoff at the caller's discretion.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl AppError {
    /// Whether retrying the failed operation could plausibly succeed.
    ///
    /// `OutOfStock` and friends are excluded on purpose: retrying does not
    /// create new stock, and blind retries would mask a real inventory
    /// problem.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
