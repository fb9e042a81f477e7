//! keydesk — the product-key inventory, redemption, and sales-analytics
//! core of a digital storefront.
//!
//! The crate owns two things:
//!
//! - the **key ledger** ([`db`]): products, purchase intents, and license
//!   keys in SQLite, with an atomic claim operation that guarantees a key
//!   can never be sold twice;
//! - the **analytics** layer ([`analytics`]): pure read-side projections
//!   (revenue, sales trend, subscribers, loyalty, migrations, countries)
//!   recomputed from ledger snapshots on every call.
//!
//! Checkout flows, admin UI, and notification glue live in the embedding
//! application; they hold a [`Store`] and call the query layer directly:
//!
//! ```no_run
//! use keydesk::{Store, db::queries};
//!
//! # fn main() -> keydesk::Result<()> {
//! let store = Store::open("keydesk.db")?;
//! let conn = store.conn()?;
//! let key = queries::claim_available_key(&conn, "product-id", "buyer@example.com", None)?;
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod util;

pub use config::Config;
pub use db::Store;
pub use error::{AppError, Result};

/// Install the default tracing subscriber (env-filtered, `info` fallback).
/// Embedding applications that configure their own subscriber skip this.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
