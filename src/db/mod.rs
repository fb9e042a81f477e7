//! SQLite persistence for the key ledger.
//!
//! Callers hold a [`Store`] (a cloneable connection pool handle) and pass
//! connections into the query layer explicitly — there is no ambient or
//! global database state anywhere in the crate.

pub mod from_row;
pub mod queries;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::Result;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Handle to the key-ledger database. Cheap to clone; safe to share across
/// threads.
#[derive(Clone)]
pub struct Store {
    pool: DbPool,
}

impl Store {
    /// Open (creating if needed) the database at `path` and ensure the
    /// schema exists.
    pub fn open(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
        let pool = Pool::builder().max_size(8).build(manager)?;
        let store = Self { pool };
        init_db(&*store.conn()?)?;
        Ok(store)
    }

    /// Wrap an existing pool (tests and embedding applications that build
    /// their own pool configuration).
    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Check out a connection. Pool exhaustion or an unreachable database
    /// surfaces as the transient `StoreUnavailable` error class.
    pub fn conn(&self) -> Result<DbConnection> {
        self.pool.get().map_err(Into::into)
    }
}

/// Per-connection pragmas. WAL + a busy timeout make concurrent writers
/// queue on the write lock instead of failing with SQLITE_BUSY, which is
/// what the atomic claim path relies on under contention.
fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Create the schema. Idempotent.
///
/// The CHECK constraints encode the claim-state invariant at the schema
/// level: an available key carries no usage fields, a claimed key always
/// carries purchaser email and claim time.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS products (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            price       TEXT NOT NULL,
            category    TEXT NOT NULL,
            visible     INTEGER NOT NULL DEFAULT 1,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS purchase_intents (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL,
            phone       TEXT,
            product_id  TEXT NOT NULL REFERENCES products(id),
            country     TEXT,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS product_keys (
            id                  TEXT PRIMARY KEY,
            product_id          TEXT NOT NULL REFERENCES products(id),
            key                 TEXT NOT NULL UNIQUE,
            is_used             INTEGER NOT NULL DEFAULT 0,
            used_by_email       TEXT,
            used_at             INTEGER,
            purchase_intent_id  TEXT REFERENCES purchase_intents(id),
            expires_at          INTEGER,
            created_at          INTEGER NOT NULL,
            CHECK (is_used IN (0, 1)),
            CHECK (is_used = 1 OR (used_by_email IS NULL AND used_at IS NULL AND purchase_intent_id IS NULL)),
            CHECK (is_used = 0 OR (used_by_email IS NOT NULL AND used_at IS NOT NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_product_keys_available ON product_keys (product_id, is_used);
        CREATE INDEX IF NOT EXISTS idx_product_keys_email ON product_keys (used_by_email);
        CREATE INDEX IF NOT EXISTS idx_product_keys_used_at ON product_keys (used_at);",
    )?;
    Ok(())
}
