//! Row-mapping helpers: a `FromRow` trait, per-entity column lists, and
//! generic `query_one` / `query_all` wrappers so query code stays at the
//! SQL level instead of repeating row-unpacking boilerplate.

use rusqlite::{Connection, OptionalExtension, Params, Row};

use crate::error::Result;
use crate::models::{Product, ProductKey, PurchaseIntent};

pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

pub const PRODUCT_COLS: &str = "id, title, price, category, visible, created_at, updated_at";

impl FromRow for Product {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            title: row.get(1)?,
            price: row.get::<_, String>(2)?.parse().unwrap_or_default(),
            category: row.get(3)?,
            visible: row.get::<_, i32>(4)? != 0,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

pub const KEY_COLS: &str =
    "id, product_id, key, is_used, used_by_email, used_at, purchase_intent_id, expires_at, created_at";

impl FromRow for ProductKey {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ProductKey {
            id: row.get(0)?,
            product_id: row.get(1)?,
            key: row.get(2)?,
            is_used: row.get::<_, i32>(3)? != 0,
            used_by_email: row.get(4)?,
            used_at: row.get(5)?,
            purchase_intent_id: row.get(6)?,
            expires_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

pub const INTENT_COLS: &str = "id, email, phone, product_id, country, created_at";

impl FromRow for PurchaseIntent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(PurchaseIntent {
            id: row.get(0)?,
            email: row.get(1)?,
            phone: row.get(2)?,
            product_id: row.get(3)?,
            country: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

pub fn query_one<T: FromRow, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Option<T>> {
    conn.query_row(sql, params, |row| T::from_row(row))
        .optional()
        .map_err(Into::into)
}

pub fn query_all<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| T::from_row(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
