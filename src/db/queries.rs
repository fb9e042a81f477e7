//! Query layer for the key ledger.
//!
//! Every function takes an explicit `&Connection` and returns `Result`;
//! nothing in here holds state. The one operation with a genuine
//! concurrency hazard is [`claim_available_key`], which performs its
//! select-and-mark as a single atomic UPDATE so two simultaneous buyers can
//! never be handed the same key.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, types::Value};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{INTENT_COLS, KEY_COLS, PRODUCT_COLS, query_all, query_one};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============ Products ============

pub fn create_product(conn: &Connection, input: &CreateProduct) -> Result<Product> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO products (id, title, price, category, visible, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            &input.title,
            input.price.to_string(),
            &input.category,
            input.visible as i32,
            now,
            now
        ],
    )?;

    Ok(Product {
        id,
        title: input.title.clone(),
        price: input.price,
        category: input.category.clone(),
        visible: input.visible,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn list_products(conn: &Connection) -> Result<Vec<Product>> {
    query_all(
        conn,
        &format!("SELECT {} FROM products ORDER BY created_at DESC", PRODUCT_COLS),
        [],
    )
}

/// Products shown on the public storefront.
pub fn list_visible_products(conn: &Connection) -> Result<Vec<Product>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM products WHERE visible = 1 ORDER BY created_at DESC",
            PRODUCT_COLS
        ),
        [],
    )
}

pub fn list_products_paginated(
    conn: &Connection,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Product>, i64)> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM products ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            PRODUCT_COLS
        ),
        params![limit, offset],
    )?;
    Ok((items, total))
}

pub fn update_product(conn: &Connection, id: &str, input: &UpdateProduct) -> Result<bool> {
    UpdateBuilder::new("products", id)
        .with_updated_at()
        .set_opt("title", input.title.clone())
        .set_opt("price", input.price.map(|p| p.to_string()))
        .set_opt("category", input.category.clone())
        .set_opt("visible", input.visible.map(|v| v as i32))
        .execute(conn)
}

pub fn delete_product(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM products WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

// ============ Purchase intents ============

pub fn create_purchase_intent(
    conn: &Connection,
    input: &CreatePurchaseIntent,
) -> Result<PurchaseIntent> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO purchase_intents (id, email, phone, product_id, country, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.email,
            &input.phone,
            &input.product_id,
            &input.country,
            now
        ],
    )?;

    Ok(PurchaseIntent {
        id,
        email: input.email.clone(),
        phone: input.phone.clone(),
        product_id: input.product_id.clone(),
        country: input.country.clone(),
        created_at: now,
    })
}

pub fn get_purchase_intent_by_id(conn: &Connection, id: &str) -> Result<Option<PurchaseIntent>> {
    query_one(
        conn,
        &format!("SELECT {} FROM purchase_intents WHERE id = ?1", INTENT_COLS),
        &[&id],
    )
}

pub fn list_purchase_intents(conn: &Connection) -> Result<Vec<PurchaseIntent>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM purchase_intents ORDER BY created_at DESC",
            INTENT_COLS
        ),
        [],
    )
}

pub fn list_purchase_intents_paginated(
    conn: &Connection,
    limit: i64,
    offset: i64,
) -> Result<(Vec<PurchaseIntent>, i64)> {
    let total: i64 =
        conn.query_row("SELECT COUNT(*) FROM purchase_intents", [], |row| row.get(0))?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM purchase_intents ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            INTENT_COLS
        ),
        params![limit, offset],
    )?;
    Ok((items, total))
}

/// Bulk cleanup of old checkout records. Keys that reference a purged
/// intent keep their (now dangling) reference; the ledger never cascades.
pub fn purge_purchase_intents(conn: &Connection, before: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM purchase_intents WHERE created_at < ?1",
        params![before],
    )?;
    if deleted > 0 {
        tracing::info!("Purged {} purchase intent(s) older than {}", deleted, before);
    }
    Ok(deleted)
}

// ============ Key ledger: lookups ============

pub fn get_key_by_id(conn: &Connection, id: &str) -> Result<Option<ProductKey>> {
    query_one(
        conn,
        &format!("SELECT {} FROM product_keys WHERE id = ?1", KEY_COLS),
        &[&id],
    )
}

pub fn get_key_by_value(conn: &Connection, key: &str) -> Result<Option<ProductKey>> {
    query_one(
        conn,
        &format!("SELECT {} FROM product_keys WHERE key = ?1", KEY_COLS),
        &[&key],
    )
}

pub fn list_keys_for_product(conn: &Connection, product_id: &str) -> Result<Vec<ProductKey>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM product_keys WHERE product_id = ?1 ORDER BY created_at, id",
            KEY_COLS
        ),
        &[&product_id],
    )
}

pub fn list_keys_for_product_paginated(
    conn: &Connection,
    product_id: &str,
    limit: i64,
    offset: i64,
) -> Result<(Vec<ProductKey>, i64)> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM product_keys WHERE product_id = ?1",
        params![product_id],
        |row| row.get(0),
    )?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM product_keys WHERE product_id = ?1 ORDER BY created_at, id LIMIT ?2 OFFSET ?3",
            KEY_COLS
        ),
        params![product_id, limit, offset],
    )?;
    Ok((items, total))
}

/// All keys ever claimed by one purchaser, oldest claim first.
pub fn list_keys_for_email(conn: &Connection, email: &str) -> Result<Vec<ProductKey>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM product_keys WHERE used_by_email = ?1 ORDER BY used_at, id",
            KEY_COLS
        ),
        &[&email],
    )
}

/// Full ledger snapshot for the analytics layer.
pub fn list_all_keys(conn: &Connection) -> Result<Vec<ProductKey>> {
    query_all(
        conn,
        &format!("SELECT {} FROM product_keys ORDER BY created_at, id", KEY_COLS),
        [],
    )
}

/// Keys claimed inside the half-open window `[start, end)`.
pub fn list_keys_used_in(conn: &Connection, start: i64, end: i64) -> Result<Vec<ProductKey>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM product_keys WHERE used_at >= ?1 AND used_at < ?2 ORDER BY used_at, id",
            KEY_COLS
        ),
        params![start, end],
    )
}

/// Current stock level for a product.
pub fn count_available_keys(conn: &Connection, product_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM product_keys WHERE product_id = ?1 AND is_used = 0",
        params![product_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

// ============ Key ledger: import and generation ============

/// Bulk-import raw key strings for a product.
///
/// Values are trimmed and blanks dropped. A value that already exists
/// anywhere in the ledger (any product) is silently skipped rather than
/// errored; the report carries both counts so the admin surface can show
/// "N added, M duplicates skipped".
pub fn import_keys(conn: &Connection, product_id: &str, raw_keys: &[String]) -> Result<ImportReport> {
    get_product_by_id(conn, product_id)?
        .ok_or_else(|| AppError::NotFound(format!("product {} not found", product_id)))?;

    let now = now();
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0usize;
    let mut candidates = 0usize;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO product_keys
                 (id, product_id, key, is_used, used_by_email, used_at, purchase_intent_id, expires_at, created_at)
             VALUES (?1, ?2, ?3, 0, NULL, NULL, NULL, NULL, ?4)",
        )?;
        for raw in raw_keys {
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }
            candidates += 1;
            inserted += stmt.execute(params![gen_id(), product_id, value, now])?;
        }
    }
    tx.commit()?;

    let report = ImportReport {
        inserted,
        skipped: candidates - inserted,
    };
    tracing::info!(
        "Imported {} key(s) for product {} ({} duplicate(s) skipped)",
        report.inserted,
        product_id,
        report.skipped
    );
    Ok(report)
}

/// Generate a key value in the familiar format: PREFIX-XXXX-XXXX-XXXX-XXXX.
/// The alphabet omits easily-confused glyphs (0/O, 1/I).
pub fn generate_key(prefix: &str) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let chars: Vec<char> = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789".chars().collect();

    let mut part = || -> String {
        (0..4)
            .map(|_| chars[rng.gen_range(0..chars.len())])
            .collect()
    };

    format!("{}-{}-{}-{}-{}", prefix, part(), part(), part(), part())
}

/// Mint `count` fresh random keys for a product, all in the available
/// state. A generated value colliding with an existing one is re-rolled.
pub fn generate_keys(
    conn: &Connection,
    product_id: &str,
    prefix: &str,
    count: usize,
) -> Result<Vec<ProductKey>> {
    get_product_by_id(conn, product_id)?
        .ok_or_else(|| AppError::NotFound(format!("product {} not found", product_id)))?;

    let now = now();
    let tx = conn.unchecked_transaction()?;
    let mut created = Vec::with_capacity(count);
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO product_keys
                 (id, product_id, key, is_used, used_by_email, used_at, purchase_intent_id, expires_at, created_at)
             VALUES (?1, ?2, ?3, 0, NULL, NULL, NULL, NULL, ?4)",
        )?;
        for _ in 0..count {
            loop {
                let id = gen_id();
                let key = generate_key(prefix);
                if stmt.execute(params![&id, product_id, &key, now])? == 1 {
                    created.push(ProductKey {
                        id,
                        product_id: product_id.to_string(),
                        key,
                        is_used: false,
                        used_by_email: None,
                        used_at: None,
                        purchase_intent_id: None,
                        expires_at: None,
                        created_at: now,
                    });
                    break;
                }
            }
        }
    }
    tx.commit()?;

    tracing::info!("Generated {} key(s) for product {}", created.len(), product_id);
    Ok(created)
}

// ============ Key ledger: claims ============

/// Atomically claim one available key for a product and bind it to a
/// purchaser, returning the key value.
///
/// The select-and-mark happens in a single UPDATE with an `is_used = 0`
/// guard, so the database serializes competing claims: with K available
/// keys and N concurrent callers, exactly min(K, N) succeed with distinct
/// values and the rest get `OutOfStock`. Never select-then-update from two
/// statements here.
pub fn claim_available_key(
    conn: &Connection,
    product_id: &str,
    email: &str,
    purchase_intent_id: Option<&str>,
) -> Result<String> {
    let now = now();
    let claimed: Option<String> = conn
        .query_row(
            "UPDATE product_keys
                SET is_used = 1, used_by_email = ?2, used_at = ?3, purchase_intent_id = ?4
              WHERE id = (SELECT id FROM product_keys
                           WHERE product_id = ?1 AND is_used = 0
                           ORDER BY created_at, id
                           LIMIT 1)
                AND is_used = 0
              RETURNING key",
            params![product_id, email, now, purchase_intent_id],
            |row| row.get(0),
        )
        .optional()?;

    match claimed {
        Some(key) => {
            tracing::info!("Claimed key for product {} by {}", product_id, email);
            Ok(key)
        }
        None => {
            let product_exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM products WHERE id = ?1)",
                params![product_id],
                |row| row.get(0),
            )?;
            if product_exists {
                tracing::warn!("Out of stock: product {} has no available keys", product_id);
                Err(AppError::OutOfStock {
                    product_id: product_id.to_string(),
                })
            } else {
                Err(AppError::NotFound(format!("product {} not found", product_id)))
            }
        }
    }
}

/// Bind a specific, operator-supplied key value to a purchase.
///
/// An existing unused key is claimed in place; an existing used key fails
/// with `AlreadyUsed`; an absent value is created pre-claimed (ad-hoc
/// issuance outside the bulk-import flow).
pub fn claim_manual_key(
    conn: &Connection,
    product_id: &str,
    key_value: &str,
    email: &str,
    purchase_intent_id: Option<&str>,
) -> Result<ProductKey> {
    let key_value = key_value.trim();
    if key_value.is_empty() {
        return Err(AppError::BadRequest("key value must not be empty".into()));
    }

    let now = now();
    let tx = conn.unchecked_transaction()?;

    let existing: Option<ProductKey> = query_one(
        &tx,
        &format!("SELECT {} FROM product_keys WHERE key = ?1", KEY_COLS),
        &[&key_value],
    )?;

    let claimed = match existing {
        Some(key) if key.is_used => {
            return Err(AppError::AlreadyUsed { key: key.key });
        }
        Some(key) => {
            if key.product_id != product_id {
                return Err(AppError::BadRequest(format!(
                    "key '{}' belongs to product {}, not {}",
                    key.key, key.product_id, product_id
                )));
            }
            let affected = tx.execute(
                "UPDATE product_keys
                    SET is_used = 1, used_by_email = ?1, used_at = ?2, purchase_intent_id = ?3
                  WHERE id = ?4 AND is_used = 0",
                params![email, now, purchase_intent_id, &key.id],
            )?;
            if affected == 0 {
                return Err(AppError::AlreadyUsed { key: key.key });
            }
            ProductKey {
                is_used: true,
                used_by_email: Some(email.to_string()),
                used_at: Some(now),
                purchase_intent_id: purchase_intent_id.map(String::from),
                ..key
            }
        }
        None => {
            get_product_by_id(&tx, product_id)?
                .ok_or_else(|| AppError::NotFound(format!("product {} not found", product_id)))?;
            let id = gen_id();
            tx.execute(
                "INSERT INTO product_keys
                     (id, product_id, key, is_used, used_by_email, used_at, purchase_intent_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, NULL, ?7)",
                params![&id, product_id, key_value, email, now, purchase_intent_id, now],
            )?;
            ProductKey {
                id,
                product_id: product_id.to_string(),
                key: key_value.to_string(),
                is_used: true,
                used_by_email: Some(email.to_string()),
                used_at: Some(now),
                purchase_intent_id: purchase_intent_id.map(String::from),
                expires_at: None,
                created_at: now,
            }
        }
    };
    tx.commit()?;

    tracing::info!(
        "Manually claimed key '{}' for product {} by {}",
        claimed.key,
        product_id,
        email
    );
    Ok(claimed)
}

// ============ Key ledger: return and delete ============

/// Move claimed keys back to the available state, clearing all three usage
/// fields together with the flag in one statement (no partial clears).
/// Returns the number of rows actually reset.
pub fn return_keys(conn: &Connection, key_ids: &[String]) -> Result<usize> {
    if key_ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE product_keys
            SET is_used = 0, used_by_email = NULL, used_at = NULL, purchase_intent_id = NULL
          WHERE id IN ({})",
        placeholders(key_ids.len())
    );
    let params: Vec<&dyn rusqlite::ToSql> =
        key_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
    let affected = conn.execute(&sql, params.as_slice())?;
    tracing::info!("Returned {} key(s) to available stock", affected);
    Ok(affected)
}

pub fn return_key(conn: &Connection, key_id: &str) -> Result<()> {
    let affected = return_keys(conn, &[key_id.to_string()])?;
    if affected == 0 {
        return Err(AppError::NotFound(format!("key {} not found", key_id)));
    }
    Ok(())
}

/// Hard-delete key rows. No cascading side effects on products or purchase
/// intents. Deleting a claimed key is allowed; the admin surface is the
/// place for confirmation prompts, not the ledger.
pub fn delete_keys(conn: &Connection, key_ids: &[String]) -> Result<usize> {
    if key_ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "DELETE FROM product_keys WHERE id IN ({})",
        placeholders(key_ids.len())
    );
    let params: Vec<&dyn rusqlite::ToSql> =
        key_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
    let deleted = conn.execute(&sql, params.as_slice())?;
    tracing::info!("Deleted {} key(s)", deleted);
    Ok(deleted)
}

pub fn delete_key(conn: &Connection, key_id: &str) -> Result<()> {
    let deleted = delete_keys(conn, &[key_id.to_string()])?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("key {} not found", key_id)));
    }
    Ok(())
}
