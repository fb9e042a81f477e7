//! Shared fixtures for the integration tests: an on-disk throwaway store
//! plus helpers for seeding products, intents, and keys.

use keydesk::Store;
use keydesk::db::queries;
use keydesk::models::{
    CreateProduct, CreatePurchaseIntent, ImportReport, Product, PurchaseIntent,
};
use rusqlite::Connection;

/// Open a pooled store backed by a temp-dir database. Keep the returned
/// `TempDir` alive for the duration of the test.
pub fn open_test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("keydesk-test.db");
    let store = Store::open(path.to_str().expect("utf8 path")).expect("open store");
    (store, dir)
}

pub fn create_test_product(conn: &Connection, title: &str, price: &str, category: &str) -> Product {
    queries::create_product(
        conn,
        &CreateProduct {
            title: title.into(),
            price: price.parse().expect("decimal price"),
            category: category.into(),
            visible: true,
        },
    )
    .expect("create product")
}

pub fn create_test_intent(
    conn: &Connection,
    email: &str,
    product_id: &str,
    country: Option<&str>,
) -> PurchaseIntent {
    queries::create_purchase_intent(
        conn,
        &CreatePurchaseIntent {
            email: email.into(),
            phone: None,
            product_id: product_id.into(),
            country: country.map(String::from),
        },
    )
    .expect("create purchase intent")
}

pub fn import(conn: &Connection, product_id: &str, keys: &[&str]) -> ImportReport {
    let raw: Vec<String> = keys.iter().map(|s| s.to_string()).collect();
    queries::import_keys(conn, product_id, &raw).expect("import keys")
}
