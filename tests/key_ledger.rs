//! Key ledger integration tests: import, claim, return, delete, and the
//! concurrent-claim exclusivity guarantee.

use std::collections::HashSet;

use keydesk::AppError;
use keydesk::db::queries;

mod common;
use common::*;

// ============ Import ============

#[test]
fn import_reports_inserted_and_skipped() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");

    let first = import(&conn, &product.id, &["K1", "K2"]);
    assert_eq!(first.inserted, 2);
    assert_eq!(first.skipped, 0);

    // Overlapping import: only the new value lands.
    let second = import(&conn, &product.id, &["K1", "K3"]);
    assert_eq!(second.inserted, 1);
    assert_eq!(second.skipped, 1);

    let keys = queries::list_keys_for_product(&conn, &product.id).unwrap();
    let values: HashSet<&str> = keys.iter().map(|k| k.key.as_str()).collect();
    assert_eq!(values, HashSet::from(["K1", "K2", "K3"]));
}

#[test]
fn import_trims_and_drops_blank_values() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");

    let report = import(&conn, &product.id, &["  K1  ", "", "   "]);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped, 0);

    let key = queries::get_key_by_value(&conn, "K1").unwrap().unwrap();
    assert_eq!(key.key, "K1");
    assert!(!key.is_used);
}

#[test]
fn import_enforces_uniqueness_across_products() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let esp = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    let aim = create_test_product(&conn, "Aimbot Pro", "45.00", "aimbot");

    import(&conn, &esp.id, &["SHARED-1"]);
    let report = import(&conn, &aim.id, &["SHARED-1", "AIM-1"]);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped, 1);

    // The original owner keeps the value.
    let key = queries::get_key_by_value(&conn, "SHARED-1").unwrap().unwrap();
    assert_eq!(key.product_id, esp.id);
}

#[test]
fn import_into_unknown_product_fails() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();

    let err = queries::import_keys(&conn, "missing", &["K1".to_string()]).unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

// ============ Automatic claim ============

#[test]
fn claim_binds_key_to_purchaser() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    let intent = create_test_intent(&conn, "buyer@example.com", &product.id, Some("DE"));
    import(&conn, &product.id, &["K1"]);

    let value =
        queries::claim_available_key(&conn, &product.id, "buyer@example.com", Some(&intent.id))
            .unwrap();
    assert_eq!(value, "K1");

    let key = queries::get_key_by_value(&conn, "K1").unwrap().unwrap();
    assert!(key.is_used);
    assert_eq!(key.used_by_email.as_deref(), Some("buyer@example.com"));
    assert!(key.used_at.is_some());
    assert_eq!(key.purchase_intent_id.as_deref(), Some(intent.id.as_str()));
    assert!(key.state_consistent());
}

#[test]
fn claims_drain_stock_then_fail_distinguishably() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    import(&conn, &product.id, &["K1", "K2"]);

    let first = queries::claim_available_key(&conn, &product.id, "a@example.com", None).unwrap();
    let second = queries::claim_available_key(&conn, &product.id, "b@example.com", None).unwrap();
    assert_ne!(first, second);
    assert_eq!(queries::count_available_keys(&conn, &product.id).unwrap(), 0);

    let err = queries::claim_available_key(&conn, &product.id, "c@example.com", None).unwrap_err();
    match err {
        AppError::OutOfStock { product_id } => assert_eq!(product_id, product.id),
        other => panic!("expected OutOfStock, got {other:?}"),
    }
}

#[test]
fn out_of_stock_claim_mutates_nothing() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let empty = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    let stocked = create_test_product(&conn, "Aimbot Pro", "45.00", "aimbot");
    import(&conn, &stocked.id, &["A1"]);

    let before = queries::list_all_keys(&conn).unwrap();
    let err = queries::claim_available_key(&conn, &empty.id, "a@b.com", None).unwrap_err();
    assert!(matches!(err, AppError::OutOfStock { .. }));

    let after = queries::list_all_keys(&conn).unwrap();
    assert_eq!(before.len(), after.len());
    assert!(after.iter().all(|k| !k.is_used));
}

#[test]
fn claim_for_unknown_product_is_not_found() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();

    let err = queries::claim_available_key(&conn, "missing", "a@b.com", None).unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[test]
fn concurrent_claims_never_double_sell() {
    let (store, _dir) = open_test_store();
    let product = {
        let conn = store.conn().unwrap();
        let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
        import(
            &conn,
            &product.id,
            &["K1", "K2", "K3", "K4", "K5", "K6", "K7"],
        );
        product
    };

    // 7 keys in stock, 12 simultaneous buyers.
    let handles: Vec<_> = (0..12)
        .map(|i| {
            let store = store.clone();
            let product_id = product.id.clone();
            std::thread::spawn(move || {
                let conn = store.conn().unwrap();
                queries::claim_available_key(
                    &conn,
                    &product_id,
                    &format!("buyer{i}@example.com"),
                    None,
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let won: Vec<&String> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let out_of_stock = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::OutOfStock { .. })))
        .count();

    assert_eq!(won.len(), 7, "exactly the stocked count succeeds");
    assert_eq!(out_of_stock, 5, "every extra buyer sees OutOfStock");

    let distinct: HashSet<&String> = won.iter().copied().collect();
    assert_eq!(distinct.len(), 7, "no key was handed out twice");
}

// ============ Manual claim ============

#[test]
fn manual_claim_of_existing_unused_key() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    import(&conn, &product.id, &["PICKED-1"]);

    let key =
        queries::claim_manual_key(&conn, &product.id, "PICKED-1", "vip@example.com", None).unwrap();
    assert!(key.is_used);
    assert_eq!(key.used_by_email.as_deref(), Some("vip@example.com"));
    assert!(key.state_consistent());
}

#[test]
fn manual_claim_of_used_key_preserves_existing_binding() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    import(&conn, &product.id, &["PICKED-1"]);
    queries::claim_manual_key(&conn, &product.id, "PICKED-1", "first@example.com", None).unwrap();

    let err = queries::claim_manual_key(&conn, &product.id, "PICKED-1", "second@example.com", None)
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyUsed { .. }));

    let key = queries::get_key_by_value(&conn, "PICKED-1").unwrap().unwrap();
    assert_eq!(key.used_by_email.as_deref(), Some("first@example.com"));
}

#[test]
fn manual_claim_creates_missing_key_pre_claimed() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    let intent = create_test_intent(&conn, "a@b.com", &product.id, None);

    let key = queries::claim_manual_key(&conn, &product.id, "NEW-KEY-1", "a@b.com", Some(&intent.id))
        .unwrap();
    assert!(key.is_used);
    assert_eq!(key.used_by_email.as_deref(), Some("a@b.com"));

    let stored = queries::get_key_by_value(&conn, "NEW-KEY-1").unwrap().unwrap();
    assert!(stored.is_used);
    assert_eq!(stored.product_id, product.id);
    assert!(stored.state_consistent());
}

#[test]
fn manual_claim_rejects_key_of_another_product() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let esp = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    let aim = create_test_product(&conn, "Aimbot Pro", "45.00", "aimbot");
    import(&conn, &esp.id, &["ESP-1"]);

    let err = queries::claim_manual_key(&conn, &aim.id, "ESP-1", "a@b.com", None).unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let key = queries::get_key_by_value(&conn, "ESP-1").unwrap().unwrap();
    assert!(!key.is_used);
}

#[test]
fn manual_claim_rejects_blank_value() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");

    let err = queries::claim_manual_key(&conn, &product.id, "   ", "a@b.com", None).unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

// ============ Return ============

#[test]
fn return_round_trip_restores_availability() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    let intent = create_test_intent(&conn, "a@b.com", &product.id, None);
    import(&conn, &product.id, &["K1"]);

    queries::claim_available_key(&conn, &product.id, "a@b.com", Some(&intent.id)).unwrap();
    let claimed = queries::get_key_by_value(&conn, "K1").unwrap().unwrap();
    queries::return_key(&conn, &claimed.id).unwrap();

    let returned = queries::get_key_by_value(&conn, "K1").unwrap().unwrap();
    assert!(!returned.is_used);
    assert!(returned.used_by_email.is_none());
    assert!(returned.used_at.is_none());
    assert!(returned.purchase_intent_id.is_none());
    assert!(returned.state_consistent());

    // The key is claimable again.
    let value = queries::claim_available_key(&conn, &product.id, "c@d.com", None).unwrap();
    assert_eq!(value, "K1");
}

#[test]
fn bulk_return_counts_only_existing_rows() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    import(&conn, &product.id, &["K1", "K2"]);
    queries::claim_available_key(&conn, &product.id, "a@b.com", None).unwrap();
    queries::claim_available_key(&conn, &product.id, "c@d.com", None).unwrap();

    let ids: Vec<String> = queries::list_keys_for_product(&conn, &product.id)
        .unwrap()
        .into_iter()
        .map(|k| k.id)
        .chain(["ghost".to_string()])
        .collect();
    let affected = queries::return_keys(&conn, &ids).unwrap();
    assert_eq!(affected, 2);
    assert_eq!(queries::count_available_keys(&conn, &product.id).unwrap(), 2);
}

#[test]
fn return_of_unknown_key_is_not_found() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();

    let err = queries::return_key(&conn, "missing").unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

// ============ Delete ============

#[test]
fn delete_removes_rows_without_cascade() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    let intent = create_test_intent(&conn, "a@b.com", &product.id, None);
    import(&conn, &product.id, &["K1", "K2"]);
    queries::claim_available_key(&conn, &product.id, "a@b.com", Some(&intent.id)).unwrap();

    let ids: Vec<String> = queries::list_keys_for_product(&conn, &product.id)
        .unwrap()
        .into_iter()
        .map(|k| k.id)
        .collect();
    let deleted = queries::delete_keys(&conn, &ids).unwrap();
    assert_eq!(deleted, 2);
    assert!(queries::list_keys_for_product(&conn, &product.id).unwrap().is_empty());

    // Product and intent survive.
    assert!(queries::get_product_by_id(&conn, &product.id).unwrap().is_some());
    assert!(queries::get_purchase_intent_by_id(&conn, &intent.id).unwrap().is_some());
}

#[test]
fn delete_of_unknown_key_is_not_found() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();

    let err = queries::delete_key(&conn, "missing").unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

// ============ Generation and invariants ============

#[test]
fn generated_keys_use_prefix_format_and_start_available() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");

    let minted = queries::generate_keys(&conn, &product.id, "ESP", 5).unwrap();
    assert_eq!(minted.len(), 5);
    assert_eq!(queries::count_available_keys(&conn, &product.id).unwrap(), 5);

    for key in &minted {
        let parts: Vec<&str> = key.key.split('-').collect();
        assert_eq!(parts[0], "ESP");
        assert_eq!(parts.len(), 5);
        assert!(parts[1..].iter().all(|p| p.len() == 4));
        assert!(!key.is_used);
    }

    let distinct: HashSet<&str> = minted.iter().map(|k| k.key.as_str()).collect();
    assert_eq!(distinct.len(), 5);
}

#[test]
fn key_values_stay_unique_through_mixed_operations() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let esp = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    let aim = create_test_product(&conn, "Aimbot Pro", "45.00", "aimbot");

    import(&conn, &esp.id, &["K1", "K2", "K3"]);
    import(&conn, &aim.id, &["K2", "K4"]);
    queries::claim_available_key(&conn, &esp.id, "a@b.com", None).unwrap();
    queries::claim_manual_key(&conn, &aim.id, "MANUAL-1", "c@d.com", None).unwrap();
    let claimed = queries::get_key_by_value(&conn, "K1").unwrap().unwrap();
    queries::return_keys(&conn, &[claimed.id]).unwrap();

    let all = queries::list_all_keys(&conn).unwrap();
    let values: HashSet<&str> = all.iter().map(|k| k.key.as_str()).collect();
    assert_eq!(values.len(), all.len(), "key values are globally unique");
    assert!(all.iter().all(|k| k.state_consistent()));
}

// ============ Catalog and intents ============

#[test]
fn product_updates_are_partial() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");

    let changed = queries::update_product(
        &conn,
        &product.id,
        &keydesk::models::UpdateProduct {
            price: Some("35.00".parse().unwrap()),
            visible: Some(false),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(changed);

    let updated = queries::get_product_by_id(&conn, &product.id).unwrap().unwrap();
    assert_eq!(updated.title, "Rage ESP");
    assert_eq!(updated.price, "35.00".parse().unwrap());
    assert!(!updated.visible);
    assert!(queries::list_visible_products(&conn).unwrap().is_empty());
}

#[test]
fn key_listings_paginate_and_filter() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    import(&conn, &product.id, &["K1", "K2", "K3"]);

    let (page, total) = queries::list_keys_for_product_paginated(&conn, &product.id, 2, 0).unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);

    queries::claim_available_key(&conn, &product.id, "buyer@example.com", None).unwrap();
    let mine = queries::list_keys_for_email(&conn, "buyer@example.com").unwrap();
    assert_eq!(mine.len(), 1);
    assert!(mine[0].is_used);

    let claimed_at = mine[0].used_at.unwrap();
    let in_window = queries::list_keys_used_in(&conn, claimed_at, claimed_at + 1).unwrap();
    assert_eq!(in_window.len(), 1);
    assert!(queries::list_keys_used_in(&conn, claimed_at + 1, claimed_at + 2)
        .unwrap()
        .is_empty());
}

#[test]
fn purging_intents_leaves_keys_untouched() {
    let (store, _dir) = open_test_store();
    let conn = store.conn().unwrap();
    let product = create_test_product(&conn, "Rage ESP", "30.00", "esp");
    let intent = create_test_intent(&conn, "a@b.com", &product.id, None);
    import(&conn, &product.id, &["K1"]);
    queries::claim_available_key(&conn, &product.id, "a@b.com", Some(&intent.id)).unwrap();

    let now = chrono::Utc::now().timestamp();
    let purged = queries::purge_purchase_intents(&conn, now + 1).unwrap();
    assert_eq!(purged, 1);
    assert!(queries::get_purchase_intent_by_id(&conn, &intent.id).unwrap().is_none());

    // The key keeps its (now dangling) reference; the ledger never cascades.
    let key = queries::get_key_by_value(&conn, "K1").unwrap().unwrap();
    assert_eq!(key.purchase_intent_id.as_deref(), Some(intent.id.as_str()));
}
