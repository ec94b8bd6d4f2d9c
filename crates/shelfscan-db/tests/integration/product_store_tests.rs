use chrono::Utc;
use shelfscan_core::models::{
    ChangeKind, ExtractionResult, ProductFields, ProductOption, StockStatus, UpsertKind,
};
use shelfscan_core::query::{ProductQuery, SortKey, SortOrder};
use shelfscan_core::testutil::make_result;
use shelfscan_core::traits::ProductStore;

use crate::common::setup_test_db;

fn listing(locator: &str, name: &str, platform: &str, price: Option<f64>) -> ExtractionResult {
    ExtractionResult::new(
        locator,
        platform,
        ProductFields {
            name: name.into(),
            price,
            category: Some("Kitchen".into()),
            description: Some(format!("{name} for 50% off")),
            ..Default::default()
        },
        Utc::now(),
    )
}

#[tokio::test]
async fn first_collection_creates_record() {
    let (db, _container) = setup_test_db().await;
    let repo = db.product_repo();

    let result = ExtractionResult::new(
        "https://shop.example.com/products/mug?utm_source=mail",
        "shopify",
        ProductFields {
            name: "Speckled Mug".into(),
            price: Some(18.5),
            images: vec!["https://cdn.example.com/mug.jpg".into()],
            options: vec![ProductOption {
                name: "Color".into(),
                values: vec!["White".into(), "Black".into()],
            }],
            description: Some("Stoneware".into()),
            stock: StockStatus::InStock,
            category: Some("Kitchen > Mugs".into()),
        },
        Utc::now(),
    );

    let outcome = repo.upsert(&result).await.unwrap();
    assert_eq!(outcome.kind, UpsertKind::Created);
    assert!(outcome.change.is_none());

    let stored = repo.get(outcome.id).await.unwrap().expect("record exists");
    assert_eq!(stored.locator_key, "https://shop.example.com/products/mug");
    assert_eq!(stored.platform, "shopify");
    assert_eq!(stored.fields, result.fields);
    assert_eq!(stored.data_hash, result.fields.data_hash());

    let by_locator = repo
        .get_by_locator("https://shop.example.com/products/mug#reviews")
        .await
        .unwrap()
        .expect("normalized lookup finds it");
    assert_eq!(by_locator.id, outcome.id);
    assert_eq!(repo.count().await.unwrap(), 1);
}

#[tokio::test]
async fn recollection_updates_and_records_changes() {
    let (db, _container) = setup_test_db().await;
    let repo = db.product_repo();
    let locator = "https://shop.example.com/products/mug";

    let first = repo
        .upsert(&make_result(locator, Some(20.0), StockStatus::InStock))
        .await
        .unwrap();

    let same = repo
        .upsert(&make_result(locator, Some(20.0), StockStatus::InStock))
        .await
        .unwrap();
    assert_eq!(same.kind, UpsertKind::Updated);
    assert!(!same.changed);
    assert!(same.change.is_none());

    let cheaper = repo
        .upsert(&make_result(locator, Some(15.0), StockStatus::OutOfStock))
        .await
        .unwrap();
    assert_eq!(cheaper.id, first.id);
    assert!(cheaper.changed);

    let pricier = repo
        .upsert(&make_result(locator, Some(25.0), StockStatus::OutOfStock))
        .await
        .unwrap();
    assert!(pricier.change.is_some());

    let history = repo.history(first.id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].change_kinds.contains(&ChangeKind::PriceUp));
    assert_eq!(history[0].old_price, Some(15.0));
    assert!(history[1].change_kinds.contains(&ChangeKind::PriceDown));
    assert!(history[1].change_kinds.contains(&ChangeKind::StockChange));
    assert_eq!(history[1].old_stock, StockStatus::InStock);
    assert_eq!(history[1].new_stock, StockStatus::OutOfStock);

    assert_eq!(repo.history(first.id, 1).await.unwrap().len(), 1);
    assert_eq!(repo.count().await.unwrap(), 1);

    let stored = repo.get(first.id).await.unwrap().unwrap();
    assert_eq!(stored.fields.price, Some(25.0));
    assert!(stored.updated_at >= stored.collected_at);
}

#[tokio::test]
async fn missing_fields_keep_previous_values() {
    let (db, _container) = setup_test_db().await;
    let repo = db.product_repo();
    let locator = "https://shop.example.com/products/lamp";

    let first = repo
        .upsert(&listing(locator, "Desk Lamp", "shopify", Some(40.0)))
        .await
        .unwrap();
    repo.upsert(&ExtractionResult::new(
        locator,
        "shopify",
        ProductFields {
            name: "Desk Lamp".into(),
            ..Default::default()
        },
        Utc::now(),
    ))
    .await
    .unwrap();

    let stored = repo.get(first.id).await.unwrap().unwrap();
    assert_eq!(stored.fields.price, Some(40.0));
    assert_eq!(stored.fields.category.as_deref(), Some("Kitchen"));
}

#[tokio::test]
async fn concurrent_upserts_of_one_product_create_one_record() {
    let (db, _container) = setup_test_db().await;
    let repo = db.product_repo();

    let mut handles = Vec::new();
    for i in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            let locator = format!("https://shop.example.com/products/mug?utm_campaign=c{i}");
            repo.upsert(&make_result(&locator, Some(10.0 + i as f64), StockStatus::InStock))
                .await
        }));
    }

    let mut created = 0;
    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.kind == UpsertKind::Created {
            created += 1;
        }
        ids.insert(outcome.id);
    }

    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);
    assert_eq!(repo.count().await.unwrap(), 1);
}

#[tokio::test]
async fn query_filters_and_sorts() {
    let (db, _container) = setup_test_db().await;
    let repo = db.product_repo();

    repo.upsert(&listing("https://a.example/p/1", "Oak Board", "shopify", Some(30.0)))
        .await
        .unwrap();
    repo.upsert(&listing("https://b.example/p/2", "Birch Board", "cafe24", None))
        .await
        .unwrap();
    repo.upsert(&listing("https://c.example/p/3", "Ash Spoon", "shopify", Some(8.0)))
        .await
        .unwrap();

    let shopify = repo
        .query(&ProductQuery::new().with_platform("shopify"))
        .await
        .unwrap();
    assert_eq!(shopify.len(), 2);
    assert_eq!(shopify[0].fields.name, "Oak Board");

    let boards = repo
        .query(&ProductQuery::new().with_name_contains("BOARD"))
        .await
        .unwrap();
    assert_eq!(boards.len(), 2);

    let literal_percent = repo
        .query(&ProductQuery::new().with_description_contains("50%"))
        .await
        .unwrap();
    assert_eq!(literal_percent.len(), 3);
    let no_match = repo
        .query(&ProductQuery::new().with_description_contains("5_%"))
        .await
        .unwrap();
    assert!(no_match.is_empty());

    let priced = repo
        .query(&ProductQuery::new().with_price_range(Some(5.0), Some(20.0)))
        .await
        .unwrap();
    assert_eq!(priced.len(), 1);
    assert_eq!(priced[0].fields.name, "Ash Spoon");

    let by_price_desc = repo
        .query(&ProductQuery::new().sorted_by(SortKey::Price, SortOrder::Desc))
        .await
        .unwrap();
    let names: Vec<&str> = by_price_desc.iter().map(|r| r.fields.name.as_str()).collect();
    assert_eq!(names, vec!["Oak Board", "Ash Spoon", "Birch Board"]);

    let first_by_name = repo
        .query(
            &ProductQuery::new()
                .sorted_by(SortKey::Name, SortOrder::Asc)
                .with_limit(1),
        )
        .await
        .unwrap();
    assert_eq!(first_by_name.len(), 1);
    assert_eq!(first_by_name[0].fields.name, "Ash Spoon");

    let kitchen = repo
        .query(&ProductQuery::new().with_category("Kitchen"))
        .await
        .unwrap();
    assert_eq!(kitchen.len(), 3);
}

#[tokio::test]
async fn invalid_locator_is_rejected_without_writing() {
    let (db, _container) = setup_test_db().await;
    let repo = db.product_repo();

    let err = repo
        .upsert(&make_result("not a url", Some(1.0), StockStatus::Unknown))
        .await
        .unwrap_err();
    assert!(err.is_caller_error());
    assert_eq!(repo.count().await.unwrap(), 0);
}

#[tokio::test]
async fn health_check_succeeds() {
    let (db, _container) = setup_test_db().await;
    db.health_check().await.unwrap();
}
