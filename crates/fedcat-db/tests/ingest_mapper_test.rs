//! Integration tests for the PostgreSQL ingest mapper.

use std::sync::Arc;

use fedcat_db::test_fixtures::TestDatabase;
use fedcat_db::{log_pool_metrics, CatalogRecordRef, IngestMapper, LocalId, TransactionId};

fn setup() {
    dotenvy::dotenv().ok();
}

fn local(id: &str) -> LocalId {
    LocalId::new(id)
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_record_and_lookup_in_order() {
    setup();
    let test_db = TestDatabase::new().await;
    let mapper = &test_db.db.ingest_mapper;
    let tx = TransactionId::new("tx-order");

    mapper.record(&tx, "products", &local("p1")).await.unwrap();
    mapper.record(&tx, "fulltext", &local("f1")).await.unwrap();

    let refs = mapper.lookup(&tx).await.unwrap();
    assert_eq!(
        refs,
        vec![
            CatalogRecordRef::new("products", local("p1")),
            CatalogRecordRef::new("fulltext", local("f1")),
        ]
    );

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_lookup_unknown_is_empty() {
    setup();
    let test_db = TestDatabase::new().await;
    let refs = test_db
        .db
        .ingest_mapper
        .lookup(&TransactionId::new("missing"))
        .await
        .unwrap();
    assert!(refs.is_empty());
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_record_is_idempotent() {
    setup();
    let test_db = TestDatabase::new().await;
    let mapper = &test_db.db.ingest_mapper;
    let tx = TransactionId::new("tx-dup");

    mapper.record(&tx, "products", &local("p1")).await.unwrap();
    mapper.record(&tx, "products", &local("p1")).await.unwrap();

    assert_eq!(mapper.lookup(&tx).await.unwrap().len(), 1);
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_concurrent_records_are_all_kept() {
    setup();
    let test_db = TestDatabase::new().await;
    let mapper = Arc::new(test_db.db.ingest_mapper.clone());
    let tx = TransactionId::new("tx-concurrent");

    let writes = (0..16).map(|i| {
        let mapper = mapper.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            mapper
                .record(&tx, &format!("catalog-{}", i % 4), &LocalId::new(i.to_string()))
                .await
        })
    });
    for result in futures::future::join_all(writes).await {
        result.unwrap().unwrap();
    }

    assert_eq!(mapper.lookup(&tx).await.unwrap().len(), 16);
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_reverse_lookup_and_remove() {
    setup();
    let test_db = TestDatabase::new().await;
    let mapper = &test_db.db.ingest_mapper;
    let tx = TransactionId::new("tx-reverse");

    mapper.record(&tx, "products", &local("p1")).await.unwrap();
    assert_eq!(
        mapper.transaction_for("products", &local("p1")).await.unwrap(),
        Some(tx.clone())
    );
    assert_eq!(
        mapper.transaction_for("fulltext", &local("p1")).await.unwrap(),
        None
    );
    assert!(mapper.contains(&tx).await.unwrap());

    mapper.remove(&tx).await.unwrap();
    assert!(!mapper.contains(&tx).await.unwrap());
    assert!(mapper
        .transaction_for("products", &local("p1"))
        .await
        .unwrap()
        .is_none());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_remove_ref_and_remove_catalog() {
    setup();
    let test_db = TestDatabase::new().await;
    let mapper = &test_db.db.ingest_mapper;
    let a = TransactionId::new("tx-a");
    let b = TransactionId::new("tx-b");

    mapper.record(&a, "products", &local("1")).await.unwrap();
    mapper.record(&a, "fulltext", &local("2")).await.unwrap();
    mapper.record(&b, "fulltext", &local("3")).await.unwrap();

    mapper
        .remove_ref(&a, &CatalogRecordRef::new("products", local("1")))
        .await
        .unwrap();
    assert_eq!(mapper.lookup(&a).await.unwrap().len(), 1);

    let removed = mapper.remove_catalog("fulltext").await.unwrap();
    assert_eq!(removed, 2);
    assert!(mapper.lookup(&a).await.unwrap().is_empty());
    assert!(mapper.lookup(&b).await.unwrap().is_empty());
    assert_eq!(test_db.db.ingest_mapper.transaction_count().await.unwrap(), 0);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_pool_metrics_after_mapper_use() {
    setup();
    let test_db = TestDatabase::new().await;
    let tx = TransactionId::new("tx-pool");
    test_db
        .db
        .ingest_mapper
        .record(&tx, "products", &local("r-1"))
        .await
        .unwrap();

    log_pool_metrics(test_db.db.pool());
    assert!(test_db.db.pool().size() > 0);
    assert!(!test_db.db.pool().is_closed());
    test_db.cleanup().await;
}
