use docnorm::{memory::InMemoryDriver, prelude::*};
use std::sync::Arc;

#[tokio::test]
async fn test_save_goes_through_the_shared_pool() {
    let driver = InMemoryDriver::new();

    let err = ConnectionPool::shared().unwrap_err();
    assert!(matches!(err, NormError::Connection { .. }));

    let pool = ConnectionPool::initialize("memory://localhost/shared", Arc::new(driver.clone())).unwrap();
    assert!(ConnectionPool::initialize("memory://localhost/other", Arc::new(driver.clone())).is_err());
    assert!(Arc::ptr_eq(&pool, &ConnectionPool::shared().unwrap()));

    let note = Schema::define("Note")
        .module("shared")
        .field("body", Field::text().required())
        .build()
        .unwrap();
    assert!(Registry::global().resolve("shared.Note").is_some());

    let mut doc = note.instance();
    doc.set("body", "hello").unwrap();
    let id = doc.save(SaveOptions::new()).await.unwrap();

    let loaded = note.load(&pool, Registry::global(), id).await.unwrap().unwrap();
    assert_eq!(loaded.get("body").unwrap(), Some("hello".into()));
    assert_eq!(driver.records("shared", "notes").await.len(), 1);
}
