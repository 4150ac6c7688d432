//! Transactions on pools shared by several drivers, and failing ends

use serde_json::json;

use super::mock::{cluster_config, database, database_pair, single_config, MockBackend};
use crate::error::DbError;

#[tokio::test]
async fn test_open_transaction_does_not_capture_other_drivers() {
    let backend = MockBackend::new();
    let journal = backend.journal();
    let (mut a, mut b) = database_pair(backend, single_config());

    assert!(a.start_trans().await.unwrap());
    b.table("user")
        .unwrap()
        .where_eq("id", 1)
        .unwrap()
        .update(&json!({"n": 1}))
        .await
        .unwrap();
    assert!(a.rollback().await.unwrap());

    let journal = journal.lock().unwrap();
    assert_eq!(journal.statements_by(0), vec!["BEGIN", "ROLLBACK"]);
    assert_eq!(journal.statements_by(1), vec!["UPDATE `user` SET `n`=1 WHERE `id` = 1;"]);

    let stats = a.pool_stats();
    assert_eq!(stats.checkouts, 1);
    assert_eq!(stats.slots, 1);
}

#[tokio::test]
async fn test_finished_transaction_returns_to_shared_connection() {
    let backend = MockBackend::new();
    let journal = backend.journal();
    let (mut a, mut b) = database_pair(backend, cluster_config("db0,db1", 1, true));

    b.table("user").unwrap().delete().await.unwrap();

    a.start_trans().await.unwrap();
    a.table("user").unwrap().select().await.unwrap();
    a.commit().await.unwrap();
    a.table("user").unwrap().delete().await.unwrap();

    a.start_trans().await.unwrap();
    a.commit().await.unwrap();

    let journal = journal.lock().unwrap();
    assert_eq!(journal.connects, vec!["db0", "db0", "db0"]);
    assert_eq!(
        journal.statements_by(0),
        vec!["DELETE FROM `user` WHERE 1;", "DELETE FROM `user` WHERE 1;"]
    );
    assert_eq!(journal.statements_by(1), vec!["BEGIN", "SELECT * FROM `user` WHERE 1;", "COMMIT"]);
    assert_eq!(journal.statements_by(2), vec!["BEGIN", "COMMIT"]);
    assert_eq!(a.pool_stats().checkouts, 2);
}

#[tokio::test]
async fn test_failed_commit_keeps_transaction_open() {
    let backend = MockBackend::new().rejecting_once("COMMIT");
    let journal = backend.journal();
    let mut db = database(backend, cluster_config("db0,db1", 1, true));

    db.start_trans().await.unwrap();
    match db.commit().await.unwrap_err() {
        DbError::Execution(err) => {
            assert_eq!(err.sql.as_deref(), Some("COMMIT"));
            assert!(err.config.is_some());
        }
        other => panic!("Expected execution error, got {:?}", other),
    }
    assert_eq!(db.transaction_depth(), 1);

    db.table("user").unwrap().select().await.unwrap();
    assert!(db.commit().await.unwrap());
    assert_eq!(db.transaction_depth(), 0);

    let journal = journal.lock().unwrap();
    assert_eq!(
        journal.statements_by(0),
        vec!["BEGIN", "COMMIT", "SELECT * FROM `user` WHERE 1;", "COMMIT"]
    );
    assert!(journal.statements_on("db1").is_empty());
}

#[tokio::test]
async fn test_failed_rollback_keeps_transaction_open() {
    let backend = MockBackend::new().rejecting("ROLLBACK");
    let journal = backend.journal();
    let mut db = database(backend, single_config());

    db.start_trans().await.unwrap();
    db.start_trans().await.unwrap();
    assert!(!db.rollback().await.unwrap());
    assert!(db.rollback().await.is_err());
    assert!(db.rollback().await.is_err());
    assert_eq!(db.transaction_depth(), 1);

    let journal = journal.lock().unwrap();
    assert_eq!(journal.count("ROLLBACK"), 2);
    assert_eq!(journal.connects.len(), 1);
}

#[tokio::test]
async fn test_failed_begin_releases_private_connection() {
    let backend = MockBackend::new().rejecting_once("BEGIN");
    let journal = backend.journal();
    let mut db = database(backend, single_config());

    match db.start_trans().await.unwrap_err() {
        DbError::Execution(err) => assert_eq!(err.sql.as_deref(), Some("BEGIN")),
        other => panic!("Expected execution error, got {:?}", other),
    }
    assert_eq!(db.transaction_depth(), 0);

    db.table("user").unwrap().select().await.unwrap();
    let journal = journal.lock().unwrap();
    assert_eq!(journal.statements_by(0), vec!["BEGIN"]);
    assert_eq!(journal.statements_by(1), vec!["SELECT * FROM `user` WHERE 1;"]);
}
