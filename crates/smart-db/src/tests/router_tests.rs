//! Routing, pooling and fallback tests

use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::mock::{cluster_config, database, single_config, MockBackend};
use crate::config::ConnectionConfig;
use crate::connection::{ConnectionPool, ConnectionRouter, LinkScope};
use crate::error::DbError;

fn router(config: ConnectionConfig) -> ConnectionRouter<MockBackend> {
    let pool = Arc::new(ConnectionPool::new(MockBackend::new()));
    ConnectionRouter::new(pool, Arc::new(config)).with_rng(StdRng::seed_from_u64(7))
}

#[test]
fn test_replica_reads_never_pick_a_master() {
    let mut router = router(cluster_config("m0,r1,r2,r3", 1, true));
    let mut seen = HashSet::new();

    for _ in 0..1000 {
        let selection = router.select_nodes(false);
        assert_eq!(selection.master, 0);
        assert_ne!(selection.target, 0);
        assert_eq!(selection.fallback(), Some(0));
        seen.insert(selection.target);
    }
    assert_eq!(seen, HashSet::from([1, 2, 3]));
}

#[test]
fn test_writes_stay_on_masters() {
    let mut router = router(cluster_config("m0,m1,r2,r3", 2, true));
    let mut masters = HashSet::new();

    for _ in 0..1000 {
        let selection = router.select_nodes(true);
        assert!(selection.target < 2);
        assert_eq!(selection.fallback(), None);
        masters.insert(selection.target);
    }
    assert_eq!(masters.len(), 2);
}

#[test]
fn test_fixed_replica_and_missing_replicas() {
    let config = ConnectionConfig {
        slave_no: Some(2),
        ..cluster_config("m0,r1,r2", 1, true)
    };
    let mut pinned = router(config);
    assert!((0..100).all(|_| pinned.select_nodes(false).target == 2));

    let mut masters_only = router(cluster_config("m0,m1", 2, true));
    for _ in 0..100 {
        let selection = masters_only.select_nodes(false);
        assert_eq!(selection.target, selection.master);
    }
}

#[test]
fn test_reads_span_all_nodes_without_separation() {
    let mut router = router(cluster_config("n0,n1,n2", 1, false));
    let seen: HashSet<usize> = (0..1000).map(|_| router.select_nodes(false).target).collect();
    assert_eq!(seen, HashSet::from([0, 1, 2]));
}

#[tokio::test]
async fn test_single_mode_reuses_slot_zero() {
    let backend = MockBackend::new();
    let journal = backend.journal();
    let mut db = database(backend, single_config());

    let first = db.init_connect(false).await.unwrap();
    let second = db.init_connect(true).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(journal.lock().unwrap().connects, vec!["db0".to_string()]);
    assert_eq!(db.pool_stats().slots, 1);
}

#[tokio::test]
async fn test_transaction_pins_reads_to_private_master_link() {
    let mut db = database(MockBackend::new(), cluster_config("db0,db1,db2", 1, true));

    let read = db.init_connect(false).await.unwrap();
    let write = db.init_connect(true).await.unwrap();
    assert!(!Arc::ptr_eq(&read, &write));

    db.start_trans().await.unwrap();
    let pinned = db.init_connect(false).await.unwrap();
    assert!(!Arc::ptr_eq(&pinned, &write));
    assert!(Arc::ptr_eq(&pinned, &db.init_connect(true).await.unwrap()));
    assert_eq!(pinned.lock().await.host, "db0");

    db.commit().await.unwrap();
    let released = db.init_connect(false).await.unwrap();
    assert!(Arc::ptr_eq(&released, &read));
    assert!(Arc::ptr_eq(&db.init_connect(true).await.unwrap(), &write));
}

#[tokio::test]
async fn test_dedicated_links_bypass_shared_slots() {
    let mut router = router(cluster_config("db0,db1", 1, true));

    let shared_read = router.init_connect(false).await.unwrap();
    let private_read = router.dedicate(LinkScope::Read).await.unwrap();
    assert!(!Arc::ptr_eq(&shared_read, &private_read));
    assert_eq!(private_read.lock().await.host, "db1");
    assert!(Arc::ptr_eq(&router.dedicate(LinkScope::Read).await.unwrap(), &private_read));

    let both = router.dedicate(LinkScope::Both).await.unwrap();
    assert_eq!(both.lock().await.host, "db0");
    assert!(Arc::ptr_eq(&router.init_connect(false).await.unwrap(), &both));
    assert!(Arc::ptr_eq(&router.init_connect(true).await.unwrap(), &both));
    assert_eq!(router.pool().stats().checkouts, 2);
    assert_eq!(router.pool().stats().slots, 1);

    assert!(router.release());
    assert!(!router.release());
    assert!(Arc::ptr_eq(&router.init_connect(false).await.unwrap(), &shared_read));
}

#[tokio::test]
async fn test_failed_replica_falls_back_to_master() {
    let backend = MockBackend::new().failing_host("db1");
    let journal = backend.journal();
    let mut db = database(backend, cluster_config("db0,db1", 1, true));

    db.table("user").unwrap().select().await.unwrap();

    let journal = journal.lock().unwrap();
    assert_eq!(journal.connects, vec!["db1".to_string(), "db0".to_string()]);
    assert_eq!(journal.statements_on("db0"), vec!["SELECT * FROM `user` WHERE 1;".to_string()]);

    let stats = db.pool_stats();
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.connect_attempts, 2);
    assert_eq!(stats.connect_failures, 1);
}

#[tokio::test]
async fn test_exhausted_fallback_reports_redacted_node() {
    let backend = MockBackend::new().failing_host("db0").failing_host("db1");
    let mut db = database(backend, cluster_config("db0,db1", 1, true));

    let err = db.query("SELECT 1").await.unwrap_err();
    match err {
        DbError::Connection { message, config } => {
            assert!(message.contains("db0"));
            let config = config.expect("node config attached");
            assert_eq!(config.hostname, vec!["db0".to_string()]);
            assert!(!format!("{:?}", config).contains("secret"));
        }
        other => panic!("Expected connection error, got {:?}", other),
    }
    assert_eq!(db.last_sql(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_connects_once() {
    let backend = MockBackend::new();
    let journal = backend.journal();
    let pool = Arc::new(ConnectionPool::new(backend));
    let node = single_config().node(0);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let node = node.clone();
            tokio::spawn(async move { pool.connect(&node, 0, None).await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(journal.lock().unwrap().connects.len(), 1);
    assert!(pool.contains(0));
    assert!(!pool.contains(1));
}

#[tokio::test]
async fn test_failed_slot_can_retry() {
    let pool = ConnectionPool::new(MockBackend::new().failing_host("db0"));
    let node = single_config().node(0);

    assert!(pool.connect(&node, 0, None).await.is_err());
    assert!(pool.is_empty());
    assert!(pool.connect(&node, 0, None).await.is_err());
    assert_eq!(pool.stats().connect_attempts, 2);
}
