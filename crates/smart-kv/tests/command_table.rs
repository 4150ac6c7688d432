use smart_db::{DbError, Deploy};
use smart_kv::{lookup, Access, KeyValue, NO_ARGS};

#[test]
fn test_read_write_split_of_common_commands() {
    for read in ["get", "mget", "hgetall", "lrange", "smembers", "zrange", "ttl", "exists"] {
        assert_eq!(lookup(read).unwrap().access, Access::Read, "{}", read);
    }
    for write in ["set", "setex", "del", "incr", "hset", "lpush", "sadd", "zadd", "expire"] {
        assert_eq!(lookup(write).unwrap().access, Access::Write, "{}", write);
    }
}

#[test]
fn test_legacy_aliases() {
    let pairs = [
        ("getKeys", "KEYS"),
        ("sGetMembers", "SMEMBERS"),
        ("lRemove", "LREM"),
        ("renameKey", "RENAME"),
        ("getMultiple", "MGET"),
    ];
    for (alias, name) in pairs {
        assert_eq!(lookup(alias).unwrap().name, name);
    }
}

#[test]
fn test_dsn_configures_redis_without_connecting() {
    let kv = KeyValue::from_dsn("redis://:secret@cache.local:6380/2?timeout=3").unwrap();
    let config = kv.config();

    assert_eq!(config.kind, "redis");
    assert_eq!(config.deploy, Deploy::Single);
    assert_eq!(config.node(0).hostport, 6380);
    assert_eq!(config.node(0).database, "2");
    assert_eq!(config.node(0).timeout, Some(std::time::Duration::from_secs(3)));
    assert_eq!(kv.pool_stats().connect_attempts, 0);
}

#[tokio::test]
async fn test_unknown_command_fails_before_connecting() {
    // Nothing listens on this port; an attempted connect would surface as a
    // connection error instead.
    let mut kv = KeyValue::from_dsn("redis://127.0.0.1:1/0").unwrap();
    let err = kv.execute("shutdown", NO_ARGS).await.unwrap_err();

    assert!(matches!(err, DbError::UnsupportedCommand(_)));
    assert_eq!(kv.pool_stats().connect_attempts, 0);
}
