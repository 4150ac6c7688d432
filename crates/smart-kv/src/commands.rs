//! Command classification
//!
//! Every command the driver accepts is listed here with the access it needs.
//! Reads may go to a replica; writes always go to a master. Legacy client
//! method names are accepted as aliases and sent as the command they name.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use smart_db::{DbError, DbResult};

/// Which kind of node a command needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn is_write(self) -> bool {
        self == Access::Write
    }
}

/// A resolved command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command name as sent on the wire
    pub name: &'static str,
    pub access: Access,
}

impl CommandSpec {
    /// Whether the command leaves state on its connection that later
    /// commands of the same driver depend on
    pub fn binds_session(&self) -> bool {
        SESSION_COMMANDS.contains(&self.name)
    }
}

/// Commands after which the driver keeps to one private connection
const SESSION_COMMANDS: &[&str] = &["MULTI", "WATCH", "AUTH"];

const READ_COMMANDS: &[&str] = &[
    // keys and server
    "EXISTS", "TTL", "PTTL", "TYPE", "KEYS", "SCAN", "RANDOMKEY", "DUMP", "OBJECT", "DBSIZE", "INFO",
    "LASTSAVE", "PING", "ECHO", "TIME",
    // strings
    "GET", "MGET", "STRLEN", "GETRANGE", "GETBIT", "BITCOUNT", "BITPOS",
    // hashes
    "HGET", "HMGET", "HGETALL", "HKEYS", "HVALS", "HLEN", "HEXISTS", "HSCAN", "HSTRLEN",
    // lists
    "LLEN", "LINDEX", "LRANGE",
    // sets
    "SCARD", "SISMEMBER", "SMEMBERS", "SRANDMEMBER", "SDIFF", "SINTER", "SUNION", "SSCAN",
    // sorted sets
    "ZCARD", "ZCOUNT", "ZRANGE", "ZRANGEBYSCORE", "ZREVRANGE", "ZREVRANGEBYSCORE", "ZRANK",
    "ZREVRANK", "ZSCORE", "ZSCAN", "ZLEXCOUNT", "ZRANGEBYLEX",
    "SORT_RO",
];

const WRITE_COMMANDS: &[&str] = &[
    // keys and server
    "DEL", "UNLINK", "EXPIRE", "PEXPIRE", "EXPIREAT", "PEXPIREAT", "PERSIST", "RENAME", "RENAMENX",
    "MOVE", "MIGRATE", "RESTORE", "SORT", "FLUSHDB", "FLUSHALL", "SAVE", "BGSAVE", "BGREWRITEAOF",
    "CONFIG", "AUTH",
    // strings
    "SET", "SETEX", "PSETEX", "SETNX", "SETRANGE", "SETBIT", "GETSET", "APPEND", "MSET", "MSETNX",
    "INCR", "INCRBY", "INCRBYFLOAT", "DECR", "DECRBY", "BITOP",
    // hashes
    "HSET", "HSETNX", "HMSET", "HDEL", "HINCRBY", "HINCRBYFLOAT",
    // lists
    "LPUSH", "RPUSH", "LPUSHX", "RPUSHX", "LPOP", "RPOP", "BLPOP", "BRPOP", "RPOPLPUSH", "BRPOPLPUSH",
    "LSET", "LREM", "LTRIM", "LINSERT",
    // sets
    "SADD", "SREM", "SPOP", "SMOVE", "SDIFFSTORE", "SINTERSTORE", "SUNIONSTORE",
    // sorted sets
    "ZADD", "ZREM", "ZINCRBY", "ZREMRANGEBYSCORE", "ZREMRANGEBYRANK", "ZINTERSTORE", "ZUNIONSTORE",
    // transactions
    "MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH",
];

/// Legacy method names and the command each one sends
const ALIASES: &[(&str, &str)] = &[
    ("delete", "DEL"),
    ("lsize", "LLEN"),
    ("lget", "LINDEX"),
    ("lgetrange", "LRANGE"),
    ("lremove", "LREM"),
    ("listtrim", "LTRIM"),
    ("ssize", "SCARD"),
    ("sremove", "SREM"),
    ("scontains", "SISMEMBER"),
    ("sgetmembers", "SMEMBERS"),
    ("zsize", "ZCARD"),
    ("zdelete", "ZREM"),
    ("zdeleterangebyscore", "ZREMRANGEBYSCORE"),
    ("zinter", "ZINTERSTORE"),
    ("zunion", "ZUNIONSTORE"),
    ("getkeys", "KEYS"),
    ("getmultiple", "MGET"),
    ("settimeout", "EXPIRE"),
    ("renamekey", "RENAME"),
];

static COMMANDS: Lazy<HashMap<String, CommandSpec>> = Lazy::new(|| {
    let mut table = HashMap::with_capacity(READ_COMMANDS.len() + WRITE_COMMANDS.len() + ALIASES.len());

    let classified = READ_COMMANDS
        .iter()
        .map(|name| (*name, Access::Read))
        .chain(WRITE_COMMANDS.iter().map(|name| (*name, Access::Write)));
    for (name, access) in classified {
        table.insert(name.to_ascii_lowercase(), CommandSpec { name, access });
    }

    for (alias, target) in ALIASES {
        if let Some(spec) = table.get(&target.to_ascii_lowercase()).copied() {
            table.insert(alias.to_string(), spec);
        }
    }

    table
});

/// Resolve `command` case-insensitively
pub fn lookup(command: &str) -> DbResult<CommandSpec> {
    COMMANDS
        .get(&command.trim().to_ascii_lowercase())
        .copied()
        .ok_or_else(|| DbError::UnsupportedCommand(command.to_string()))
}

/// Number of accepted command names, aliases included
pub fn command_count() -> usize {
    COMMANDS.len()
}
