//! # smart-kv
//!
//! Key-value command routing on top of `smart-db`'s connection pool and
//! master/replica router.
//!
//! Commands are checked against a fixed read/write table. Reads go to a
//! replica when read/write separation is on; writes always go to a master.
//!
//! ```no_run
//! use smart_kv::KeyValue;
//!
//! # async fn demo() -> smart_db::DbResult<()> {
//! let mut kv = KeyValue::from_dsn("redis://:secret@127.0.0.1:6379/0")?;
//! kv.execute("set", ("user:1", "bob")).await?;
//! let name: Option<String> = kv.execute_as("get", "user:1").await?;
//! # let _ = name;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod commands;
pub mod driver;

pub use backends::{map_redis_error, RedisBackend, RedisConnection};
pub use commands::{lookup, Access, CommandSpec};
pub use driver::{CommandConnection, KeyValue, NO_ARGS};
