//! RedisStore - 本番用のバッキングストア（feature = "redis"）
//!
//! 単純な操作は Redis のコマンド 1 つ（RPUSH / LMOVE / LREM / ZADD / GET / SET / DEL）。
//! 複合操作（move_member, set_if_listed, zpop_due）は Lua スクリプトで 1 回のアトミック実行にする。

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Script};
use tracing::debug;

use super::pool::{Pool, PoolError, Pooled};
use crate::ports::{RecordWrite, Store, StoreError};

/// KEYS: src, dst, record_key, delete...   ARGV: member, has_record ("1"/"0"), record_value
const MOVE_MEMBER: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
  return 0
end
if ARGV[2] == '1' then
  redis.call('SET', KEYS[3], ARGV[3])
end
for i = 4, #KEYS do
  redis.call('DEL', KEYS[i])
end
redis.call('RPUSH', KEYS[2], ARGV[1])
return 1
"#;

/// KEYS: list, record_key   ARGV: member, record_value
const SET_IF_LISTED: &str = r#"
if not redis.call('LPOS', KEYS[1], ARGV[1]) then
  return 0
end
redis.call('SET', KEYS[2], ARGV[2])
return 1
"#;

/// KEYS: set, dst   ARGV: max_score
const ZPOP_DUE: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, member in ipairs(due) do
  redis.call('ZREM', KEYS[1], member)
  redis.call('RPUSH', KEYS[2], member)
end
return due
"#;

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

impl From<PoolError> for StoreError {
    fn from(e: PoolError) -> Self {
        StoreError::Connection(e.to_string())
    }
}

/// Redis-backed store over a fixed pool of connections.
///
/// Size the pool to the concurrency of the component using it (a worker
/// pool's `max_concurrent_jobs`, or 2 for the clock role).
pub struct RedisStore {
    pool: Pool<MultiplexedConnection>,
    move_member: Script,
    set_if_listed: Script,
    zpop_due: Script,
}

impl RedisStore {
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size.max(1) {
            connections.push(client.get_multiplexed_async_connection().await?);
        }
        debug!(pool_size = connections.len(), "connected to redis");
        Ok(Self {
            pool: Pool::new(connections)?,
            move_member: Script::new(MOVE_MEMBER),
            set_if_listed: Script::new(SET_IF_LISTED),
            zpop_due: Script::new(ZPOP_DUE),
        })
    }

    async fn conn(&self) -> Result<Pooled<'_, MultiplexedConnection>, StoreError> {
        Ok(self.pool.acquire().await?)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn push_back(&self, list: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("RPUSH")
            .arg(list)
            .arg(member)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn pop_push(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        let member: Option<String> = redis::cmd("LMOVE")
            .arg(src)
            .arg(dst)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(&mut *conn)
            .await?;
        Ok(member)
    }

    async fn remove(&self, list: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::cmd("LREM")
            .arg(list)
            .arg(1)
            .arg(member)
            .query_async(&mut *conn)
            .await?;
        Ok(removed > 0)
    }

    async fn move_member(
        &self,
        src: &str,
        dst: &str,
        member: &str,
        record: Option<RecordWrite<'_>>,
        delete: &[&str],
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let (record_key, has_record, record_value): (&str, &str, &[u8]) = match record {
            Some(write) => (write.key, "1", write.value),
            None => (src, "0", b"".as_slice()),
        };
        let mut invocation = self.move_member.key(src);
        invocation.key(dst).key(record_key);
        for key in delete {
            invocation.key(*key);
        }
        let moved: i64 = invocation
            .arg(member)
            .arg(has_record)
            .arg(record_value)
            .invoke_async(&mut *conn)
            .await?;
        Ok(moved == 1)
    }

    async fn list(&self, list: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = redis::cmd("LRANGE")
            .arg(list)
            .arg(0)
            .arg(-1)
            .query_async(&mut *conn)
            .await?;
        Ok(members)
    }

    async fn zadd(&self, set: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("ZADD")
            .arg(set)
            .arg(score)
            .arg(member)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn zpop_due(
        &self,
        set: &str,
        max_score: i64,
        dst: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let due: Vec<String> = self
            .zpop_due
            .key(set)
            .key(dst)
            .arg(max_score)
            .invoke_async(&mut *conn)
            .await?;
        Ok(due)
    }

    async fn zlist(&self, set: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let mut conn = self.conn().await?;
        let entries: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(set)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut *conn)
            .await?;
        Ok(entries
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn set_if_listed(
        &self,
        list: &str,
        member: &str,
        record: RecordWrite<'_>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let written: i64 = self
            .set_if_listed
            .key(list)
            .key(record.key)
            .arg(member)
            .arg(record.value)
            .invoke_async(&mut *conn)
            .await?;
        Ok(written == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut *conn).await?;
        Ok(removed > 0)
    }
}
