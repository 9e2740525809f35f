//! The distributed variant's shared timing structure: a sorted set plus a
//! hash-per-task, mutated only through three atomic server-side scripts.
//!
//! Ported line-for-line (translated to the `redis` crate's scripting API)
//! from `original_source/scheduler/implement/constant.go`'s
//! `registerTaskScriptStr`/`removeTaskScriptStr`/`getTaskScriptStr`. The
//! `redis`/`deadpool-redis` crates are not in the teacher's dependency
//! roster; they are pulled in from `other_examples/..._arcana-jobs-src-
//! scheduler.rs.rs`, which demonstrates the same `redis::Script::new(...)
//! .key(...).arg(...).invoke_async` idiom used here.

use crate::error::{Error, Result};
use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands as _;

pub const ZSET_KEY: &str = "distributed_scheduler:zset";

pub fn task_hash_key(task_id: &str) -> String {
    format!("distributed_scheduler:task:{task_id}")
}

const REGISTER_SCRIPT: &str = r#"
local jobKey = KEYS[1]
local zkey = KEYS[2]
local score = ARGV[1]
local member = ARGV[2]
local payload = ARGV[3]

local added = redis.call("ZADD", zkey, "NX", score, member)
if added == 0 then
  return 0
end

redis.call("HSET", jobKey, "payload", payload)
return 1
"#;

const REMOVE_SCRIPT: &str = r#"
local jobKey = KEYS[1]
local zkey = KEYS[2]
local member = ARGV[1]

local removed = redis.call("ZREM", zkey, member)
if removed == 0 then
  return 0
end

redis.call("DEL", jobKey)
return 1
"#;

const POP_DUE_SCRIPT: &str = r#"
local zkey = KEYS[1]
local maxScore = ARGV[1]
local limit = tonumber(ARGV[2]) or 100

local res = redis.call('ZRANGEBYSCORE', zkey, '-inf', maxScore, 'LIMIT', 0, limit, 'WITHSCORES')
if #res == 0 then
  return {}
end

local members = {}
local out = {}
for i = 1, #res, 2 do
  local member = res[i]
  table.insert(members, member)

  local payload = redis.call('HGET', member, 'payload')
  if not payload then payload = "" end

  table.insert(out, payload)
end

if #members > 0 then
  redis.call('ZREM', zkey, unpack(members))
end

return out
"#;

/// The `Store` interface of the shared timing structure: a key-value +
/// sorted-set store with atomic scripted execution.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// `ZADD NX` the task at `next_fire_unix`; on success, `HSET` its
    /// payload. Returns `false` if the member already existed (single-
    /// writer-wins).
    async fn register(&self, task_id: &str, next_fire_unix: i64, payload: &str) -> Result<bool>;

    /// `ZREM` the task, then `DEL` its hash. Returns `false` if it was not
    /// present.
    async fn remove(&self, task_id: &str) -> Result<bool>;

    /// Atomically pop up to `limit` entries at or before `max_score_unix`,
    /// returning their payloads. Each due entry is delivered to exactly one
    /// caller across concurrent processes.
    async fn pop_due(&self, max_score_unix: i64, limit: usize) -> Result<Vec<String>>;

    /// The earliest score in the sorted set, if any.
    async fn earliest_score(&self) -> Result<Option<i64>>;
}

pub struct RedisCoordinationStore {
    pool: Pool,
    register_script: redis::Script,
    remove_script: redis::Script,
    pop_due_script: redis::Script,
}

impl RedisCoordinationStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            register_script: redis::Script::new(REGISTER_SCRIPT),
            remove_script: redis::Script::new(REMOVE_SCRIPT),
            pop_due_script: redis::Script::new(POP_DUE_SCRIPT),
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn register(&self, task_id: &str, next_fire_unix: i64, payload: &str) -> Result<bool> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Other(e.into()))?;
        let hash_key = task_hash_key(task_id);
        let result: i64 = self
            .register_script
            .key(&hash_key)
            .key(ZSET_KEY)
            .arg(next_fire_unix)
            .arg(&hash_key)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn remove(&self, task_id: &str) -> Result<bool> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Other(e.into()))?;
        let hash_key = task_hash_key(task_id);
        let result: i64 = self
            .remove_script
            .key(&hash_key)
            .key(ZSET_KEY)
            .arg(&hash_key)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn pop_due(&self, max_score_unix: i64, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Other(e.into()))?;
        let payloads: Vec<String> = self
            .pop_due_script
            .key(ZSET_KEY)
            .arg(max_score_unix)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;
        Ok(payloads)
    }

    async fn earliest_score(&self) -> Result<Option<i64>> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Other(e.into()))?;
        let entries: Vec<(String, f64)> = conn.zrange_withscores(ZSET_KEY, 0, 0).await?;
        Ok(entries.first().map(|(_, score)| *score as i64))
    }
}
