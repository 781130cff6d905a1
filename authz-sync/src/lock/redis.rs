//! Redis-backed lock: `SET key token NX PX ttl`, with compare-and-delete and
//! compare-and-expire scripts so only the owner can release or extend.

use super::{Acquisition, DistributedLock, LockToken};
use crate::error::LockError;
use ::redis::{aio::ConnectionManager, RedisResult, Script};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

pub struct RedisLock {
    redis: ConnectionManager,
    key: String,
    ttl: Duration,
    /// Bound on every Redis round trip
    timeout: Duration,
    release_script: Script,
    extend_script: Script,
}

impl RedisLock {
    /// Connect to Redis and prepare the lock under `key`
    pub async fn connect(redis_url: &str, key: &str, ttl: Duration, timeout: Duration) -> Result<Self, LockError> {
        let client = ::redis::Client::open(redis_url)?;
        let redis = match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(connection) => connection?,
            Err(_) => return Err(LockError::Timeout(timeout)),
        };
        info!("Connected to Redis for sync lock {}", key);

        Ok(Self::new(redis, key, ttl, timeout))
    }

    pub fn new(redis: ConnectionManager, key: &str, ttl: Duration, timeout: Duration) -> Self {
        Self {
            redis,
            key: key.to_string(),
            ttl,
            timeout,
            release_script: Script::new(RELEASE_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
        }
    }

    fn ttl_millis(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }

    async fn bounded<T>(&self, call: impl Future<Output = RedisResult<T>>) -> Result<T, LockError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LockError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self) -> Result<Acquisition, LockError> {
        let token = LockToken::generate();
        let mut conn = self.redis.clone();

        let mut set = ::redis::cmd("SET");
        set.arg(&self.key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_millis());

        // Nil reply: the key already exists
        let reply: Option<String> = self.bounded(set.query_async(&mut conn)).await?;
        match reply {
            Some(_) => {
                debug!("Acquired sync lock {}", self.key);
                Ok(Acquisition::Acquired(token))
            }
            None => Ok(Acquisition::AlreadyHeld),
        }
    }

    async fn extend(&self, token: &LockToken) -> Result<bool, LockError> {
        let mut conn = self.redis.clone();
        let mut invocation = self.extend_script.key(&self.key);
        invocation.arg(token.as_str()).arg(self.ttl_millis());

        let extended: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(extended == 1)
    }

    async fn release(&self, token: &LockToken) -> Result<(), LockError> {
        let mut conn = self.redis.clone();
        let mut invocation = self.release_script.key(&self.key);
        invocation.arg(token.as_str());

        let deleted: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        if deleted == 0 {
            debug!("Sync lock {} was no longer ours to release", self.key);
        }
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
