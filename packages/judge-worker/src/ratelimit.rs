//! Per-user submission frequency gate over fixed-window counters.
//!
//! `can_submit` and `record_submit` are separate calls, so two concurrent
//! submissions from one user may both pass the check before either records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use crate::config::RateLimitConfig;

const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const HOUR_WINDOW: Duration = Duration::from_secs(3600);

pub type StoreResult<T> = Result<T, redis::RedisError>;

/// Shared counters with per-key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<u64>;

    /// Increment and return the new value.
    async fn incr(&self, key: &str) -> StoreResult<u64>;

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Remaining lifetime; `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: MultiplexedConnection,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn incr(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1u64).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: bool = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let secs: i64 = conn.ttl(key).await?;
        Ok((secs >= 0).then(|| Duration::from_secs(secs as u64)))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.del(key).await?;
        Ok(())
    }
}

/// Time source for [`MemoryCounterStore`].
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    expires_at: Option<Instant>,
}

/// In-process counters for tests and single-node runs.
pub struct MemoryCounterStore {
    clock: Arc<dyn Clock>,
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` on the live counters, dropping expired ones first.
    fn with_live<T>(&self, f: impl FnOnce(&mut HashMap<String, Counter>) -> T) -> T {
        let now = self.clock.now();
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        counters.retain(|_, c| c.expires_at.is_none_or(|at| at > now));
        f(&mut counters)
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> StoreResult<u64> {
        Ok(self.with_live(|c| c.get(key).map_or(0, |c| c.value)))
    }

    async fn incr(&self, key: &str) -> StoreResult<u64> {
        Ok(self.with_live(|c| {
            let counter = c.entry(key.to_string()).or_insert(Counter {
                value: 0,
                expires_at: None,
            });
            counter.value += 1;
            counter.value
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let at = self.clock.now() + ttl;
        self.with_live(|c| {
            if let Some(counter) = c.get_mut(key) {
                counter.expires_at = Some(at);
            }
        });
        Ok(())
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = self.clock.now();
        Ok(self.with_live(|c| {
            c.get(key)
                .and_then(|counter| counter.expires_at)
                .map(|at| at.saturating_duration_since(now))
        }))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.with_live(|c| c.remove(key));
        Ok(())
    }
}

fn minute_key(user_id: i64) -> String {
    format!("submit:rate:{user_id}:minute")
}

fn hour_key(user_id: i64) -> String {
    format!("submit:rate:{user_id}:hour")
}

/// Two fixed windows per user: per minute and per hour.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    per_minute: u64,
    per_hour: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            per_minute: config.per_minute,
            per_hour: config.per_hour,
        }
    }

    pub async fn can_submit(&self, user_id: i64) -> StoreResult<bool> {
        let minute = self.store.get(&minute_key(user_id)).await?;
        if minute >= self.per_minute {
            debug!(user_id, minute, "Per-minute submission limit reached");
            return Ok(false);
        }
        let hour = self.store.get(&hour_key(user_id)).await?;
        if hour >= self.per_hour {
            debug!(user_id, hour, "Per-hour submission limit reached");
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn record_submit(&self, user_id: i64) -> StoreResult<()> {
        for (key, window) in [
            (minute_key(user_id), MINUTE_WINDOW),
            (hour_key(user_id), HOUR_WINDOW),
        ] {
            if self.store.incr(&key).await? == 1 {
                self.store.expire(&key, window).await?;
            }
        }
        Ok(())
    }

    /// Submissions left in the current minute window.
    pub async fn remaining_submits(&self, user_id: i64) -> StoreResult<u64> {
        let used = self.store.get(&minute_key(user_id)).await?;
        Ok(self.per_minute.saturating_sub(used))
    }

    /// Seconds until the minute window resets, 0 when not limited.
    pub async fn wait_seconds(&self, user_id: i64) -> StoreResult<u64> {
        let ttl = self.store.ttl(&minute_key(user_id)).await?;
        Ok(ttl.map_or(0, |d| d.as_secs_f64().ceil() as u64))
    }

    pub async fn clear(&self, user_id: i64) -> StoreResult<()> {
        self.store.delete(&minute_key(user_id)).await?;
        self.store.delete(&hour_key(user_id)).await?;
        info!(user_id, "Submission rate limit cleared");
        Ok(())
    }
}
