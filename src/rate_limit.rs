// ============================================================================
// Distributed Rate Limiter
// ============================================================================
//
// Sliding-rejection counter keyed by client+path, backed by a shared
// counter store. The increment and the TTL installation happen in a single
// server-side script so concurrent gateways cannot race on the window
// start. Counters are never decremented.
//
// The counter store is a trait seam: production uses Redis, tests use an
// in-process map with real TTLs.
//
// ============================================================================

use async_trait::async_trait;
use portico_config::RateLimitConfig;
use portico_error::{AppError, AppResult};
use portico_redis::RedisClient;

const KEY_PREFIX: &str = "rate_limit:";

/// Atomic increment-with-TTL against the shared counter store
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter under `key` and return the new value. On the
    /// 0 -> 1 transition the key's TTL is set to `ttl_ms`.
    async fn incr_with_ttl(&self, key: &str, ttl_ms: u64) -> AppResult<i64>;
}

/// Redis-backed counter store. The Lua script runs atomically server-side.
pub struct RedisCounterStore {
    client: RedisClient,
    script: redis::Script,
}

const INCR_WITH_TTL_SCRIPT: &str = r#"
local current
current = redis.call("INCR", KEYS[1])
if tonumber(current) == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return current
"#;

impl RedisCounterStore {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            script: RedisClient::create_script(INCR_WITH_TTL_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_with_ttl(&self, key: &str, ttl_ms: u64) -> AppResult<i64> {
        let mut conn = self.client.connection();
        let count: i64 = self
            .script
            .key(key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the window, clamped at zero
    pub remaining: i64,
}

/// Per-key rate limiter over a shared counter store
pub struct RateLimiter {
    store: Box<dyn CounterStore>,
    limit: i64,
    window_ms: u64,
}

impl RateLimiter {
    pub fn new(store: Box<dyn CounterStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            limit: config.limit,
            window_ms: config.window_secs * 1000,
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Check whether a request under `key` is allowed. Counter-store
    /// failures propagate as errors; the caller decides fail-open vs
    /// fail-closed (the gateway default is fail-closed).
    pub async fn is_allowed(&self, key: &str) -> AppResult<RateDecision> {
        let redis_key = format!("{KEY_PREFIX}{key}");
        let count = self.store.incr_with_ttl(&redis_key, self.window_ms).await?;

        Ok(RateDecision {
            allowed: count <= self.limit,
            remaining: (self.limit - count).max(0),
        })
    }
}

/// In-process counter store with real TTLs, for tests and single-node runs
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use super::*;

    #[derive(Default)]
    pub struct MemoryCounterStore {
        counters: Mutex<HashMap<String, (i64, Instant)>>,
    }

    impl MemoryCounterStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl CounterStore for MemoryCounterStore {
        async fn incr_with_ttl(&self, key: &str, ttl_ms: u64) -> AppResult<i64> {
            let mut counters = self.counters.lock().expect("counter store poisoned");
            let now = Instant::now();

            let entry = counters
                .entry(key.to_string())
                .and_modify(|(count, expires_at)| {
                    if now >= *expires_at {
                        *count = 0;
                        *expires_at = now + Duration::from_millis(ttl_ms);
                    }
                })
                .or_insert((0, now + Duration::from_millis(ttl_ms)));

            entry.0 += 1;
            Ok(entry.0)
        }
    }

    /// A store that always fails, for exercising the fail-closed path
    pub struct UnreachableCounterStore;

    #[async_trait]
    impl CounterStore for UnreachableCounterStore {
        async fn incr_with_ttl(&self, _key: &str, _ttl_ms: u64) -> AppResult<i64> {
            Err(AppError::internal("counter store unreachable"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryCounterStore, UnreachableCounterStore};
    use super::*;

    fn limiter(limit: i64, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            Box::new(MemoryCounterStore::new()),
            &RateLimitConfig {
                limit,
                window_secs,
                fail_open: false,
            },
        )
    }

    #[tokio::test]
    async fn test_allows_up_to_limit_then_rejects() {
        let limiter = limiter(3, 60);

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.is_allowed("1.2.3.4/api/v1/auth/Login").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = limiter.is_allowed("1.2.3.4/api/v1/auth/Login").await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, 60);

        assert!(limiter.is_allowed("a/path").await.unwrap().allowed);
        assert!(!limiter.is_allowed("a/path").await.unwrap().allowed);
        assert!(limiter.is_allowed("b/path").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_window_expiry_restores_budget() {
        // zero-second window: the TTL has always elapsed by the next call
        let limiter = limiter(5, 0);

        for _ in 0..10 {
            let decision = limiter.is_allowed("client/path").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, limiter.limit() - 1);
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let limiter = RateLimiter::new(
            Box::new(UnreachableCounterStore),
            &RateLimitConfig {
                limit: 50,
                window_secs: 60,
                fail_open: false,
            },
        );

        assert!(limiter.is_allowed("client/path").await.is_err());
    }
}
