//! Component E — Rate Limiter: per-`(provider, key)` leaky-bucket throttle.
//! Every language-model call acquires one token first (§5). Keys are never
//! logged or kept in memory in full — only a short SHA-256 prefix, so a
//! throttled-request log line can't leak a credential.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rpm: f64) -> Self {
        let refill_per_sec = rpm / 60.0;
        let capacity = (rpm / 10.0).max(5.0);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Seconds until at least one token is available, given the current
    /// (already-refilled) state.
    fn wait_seconds(&self) -> f64 {
        if self.tokens >= 1.0 {
            0.0
        } else {
            (1.0 - self.tokens) / self.refill_per_sec
        }
    }
}

/// Registry of leaky buckets keyed by `provider:sha256(key)[:8]`.
#[derive(Clone)]
pub struct RateLimiter {
    rpm: f64,
    buckets: Arc<RwLock<HashMap<String, Arc<Mutex<Bucket>>>>>,
}

impl RateLimiter {
    pub fn new(rpm: u32) -> Self {
        Self {
            rpm: rpm as f64,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn bucket_key(provider: &str, key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        format!("{provider}:{}", &hex[..8.min(hex.len())])
    }

    async fn bucket_for(&self, bucket_key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().await.get(bucket_key) {
            return bucket.clone();
        }
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(self.rpm))))
            .clone()
    }

    /// Acquire one token for `(provider, key)`, waiting (suspension point
    /// §5.3) until the bucket has refilled enough to grant it.
    pub async fn acquire(&self, provider: &str, key: &str) {
        let bucket_key = Self::bucket_key(provider, key);
        let bucket = self.bucket_for(&bucket_key).await;
        loop {
            let wait = {
                let mut guard = bucket.lock().await;
                guard.refill();
                if guard.tokens >= 1.0 {
                    guard.tokens -= 1.0;
                    0.0
                } else {
                    guard.wait_seconds()
                }
            };
            if wait <= 0.0 {
                return;
            }
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}
