//! Per-client token-bucket admission control.
//!
//! Every client address owns one bucket in a shared registry. A bucket holds
//! up to `burst` tokens, earns one token per `refill_interval`, and each
//! admitted request spends one. Buckets idle for longer than `idle_ttl` are
//! dropped by a background sweep.

use axum::http::HeaderMap;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shared key for every client whose address cannot be parsed.
pub const FALLBACK_KEY: &str = "0.0.0.0";

// Absorbs float drift when refills add up to exactly one token.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Time to earn one token (200ms = 5 requests per second sustained).
    pub refill_interval: Duration,
    /// Maximum tokens a bucket can hold.
    pub burst: u32,
    /// Buckets untouched for longer than this are evicted.
    pub idle_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            refill_interval: Duration::from_millis(200),
            burst: 10,
            idle_ttl: Duration::from_secs(3 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

#[derive(Debug)]
pub struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: now,
            last_seen: now,
        }
    }

    fn touch(&mut self, now: Instant) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    fn refill(&mut self, now: Instant, interval: Duration, capacity: u32) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let earned = elapsed.as_secs_f64() / interval.as_secs_f64();
        self.tokens = (self.tokens + earned).min(f64::from(capacity));
        self.last_refill = now;
    }

    /// Refills for the time elapsed up to `now`, then spends one token if
    /// available. A rejection leaves the token level untouched.
    fn try_consume(&mut self, now: Instant, interval: Duration, capacity: u32) -> Decision {
        self.refill(now, interval, capacity);

        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            return Decision::Allowed;
        }

        let wait = interval.mul_f64(1.0 - self.tokens);
        let whole_secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        Decision::Limited {
            retry_after_secs: whole_secs.max(1),
        }
    }
}

/// Registry of buckets keyed by client address. Cloning shares the registry.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    config: RateLimitConfig,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                config,
                buckets: DashMap::new(),
            }),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.buckets.len()
    }

    /// Returns the bucket for `key`, creating a full one if absent.
    ///
    /// The returned guard holds the registry shard lock for `key`, so neither a
    /// concurrent first request nor the sweep can touch the bucket while it is
    /// held.
    fn get_or_create(&self, key: &str, now: Instant) -> RefMut<'_, String, Bucket> {
        let burst = self.inner.config.burst;
        self.inner
            .buckets
            .entry(key.to_owned())
            .or_insert_with(|| Bucket::full(burst, now))
    }

    pub fn admit(&self, key: &str) -> Decision {
        self.admit_at(key, Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> Decision {
        let config = &self.inner.config;
        let mut bucket = self.get_or_create(key, now);
        bucket.touch(now);
        bucket.try_consume(now, config.refill_interval, config.burst)
    }

    /// Drops every bucket idle for longer than `idle_ttl`. Returns how many
    /// were evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let ttl = self.inner.config.idle_ttl;
        let before = self.inner.buckets.len();
        self.inner
            .buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= ttl);
        before.saturating_sub(self.inner.buckets.len())
    }

    /// Starts the periodic sweep on the current tokio runtime.
    pub fn spawn_sweeper(&self) -> SweepHandle {
        let limiter = self.clone();
        let period = self.inner.config.sweep_interval;
        let (stop, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = limiter.bucket_count(), "Evicted idle rate limit buckets");
                        }
                    }
                    _ = &mut stopped => break,
                }
            }
        });

        SweepHandle {
            stop: Some(stop),
            task,
        }
    }
}

/// Owns the background sweep. Dropping the handle also stops the task.
pub struct SweepHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!("Rate limit sweeper ended abnormally: {}", e);
        }
    }
}

/// Best-effort client address: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer. A header whose value is not an IP
/// address is skipped; [`FALLBACK_KEY`] is used only when no source yields one.
pub fn resolve_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip()))
        .map(|ip| ip.to_canonical().to_string())
        .unwrap_or_else(|| FALLBACK_KEY.to_string())
}
