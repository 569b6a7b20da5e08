//! Per-endpoint runtime state: health counters, circuit breaker, and a
//! token-bucket rate limiter.
//!
//! Health counters are atomics so concurrent turns never serialize on a
//! shared lock just to record an outcome; only the rate limiter takes a
//! short mutex.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use rand::Rng;

use vigil_types::EndpointConfig;

/// Latency weight in the selection score: points lost per millisecond.
const ALPHA: f64 = 0.01;

/// Failure weight in the selection score: points lost per consecutive failure.
const BETA: f64 = 25.0;

/// First-failure circuit backoff.
const BACKOFF_BASE_MS: u64 = 500;

/// Circuit backoff ceiling.
const BACKOFF_CAP_MS: u64 = 60_000;

/// Random jitter added on top of the computed backoff.
const BACKOFF_JITTER_MS: u64 = 250;

/// Local request rate limit per endpoint.
const RATE_LIMIT_RPM: u32 = 120;

/// EWMA smoothing: new = old + (sample - old) / EWMA_DIVISOR.
const EWMA_DIVISOR: u64 = 4;

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Simple token bucket, refilled continuously.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_minute: u32) -> Self {
        let max = f64::from(requests_per_minute);
        Self {
            tokens: max,
            max_tokens: max,
            refill_per_sec: max / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Read-only health snapshot for dashboards.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EndpointHealth {
    pub name: String,
    pub enabled: bool,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_latency_ms: u64,
    pub circuit_open_ms_remaining: i64,
    pub total_requests: u64,
}

/// One endpoint's configuration plus mutable health state.
pub struct EndpointState {
    pub config: EndpointConfig,
    consecutive_failures: AtomicU32,
    latency_ewma_ms: AtomicU64,
    circuit_open_until_ms: AtomicI64,
    total_requests: AtomicU64,
    limiter: Mutex<TokenBucket>,
}

impl EndpointState {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            consecutive_failures: AtomicU32::new(0),
            latency_ewma_ms: AtomicU64::new(0),
            circuit_open_until_ms: AtomicI64::new(0),
            total_requests: AtomicU64::new(0),
            limiter: Mutex::new(TokenBucket::new(RATE_LIMIT_RPM)),
        }
    }

    /// Whether this endpoint may be selected right now. A circuit whose
    /// open window is in the future makes the endpoint unselectable.
    pub fn is_selectable(&self) -> bool {
        self.config.enabled && self.circuit_open_until_ms.load(Ordering::Acquire) <= now_ms()
    }

    /// Consume one local rate-limit token.
    pub fn try_acquire_slot(&self) -> bool {
        self.limiter
            .lock()
            .map(|mut bucket| bucket.try_consume())
            .unwrap_or(false)
    }

    /// Ranking score: higher is better. Base priority, discounted by the
    /// recent latency average and the consecutive-failure count.
    pub fn score(&self) -> f64 {
        let latency = self.latency_ewma_ms.load(Ordering::Relaxed) as f64;
        let failures = f64::from(self.consecutive_failures.load(Ordering::Relaxed));
        f64::from(self.config.priority) - ALPHA * latency - BETA * failures
    }

    /// Two consecutive successes drive the failure counter to zero; one
    /// is already enough, so health recovery is monotone.
    pub fn record_success(&self, latency_ms: u64) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let old = self.latency_ewma_ms.load(Ordering::Relaxed);
        let new = if old == 0 {
            latency_ms
        } else {
            old + (latency_ms.saturating_sub(old)) / EWMA_DIVISOR
                - (old.saturating_sub(latency_ms)) / EWMA_DIVISOR
        };
        self.latency_ewma_ms.store(new, Ordering::Relaxed);
    }

    /// Record a failure and open the circuit with exponential backoff
    /// plus jitter.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let exponent = failures.saturating_sub(1).min(7);
        let backoff = (BACKOFF_BASE_MS << exponent).min(BACKOFF_CAP_MS);
        let jitter = rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS);
        let until = now_ms() + (backoff + jitter) as i64;
        self.circuit_open_until_ms.store(until, Ordering::Release);
        tracing::warn!(
            endpoint = %self.config.name,
            failures,
            backoff_ms = backoff + jitter,
            "provider failure, circuit opened"
        );
    }

    pub fn snapshot(&self) -> EndpointHealth {
        let open_remaining = self.circuit_open_until_ms.load(Ordering::Acquire) - now_ms();
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        EndpointHealth {
            name: self.config.name.clone(),
            enabled: self.config.enabled,
            healthy: failures == 0,
            consecutive_failures: failures,
            last_latency_ms: self.latency_ewma_ms.load(Ordering::Relaxed),
            circuit_open_ms_remaining: open_remaining.max(0),
            total_requests: self.total_requests.load(Ordering::Relaxed),
        }
    }
}
