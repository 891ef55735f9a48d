//! Process-wide token-bucket throttle shared by the chain RPC and source
//! registry clients.
//!
//! Every outbound request calls [`RateLimiter::acquire`] first. When an
//! endpoint keeps answering HTTP 429 after all retries, the client calls
//! [`RateLimiter::pause`] and every worker waits out the cooldown, so a run
//! slows down instead of failing.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

#[derive(Debug)]
pub struct RateLimiter {
    /// Sustained requests per second. `None` disables throttling.
    requests_per_second: Option<f64>,
    burst: f64,
    cooldown: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    paused_until: Option<Instant>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64, burst: u32, cooldown: Duration) -> Self {
        let rate = (requests_per_second.is_finite() && requests_per_second > 0.0)
            .then_some(requests_per_second);
        let burst = f64::from(burst.max(1));
        Self {
            requests_per_second: rate,
            burst,
            cooldown,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
                paused_until: None,
            }),
        }
    }

    /// A limiter that never waits. Used by tests and in-memory collaborators.
    pub fn unlimited() -> Self {
        Self::new(0.0, 1, Duration::ZERO)
    }

    /// Wait until a request slot is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_take(Instant::now()) {
                None => return,
                Some(wait) => wait,
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Suspend all callers for the configured cooldown.
    pub fn pause(&self) {
        self.pause_for(self.cooldown);
    }

    pub fn pause_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut state = self.lock_state();
        let extended = state.paused_until.is_none_or(|current| current < until);
        if extended {
            state.paused_until = Some(until);
            warn!(pause_ms = duration.as_millis() as u64, "rate limit budget exhausted, pausing requests");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.lock_state()
            .paused_until
            .is_some_and(|until| until > Instant::now())
    }

    /// Take a token if possible; otherwise return how long to wait.
    fn try_take(&self, now: Instant) -> Option<Duration> {
        let mut state = self.lock_state();

        if let Some(until) = state.paused_until {
            if until > now {
                return Some(until - now);
            }
            state.paused_until = None;
        }

        let rate = self.requests_per_second?;

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - state.tokens) / rate))
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BucketState> {
        // The state is plain numbers; a poisoned lock still holds usable data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_served_immediately() {
        let limiter = RateLimiter::new(2.0, 3, Duration::from_secs(5));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_beyond_burst_are_spaced() {
        let limiter = RateLimiter::new(2.0, 1, Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        // two refills at 2 req/s
        assert!(start.elapsed() >= Duration::from_millis(999));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_blocks_until_cooldown_passes() {
        let limiter = RateLimiter::new(100.0, 10, Duration::from_secs(30));
        limiter.pause();
        assert!(limiter.is_paused());
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(!limiter.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
