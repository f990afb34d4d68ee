//! Token bucket request pacing for catalog clients.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

/// Rate limit status of a pacer.
#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    pub requests_per_minute: u32,
    pub tokens_available: f32,
    pub next_available_in_ms: Option<u64>,
}

/// Token bucket for a single provider.
///
/// Tokens are added at a constant rate and consumed per request. The bucket
/// starts full so a short burst goes out immediately.
pub struct TokenBucket {
    capacity: f32,
    tokens: f32,
    /// Tokens added per second.
    refill_rate: f32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f32;
        Self {
            capacity,
            tokens: capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Take a token, or return how long to wait for the next one.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(self.wait_for_one())
        }
    }

    /// Drop all tokens and hold off for `duration`.
    ///
    /// Used when the provider answered 429 with a `Retry-After`.
    pub fn penalize(&mut self, duration: Duration) {
        self.tokens = 0.0;
        self.last_refill = Instant::now() + duration;
    }

    pub fn status(&mut self) -> RateLimitStatus {
        self.refill();
        RateLimitStatus {
            requests_per_minute: self.capacity as u32,
            tokens_available: self.tokens,
            next_available_in_ms: if self.tokens >= 1.0 {
                None
            } else {
                Some(self.wait_for_one().as_millis() as u64)
            },
        }
    }

    fn wait_for_one(&self) -> Duration {
        let now = Instant::now();
        let penalty = self.last_refill.saturating_duration_since(now);
        let tokens_needed = 1.0 - self.tokens;
        penalty + Duration::from_secs_f32(tokens_needed / self.refill_rate)
    }

    fn refill(&mut self) {
        let now = Instant::now();
        if now < self.last_refill {
            // still inside a penalty window
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Async wrapper around a [`TokenBucket`] shared by all calls of a client.
pub struct RequestPacer {
    name: String,
    bucket: Mutex<TokenBucket>,
}

impl RequestPacer {
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            name: name.into(),
            bucket: Mutex::new(TokenBucket::new(requests_per_minute)),
        }
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                match bucket.try_acquire() {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            debug!("{} rate limit: waiting {:?}", self.name, wait);
            sleep(wait).await;
        }
    }

    pub async fn penalize(&self, duration: Duration) {
        self.bucket.lock().await.penalize(duration);
    }

    pub async fn status(&self) -> RateLimitStatus {
        self.bucket.lock().await.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_starts_full() {
        let mut bucket = TokenBucket::new(3);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }

    #[test]
    fn test_wait_time_matches_refill_rate() {
        let mut bucket = TokenBucket::new(60);
        for _ in 0..60 {
            bucket.try_acquire().unwrap();
        }
        let wait = bucket.try_acquire().unwrap_err();
        // one token per second
        assert!(wait <= Duration::from_secs(1));
        assert!(wait > Duration::from_millis(900));
    }

    #[test]
    fn test_penalize_empties_bucket() {
        let mut bucket = TokenBucket::new(600);
        bucket.penalize(Duration::from_secs(5));
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait >= Duration::from_secs(4));

        let status = bucket.status();
        assert!(status.next_available_in_ms.is_some());
        assert_eq!(status.requests_per_minute, 600);
    }

    #[tokio::test]
    async fn test_pacer_waits_when_exhausted() {
        // 10 tokens per second
        let pacer = RequestPacer::new("test", 600);
        for _ in 0..600 {
            pacer.acquire().await;
        }
        let start = Instant::now();
        pacer.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
